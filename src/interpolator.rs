use ndarray::{Array2, ArrayView3};
use rayon::prelude::*;

use crate::geometry::{GridGeometry, SamplingLattice};

pub struct Interpolator;

impl Interpolator {
    /// Trilinear interpolation of `field` (indexed `[z][y][x]`) at fractional
    /// indices. The "+1" neighbour is clamped to the last index of each axis.
    #[inline]
    pub fn trilinear_interpolate(field: &ArrayView3<f64>, z: f64, y: f64, x: f64) -> f64 {
        let (depth, height, width) = field.dim();

        let z0 = (z.floor() as usize).min(depth - 1);
        let y0 = (y.floor() as usize).min(height - 1);
        let x0 = (x.floor() as usize).min(width - 1);
        let z1 = (z0 + 1).min(depth - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dz = z - z0 as f64;
        let dy = y - y0 as f64;
        let dx = x - x0 as f64;

        let lerp = |a: f64, b: f64, t: f64| a.mul_add(1.0 - t, b * t);

        let c00 = lerp(field[[z0, y0, x0]], field[[z0, y0, x1]], dx);
        let c01 = lerp(field[[z0, y1, x0]], field[[z0, y1, x1]], dx);
        let c10 = lerp(field[[z1, y0, x0]], field[[z1, y0, x1]], dx);
        let c11 = lerp(field[[z1, y1, x0]], field[[z1, y1, x1]], dx);

        let c0 = lerp(c00, c01, dy);
        let c1 = lerp(c10, c11, dy);

        lerp(c0, c1, dz)
    }

    /// Value of `field` at a physical point, or `None` when the point lies
    /// outside the grid.
    #[inline]
    pub fn sample(field: &ArrayView3<f64>, geometry: &GridGeometry, point: [f64; 3]) -> Option<f64> {
        if field.is_empty() {
            return None;
        }
        let [x, y, z] = point;
        let xi = geometry.x.fractional_index(x)?;
        let yi = geometry.y.fractional_index(y)?;
        let zi = geometry.z.fractional_index(z)?;
        Some(Self::trilinear_interpolate(field, zi, yi, xi))
    }

    /// Samples a batch of physical points in parallel. Results keep the
    /// order of `points`.
    pub fn resample(
        field: &ArrayView3<f64>,
        geometry: &GridGeometry,
        points: &[[f64; 3]],
    ) -> Vec<Option<f64>> {
        points
            .par_iter()
            .map(|&point| Self::sample(field, geometry, point))
            .collect()
    }

    /// Samples every node of an in-plane lattice at height `z`. Returns
    /// `None` when `z` lies outside the grid; nodes outside the grid in-plane
    /// are `None` in the returned plane.
    pub fn resample_plane(
        field: &ArrayView3<f64>,
        geometry: &GridGeometry,
        lattice: &SamplingLattice,
        z: f64,
    ) -> Option<Array2<Option<f64>>> {
        if field.is_empty() {
            return None;
        }
        let zi = geometry.z.fractional_index(z)?;
        let x_indices: Vec<Option<f64>> =
            lattice.x.iter().map(|&x| geometry.x.fractional_index(x)).collect();
        let (rows, columns) = lattice.dim();

        let values: Vec<Option<f64>> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|row| {
                let yi = geometry.y.fractional_index(lattice.y[row]);
                let x_indices = &x_indices;
                (0..columns).map(move |column| {
                    let yi = yi?;
                    let xi = x_indices[column]?;
                    Some(Self::trilinear_interpolate(field, zi, yi, xi))
                })
            })
            .collect();

        Array2::from_shape_vec((rows, columns), values).ok()
    }
}
