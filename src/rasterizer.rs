use ndarray::Array2;
use rayon::prelude::*;

use crate::geometry::{Bounds, SamplingLattice};
use crate::structure::Contour;

/// Ray-crossing test: casts a ray from `point` towards +x and counts edge
/// crossings. Points on a polygon's minimum-x/minimum-y edges are inside,
/// points on its maximum edges are outside.
#[inline]
pub fn point_in_polygon(point: [f64; 2], polygon: &[[f64; 2]]) -> bool {
    let [px, py] = point;
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let [xi, yi] = polygon[i];
        let [xj, yj] = polygon[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Occupancy mask (rows × columns) of a plane's contours over `lattice`.
///
/// Contours are combined with the even-odd rule: a lattice point is inside
/// when it falls within an odd number of contours, so nested contours cut
/// holes and disjoint contours add islands. Contours with fewer than three
/// points are ignored.
pub fn rasterize(contours: &[Contour], lattice: &SamplingLattice) -> Array2<bool> {
    let polygons: Vec<(&[[f64; 2]], Bounds)> = contours
        .iter()
        .filter(|contour| contour.points.len() >= 3)
        .filter_map(|contour| Some((contour.points.as_slice(), contour.bounds()?)))
        .collect();
    let (rows, columns) = lattice.dim();

    let occupancy: Vec<bool> = (0..rows)
        .into_par_iter()
        .flat_map_iter(|row| {
            let polygons = &polygons;
            (0..columns).map(move |column| {
                let point = lattice.point(row, column);
                let crossings = polygons
                    .iter()
                    .filter(|(polygon, bounds)| {
                        contains(bounds, point) && point_in_polygon(point, polygon)
                    })
                    .count();
                crossings % 2 == 1
            })
        })
        .collect();

    Array2::from_shape_vec((rows, columns), occupancy)
        .unwrap_or_else(|_| Array2::from_elem((rows, columns), false))
}

#[inline]
fn contains(bounds: &Bounds, [x, y]: [f64; 2]) -> bool {
    x >= bounds.min_x && x <= bounds.max_x && y >= bounds.min_y && y <= bounds.max_y
}

/// Unsigned polygon area in mm² (shoelace formula, closing edge included).
pub fn contour_area(points: &[[f64; 2]]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let [xj, yj] = points[j];
        let [xi, yi] = points[i];
        twice_area += xj * yi - xi * yj;
        j = i;
    }
    (twice_area / 2.0).abs()
}

/// Index of the contour with the largest area on a plane.
pub fn largest_contour(contours: &[Contour]) -> Option<usize> {
    contours
        .iter()
        .enumerate()
        .filter(|(_, contour)| contour.points.len() >= 3)
        .max_by(|(_, a), (_, b)| a.area().total_cmp(&b.area()))
        .map(|(index, _)| index)
}
