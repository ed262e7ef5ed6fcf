use approx::assert_relative_eq;
use ndarray::{Array3, Axis};

use dose_volume::constraint::dose_at_volume;
use dose_volume::rasterizer::rasterize;
use dose_volume::{
    ConformalityEvaluator, Contour, DoseError, DoseGrid, DoseGridMetadata, DoseLoader, DoseType,
    DoseUnits, DvhBuilder, ExternalDoseTable, ImageGeometry, IngestOptions, PatientPosition,
    SamplingLattice, Structure, SummationType,
};

fn square(x0: f64, y0: f64, side: f64) -> Contour {
    Contour::new(vec![
        [x0, y0],
        [x0 + side, y0],
        [x0 + side, y0 + side],
        [x0, y0 + side],
    ])
}

fn disc(cx: f64, cy: f64, radius: f64) -> Contour {
    Contour::new(
        (0..72)
            .map(|k| {
                let angle = k as f64 * std::f64::consts::TAU / 72.0;
                [cx + radius * angle.cos(), cy + radius * angle.sin()]
            })
            .collect(),
    )
}

fn image_geometry(rows: usize, columns: usize, position: &str) -> ImageGeometry {
    ImageGeometry {
        rows,
        columns,
        pixel_spacing: (1.0, 1.0),
        image_position: [0.0, 0.0, 0.0],
        slice_spacing: 2.0,
        patient_position: position.to_string(),
    }
}

fn sparse_from(values: &Array3<f64>) -> ExternalDoseTable {
    ExternalDoseTable::Sparse {
        shape: values.dim(),
        entries: values
            .iter()
            .enumerate()
            .filter(|(_, value)| **value > 0.0)
            .map(|(index, &value)| (index as u64, value))
            .collect(),
    }
}

/// Ingested 3 × 20 × 20 grid whose dose rises along x.
fn ramp_grid() -> DoseGrid {
    let values = Array3::from_shape_fn((3, 20, 20), |(_, _, c)| 0.1 + 0.05 * c as f64);
    DoseLoader::ingest(
        &sparse_from(&values),
        &image_geometry(20, 20, "HFS"),
        1,
        &IngestOptions::default(),
    )
    .unwrap()
    .grid
}

#[test]
fn structure_without_contours_has_zero_dvh() {
    let dvh = DvhBuilder::default()
        .build(&Structure::new(7, "empty", 2.0), &ramp_grid())
        .unwrap();
    assert!(dvh.cumulative().iter().all(|&volume| volume == 0.0));
}

#[test]
fn cumulative_dvh_is_non_increasing() {
    let structure = Structure::new(1, "PTV", 2.0)
        .with_plane(0.0, vec![square(2.0, 2.0, 13.0)])
        .with_plane(-2.0, vec![square(2.0, 2.0, 13.0), square(6.0, 6.0, 4.0)]);
    let dvh = DvhBuilder::default().build(&structure, &ramp_grid()).unwrap();

    assert!(dvh.len() > 1);
    assert!(dvh.cumulative().windows(2).all(|pair| pair[0] >= pair[1]));
    assert_relative_eq!(dvh.cumulative()[0], dvh.total_volume(), epsilon = 1e-9);
    assert!(dose_at_volume(&dvh, 100.0).unwrap() <= dose_at_volume(&dvh, 0.0).unwrap());
}

#[test]
fn unit_square_rasterizes_to_a_fixed_point_set() {
    let axis: Vec<f64> = (-2..=12).map(f64::from).collect();
    let lattice = SamplingLattice::new(axis.clone(), axis, 1.0, 1.0);
    let contours = vec![square(0.0, 0.0, 10.0)];

    let mask = rasterize(&contours, &lattice);
    let inside: Vec<[f64; 2]> = mask
        .indexed_iter()
        .filter(|(_, inside)| **inside)
        .map(|((row, column), _)| lattice.point(row, column))
        .collect();
    let expected: Vec<[f64; 2]> = (0..10)
        .flat_map(|y| (0..10).map(move |x| [f64::from(x), f64::from(y)]))
        .collect();
    assert_eq!(inside, expected);
    assert_eq!(rasterize(&contours, &lattice), mask);
}

/// Supine 30 × 30 grid at 1 mm with frames at z = 0 and -2, `dose_cgy` on
/// the nodes covered by `contours`.
fn uniform_dose(contours: &[Contour], dose_cgy: f64) -> DoseGrid {
    let axis: Vec<f64> = (0..30).map(f64::from).collect();
    let lattice = SamplingLattice::new(axis.clone(), axis, 1.0, 1.0);
    let plane = rasterize(contours, &lattice).mapv(|inside| if inside { dose_cgy } else { 0.0 });
    let mut values = Array3::zeros((2, 30, 30));
    for mut frame in values.axis_iter_mut(Axis(0)) {
        frame.assign(&plane);
    }
    DoseGrid::new(
        values,
        DoseGridMetadata {
            dose_grid_scaling: 0.01,
            units: DoseUnits::Gray,
            dose_type: DoseType::Physical,
            summation: SummationType::Plan,
            origin: [0.0, 0.0, 0.0],
            pixel_spacing: (1.0, 1.0),
            frame_offsets: vec![0.0, -2.0],
            position: PatientPosition::HeadFirstSupine,
        },
    )
    .unwrap()
}

#[test]
fn uniformly_irradiated_disc() {
    let contours = vec![disc(14.5, 15.0, 9.2)];
    let grid = uniform_dose(&contours, 3000.0);
    let structure = Structure::new(1, "PTV", 2.0)
        .with_plane(0.0, contours.clone())
        .with_plane(-2.0, contours);
    let evaluator = ConformalityEvaluator::default();

    let covered = evaluator.evaluate(&structure, &grid, 2700.0).unwrap();
    assert_relative_eq!(covered.pitv, covered.tv, epsilon = 1e-12);
    assert_relative_eq!(covered.cv, covered.tv, epsilon = 1e-12);
    assert_relative_eq!(
        covered.conformality_index.as_fraction().unwrap(),
        1.0,
        epsilon = 1e-9
    );

    let missed = evaluator.evaluate(&structure, &grid, 3100.0).unwrap();
    assert_eq!(missed.cv, 0.0);
    assert_eq!(missed.pitv, 0.0);
    assert!(missed.conformality_index.is_undefined());
    assert!(missed.overdose_ratio.is_undefined());
}

#[test]
fn affine_field_is_reproduced_between_nodes() {
    let affine = |[x, y, z]: [f64; 3]| 2.0 * x + 3.0 * y - z + 100.0;
    let origin = [10.0, 5.0, 20.0];
    let offsets = vec![0.0, -1.5, -4.0, -4.5];
    // Prone: x and y decrease with column and row.
    let values = Array3::from_shape_fn((4, 6, 5), |(s, r, c)| {
        affine([
            origin[0] - 1.5 * c as f64,
            origin[1] - 2.0 * r as f64,
            origin[2] + offsets[s],
        ])
    });
    let grid = DoseGrid::new(
        values,
        DoseGridMetadata {
            dose_grid_scaling: 0.01,
            units: DoseUnits::Gray,
            dose_type: DoseType::Physical,
            summation: SummationType::Plan,
            origin,
            pixel_spacing: (2.0, 1.5),
            frame_offsets: offsets,
            position: PatientPosition::HeadFirstProne,
        },
    )
    .unwrap();

    let points = [
        [7.3, 0.1, 18.2],
        [4.0, -5.0, 15.5],
        [9.99, 4.2, 16.0],
        [5.5, -2.25, 19.9],
    ];
    for (point, dose) in points.iter().zip(grid.sample_cgy(&points)) {
        assert_relative_eq!(dose.unwrap(), affine(*point), epsilon = 1e-9);
    }
    assert_eq!(grid.sample_cgy(&[[11.0, 0.0, 18.0]]), vec![None]);
}

#[test]
fn sparse_index_overflow_is_a_geometry_mismatch() {
    let table = ExternalDoseTable::Sparse {
        shape: (2, 5, 5),
        entries: vec![(3, 1.0), (50, 2.0)],
    };
    let result = DoseLoader::ingest(
        &table,
        &image_geometry(10, 10, "FFS"),
        2,
        &IngestOptions::default(),
    );
    assert!(matches!(result, Err(DoseError::GeometryMismatch { .. })));
}

#[test]
fn uncompressed_sparse_table_equals_dense_reshape() {
    let geometry = image_geometry(4, 3, "FFS");
    let values = Array3::from_shape_fn((2, 4, 3), |(s, r, c)| (s * 12 + r * 3 + c) as f64 * 0.1);
    let dense = ExternalDoseTable::Dense {
        x: vec![0.0, -1.0, -2.0],
        y: vec![0.0, 1.0, 2.0, 3.0],
        z: vec![0.0, 2.0],
        values: values.clone(),
    };
    let options = IngestOptions::default();
    let from_dense = DoseLoader::ingest(&dense, &geometry, 1, &options).unwrap();
    let from_sparse = DoseLoader::ingest(&sparse_from(&values), &geometry, 1, &options).unwrap();
    assert_eq!(from_sparse.grid.values(), from_dense.grid.values());
    assert_relative_eq!(
        from_sparse.prescription_dose_cgy,
        from_dense.prescription_dose_cgy
    );
}

#[test]
fn ingested_grid_returns_intensities_on_its_lattice() {
    let values = Array3::from_shape_fn((2, 3, 3), |(s, r, c)| 0.2 + (s * 9 + r * 3 + c) as f64 * 0.07);
    let ingested = DoseLoader::ingest(
        &sparse_from(&values),
        &image_geometry(6, 6, "HFS"),
        2,
        &IngestOptions::default(),
    )
    .unwrap();
    let grid = &ingested.grid;
    let (x, y) = grid.patient_to_pixel_lut();
    let z = grid.frame_positions();
    let tolerance = values.iter().copied().fold(0.0, f64::max) / f64::from(u16::MAX);

    for (s, &pz) in z.iter().enumerate() {
        for (r, &py) in y.iter().enumerate() {
            for (c, &px) in x.iter().enumerate() {
                let gy = grid.sample_cgy(&[[px, py, pz]])[0].unwrap() / 100.0;
                assert_relative_eq!(gy, values[[s, r / 2, c / 2]], epsilon = tolerance);
            }
        }
    }
}
