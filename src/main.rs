//! CLI for aligning a Geant4 simulation dose table with an image series.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use log::info;

use dose_volume::{
    DoseLoader, ImageGeometry, IngestOptions, IngestProgress, Result,
    config::DEFAULT_PRESCRIPTION_FRACTION,
};

#[derive(Parser)]
#[command(name = "dose-volume")]
#[command(about = "Ingest a Geant4 DICOM project dose table into an image geometry")]
struct Cli {
    /// Project directory containing Data.dat and dicom.out
    project: PathBuf,

    /// Image rows
    #[arg(long)]
    rows: usize,

    /// Image columns
    #[arg(long)]
    columns: usize,

    /// Pixel spacing in mm: row spacing, column spacing
    #[arg(long, num_args = 2, required = true, value_names = ["ROW", "COLUMN"])]
    pixel_spacing: Vec<f64>,

    /// Distance between slices in mm
    #[arg(long)]
    slice_spacing: f64,

    /// Patient position of the first voxel: x y z
    #[arg(long, num_args = 3, required = true, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    image_position: Vec<f64>,

    /// Patient position code (HFS, HFP, FFS, FFP)
    #[arg(long, default_value = "HFS")]
    patient_position: String,

    /// Share of the maximum dose taken as the prescription
    #[arg(long, default_value_t = DEFAULT_PRESCRIPTION_FRACTION)]
    prescription_fraction: f64,

    /// Increase verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let geometry = ImageGeometry {
        rows: cli.rows,
        columns: cli.columns,
        pixel_spacing: (cli.pixel_spacing[0], cli.pixel_spacing[1]),
        image_position: [
            cli.image_position[0],
            cli.image_position[1],
            cli.image_position[2],
        ],
        slice_spacing: cli.slice_spacing,
        patient_position: cli.patient_position,
    };

    let (table, compression) = DoseLoader::load_simulation_directory(&cli.project, &geometry)?;
    info!("Compression factor {compression}");

    let options = IngestOptions {
        prescription_fraction: cli.prescription_fraction,
    };
    let ingested = DoseLoader::ingest_with_progress(
        &table,
        &geometry,
        compression,
        &options,
        |IngestProgress { completed, total }| log::debug!("Upsampled slice {completed}/{total}"),
    )?;

    let grid = &ingested.grid;
    let (frames, rows, columns) = grid.dim();
    println!("Dose grid: {frames} frames of {rows}x{columns}");
    println!(
        "Dose grid scaling: {:.6e} Gy",
        grid.metadata().dose_grid_scaling
    );
    println!("Maximum dose: {:.1} cGy", grid.max_dose_cgy());
    println!(
        "Nominal prescription: {:.1} cGy",
        ingested.prescription_dose_cgy
    );
    Ok(())
}
