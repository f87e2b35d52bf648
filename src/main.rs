// src/main.rs
//
// =============================================================================
// NMR BATCH: COMMAND LINE ENTRY POINT (v 0.1 )
// =============================================================================
//
// The wiring center.
//
// 1. Parse flags, open the run log.
// 2. Load settings, resolve paths and the rack layout.
// 3. Load the batch file.
// 4. Connect to the spectrometer (skipped for dry runs) and run the batch.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::{Path, PathBuf};

use nmr_batch::drivers::bridge::SpectrometerBridge;
use nmr_batch::drivers::Offline;
use nmr_batch::{logs, racks, AcquisitionScheduler, SampleBatch, Settings, ShimSchedule};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(name = "nmr-batch", version, about = "Run a batch of NMRs.")]
struct Cli {
    /// Batch information file (TOML, JSON or YAML).
    #[arg(long)]
    samples: Option<PathBuf>,

    /// Path to save the NMR data.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Specify rack type (overwrites the configuration file).
    #[arg(long, value_parser = ["KUKA", "PAL"], ignore_case = true)]
    rack: Option<String>,

    /// Perform a dry run (no samples will be run).
    #[arg(long)]
    dry: bool,

    /// Name of the logging file (default: <date>-Fourier80.log).
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// TOML file with acquisition settings.
    #[arg(long, default_value = "settings.toml")]
    settings: PathBuf,
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let prefix = Local::now().format("%Y-%m-%d").to_string();

    let logfile = cli
        .logfile
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}-Fourier80.log", prefix)));
    logs::init_file_logger(&logfile)?;

    if let Err(e) = run(cli, &prefix).await {
        log::error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli, prefix: &str) -> Result<()> {
    let cwd = std::env::current_dir().context("Cannot determine working directory")?;
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".into());
    log::info!("Code running in {:?} on {}.", cwd, host);

    // A. SETTINGS
    let settings = Settings::load(cwd.join(&cli.settings))?;
    log::info!("Settings loaded from {:?}.", cli.settings);

    // B. PATHS
    let samples_path = cwd.join(cli.samples.as_ref().unwrap_or(&settings.nmr.samples_file));
    log::info!("Acquiring spectra specified in {:?}.", samples_path);

    let batch_name = batch_name(&samples_path);
    let data_path = match &cli.data {
        Some(dir) => cwd.join(dir),
        None => cwd.join(format!("{}-{}-NMR", prefix, batch_name)),
    };
    log::info!("Data will be saved in {:?}.", data_path);

    // C. RACKS & SHIM POLICY
    let layout = cli.rack.as_deref().unwrap_or(&settings.nmr.rack_layout);
    let racks = racks::get_racks(layout)?;
    log::info!("Using {} rack configuration.", racks.layout);

    let schedule = ShimSchedule::from_setup(&settings.nmr);
    log::info!(
        "Shim sample in reference rack position {}.",
        schedule.shim_sample
    );
    log::info!(
        "Shimming every {:.2} hours.",
        schedule.reshim_interval.as_secs_f64() / 3600.0
    );
    log::info!(
        "Shimming time will be {:.2} minutes.",
        schedule.shim_time.as_secs_f64() / 60.0
    );

    // D. BATCH
    let batch = SampleBatch::from_file(&samples_path, &settings.defaults)?;

    // E. ACQUISITION
    let mut scheduler = AcquisitionScheduler::new(schedule, batch_name, data_path);
    let run_id = scheduler.run_id();
    log::info!("Run id {}.", run_id);

    if cli.dry {
        scheduler
            .run(&batch, racks, &mut Offline, true)
            .await
            .with_context(|| format!("Run {} aborted", run_id))?;
    } else {
        let mut bridge = SpectrometerBridge::connect(&settings.bridge)
            .await
            .context("Failed to connect to the spectrometer")?;
        log::info!(
            "Spectrometer interface connected at {}.",
            bridge.url().unwrap_or("(unknown address)")
        );
        scheduler
            .run(&batch, racks, &mut bridge, false)
            .await
            .with_context(|| format!("Run {} aborted", run_id))?;
    }

    Ok(())
}

/// The batch is named after the samples file, without extension.
fn batch_name(samples_path: &Path) -> String {
    samples_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "batch".into())
}
