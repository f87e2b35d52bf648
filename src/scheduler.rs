// src/scheduler.rs
//
// =============================================================================
// NMR BATCH: ACQUISITION SCHEDULER (v 0.1 )
// =============================================================================
//
// The Run Loop.
//
// Responsibilities:
// 1. Walk the batch in declared order, one sample at a time.
// 2. Keep the magnet shimmed (time-based reshim policy).
// 3. Translate logical positions into gripper positions.
// 4. Drive the experiment sequence of each sample through the spectrometer.
//
// Lifecycle per run:
//   Idle -> [Shimming] -> SampleLoaded -> Acquiring(expno) -> SampleLoaded
//        -> ... -> Idle            (batch complete)
//        -> ... -> Failed          (first fatal error, nothing after it runs)
//
// Dry runs make every decision and log it, but send nothing to the instrument
// and skip all waits.

use crate::batch::SampleBatch;
use crate::core::{experiment_number, ExperimentKind, ExtraField, Sample};
use crate::drivers::{NewExperiment, Spectrometer};
use crate::error::AcquisitionError;
use crate::racks::Racks;
use crate::settings::NmrSetup;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

// ============================================================================
// 1. SHIM POLICY
// ============================================================================

/// Timing and sample used for shimming and sample changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ShimSchedule {
    /// Gripper position of the shim standard.
    pub shim_sample: u32,
    pub reshim_interval: Duration,
    pub shim_time: Duration,
    /// Settle time after each sample change.
    pub wait_time: Duration,
}

impl ShimSchedule {
    pub fn from_setup(setup: &NmrSetup) -> Self {
        Self {
            shim_sample: setup.shim_sample,
            reshim_interval: setup.reshim_interval(),
            shim_time: setup.shim_duration(),
            wait_time: setup.settle_time(),
        }
    }
}

/// A reshim is due once strictly more than `interval` has passed.
pub fn reshim_due(since_last_shim: Duration, interval: Duration) -> bool {
    since_last_shim > interval
}

// ============================================================================
// 2. RUN STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Shimming,
    SampleLoaded { position: i64 },
    Acquiring { position: i64, expno: u32 },
    Failed,
}

#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    batch_name: String,
    data_path: PathBuf,
    racks: Option<Racks>,
    last_shim: Option<Instant>,
    phase: RunPhase,
}

// ============================================================================
// 3. THE SCHEDULER
// ============================================================================

pub struct AcquisitionScheduler {
    schedule: ShimSchedule,
    state: RunState,
}

impl AcquisitionScheduler {
    pub fn new(
        schedule: ShimSchedule,
        batch_name: impl Into<String>,
        data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schedule,
            state: RunState {
                run_id: Uuid::new_v4(),
                batch_name: batch_name.into(),
                data_path: data_path.into(),
                racks: None,
                last_shim: None,
                phase: RunPhase::Idle,
            },
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    pub fn phase(&self) -> &RunPhase {
        &self.state.phase
    }

    /// Completion time of the most recent shim procedure.
    pub fn last_shim(&self) -> Option<Instant> {
        self.state.last_shim
    }

    /// Rack layout of the current (or last) run.
    pub fn racks(&self) -> Option<&Racks> {
        self.state.racks.as_ref()
    }

    pub fn batch_name(&self) -> &str {
        &self.state.batch_name
    }

    pub fn data_path(&self) -> &Path {
        &self.state.data_path
    }

    /// Acquires every experiment of every sample in `batch`.
    ///
    /// Stops at the first fatal error; samples already acquired keep their
    /// data on the spectrometer side.
    pub async fn run(
        &mut self,
        batch: &SampleBatch,
        racks: Racks,
        instrument: &mut dyn Spectrometer,
        dry_run: bool,
    ) -> Result<(), AcquisitionError> {
        self.state.racks = Some(racks);
        self.state.phase = RunPhase::Idle;

        log::info!(
            "Run {} started: batch '{}' with {} sample(s) / {} experiment(s) on {} racks{}.",
            self.state.run_id,
            self.state.batch_name,
            batch.len(),
            batch.experiment_count(),
            racks.layout,
            if dry_run { " (dry run)" } else { "" }
        );

        match self.drive(batch, racks, instrument, dry_run).await {
            Ok(()) => {
                self.state.phase = RunPhase::Idle;
                log::info!(
                    "All spectra acquired for batch '{}'.",
                    self.state.batch_name
                );
                Ok(())
            }
            // Reported once, by the caller.
            Err(e) => {
                self.state.phase = RunPhase::Failed;
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        batch: &SampleBatch,
        racks: Racks,
        instrument: &mut dyn Spectrometer,
        dry_run: bool,
    ) -> Result<(), AcquisitionError> {
        // Leave the magnet in a known state before the first sample.
        if !dry_run {
            instrument
                .stop_shimming()
                .await
                .map_err(|e| AcquisitionError::instrument("stop_shimming", e))?;
            log::info!("Quickshim procedure completed.");
        }
        self.state.last_shim = Some(Instant::now());

        for sample in batch {
            self.acquire_sample(sample, &racks, instrument, dry_run)
                .await?;
        }

        if !dry_run {
            self.park_on_shim_sample(instrument).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Per-sample sequence
    // ------------------------------------------------------------------------

    async fn acquire_sample(
        &mut self,
        sample: &Sample,
        racks: &Racks,
        instrument: &mut dyn Spectrometer,
        dry_run: bool,
    ) -> Result<(), AcquisitionError> {
        let name = sample.name(&self.state.batch_name);

        // A. RESHIM CHECK
        let since_last_shim = self
            .state
            .last_shim
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);

        if reshim_due(since_last_shim, self.schedule.reshim_interval) {
            if dry_run {
                log::info!(
                    "Reshim due before {} ({:.0}s since last shim) - skipped in dry run.",
                    name,
                    since_last_shim.as_secs_f64()
                );
            } else {
                log::info!("Too much time since last shim - reshimming.");
                self.reshim(instrument).await?;
            }
        }

        // B. POSITION RESOLUTION
        let gripper = racks.physical_position(sample.position)?;
        log::debug!(
            "Sample {} will be inserted from gripper position {}.",
            name,
            gripper
        );

        // C. SAMPLE INSERTION
        if !dry_run {
            instrument
                .change_sample(gripper)
                .await
                .map_err(|e| AcquisitionError::instrument("change_sample", e))?;
        }
        self.state.phase = RunPhase::SampleLoaded {
            position: sample.position,
        };
        log::info!(
            "Sample {} inserted from rack position {:02}.",
            name,
            sample.position
        );

        if !dry_run {
            sleep(self.schedule.wait_time).await;
        }

        // D. EXPERIMENT SEQUENCE
        for (index, experiment) in sample.experiments.iter().enumerate() {
            let expno = experiment_number(index).ok_or_else(|| {
                AcquisitionError::MalformedBatch(format!(
                    "sample {}: too many experiments to number",
                    sample.position
                ))
            })?;
            self.state.phase = RunPhase::Acquiring {
                position: sample.position,
                expno,
            };

            let command = experiment.launch_command()?;

            if !dry_run {
                let request = NewExperiment {
                    path: self.state.data_path.clone(),
                    name: name.clone(),
                    number: expno,
                    title: sample.title(&self.state.batch_name, experiment),
                    solvent: sample.solvent.clone(),
                    parameters: experiment.parameter_set.clone(),
                    getprosol: true,
                    overwrite: true,
                };

                let mut handle = instrument
                    .new_experiment(&request)
                    .await
                    .map_err(|e| AcquisitionError::instrument("new_experiment", e))?;

                handle
                    .lock()
                    .await
                    .map_err(|e| AcquisitionError::instrument("lock", e))?;
                log::info!("Locking has finished.");

                handle
                    .set_number_of_scans(experiment.num_scans)
                    .await
                    .map_err(|e| AcquisitionError::instrument("set_number_of_scans", e))?;

                handle
                    .launch(&command)
                    .await
                    .map_err(|e| AcquisitionError::instrument(command.clone(), e))?;
            }

            log::info!(
                "Number of scans for experiment {} (expno {}) on sample {} is {}.",
                experiment.parameter_set,
                expno,
                name,
                experiment.num_scans
            );

            match experiment.kind() {
                ExperimentKind::WetDecoupling => log::info!(
                    "{}: L30 set to {}.",
                    experiment.parameter_set,
                    experiment.extra(ExtraField::L30).unwrap_or_default()
                ),
                ExperimentKind::MultiSuppression => log::info!(
                    "{}: presaturation of {} and peak picking threshold {}.",
                    experiment.parameter_set,
                    experiment.extra(ExtraField::FieldPresat).unwrap_or_default(),
                    experiment.extra(ExtraField::PpThreshold).unwrap_or_default()
                ),
                ExperimentKind::Generic => {}
            }
            log::info!(
                "Experiment {} completed ('{}').",
                experiment.parameter_set,
                command
            );

            self.state.phase = RunPhase::SampleLoaded {
                position: sample.position,
            };
        }

        log::info!("Experiments on sample {} completed.", name);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Shimming
    // ------------------------------------------------------------------------

    async fn reshim(&mut self, instrument: &mut dyn Spectrometer) -> Result<(), AcquisitionError> {
        self.state.phase = RunPhase::Shimming;

        instrument
            .change_sample(self.schedule.shim_sample)
            .await
            .map_err(|e| AcquisitionError::instrument("change_sample", e))?;
        log::info!("Shim sample inserted.");
        sleep(self.schedule.wait_time).await;

        instrument
            .start_shimming()
            .await
            .map_err(|e| AcquisitionError::instrument("start_shimming", e))?;
        log::info!("Shimming procedure started.");
        sleep(self.schedule.shim_time).await;

        instrument
            .stop_shimming()
            .await
            .map_err(|e| AcquisitionError::instrument("stop_shimming", e))?;
        log::info!("Quick shim procedure stopped. Resuming acquisition.");

        self.state.last_shim = Some(Instant::now());
        Ok(())
    }

    /// Leaves the shim sample in the magnet, shimming, once the batch is done.
    async fn park_on_shim_sample(
        &mut self,
        instrument: &mut dyn Spectrometer,
    ) -> Result<(), AcquisitionError> {
        instrument
            .change_sample(self.schedule.shim_sample)
            .await
            .map_err(|e| AcquisitionError::instrument("change_sample", e))?;
        log::info!(
            "Shim sample inserted (position {}).",
            self.schedule.shim_sample
        );

        instrument
            .start_shimming()
            .await
            .map_err(|e| AcquisitionError::instrument("start_shimming", e))?;
        log::info!("Started the quickshim procedure.");
        Ok(())
    }
}
