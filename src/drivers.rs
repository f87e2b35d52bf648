// src/drivers.rs
//
// =============================================================================
// NMR BATCH: SPECTROMETER PORT (v 0.1 )
// =============================================================================
//
// The Hexagonal Port.
//
// Responsibilities:
// 1. Define the `Spectrometer` / `ExperimentHandle` traits (The Contract).
// 2. Provide the offline sink used for dry runs.
//
// The scheduler only ever talks to these traits. Every call is blocking from
// the scheduler's point of view and may fail; failures are never retried.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

pub mod bridge;

// ============================================================================
// 1. THE CONTRACT
// ============================================================================

/// Everything the spectrometer needs to create a new experiment entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewExperiment {
    /// Data directory of the batch.
    pub path: PathBuf,
    /// Dataset name, `<batch>-<position>`.
    pub name: String,
    pub number: u32,
    pub title: String,
    pub solvent: String,
    pub parameters: String,
    /// Load the probe/solvent-dependent pulse parameters.
    pub getprosol: bool,
    pub overwrite: bool,
}

#[async_trait]
pub trait Spectrometer: Send {
    /// Moves the sample at gripper `position` into the magnet.
    async fn change_sample(&mut self, position: u32) -> Result<()>;

    async fn start_shimming(&mut self) -> Result<()>;

    async fn stop_shimming(&mut self) -> Result<()>;

    async fn new_experiment(&mut self, request: &NewExperiment)
        -> Result<Box<dyn ExperimentHandle>>;
}

#[async_trait]
pub trait ExperimentHandle: Send {
    /// Locks the spectrometer onto this experiment's solvent.
    async fn lock(&mut self) -> Result<()>;

    async fn set_number_of_scans(&mut self, scans: u32) -> Result<()>;

    /// Runs a spectrometer command line against this experiment.
    async fn launch(&mut self, command: &str) -> Result<()>;
}

// ============================================================================
// 2. OFFLINE SINK
// ============================================================================

/// Stand-in used for dry runs, where no hardware is attached.
/// Any command reaching it is a scheduling bug, so every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

impl Offline {
    fn refuse(command: &str) -> anyhow::Error {
        anyhow!("spectrometer is offline (dry run), refused '{}'", command)
    }
}

#[async_trait]
impl Spectrometer for Offline {
    async fn change_sample(&mut self, _position: u32) -> Result<()> {
        Err(Self::refuse("change_sample"))
    }

    async fn start_shimming(&mut self) -> Result<()> {
        Err(Self::refuse("start_shimming"))
    }

    async fn stop_shimming(&mut self) -> Result<()> {
        Err(Self::refuse("stop_shimming"))
    }

    async fn new_experiment(
        &mut self,
        _request: &NewExperiment,
    ) -> Result<Box<dyn ExperimentHandle>> {
        Err(Self::refuse("new_experiment"))
    }
}
