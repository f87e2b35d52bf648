// src/lib.rs
//
// =============================================================================
// NMR BATCH: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod batch;
pub mod core;
pub mod drivers;
pub mod error;
pub mod logs;
pub mod params;
pub mod racks;
pub mod scheduler;
pub mod settings;

// 2. Re-exports (The Public API)

pub use crate::batch::SampleBatch;
pub use crate::core::{ExperimentDescriptor, ExperimentRequest, ExtraField, Sample};
pub use crate::drivers::{ExperimentHandle, NewExperiment, Spectrometer};
pub use crate::error::AcquisitionError;
pub use crate::racks::{RackLayout, Racks};
pub use crate::scheduler::{AcquisitionScheduler, RunPhase, ShimSchedule};
pub use crate::settings::{NmrDefaults, NmrSetup, Settings};
