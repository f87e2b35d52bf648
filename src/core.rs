// src/core.rs
//
// =============================================================================
// NMR BATCH: CORE SCHEMA (v 0.1 )
// =============================================================================
//
// The data contracts shared by the loader, the resolver and the scheduler.
//
// Design Principles:
// 1. Requests are what the user wrote; descriptors are what gets acquired.
// 2. Experiment-specific fields live in an explicit map keyed by `ExtraField`,
//    filled only from the per-kind table in `ExperimentKind::required_fields`.
// 3. Samples are immutable once the batch is loaded.

use crate::error::AcquisitionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Multi-suppression with 13C decoupling.
pub const MULTISUPPDC_F: &str = "MULTISUPPDC_f";
/// WET suppression with decoupling; needs the L30 loop counter.
pub const K_WETDC: &str = "K_WETDC";
/// Command issued for every parameter set without a dedicated launcher.
pub const GENERIC_ACQUISITION: &str = "xaua";

// ============================================================================
// 1. REQUESTS (Batch File Side)
// ============================================================================

/// One entry of a sample's `nmr_experiments` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExperimentRequest {
    /// `"PROTON"`
    Name(String),
    /// `{ parameters = "MULTISUPPDC_f", num_scans = 64, pp_threshold = 5 }`
    Overrides(ExperimentOverrides),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOverrides {
    #[serde(default)]
    pub parameters: Option<String>,
    #[serde(default)]
    pub num_scans: Option<u32>,
    #[serde(default)]
    pub pp_threshold: Option<f64>,
    #[serde(default)]
    pub field_presat: Option<f64>,
    #[serde(default)]
    pub l30: Option<f64>,
}

impl ExperimentOverrides {
    /// The override supplied for `field`, if any.
    pub fn extra(&self, field: ExtraField) -> Option<f64> {
        match field {
            ExtraField::PpThreshold => self.pp_threshold,
            ExtraField::FieldPresat => self.field_presat,
            ExtraField::L30 => self.l30,
        }
    }
}

// ============================================================================
// 2. EXPERIMENT KINDS & EXTRA FIELDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraField {
    /// Peak picking threshold for multi-suppression.
    PpThreshold,
    /// Presaturation field for multi-suppression.
    FieldPresat,
    /// Decoupling loop counter for K_WETDC.
    L30,
}

impl ExtraField {
    pub fn key(self) -> &'static str {
        match self {
            ExtraField::PpThreshold => "pp_threshold",
            ExtraField::FieldPresat => "field_presat",
            ExtraField::L30 => "l30",
        }
    }
}

impl fmt::Display for ExtraField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentKind {
    MultiSuppression,
    WetDecoupling,
    Generic,
}

impl ExperimentKind {
    pub fn of(parameter_set: &str) -> Self {
        match parameter_set {
            MULTISUPPDC_F => ExperimentKind::MultiSuppression,
            K_WETDC => ExperimentKind::WetDecoupling,
            _ => ExperimentKind::Generic,
        }
    }

    /// Fields that must be present on a resolved descriptor of this kind.
    /// A new kind that needs extra fields gets a row here.
    pub fn required_fields(self) -> &'static [ExtraField] {
        match self {
            ExperimentKind::MultiSuppression => {
                &[ExtraField::PpThreshold, ExtraField::FieldPresat]
            }
            ExperimentKind::WetDecoupling => &[ExtraField::L30],
            ExperimentKind::Generic => &[],
        }
    }
}

// ============================================================================
// 3. DESCRIPTORS (Acquisition Side)
// ============================================================================

/// A fully resolved experiment, ready to be sent to the spectrometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    pub parameter_set: String,
    pub num_scans: u32,
    #[serde(default)]
    pub extras: BTreeMap<ExtraField, f64>,
}

impl ExperimentDescriptor {
    pub fn kind(&self) -> ExperimentKind {
        ExperimentKind::of(&self.parameter_set)
    }

    pub fn extra(&self, field: ExtraField) -> Option<f64> {
        self.extras.get(&field).copied()
    }

    fn require(&self, field: ExtraField) -> Result<f64, AcquisitionError> {
        self.extra(field).ok_or_else(|| {
            AcquisitionError::MalformedBatch(format!(
                "experiment {} is missing {}",
                self.parameter_set, field
            ))
        })
    }

    /// The single launch command for this experiment.
    pub fn launch_command(&self) -> Result<String, AcquisitionError> {
        match self.kind() {
            ExperimentKind::WetDecoupling => {
                Ok(format!("L30 {}", self.require(ExtraField::L30)?))
            }
            ExperimentKind::MultiSuppression => Ok(format!(
                "multisupp13c --c13_decouple bb --fieldpresat {} --threshold_pp {}",
                self.require(ExtraField::FieldPresat)?,
                self.require(ExtraField::PpThreshold)?
            )),
            ExperimentKind::Generic => Ok(GENERIC_ACQUISITION.to_string()),
        }
    }
}

// ============================================================================
// 4. SAMPLES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// 1-based logical rack position, as written in the batch file.
    pub position: i64,
    pub solvent: String,
    /// Free text or a structured record; echoed into experiment titles.
    pub sample_info: Value,
    pub experiments: Vec<ExperimentDescriptor>,
}

impl Sample {
    /// `<batch>-<position>`, position zero-padded to two digits.
    pub fn name(&self, batch_name: &str) -> String {
        format!("{}-{:02}", batch_name, self.position)
    }

    pub fn info_text(&self) -> String {
        match &self.sample_info {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Three-line experiment title: sample name, sample info, parameter set.
    pub fn title(&self, batch_name: &str, experiment: &ExperimentDescriptor) -> String {
        [
            self.name(batch_name),
            self.info_text(),
            experiment.parameter_set.clone(),
        ]
        .join("\n")
    }
}

/// Experiment number of the `index`-th (0-based) experiment of a sample.
/// Gaps of ten leave room for experiments added by hand.
/// `None` once the number no longer fits in a `u32`.
pub fn experiment_number(index: usize) -> Option<u32> {
    u32::try_from(index)
        .ok()?
        .checked_add(1)?
        .checked_mul(10)
}
