// src/params.rs
//
// =============================================================================
// NMR BATCH: PARAMETER RESOLVER (v 0.1 )
// =============================================================================
//
// Merges one experiment request against the global defaults.
//
// Precedence: request override > global default > omission.
// Extra fields are attached only when the resolved parameter set's kind
// requires them (see `ExperimentKind::required_fields`).

use crate::core::{ExperimentDescriptor, ExperimentRequest, ExtraField};
use crate::error::AcquisitionError;
use crate::settings::NmrDefaults;
use std::collections::BTreeMap;

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub descriptor: ExperimentDescriptor,
    /// Set when the request named no parameter set and the default was used.
    pub warning: Option<AcquisitionError>,
}

fn default_extra(defaults: &NmrDefaults, field: ExtraField) -> f64 {
    match field {
        ExtraField::PpThreshold => defaults.pp_threshold,
        ExtraField::FieldPresat => defaults.field_presat,
        ExtraField::L30 => defaults.l30,
    }
}

/// Resolves `request` for the sample at logical `position`.
pub fn resolve(
    request: &ExperimentRequest,
    defaults: &NmrDefaults,
    position: i64,
) -> Result<Resolution, AcquisitionError> {
    let mut warning = None;

    let (parameter_set, num_scans, overrides) = match request {
        ExperimentRequest::Name(name) => (name.clone(), defaults.num_scans, None),
        ExperimentRequest::Overrides(o) => {
            let parameter_set = match &o.parameters {
                Some(name) => name.clone(),
                None => {
                    warning = Some(AcquisitionError::UnresolvedParameterSet {
                        position,
                        fallback: defaults.parameter_set.clone(),
                    });
                    defaults.parameter_set.clone()
                }
            };
            (parameter_set, o.num_scans.unwrap_or(defaults.num_scans), Some(o))
        }
    };

    if num_scans == 0 {
        return Err(AcquisitionError::MalformedBatch(format!(
            "sample {}: num_scans for {} must be a positive integer",
            position, parameter_set
        )));
    }

    let mut descriptor = ExperimentDescriptor {
        parameter_set,
        num_scans,
        extras: BTreeMap::new(),
    };

    for &field in descriptor.kind().required_fields() {
        let value = overrides
            .and_then(|o| o.extra(field))
            .unwrap_or_else(|| default_extra(defaults, field));
        descriptor.extras.insert(field, value);
    }

    Ok(Resolution {
        descriptor,
        warning,
    })
}
