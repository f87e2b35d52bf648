// src/batch.rs
//
// =============================================================================
// NMR BATCH: SAMPLE BATCH MODEL (v 0.1 )
// =============================================================================
//
// Turns a batch description into an ordered list of samples.
//
// A batch file maps logical rack positions to sample records:
//
//   [1]
//   nmr_experiments = ["PROTON", { parameters = "K_WETDC", l30 = 14 }]
//   solvent = "DMSO"
//   sample_info = "reaction 12, crude"
//
// Entry order in the file is the acquisition order. Nothing here reorders.

use crate::core::{ExperimentOverrides, ExperimentRequest, Sample};
use crate::error::AcquisitionError;
use crate::params;
use crate::settings::NmrDefaults;
use anyhow::{Context, Result};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::ops::Index;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    samples: Vec<Sample>,
}

impl SampleBatch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index` in acquisition order (not its rack position).
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn experiment_count(&self) -> usize {
        self.samples.iter().map(|s| s.experiments.len()).sum()
    }

    /// Loads a `.toml`, `.json`, `.yaml` or `.yml` batch file.
    pub fn from_file(path: impl AsRef<Path>, defaults: &NmrDefaults) -> Result<Self> {
        let path = path.as_ref();
        let format = BatchFormat::from_path(path)?;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file {:?}", path))?;
        log::info!(
            "Batch file {:?} sha256={}",
            path,
            hex::encode(Sha256::digest(raw.as_bytes()))
        );

        let entries = format
            .parse(&raw)
            .with_context(|| format!("Failed to parse batch file {:?}", path))?;
        log::info!("Loaded {} sample request(s).", entries.len());

        Ok(Self::from_entries(entries.iter(), defaults)?)
    }

    /// Builds the batch from an already parsed mapping, keeping entry order.
    pub fn from_mapping(raw: &Value, defaults: &NmrDefaults) -> Result<Self, AcquisitionError> {
        let entries = raw.as_object().ok_or_else(|| {
            AcquisitionError::MalformedBatch(
                "batch must be a mapping of sample positions to sample records".into(),
            )
        })?;
        Self::from_entries(entries.iter().map(|(k, v)| (k.as_str(), v)), defaults)
    }

    /// Builds the batch from `(position key, sample record)` pairs in
    /// acquisition order. Repeated positions are rejected.
    pub fn from_entries<'a, I>(entries: I, defaults: &NmrDefaults) -> Result<Self, AcquisitionError>
    where
        I: IntoIterator<Item = (&'a str, &'a Value)>,
    {
        let mut seen = HashSet::new();
        let mut samples = Vec::new();

        for (key, info) in entries {
            let position = parse_position(key)?;
            if !seen.insert(position) {
                return Err(AcquisitionError::MalformedBatch(format!(
                    "sample position {} is declared more than once",
                    position
                )));
            }
            samples.push(parse_sample(position, info, defaults)?);
        }

        if samples.is_empty() {
            log::warn!("Batch contains no samples.");
        }

        Ok(Self { samples })
    }
}

impl Index<usize> for SampleBatch {
    type Output = Sample;

    fn index(&self, index: usize) -> &Sample {
        &self.samples[index]
    }
}

impl<'a> IntoIterator for &'a SampleBatch {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

// ============================================================================
// ENTRY PARSING
// ============================================================================

fn parse_position(key: &str) -> Result<i64, AcquisitionError> {
    key.trim().parse::<i64>().map_err(|_| {
        AcquisitionError::MalformedBatch(format!("sample position '{}' is not an integer", key))
    })
}

fn parse_sample(
    position: i64,
    info: &Value,
    defaults: &NmrDefaults,
) -> Result<Sample, AcquisitionError> {
    let malformed =
        |msg: &str| AcquisitionError::MalformedBatch(format!("sample {}: {}", position, msg));

    let record = info
        .as_object()
        .ok_or_else(|| malformed("entry must be a record"))?;

    let requested = match record.get("nmr_experiments") {
        Some(Value::Array(list)) if !list.is_empty() => list,
        Some(Value::Array(_)) => return Err(malformed("nmr_experiments is empty")),
        Some(_) => return Err(malformed("nmr_experiments must be a list")),
        None => return Err(malformed("nmr_experiments is missing")),
    };

    let mut experiments = Vec::with_capacity(requested.len());
    for entry in requested {
        let request = match entry {
            Value::String(name) => ExperimentRequest::Name(name.clone()),
            Value::Object(_) => serde_json::from_value::<ExperimentOverrides>(entry.clone())
                .map(ExperimentRequest::Overrides)
                .map_err(|e| malformed(&format!("experiment {}: {}", entry, e)))?,
            _ => {
                return Err(malformed(&format!(
                    "experiment {} must be a parameter set name or a record",
                    entry
                )))
            }
        };

        let resolution = params::resolve(&request, defaults, position)?;
        if let Some(warning) = resolution.warning {
            log::warn!("{}", warning);
        }
        log::debug!(
            "Sample {}: resolved {} ({} scans, extras {:?})",
            position,
            resolution.descriptor.parameter_set,
            resolution.descriptor.num_scans,
            resolution.descriptor.extras
        );
        experiments.push(resolution.descriptor);
    }

    let solvent = match record.get("solvent") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(malformed("solvent must be a string")),
        None => defaults.solvent.clone(),
    };

    let sample_info = record
        .get("sample_info")
        .cloned()
        .unwrap_or_else(|| defaults.sample_info.clone());

    Ok(Sample {
        position,
        solvent,
        sample_info,
        experiments,
    })
}

// ============================================================================
// FILE FORMATS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    Toml,
    Json,
    Yaml,
}

impl BatchFormat {
    pub fn from_path(path: &Path) -> Result<Self, AcquisitionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("toml") => Ok(BatchFormat::Toml),
            Some("json") => Ok(BatchFormat::Json),
            Some("yaml") | Some("yml") => Ok(BatchFormat::Yaml),
            _ => {
                log::error!("Only TOML, JSON or YAML batch files are supported.");
                Err(AcquisitionError::UnsupportedBatchFormat(
                    path.display().to_string(),
                ))
            }
        }
    }

    /// Parses the top-level mapping, keeping every entry in document order.
    pub fn parse(self, raw: &str) -> Result<BatchEntries> {
        let entries: BatchEntries = match self {
            BatchFormat::Toml => toml::from_str(raw)?,
            BatchFormat::Json => serde_json::from_str(raw)?,
            BatchFormat::Yaml => serde_yaml::from_str(raw)?,
        };
        Ok(entries)
    }
}

/// Top level of a batch file as written: repeated keys are kept, not merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchEntries(Vec<(String, Value)>);

impl BatchEntries {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'de> Deserialize<'de> for BatchEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = BatchEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of sample positions to sample records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<BatchEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                // YAML keys may arrive as integers.
                while let Some((key, record)) =
                    map.next_entry::<serde_json::Value, serde_json::Value>()?
                {
                    let key = match key {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    entries.push((key, record));
                }
                Ok(BatchEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExtraField, K_WETDC, MULTISUPPDC_F};
    use serde_json::json;

    fn defaults() -> NmrDefaults {
        NmrDefaults {
            parameter_set: "xaua".into(),
            num_scans: 16,
            pp_threshold: 1.0,
            field_presat: 100.0,
            l30: 12.0,
            solvent: "DMSO".into(),
            sample_info: json!("no info"),
        }
    }

    #[test]
    fn test_single_sample_with_defaults() {
        let batch =
            SampleBatch::from_mapping(&json!({"1": {"nmr_experiments": ["xaua"]}}), &defaults())
                .unwrap();
        assert_eq!(batch.len(), 1);
        let sample = &batch[0];
        assert_eq!(sample.position, 1);
        assert_eq!(sample.solvent, "DMSO");
        assert_eq!(sample.sample_info, json!("no info"));
        assert_eq!(sample.experiments[0].parameter_set, "xaua");
        assert_eq!(sample.experiments[0].num_scans, 16);
    }

    #[test]
    fn test_entry_order_is_preserved() {
        let raw = json!({
            "12": {"nmr_experiments": ["PROTON"]},
            "3": {"nmr_experiments": ["PROTON"]},
            "7": {"nmr_experiments": ["PROTON"]},
        });
        let batch = SampleBatch::from_mapping(&raw, &defaults()).unwrap();
        let positions: Vec<i64> = batch.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![12, 3, 7]);
    }

    #[test]
    fn test_experiments_keep_declared_order_and_overrides() {
        let raw = json!({
            "2": {
                "solvent": "CDCl3",
                "sample_info": {"smiles": "CCO"},
                "nmr_experiments": [
                    {"parameters": MULTISUPPDC_F, "pp_threshold": 5},
                    "PROTON",
                    {"parameters": K_WETDC, "num_scans": 64},
                ]
            }
        });
        let batch = SampleBatch::from_mapping(&raw, &defaults()).unwrap();
        let sample = batch.get(0).unwrap();
        assert_eq!(sample.solvent, "CDCl3");
        assert_eq!(sample.sample_info, json!({"smiles": "CCO"}));

        let sets: Vec<&str> = sample
            .experiments
            .iter()
            .map(|e| e.parameter_set.as_str())
            .collect();
        assert_eq!(sets, vec![MULTISUPPDC_F, "PROTON", K_WETDC]);
        assert_eq!(sample.experiments[0].extra(ExtraField::PpThreshold), Some(5.0));
        assert_eq!(sample.experiments[0].extra(ExtraField::FieldPresat), Some(100.0));
        assert_eq!(sample.experiments[2].num_scans, 64);
        assert_eq!(sample.experiments[2].extra(ExtraField::L30), Some(12.0));
        assert_eq!(batch.experiment_count(), 3);
    }

    #[test]
    fn test_missing_parameters_does_not_abort_loading() {
        let raw = json!({"1": {"nmr_experiments": [{"num_scans": 8}]}});
        let batch = SampleBatch::from_mapping(&raw, &defaults()).unwrap();
        assert_eq!(batch[0].experiments[0].parameter_set, "xaua");
        assert_eq!(batch[0].experiments[0].num_scans, 8);
    }

    #[test]
    fn test_malformed_entries() {
        let cases = [
            json!({"1": {"solvent": "DMSO"}}),
            json!({"1": {"nmr_experiments": []}}),
            json!({"1": {"nmr_experiments": "PROTON"}}),
            json!({"one": {"nmr_experiments": ["PROTON"]}}),
            json!({"1.5": {"nmr_experiments": ["PROTON"]}}),
            json!({"1": "PROTON"}),
            json!({"1": {"nmr_experiments": [42]}}),
            json!({"1": {"nmr_experiments": [{"parameters": 7}]}}),
            json!({"1": {"nmr_experiments": ["PROTON"], "solvent": 3}}),
            json!({"1": {"nmr_experiments": ["PROTON"]}, "01": {"nmr_experiments": ["PROTON"]}}),
            json!(["PROTON"]),
        ];
        for raw in cases {
            let err = SampleBatch::from_mapping(&raw, &defaults()).unwrap_err();
            assert!(
                matches!(err, AcquisitionError::MalformedBatch(_)),
                "{raw} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_out_of_rack_positions_still_load() {
        // Rack bounds are checked by the scheduler, not the loader.
        let raw = json!({"0": {"nmr_experiments": ["PROTON"]}});
        let batch = SampleBatch::from_mapping(&raw, &defaults()).unwrap();
        assert_eq!(batch[0].position, 0);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            BatchFormat::from_path(Path::new("a/batch.TOML")).unwrap(),
            BatchFormat::Toml
        );
        assert_eq!(
            BatchFormat::from_path(Path::new("batch.yml")).unwrap(),
            BatchFormat::Yaml
        );
        assert!(matches!(
            BatchFormat::from_path(Path::new("batch.csv")),
            Err(AcquisitionError::UnsupportedBatchFormat(_))
        ));
        assert!(BatchFormat::from_path(Path::new("batch")).is_err());
    }

    #[test]
    fn test_toml_tables_keep_document_order() {
        let raw = r#"
[5]
nmr_experiments = ["PROTON"]

[2]
nmr_experiments = [{ parameters = "K_WETDC", l30 = 20 }]
solvent = "D2O"
"#;
        let entries = BatchFormat::Toml.parse(raw).unwrap();
        let batch = SampleBatch::from_entries(entries.iter(), &defaults()).unwrap();
        assert_eq!(batch[0].position, 5);
        assert_eq!(batch[1].position, 2);
        assert_eq!(batch[1].solvent, "D2O");
        assert_eq!(batch[1].experiments[0].extra(ExtraField::L30), Some(20.0));
    }

    #[test]
    fn test_repeated_json_keys_are_kept_and_rejected() {
        let raw = r#"{
            "1": {"nmr_experiments": ["A"]},
            "2": {"nmr_experiments": ["B"]},
            "1": {"nmr_experiments": ["C"]}
        }"#;
        let entries = BatchFormat::Json.parse(raw).unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1", "2", "1"]);

        let err = SampleBatch::from_entries(entries.iter(), &defaults()).unwrap_err();
        assert_eq!(
            err,
            AcquisitionError::MalformedBatch("sample position 1 is declared more than once".into())
        );
    }

    #[test]
    fn test_yaml_integer_and_string_keys_collide() {
        let raw = "1:\n  nmr_experiments: [A]\n\"1\":\n  nmr_experiments: [C]\n";
        let entries = BatchFormat::Yaml.parse(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(
            SampleBatch::from_entries(entries.iter(), &defaults()),
            Err(AcquisitionError::MalformedBatch(_))
        ));
    }

    #[test]
    fn test_non_mapping_document_fails_to_parse() {
        assert!(BatchFormat::Json.parse(r#"["PROTON"]"#).is_err());
    }

    #[test]
    fn test_badly_typed_override_reports_decode_error() {
        for bad in [json!("64"), json!(-1)] {
            let raw = json!({"3": {"nmr_experiments": [{"parameters": "PROTON", "num_scans": bad}]}});
            match SampleBatch::from_mapping(&raw, &defaults()).unwrap_err() {
                AcquisitionError::MalformedBatch(msg) => {
                    assert!(msg.starts_with("sample 3: experiment"), "{msg}");
                    assert!(msg.contains("expected u32"), "{msg}");
                    assert!(!msg.contains("must be a parameter set name"), "{msg}");
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }
}
