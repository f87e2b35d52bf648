// tests/common/mod.rs
//
// Recording stand-in for the spectrometer. Every command lands in a shared
// call log; one command name can be configured to fail.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use nmr_batch::{ExperimentHandle, NewExperiment, NmrDefaults, Spectrometer};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ChangeSample(u32),
    StartShimming,
    StopShimming,
    NewExperiment(NewExperiment),
    Lock(u32),
    SetScans(u32, u32),
    Launch(u32, String),
}

impl Call {
    fn name(&self) -> &'static str {
        match self {
            Call::ChangeSample(_) => "change_sample",
            Call::StartShimming => "start_shimming",
            Call::StopShimming => "stop_shimming",
            Call::NewExperiment(_) => "new_experiment",
            Call::Lock(_) => "lock",
            Call::SetScans(..) => "set_number_of_scans",
            Call::Launch(..) => "launch",
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingSpectrometer {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_on: Option<(&'static str, usize)>,
}

impl RecordingSpectrometer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `nth` (1-based) occurrence of `command`.
    pub fn failing_on(command: &'static str, nth: usize) -> Self {
        Self {
            calls: Arc::default(),
            fail_on: Some((command, nth)),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inserted_positions(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ChangeSample(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn launches(&self) -> Vec<(u32, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Launch(n, cmd) => Some((n, cmd)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        let name = call.name();
        calls.push(call);

        if let Some((command, nth)) = self.fail_on {
            let seen = calls.iter().filter(|c| c.name() == command).count();
            if name == command && seen == nth {
                return Err(anyhow!("simulated {} failure", command));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Spectrometer for RecordingSpectrometer {
    async fn change_sample(&mut self, position: u32) -> Result<()> {
        self.record(Call::ChangeSample(position))
    }

    async fn start_shimming(&mut self) -> Result<()> {
        self.record(Call::StartShimming)
    }

    async fn stop_shimming(&mut self) -> Result<()> {
        self.record(Call::StopShimming)
    }

    async fn new_experiment(
        &mut self,
        request: &NewExperiment,
    ) -> Result<Box<dyn ExperimentHandle>> {
        self.record(Call::NewExperiment(request.clone()))?;
        Ok(Box::new(RecordingExperiment {
            owner: self.clone(),
            number: request.number,
        }))
    }
}

struct RecordingExperiment {
    owner: RecordingSpectrometer,
    number: u32,
}

#[async_trait]
impl ExperimentHandle for RecordingExperiment {
    async fn lock(&mut self) -> Result<()> {
        self.owner.record(Call::Lock(self.number))
    }

    async fn set_number_of_scans(&mut self, scans: u32) -> Result<()> {
        self.owner.record(Call::SetScans(self.number, scans))
    }

    async fn launch(&mut self, command: &str) -> Result<()> {
        self.owner.record(Call::Launch(self.number, command.to_string()))
    }
}

pub fn defaults() -> NmrDefaults {
    NmrDefaults {
        parameter_set: "xaua".into(),
        num_scans: 16,
        pp_threshold: 1.0,
        field_presat: 100.0,
        l30: 12.0,
        solvent: "DMSO".into(),
        sample_info: json!(""),
    }
}
