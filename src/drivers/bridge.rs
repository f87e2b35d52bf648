// src/drivers/bridge.rs
//
// =============================================================================
// NMR BATCH: SPECTROMETER BRIDGE DRIVER (v 0.1 )
// =============================================================================
//
// The Persistent Helper.
//
// The vendor control API is only reachable from a helper process, so this
// driver keeps one such process alive for the whole batch and talks to it
// over its pipes.
//
// Responsibilities:
// 1. Boot the helper and wait for its `READY [url]` handshake.
// 2. Stream one JSON request line per command, read one JSON response line.
// 3. Forward helper stderr to the log in real time.
//
// Protocol:
//   -> {"cmd":"change_sample","position":15}
//   <- {"ok":true}
//   -> {"cmd":"new_experiment","path":"...","name":"b-01","number":10,...}
//   <- {"ok":true,"handle":"b-01/10"}
//   <- {"ok":false,"error":"lock failed"}

use crate::drivers::{ExperimentHandle, NewExperiment, Spectrometer};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

// ============================================================================
// 1. CONFIGURATION
// ============================================================================

/// `[bridge]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Seconds to wait for the helper's READY line.
    pub handshake_timeout: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            // Unbuffered stdout, otherwise responses sit in the helper's buffer.
            args: vec!["-u".into(), "-m".into(), "fourier_nmr_driver.bridge".into()],
            handshake_timeout: 30,
        }
    }
}

// ============================================================================
// 2. THE CONNECTION (Running Process)
// ============================================================================

struct BridgeConnection {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl BridgeConnection {
    /// Sends one request and waits for its response.
    async fn call(&mut self, request: &BridgeRequest<'_>) -> Result<BridgeResponse> {
        let line = serde_json::to_string(request)?;
        log::debug!("bridge <- {}", line);

        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to bridge stdin")?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let mut resp_line = String::new();
        let bytes_read = self
            .stdout
            .read_line(&mut resp_line)
            .await
            .context("Failed to read from bridge stdout")?;

        if bytes_read == 0 {
            let _ = self.process.kill().await;
            return Err(anyhow!(
                "Spectrometer bridge exited unexpectedly (EOF on stdout) during '{}'",
                request.name()
            ));
        }
        log::debug!("bridge -> {}", resp_line.trim());

        let resp: BridgeResponse = serde_json::from_str(&resp_line)
            .with_context(|| format!("Invalid JSON from bridge: '{}'", resp_line.trim()))?;

        if !resp.ok {
            return Err(anyhow!(
                "Spectrometer rejected '{}': {}",
                request.name(),
                resp.error.as_deref().unwrap_or("no reason given")
            ));
        }
        Ok(resp)
    }
}

// ============================================================================
// 3. THE DRIVER
// ============================================================================

pub struct SpectrometerBridge {
    conn: Arc<Mutex<BridgeConnection>>,
    url: Option<String>,
}

impl SpectrometerBridge {
    /// Boots the helper process and completes the handshake.
    pub async fn connect(cfg: &BridgeConfig) -> Result<Self> {
        let mut cmd = Command::new(&cfg.program);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn spectrometer bridge '{}'", cfg.program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Bridge stdin unavailable"))?;
        let raw_stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Bridge stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::warn!("[BRIDGE] {}", line);
                }
            });
        }

        let mut stdout = BufReader::new(raw_stdout);
        let mut handshake = String::new();

        let url = match tokio::time::timeout(
            Duration::from_secs(cfg.handshake_timeout),
            stdout.read_line(&mut handshake),
        )
        .await
        {
            Ok(Ok(n)) if n > 0 => match handshake.trim().strip_prefix("READY") {
                Some(rest) => Some(rest.trim().to_string()).filter(|u| !u.is_empty()),
                None => {
                    let _ = child.kill().await;
                    return Err(anyhow!(
                        "Bridge boot failed. Expected 'READY', got: '{}'",
                        handshake.trim()
                    ));
                }
            },
            Ok(Ok(_)) => return Err(anyhow!("Bridge closed stdout during boot")),
            Ok(Err(e)) => return Err(e).context("Failed to read bridge handshake"),
            Err(_) => {
                let _ = child.kill().await;
                return Err(anyhow!(
                    "Bridge did not report READY within {}s",
                    cfg.handshake_timeout
                ));
            }
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(BridgeConnection {
                process: child,
                stdin,
                stdout,
            })),
            url,
        })
    }

    /// Address of the spectrometer interface, as reported in the handshake.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn call(&self, request: &BridgeRequest<'_>) -> Result<BridgeResponse> {
        self.conn.lock().await.call(request).await
    }
}

#[async_trait]
impl Spectrometer for SpectrometerBridge {
    async fn change_sample(&mut self, position: u32) -> Result<()> {
        self.call(&BridgeRequest::ChangeSample { position }).await?;
        Ok(())
    }

    async fn start_shimming(&mut self) -> Result<()> {
        self.call(&BridgeRequest::StartShimming).await?;
        Ok(())
    }

    async fn stop_shimming(&mut self) -> Result<()> {
        self.call(&BridgeRequest::StopShimming).await?;
        Ok(())
    }

    async fn new_experiment(
        &mut self,
        request: &NewExperiment,
    ) -> Result<Box<dyn ExperimentHandle>> {
        let resp = self.call(&BridgeRequest::NewExperiment(request)).await?;
        let handle = resp
            .handle
            .ok_or_else(|| anyhow!("Bridge created experiment without returning a handle"))?;

        Ok(Box::new(BridgeExperiment {
            conn: self.conn.clone(),
            handle,
        }))
    }
}

/// One experiment entry living on the other side of the bridge.
struct BridgeExperiment {
    conn: Arc<Mutex<BridgeConnection>>,
    handle: String,
}

#[async_trait]
impl ExperimentHandle for BridgeExperiment {
    async fn lock(&mut self) -> Result<()> {
        let req = BridgeRequest::Lock {
            handle: &self.handle,
        };
        self.conn.lock().await.call(&req).await?;
        Ok(())
    }

    async fn set_number_of_scans(&mut self, scans: u32) -> Result<()> {
        let req = BridgeRequest::SetNumberOfScans {
            handle: &self.handle,
            scans,
        };
        self.conn.lock().await.call(&req).await?;
        Ok(())
    }

    async fn launch(&mut self, command: &str) -> Result<()> {
        let req = BridgeRequest::Launch {
            handle: &self.handle,
            command,
        };
        self.conn.lock().await.call(&req).await?;
        Ok(())
    }
}

// ============================================================================
// 4. PROTOCOL SCHEMA (Private)
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    ChangeSample { position: u32 },
    StartShimming,
    StopShimming,
    NewExperiment(&'a NewExperiment),
    Lock { handle: &'a str },
    SetNumberOfScans { handle: &'a str, scans: u32 },
    Launch { handle: &'a str, command: &'a str },
}

impl BridgeRequest<'_> {
    fn name(&self) -> &'static str {
        match self {
            BridgeRequest::ChangeSample { .. } => "change_sample",
            BridgeRequest::StartShimming => "start_shimming",
            BridgeRequest::StopShimming => "stop_shimming",
            BridgeRequest::NewExperiment(_) => "new_experiment",
            BridgeRequest::Lock { .. } => "lock",
            BridgeRequest::SetNumberOfScans { .. } => "set_number_of_scans",
            BridgeRequest::Launch { .. } => "launch",
        }
    }
}

#[derive(Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    error: Option<String>,
}
