//! Subprocess-backed gateway to the platform CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use schemalib_shared::{GatewayConfig, GatewayError, GatewayErrorKind, SchemaLibError};

use crate::Gateway;
use crate::response::{is_rate_limited, parse_tolerant};

/// Executable names searched on `PATH`, in order.
pub const PROGRAM_CANDIDATES: &[&str] = &["sf", "sf.cmd", "sf.exe", "sfdx", "sfdx.cmd", "sfdx.exe"];

/// Resolve the CLI executable: an explicit path must exist, otherwise the
/// first [`PROGRAM_CANDIDATES`] entry found on `PATH` wins.
pub fn resolve_program(explicit: Option<&Path>) -> Result<PathBuf, SchemaLibError> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(SchemaLibError::config(format!(
            "gateway program not found at {}",
            path.display()
        )));
    }

    let search_path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&search_path) {
        for name in PROGRAM_CANDIDATES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!(program = %candidate.display(), "resolved gateway program");
                return Ok(candidate);
            }
        }
    }

    Err(SchemaLibError::config(
        "could not find the `sf` CLI on PATH; set [gateway] program in the config",
    ))
}

// ---------------------------------------------------------------------------
// CliGateway
// ---------------------------------------------------------------------------

/// Spawns the platform CLI once per call.
///
/// Rate-limited calls are retried with exponential backoff; timeouts and
/// other failures are returned to the caller untouched.
pub struct CliGateway {
    program: PathBuf,
    config: GatewayConfig,
    /// Start instant of the most recent call, for the per-call throttle.
    last_start: Mutex<Option<Instant>>,
}

impl CliGateway {
    /// Resolve the program from `config` and build a gateway.
    pub fn new(config: GatewayConfig) -> Result<Self, SchemaLibError> {
        let program = resolve_program(config.program.as_deref())?;
        Ok(Self::with_program(program, config))
    }

    /// Build a gateway around an already-resolved program.
    pub fn with_program(program: impl Into<PathBuf>, config: GatewayConfig) -> Self {
        Self {
            program: program.into(),
            config,
            last_start: Mutex::new(None),
        }
    }

    /// The executable this gateway spawns.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Wait until at least `throttle` has passed since the previous call started.
    async fn throttle(&self) {
        if self.config.throttle.is_zero() {
            return;
        }
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.config.throttle {
                tokio::time::sleep(self.config.throttle - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn run_once(
        &self,
        args: &[String],
        account: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(account) = account {
            if !args.iter().any(|a| a == "--target-org" || a == "-o") {
                cmd.arg("--target-org").arg(account);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program.display(), ?args, "invoking gateway");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => return Err(GatewayError::Timeout(timeout)),
            Ok(Err(e)) => {
                return Err(GatewayError::NonZeroExit {
                    code: None,
                    stdout: String::new(),
                    stderr: format!("failed to spawn {}: {e}", self.program.display()),
                });
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            if is_rate_limited(&stdout, &stderr) {
                return Err(GatewayError::RateLimited { attempts: 1 });
            }
            error!(
                code = ?output.status.code(),
                ?args,
                %stdout,
                %stderr,
                "gateway command failed"
            );
            return Err(GatewayError::NonZeroExit {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        parse_tolerant(&stdout)
    }
}

#[async_trait]
impl Gateway for CliGateway {
    async fn invoke(
        &self,
        args: &[String],
        account: Option<&str>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let mut attempt: u32 = 0;
        loop {
            self.throttle().await;
            match self.run_once(args, account, timeout).await {
                Err(e) if e.kind() == GatewayErrorKind::RateLimited => {
                    if attempt >= self.config.rate_limit_retries {
                        return Err(GatewayError::RateLimited {
                            attempts: attempt + 1,
                        });
                    }
                    let delay = self.config.rate_limit_backoff.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
