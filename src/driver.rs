// src/driver.rs

use crate::config::DriverSection;
use crate::pin::Pin;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// What an automation run reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub ok: bool,
    pub pdf_path: Option<PathBuf>,
    pub message: Option<String>,
}

impl CheckOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            pdf_path: None,
            message: Some(message.into()),
        }
    }
}

/// Looks a PIN up on the register and leaves a PDF in `out_dir`.
///
/// Implementations never fail loudly; problems come back as an outcome
/// with `ok == false`.
#[async_trait]
pub trait RegisterCheck: Send + Sync {
    async fn check(&self, pin: &Pin, out_dir: &Path) -> CheckOutcome;
}

/// Runs an external program per check.
///
/// The program receives its configured args with `{pin}` and `{out_dir}`
/// filled in, and prints `{"ok": bool, "pdf_path": "..."}` as its last
/// stdout line.
pub struct CommandDriver {
    program: Option<String>,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    #[serde(default)]
    ok: bool,
    pdf_path: Option<PathBuf>,
    #[serde(alias = "error")]
    message: Option<String>,
}

impl CommandDriver {
    pub fn from_config(section: &DriverSection) -> Self {
        Self {
            program: section.program.clone(),
            args: section.args.clone(),
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.program.is_some()
    }
}

#[async_trait]
impl RegisterCheck for CommandDriver {
    async fn check(&self, pin: &Pin, out_dir: &Path) -> CheckOutcome {
        let Some(program) = &self.program else {
            warn!("No automation driver configured");
            return CheckOutcome::failed("No automation driver configured.");
        };

        if let Err(e) = tokio::fs::create_dir_all(out_dir).await {
            return CheckOutcome::failed(format!("Cannot create {}: {e}", out_dir.display()));
        }

        let args = expand_args(&self.args, pin, out_dir);
        info!(program, pin = %pin, out_dir = %out_dir.display(), "Starting register check");

        let run = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(program, error = %e, "Failed to start driver");
                return CheckOutcome::failed(format!("Failed to start {program}: {e}"));
            }
            Err(_) => {
                warn!(program, timeout_secs = self.timeout.as_secs(), "Driver timed out");
                return CheckOutcome::failed(format!(
                    "Driver timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(program, status = %output.status, stderr = %stderr.trim(), "Driver exited with failure");
        }

        let outcome = parse_reply(&String::from_utf8_lossy(&output.stdout), out_dir);
        info!(ok = outcome.ok, pdf = ?outcome.pdf_path, "Register check finished");
        outcome
    }
}

fn expand_args(args: &[String], pin: &Pin, out_dir: &Path) -> Vec<String> {
    let out_dir = out_dir.to_string_lossy();
    args.iter()
        .map(|a| a.replace("{pin}", pin.as_str()).replace("{out_dir}", &out_dir))
        .collect()
}

/// Read the outcome from the last non-blank stdout line. Relative PDF paths
/// are taken against `out_dir`; a path that does not exist is dropped.
fn parse_reply(stdout: &str, out_dir: &Path) -> CheckOutcome {
    let Some(last) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
        return CheckOutcome::failed("Driver printed nothing.");
    };

    let reply: DriverReply = match serde_json::from_str(last.trim()) {
        Ok(r) => r,
        Err(e) => {
            warn!(line = last, error = %e, "Driver output is not JSON");
            return CheckOutcome::failed(format!("Unreadable driver output: {last}"));
        }
    };

    let pdf_path = reply
        .pdf_path
        .map(|p| if p.is_relative() { out_dir.join(p) } else { p })
        .filter(|p| {
            let exists = p.is_file();
            if !exists {
                warn!(path = %p.display(), "Driver reported a PDF that does not exist");
            }
            exists
        });

    CheckOutcome {
        ok: reply.ok,
        pdf_path,
        message: reply.message,
    }
}
