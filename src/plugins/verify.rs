//! Verifier adapter: the external check run after every applied action.

use crate::core::config::VerifierConfig;
use crate::core::error::ReshelfError;
use crate::core::output;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Characters of verifier output kept in records.
pub const OUTPUT_TAIL_CHARS: usize = 4000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierOutcome {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub cancelled: bool,
    pub output: String,
}

impl VerifierOutcome {
    pub fn pass(output: impl Into<String>) -> Self {
        VerifierOutcome {
            passed: true,
            exit_code: Some(0),
            duration_ms: 0,
            timed_out: false,
            cancelled: false,
            output: output.into(),
        }
    }

    pub fn fail(exit_code: i32, output: impl Into<String>) -> Self {
        VerifierOutcome {
            passed: false,
            exit_code: Some(exit_code),
            duration_ms: 0,
            timed_out: false,
            cancelled: false,
            output: output.into(),
        }
    }

    /// Short failure cause for records and reports.
    pub fn cause(&self) -> String {
        if self.cancelled {
            "cancelled".to_string()
        } else if self.timed_out {
            format!("timed out after {}ms", self.duration_ms)
        } else {
            match self.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Blocking check of the repository after one applied action. `cancel` is
/// polled while waiting; a set flag must end the check as not passed.
pub trait Verifier {
    fn describe(&self) -> String;
    fn verify(&self, root: &Path, cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError>;
}

/// Used when no `[verifier]` is configured.
pub struct NoopVerifier;

impl Verifier for NoopVerifier {
    fn describe(&self) -> String {
        "none".to_string()
    }

    fn verify(&self, _root: &Path, cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError> {
        if cancel.load(Ordering::SeqCst) {
            let mut outcome = VerifierOutcome::fail(-1, "");
            outcome.exit_code = None;
            outcome.cancelled = true;
            return Ok(outcome);
        }
        Ok(VerifierOutcome::pass("no verifier configured"))
    }
}

pub struct CommandVerifier {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandVerifier {
    pub fn from_config(config: &VerifierConfig) -> Self {
        CommandVerifier {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_end(&mut buf);
        }
        buf
    })
}

impl Verifier for CommandVerifier {
    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    fn verify(&self, root: &Path, cancel: &AtomicBool) -> Result<VerifierOutcome, ReshelfError> {
        let start = Instant::now();
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ReshelfError::VerificationFailed {
                action: self.describe(),
                cause: format!("failed to start: {}", e),
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let mut cancelled = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
            } else if start.elapsed() > self.timeout {
                timed_out = true;
            }
            if cancelled || timed_out {
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let out = stdout.join().unwrap_or_default();
        let err = stderr.join().unwrap_or_default();
        let mut combined = String::from_utf8_lossy(&out).to_string();
        let err = String::from_utf8_lossy(&err);
        if !err.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&err);
        }

        let exit_code = status.and_then(|s| s.code());
        Ok(VerifierOutcome {
            passed: status.is_some_and(|s| s.success()),
            exit_code,
            duration_ms,
            timed_out,
            cancelled,
            output: output::tail_chars(&combined, OUTPUT_TAIL_CHARS),
        })
    }
}

pub fn from_config(config: Option<&VerifierConfig>) -> Box<dyn Verifier> {
    match config {
        Some(c) => Box::new(CommandVerifier::from_config(c)),
        None => Box::new(NoopVerifier),
    }
}
