//! Runtime binary discovery.
//!
//! Probes a fixed ordered list of candidate locations and uses the first
//! binary that answers a `--version` probe within the deadline.

use std::path::PathBuf;
use std::time::Duration;

use fleetmind_core::CoreError;
use tokio::process::Command;

/// Deadline for a single `--version` probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Candidate binary locations, in probe order.
///
/// The bare name is resolved through `PATH`; the rest are well-known
/// install directories for each OS.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if cfg!(windows) {
        candidates.push(PathBuf::from("ollama.exe"));
        candidates.push(PathBuf::from("C:\\Program Files\\Ollama\\ollama.exe"));
        if let Some(home) = std::env::var_os("USERPROFILE") {
            let mut path = PathBuf::from(home);
            path.push("AppData\\Local\\Programs\\Ollama\\ollama.exe");
            candidates.push(path);
        }
    } else {
        candidates.push(PathBuf::from("ollama"));
        candidates.push(PathBuf::from("/usr/local/bin/ollama"));
        candidates.push(PathBuf::from("/usr/bin/ollama"));
        if let Some(home) = std::env::var_os("HOME") {
            let mut path = PathBuf::from(home);
            path.push(".ollama/bin/ollama");
            candidates.push(path);
        }
    }

    candidates
}

/// Find the runtime binary.
///
/// Returns the first candidate that exits successfully from a
/// `--version` probe within [`PROBE_TIMEOUT`].
pub async fn find_runtime_binary() -> Result<PathBuf, CoreError> {
    for candidate in candidate_paths() {
        if probe_binary(&candidate).await {
            tracing::info!(target: "fleetmind::llm", path = %candidate.display(), "found runtime binary");
            return Ok(candidate);
        }
    }
    Err(CoreError::BinaryNotFound)
}

/// Run `<binary> --version` and report whether it answered in time.
async fn probe_binary(path: &PathBuf) -> bool {
    let probe = Command::new(path)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            tracing::debug!(target: "fleetmind::llm", path = %path.display(), "version probe timed out");
            false
        }
    }
}
