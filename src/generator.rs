//! Text generation backend
//!
//! The orchestrator only sees [`TextGenerator`]. The shipped implementation pipes
//! the prompt into `ollama run <model>` and waits for the full response, killing
//! the process on timeout or Ctrl-C.

use crate::cancel::CancelToken;
use crate::error::GenerateError;
use crate::util::{run_command_with_timeout, truncate};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const SMOKE_PROMPT: &str = "Hello from smoke test\n";
const STDERR_PREVIEW_CHARS: usize = 400;

pub trait TextGenerator {
    /// Produce the full response for `prompt`. Output of a timed-out or cancelled
    /// call is never returned.
    fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
        model: &str,
        cancel: &CancelToken,
    ) -> Result<String, GenerateError>;
}

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, Duration::from_secs(2))
    }
}

pub fn build_prompt(file_path: &Path, content: &str, instruction: &str) -> String {
    format!(
        "\nYou are a coding assistant. Modify the file according to the user's instruction.\n\n\
         User instruction: {instruction}\n\n\
         File path: {path}\n\n\
         Original content:\n```\n{content}\n```\n\n\
         Return only the full new file contents (no explanations, no markdown fences). \
         If no change is needed, return the original content unchanged.\n",
        path = file_path.display(),
    )
}

/// `ollama run <model>` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    program: String,
}

impl OllamaGenerator {
    pub fn new() -> Self {
        Self {
            program: "ollama".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Names from `ollama list`; empty when the CLI is missing or fails.
    pub fn installed_models(&self) -> Vec<String> {
        let output = match Command::new(&self.program).arg("list").output() {
            Ok(out) if out.status.success() => out,
            Ok(out) => {
                tracing::debug!("`{} list` exited with {}", self.program, out.status);
                return Vec::new();
            }
            Err(err) => {
                tracing::debug!("`{} list` failed: {}", self.program, err);
                return Vec::new();
            }
        };
        parse_model_list(&String::from_utf8_lossy(&output.stdout))
    }

    /// Ask `model` for a tiny response to prove it loads and answers in time.
    pub fn smoke_test(&self, model: &str, timeout: Duration, cancel: &CancelToken) -> Result<(), String> {
        match self.generate(SMOKE_PROMPT, timeout, model, cancel) {
            Ok(out) if !out.trim().is_empty() => Ok(()),
            Ok(_) => Err("model produced no output".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }
}

impl Default for OllamaGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
        model: &str,
        cancel: &CancelToken,
    ) -> Result<String, GenerateError> {
        let mut command = Command::new(&self.program);
        command.args(["run", model]);

        let result = run_command_with_timeout(&mut command, Some(prompt), timeout, cancel)
            .map_err(GenerateError::Spawn)?;

        if result.cancelled {
            return Err(GenerateError::Cancelled);
        }
        if result.timed_out {
            return Err(GenerateError::Timeout(timeout));
        }
        if !result.success() {
            let status = result
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            let stderr = truncate(result.stderr.trim(), STDERR_PREVIEW_CHARS);
            return Err(GenerateError::ProcessFailure(format!("{}: {}", status, stderr)));
        }
        Ok(result.stdout)
    }
}

/// First column of every row after the header of `ollama list`.
pub fn parse_model_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChoice {
    /// The requested model is installed
    Requested,
    /// Use this installed model instead
    Fallback(String),
    /// Nothing suitable is installed
    Unavailable,
}

/// Pick the requested model if installed, else the first installed entry of `priority`.
pub fn choose_model(requested: &str, installed: &[String], priority: &[String]) -> ModelChoice {
    if installed.iter().any(|m| m == requested) {
        return ModelChoice::Requested;
    }
    priority
        .iter()
        .find(|candidate| installed.contains(candidate))
        .map(|m| ModelChoice::Fallback(m.clone()))
        .unwrap_or(ModelChoice::Unavailable)
}

/// Models to try after `failed` fails its smoke test: installed priority models
/// first, then any other installed model.
pub fn fallback_candidates(failed: &str, installed: &[String], priority: &[String]) -> Vec<String> {
    let mut out: Vec<String> = priority
        .iter()
        .filter(|m| m.as_str() != failed && installed.contains(m))
        .cloned()
        .collect();
    for model in installed {
        if model != failed && !out.contains(model) {
            out.push(model.clone());
        }
    }
    out
}

/// Clamp a smoke-test timeout to [5, 180] seconds.
pub fn smoke_timeout(llm_timeout_secs: u64) -> Duration {
    Duration::from_secs(llm_timeout_secs.clamp(5, 180))
}
