//! Shared types for the voxshell gateway.
//!
//! Field names follow the wire format used by the browser client and the
//! `voxshell exec` client: PascalCase keys, byte buffers as base64 strings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::CREDENTIAL_ENV;

// ─── Tool invocation types ─────────────────────────────────────────────────

/// Body of `POST /tools/shell`. The first element is the executable, the rest
/// are its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub command: Vec<String>,
}

fn null_as_empty<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CommandRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Executable and arguments, or `None` for an empty command.
    pub fn split(&self) -> Option<(&str, &[String])> {
        self.command
            .split_first()
            .map(|(program, args)| (program.as_str(), args))
    }
}

/// Outcome of one tool invocation.
///
/// `ok` is true only when the process started and exited with status 0.
/// `exit_code` is -1 when the process never started or did not exit normally
/// (killed by a signal, timed out). `error` is empty exactly when `ok` is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandResult {
    #[serde(with = "base64_bytes", default)]
    pub stdout: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub stderr: Vec<u8>,
    #[serde(rename = "OK")]
    pub ok: bool,
    pub exit_code: i32,
    #[serde(default)]
    pub error: String,
}

impl CommandResult {
    /// Process ran to completion and reported `code`.
    pub fn exited(stdout: Vec<u8>, stderr: Vec<u8>, code: i32) -> Self {
        let ok = code == 0;
        Self {
            stdout,
            stderr,
            ok,
            exit_code: code,
            error: if ok {
                String::new()
            } else {
                format!("exit status {code}")
            },
        }
    }

    /// Process was terminated by `signal` before it could exit.
    pub fn signaled(stdout: Vec<u8>, stderr: Vec<u8>, signal: i32) -> Self {
        Self::abnormal(stdout, stderr, format!("signal: {signal}"))
    }

    /// Process ran past `timeout` and was killed.
    pub fn timed_out(stdout: Vec<u8>, stderr: Vec<u8>, timeout: Duration) -> Self {
        Self::abnormal(
            stdout,
            stderr,
            format!("command timed out after {}s and was killed", timeout.as_secs_f64()),
        )
    }

    /// Process could not be started at all.
    pub fn failed_to_start(reason: impl std::fmt::Display) -> Self {
        Self::abnormal(Vec::new(), Vec::new(), reason.to_string())
    }

    /// Any non-exit outcome: `ok=false`, `exit_code=-1`, non-empty error.
    pub fn abnormal(stdout: Vec<u8>, stderr: Vec<u8>, error: String) -> Self {
        let error = if error.is_empty() {
            "process terminated abnormally".to_string()
        } else {
            error
        };
        Self {
            stdout,
            stderr,
            ok: false,
            exit_code: -1,
            error,
        }
    }
}

// ─── Diagnostic log types ──────────────────────────────────────────────────

/// Body of `POST /log`, posted by the browser client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogEntry {
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub req: String,
}

// ─── Configuration ─────────────────────────────────────────────────────────

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Shell tool runner configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Wall-clock bound for one command. Output still open after the command
    /// exits gets a short drain grace on top of this.
    pub timeout: Duration,
    /// Cap per captured stream; the rest is drained and dropped.
    pub max_output_bytes: usize,
    /// Environment variables removed before spawning.
    pub scrubbed_env: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            scrubbed_env: vec![CREDENTIAL_ENV.to_string()],
        }
    }
}

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/realtime/calls";

/// Session relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub upstream_url: String,
    /// Value of the `OpenAI-Beta` header.
    pub beta: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: DEFAULT_UPSTREAM_URL.into(),
            beta: "realtime=v1".into(),
        }
    }
}

/// Serde adapter: `Vec<u8>` as a standard base64 string, `null` as empty.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
