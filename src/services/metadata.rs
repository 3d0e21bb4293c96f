use crate::config::MetadataConfig;
use serde_json::Value;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("{command} gave no answer within {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Secondary system of record for attributes the store is missing.
pub trait MetadataSource {
    /// Scalar value of `variable` for `subject_id`, or `None` when the source
    /// has nothing usable. Transport failures are `None` as well.
    fn lookup(&self, variable: &str, subject_id: &str) -> Option<Value>;
}

/// Looks values up with the `opal` command-line client:
/// `opal data <variable> -o <endpoint> -u <user> -p <password> -i <subject>`.
pub struct OpalClient {
    command: String,
    endpoint: String,
    username: String,
    password: String,
    timeout: Duration,
}

impl OpalClient {
    pub fn new(config: &MetadataConfig) -> Self {
        Self {
            command: config.command.clone(),
            endpoint: config.endpoint(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    fn args<'a>(&'a self, variable: &'a str, subject_id: &'a str) -> [&'a str; 10] {
        [
            "data",
            variable,
            "-o",
            &self.endpoint,
            "-u",
            &self.username,
            "-p",
            &self.password,
            "-i",
            subject_id,
        ]
    }

    pub fn fetch(&self, variable: &str, subject_id: &str) -> Result<Value, MetadataError> {
        log::debug!(
            "{} data {} -o {} -i {}",
            self.command,
            variable,
            self.endpoint,
            subject_id
        );

        let mut child = Command::new(&self.command)
            .args(self.args(variable, subject_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MetadataError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        // Drain both pipes while waiting so a chatty client cannot block.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            return Err(MetadataError::Exit {
                command: self.command.clone(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        parse_response(&stdout)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, MetadataError> {
        let started_at = Instant::now();
        let spawn_error = |source| MetadataError::Spawn {
            command: self.command.clone(),
            source,
        };

        loop {
            if let Some(status) = child.try_wait().map_err(spawn_error)? {
                return Ok(status);
            }
            if started_at.elapsed() >= self.timeout {
                let _ = child.kill();
                child.wait().map_err(spawn_error)?;
                return Err(MetadataError::Timeout {
                    command: self.command.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl MetadataSource for OpalClient {
    fn lookup(&self, variable: &str, subject_id: &str) -> Option<Value> {
        match self.fetch(variable, subject_id) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("No value for {} of subject {}: {}", variable, subject_id, e);
                None
            }
        }
    }
}

/// Pull the scalar out of a `{"value": ...}` response.
pub fn parse_response(body: &[u8]) -> Result<Value, MetadataError> {
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        return Err(MetadataError::Malformed("empty response".to_string()));
    }

    let document: Value =
        serde_json::from_str(text.trim()).map_err(|e| MetadataError::Malformed(e.to_string()))?;
    match document.get("value") {
        Some(value @ (Value::Number(_) | Value::String(_) | Value::Bool(_))) => Ok(value.clone()),
        Some(other) => Err(MetadataError::Malformed(format!(
            "value is not a scalar: {}",
            other
        ))),
        None => Err(MetadataError::Malformed(format!(
            "no value field in {}",
            document
        ))),
    }
}

/// Integer reading of a scalar, accepting integer-valued strings.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
