//! ToolRunner - executes packaged command-line tools with captured output.
//!
//! A tool is run to completion: stdout and stderr are drained concurrently
//! into memory while the process runs, and the result is only interpreted
//! after the exit status is known.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::api::types::ApiError;

const OUTPUT_BUFFER_SIZE: usize = 4096;
const OUTPUT_CAPTURE_LIMIT: usize = 256 * 1024;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// One short-lived tool execution.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub executable_path: PathBuf,
    pub arguments: Vec<OsString>,
    pub working_directory: Option<PathBuf>,
    /// Files staged for the tool before spawning
    pub input_files: Vec<PathBuf>,
    /// File the tool is expected to produce
    pub output_file: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: executable_path.into(),
            arguments: Vec::new(),
            working_directory: None,
            input_files: Vec::new(),
            output_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Append `flag value`.
    pub fn opt(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_files.push(path.into());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    fn display_name(&self) -> String {
        self.executable_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.executable_path.display().to_string())
    }
}

/// Captured result of a finished tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `ToolExecutionFailed`.
    ///
    /// The error message is stderr when the tool wrote any, otherwise a
    /// message naming the exit code.
    pub fn into_success(self) -> Result<ToolOutput, ApiError> {
        if self.succeeded() {
            return Ok(self);
        }
        let stderr = self.stderr.trim();
        let message = if stderr.is_empty() {
            match self.exit_code {
                Some(code) => format!("CLI exited with {code}"),
                None => "CLI terminated without an exit code".to_string(),
            }
        } else {
            stderr.to_string()
        };
        Err(ApiError::ToolExecutionFailed {
            exit_code: self.exit_code,
            message,
        })
    }
}

/// Runs tools from the install directory.
pub struct ToolRunner {
    default_cwd: PathBuf,
}

impl ToolRunner {
    /// Create a runner whose tools start in `default_cwd` unless an invocation says otherwise.
    pub fn new(default_cwd: PathBuf) -> Self {
        Self { default_cwd }
    }

    /// Spawn the tool, capture its output and wait for it to exit.
    ///
    /// # Errors
    /// * `ApiError::ToolNotFound` - executable missing; nothing is spawned
    /// * `ApiError::IoFailure` - spawn or wait failed
    pub async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ApiError> {
        if !invocation.executable_path.is_file() {
            log::warn!(
                "Tool executable not found: {}",
                invocation.executable_path.display()
            );
            return Err(ApiError::ToolNotFound {
                path: invocation.executable_path.display().to_string(),
            });
        }

        for input in &invocation.input_files {
            if !input.exists() {
                return Err(ApiError::IoFailure {
                    message: format!("Tool input missing: {}", input.display()),
                });
            }
        }

        let name = invocation.display_name();
        let cwd = invocation
            .working_directory
            .as_deref()
            .unwrap_or(&self.default_cwd);

        log::info!(
            "Running tool: name={name}, args={}, cwd={}",
            invocation.arguments.len(),
            cwd.display()
        );
        log::debug!("Tool arguments: name={name}, args={:?}", invocation.arguments);

        let mut cmd = Command::new(&invocation.executable_path);
        cmd.args(&invocation.arguments)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|e| ApiError::IoFailure {
            message: format!("Failed to spawn {name}: {e}"),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ApiError::IoFailure {
            message: "Failed to capture stdout".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ApiError::IoFailure {
            message: "Failed to capture stderr".to_string(),
        })?;

        let (stdout, stderr, status) = tokio::join!(
            read_to_string_capped(stdout, "stdout"),
            read_to_string_capped(stderr, "stderr"),
            child.wait()
        );

        let status = status.map_err(|e| ApiError::IoFailure {
            message: format!("Failed to wait for {name}: {e}"),
        })?;

        log::info!("Tool finished: name={name}, exit_code={:?}", status.code());
        if !stderr.trim().is_empty() {
            log::debug!("Tool stderr: name={name}, {}", stderr.trim());
        }

        Ok(ToolOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Read the JSON document a tool produced.
pub async fn read_output_json(path: &Path) -> Result<Value, ApiError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::IoFailure {
                message: format!("Output file not found: {}", path.display()),
            })
        }
        Err(e) => {
            return Err(ApiError::IoFailure {
                message: format!("Failed to read {}: {e}", path.display()),
            })
        }
    };

    serde_json::from_str(content.trim_start_matches('\u{feff}')).map_err(|e| {
        ApiError::IoFailure {
            message: format!("Tool output is not valid JSON: {e}"),
        }
    })
}

async fn read_to_string_capped<R: AsyncRead + Unpin>(reader: R, label: &'static str) -> String {
    let mut reader = BufReader::new(reader);
    let mut buf = vec![0u8; OUTPUT_BUFFER_SIZE];
    let mut captured = String::new();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                append_capped(&mut captured, &chunk, OUTPUT_CAPTURE_LIMIT);
            }
            Err(e) => {
                log::warn!("Tool {label} stream read failed: {e}");
                break;
            }
        }
    }

    captured
}

fn append_capped(target: &mut String, chunk: &str, cap: usize) {
    if target.len() >= cap {
        return;
    }
    let remaining = cap.saturating_sub(target.len());
    if chunk.len() <= remaining {
        target.push_str(chunk);
    } else {
        let mut end = 0;
        for (idx, ch) in chunk.char_indices() {
            let next = idx + ch.len_utf8();
            if next > remaining {
                break;
            }
            end = next;
        }
        target.push_str(&chunk[..end]);
        target.push_str("\n...[truncated]");
    }
}
