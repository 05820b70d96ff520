//! Async wrapper around the ioi-isolate CLI.
//!
//! One [`IsolateBox`] corresponds to one numbered isolate box. The wrapper
//! covers the three operations the judge needs: initializing a box, running
//! a single command inside it under resource limits, and tearing it down.
//! Outcomes of the *sandboxed program* are never surfaced as errors; every
//! run resolves to a populated [`IsolateResult`] decoded from the meta
//! report. Only failures to drive the tool itself (spawn errors, a box that
//! cannot be initialized) become [`SandboxError`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("isolate --init failed for box {box_id}: {stderr}")]
    Init { box_id: u32, stderr: String },
    #[error("failed to invoke {bin}: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a sandboxed run terminated, decoded from the meta report's `status`
/// field. An absent `status` means the program ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Ran to completion; consult `exit_code`.
    Ok,
    /// CPU or wall-clock budget exhausted (`TO`).
    TimedOut,
    /// Killed by a signal (`SG`).
    Signaled,
    /// Exited with a non-zero code (`RE`).
    NonZeroExit,
    /// The sandbox itself failed (`XX`, or an unreadable meta report).
    SandboxFailure,
}

impl RunStatus {
    fn from_meta(code: &str) -> Self {
        match code {
            "" => RunStatus::Ok,
            "TO" => RunStatus::TimedOut,
            "SG" => RunStatus::Signaled,
            "RE" => RunStatus::NonZeroExit,
            _ => RunStatus::SandboxFailure,
        }
    }
}

/// Telemetry of a single sandboxed run.
#[derive(Debug, Clone)]
pub struct IsolateResult {
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    /// CPU seconds.
    pub time: f64,
    /// Wall-clock seconds.
    pub wall_time: f64,
    /// KB, preferring cgroup accounting over max-RSS.
    pub memory_kb: u64,
    /// The control group's OOM killer fired during the run.
    pub oom_killed: bool,
    pub message: Option<String>,
}

/// Per-run limits and redirections. Size limits are in KB, time limits in
/// seconds; stdin/stdout/stderr paths are relative to the box directory.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub time_limit: Option<f64>,
    pub wall_time_limit: Option<f64>,
    pub memory_limit_kb: Option<u64>,
    pub max_processes: Option<u32>,
    pub max_file_size_kb: Option<u64>,
    pub stdin_file: Option<String>,
    pub stdout_file: Option<String>,
    pub stderr_file: Option<String>,
    pub env: Vec<(String, String)>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self {
            // send fatal libc errors to stderr so they land in the report
            env: vec![("LIBC_FATAL_STDERR_".to_string(), "1".to_string())],
            ..Self::default()
        }
    }

    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    pub fn with_memory_limit_kb(mut self, kilobytes: u64) -> Self {
        self.memory_limit_kb = Some(kilobytes);
        self
    }

    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    pub fn with_max_file_size_kb(mut self, kilobytes: u64) -> Self {
        self.max_file_size_kb = Some(kilobytes);
        self
    }

    pub fn with_stdin(mut self, file: impl Into<String>) -> Self {
        self.stdin_file = Some(file.into());
        self
    }

    pub fn with_stdout(mut self, file: impl Into<String>) -> Self {
        self.stdout_file = Some(file.into());
        self
    }

    pub fn with_stderr(mut self, file: impl Into<String>) -> Self {
        self.stderr_file = Some(file.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// An initialized isolate box. Two runs in the same box must never overlap;
/// the worker pool guarantees that by giving each worker its own box id.
pub struct IsolateBox {
    box_id: u32,
    bin: String,
    box_dir: PathBuf,
}

impl IsolateBox {
    /// Initialize box `box_id` with `isolate --init`, cleaning up any stale
    /// box left behind by a previous process first.
    pub async fn init(bin: impl Into<String>, box_id: u32) -> Result<Self, SandboxError> {
        let bin = bin.into();

        let _ = invoke(&bin, box_id, "--cleanup").await;

        let output = invoke(&bin, box_id, "--init").await?;
        if !output.status.success() {
            return Err(SandboxError::Init {
                box_id,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let box_dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        debug!(box_id, box_dir = %box_dir.display(), "initialized isolate box");

        Ok(Self {
            box_id,
            bin,
            box_dir,
        })
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    /// Directory visible to the sandboxed program as its working directory.
    pub fn work_dir(&self) -> PathBuf {
        self.box_dir.join("box")
    }

    /// Run `argv` inside the box.
    ///
    /// Everything the program does, including crashing, timing out or
    /// tripping the OOM killer, comes back as an `Ok(IsolateResult)`.
    pub async fn run(
        &self,
        argv: &[String],
        options: &RunOptions,
    ) -> Result<IsolateResult, SandboxError> {
        let meta = tempfile::NamedTempFile::new()?;
        let args = build_run_args(self.box_id, meta.path(), argv, options);
        debug!(box_id = self.box_id, ?args, "isolate --run");

        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .await
            .map_err(|source| SandboxError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        let meta_text = fs::read_to_string(meta.path()).await.unwrap_or_default();
        Ok(decode_result(&meta_text, &output))
    }

    /// Best-effort teardown; safe to call for a box that is already gone.
    pub async fn cleanup(&self) {
        match invoke(&self.bin, self.box_id, "--cleanup").await {
            Ok(output) if !output.status.success() => {
                warn!(
                    box_id = self.box_id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "isolate --cleanup reported failure"
                );
            }
            Err(err) => warn!(box_id = self.box_id, %err, "isolate --cleanup could not run"),
            Ok(_) => {}
        }
    }
}

async fn invoke(bin: &str, box_id: u32, action: &str) -> Result<Output, SandboxError> {
    Command::new(bin)
        .arg("--box-id")
        .arg(box_id.to_string())
        .arg("--cg")
        .arg(action)
        .output()
        .await
        .map_err(|source| SandboxError::Spawn {
            bin: bin.to_string(),
            source,
        })
}

/// Full isolate argv for one run. Pure so the flag contract stays testable.
fn build_run_args(box_id: u32, meta: &Path, argv: &[String], options: &RunOptions) -> Vec<String> {
    let mut args = vec![
        "--box-id".to_string(),
        box_id.to_string(),
        "--cg".to_string(),
        format!("--meta={}", meta.display()),
    ];

    if let Some(time) = options.time_limit {
        args.push(format!("--time={time}"));
    }
    if let Some(wall) = options.wall_time_limit {
        args.push(format!("--wall-time={wall}"));
    }
    if let Some(memory) = options.memory_limit_kb {
        args.push(format!("--mem={memory}"));
        args.push(format!("--cg-mem={memory}"));
    }
    if let Some(processes) = options.max_processes {
        args.push(format!("--processes={processes}"));
    }
    if let Some(fsize) = options.max_file_size_kb {
        args.push(format!("--fsize={fsize}"));
    }
    if let Some(ref stdin) = options.stdin_file {
        args.push(format!("--stdin={stdin}"));
    }
    if let Some(ref stdout) = options.stdout_file {
        args.push(format!("--stdout={stdout}"));
    }
    if let Some(ref stderr) = options.stderr_file {
        args.push(format!("--stderr={stderr}"));
    }
    for (key, value) in &options.env {
        args.push(format!("--env={key}={value}"));
    }

    args.push("--run".to_string());
    args.push("--".to_string());
    args.extend(argv.iter().cloned());
    args
}

fn parse_meta(content: &str) -> HashMap<&str, &str> {
    content
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

/// Translate a meta report (plus the tool's own output, for the failure
/// path) into an [`IsolateResult`].
fn decode_result(meta_text: &str, output: &Output) -> IsolateResult {
    let meta = parse_meta(meta_text);

    if meta.is_empty() {
        // No report at all: the tool died before the program ran.
        return IsolateResult {
            status: RunStatus::SandboxFailure,
            exit_code: None,
            signal: None,
            time: 0.0,
            wall_time: 0.0,
            memory_kb: 0,
            oom_killed: false,
            message: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        };
    }

    let status = RunStatus::from_meta(meta.get("status").copied().unwrap_or(""));
    let memory_kb = meta
        .get("cg-mem")
        .or_else(|| meta.get("max-rss"))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    IsolateResult {
        status,
        exit_code: meta.get("exitcode").and_then(|value| value.parse().ok()),
        signal: meta.get("exitsig").and_then(|value| value.parse().ok()),
        time: meta
            .get("time")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0),
        wall_time: meta
            .get("time-wall")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0.0),
        memory_kb,
        oom_killed: meta.contains_key("cg-oom-killed"),
        message: meta.get("message").map(|value| value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn tool_output(code: i32, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn decodes_successful_run() {
        let meta = "time:0.013\ntime-wall:0.041\nmax-rss:3712\ncg-mem:4200\nexitcode:0\n";
        let result = decode_result(meta, &tool_output(0, ""));
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.time, 0.013);
        assert_eq!(result.wall_time, 0.041);
        assert!(!result.oom_killed);
    }

    #[test]
    fn prefers_cgroup_memory_over_max_rss() {
        let meta = "max-rss:3712\ncg-mem:68000\nexitcode:0\n";
        let result = decode_result(meta, &tool_output(0, ""));
        assert_eq!(result.memory_kb, 68000);

        let meta = "max-rss:3712\nexitcode:0\n";
        let result = decode_result(meta, &tool_output(0, ""));
        assert_eq!(result.memory_kb, 3712);
    }

    #[test]
    fn decodes_timeout() {
        let meta = "time:1.099\ntime-wall:1.102\nstatus:TO\nmessage:Time limit exceeded\n";
        let result = decode_result(meta, &tool_output(1, ""));
        assert_eq!(result.status, RunStatus::TimedOut);
        assert_eq!(result.message.as_deref(), Some("Time limit exceeded"));
    }

    #[test]
    fn decodes_signal_with_oom() {
        let meta = "status:SG\nexitsig:9\ncg-mem:65536\ncg-oom-killed:1\n";
        let result = decode_result(meta, &tool_output(1, ""));
        assert_eq!(result.status, RunStatus::Signaled);
        assert_eq!(result.signal, Some(9));
        assert!(result.oom_killed);
    }

    #[test]
    fn decodes_nonzero_exit() {
        let meta = "status:RE\nexitcode:1\ntime:0.002\n";
        let result = decode_result(meta, &tool_output(1, ""));
        assert_eq!(result.status, RunStatus::NonZeroExit);
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn decodes_sandbox_internal_failure() {
        let meta = "status:XX\nmessage:Cannot run proxy\n";
        let result = decode_result(meta, &tool_output(2, ""));
        assert_eq!(result.status, RunStatus::SandboxFailure);
        assert_eq!(result.message.as_deref(), Some("Cannot run proxy"));
    }

    #[test]
    fn missing_meta_becomes_sandbox_failure_with_tool_stderr() {
        let result = decode_result("", &tool_output(2, "isolate: cannot open box\n"));
        assert_eq!(result.status, RunStatus::SandboxFailure);
        assert_eq!(result.message.as_deref(), Some("isolate: cannot open box"));
    }

    #[test]
    fn run_args_carry_limits_and_redirections() {
        let options = RunOptions::new()
            .with_time_limit(1.0)
            .with_wall_time_limit(5.0)
            .with_memory_limit_kb(262144)
            .with_max_processes(64)
            .with_max_file_size_kb(10240)
            .with_stdin("stdin.txt")
            .with_stdout("stdout.txt")
            .with_stderr("stderr.txt")
            .with_env("PATH", "/usr/bin:/bin");

        let argv = vec!["/usr/bin/python3".to_string(), "main.py".to_string()];
        let args = build_run_args(7, Path::new("/tmp/meta"), &argv, &options);

        for expected in [
            "--box-id",
            "7",
            "--cg",
            "--meta=/tmp/meta",
            "--time=1",
            "--wall-time=5",
            "--mem=262144",
            "--cg-mem=262144",
            "--processes=64",
            "--fsize=10240",
            "--stdin=stdin.txt",
            "--stdout=stdout.txt",
            "--stderr=stderr.txt",
            "--env=PATH=/usr/bin:/bin",
            "--run",
        ] {
            assert!(
                args.iter().any(|arg| arg == expected),
                "missing {expected} in {args:?}"
            );
        }

        // argv comes after the `--` separator
        let sep = args.iter().position(|arg| arg == "--").unwrap();
        assert_eq!(&args[sep + 1..], &argv[..]);
    }

    #[test]
    fn default_options_omit_unset_limits() {
        let args = build_run_args(
            0,
            Path::new("/tmp/meta"),
            &["./main".to_string()],
            &RunOptions::default(),
        );
        assert!(!args.iter().any(|arg| arg.starts_with("--time=")));
        assert!(!args.iter().any(|arg| arg.starts_with("--mem=")));
        assert!(!args.iter().any(|arg| arg.starts_with("--stdin=")));
    }
}
