//! External toolchain invocation.
//!
//! Every `go` command goes through the [`Toolchain`] trait so the update
//! orchestration can be driven by a scripted fake in tests. stdout is the
//! only machine-readable channel; stderr is diagnostic and feeds
//! [`classify`](crate::classify).

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::classify::classify;
use crate::error::UpdateError;
use crate::snapshot::ManifestSnapshot;

/// How often a running child is polled when a timeout is set.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long pipe readers may run on after the child is reaped.
const READER_GRACE: Duration = Duration::from_millis(500);

/// A single external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub dir: PathBuf,
}

impl Invocation {
    /// A command run in `dir` with no arguments.
    pub fn new(program: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            dir: dir.into(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn envs(mut self, env: &[(String, String)]) -> Self {
        self.env.extend_from_slice(env);
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` if killed by a signal or timed out.
    pub status: Option<i32>,
    pub timed_out: bool,
}

impl ToolOutput {
    /// A zero-exit output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            status: Some(0),
            ..Self::default()
        }
    }

    /// A failed output carrying `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            status: Some(code),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Something that can run external commands.
pub trait Toolchain {
    /// Run `invocation` to completion.
    ///
    /// `Err` is reserved for failing to start the process at all; a non-zero
    /// exit is reported through [`ToolOutput::status`].
    fn invoke(&self, invocation: &Invocation) -> io::Result<ToolOutput>;
}

impl<T: Toolchain + ?Sized> Toolchain for &T {
    fn invoke(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        (**self).invoke(invocation)
    }
}

/// Runs real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessToolchain {
    timeout: Option<Duration>,
}

impl ProcessToolchain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill invocations that run longer than `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Toolchain for ProcessToolchain {
    fn invoke(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&invocation.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes concurrently so a chatty child cannot block on a
        // full pipe while we wait for it.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let (status, reader_deadline) = match self.timeout {
            None => (child.wait()?, None),
            Some(limit) => {
                let deadline = Instant::now() + limit;
                let status = loop {
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                    if Instant::now() >= deadline {
                        timed_out = true;
                        let _ = child.kill();
                        break child.wait()?;
                    }
                    thread::sleep(POLL_INTERVAL);
                };
                // Descendants may still hold the pipes open; readers get a
                // short grace period and are then abandoned.
                (status, Some(Instant::now().max(deadline) + READER_GRACE))
            }
        };
        drop(child);

        let stdout = stdout.finish(reader_deadline);
        let mut stderr = stderr.finish(reader_deadline);
        if timed_out {
            stderr.push_str(&format!(
                "\n{} timed out after {:?}",
                invocation.command_line(),
                self.timeout.unwrap_or_default()
            ));
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            status: if timed_out { None } else { status.code() },
            timed_out,
        })
    }
}

/// A pipe being read on a helper thread into a shared buffer.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let handle = thread::spawn(move || {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    Drain { buf, handle }
}

impl Drain {
    /// Whatever was read, waiting for end of stream at most until `deadline`.
    fn finish(self, deadline: Option<Instant>) -> String {
        match deadline {
            None => {
                let _ = self.handle.join();
            }
            Some(deadline) => {
                while !self.handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(POLL_INTERVAL);
                }
                if self.handle.is_finished() {
                    let _ = self.handle.join();
                }
            }
        }
        self.buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }
}

/// The `go` commands an update needs, bound to one working directory.
pub struct GoCommands<'a, T: Toolchain + ?Sized> {
    toolchain: &'a T,
    go: String,
    dir: PathBuf,
    env: Vec<(String, String)>,
    manifest_label: String,
}

impl<'a, T: Toolchain + ?Sized> GoCommands<'a, T> {
    /// `manifest_label` names the `go.mod` in classified errors.
    pub fn new(
        toolchain: &'a T,
        go: impl Into<String>,
        dir: &Path,
        env: Vec<(String, String)>,
        manifest_label: impl Into<String>,
    ) -> Self {
        Self {
            toolchain,
            go: go.into(),
            dir: dir.to_path_buf(),
            env,
            manifest_label: manifest_label.into(),
        }
    }

    /// `go mod edit -json`
    pub fn inspect(&self) -> Result<ManifestSnapshot, UpdateError> {
        let output = self.run(["mod", "edit", "-json"])?;
        Ok(ManifestSnapshot::from_json(&output.stdout)?)
    }

    /// `go mod edit -droprequire <path>`
    pub fn drop_requirement(&self, path: &str) -> Result<(), UpdateError> {
        self.run(["mod", "edit", "-droprequire", path]).map(drop)
    }

    /// `go get -d`
    pub fn resolve(&self) -> Result<(), UpdateError> {
        self.run(["get", "-d"]).map(drop)
    }

    /// `go mod tidy`
    pub fn tidy(&self) -> Result<(), UpdateError> {
        self.run(["mod", "tidy"]).map(drop)
    }

    fn run<const N: usize>(&self, args: [&str; N]) -> Result<ToolOutput, UpdateError> {
        let invocation = Invocation::new(&self.go, &self.dir)
            .args(args)
            .envs(&self.env);
        tracing::debug!(command = %invocation.command_line(), "invoking toolchain");

        let output = self.toolchain.invoke(&invocation)?;
        if output.success() {
            return Ok(output);
        }

        tracing::warn!(
            command = %invocation.command_line(),
            status = ?output.status,
            timed_out = output.timed_out,
            "toolchain invocation failed"
        );
        let stderr = output.stderr.replace(&*self.dir.to_string_lossy(), "");
        Err(classify(&stderr, &self.manifest_label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Scripted {
        calls: RefCell<Vec<String>>,
        reply: ToolOutput,
    }

    impl Toolchain for Scripted {
        fn invoke(&self, invocation: &Invocation) -> io::Result<ToolOutput> {
            self.calls.borrow_mut().push(invocation.command_line());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn command_line_joins_args() {
        let inv = Invocation::new("go", "/tmp").args(["mod", "tidy"]);
        assert_eq!(inv.command_line(), "go mod tidy");
    }

    #[test]
    fn success_requires_zero_exit() {
        assert!(ToolOutput::ok("").success());
        assert!(!ToolOutput::failed(1, "boom").success());
        let timed_out = ToolOutput {
            status: Some(0),
            timed_out: true,
            ..ToolOutput::default()
        };
        assert!(!timed_out.success());
    }

    #[test]
    fn inspect_parses_stdout() {
        let fake = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: ToolOutput::ok(r#"{"Require":[{"Path":"example.com/a","Version":"v1.0.0"}]}"#),
        };
        let go = GoCommands::new(&fake, "go", Path::new("/work"), Vec::new(), "go.mod");
        let snap = go.inspect().unwrap();
        assert_eq!(snap.requires[0].path, "example.com/a");
        assert_eq!(fake.calls.borrow()[0], "go mod edit -json");
    }

    #[test]
    fn failure_is_classified_with_workdir_scrubbed() {
        let fake = Scripted {
            calls: RefCell::new(Vec::new()),
            reply: ToolOutput::failed(1, "go: /work/sub: something odd happened\n"),
        };
        let go = GoCommands::new(&fake, "go", Path::new("/work"), Vec::new(), "go.mod");
        match go.tidy() {
            Err(UpdateError::DependencyFileNotParseable { message, .. }) => {
                assert_eq!(message, "go: /sub: something odd happened");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn process_toolchain_captures_streams() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("sh", dir.path()).args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = ProcessToolchain::new().invoke(&inv).unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.status, Some(3));
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn process_toolchain_times_out() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("sh", dir.path()).args(["-c", "echo started >&2; exec sleep 5"]);
        let out = ProcessToolchain::with_timeout(Some(Duration::from_millis(200)))
            .invoke(&inv)
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.stderr.contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_not_held_up_by_forked_children() {
        let dir = tempfile::TempDir::new().unwrap();
        // The shell forks `sleep`, which inherits and holds both pipes.
        let inv = Invocation::new("sh", dir.path()).args(["-c", "echo started >&2; sleep 4; true"]);
        let started = Instant::now();
        let out = ProcessToolchain::with_timeout(Some(Duration::from_millis(200)))
            .invoke(&inv)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(out.timed_out);
        assert!(out.stderr.starts_with("started\n"));
        assert!(out.stderr.contains("timed out"));
    }

    #[test]
    fn missing_program_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let inv = Invocation::new("definitely-not-a-real-binary-modpin", dir.path());
        assert!(ProcessToolchain::new().invoke(&inv).is_err());
    }
}
