//! External process execution with optional timeouts
//!
//! Every provider that blocks on another program goes through [`Invocation`]
//! so that the per-declaration timeout and the run-as user are applied the
//! same way everywhere.

use crate::error::ProcessError;
use crate::types::CommandOutput;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A command to run, built up before execution
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    uid: Option<u32>,
    gid: Option<u32>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Run a script through `sh -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Drop privileges to the given uid/gid before exec (unix only)
    pub fn run_as(mut self, uid: Option<u32>, gid: Option<u32>) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rendered command line, for logs and error messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout reaches everything the command started
            cmd.process_group(0);
            if let Some(gid) = self.gid {
                cmd.gid(gid);
            }
            if let Some(uid) = self.uid {
                cmd.uid(uid);
            }
        }
        cmd
    }

    /// Run to completion and capture output, whatever the exit status
    pub fn output(&self) -> Result<CommandOutput, ProcessError> {
        log::debug!("exec: {}", self.display());

        let mut child = self.command().spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let (done_tx, done_rx) = mpsc::channel();
        let stdout = spawn_reader(child.stdout.take(), done_tx.clone());
        let stderr = spawn_reader(child.stderr.take(), done_tx);
        let deadline = self.timeout.map(|limit| Instant::now() + limit);

        let expired = || ProcessError::Timeout {
            command: self.display(),
            after: self.timeout.unwrap_or_default(),
        };

        let status = wait_until(&mut child, deadline).map_err(|err| match err {
            WaitError::Io(source) => ProcessError::Spawn {
                program: self.program.clone(),
                source,
            },
            WaitError::Expired => expired(),
        })?;

        // A background descendant may still hold the pipes open
        if !drain_until(&done_rx, deadline) {
            kill_group(&child);
            return Err(expired());
        }

        let output = CommandOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            success: status.success(),
            code: status.code(),
        };
        log::trace!("exit {:?}: {}", output.code, self.display());
        Ok(output)
    }

    /// Run and require a successful exit
    pub fn run(&self) -> Result<CommandOutput, ProcessError> {
        let output = self.output()?;
        if output.success {
            Ok(output)
        } else {
            Err(ProcessError::Exit {
                command: self.display(),
                code: output.code,
                stderr: output.stderr_str(),
            })
        }
    }

    /// Run and report only whether it succeeded
    ///
    /// Timeouts and spawn failures are still errors.
    pub fn succeeds(&self) -> Result<bool, ProcessError> {
        Ok(self.output()?.success)
    }
}

enum WaitError {
    Io(std::io::Error),
    Expired,
}

/// Wait for the direct child; past the deadline its whole group is killed
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> Result<ExitStatus, WaitError> {
    let Some(deadline) = deadline else {
        return child.wait().map_err(WaitError::Io);
    };
    loop {
        match child.try_wait().map_err(WaitError::Io)? {
            Some(status) => return Ok(status),
            None if Instant::now() >= deadline => {
                kill_group(child);
                // Already exited between try_wait and kill is fine
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitError::Expired);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Wait for both output readers to hit EOF; false once the deadline passes
fn drain_until(done: &Receiver<()>, deadline: Option<Instant>) -> bool {
    for _ in 0..2 {
        let received = match deadline {
            Some(deadline) => {
                match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                    Err(RecvTimeoutError::Timeout) => false,
                }
            }
            None => done.recv().is_ok(),
        };
        if !received {
            return deadline.is_none();
        }
    }
    true
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        log::trace!("killpg {pgid}: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    done: Sender<()>,
) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = done.send(());
        buf
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let out = Invocation::shell("echo hello").run().unwrap();
        assert_eq!(out.stdout_str().trim(), "hello");
        assert_eq!(out.code, Some(0));
    }

    #[test]
    fn non_zero_exit_is_exit_error() {
        let err = Invocation::shell("echo oops >&2; exit 3").run().unwrap_err();
        match err {
            ProcessError::Exit { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn output_does_not_fail_on_exit_status() {
        let out = Invocation::shell("exit 1").output().unwrap();
        assert!(!out.success);
    }

    #[test]
    fn timeout_kills_the_child() {
        let started = Instant::now();
        let err = Invocation::shell("sleep 5")
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let script = format!("sh -c 'sleep 1; touch {}'; echo done", marker.display());

        let err = Invocation::shell(script)
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));

        thread::sleep(Duration::from_millis(1800));
        assert!(!marker.exists(), "nested shell outlived the timeout");
    }

    #[test]
    fn background_child_holding_stdout_times_out() {
        let started = Instant::now();
        let err = Invocation::shell("sleep 5 & echo started")
            .timeout(Some(Duration::from_millis(300)))
            .run()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_child_with_closed_output_does_not_block() {
        let out = Invocation::shell("sleep 5 >/dev/null 2>&1 & echo started")
            .timeout(Some(Duration::from_secs(3)))
            .run()
            .unwrap();
        assert_eq!(out.stdout_str().trim(), "started");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = Invocation::new("definitely-not-a-real-program-xyz")
            .run()
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn cwd_and_env_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let out = Invocation::shell("pwd; echo $GREETING")
            .cwd(dir.path())
            .env("GREETING", "hi")
            .run()
            .unwrap();
        let text = out.stdout_str();
        let mut lines = text.lines();
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("hi"));
    }
}
