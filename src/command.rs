// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! External command harness
//!
//! Runs a probe command with a hard time bound. The bound covers the pipe
//! drain as well as the child's exit. When it is exceeded the child's whole
//! process group is killed, so a hung probe or a background descendant
//! delays a cycle by at most the timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ProbeError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs external commands with a per-call timeout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::config::DEFAULT_COMMAND_TIMEOUT))
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run and require exit status 0; returns trimmed stdout
    pub fn run(&self, program: &str, args: &[&str]) -> Result<String, ProbeError> {
        let output = self.output(program, args)?;
        if !output.success() {
            return Err(ProbeError::command_failed(format!(
                "{} exited with {}: {}",
                display_command(program, args),
                output
                    .status
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".into()),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Run and return raw stdout bytes (for plist/XML output)
    pub fn run_bytes(&self, program: &str, args: &[&str]) -> Result<Vec<u8>, ProbeError> {
        let (status, stdout, stderr) = self.spawn_and_wait(program, args)?;
        if status != Some(0) {
            return Err(ProbeError::command_failed(format!(
                "{} failed: {}",
                display_command(program, args),
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(stdout)
    }

    /// Run without judging the exit status
    pub fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
        let (status, stdout, stderr) = self.spawn_and_wait(program, args)?;
        let stdout = String::from_utf8(stdout).map_err(|_| {
            ProbeError::parse(format!(
                "{} produced non UTF-8 output",
                display_command(program, args)
            ))
        })?;
        Ok(CommandOutput {
            status,
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    /// Whether `program` resolves on PATH
    pub fn exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return Path::new(program).is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
            .unwrap_or(false)
    }

    fn spawn_and_wait(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<(Option<i32>, Vec<u8>, Vec<u8>), ProbeError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout can take descendants down too
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ProbeError::command_failed(format!("{} not found", program))
            }
            _ => ProbeError::from(e),
        })?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe
        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(out) = child.stdout.take() {
            spawn_reader(Stream::Stdout, out, tx.clone());
            pending += 1;
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(Stream::Stderr, err, tx.clone());
            pending += 1;
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    kill_tree(&mut child);
                    return Err(self.timed_out(program, args));
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Stream::Stdout, buf)) => stdout = buf,
                Ok((Stream::Stderr, buf)) => stderr = buf,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // A background descendant still holds the pipes open
                    kill_tree(&mut child);
                    return Err(self.timed_out(program, args));
                }
            }
            pending -= 1;
        }

        Ok((status.code(), stdout, stderr))
    }

    fn timed_out(&self, program: &str, args: &[&str]) -> ProbeError {
        ProbeError::timeout(format!(
            "{} timed out after {:?}",
            display_command(program, args),
            self.timeout
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R>(stream: Stream, mut pipe: R, tx: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

/// Kill the child and everything left in its process group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
