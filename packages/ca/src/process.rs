//! Signing-service subprocess lifecycle
//!
//! A [`SigningServiceProcess`] owns at most one running child. Starting it
//! yields a [`RunningService`] guard that mutably borrows the process, so a
//! second start while a session is live is rejected at compile time. The
//! guard's `stop` is the normal exit; dropping it unstopped kills the child.
//!
//! On unix the child leads its own process group and every kill goes to the
//! whole group, so workers the service forks die with it.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use ephca_common::{log_security_event, SecurityEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::error::{CaError, Result};

type OutputLines = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;

/// Operation-specific arguments appended to the fixed base command line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceArgs {
    config_file: Option<PathBuf>,
    ca_key: Option<PathBuf>,
    ca_certificate: Option<PathBuf>,
}

impl ServiceArgs {
    /// No extra arguments, as used for CA initialization
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Point the service at a signing policy document (`-config=<path>`)
    #[must_use]
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Point the service at a CA key and certificate (`-ca-key <key> -ca <cert>`)
    #[must_use]
    pub fn signing_ca(mut self, key: impl Into<PathBuf>, certificate: impl Into<PathBuf>) -> Self {
        self.ca_key = Some(key.into());
        self.ca_certificate = Some(certificate.into());
        self
    }

    fn to_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(config) = &self.config_file {
            let mut flag = OsString::from("-config=");
            flag.push(config);
            args.push(flag);
        }
        if let Some(key) = &self.ca_key {
            args.push("-ca-key".into());
            args.push(key.clone().into_os_string());
        }
        if let Some(cert) = &self.ca_certificate {
            args.push("-ca".into());
            args.push(cert.clone().into_os_string());
        }
        args
    }
}

/// Zero-or-one running signing-service subprocess
#[derive(Debug)]
pub struct SigningServiceProcess {
    config: ServiceConfig,
    child: Option<Child>,
    // Pid of the group leader, kept after the child itself is reaped
    group: Option<u32>,
}

impl SigningServiceProcess {
    /// Process handle for `config`; nothing is launched until [`start`](Self::start)
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            child: None,
            group: None,
        }
    }

    /// Whether a child is currently held
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// OS pid of the held child
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn program(&self) -> String {
        self.config.program.display().to_string()
    }

    /// Full argument vector: base flags followed by `extra`
    pub fn command_line(&self, extra: &ServiceArgs) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "serve".into(),
            format!("-loglevel={}", self.config.log_level).into(),
            format!("-address={}", self.config.host).into(),
            format!("-port={}", self.config.port).into(),
        ];
        args.extend(extra.to_args());
        args
    }

    /// Launch the service and wait until it reports readiness
    ///
    /// # Errors
    ///
    /// - `ProcessLaunchFailed` if the binary cannot be spawned or exits
    ///   before printing the readiness marker
    /// - `StartupTimedOut` if the marker does not appear within the
    ///   configured startup timeout; the child is killed first
    pub async fn start(&mut self, extra: &ServiceArgs) -> Result<RunningService<'_>> {
        if let Some(stale) = self.child.take() {
            warn!(
                "Signing service pid {:?} still held from an earlier session, terminating it",
                stale.id()
            );
            terminate(stale, self.group.take()).await;
        }

        let program = self.program();
        let mut command = Command::new(&self.config.program);
        command
            .args(self.command_line(extra))
            .env("PATH", search_path(&self.config.extra_search_path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        debug!("Launching {program} {:?}", self.command_line(extra));
        let mut child = command.spawn().map_err(|e| CaError::ProcessLaunchFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;
        let group = child.id();

        if let Ok(Some(status)) = child.try_wait() {
            signal_group(group);
            return Err(CaError::ProcessLaunchFailed {
                program,
                reason: format!("failed with {status}"),
            });
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(child, group).await;
            return Err(CaError::ProcessLaunchFailed {
                program,
                reason: "output streams were not captured".to_string(),
            });
        };
        self.child = Some(child);
        self.group = group;

        let mut lines = output_lines(stdout, stderr);
        let timeout = self.config.startup_timeout();
        debug!("Waiting for {program} to start...");
        match tokio::time::timeout(timeout, wait_for_marker(&mut lines, &self.config.readiness_marker))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let reason = match self.child.as_mut().map(Child::wait) {
                    Some(wait) => match tokio::time::timeout(Duration::from_secs(1), wait).await {
                        Ok(Ok(status)) => format!("exited with {status} before signalling readiness"),
                        _ => "closed its output before signalling readiness".to_string(),
                    },
                    None => "exited before signalling readiness".to_string(),
                };
                self.stop().await;
                log_security_event(SecurityEvent::ServiceStarted, &program, false);
                return Err(CaError::ProcessLaunchFailed { program, reason });
            }
            Err(_) => {
                self.stop().await;
                log_security_event(SecurityEvent::ServiceStarted, &program, false);
                return Err(CaError::StartupTimedOut { program, timeout });
            }
        }

        tokio::spawn(drain_output(lines));
        tokio::time::sleep(self.config.settle_delay()).await;

        log_security_event(
            SecurityEvent::ServiceStarted,
            &format!("{program} pid {:?}", self.id()),
            true,
        );
        Ok(RunningService { process: self })
    }

    /// Force-kill the held child and its process group, if any; a no-op otherwise
    pub async fn stop(&mut self) {
        if let Some(child) = self.child.take() {
            let pid = child.id();
            terminate(child, self.group.take()).await;
            log_security_event(
                SecurityEvent::ServiceStopped,
                &format!("{} pid {pid:?}", self.program()),
                true,
            );
        }
    }
}

/// Live signing-service session
///
/// Must be ended with [`RunningService::stop`]. If dropped instead (panic,
/// cancelled future) the child is killed without waiting for it.
#[derive(Debug)]
pub struct RunningService<'a> {
    process: &'a mut SigningServiceProcess,
}

impl RunningService<'_> {
    /// OS pid of the live service
    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    /// Stop the service and wait for the child to exit
    pub async fn stop(mut self) {
        self.process.stop().await;
    }
}

impl Drop for RunningService<'_> {
    fn drop(&mut self) {
        if let Some(mut child) = self.process.child.take() {
            warn!(
                "Signing service session dropped without stop, killing pid {:?}",
                child.id()
            );
            signal_group(self.process.group.take());
            if let Err(e) = child.start_kill() {
                warn!("Failed to signal signing service: {e}");
            }
        }
    }
}

impl Drop for SigningServiceProcess {
    fn drop(&mut self) {
        // kill_on_drop only reaches the leader
        if self.child.is_some() {
            signal_group(self.group.take());
        }
    }
}

async fn terminate(mut child: Child, group: Option<u32>) {
    signal_group(group);
    if let Err(e) = child.kill().await {
        warn!("Failed to kill signing service pid {:?}: {e}", child.id());
    }
}

/// SIGKILL every member of the group led by `leader`
#[cfg(unix)]
fn signal_group(leader: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(leader) = leader.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(leader), Signal::SIGKILL) {
        // ESRCH: the group is already empty
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to signal signing service group {leader}: {e}"),
    }
}

#[cfg(not(unix))]
fn signal_group(_leader: Option<u32>) {}

fn search_path(extra: &str) -> OsString {
    let mut entries: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|current| std::env::split_paths(&current).collect())
        .unwrap_or_default();
    if !extra.is_empty() && !entries.iter().any(|entry| entry == Path::new(extra)) {
        entries.push(PathBuf::from(extra));
    }
    std::env::join_paths(&entries).unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
}

fn output_lines(stdout: ChildStdout, stderr: ChildStderr) -> OutputLines {
    let stdout = LinesStream::new(BufReader::new(stdout).lines());
    let stderr = LinesStream::new(BufReader::new(stderr).lines());
    Box::pin(stdout.merge(stderr))
}

/// Next decodable output line
///
/// Lines that are not UTF-8 are logged and skipped; the pipe stays open.
/// `None` once both streams end or a read fails outright.
async fn next_line(lines: &mut OutputLines) -> Option<String> {
    loop {
        match lines.next().await? {
            Ok(line) => return Some(line),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("Skipping undecodable signing service output: {e}");
            }
            Err(e) => {
                warn!("Unreadable signing service output: {e}");
                return None;
            }
        }
    }
}

async fn wait_for_marker(lines: &mut OutputLines, marker: &str) -> bool {
    while let Some(line) = next_line(lines).await {
        debug!(target: "ephca::service", "{line}");
        if line.contains(marker) {
            return true;
        }
    }
    false
}

// Keeps the pipes empty so a chatty service never blocks on write.
// Returns how many lines were forwarded to the log.
async fn drain_output(mut lines: OutputLines) -> usize {
    let mut forwarded = 0;
    while let Some(line) = next_line(&mut lines).await {
        debug!(target: "ephca::service", "{line}");
        forwarded += 1;
    }
    forwarded
}
