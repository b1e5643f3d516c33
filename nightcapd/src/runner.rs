//! Command runner.
//!
//! Runs at most one instance of the configured command. Starting returns
//! as soon as the process exists; its termination is reported later on a
//! channel the reactor selects on. There is no way to stop a command once
//! started.

use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Capacity of the termination channel.
///
/// One slot is enough: a new command is only started after the previous
/// outcome has been received, so a delivery never finds the slot taken and
/// never has to wait for the reactor.
pub const TERMINATION_QUEUE: usize = 1;

/// Result type for runner operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Error type for runner operations
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A command is already running
    #[error("exec: already running")]
    AlreadyRunning,

    /// The process could not be spawned
    #[error("exec: {0}")]
    SpawnFailed(#[source] io::Error),

    /// No program was configured
    #[error("exec: empty command")]
    EmptyCommand,
}

/// How a command run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit status 0
    Success,
    /// Non-zero exit status
    NonZeroExit(i32),
    /// Terminated by a signal (number when known)
    Killed(Option<i32>),
    /// Waiting for the process failed
    WaitFailed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl From<ExitStatus> for Outcome {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => Outcome::Success,
            Some(code) => Outcome::NonZeroExit(code),
            None => Outcome::Killed(status.signal()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "exit status 0"),
            Outcome::NonZeroExit(code) => write!(f, "exit status {}", code),
            Outcome::Killed(Some(sig)) => write!(f, "killed by signal {}", sig),
            Outcome::Killed(None) => write!(f, "killed"),
            Outcome::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

/// Sending half handed to a launcher for one command run.
#[derive(Debug, Clone)]
pub struct TerminationSender(mpsc::Sender<Outcome>);

impl TerminationSender {
    /// Deliver the outcome without blocking.
    pub fn deliver(self, outcome: Outcome) {
        match self.0.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(outcome)) => {
                warn!(%outcome, "termination already pending, outcome dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("reactor gone, termination not delivered");
            }
        }
    }

    /// Deliver the outcome and wait until the reactor has taken it off
    /// the channel. Returns false when the reactor is gone.
    pub async fn deliver_and_wait(self, outcome: Outcome) -> bool {
        let tx = self.0.clone();
        self.deliver(outcome);
        // The slot frees up once the reactor has received the outcome
        let ok = tx.reserve().await.is_ok();
        ok
    }
}

/// Starts a command and arranges for its outcome to be delivered.
pub trait Launcher: Send {
    /// Start the command. On success `done` must eventually receive
    /// exactly one outcome.
    fn launch(&mut self, done: TerminationSender) -> RunnerResult<()>;
}

/// Launcher spawning a real process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> RunnerResult<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        Ok(Self { program, args })
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, done: TerminationSender) -> RunnerResult<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .spawn()
            .map_err(RunnerError::SpawnFailed)?;

        debug!(pid = ?child.id(), program = %self.program, "command started");
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => Outcome::from(status),
                Err(e) => Outcome::WaitFailed(e.to_string()),
            };
            done.deliver(outcome);
        });
        Ok(())
    }
}

/// Tracks the single command run and owns the termination channel.
pub struct CommandRunner {
    launcher: Box<dyn Launcher>,
    running: bool,
    done_tx: mpsc::Sender<Outcome>,
    done_rx: mpsc::Receiver<Outcome>,
}

impl CommandRunner {
    pub fn new(launcher: Box<dyn Launcher>) -> Self {
        let (done_tx, done_rx) = mpsc::channel(TERMINATION_QUEUE);
        Self {
            launcher,
            running: false,
            done_tx,
            done_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the command unless one is already running.
    pub fn start(&mut self) -> RunnerResult<()> {
        if self.running {
            return Err(RunnerError::AlreadyRunning);
        }
        self.launcher.launch(TerminationSender(self.done_tx.clone()))?;
        self.running = true;
        Ok(())
    }

    /// Wait for the next termination outcome. Cancel safe.
    pub async fn terminated(&mut self) -> Option<Outcome> {
        self.done_rx.recv().await
    }

    /// Record that the running command has ended.
    ///
    /// Returns whether a command was considered running.
    pub fn mark_stopped(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Keeps the termination sender instead of spawning anything
    struct Capture(Arc<Mutex<Option<TerminationSender>>>);

    impl Launcher for Capture {
        fn launch(&mut self, done: TerminationSender) -> RunnerResult<()> {
            *self.0.lock().unwrap() = Some(done);
            Ok(())
        }
    }

    fn runner_for(program: &str, args: &[&str]) -> CommandRunner {
        let args = args.iter().map(|s| s.to_string()).collect();
        let launcher = ProcessLauncher::new(program, args).unwrap();
        CommandRunner::new(Box::new(launcher))
    }

    #[test]
    fn empty_program_is_rejected() {
        assert!(matches!(
            ProcessLauncher::new("", Vec::new()),
            Err(RunnerError::EmptyCommand)
        ));
    }

    #[tokio::test]
    async fn reports_success() {
        let mut runner = runner_for("true", &[]);
        runner.start().unwrap();
        assert!(runner.is_running());
        assert_eq!(runner.terminated().await, Some(Outcome::Success));
        assert!(runner.mark_stopped());
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let mut runner = runner_for("sh", &["-c", "exit 3"]);
        runner.start().unwrap();
        assert_eq!(runner.terminated().await, Some(Outcome::NonZeroExit(3)));
    }

    #[tokio::test]
    async fn reports_killed() {
        let mut runner = runner_for("sh", &["-c", "kill -9 $$"]);
        runner.start().unwrap();
        assert_eq!(runner.terminated().await, Some(Outcome::Killed(Some(9))));
    }

    #[tokio::test]
    async fn second_start_while_running_is_refused() {
        let mut runner = runner_for("sleep", &["0.2"]);
        runner.start().unwrap();
        assert!(matches!(runner.start(), Err(RunnerError::AlreadyRunning)));
        assert_eq!(runner.terminated().await, Some(Outcome::Success));
        runner.mark_stopped();
        runner.start().unwrap();
        assert_eq!(runner.terminated().await, Some(Outcome::Success));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_runner_idle() {
        let mut runner = runner_for("/nonexistent/nightcap-locker", &[]);
        assert!(matches!(runner.start(), Err(RunnerError::SpawnFailed(_))));
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn deliver_and_wait_returns_once_outcome_is_taken() {
        let slot = Arc::new(Mutex::new(None));
        let mut runner = CommandRunner::new(Box::new(Capture(slot.clone())));
        runner.start().unwrap();
        let done = slot.lock().unwrap().take().unwrap();

        let waiter = tokio::spawn(done.deliver_and_wait(Outcome::Success));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        assert_eq!(runner.terminated().await, Some(Outcome::Success));
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn deliver_and_wait_reports_a_gone_reactor() {
        let slot = Arc::new(Mutex::new(None));
        let mut runner = CommandRunner::new(Box::new(Capture(slot.clone())));
        runner.start().unwrap();
        let done = slot.lock().unwrap().take().unwrap();
        drop(runner);

        assert!(!done.deliver_and_wait(Outcome::Success).await);
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::Success.to_string(), "exit status 0");
        assert_eq!(Outcome::NonZeroExit(2).to_string(), "exit status 2");
        assert_eq!(Outcome::Killed(Some(15)).to_string(), "killed by signal 15");
        assert_eq!(Outcome::Killed(None).to_string(), "killed");
    }
}
