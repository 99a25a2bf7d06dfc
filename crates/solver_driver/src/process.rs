//! # Solver Process Driver
//!
//! Owns one solver subprocess and talks to it as a streaming peer: a problem
//! line goes into stdin, classified lines come back from stdout.
//!
//! ## State Machine
//!
//! | From | Event | To |
//! |------|-------|----|
//! | `Stopped` | `set_level(l)` | `Running(l)` |
//! | `Running(l)` | `set_level(l)` | `Running(l)` |
//! | `Running(l)` | `set_level(m)` | `Running(m)`, old child killed |
//! | `Running(l)` | stdout closed during a job | `Stopped` |
//! | any | `kill()` or [`KillHandle::kill`] | `Killed` |
//!
//! `Killed` is terminal: further `set_level` or `do_job` calls fail with
//! [`SolverError::Killed`]. A job whose process disappears, either because
//! it was killed through a handle or died on its own, ends with no result
//! and no error.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use othello_board::{Evaluation, Job, JobResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{SolverError, SolverResult};
use crate::parser::{classify_line, LineKind, ParsedLine};

/// How to launch the solver
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Path to the solver executable
    pub binary: PathBuf,
    /// Extra arguments appended after the fixed solve-mode arguments
    pub extra_args: Vec<String>,
    /// Working directory for the child, e.g. where its data files live
    pub working_dir: Option<PathBuf>,
}

impl SolverConfig {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            working_dir: None,
        }
    }

    fn command(&self, level: u32) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(["-solve", "/dev/stdin", "-level"])
            .arg(level.to_string())
            .args(["-verbose", "3"])
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Observable driver state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStatus {
    Stopped,
    Running { level: u32 },
    Killed,
}

struct RunningSolver {
    level: u32,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

enum SolverState {
    Stopped,
    Running(RunningSolver),
    Killed,
}

/// How a job's output stream ended
enum JobEnd {
    /// Second table border seen
    Finished,
    /// stdout closed under us
    ProcessExited,
    /// A kill handle fired mid-job
    KillRequested,
}

/// Requests termination of a driver from another task
#[derive(Clone, Debug)]
pub struct KillHandle {
    signal: Arc<watch::Sender<bool>>,
}

impl KillHandle {
    /// Kill the solver; an in-flight job ends silently
    pub fn kill(&self) {
        self.signal.send_replace(true);
    }

    /// Whether a kill was requested through any handle or the driver
    pub fn is_killed(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once a kill is requested
    pub async fn killed(&self) {
        let mut requested = self.signal.subscribe();
        // The handle owns the sender, so the channel cannot close under us
        let _ = requested.wait_for(|&killed| killed).await;
    }
}

/// Manages one solver subprocess
pub struct SolverDriver {
    config: SolverConfig,
    state: SolverState,
    kill_signal: Arc<watch::Sender<bool>>,
    kill_requested: watch::Receiver<bool>,
}

impl SolverDriver {
    /// A stopped driver; the process starts on the first `set_level`/`do_job`
    pub fn new(config: SolverConfig) -> Self {
        let (signal, requested) = watch::channel(false);
        Self {
            config,
            state: SolverState::Stopped,
            kill_signal: Arc::new(signal),
            kill_requested: requested,
        }
    }

    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            signal: Arc::clone(&self.kill_signal),
        }
    }

    /// Whether a kill was requested, even if no job has observed it yet
    pub fn kill_requested(&self) -> bool {
        *self.kill_signal.borrow()
    }

    pub fn status(&self) -> SolverStatus {
        match &self.state {
            SolverState::Stopped => SolverStatus::Stopped,
            SolverState::Running(running) => SolverStatus::Running {
                level: running.level,
            },
            SolverState::Killed => SolverStatus::Killed,
        }
    }

    /// OS process id of the running child
    pub fn pid(&self) -> Option<u32> {
        match &self.state {
            SolverState::Running(running) => running.child.id(),
            _ => None,
        }
    }

    /// Make sure a solver configured for `level` is running
    ///
    /// # Panics
    ///
    /// Panics if `level` is 0.
    pub async fn set_level(&mut self, level: u32) -> SolverResult<()> {
        assert!(level != 0, "solver level must be positive");
        self.observe_kill_request().await;

        match &self.state {
            SolverState::Killed => return Err(SolverError::Killed),
            SolverState::Running(running) if running.level == level => return Ok(()),
            _ => {}
        }

        self.stop().await;
        let running = self.spawn(level)?;
        info!(level, pid = ?running.child.id(), "solver started");
        self.state = SolverState::Running(running);
        Ok(())
    }

    /// Kill the child, if any, and refuse further work
    pub async fn kill(&mut self) {
        self.kill_signal.send_replace(true);
        self.stop().await;
        self.state = SolverState::Killed;
        self.kill_requested.borrow_and_update();
        debug!("solver killed");
    }

    /// Solve `job`, sending evaluations to `sink` as they become final
    ///
    /// With `final_only` only the last line of the search is sent; otherwise
    /// every depth is sent once a strictly deeper line arrives, followed by
    /// the last one. `sink` must be drained concurrently when it is bounded
    /// and `final_only` is false.
    pub async fn do_job(
        &mut self,
        job: &Job,
        final_only: bool,
        sink: &mpsc::Sender<Evaluation>,
    ) -> SolverResult<()> {
        self.set_level(job.level).await?;

        let SolverState::Running(running) = &mut self.state else {
            return Err(SolverError::Killed);
        };

        let problem = format!("{} X;\n", job.position.to_board_string());
        let written = async {
            running.stdin.write_all(problem.as_bytes()).await?;
            running.stdin.flush().await
        }
        .await;
        if let Err(err) = written {
            if err.kind() == std::io::ErrorKind::BrokenPipe {
                warn!(position = %job.position, "solver stdin closed before job was written");
                self.stop().await;
                return Ok(());
            }
            return Err(err.into());
        }

        let outcome = read_job(running, &mut self.kill_requested, job, final_only, sink).await;
        match outcome {
            Ok(JobEnd::Finished) => Ok(()),
            Ok(JobEnd::ProcessExited) => {
                warn!(position = %job.position, "solver exited during job");
                self.stop().await;
                Ok(())
            }
            Ok(JobEnd::KillRequested) => {
                self.kill().await;
                Ok(())
            }
            Err(err) => {
                // The rest of this job's output would leak into the next one
                self.stop().await;
                Err(err)
            }
        }
    }

    /// Solve `job` and wait for its final evaluation
    ///
    /// Returns `None` when the process went away before finishing.
    pub async fn do_job_sync(&mut self, job: &Job) -> SolverResult<Option<JobResult>> {
        let (sink, mut results) = mpsc::channel(1);
        let started = Instant::now();
        self.do_job(job, true, &sink).await?;
        drop(sink);
        Ok(results.recv().await.map(|evaluation| JobResult {
            evaluation,
            computation_time: started.elapsed(),
        }))
    }

    fn spawn(&self, level: u32) -> SolverResult<RunningSolver> {
        let mut child = self
            .config
            .command(level)
            .spawn()
            .map_err(|source| SolverError::Spawn {
                binary: self.config.binary.display().to_string(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or(SolverError::MissingPipe { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SolverError::MissingPipe { pipe: "stdout" })?;
        Ok(RunningSolver {
            level,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        })
    }

    /// `Running -> Stopped`, leaving other states alone
    async fn stop(&mut self) {
        if !matches!(self.state, SolverState::Running(_)) {
            return;
        }
        if let SolverState::Running(mut running) =
            std::mem::replace(&mut self.state, SolverState::Stopped)
        {
            if let Err(err) = running.child.kill().await {
                debug!(error = %err, "solver already gone");
            }
        }
    }

    async fn observe_kill_request(&mut self) {
        if *self.kill_requested.borrow_and_update() && !matches!(self.state, SolverState::Killed) {
            self.kill().await;
        }
    }
}

async fn read_job(
    running: &mut RunningSolver,
    kill_requested: &mut watch::Receiver<bool>,
    job: &Job,
    final_only: bool,
    sink: &mpsc::Sender<Evaluation>,
) -> SolverResult<JobEnd> {
    let mut borders = 0;
    let mut pending: Option<Evaluation> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = kill_requested.changed() => return Ok(JobEnd::KillRequested),
            next = running.lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(JobEnd::ProcessExited),
            Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(JobEnd::ProcessExited)
            }
            Err(err) => return Err(err.into()),
        };

        match classify_line(&line)? {
            LineKind::Border => {
                borders += 1;
                if borders == 2 {
                    if let Some(last) = pending.take() {
                        emit(sink, last).await;
                    }
                    return Ok(JobEnd::Finished);
                }
            }
            LineKind::Evaluation(parsed) => {
                let evaluation = to_evaluation(job, parsed)?;
                if let Some(previous) = pending.take() {
                    if evaluation.depth < previous.depth {
                        return Err(SolverError::DepthRegression {
                            previous: previous.depth,
                            depth: evaluation.depth,
                        });
                    }
                    if evaluation.depth > previous.depth && !final_only {
                        emit(sink, previous).await;
                    }
                }
                pending = Some(evaluation);
            }
            LineKind::Blank
            | LineKind::BoardArt
            | LineKind::Header
            | LineKind::ProblemMarker
            | LineKind::UnresolvedBound => {}
        }
    }
}

fn to_evaluation(job: &Job, parsed: ParsedLine) -> SolverResult<Evaluation> {
    Ok(Evaluation::new(
        job.position,
        job.level,
        parsed.depth,
        parsed.confidence,
        parsed.score,
        parsed.best_moves,
    )?)
}

async fn emit(sink: &mpsc::Sender<Evaluation>, evaluation: Evaluation) {
    if sink.send(evaluation).await.is_err() {
        debug!("evaluation receiver dropped");
    }
}
