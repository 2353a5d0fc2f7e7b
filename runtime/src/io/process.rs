//! Child process handling on the I/O thread.
//!
//! A spawned program's stdin/stdout/stderr become ordinary [`PipeHandle`]s,
//! and its exit status is published through [`ProgramWaitState`] — a small
//! rendezvous that works whether the waiting fiber suspends before or after
//! the child has already exited.

use std::io;
use std::os::fd::OwnedFd;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use crate::request::{ProgramRunError, ProgramRunRequest, ProgramWaitRequest, Request};
use crate::scheduler::{FiberHandle, Scheduler};

use super::Reactor;
use super::pipe::PipeHandle;

/// Handles returned by [`crate::api::run_program`].
pub struct ProgramOutcome {
    pub stdin: PipeHandle,
    pub stdout: PipeHandle,
    pub stderr: PipeHandle,
    pub wait_state: Arc<ProgramWaitState>,
}

/// Rendezvous between the background thread that reaps a child's exit status
/// and the fiber that calls [`crate::api::wait_program`].
///
/// The original implementation tracked this with two independent booleans
/// (`alreadyExited` / `resumeOnWait`) and leaked the state if a child exited
/// but was never waited on. Folding both flags into one state machine behind
/// a single lock makes "already exited, not yet waited" and "not yet exited,
/// already waiting" the only two transient states, and the `Arc` is dropped
/// by whichever side finishes second.
pub struct ProgramWaitState {
    inner: Mutex<WaitInner>,
}

enum WaitInner {
    Running,
    Exited(i32),
    Waiting(FiberHandle, ProgramWaitRequest),
}

impl ProgramWaitState {
    fn new() -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(WaitInner::Running) })
    }

    /// Called by the reaper thread once the child has exited.
    fn exited(self: &Arc<Self>, scheduler: &Arc<Scheduler>, code: i32) {
        let waiter = {
            let mut inner = self.inner.lock().expect("wait state poisoned");
            match std::mem::replace(&mut *inner, WaitInner::Exited(code)) {
                WaitInner::Waiting(fiber, req) => Some((fiber, req)),
                _ => None,
            }
        };
        if let Some((fiber, mut req)) = waiter {
            req.result = Some(code);
            scheduler.complete(fiber, Box::new(Request::ProgramWait(req)));
        }
    }
}

pub(crate) fn handle_run(
    reactor: &mut Reactor,
    scheduler: &Arc<Scheduler>,
    fiber: FiberHandle,
    mut req: ProgramRunRequest,
) {
    let result = (|| -> Result<ProgramOutcome, ProgramRunError> {
        let (argv0, rest) = req
            .argv
            .split_first()
            .ok_or_else(|| ProgramRunError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, "empty argv")))?;

        let mut child = Command::new(argv0)
            .args(rest)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(ProgramRunError::Spawn)?;

        let stdin_fd: OwnedFd = child.stdin.take().expect("piped stdin").into();
        let stdout_fd: OwnedFd = child.stdout.take().expect("piped stdout").into();
        let stderr_fd: OwnedFd = child.stderr.take().expect("piped stderr").into();

        let stdin = super::pipe::register_sender(reactor, stdin_fd).map_err(ProgramRunError::Io)?;
        let stdout = super::pipe::register_receiver(reactor, stdout_fd).map_err(ProgramRunError::Io)?;
        let stderr = super::pipe::register_receiver(reactor, stderr_fd).map_err(ProgramRunError::Io)?;

        let wait_state = ProgramWaitState::new();
        let reaper_state = Arc::clone(&wait_state);
        let reaper_scheduler = Arc::clone(scheduler);
        std::thread::Builder::new()
            .name("program-reaper".into())
            .spawn(move || {
                let status = child.wait();
                let code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                reaper_state.exited(&reaper_scheduler, code);
            })
            .expect("failed to spawn reaper thread");

        Ok(ProgramOutcome { stdin, stdout, stderr, wait_state })
    })();

    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::ProgramRun(req)));
}

pub(crate) fn handle_wait(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: ProgramWaitRequest) {
    let wait_state = Arc::clone(&req.wait_state);
    let mut inner = wait_state.inner.lock().expect("wait state poisoned");
    let code = match &*inner {
        WaitInner::Exited(code) => *code,
        WaitInner::Running => {
            *inner = WaitInner::Waiting(fiber, req);
            return;
        }
        WaitInner::Waiting(..) => {
            panic!("wait_program called twice on the same program");
        }
    };
    drop(inner);

    req.result = Some(code);
    scheduler.complete(fiber, Box::new(Request::ProgramWait(req)));
}
