//! The single I/O thread: one `mio::Poll` instance driving every
//! filesystem, TCP, pipe, and subprocess operation the runtime exposes.
//!
//! Fibers never touch the reactor directly. They suspend with a [`Request`]
//! (see [`crate::scheduler::suspend_current`]), the scheduler forwards it
//! here as a [`Submission`], and this thread dispatches it to the matching
//! handler in [`fs`], [`tcp`], [`pipe`], or [`process`]. Handlers that can't
//! complete immediately (anything that could block on socket/pipe
//! readiness) register with `poll` and park the request in `pending` until a
//! readiness event lets them retry.

mod fs;
pub mod pipe;
pub mod process;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::pipe::{Receiver, Sender};
use mio::{Events, Poll, Token};

use queue::Queue;

use crate::request::Request;
use crate::scheduler::{FiberHandle, Scheduler};
use tcp::Listener;

/// A suspended fiber's request, handed from a worker thread to the I/O
/// thread once the fiber yields it.
pub(crate) struct Submission {
    pub(crate) handle: FiberHandle,
    pub(crate) request: Box<Request>,
}

/// The non-blocking streams a `mio::Token` can name. Regular files are never
/// registered here — see [`fs`].
pub(crate) enum StreamSource {
    Tcp(TcpStream),
    PipeReceiver(Receiver),
    PipeSender(Sender),
}

/// A request that returned `WouldBlock` once already, parked until the
/// matching token becomes ready again.
pub(crate) enum PendingOp {
    TcpRead(FiberHandle, crate::request::TcpReadRequest),
    TcpWrite(FiberHandle, crate::request::TcpWriteRequest),
    PipeRead(FiberHandle, crate::request::PipeReadRequest),
    PipeWrite(FiberHandle, crate::request::PipeWriteRequest),
}

/// Tick length of the `poll`/drain loop: short enough that a freshly
/// enqueued submission is never stuck behind a long wait, long enough that
/// an idle runtime doesn't spin.
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

pub(crate) struct Reactor {
    pub(crate) poll: Poll,
    events: Events,
    next_token: usize,
    pub(crate) listeners: HashMap<Token, Listener>,
    pub(crate) streams: HashMap<Token, StreamSource>,
    pub(crate) pending: HashMap<Token, PendingOp>,
    stack_size: usize,
}

impl Reactor {
    fn new(stack_size: usize) -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            next_token: 0,
            listeners: HashMap::new(),
            streams: HashMap::new(),
            pending: HashMap::new(),
            stack_size,
        })
    }

    pub(crate) fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn submit(&mut self, scheduler: &Arc<Scheduler>, submission: Submission) {
        let Submission { handle, request } = submission;
        match *request {
            Request::ReadDir(req) => fs::handle_read_dir(scheduler, handle, req),
            Request::FileOpen(req) => fs::handle_open(scheduler, handle, req),
            Request::FileRead(req) => fs::handle_read(scheduler, handle, req),
            Request::FileWrite(req) => fs::handle_write(scheduler, handle, req),
            Request::FileClose(req) => fs::handle_close(scheduler, handle, req),
            Request::TcpListen(req) => tcp::handle_listen(self, scheduler, handle, req),
            Request::TcpConnect(req) => tcp::handle_connect(self, scheduler, handle, req),
            Request::TcpRead(req) => tcp::handle_read(self, scheduler, handle, req),
            Request::TcpWrite(req) => tcp::handle_write(self, scheduler, handle, req),
            Request::TcpClose(req) => tcp::handle_close(self, scheduler, handle, req),
            Request::ProgramRun(req) => process::handle_run(self, scheduler, handle, req),
            Request::ProgramWait(req) => process::handle_wait(scheduler, handle, req),
            Request::PipeRead(req) => pipe::handle_read(self, scheduler, handle, req),
            Request::PipeWrite(req) => pipe::handle_write(self, scheduler, handle, req),
            Request::PipeClose(req) => pipe::handle_close(self, scheduler, handle, req),
        }
    }

    fn poll_once(&mut self, scheduler: &Arc<Scheduler>) -> std::io::Result<()> {
        match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if self.listeners.contains_key(&token) {
                if readable {
                    tcp::accept_ready(self, scheduler, token, self.stack_size);
                }
                continue;
            }
            if readable {
                match self.streams.get(&token) {
                    Some(StreamSource::Tcp(_)) => tcp::retry_read(self, scheduler, token),
                    Some(StreamSource::PipeReceiver(_)) => pipe::retry_read(self, scheduler, token),
                    _ => {}
                }
            }
            if writable {
                match self.streams.get(&token) {
                    Some(StreamSource::Tcp(_)) => tcp::retry_write(self, scheduler, token),
                    Some(StreamSource::PipeSender(_)) => pipe::retry_write(self, scheduler, token),
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

fn io_loop(scheduler: Arc<Scheduler>, submissions: Arc<Queue<Submission>>, stack_size: usize) {
    let mut reactor = Reactor::new(stack_size).expect("failed to create I/O reactor");

    loop {
        while let Some(submission) = submissions.try_dequeue() {
            reactor.submit(&scheduler, submission);
        }

        if let Err(err) = reactor.poll_once(&scheduler) {
            tracing::error!(error = %err, "I/O reactor poll failed");
        }
    }
}

/// Spawns the runtime's single I/O thread.
pub(crate) fn spawn_io_thread(
    scheduler: Arc<Scheduler>,
    submissions: Arc<Queue<Submission>>,
    stack_size: usize,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("fiber-io".into())
        .spawn(move || io_loop(scheduler, submissions, stack_size))
        .expect("failed to spawn I/O thread")
}
