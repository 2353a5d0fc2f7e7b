//! Pipe handling on the I/O thread.
//!
//! Mirrors [`super::tcp`]: a [`PipeHandle`] is a token into the reactor's
//! stream table, the actual `mio::unix::pipe` end lives on the I/O thread.

use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;

use mio::Interest;
use mio::unix::pipe;

use crate::request::{PipeCloseRequest, PipeReadRequest, PipeWriteRequest, Request};
use crate::scheduler::{FiberHandle, Scheduler};

use super::{PendingOp, Reactor, StreamSource};

/// Opaque handle to one end of a pipe, valid until [`crate::api::close_pipe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeHandle(pub(crate) mio::Token);

/// Registers an already-open file descriptor as the readable end of a pipe
/// (used for a spawned child's stdout/stderr).
pub(crate) fn register_receiver(reactor: &mut Reactor, fd: OwnedFd) -> io::Result<PipeHandle> {
    let mut receiver = pipe::Receiver::from(fd);
    let token = reactor.next_token();
    reactor.poll.registry().register(&mut receiver, token, Interest::READABLE)?;
    reactor.streams.insert(token, StreamSource::PipeReceiver(receiver));
    Ok(PipeHandle(token))
}

/// Registers an already-open file descriptor as the writable end of a pipe
/// (used for a spawned child's stdin).
pub(crate) fn register_sender(reactor: &mut Reactor, fd: OwnedFd) -> io::Result<PipeHandle> {
    let mut sender = pipe::Sender::from(fd);
    let token = reactor.next_token();
    reactor.poll.registry().register(&mut sender, token, Interest::WRITABLE)?;
    reactor.streams.insert(token, StreamSource::PipeSender(sender));
    Ok(PipeHandle(token))
}

pub(crate) fn handle_read(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: PipeReadRequest) {
    let token = req.handle.0;
    let mut buf = std::mem::take(&mut req.buf);
    match try_read(reactor, token, &mut buf) {
        Some(Ok(n)) => {
            req.result = Some(Ok((req.handle, buf, n)));
            scheduler.complete(fiber, Box::new(Request::PipeRead(req)));
        }
        Some(Err(err)) => {
            req.buf = buf;
            req.result = Some(Err(err));
            scheduler.complete(fiber, Box::new(Request::PipeRead(req)));
        }
        None => {
            req.buf = buf;
            reactor.pending.insert(token, PendingOp::PipeRead(fiber, req));
        }
    }
}

pub(crate) fn retry_read(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, token: mio::Token) {
    if let Some(PendingOp::PipeRead(fiber, mut req)) = reactor.pending.remove(&token) {
        let mut buf = std::mem::take(&mut req.buf);
        match try_read(reactor, token, &mut buf) {
            Some(Ok(n)) => {
                req.result = Some(Ok((req.handle, buf, n)));
                scheduler.complete(fiber, Box::new(Request::PipeRead(req)));
            }
            Some(Err(err)) => {
                req.buf = buf;
                req.result = Some(Err(err));
                scheduler.complete(fiber, Box::new(Request::PipeRead(req)));
            }
            None => {
                req.buf = buf;
                reactor.pending.insert(token, PendingOp::PipeRead(fiber, req));
            }
        }
    }
}

fn try_read(reactor: &mut Reactor, token: mio::Token, buf: &mut [u8]) -> Option<io::Result<usize>> {
    let Some(StreamSource::PipeReceiver(receiver)) = reactor.streams.get_mut(&token) else {
        return Some(Err(io::Error::from(io::ErrorKind::NotConnected)));
    };
    match receiver.read(buf) {
        Ok(n) => Some(Ok(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
        Err(err) => Some(Err(err)),
    }
}

pub(crate) fn handle_write(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: PipeWriteRequest) {
    let token = req.handle.0;
    match try_write(reactor, token, &req.buf) {
        Some(Ok(n)) => {
            req.result = Some(Ok((req.handle, n)));
            scheduler.complete(fiber, Box::new(Request::PipeWrite(req)));
        }
        Some(Err(err)) => {
            req.result = Some(Err(err));
            scheduler.complete(fiber, Box::new(Request::PipeWrite(req)));
        }
        None => {
            reactor.pending.insert(token, PendingOp::PipeWrite(fiber, req));
        }
    }
}

pub(crate) fn retry_write(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, token: mio::Token) {
    if let Some(PendingOp::PipeWrite(fiber, mut req)) = reactor.pending.remove(&token) {
        match try_write(reactor, token, &req.buf) {
            Some(Ok(n)) => {
                req.result = Some(Ok((req.handle, n)));
                scheduler.complete(fiber, Box::new(Request::PipeWrite(req)));
            }
            Some(Err(err)) => {
                req.result = Some(Err(err));
                scheduler.complete(fiber, Box::new(Request::PipeWrite(req)));
            }
            None => {
                reactor.pending.insert(token, PendingOp::PipeWrite(fiber, req));
            }
        }
    }
}

fn try_write(reactor: &mut Reactor, token: mio::Token, buf: &[u8]) -> Option<io::Result<usize>> {
    let Some(StreamSource::PipeSender(sender)) = reactor.streams.get_mut(&token) else {
        return Some(Err(io::Error::from(io::ErrorKind::NotConnected)));
    };
    match sender.write(buf) {
        Ok(n) => Some(Ok(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
        Err(err) => Some(Err(err)),
    }
}

pub(crate) fn handle_close(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: PipeCloseRequest) {
    let token = req.handle.0;
    let result = match reactor.streams.remove(&token) {
        Some(StreamSource::PipeReceiver(mut r)) => reactor.poll.registry().deregister(&mut r),
        Some(StreamSource::PipeSender(mut s)) => reactor.poll.registry().deregister(&mut s),
        _ => Err(io::Error::from(io::ErrorKind::NotConnected)),
    };
    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::PipeClose(req)));
}
