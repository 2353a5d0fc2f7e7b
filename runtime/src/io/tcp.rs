//! TCP listener/stream handling on the I/O thread.
//!
//! A [`TcpHandle`] is just a token into the reactor's stream table: the
//! actual `mio::net::TcpStream` lives in [`super::Reactor`] for the whole
//! lifetime of the connection, and fibers only ever hold the lightweight,
//! `Copy` token that names it.

use std::io::{self, Read, Write};
use std::sync::Arc;

use mio::Interest;
use mio::net::{TcpListener, TcpStream};

use crate::request::{
    Request, TcpCloseRequest, TcpConnectRequest, TcpListenRequest, TcpReadRequest, TcpWriteRequest,
};
use crate::scheduler::{FiberHandle, Scheduler};

use super::{PendingOp, Reactor, StreamSource};

/// Opaque handle to a connected TCP stream, valid until [`crate::api::close_tcp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TcpHandle(pub(crate) mio::Token);

pub(crate) struct Listener {
    pub(crate) listener: TcpListener,
    pub(crate) handler: Arc<dyn Fn(TcpHandle) + Send + Sync>,
}

pub(crate) fn handle_listen(
    reactor: &mut Reactor,
    scheduler: &Arc<Scheduler>,
    fiber: FiberHandle,
    mut req: TcpListenRequest,
) {
    let result = (|| -> io::Result<()> {
        let mut listener = TcpListener::bind(std::net::SocketAddr::V4(req.addr))?;
        let token = reactor.next_token();
        reactor
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;
        reactor.listeners.insert(
            token,
            Listener {
                listener,
                handler: Arc::clone(&req.handler),
            },
        );
        Ok(())
    })();

    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::TcpListen(req)));
}

/// Accepts every pending connection on `token`'s listener, registering each
/// accepted stream and spawning a fresh fiber running the listener's
/// handler for it. The listening fiber itself is never resumed again.
pub(crate) fn accept_ready(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, token: mio::Token, stack_size: usize) {
    let Some(listener_entry) = reactor.listeners.get_mut(&token) else {
        return;
    };

    loop {
        match listener_entry.listener.accept() {
            Ok((mut stream, _addr)) => {
                let conn_token = reactor.next_token();
                if reactor
                    .poll
                    .registry()
                    .register(&mut stream, conn_token, Interest::READABLE | Interest::WRITABLE)
                    .is_err()
                {
                    continue;
                }
                reactor.streams.insert(conn_token, StreamSource::Tcp(stream));

                let handler = Arc::clone(&listener_entry.handler);
                let handle = TcpHandle(conn_token);
                scheduler.spawn_green(Box::new(move || handler(handle)), stack_size);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => break,
        }
    }
}

pub(crate) fn handle_connect(
    reactor: &mut Reactor,
    scheduler: &Arc<Scheduler>,
    fiber: FiberHandle,
    mut req: TcpConnectRequest,
) {
    let result = (|| -> io::Result<TcpHandle> {
        let mut stream = TcpStream::connect(std::net::SocketAddr::V4(req.addr))?;
        let token = reactor.next_token();
        reactor
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        reactor.streams.insert(token, StreamSource::Tcp(stream));
        Ok(TcpHandle(token))
    })();

    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::TcpConnect(req)));
}

pub(crate) fn handle_read(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: TcpReadRequest) {
    let token = req.handle.0;
    let mut buf = std::mem::take(&mut req.buf);
    match try_read(reactor, token, &mut buf) {
        Some(Ok(n)) => {
            req.buf = buf;
            req.result = Some(Ok((req.handle, std::mem::take(&mut req.buf), n)));
            scheduler.complete(fiber, Box::new(Request::TcpRead(req)));
        }
        Some(Err(err)) => {
            req.buf = buf;
            req.result = Some(Err(err));
            scheduler.complete(fiber, Box::new(Request::TcpRead(req)));
        }
        None => {
            req.buf = buf;
            reactor.pending.insert(token, PendingOp::TcpRead(fiber, req));
        }
    }
}

pub(crate) fn retry_read(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, token: mio::Token) {
    if let Some(PendingOp::TcpRead(fiber, mut req)) = reactor.pending.remove(&token) {
        let mut buf = std::mem::take(&mut req.buf);
        match try_read(reactor, token, &mut buf) {
            Some(Ok(n)) => {
                req.result = Some(Ok((req.handle, buf, n)));
                scheduler.complete(fiber, Box::new(Request::TcpRead(req)));
            }
            Some(Err(err)) => {
                req.buf = buf;
                req.result = Some(Err(err));
                scheduler.complete(fiber, Box::new(Request::TcpRead(req)));
            }
            None => {
                req.buf = buf;
                reactor.pending.insert(token, PendingOp::TcpRead(fiber, req));
            }
        }
    }
}

fn try_read(reactor: &mut Reactor, token: mio::Token, buf: &mut [u8]) -> Option<io::Result<usize>> {
    let Some(StreamSource::Tcp(stream)) = reactor.streams.get_mut(&token) else {
        return Some(Err(io::Error::from(io::ErrorKind::NotConnected)));
    };
    match stream.read(buf) {
        Ok(n) => Some(Ok(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
        Err(err) => Some(Err(err)),
    }
}

pub(crate) fn handle_write(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: TcpWriteRequest) {
    let token = req.handle.0;
    match try_write(reactor, token, &req.buf) {
        Some(Ok(n)) => {
            req.result = Some(Ok((req.handle, n)));
            scheduler.complete(fiber, Box::new(Request::TcpWrite(req)));
        }
        Some(Err(err)) => {
            req.result = Some(Err(err));
            scheduler.complete(fiber, Box::new(Request::TcpWrite(req)));
        }
        None => {
            reactor.pending.insert(token, PendingOp::TcpWrite(fiber, req));
        }
    }
}

pub(crate) fn retry_write(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, token: mio::Token) {
    if let Some(PendingOp::TcpWrite(fiber, mut req)) = reactor.pending.remove(&token) {
        match try_write(reactor, token, &req.buf) {
            Some(Ok(n)) => {
                req.result = Some(Ok((req.handle, n)));
                scheduler.complete(fiber, Box::new(Request::TcpWrite(req)));
            }
            Some(Err(err)) => {
                req.result = Some(Err(err));
                scheduler.complete(fiber, Box::new(Request::TcpWrite(req)));
            }
            None => {
                reactor.pending.insert(token, PendingOp::TcpWrite(fiber, req));
            }
        }
    }
}

fn try_write(reactor: &mut Reactor, token: mio::Token, buf: &[u8]) -> Option<io::Result<usize>> {
    let Some(StreamSource::Tcp(stream)) = reactor.streams.get_mut(&token) else {
        return Some(Err(io::Error::from(io::ErrorKind::NotConnected)));
    };
    match stream.write(buf) {
        Ok(n) => Some(Ok(n)),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => None,
        Err(err) => Some(Err(err)),
    }
}

/// Closes a TCP stream. Matches the close arm's own result — the original
/// runtime's `closeTcp` mistakenly returned the preceding write's result
/// instead.
pub(crate) fn handle_close(reactor: &mut Reactor, scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: TcpCloseRequest) {
    let token = req.handle.0;
    let result = if let Some(StreamSource::Tcp(mut stream)) = reactor.streams.remove(&token) {
        reactor.poll.registry().deregister(&mut stream).map(drop)
    } else {
        Err(io::Error::from(io::ErrorKind::NotConnected))
    };
    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::TcpClose(req)));
}
