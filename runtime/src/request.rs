//! The I/O request protocol: a tagged union of request kinds that crosses
//! the boundary between a suspended fiber and the I/O thread.
//!
//! Every variant carries its input fields plus a slot for its result, filled
//! in by the matching completion handler in [`crate::io`] before the request
//! is handed back to the fiber that issued it.

use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;

use crate::io::pipe::PipeHandle;
use crate::io::process::{ProgramOutcome, ProgramWaitState};
use crate::io::tcp::TcpHandle;

/// A single in-flight I/O operation, stack-resident for the duration of the
/// suspension except [`Request::ProgramRun`], whose wait handle is heap
/// allocated so it can outlive the spawning call.
pub enum Request {
    ReadDir(ReadDirRequest),
    FileOpen(FileOpenRequest),
    FileRead(FileReadRequest),
    FileWrite(FileWriteRequest),
    FileClose(FileCloseRequest),
    TcpListen(TcpListenRequest),
    TcpConnect(TcpConnectRequest),
    TcpRead(TcpReadRequest),
    TcpWrite(TcpWriteRequest),
    TcpClose(TcpCloseRequest),
    ProgramRun(ProgramRunRequest),
    ProgramWait(ProgramWaitRequest),
    PipeRead(PipeReadRequest),
    PipeWrite(PipeWriteRequest),
    PipeClose(PipeCloseRequest),
}

pub struct ReadDirRequest {
    pub path: PathBuf,
    pub result: Option<std::io::Result<Vec<std::ffi::OsString>>>,
}

pub struct FileOpenRequest {
    pub path: PathBuf,
    pub options: std::fs::OpenOptions,
    pub result: Option<std::io::Result<std::fs::File>>,
}

pub struct FileReadRequest {
    pub file: std::fs::File,
    pub buf: Vec<u8>,
    pub position: u64,
    pub result: Option<std::io::Result<(std::fs::File, Vec<u8>, usize)>>,
}

pub struct FileWriteRequest {
    pub file: std::fs::File,
    pub buf: Vec<u8>,
    pub position: u64,
    pub result: Option<std::io::Result<(std::fs::File, usize)>>,
}

pub struct FileCloseRequest {
    pub file: std::fs::File,
    pub result: Option<std::io::Result<()>>,
}

/// Listener backlog, matching the original runtime's fixed `uv_listen`
/// backlog.
pub const TCP_BACKLOG: i32 = 2000;

pub struct TcpListenRequest {
    pub addr: SocketAddrV4,
    /// Invoked on a freshly spawned fiber for every accepted connection.
    /// `Arc`-shared rather than borrowed so it outlives every connection
    /// accepted over the listener's lifetime, not just this call.
    pub handler: Arc<dyn Fn(TcpHandle) + Send + Sync + 'static>,
    pub result: Option<std::io::Result<()>>,
}

pub struct TcpConnectRequest {
    pub addr: SocketAddrV4,
    pub result: Option<std::io::Result<TcpHandle>>,
}

pub struct TcpReadRequest {
    pub handle: TcpHandle,
    pub buf: Vec<u8>,
    pub result: Option<std::io::Result<(TcpHandle, Vec<u8>, usize)>>,
}

pub struct TcpWriteRequest {
    pub handle: TcpHandle,
    pub buf: Vec<u8>,
    pub result: Option<std::io::Result<(TcpHandle, usize)>>,
}

pub struct TcpCloseRequest {
    pub handle: TcpHandle,
    pub result: Option<std::io::Result<()>>,
}

pub struct ProgramRunRequest {
    pub argv: Vec<std::ffi::OsString>,
    pub result: Option<Result<ProgramOutcome, ProgramRunError>>,
}

/// Distinguishes "the child never started" from any other I/O failure while
/// setting it up (pipe registration, etc.), so the public API can surface
/// `RuntimeError::Spawn` specifically for the former.
pub enum ProgramRunError {
    Spawn(std::io::Error),
    Io(std::io::Error),
}

pub struct ProgramWaitRequest {
    pub wait_state: Arc<ProgramWaitState>,
    pub result: Option<i32>,
}

pub struct PipeReadRequest {
    pub handle: PipeHandle,
    pub buf: Vec<u8>,
    pub result: Option<std::io::Result<(PipeHandle, Vec<u8>, usize)>>,
}

pub struct PipeWriteRequest {
    pub handle: PipeHandle,
    pub buf: Vec<u8>,
    pub result: Option<std::io::Result<(PipeHandle, usize)>>,
}

pub struct PipeCloseRequest {
    pub handle: PipeHandle,
    pub result: Option<std::io::Result<()>>,
}
