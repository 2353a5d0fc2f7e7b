//! The synchronous-looking public API.
//!
//! Every function here must be called from inside a fiber body (one spawned
//! via [`crate::Runtime::spawn`]). Each builds a [`crate::request::Request`],
//! suspends the calling fiber with it via [`scheduler::suspend_current`],
//! and unpacks the result once the I/O thread has completed it — from the
//! caller's perspective this reads exactly like a blocking call, but the
//! worker thread is freed to run other fibers while it waits.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::net::SocketAddrV4;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::io::pipe::PipeHandle;
use crate::io::process::ProgramOutcome;
use crate::io::tcp::TcpHandle;
use crate::request::{
    FileCloseRequest, FileOpenRequest, FileReadRequest, FileWriteRequest, PipeCloseRequest,
    PipeReadRequest, PipeWriteRequest, ProgramRunError, ProgramRunRequest, ProgramWaitRequest,
    ReadDirRequest, Request, TcpCloseRequest, TcpConnectRequest, TcpListenRequest, TcpReadRequest,
    TcpWriteRequest,
};
use crate::scheduler::suspend_current;

fn io(result: std::io::Result<()>) -> Result<()> {
    result.map_err(RuntimeError::Io)
}

/// Lists the entries of a directory.
pub fn read_dir(path: impl AsRef<Path>) -> Result<Vec<OsString>> {
    let req = ReadDirRequest { path: path.as_ref().to_path_buf(), result: None };
    let Request::ReadDir(ReadDirRequest { result, .. }) = suspend_current(Request::ReadDir(req)) else {
        unreachable!("suspend_current returned a different request kind than it was given");
    };
    result.expect("completion handler always fills in result").map_err(RuntimeError::Io)
}

/// Opens a file with the given options.
pub fn open_file(path: impl AsRef<Path>, options: OpenOptions) -> Result<File> {
    let req = FileOpenRequest { path: path.as_ref().to_path_buf(), options, result: None };
    let Request::FileOpen(FileOpenRequest { result, .. }) = suspend_current(Request::FileOpen(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result").map_err(RuntimeError::Io)
}

/// Reads up to `buf.len()` bytes at `position`, returning the file (for
/// further calls) and the number of bytes read.
pub fn read_file(file: File, buf: Vec<u8>, position: u64) -> Result<(File, Vec<u8>, usize)> {
    let req = FileReadRequest { file, buf, position, result: None };
    let Request::FileRead(FileReadRequest { result, .. }) = suspend_current(Request::FileRead(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result").map_err(RuntimeError::Io)
}

/// Writes `buf` at `position`, returning the file and the number of bytes
/// written.
pub fn write_file(file: File, buf: Vec<u8>, position: u64) -> Result<(File, usize)> {
    let req = FileWriteRequest { file, buf, position, result: None };
    let Request::FileWrite(FileWriteRequest { result, .. }) = suspend_current(Request::FileWrite(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result").map_err(RuntimeError::Io)
}

/// Closes a file. The handle passed in is consumed either way.
pub fn close_file(file: File) -> Result<()> {
    let req = FileCloseRequest { file, result: None };
    let Request::FileClose(FileCloseRequest { result, .. }) = suspend_current(Request::FileClose(req)) else {
        unreachable!()
    };
    io(result.expect("completion handler always fills in result"))
}

/// Starts listening on `addr`. `handler` is invoked, on its own freshly
/// spawned fiber, once per accepted connection for as long as the listener
/// lives — the listening fiber that calls this function is never resumed
/// again after the listener is installed.
pub fn listen_tcp<F>(addr: SocketAddrV4, handler: F) -> Result<()>
where
    F: Fn(TcpHandle) + Send + Sync + 'static,
{
    let req = TcpListenRequest { addr, handler: Arc::new(handler), result: None };
    let Request::TcpListen(TcpListenRequest { result, .. }) = suspend_current(Request::TcpListen(req)) else {
        unreachable!()
    };
    io(result.expect("completion handler always fills in result"))
}

/// Connects to `addr`, returning a handle to the new stream.
pub fn connect_tcp(addr: SocketAddrV4) -> Result<TcpHandle> {
    let req = TcpConnectRequest { addr, result: None };
    let Request::TcpConnect(TcpConnectRequest { result, .. }) = suspend_current(Request::TcpConnect(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result").map_err(RuntimeError::Io)
}

/// Reads up to `buf.len()` bytes from `handle`. A zero-length result means
/// end of stream, not an error.
pub fn read_tcp(handle: TcpHandle, buf: Vec<u8>) -> Result<(Vec<u8>, usize)> {
    let req = TcpReadRequest { handle, buf, result: None };
    let Request::TcpRead(TcpReadRequest { result, .. }) = suspend_current(Request::TcpRead(req)) else {
        unreachable!()
    };
    let (_, buf, n) = result.expect("completion handler always fills in result").map_err(RuntimeError::Io)?;
    Ok((buf, n))
}

/// Writes `buf` to `handle`, returning the number of bytes written.
pub fn write_tcp(handle: TcpHandle, buf: Vec<u8>) -> Result<usize> {
    let req = TcpWriteRequest { handle, buf, result: None };
    let Request::TcpWrite(TcpWriteRequest { result, .. }) = suspend_current(Request::TcpWrite(req)) else {
        unreachable!()
    };
    let (_, n) = result.expect("completion handler always fills in result").map_err(RuntimeError::Io)?;
    Ok(n)
}

/// Closes a TCP stream.
pub fn close_tcp(handle: TcpHandle) -> Result<()> {
    let req = TcpCloseRequest { handle, result: None };
    let Request::TcpClose(TcpCloseRequest { result, .. }) = suspend_current(Request::TcpClose(req)) else {
        unreachable!()
    };
    io(result.expect("completion handler always fills in result"))
}

/// Spawns a child process with piped stdin/stdout/stderr.
///
/// `argv[0]` is the program to execute. By the time this call returns, the
/// child has already been spawned (`Command::spawn` runs synchronously on
/// the I/O thread during submission drain) — the pipes and wait handle
/// returned are immediately usable.
pub fn run_program(argv: Vec<OsString>) -> Result<ProgramOutcome> {
    let req = ProgramRunRequest { argv, result: None };
    let Request::ProgramRun(ProgramRunRequest { result, .. }) = suspend_current(Request::ProgramRun(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result").map_err(|err| match err {
        ProgramRunError::Spawn(err) => RuntimeError::Spawn(err),
        ProgramRunError::Io(err) => RuntimeError::Io(err),
    })
}

/// Waits for a spawned program to exit, returning its exit code. Returns the
/// correct code exactly once, whether the child exited before or after this
/// call suspended.
pub fn wait_program(outcome: &ProgramOutcome) -> i32 {
    let req = ProgramWaitRequest { wait_state: Arc::clone(&outcome.wait_state), result: None };
    let Request::ProgramWait(ProgramWaitRequest { result, .. }) = suspend_current(Request::ProgramWait(req)) else {
        unreachable!()
    };
    result.expect("completion handler always fills in result")
}

/// Reads up to `buf.len()` bytes from a pipe end.
pub fn read_pipe(handle: PipeHandle, buf: Vec<u8>) -> Result<(Vec<u8>, usize)> {
    let req = PipeReadRequest { handle, buf, result: None };
    let Request::PipeRead(PipeReadRequest { result, .. }) = suspend_current(Request::PipeRead(req)) else {
        unreachable!()
    };
    let (_, buf, n) = result.expect("completion handler always fills in result").map_err(RuntimeError::Io)?;
    Ok((buf, n))
}

/// Writes `buf` to a pipe end, returning the number of bytes written.
pub fn write_pipe(handle: PipeHandle, buf: Vec<u8>) -> Result<usize> {
    let req = PipeWriteRequest { handle, buf, result: None };
    let Request::PipeWrite(PipeWriteRequest { result, .. }) = suspend_current(Request::PipeWrite(req)) else {
        unreachable!()
    };
    let (_, n) = result.expect("completion handler always fills in result").map_err(RuntimeError::Io)?;
    Ok(n)
}

/// Closes a pipe end.
pub fn close_pipe(handle: PipeHandle) -> Result<()> {
    let req = PipeCloseRequest { handle, result: None };
    let Request::PipeClose(PipeCloseRequest { result, .. }) = suspend_current(Request::PipeClose(req)) else {
        unreachable!()
    };
    io(result.expect("completion handler always fills in result"))
}
