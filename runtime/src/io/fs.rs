//! Filesystem handling on the I/O thread.
//!
//! The kernel's `O_NONBLOCK` doesn't apply to regular files, so unlike TCP and
//! pipes these requests are served synchronously on the I/O thread rather
//! than registered with the reactor. They complete in one `submit()` call.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::request::{
    FileCloseRequest, FileOpenRequest, FileReadRequest, FileWriteRequest, ReadDirRequest, Request,
};
use crate::scheduler::{FiberHandle, Scheduler};

pub(crate) fn handle_read_dir(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: ReadDirRequest) {
    let result = (|| -> std::io::Result<Vec<std::ffi::OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&req.path)? {
            names.push(entry?.file_name());
        }
        Ok(names)
    })();

    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::ReadDir(req)));
}

pub(crate) fn handle_open(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: FileOpenRequest) {
    let result = req.options.open(&req.path);
    req.result = Some(result);
    scheduler.complete(fiber, Box::new(Request::FileOpen(req)));
}

pub(crate) fn handle_read(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: FileReadRequest) {
    let mut buf = std::mem::take(&mut req.buf);
    let result = (|| -> std::io::Result<usize> {
        req.file.seek(SeekFrom::Start(req.position))?;
        req.file.read(&mut buf)
    })();

    match result {
        Ok(n) => req.result = Some(Ok((req.file.try_clone().expect("file handle still valid"), buf, n))),
        Err(err) => {
            req.buf = buf;
            req.result = Some(Err(err));
        }
    }
    scheduler.complete(fiber, Box::new(Request::FileRead(req)));
}

pub(crate) fn handle_write(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: FileWriteRequest) {
    let result = (|| -> std::io::Result<usize> {
        req.file.seek(SeekFrom::Start(req.position))?;
        req.file.write(&req.buf)
    })();

    match result {
        Ok(n) => req.result = Some(Ok((req.file.try_clone().expect("file handle still valid"), n))),
        Err(err) => req.result = Some(Err(err)),
    }
    scheduler.complete(fiber, Box::new(Request::FileWrite(req)));
}

pub(crate) fn handle_close(scheduler: &Arc<Scheduler>, fiber: FiberHandle, mut req: FileCloseRequest) {
    req.result = Some(Ok(()));
    scheduler.complete(fiber, Box::new(Request::FileClose(req)));
}
