//! Copies `src` to `dst` a chunk at a time via `runtime::api`'s file calls.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use runtime::{Options, Runtime};

#[derive(Parser)]
struct Args {
    src: PathBuf,
    dst: PathBuf,
}

const CHUNK: usize = 64 * 1024;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let rt = Runtime::init(Options::default())?;
    let (done_tx, done_rx) = mpsc::channel();

    rt.spawn(move || {
        let result = copy(&args.src, &args.dst);
        let _ = done_tx.send(result);
    });

    match done_rx.recv().expect("copy fiber dropped its result sender") {
        Ok(total) => {
            tracing::info!(bytes = total, "copy complete");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// `write_file` may complete with fewer bytes than handed to it; keep
/// issuing writes of the remainder, advancing the file position, until
/// `chunk` is fully flushed.
fn write_all_file(
    mut file: std::fs::File,
    chunk: &[u8],
    start: u64,
) -> runtime::Result<(std::fs::File, u64)> {
    let mut written = 0u64;
    while (written as usize) < chunk.len() {
        let (returned, n) =
            runtime::api::write_file(file, chunk[written as usize..].to_vec(), start + written)?;
        file = returned;
        written += n as u64;
    }
    Ok((file, written))
}

fn copy(src: &std::path::Path, dst: &std::path::Path) -> runtime::Result<u64> {
    let mut read_opts = OpenOptions::new();
    read_opts.read(true);
    let input = runtime::api::open_file(src, read_opts)?;

    let mut write_opts = OpenOptions::new();
    write_opts.write(true).create(true).truncate(true);
    let output = runtime::api::open_file(dst, write_opts)?;

    let mut position = 0u64;
    let mut input = input;
    let mut output = output;
    loop {
        let buf = vec![0u8; CHUNK];
        let (returned_input, buf, n) = runtime::api::read_file(input, buf, position)?;
        input = returned_input;
        if n == 0 {
            break;
        }

        let (returned_output, written) = write_all_file(output, &buf[..n], position)?;
        output = returned_output;
        position += written;
    }

    runtime::api::close_file(input)?;
    runtime::api::close_file(output)?;
    Ok(position)
}
