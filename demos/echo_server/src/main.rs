//! Listens on a TCP port and echoes back whatever each client sends.

use std::net::SocketAddrV4;

use clap::Parser;
use runtime::{Options, Runtime};

#[derive(Parser)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:17171
    #[arg(long, default_value = "127.0.0.1:17171")]
    addr: SocketAddrV4,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let rt = Runtime::init(Options::default())?;

    rt.spawn(move || {
        if let Err(err) = runtime::api::listen_tcp(args.addr, handle_connection) {
            tracing::error!(error = %err, "failed to start listening");
        } else {
            tracing::info!(addr = %args.addr, "echo server listening");
        }
    });

    std::thread::sleep(std::time::Duration::from_secs(u64::MAX));
    Ok(())
}

/// `write_tcp` may complete with fewer bytes than handed to it; keep issuing
/// writes of the remainder until `data` is fully flushed.
fn write_all_tcp(handle: runtime::TcpHandle, mut data: &[u8]) -> runtime::Result<()> {
    while !data.is_empty() {
        let n = runtime::api::write_tcp(handle, data.to_vec())?;
        data = &data[n..];
    }
    Ok(())
}

fn handle_connection(handle: runtime::TcpHandle) {
    let mut buf = vec![0u8; 1024];
    loop {
        let (returned, n) = match runtime::api::read_tcp(handle, buf) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "read failed, closing connection");
                let _ = runtime::api::close_tcp(handle);
                return;
            }
        };
        if n == 0 {
            let _ = runtime::api::close_tcp(handle);
            return;
        }

        if let Err(err) = write_all_tcp(handle, &returned[..n]) {
            tracing::warn!(error = %err, "write failed, closing connection");
            let _ = runtime::api::close_tcp(handle);
            return;
        }

        buf = returned;
    }
}
