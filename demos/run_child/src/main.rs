//! Runs a child program, prints its stdout, and reports its exit code.

use std::ffi::OsString;
use std::sync::mpsc;

use clap::Parser;
use runtime::{Options, Runtime};

#[derive(Parser)]
struct Args {
    /// Program and arguments to run, e.g. `-- /bin/echo hi`
    #[arg(required = true)]
    argv: Vec<OsString>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let rt = Runtime::init(Options::default())?;
    let (done_tx, done_rx) = mpsc::channel();

    rt.spawn(move || {
        let result = run(args.argv);
        let _ = done_tx.send(result);
    });

    let code = done_rx.recv().expect("run fiber dropped its result sender")?;
    std::process::exit(code);
}

fn run(argv: Vec<OsString>) -> runtime::Result<i32> {
    let outcome = runtime::api::run_program(argv)?;

    let mut stdout_buf = Vec::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let (returned, n) = runtime::api::read_pipe(outcome.stdout, buf)?;
        if n == 0 {
            buf = returned;
            break;
        }
        stdout_buf.extend_from_slice(&returned[..n]);
        buf = returned;
    }

    print!("{}", String::from_utf8_lossy(&stdout_buf));

    runtime::api::close_pipe(outcome.stdin)?;
    runtime::api::close_pipe(outcome.stdout)?;
    runtime::api::close_pipe(outcome.stderr)?;

    Ok(runtime::api::wait_program(&outcome))
}
