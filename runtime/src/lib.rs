//! A user-space cooperative runtime: stackful fibers scheduled M:N over a
//! worker pool, with all filesystem, TCP, pipe, and subprocess I/O driven by
//! a single dedicated I/O thread.
//!
//! Call [`Runtime::init`] once per process, then use the functions in
//! [`api`] from inside a fiber body (spawned via [`Runtime::spawn`]) to
//! perform I/O without blocking the worker thread running it.

mod error;
mod io;
mod request;
mod scheduler;
mod stack_pool;

pub mod api;

pub use error::{Result, RuntimeError};
pub use io::pipe::PipeHandle;
pub use io::process::ProgramOutcome;
pub use io::tcp::TcpHandle;

use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use queue::Queue;

use scheduler::Scheduler;

/// Default stack size for a fiber that doesn't specify one: 1 MiB, matching
/// the donor's own `TASK_STACK_SIZE` guideline.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Default worker thread count when [`Options::default`] is used.
const DEFAULT_WORKER_THREADS: usize = 4;

/// Constructor parameters for [`Runtime::init`].
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Number of worker threads draining the run-queue.
    pub worker_threads: usize,
    /// Stack size, in bytes, for fibers spawned without an explicit size.
    pub stack_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self { worker_threads: DEFAULT_WORKER_THREADS, stack_size: DEFAULT_STACK_SIZE }
    }
}

static RUNTIME: OnceLock<RuntimeHandle> = OnceLock::new();

struct RuntimeHandle {
    scheduler: Arc<Scheduler>,
    stack_size: usize,
}

/// A running instance of the fiber runtime.
///
/// There is one process-wide runtime: [`Runtime::init`] may be called only
/// once. The returned value is a handle for spawning fibers and bare
/// threads; dropping it does not tear the runtime down, matching the
/// donor's own "init once, run for the life of the process" pattern.
pub struct Runtime {
    stack_size: usize,
    _workers: Vec<JoinHandle<()>>,
    _io_thread: JoinHandle<()>,
}

impl Runtime {
    /// Initializes the global run-queue, I/O submission queue, I/O thread,
    /// and worker pool. Must be called at most once per process.
    pub fn init(options: Options) -> Result<Self> {
        if options.worker_threads == 0 {
            return Err(RuntimeError::Init(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "worker_threads must be at least 1",
            )));
        }

        let io_submissions = Arc::new(Queue::new());
        let scheduler = Scheduler::new(Arc::clone(&io_submissions));
        let workers = scheduler.spawn_workers(options.worker_threads);
        let io_thread = io::spawn_io_thread(Arc::clone(&scheduler), io_submissions, options.stack_size);

        RUNTIME
            .set(RuntimeHandle { scheduler: Arc::clone(&scheduler), stack_size: options.stack_size })
            .map_err(|_| {
                RuntimeError::Init(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "Runtime::init called more than once",
                ))
            })?;

        tracing::debug!(workers = options.worker_threads, stack_size = options.stack_size, "runtime initialized");

        Ok(Self { stack_size: options.stack_size, _workers: workers, _io_thread: io_thread })
    }

    /// Schedules `body` as a new fiber on a fresh stack of this runtime's
    /// default stack size.
    pub fn spawn<F>(&self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with_stack_size(self.stack_size, body);
    }

    /// Schedules `body` as a new fiber on a fresh stack of `stack_size`
    /// bytes.
    pub fn spawn_with_stack_size<F>(&self, stack_size: usize, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        scheduler().spawn_green(Box::new(body), stack_size);
    }

    /// Spawns a bare OS thread, bypassing the fiber scheduler entirely.
    /// Matches the source's `startThread`, used for routines that must run
    /// on a dedicated thread rather than cooperatively (e.g. long blocking
    /// computation that would starve the fiber pool).
    pub fn spawn_thread<F>(&self, body: F) -> std::io::Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new().name("fiber-bare-thread".into()).spawn(body)
    }
}

fn scheduler() -> &'static Arc<Scheduler> {
    &RUNTIME.get().expect("Runtime::init must be called before using the runtime API").scheduler
}
