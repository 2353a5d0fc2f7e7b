//! The fiber scheduler: the run-queue, the worker threads, and the glue that
//! lets a suspended fiber be resumed by whichever thread dequeues it next.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use fiber::stack::DefaultFiberStack;
use fiber::{Fiber, FiberResult, Suspend};
use queue::Queue;

use crate::request::Request;

/// Resume argument / yield value threaded through every fiber: `None` only
/// on the very first resume of a freshly spawned fiber, `Some` carrying the
/// request the fiber previously yielded, now filled in with its result.
pub(crate) type GreenFiber = Fiber<Option<Box<Request>>, Box<Request>, (), DefaultFiberStack>;
pub(crate) type GreenSuspend = Suspend<Option<Box<Request>>, Box<Request>>;

/// `Fiber` is intentionally `!Send` upstream because its author had no
/// concept of a fiber migrating to a different OS thread. This runtime's
/// whole point is to resume a fiber on whichever worker drains its
/// completion, so the stack (plain mmap'd memory with no thread-affinity of
/// its own — only our recycling pools are thread-local, and those are
/// separate from the stack's contents) is safe to move across threads.
struct SendFiber(GreenFiber);

// Safety: see the comment above; the fiber's stack carries no thread-local
// state and the recycling pool it eventually returns to is chosen by
// whichever thread happens to finish it, not baked into the stack itself.
unsafe impl Send for SendFiber {}

/// A suspended fiber together with the address of its `Suspend` handle,
/// cached so that whichever thread resumes it next can point the
/// thread-local "current fiber" slot at the right place before calling
/// `resume`. The address is stable for the fiber's whole lifetime: it is a
/// location inside the fiber's own stack memory, set once by the fiber body
/// on its first instruction and never touched again.
pub(crate) struct FiberHandle {
    fiber: SendFiber,
    suspend_addr: Arc<AtomicUsize>,
}

/// Unit of work on the run-queue: either spawn a brand new fiber, or resume
/// one that previously yielded and has since had its request completed.
pub(crate) enum Job {
    Spawn(Spawn),
    Resume(FiberHandle, Box<Request>),
}

pub(crate) struct Spawn {
    pub(crate) body: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) stack_size: usize,
}

thread_local! {
    static CURRENT_SUSPEND: Cell<*const ()> = const { Cell::new(std::ptr::null()) };
}

/// Suspends the fiber currently running on this thread, yielding `request`
/// and returning it once the I/O thread has filled in its result.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a fiber.
pub(crate) fn suspend_current(request: Request) -> Request {
    let addr = CURRENT_SUSPEND.with(Cell::get);
    assert!(
        !addr.is_null(),
        "runtime API called outside a fiber; this call must happen from a green-thread body"
    );
    // Safety: `addr` was set by `run_to_suspension` to the address of the
    // `Suspend` handle for the fiber currently executing on this thread.
    let suspend = unsafe { &*addr.cast::<GreenSuspend>() };
    let resumed = suspend.suspend(Box::new(request));
    *resumed.expect("a resumed fiber must always carry a completed request")
}

/// Outcome of driving a fiber (new or resumed) until its next suspension or
/// termination.
pub(crate) enum Outcome {
    /// The fiber yielded `request` and is now parked in `handle`, waiting to
    /// be handed to the I/O thread.
    Suspended(FiberHandle, Box<Request>),
    /// The fiber's routine returned; its stack is ready to be recycled by
    /// the calling thread.
    Finished(DefaultFiberStack),
}

fn run_to_suspension(mut handle: FiberHandle, input: Option<Box<Request>>) -> Outcome {
    let addr = handle.suspend_addr.load(Ordering::Acquire);
    if addr != 0 {
        CURRENT_SUSPEND.with(|cell| cell.set(addr as *const ()));
    }

    match handle.fiber.0.resume(input) {
        FiberResult::Yield(request) => Outcome::Suspended(handle, request),
        FiberResult::Return(()) => Outcome::Finished(handle.fiber.0.into_stack()),
    }
}

fn spawn_to_suspension(spawn: Spawn) -> std::io::Result<Outcome> {
    let stack = crate::stack_pool::acquire(spawn.stack_size)?;
    let suspend_addr = Arc::new(AtomicUsize::new(0));
    let slot = Arc::clone(&suspend_addr);
    let body = spawn.body;

    let mut fiber = GreenFiber::with_stack(stack, move |_input, suspend: &GreenSuspend| {
        slot.store(suspend as *const _ as usize, Ordering::Release);
        CURRENT_SUSPEND.with(|cell| cell.set(suspend as *const _ as *const ()));
        body();
    });

    Ok(match fiber.resume(None) {
        FiberResult::Yield(request) => Outcome::Suspended(
            FiberHandle {
                fiber: SendFiber(fiber),
                suspend_addr,
            },
            request,
        ),
        FiberResult::Return(()) => Outcome::Finished(fiber.into_stack()),
    })
}

/// Shared scheduler state: the run-queue and a handle to the I/O thread's
/// submission queue.
pub(crate) struct Scheduler {
    run_queue: Queue<Job>,
    io_submissions: Arc<Queue<crate::io::Submission>>,
}

impl Scheduler {
    pub(crate) fn new(io_submissions: Arc<Queue<crate::io::Submission>>) -> Arc<Self> {
        Arc::new(Self {
            run_queue: Queue::new(),
            io_submissions,
        })
    }

    pub(crate) fn enqueue(&self, job: Job) {
        self.run_queue.enqueue(job);
    }

    /// Schedules a brand new fiber running `body` on its own stack of
    /// `stack_size` bytes. Called both by the public `spawn_green` API and,
    /// internally, once per accepted TCP connection.
    pub(crate) fn spawn_green(&self, body: Box<dyn FnOnce() + Send + 'static>, stack_size: usize) {
        self.enqueue(Job::Spawn(Spawn { body, stack_size }));
    }

    fn drive(&self, outcome: std::io::Result<Outcome>) {
        match outcome {
            Ok(Outcome::Finished(stack)) => crate::stack_pool::recycle(stack),
            Ok(Outcome::Suspended(handle, request)) => {
                self.io_submissions.enqueue(crate::io::Submission { handle, request });
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to allocate a fiber stack, job dropped");
            }
        }
    }

    fn worker_loop(self: &Arc<Self>) {
        loop {
            match self.run_queue.dequeue() {
                Job::Spawn(spawn) => {
                    let outcome = spawn_to_suspension(spawn);
                    self.drive(outcome);
                }
                Job::Resume(handle, request) => {
                    let outcome = Ok(run_to_suspension(handle, Some(request)));
                    self.drive(outcome);
                }
            }
        }
    }

    pub(crate) fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|i| {
                let scheduler = Arc::clone(self);
                std::thread::Builder::new()
                    .name(format!("fiber-worker-{i}"))
                    .spawn(move || scheduler.worker_loop())
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }

    /// Re-enqueues a resumed fiber whose request has just been completed by
    /// the I/O thread. Used by completion handlers.
    pub(crate) fn complete(&self, handle: FiberHandle, request: Box<Request>) {
        self.enqueue(Job::Resume(handle, request));
    }
}
