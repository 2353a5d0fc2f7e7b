//! Per-thread stack recycling.
//!
//! Every OS thread that can run a fiber — a worker, or the I/O thread when
//! it spawns a fiber directly for an accepted TCP connection — owns its own
//! free-list. A stack is pushed back onto the list of whichever thread
//! happens to be running the fiber when its routine returns, so a thread
//! that sustains a steady flow of fibers reuses stacks without ever taking a
//! lock.

use fiber::stack::{DefaultFiberStack, FiberStack};
use std::cell::RefCell;

thread_local! {
    static RECYCLED: RefCell<Vec<DefaultFiberStack>> = const { RefCell::new(Vec::new()) };
}

/// Usable byte capacity of `stack` (top minus bottom), used to check whether
/// a recycled stack is large enough to satisfy a new request. This is the
/// mmap'd region's real size, not the caller's original `stack_size` ask, but
/// it is monotonic in it so the comparison is sound either way.
fn capacity(stack: &DefaultFiberStack) -> usize {
    stack.top().get() - stack.bottom().get()
}

/// Takes a stack of at least `stack_size` bytes from this thread's
/// free-list, or allocates a fresh one. A recycled stack smaller than the
/// request is left on the free-list for a smaller future request rather than
/// handed back undersized.
pub(crate) fn acquire(stack_size: usize) -> std::io::Result<DefaultFiberStack> {
    let reused = RECYCLED.with_borrow_mut(|list| {
        let idx = list.iter().position(|stack| capacity(stack) >= stack_size)?;
        Some(list.swap_remove(idx))
    });
    if let Some(stack) = reused {
        return Ok(stack);
    }
    DefaultFiberStack::new(stack_size)
}

/// Returns a stack whose fiber has just terminated to this thread's
/// free-list.
pub(crate) fn recycle(stack: DefaultFiberStack) {
    RECYCLED.with_borrow_mut(|list| list.push(stack));
}

#[cfg(test)]
pub(crate) fn recycled_len() -> usize {
    RECYCLED.with_borrow(Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiber::stack::MIN_STACK_SIZE;

    #[test]
    fn recycled_stack_is_reused() {
        let stack = acquire(MIN_STACK_SIZE).expect("allocate");
        assert_eq!(recycled_len(), 0);

        recycle(stack);
        assert_eq!(recycled_len(), 1);

        let _stack = acquire(MIN_STACK_SIZE).expect("reuse from free-list");
        assert_eq!(recycled_len(), 0, "acquire should have popped the recycled stack");
    }

    #[test]
    fn undersized_recycled_stack_is_not_reused() {
        let small = acquire(MIN_STACK_SIZE).expect("allocate small");
        recycle(small);
        assert_eq!(recycled_len(), 1);

        let large_size = capacity_of_freelist_entry() * 4;
        let _large = acquire(large_size).expect("allocate fresh, larger stack");
        assert_eq!(
            recycled_len(),
            1,
            "the undersized stack must stay on the free-list, not be handed back short"
        );
    }

    fn capacity_of_freelist_entry() -> usize {
        RECYCLED.with_borrow(|list| capacity(&list[0]))
    }
}
