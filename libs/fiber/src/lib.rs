//! Stackful coroutines used as the fiber primitive for the green-thread runtime.
//!
//! A [`Fiber`] is a unit of cooperative execution with its own stack. Calling
//! [`Fiber::resume`] transfers control onto the fiber's stack until it either
//! suspends itself via [`Suspend::suspend`] or returns from its body.
//!
//! This crate is heavily based off of [`corosensei`] by Amanieu d'Antras.
//!
//! [`corosensei`]: https://github.com/Amanieu/corosensei

mod arch;
pub mod stack;
mod utils;

use crate::stack::{FiberStack, StackPointer};
use crate::utils::EncodedValue;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::mem::MaybeUninit;
use std::ptr;

/// Value returned from resuming a fiber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FiberResult<Yield, Return> {
    /// Value returned by a fiber suspending itself with a [`Suspend`].
    Yield(Yield),

    /// Value returned by a fiber returning from its main function.
    Return(Return),
}

impl<Yield, Return> FiberResult<Yield, Return> {
    /// Returns the `Yield` value as an `Option<Yield>`.
    pub fn into_yield(self) -> Option<Yield> {
        match self {
            FiberResult::Yield(val) => Some(val),
            FiberResult::Return(_) => None,
        }
    }

    /// Returns the `Return` value as an `Option<Return>`.
    pub fn into_return(self) -> Option<Return> {
        match self {
            FiberResult::Yield(_) => None,
            FiberResult::Return(val) => Some(val),
        }
    }
}

/// A stackful coroutine running on a dedicated [`FiberStack`].
pub struct Fiber<Input, Yield, Return, S: FiberStack> {
    /// Stack that the fiber is executing on.
    stack: S,
    /// Current stack pointer at which the fiber state is held. This is
    /// `None` when the fiber has completed execution.
    stack_ptr: Option<StackPointer>,
    /// Initial stack pointer value. Used to detect whether a fiber has ever
    /// been resumed since it was created.
    ///
    /// This works because it is impossible for a fiber to revert back to its
    /// initial stack pointer: suspending a fiber requires pushing several
    /// values to the stack.
    initial_stack_ptr: StackPointer,
    /// We want to be covariant over Yield and Return, and contravariant
    /// over Input.
    _m1: PhantomData<fn(Input) -> FiberResult<Yield, Return>>,
    /// Fiber must be !Send: its stack is only valid to resume from the
    /// thread that last suspended it.
    _m2: PhantomData<*mut ()>,
}

impl<Input, Yield, Return, S: FiberStack> Fiber<Input, Yield, Return, S> {
    /// Creates a new fiber from the provided [`FiberStack`] that runs `func`
    /// once resumed for the first time.
    pub fn with_stack<F>(stack: S, func: F) -> Self
    where
        F: FnOnce(Input, &Suspend<Input, Yield>) -> Return,
        F: 'static,
        Input: 'static,
        Yield: 'static,
        Return: 'static,
    {
        unsafe extern "C" fn fiber_func<Input, Yield, Return, F>(
            input: EncodedValue,
            parent_link: &mut StackPointer,
            obj: *mut MaybeUninit<F>,
        ) -> !
        where
            F: FnOnce(Input, &Suspend<Input, Yield>) -> Return,
        {
            // Safety: the stack layout is set up by `init_stack` below and
            // `obj` points at the function object placed there.
            unsafe {
                // `Suspend` is a `#[repr(transparent)]` wrapper around the
                // parent link on the stack.
                let suspend = &*(ptr::from_mut(parent_link).cast::<Suspend<Input, Yield>>());

                debug_assert_eq!(obj as usize % align_of::<F>(), 0);
                let func = (*obj).assume_init_read();

                let input: Input = utils::decode_val(input);

                let result = func(input, suspend);

                let mut result = ManuallyDrop::new(result);
                arch::switch_and_reset(utils::encode_val(&mut result), suspend.stack_ptr.as_ptr());
            }
        }

        // Safety: `init_stack` lays out a valid initial frame for `fiber_func`.
        unsafe {
            let (stack_ptr, _init_obj) =
                arch::init_stack(&stack, fiber_func::<Input, Yield, Return, F>, MaybeUninit::new(func));

            Self {
                stack,
                stack_ptr: Some(stack_ptr),
                initial_stack_ptr: stack_ptr,
                _m1: PhantomData,
                _m2: PhantomData,
            }
        }
    }

    /// Resumes a suspended fiber. The `Input` value is passed to the fiber
    /// and returned by [`Suspend::suspend`].
    ///
    /// # Panics
    ///
    /// Panics if the fiber has already completed.
    pub fn resume(&mut self, input: Input) -> FiberResult<Yield, Return> {
        let mut input = ManuallyDrop::new(input);

        let stack_ptr = self
            .stack_ptr
            .take()
            .expect("attempt to resume a completed fiber");

        // Safety: `stack_ptr` was produced either by `init_stack` or by a
        // previous suspend of this same fiber.
        unsafe {
            let (result, stack_ptr) =
                arch::switch_and_link(utils::encode_val(&mut input), stack_ptr, self.stack.top());

            self.stack_ptr = stack_ptr;

            if stack_ptr.is_some() {
                FiberResult::Yield(utils::decode_val(result))
            } else {
                FiberResult::Return(utils::decode_val(result))
            }
        }
    }

    /// Returns whether this fiber has been resumed at least once.
    pub fn started(&self) -> bool {
        self.stack_ptr != Some(self.initial_stack_ptr)
    }

    /// Returns whether this fiber has finished executing.
    ///
    /// A fiber that has returned from its initial function can no longer be
    /// resumed.
    pub fn done(&self) -> bool {
        self.stack_ptr.is_none()
    }

    /// Forcibly marks the fiber as having completed, even if it is currently
    /// suspended in the middle of a function.
    ///
    /// # Safety
    ///
    /// This is equivalent to a `longjmp` all the way back to the initial
    /// function of the fiber. This can only be done safely if there are no
    /// objects currently on the fiber's stack that need to run `Drop` code.
    pub unsafe fn force_reset(&mut self) {
        self.stack_ptr = None;
    }

    /// Consumes the fiber, returning its stack for recycling.
    ///
    /// # Panics
    ///
    /// Panics if the fiber has not completed.
    pub fn into_stack(self) -> S {
        assert!(self.done(), "attempt to recycle a stack still in use");
        // Safety: `ManuallyDrop` prevents `Drop::drop` from re-asserting
        // `done()` on a value we are about to move out of.
        let mut this = ManuallyDrop::new(self);
        unsafe { ptr::read(&this.stack) }
    }
}

impl<Input, Yield, Return, S: FiberStack> Drop for Fiber<Input, Yield, Return, S> {
    fn drop(&mut self) {
        assert!(self.done(), "fiber dropped while still suspended");
    }
}

/// Handle passed to a running fiber's body, used to suspend execution.
#[repr(transparent)]
pub struct Suspend<Input, Yield> {
    // Internally the `Suspend` is just the parent link on the stack, which is
    // updated every time `resume` is called.
    stack_ptr: std::cell::Cell<StackPointer>,
    marker: PhantomData<fn(Yield) -> Input>,
}

impl<Input, Yield> Suspend<Input, Yield> {
    /// Suspends the execution of the calling fiber.
    ///
    /// Yields back control to the caller of [`Fiber::resume`], passing `val`
    /// as the `Yield` value, and returns whatever `Input` the next `resume`
    /// call provides.
    pub fn suspend(&self, val: Yield) -> Input {
        // Safety: `stack_ptr` always points at a valid parent link while a
        // fiber body is executing.
        unsafe {
            let mut val = ManuallyDrop::new(val);
            let result = arch::switch_yield(utils::encode_val(&mut val), self.stack_ptr.as_ptr());

            utils::decode_val(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::DefaultFiberStack;

    #[test]
    fn it_works() {
        let stack = DefaultFiberStack::default();

        let mut fiber = Fiber::with_stack(stack, |input, suspend: &Suspend<i32, i32>| {
            assert_eq!(input, 100);

            for i in 0..5 {
                let input = suspend.suspend(i);
                assert_eq!(input, 100 + i + 1);
            }
        });

        assert_eq!(fiber.resume(100).into_yield().unwrap(), 0);
        assert_eq!(fiber.resume(101).into_yield().unwrap(), 1);
        assert_eq!(fiber.resume(102).into_yield().unwrap(), 2);
        assert_eq!(fiber.resume(103).into_yield().unwrap(), 3);
        assert_eq!(fiber.resume(104).into_yield().unwrap(), 4);

        assert!(fiber.resume(105).into_return().is_some());
        let _stack = fiber.into_stack();
    }

    #[test]
    fn recycled_stack_is_reusable() {
        let stack = DefaultFiberStack::default();

        let mut fiber = Fiber::with_stack(stack, |input: i32, _suspend: &Suspend<i32, i32>| input * 2);
        assert_eq!(fiber.resume(21).into_return(), Some(42));
        let stack = fiber.into_stack();

        let mut fiber2 = Fiber::with_stack(stack, |input: i32, _suspend: &Suspend<i32, i32>| input + 1);
        assert_eq!(fiber2.resume(41).into_return(), Some(42));
    }
}
