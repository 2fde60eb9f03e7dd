//! Execution context of the calling thread.
//!
//! Code that runs on behalf of a driver or an interrupt handler marks itself
//! with [`enter`]; the checked API refuses blocking calls from anything other
//! than a plain application thread.

use core::cell::Cell;
use core::marker::PhantomData;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecContext {
    /// An application thread, allowed to suspend.
    #[default]
    Thread,
    /// Interrupt or driver service context; must never suspend.
    Interrupt,
    /// Stack initialization, before application threads run.
    Initialize,
}

thread_local! {
    static CURRENT: Cell<ExecContext> = const { Cell::new(ExecContext::Thread) };
}

/// Context of the calling thread.
pub fn current() -> ExecContext {
    CURRENT.with(Cell::get)
}

/// Run the calling thread as `context` until the guard is dropped.
pub fn enter(context: ExecContext) -> ContextGuard {
    let previous = CURRENT.with(|current| current.replace(context));
    ContextGuard {
        previous,
        _nosend: PhantomData,
    }
}

/// Restores the previous context on drop.
///
/// Bound to the thread that created it.
#[must_use]
pub struct ContextGuard {
    previous: ExecContext,
    _nosend: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.previous));
    }
}
