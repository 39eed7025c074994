//! Marks the threads that run listener accept loops.
//!
//! Blocking work on those threads stalls every connection of the listener, so
//! database helpers consult [`is_reactor_thread`] before running queries.

use std::cell::Cell;

thread_local! {
    static REACTOR: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread runs an accept loop.
#[must_use]
pub fn is_reactor_thread() -> bool {
    REACTOR.with(Cell::get)
}

pub(crate) fn mark_reactor_thread() {
    REACTOR.with(|flag| flag.set(true));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn marking_is_thread_local() {
        let marked = thread::spawn(|| {
            mark_reactor_thread();
            is_reactor_thread()
        })
        .join()
        .expect("join marked thread");

        assert!(marked);
        assert!(!is_reactor_thread());
    }
}
