use std::sync::Arc;

use arc_swap::ArcSwapOption;

/// Lock-free single-value mailbox between a producer and a consumer thread.
///
/// Only the most recent value is kept. A value that is overwritten before the
/// consumer takes it is dropped, which is how a producer running faster than
/// its consumer sheds load without blocking.
#[derive(Debug)]
pub struct Slot<T> {
    value: ArcSwapOption<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            value: ArcSwapOption::empty(),
        }
    }

    /// Publishes `val`. Returns `true` when an unconsumed value was replaced.
    pub fn send(&self, val: T) -> bool {
        self.value.swap(Some(Arc::new(val))).is_some()
    }

    /// Takes the value if present, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<T>> {
        self.value.swap(None)
    }

    /// Returns the current value without consuming it.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.value.load_full()
    }

    pub fn has_value(&self) -> bool {
        self.value.load().is_some()
    }

    pub fn clear(&self) {
        self.value.store(None);
    }
}
