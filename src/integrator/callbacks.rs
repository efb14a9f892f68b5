//! Render progress, write and cancellation hooks.

use super::render_buffers::RenderBuffersSnapshot;

/// Receiver of render events.
///
/// All methods are called with the orchestrator's completion lock held, so
/// calls never overlap and progress sample counts arrive in order.
pub trait RenderCallbacks: Send + Sync {
    /// Polled after every completed tile; `true` stops issuing new tiles.
    fn poll_cancel(&self) -> bool {
        false
    }

    /// Skip building snapshots for progress updates when `false`.
    fn wants_progress(&self) -> bool {
        false
    }

    /// Throttled intermediate result.
    fn on_progress(&self, _snapshot: &RenderBuffersSnapshot, _samples: u32) {}

    fn wants_write(&self) -> bool {
        false
    }

    /// Final result, called once per render.
    fn on_write(&self, _snapshot: &RenderBuffersSnapshot, _samples: u32) {}
}

/// No cancellation, no progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCallbacks;

impl RenderCallbacks for NoCallbacks {}

pub type CancelCallback = Box<dyn Fn() -> bool + Send + Sync>;
pub type BufferCallback = Box<dyn Fn(&RenderBuffersSnapshot, u32) + Send + Sync>;

/// Callbacks built from optional closures.
#[derive(Default)]
pub struct CallbackSet {
    pub get_cancel_cb: Option<CancelCallback>,
    pub update_cb: Option<BufferCallback>,
    pub write_cb: Option<BufferCallback>,
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("get_cancel_cb", &self.get_cancel_cb.is_some())
            .field("update_cb", &self.update_cb.is_some())
            .field("write_cb", &self.write_cb.is_some())
            .finish()
    }
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.get_cancel_cb = Some(Box::new(f));
        self
    }

    pub fn with_update(mut self, f: impl Fn(&RenderBuffersSnapshot, u32) + Send + Sync + 'static) -> Self {
        self.update_cb = Some(Box::new(f));
        self
    }

    pub fn with_write(mut self, f: impl Fn(&RenderBuffersSnapshot, u32) + Send + Sync + 'static) -> Self {
        self.write_cb = Some(Box::new(f));
        self
    }
}

impl RenderCallbacks for CallbackSet {
    fn poll_cancel(&self) -> bool {
        self.get_cancel_cb.as_ref().is_some_and(|cb| cb())
    }

    fn wants_progress(&self) -> bool {
        self.update_cb.is_some()
    }

    fn on_progress(&self, snapshot: &RenderBuffersSnapshot, samples: u32) {
        if let Some(cb) = &self.update_cb {
            cb(snapshot, samples);
        }
    }

    fn wants_write(&self) -> bool {
        self.write_cb.is_some()
    }

    fn on_write(&self, snapshot: &RenderBuffersSnapshot, samples: u32) {
        if let Some(cb) = &self.write_cb {
            cb(snapshot, samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_empty_set_is_inert() {
        let set = CallbackSet::new();
        assert!(!set.poll_cancel());
        assert!(!set.wants_progress());
        assert!(!set.wants_write());
    }

    #[test]
    fn test_cancel_closure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let set = CallbackSet::new().with_cancel(move || counter.fetch_add(1, Ordering::Relaxed) >= 1);
        assert!(!set.poll_cancel());
        assert!(set.poll_cancel());
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
