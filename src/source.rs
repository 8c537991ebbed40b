//! Frame sources and update bindings.
//!
//! A frame source is anything exposing a monotonically increasing counter and the data
//! that belongs to it, typically a shared-memory segment written by another process.
//! The counter is the single source of truth for "new data present": the update thread
//! never compares data and never locks the source.
//!
//! An [`UpdateBinding`] pairs a source with the [`DoubleBuffer`] it feeds.

use crate::double_buffer::DoubleBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Something the update thread can poll for new data.
pub trait FrameSource: Send + 'static {
    /// Value type copied into the sink.
    type Data: Clone + Send + Sync + 'static;

    /// Monotonically increasing write counter.
    fn counter(&self) -> u64;

    /// The data currently held by the source.
    fn data(&self) -> Self::Data;
}

impl<S: FrameSource + Sync> FrameSource for Arc<S> {
    type Data = S::Data;

    fn counter(&self) -> u64 {
        (**self).counter()
    }

    fn data(&self) -> Self::Data {
        (**self).data()
    }
}

/// In-process frame source: each `publish` stores a value and bumps the counter.
///
/// Stands in for a shared-memory segment in tests and demos.
#[derive(Debug)]
pub struct CounterSource<T> {
    counter: AtomicU64,
    data: RwLock<T>,
}

impl<T: Clone + Send + Sync + 'static> CounterSource<T> {
    /// A source holding `initial`, counter at 0.
    pub fn new(initial: T) -> Self {
        Self {
            counter: AtomicU64::new(0),
            data: RwLock::new(initial),
        }
    }

    /// Store `value` and advance the counter by one. Returns the new counter.
    pub fn publish(&self, value: T) -> u64 {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = value;
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl<T: Clone + Send + Sync + 'static> FrameSource for CounterSource<T> {
    type Data = T;

    fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn data(&self) -> T {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Type-erased binding driven by the update thread.
pub trait PollBinding: Send {
    /// Record the current counter and push the current data unconditionally.
    fn prime(&mut self);

    /// Push new data if the counter advanced. Returns whether it did.
    fn poll(&mut self) -> bool;

    /// Last counter value seen.
    fn last_counter(&self) -> u64;
}

/// (last-observed counter, source, sink)
pub struct UpdateBinding<S: FrameSource> {
    last_counter: u64,
    source: S,
    sink: Arc<DoubleBuffer<S::Data>>,
}

impl<S: FrameSource> UpdateBinding<S> {
    /// Bind `source` to `sink`; nothing is copied until the binding is primed.
    pub fn new(source: S, sink: Arc<DoubleBuffer<S::Data>>) -> Self {
        Self {
            last_counter: 0,
            source,
            sink,
        }
    }
}

impl<S: FrameSource> PollBinding for UpdateBinding<S> {
    fn prime(&mut self) {
        self.last_counter = self.source.counter();
        self.sink.write(self.source.data());
    }

    fn poll(&mut self) -> bool {
        let counter = self.source.counter();
        if counter > self.last_counter {
            self.last_counter = counter;
            self.sink.write(self.source.data());
            true
        } else {
            false
        }
    }

    fn last_counter(&self) -> u64 {
        self.last_counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_advances_counter() {
        let source = CounterSource::new(0.0f64);
        assert_eq!(source.counter(), 0);
        assert_eq!(source.publish(1.5), 1);
        assert_eq!(source.publish(2.5), 2);
        assert_eq!(source.data(), 2.5);
    }

    #[test]
    fn binding_only_writes_on_counter_advance() {
        let source = Arc::new(CounterSource::new(String::from("boot")));
        let sink = Arc::new(DoubleBuffer::new());
        let mut binding = UpdateBinding::new(Arc::clone(&source), Arc::clone(&sink));

        binding.prime();
        assert_eq!(sink.read().as_deref(), Some("boot"));

        assert!(!binding.poll());
        assert!(!sink.data_available());

        source.publish("frame-1".into());
        source.publish("frame-2".into());
        assert!(binding.poll());
        assert_eq!(binding.last_counter(), 2);
        assert_eq!(sink.read().as_deref(), Some("frame-2"));
        assert!(!binding.poll());
    }
}
