//! Two-slot swap buffer decoupling a single writer from a single reader.
//!
//! The writer always fills the slot that is *not* selected for reading and only then
//! flips the selector, so a reader never observes a slot that is being filled.
//!
//! ```text
//!  write(a):  [ a ][   ]  selector -> 1   read() -> a
//!  write(b):  [ a ][ b ]  selector -> 2   read() -> b
//!  write(c):  [ c ][ b ]  selector -> 1   read() -> c
//! ```
//!
//! One writer and one reader may run concurrently without further locking. Several
//! concurrent readers must be excluded by the caller.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// A two-slot swap buffer.
#[derive(Debug)]
pub struct DoubleBuffer<T> {
    slots: [RwLock<Option<T>>; 2],
    /// Slot (0 or 1) returned by `read`.
    current: AtomicUsize,
    dirty: AtomicBool,
}

impl<T> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DoubleBuffer<T> {
    /// An empty buffer; `read` returns `None` until the first `write`.
    pub fn new() -> Self {
        Self {
            slots: [RwLock::new(None), RwLock::new(None)],
            // Slot 1 is selected so the first write lands in slot 0.
            current: AtomicUsize::new(1),
            dirty: AtomicBool::new(false),
        }
    }

    /// Store `data` in the slot not selected for reading, then select it.
    pub fn write(&self, data: T) {
        let target = 1 - self.current.load(Ordering::Acquire);
        {
            let mut slot = self.slots[target]
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *slot = Some(data);
        }
        self.current.store(target, Ordering::Release);
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether a write happened since the last `read`.
    pub fn data_available(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Selector in the 1-based numbering used on the wire and in diagnostics.
    pub fn current_slot(&self) -> usize {
        self.current.load(Ordering::Acquire) + 1
    }
}

impl<T: Clone> DoubleBuffer<T> {
    /// The most recently completed write, clearing the dirty flag.
    pub fn read(&self) -> Option<T> {
        self.dirty.store(false, Ordering::Release);
        let index = self.current.load(Ordering::Acquire);
        self.slots[index]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_until_first_write() {
        let buf: DoubleBuffer<u32> = DoubleBuffer::new();
        assert!(!buf.data_available());
        assert_eq!(buf.read(), None);
    }

    #[test]
    fn write_flips_selector() {
        let buf = DoubleBuffer::new();
        assert_eq!(buf.current_slot(), 2);
        buf.write("w1");
        assert_eq!(buf.current_slot(), 1);
        buf.write("w2");
        assert_eq!(buf.current_slot(), 2);
    }

    #[test]
    fn read_returns_latest_completed_write() {
        let buf = DoubleBuffer::new();
        buf.write("W1");
        assert_eq!(buf.read(), Some("W1"));
        buf.write("W1");
        buf.write("W2");
        assert_eq!(buf.read(), Some("W2"));
        buf.write("W3");
        assert_eq!(buf.read(), Some("W3"));
    }

    #[test]
    fn read_clears_dirty_flag() {
        let buf = DoubleBuffer::new();
        buf.write(vec![1u8, 2, 3]);
        assert!(buf.data_available());
        assert_eq!(buf.read(), Some(vec![1, 2, 3]));
        assert!(!buf.data_available());
        // data stays readable
        assert_eq!(buf.read(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn reader_never_sees_torn_frames() {
        // Every frame is a vector filled with a single value; a torn read would mix values.
        let buf = Arc::new(DoubleBuffer::new());
        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    buf.write(vec![i; 256]);
                }
            })
        };

        while !writer.is_finished() {
            if let Some(frame) = buf.read() {
                assert!(frame.iter().all(|v| *v == frame[0]));
            }
        }
        writer.join().unwrap();
        assert_eq!(buf.read().unwrap()[0], 1_999);
    }
}
