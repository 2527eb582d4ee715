//! Single producer, single consumer descriptor ring
//!
//! Descriptor rings sit between application producers and the scheduler tick
//! and must not be covered by the port lock: producers enqueue from their own
//! tasks while the tick runs from the driver timer context. The ring is
//! wait-free on both sides.
//!
//! Soundness relies on role exclusivity, which the owning types provide:
//! transmit queue handles take a unique borrow for producer calls, the
//! timestamp ring has a single documented producer, and consumer methods
//! only run under the port lock.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct Ring<T: Copy, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// Free-running producer cursor.
    write: AtomicUsize,
    /// Free-running consumer cursor.
    read: AtomicUsize,
}

unsafe impl<T: Copy + Send, const N: usize> Sync for Ring<T, N> {}

impl<T: Copy, const N: usize> Ring<T, N> {
    const ASSERT_POWER_OF_TWO: () = assert!(N.is_power_of_two());

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::ASSERT_POWER_OF_TWO;

        Self {
            // MaybeUninit slots require no initialization.
            slots: unsafe { MaybeUninit::uninit().assume_init() },
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        N - self.len()
    }

    /// Producer side. Returns the item back on a full ring.
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);
        if write.wrapping_sub(read) == N {
            return Err(item);
        }

        unsafe { (*self.slots[write % N].get()).write(item) };
        self.write.store(write.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer side. Reads the front item without removing it.
    pub(crate) fn front(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        if read == write {
            return None;
        }

        Some(unsafe { (*self.slots[read % N].get()).assume_init() })
    }

    /// Consumer side.
    pub(crate) fn pop(&self) -> Option<T> {
        let item = self.front()?;
        let read = self.read.load(Ordering::Relaxed);
        self.read.store(read.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    /// Consumer side. Discards everything currently queued and returns the
    /// number of items dropped.
    pub(crate) fn drain(&self) -> usize {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);
        self.read.store(write, Ordering::Release);
        write.wrapping_sub(read)
    }
}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_and_drain() {
        let ring: Ring<u32, 4> = Ring::new();
        assert!(ring.is_empty());
        assert_eq!(ring.free(), 4);

        for i in 0..4 {
            ring.push(i).unwrap();
        }
        assert_eq!(ring.push(99), Err(99));
        assert_eq!(ring.len(), 4);

        assert_eq!(ring.front(), Some(0));
        assert_eq!(ring.pop(), Some(0));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.drain(), 2);
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_cursor_wrap() {
        let ring: Ring<u32, 2> = Ring::new();
        for i in 0..1000 {
            ring.push(i).unwrap();
            assert_eq!(ring.pop(), Some(i));
        }
        assert!(ring.is_empty());
    }
}
