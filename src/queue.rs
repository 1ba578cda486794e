// A bounded-by-nothing FIFO of opaque values with blocking pop, non-blocking
// pop, a non-destructive cursor for surgical removal, and closeable semantics.
//
// Used both as the Store's eviction queue (of file names) and as a FileEntry's
// waiter queue (of client identifiers), one primitive backs both FIFOs.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex, MutexGuard};

// Result of a blocking pop: either a value, or proof the queue is closed and
// drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopBlocking<T> {
    Value(T),
    ClosedAndEmpty,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct FifoQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self { Self::new() }
}

impl<T> FifoQueue<T> {
    pub fn new() -> FifoQueue<T> {
        FifoQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    // Appends v. Fails if the queue has been closed.
    pub fn push(&self, v: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(v);
        }
        inner.items.push_back(v);
        self.not_empty.notify_one();
        Ok(())
    }

    // Removes the head, blocking while empty and open. Returns
    // ClosedAndEmpty once the queue is closed and has been drained.
    pub fn pop_blocking(&self) -> PopBlocking<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(v) = inner.items.pop_front() {
                return PopBlocking::Value(v);
            }
            if inner.closed {
                return PopBlocking::ClosedAndEmpty;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    // Removes the head without blocking. None covers both "empty" and
    // "empty and closed"; callers that care about the distinction use
    // pop_blocking or check is_closed.
    pub fn pop_non_blocking(&self) -> Option<T> { self.inner.lock().items.pop_front() }

    pub fn len(&self) -> usize { self.inner.lock().items.len() }

    pub fn is_empty(&self) -> bool { self.inner.lock().items.is_empty() }

    // Toggles push acceptance. Closing also wakes every thread blocked in
    // pop_blocking, which will observe closed once the queue drains.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
    }

    pub fn open(&self) { self.inner.lock().closed = false; }

    pub fn is_closed(&self) -> bool { self.inner.lock().closed }

    // Acquires the queue's internal lock for the duration of the returned
    // cursor, which excludes all push/pop calls until it is dropped.
    pub fn iter(&self) -> Cursor<'_, T> {
        Cursor {
            guard: self.inner.lock(),
            index: 0,
            yielded: false,
        }
    }
}

impl<T: Clone> FifoQueue<T> {
    // Clones every element in order without consuming them. Built on the same
    // cursor protocol as iter, not a second synchronization primitive.
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::new();
        let mut cursor = self.iter();
        while let Some(v) = cursor.next() {
            out.push(v.clone());
        }
        out
    }
}

// A non-destructive, in-order cursor over a FifoQueue. Holds the queue's
// lock for its entire lifetime, so other push/pop calls block until it
// is dropped.
pub struct Cursor<'q, T> {
    guard: MutexGuard<'q, Inner<T>>,
    index: usize,
    yielded: bool,
}

impl<'q, T> Cursor<'q, T> {
    // Advances to, and returns, the next element. Subsequent remove_current
    // calls act on the element this call returned.
    pub fn next(&mut self) -> Option<&T> {
        if self.yielded {
            self.index += 1;
        }
        self.yielded = true;
        self.guard.items.get(self.index)
    }

    // Removes the element most recently yielded by next, shifting the
    // cursor back so a following next call yields whatever took its place.
    pub fn remove_current(&mut self) -> Option<T> {
        if !self.yielded || self.index >= self.guard.items.len() {
            return None;
        }
        let v = self.guard.items.remove(self.index);
        self.index = self.index.wrapping_sub(1);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order() {
        let q = FifoQueue::new();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop_non_blocking(), Some(1));
        assert_eq!(q.pop_non_blocking(), Some(2));
        assert_eq!(q.pop_non_blocking(), Some(3));
        assert_eq!(q.pop_non_blocking(), None);
    }

    #[test]
    fn close_wakes_blocking_pop() {
        let q: Arc<FifoQueue<i32>> = Arc::new(FifoQueue::new());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop_blocking());
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), PopBlocking::ClosedAndEmpty);
    }

    #[test]
    fn push_after_close_fails() {
        let q = FifoQueue::new();
        q.close();
        assert_eq!(q.push(1), Err(1));
    }

    #[test]
    fn cursor_remove_current_surgically_removes() {
        let q = FifoQueue::new();
        for v in 1..=5 {
            q.push(v).unwrap();
        }
        {
            let mut cursor = q.iter();
            while let Some(v) = cursor.next() {
                if *v == 3 {
                    cursor.remove_current();
                }
            }
        }
        assert_eq!(q.snapshot(), vec![1, 2, 4, 5]);
    }

    #[test]
    fn snapshot_is_non_destructive() {
        let q = FifoQueue::new();
        q.push("a").unwrap();
        q.push("b").unwrap();
        assert_eq!(q.snapshot(), vec!["a", "b"]);
        assert_eq!(q.snapshot(), vec!["a", "b"]);
    }
}
