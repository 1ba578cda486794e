// The name table, the FIFO eviction queue, the store-wide coordinator,
// capacity accounting, and the eviction algorithm that runs inline inside
// create and write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::config::Config;
use crate::entry::{FileEntry, LockOutcome};
use crate::error::{CoreError, CoreResult};
use crate::handler::{EvictedFile, SendBackHandler, WaitHandler};
use crate::queue::FifoQueue;
use crate::ClientId;

// A point-in-time snapshot of the Store's counters and statistics.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub max_file_count: usize,
    pub max_byte_size: usize,
    pub file_count: usize,
    pub byte_size: usize,
    pub peak_file_count: usize,
    pub peak_byte_size: usize,
    pub evictions_file_cap: u64,
    pub evictions_byte_cap: u64,
    pub cleanup_count: u64,
    pub evicted_files: Vec<String>,
}

impl Stats {
    pub fn eviction_count(&self) -> u64 { self.evictions_file_cap + self.evictions_byte_cap }
}

#[derive(Default)]
struct StatsBody {
    evictions_file_cap: u64,
    evictions_byte_cap: u64,
    cleanup_count: u64,
    peak_file_count: usize,
    peak_byte_size: usize,
    evicted_files: Vec<String>,
}

// Which cap triggered this eviction pass, and how much headroom is needed.
enum EvictionMode {
    // Make room for one more file.
    Create,
    // Make room for the given number of additional bytes.
    Write(usize),
}

struct Inner {
    table: HashMap<String, Arc<FileEntry>>,
    eviction_queue: FifoQueue<String>,
}

// The name table, FIFO eviction queue, and coordinator live behind one
// parking_lot::RwLock, which is writer-preferring and supports an atomic
// writer-to-reader downgrade.
//
// file_count, byte_size, and peak_byte_size live outside that lock as
// atomics, since write's post-eviction downgraded phase only holds a
// reader guard on table by the time it needs to record the new byte total.
pub struct Store {
    inner: RwLock<Inner>,
    file_count: AtomicUsize,
    byte_size: AtomicUsize,
    stats: Mutex<StatsBody>,
    max_file_count: usize,
    max_byte_size: usize,
}

impl Store {
    pub fn new(config: Config) -> Store {
        Store {
            inner: RwLock::new(Inner {
                table: HashMap::with_capacity(config.file_table_buckets),
                eviction_queue: FifoQueue::new(),
            }),
            file_count: AtomicUsize::new(0),
            byte_size: AtomicUsize::new(0),
            stats: Mutex::new(StatsBody::default()),
            max_file_count: config.max_file_count,
            max_byte_size: config.max_byte_size,
        }
    }

    // A read-only snapshot of the counters and statistics. Never mutates.
    pub fn stats(&self) -> Stats {
        let _guard = self.inner.read();
        let body = self.stats.lock();
        Stats {
            max_file_count: self.max_file_count,
            max_byte_size: self.max_byte_size,
            file_count: self.file_count.load(Ordering::Acquire),
            byte_size: self.byte_size.load(Ordering::Acquire),
            peak_file_count: body.peak_file_count,
            peak_byte_size: body.peak_byte_size,
            evictions_file_cap: body.evictions_file_cap,
            evictions_byte_cap: body.evictions_byte_cap,
            cleanup_count: body.cleanup_count,
            evicted_files: body.evicted_files.clone(),
        }
    }

    // Builds the entry before taking the writer lock; the lock is only
    // needed to make the insertion visible, not to run the allocation.
    pub fn create(
        &self,
        name: &str,
        c: ClientId,
        with_lock: bool,
        wait_handler: &mut WaitHandler,
    ) -> CoreResult<()> {
        let entry = Arc::new(FileEntry::new(c, with_lock));
        let mut inner = self.inner.write();

        if inner.table.contains_key(name) {
            return Err(CoreError::AlreadyExists(name.to_owned()));
        }

        if self.file_count.load(Ordering::Acquire) >= self.max_file_count {
            self.run_eviction(&mut inner, EvictionMode::Create, name, c, wait_handler, None)?;
        }

        inner
            .eviction_queue
            .push(name.to_owned())
            .expect("eviction queue is never closed");
        inner.table.insert(name.to_owned(), entry);
        let file_count = self.file_count.fetch_add(1, Ordering::AcqRel) + 1;
        let mut body = self.stats.lock();
        body.peak_file_count = body.peak_file_count.max(file_count);
        log::debug!("create {name:?} by client {c}: resident files now {file_count}");
        Ok(())
    }

    pub fn open(&self, name: &str, c: ClientId, with_lock: bool) -> CoreResult<LockOutcome> {
        let inner = self.inner.read();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        entry.open(c, with_lock)
    }

    pub fn close(&self, name: &str, c: ClientId) -> CoreResult<()> {
        let inner = self.inner.read();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        entry.close(c)
    }

    pub fn read(&self, name: &str, c: ClientId) -> CoreResult<Vec<u8>> {
        let inner = self.inner.read();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        entry.read(c, name, false)
    }

    // n <= 0 means "every resident file". Table order is undefined by
    // HashMap, so this derives insertion order from the eviction queue,
    // which is exactly that order by construction.
    pub fn read_n(&self, c: ClientId, n: i64) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.read();
        let order = inner.eviction_queue.snapshot();
        let limit = if n <= 0 { order.len() } else { (n as usize).min(order.len()) };
        let mut out = Vec::with_capacity(limit);
        for name in order.into_iter().take(limit) {
            if let Some(entry) = inner.table.get(&name) {
                if let Ok(bytes) = entry.read(c, &name, true) {
                    out.push((name, bytes));
                }
            }
        }
        out
    }

    // The only operation that acquires the coordinator in writer mode,
    // runs eviction, and then downgrades to reader mode for the actual
    // payload mutation.
    pub fn write(
        &self,
        name: &str,
        buf: &[u8],
        c: ClientId,
        whole: bool,
        wait_handler: &mut WaitHandler,
        send_back: &mut SendBackHandler,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();

        if !inner.table.contains_key(name) {
            return Err(CoreError::NotFound(name.to_owned()));
        }
        if buf.len() > self.max_byte_size {
            return Err(CoreError::TooLarge { name: name.to_owned(), len: buf.len() });
        }

        let projected = self.byte_size.load(Ordering::Acquire) + buf.len();
        if projected > self.max_byte_size {
            self.run_eviction(
                &mut inner,
                EvictionMode::Write(buf.len()),
                name,
                c,
                wait_handler,
                Some(send_back),
            )?;
        }

        let reader = RwLockWriteGuard::downgrade(inner);

        // Eviction may have removed the very file we're about to write to.
        let entry = reader.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        entry.write(c, name, buf, whole)?;

        let byte_size = self.byte_size.fetch_add(buf.len(), Ordering::AcqRel) + buf.len();
        let mut body = self.stats.lock();
        body.peak_byte_size = body.peak_byte_size.max(byte_size);
        Ok(())
    }

    pub fn lock(&self, name: &str, c: ClientId) -> CoreResult<LockOutcome> {
        let inner = self.inner.read();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        Ok(entry.lock(c))
    }

    pub fn unlock(&self, name: &str, c: ClientId) -> CoreResult<Option<ClientId>> {
        let inner = self.inner.read();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?;
        entry.unlock(c)
    }

    // Extracts waiters and notifies them before the entry is dropped, and
    // surgically removes name from the eviction queue via the cursor
    // protocol rather than rebuilding the queue.
    pub fn remove(&self, name: &str, c: ClientId, wait_handler: &mut WaitHandler) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let entry = inner.table.get(name).ok_or_else(|| CoreError::NotFound(name.to_owned()))?.clone();

        if !entry.owner_is(c) {
            return Err(CoreError::Permission(crate::error::PermissionKind::NotOwner));
        }

        let wait_q = entry.extract_waiters();
        wait_handler(wait_q.snapshot());

        let len = entry.len();
        inner.table.remove(name);
        self.byte_size.fetch_sub(len, Ordering::AcqRel);
        self.file_count.fetch_sub(1, Ordering::AcqRel);

        let mut cursor = inner.eviction_queue.iter();
        while let Some(n) = cursor.next() {
            if n == name {
                cursor.remove_current();
                break;
            }
        }
        log::debug!("removed {name:?} by client {c}");
        Ok(())
    }

    // Sweeps every resident entry, releasing c's lock or wait-queue
    // membership, and returns every client that was granted a lock as a
    // result (so the dispatcher can send delayed replies).
    pub fn client_cleanup(&self, c: ClientId) -> Vec<ClientId> {
        let inner = self.inner.write();
        let mut new_owners = Vec::new();
        for entry in inner.table.values() {
            if let Some(new_owner) = entry.remove_client(c) {
                new_owners.push(new_owner);
            }
        }
        self.stats.lock().cleanup_count += 1;
        log::debug!("cleanup for client {c}: {} newly granted owner(s)", new_owners.len());
        new_owners
    }

    // Tears down every resident entry under writer mode. Store's Drop
    // calls this too, so explicit invocation is only needed where
    // deterministic, pre-Drop teardown matters (e.g. tests asserting on
    // order of operations).
    pub fn destroy(&self) {
        let mut inner = self.inner.write();
        inner.table.clear();
        inner.eviction_queue.close();
        self.file_count.store(0, Ordering::Release);
        self.byte_size.store(0, Ordering::Release);
    }

    // Runs with the coordinator already held in writer mode; loops until
    // the triggering cap is satisfied or the queue is exhausted.
    fn run_eviction(
        &self,
        inner: &mut Inner,
        mode: EvictionMode,
        target_name: &str,
        triggering_client: ClientId,
        wait_handler: &mut WaitHandler,
        mut send_back: Option<&mut SendBackHandler>,
    ) -> CoreResult<()> {
        loop {
            let victim_name = inner.eviction_queue.pop_non_blocking().ok_or_else(|| {
                CoreError::CapacityExhausted { name: target_name.to_owned() }
            })?;

            let entry = inner.table.get(&victim_name).cloned().ok_or_else(|| {
                CoreError::NotRecoverable(format!(
                    "eviction queue named {victim_name:?}, which is not a live table key"
                ))
            })?;

            let wait_q = entry.extract_waiters();

            if let Some(cb) = send_back.as_deref_mut() {
                cb(EvictedFile {
                    name: victim_name.clone(),
                    payload: entry.payload_snapshot(),
                    dirty: entry.is_dirty(),
                    triggering_client,
                });
            }

            let evicted_len = entry.len();
            inner.table.remove(&victim_name);
            drop(entry);
            self.byte_size.fetch_sub(evicted_len, Ordering::AcqRel);
            let file_count = self.file_count.fetch_sub(1, Ordering::AcqRel) - 1;

            wait_handler(wait_q.snapshot());

            {
                let mut body = self.stats.lock();
                match mode {
                    EvictionMode::Create => body.evictions_file_cap += 1,
                    EvictionMode::Write(_) => body.evictions_byte_cap += 1,
                }
                body.evicted_files.push(victim_name.clone());
            }
            log::info!("evicted {victim_name:?} to make room for {target_name:?}");

            let satisfied = match mode {
                EvictionMode::Create => file_count < self.max_file_count,
                EvictionMode::Write(size) => self.byte_size.load(Ordering::Acquire) + size <= self.max_byte_size,
            };
            if satisfied {
                return Ok(());
            }
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{no_op_send_back_handler, no_op_wait_handler};

    fn store(max_file_count: usize, max_byte_size: usize) -> Store {
        Store::new(Config::new(max_file_count, max_byte_size))
    }

    #[test]
    fn create_write_read_round_trip() {
        let s = store(6, 512);
        s.create("/a/file1", 1, false, &mut no_op_wait_handler).unwrap();
        s.write(
            "/a/file1",
            b"Servator1Servator1",
            1,
            false,
            &mut no_op_wait_handler,
            &mut no_op_send_back_handler,
        )
        .unwrap();
        let bytes = s.read("/a/file1", 1).unwrap();
        assert_eq!(bytes, b"Servator1Servator1");
        assert_eq!(bytes.len(), 18);
        s.close("/a/file1", 1).unwrap();
    }

    #[test]
    fn create_duplicate_name_fails() {
        let s = store(6, 512);
        s.create("/a/f", 1, false, &mut no_op_wait_handler).unwrap();
        assert!(matches!(
            s.create("/a/f", 2, false, &mut no_op_wait_handler),
            Err(CoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn file_count_eviction_oldest_first() {
        let s = store(6, 1 << 20);
        for name in ["/b/file6", "/b/file7", "/b/file8", "/b/file9"] {
            s.create(name, 1, false, &mut no_op_wait_handler).unwrap();
        }
        for name in ["/b/file10", "/b/file11", "/b/file12"] {
            s.create(name, 1, false, &mut no_op_wait_handler).unwrap();
        }
        let stats = s.stats();
        assert_eq!(stats.file_count, 6);
        assert_eq!(stats.evictions_file_cap, 1);
        assert!(s.open("/b/file6", 1, false).is_err(), "oldest entry should have been evicted");
        assert!(s.open("/b/file12", 1, false).is_ok());
    }

    #[test]
    fn byte_cap_eviction_sends_back_dirty_victim() {
        let s = store(100, 300);
        s.create("/c/a", 1, false, &mut no_op_wait_handler).unwrap();
        s.create("/c/b", 1, false, &mut no_op_wait_handler).unwrap();
        s.write("/c/a", &[1u8; 135], 1, false, &mut no_op_wait_handler, &mut no_op_send_back_handler).unwrap();
        s.write("/c/b", &[2u8; 135], 1, false, &mut no_op_wait_handler, &mut no_op_send_back_handler).unwrap();

        let mut sent_back = Vec::new();
        let mut send_back = |ev: EvictedFile| sent_back.push(ev);
        let result = s.write("/c/a", &[3u8; 100], 1, false, &mut no_op_wait_handler, &mut send_back);

        assert_eq!(sent_back.len(), 1);
        assert_eq!(sent_back[0].name, "/c/a");
        assert_eq!(sent_back[0].payload.len(), 135);
        assert!(sent_back[0].dirty);
        // /c/a was the queue head and the write's own target: the re-lookup
        // in step 6 must surface not-found rather than writing a phantom.
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        assert_eq!(s.stats().evictions_byte_cap, 1);
    }

    #[test]
    fn lock_contention_plus_disconnect_then_unlock() {
        let s = store(10, 1024);
        s.create("/d/f", 1, true, &mut no_op_wait_handler).unwrap();
        s.write("/d/f", &[0u8; 82], 1, true, &mut no_op_wait_handler, &mut no_op_send_back_handler).unwrap();
        s.unlock("/d/f", 1).unwrap();

        assert_eq!(s.open("/d/f", 2, true).unwrap(), LockOutcome::Granted);
        assert_eq!(s.open("/d/f", 3, true).unwrap(), LockOutcome::Blocked);
        assert_eq!(s.open("/d/f", 4, true).unwrap(), LockOutcome::Blocked);

        let granted = s.client_cleanup(3);
        assert!(granted.is_empty(), "disconnecting a waiter grants no one");

        let new_owner = s.unlock("/d/f", 2).unwrap();
        assert_eq!(new_owner, Some(4));
        assert!(s.read("/d/f", 4).is_ok());
    }

    #[test]
    fn remove_notifies_waiters() {
        let s = store(10, 1024);
        s.create("/e/f", 1, true, &mut no_op_wait_handler).unwrap();
        assert_eq!(s.open("/e/f", 2, true).unwrap(), LockOutcome::Blocked);
        assert_eq!(s.open("/e/f", 3, true).unwrap(), LockOutcome::Blocked);

        let mut failed = Vec::new();
        let mut wait_handler = |waiters: Vec<u64>| failed.extend(waiters);
        s.remove("/e/f", 1, &mut wait_handler).unwrap();

        failed.sort_unstable();
        assert_eq!(failed, vec![2, 3]);
        assert!(matches!(s.open("/e/f", 2, false), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn read_n_returns_every_file_in_insertion_order() {
        let s = store(10, 1024);
        for (name, byte) in [("/g/1", 1u8), ("/g/2", 2u8), ("/g/3", 3u8)] {
            s.create(name, 1, false, &mut no_op_wait_handler).unwrap();
            s.write(name, &[byte; 4], 1, false, &mut no_op_wait_handler, &mut no_op_send_back_handler).unwrap();
        }
        // client 9 never opened any of these; readN must still return them.
        let all = s.read_n(9, 0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].0, "/g/1");
        assert_eq!(all[1].0, "/g/2");
        assert_eq!(all[2].0, "/g/3");
        assert_eq!(all[2].1, vec![3u8; 4]);
    }

    #[test]
    fn write_over_byte_cap_is_rejected_outright() {
        let s = store(10, 100);
        s.create("/h/f", 1, false, &mut no_op_wait_handler).unwrap();
        let result = s.write(
            "/h/f",
            &[0u8; 200],
            1,
            false,
            &mut no_op_wait_handler,
            &mut no_op_send_back_handler,
        );
        assert!(matches!(result, Err(CoreError::TooLarge { .. })));
    }
}
