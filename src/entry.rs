// Per-file state and the primitives the Store delegates to.
//
// Every public method here takes the entry's own lock for its entire body;
// none of it is visible to, or mutable from, outside this module. read
// reads like a pure accessor, but it also clears the caller's WRITE_ELIGIBLE
// bit, so every operation takes the entry lock in write mode.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult, PermissionKind};
use crate::flags::{ClientFlags, GlobalFlags};
use crate::queue::FifoQueue;
use crate::ClientId;

// Outcome of a lock (or open(..., with_lock = true)) attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    // The caller now holds the lock.
    Granted,
    // The caller was queued; the dispatcher must suppress its reply until a
    // later unlock/eviction/remove resolves it.
    Blocked,
}

struct Inner {
    payload: Vec<u8>,
    global: GlobalFlags,
    per_client: HashMap<ClientId, ClientFlags>,
    waiters: FifoQueue<ClientId>,
}

pub struct FileEntry {
    inner: RwLock<Inner>,
}

impl FileEntry {
    // Constructs a fresh entry with OPEN (and OWNER, if with_lock) set for
    // creator. DIRTY starts clear: a freshly created file has nothing to
    // ship back to its owner if evicted before any write.
    pub fn new(creator: ClientId, with_lock: bool) -> FileEntry {
        let mut flags = ClientFlags::OPEN | ClientFlags::WRITE_ELIGIBLE;
        let mut global = GlobalFlags::empty();
        if with_lock {
            flags |= ClientFlags::OWNER;
            global |= GlobalFlags::LOCKED;
        }
        let mut per_client = HashMap::new();
        per_client.insert(creator, flags);
        FileEntry {
            inner: RwLock::new(Inner {
                payload: Vec::new(),
                global,
                per_client,
                waiters: FifoQueue::new(),
            }),
        }
    }

    pub fn len(&self) -> usize { self.inner.read().payload.len() }

    pub fn is_dirty(&self) -> bool { self.inner.read().global.contains(GlobalFlags::DIRTY) }

    // Whether c currently holds this entry's lock.
    pub fn owner_is(&self, c: ClientId) -> bool {
        self.inner
            .read()
            .per_client
            .get(&c)
            .map(|f| f.contains(ClientFlags::OWNER))
            .unwrap_or(false)
    }

    // Clones the payload out, for the eviction/read paths that need an owned
    // copy to hand to a callback after the entry's lock (and, for eviction,
    // the entry itself) has been released.
    pub fn payload_snapshot(&self) -> Vec<u8> { self.inner.read().payload.clone() }

    pub fn open(&self, c: ClientId, with_lock: bool) -> CoreResult<LockOutcome> {
        {
            let mut inner = self.inner.write();
            let entry = inner.per_client.entry(c).or_default();
            *entry |= ClientFlags::OPEN;
            *entry -= ClientFlags::WRITE_ELIGIBLE;
        }
        if !with_lock {
            return Ok(LockOutcome::Granted);
        }
        let outcome = self.lock(c);
        Ok(outcome)
    }

    pub fn close(&self, c: ClientId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.per_client.get_mut(&c) {
            *entry -= ClientFlags::OPEN | ClientFlags::WRITE_ELIGIBLE;
        }
        Ok(())
    }

    // ignore_open is set by read_n, which is allowed to read files the
    // caller never opened.
    pub fn read(&self, c: ClientId, name: &str, ignore_open: bool) -> CoreResult<Vec<u8>> {
        let mut inner = self.inner.write();
        let flags = inner.per_client.get(&c).copied().unwrap_or_default();
        if !ignore_open && !flags.contains(ClientFlags::OPEN) {
            return Err(CoreError::NotOpen { name: name.to_owned(), client: c });
        }
        if !ignore_open && inner.global.contains(GlobalFlags::LOCKED) && !flags.contains(ClientFlags::OWNER) {
            return Err(CoreError::Busy { name: name.to_owned() });
        }
        let bytes = inner.payload.clone();
        if let Some(entry) = inner.per_client.get_mut(&c) {
            *entry -= ClientFlags::WRITE_ELIGIBLE;
        }
        Ok(bytes)
    }

    pub fn write(&self, c: ClientId, name: &str, buf: &[u8], whole: bool) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let flags = inner.per_client.get(&c).copied().unwrap_or_default();
        if !flags.contains(ClientFlags::OPEN) {
            return Err(CoreError::NotOpen { name: name.to_owned(), client: c });
        }
        if inner.global.contains(GlobalFlags::LOCKED) && !flags.contains(ClientFlags::OWNER) {
            return Err(CoreError::Busy { name: name.to_owned() });
        }
        if whole {
            if !flags.contains(ClientFlags::WRITE_ELIGIBLE) {
                return Err(CoreError::Permission(PermissionKind::NotWriteEligible));
            }
            inner.payload.clear();
            inner.payload.extend_from_slice(buf);
        }
        else {
            inner.payload.extend_from_slice(buf);
        }
        inner.global |= GlobalFlags::DIRTY;
        if let Some(entry) = inner.per_client.get_mut(&c) {
            *entry -= ClientFlags::WRITE_ELIGIBLE;
        }
        Ok(())
    }

    // Grants the lock immediately if it is free or already held by c;
    // otherwise queues c and reports Blocked. Never fails: a client may
    // ask for a lock on a file it has not even opened, and the only thing
    // that can make it wait is contention from another client.
    pub fn lock(&self, c: ClientId) -> LockOutcome {
        let mut inner = self.inner.write();
        let already_owner = inner
            .per_client
            .get(&c)
            .map(|f| f.contains(ClientFlags::OWNER))
            .unwrap_or(false);
        if !inner.global.contains(GlobalFlags::LOCKED) || already_owner {
            inner.global |= GlobalFlags::LOCKED;
            let entry = inner.per_client.entry(c).or_default();
            *entry |= ClientFlags::OWNER;
            *entry -= ClientFlags::WRITE_ELIGIBLE;
            return LockOutcome::Granted;
        }
        inner.waiters.push(c).expect("entry waiter queue is never closed");
        let entry = inner.per_client.entry(c).or_default();
        *entry |= ClientFlags::WAITING;
        LockOutcome::Blocked
    }

    // Releases c's lock. If a waiter is queued, grants it the lock and
    // returns its identifier so the caller can send it a delayed reply.
    pub fn unlock(&self, c: ClientId) -> CoreResult<Option<ClientId>> {
        let mut inner = self.inner.write();
        let is_owner = inner
            .per_client
            .get(&c)
            .map(|f| f.contains(ClientFlags::OWNER))
            .unwrap_or(false);
        if !is_owner {
            return Err(CoreError::Permission(PermissionKind::NotOwner));
        }
        if let Some(entry) = inner.per_client.get_mut(&c) {
            *entry -= ClientFlags::OWNER;
        }
        Ok(Self::grant_next_waiter(&mut inner))
    }

    // Clears OPEN/WRITE_ELIGIBLE for a disconnecting client, dequeues it if
    // it was waiting, or releases its lock (possibly granting a waiter) if
    // it was the owner. Returns the newly granted owner, if any.
    pub fn remove_client(&self, c: ClientId) -> Option<ClientId> {
        let mut inner = self.inner.write();
        let flags = inner.per_client.get(&c).copied().unwrap_or_default();
        if let Some(entry) = inner.per_client.get_mut(&c) {
            *entry -= ClientFlags::OPEN | ClientFlags::WRITE_ELIGIBLE;
        }
        if flags.contains(ClientFlags::WAITING) {
            let mut cursor = inner.waiters.iter();
            while let Some(id) = cursor.next() {
                if *id == c {
                    cursor.remove_current();
                    break;
                }
            }
            drop(cursor);
            if let Some(entry) = inner.per_client.get_mut(&c) {
                *entry -= ClientFlags::WAITING;
            }
            return None;
        }
        if flags.contains(ClientFlags::OWNER) {
            if let Some(entry) = inner.per_client.get_mut(&c) {
                *entry -= ClientFlags::OWNER;
            }
            return Self::grant_next_waiter(&mut inner);
        }
        None
    }

    // Pops the head waiter, if any, grants it the lock, and returns its
    // identifier. Clears LOCKED if the queue was empty. Called with the
    // entry's write lock already held.
    fn grant_next_waiter(inner: &mut Inner) -> Option<ClientId> {
        match inner.waiters.pop_non_blocking() {
            Some(next) => {
                if let Some(entry) = inner.per_client.get_mut(&next) {
                    *entry -= ClientFlags::WAITING;
                    *entry |= ClientFlags::OWNER;
                }
                Some(next)
            }
            None => {
                inner.global -= GlobalFlags::LOCKED;
                None
            }
        }
    }

    // Detaches and returns the waiter queue, clearing WAITING from every
    // per-client entry. Called immediately before the entry is destroyed so
    // the caller can notify waiters that their lock attempt has failed.
    pub fn extract_waiters(&self) -> FifoQueue<ClientId> {
        let mut inner = self.inner.write();
        let taken = std::mem::replace(&mut inner.waiters, FifoQueue::new());
        for id in taken.snapshot() {
            if let Some(entry) = inner.per_client.get_mut(&id) {
                *entry -= ClientFlags::WAITING;
            }
        }
        taken
    }

    // A dense, keyed-by-int per-client layout would need to grow its
    // backing storage up front; this entry uses a HashMap, so growing the
    // table's configured capacity is a no-op here.
    pub fn resize(&self, _new_max: usize) {}
}
