// The two callback shapes Store invokes so a transport layer can turn
// storage events into outbound messages. Only the boundary lives here,
// no socket ever appears in this crate.

use crate::ClientId;

// Ships an evicted file's payload back toward the client whose create/write
// call triggered the eviction. Mirrors the GETF outbound message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictedFile {
    pub name: String,
    pub payload: Vec<u8>,
    pub dirty: bool,
    // The client whose operation caused this file to be evicted.
    pub triggering_client: ClientId,
}

// Invoked once per batch of waiters whose lock attempt just failed, because
// the file they were waiting on was removed or evicted out from under them.
pub type WaitHandler<'a> = dyn FnMut(Vec<ClientId>) + 'a;

// Invoked once per evicted file, with its payload, immediately before the
// entry is dropped. write's eviction pass is the only caller that can
// supply one; create's eviction pass always passes None since there is
// no payload to ship back to a file that does not exist yet.
pub type SendBackHandler<'a> = dyn FnMut(EvictedFile) + 'a;

// A WaitHandler that does nothing, for call sites (and tests) that do not
// care about waiter notifications.
pub fn no_op_wait_handler(_waiters: Vec<ClientId>) {}

// A SendBackHandler that drops the payload, for call sites that do not
// need the evicted bytes (e.g. create's eviction pass).
pub fn no_op_send_back_handler(_evicted: EvictedFile) {}
