// An in-memory, capacity-bounded file cache: a name table of byte-blob
// "files" with FIFO eviction under two hard ceilings (resident file count,
// total byte size) and per-file advisory locking with FIFO wait queues.
//
// Storage engine and concurrency substrate only, see Store and FileEntry.
// The wire protocol, worker-pool dispatcher, configuration loader, and
// signal handling that would turn this into a running server live outside
// this crate; handler defines the callback seam a transport layer hangs off
// of instead.

pub mod config;
pub mod entry;
pub mod error;
pub mod flags;
pub mod handler;
pub mod queue;
pub mod store;

// An integer unique per active connection, chosen by the dispatcher
// (typically the accepted socket's file descriptor). Used throughout the
// core as an opaque key into per-entry permission state.
pub type ClientId = u64;

pub use config::Config;
pub use entry::{FileEntry, LockOutcome};
pub use error::{CoreError, CoreResult, PermissionKind};
pub use handler::{no_op_send_back_handler, no_op_wait_handler, EvictedFile, SendBackHandler, WaitHandler};
pub use queue::FifoQueue;
pub use store::{Stats, Store};
