//! The numeric configuration record the core itself consumes.
//!
//! Loading this from a file or the CLI is the dispatcher's job; this crate only
//! defines the shape of the record and the caps it enforces.

use serde::{Deserialize, Serialize};

/// The subset of configuration keys the core itself reads. A socket path and
/// worker-pool size configure the transport and dispatcher respectively and
/// never reach the Store, so they have no place here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// `maxFileNo`: hard ceiling on resident files.
    pub max_file_count: usize,
    /// `storageKB/MB/GB`, normalized to bytes: hard ceiling on total payload size.
    pub max_byte_size: usize,
    /// `fileTableBuckets`: initial-capacity hint for the file table.
    pub file_table_buckets: usize,
    /// `sockBacklog`: carried verbatim for the out-of-scope listener; the core
    /// never reads it, it just keeps the record complete for callers that
    /// serialize the whole config in one place.
    pub sock_backlog: usize,
}

impl Config {
    pub fn new(max_file_count: usize, max_byte_size: usize) -> Config {
        Config {
            max_file_count,
            max_byte_size,
            file_table_buckets: max_file_count.max(1),
            sock_backlog: 128,
        }
    }
}
