//! Two file-global flags, four per-client permission bits.

bitflags::bitflags! {
    /// Flags over the whole `FileEntry`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GlobalFlags: u8 {
        /// Some client exclusively holds write/remove rights.
        const LOCKED = 0b0000_0001;
        /// The payload was modified since creation.
        const DIRTY  = 0b0000_0010;
    }
}

bitflags::bitflags! {
    /// Flags held by one client against one `FileEntry`. Absent key in the
    /// per-client map is equivalent to the empty set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientFlags: u8 {
        const OPEN           = 0b0000_0001;
        const OWNER          = 0b0000_0010;
        const WRITE_ELIGIBLE = 0b0000_0100;
        const WAITING        = 0b0000_1000;
    }
}
