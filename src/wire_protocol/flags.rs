//! Per-opcode bit vectors, as laid out on the wire.

use bitflags::bitflags;

bitflags! {
    /// Bit vector of insert options.
    pub struct OpInsertFlags: i32 {
        /// If set, the server stops processing the remaining documents in the
        /// batch as soon as one of them fails to insert.
        const CONTINUE_ON_ERROR = 1;
    }
}

impl OpInsertFlags {
    pub fn no_flags() -> OpInsertFlags {
        OpInsertFlags::empty()
    }
}

bitflags! {
    /// Bit vector of update options.
    pub struct OpUpdateFlags: i32 {
        /// If no document matches the selector, insert the update document as a
        /// new document.
        const UPSERT = 1;
        /// Update all documents matching the selector, not just the first.
        const MULTI_UPDATE = 2;
    }
}

impl OpUpdateFlags {
    pub fn no_flags() -> OpUpdateFlags {
        OpUpdateFlags::empty()
    }
}

bitflags! {
    /// Bit vector of delete options.
    pub struct OpDeleteFlags: i32 {
        /// Remove only the first matching document instead of all of them.
        const REMOVE_ONE = 1;
    }
}

impl OpDeleteFlags {
    pub fn no_flags() -> OpDeleteFlags {
        OpDeleteFlags::empty()
    }
}

bitflags! {
    /// Bit vector of query options.
    pub struct OpQueryFlags: i32 {
        /// The cursor will not close when the last result document is retrieved.
        const TAILABLE_CURSOR = 2;
        /// Allow query of a replica secondary.
        const SLAVE_OK = 4;
        /// Used internally by MongoDB-style deployments; not set by this crate.
        const OPLOG_REPLAY = 8;
        /// Do not time out the cursor after an idle period.
        const NO_CURSOR_TIMEOUT = 16;
        /// Block briefly waiting for data instead of returning no data on a
        /// tailable cursor.
        const AWAIT_DATA = 32;
        /// Stream multiple "more data" packets rather than waiting on `getMore`.
        const EXHAUST = 64;
        /// Return partial results from a sharded cluster if some shards are down.
        const PARTIAL = 128;
    }
}

impl OpQueryFlags {
    pub fn no_flags() -> OpQueryFlags {
        OpQueryFlags::empty()
    }
}

bitflags! {
    /// Bit vector of reply options returned by the server.
    pub struct OpReplyFlags: i32 {
        /// The cursor id in the response no longer exists on the server.
        const CURSOR_NOT_FOUND = 1;
        /// The query failed; the single returned document describes the error.
        const QUERY_FAILURE = 2;
        /// Set when a shard's config is stale and needs to be refreshed.
        const SHARD_CONFIG_STALE = 4;
        /// The server supports the `await_data` query option.
        const AWAIT_CAPABLE = 8;
    }
}
