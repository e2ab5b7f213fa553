//! The error type returned by every fallible operation in this crate.

use bson::{Bson, Document};

/// A specialized `Result` for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation was attempted before `connect()` or after `disconnect()`.
    #[error("not yet connected to a server")]
    NotYetConnected,

    /// `connect()` was called on a server handle that is already connected.
    #[error("already connected to a server")]
    AlreadyConnected,

    /// A reply did not arrive before the deadline.
    #[error("timed out waiting for a reply to request {request_id}")]
    Timeout {
        /// The request id that timed out.
        request_id: i32,
    },

    /// Wire framing or document decoding failed.
    #[error("failed to parse a wire message: {0}")]
    ParseError(String),

    /// A reply was structurally valid but missing a field an operation required.
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// An opcode other than `Reply` was read where a reply was required.
    #[error("expected an OP_REPLY, got opcode {0}")]
    IncorrectReply(i32),

    /// An `insert` command replied with `ok != 1`.
    #[error("insert failed: {message}")]
    InsertFailure {
        /// The documents that were sent in the failing batch.
        documents: Vec<Document>,
        /// The server's error document.
        message: String,
    },

    /// An `update` command replied with `ok != 1`.
    #[error("update failed: {message}")]
    UpdateFailure {
        /// The server's error document.
        message: String,
    },

    /// A `delete` command replied with `ok != 1`.
    #[error("remove failed: {message}")]
    RemoveFailure {
        /// The server's error document.
        message: String,
    },

    /// Any other command replied with `ok != 1`.
    #[error("command failed: {0:?}")]
    CommandFailure(Document),

    /// A client-side precondition was violated before a request was even sent.
    #[error("command error: {0}")]
    CommandError(String),

    /// The peer's cached `maxWireVersion` is too low for the requested operation.
    #[error("operation unsupported by peer wire version {wire_version}: {operation}")]
    UnsupportedOperations {
        /// The cached max wire version of the peer.
        wire_version: i32,
        /// The operation that required a higher version.
        operation: String,
    },

    /// A reply was expected to carry a `cursor` shape and did not.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The `cursor` sub-document of a command reply was missing or malformed.
    #[error("cursor initialization error: {0}")]
    CursorInitializationError(String),

    /// An invariant of the request/reply multiplexer was violated.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Underlying socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document codec failed to decode a BSON value.
    #[error("BSON decode error: {0}")]
    Bson(#[from] bson::DecoderError),

    /// The document codec failed to encode a BSON value.
    #[error("BSON encode error: {0}")]
    BsonEncode(#[from] bson::EncoderError),
}

impl Error {
    /// Builds a `CommandFailure` (or the more specific *Failure variant via the
    /// given constructor) from a command reply document, pulling out `errmsg`
    /// if present.
    pub(crate) fn from_command_reply(doc: &Document) -> Error {
        Error::CommandFailure(doc.clone())
    }

    pub(crate) fn errmsg_of(doc: &Document) -> String {
        match doc.get("errmsg") {
            Some(&Bson::String(ref s)) => s.clone(),
            _ => format!("{:?}", doc),
        }
    }
}

/// Returns `true` iff the command reply document's `ok` field is `1` (or `1.0`).
pub(crate) fn command_ok(doc: &Document) -> bool {
    match doc.get("ok") {
        Some(&Bson::FloatingPoint(f)) => f == 1.0,
        Some(&Bson::I32(i)) => i == 1,
        Some(&Bson::I64(i)) => i == 1,
        _ => false,
    }
}
