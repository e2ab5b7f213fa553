//! Core protocol engine for a document-database client driver: the wire
//! codec, connection pool, request/reply multiplexer, and the operation
//! layer (CRUD, cursors, index management, admin commands) with version-
//! gated dual dispatch between modern command-style requests and legacy
//! opcode-style requests.

pub mod common;
pub mod error;
pub mod pool;
pub mod server;
pub mod wire_protocol;

mod coll;
mod cursor;
mod db;

pub use coll::{Collection, DeleteSpec, FindAndModifyAction, IndexSpec, UpdateSpec};
pub use cursor::Cursor;
pub use db::Database;
pub use error::{Error, Result};
pub use server::Server;
