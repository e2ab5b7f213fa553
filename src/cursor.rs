//! `Cursor`: a lazy forward iterator over a paginated result set, issuing
//! `GetMore` as its pending batch is drained and `KillCursors` on drop if
//! abandoned mid-stream.

use std::collections::VecDeque;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{Error, Result};
use crate::server::{Server, DEFAULT_TIMEOUT};
use crate::wire_protocol::operations::{Message, Reply};

/// A forward-only iterator over a server-side result set.
pub struct Cursor<T = Document> {
    server: Arc<Server>,
    namespace: String,
    cursor_id: i64,
    pending: VecDeque<Document>,
    chunk_size: i32,
    transform: Box<dyn FnMut(Document) -> Result<T> + Send>,
    exhausted: bool,
}

impl Cursor<Document> {
    /// Builds a cursor from a legacy `OP_REPLY`: the initial batch, cursor id
    /// and namespace come straight off the reply.
    pub fn from_reply(
        server: Arc<Server>,
        namespace: String,
        reply: Reply,
        chunk_size: i32,
    ) -> Cursor<Document> {
        let exhausted = reply.cursor_id == 0 && reply.documents.is_empty();
        Cursor {
            server,
            namespace,
            cursor_id: reply.cursor_id,
            pending: reply.documents.into(),
            chunk_size,
            transform: Box::new(Ok),
            exhausted,
        }
    }

    /// Builds a cursor from a command reply's `cursor` sub-document:
    /// `{id, ns, firstBatch}`.
    pub fn from_command_cursor(
        server: Arc<Server>,
        cursor_doc: &Document,
        chunk_size: i32,
    ) -> Result<Cursor<Document>> {
        let id = match cursor_doc.get("id") {
            Some(&Bson::I64(id)) => id,
            Some(&Bson::I32(id)) => id as i64,
            _ => {
                return Err(Error::CursorInitializationError(
                    "cursor sub-document missing an `id` field".to_owned(),
                ))
            }
        };
        let namespace = match cursor_doc.get("ns") {
            Some(Bson::String(ns)) => ns.clone(),
            _ => String::new(),
        };
        let first_batch = match cursor_doc.get("firstBatch") {
            Some(Bson::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Bson::Document(doc) => Ok(doc.clone()),
                    _ => Err(Error::CursorInitializationError(
                        "firstBatch contained a non-document element".to_owned(),
                    )),
                })
                .collect::<Result<Vec<Document>>>()?,
            _ => {
                return Err(Error::CursorInitializationError(
                    "cursor sub-document missing a `firstBatch` field".to_owned(),
                ))
            }
        };

        let exhausted = id == 0 && first_batch.is_empty();
        Ok(Cursor {
            server,
            namespace,
            cursor_id: id,
            pending: first_batch.into(),
            chunk_size,
            transform: Box::new(Ok),
            exhausted,
        })
    }
}

impl<T> Cursor<T> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The server-side cursor id; zero means exhausted.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    fn fetch_more(&mut self) -> Result<()> {
        let request_id = self.server.next_message_id();
        let message = Message::new_get_more(
            request_id,
            self.namespace.clone(),
            self.chunk_size,
            self.cursor_id,
        );
        let reply = self.server.send_and_await(&message, DEFAULT_TIMEOUT)?;
        self.cursor_id = reply.cursor_id;
        self.pending = reply.documents.into();
        Ok(())
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if let Some(doc) = self.pending.pop_front() {
            return Some((self.transform)(doc));
        }

        if self.exhausted || self.cursor_id == 0 {
            self.exhausted = true;
            return None;
        }

        if let Err(err) = self.fetch_more() {
            return Some(Err(err));
        }

        match self.pending.pop_front() {
            Some(doc) => Some((self.transform)(doc)),
            None => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        if self.cursor_id != 0 {
            let request_id = self.server.next_message_id();
            let message = Message::new_kill_cursors(request_id, vec![self.cursor_id]);
            // Best-effort: teardown failures are swallowed (spec.md §7).
            let _ = self.server.send(&message, DEFAULT_TIMEOUT);
        }
    }
}
