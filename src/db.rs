//! `Database`: a namespace scope that executes `$cmd` commands and hands out
//! `Collection`s.

use std::sync::Arc;
use std::time::Duration;

use bson::Document;

use crate::common::CommandBuilder;
use crate::coll::Collection;
use crate::error::{command_ok, Error, Result};
use crate::server::{Server, DEFAULT_TIMEOUT};
use crate::wire_protocol::flags::OpQueryFlags;
use crate::wire_protocol::operations::{Message, Reply};

/// A named scope on a [`Server`]. Cheap to clone: it is a database name plus
/// a shared handle to the server, mirroring the teacher's `Database` being a
/// thin wrapper the `Client` hands out freely.
#[derive(Clone)]
pub struct Database {
    server: Arc<Server>,
    name: String,
}

impl Database {
    pub fn new(server: Arc<Server>, name: impl Into<String>) -> Database {
        Database {
            server,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Builds a `Collection` scoped to this database.
    pub fn collection(&self, name: impl Into<String>) -> Collection {
        Collection::new(self.clone(), name.into())
    }

    /// Sends `command` as a `Query` against `"<name>.$cmd"` and awaits the
    /// raw reply, for the caller to destructure.
    pub fn execute(&self, command: Document, deadline: Duration) -> Result<Reply> {
        let request_id = self.server.next_message_id();
        let namespace = format!("{}.$cmd", self.name);
        let message = Message::new_query(
            request_id,
            OpQueryFlags::no_flags(),
            namespace,
            0,
            1,
            command,
            None,
        )?;
        self.server.send_and_await(&message, deadline)
    }

    /// `execute` followed by pulling out the single reply document, with the
    /// opportunistic handshake-version observation every command-style call
    /// gets for free.
    pub fn run_command(&self, command: Document, deadline: Duration) -> Result<Document> {
        let reply = self.execute(command, deadline)?;
        let doc = reply
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidReply("command reply carried no documents".to_owned()))?;
        self.server.note_handshake(&doc);
        Ok(doc)
    }

    /// `run_command`, additionally failing with `CommandFailure` if the reply
    /// is not `ok`.
    pub(crate) fn run_command_checked(&self, command: Document, deadline: Duration) -> Result<Document> {
        let doc = self.run_command(command, deadline)?;
        if command_ok(&doc) {
            Ok(doc)
        } else {
            Err(Error::from_command_reply(&doc))
        }
    }

    /// Issues `cloneCollectionAsCapped` against this database, copying
    /// `source` into `target` as a capped collection of `size_bytes`.
    pub fn clone_collection_as_capped(
        &self,
        source: &str,
        target: &str,
        size_bytes: i64,
    ) -> Result<()> {
        let command = CommandBuilder::new("cloneCollectionAsCapped", source)
            .field("toCollection", target)
            .field("size", size_bytes)
            .build();
        self.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }
}
