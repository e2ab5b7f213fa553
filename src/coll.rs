//! `Collection`: the CRUD/command surface, gated between modern command-style
//! dispatch and legacy opcode dispatch by the peer's cached `maxWireVersion`.

use std::time::Duration;

use bson::{Bson, Document};

use crate::common::{self, inject_object_ids, CommandBuilder};
use crate::cursor::Cursor;
use crate::db::Database;
use crate::error::{command_ok, Error, Result};
use crate::server::DEFAULT_TIMEOUT;
use crate::wire_protocol::flags::{OpDeleteFlags, OpQueryFlags, OpUpdateFlags};
use crate::wire_protocol::operations::Message;

const INSERT_COMMAND_MIN_WIRE_VERSION: i32 = 2;
const FIND_COMMAND_MIN_WIRE_VERSION: i32 = 4;
const UPDATE_COMMAND_MIN_WIRE_VERSION: i32 = 2;
const DELETE_COMMAND_MIN_WIRE_VERSION: i32 = 2;
const CREATE_INDEXES_MIN_WIRE_VERSION: i32 = 2;
const LIST_INDEXES_MIN_WIRE_VERSION: i32 = 4;

const INSERT_CHUNK_SIZE: usize = 1000;
const DEFAULT_BATCH_SIZE: i32 = 10;

/// One document update request: `(filter, replacement, upsert, multi)`.
pub type UpdateSpec = (Document, Document, bool, bool);

/// One document delete request: `(filter, limit)`. `limit == 0` means
/// unbounded (remove every match); a positive limit removes that many via
/// repeated single-document deletes on the legacy path.
pub type DeleteSpec = (Document, i32);

/// An index to create via `createIndexes`.
pub struct IndexSpec {
    pub name: String,
    pub key: Document,
    /// Extra index options (`unique`, `sparse`, `expireAfterSeconds`, ...),
    /// merged alongside `name`/`key` in the index document.
    pub options: Document,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, key: Document) -> IndexSpec {
        IndexSpec {
            name: name.into(),
            key,
            options: Document::new(),
        }
    }

    fn into_document(self) -> Document {
        let mut doc = Document::new();
        doc.insert("name", self.name);
        doc.insert("key", self.key);
        for (k, v) in self.options {
            doc.insert(k, v);
        }
        doc
    }
}

/// The `action` half of a `findAndModify` call.
pub enum FindAndModifyAction {
    Remove,
    Update {
        update: Document,
        return_modified: bool,
        upsert: bool,
    },
}

/// A named collection within a [`Database`].
pub struct Collection {
    db: Database,
    name: String,
}

impl Collection {
    pub fn new(db: Database, name: String) -> Collection {
        Collection { db, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// `"<db>.<collection>"`, as used in legacy opcodes.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db.name(), self.name)
    }

    fn wire_version(&self) -> i32 {
        self.db.server().max_wire_version()
    }

    fn require_wire_version(&self, min: i32, operation: &str) -> Result<()> {
        let actual = self.wire_version();
        if actual >= min {
            Ok(())
        } else {
            Err(Error::UnsupportedOperations {
                wire_version: actual,
                operation: operation.to_owned(),
            })
        }
    }

    // ---- Insert ---------------------------------------------------------

    /// Inserts `documents`, injecting a fresh `ObjectId` into any document
    /// missing `_id`, in chunks of at most 1,000. Returns the `_id` of each
    /// input document, in order.
    pub fn insert(
        &self,
        documents: Vec<Document>,
        ordered: Option<bool>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Bson>> {
        let timeout = timeout.unwrap_or_else(|| default_insert_timeout(documents.len()));
        let (documents, ids) = inject_object_ids(documents);

        for chunk in common::chunks(documents, INSERT_CHUNK_SIZE) {
            if self.wire_version() >= INSERT_COMMAND_MIN_WIRE_VERSION {
                self.insert_chunk_command(chunk, ordered, timeout)?;
            } else {
                self.insert_chunk_legacy(chunk)?;
            }
        }

        Ok(ids)
    }

    fn insert_chunk_command(
        &self,
        chunk: Vec<Document>,
        ordered: Option<bool>,
        timeout: Duration,
    ) -> Result<()> {
        let command_docs = chunk.clone();
        let documents_bson = Bson::Array(chunk.into_iter().map(Bson::Document).collect());
        let command = CommandBuilder::new("insert", self.name.clone())
            .field("documents", documents_bson)
            .field_if_some("ordered", ordered)
            .build();

        let reply = self.db.run_command(command, timeout)?;
        if !command_ok(&reply) {
            return Err(Error::InsertFailure {
                documents: command_docs,
                message: Error::errmsg_of(&reply),
            });
        }
        Ok(())
    }

    fn insert_chunk_legacy(&self, chunk: Vec<Document>) -> Result<()> {
        let request_id = self.db.server().next_message_id();
        let message = Message::new_insert(
            request_id,
            crate::wire_protocol::flags::OpInsertFlags::no_flags(),
            self.full_name(),
            chunk,
        )?;
        self.db.server().send(&message, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    // ---- Query / find -----------------------------------------------------

    /// Sends a raw legacy `Query` and returns a cursor built from the reply.
    pub fn query(
        &self,
        filter: Document,
        flags: OpQueryFlags,
        number_to_return: i32,
    ) -> Result<Cursor<Document>> {
        let request_id = self.db.server().next_message_id();
        let message = Message::new_query(
            request_id,
            flags,
            self.full_name(),
            0,
            number_to_return,
            filter,
            None,
        )?;
        let reply = self.db.server().send_and_await(&message, DEFAULT_TIMEOUT)?;
        Ok(Cursor::from_reply(
            self.db.server().clone(),
            self.full_name(),
            reply,
            number_to_return,
        ))
    }

    pub fn query_one(&self, filter: Document, flags: OpQueryFlags) -> Result<Option<Document>> {
        let mut cursor = self.query(filter, flags, 1)?;
        cursor.next().transpose()
    }

    /// Modern `find` command on `maxWireVersion >= 4`, falling back to a raw
    /// legacy `Query` (ignoring `sort`/`projection`/`skip`/`batchSize`, which
    /// have no representation in the legacy opcode) otherwise.
    pub fn find(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
        skip: Option<i32>,
        limit: Option<i32>,
        batch_size: Option<i32>,
    ) -> Result<Cursor<Document>> {
        if self.wire_version() >= FIND_COMMAND_MIN_WIRE_VERSION {
            let effective_batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
            let command = CommandBuilder::new("find", self.name.clone())
                .field("filter", filter)
                .field_if_some("sort", sort)
                .field_if_some("projection", projection)
                .field_if_some("skip", skip)
                .field_if_some("limit", limit)
                .field("batchSize", effective_batch_size)
                .build();
            let reply = self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
            let cursor_doc = reply
                .get_document("cursor")
                .map_err(|_| Error::CursorInitializationError("find reply had no cursor sub-document".to_owned()))?;
            Cursor::from_command_cursor(
                self.db.server().clone(),
                cursor_doc,
                effective_batch_size,
            )
        } else {
            let number_to_return = limit.unwrap_or_else(|| batch_size.unwrap_or(0));
            self.query(filter, OpQueryFlags::no_flags(), number_to_return)
        }
    }

    pub fn find_one(
        &self,
        filter: Document,
        sort: Option<Document>,
        projection: Option<Document>,
    ) -> Result<Option<Document>> {
        let mut cursor = self.find(filter, sort, projection, None, Some(1), None)?;
        cursor.next().transpose()
    }

    // ---- Update ------------------------------------------------------------

    pub fn update(&self, updates: Vec<UpdateSpec>, ordered: Option<bool>) -> Result<()> {
        if self.wire_version() >= UPDATE_COMMAND_MIN_WIRE_VERSION {
            let entries: Vec<Bson> = updates
                .iter()
                .map(|(filter, replacement, upsert, multi)| {
                    let mut entry = Document::new();
                    entry.insert("q", filter.clone());
                    entry.insert("u", replacement.clone());
                    entry.insert("upsert", *upsert);
                    entry.insert("multi", *multi);
                    Bson::Document(entry)
                })
                .collect();
            let command = CommandBuilder::new("update", self.name.clone())
                .field("updates", Bson::Array(entries))
                .field_if_some("ordered", ordered)
                .build();
            let reply = self.db.run_command(command, DEFAULT_TIMEOUT)?;
            if !command_ok(&reply) {
                return Err(Error::UpdateFailure {
                    message: Error::errmsg_of(&reply),
                });
            }
            Ok(())
        } else {
            for (filter, replacement, upsert, multi) in updates {
                let mut flags = OpUpdateFlags::no_flags();
                if upsert {
                    flags |= OpUpdateFlags::UPSERT;
                }
                if multi {
                    flags |= OpUpdateFlags::MULTI_UPDATE;
                }
                let request_id = self.db.server().next_message_id();
                let message =
                    Message::new_update(request_id, self.full_name(), flags, filter, replacement)?;
                self.db.server().send(&message, DEFAULT_TIMEOUT)?;
            }
            Ok(())
        }
    }

    // ---- Remove --------------------------------------------------------------

    pub fn remove(&self, deletes: Vec<DeleteSpec>, ordered: Option<bool>) -> Result<()> {
        if self.wire_version() >= DELETE_COMMAND_MIN_WIRE_VERSION {
            let entries: Vec<Bson> = deletes
                .iter()
                .map(|(filter, limit)| {
                    let mut entry = Document::new();
                    entry.insert("q", filter.clone());
                    entry.insert("limit", *limit);
                    Bson::Document(entry)
                })
                .collect();
            let command = CommandBuilder::new("delete", self.name.clone())
                .field("deletes", Bson::Array(entries))
                .field_if_some("ordered", ordered)
                .build();
            let reply = self.db.run_command(command, DEFAULT_TIMEOUT)?;
            if !command_ok(&reply) {
                return Err(Error::RemoveFailure {
                    message: Error::errmsg_of(&reply),
                });
            }
            Ok(())
        } else {
            for (filter, limit) in deletes {
                if limit == 0 {
                    let request_id = self.db.server().next_message_id();
                    let message = Message::new_delete(
                        request_id,
                        self.full_name(),
                        OpDeleteFlags::no_flags(),
                        filter,
                    )?;
                    self.db.server().send(&message, DEFAULT_TIMEOUT)?;
                } else {
                    for _ in 0..limit {
                        let request_id = self.db.server().next_message_id();
                        let message = Message::new_delete(
                            request_id,
                            self.full_name(),
                            OpDeleteFlags::REMOVE_ONE,
                            filter.clone(),
                        )?;
                        self.db.server().send(&message, DEFAULT_TIMEOUT)?;
                    }
                }
            }
            Ok(())
        }
    }

    // ---- Other commands --------------------------------------------------

    pub fn count(&self, filter: Option<Document>, limit: Option<i64>, skip: Option<i64>) -> Result<i64> {
        let command = CommandBuilder::new("count", self.name.clone())
            .field_if_some("query", filter)
            .field_if_some("skip", skip)
            .field_if_some("limit", limit)
            .build();
        let reply = self.db.run_command(command, DEFAULT_TIMEOUT)?;
        if !command_ok(&reply) {
            return Err(Error::from_command_reply(&reply));
        }
        match reply.get("n") {
            Some(&Bson::I32(n)) => Ok(n as i64),
            Some(&Bson::I64(n)) => Ok(n),
            Some(&Bson::FloatingPoint(n)) => Ok(n as i64),
            _ => Err(Error::InvalidReply("count reply had no `n` field".to_owned())),
        }
    }

    pub fn distinct(&self, key: &str, filter: Option<Document>) -> Result<Vec<Bson>> {
        let command = CommandBuilder::new("distinct", self.name.clone())
            .field("key", key)
            .field_if_some("query", filter)
            .build();
        let reply = self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        match reply.get("values") {
            Some(Bson::Array(values)) => Ok(values.clone()),
            _ => Err(Error::InvalidReply("distinct reply had no `values` field".to_owned())),
        }
    }

    pub fn aggregate(
        &self,
        pipeline: Vec<Document>,
        explain: Option<bool>,
        allow_disk_use: Option<bool>,
        cursor_options: Option<Document>,
        bypass_document_validation: Option<bool>,
    ) -> Result<Cursor<Document>> {
        let cursor_options = cursor_options.unwrap_or_else(|| {
            let mut d = Document::new();
            d.insert("batchSize", DEFAULT_BATCH_SIZE);
            d
        });
        let chunk_size = cursor_options.get_i32("batchSize").unwrap_or(DEFAULT_BATCH_SIZE);
        let command = CommandBuilder::new("aggregate", self.name.clone())
            .field("pipeline", Bson::Array(pipeline.into_iter().map(Bson::Document).collect()))
            .field("cursor", cursor_options)
            .field_if_some("explain", explain)
            .field_if_some("allowDiskUse", allow_disk_use)
            .field_if_some("bypassDocumentValidation", bypass_document_validation)
            .build();
        let reply = self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        let cursor_doc = reply
            .get_document("cursor")
            .map_err(|_| Error::CursorInitializationError("aggregate reply had no cursor sub-document".to_owned()))?;
        Cursor::from_command_cursor(self.db.server().clone(), cursor_doc, chunk_size)
    }

    pub fn find_and_modify(
        &self,
        filter: Option<Document>,
        sort: Option<Document>,
        action: FindAndModifyAction,
        projection: Option<Document>,
    ) -> Result<Option<Document>> {
        let mut builder = CommandBuilder::new("findAndModify", self.name.clone())
            .field_if_some("query", filter)
            .field_if_some("sort", sort)
            .field_if_some("fields", projection);

        builder = match action {
            FindAndModifyAction::Remove => builder.field("remove", true),
            FindAndModifyAction::Update {
                update,
                return_modified,
                upsert,
            } => builder
                .field("update", update)
                .field("new", return_modified)
                .field("upsert", upsert),
        };

        let reply = self.db.run_command_checked(builder.build(), DEFAULT_TIMEOUT)?;
        match reply.get("value") {
            Some(Bson::Document(doc)) => Ok(Some(doc.clone())),
            _ => Ok(None),
        }
    }

    pub fn create_indexes(&self, indexes: Vec<IndexSpec>) -> Result<()> {
        self.require_wire_version(CREATE_INDEXES_MIN_WIRE_VERSION, "createIndexes")?;
        let indexes_bson = Bson::Array(
            indexes
                .into_iter()
                .map(|spec| Bson::Document(spec.into_document()))
                .collect(),
        );
        let command = CommandBuilder::new("createIndexes", self.name.clone())
            .field("indexes", indexes_bson)
            .build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let command = CommandBuilder::new("dropIndexes", self.name.clone())
            .field("index", name)
            .build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Lists this collection's indexes, fully draining the server-side cursor.
    pub fn list_indexes(&self) -> Result<Vec<Document>> {
        self.require_wire_version(LIST_INDEXES_MIN_WIRE_VERSION, "listIndexes")?;
        let command = CommandBuilder::new("listIndexes", self.name.clone()).build();
        let reply = self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        let cursor_doc = reply
            .get_document("cursor")
            .map_err(|_| Error::CursorInitializationError("listIndexes reply had no cursor sub-document".to_owned()))?;
        let cursor = Cursor::from_command_cursor(self.db.server().clone(), cursor_doc, DEFAULT_BATCH_SIZE)?;
        cursor.collect()
    }

    pub fn drop(&self) -> Result<()> {
        let command = CommandBuilder::new("drop", self.name.clone()).build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Renames this collection, running the command against `admin` as the
    /// protocol requires. Consumes `self` and returns the collection under
    /// its new name, since `self.db`/`self.name` no longer describe it.
    pub fn rename(self, new_name: &str) -> Result<Collection> {
        self.rename_impl(self.db.clone(), new_name, None)
    }

    /// Moves this collection to a different database, optionally renaming it
    /// and/or dropping a pre-existing target.
    pub fn move_to(
        self,
        target_db: Database,
        new_name: Option<&str>,
        drop_target: Option<bool>,
    ) -> Result<Collection> {
        let new_name = new_name.unwrap_or(&self.name).to_owned();
        self.rename_impl(target_db, &new_name, drop_target)
    }

    fn rename_impl(
        self,
        target_db: Database,
        new_name: &str,
        drop_target: Option<bool>,
    ) -> Result<Collection> {
        let admin = Database::new(self.db.server().clone(), "admin");
        let new_full_name = format!("{}.{}", target_db.name(), new_name);
        let command = CommandBuilder::new("renameCollection", self.full_name())
            .field("to", new_full_name)
            .field_if_some("dropTarget", drop_target)
            .build();
        admin.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(Collection::new(target_db, new_name.to_owned()))
    }

    pub fn touch(&self, data: bool, index: bool) -> Result<()> {
        let command = CommandBuilder::new("touch", self.name.clone())
            .field("data", data)
            .field("index", index)
            .build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn convert_to_capped(&self, size_bytes: i64) -> Result<()> {
        let command = CommandBuilder::new("convertToCapped", self.name.clone())
            .field("size", size_bytes)
            .build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn re_index(&self) -> Result<()> {
        let command = CommandBuilder::new("reIndex", self.name.clone()).build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    pub fn compact(&self, force: Option<bool>) -> Result<()> {
        let command = CommandBuilder::new("compact", self.name.clone())
            .field_if_some("force", force)
            .build();
        self.db.run_command_checked(command, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// `collMod`. Rejects a caller-supplied `collMod` key in `flags`, since
    /// that key is owned by this method (the command name itself).
    pub fn modify(&self, flags: Document) -> Result<()> {
        if flags.contains_key("collMod") {
            return Err(Error::CommandError(
                "`flags` must not itself contain a `collMod` key".to_owned(),
            ));
        }
        let mut builder = CommandBuilder::new("collMod", self.name.clone());
        for (k, v) in flags {
            builder = builder.field(&k, v);
        }
        self.db.run_command_checked(builder.build(), DEFAULT_TIMEOUT)?;
        Ok(())
    }
}

fn default_insert_timeout(count: usize) -> Duration {
    Duration::from_secs(60) + Duration::from_secs((count / 50) as u64)
}
