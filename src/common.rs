//! Small helpers shared across the operation layer: ObjectId injection for
//! inserts, and a command-document builder that always emits the command name
//! as the first field.

use bson::oid::ObjectId;
use bson::{Bson, Document};

/// Generates a fresh, client-side ObjectId. A thin wrapper so callers don't
/// need to depend on `bson::oid` directly.
pub fn new_object_id() -> ObjectId {
    ObjectId::new().expect("failed to generate an ObjectId")
}

/// For each document missing an `_id` field, inserts a freshly generated
/// ObjectId as the document's first field (so it round-trips as the BSON
/// convention expects). Returns the (possibly rewritten) documents alongside
/// the `_id` that corresponds to each input position, in order.
///
/// This is the "insert ID injection" invariant of spec.md §8 property 4: the
/// returned id list always has the same length as the input, and an id is
/// either the caller-supplied `_id` or a freshly minted one now present on
/// the document that will actually be sent to the server.
pub fn inject_object_ids(documents: Vec<Document>) -> (Vec<Document>, Vec<Bson>) {
    let mut out_docs = Vec::with_capacity(documents.len());
    let mut ids = Vec::with_capacity(documents.len());

    for doc in documents {
        match doc.get("_id") {
            Some(existing) => {
                ids.push(existing.clone());
                out_docs.push(doc);
            }
            None => {
                let oid = new_object_id();
                let mut with_id = Document::new();
                with_id.insert("_id", Bson::ObjectId(oid.clone()));
                for (key, value) in doc.into_iter() {
                    with_id.insert(key, value);
                }
                ids.push(Bson::ObjectId(oid));
                out_docs.push(with_id);
            }
        }
    }

    (out_docs, ids)
}

/// Builds a command document whose first field is `(name, value)`, per the
/// wire protocol's requirement that the command name be the first key.
/// Additional fields are appended via [`CommandBuilder::field`] /
/// [`CommandBuilder::field_if_some`] in the order given, never via an
/// unordered map.
pub struct CommandBuilder {
    doc: Document,
}

impl CommandBuilder {
    pub fn new(name: &str, value: impl Into<Bson>) -> CommandBuilder {
        let mut doc = Document::new();
        doc.insert(name.to_owned(), value.into());
        CommandBuilder { doc }
    }

    pub fn field(mut self, key: &str, value: impl Into<Bson>) -> CommandBuilder {
        self.doc.insert(key.to_owned(), value.into());
        self
    }

    pub fn field_if_some<T: Into<Bson>>(mut self, key: &str, value: Option<T>) -> CommandBuilder {
        if let Some(v) = value {
            self.doc.insert(key.to_owned(), v.into());
        }
        self
    }

    pub fn build(self) -> Document {
        self.doc
    }
}

/// Chunks a slice of documents into batches of at most `chunk_size` items,
/// matching the 1,000-document insert batching rule of spec.md §4.5.
pub fn chunks<T>(items: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let mut out = Vec::new();
    let mut iter = items.into_iter();
    loop {
        let chunk: Vec<T> = iter.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let is_last_partial = chunk.len() < chunk_size;
        out.push(chunk);
        if is_last_partial {
            break;
        }
    }
    out
}
