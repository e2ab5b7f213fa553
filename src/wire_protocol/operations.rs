//! Wire protocol message encoding and decoding.
//!
//! Byte order is little-endian throughout. Each variant's body layout is
//! documented on its constructor; see the module-level wire format notes in
//! `SPEC_FULL.md` §4.1 for the authoritative per-opcode byte layout.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use bson::{self, Document};

use crate::error::{Error, Result};
use crate::wire_protocol::flags::{OpDeleteFlags, OpInsertFlags, OpQueryFlags, OpReplyFlags, OpUpdateFlags};
use crate::wire_protocol::header::{Header, OpCode, HEADER_LENGTH};

/// A decoded `OP_REPLY` body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub flags: OpReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<Document>,
}

/// A message in the wire protocol, carrying its own header.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpReply {
        header: Header,
        reply: Reply,
    },
    OpUpdate {
        header: Header,
        namespace: String,
        flags: OpUpdateFlags,
        selector: Document,
        update: Document,
    },
    OpInsert {
        header: Header,
        flags: OpInsertFlags,
        namespace: String,
        documents: Vec<Document>,
    },
    OpQuery {
        header: Header,
        flags: OpQueryFlags,
        namespace: String,
        number_to_skip: i32,
        number_to_return: i32,
        query: Document,
        return_field_selector: Option<Document>,
    },
    OpGetMore {
        header: Header,
        namespace: String,
        number_to_return: i32,
        cursor_id: i64,
    },
    OpDelete {
        header: Header,
        namespace: String,
        flags: OpDeleteFlags,
        selector: Document,
    },
    OpKillCursors {
        header: Header,
        cursor_ids: Vec<i64>,
    },
}

fn encode_doc(doc: &Document) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bson::encode_document(&mut bytes, doc)?;
    Ok(bytes)
}

fn decode_doc<R: Read>(reader: &mut R) -> Result<Document> {
    Ok(bson::decode_document(reader)?)
}

fn cstring_len(namespace: &str) -> i32 {
    namespace.len() as i32 + 1
}

fn write_cstring<W: Write>(buffer: &mut W, s: &str) -> Result<()> {
    buffer.write_all(s.as_bytes())?;
    buffer.write_u8(0)?;
    Ok(())
}

impl Message {
    /// Builds an `OP_INSERT` message.
    pub fn new_insert(
        request_id: i32,
        flags: OpInsertFlags,
        namespace: String,
        documents: Vec<Document>,
    ) -> Result<Message> {
        let mut body_len = 4 + cstring_len(&namespace);
        for doc in &documents {
            body_len += encode_doc(doc)?.len() as i32;
        }
        let total_length = HEADER_LENGTH + body_len;
        let header = Header::new_insert(total_length, request_id);

        Ok(Message::OpInsert {
            header,
            flags,
            namespace,
            documents,
        })
    }

    /// Builds an `OP_UPDATE` message.
    pub fn new_update(
        request_id: i32,
        namespace: String,
        flags: OpUpdateFlags,
        selector: Document,
        update: Document,
    ) -> Result<Message> {
        let selector_bytes = encode_doc(&selector)?;
        let update_bytes = encode_doc(&update)?;
        let total_length = HEADER_LENGTH
            + 4
            + cstring_len(&namespace)
            + 4
            + selector_bytes.len() as i32
            + update_bytes.len() as i32;
        let header = Header::new_update(total_length, request_id);

        Ok(Message::OpUpdate {
            header,
            namespace,
            flags,
            selector,
            update,
        })
    }

    /// Builds an `OP_DELETE` message.
    pub fn new_delete(
        request_id: i32,
        namespace: String,
        flags: OpDeleteFlags,
        selector: Document,
    ) -> Result<Message> {
        let selector_bytes = encode_doc(&selector)?;
        let total_length =
            HEADER_LENGTH + 4 + cstring_len(&namespace) + 4 + selector_bytes.len() as i32;
        let header = Header::new_delete(total_length, request_id);

        Ok(Message::OpDelete {
            header,
            namespace,
            flags,
            selector,
        })
    }

    /// Builds an `OP_QUERY` message.
    pub fn new_query(
        request_id: i32,
        flags: OpQueryFlags,
        namespace: String,
        number_to_skip: i32,
        number_to_return: i32,
        query: Document,
        return_field_selector: Option<Document>,
    ) -> Result<Message> {
        let query_bytes = encode_doc(&query)?;
        let mut total_length =
            HEADER_LENGTH + 4 + cstring_len(&namespace) + 4 + 4 + query_bytes.len() as i32;

        if let Some(ref selector) = return_field_selector {
            total_length += encode_doc(selector)?.len() as i32;
        }

        let header = Header::new_query(total_length, request_id);

        Ok(Message::OpQuery {
            header,
            flags,
            namespace,
            number_to_skip,
            number_to_return,
            query,
            return_field_selector,
        })
    }

    /// Builds an `OP_GET_MORE` message.
    pub fn new_get_more(
        request_id: i32,
        namespace: String,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Message {
        let total_length = HEADER_LENGTH + 4 + cstring_len(&namespace) + 4 + 8;
        let header = Header::new_get_more(total_length, request_id);

        Message::OpGetMore {
            header,
            namespace,
            number_to_return,
            cursor_id,
        }
    }

    /// Builds an `OP_KILL_CURSORS` message.
    pub fn new_kill_cursors(request_id: i32, cursor_ids: Vec<i64>) -> Message {
        let total_length = HEADER_LENGTH + 4 + 4 + 8 * cursor_ids.len() as i32;
        let header = Header::new_kill_cursors(total_length, request_id);

        Message::OpKillCursors { header, cursor_ids }
    }

    /// The header shared by every variant.
    pub fn header(&self) -> &Header {
        match *self {
            Message::OpReply { ref header, .. }
            | Message::OpUpdate { ref header, .. }
            | Message::OpInsert { ref header, .. }
            | Message::OpQuery { ref header, .. }
            | Message::OpGetMore { ref header, .. }
            | Message::OpDelete { ref header, .. }
            | Message::OpKillCursors { ref header, .. } => header,
        }
    }

    /// Serializes the full framed message (header + body) into `buffer`.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Message::OpReply { .. } => Err(Error::CommandError(
                "OP_REPLY should only be sent by a server, never by this client".to_owned(),
            )),
            Message::OpUpdate {
                ref header,
                ref namespace,
                ref flags,
                ref selector,
                ref update,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(0)?;
                write_cstring(buffer, namespace)?;
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                buffer.write_all(&encode_doc(selector)?)?;
                buffer.write_all(&encode_doc(update)?)?;
                Ok(())
            }
            Message::OpInsert {
                ref header,
                ref flags,
                ref namespace,
                ref documents,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                write_cstring(buffer, namespace)?;
                for doc in documents {
                    buffer.write_all(&encode_doc(doc)?)?;
                }
                Ok(())
            }
            Message::OpQuery {
                ref header,
                ref flags,
                ref namespace,
                number_to_skip,
                number_to_return,
                ref query,
                ref return_field_selector,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                write_cstring(buffer, namespace)?;
                buffer.write_i32::<LittleEndian>(number_to_skip)?;
                buffer.write_i32::<LittleEndian>(number_to_return)?;
                buffer.write_all(&encode_doc(query)?)?;
                if let Some(ref selector) = *return_field_selector {
                    buffer.write_all(&encode_doc(selector)?)?;
                }
                Ok(())
            }
            Message::OpGetMore {
                ref header,
                ref namespace,
                number_to_return,
                cursor_id,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(0)?;
                write_cstring(buffer, namespace)?;
                buffer.write_i32::<LittleEndian>(number_to_return)?;
                buffer.write_i64::<LittleEndian>(cursor_id)?;
                Ok(())
            }
            Message::OpDelete {
                ref header,
                ref namespace,
                ref flags,
                ref selector,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(0)?;
                write_cstring(buffer, namespace)?;
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                buffer.write_all(&encode_doc(selector)?)?;
                Ok(())
            }
            Message::OpKillCursors {
                ref header,
                ref cursor_ids,
            } => {
                header.write(buffer)?;
                buffer.write_i32::<LittleEndian>(0)?;
                buffer.write_i32::<LittleEndian>(cursor_ids.len() as i32)?;
                for id in cursor_ids {
                    buffer.write_i64::<LittleEndian>(*id)?;
                }
                Ok(())
            }
        }
    }

    /// Serializes the message into a freshly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.header().message_length as usize);
        self.write(&mut bytes)?;
        Ok(bytes)
    }

    fn read_reply_body<R: Read>(buffer: &mut R, header: Header) -> Result<Message> {
        let mut remaining = header.message_length - HEADER_LENGTH;

        let flags = OpReplyFlags::from_bits_truncate(buffer.read_i32::<LittleEndian>()?);
        remaining -= 4;
        let cursor_id = buffer.read_i64::<LittleEndian>()?;
        remaining -= 8;
        let starting_from = buffer.read_i32::<LittleEndian>()?;
        remaining -= 4;
        let number_returned = buffer.read_i32::<LittleEndian>()?;
        remaining -= 4;

        if remaining < 0 {
            return Err(Error::ParseError(
                "OP_REPLY header claims a body shorter than its fixed fields".to_owned(),
            ));
        }

        let mut payload = vec![0u8; remaining as usize];
        buffer.read_exact(&mut payload)?;

        let mut documents = Vec::new();
        let mut cursor = Cursor::new(payload);
        while (cursor.position() as i64) < remaining as i64 {
            documents.push(decode_doc(&mut cursor)?);
        }

        if documents.len() as i32 != number_returned {
            return Err(Error::ParseError(format!(
                "numberReturned ({}) does not match decoded document count ({})",
                number_returned,
                documents.len()
            )));
        }

        Ok(Message::OpReply {
            header,
            reply: Reply {
                flags,
                cursor_id,
                starting_from,
                number_returned,
                documents,
            },
        })
    }

    /// Reads one framed message (header + body) from a stream. Only `OP_REPLY`
    /// messages are expected to arrive from a server; any other opcode is a
    /// protocol violation.
    pub fn read<R: Read>(buffer: &mut R) -> Result<Message> {
        let header = Header::read(buffer)?;
        match header.op_code {
            OpCode::Reply => Message::read_reply_body(buffer, header),
            other => Err(Error::IncorrectReply(other as i32)),
        }
    }

    /// Decodes a complete, already-buffered frame (as sliced out of the
    /// reader task's reassembly buffer) into a `Message`.
    pub fn decode(frame: &[u8]) -> Result<Message> {
        let mut cursor = Cursor::new(frame);
        Message::read(&mut cursor)
    }
}
