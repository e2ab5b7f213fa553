//! The 16-byte standard message header shared by every wire protocol message.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Integer tag identifying a wire message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    fn from_i32(value: i32) -> Result<OpCode> {
        Ok(match value {
            1 => OpCode::Reply,
            2001 => OpCode::Update,
            2002 => OpCode::Insert,
            2004 => OpCode::Query,
            2005 => OpCode::GetMore,
            2006 => OpCode::Delete,
            2007 => OpCode::KillCursors,
            other => return Err(Error::ParseError(format!("unrecognized opcode {}", other))),
        })
    }
}

/// The four little-endian `i32` fields that prefix every message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total message length, including this header, in bytes.
    pub message_length: i32,
    /// Identifier assigned by the sender; unique per sender within a connection.
    pub request_id: i32,
    /// On a reply, the `request_id` of the message being responded to; otherwise 0.
    pub response_to: i32,
    /// The opcode of the message this header prefixes.
    pub op_code: OpCode,
}

/// Byte length of an encoded `Header`: four `i32` fields.
pub const HEADER_LENGTH: i32 = 16;

impl Header {
    pub fn new_insert(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::Insert,
        }
    }

    pub fn new_update(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::Update,
        }
    }

    pub fn new_delete(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::Delete,
        }
    }

    pub fn new_query(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::Query,
        }
    }

    pub fn new_get_more(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::GetMore,
        }
    }

    pub fn new_kill_cursors(message_length: i32, request_id: i32) -> Header {
        Header {
            message_length,
            request_id,
            response_to: 0,
            op_code: OpCode::KillCursors,
        }
    }

    /// Writes the four header fields, little-endian, in wire order.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        buffer.write_i32::<LittleEndian>(self.message_length)?;
        buffer.write_i32::<LittleEndian>(self.request_id)?;
        buffer.write_i32::<LittleEndian>(self.response_to)?;
        buffer.write_i32::<LittleEndian>(self.op_code as i32)?;
        Ok(())
    }

    /// Reads a header from a stream positioned at the start of a frame.
    pub fn read<R: Read>(buffer: &mut R) -> Result<Header> {
        let message_length = buffer.read_i32::<LittleEndian>()?;
        let request_id = buffer.read_i32::<LittleEndian>()?;
        let response_to = buffer.read_i32::<LittleEndian>()?;
        let op_code = OpCode::from_i32(buffer.read_i32::<LittleEndian>()?)?;

        if message_length < HEADER_LENGTH {
            return Err(Error::ParseError(format!(
                "message length {} is smaller than the header itself",
                message_length
            )));
        }

        Ok(Header {
            message_length,
            request_id,
            response_to,
            op_code,
        })
    }

    /// Parses just the opcode and response-to fields out of a complete, already
    /// buffered frame, without needing a `Read` impl. Used by the reader task,
    /// which works off of a growing in-memory byte buffer rather than streaming
    /// directly off the socket for header parsing.
    pub fn peek_response_to(frame: &[u8]) -> Result<i32> {
        if frame.len() < HEADER_LENGTH as usize {
            return Err(Error::ParseError(
                "frame too short to contain a header".to_owned(),
            ));
        }
        let mut cursor = &frame[8..12];
        Ok(cursor.read_i32::<LittleEndian>()?)
    }

    /// Parses the length prefix out of the first four bytes of a (possibly
    /// incomplete) buffer.
    pub fn peek_length(buffer: &[u8]) -> Result<i32> {
        if buffer.len() < 4 {
            return Err(Error::ParseError(
                "fewer than 4 bytes available to read a length prefix".to_owned(),
            ));
        }
        let mut cursor = &buffer[0..4];
        let length = cursor.read_i32::<LittleEndian>()?;
        if length < 0 {
            return Err(Error::ParseError(format!(
                "negative frame length {}",
                length
            )));
        }
        Ok(length)
    }
}
