//! Scripted mock server for the end-to-end wire protocol tests: accepts
//! exactly one connection (matching the single connection a pool opens for
//! a short-lived test `Server`) and carries out a fixed sequence of
//! request/reply exchanges, asserting the exact bytes of each request as it
//! arrives.

use std::io::{Cursor as IoCursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use bson::Document;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use docwire::server::Server;
use docwire::wire_protocol::header::{Header, OpCode, HEADER_LENGTH};

/// One request the mock server expects, and the reply (if any) it writes
/// back. Legacy `OP_DELETE`/`OP_INSERT`/`OP_UPDATE` carry no reply on the
/// wire, so `build_reply` returns `None` for those.
pub struct Exchange {
    pub assert_request: Box<dyn FnOnce(&[u8]) + Send>,
    pub build_reply: Box<dyn FnOnce(i32) -> Option<Vec<u8>> + Send>,
}

pub fn expect(
    assert_request: impl FnOnce(&[u8]) + Send + 'static,
    build_reply: impl FnOnce(i32) -> Option<Vec<u8>> + Send + 'static,
) -> Exchange {
    Exchange {
        assert_request: Box::new(assert_request),
        build_reply: Box::new(build_reply),
    }
}

/// Reads exactly one framed message (length-prefixed) off `stream`.
pub fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).unwrap();
    let len = (&len_buf[..]).read_i32::<LittleEndian>().unwrap();
    let mut rest = vec![0u8; (len - 4) as usize];
    stream.read_exact(&mut rest).unwrap();
    let mut frame = len_buf.to_vec();
    frame.extend_from_slice(&rest);
    frame
}

pub fn request_id_of(frame: &[u8]) -> i32 {
    Header::read(&mut &frame[..]).unwrap().request_id
}

pub fn op_code_of(frame: &[u8]) -> OpCode {
    Header::read(&mut &frame[..]).unwrap().op_code
}

fn read_cstring<R: Read>(reader: &mut R) -> String {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).unwrap();
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).unwrap()
}

/// A decoded `OP_QUERY` frame (also used for command-style requests, since a
/// command is just an `OP_QUERY` against `<db>.$cmd`).
pub struct DecodedQuery {
    pub namespace: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
}

pub fn decode_query_frame(frame: &[u8]) -> DecodedQuery {
    assert_eq!(op_code_of(frame), OpCode::Query);
    let mut cursor = IoCursor::new(&frame[HEADER_LENGTH as usize..]);
    let _flags = cursor.read_i32::<LittleEndian>().unwrap();
    let namespace = read_cstring(&mut cursor);
    let number_to_skip = cursor.read_i32::<LittleEndian>().unwrap();
    let number_to_return = cursor.read_i32::<LittleEndian>().unwrap();
    let query = bson::decode_document(&mut cursor).unwrap();
    DecodedQuery {
        namespace,
        number_to_skip,
        number_to_return,
        query,
    }
}

pub struct DecodedGetMore {
    pub namespace: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

pub fn decode_get_more_frame(frame: &[u8]) -> DecodedGetMore {
    assert_eq!(op_code_of(frame), OpCode::GetMore);
    let mut cursor = IoCursor::new(&frame[HEADER_LENGTH as usize..]);
    let _zero = cursor.read_i32::<LittleEndian>().unwrap();
    let namespace = read_cstring(&mut cursor);
    let number_to_return = cursor.read_i32::<LittleEndian>().unwrap();
    let cursor_id = cursor.read_i64::<LittleEndian>().unwrap();
    DecodedGetMore {
        namespace,
        number_to_return,
        cursor_id,
    }
}

pub struct DecodedDelete {
    pub namespace: String,
    pub flags: i32,
    pub selector: Document,
}

pub fn decode_delete_frame(frame: &[u8]) -> DecodedDelete {
    assert_eq!(op_code_of(frame), OpCode::Delete);
    let mut cursor = IoCursor::new(&frame[HEADER_LENGTH as usize..]);
    let _zero = cursor.read_i32::<LittleEndian>().unwrap();
    let namespace = read_cstring(&mut cursor);
    let flags = cursor.read_i32::<LittleEndian>().unwrap();
    let selector = bson::decode_document(&mut cursor).unwrap();
    DecodedDelete {
        namespace,
        flags,
        selector,
    }
}

/// Encodes a legacy `OP_REPLY` frame carrying `docs`, correlated to
/// `response_to`.
pub fn encode_reply_frame(response_to: i32, cursor_id: i64, docs: &[Document]) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_i32::<LittleEndian>(0).unwrap(); // flags
    body.write_i64::<LittleEndian>(cursor_id).unwrap();
    body.write_i32::<LittleEndian>(0).unwrap(); // starting_from
    body.write_i32::<LittleEndian>(docs.len() as i32).unwrap();
    for doc in docs {
        bson::encode_document(&mut body, doc).unwrap();
    }

    let mut frame = Vec::new();
    frame
        .write_i32::<LittleEndian>(HEADER_LENGTH + body.len() as i32)
        .unwrap();
    frame.write_i32::<LittleEndian>(1).unwrap(); // server-assigned request_id, irrelevant to the client
    frame.write_i32::<LittleEndian>(response_to).unwrap();
    frame
        .write_i32::<LittleEndian>(OpCode::Reply as i32)
        .unwrap();
    frame.extend_from_slice(&body);
    frame
}

/// Starts a `Server` pointed at a freshly bound loopback listener, and spawns
/// a thread that accepts exactly one connection from it and plays out
/// `exchanges` in order.
pub fn spawn_scripted_server(exchanges: Vec<Exchange>) -> (Server, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        for exchange in exchanges {
            let frame = read_frame(&mut stream);
            let request_id = request_id_of(&frame);
            (exchange.assert_request)(&frame);
            if let Some(reply) = (exchange.build_reply)(request_id) {
                stream.write_all(&reply).unwrap();
            }
        }
    });

    let server = Server::connect("127.0.0.1", port).unwrap();
    (server, handle)
}
