//! End-to-end scenarios for the remaining admin-style `Collection` commands:
//! `touch`, `convert_to_capped`, `re_index`, `compact`, and `modify`.

mod support;

use std::sync::Arc;

use bson::doc;

use docwire::{Database, Error};

#[test]
fn touch_sends_data_and_index_flags() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("touch").unwrap(), "users");
            assert_eq!(decoded.query.get_bool("data").unwrap(), true);
            assert_eq!(decoded.query.get_bool("index").unwrap(), false);
        },
        |request_id| Some(support::encode_reply_frame(request_id, 0, &[doc! {"ok": 1.0}])),
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    collection.touch(true, false).unwrap();

    handle.join().unwrap();
}

#[test]
fn convert_to_capped_sends_size() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("convertToCapped").unwrap(), "users");
            assert_eq!(decoded.query.get_i64("size").unwrap(), 4096);
        },
        |request_id| Some(support::encode_reply_frame(request_id, 0, &[doc! {"ok": 1.0}])),
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    collection.convert_to_capped(4096).unwrap();

    handle.join().unwrap();
}

#[test]
fn re_index_sends_bare_command() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("reIndex").unwrap(), "users");
        },
        |request_id| Some(support::encode_reply_frame(request_id, 0, &[doc! {"ok": 1.0}])),
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    collection.re_index().unwrap();

    handle.join().unwrap();
}

#[test]
fn compact_sends_force_flag_when_given() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("compact").unwrap(), "users");
            assert_eq!(decoded.query.get_bool("force").unwrap(), true);
        },
        |request_id| Some(support::encode_reply_frame(request_id, 0, &[doc! {"ok": 1.0}])),
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    collection.compact(Some(true)).unwrap();

    handle.join().unwrap();
}

#[test]
fn modify_sends_coll_mod_with_the_given_fields() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("collMod").unwrap(), "users");
            assert_eq!(decoded.query.get_i32("validationLevel").unwrap(), 1);
        },
        |request_id| Some(support::encode_reply_frame(request_id, 0, &[doc! {"ok": 1.0}])),
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    collection
        .modify(doc! {"validationLevel": 1})
        .unwrap();

    handle.join().unwrap();
}

#[test]
fn modify_rejects_a_caller_supplied_coll_mod_key_without_sending_anything() {
    let (server, handle) = support::spawn_scripted_server(vec![]);
    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    let result = collection.modify(doc! {"collMod": "users"});
    assert!(matches!(result, Err(Error::CommandError(_))));

    // Rejected before any network I/O; the accept thread is left unjoined.
    drop(handle);
}
