//! End-to-end scenarios for `count()` and `distinct()`: command shape and
//! reply parsing for each.

mod support;

use std::sync::Arc;

use bson::{doc, Bson};

use docwire::Database;

#[test]
fn count_sends_query_skip_limit_and_parses_n() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.namespace, "db.$cmd");
            assert_eq!(decoded.query.get_str("count").unwrap(), "users");
            assert_eq!(decoded.query.get_document("query").unwrap(), &doc! {"x": 1});
            assert_eq!(decoded.query.get_i64("skip").unwrap(), 5);
            assert_eq!(decoded.query.get_i64("limit").unwrap(), 20);
        },
        |request_id| {
            Some(support::encode_reply_frame(
                request_id,
                0,
                &[doc! {"ok": 1.0, "n": 7i64}],
            ))
        },
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    let n = collection
        .count(Some(doc! {"x": 1}), Some(20), Some(5))
        .unwrap();
    assert_eq!(n, 7);

    handle.join().unwrap();
}

#[test]
fn distinct_sends_key_and_query_and_parses_values() {
    let (server, handle) = support::spawn_scripted_server(vec![support::expect(
        |frame| {
            let decoded = support::decode_query_frame(frame);
            assert_eq!(decoded.query.get_str("distinct").unwrap(), "users");
            assert_eq!(decoded.query.get_str("key").unwrap(), "status");
            assert_eq!(decoded.query.get_document("query").unwrap(), &doc! {"x": 1});
        },
        |request_id| {
            let values = Bson::Array(vec![Bson::String("a".to_owned()), Bson::String("b".to_owned())]);
            let mut reply = doc! {"ok": 1.0};
            reply.insert("values", values);
            Some(support::encode_reply_frame(request_id, 0, &[reply]))
        },
    )]);

    server.note_max_wire_version(3);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    let values = collection.distinct("status", Some(doc! {"x": 1})).unwrap();
    assert_eq!(
        values,
        vec![Bson::String("a".to_owned()), Bson::String("b".to_owned())]
    );

    handle.join().unwrap();
}
