//! End-to-end scenario: a peer at or above the `find` command's minimum wire
//! version uses the modern command, and draining its cursor issues exactly
//! one `GetMore`.

mod support;

use std::sync::Arc;

use bson::{doc, Bson, Document};

use docwire::Database;

#[test]
fn find_at_or_above_command_threshold_uses_find_command_and_drains_via_get_more() {
    let exchanges = vec![
        support::expect(
            |frame| {
                let decoded = support::decode_query_frame(frame);
                assert_eq!(decoded.namespace, "db.$cmd");
                assert_eq!(decoded.query.get_str("find").unwrap(), "users");
                assert_eq!(decoded.query.get_document("filter").unwrap(), &doc! {"x": 1});
                assert_eq!(decoded.query.get_i32("limit").unwrap(), 5);
                assert_eq!(decoded.query.get_i32("batchSize").unwrap(), 10);
            },
            |request_id| {
                let mut cursor_doc = Document::new();
                cursor_doc.insert("id", 42i64);
                cursor_doc.insert("ns", "db.users");
                cursor_doc.insert(
                    "firstBatch",
                    Bson::Array(vec![
                        Bson::Document(doc! {"a": 1}),
                        Bson::Document(doc! {"a": 2}),
                    ]),
                );
                let mut reply = Document::new();
                reply.insert("ok", 1.0);
                reply.insert("cursor", cursor_doc);
                Some(support::encode_reply_frame(request_id, 0, &[reply]))
            },
        ),
        support::expect(
            |frame| {
                let decoded = support::decode_get_more_frame(frame);
                assert_eq!(decoded.namespace, "db.users");
                assert_eq!(decoded.cursor_id, 42);
                assert_eq!(decoded.number_to_return, 10);
            },
            |request_id| {
                Some(support::encode_reply_frame(
                    request_id,
                    0,
                    &[doc! {"a": 3}],
                ))
            },
        ),
    ];

    let (server, handle) = support::spawn_scripted_server(exchanges);
    server.note_max_wire_version(4);
    let server = Arc::new(server);
    let db = Database::new(server, "db");
    let collection = db.collection("users");

    let cursor = collection
        .find(doc! {"x": 1}, None, None, None, Some(5), Some(10))
        .unwrap();
    let results: Vec<_> = cursor.collect::<Result<Vec<_>, _>>().unwrap();

    assert_eq!(results, vec![doc! {"a": 1}, doc! {"a": 2}, doc! {"a": 3}]);

    handle.join().unwrap();
}
