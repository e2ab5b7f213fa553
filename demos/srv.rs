use std::env;
use std::sync::Arc;

use docwire::{Database, Server};

fn main() {
    let args: Vec<String> = env::args().collect();
    let host = args.get(1).expect("first argument should be a host");
    let port: u16 = args
        .get(2)
        .expect("second argument should be a port")
        .parse()
        .expect("port should be a number");

    let server = Arc::new(Server::connect(host.clone(), port).expect("failed to connect"));
    let db = Database::new(server, "foo");
    let coll = db.collection("count");

    let count = coll.count(None, None, None).expect("count failed");
    assert_eq!(count, 0);

    println!("DONE!");
}
