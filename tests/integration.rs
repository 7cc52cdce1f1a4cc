//! End-to-end scenarios against a live Tarantool instance.
//!
//! These are gated behind `#[ignore]` because they require
//! `TARANTOOL_LISTEN_UNIX_PATH` (or a server on `127.0.0.1:3301`) and a
//! `tester` space with format `[{id: unsigned}, {name: string}]`; see the
//! harness notes above each test for the server-side setup it expects.

use std::time::Duration;
use tarantool_client::{
    Config, Connection, IndexRef, IsolationLevel, IteratorArg, IteratorType, SpaceRef, TupleArg, Value,
};

fn test_config() -> Config {
    let host = std::env::var("TARANTOOL_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let port: u16 = std::env::var("TARANTOOL_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3301);
    Config::tcp(host, port)
        .with_credentials("guest", "")
        .with_connect_timeout(Duration::from_secs(5))
        .with_request_timeout(Some(Duration::from_secs(5)))
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance on 127.0.0.1:3301"]
async fn ping_succeeds_against_a_fresh_connection() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();
    connection.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance with a `tester` space"]
async fn insert_then_select_round_trips_a_tuple() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();

    connection
        .insert(
            SpaceRef::Name("tester".into()),
            TupleArg::Positional(vec![Value::UInt(1), Value::from("hello")]),
        )
        .await
        .unwrap();

    let rows = connection
        .select(
            SpaceRef::Name("tester".into()),
            IndexRef::Name("primary".into()),
            TupleArg::Positional(vec![Value::UInt(1)]),
            None,
            None,
            IteratorArg::Type(IteratorType::Eq),
        )
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::UInt(1));
    assert_eq!(rows[0].get_named("name").unwrap(), Some(&Value::from("hello")));
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance with a `tester` space"]
async fn update_by_field_name_matches_update_by_position() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();

    connection
        .insert(
            SpaceRef::Name("tester".into()),
            TupleArg::Positional(vec![Value::UInt(2), Value::from("hello")]),
        )
        .await
        .unwrap();

    let by_name = connection
        .update(
            SpaceRef::Name("tester".into()),
            IndexRef::Name("primary".into()),
            TupleArg::Positional(vec![Value::UInt(2)]),
            vec![Value::Array(vec![Value::from("="), Value::from("name"), Value::from("hi!")])],
        )
        .await
        .unwrap();

    assert_eq!(by_name.get_named("name").unwrap(), Some(&Value::from("hi!")));
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance with a push-emitting stored function"]
async fn call_with_push_yields_pushes_then_the_final_result() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();

    let (result, mut pushes) = connection
        .call_with_push("push_then_return", vec![], 16)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(item) = pushes.next().await {
        seen.push(item.unwrap());
    }

    assert_eq!(
        seen,
        (1..=5).map(|i| Value::from(format!("hello_{i}"))).collect::<Vec<_>>()
    );
    assert_eq!(result, vec![Value::from("ret")]);
}

#[tokio::test]
#[ignore = "requires a Tarantool instance that can be stopped/restarted out of band"]
async fn reconnects_after_the_server_restarts() {
    let config = test_config().with_reconnect_timeout(Some(Duration::from_millis(100)));
    let connection = Connection::new(config);
    connection.connect().await.unwrap();

    eprintln!("stop the server now, then restart it within ~1s");
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    connection.ping().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance"]
async fn schema_auto_refetch_observes_a_strictly_greater_version() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();
    let before = connection.schema().version;

    connection
        .eval(
            "box.schema.space.create('scratch_space_for_tests'); return nil",
            vec![],
        )
        .await
        .unwrap();
    connection.refetch_schema().await.unwrap();

    assert!(connection.schema().version > before);

    connection
        .eval("box.space.scratch_space_for_tests:drop(); return nil", vec![])
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance with a `tester` space"]
async fn stream_transaction_isolates_writes_until_commit() {
    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();

    let stream = tarantool_client::Stream::new(connection.clone(), connection.new_stream_id());
    let txn = stream.begin(IsolationLevel::Default, None).await.unwrap();

    stream
        .insert(
            SpaceRef::Name("tester".into()),
            TupleArg::Positional(vec![Value::UInt(3), Value::from("in_txn")]),
        )
        .await
        .unwrap();

    let seen_outside = connection
        .select(
            SpaceRef::Name("tester".into()),
            IndexRef::Name("primary".into()),
            TupleArg::Positional(vec![Value::UInt(3)]),
            None,
            None,
            IteratorArg::Type(IteratorType::Eq),
        )
        .await
        .unwrap();
    assert!(seen_outside.is_empty());

    txn.commit().await.unwrap();

    let seen_after_commit = connection
        .select(
            SpaceRef::Name("tester".into()),
            IndexRef::Name("primary".into()),
            TupleArg::Positional(vec![Value::UInt(3)]),
            None,
            None,
            IteratorArg::Type(IteratorType::Eq),
        )
        .await
        .unwrap();
    assert_eq!(seen_after_commit.len(), 1);
}

#[tokio::test]
#[ignore = "requires a live Tarantool instance with decimal support"]
async fn decimal_values_round_trip_through_a_replace() {
    use std::str::FromStr;

    let connection = Connection::new(test_config());
    connection.connect().await.unwrap();

    for raw in ["-12.345", "0.000", "1e33", "99999999999999999999999999999999999999"] {
        let decimal = bigdecimal::BigDecimal::from_str(raw).unwrap();
        connection
            .replace(
                SpaceRef::Name("decimals".into()),
                TupleArg::Positional(vec![Value::UInt(1), Value::Decimal(decimal.clone())]),
            )
            .await
            .unwrap();

        let rows = connection
            .select(
                SpaceRef::Name("decimals".into()),
                IndexRef::Id(0),
                TupleArg::Positional(vec![Value::UInt(1)]),
                None,
                None,
                IteratorArg::Type(IteratorType::Eq),
            )
            .await
            .unwrap();

        match &rows[0][1] {
            Value::Decimal(d) => assert_eq!(d, &decimal),
            other => panic!("expected a decimal, got {other:?}"),
        }
    }
}
