//! SQL batches against the mock server: rows, result sets, server
//! messages, errors and timeouts.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use bytes::BytesMut;
use common::{config_for, connect};
use rust_decimal::Decimal;
use tdslink::{
    CatalogEntry, CatalogVisibilityFilter, Done, DoneStatus, Error, ServerMessage, Session, SqlValue, TimeoutConfig,
};
use tdslink_protocol::TokenType;
use tdslink_testing::{MockColumn, MockResponse, MockTdsServer};

fn people() -> MockResponse {
    MockResponse::rows(
        vec![
            MockColumn::int("id"),
            MockColumn::nvarchar("name", 50),
            MockColumn::decimal("balance", 10, 2),
            MockColumn::bit("active"),
            MockColumn::varchar("city", 40),
        ],
        vec![
            vec![
                SqlValue::Int(1),
                SqlValue::String("Zoë".into()),
                SqlValue::Decimal(Decimal::new(12_345, 2)),
                SqlValue::Bool(true),
                SqlValue::String("Köln".into()),
            ],
            vec![
                SqlValue::Int(2),
                SqlValue::String("Bob".into()),
                SqlValue::Null,
                SqlValue::Bool(false),
                SqlValue::Null,
            ],
        ],
    )
}

#[tokio::test]
async fn test_query_typed_rows() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM people", people())
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let rows = session.query("SELECT * FROM people").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].columns()[1].name, "name");
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 1);
    assert_eq!(rows[0].get_by_name::<String>("NAME").unwrap(), "Zoë");
    assert_eq!(rows[0].get::<Decimal>(2).unwrap(), Decimal::new(12_345, 2));
    assert!(rows[0].get::<bool>(3).unwrap());
    assert_eq!(rows[0].get::<String>(4).unwrap(), "Köln");
    assert_eq!(rows[1].get::<Option<Decimal>>(2).unwrap(), None);
    assert_eq!(rows[1].try_get::<String>(4), None);
}

#[tokio::test]
async fn test_streaming_rows_and_counts() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM people", people())
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let mut result = session.execute_batch("SELECT * FROM people").await.unwrap();
    assert!(result.has_result_set());
    assert_eq!(result.columns().len(), 5);
    let mut ids = Vec::new();
    while let Some(row) = result.next_row().await.unwrap() {
        ids.push(row.get::<i32>(0).unwrap());
    }
    assert_eq!(ids, vec![1, 2]);
    assert!(!result.next_result().await.unwrap());
    assert!(result.is_complete());
    assert_eq!(result.rows_affected(), 2);
}

#[tokio::test]
async fn test_multiple_result_sets() {
    let server = MockTdsServer::builder()
        .with_response(
            "EXEC report",
            MockResponse::Multi(vec![
                MockResponse::rows(vec![MockColumn::int("a")], vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]),
                MockResponse::affected(7),
                MockResponse::rows(vec![MockColumn::nvarchar("b", 10)], vec![vec![SqlValue::String("x".into())]]),
            ]),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let mut result = session.execute_batch("EXEC report").await.unwrap();
    assert_eq!(result.columns()[0].name, "a");
    assert_eq!(result.next_row().await.unwrap().unwrap().get::<i32>(0).unwrap(), 1);

    // Skips the unread row and the count-only statement.
    assert!(result.next_result().await.unwrap());
    assert_eq!(result.columns()[0].name, "b");
    let row = result.next_row().await.unwrap().unwrap();
    assert_eq!(row.get::<String>(0).unwrap(), "x");
    assert!(result.next_row().await.unwrap().is_none());
    assert!(!result.next_result().await.unwrap());
    assert_eq!(result.rows_affected(), 2 + 7 + 1);
}

#[tokio::test]
async fn test_execute_returns_rows_affected() {
    let server = MockTdsServer::builder()
        .with_response("UPDATE t SET x = 1", MockResponse::affected(42))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;
    assert_eq!(session.execute("UPDATE t SET x = 1").await.unwrap(), 42);
}

#[tokio::test]
async fn test_info_messages_are_collected() {
    let server = MockTdsServer::builder()
        .with_response(
            "USE inventory",
            MockResponse::affected(0).with_info(5701, "Changed database context to 'inventory'."),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let result = session.execute_batch("USE inventory").await.unwrap();
    assert!(!result.has_result_set());
    assert_eq!(result.messages().len(), 1);
    assert_eq!(result.messages()[0].number, 5701);
    assert_eq!(result.finish().await.unwrap(), 0);
}

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM nowhere", MockResponse::error(208, "Invalid object name 'nowhere'."))
        .with_response("SELECT 1", MockResponse::scalar(1i32))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.query("SELECT * FROM nowhere").await.unwrap_err();
    match &err {
        Error::Server { number, class, message, .. } => {
            assert_eq!(*number, 208);
            assert_eq!(*class, 16);
            assert!(message.contains("nowhere"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(err.is_server_error(208));
    assert!(!err.is_fatal());
    assert!(!session.is_poisoned());

    let rows = session.query("SELECT 1").await.unwrap();
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 1);
}

#[tokio::test]
async fn test_server_error_reports_terminating_done() {
    let mut tokens = BytesMut::new();
    ServerMessage {
        number: 547,
        state: 0,
        class: 16,
        message: "The INSERT statement conflicted with the FOREIGN KEY constraint.".into(),
        server: "tdslink-mock".into(),
        procedure: String::new(),
        line: 1,
    }
    .encode_as(TokenType::Error, &mut tokens);
    Done::new(Some(0)).with_error().encode(&mut tokens);
    let server = MockTdsServer::builder()
        .with_response("INSERT INTO orders VALUES (99)", MockResponse::Raw(tokens.freeze()))
        .with_response("SELECT 1", MockResponse::scalar(1i32))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute("INSERT INTO orders VALUES (99)").await.unwrap_err();
    let Error::Server {
        number,
        done,
        rows_affected,
        ..
    } = &err
    else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(*number, 547);
    let done = done.unwrap();
    assert!(done.has_error());
    assert!(done.status.contains(DoneStatus::COUNT));
    assert_eq!(done.rows_affected(), Some(0));
    assert_eq!(*rows_affected, 0);

    assert!(!session.is_poisoned());
    assert_eq!(session.query("SELECT 1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_error_keeps_counts_of_other_statements() {
    let server = MockTdsServer::builder()
        .with_response(
            "EXEC load",
            MockResponse::Multi(vec![
                MockResponse::affected(4),
                MockResponse::error(2627, "Violation of PRIMARY KEY constraint."),
                MockResponse::affected(3),
            ]),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let err = session.execute_batch("EXEC load").await.unwrap_err();
    let Error::Server {
        number,
        done,
        rows_affected,
        ..
    } = &err
    else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(*number, 2627);
    let done = done.unwrap();
    assert!(done.has_error());
    assert!(done.has_more());
    assert_eq!(*rows_affected, 7);
}

#[tokio::test]
async fn test_dropped_result_is_drained() {
    let server = MockTdsServer::builder()
        .with_response("SELECT * FROM people", people())
        .with_response("SELECT 2", MockResponse::scalar(2i32))
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    {
        let mut result = session.execute_batch("SELECT * FROM people").await.unwrap();
        result.next_row().await.unwrap().unwrap();
    }
    let rows = session.query("SELECT 2").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 2);
}

#[tokio::test]
async fn test_command_timeout_poisons_session() {
    let server = MockTdsServer::builder()
        .with_response("WAITFOR DELAY '01:00'", MockResponse::Hang)
        .build()
        .await
        .unwrap();
    let config = config_for(&server).timeouts(TimeoutConfig::new().command_timeout(Duration::from_millis(200)));
    let mut session = Session::connect(config).await.unwrap();

    let err = session.execute("WAITFOR DELAY '01:00'").await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout), "{err:?}");
    assert!(err.is_transient());
    assert!(session.is_poisoned());

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, Error::SessionPoisoned), "{err:?}");
}

#[tokio::test]
async fn test_slow_response_within_timeout() {
    let server = MockTdsServer::builder()
        .with_response(
            "SELECT 3",
            MockResponse::Delay(Duration::from_millis(50), Box::new(MockResponse::scalar(3i32))),
        )
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;
    let rows = session.query("SELECT 3").await.unwrap();
    assert_eq!(rows[0].get::<i32>(0).unwrap(), 3);
}

#[tokio::test]
async fn test_server_disconnect_poisons_session() {
    let server = MockTdsServer::builder()
        .with_response("SHUTDOWN", MockResponse::Disconnect)
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;
    let err = session.execute("SHUTDOWN").await.unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert!(session.is_poisoned());
}

#[tokio::test]
async fn test_discover_tables_applies_filter() {
    let server = MockTdsServer::builder()
        .with_table("dbo", "orders", 0)
        .with_table("dbo", "customers", 0)
        .with_table("sales", "invoices", 0)
        .with_table("salesarchive", "orders_2019", 0)
        .build()
        .await
        .unwrap();
    let mut session = connect(&server).await;

    let all = session.discover_tables(&CatalogVisibilityFilter::new()).await.unwrap();
    assert_eq!(all.len(), 4);

    let dbo = CatalogVisibilityFilter::new().with_schema_filter("^dbo$").unwrap();
    assert_eq!(
        session.discover_tables(&dbo).await.unwrap(),
        vec![CatalogEntry::new("dbo", "customers"), CatalogEntry::new("dbo", "orders")]
    );

    let orders = CatalogVisibilityFilter::new()
        .with_schema_filter("SALES")
        .unwrap()
        .with_table_filter("order")
        .unwrap();
    assert_eq!(
        session.discover_tables(&orders).await.unwrap(),
        vec![CatalogEntry::new("salesarchive", "orders_2019")]
    );
}
