//! Integration tests against a live server.
//!
//! Set `DATABASE_URL` to point at it; defaults to `postgres://localhost/postgres`.

use std::cell::{Cell, RefCell};
use std::env;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use evented_postgres::tokio::Conn;
use evented_postgres::{Error, State};
use tokio::task::LocalSet;

fn db_url() -> String {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    // Disable TLS if not specified
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    db_url
}

async fn local<F: Future>(f: F) -> F::Output {
    let local = LocalSet::new();
    tokio::time::timeout(Duration::from_secs(30), local.run_until(f))
        .await
        .expect("test timed out")
}

async fn connected() -> Conn {
    let conn = Conn::connect(db_url().as_str()).expect("Failed to start connecting");
    conn.connection().await.expect("Failed to connect");
    assert_eq!(conn.state(), State::Connected);
    conn
}

fn first_value(result: &evented_postgres::QueryResult) -> Option<String> {
    result.first()?.get(0).map(str::to_string)
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_and_select_one() {
    local(async {
        let conn = connected().await;
        assert!(conn.backend_pid().is_some());
        assert!(conn.server_param("server_version").is_some());

        let result = conn.send_query("SELECT 1 AS num").await.unwrap();
        assert_eq!(result.columns()[0].name, "num");
        assert_eq!(result.first().unwrap().get("num"), Some("1"));
        assert_eq!(result.command_tag(), Some("SELECT 1"));

        let result = conn.send_query("select 1;").await.unwrap();
        assert_eq!(result.first().unwrap().get("?column?"), Some("1"));
        assert_eq!(conn.state(), State::Connected);

        conn.close();
        assert_eq!(conn.state(), State::Closed);
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_connection_refused() {
    local(async {
        let disconnected = Rc::new(Cell::new(false));
        let flag = Rc::clone(&disconnected);
        let conn = Conn::builder()
            .on_disconnect(move || flag.set(true))
            .connect("postgres://postgres@127.0.0.1:1/postgres?sslmode=disable")
            .unwrap();

        let err = conn.connection().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionRefused { .. }), "{err:?}");
        assert_eq!(conn.state(), State::ConnectionRefused);
        assert!(!disconnected.get());

        let late = conn.send_query("SELECT 1").await.unwrap_err();
        assert!(matches!(
            late,
            Error::BadState {
                state: State::ConnectionRefused
            }
        ));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_unknown_database_is_refused() {
    local(async {
        let mut url = url::Url::parse(&db_url()).unwrap();
        url.set_path("/evented_postgres_no_such_database");
        let conn = Conn::connect(url.as_str()).unwrap();

        match conn.connection().await {
            Err(Error::ConnectionRefused { message }) => {
                assert!(message.contains("does not exist"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_submit_while_connecting() {
    local(async {
        let conn = Conn::connect(db_url().as_str()).unwrap();
        assert_eq!(conn.state(), State::Connecting);

        let err = conn.send_query("SELECT 1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::BadState {
                state: State::Connecting
            }
        ));

        conn.connection().await.unwrap();
        assert!(conn.send_query("SELECT 1").await.is_ok());
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_queries_complete_in_order() {
    local(async {
        let conn = connected().await;
        let order = Rc::new(RefCell::new(Vec::new()));

        let deferreds: Vec<_> = (0..100)
            .map(|i| {
                let deferred = conn.send_query(format!("SELECT {i}"));
                let order = Rc::clone(&order);
                deferred.callback(move |_| order.borrow_mut().push(i));
                deferred
            })
            .collect();

        let mut sum = 0;
        for deferred in deferreds {
            let result = deferred.await.unwrap();
            sum += first_value(&result).unwrap().parse::<i32>().unwrap();
        }
        assert_eq!(sum, 4950);
        assert_eq!(*order.borrow(), (0..100).collect::<Vec<_>>());
        assert_eq!(conn.state(), State::Connected);
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_syntax_error_does_not_block_queue() {
    local(async {
        let conn = connected().await;

        let bad = conn.send_query("SELEC 1");
        let good = conn.send_query("SELECT 2");

        let err = bad.await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(err.sqlstate(), Some("42601"));

        let result = good.await.unwrap();
        assert_eq!(first_value(&result).as_deref(), Some("2"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_query_params() {
    local(async {
        let conn = connected().await;

        let result = conn
            .send_query_params(
                "SELECT $1::int + 1, $2::text IS NULL",
                vec![Some("41".into()), None],
            )
            .await
            .unwrap();
        let row = result.first().unwrap();
        assert_eq!(row.get(0), Some("42"));
        assert_eq!(row.get(1), Some("t"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_prepare_execute_describe() {
    local(async {
        let conn = connected().await;

        conn.send_prepare("add_one", "SELECT $1::int + 1 AS next", Vec::new())
            .await
            .unwrap();

        let result = conn
            .send_query_prepared("add_one", vec![Some("9".into())])
            .await
            .unwrap();
        assert_eq!(result.first().unwrap().get("next"), Some("10"));

        let described = conn.send_describe_prepared("add_one").await.unwrap();
        assert_eq!(described.param_oids(), &[23]);
        assert_eq!(described.columns().len(), 1);
        assert_eq!(described.columns()[0].name, "next");
        assert!(described.is_empty());

        let missing = conn.send_query_prepared("no_such_statement", Vec::new());
        assert_eq!(missing.await.unwrap_err().sqlstate(), Some("26000"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_describe_missing_portal() {
    local(async {
        let conn = connected().await;

        let err = conn.send_describe_portal("no_such_portal").await.unwrap_err();
        assert_eq!(err.sqlstate(), Some("34000"));
        assert!(conn.send_query("SELECT 1").await.is_ok());
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_callback_submits_follow_up() {
    local(async {
        let conn = connected().await;
        let follow_up = Rc::new(RefCell::new(None));

        let first = conn.send_query("SELECT 1");
        {
            let conn = conn.clone();
            let follow_up = Rc::clone(&follow_up);
            first.callback(move |_| {
                *follow_up.borrow_mut() = Some(conn.send_query("SELECT 2"));
            });
        }
        first.await.unwrap();

        let second = follow_up.borrow_mut().take().unwrap();
        let result = second.await.unwrap();
        assert_eq!(first_value(&result).as_deref(), Some("2"));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_close_fails_pending_queries() {
    local(async {
        let conn = connected().await;

        let running = conn.send_query("SELECT pg_sleep(1)");
        let queued = conn.send_query("SELECT 1");
        conn.close();

        assert!(matches!(running.await, Err(Error::Closed)));
        assert!(matches!(queued.await, Err(Error::Closed)));
        assert_eq!(conn.state(), State::Closed);
        assert!(matches!(
            conn.send_query("SELECT 1").await,
            Err(Error::BadState {
                state: State::Closed
            })
        ));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_server_disconnect_fails_queue() {
    local(async {
        let disconnects = Rc::new(Cell::new(0));
        let counter = Rc::clone(&disconnects);
        let victim = Conn::builder()
            .on_disconnect(move || counter.set(counter.get() + 1))
            .connect(db_url().as_str())
            .unwrap();
        victim.connection().await.unwrap();
        let pid = victim.backend_pid().unwrap();

        let running = victim.send_query("SELECT pg_sleep(10)");
        let queued: Vec<_> = (0..3)
            .map(|i| victim.send_query(format!("SELECT {i}")))
            .collect();

        let killer = connected().await;
        killer
            .send_query(format!("SELECT pg_terminate_backend({pid})"))
            .await
            .unwrap();

        assert!(matches!(running.await, Err(Error::Query(_) | Error::Disconnect)));
        for deferred in queued {
            assert!(matches!(deferred.await, Err(Error::Disconnect)));
        }
        assert_eq!(victim.state(), State::Disconnected);
        assert_eq!(disconnects.get(), 1);

        victim.unbind("already gone");
        assert_eq!(disconnects.get(), 1);
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_last_handle_dropped_in_callback() {
    local(async {
        let conn = connected().await;

        let first = conn.send_query("SELECT pg_sleep(0.1)");
        let queued = conn.send_query("SELECT 1");
        first.callback(move |_| {
            let _last = conn;
        });

        first.await.unwrap();
        assert!(matches!(queued.await, Err(Error::Closed)));
    })
    .await;
}

#[tokio::test(flavor = "current_thread")]
async fn test_drop_closes_connection() {
    local(async {
        let conn = connected().await;
        let running = conn.send_query("SELECT pg_sleep(1)");
        let queued = conn.send_query("SELECT 1");
        drop(conn);

        assert!(matches!(running.await, Err(Error::Closed)));
        assert!(matches!(queued.await, Err(Error::Closed)));
    })
    .await;
}
