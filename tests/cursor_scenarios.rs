use quill_driver::config::{DriverOptions, PrefetchConfig};
use quill_driver::cursor::CursorState;
use quill_driver::driver::{Connection, ReturnCode};
use quill_driver::error::QuillDriverError;
use quill_driver::remote::{Row, ScriptStep, ScriptedRemote};
use quill_driver::utils::scalar::ScalarValue;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn row(id: i64) -> Row {
    Row::new(vec![ScalarValue::from(id)])
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|r| r.value(0).and_then(ScalarValue::as_i64))
        .collect()
}

fn connect(remote: &Arc<ScriptedRemote>) -> Connection {
    Connection::connect(remote.clone(), DriverOptions::default())
}

#[test]
fn drains_three_pages_then_no_data_forever() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "select * from t",
        vec![
            ScriptStep::Rows(vec![row(1), row(2)]),
            ScriptStep::Rows(vec![row(3), row(4)]),
            ScriptStep::Rows(vec![row(5)]),
        ],
    ));
    let conn = connect(&remote);
    let cursor = conn.execute("select * from t").unwrap();

    let mut seen = Vec::new();
    loop {
        let result = cursor.fetch();
        match ReturnCode::of_fetch(&result) {
            ReturnCode::Ok => seen.push(result.unwrap().unwrap()),
            ReturnCode::NoData => break,
            other => panic!("unexpected return code {}", other),
        }
    }
    assert_eq!(ids(&seen), vec![1, 2, 3, 4, 5]);

    for _ in 0..3 {
        assert_eq!(ReturnCode::of_fetch(&cursor.fetch()), ReturnCode::NoData);
    }
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(remote.fetch_count(cursor.token().unwrap()), 3);
}

#[test]
fn cancel_from_another_thread_releases_blocked_fetch() {
    let remote = Arc::new(ScriptedRemote::new().with_script("long", vec![ScriptStep::Hang]));
    let conn = connect(&remote);
    let cursor = conn.execute("long").unwrap();
    let token = cursor.token().unwrap();

    let consumer = {
        let cursor = cursor.clone();
        thread::spawn(move || cursor.fetch())
    };
    thread::sleep(Duration::from_millis(30));

    let started = Instant::now();
    let canceller = {
        let cursor = cursor.clone();
        thread::spawn(move || cursor.cancel())
    };
    canceller.join().unwrap().unwrap();

    let result = consumer.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(ReturnCode::of_fetch(&result), ReturnCode::Cancelled);
    assert_eq!(remote.cancel_count(token), 1);

    // Later fetches keep reporting the cancellation.
    assert!(matches!(cursor.fetch(), Err(QuillDriverError::Cancelled)));
    cursor.close().unwrap();
    assert_eq!(remote.cancel_count(token), 1);
}

#[test]
fn cancel_before_execute_is_a_noop() {
    let remote = Arc::new(ScriptedRemote::new());
    let conn = connect(&remote);
    let cursor = conn.create_statement().unwrap();

    assert_eq!(ReturnCode::of(&cursor.cancel()), ReturnCode::Ok);
    assert_eq!(cursor.state(), CursorState::Idle);
    assert!(cursor.workers().is_empty());
    assert_eq!(remote.opened_cursors(), 0);
    assert_eq!(remote.total_cancel_count(), 0);
}

#[test]
fn cancel_after_exhaustion_is_a_noop() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "q",
        vec![ScriptStep::Rows(vec![row(1)])],
    ));
    let conn = connect(&remote);
    let cursor = conn.execute("q").unwrap();
    assert_eq!(cursor.fetch().unwrap(), Some(row(1)));
    assert_eq!(cursor.fetch().unwrap(), None);

    cursor.cancel().unwrap();
    cursor.cancel().unwrap();
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(ReturnCode::of_fetch(&cursor.fetch()), ReturnCode::NoData);
    assert_eq!(remote.total_cancel_count(), 0);
}

#[test]
fn double_cancel_notifies_remote_once() {
    let remote = Arc::new(ScriptedRemote::new().with_script("q", vec![ScriptStep::Hang]));
    let conn = connect(&remote);
    let cursor = conn.execute("q").unwrap();
    let token = cursor.token().unwrap();

    cursor.cancel().unwrap();
    cursor.cancel().unwrap();
    assert_eq!(cursor.state(), CursorState::Cancelled);
    assert_eq!(remote.cancel_count(token), 1);
}

#[test]
fn second_execute_without_close_is_a_sequence_error() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "q",
        vec![
            ScriptStep::Rows(vec![row(1)]),
            ScriptStep::Rows(vec![row(2)]),
        ],
    ));
    let conn = connect(&remote);
    let cursor = conn.execute("q").unwrap();
    let token = cursor.token().unwrap();

    let second = cursor.execute("q");
    assert_eq!(ReturnCode::of(&second), ReturnCode::SequenceError);
    assert_eq!(cursor.token(), Some(token));
    assert_eq!(remote.opened_cursors(), 1);

    // The first execution is untouched.
    assert_eq!(ids(&cursor.fetch_many(10).unwrap()), vec![1, 2]);

    cursor.close().unwrap();
    cursor.execute("q").unwrap();
    assert_ne!(cursor.token(), Some(token));
}

#[test]
fn remote_error_on_second_page_requires_close() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "q",
        vec![
            ScriptStep::Rows(vec![row(1), row(2)]),
            ScriptStep::Fail("connection reset".to_string()),
            ScriptStep::Rows(vec![row(3)]),
        ],
    ));
    let conn = connect(&remote);
    let cursor = conn.execute("q").unwrap();

    assert_eq!(cursor.fetch().unwrap(), Some(row(1)));
    assert_eq!(cursor.fetch().unwrap(), Some(row(2)));

    let failed = cursor.fetch();
    assert_eq!(
        ReturnCode::of_fetch(&failed),
        ReturnCode::RemoteError("connection reset".to_string())
    );
    assert_eq!(cursor.state(), CursorState::Failed);

    // Reported once; afterwards the cursor insists on close.
    assert_eq!(ReturnCode::of_fetch(&cursor.fetch()), ReturnCode::SequenceError);
    assert_eq!(ReturnCode::of(&cursor.execute("q")), ReturnCode::SequenceError);

    cursor.close().unwrap();
    cursor.execute("q").unwrap();
    assert_eq!(cursor.fetch().unwrap(), Some(row(1)));
}

#[test]
fn rows_arrive_in_request_order_across_many_pages() {
    let steps = (0..50)
        .map(|page| ScriptStep::Rows((page * 3..page * 3 + 3).map(row).collect()))
        .collect();
    let remote = Arc::new(ScriptedRemote::new().with_script("q", steps));
    let conn = Connection::connect(
        remote.clone(),
        DriverOptions {
            prefetch: PrefetchConfig {
                capacity: 2,
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let cursor = conn.execute("q").unwrap();

    let rows = cursor.fetch_many(usize::MAX).unwrap();
    assert_eq!(ids(&rows), (0..150).collect::<Vec<_>>());
}

#[test]
fn slow_pages_are_prefetched_while_consuming() {
    let latency = Duration::from_millis(20);
    let remote = Arc::new(ScriptedRemote::new());
    remote.set_default_script(ScriptedRemote::paged_series(8, 2, Some(latency), None));
    let conn = connect(&remote);
    let cursor = conn.execute("anything").unwrap();

    let first = cursor.fetch().unwrap();
    assert!(first.is_some());
    // While the first page is consumed slowly, the producer fetches ahead.
    thread::sleep(latency * 3);
    let token = cursor.token().unwrap();
    assert!(remote.fetch_count(token) >= 2);

    let rest = cursor.fetch_many(usize::MAX).unwrap();
    assert_eq!(rest.len(), 7);
    assert_eq!(remote.query_of(token).as_deref(), Some("anything"));
}

#[test]
fn timer_thread_cancel_during_slow_fetch() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "q",
        vec![
            ScriptStep::Rows(vec![row(1)]),
            ScriptStep::Delay(Duration::from_secs(30)),
            ScriptStep::Rows(vec![row(2)]),
        ],
    ));
    let conn = connect(&remote);
    let cursor = conn.execute("q").unwrap();
    assert_eq!(cursor.fetch().unwrap(), Some(row(1)));

    let timer = {
        let cursor = cursor.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cursor.cancel()
        })
    };
    let started = Instant::now();
    assert!(matches!(cursor.fetch(), Err(QuillDriverError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    timer.join().unwrap().unwrap();

    // Close joins the producer promptly: the remote fetch was aborted.
    let started = Instant::now();
    cursor.close().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancel_racing_natural_completion() {
    let remote = Arc::new(ScriptedRemote::new().with_script(
        "q",
        vec![
            ScriptStep::Rows(vec![row(1), row(2)]),
            ScriptStep::Rows(vec![row(3)]),
            ScriptStep::Rows(vec![row(4), row(5)]),
        ],
    ));
    let conn = connect(&remote);

    for i in 0..200 {
        let cursor = conn.execute("q").unwrap();
        let token = cursor.token().unwrap();

        let canceller = {
            let cursor = cursor.clone();
            thread::spawn(move || {
                if i % 2 == 0 {
                    thread::yield_now();
                }
                cursor.cancel().unwrap();
                if i % 3 == 0 {
                    cursor.close().unwrap();
                }
            })
        };

        let started = Instant::now();
        loop {
            match cursor.fetch() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(QuillDriverError::Cancelled | QuillDriverError::Sequence(_)) => break,
                Err(err) => panic!("iteration {}: unexpected error {}", i, err),
            }
            assert!(started.elapsed() < Duration::from_secs(5));
        }
        canceller.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        cursor.close().unwrap();
        assert!(remote.cancel_count(token) <= 1);
    }
}

#[test]
fn concurrent_cancels_notify_remote_once() {
    let remote = Arc::new(ScriptedRemote::new().with_script("q", vec![ScriptStep::Hang]));
    let conn = connect(&remote);

    for _ in 0..20 {
        let cursor = conn.execute("q").unwrap();
        let token = cursor.token().unwrap();

        let cancellers: Vec<_> = (0..4)
            .map(|_| {
                let cursor = cursor.clone();
                thread::spawn(move || cursor.cancel())
            })
            .collect();
        for canceller in cancellers {
            canceller.join().unwrap().unwrap();
        }

        assert_eq!(cursor.state(), CursorState::Cancelled);
        assert_eq!(remote.cancel_count(token), 1);
        cursor.close().unwrap();
        assert_eq!(remote.cancel_count(token), 1);
    }
}
