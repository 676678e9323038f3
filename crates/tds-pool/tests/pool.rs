//! Pool tests against the mock TDS server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tds_client::{Config, SqlValue, TdsVersion};
use tds_pool::{Pool, PoolConfig, PoolError, PoolManager, TdsSessionManager};
use tds_testing::fixtures::int_column;
use tds_testing::{MockResponse, MockTdsServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn server() -> MockTdsServer {
    init_tracing();
    MockTdsServer::builder()
        .with_response(
            "select 1",
            MockResponse::rows(vec![int_column("")], vec![vec![SqlValue::Int(1)]]),
        )
        .build()
        .unwrap()
}

fn config(server: &MockTdsServer) -> Config {
    Config::new()
        .host(server.host())
        .port(server.port())
        .sql_login("sa", "")
        .database("master")
        .tds_version(TdsVersion::V7_0)
}

fn select_one(session: &mut tds_client::Session) -> i32 {
    let sets = session.query("select 1").unwrap();
    sets[0].first().unwrap().get::<i32>(0).unwrap()
}

#[test]
fn test_pool_reuses_tcp_sessions() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new().max_size(4)).unwrap();
    let cfg = config(&server);

    for _ in 0..5 {
        let mut session = manager.acquire(&cfg, Duration::from_secs(5)).unwrap();
        assert_eq!(select_one(&mut session), 1);
        manager.release(session);
    }

    assert_eq!(server.accepted_count(), 1);
    let status = manager.status(&cfg).unwrap().unwrap();
    assert_eq!(status.total, 1);
    assert_eq!(status.available, 1);
}

#[test]
fn test_reused_session_is_reset() {
    let server = server();
    let pool = Pool::new(
        TdsSessionManager::new(config(&server)),
        PoolConfig::new().max_size(1),
    )
    .unwrap();

    let mut session = pool.acquire().unwrap();
    session.run("use tempdb").unwrap();
    assert_eq!(session.database(), "tempdb");
    drop(session);

    let mut session = pool.acquire().unwrap();
    assert_eq!(session.database(), "master");
    assert_eq!(select_one(&mut session), 1);

    let last = server.recorder().messages().pop().unwrap();
    assert!(last.reset);
    assert_eq!(server.accepted_count(), 1);
}

#[test]
fn test_session_released_with_unread_reply_is_reused() {
    let server = server();
    let pool = Pool::new(
        TdsSessionManager::new(config(&server)),
        PoolConfig::new().max_size(1),
    )
    .unwrap();

    let mut session = pool.acquire().unwrap();
    session.execute("select 1").unwrap();
    drop(session);

    let mut session = pool.acquire().unwrap();
    assert_eq!(select_one(&mut session), 1);
    assert_eq!(server.accepted_count(), 1);
}

#[test]
fn test_distinct_parameters_get_distinct_pools() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new()).unwrap();

    let master = config(&server);
    let tempdb = config(&server).database("tempdb");
    let a = manager.acquire(&master, Duration::from_secs(5)).unwrap();
    let b = manager.acquire(&tempdb, Duration::from_secs(5)).unwrap();

    assert_eq!(a.database(), "master");
    assert_eq!(b.database(), "tempdb");
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_concurrent_acquire_stays_bounded() {
    const MAX: u32 = 2;

    let server = server();
    let manager = Arc::new(PoolManager::new(PoolConfig::new().max_size(MAX)).unwrap());
    let cfg = config(&server);
    let queries = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let cfg = cfg.clone();
            let queries = Arc::clone(&queries);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    let mut session = manager.acquire(&cfg, Duration::from_secs(10)).unwrap();
                    assert_eq!(select_one(&mut session), 1);
                    queries.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(queries.load(Ordering::SeqCst), 30);
    assert!(server.accepted_count() <= MAX as usize);
}

#[test]
fn test_exhausted_over_tcp() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new().max_size(1)).unwrap();
    let cfg = config(&server);

    let _held = manager.acquire(&cfg, Duration::from_secs(5)).unwrap();
    let err = manager
        .acquire(&cfg, Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, PoolError::Exhausted(_)));
    assert!(err.is_transient());
}

#[test]
fn test_reset_pool_reconnects() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new().min_size(1)).unwrap();
    let cfg = config(&server);

    drop(manager.acquire(&cfg, Duration::from_secs(5)).unwrap());
    assert_eq!(server.accepted_count(), 1);

    manager.reset_pool(&cfg).unwrap();
    let status = manager.status(&cfg).unwrap().unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.total, 1);

    let mut session = manager.acquire(&cfg, Duration::from_secs(5)).unwrap();
    assert_eq!(select_one(&mut session), 1);
    assert_eq!(server.accepted_count(), 2);
}

#[test]
fn test_packet_size_override() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new().packet_size(8192)).unwrap();
    let session = manager
        .acquire(&config(&server), Duration::from_secs(5))
        .unwrap();
    assert_eq!(session.config().packet_size, 8192);
}

#[test]
fn test_failed_login_surfaces_session_error() {
    let server = MockTdsServer::builder()
        .reject_logins("Login failed for user 'sa'.")
        .build()
        .unwrap();
    let manager = PoolManager::new(PoolConfig::new().max_size(1)).unwrap();
    let cfg = config(&server);

    let err = manager.acquire(&cfg, Duration::from_secs(5)).unwrap_err();
    match err {
        PoolError::Session(e) => assert!(e.is_server_error(18456)),
        other => panic!("expected session error, got {other:?}"),
    }
    assert_eq!(manager.status(&cfg).unwrap().unwrap().total, 0);
}

#[test]
fn test_close_all_closes_sessions() {
    let server = server();
    let manager = PoolManager::new(PoolConfig::new().min_size(2)).unwrap();
    let cfg = config(&server);
    let pool = manager.pool(&cfg).unwrap();
    assert_eq!(pool.status().available, 2);

    manager.close_all();
    assert!(manager.is_empty());
    assert!(pool.is_closed());
    assert!(matches!(pool.acquire(), Err(PoolError::Closed)));
}
