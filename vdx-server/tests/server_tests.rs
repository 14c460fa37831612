//! End-to-end tests: real sockets, the blocking client and both stores

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use vdx::{
    Channel, Client, Column, Measurement, MemoryDatabase, MemoryStoreFactory, Rank, SourceConfig,
    SourcePool, StoreFactory,
};
use vdx_server::{serve_metrics, CsvStoreFactory, Server, ServerConfig};

struct TestServer {
    addr: SocketAddr,
    pool: SourcePool,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<vdx_server::Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig, factory: Arc<dyn StoreFactory>) -> Self {
        let server = Server::new(config, factory).unwrap();
        let pool = server.pool().clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(server.serve(listener, rx));
        Self {
            addr,
            pool,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

/// Run blocking client code off the runtime threads
async fn blocking<T, F>(f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

fn tilt_factory() -> MemoryStoreFactory {
    let factory = MemoryStoreFactory::new();
    let mut db = MemoryDatabase::new(vec![Column::float("east"), Column::float("north")])
        .with_channel(Channel::new(1, "UWE", "Uwekahuna").with_location(-155.29, 19.42, 1240.0))
        .with_channel(Channel::new(2, "SDH", "Sand Hill"))
        .with_rank(Rank::new(1, "DEFAULT", 1, true))
        .with_rank(Rank::new(2, "FINAL", 2, false));
    db.insert(Measurement::new(100.0, 1, 1, vec![1.0, 1.0]));
    db.insert(Measurement::new(100.0, 2, 1, vec![2.0, 2.0]));
    for i in 0..20 {
        db.insert(Measurement::new(1000.0 + i as f64 * 60.0, 1, 2, vec![i as f64, 0.0]));
    }
    factory.insert_database("tilt", db);
    factory
}

fn tilt_config() -> ServerConfig {
    ServerConfig {
        sources: vec![
            SourceConfig::new("tilt", "tilt").with_description("Tilt"),
            SourceConfig::new("tilt_small", "tilt")
                .with_description("Tilt, capped")
                .with_database("tilt")
                .with_maxrows(10),
        ],
        ..ServerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_version_and_menu() {
    let server = TestServer::start(tilt_config(), Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut client = Client::connect(addr).unwrap();
        let version = client.version().unwrap();
        assert_eq!(version.param("protocol"), Some("1"));
        assert_eq!(version.param("version"), Some(vdx::VERSION));

        let menu = client.menu().unwrap();
        assert_eq!(
            menu.lines,
            vec![
                "source=tilt; description=Tilt; type=tilt;".to_string(),
                "source=tilt_small; description=Tilt, capped; type=tilt;".to_string(),
            ]
        );
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getdata_catalogues_and_data() {
    let server = TestServer::start(tilt_config(), Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut client = Client::connect(addr).unwrap();

        let channels = client
            .get_data(&[("source", "tilt"), ("action", "channels")])
            .unwrap();
        assert_eq!(
            channels.lines,
            vec!["1:UWE:Uwekahuna:-155.29:19.42:1240", "2:SDH:Sand Hill:::"]
        );

        let ranks = client.get_data(&[("source", "tilt"), ("action", "ranks")]).unwrap();
        assert_eq!(ranks.lines, vec!["1:DEFAULT:1:1", "2:FINAL:2:0"]);

        let data = client
            .get_data(&[
                ("source", "tilt"),
                ("action", "data"),
                ("st", "0"),
                ("et", "500"),
                ("ch", "1"),
            ])
            .unwrap();
        assert!(data.is_ok());
        assert_eq!(data.param("rows"), Some("1"));
        assert_eq!(data.param("channels"), Some("1"));
        assert_eq!(data.param("columns"), Some("time,rank,east,north"));
        assert_eq!(data.matrices.len(), 1);
        assert_eq!(data.matrices[0].get(0, 0), 100.0);
        assert_eq!(data.matrices[0].get(0, 1), 2.0);
        assert_eq!(data.matrices[0].columns()[2].name, "east");

        let both = client
            .get_data(&[
                ("source", "tilt"),
                ("action", "data"),
                ("st", "0"),
                ("et", "5000"),
                ("ch", "2,1"),
                ("ds", "MEAN"),
                ("dsInt", "600"),
            ])
            .unwrap();
        assert_eq!(both.param("channels"), Some("2,1"));
        assert_eq!(both.matrices.len(), 2);
        // 1000..=2140 falls into buckets 1, 2 and 3 of 600 s
        assert_eq!(both.matrices[0].rows(), 3);
        assert_eq!(both.matrices[1].rows(), 1);
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_errors_keep_connection_open() {
    let server = TestServer::start(tilt_config(), Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut client = Client::connect(addr).unwrap();

        let unknown = client.send_line("launch: now=1").unwrap();
        assert_eq!(unknown.error_message(), Some("unknown command 'launch'"));

        let missing = client.get_data(&[("source", "tilt")]).unwrap();
        assert_eq!(
            missing.error_message(),
            Some("missing required parameter 'action'")
        );

        let no_source = client
            .get_data(&[("source", "gps"), ("action", "ranks")])
            .unwrap();
        assert_eq!(no_source.error_message(), Some("unknown source 'gps'"));

        let limited = client
            .get_data(&[
                ("source", "tilt_small"),
                ("action", "data"),
                ("st", "0"),
                ("et", "5000"),
                ("ch", "2"),
            ])
            .unwrap();
        let message = limited.error_message().unwrap();
        assert!(message.contains("limit of 10 rows"), "{}", message);
        assert!(message.contains("20 rows"), "{}", message);

        let downsampled = client
            .get_data(&[
                ("source", "tilt_small"),
                ("action", "data"),
                ("st", "0"),
                ("et", "5000"),
                ("ch", "2"),
                ("ds", "DECIMATE"),
                ("dsInt", "2"),
            ])
            .unwrap();
        assert_eq!(downsampled.param("rows"), Some("10"));

        // blank lines are skipped, the next command still answers
        let version = client.send_line("\r\n\nversion").unwrap();
        assert!(version.is_ok());
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_busy_server_rejects() {
    let config = ServerConfig {
        max_connections: 1,
        ..tilt_config()
    };
    let server = TestServer::start(config, Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut first = Client::connect(addr).unwrap();
        assert!(first.version().unwrap().is_ok());

        let mut second = Client::connect(addr).unwrap();
        second.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let refused = second.read_reply().unwrap();
        assert_eq!(
            refused.error_message(),
            Some("server busy (max 1 connections)")
        );

        drop(first);
        let mut retries = 0;
        loop {
            let mut third = Client::connect(addr).unwrap();
            third.set_timeout(Some(Duration::from_secs(5))).unwrap();
            if third.version().map(|r| r.is_ok()).unwrap_or(false) {
                break;
            }
            retries += 1;
            assert!(retries < 50, "permit never released");
            std::thread::sleep(Duration::from_millis(20));
        }
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_busy_reply_reaches_clients_that_already_sent() {
    let config = ServerConfig {
        max_connections: 1,
        ..tilt_config()
    };
    let server = TestServer::start(config, Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut first = Client::connect(addr).unwrap();
        assert!(first.version().unwrap().is_ok());

        let line = format!("version: pad={}", "x".repeat(2000));
        for _ in 0..50 {
            let mut eager = Client::connect(addr).unwrap();
            eager.set_timeout(Some(Duration::from_secs(5))).unwrap();
            let refused = eager.send_line(&line).unwrap();
            assert_eq!(
                refused.error_message(),
                Some("server busy (max 1 connections)")
            );
        }
        assert!(first.version().unwrap().is_ok());
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_line_too_long_closes_connection() {
    let config = ServerConfig {
        max_line_bytes: 64,
        ..tilt_config()
    };
    let server = TestServer::start(config, Arc::new(tilt_factory())).await;
    let addr = server.addr;

    blocking(move || {
        let mut client = Client::connect(addr).unwrap();
        client.set_timeout(Some(Duration::from_secs(5))).unwrap();
        let line = format!("getdata: source={}", "x".repeat(200));
        let reply = client.send_line(&line).unwrap();
        assert_eq!(reply.error_message(), Some("command line exceeds 64 bytes"));
        assert!(client.read_reply().is_err());
    })
    .await;

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_clients_do_not_interleave() {
    let factory = tilt_factory();
    let server = TestServer::start(tilt_config(), Arc::new(factory)).await;
    let addr = server.addr;

    let clients: Vec<_> = (0..8)
        .map(|i| {
            tokio::task::spawn_blocking(move || {
                let mut client = Client::connect(addr).unwrap();
                for round in 0..20 {
                    if (i + round) % 2 == 0 {
                        let reply = client
                            .get_data(&[
                                ("source", "tilt"),
                                ("action", "data"),
                                ("st", "0"),
                                ("et", "5000"),
                                ("ch", "2"),
                            ])
                            .unwrap();
                        assert_eq!(reply.param("rows"), Some("20"));
                        assert_eq!(reply.matrices[0].rows(), 20);
                    } else {
                        let reply = client.menu().unwrap();
                        assert_eq!(reply.lines.len(), 2);
                    }
                }
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }

    let stats = server.pool.stats();
    assert_eq!(stats.outstanding(), 0);
    assert!(stats.created <= 8);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_csv_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let factory = CsvStoreFactory::new(dir.path());
    let mut db = MemoryDatabase::new(vec![Column::float("rsam")])
        .with_channel(Channel::new(7, "NPT", "Namakanipaio"))
        .with_rank(Rank::new(1, "RAW", 1, true));
    for i in 0..10 {
        db.insert(Measurement::new(i as f64 * 10.0, 1, 7, vec![i as f64 * 0.5]));
    }
    factory.import("rsam", &db).unwrap();

    let mut config = ServerConfig {
        sources: vec![
            SourceConfig::new("rsam", "rsam"),
            SourceConfig::new("gps", "gps"),
        ],
        ..ServerConfig::default()
    };
    config.store.prefix = dir.path().to_path_buf();
    let server = TestServer::start(config, Arc::new(factory)).await;
    let addr = server.addr;

    blocking(move || {
        let mut client = Client::connect(addr).unwrap();
        let data = client
            .get_data(&[
                ("source", "rsam"),
                ("action", "data"),
                ("st", "0"),
                ("et", "45"),
            ])
            .unwrap();
        assert_eq!(data.param("rows"), Some("5"));
        assert_eq!(data.matrices[0].get(4, 2), 2.0);

        // first use of an absent database creates it empty
        let channels = client.get_data(&[("source", "gps"), ("action", "channels")]).unwrap();
        assert!(channels.is_ok());
        assert!(channels.lines.is_empty());
    })
    .await;

    assert!(dir.path().join("gps").join("data.csv").is_file());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metrics_endpoint() {
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let factory = tilt_factory();
    let pool = SourcePool::new(tilt_config().sources, Arc::new(factory));
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(serve_metrics(addr, pool, rx));

    let body = blocking(move || {
        for _ in 0..50 {
            if let Ok(mut stream) = TcpStream::connect(addr) {
                stream
                    .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                    .unwrap();
                let mut body = String::new();
                stream.read_to_string(&mut body).unwrap();
                return body;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("metrics endpoint never came up");
    })
    .await;

    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("vdx_pool_handles"));

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
