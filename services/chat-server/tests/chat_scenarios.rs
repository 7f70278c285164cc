//! Black-box end-to-end tests: real TCP clients talking to a server bound
//! on an ephemeral port, each against its own temp-file `SQLite` database.
//! Mirrors the donor's black-box test style (connect real clients, assert
//! on wire responses) scaled down to this service's SQLite-backed pool.

use std::time::Duration;

use chat_server::config::Config;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::TcpListener;

struct TestServer {
    addr: std::net::SocketAddr,
    _db_dir: tempfile::TempDir,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

async fn start_server() -> TestServer {
    start_server_with(Config::default()).await
}

async fn start_server_with(mut config: Config) -> TestServer {
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("chat.db");
    config.database_url = format!("sqlite:{}", db_path.display());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    config.bind_addr = addr.to_string();

    let pool = chat_server::db::create_pool(&config.database_url).await;
    chat_server::db::run_migrations(&pool).await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let handle = tokio::spawn(async move {
        let signal = async {
            let _ = shutdown_rx.await;
        };
        chat_server::run_with_listener(config, pool, listener, signal).await;
    });

    // Give the acceptor a beat to start `accept()`-ing.
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestServer {
        addr,
        _db_dir: db_dir,
        shutdown: shutdown_tx,
        handle,
    }
}

impl TestServer {
    async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

struct TestClient {
    reader: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half).lines(),
            writer,
        }
    }

    async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> Value {
        let line = tokio::time::timeout(timeout, self.reader.next_line())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed unexpectedly");
        serde_json::from_str(&line).unwrap()
    }

    /// Reads frames until one matches `predicate`, ignoring others (e.g.
    /// roster broadcasts interleaved with the frame under test).
    async fn recv_matching(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        for _ in 0..20 {
            let frame = self.recv().await;
            if predicate(&frame) {
                return frame;
            }
        }
        panic!("no matching frame received");
    }

    async fn login(&mut self, username: &str, password: &str) {
        self.send(json!({"action": "REGISTER", "username": username, "password": password}))
            .await;
        let _ = self.recv().await;
        self.send(json!({"action": "LOGIN", "username": username, "password": password}))
            .await;
        let response = self.recv().await;
        assert_eq!(response["status"], "SUCCESS", "login failed: {response}");
    }
}

#[tokio::test]
async fn scenario_1_duplicate_registration_is_rejected() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send(json!({"action": "REGISTER", "username": "alice", "password": "secret1"}))
        .await;
    let first = client.recv().await;
    assert_eq!(first["status"], "SUCCESS");

    client
        .send(json!({"action": "REGISTER", "username": "alice", "password": "other1"}))
        .await;
    let second = client.recv().await;
    assert_eq!(second["status"], "ERROR");
    assert_eq!(second["message"], "Nome de usuário já existe.");

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_2_private_message_delivered_to_online_recipient() {
    let server = start_server().await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.login("bob", "secret1").await;

    alice
        .send(json!({"type": "PRIVATE", "recipient": "bob", "message": "hi"}))
        .await;

    let frame = bob
        .recv_matching(|f| f["type"] == "PRIVATE" && f["message"] == "hi")
        .await;
    assert_eq!(frame["sender"], "alice");
    assert!(frame["timestamp"].is_string());

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_3_offline_message_delivered_once_on_next_login() {
    let server = start_server().await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;

    // bob isn't online yet.
    alice
        .send(json!({"type": "PRIVATE", "recipient": "bob", "message": "later"}))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = TestClient::connect(server.addr).await;
    bob.login("bob", "secret1").await;
    let frame = bob
        .recv_matching(|f| f["type"] == "PRIVATE")
        .await;
    assert_eq!(frame["sender"], "alice");
    assert_eq!(frame["message"], "(Offline) later");

    // A second login must not redeliver it.
    drop(bob);
    let mut bob_again = TestClient::connect(server.addr).await;
    bob_again.login("bob", "secret1").await;
    let redelivered = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            let frame = bob_again.recv().await;
            if frame["type"] == "PRIVATE" {
                return true;
            }
        }
    })
    .await;
    assert!(redelivered.is_err(), "offline message was redelivered");

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_4_public_message_broadcasts_and_is_persisted() {
    let server = start_server().await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.login("bob", "secret1").await;

    alice
        .send(json!({"type": "PUBLIC", "message": "hello"}))
        .await;

    for client in [&mut alice, &mut bob] {
        let frame = client
            .recv_matching(|f| f["type"] == "PUBLIC" && f["message"] == "hello")
            .await;
        assert_eq!(frame["sender"], "alice");
    }

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_5_typing_indicator_is_forwarded_without_persistence() {
    let server = start_server().await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.login("bob", "secret1").await;

    alice
        .send(json!({"type": "TYPING_START", "recipient": "bob"}))
        .await;
    let frame = bob.recv_matching(|f| f["type"] == "typing").await;
    assert_eq!(frame["sender"], "alice");
    assert_eq!(frame["status"], true);

    alice
        .send(json!({"type": "TYPING_STOP", "recipient": "bob"}))
        .await;
    let frame = bob.recv_matching(|f| f["type"] == "typing").await;
    assert_eq!(frame["status"], false);

    server.shutdown().await;
}

#[tokio::test]
async fn scenario_6_stale_client_is_evicted_by_the_liveness_supervisor() {
    // Argon2 hashing during register/login is CPU-bound and can itself take
    // several hundred ms, so the timeout needs enough headroom that alice
    // isn't evicted before bob even finishes logging in.
    let config = Config {
        ping_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_secs(2),
        ..Config::default()
    };
    let server = start_server_with(config).await;

    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;
    let mut bob = TestClient::connect(server.addr).await;
    bob.login("bob", "secret1").await;

    // bob keeps heartbeating so only alice, who goes silent, gets evicted.
    let mut keepalive = tokio::time::interval(Duration::from_millis(20));

    let mut saw_system_leave = false;
    let mut saw_alice_offline = false;
    for _ in 0..400 {
        if saw_system_leave && saw_alice_offline {
            break;
        }
        tokio::select! {
            frame = bob.recv_timeout(Duration::from_millis(500)) => {
                if frame["type"] == "SYSTEM" && frame["message"] == "alice saiu do chat." {
                    saw_system_leave = true;
                }
                if frame["type"] == "USERLIST" {
                    let users: Vec<String> = frame["users"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|v| v.as_str().unwrap().to_owned())
                        .collect();
                    if users.contains(&"alice:offline".to_owned()) {
                        saw_alice_offline = true;
                    }
                }
            }
            _ = keepalive.tick() => {
                bob.send(json!({"type": "PING"})).await;
            }
        }
    }

    assert!(saw_system_leave, "never saw alice's departure broadcast");
    assert!(saw_alice_offline, "never saw a roster marking alice offline");

    server.shutdown().await;
}

#[tokio::test]
async fn register_rejects_username_just_outside_the_valid_length() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send(json!({"action": "REGISTER", "username": "ab", "password": "secret1"}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["status"], "ERROR");

    client
        .send(json!({"action": "REGISTER", "username": "a".repeat(21), "password": "secret1"}))
        .await;
    let response = client.recv().await;
    assert_eq!(response["status"], "ERROR");

    server.shutdown().await;
}

#[tokio::test]
async fn login_rejects_a_second_concurrent_session_for_the_same_username() {
    let server = start_server().await;
    let mut first = TestClient::connect(server.addr).await;
    first.login("alice", "secret1").await;

    let mut second = TestClient::connect(server.addr).await;
    second
        .send(json!({"action": "LOGIN", "username": "alice", "password": "secret1"}))
        .await;
    let response = second.recv().await;
    assert_eq!(response["status"], "ERROR");
    assert_eq!(response["message"], "Usuário já está online.");

    // the first session is unaffected and can still send messages.
    first.send(json!({"type": "PING"})).await;
    let pong = first.recv_matching(|f| f["type"] == "PONG").await;
    assert_eq!(pong["type"], "PONG");

    server.shutdown().await;
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    let server = start_server().await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", "secret1").await;

    alice.send(json!({"type": "PING"})).await;
    let pong = alice.recv_matching(|f| f["type"] == "PONG").await;
    assert_eq!(pong["type"], "PONG");

    server.shutdown().await;
}
