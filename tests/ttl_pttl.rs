//! TTL / PTTL scenarios driven over a real TCP connection.
//!
//! The server runs on a `ManualClock`, so "wait five seconds" is an explicit
//! clock advance rather than a sleep.

use bytes::BytesMut;
use chronokv::protocol::{parse_message, RespValue};
use chronokv::server::Server;
use chronokv::storage::{ExpiryConfig, ExpirySweeper, ManualClock, StorageEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const START_MS: u64 = 1_700_000_000_000;

struct TestServer {
    client: TcpStream,
    buffer: BytesMut,
    clock: Arc<ManualClock>,
    storage: Arc<StorageEngine>,
    _stop: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let storage = Arc::new(StorageEngine::with_clock(clock.clone()));
        let server = Server::bind("127.0.0.1:0", Arc::clone(&storage)).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            client: TcpStream::connect(addr).await.unwrap(),
            buffer: BytesMut::new(),
            clock,
            storage,
            _stop: stop,
        }
    }

    /// Sends a whitespace-separated command and waits for its reply.
    async fn fire(&mut self, command: &str) -> RespValue {
        let frame = RespValue::command(command.split_whitespace());
        self.client.write_all(&frame.serialize()).await.unwrap();

        loop {
            if let Some((reply, consumed)) = parse_message(&self.buffer).unwrap() {
                let _ = self.buffer.split_to(consumed);
                return reply;
            }
            let n = tokio::time::timeout(Duration::from_secs(2), self.client.read_buf(&mut self.buffer))
                .await
                .expect("timed out waiting for reply")
                .unwrap();
            assert!(n > 0, "server closed the connection");
        }
    }
}

enum Expect {
    Equal(RespValue),
    AtMost(i64),
}

fn ok() -> Expect {
    Expect::Equal(RespValue::ok())
}

fn bulk(s: &'static str) -> Expect {
    Expect::Equal(RespValue::bulk_string(s))
}

fn int(n: i64) -> Expect {
    Expect::Equal(RespValue::integer(n))
}

struct Step {
    command: &'static str,
    expect: Expect,
    delay: Duration,
}

fn step(command: &'static str, expect: Expect) -> Step {
    Step {
        command,
        expect,
        delay: Duration::ZERO,
    }
}

fn after(delay: Duration, command: &'static str, expect: Expect) -> Step {
    Step {
        command,
        expect,
        delay,
    }
}

async fn run_case(server: &mut TestServer, name: &str, steps: Vec<Step>) {
    server.fire("DEL foo").await;

    for Step {
        command,
        expect,
        delay,
    } in steps
    {
        if !delay.is_zero() {
            server.clock.advance(delay);
        }

        let reply = server.fire(command).await;
        match expect {
            Expect::Equal(expected) => {
                assert_eq!(reply, expected, "{name}: {command}");
            }
            Expect::AtMost(limit) => {
                let n = reply
                    .as_integer()
                    .unwrap_or_else(|| panic!("{name}: {command} returned {reply:?}"));
                assert!(n <= limit, "{name}: {command} returned {n}, expected <= {limit}");
            }
        }
    }
}

#[tokio::test]
async fn ttl_pttl_scenarios() {
    let mut server = TestServer::start().await;

    run_case(
        &mut server,
        "TTL Simple Value",
        vec![
            step("SET foo bar", ok()),
            step("GETEX foo ex 5", bulk("bar")),
            step("GETEX foo", bulk("bar")),
            step("TTL foo", Expect::AtMost(5)),
        ],
    )
    .await;

    run_case(
        &mut server,
        "PTTL Simple Value",
        vec![
            step("SET foo bar", ok()),
            step("GETEX foo px 5000", bulk("bar")),
            step("GETEX foo", bulk("bar")),
            step("PTTL foo", Expect::AtMost(5000)),
        ],
    )
    .await;

    run_case(
        &mut server,
        "TTL & PTTL Non-Existent Key",
        vec![step("TTL foo", int(-2)), step("PTTL foo", int(-2))],
    )
    .await;

    run_case(
        &mut server,
        "TTL & PTTL without Expiry",
        vec![
            step("SET foo bar", ok()),
            step("GET foo", bulk("bar")),
            step("TTL foo", int(-1)),
            step("PTTL foo", int(-1)),
        ],
    )
    .await;

    run_case(
        &mut server,
        "TTL & PTTL with Persist",
        vec![
            step("SET foo bar", ok()),
            step("GETEX foo persist", bulk("bar")),
            step("TTL foo", int(-1)),
            step("PTTL foo", int(-1)),
        ],
    )
    .await;

    run_case(
        &mut server,
        "TTL & PTTL with Expire and Expired Key",
        vec![
            step("SET foo bar", ok()),
            step("GETEX foo ex 5", bulk("bar")),
            step("GET foo", bulk("bar")),
            step("TTL foo", Expect::AtMost(5)),
            step("PTTL foo", Expect::AtMost(5000)),
            after(Duration::from_secs(5), "TTL foo", int(-2)),
            step("PTTL foo", int(-2)),
        ],
    )
    .await;
}

#[tokio::test]
async fn rounding_is_visible_over_the_wire() {
    let mut server = TestServer::start().await;

    assert_eq!(server.fire("SET foo bar PX 4500").await, RespValue::ok());
    assert_eq!(server.fire("TTL foo").await, RespValue::integer(5));
    assert_eq!(server.fire("PTTL foo").await, RespValue::integer(4500));

    server.clock.advance(Duration::from_millis(4499));
    assert_eq!(server.fire("TTL foo").await, RespValue::integer(1));
    assert_eq!(server.fire("PTTL foo").await, RespValue::integer(1));

    server.clock.advance(Duration::from_millis(1));
    assert_eq!(server.fire("TTL foo").await, RespValue::integer(-2));
    assert_eq!(server.fire("GET foo").await, RespValue::null());
}

#[tokio::test]
async fn persist_and_expire_family_over_the_wire() {
    let mut server = TestServer::start().await;

    assert_eq!(server.fire("SET foo bar").await, RespValue::ok());
    assert_eq!(server.fire("PERSIST foo").await, RespValue::integer(0));
    assert_eq!(server.fire("EXPIRE foo 30").await, RespValue::integer(1));
    assert_eq!(
        server.fire("EXPIRETIME foo").await,
        RespValue::integer((START_MS / 1000 + 30) as i64)
    );
    assert_eq!(server.fire("PERSIST foo").await, RespValue::integer(1));
    assert_eq!(server.fire("PERSIST foo").await, RespValue::integer(0));
    assert_eq!(server.fire("TTL foo").await, RespValue::integer(-1));

    assert_eq!(
        server.fire("SET foo baz EX 0").await,
        RespValue::error("ERR invalid expire time in 'set' command")
    );
    assert_eq!(server.fire("GET foo").await, RespValue::bulk_string("bar"));
}

#[tokio::test]
async fn sweeper_reclaims_keys_nobody_reads() {
    let mut server = TestServer::start().await;

    for i in 0..50 {
        let reply = server.fire(&format!("SET key{i} v PX 100")).await;
        assert_eq!(reply, RespValue::ok());
    }
    server.fire("SET keeper v").await;
    server.clock.advance(Duration::from_millis(100));

    let config = ExpiryConfig {
        base_interval: Duration::from_millis(5),
        min_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(20),
        shards_per_cycle: 64,
        ..ExpiryConfig::default()
    };
    let sweeper = ExpirySweeper::start(Arc::clone(&server.storage), config);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.storage.len() > 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweeper.shutdown().await;

    assert_eq!(server.fire("DBSIZE").await, RespValue::integer(1));
    assert_eq!(server.storage.stats().lazy_expired, 0);
    assert_eq!(server.storage.stats().active_expired, 50);
}
