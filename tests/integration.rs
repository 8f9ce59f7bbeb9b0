//! Integration Tests for the TrieMQ broker
//!
//! These tests drive a real broker over TCP: raw-byte subscriber clients on
//! the subscriber port, raw-byte publishers on the publisher port, and
//! assertions on the exact reply bytes the wire protocol promises.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use triemq::broker::{Broker, BrokerConfig};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

// Atomic port counter to avoid port conflicts between tests
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Test configuration helper: loopback binds on fresh ports
fn test_config() -> BrokerConfig {
    BrokerConfig {
        pub_bind: SocketAddr::from(([127, 0, 0, 1], next_port())),
        sub_bind: SocketAddr::from(([127, 0, 0, 1], next_port())),
        pub_backlog: 64,
        sub_backlog: 64,
        read_chunk_size: 4096,
        max_inline_len: 64 * 1024,
        max_multibulk_len: 1024,
        max_bulk_len: 1024 * 1024,
        outbound_buffer_size: 64 * 1024,
    }
}

async fn wait_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("broker never started listening on {}", addr);
}

async fn start_broker(config: BrokerConfig) -> Arc<Broker> {
    let broker = Arc::new(Broker::new(config.clone()));
    let b = broker.clone();
    tokio::spawn(async move {
        b.run().await.expect("broker failed to start");
    });
    wait_listening(config.sub_bind).await;
    wait_listening(config.pub_bind).await;
    broker
}

async fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("failed to write");
}

/// Read exactly `expected.len()` bytes and assert they match.
async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    timeout(IO_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .expect("connection closed while waiting for reply");
    assert_eq!(
        buf,
        expected,
        "reply mismatch: got {:?}, want {:?}",
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

/// Read one CRLF-terminated reply line.
async fn read_reply_line(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = timeout(IO_TIMEOUT, stream.read(&mut byte))
            .await
            .expect("timed out waiting for reply line")
            .expect("read failed");
        assert!(n > 0, "connection closed mid-line");
        out.push(byte[0]);
        if out.ends_with(b"\r\n") {
            return out;
        }
    }
}

/// Assert that nothing arrives on `stream` within a grace window.
async fn expect_silence(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    match timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
        Err(_) => {}
        Ok(Ok(0)) => panic!("connection unexpectedly closed"),
        Ok(Ok(n)) => panic!(
            "unexpected data: {:?}",
            String::from_utf8_lossy(&buf[..n])
        ),
        Ok(Err(e)) => panic!("read error: {}", e),
    }
}

async fn connect_subscriber(config: &BrokerConfig) -> TcpStream {
    TcpStream::connect(config.sub_bind)
        .await
        .expect("failed to connect subscriber")
}

async fn connect_publisher(config: &BrokerConfig) -> TcpStream {
    TcpStream::connect(config.pub_bind)
        .await
        .expect("failed to connect publisher")
}

/// Subscribe via multibulk framing and consume the ack.
async fn subscribe(stream: &mut TcpStream, channel: &str) {
    let frame = format!(
        "*2\r\n$9\r\nsubscribe\r\n${}\r\n{}\r\n",
        channel.len(),
        channel
    );
    send(stream, frame.as_bytes()).await;
    expect_bytes(stream, b"+subscribe\r\n").await;
}

fn bulk_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = format!("${}\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b"\r\n");
    frame
}

#[tokio::test]
async fn ping_pong() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"*1\r\n$4\r\nping\r\n").await;
    expect_bytes(&mut sub, b"+pong\r\n").await;
}

#[tokio::test]
async fn ping_with_argument_is_arity_error() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"*2\r\n$4\r\nping\r\n$5\r\nextra\r\n").await;
    expect_bytes(
        &mut sub,
        b"-ERR wrong number of arguments for 'ping' command\r\n",
    )
    .await;

    // Connection is still usable afterwards
    send(&mut sub, b"*1\r\n$4\r\nping\r\n").await;
    expect_bytes(&mut sub, b"+pong\r\n").await;
}

#[tokio::test]
async fn subscribe_without_channels_is_arity_error() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"*1\r\n$9\r\nsubscribe\r\n").await;
    expect_bytes(
        &mut sub,
        b"-ERR wrong number of arguments for 'subscribe' command\r\n",
    )
    .await;
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"*1\r\n$7\r\npublish\r\n").await;
    expect_bytes(&mut sub, b"-ERR unknown command 'publish'\r\n").await;
}

#[tokio::test]
async fn publish_fans_out_full_buffer_to_each_subscriber() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub1 = connect_subscriber(&config).await;
    let mut sub2 = connect_subscriber(&config).await;
    subscribe(&mut sub1, "news").await;
    subscribe(&mut sub2, "news").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsHELLO").await;

    let expected = bulk_frame(b"newsHELLO");
    expect_bytes(&mut sub1, &expected).await;
    expect_bytes(&mut sub2, &expected).await;

    // Exactly once per channel per message
    expect_silence(&mut sub1).await;
    expect_silence(&mut sub2).await;
}

#[tokio::test]
async fn concatenated_channel_names_each_match() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut news = connect_subscriber(&config).await;
    let mut sports = connect_subscriber(&config).await;
    subscribe(&mut news, "news").await;
    subscribe(&mut sports, "sports").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newssportsPAYLOAD").await;

    // Both channels decode from the prefix; each subscriber gets the whole
    // original buffer
    let expected = bulk_frame(b"newssportsPAYLOAD");
    expect_bytes(&mut news, &expected).await;
    expect_bytes(&mut sports, &expected).await;
}

#[tokio::test]
async fn unmatched_publish_is_discarded() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newX").await;
    expect_silence(&mut sub).await;

    // The broker is intact; a decodable publish still goes through
    send(&mut publisher, b"newsAGAIN").await;
    expect_bytes(&mut sub, &bulk_frame(b"newsAGAIN")).await;
}

#[tokio::test]
async fn publishers_never_receive_replies() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsDATA").await;
    expect_bytes(&mut sub, &bulk_frame(b"newsDATA")).await;
    expect_silence(&mut publisher).await;
}

#[tokio::test]
async fn multibulk_request_split_across_writes() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"*2\r\n$9\r\n").await;
    sleep(Duration::from_millis(100)).await;
    send(&mut sub, b"subscribe\r\n$4\r\nnews\r\n").await;
    expect_bytes(&mut sub, b"+subscribe\r\n").await;

    // The reassembled subscription is live
    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsSPLIT").await;
    expect_bytes(&mut sub, &bulk_frame(b"newsSPLIT")).await;
}

#[tokio::test]
async fn pipelined_commands_all_execute_in_order() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(
        &mut sub,
        b"*1\r\n$4\r\nping\r\n*2\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n*1\r\n$4\r\nping\r\n",
    )
    .await;
    expect_bytes(&mut sub, b"+pong\r\n+subscribe\r\n+pong\r\n").await;
}

#[tokio::test]
async fn inline_subscribe_works() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    send(&mut sub, b"subscribe news\r\n").await;
    expect_bytes(&mut sub, b"+subscribe\r\n").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsINLINE").await;
    expect_bytes(&mut sub, &bulk_frame(b"newsINLINE")).await;
}

#[tokio::test]
async fn oversized_inline_request_keeps_connection_usable() {
    let mut config = test_config();
    config.max_inline_len = 64;
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    // A 256-byte line: four times the configured inline limit
    let mut junk = vec![b'a'; 256];
    junk.extend_from_slice(b"\r\n");
    send(&mut sub, &junk).await;
    send(&mut sub, b"*1\r\n$4\r\nping\r\n").await;

    // The offending line draws one error reply per chunk the kernel split it
    // into; the connection stays open and the follow-up command succeeds
    let mut saw_error = false;
    loop {
        let reply = read_reply_line(&mut sub).await;
        if reply == b"+pong\r\n" {
            break;
        }
        assert!(
            reply.starts_with(b"-ERR "),
            "got {:?}",
            String::from_utf8_lossy(&reply)
        );
        saw_error = true;
    }
    assert!(saw_error, "oversized inline request drew no protocol error");
}

#[tokio::test]
async fn prefix_conflicting_subscribe_is_rejected() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;

    send(&mut sub, b"*2\r\n$9\r\nsubscribe\r\n$10\r\nnewsworthy\r\n").await;
    let reply = read_reply_line(&mut sub).await;
    assert!(
        reply.starts_with(b"-ERR cannot subscribe to 'newsworthy'"),
        "got {:?}",
        String::from_utf8_lossy(&reply)
    );

    // The established channel still matches and delivers
    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsworthy").await;
    expect_bytes(&mut sub, &bulk_frame(b"newsworthy")).await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;

    send(&mut sub, b"*2\r\n$11\r\nunsubscribe\r\n$4\r\nnews\r\n").await;
    expect_bytes(&mut sub, b"+unsubscribe\r\n").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsAFTER").await;
    expect_silence(&mut sub).await;
}

#[tokio::test]
async fn unsubscribe_without_args_drops_all_channels() {
    let config = test_config();
    let _broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;
    subscribe(&mut sub, "sports").await;

    send(&mut sub, b"*1\r\n$11\r\nunsubscribe\r\n").await;
    expect_bytes(&mut sub, b"+unsubscribe\r\n").await;

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newssports").await;
    expect_silence(&mut sub).await;
}

#[tokio::test]
async fn disconnect_purges_subscriptions() {
    let config = test_config();
    let broker = start_broker(config.clone()).await;

    let mut gone = connect_subscriber(&config).await;
    let mut stays = connect_subscriber(&config).await;
    subscribe(&mut gone, "news").await;
    subscribe(&mut stays, "news").await;

    drop(gone);
    // Wait for the broker to release the dropped connection
    for _ in 0..100 {
        if broker.subscriber_count() <= 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let mut publisher = connect_publisher(&config).await;
    send(&mut publisher, b"newsSTILL").await;
    expect_bytes(&mut stays, &bulk_frame(b"newsSTILL")).await;
}

#[tokio::test]
async fn channel_survives_subscriber_disconnect() {
    let config = test_config();
    let broker = start_broker(config.clone()).await;

    let mut sub = connect_subscriber(&config).await;
    subscribe(&mut sub, "news").await;
    assert_eq!(broker.channel_count(), 1);

    drop(sub);
    for _ in 0..100 {
        if broker.subscriber_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    // Channel registrations are never removed, only emptied
    assert_eq!(broker.channel_count(), 1);
}
