#![cfg(feature = "database")]

//! Stream consumers park on `XREADGROUP ... BLOCK`. These tests run the real
//! Redis adapters against a minimal in-order RESP server to check that a
//! parked read neither times out nor holds up delivery writes.

use std::time::{Duration, Instant};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

use cadence_core::{
    infra::redis::{self as redis_infra, DeliveryKeys, RedisDeliveryStore, RedisStreamQueue},
    lifecycle::QueuePollConfig,
    ports::{DeliveryStore, MessageQueue},
};
use cadence_model::CampaignId;

const WAIT: Duration = Duration::from_millis(1_500);

async fn read_command(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> Option<Vec<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let count: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        let len: usize = line.trim_end().strip_prefix('$')?.parse().ok()?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).ok()?);
    }
    Some(args)
}

async fn reply(args: &[String]) -> &'static [u8] {
    match args[0].to_ascii_uppercase().as_str() {
        "XREADGROUP" => {
            let block = args
                .iter()
                .position(|arg| arg.eq_ignore_ascii_case("BLOCK"))
                .and_then(|at| args.get(at + 1))
                .and_then(|ms| ms.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(block)).await;
            b"*-1\r\n"
        }
        "XAUTOCLAIM" => b"*3\r\n$3\r\n0-0\r\n*0\r\n*0\r\n",
        "DEL" => b":1\r\n",
        "PING" => b"+PONG\r\n",
        _ => b"+OK\r\n",
    }
}

/// Answers each connection's commands strictly in order, like Redis does.
async fn serve_connection(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    while let Some(args) = read_command(&mut reader).await {
        if write.write_all(reply(&args).await).await.is_err() {
            return;
        }
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream));
        }
    });
    format!("redis://{addr}")
}

fn poll_config() -> QueuePollConfig {
    QueuePollConfig {
        visibility_timeout_ms: 60_000,
        wait_time_ms: WAIT.as_millis() as u64,
        max_messages: 10,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_stream_read_leaves_delivery_writes_responsive() {
    let url = spawn_server().await;
    let delivery = RedisDeliveryStore::new(
        redis_infra::connect(&url).await.unwrap(),
        DeliveryKeys::new(""),
    );
    let queue = RedisStreamQueue::connect(&url, "mutations", "cadence", "node-a", poll_config())
        .await
        .unwrap();

    let poller = tokio::spawn(async move {
        let started = Instant::now();
        let received = queue.receive().await;
        (received, started.elapsed())
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    delivery.delete_campaign(CampaignId(1)).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "delivery write waited {:?} behind the stream read",
        started.elapsed()
    );

    let (received, elapsed) = poller.await.unwrap();
    assert!(received.unwrap().is_empty());
    assert!(elapsed >= WAIT, "read returned after {elapsed:?}");
}

#[tokio::test]
async fn stream_read_outlasts_default_response_timeout() {
    let url = spawn_server().await;
    let queue = RedisStreamQueue::connect(&url, "budget", "cadence", "node-a", poll_config())
        .await
        .unwrap();

    let started = Instant::now();
    let received = queue.receive().await.unwrap();

    assert!(received.is_empty());
    assert!(started.elapsed() >= WAIT);
}
