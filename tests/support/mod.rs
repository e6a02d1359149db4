//! Scripted in-memory broker for integration tests.
//!
//! A [`ScriptedConnector`] hands out one outcome per connect attempt, in
//! order: either a refusal or an in-memory stream whose far end is driven by
//! the test through a [`BrokerSide`]. Attempts beyond the script are refused.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use stomp_client::protocol::{commands, encode, read_frame, Frame};
use stomp_client::transport::{BoxFuture, BoxedStream, Connector};
use tokio::io::{duplex, split, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// In-memory buffer size per direction.
pub const CHANNEL_CAPACITY: usize = 1024 * 1024;

enum Step {
    Refuse,
    Accept(DuplexStream),
}

#[derive(Default)]
pub struct ScriptedConnector {
    plan: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<(String, u16)>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a refused connect attempt.
    pub fn refuse(&self) {
        self.plan.lock().unwrap().push_back(Step::Refuse);
    }

    /// Script an accepted connect attempt and return the broker's end.
    pub fn accept(&self) -> BrokerSide {
        let (client, server) = duplex(CHANNEL_CAPACITY);
        self.plan.lock().unwrap().push_back(Step::Accept(client));
        BrokerSide::new(server)
    }

    /// Endpoints dialed so far, in order.
    pub fn attempts(&self) -> Vec<(String, u16)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempted_hosts(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(h, _)| h).collect()
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedStream>> {
        self.attempts.lock().unwrap().push((host.to_string(), port));
        let step = self.plan.lock().unwrap().pop_front();
        Box::pin(async move {
            match step {
                Some(Step::Accept(stream)) => Ok(Box::new(stream) as BoxedStream),
                Some(Step::Refuse) | None => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{}:{} refused", host, port),
                )),
            }
        })
    }
}

/// The broker's end of one accepted connection.
pub struct BrokerSide {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl BrokerSide {
    fn new(stream: DuplexStream) -> Self {
        let (r, w) = split(stream);
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    /// Read the next frame the client sent.
    pub async fn expect_frame(&mut self) -> Frame {
        read_frame(&mut self.reader)
            .await
            .expect("decode failed")
            .expect("client closed the stream")
    }

    /// Read the next frame and check its command.
    pub async fn expect_command(&mut self, command: &str) -> Frame {
        let frame = self.expect_frame().await;
        assert_eq!(frame.command(), command, "unexpected frame: {}", frame);
        frame
    }

    /// Read CONNECT and answer CONNECTED. Returns the CONNECT frame.
    pub async fn accept_connect(&mut self) -> Frame {
        let connect = self.expect_command(commands::CONNECT).await;
        self.send(&Frame::new(commands::CONNECTED).header("session", "test-session"))
            .await;
        connect
    }

    /// Write a frame to the client.
    pub async fn send(&mut self, frame: &Frame) {
        self.send_raw(&encode(frame)).await;
    }

    /// Write raw bytes to the client.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("client end dropped");
        self.writer.flush().await.unwrap();
    }

    /// Push a MESSAGE frame.
    pub async fn deliver(&mut self, destination: &str, message_id: &str, body: &str) {
        let frame = Frame::new(commands::MESSAGE)
            .header("destination", destination)
            .header("message-id", message_id)
            .with_body(body.to_string());
        self.send(&frame).await;
    }

    /// Answer a receipt request.
    pub async fn receipt(&mut self, receipt_id: &str) {
        self.send(&Frame::new(commands::RECEIPT).header("receipt-id", receipt_id))
            .await;
    }
}
