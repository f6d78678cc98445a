/// Context store backed by a Redis-compatible server
///
/// One lazily opened connection is shared by all callers. Any I/O or protocol
/// failure drops it; the next call reconnects.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::resp::{RespEncoder, RespParser, RespValue};
use super::store::ContextStore;
use super::ContextStoreError;

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    in_flight: bool,
}

impl Connection {
    async fn open(addr: &str) -> Result<Self, ContextStoreError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ContextStoreError::Unavailable(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true).ok();
        debug!("Connected to context store at {}", addr);

        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(512),
            in_flight: false,
        })
    }

    async fn round_trip(&mut self, command: &RespValue) -> Result<RespValue, ContextStoreError> {
        let request = RespEncoder::encode(command);
        self.in_flight = true;
        self.stream
            .write_all(&request)
            .await
            .map_err(|e| ContextStoreError::Unavailable(format!("write failed: {}", e)))?;

        loop {
            if let Some(reply) = RespParser::parse_from(&mut self.buffer)
                .map_err(|e| ContextStoreError::Protocol(e.to_string()))?
            {
                self.in_flight = false;
                return Ok(reply);
            }

            let read = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| ContextStoreError::Unavailable(format!("read failed: {}", e)))?;
            if read == 0 {
                return Err(ContextStoreError::Unavailable(
                    "connection closed by context store".to_string(),
                ));
            }
        }
    }
}

/// Remote store speaking RESP (`GET`, `SET key value PX ms`, `PING`)
pub struct RemoteStore {
    addr: String,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl RemoteStore {
    /// `timeout` bounds each request including connecting
    pub fn new(addr: String, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            connection: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Check the server answers
    pub async fn ping(&self) -> Result<(), ContextStoreError> {
        match self.request("PING", &[]).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(unexpected_reply("PING", &other)),
        }
    }

    async fn request(&self, command: &str, args: &[&str]) -> Result<RespValue, ContextStoreError> {
        let command_value = RespEncoder::create_command(command, args);

        // Waiting for the shared connection counts against the same deadline
        let result = timeout(self.timeout, async {
            let mut slot = self.connection.lock().await;
            let result = Self::send(&mut slot, &self.addr, &command_value).await;
            if result.is_err() {
                *slot = None;
            }
            result
        })
        .await;

        let result = match result {
            Ok(result) => result,
            Err(_) => Err(ContextStoreError::Timeout {
                operation: command.to_string(),
            }),
        };

        if let Err(e) = &result {
            warn!("Context store {} at {} failed: {}", command, self.addr, e);
        }
        result
    }

    async fn send(
        slot: &mut Option<Connection>,
        addr: &str,
        command: &RespValue,
    ) -> Result<RespValue, ContextStoreError> {
        // A request cut off by its deadline may have left a reply unread
        if slot.as_ref().map_or(false, |c| c.in_flight) {
            *slot = None;
        }
        if slot.is_none() {
            *slot = Some(Connection::open(addr).await?);
        }
        match slot.as_mut() {
            Some(connection) => connection.round_trip(command).await,
            None => Err(ContextStoreError::Unavailable("no connection".to_string())),
        }
    }
}

fn unexpected_reply(command: &str, reply: &RespValue) -> ContextStoreError {
    match reply {
        RespValue::Error(message) => ContextStoreError::Protocol(message.clone()),
        other => ContextStoreError::Protocol(format!("unexpected reply to {}: {:?}", command, other)),
    }
}

fn bulk_to_string(data: Bytes) -> Result<String, ContextStoreError> {
    String::from_utf8(data.to_vec())
        .map_err(|e| ContextStoreError::Serialization(format!("record is not UTF-8: {}", e)))
}

#[async_trait]
impl ContextStore for RemoteStore {
    async fn read(&self, key: &str) -> Result<Option<String>, ContextStoreError> {
        match self.request("GET", &[key]).await? {
            RespValue::BulkString(Some(data)) => bulk_to_string(data).map(Some),
            RespValue::BulkString(None) => Ok(None),
            other => Err(unexpected_reply("GET", &other)),
        }
    }

    async fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ContextStoreError> {
        // PX rejects zero
        let ttl_ms = ttl.as_millis().max(1).to_string();
        match self.request("SET", &[key, value, "PX", &ttl_ms]).await? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(unexpected_reply("SET", &other)),
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish()
    }
}
