//! MongoDB wire protocol: `OP_MSG` framing over TCP.
//!
//! One [`Connection`] is one TCP stream to one `mongod`, always in direct
//! mode (no driver-level topology discovery; prior driver defaults that
//! discovered the topology made every member look like a primary). Commands
//! are single kind-0 body sections; compression is never negotiated.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::document::Document;
use crate::error::{OperatorError, Result};
use crate::types::NodeEndpoint;

const OP_MSG: i32 = 2013;
const HEADER_LEN: usize = 16;
const FLAG_CHECKSUM_PRESENT: u32 = 1;
/// Cap on accepted frames; admin responses are tiny, anything near this is
/// a framing error.
const MAX_MESSAGE_LEN: i32 = 16 * 1024 * 1024;

static REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// A direct connection to a single MongoDB instance.
pub struct Connection {
    stream: TcpStream,
    endpoint: NodeEndpoint,
    op_timeout: Duration,
}

impl Connection {
    /// Open a TCP connection to `endpoint`, bounded by `op_timeout`.
    pub async fn connect(endpoint: NodeEndpoint, op_timeout: Duration) -> Result<Self> {
        let addr = (endpoint.ip, endpoint.port);
        let stream = timeout(op_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| OperatorError::Timeout(op_timeout.as_millis() as u64))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            endpoint,
            op_timeout,
        })
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        self.endpoint
    }

    /// Send one command document and read its reply document.
    ///
    /// The command must already carry its `$db` key. The reply is returned
    /// as-is; interpreting `ok`/`code` is the caller's concern.
    pub async fn run_command(&mut self, command: &Document) -> Result<Document> {
        timeout(self.op_timeout, self.exchange(command))
            .await
            .map_err(|_| OperatorError::Timeout(self.op_timeout.as_millis() as u64))?
    }

    async fn exchange(&mut self, command: &Document) -> Result<Document> {
        let body = command.to_bytes();
        let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);

        // header + flagBits + section kind byte + body
        let total = HEADER_LEN + 4 + 1 + body.len();
        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&(total as i32).to_le_bytes());
        frame.extend_from_slice(&request_id.to_le_bytes());
        frame.extend_from_slice(&0i32.to_le_bytes()); // responseTo
        frame.extend_from_slice(&OP_MSG.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes()); // flagBits
        frame.push(0); // section kind 0: body
        frame.extend_from_slice(&body);

        self.stream.write_all(&frame).await?;

        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;

        let message_len = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let op_code = i32::from_le_bytes(header[12..16].try_into().unwrap());
        if op_code != OP_MSG {
            return Err(OperatorError::Wire(format!(
                "unexpected reply opcode {op_code}"
            )));
        }
        if message_len < (HEADER_LEN + 5) as i32 || message_len > MAX_MESSAGE_LEN {
            return Err(OperatorError::Wire(format!(
                "implausible reply length {message_len}"
            )));
        }

        let mut payload = vec![0u8; message_len as usize - HEADER_LEN];
        self.stream.read_exact(&mut payload).await?;

        let flags = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        let mut sections = &payload[4..];
        if flags & FLAG_CHECKSUM_PRESENT != 0 {
            let trimmed = sections.len().saturating_sub(4);
            sections = &sections[..trimmed];
        }

        // First section must be the kind-0 body document.
        match sections.first() {
            Some(0) => Document::from_bytes(&sections[1..]),
            Some(kind) => Err(OperatorError::Wire(format!(
                "unexpected leading section kind {kind}"
            ))),
            None => Err(OperatorError::Wire("empty reply".into())),
        }
    }
}
