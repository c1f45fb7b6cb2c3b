//! Connection Handler
//!
//! One task per client. The task owns a read buffer, decodes as many complete
//! requests as the buffer holds, executes them in arrival order and writes one
//! reply per request.
//!
//! ## Lifecycle
//!
//! ```text
//!   accept ──> read_request ──> execute ──> write_reply ──┐
//!                  ▲                                       │
//!                  └───────────────────────────────────────┘
//!                  │
//!                  ├── EOF on a request boundary ──> close
//!                  └── undecodable / oversized   ──> "-ERR invalid protocol" ──> close
//! ```
//!
//! While a command is pending (a BLPOP waiting for data) the socket is still
//! read. Requests pipelined behind the BLPOP are buffered until it replies. If
//! the client hangs up first, the pending command is dropped before it can
//! take anything from storage.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Largest amount of unparsed request data buffered per client (64 KB)
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    fn closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn record(counter: &AtomicU64, count: usize) {
        counter.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The client closed the socket in the middle of a request
    #[error("connection closed mid-request ({0} bytes buffered)")]
    UnexpectedEof(usize),

    #[error("request exceeds the 64 KiB buffer limit")]
    BufferFull,
}

/// A client connection: buffered reads in, buffered writes out.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    parser: RespParser,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        commands: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: RespParser::new(),
            commands,
            stats,
        }
    }

    /// Serves requests until the client leaves or breaks the protocol.
    ///
    /// Protocol violations are answered with `ERR invalid protocol` before
    /// the connection is closed.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.serve().await;

        if let Err(e @ (ConnectionError::Protocol(_) | ConnectionError::BufferFull)) = &result {
            warn!(client = %self.addr, error = %e, "closing connection");
            ConnectionStats::record(&self.stats.protocol_errors, 1);
            // The client may already be gone; the original error is what gets reported
            let _ = self.write_reply(&CommandError::InvalidProtocol.into()).await;
        }

        self.stats.closed();
        match &result {
            Ok(()) => info!(client = %self.addr, "client disconnected"),
            Err(e) => debug!(client = %self.addr, error = %e, "connection ended"),
        }
        result
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        while let Some(request) = self.read_request().await? {
            let Some(reply) = self.execute_while_connected(request).await? else {
                debug!(client = %self.addr, "client left with a command pending");
                return Ok(());
            };
            ConnectionStats::record(&self.stats.commands_processed, 1);
            self.write_reply(&reply).await?;
        }
        Ok(())
    }

    /// Executes `request` while watching the socket for the client hanging up.
    ///
    /// Bytes that arrive meanwhile are buffered for the following requests.
    /// Returns `None` if the client closed the connection first; the command
    /// future is dropped, which also withdraws a blocked pop.
    async fn execute_while_connected(
        &mut self,
        request: RespValue,
    ) -> Result<Option<RespValue>, ConnectionError> {
        let execute = self.commands.execute(request);
        tokio::pin!(execute);

        let stream = self.stream.get_mut();
        loop {
            let has_room = self.buffer.len() < MAX_BUFFER_SIZE;

            tokio::select! {
                reply = &mut execute => return Ok(Some(reply)),
                read = stream.read_buf(&mut self.buffer), if has_room => {
                    let n = read?;
                    if n == 0 {
                        return Ok(None);
                    }
                    ConnectionStats::record(&self.stats.bytes_read, n);
                }
            }
        }
    }

    /// Returns the next complete request, reading from the socket as needed.
    ///
    /// `Ok(None)` means the client closed the connection between requests.
    async fn read_request(&mut self) -> Result<Option<RespValue>, ConnectionError> {
        loop {
            if let Some((request, consumed)) = self.parser.parse(&self.buffer)? {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed,
                    remaining = self.buffer.len(),
                    "decoded request"
                );
                return Ok(Some(request));
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ConnectionError::BufferFull);
            }

            self.buffer.reserve(INITIAL_BUFFER_SIZE);
            let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;
            if n == 0 {
                return match self.buffer.len() {
                    0 => Ok(None),
                    buffered => Err(ConnectionError::UnexpectedEof(buffered)),
                };
            }
            ConnectionStats::record(&self.stats.bytes_read, n);
        }
    }

    async fn write_reply(&mut self, reply: &RespValue) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        ConnectionStats::record(&self.stats.bytes_written, bytes.len());
        Ok(())
    }
}

/// Serves one client to completion.
///
/// Errors are logged by the handler; the caller only needs to spawn this.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    let _ = ConnectionHandler::new(stream, addr, commands, stats).run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockingCoordinator;
    use crate::storage::StorageEngine;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let storage = Arc::new(StorageEngine::new());
        let commands = CommandHandler::new(Arc::new(BlockingCoordinator::new(storage)));
        let server_stats = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    commands.clone(),
                    Arc::clone(&server_stats),
                ));
            }
        });

        (addr, stats)
    }

    /// Reads until `expected` bytes have arrived or two seconds pass.
    async fn read_exact_len(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut buf = vec![0u8; expected];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("reply timed out")
            .unwrap();
        buf
    }

    async fn request(client: &mut TcpStream, frame: &[u8], expected: &[u8]) {
        client.write_all(frame).await.unwrap();
        assert_eq!(
            read_exact_len(client, expected.len()).await,
            expected,
            "request {:?}",
            String::from_utf8_lossy(frame)
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nTide\r\n",
            b"+OK\r\n",
        )
        .await;
        request(&mut client, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n", b"$4\r\nTide\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_requests_reply_in_order() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(
            &mut client,
            b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n",
            b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_request_split_across_writes() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*2\r\n$4\r\nEC").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        request(&mut client, b"HO\r\n$2\r\nhi\r\n", b"$2\r\nhi\r\n").await;
    }

    #[tokio::test]
    async fn test_list_commands() {
        let (addr, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        request(
            &mut client,
            b"*5\r\n$5\r\nRPUSH\r\n$6\r\nmylist\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
            b":3\r\n",
        )
        .await;
        request(
            &mut client,
            b"*4\r\n$6\r\nLRANGE\r\n$6\r\nmylist\r\n$1\r\n0\r\n$2\r\n-1\r\n",
            b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_blpop_across_clients() {
        let (addr, _) = create_test_server().await;
        let mut waiter = TcpStream::connect(addr).await.unwrap();
        let mut pusher = TcpStream::connect(addr).await.unwrap();

        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        request(&mut pusher, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$5\r\nitem1\r\n", b":1\r\n").await;

        assert_eq!(
            read_exact_len(&mut waiter, 22).await,
            b"*2\r\n$1\r\nq\r\n$5\r\nitem1\r\n"
        );
        request(&mut pusher, b"*2\r\n$4\r\nLLEN\r\n$1\r\nq\r\n", b":0\r\n").await;
    }

    #[tokio::test]
    async fn test_blocked_client_does_not_block_others() {
        let (addr, _) = create_test_server().await;
        let mut waiter = TcpStream::connect(addr).await.unwrap();
        let mut other = TcpStream::connect(addr).await.unwrap();

        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$3\r\n0.2\r\n")
            .await
            .unwrap();

        request(&mut other, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;
        assert_eq!(read_exact_len(&mut waiter, 5).await, b"*-1\r\n");
    }

    #[tokio::test]
    async fn test_blpop_of_departed_client_leaves_value() {
        let (addr, _) = create_test_server().await;
        let mut waiter = TcpStream::connect(addr).await.unwrap();
        let mut pusher = TcpStream::connect(addr).await.unwrap();

        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(waiter);
        tokio::time::sleep(Duration::from_millis(50)).await;

        request(&mut pusher, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$3\r\nval\r\n", b":1\r\n").await;
        request(&mut pusher, b"*2\r\n$4\r\nLLEN\r\n$1\r\nq\r\n", b":1\r\n").await;
        request(
            &mut pusher,
            b"*2\r\n$4\r\nLPOP\r\n$1\r\nq\r\n",
            b"$3\r\nval\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_requests_pipelined_behind_blpop() {
        let (addr, _) = create_test_server().await;
        let mut waiter = TcpStream::connect(addr).await.unwrap();
        let mut pusher = TcpStream::connect(addr).await.unwrap();

        waiter
            .write_all(b"*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        waiter.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        request(&mut pusher, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nq\r\n$1\r\nx\r\n", b":1\r\n").await;

        assert_eq!(
            read_exact_len(&mut waiter, 25).await,
            b"*2\r\n$1\r\nq\r\n$1\r\nx\r\n+PONG\r\n"
        );
    }

    #[tokio::test]
    async fn test_invalid_protocol_closes_connection() {
        let (addr, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"?what\r\n").await.unwrap();
        assert_eq!(
            read_exact_len(&mut client, 23).await,
            b"-ERR invalid protocol\r\n"
        );

        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .expect("server should close")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(stats.protocol_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();
        request(&mut client, b"*1\r\n$4\r\nPING\r\n", b"+PONG\r\n").await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
