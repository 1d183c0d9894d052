//! Per-connection read/parse/execute/write loop

use super::Server;
use super::handler;
use crate::protocol::{
    Command, ParseResult, PendingStorageCommand, ResponseWriter, parse, parse_storage_command_line,
    parse_storage_data,
};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// Handle a single client connection until quit, EOF, a fatal framing
/// error, or server shutdown
pub async fn handle<S>(
    server: Arc<Server>,
    mut stream: S,
    _permit: OwnedSemaphorePermit,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut read_buf = BytesMut::with_capacity(server.config.read_buffer_size);
    let mut response = ResponseWriter::new(server.config.write_buffer_size);
    let mut pending_storage: Option<PendingStorageCommand> = None;

    'conn: loop {
        tokio::select! {
            _ = server.cancel_token.cancelled() => {
                break;
            }
            result = stream.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        // Clean close
                        break;
                    }
                    Ok(n) => {
                        server.metrics.bytes_read.inc_by(n as u64);

                        // Drain every complete command in the buffer
                        loop {
                            let parse_result = if let Some(ref pending) = pending_storage {
                                // Waiting on a storage data block
                                parse_storage_data(&read_buf, pending)
                            } else {
                                parse(&read_buf)
                            };

                            match parse_result {
                                ParseResult::Complete(cmd, consumed) => {
                                    pending_storage = None;

                                    let should_quit = matches!(cmd, Command::Quit);
                                    let noreply = cmd.is_noreply();

                                    let started = Instant::now();
                                    handler::execute(&server, cmd, &mut response);
                                    server
                                        .metrics
                                        .cmd_latency
                                        .observe(started.elapsed().as_secs_f64());

                                    let _ = read_buf.split_to(consumed);

                                    if !noreply && !response.is_empty() {
                                        let buf = response.take();
                                        server.metrics.bytes_written.inc_by(buf.len() as u64);
                                        if let Err(e) = stream.write_all(&buf).await {
                                            debug!("Write error: {}", e);
                                            break 'conn;
                                        }
                                    }
                                    response.clear();

                                    if should_quit {
                                        break 'conn;
                                    }
                                }
                                ParseResult::NeedMoreData => {
                                    // A complete storage header may be sitting in
                                    // the buffer ahead of its data block
                                    if pending_storage.is_none()
                                        && let Ok(Some(pending)) =
                                            parse_storage_command_line(&read_buf)
                                    {
                                        pending_storage = Some(pending);
                                    }
                                    break;
                                }
                                ParseResult::Error(e) => {
                                    server.metrics.protocol_errors.inc();
                                    pending_storage = None;

                                    if e.is_fatal() {
                                        debug!("Fatal protocol error, closing: {}", e);
                                        break 'conn;
                                    }

                                    if e.is_generic() {
                                        response.error();
                                    } else {
                                        response.client_error(&e.to_string());
                                    }

                                    // Resynchronize at the next line boundary
                                    if let Some(pos) = find_crlf(&read_buf) {
                                        let _ = read_buf.split_to(pos + 2);
                                    } else {
                                        read_buf.clear();
                                    }

                                    let buf = response.take();
                                    server.metrics.bytes_written.inc_by(buf.len() as u64);
                                    if let Err(e) = stream.write_all(&buf).await {
                                        debug!("Write error: {}", e);
                                        break 'conn;
                                    }
                                    response.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!("Read error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    server.metrics.active_connections.dec();
    Ok(())
}

/// Find the first \r\n in the buffer
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memchr_iter(b'\r', buf).find(|&i| buf.get(i + 1) == Some(&b'\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Crawler, LruCache, ManualClock};
    use crate::config::ServerConfig;
    use crate::metrics::Metrics;
    use parking_lot::Mutex;
    use tokio::io::duplex;
    use tokio::sync::Semaphore;
    use tokio_util::sync::CancellationToken;

    fn test_server() -> Arc<Server> {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = Arc::new(Mutex::new(LruCache::new(1024 * 1024, clock.clone())));
        let crawler = Arc::new(Crawler::new(cache.clone(), 100, 0));
        Arc::new(Server::new(
            ServerConfig::default(),
            cache,
            crawler,
            Arc::new(Metrics::new()),
            clock,
            CancellationToken::new(),
        ))
    }

    async fn permit() -> OwnedSemaphorePermit {
        Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap()
    }

    /// Drive a full session over an in-memory stream and collect the
    /// server's entire reply
    async fn session(server: Arc<Server>, input: &[u8]) -> Vec<u8> {
        let (mut client, conn) = duplex(64 * 1024);
        let task = tokio::spawn(handle(server, conn, permit().await));

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        task.await.unwrap().unwrap();
        reply
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let reply = session(
            test_server(),
            b"set a 0 0 1\r\nx\r\nget a\r\nget miss\r\nquit\r\n",
        )
        .await;
        assert_eq!(reply, b"STORED\r\nVALUE a 0 1\r\nx\r\nEND\r\nEND\r\n");
    }

    #[tokio::test]
    async fn test_noreply_suppresses_response() {
        let reply = session(
            test_server(),
            b"set a 0 0 1 noreply\r\nx\r\nget a\r\nquit\r\n",
        )
        .await;
        assert_eq!(reply, b"VALUE a 0 1\r\nx\r\nEND\r\n");
    }

    #[tokio::test]
    async fn test_split_storage_command_across_reads() {
        let server = test_server();
        let (mut client, conn) = duplex(64 * 1024);
        let task = tokio::spawn(handle(server, conn, permit().await));

        // Header first, data block in a later write
        client.write_all(b"set k 0 0 5\r\n").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"hello\r\nget k\r\nquit\r\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(reply, b"STORED\r\nVALUE k 0 5\r\nhello\r\nEND\r\n");
    }

    #[tokio::test]
    async fn test_unknown_command_gets_generic_error() {
        let reply = session(test_server(), b"bogus\r\nversion\r\nquit\r\n").await;
        assert!(reply.starts_with(b"ERROR\r\nVERSION "));
    }

    #[tokio::test]
    async fn test_bad_value_gets_client_error_and_recovers() {
        let server = test_server();
        let reply = session(
            server.clone(),
            b"set k notanumber 0 1\r\nget missing\r\nquit\r\n",
        )
        .await;
        assert!(reply.starts_with(b"CLIENT_ERROR "));
        assert!(reply.ends_with(b"END\r\n"));
        assert_eq!(server.metrics.protocol_errors.get(), 1);
    }

    #[tokio::test]
    async fn test_bad_data_chunk_closes_connection() {
        let server = test_server();
        let reply = session(
            server.clone(),
            b"set k 0 0 3\r\nabcdef\r\nget k\r\nquit\r\n",
        )
        .await;
        // Fatal framing error: no reply, nothing after it is processed
        assert_eq!(reply, b"");
        assert_eq!(server.metrics.protocol_errors.get(), 1);
        assert!(server.cache.lock().get(b"k").is_none());
    }

    #[tokio::test]
    async fn test_overlong_header_closes_connection() {
        let server = test_server();
        // A long run of non-space bytes with no line terminator in sight
        let input = vec![b'x'; 600];
        let reply = session(server.clone(), &input).await;
        assert_eq!(reply, b"");
        assert_eq!(server.metrics.protocol_errors.get(), 1);
    }

    #[tokio::test]
    async fn test_eof_without_quit() {
        let reply = session(test_server(), b"set k 0 0 1\r\nv\r\n").await;
        assert_eq!(reply, b"STORED\r\n");
    }

    #[tokio::test]
    async fn test_gauge_decrements_when_reply_write_fails() {
        let server = test_server();
        server.metrics.active_connections.inc();

        // Peer hangs up before the reply can be written
        let (mut client, conn) = duplex(1024);
        client.write_all(b"get k\r\n").await.unwrap();
        drop(client);

        let task = tokio::spawn(handle(server.clone(), conn, permit().await));
        task.await.unwrap().unwrap();
        assert_eq!(server.metrics.active_connections.get(), 0);
    }

    #[tokio::test]
    async fn test_oversized_declared_length_closes_connection() {
        let server = test_server();
        let reply = session(
            server.clone(),
            b"set k 0 0 18446744073709551615\r\nxxx\r\nget k\r\nquit\r\n",
        )
        .await;
        assert_eq!(reply, b"");
        assert_eq!(server.metrics.protocol_errors.get(), 1);
        assert!(server.cache.lock().get(b"k").is_none());
    }

    #[tokio::test]
    async fn test_cancellation_stops_connection() {
        let server = test_server();
        let (client, conn) = duplex(1024);
        let task = tokio::spawn(handle(server.clone(), conn, permit().await));

        server.cancel_token.cancel();
        task.await.unwrap().unwrap();
        drop(client);
    }
}
