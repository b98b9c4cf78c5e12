use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, span, Level};

use super::commands::{self, Registry};
use super::engine::Engine;
use super::parser;
use super::protocol::RespFrame;
use super::types::{CommandError, ResultT};

const READ_CHUNK: usize = 4096;

/// Result of running one frame through the command layer: a normal reply,
/// a hangup with no reply (BLPOP cancellation, spec.md §5), or a caught
/// handler panic that still owes the client a reply before the connection
/// closes (spec.md §7).
enum HandlerOutcome {
    Reply(RespFrame),
    Hangup,
    Panicked(RespFrame),
}

/// Per-connection state machine (spec.md §4.5): `ACCEPTED → READING →
/// DISPATCHING → WRITING → READING ...`. One task per connection, owning
/// its growable read buffer and write side; commands for this connection
/// are dispatched and replied to strictly in order.
pub struct Connection {
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    buf: BytesMut,
    peer: SocketAddr,
    client_id: u64,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, client_id: u64) -> Connection {
        let (reader, writer) = stream.into_split();
        Connection {
            reader,
            writer: BufWriter::new(writer),
            buf: BytesMut::with_capacity(READ_CHUNK),
            peer,
            client_id,
        }
    }

    pub async fn run(mut self, registry: Arc<Registry>, engine: Engine) {
        info!(client_id = self.client_id, peer = %self.peer, "connection accepted");
        loop {
            let mut chunk = [0u8; READ_CHUNK];
            let n = match self.reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!(client_id = self.client_id, "eof from peer");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    error!(client_id = self.client_id, %err, "read error, closing connection");
                    break;
                }
            };
            self.buf.extend_from_slice(&chunk[..n]);

            let (frames, consumed) = match parser::decode_all(&self.buf) {
                Ok(res) => res,
                Err(err) => {
                    error!(client_id = self.client_id, %err, "malformed RESP frame, closing connection");
                    break;
                }
            };
            let _ = self.buf.split_to(consumed);

            if self.dispatch_frames(&registry, &engine, frames).await.is_err() {
                break;
            }
        }
        info!(client_id = self.client_id, "connection closed");
    }

    /// Runs every fully-decoded frame from one read in sequence, writing
    /// each reply before the next frame is dispatched (spec.md §4.5). A
    /// write failure, a BLPOP cancellation, or a handler panic all end the
    /// connection.
    async fn dispatch_frames(
        &mut self,
        registry: &Arc<Registry>,
        engine: &Engine,
        frames: Vec<RespFrame>,
    ) -> Result<(), ()> {
        for frame in frames {
            let span = span!(Level::DEBUG, "dispatch", client_id = self.client_id);
            let _guard = span.enter();

            let argv = match parser::extract_argv(frame) {
                Ok(argv) => argv,
                Err(err) => {
                    self.write_frame(err.into_resp()).await.map_err(|_| ())?;
                    continue;
                }
            };
            debug!(client_id = self.client_id, "dispatching command");
            match Self::run_handler(registry.clone(), argv, engine.clone()).await {
                HandlerOutcome::Reply(reply) => self.write_frame(reply).await.map_err(|_| ())?,
                HandlerOutcome::Hangup => return Err(()),
                HandlerOutcome::Panicked(reply) => {
                    let _ = self.write_frame(reply).await;
                    return Err(());
                }
            }
        }
        Ok(())
    }

    /// Runs dispatch on a spawned task so a handler panic is caught at the
    /// connection-task boundary (spec.md §7) instead of unwinding this task
    /// silently: a panic becomes a `-ERR internal` reply, after which the
    /// connection is closed.
    async fn run_handler(registry: Arc<Registry>, argv: Vec<bytes::Bytes>, engine: Engine) -> HandlerOutcome {
        match tokio::spawn(async move { commands::dispatch(&registry, argv, &engine).await }).await {
            Ok(Some(reply)) => HandlerOutcome::Reply(reply),
            Ok(None) => HandlerOutcome::Hangup,
            Err(err) => {
                error!(panicked = err.is_panic(), "handler panicked, closing connection");
                HandlerOutcome::Panicked(CommandError::Internal("internal".into()).into_resp())
            }
        }
    }

    async fn write_frame(&mut self, frame: RespFrame) -> ResultT<()> {
        match frame.write_async(&mut self.writer, true).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(client_id = self.client_id, %err, "write error, closing connection");
                Err(err)
            }
        }
    }
}
