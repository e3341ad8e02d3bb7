//! One client connection, split in two.
//!
//! The read half becomes a [`Session`] that runs its own decode loop and
//! submits events to the dispatcher. The write half becomes a [`Peer`] owned
//! by the dispatcher, together with the connection's `authenticated` flag.

use crate::command::{Command, Request};
use crate::error::{BlinkError, BlinkResult};
use crate::resp::{RespCodec, RespError, RespValue};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

pub type PeerId = u64;

/// What a session hands to the dispatcher, in decode order.
#[derive(Debug)]
pub enum Event {
    Command { peer: PeerId, command: Command },
    /// A reply decided by the decoder itself (unknown verb, bad AUTH arity,
    /// protocol error notice).
    Reply { peer: PeerId, reply: RespValue },
    /// The session has stopped reading; nothing else will follow.
    Closed { peer: PeerId },
}

/// Dispatcher-side state of a connection.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub authenticated: bool,
    writer: OwnedWriteHalf,
    /// Cancelled when the dispatcher lets go of this peer; stops its session.
    closed: CancellationToken,
}

impl Peer {
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        writer: OwnedWriteHalf,
        closed: CancellationToken,
    ) -> Self {
        Peer {
            id,
            addr,
            authenticated: false,
            writer,
            closed,
        }
    }

    /// Write raw bytes to the client.
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.writer.write_all(data).await?;
        Ok(data.len())
    }

    pub async fn reply(&mut self, value: &RespValue) -> std::io::Result<usize> {
        self.send(&value.serialize()).await
    }

    /// Shut down the write side and stop the session; the socket closes
    /// once the session drops its read half.
    pub async fn close(mut self) {
        self.closed.cancel();
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.addr, "shutdown error: {e}");
        }
    }
}

/// Read side of a connection, driven by its own task.
pub struct Session {
    id: PeerId,
    addr: SocketAddr,
    frames: FramedRead<OwnedReadHalf, RespCodec>,
    events: mpsc::Sender<Event>,
    closed: CancellationToken,
}

/// Split an accepted stream into the dispatcher's [`Peer`] and the
/// [`Session`] that reads from it.
pub fn split(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
) -> (Peer, Session) {
    let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
    let (reader, writer) = stream.into_split();
    let closed = shutdown.child_token();
    let peer = Peer::new(id, addr, writer, closed.clone());
    let session = Session {
        id,
        addr,
        frames: FramedRead::new(reader, RespCodec),
        events,
        closed,
    };
    (peer, session)
}

impl Session {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Run the decode loop until the client goes away, a fatal protocol
    /// error occurs, the dispatcher drops the peer, or the server shuts down.
    pub async fn run(mut self) {
        match self.read_loop().await {
            Ok(()) | Err(BlinkError::ShuttingDown) => {
                debug!(peer = %self.addr, "connection closed")
            }
            Err(e) if e.is_transport() => debug!(peer = %self.addr, "connection dropped: {e}"),
            Err(e) => warn!(peer = %self.addr, "closing connection: {e}"),
        }
        // Teardown goes through the same queue as commands, so everything
        // this session submitted is applied before the peer is released.
        let _ = self.events.send(Event::Closed { peer: self.id }).await;
    }

    async fn read_loop(&mut self) -> BlinkResult<()> {
        loop {
            let frame = tokio::select! {
                frame = self.frames.next() => frame,
                _ = self.closed.cancelled() => return Ok(()),
            };

            let frame = match frame {
                None => return Ok(()),
                Some(Ok(frame)) => frame,
                Some(Err(RespError::Io(e))) => return Err(e.into()),
                Some(Err(e)) => return self.fail(e.into()).await,
            };

            match Command::parse(frame) {
                Ok(Request::Command(command)) => {
                    self.submit(Event::Command { peer: self.id, command }).await?
                }
                Ok(Request::Reject(reply)) => {
                    self.submit(Event::Reply { peer: self.id, reply }).await?
                }
                Ok(Request::Ignore) => {}
                Err(e) => return self.fail(e).await,
            }
        }
    }

    /// Report a fatal protocol error to the client, then end the loop.
    async fn fail(&self, err: BlinkError) -> BlinkResult<()> {
        let reply = err.to_resp_error();
        self.submit(Event::Reply { peer: self.id, reply }).await?;
        Err(err)
    }

    /// Blocks while the queue is full; this is the only backpressure.
    async fn submit(&self, event: Event) -> BlinkResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| BlinkError::ShuttingDown)
    }
}
