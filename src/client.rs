//! Async client for the BlinkDB wire protocol.
//!
//! SET and DELETE are silent on the wire: the server sends nothing back when
//! they succeed. If one of them is rejected (for example with NOAUTH), the
//! error reply arrives unprompted and is returned by the next call that reads
//! a reply, or by [`Client::poll_reply`].

use crate::error::{BlinkError, BlinkResult};
use crate::resp::{RespCodec, RespValue};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

pub struct Client {
    framed: Framed<TcpStream, RespCodec>,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> BlinkResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Client {
            framed: Framed::new(stream, RespCodec),
        })
    }

    pub async fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> BlinkResult<()> {
        self.send(vec![Bytes::from_static(b"SET"), key.into(), value.into()])
            .await
    }

    pub async fn get(&mut self, key: impl Into<Bytes>) -> BlinkResult<Option<Bytes>> {
        self.send(vec![Bytes::from_static(b"GET"), key.into()]).await?;
        match self.read_reply().await? {
            RespValue::BulkString(value) => Ok(value),
            RespValue::Error(msg) => Err(BlinkError::Server(msg)),
            other => Err(BlinkError::Protocol(format!("unexpected reply to GET: {other:?}"))),
        }
    }

    pub async fn delete(&mut self, key: impl Into<Bytes>) -> BlinkResult<()> {
        self.send(vec![Bytes::from_static(b"DELETE"), key.into()])
            .await
    }

    pub async fn auth(&mut self, username: Option<&str>, password: &str) -> BlinkResult<()> {
        let mut args = vec![Bytes::from_static(b"AUTH")];
        if let Some(user) = username {
            args.push(Bytes::copy_from_slice(user.as_bytes()));
        }
        args.push(Bytes::copy_from_slice(password.as_bytes()));
        self.send(args).await?;

        match self.read_reply().await? {
            RespValue::SimpleString(_) => Ok(()),
            RespValue::Error(msg) => Err(BlinkError::Server(msg)),
            other => Err(BlinkError::Protocol(format!("unexpected reply to AUTH: {other:?}"))),
        }
    }

    /// Send an arbitrary command. Returns `None` for the silent forms of SET
    /// and DELETE, otherwise waits for the reply.
    pub async fn execute(&mut self, args: Vec<Bytes>) -> BlinkResult<Option<RespValue>> {
        let silent = is_silent(&args);
        self.send(args).await?;
        if silent {
            return Ok(None);
        }
        self.read_reply().await.map(Some)
    }

    /// Wait up to `wait` for an unprompted reply.
    pub async fn poll_reply(&mut self, wait: Duration) -> BlinkResult<Option<RespValue>> {
        match tokio::time::timeout(wait, self.read_reply()).await {
            Ok(reply) => reply.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn send(&mut self, args: Vec<Bytes>) -> BlinkResult<()> {
        let frame = RespValue::array(args.into_iter().map(RespValue::bulk_string).collect());
        self.framed.send(frame).await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> BlinkResult<RespValue> {
        match self.framed.next().await {
            Some(reply) => Ok(reply?),
            None => Err(BlinkError::ConnectionClosed),
        }
    }
}

/// SET and DELETE with a valid arity get no reply on success.
fn is_silent(args: &[Bytes]) -> bool {
    let Some(name) = args.first() else {
        return false;
    };
    let name = name.to_ascii_uppercase();
    matches!(
        (name.as_slice(), args.len()),
        (b"SET", 3) | (b"DELETE", 2)
    )
}
