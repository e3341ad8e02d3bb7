use crate::config::{Config, SharedConfig};
use crate::connection::{self, Event, Peer};
use crate::dispatcher::Dispatcher;
use crate::error::BlinkResult;
use crate::store::{SharedStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts connections and owns the shutdown signal.
pub struct Server {
    config: SharedConfig,
    store: SharedStore,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Server {
            config: Arc::new(config),
            store: Arc::new(Store::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    /// Bind the configured address and serve until [`Server::shutdown`].
    /// A bind failure is returned immediately.
    pub async fn start(&self) -> BlinkResult<()> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until [`Server::shutdown`].
    pub async fn serve(&self, listener: TcpListener) -> BlinkResult<()> {
        let (events_tx, events_rx) = mpsc::channel(self.config.command_queue.max(1));
        let (register_tx, register_rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(
            self.config.clone(),
            self.store.clone(),
            events_rx,
            register_rx,
            self.shutdown.clone(),
        );
        let dispatcher = tokio::spawn(dispatcher.run());

        info!("BlinkDB server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, addr)) => self.handle_conn(stream, addr, &events_tx, &register_tx),
                    Err(e) => warn!("accept error: {e}"),
                },
            }
        }

        drop(listener);
        info!("BlinkDB server shutting down");
        if let Err(e) = dispatcher.await {
            warn!("dispatcher task failed: {e}");
        }
        Ok(())
    }

    /// Stop accepting, stop the dispatcher and close every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn handle_conn(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        events: &mpsc::Sender<Event>,
        register: &mpsc::UnboundedSender<Peer>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {addr}: {e}");
        }

        let (peer, session) = connection::split(stream, addr, events.clone(), self.shutdown.clone());
        debug!(id = session.id(), "new connection from {addr}");

        // Registration is queued before the session exists, so the
        // dispatcher sees it ahead of any command from this connection.
        if register.send(peer).is_err() {
            warn!("dispatcher is gone, dropping connection from {addr}");
            return;
        }
        tokio::spawn(session.run());
    }
}
