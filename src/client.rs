use crate::connection::{self, ConnectionConfig, ConnectionHandle};
use crate::events::ConnectionEvent;
use crate::request::Request;
use crate::response::Response;
use crate::socket;
use anyhow::{anyhow, Context};
use log::trace;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_rustls::rustls;
use url::Url;

/// A connected HTTP/2 client: wraps one [`ConnectionHandle`] plus the
/// event receiver its connection emits.
pub struct Client {
    handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Client {
    /// Opens a TLS connection to `url`'s host and runs the connection
    /// handshake, using the default trust store and `h2` ALPN.
    pub async fn connect(url: &Url) -> anyhow::Result<Self> {
        Self::connect_with(url, socket::default_tls_config()).await
    }

    pub async fn connect_with(url: &Url, tls_config: Arc<rustls::ClientConfig>) -> anyhow::Result<Self> {
        Self::connect_with_config(url, tls_config, ConnectionConfig::default()).await
    }

    /// Opens a TLS connection to `url`'s host using a caller-provided
    /// [`ConnectionConfig`] (local settings override, `:scheme` override,
    /// reconnect hint).
    pub async fn connect_with_config(
        url: &Url,
        tls_config: Arc<rustls::ClientConfig>,
        config: ConnectionConfig,
    ) -> anyhow::Result<Self> {
        let stream = socket::connect(url, tls_config).await.context("opening HTTP/2 connection")?;
        let (handle, events) = connection::spawn(stream, config);
        Ok(Self { handle, events })
    }

    /// Submits a request and awaits its response.
    pub async fn send(&self, request: Request) -> anyhow::Result<Response> {
        trace!("{} {}", request.method, request.url);
        let response = self.handle.send(request).await.map_err(|err| anyhow!(err))?;
        trace!("response status={}", response.status);
        Ok(response)
    }

    /// Convenience for a bodyless GET against `url`.
    pub async fn get(&self, url: Url) -> anyhow::Result<Response> {
        self.send(Request::get(url)).await
    }

    /// The next out-of-band event from the connection (pushes, pings,
    /// GOAWAY, final close). `None` once the connection task has exited
    /// and every event has been drained.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }
}
