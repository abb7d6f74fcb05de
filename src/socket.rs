//! Transport boundary (component G): a generic async byte stream, plus a
//! default TLS-over-TCP provider wired the way the original crate wired
//! its blocking `rustls`/`TcpStream` socket, ported to `tokio-rustls`.

use anyhow::{anyhow, Context};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, OwnedTrustAnchor, RootCertStore};
use tokio_rustls::{client::TlsStream, TlsConnector};
use url::Url;

/// Anything the connection actor can read the peer's frames from and
/// write its own frames into. Implemented for any async byte stream, so
/// tests can substitute `tokio::io::DuplexStream` for a real socket.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// The default production transport: TLS over TCP with ALPN negotiated
/// to `h2`, trusting the Mozilla root set shipped by `webpki-roots`.
#[must_use]
pub fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.add_server_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.0.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));
    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    Arc::new(config)
}

/// Opens a TCP connection to `url`'s host and wraps it in TLS, verifying
/// the peer negotiated ALPN `h2` (a peer that falls back to HTTP/1.1 is
/// not something this crate can speak to).
pub async fn connect(url: &Url, tls_config: Arc<rustls::ClientConfig>) -> anyhow::Result<TlsStream<TcpStream>> {
    let host = url.host_str().ok_or_else(|| anyhow!("URL has no host"))?;
    let port = url.port_or_known_default().unwrap_or(443);
    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    tcp.set_nodelay(true).ok();

    let server_name: rustls::ServerName = host
        .try_into()
        .map_err(|_| anyhow!("{host} is not a valid DNS name or IP address"))?;
    let connector = TlsConnector::from(tls_config);
    let stream = connector.connect(server_name, tcp).await.context("TLS handshake")?;

    let (_, session) = stream.get_ref();
    if session.alpn_protocol() != Some(b"h2") {
        return Err(anyhow!("peer did not negotiate ALPN h2"));
    }
    Ok(stream)
}
