//! Transport handling: socket setup, read loop and outbound writer
//!
//! The transport is deliberately dumb. It opens the socket (plain or TLS),
//! feeds raw lines to the session and drains the outbound channel; all
//! protocol and lifecycle decisions live in the session.

use crate::event::DisconnectReason;
use crate::session::ChatSession;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{lookup_host, TcpStream},
    sync::mpsc,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Fire-and-forget handle to the outbound line writer.
///
/// Unbound while no connection is up; sends while unbound are dropped.
#[derive(Clone)]
pub struct OutboundSink {
    sender: Arc<RwLock<Option<mpsc::UnboundedSender<String>>>>,
}

impl OutboundSink {
    /// Create an unbound sink
    pub fn new() -> Self {
        Self {
            sender: Arc::new(RwLock::new(None)),
        }
    }

    /// Attach the sink to a live connection's outbound channel
    pub fn bind(&self, sender: mpsc::UnboundedSender<String>) {
        *self.sender.write() = Some(sender);
    }

    /// Detach the sink; subsequent sends are dropped
    pub fn unbind(&self) {
        *self.sender.write() = None;
    }

    /// Append a line to the transport. Returns false if no connection is
    /// bound or the writer has gone away.
    pub fn send_line(&self, line: &str) -> bool {
        let guard = self.sender.read();
        match guard.as_ref() {
            Some(sender) => {
                // Never log credentials
                if !line.starts_with("PASS") {
                    debug!("SENT: {}", line);
                }
                sender.send(line.to_string()).is_ok()
            }
            None => {
                debug!("Dropping outbound line, not connected: {}", line);
                false
            }
        }
    }

    /// Whether a connection is currently bound
    pub fn is_bound(&self) -> bool {
        self.sender.read().is_some()
    }
}

impl Default for OutboundSink {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) trait ChatStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ChatStream for T {}

/// Open the socket for the session's current server and run the connection
/// until it ends. Reports lifecycle transitions back into the session.
pub(crate) async fn run_transport(session: Arc<ChatSession>) {
    let (host, ports, config) = session.connect_params();
    if ports.is_empty() {
        warn!("No ports configured for {}", host);
        session.on_disconnect(DisconnectReason::ConnectionClosed);
        return;
    }
    session.on_connect_attempt(&host);

    // Resolution failure is the one error class that rotates servers, so
    // detect it separately from connect errors.
    let resolved = match lookup_host((host.as_str(), ports[0])).await {
        Ok(addrs) => addrs.count() > 0,
        Err(e) => {
            debug!("Resolution of {} failed: {}", host, e);
            false
        }
    };
    if !resolved {
        warn!("Unknown host: {}", host);
        session.on_disconnect(DisconnectReason::UnknownHost);
        return;
    }

    let timeout = Duration::from_secs(config.connect_timeout_seconds);
    let mut stream = None;
    let mut timed_out = false;
    for &port in &ports {
        match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(s)) => {
                info!("Connected to {}:{}", host, port);
                stream = Some(s);
                break;
            }
            Ok(Err(e)) => {
                warn!("Connect to {}:{} failed: {}", host, port, e);
            }
            Err(_) => {
                warn!("Connect to {}:{} timed out", host, port);
                timed_out = true;
            }
        }
    }
    let stream = match stream {
        Some(stream) => stream,
        None => {
            let reason = if timed_out {
                DisconnectReason::Timeout
            } else {
                DisconnectReason::ConnectionClosed
            };
            session.on_disconnect(reason);
            return;
        }
    };

    let stream: Box<dyn ChatStream> = if config.tls {
        match tls_connect(stream, &host, config.ca_file.as_deref()).await {
            Ok(tls_stream) => Box::new(tls_stream),
            Err(e) => {
                warn!("TLS handshake with {} failed: {}", host, e);
                session.on_disconnect(DisconnectReason::ConnectionClosed);
                return;
            }
        }
    } else {
        Box::new(stream)
    };

    session.on_connect();

    let (read_half, mut write_half) = tokio::io::split(stream);
    let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
    session.outbound().bind(sender);

    let write_task = tokio::spawn(async move {
        while let Some(line) = receiver.recv().await {
            let mut data = line;
            if !data.ends_with("\r\n") {
                data.push_str("\r\n");
            }
            if let Err(e) = write_half.write_all(data.as_bytes()).await {
                debug!("Write failed: {}", e);
                break;
            }
        }
    });

    session.send_login();

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    session.handle_line(&line);
                }
            }
            Ok(None) => {
                info!("Connection to {} closed", host);
                break;
            }
            Err(e) => {
                warn!("Read error on connection to {}: {}", host, e);
                break;
            }
        }
    }

    session.outbound().unbind();
    write_task.abort();
    session.on_disconnect(DisconnectReason::ConnectionClosed);
}

/// Wrap an open TCP stream in a TLS session
async fn tls_connect(
    stream: TcpStream,
    host: &str,
    ca_file: Option<&Path>,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(path) = ca_file {
        let pem = std::fs::read(path)?;
        let certs = rustls_pemfile::certs(&mut &pem[..])
            .map_err(|e| Error::Transport(format!("Invalid CA bundle: {}", e)))?;
        for cert in certs {
            roots
                .add(&rustls::Certificate(cert))
                .map_err(|e| Error::Transport(format!("Invalid CA certificate: {}", e)))?;
        }
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = rustls::ServerName::try_from(host)
        .map_err(|_| Error::Transport(format!("Invalid server name: {}", host)))?;
    Ok(connector.connect(server_name, stream).await?)
}
