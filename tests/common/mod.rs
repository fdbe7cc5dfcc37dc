//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use autohost::config::{AutohostConfig, DaemonConfig, ServerSection};
use autohost::lifecycle::startup::bootstrap;
use autohost::lifecycle::Shutdown;
use autohost::net::connection::Connection;
use autohost::net::tls::load_tls_acceptor;
use autohost::observability::logging::LogSink;
use autohost::session::ControlServer;
use autohost::vhost::descriptor::fixup;
use autohost::vhost::{ConfigTemplate, DescriptorLoader, EngineState, ResolutionEngine, ServerDescriptor};

/// Write a per-host fragment under `dir`, creating parent directories.
pub fn write_fragment(dir: &Path, relative: &str, body: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, body).unwrap();
    path
}

/// A `[server]` fragment with the given name and aliases.
pub fn fragment(name: &str, aliases: &[&str]) -> String {
    let aliases: Vec<String> = aliases.iter().map(|a| format!("\"{a}\"")).collect();
    format!(
        "[server]\nname = \"{name}\"\naliases = [{}]\nident = \"Welcome to {name}\"\n",
        aliases.join(", ")
    )
}

pub fn primary(addr: &str, port: u16) -> Arc<ServerDescriptor> {
    let section = ServerSection {
        name: Some("primary.example".into()),
        ..ServerSection::default()
    };
    Arc::new(fixup(section, addr.parse().unwrap(), port, None).unwrap())
}

/// Enabled engine state whose template lives under `dir`.
pub fn state(dir: &Path, template: &str, log: LogSink) -> EngineState {
    let template = ConfigTemplate::new(format!("{}/{}", dir.display(), template));
    EngineState::new(true, Some(template), log, primary("0.0.0.0", 21)).unwrap()
}

pub fn engine(dir: &Path, template: &str, log: LogSink) -> ResolutionEngine {
    ResolutionEngine::new(state(dir, template, log), DescriptorLoader::default())
}

pub fn connection(local: &str) -> Connection {
    Connection::new(local.parse().unwrap(), "192.0.2.10:40000".parse().unwrap())
}

/// Daemon config listening on an ephemeral loopback port.
pub fn daemon_config(dir: &Path, template: &str) -> DaemonConfig {
    DaemonConfig {
        server: ServerSection {
            name: Some("primary.example".into()),
            address: "127.0.0.1".into(),
            port: 0,
            ..ServerSection::default()
        },
        autohost: AutohostConfig {
            engine: true,
            config: Some(format!("{}/{}", dir.display(), template)),
            ..AutohostConfig::default()
        },
        ..DaemonConfig::default()
    }
}

/// Bootstrap and run a control server; returns its primary address.
pub async fn start_server(config: &DaemonConfig) -> (SocketAddr, Arc<ControlServer>, Shutdown) {
    start_server_with_tls(config, None).await
}

pub async fn start_server_with_tls(
    config: &DaemonConfig,
    tls: Option<TlsAcceptor>,
) -> (SocketAddr, Arc<ControlServer>, Shutdown) {
    let boot = bootstrap(config).await.unwrap();
    let engine = Arc::new(ResolutionEngine::new(boot.state, DescriptorLoader::default()));
    let shutdown = Shutdown::new();
    let server = Arc::new(ControlServer::new(engine, tls, shutdown.clone()));
    for listener in boot.listeners {
        tokio::spawn(Arc::clone(&server).serve(listener));
    }
    (boot.primary_addr, server, shutdown)
}

/// Self-signed certificate for `host`, written as PEM under `dir` and loaded
/// into an acceptor. Returns the certificate for the client's trust store.
pub fn self_signed(dir: &Path, host: &str) -> (TlsAcceptor, CertificateDer<'static>) {
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, certified.cert.pem()).unwrap();
    std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

    let acceptor = load_tls_acceptor(&cert_path, &key_path).unwrap();
    (acceptor, certified.cert.der().clone())
}

/// Line-oriented control-channel client.
pub struct ControlClient<S = TcpStream> {
    stream: BufReader<S>,
}

impl ControlClient<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: BufReader::new(TcpStream::connect(addr).await.unwrap()),
        }
    }

    /// Send `AUTH TLS` and complete the handshake, announcing `server_name`.
    pub async fn start_tls(
        mut self,
        server_name: &str,
        trusted: CertificateDer<'static>,
    ) -> ControlClient<TlsStream<TcpStream>> {
        assert_eq!(self.command("AUTH TLS").await, "234 AUTH TLS successful");

        let mut roots = RootCertStore::empty();
        roots.add(trusted).unwrap();
        let config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = ServerName::try_from(server_name.to_string()).unwrap();
        let stream = TlsConnector::from(Arc::new(config))
            .connect(name, self.stream.into_inner())
            .await
            .unwrap();
        ControlClient {
            stream: BufReader::new(stream),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ControlClient<S> {
    /// Read one reply line, CRLF stripped.
    pub async fn reply(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    /// Send a command and read the final line of its reply.
    pub async fn command(&mut self, command: &str) -> String {
        let stream = self.stream.get_mut();
        stream.write_all(format!("{command}\r\n").as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        loop {
            let line = self.reply().await;
            let bytes = line.as_bytes();
            if bytes.len() < 4 || bytes[3] == b' ' {
                return line;
            }
        }
    }
}
