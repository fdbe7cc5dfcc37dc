//! Control-channel server.
//!
//! # Responsibilities
//! - Accept loop per listener, stopped by the shutdown signal
//! - Fire the connect trigger before greeting
//! - Drive the command loop and the in-band `AUTH TLS` upgrade
//! - Fire the name-negotiated trigger with the client's SNI and the host
//!   command trigger on `HOST`
//! - Hold each session against its identity's `max_clients`
//!
//! # Design Decisions
//! - Resolution runs on the blocking pool; it touches the filesystem
//! - The serving identity is re-read from the binding table after every
//!   trigger, falling back to the primary descriptor
//! - Idle timeout comes from the identity currently being served
//! - `HOST` arguments that are not host names never reach resolution

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::lifecycle::Shutdown;
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::listener::Listener;
use crate::observability::metrics;
use crate::session::command::{is_host_argument, Command, Reply, MAX_LINE};
use crate::session::limits::{ClientLimits, ClientSlot};
use crate::vhost::{ResolutionEngine, ServerDescriptor};

/// Per-connection state.
#[derive(Debug)]
struct Session {
    conn: Connection,
    serving: Arc<ServerDescriptor>,
    slot: ClientSlot,
    secured: bool,
}

/// How a command loop ended.
enum Exit<S> {
    Closed,
    /// `AUTH TLS` was accepted; the raw stream is handed back for the handshake.
    Upgrade(S),
}

enum Event {
    Line(usize),
    Idle,
    Shutdown,
}

/// Serves control connections and routes each one to a server identity.
pub struct ControlServer {
    engine: Arc<ResolutionEngine>,
    tls: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
    limits: Arc<ClientLimits>,
    shutdown: Shutdown,
}

impl ControlServer {
    pub fn new(engine: Arc<ResolutionEngine>, tls: Option<TlsAcceptor>, shutdown: Shutdown) -> Self {
        Self {
            engine,
            tls,
            tracker: ConnectionTracker::new(),
            limits: Arc::new(ClientLimits::new()),
            shutdown,
        }
    }

    pub fn engine(&self) -> &Arc<ResolutionEngine> {
        &self.engine
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn limits(&self) -> &ClientLimits {
        &self.limits
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(self: Arc<Self>, listener: Listener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let local = listener.local_addr().ok();
        tracing::info!(address = ?local, "Control server accepting connections");

        loop {
            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = shutdown_rx.recv() => break,
            };

            let (stream, peer_addr, slot) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let _slot = slot;
                if let Err(e) = server.handle(stream, peer_addr).await {
                    tracing::debug!(peer_addr = %peer_addr, error = %e, "Control connection ended with error");
                }
            });
        }

        tracing::info!(address = ?local, "Control server stopped accepting");
    }

    /// Serve one accepted TCP connection.
    pub async fn handle(&self, stream: TcpStream, peer_addr: SocketAddr) -> io::Result<()> {
        let conn = Connection::new(stream.local_addr()?, peer_addr);
        self.run_session(conn, stream).await
    }

    /// Run a full session over `stream`, which was accepted as `conn`.
    pub async fn run_session<S>(&self, conn: Connection, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let _guard = self.tracker.track(conn.id());
        metrics::record_connection();
        let mut shutdown_rx = self.shutdown.subscribe();

        tracing::debug!(
            connection_id = %conn.id(),
            local_addr = %conn.local_addr(),
            peer_addr = %conn.peer_addr(),
            "Control connection opened"
        );

        let trigger_conn = conn.clone();
        if let Some(outcome) = self.resolve(move |engine| engine.on_connect(&trigger_conn)).await {
            tracing::debug!(connection_id = %conn.id(), outcome = outcome.label(), "Connect resolution finished");
        }

        let serving = self.route(&conn, None);
        let mut stream = stream;
        let Some(slot) = self.limits.admit(&serving) else {
            tracing::info!(connection_id = %conn.id(), server_name = %serving.name, "Too many clients, refusing session");
            return write_reply(&mut stream, &Reply::too_many_clients(&serving.name)).await;
        };
        let mut session = Session {
            conn,
            serving,
            slot,
            secured: false,
        };

        write_reply(&mut stream, &Reply::greeting(&session.serving.banner())).await?;

        let raw = match self.command_loop(&mut session, stream, &mut shutdown_rx).await? {
            Exit::Closed => return Ok(()),
            Exit::Upgrade(raw) => raw,
        };

        let Some(acceptor) = self.tls.clone() else {
            return Ok(());
        };
        let mut tls = acceptor.accept(raw).await?;
        session.secured = true;

        if let Some(name) = tls.get_ref().1.server_name().map(str::to_string) {
            let trigger_conn = session.conn.clone();
            let sni = name.clone();
            if let Some(outcome) = self
                .resolve(move |engine| engine.on_name_negotiated(&trigger_conn, &sni))
                .await
            {
                tracing::debug!(
                    connection_id = %session.conn.id(),
                    server_name = %name,
                    outcome = outcome.label(),
                    "Name-negotiated resolution finished"
                );
            }
            if let Some(server) = self.try_route(&session.conn, Some(&name)) {
                if let Err(refusal) = self.switch(&mut session, server) {
                    return write_reply(&mut tls, &refusal).await;
                }
            }
        }

        match self.command_loop(&mut session, tls, &mut shutdown_rx).await? {
            Exit::Closed | Exit::Upgrade(_) => Ok(()),
        }
    }

    async fn command_loop<S>(
        &self,
        session: &mut Session,
        stream: S,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> io::Result<Exit<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();

        loop {
            line.clear();
            let idle = Duration::from_secs(session.serving.timeout_idle_secs);

            let event = {
                let mut limited = (&mut reader).take(MAX_LINE as u64);
                let read = limited.read_line(&mut line);
                tokio::select! {
                    res = tokio::time::timeout(idle, read) => match res {
                        Ok(res) => Event::Line(res?),
                        Err(_) => Event::Idle,
                    },
                    _ = shutdown_rx.recv() => Event::Shutdown,
                }
            };

            match event {
                Event::Line(0) => return Ok(Exit::Closed),
                Event::Line(n) if n >= MAX_LINE && !line.ends_with('\n') => {
                    write_reply(reader.get_mut(), &Reply::new(500, "Command line too long")).await?;
                    return Ok(Exit::Closed);
                }
                Event::Line(_) => {}
                Event::Idle => {
                    tracing::debug!(connection_id = %session.conn.id(), "Idle timeout");
                    write_reply(reader.get_mut(), &Reply::idle_timeout()).await?;
                    return Ok(Exit::Closed);
                }
                Event::Shutdown => {
                    write_reply(reader.get_mut(), &Reply::shutting_down()).await?;
                    return Ok(Exit::Closed);
                }
            }

            let command = Command::parse(&line);
            tracing::trace!(connection_id = %session.conn.id(), command = ?command, "Command received");

            let reply = match command {
                Command::Feat => Reply::features(self.tls.is_some()),
                Command::Noop => Reply::new(200, "NOOP command successful"),
                Command::Quit => {
                    write_reply(reader.get_mut(), &Reply::new(221, "Goodbye.")).await?;
                    return Ok(Exit::Closed);
                }
                Command::Host(None) => Reply::new(501, "HOST requires a host name"),
                Command::Host(Some(_)) if session.secured => {
                    Reply::new(503, "HOST not allowed after security exchange")
                }
                Command::Host(Some(name)) if !is_host_argument(&name) => {
                    Reply::new(501, format!("Invalid host name '{name}'"))
                }
                Command::Host(Some(name)) => match self.host(session, name).await {
                    Ok(reply) => reply,
                    Err(refusal) => {
                        write_reply(reader.get_mut(), &refusal).await?;
                        return Ok(Exit::Closed);
                    }
                },
                Command::Auth(None) => Reply::new(501, "AUTH requires a mechanism"),
                Command::Auth(Some(_)) if session.secured => Reply::new(503, "Already secured"),
                Command::Auth(Some(mechanism)) => {
                    if self.tls.is_none() {
                        Reply::new(504, "AUTH TLS not configured")
                    } else if !mechanism.eq_ignore_ascii_case("TLS") {
                        Reply::new(504, format!("AUTH {mechanism} not supported"))
                    } else {
                        write_reply(reader.get_mut(), &Reply::new(234, "AUTH TLS successful")).await?;
                        return Ok(Exit::Upgrade(reader.into_inner()));
                    }
                }
                Command::Unknown(verb) => Reply::not_understood(&verb),
            };

            write_reply(reader.get_mut(), &reply).await?;
        }
    }

    /// `Err` carries the closing reply when the named identity is full.
    async fn host(&self, session: &mut Session, name: String) -> Result<Reply, Reply> {
        let trigger_conn = session.conn.clone();
        let requested = name.clone();
        if let Some(declined) = self
            .resolve(move |engine| engine.on_host_command(&trigger_conn, &requested))
            .await
        {
            tracing::debug!(
                connection_id = %session.conn.id(),
                server_name = %name,
                outcome = declined.0.label(),
                "Host command resolution finished"
            );
        }

        match self.try_route(&session.conn, Some(&name)) {
            Some(server) => {
                let reply = Reply::host_accepted(&server.name);
                self.switch(session, server)?;
                Ok(reply)
            }
            None => Ok(Reply::host_unknown(&name)),
        }
    }

    /// Serve `server` from now on, moving the session's slot to it first.
    fn switch(&self, session: &mut Session, server: Arc<ServerDescriptor>) -> Result<(), Reply> {
        if !session.slot.holds(&server.name) {
            session.slot = self
                .limits
                .admit(&server)
                .ok_or_else(|| Reply::too_many_clients(&server.name))?;
        }
        session.serving = server;
        Ok(())
    }

    /// Run a resolution trigger on the blocking pool.
    async fn resolve<T, F>(&self, trigger: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&ResolutionEngine) -> T + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || trigger(&engine)).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!(error = %e, "Resolution task failed");
                None
            }
        }
    }

    fn try_route(&self, conn: &Connection, name: Option<&str>) -> Option<Arc<ServerDescriptor>> {
        self.engine.state().table().route(conn.local_addr(), name)
    }

    fn route(&self, conn: &Connection, name: Option<&str>) -> Arc<ServerDescriptor> {
        self.try_route(conn, name)
            .unwrap_or_else(|| Arc::clone(self.engine.state().primary()))
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &Reply) -> io::Result<()> {
    writer.write_all(reply.to_string().as_bytes()).await?;
    writer.flush().await
}
