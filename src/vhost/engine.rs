//! Resolution engine and its process-wide state.
//!
//! # Triggers
//! ```text
//! T1 connect          → attempt(conn, no name,  suppress %n misses)
//! T2 name negotiated  → attempt(conn, SNI name, log misses)
//! T3 HOST command     → attempt(conn, argument, log misses) → always Declined
//! ```
//!
//! # Attempt
//! ```text
//! template.resolve → stat ──miss──▶ NotFound (bindings untouched)
//!                      │
//!                      ▼
//!                    load ──err──▶ Failed (bindings untouched)
//!                      │
//!                      ▼
//!          find binding → bind aliases → replace | create + open
//! ```
//!
//! # Design Decisions
//! - A dynamic descriptor always supersedes whatever is bound at the same
//!   address and port, static or dynamic
//! - A failed attempt never removes or alters an existing binding
//! - One attempt works against one `EngineState` snapshot even if a reload
//!   swaps the state mid-attempt
//! - Losing a create race to another connection degrades to replace, so the
//!   last writer wins

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::AutohostConfig;
use crate::net::connection::Connection;
use crate::observability::logging::LogSink;
use crate::observability::metrics;
use crate::vhost::alias::AliasBinder;
use crate::vhost::binding::BindingTable;
use crate::vhost::descriptor::ServerDescriptor;
use crate::vhost::error::{BindingError, LoadError, ResolveError, StartupError};
use crate::vhost::loader::DescriptorLoader;
use crate::vhost::template::ConfigTemplate;

/// Emit a diagnostic both as a tracing event and to the autohost log.
macro_rules! diag {
    ($state:expr, $level:ident, $($arg:tt)+) => {{
        tracing::$level!(target: "autohost", $($arg)+);
        $state.log().write(format_args!($($arg)+));
    }};
}

/// Everything the engine needs for one configuration epoch.
#[derive(Debug)]
pub struct EngineState {
    enabled: bool,
    template: Option<ConfigTemplate>,
    log: LogSink,
    table: BindingTable,
    primary: Arc<ServerDescriptor>,
}

impl EngineState {
    /// Build a fresh state with an empty binding table.
    ///
    /// An enabled engine without a template is a fatal configuration error.
    pub fn new(
        enabled: bool,
        template: Option<ConfigTemplate>,
        log: LogSink,
        primary: Arc<ServerDescriptor>,
    ) -> Result<Self, StartupError> {
        if enabled && template.is_none() {
            return Err(StartupError::ConfigMissing("autohost.config"));
        }
        Ok(Self {
            enabled,
            template,
            log,
            table: BindingTable::new(),
            primary,
        })
    }

    /// Build state from the `[autohost]` section, opening the log if
    /// configured. The log is only opened when the engine is enabled.
    pub fn from_config(config: &AutohostConfig, primary: Arc<ServerDescriptor>) -> Result<Self, StartupError> {
        let log = if config.engine {
            LogSink::open_or_disabled(config.log.as_deref())
        } else {
            LogSink::disabled()
        };
        Self::new(config.engine, config.config.clone().map(ConfigTemplate::new), log, primary)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn template(&self) -> Option<&ConfigTemplate> {
        self.template.as_ref()
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    /// The statically configured identity.
    pub fn primary(&self) -> &Arc<ServerDescriptor> {
        &self.primary
    }
}

/// Trigger points in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connect,
    NameNegotiated,
    HostCommand,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Connect => "connect",
            Trigger::NameNegotiated => "name_negotiated",
            Trigger::HostCommand => "host_command",
        }
    }
}

/// Result of one resolution attempt.
#[derive(Debug)]
pub enum Outcome {
    /// Engine switched off.
    Disabled,
    /// No fragment for this connection.
    NotFound,
    /// Fragment present but unusable; bindings unchanged.
    Failed(ResolveError),
    /// An existing binding now serves the new descriptor.
    Replaced { aliases: usize },
    /// A new binding was created and opened.
    Created { aliases: usize },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Disabled => "disabled",
            Outcome::NotFound => "not_found",
            Outcome::Failed(_) => "failed",
            Outcome::Replaced { .. } => "replaced",
            Outcome::Created { .. } => "created",
        }
    }

    /// Whether a descriptor was bound.
    pub fn is_bound(&self) -> bool {
        matches!(self, Outcome::Replaced { .. } | Outcome::Created { .. })
    }
}

/// What T3 reports to the command pipeline. The pipeline still owns the
/// protocol reply.
#[derive(Debug)]
pub struct Declined(pub Outcome);

/// Resolves connections to dynamically discovered server descriptors.
#[derive(Debug)]
pub struct ResolutionEngine {
    state: ArcSwap<EngineState>,
    loader: DescriptorLoader,
}

impl ResolutionEngine {
    pub fn new(state: EngineState, loader: DescriptorLoader) -> Self {
        metrics::set_binding_count(state.table().len());
        Self {
            state: ArcSwap::from_pointee(state),
            loader,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> Arc<EngineState> {
        self.state.load_full()
    }

    /// Swap in a freshly built state, discarding every dynamic binding.
    /// Returns the previous state.
    pub fn reset(&self, state: EngineState) -> Arc<EngineState> {
        metrics::set_binding_count(state.table().len());
        let previous = self.state.swap(Arc::new(state));
        tracing::info!(
            target: "autohost",
            discarded_bindings = previous.table().len(),
            "Engine state reset"
        );
        previous
    }

    /// T1: the connection was just accepted.
    ///
    /// Name-based templates cannot resolve yet, so their not-found misses are
    /// not logged.
    pub fn on_connect(&self, conn: &Connection) -> Outcome {
        let outcome = self.attempt_resolution(conn, None, true);
        record(Trigger::Connect, &outcome);
        outcome
    }

    /// T2: an encrypted session negotiated `server_name`.
    pub fn on_name_negotiated(&self, conn: &Connection, server_name: &str) -> Outcome {
        let outcome = self.attempt_resolution(conn, Some(server_name), false);
        record(Trigger::NameNegotiated, &outcome);
        outcome
    }

    /// T3: the client explicitly selected a virtual host.
    pub fn on_host_command(&self, conn: &Connection, server_name: &str) -> Declined {
        let outcome = self.attempt_resolution(conn, Some(server_name), false);
        record(Trigger::HostCommand, &outcome);
        Declined(outcome)
    }

    /// Run one resolution attempt for `conn`.
    pub fn attempt_resolution(
        &self,
        conn: &Connection,
        server_name: Option<&str>,
        suppress_missing_if_name_token: bool,
    ) -> Outcome {
        let state = self.state();
        if !state.enabled() {
            return Outcome::Disabled;
        }
        let Some(template) = state.template() else {
            return Outcome::Disabled;
        };

        let path = template.resolve(conn.local_ip(), conn.local_port(), server_name);
        tracing::trace!(
            target: "autohost",
            connection_id = %conn.id(),
            path = %path.display(),
            "Using config path"
        );

        if let Err(e) = self.loader.stat(&path) {
            let expected = suppress_missing_if_name_token
                && template.has_server_name_token()
                && e.is_file_not_found();
            if !expected {
                diag!(state, info, "{}", e);
            }
            return Outcome::NotFound;
        }

        let descriptor = match self.loader.load(&path, conn) {
            Ok(descriptor) => Arc::new(descriptor),
            Err(e @ LoadError::NotFound { .. }) => {
                diag!(state, info, "{}", e);
                return Outcome::NotFound;
            }
            Err(e) => {
                diag!(state, warn, "{}", e);
                return Outcome::Failed(e.into());
            }
        };

        match bind(&state, conn.local_ip(), conn.local_port(), descriptor) {
            Ok(outcome) => {
                tracing::debug!(
                    target: "autohost",
                    connection_id = %conn.id(),
                    addr = %conn.local_addr(),
                    outcome = outcome.label(),
                    "Found autohost config"
                );
                metrics::set_binding_count(state.table().len());
                outcome
            }
            Err(e) => {
                diag!(state, warn, "{}", e);
                Outcome::Failed(e)
            }
        }
    }
}

fn bind(
    state: &EngineState,
    addr: IpAddr,
    port: u16,
    descriptor: Arc<ServerDescriptor>,
) -> Result<Outcome, ResolveError> {
    let table = state.table();
    let existing = table.find_binding(addr, port);
    let aliases = AliasBinder::new(state.log()).bind_aliases(&descriptor, existing.as_deref());

    match existing {
        Some(binding) => {
            table.replace_descriptor(&binding, descriptor);
            Ok(Outcome::Replaced { aliases })
        }
        None => create_or_replace(table, addr, port, descriptor, aliases),
    }
}

/// Create and open a binding seen as absent. If another connection created
/// it first, take it over instead.
fn create_or_replace(
    table: &BindingTable,
    addr: IpAddr,
    port: u16,
    descriptor: Arc<ServerDescriptor>,
    aliases: usize,
) -> Result<Outcome, ResolveError> {
    match table.create_binding(Arc::clone(&descriptor), addr, port) {
        Ok(_) => {}
        Err(BindingError::Duplicate(key)) => {
            let binding = table
                .find_binding(addr, port)
                .ok_or(ResolveError::BindingCreate(BindingError::NotFound(key)))?;
            table.replace_descriptor(&binding, descriptor);
            return Ok(Outcome::Replaced { aliases });
        }
        Err(e) => return Err(ResolveError::BindingCreate(e)),
    }

    table.open_binding(addr, port).map_err(ResolveError::BindingOpen)?;
    Ok(Outcome::Created { aliases })
}

fn record(trigger: Trigger, outcome: &Outcome) {
    metrics::record_resolution(trigger.as_str(), outcome.label());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSection;
    use crate::vhost::descriptor::fixup;
    use std::path::Path;
    use tempfile::TempDir;

    fn primary() -> Arc<ServerDescriptor> {
        let section = ServerSection {
            name: Some("primary".into()),
            ..ServerSection::default()
        };
        Arc::new(fixup(section, "0.0.0.0".parse().unwrap(), 21, None).unwrap())
    }

    fn engine(template: &str, log: LogSink) -> ResolutionEngine {
        let state = EngineState::new(true, Some(ConfigTemplate::new(template)), log, primary()).unwrap();
        ResolutionEngine::new(state, DescriptorLoader::default())
    }

    fn conn(local: &str) -> Connection {
        Connection::new(local.parse().unwrap(), "192.0.2.1:40000".parse().unwrap())
    }

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn template_in(dir: &TempDir, pattern: &str) -> String {
        dir.path().join(pattern).display().to_string()
    }

    #[test]
    fn enabled_without_template_is_fatal() {
        let err = EngineState::new(true, None, LogSink::disabled(), primary()).unwrap_err();
        assert!(matches!(err, StartupError::ConfigMissing("autohost.config")));
    }

    #[test]
    fn disabled_engine_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"a\"\n");
        let state = EngineState::new(
            false,
            Some(ConfigTemplate::new(template_in(&dir, "%0.toml"))),
            LogSink::disabled(),
            primary(),
        )
        .unwrap();
        let engine = ResolutionEngine::new(state, DescriptorLoader::default());

        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Disabled));
        assert!(engine.state().table().is_empty());
    }

    #[test]
    fn connect_creates_and_opens_binding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"a.example\"\n");
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());

        let outcome = engine.on_connect(&conn("10.0.0.5:21"));
        assert!(matches!(outcome, Outcome::Created { aliases: 0 }));

        let state = engine.state();
        assert_eq!(state.table().len(), 1);
        let binding = state.table().find_binding("10.0.0.5".parse().unwrap(), 21).unwrap();
        assert!(binding.is_open());
        assert_eq!(binding.server().name, "a.example");
    }

    #[test]
    fn repeated_resolution_replaces() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"a.example\"\n");
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());

        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Created { .. }));
        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Replaced { .. }));
        assert_eq!(engine.state().table().len(), 1);
    }

    #[test]
    fn replacement_keeps_single_binding() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());
        let state = engine.state();
        let d1 = primary();
        state.table().create_binding(Arc::clone(&d1), "10.0.0.5".parse().unwrap(), 21).unwrap();

        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"d2\"\n");
        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Replaced { .. }));

        assert_eq!(state.table().len(), 1);
        let bound = state.table().find_binding("10.0.0.5".parse().unwrap(), 21).unwrap().server();
        assert_eq!(bound.name, "d2");
        assert_eq!(bound.source.as_deref(), Some(dir.path().join("10.0.0.5.toml").as_path()));
    }

    #[test]
    fn lost_create_race_replaces() {
        let table = BindingTable::new();
        let addr: IpAddr = "10.0.0.5".parse().unwrap();
        let winner = table.create_binding(primary(), addr, 21).unwrap();
        table.open_binding(addr, 21).unwrap();

        let section = ServerSection {
            name: Some("late".into()),
            ..ServerSection::default()
        };
        let late = Arc::new(fixup(section, addr, 21, None).unwrap());
        let outcome = create_or_replace(&table, addr, 21, late, 0).unwrap();

        assert!(matches!(outcome, Outcome::Replaced { aliases: 0 }));
        assert_eq!(table.len(), 1);
        let found = table.find_binding(addr, 21).unwrap();
        assert!(Arc::ptr_eq(&winner, &found));
        assert_eq!(found.server().name, "late");
        assert!(found.is_open());
    }

    #[test]
    fn concurrent_connects_share_one_binding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"a.example\"\n");
        let engine = Arc::new(engine(&template_in(&dir, "%0.toml"), LogSink::disabled()));
        let start = Arc::new(std::sync::Barrier::new(16));

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    start.wait();
                    engine.on_connect(&conn("10.0.0.5:21"))
                })
            })
            .collect();
        let outcomes: Vec<Outcome> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        let created = outcomes.iter().filter(|o| matches!(o, Outcome::Created { .. })).count();
        let replaced = outcomes.iter().filter(|o| matches!(o, Outcome::Replaced { .. })).count();
        assert_eq!(created, 1);
        assert_eq!(replaced, 15);

        let state = engine.state();
        assert_eq!(state.table().len(), 1);
        let binding = state.table().find_binding("10.0.0.5".parse().unwrap(), 21).unwrap();
        assert!(binding.is_open());
        assert_eq!(binding.server().name, "a.example");
    }

    #[test]
    fn parse_failure_leaves_binding_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"good\"\n");
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());
        engine.on_connect(&conn("10.0.0.5:21"));

        write(dir.path(), "10.0.0.5.toml", "[server\nname = ");
        let outcome = engine.on_connect(&conn("10.0.0.5:21"));
        assert!(matches!(outcome, Outcome::Failed(ResolveError::Load(LoadError::Parse { .. }))));

        let bound = engine.state().table().find_binding("10.0.0.5".parse().unwrap(), 21).unwrap().server();
        assert_eq!(bound.name, "good");
    }

    #[test]
    fn fixup_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\ntimeout_idle_secs = 0\n");
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());

        let outcome = engine.on_connect(&conn("10.0.0.5:21"));
        assert!(matches!(outcome, Outcome::Failed(ResolveError::Load(LoadError::Fixup { .. }))));
        assert!(engine.state().table().is_empty());
    }

    #[test]
    fn connect_miss_on_name_template_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("autohost.log");
        let engine = engine(&template_in(&dir, "%n.conf"), LogSink::open(&log_path).unwrap());

        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::NotFound));
        assert_eq!(std::fs::read_to_string(&log_path).unwrap(), "");
    }

    #[test]
    fn named_miss_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("autohost.log");
        let engine = engine(&template_in(&dir, "%n.conf"), LogSink::open(&log_path).unwrap());

        assert!(matches!(engine.on_name_negotiated(&conn("10.0.0.5:21"), "a.example"), Outcome::NotFound));
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("a.example.conf"));
    }

    #[test]
    fn connect_miss_without_name_token_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("autohost.log");
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::open(&log_path).unwrap());

        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::NotFound));
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("10.0.0.5.toml"));
    }

    #[test]
    fn host_command_always_declines() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.example.toml", "[server]\nname = \"b.example\"\n");
        let engine = engine(&template_in(&dir, "%n.toml"), LogSink::disabled());

        let Declined(outcome) = engine.on_host_command(&conn("10.0.0.5:21"), "b.example");
        assert!(outcome.is_bound());

        let Declined(outcome) = engine.on_host_command(&conn("10.0.0.5:21"), "missing.example");
        assert!(matches!(outcome, Outcome::NotFound));
    }

    #[test]
    fn aliases_bind_against_existing_binding() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "10.0.0.5.toml",
            "[server]\nname = \"x\"\naliases = [\"a\", \"b\", \"c\"]\n",
        );
        let engine = engine(&template_in(&dir, "%0.toml"), LogSink::disabled());

        // Fresh binding: nothing to disambiguate against yet.
        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Created { aliases: 0 }));
        assert!(matches!(engine.on_connect(&conn("10.0.0.5:21")), Outcome::Replaced { aliases: 3 }));
    }

    #[test]
    fn reset_discards_dynamic_bindings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "10.0.0.5.toml", "[server]\nname = \"a\"\n");
        let template = template_in(&dir, "%0.toml");
        let engine = engine(&template, LogSink::disabled());
        engine.on_connect(&conn("10.0.0.5:21"));
        assert_eq!(engine.state().table().len(), 1);

        let fresh = EngineState::new(true, Some(ConfigTemplate::new(template)), LogSink::disabled(), primary()).unwrap();
        let previous = engine.reset(fresh);
        assert_eq!(previous.table().len(), 1);
        assert!(engine.state().table().is_empty());
    }
}
