//! Address- and name-based binding table.
//!
//! # Responsibilities
//! - Map (address, port) to the server descriptor currently serving it
//! - Layer name bindings (aliases) over an address binding
//! - Answer the host's routing question: who serves this connection?
//!
//! # Design Decisions
//! - One `Binding` per (address, port), created once; rebinding swaps the
//!   descriptor pointer in place (`ArcSwap`), so readers always observe a
//!   whole descriptor
//! - The table itself is a sharded, lock-guarded map (`DashMap`)
//! - Name keys are stored lower-case; lookups are case-insensitive
//! - Superseded descriptors are freed when the last `Arc` goes away

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::vhost::descriptor::ServerDescriptor;
use crate::vhost::error::BindingError;

/// An active association between an address+port and a server identity.
#[derive(Debug)]
pub struct Binding {
    addr: SocketAddr,
    server: ArcSwap<ServerDescriptor>,
    names: DashMap<String, Arc<ServerDescriptor>>,
    open: AtomicBool,
}

impl Binding {
    fn new(addr: SocketAddr, server: Arc<ServerDescriptor>) -> Self {
        Self {
            addr,
            server: ArcSwap::new(server),
            names: DashMap::new(),
            open: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The descriptor currently bound.
    pub fn server(&self) -> Arc<ServerDescriptor> {
        self.server.load_full()
    }

    /// Whether the binding accepts traffic.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Look up a name binding, ignoring ASCII case.
    pub fn find_name(&self, name: &str) -> Option<Arc<ServerDescriptor>> {
        self.names
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Claim `name` for `server` on this binding.
    ///
    /// A name held by a different identity is left alone. A name held by an
    /// identity with the same server name is re-pointed at `server`.
    pub fn register_name(&self, name: &str, server: Arc<ServerDescriptor>) -> Result<(), BindingError> {
        match self.names.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(mut entry) => {
                if entry.get().name != server.name {
                    return Err(BindingError::AliasTaken {
                        name: name.to_string(),
                        addr: self.addr,
                        claimed_by: entry.get().name.clone(),
                    });
                }
                entry.insert(server);
            }
            Entry::Vacant(entry) => {
                entry.insert(server);
            }
        }
        Ok(())
    }
}

/// Process-wide routing state.
#[derive(Debug, Default)]
pub struct BindingTable {
    slots: DashMap<SocketAddr, Arc<Binding>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_binding(&self, addr: IpAddr, port: u16) -> Option<Arc<Binding>> {
        self.slots
            .get(&SocketAddr::new(addr, port))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Create the binding for `addr`:`port`. It starts closed.
    pub fn create_binding(
        &self,
        server: Arc<ServerDescriptor>,
        addr: IpAddr,
        port: u16,
    ) -> Result<Arc<Binding>, BindingError> {
        let key = SocketAddr::new(addr, port);
        match self.slots.entry(key) {
            Entry::Occupied(_) => Err(BindingError::Duplicate(key)),
            Entry::Vacant(entry) => {
                let binding = Arc::new(Binding::new(key, server));
                entry.insert(Arc::clone(&binding));
                Ok(binding)
            }
        }
    }

    /// Atomically swap the descriptor bound to `binding`, returning the
    /// previous one.
    pub fn replace_descriptor(&self, binding: &Binding, server: Arc<ServerDescriptor>) -> Arc<ServerDescriptor> {
        binding.server.swap(server)
    }

    /// Register a name binding under the binding for `addr`:`port`.
    ///
    /// Without a binding there is nothing to disambiguate, so this is a
    /// no-op.
    pub fn create_name_binding(
        &self,
        name: &str,
        addr: IpAddr,
        port: u16,
        server: Arc<ServerDescriptor>,
    ) -> Result<(), BindingError> {
        match self.find_binding(addr, port) {
            Some(binding) => binding.register_name(name, server),
            None => Ok(()),
        }
    }

    /// Mark the binding for `addr`:`port` as accepting traffic.
    pub fn open_binding(&self, addr: IpAddr, port: u16) -> Result<(), BindingError> {
        let binding = self
            .find_binding(addr, port)
            .ok_or(BindingError::NotFound(SocketAddr::new(addr, port)))?;
        binding.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Pick the identity serving a connection on `local`, optionally selected
    /// by `name`.
    ///
    /// Order: a name binding on the exact binding, the exact binding if it
    /// answers to `name` (or no name is given), then the same steps on the
    /// wildcard binding for the port. An IPv4 client also reaches a `::`
    /// wildcard, which accepts IPv4-mapped connections.
    pub fn route(&self, local: SocketAddr, name: Option<&str>) -> Option<Arc<ServerDescriptor>> {
        let local_ip = local.ip().to_canonical();
        let port = local.port();
        let candidates = [
            self.find_binding(local_ip, port),
            self.find_binding(unspecified_like(local_ip), port),
            local_ip
                .is_ipv4()
                .then(|| self.find_binding(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port))
                .flatten(),
        ];

        for binding in candidates.into_iter().flatten().filter(|b| b.is_open()) {
            match name {
                None => return Some(binding.server()),
                Some(name) => {
                    if let Some(server) = binding.find_name(name) {
                        return Some(server);
                    }
                    let server = binding.server();
                    if server.answers_to(name) {
                        return Some(server);
                    }
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Serializable view of every binding, sorted by address.
    pub fn snapshot(&self) -> Vec<BindingSnapshot> {
        let mut bindings: Vec<BindingSnapshot> = self
            .slots
            .iter()
            .map(|entry| {
                let binding = entry.value();
                let server = binding.server();
                BindingSnapshot {
                    address: binding.addr().to_string(),
                    server_name: server.name.clone(),
                    aliases: server.aliases.clone(),
                    names: binding.names(),
                    source: server.source.as_ref().map(|p| p.display().to_string()),
                    open: binding.is_open(),
                }
            })
            .collect();
        bindings.sort_by(|a, b| a.address.cmp(&b.address));
        bindings
    }
}

/// Point-in-time description of one binding.
#[derive(Debug, Clone, Serialize)]
pub struct BindingSnapshot {
    pub address: String,
    pub server_name: String,
    pub aliases: Vec<String>,
    pub names: Vec<String>,
    pub source: Option<String>,
    pub open: bool,
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}
