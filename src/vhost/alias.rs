//! Alias fan-out onto an existing binding.

use std::sync::Arc;

use crate::observability::logging::LogSink;
use crate::observability::metrics;
use crate::vhost::binding::Binding;
use crate::vhost::descriptor::ServerDescriptor;

/// Registers a descriptor's aliases as name bindings.
#[derive(Debug, Clone, Copy)]
pub struct AliasBinder<'a> {
    log: &'a LogSink,
}

impl<'a> AliasBinder<'a> {
    pub fn new(log: &'a LogSink) -> Self {
        Self { log }
    }

    /// Register every alias of `server` under `binding`.
    ///
    /// Does nothing when there is no binding. An alias that is already
    /// claimed is logged and skipped; the remaining aliases are still
    /// processed. Returns how many were registered.
    pub fn bind_aliases(&self, server: &Arc<ServerDescriptor>, binding: Option<&Binding>) -> usize {
        let Some(binding) = binding else {
            return 0;
        };

        let mut registered = 0;
        for alias in &server.aliases {
            match binding.register_name(alias, Arc::clone(server)) {
                Ok(()) => {
                    registered += 1;
                    metrics::record_alias_registration("ok");
                }
                Err(e) => {
                    tracing::debug!(target: "autohost", alias = %alias, error = %e, "Skipping alias");
                    self.log.write(format_args!("unable to bind alias '{alias}': {e}"));
                    metrics::record_alias_registration("taken");
                }
            }
        }

        tracing::trace!(
            target: "autohost",
            server = %server.name,
            addr = %binding.addr(),
            registered,
            total = server.aliases.len(),
            "Aliases bound"
        );
        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhost::binding::BindingTable;
    use std::net::IpAddr;

    fn descriptor(name: &str, aliases: &[&str]) -> Arc<ServerDescriptor> {
        Arc::new(ServerDescriptor {
            name: name.to_string(),
            addr: "10.0.0.5".parse().unwrap(),
            port: 21,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            ident: None,
            max_clients: None,
            timeout_idle_secs: 300,
            source: None,
        })
    }

    fn ip() -> IpAddr {
        "10.0.0.5".parse().unwrap()
    }

    #[test]
    fn no_binding_registers_nothing() {
        let log = LogSink::disabled();
        let binder = AliasBinder::new(&log);
        assert_eq!(binder.bind_aliases(&descriptor("x", &["a", "b"]), None), 0);
    }

    #[test]
    fn registers_every_alias() {
        let log = LogSink::disabled();
        let table = BindingTable::new();
        let binding = table.create_binding(descriptor("main", &[]), ip(), 21).unwrap();

        let server = descriptor("x", &["a", "b", "c"]);
        assert_eq!(AliasBinder::new(&log).bind_aliases(&server, Some(&binding)), 3);
        assert_eq!(binding.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn claimed_alias_does_not_stop_siblings() {
        let log = LogSink::disabled();
        let table = BindingTable::new();
        let binding = table.create_binding(descriptor("main", &[]), ip(), 21).unwrap();
        binding.register_name("a", descriptor("elsewhere", &[])).unwrap();

        let server = descriptor("x", &["a", "b", "c"]);
        assert_eq!(AliasBinder::new(&log).bind_aliases(&server, Some(&binding)), 2);
        assert_eq!(binding.find_name("a").unwrap().name, "elsewhere");
        assert_eq!(binding.find_name("b").unwrap().name, "x");
        assert_eq!(binding.find_name("c").unwrap().name, "x");
    }
}
