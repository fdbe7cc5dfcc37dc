//! Per-identity session limits (`max_clients`).
//!
//! Sessions are counted against the identity currently serving them, keyed
//! by server name without regard to case. A session that switches identity
//! takes a slot on the new one before releasing the old.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::vhost::ServerDescriptor;

/// Live session counts per server identity.
#[derive(Debug, Default)]
pub struct ClientLimits {
    counts: DashMap<String, usize>,
}

impl ClientLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a slot on `server`, or `None` when it is full.
    pub fn admit(self: &Arc<Self>, server: &ServerDescriptor) -> Option<ClientSlot> {
        let key = server.name.to_ascii_lowercase();
        let mut count = self.counts.entry(key.clone()).or_insert(0);
        if server.max_clients.is_some_and(|max| *count >= max as usize) {
            return None;
        }
        *count += 1;
        drop(count);

        Some(ClientSlot {
            limits: Arc::clone(self),
            key,
        })
    }

    /// Sessions currently held by the identity named `name`.
    pub fn active(&self, name: &str) -> usize {
        self.counts
            .get(&name.to_ascii_lowercase())
            .map(|count| *count)
            .unwrap_or(0)
    }

    fn release(&self, key: &str) {
        if let Entry::Occupied(mut entry) = self.counts.entry(key.to_string()) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }
}

/// A session's hold on one identity; released on drop.
#[derive(Debug)]
pub struct ClientSlot {
    limits: Arc<ClientLimits>,
    key: String,
}

impl ClientSlot {
    /// Whether this slot is held on the identity named `name`.
    pub fn holds(&self, name: &str) -> bool {
        self.key.eq_ignore_ascii_case(name)
    }
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.limits.release(&self.key);
    }
}
