//! Node address resolution.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Node name → internal address, shared between the node watcher and the mapper.
#[derive(Debug, Clone, Default)]
pub struct HostAddressTable {
    inner: Arc<DashMap<String, String>>,
}

impl HostAddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, host: impl Into<String>, address: impl Into<String>) {
        self.inner.insert(host.into(), address.into());
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, host: &str) -> bool {
        self.inner.remove(host).is_some()
    }

    /// Store `host`'s address, or drop its entry when `None`. Returns whether
    /// the table changed.
    pub fn update(&self, host: &str, address: Option<String>) -> bool {
        match address {
            Some(address) => {
                if self.get(host).as_deref() == Some(address.as_str()) {
                    return false;
                }
                self.inner.insert(host.to_string(), address);
                true
            }
            None => self.remove(host),
        }
    }

    pub fn get(&self, host: &str) -> Option<String> {
        self.inner.get(host).map(|r| r.value().clone())
    }

    /// Replace the whole table, e.g. after a watch restart. Returns whether
    /// any entry was added, changed or dropped.
    pub fn replace_all(&self, entries: HashMap<String, String>) -> bool {
        let before = self.inner.len();
        self.inner.retain(|host, _| entries.contains_key(host));
        let mut changed = self.inner.len() != before;
        for (host, address) in entries {
            if self.inner.insert(host, address.clone()).as_ref() != Some(&address) {
                changed = true;
            }
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HostAddressTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let table = Self::new();
        for (host, address) in iter {
            table.insert(host, address);
        }
        table
    }
}

/// Address to publish for an endpoint: the host's internal address when the
/// table has a non-empty entry for it, the raw address otherwise.
pub fn resolve_address(raw: &str, host: Option<&str>, table: &HostAddressTable) -> String {
    host.and_then(|h| table.get(h))
        .filter(|address| !address.is_empty())
        .unwrap_or_else(|| raw.to_string())
}
