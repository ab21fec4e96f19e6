//! Decides whether an address belongs to a tracked owner.

use std::collections::HashMap;
use std::sync::RwLock;

/// Maps an address to the key of the local owner tracking it.
///
/// Returns `None` for addresses that are not tracked.
pub trait OwnershipOracle: Send + Sync {
    fn resolve(&self, address: &str) -> Option<String>;
}

impl<F> OwnershipOracle for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, address: &str) -> Option<String> {
        self(address)
    }
}

/// In-memory address → owner map that can be updated while scanning.
#[derive(Debug, Default)]
pub struct AddressBook {
    owners: RwLock<HashMap<String, String>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `address` for `owner`.
    pub fn insert(&self, address: impl Into<String>, owner: impl Into<String>) {
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.into(), owner.into());
    }

    /// Stop tracking `address`.
    pub fn remove(&self, address: &str) -> Option<String> {
        self.owners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address)
    }

    pub fn len(&self) -> usize {
        self.owners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Into<String>, O: Into<String>> FromIterator<(A, O)> for AddressBook {
    fn from_iter<I: IntoIterator<Item = (A, O)>>(iter: I) -> Self {
        let owners = iter
            .into_iter()
            .map(|(a, o)| (a.into(), o.into()))
            .collect();
        Self {
            owners: RwLock::new(owners),
        }
    }
}

impl OwnershipOracle for AddressBook {
    fn resolve(&self, address: &str) -> Option<String> {
        if address.is_empty() {
            return None;
        }
        self.owners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
    }
}
