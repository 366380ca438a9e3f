use crate::remote::{RemoteCatalog, RemoteSnapshot};
use crate::snapshot::{LocalCatalog, LocalSnapshot};
use std::collections::HashSet;

/// A (remote, local) correspondence by shared name. At least one side is
/// always present.
pub type Pair<'a> = (Option<&'a RemoteSnapshot>, Option<&'a LocalSnapshot>);

/// Aligns the local and remote catalogs by name to find what already exists
/// on both sides.
pub struct PairResolver<'a> {
    local: &'a LocalCatalog,
    remote: &'a RemoteCatalog,
}

impl<'a> PairResolver<'a> {
    pub fn new(local: &'a LocalCatalog, remote: &'a RemoteCatalog) -> Self {
        Self { local, remote }
    }

    /// Locals in chronological order, each with its remote counterpart if
    /// one exists; remote-only entries follow in remote catalog order.
    /// Every local snapshot appears exactly once.
    pub fn pairs(&self) -> Vec<Pair<'a>> {
        let mut pairs: Vec<Pair<'a>> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for local in self.local.list() {
            seen.insert(local.name.as_str());
            pairs.push((self.remote.get(&local.name), Some(local)));
        }
        for remote in self.remote.list() {
            if !seen.contains(remote.name.as_str()) {
                pairs.push((Some(remote), None));
            }
        }
        pairs
    }

    /// The remote counterpart of a local snapshot name, if any.
    pub fn remote_for(&self, name: &str) -> Option<&'a RemoteSnapshot> {
        self.remote.get(name)
    }
}
