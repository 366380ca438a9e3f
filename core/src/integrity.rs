use crate::remote::{RemoteCatalog, RemoteSnapshot};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokenReason {
    Cycle,
    MissingParent,
    ParentBroken,
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            BrokenReason::Cycle => "cycle detected",
            BrokenReason::MissingParent => "missing parent",
            BrokenReason::ParentBroken => "parent broken",
        };
        write!(f, "{reason}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Broken(BrokenReason),
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy)
    }
}

/// Evaluates remote snapshot health by walking the ancestor chain.
///
/// The walk carries the set of names on the current path rather than a
/// global visited set, so legitimate reconvergence through different paths
/// is not mistaken for a cycle. Remote snapshot records never change after
/// catalog population, so results are memoized per name and never
/// invalidated; combined with the path set this bounds the walk by catalog
/// size even under adversarial metadata.
pub struct IntegrityChecker<'a> {
    catalog: &'a RemoteCatalog,
    memo: Mutex<HashMap<String, Health>>,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(catalog: &'a RemoteCatalog) -> Self {
        Self {
            catalog,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn health(&self, snapshot: &RemoteSnapshot) -> Health {
        let mut path = Vec::new();
        self.eval(snapshot, &mut path)
    }

    pub fn health_by_name(&self, name: &str) -> Option<Health> {
        self.catalog.get(name).map(|s| self.health(s))
    }

    fn eval(&self, snapshot: &RemoteSnapshot, path: &mut Vec<String>) -> Health {
        if let Some(&health) = self.memo.lock().unwrap().get(&snapshot.name) {
            return health;
        }
        let health = self.eval_uncached(snapshot, path);
        self.memo.lock().unwrap().insert(snapshot.name.clone(), health);
        health
    }

    // Termination rules, evaluated in order.
    fn eval_uncached(&self, snapshot: &RemoteSnapshot, path: &mut Vec<String>) -> Health {
        if snapshot.is_full() {
            return Health::Healthy;
        }
        if path.iter().any(|name| name == &snapshot.name) {
            return Health::Broken(BrokenReason::Cycle);
        }
        let parent = match snapshot.parent_name().and_then(|n| self.catalog.get(n)) {
            Some(parent) => parent,
            None => return Health::Broken(BrokenReason::MissingParent),
        };

        path.push(snapshot.name.clone());
        let parent_health = self.eval(parent, path);
        path.pop();

        match parent_health {
            Health::Healthy => Health::Healthy,
            // a cycle propagates verbatim; any other breakage becomes ours
            Health::Broken(BrokenReason::Cycle) => Health::Broken(BrokenReason::Cycle),
            Health::Broken(_) => Health::Broken(BrokenReason::ParentBroken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::tests::meta;

    fn full(name: &str) -> RemoteSnapshot {
        RemoteSnapshot::new(name.to_string(), 0, meta(&[("isfull", "true")]))
    }

    fn incr(name: &str, parent: &str) -> RemoteSnapshot {
        RemoteSnapshot::new(name.to_string(), 0, meta(&[("parent", parent)]))
    }

    fn catalog(snaps: Vec<RemoteSnapshot>) -> RemoteCatalog {
        RemoteCatalog::from_records(snaps)
    }

    #[test]
    fn full_snapshot_is_trivially_healthy() {
        let cat = catalog(vec![full("t@a")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(checker.health_by_name("t@a"), Some(Health::Healthy));
    }

    #[test]
    fn intact_chain_is_healthy() {
        let cat = catalog(vec![full("t@a"), incr("t@b", "t@a"), incr("t@c", "t@b")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(checker.health_by_name("t@c"), Some(Health::Healthy));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let cat = catalog(vec![incr("t@c", "t@c")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(
            checker.health_by_name("t@c"),
            Some(Health::Broken(BrokenReason::Cycle))
        );
    }

    #[test]
    fn two_node_cycle_propagates_cycle_verbatim() {
        let cat = catalog(vec![incr("t@b", "t@c"), incr("t@c", "t@b")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(
            checker.health_by_name("t@c"),
            Some(Health::Broken(BrokenReason::Cycle))
        );
        assert_eq!(
            checker.health_by_name("t@b"),
            Some(Health::Broken(BrokenReason::Cycle))
        );
    }

    #[test]
    fn absent_parent_is_missing() {
        let cat = catalog(vec![incr("t@d", "t@ghost")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(
            checker.health_by_name("t@d"),
            Some(Health::Broken(BrokenReason::MissingParent))
        );
    }

    #[test]
    fn non_full_without_parent_metadata_is_missing() {
        let cat = catalog(vec![RemoteSnapshot::new("t@d".to_string(), 0, meta(&[]))]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(
            checker.health_by_name("t@d"),
            Some(Health::Broken(BrokenReason::MissingParent))
        );
    }

    #[test]
    fn breakage_propagates_as_parent_broken() {
        let cat = catalog(vec![incr("t@b", "t@ghost"), incr("t@c", "t@b")]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(
            checker.health_by_name("t@c"),
            Some(Health::Broken(BrokenReason::ParentBroken))
        );
        // the parent's own reason is independent
        assert_eq!(
            checker.health_by_name("t@b"),
            Some(Health::Broken(BrokenReason::MissingParent))
        );
    }

    #[test]
    fn reconvergence_is_not_a_cycle() {
        // two chains meeting at the same full ancestor
        let cat = catalog(vec![
            full("t@a"),
            incr("t@b", "t@a"),
            incr("t@c", "t@a"),
            incr("t@d", "t@b"),
            incr("t@e", "t@c"),
        ]);
        let checker = IntegrityChecker::new(&cat);
        assert_eq!(checker.health_by_name("t@d"), Some(Health::Healthy));
        assert_eq!(checker.health_by_name("t@e"), Some(Health::Healthy));
    }
}
