//! Rule registry: package name -> ordered rules.
//!
//! Rule packages are written independently and register themselves during
//! start-up in no particular order, possibly from several threads at once.
//! [`RuleRegistry`] serializes every registration and lookup behind a single
//! `parking_lot::Mutex`. Within a package, registration order is priority
//! order; nothing is deduplicated.
//!
//! The merge pass takes a registry by reference. Most callers use the
//! process-wide instance from [`global`], built on first access; tests build
//! isolated registries with [`RuleRegistry::new`].

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::rule::Rule;

/// Thread-safe table of rule packages.
#[derive(Default)]
pub struct RuleRegistry {
    packages: Mutex<IndexMap<String, Vec<Arc<dyn Rule>>>>,
}

impl RuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        RuleRegistry::default()
    }

    /// Appends `rule` to `package`, creating the package on first use.
    pub fn register<R>(&self, package: &str, rule: R)
    where
        R: Rule + 'static,
    {
        self.register_arc(package, Arc::new(rule));
    }

    /// Appends an already shared rule instance to `package`.
    pub fn register_arc(&self, package: &str, rule: Arc<dyn Rule>) {
        let mut packages = self.packages.lock();
        tracing::debug!(package, rule = rule.name(), "registering rewrite rule");
        packages.entry(package.to_string()).or_default().push(rule);
    }

    /// Snapshot of `package`'s rules in priority order, or `None` if nothing
    /// was ever registered under that name.
    pub fn lookup(&self, package: &str) -> Option<Vec<Arc<dyn Rule>>> {
        self.packages.lock().get(package).cloned()
    }

    /// Number of rules registered under `package`.
    pub fn rule_count(&self, package: &str) -> usize {
        self.packages.lock().get(package).map_or(0, Vec::len)
    }

    /// Package names in first-registration order.
    pub fn packages(&self) -> Vec<String> {
        self.packages.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let packages = self.packages.lock();
        let mut map = f.debug_map();
        for (name, rules) in packages.iter() {
            let names: Vec<&str> = rules.iter().map(|r| r.name()).collect();
            map.entry(name, &names);
        }
        map.finish()
    }
}

static GLOBAL: Lazy<RuleRegistry> = Lazy::new(RuleRegistry::new);

/// The process-wide registry. Constructed exactly once, on first access,
/// even when first accessed from several threads.
pub fn global() -> &'static RuleRegistry {
    &GLOBAL
}

/// Registers `rule` under `package` in the process-wide registry.
pub fn register<R>(package: &str, rule: R)
where
    R: Rule + 'static,
{
    global().register(package, rule);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Replacement, RewriteError};
    use opmerge_core::{ConvertGraph, NodeId};

    struct Tagged(&'static str);

    impl Rule for Tagged {
        fn name(&self) -> &str {
            self.0
        }

        fn matches(&self, _graph: &ConvertGraph, _node: NodeId) -> bool {
            false
        }

        fn rewrite(&self, _graph: &ConvertGraph, _node: NodeId) -> Result<Replacement, RewriteError> {
            Err(RewriteError::declined("unused"))
        }
    }

    fn names(rules: &[Arc<dyn Rule>]) -> Vec<String> {
        rules.iter().map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn lookup_unknown_package_is_none() {
        let registry = RuleRegistry::new();
        assert!(registry.lookup("nothing").is_none());
        assert_eq!(registry.rule_count("nothing"), 0);
    }

    #[test]
    fn registration_order_is_priority_order() {
        let registry = RuleRegistry::new();
        registry.register("P", Tagged("first"));
        registry.register("Q", Tagged("other"));
        registry.register("P", Tagged("second"));

        let rules = registry.lookup("P").unwrap();
        assert_eq!(names(&rules), vec!["first", "second"]);
        assert_eq!(registry.packages(), vec!["P".to_string(), "Q".to_string()]);
    }

    #[test]
    fn duplicates_are_kept() {
        let registry = RuleRegistry::new();
        let shared: Arc<dyn Rule> = Arc::new(Tagged("dup"));
        registry.register_arc("P", shared.clone());
        registry.register_arc("P", shared);
        assert_eq!(registry.rule_count("P"), 2);
    }

    #[test]
    fn lookup_is_a_snapshot() {
        let registry = RuleRegistry::new();
        registry.register("P", Tagged("a"));
        let before = registry.lookup("P").unwrap();
        registry.register("P", Tagged("b"));
        assert_eq!(before.len(), 1);
        assert_eq!(registry.rule_count("P"), 2);
    }

    #[test]
    fn concurrent_registration_keeps_per_thread_order() {
        let registry = RuleRegistry::new();
        const PER_THREAD: usize = 50;
        let tags: [&'static str; 4] = ["t0", "t1", "t2", "t3"];

        std::thread::scope(|scope| {
            for tag in tags {
                let registry = &registry;
                scope.spawn(move || {
                    for _ in 0..PER_THREAD {
                        registry.register("shared", Tagged(tag));
                    }
                    registry.register(tag, Tagged("own-first"));
                    registry.register(tag, Tagged("own-second"));
                });
            }
        });

        assert_eq!(registry.rule_count("shared"), PER_THREAD * tags.len());
        for tag in tags {
            let own = registry.lookup(tag).unwrap();
            assert_eq!(names(&own), vec!["own-first", "own-second"]);
        }
    }

    #[test]
    fn global_is_a_single_instance() {
        let handles: Vec<usize> = std::thread::scope(|scope| {
            let spawned: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| global() as *const RuleRegistry as usize))
                .collect();
            spawned.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(handles.iter().all(|&addr| addr == handles[0]));
    }

    #[test]
    fn debug_lists_rule_names() {
        let registry = RuleRegistry::new();
        registry.register("P", Tagged("only"));
        assert_eq!(format!("{:?}", registry), r#"{"P": ["only"]}"#);
    }
}
