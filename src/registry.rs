//! Registry of table plugins: dependency ordering, bulk enable/disable,
//! and a ledger of installed table versions.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::db::{SqlExecutor, SqlValue};
use crate::error::{Result, StoreError};
use crate::plugin::TablePlugin;
use crate::utils::now_ms;

const VERSION_LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS plugin_versions (
    table_name TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    enabled_at INTEGER NOT NULL
);
"#;

/// Tracks registered and enabled table plugins.
pub struct TablePluginRegistry {
    executor: SqlExecutor,
    plugins: Mutex<Vec<Arc<dyn TablePlugin>>>,
    enabled: Mutex<Vec<String>>,
}

impl TablePluginRegistry {
    pub fn new(executor: SqlExecutor) -> Self {
        Self {
            executor,
            plugins: Mutex::new(Vec::new()),
            enabled: Mutex::new(Vec::new()),
        }
    }

    /// Adds a plugin. Registering does not create its table.
    pub fn register(&self, plugin: Arc<dyn TablePlugin>) -> Result<()> {
        let mut plugins = self.plugins.lock();
        if plugins.iter().any(|p| p.table_name() == plugin.table_name()) {
            return Err(StoreError::validation(format!(
                "plugin already registered: {}",
                plugin.table_name()
            )));
        }
        plugins.push(plugin);
        Ok(())
    }

    /// Looks up a registered plugin by table name.
    pub fn get(&self, table_name: &str) -> Option<Arc<dyn TablePlugin>> {
        self.plugins
            .lock()
            .iter()
            .find(|p| p.table_name() == table_name)
            .cloned()
    }

    /// Table names of every registered plugin, in registration order.
    pub fn registered(&self) -> Vec<&'static str> {
        self.plugins.lock().iter().map(|p| p.table_name()).collect()
    }

    pub fn is_enabled(&self, table_name: &str) -> bool {
        self.enabled.lock().iter().any(|n| n == table_name)
    }

    /// Enabled table names in the order they were enabled.
    pub fn enabled_plugins(&self) -> Vec<String> {
        self.enabled.lock().clone()
    }

    /// Orders `names` and all their transitive dependencies so that every
    /// plugin comes after the plugins it depends on.
    pub fn resolve_order(&self, names: &[&str]) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        for name in names {
            self.visit(name, &mut Vec::new(), &mut done, &mut order)?;
        }
        Ok(order)
    }

    /// Enables a plugin and, first, everything it depends on.
    ///
    /// Returns the table names newly enabled by this call.
    pub fn enable(&self, table_name: &str) -> Result<Vec<String>> {
        let order = self.resolve_order(&[table_name])?;
        self.enable_in_order(order)
    }

    /// Enables every registered plugin in dependency order.
    pub fn enable_all(&self) -> Result<Vec<String>> {
        let names = self.registered();
        let order = self.resolve_order(&names)?;
        self.enable_in_order(order)
    }

    /// Disables a plugin. Fails while an enabled plugin depends on it.
    pub fn disable(&self, table_name: &str) -> Result<()> {
        let plugin = self.require(table_name)?;
        if !self.is_enabled(table_name) {
            return Ok(());
        }

        let dependents: Vec<String> = self
            .enabled_plugins()
            .into_iter()
            .filter(|name| {
                self.get(name)
                    .is_some_and(|p| p.dependencies().iter().any(|d| *d == table_name))
            })
            .collect();
        if !dependents.is_empty() {
            return Err(StoreError::validation(format!(
                "cannot disable {table_name}: required by {}",
                dependents.join(", ")
            )));
        }

        plugin.unregister_events();
        self.enabled.lock().retain(|n| n != table_name);
        info!(table = table_name, "plugin disabled");
        Ok(())
    }

    /// Disables every enabled plugin, dependents first.
    pub fn disable_all(&self) {
        let enabled = std::mem::take(&mut *self.enabled.lock());
        for name in enabled.iter().rev() {
            if let Some(plugin) = self.get(name) {
                plugin.unregister_events();
            }
        }
    }

    /// Version recorded in the ledger when `table_name` was last enabled.
    pub fn installed_version(&self, table_name: &str) -> Result<Option<String>> {
        self.executor.execute_script(VERSION_LEDGER)?;
        let row = self.executor.query_one(
            "SELECT version FROM plugin_versions WHERE table_name = ?1",
            &[SqlValue::from(table_name.to_string())],
        )?;
        Ok(row.and_then(|r| r.get("version").and_then(|v| v.as_str()).map(String::from)))
    }

    fn enable_in_order(&self, order: Vec<String>) -> Result<Vec<String>> {
        self.executor.execute_script(VERSION_LEDGER)?;

        let mut newly_enabled = Vec::new();
        for name in order {
            if self.is_enabled(&name) {
                continue;
            }
            let plugin = self.require(&name)?;
            plugin.create_table()?;
            plugin.register_events()?;
            self.record_version(plugin.as_ref())?;
            self.enabled.lock().push(name.clone());
            info!(table = %name, version = plugin.version(), "plugin enabled");
            newly_enabled.push(name);
        }
        Ok(newly_enabled)
    }

    fn record_version(&self, plugin: &dyn TablePlugin) -> Result<()> {
        self.executor.execute_update(
            "INSERT INTO plugin_versions (table_name, version, enabled_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(table_name) DO UPDATE SET
                 version = excluded.version,
                 enabled_at = excluded.enabled_at",
            &[
                SqlValue::from(plugin.table_name().to_string()),
                SqlValue::from(plugin.version().to_string()),
                SqlValue::from(now_ms()),
            ],
        )?;
        Ok(())
    }

    fn require(&self, table_name: &str) -> Result<Arc<dyn TablePlugin>> {
        self.get(table_name)
            .ok_or_else(|| StoreError::validation(format!("unknown table plugin: {table_name}")))
    }

    fn visit(
        &self,
        name: &str,
        path: &mut Vec<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if path.iter().any(|p| p == name) {
            path.push(name.to_string());
            return Err(StoreError::validation(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        let plugin = self.require(name)?;
        path.push(name.to_string());
        for dep in plugin.dependencies() {
            self.visit(dep, path, done, order)?;
        }
        path.pop();

        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::db::ConnectionManager;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakePlugin {
        name: &'static str,
        deps: &'static [&'static str],
        created: AtomicUsize,
        unregistered: AtomicUsize,
    }

    impl FakePlugin {
        fn new(name: &'static str, deps: &'static [&'static str]) -> Arc<Self> {
            Arc::new(Self {
                name,
                deps,
                created: AtomicUsize::new(0),
                unregistered: AtomicUsize::new(0),
            })
        }
    }

    impl TablePlugin for FakePlugin {
        fn table_name(&self) -> &'static str {
            self.name
        }
        fn version(&self) -> &'static str {
            "1.0.0"
        }
        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }
        fn create_table(&self) -> Result<()> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn unregister_events(&self) {
            self.unregistered.fetch_add(1, Ordering::SeqCst);
        }
        fn count(&self) -> Result<i64> {
            Ok(0)
        }
    }

    fn registry() -> TablePluginRegistry {
        let manager = Arc::new(ConnectionManager::new(StoreConfig::memory()));
        TablePluginRegistry::new(SqlExecutor::new(manager))
    }

    #[test]
    fn enable_pulls_in_dependencies_first() {
        let registry = registry();
        let child = FakePlugin::new("child", &["parent"]);
        registry.register(child.clone()).unwrap();
        registry.register(FakePlugin::new("parent", &[])).unwrap();

        let enabled = registry.enable("child").unwrap();

        assert_eq!(enabled, vec!["parent", "child"]);
        assert_eq!(child.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enable_is_idempotent() {
        let registry = registry();
        let plugin = FakePlugin::new("solo", &[]);
        registry.register(plugin.clone()).unwrap();

        registry.enable("solo").unwrap();
        let second = registry.enable("solo").unwrap();

        assert!(second.is_empty());
        assert_eq!(plugin.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn enable_all_orders_by_dependency() {
        let registry = registry();
        registry.register(FakePlugin::new("c", &["b"])).unwrap();
        registry.register(FakePlugin::new("b", &["a"])).unwrap();
        registry.register(FakePlugin::new("a", &[])).unwrap();

        assert_eq!(registry.enable_all().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let registry = registry();
        registry.register(FakePlugin::new("orphan", &["ghost"])).unwrap();

        assert!(matches!(
            registry.enable("orphan"),
            Err(StoreError::Validation(_))
        ));
        assert!(!registry.is_enabled("orphan"));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let registry = registry();
        registry.register(FakePlugin::new("x", &["y"])).unwrap();
        registry.register(FakePlugin::new("y", &["x"])).unwrap();

        let err = registry.enable_all().unwrap_err();

        assert!(err.to_string().contains("dependency cycle"));
    }

    #[test]
    fn disable_refuses_while_dependents_are_enabled() {
        let registry = registry();
        registry.register(FakePlugin::new("parent", &[])).unwrap();
        registry.register(FakePlugin::new("child", &["parent"])).unwrap();
        registry.enable_all().unwrap();

        assert!(registry.disable("parent").is_err());
        registry.disable("child").unwrap();
        registry.disable("parent").unwrap();
        assert!(registry.enabled_plugins().is_empty());
    }

    #[test]
    fn disable_all_unregisters_every_plugin() {
        let registry = registry();
        let a = FakePlugin::new("a", &[]);
        let b = FakePlugin::new("b", &["a"]);
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();
        registry.enable_all().unwrap();

        registry.disable_all();

        assert_eq!(a.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(b.unregistered.load(Ordering::SeqCst), 1);
        assert!(registry.enabled_plugins().is_empty());
    }

    #[test]
    fn enabled_versions_are_recorded() {
        let registry = registry();
        registry.register(FakePlugin::new("a", &[])).unwrap();

        assert_eq!(registry.installed_version("a").unwrap(), None);
        registry.enable("a").unwrap();
        assert_eq!(
            registry.installed_version("a").unwrap(),
            Some("1.0.0".to_string())
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = registry();
        registry.register(FakePlugin::new("a", &[])).unwrap();
        assert!(registry.register(FakePlugin::new("a", &[])).is_err());
    }
}
