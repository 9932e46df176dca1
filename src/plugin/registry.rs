//! Code plugins and their registry.
//!
//! A [`CodePlugin`] deploys code instances of one code type on one cluster
//! type. The engine never talks to a cluster directly; it looks a plugin
//! up through a [`PluginRegistry`] by the instance's cluster and code type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::error::{PluginError, Result};
use crate::policy::{Cluster, LABEL_TARGET};
use crate::resolve::ComponentInstance;

/// Wildcard matching any cluster or code type in the registry.
pub const ANY_TYPE: &str = "*";

/// Arguments of a plugin call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodePluginInvocationParams {
    /// Escaped deploy name of the instance.
    pub deploy_name: String,
    /// Rendered code parameters.
    pub params: Value,
    /// Plugin-level parameters (target suffix).
    pub plugin_params: BTreeMap<String, String>,
    /// Cluster the instance is deployed to.
    pub cluster: String,
}

/// One table of deployed resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceTable {
    /// Column headers.
    pub headers: Vec<String>,
    /// Rows.
    pub items: Vec<Vec<String>>,
}

/// Deployed resources by resource type.
pub type Resources = BTreeMap<String, ResourceTable>;

/// A plugin deploying code on a cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodePlugin: Send + Sync {
    /// Deploys a new instance.
    async fn create(&self, params: &CodePluginInvocationParams) -> Result<()>;

    /// Updates a deployed instance.
    async fn update(&self, params: &CodePluginInvocationParams) -> Result<()>;

    /// Removes a deployed instance. Removing a missing instance succeeds.
    async fn destroy(&self, params: &CodePluginInvocationParams) -> Result<()>;

    /// Lists the resources of a deployed instance.
    async fn resources(&self, params: &CodePluginInvocationParams) -> Result<Resources>;

    /// Lists the endpoints of a deployed instance.
    async fn endpoints(&self, params: &CodePluginInvocationParams) -> Result<BTreeMap<String, String>>;
}

/// Lookup of plugins by cluster and code type.
pub trait PluginRegistry: Send + Sync {
    /// Returns the plugin handling `code_type` on `cluster`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotRegistered`] if no plugin matches.
    fn for_code_type(
        &self,
        cluster: &Cluster,
        code_type: &str,
    ) -> std::result::Result<Arc<dyn CodePlugin>, PluginError>;
}

/// Registry backed by a fixed table.
#[derive(Default, Clone)]
pub struct StaticPluginRegistry {
    plugins: HashMap<(String, String), Arc<dyn CodePlugin>>,
}

/// Plugin that only logs what it would do.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPlugin;

impl CodePluginInvocationParams {
    /// Builds the invocation parameters of a code instance.
    #[must_use]
    pub fn for_instance(instance: &ComponentInstance) -> Self {
        let mut plugin_params = BTreeMap::new();
        plugin_params.insert(String::from(LABEL_TARGET), instance.key.target_suffix.clone());
        Self {
            deploy_name: instance.key.escaped_deploy_name(),
            params: instance.calculated_code_params.clone(),
            plugin_params,
            cluster: instance.key.cluster.clone(),
        }
    }
}

impl StaticPluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that answers every lookup with the dry-run plugin.
    #[must_use]
    pub fn dry_run() -> Self {
        Self::new().with_plugin(ANY_TYPE, ANY_TYPE, Arc::new(DryRunPlugin))
    }

    /// Registers a plugin. Either type may be [`ANY_TYPE`].
    #[must_use]
    pub fn with_plugin(
        mut self,
        cluster_type: &str,
        code_type: &str,
        plugin: Arc<dyn CodePlugin>,
    ) -> Self {
        self.plugins
            .insert((cluster_type.to_string(), code_type.to_string()), plugin);
        self
    }
}

impl PluginRegistry for StaticPluginRegistry {
    fn for_code_type(
        &self,
        cluster: &Cluster,
        code_type: &str,
    ) -> std::result::Result<Arc<dyn CodePlugin>, PluginError> {
        let candidates = [
            (cluster.cluster_type.as_str(), code_type),
            (cluster.cluster_type.as_str(), ANY_TYPE),
            (ANY_TYPE, code_type),
            (ANY_TYPE, ANY_TYPE),
        ];
        candidates
            .iter()
            .find_map(|(cluster_type, code)| {
                self.plugins
                    .get(&((*cluster_type).to_string(), (*code).to_string()))
            })
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered {
                cluster: cluster.metadata.name.clone(),
                cluster_type: cluster.cluster_type.clone(),
                code_type: code_type.to_string(),
            })
    }
}

impl std::fmt::Debug for StaticPluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.plugins.keys().collect();
        keys.sort();
        f.debug_struct("StaticPluginRegistry")
            .field("plugins", &keys)
            .finish()
    }
}

#[async_trait]
impl CodePlugin for DryRunPlugin {
    async fn create(&self, params: &CodePluginInvocationParams) -> Result<()> {
        info!("[dry-run] create '{}' on cluster '{}'", params.deploy_name, params.cluster);
        Ok(())
    }

    async fn update(&self, params: &CodePluginInvocationParams) -> Result<()> {
        info!("[dry-run] update '{}' on cluster '{}'", params.deploy_name, params.cluster);
        Ok(())
    }

    async fn destroy(&self, params: &CodePluginInvocationParams) -> Result<()> {
        info!("[dry-run] destroy '{}' on cluster '{}'", params.deploy_name, params.cluster);
        Ok(())
    }

    async fn resources(&self, params: &CodePluginInvocationParams) -> Result<Resources> {
        let mut resources = Resources::new();
        resources.insert(
            String::from("instance"),
            ResourceTable {
                headers: vec![String::from("Name"), String::from("Cluster"), String::from("Target")],
                items: vec![vec![
                    params.deploy_name.clone(),
                    params.cluster.clone(),
                    params.plugin_params.get(LABEL_TARGET).cloned().unwrap_or_default(),
                ]],
            },
        );
        Ok(resources)
    }

    async fn endpoints(&self, params: &CodePluginInvocationParams) -> Result<BTreeMap<String, String>> {
        // Endpoints declared in the code params, if any.
        let endpoints = params
            .params
            .get("endpoints")
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(endpoints)
    }
}

/// Merges `other` into `into`, appending rows of tables of the same type.
pub fn merge_resources(into: &mut Resources, other: Resources) {
    for (kind, table) in other {
        let entry = into.entry(kind).or_default();
        if entry.headers.is_empty() {
            entry.headers = table.headers;
        }
        entry.items.extend(table.items);
    }
}
