//! Concurrent resource and endpoint collection for one dependency.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::registry::{
    merge_resources, CodePlugin, CodePluginInvocationParams, PluginRegistry, Resources,
};
use crate::apply::guard;
use crate::error::{OrchestratorError, Result};
use crate::policy::{parse_reference, Cluster, Policy};
use crate::resolve::{ComponentInstance, PolicyResolution};

/// Resources gathered for a dependency.
#[derive(Debug, Default)]
pub struct CollectedResources {
    /// Merged resources of every instance that answered.
    pub resources: Resources,
    /// First error raised by any instance, if one failed.
    pub error: Option<OrchestratorError>,
}

/// Endpoints of one code instance.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InstanceEndpoints {
    /// Component instance key.
    pub key: String,
    /// Deploy name of the instance.
    pub deploy_name: String,
    /// Endpoint name to URL.
    pub endpoints: BTreeMap<String, String>,
}

/// Queries code plugins for the instances of a dependency.
#[derive(Clone)]
pub struct ResourceCollector {
    policy: Arc<Policy>,
    plugins: Arc<dyn PluginRegistry>,
}

impl ResourceCollector {
    /// Creates a collector.
    #[must_use]
    pub fn new(policy: Arc<Policy>, plugins: Arc<dyn PluginRegistry>) -> Self {
        Self { policy, plugins }
    }

    /// Collects resources of every code instance of `dependency`.
    ///
    /// One task runs per instance. A failing or panicking task does not
    /// stop the others; partial results are merged and the first error is
    /// returned alongside them.
    pub async fn dependency_resources(
        &self,
        resolution: &PolicyResolution,
        dependency: &str,
    ) -> CollectedResources {
        let instances: Vec<ComponentInstance> = resolution
            .dependency_instances(dependency)
            .into_iter()
            .filter(|instance| instance.is_code)
            .cloned()
            .collect();
        self.collect(instances).await
    }

    /// Collects resources of the given instances.
    pub async fn collect(&self, instances: Vec<ComponentInstance>) -> CollectedResources {
        let merged = Arc::new(Mutex::new(Resources::new()));
        let (error_tx, mut error_rx) = mpsc::channel::<OrchestratorError>(1);
        let mut tasks = JoinSet::new();

        debug!("Collecting resources for {} code instances", instances.len());

        for instance in instances {
            let collector = self.clone();
            let merged = Arc::clone(&merged);
            let error_tx = error_tx.clone();
            tasks.spawn(async move {
                let key = instance.key.key();
                let outcome = guard::guarded(collector.instance_resources(&instance)).await;
                match outcome {
                    Ok(resources) => merge_resources(&mut merged.lock(), resources),
                    Err(e) => {
                        warn!("Resource collection failed for '{}': {}", key, e);
                        // Only the first error is kept.
                        let _ = error_tx.try_send(e);
                    }
                }
            });
        }
        drop(error_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Resource collection task did not complete: {}", e);
            }
        }

        let resources = std::mem::take(&mut *merged.lock());
        CollectedResources {
            resources,
            error: error_rx.try_recv().ok(),
        }
    }

    /// Lists endpoints of every code instance of `dependency`, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns the first plugin error encountered.
    pub async fn dependency_endpoints(
        &self,
        resolution: &PolicyResolution,
        dependency: &str,
    ) -> Result<Vec<InstanceEndpoints>> {
        let mut result = Vec::new();
        for instance in resolution.dependency_instances(dependency) {
            if !instance.is_code {
                continue;
            }
            let params = CodePluginInvocationParams::for_instance(instance);
            let plugin = self.plugin_for(instance)?;
            let endpoints = guard::guarded(plugin.endpoints(&params)).await?;
            result.push(InstanceEndpoints {
                key: instance.key.key(),
                deploy_name: params.deploy_name,
                endpoints,
            });
        }
        result.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(result)
    }

    async fn instance_resources(&self, instance: &ComponentInstance) -> Result<Resources> {
        let plugin = self.plugin_for(instance)?;
        let params = CodePluginInvocationParams::for_instance(instance);
        plugin.resources(&params).await
    }

    fn plugin_for(&self, instance: &ComponentInstance) -> Result<Arc<dyn CodePlugin>> {
        let cluster = cluster_of(&self.policy, instance)?;
        let code_type = instance.code_type.as_deref().unwrap_or_default();
        Ok(self.plugins.for_code_type(cluster, code_type)?)
    }
}

/// Looks up the cluster a code instance is deployed to.
///
/// # Errors
///
/// Returns a policy error if the cluster reference is malformed or the
/// cluster does not exist.
pub fn cluster_of<'a>(policy: &'a Policy, instance: &ComponentInstance) -> Result<&'a Cluster> {
    let (namespace, name) = parse_reference(&instance.key.cluster, &instance.key.namespace)?;
    Ok(policy.get::<Cluster>(name, namespace)?)
}

impl std::fmt::Debug for ResourceCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCollector").finish_non_exhaustive()
    }
}
