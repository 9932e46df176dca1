//! Typed reconciliation actions.
//!
//! An [`Action`] is one unit of change between actual and desired state.
//! Applying an action first performs its side effect (a code plugin call
//! for code instances) and then mutates actual state through the
//! [`SharedActualState`](crate::state::SharedActualState) updater, so a
//! failed plugin call leaves actual state untouched and re-running the
//! same diff retries it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info};

use super::context::ApplyContext;
use super::guard;
use crate::error::Result;
use crate::plugin::{cluster_of, CodePluginInvocationParams};
use crate::resolve::ComponentInstance;

/// Kind of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Create a new instance.
    Instantiate,
    /// Replace the data of an existing instance.
    Update,
    /// Record a new dependency on an instance.
    AttachDependency,
    /// Remove a dependency from an instance.
    DetachDependency,
    /// Remove an instance.
    Destroy,
}

/// Which half of a plan an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Detach and destroy, roots before leaves.
    Destruction,
    /// Instantiate, update and attach, leaves before roots.
    Creation,
    /// Destroys of instances that surviving instances pointed to, after
    /// the creation phase has rewired those parents. Roots before leaves.
    Cleanup,
}

/// A unit of change against actual state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Create an instance from its desired data.
    Instantiate {
        /// Component instance key.
        key: String,
        /// Desired instance.
        instance: Box<ComponentInstance>,
    },
    /// Replace the data of an instance with its desired data.
    Update {
        /// Component instance key.
        key: String,
        /// Desired instance.
        instance: Box<ComponentInstance>,
    },
    /// Remove an instance.
    Destroy {
        /// Component instance key.
        key: String,
    },
    /// Record a dependency on an instance.
    AttachDependency {
        /// Component instance key.
        key: String,
        /// Dependency key.
        dependency: String,
        /// Depth recorded in the desired state.
        depth: usize,
    },
    /// Remove a dependency from an instance.
    DetachDependency {
        /// Component instance key.
        key: String,
        /// Dependency key.
        dependency: String,
    },
}

impl ActionKind {
    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instantiate => "instantiate",
            Self::Update => "update",
            Self::AttachDependency => "attach",
            Self::DetachDependency => "detach",
            Self::Destroy => "destroy",
        }
    }

    /// Phase the kind runs in.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Instantiate | Self::Update | Self::AttachDependency => Phase::Creation,
            Self::DetachDependency | Self::Destroy => Phase::Destruction,
        }
    }
}

impl Action {
    /// Kind of the action.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Instantiate { .. } => ActionKind::Instantiate,
            Self::Update { .. } => ActionKind::Update,
            Self::Destroy { .. } => ActionKind::Destroy,
            Self::AttachDependency { .. } => ActionKind::AttachDependency,
            Self::DetachDependency { .. } => ActionKind::DetachDependency,
        }
    }

    /// Key of the instance the action targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Instantiate { key, .. }
            | Self::Update { key, .. }
            | Self::Destroy { key }
            | Self::AttachDependency { key, .. }
            | Self::DetachDependency { key, .. } => key,
        }
    }

    /// Dependency the action is about, if any.
    #[must_use]
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::AttachDependency { dependency, .. }
            | Self::DetachDependency { dependency, .. } => Some(dependency),
            _ => None,
        }
    }

    /// Phase the action runs in.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.kind().phase()
    }

    /// Machine-readable description of the change.
    #[must_use]
    pub fn describe_changes(&self) -> Value {
        let mut changes = json!({
            "kind": self.kind().as_str(),
            "key": self.key(),
        });
        match self {
            Self::Instantiate { instance, .. } | Self::Update { instance, .. } => {
                changes["is_code"] = json!(instance.is_code);
                changes["code_params"] = instance.calculated_code_params.clone();
                changes["discovery"] = instance.calculated_discovery.clone();
                changes["labels"] = json!(instance.calculated_labels.as_map());
            }
            Self::AttachDependency {
                dependency, depth, ..
            } => {
                changes["dependency"] = json!(dependency);
                changes["depth"] = json!(depth);
            }
            Self::DetachDependency { dependency, .. } => {
                changes["dependency"] = json!(dependency);
            }
            Self::Destroy { .. } => {}
        }
        changes
    }

    /// Applies the action.
    ///
    /// A panic while applying is returned as an error. Duration and
    /// outcome are always reported to the context's metrics collector.
    ///
    /// # Errors
    ///
    /// Returns the plugin or state error that stopped the action.
    pub async fn apply(&self, ctx: &ApplyContext) -> Result<()> {
        let started = Instant::now();
        let result = guard::guarded(self.apply_unguarded(ctx)).await;
        ctx.metrics
            .collect_metrics_for(self, started, result.as_ref().err());
        result
    }

    async fn apply_unguarded(&self, ctx: &ApplyContext) -> Result<()> {
        debug!("Applying {}", self);
        match self {
            Self::Instantiate { key, instance } => {
                if instance.is_code {
                    invoke_plugin(ctx, instance, PluginCall::Create).await?;
                }
                let mut created = (**instance).clone();
                let now = Utc::now();
                created.created_at = now;
                created.updated_at = now;
                ctx.state.create_component_instance(created);
                info!("Instantiated '{}'", key);
            }
            Self::Update { key, instance } => {
                if instance.is_code {
                    invoke_plugin(ctx, instance, PluginCall::Update).await?;
                }
                ctx.state.update_component_instance(key, |current| {
                    current.calculated_labels = instance.calculated_labels.clone();
                    current.calculated_code_params = instance.calculated_code_params.clone();
                    current.calculated_discovery = instance.calculated_discovery.clone();
                    current.edges_out = instance.edges_out.clone();
                    current.is_code = instance.is_code;
                    current.code_type.clone_from(&instance.code_type);
                    current.updated_at = Utc::now();
                })?;
                info!("Updated '{}'", key);
            }
            Self::Destroy { key } => {
                let Some(current) = ctx.state.get(key) else {
                    debug!("Instance '{}' already gone", key);
                    return Ok(());
                };
                if current.is_code {
                    invoke_plugin(ctx, &current, PluginCall::Destroy).await?;
                }
                ctx.state.delete_component_instance(key);
                info!("Destroyed '{}'", key);
            }
            Self::AttachDependency {
                key,
                dependency,
                depth,
            } => {
                ctx.state.update_component_instance(key, |current| {
                    current.dependency_keys.insert(dependency.clone(), *depth);
                })?;
                info!("Attached dependency '{}' to '{}' at depth {}", dependency, key, depth);
            }
            Self::DetachDependency { key, dependency } => {
                if !ctx.state.contains(key) {
                    debug!("Instance '{}' already gone", key);
                    return Ok(());
                }
                ctx.state.update_component_instance(key, |current| {
                    current.dependency_keys.remove(dependency);
                })?;
                info!("Detached dependency '{}' from '{}'", dependency, key);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum PluginCall {
    Create,
    Update,
    Destroy,
}

async fn invoke_plugin(
    ctx: &ApplyContext,
    instance: &ComponentInstance,
    call: PluginCall,
) -> Result<()> {
    let cluster = cluster_of(&ctx.policy, instance)?;
    let code_type = instance.code_type.as_deref().unwrap_or_default();
    let plugin = ctx.plugins.for_code_type(cluster, code_type)?;
    let params = CodePluginInvocationParams::for_instance(instance);
    match call {
        PluginCall::Create => plugin.create(&params).await,
        PluginCall::Update => plugin.update(&params).await,
        PluginCall::Destroy => plugin.destroy(&params).await,
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttachDependency {
                key,
                dependency,
                depth,
            } => write!(f, "attach {dependency} to {key} (depth {depth})"),
            Self::DetachDependency { key, dependency } => {
                write!(f, "detach {dependency} from {key}")
            }
            _ => write!(f, "{} {}", self.kind(), self.key()),
        }
    }
}
