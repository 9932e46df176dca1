//! Code plugins.
//!
//! This module provides:
//! - The `CodePlugin` interface and plugin registry
//! - A dry-run plugin used when no real plugin is configured
//! - Concurrent resource and endpoint collection

pub mod registry;
mod resources;

pub use registry::{
    merge_resources, CodePlugin, CodePluginInvocationParams, DryRunPlugin, PluginRegistry,
    ResourceTable, Resources, StaticPluginRegistry, ANY_TYPE,
};
pub use resources::{cluster_of, CollectedResources, InstanceEndpoints, ResourceCollector};
