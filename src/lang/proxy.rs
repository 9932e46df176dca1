//! Curated views exposed to policy expressions and templates.
//!
//! Policy authors never see engine internals. Each evaluation receives a
//! freshly built value assembled from the view structs below; the set of
//! fields is the whole surface reachable from a criteria expression or
//! template.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::policy::{Dependency, LabelSet, Service, User};
use crate::resolve::ComponentInstanceKey;

/// Field under which the user view is exposed.
pub const USER_FIELD: &str = "User";

/// Field of the user view holding secrets.
pub const SECRETS_FIELD: &str = "Secrets";

/// Service as seen by rule criteria.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceView<'a> {
    /// Namespace.
    pub namespace: &'a str,
    /// Name.
    pub name: &'a str,
    /// Generation.
    pub generation: u64,
    /// Service labels.
    pub labels: &'a BTreeMap<String, String>,
}

/// Dependency as seen by rule criteria and allocation templates.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DependencyView<'a> {
    /// Namespace.
    pub namespace: &'a str,
    /// Name.
    pub name: &'a str,
    /// Generation.
    pub generation: u64,
    /// Requesting user.
    pub user: &'a str,
    /// Requested contract.
    pub contract: &'a str,
    /// Deterministic dependency identity.
    #[serde(rename = "ID")]
    pub id: String,
}

/// User as seen by templates. Secrets are attached lazily.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserView<'a> {
    /// User name.
    pub name: &'a str,
    /// User labels.
    pub labels: &'a BTreeMap<String, String>,
}

/// Target as seen by code and discovery templates.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetView<'a> {
    /// Target suffix inside the cluster.
    pub namespace: &'a str,
}

/// Identity of an instance announced in the discovery view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceView {
    instance: String,
    instance_id: String,
}

impl<'a> ServiceView<'a> {
    /// Builds the view of a service.
    #[must_use]
    pub fn of(service: &'a Service) -> Self {
        Self {
            namespace: &service.metadata.namespace,
            name: &service.metadata.name,
            generation: service.metadata.generation,
            labels: &service.labels,
        }
    }
}

impl<'a> DependencyView<'a> {
    /// Builds the view of a dependency.
    #[must_use]
    pub fn of(dependency: &'a Dependency) -> Self {
        Self {
            namespace: &dependency.metadata.namespace,
            name: &dependency.metadata.name,
            generation: dependency.metadata.generation,
            user: &dependency.user,
            contract: &dependency.contract,
            id: dependency.key(),
        }
    }
}

impl<'a> UserView<'a> {
    /// Builds the view of a user.
    #[must_use]
    pub fn of(user: &'a User) -> Self {
        Self {
            name: &user.name,
            labels: &user.labels,
        }
    }
}

fn to_value<T: Serialize>(view: &T) -> Value {
    serde_json::to_value(view).unwrap_or(Value::Null)
}

fn labels_value(labels: &LabelSet) -> Map<String, Value> {
    labels
        .as_map()
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

/// Data for context and component criteria: labels only.
///
/// Labels are exposed both at the top level and under `Labels`.
#[must_use]
pub fn criteria_data(labels: &LabelSet) -> Value {
    let mut data = labels_value(labels);
    data.insert(String::from("Labels"), Value::Object(labels_value(labels)));
    Value::Object(data)
}

/// Data for rule criteria: labels plus service and dependency views.
#[must_use]
pub fn rule_data(labels: &LabelSet, service: &Service, dependency: &Dependency) -> Value {
    let mut data = labels_value(labels);
    data.insert(String::from("Labels"), Value::Object(labels_value(labels)));
    data.insert(String::from("Service"), to_value(&ServiceView::of(service)));
    data.insert(String::from("Dependency"), to_value(&DependencyView::of(dependency)));
    Value::Object(data)
}

/// Data for allocation key templates: user, dependency and labels.
#[must_use]
pub fn allocation_data(user: &User, dependency: &Dependency, labels: &LabelSet) -> Value {
    let mut data = Map::new();
    data.insert(String::from(USER_FIELD), to_value(&UserView::of(user)));
    data.insert(String::from("Dependency"), to_value(&DependencyView::of(dependency)));
    data.insert(String::from("Labels"), Value::Object(labels_value(labels)));
    Value::Object(data)
}

/// Data for code parameter and discovery templates: user, labels,
/// discovery tree and target.
#[must_use]
pub fn code_data(
    user: &User,
    labels: &LabelSet,
    discovery: &Map<String, Value>,
    key: &ComponentInstanceKey,
) -> Value {
    let mut data = Map::new();
    data.insert(String::from(USER_FIELD), to_value(&UserView::of(user)));
    data.insert(String::from("Labels"), Value::Object(labels_value(labels)));
    data.insert(String::from("Discovery"), discovery_view(discovery, key));
    data.insert(
        String::from("Target"),
        to_value(&TargetView {
            namespace: &key.target_suffix,
        }),
    );
    Value::Object(data)
}

/// Builds the discovery view for an instance.
///
/// The view is a copy of the tree, augmented with `Instance` and
/// `InstanceId` for the current instance and, for component instances, a
/// `Service` entry announcing the owning service instance.
#[must_use]
pub fn discovery_view(tree: &Map<String, Value>, key: &ComponentInstanceKey) -> Value {
    let mut view = tree.clone();
    view.insert(String::from("Instance"), Value::String(key.escaped_deploy_name()));
    view.insert(String::from("InstanceId"), Value::String(key.instance_id()));

    if key.is_component() {
        let service_key = key.parent_service_key();
        view.insert(
            String::from("Service"),
            to_value(&InstanceView {
                instance: service_key.escaped_deploy_name(),
                instance_id: service_key.instance_id(),
            }),
        );
    }

    Value::Object(view)
}

/// Attaches secrets to the user view of template data.
pub fn attach_secrets(data: &mut Value, secrets: BTreeMap<String, String>) {
    if let Some(Value::Object(user)) = data.get_mut(USER_FIELD) {
        let secrets = secrets.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        user.insert(String::from(SECRETS_FIELD), Value::Object(secrets));
    }
}

/// Returns the user name carried by template data.
#[must_use]
pub fn user_name(data: &Value) -> Option<&str> {
    data.get(USER_FIELD)?.get("Name")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Metadata;

    fn dependency() -> Dependency {
        Dependency {
            metadata: Metadata::new("main", "alice-db"),
            user: String::from("alice"),
            contract: String::from("db"),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn test_criteria_data_exposes_labels_only() {
        let labels = LabelSet::from([("env", "prod")]);
        let data = criteria_data(&labels);
        assert_eq!(data["env"], "prod");
        assert_eq!(data["Labels"]["env"], "prod");
        assert!(data.get("User").is_none());
        assert!(data.get("Service").is_none());
    }

    #[test]
    fn test_rule_data_views() {
        let service = Service {
            metadata: Metadata::new("main", "postgres"),
            labels: [(String::from("tier"), String::from("db"))].into_iter().collect(),
            components: vec![],
        };
        let data = rule_data(&LabelSet::new(), &service, &dependency());
        assert_eq!(data["Service"]["Name"], "postgres");
        assert_eq!(data["Service"]["Labels"]["tier"], "db");
        assert_eq!(data["Dependency"]["ID"], "main:dependency:alice-db");
        assert!(data["Service"].get("Components").is_none());
    }

    #[test]
    fn test_discovery_view_announces_instance_and_service() {
        let key = ComponentInstanceKey::for_service("c", "t", "main", "db", "prod", vec![], "pg")
            .with_component("primary");
        let mut tree = Map::new();
        tree.insert(String::from("cache"), Value::String(String::from("redis:6379")));

        let view = discovery_view(&tree, &key);
        assert_eq!(view["cache"], "redis:6379");
        assert_eq!(view["Instance"], "main-db-prod-primary");
        assert_eq!(view["Service"]["Instance"], "main-db-prod-root");
        assert_eq!(view["Service"]["InstanceId"], Value::String(key.parent_service_key().instance_id()));
        // The source tree is untouched.
        assert!(tree.get("Instance").is_none());
    }

    #[test]
    fn test_attach_secrets() {
        let user = User {
            name: String::from("alice"),
            labels: BTreeMap::new(),
        };
        let mut data = allocation_data(&user, &dependency(), &LabelSet::new());
        assert_eq!(user_name(&data), Some("alice"));
        assert!(data["User"].get("Secrets").is_none());

        attach_secrets(&mut data, [(String::from("token"), String::from("s3cr3t"))].into_iter().collect());
        assert_eq!(data["User"]["Secrets"]["token"], "s3cr3t");
    }
}
