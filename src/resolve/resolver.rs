//! Policy resolver.
//!
//! Turns the dependencies of a policy into a graph of component instances.
//! Each dependency is resolved independently, depth-first, on a blocking
//! worker; results are merged in dependency-key order so the outcome does
//! not depend on task completion order.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::apply::guard;
use crate::error::{OrchestratorError, PolicyError, ResolveError, Result};
use crate::event::EventLog;
use crate::external::ExternalData;
use crate::lang::{proxy, ExpressionEvaluator, TemplateEngine};
use crate::policy::{
    parse_reference, Cluster, Contract, Dependency, LabelSet, Policy, Service, User,
    LABEL_CLUSTER, LABEL_TARGET,
};

use super::instance::{
    ComponentInstance, ComponentInstanceMap, DependencyOutcome, FailureKind, PolicyResolution,
    RejectReason,
};
use super::key::ComponentInstanceKey;
use super::node::{component_order, Frame, NodeOutcome, ResolutionPath};

/// Resolution result of a single dependency, before merging.
#[derive(Debug, Clone)]
pub struct DependencyResolution {
    /// Dependency key.
    pub dependency: String,
    /// Terminal outcome.
    pub outcome: DependencyOutcome,
    /// Instances produced (empty unless resolved).
    pub instances: ComponentInstanceMap,
    /// Decisions taken.
    pub log: EventLog,
}

/// Resolver over one policy snapshot.
#[derive(Debug, Clone)]
pub struct Resolver {
    policy: Arc<Policy>,
    external: ExternalData,
    expressions: Arc<ExpressionEvaluator>,
    templates: Arc<TemplateEngine>,
}

/// Immutable inputs of one dependency walk.
struct Scope<'a> {
    dependency: &'a Dependency,
    dependency_key: String,
    user: User,
}

/// Mutable state of one dependency walk.
struct Walk {
    path: ResolutionPath,
    instances: ComponentInstanceMap,
    log: EventLog,
}

impl Resolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(policy: Arc<Policy>, external: ExternalData) -> Self {
        let templates = TemplateEngine::with_secrets(Arc::clone(&external.secrets));
        Self {
            policy,
            external,
            expressions: Arc::new(ExpressionEvaluator::new()),
            templates: Arc::new(templates),
        }
    }

    /// Returns the policy being resolved.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Resolves every dependency of the policy.
    ///
    /// Dependencies are resolved concurrently. Timestamps of instances that
    /// already exist in `actual` are carried over.
    ///
    /// # Errors
    ///
    /// Returns an error only if a resolution task could not be joined;
    /// per-dependency failures are recorded as outcomes.
    pub async fn resolve_all(&self, actual: &PolicyResolution) -> Result<PolicyResolution> {
        let dependencies: Vec<Dependency> =
            self.policy.dependencies().into_iter().cloned().collect();
        info!("Resolving {} dependencies", dependencies.len());

        let mut tasks = JoinSet::new();
        for dependency in dependencies {
            let resolver = self.clone();
            tasks.spawn_blocking(move || resolver.resolve_guarded(&dependency));
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| {
                OrchestratorError::internal(format!("resolution task failed: {e}"))
            })?;
            results.insert(result.dependency.clone(), result);
        }

        let mut resolution = Self::merge(results.into_values());
        resolution.carry_timestamps(actual);
        Ok(resolution)
    }

    /// Merges per-dependency results in iteration order.
    ///
    /// A dependency whose instances conflict with those already merged is
    /// recorded as failed and contributes nothing.
    #[must_use]
    pub fn merge(results: impl IntoIterator<Item = DependencyResolution>) -> PolicyResolution {
        let mut resolution = PolicyResolution::new();

        for mut result in results {
            let mut outcome = result.outcome;
            if matches!(outcome, DependencyOutcome::Resolved { .. }) {
                if let Err(e) = resolution.merge_instances(result.instances) {
                    result.log.error(format!("Dependency not merged: {e}"));
                    outcome = DependencyOutcome::Failed {
                        kind: e.failure_kind(),
                        message: e.to_string(),
                    };
                }
            }
            resolution.record_outcome(result.dependency, outcome);
            resolution.events.append(result.log);
        }

        let resolved = resolution
            .dependency_outcomes
            .values()
            .filter(|o| matches!(o, DependencyOutcome::Resolved { .. }))
            .count();
        resolution.events.info(format!(
            "Resolution finished: {resolved}/{} dependencies resolved, {} component instances",
            resolution.dependency_outcomes.len(),
            resolution.component_instances.len()
        ));
        resolution
    }

    /// Resolves one dependency, converting a panic into a failed outcome.
    #[must_use]
    pub fn resolve_guarded(&self, dependency: &Dependency) -> DependencyResolution {
        let key = dependency.key();
        match guard::guarded_sync(|| Ok(self.resolve_dependency(dependency))) {
            Ok(result) => result,
            Err(e) => {
                let mut log = EventLog::for_dependency(&key);
                log.error(format!("Resolution panicked: {e}"));
                DependencyResolution {
                    dependency: key,
                    outcome: DependencyOutcome::Failed {
                        kind: FailureKind::Internal,
                        message: e.to_string(),
                    },
                    instances: ComponentInstanceMap::new(),
                    log,
                }
            }
        }
    }

    /// Resolves one dependency.
    #[must_use]
    pub fn resolve_dependency(&self, dependency: &Dependency) -> DependencyResolution {
        let dependency_key = dependency.key();
        let mut walk = Walk {
            path: ResolutionPath::new(),
            instances: ComponentInstanceMap::new(),
            log: EventLog::for_dependency(&dependency_key),
        };
        walk.log.debug(format!(
            "Resolving dependency '{}' of user '{}' on contract '{}'",
            dependency.metadata.name, dependency.user, dependency.contract
        ));

        let result = self.load_user(dependency).and_then(|user| {
            let labels = LabelSet::from(user.labels.clone()).add_labels(&dependency.labels);
            let scope = Scope {
                dependency,
                dependency_key: dependency_key.clone(),
                user,
            };
            self.resolve_contract(
                &scope,
                &dependency.contract,
                &dependency.metadata.namespace,
                labels,
                0,
                &mut walk,
            )
        });

        let outcome = match result {
            Ok(NodeOutcome::Resolved { key, .. }) => {
                walk.log.info(format!("Dependency resolved to '{key}'"));
                DependencyOutcome::Resolved { root: key }
            }
            Ok(NodeOutcome::Rejected { reason, rule }) => {
                walk.log.warn(format!("Dependency rejected by rule '{rule}'"));
                walk.instances.clear();
                DependencyOutcome::Rejected { reason, rule }
            }
            Err(e) => {
                walk.log.error(format!("Dependency failed: {e}"));
                walk.instances.clear();
                DependencyOutcome::Failed {
                    kind: e.failure_kind(),
                    message: e.to_string(),
                }
            }
        };
        debug!("Dependency '{}' finished: {}", dependency_key, outcome);

        DependencyResolution {
            dependency: dependency_key,
            outcome,
            instances: walk.instances,
            log: walk.log,
        }
    }

    fn load_user(&self, dependency: &Dependency) -> std::result::Result<User, ResolveError> {
        self.external
            .users
            .load_user_by_name(&dependency.user)
            .ok_or_else(|| {
                ResolveError::Policy(PolicyError::not_found(
                    "user",
                    &dependency.metadata.namespace,
                    &dependency.user,
                ))
            })
    }

    #[allow(clippy::too_many_lines)]
    fn resolve_contract(
        &self,
        scope: &Scope<'_>,
        reference: &str,
        current_namespace: &str,
        mut labels: LabelSet,
        depth: usize,
        walk: &mut Walk,
    ) -> std::result::Result<NodeOutcome, ResolveError> {
        let (namespace, name) = parse_reference(reference, current_namespace)?;
        let contract = self.policy.get::<Contract>(name, namespace).map_err(|e| match e {
            PolicyError::NotFound { .. } => ResolveError::ContractNotFound {
                contract: format!("{namespace}/{name}"),
            },
            other => ResolveError::Policy(other),
        })?;

        // Context: first match wins.
        let data = proxy::criteria_data(&labels);
        let mut selected = None;
        for context in &contract.contexts {
            let matched = self
                .expressions
                .allows_optional(context.criteria.as_ref(), &data)?;
            walk.log.debug(format!(
                "Context '{}' of contract '{namespace}/{name}' matched: {matched}",
                context.name
            ));
            if matched {
                selected = Some(context);
                break;
            }
        }
        let context = selected.ok_or_else(|| ResolveError::NoMatchingContext {
            contract: format!("{namespace}/{name}"),
        })?;
        walk.log.info(format!(
            "Contract '{namespace}/{name}' resolved to context '{}'",
            context.name
        ));

        if let Some(ops) = &context.change_labels {
            labels.apply_transform(ops);
        }

        let service = self.policy.get::<Service>(&context.allocation.service, namespace)?;
        labels = labels.add_labels(&service.labels);

        // Rules of the service namespace, in declaration order.
        for rule in self.policy.rules_in(&service.metadata.namespace) {
            let data = proxy::rule_data(&labels, service, scope.dependency);
            if !self.expressions.allows_optional(rule.criteria.as_ref(), &data)? {
                continue;
            }
            walk.log.debug(format!(
                "Rule '{}' matched for service '{}'",
                rule.metadata.name, service.metadata.name
            ));
            if rule.actions.rejects_dependency() {
                return Ok(NodeOutcome::Rejected {
                    reason: RejectReason::Dependency,
                    rule: rule.metadata.name.clone(),
                });
            }
            if rule.actions.rejects_ingress() {
                return Ok(NodeOutcome::Rejected {
                    reason: RejectReason::Ingress,
                    rule: rule.metadata.name.clone(),
                });
            }
            if let Some(ops) = &rule.actions.change_labels {
                if labels.apply_transform(ops) {
                    walk.log.debug(format!("Rule '{}' changed labels", rule.metadata.name));
                }
            }
        }

        let allocation_data = proxy::allocation_data(&scope.user, scope.dependency, &labels);
        let allocation_keys = self
            .templates
            .render_all(&context.allocation.keys, &allocation_data)?;

        let cluster = labels.get(LABEL_CLUSTER).unwrap_or_default().to_string();
        if !cluster.is_empty() {
            let (cluster_ns, cluster_name) = parse_reference(&cluster, namespace)?;
            self.policy.get::<Cluster>(cluster_name, cluster_ns)?;
        }
        let target = labels.get(LABEL_TARGET).unwrap_or_default().to_string();

        let service_key = ComponentInstanceKey::for_service(
            cluster.clone(),
            target,
            namespace,
            name,
            &context.name,
            allocation_keys.clone(),
            &service.metadata.name,
        );

        walk.path.enter(Frame {
            namespace: service.metadata.namespace.clone(),
            service: service.metadata.name.clone(),
            context: context.name.clone(),
            allocation_keys,
        })?;

        let result = self.resolve_service(scope, service, &service_key, &labels, depth, walk);
        walk.path.leave();
        result
    }

    fn resolve_service(
        &self,
        scope: &Scope<'_>,
        service: &Service,
        service_key: &ComponentInstanceKey,
        labels: &LabelSet,
        depth: usize,
        walk: &mut Walk,
    ) -> std::result::Result<NodeOutcome, ResolveError> {
        let service_key_str = service_key.key();
        upsert(walk, service_key, &scope.dependency_key, depth, labels);

        let mut discovery: Map<String, Value> = Map::new();
        let mut component_keys: BTreeMap<&str, String> = BTreeMap::new();
        let criteria_data = proxy::criteria_data(labels);

        for component in component_order(service)? {
            if !self
                .expressions
                .allows_optional(component.criteria.as_ref(), &criteria_data)?
            {
                walk.log.debug(format!(
                    "Component '{}' of service '{}' skipped by criteria",
                    component.name, service.metadata.name
                ));
                continue;
            }

            let component_key = service_key.with_component(&component.name);
            let component_key_str = component_key.key();
            upsert(walk, &component_key, &scope.dependency_key, depth, labels);

            if let Some(reference) = &component.contract {
                let child = self.resolve_contract(
                    scope,
                    reference,
                    &service.metadata.namespace,
                    labels.clone(),
                    depth + 1,
                    walk,
                )?;
                match child {
                    NodeOutcome::Resolved { key, discovery: tree } => {
                        add_edge(walk, &component_key_str, key);
                        discovery.insert(component.name.clone(), Value::Object(tree));
                    }
                    rejected @ NodeOutcome::Rejected { .. } => return Ok(rejected),
                }
            } else if let Some(code) = &component.code {
                if component_key.cluster.is_empty() {
                    return Err(ResolveError::ClusterNotSet {
                        service: service.metadata.name.clone(),
                        component: component.name.clone(),
                    });
                }

                let data = proxy::code_data(&scope.user, labels, &discovery, &component_key);
                let rendered_discovery = self.templates.render_value(&component.discovery, &data)?;
                discovery.insert(component.name.clone(), rendered_discovery.clone());

                let data = proxy::code_data(&scope.user, labels, &discovery, &component_key);
                let params = self.templates.render_value(&code.params, &data)?;

                if let Some(instance) = walk.instances.get_mut(&component_key_str) {
                    instance.set_code(&code.code_type, params, rendered_discovery)?;
                }
                walk.log.debug(format!(
                    "Code component '{}' resolved as '{component_key_str}'",
                    component.name
                ));
            } else {
                return Err(ResolveError::Policy(PolicyError::validation(
                    format!("service {}.components.{}", service.metadata.name, component.name),
                    "component has neither contract nor code",
                )));
            }

            add_edge(walk, &service_key_str, component_key_str.clone());
            for sibling in &component.dependencies {
                if let Some(sibling_key) = component_keys.get(sibling.as_str()) {
                    add_edge(walk, &component_key_str, sibling_key.clone());
                }
            }
            component_keys.insert(component.name.as_str(), component_key_str);
        }

        Ok(NodeOutcome::Resolved {
            key: service_key_str,
            discovery,
        })
    }
}

fn upsert(
    walk: &mut Walk,
    key: &ComponentInstanceKey,
    dependency: &str,
    depth: usize,
    labels: &LabelSet,
) {
    let instance = walk
        .instances
        .entry(key.key())
        .or_insert_with(|| ComponentInstance::new(key.clone()));
    instance.add_dependency(dependency, depth);
    instance.add_labels(labels);
}

fn add_edge(walk: &mut Walk, from: &str, to: String) {
    if let Some(instance) = walk.instances.get_mut(from) {
        instance.add_edge(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventLevel;
    use crate::test_support::{
        after, allocated, assert_logged, code_component, contract, contract_component, context,
        dependency, discovering, gated, resolve_ok, resolver, rule_reject, rule_reject_ingress,
        rule_set_labels, service, with_criteria, PolicyBuilder,
    };
    use serde_json::json;

    fn simple_policy() -> PolicyBuilder {
        PolicyBuilder::new()
            .cluster("k8s")
            .service(service("postgres", vec![code_component("db", "{{User.Name}}")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
    }

    #[test]
    fn test_resolve_single_dependency() {
        let policy = simple_policy().dependency(dependency("alice-db", "alice", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        let instances = resolve_ok(&resolution, "main:dependency:alice-db");
        assert_eq!(instances.len(), 2);
        assert_eq!(resolution.component_instances.len(), 2);
        assert!(resolution.dangling_edges().is_empty());

        let code = resolution
            .component_instances
            .values()
            .find(|i| i.is_code)
            .unwrap();
        assert_eq!(code.calculated_code_params, Value::String(String::from("alice")));
        assert_eq!(code.dependency_keys.get("main:dependency:alice-db"), Some(&0));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let build = || {
            simple_policy()
                .dependency(dependency("a", "alice", "db", &[("cluster", "k8s")]))
                .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]))
        };
        let first = resolver(build()).resolve_all_blocking();
        let second = resolver(build()).resolve_all_blocking();

        let keys = |r: &PolicyResolution| r.component_instances.keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.dependency_outcomes, second.dependency_outcomes);
    }

    #[test]
    fn test_fan_in_shares_instance() {
        // No allocation keys: both users land on the same instances, but the
        // code params must agree, so they do not use per-user templates.
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("postgres", vec![code_component("db", "shared")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .dependency(dependency("a", "alice", "db", &[("cluster", "k8s")]))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert_eq!(resolution.component_instances.len(), 2);
        for instance in resolution.component_instances.values() {
            assert!(instance.dependency_keys.contains_key("main:dependency:a"));
            assert!(instance.dependency_keys.contains_key("main:dependency:b"));
        }
    }

    #[test]
    fn test_fan_in_records_each_depth() {
        // d1 reaches postgres through web -> app -> storage; d2 asks for it directly.
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("app", vec![contract_component("storage", "db")]))
            .service(service("postgres", vec![code_component("db", "shared")]))
            .contract(contract("web", vec![context("default", None, "app")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .dependency(dependency("d1", "alice", "web", &[("cluster", "k8s")]))
            .dependency(dependency("d2", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        resolve_ok(&resolution, "main:dependency:d1");
        let direct = resolve_ok(&resolution, "main:dependency:d2");
        assert_eq!(direct.len(), 2);
        for instance in direct {
            assert_eq!(instance.dependency_keys.get("main:dependency:d1"), Some(&1));
            assert_eq!(instance.dependency_keys.get("main:dependency:d2"), Some(&0));
        }
        assert_eq!(resolution.component_instances.len(), 4);
    }

    #[test]
    fn test_allocation_keys_split_instances_per_user() {
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("postgres", vec![code_component("db", "db-{{User.Name}}")]))
            .contract(contract(
                "db",
                vec![allocated(context("default", None, "postgres"), &["{{User.Name}}"])],
            ))
            .dependency(dependency("a", "alice", "db", &[("cluster", "k8s")]))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        let code_of = |dep: &str| {
            resolve_ok(&resolution, dep)
                .into_iter()
                .find(|i| i.is_code)
                .unwrap()
                .clone()
        };
        let alice = code_of("main:dependency:a");
        let bob = code_of("main:dependency:b");

        assert_ne!(alice.key.key(), bob.key.key());
        assert_eq!(alice.key.allocation_keys, vec![String::from("alice")]);
        assert_eq!(bob.key.allocation_keys, vec![String::from("bob")]);
        assert_eq!(alice.calculated_code_params, json!("db-alice"));
        assert_eq!(alice.dependency_keys.len(), 1);
        assert_eq!(resolution.component_instances.len(), 4);
    }

    #[test]
    fn test_rule_labels_reach_nested_contracts_and_cluster() {
        // Neither dependency names a cluster; only the rule supplies one,
        // and the nested contract only matches the label the rule sets.
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("app", vec![contract_component("storage", "db")]))
            .service(service("postgres", vec![code_component("db", "x")]))
            .contract(contract("web", vec![context("default", None, "app")]))
            .contract(contract("db", vec![context("fast", Some(r#"(eq disk "ssd")"#), "postgres")]))
            .rule(with_criteria(
                rule_set_labels("gold-placement", &[("cluster", "k8s"), ("disk", "ssd")]),
                r#"(eq tier "gold")"#,
            ))
            .dependency(dependency("gold", "alice", "web", &[("tier", "gold")]))
            .dependency(dependency("plain", "bob", "web", &[]));
        let resolution = resolver(policy).resolve_all_blocking();

        let instances = resolve_ok(&resolution, "main:dependency:gold");
        let code = instances.iter().find(|i| i.is_code).unwrap();
        assert_eq!(code.key.cluster, "k8s");
        assert_eq!(code.key.context, "fast");
        assert_eq!(code.calculated_labels.get("disk"), Some("ssd"));

        assert!(matches!(
            resolution.outcome("main:dependency:plain"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::NoMatchingContext,
                ..
            })
        ));
    }

    #[test]
    fn test_sibling_discovery_feeds_later_components() {
        // `app` is declared first but depends on `db`, so `db` is resolved first.
        let app = after(code_component("app", "{{Discovery.db.host}}:5432"), &["db"]);
        let db = discovering(code_component("db", "x"), json!({"host": "db-{{User.Name}}"}));
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("stack", vec![app, db]))
            .contract(contract("stack", vec![context("default", None, "stack")]))
            .dependency(dependency("a", "alice", "stack", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        let instances = resolve_ok(&resolution, "main:dependency:a");
        let find = |component: &str| {
            instances
                .iter()
                .find(|i| i.key.component == component)
                .copied()
                .unwrap()
        };
        let app = find("app");
        let db = find("db");

        assert_eq!(db.calculated_discovery, json!({"host": "db-alice"}));
        assert_eq!(app.calculated_code_params, json!("db-alice:5432"));
        assert!(app.edges_out.contains(&db.key.key()));
    }

    #[test]
    fn test_component_criteria_skip_component() {
        let cache = gated(code_component("cache", "x"), r#"(eq cache "on")"#);
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("postgres", vec![code_component("db", "x"), cache]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .dependency(dependency("a", "alice", "db", &[("cluster", "k8s"), ("cache", "on")]))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        let with_cache = resolve_ok(&resolution, "main:dependency:a");
        let without = resolve_ok(&resolution, "main:dependency:b");
        assert_eq!(with_cache.len(), 3);
        assert_eq!(without.len(), 2);
        assert!(without.iter().all(|i| i.key.component != "cache"));
        assert_logged(&resolution.events, EventLevel::Debug, "'cache' of service 'postgres' skipped");
    }

    #[test]
    fn test_reject_ingress_on_nested_service() {
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("app", vec![contract_component("storage", "db")]))
            .service(service("postgres", vec![code_component("db", "x")]))
            .contract(contract("web", vec![context("default", None, "app")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .rule(with_criteria(
                rule_reject_ingress("no-db-ingress"),
                r#"(eq Service.Name "postgres")"#,
            ))
            .dependency(dependency("a", "alice", "web", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert_eq!(
            resolution.outcome("main:dependency:a"),
            Some(&DependencyOutcome::Rejected {
                reason: RejectReason::Ingress,
                rule: String::from("no-db-ingress"),
            })
        );
        assert!(resolution.component_instances.is_empty());
    }

    #[test]
    fn test_target_label_reaches_templates() {
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("postgres", vec![code_component("db", "ns-{{Target.Namespace}}")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .dependency(dependency(
                "a",
                "alice",
                "db",
                &[("cluster", "k8s"), ("target", "team-a")],
            ));
        let resolution = resolver(policy).resolve_all_blocking();

        let instances = resolve_ok(&resolution, "main:dependency:a");
        let code = instances.iter().find(|i| i.is_code).unwrap();
        assert_eq!(code.key.target_suffix, "team-a");
        assert_eq!(code.calculated_code_params, json!("ns-team-a"));
    }

    #[test]
    fn test_conflicting_params_fail_later_dependency() {
        let policy = simple_policy()
            .dependency(dependency("a", "alice", "db", &[("cluster", "k8s")]))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert!(resolution.is_resolved("main:dependency:a"));
        assert!(matches!(
            resolution.outcome("main:dependency:b"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::ConflictingInstance,
                ..
            })
        ));
        assert!(resolution.dependency_instances("main:dependency:b").is_empty());
    }

    #[test]
    fn test_first_matching_context_wins() {
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("small", vec![code_component("db", "small")]))
            .service(service("large", vec![code_component("db", "large")]))
            .contract(contract(
                "db",
                vec![
                    context("prod", Some(r#"(eq env "prod")"#), "large"),
                    context("fallback", None, "small"),
                ],
            ))
            .dependency(dependency("a", "alice", "db", &[("cluster", "k8s"), ("env", "prod")]))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s"), ("env", "dev")]));
        let resolution = resolver(policy).resolve_all_blocking();

        let root = |dep: &str| match resolution.outcome(dep) {
            Some(DependencyOutcome::Resolved { root }) => root.clone(),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert!(root("main:dependency:a").contains("#large#"));
        assert!(root("main:dependency:b").contains("#small#"));
    }

    #[test]
    fn test_no_matching_context() {
        let policy = PolicyBuilder::new()
            .service(service("postgres", vec![code_component("db", "x")]))
            .contract(contract(
                "db",
                vec![context("prod", Some(r#"(eq env "prod")"#), "postgres")],
            ))
            .dependency(dependency("a", "alice", "db", &[]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert!(matches!(
            resolution.outcome("main:dependency:a"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::NoMatchingContext,
                ..
            })
        ));
        assert_logged(&resolution.events, EventLevel::Error, "no matching context");
        assert!(resolution.component_instances.is_empty());
    }

    #[test]
    fn test_contract_not_found() {
        let policy = simple_policy()
            .dependency(dependency("a", "alice", "missing", &[("cluster", "k8s")]))
            .dependency(dependency("b", "alice", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert!(matches!(
            resolution.outcome("main:dependency:a"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::ContractNotFound,
                ..
            })
        ));
        // The rest of the pass is unaffected.
        assert!(resolution.is_resolved("main:dependency:b"));
    }

    #[test]
    fn test_reject_rule_short_circuits() {
        let policy = simple_policy()
            .rule(with_criteria(rule_reject("no-untrusted"), r#"(eq tier "untrusted")"#))
            .dependency(dependency(
                "a",
                "alice",
                "db",
                &[("cluster", "k8s"), ("tier", "untrusted")],
            ))
            .dependency(dependency("b", "bob", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert_eq!(
            resolution.outcome("main:dependency:a"),
            Some(&DependencyOutcome::Rejected {
                reason: RejectReason::Dependency,
                rule: String::from("no-untrusted"),
            })
        );
        assert!(resolution.dependency_instances("main:dependency:a").is_empty());
        assert!(resolution.is_resolved("main:dependency:b"));
    }

    #[test]
    fn test_contract_cycle_is_detected() {
        let policy = PolicyBuilder::new()
            .service(service("a", vec![contract_component("needs-b", "b")]))
            .service(service("b", vec![contract_component("needs-a", "a")]))
            .contract(contract("a", vec![context("default", None, "a")]))
            .contract(contract("b", vec![context("default", None, "b")]))
            .dependency(dependency("loop", "alice", "a", &[]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert!(matches!(
            resolution.outcome("main:dependency:loop"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::ResolutionCycle,
                ..
            })
        ));
        assert!(resolution.component_instances.is_empty());
    }

    #[test]
    fn test_nested_contract_depth_and_edges() {
        let policy = PolicyBuilder::new()
            .cluster("k8s")
            .service(service("app", vec![contract_component("storage", "db")]))
            .service(service("postgres", vec![code_component("db", "x")]))
            .contract(contract("web", vec![context("default", None, "app")]))
            .contract(contract("db", vec![context("default", None, "postgres")]))
            .dependency(dependency("a", "alice", "web", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();

        assert!(resolution.is_resolved("main:dependency:a"));
        assert_eq!(resolution.component_instances.len(), 4);
        assert!(resolution.dangling_edges().is_empty());

        let postgres_root = resolution
            .component_instances
            .values()
            .find(|i| i.key.service == "postgres" && i.key.is_service())
            .unwrap();
        assert_eq!(postgres_root.dependency_keys.get("main:dependency:a"), Some(&1));

        let storage = resolution
            .component_instances
            .values()
            .find(|i| i.key.component == "storage")
            .unwrap();
        assert!(storage.edges_out.contains(&postgres_root.key.key()));
    }

    #[test]
    fn test_code_without_cluster_fails() {
        let policy = simple_policy().dependency(dependency("a", "alice", "db", &[]));
        let resolution = resolver(policy).resolve_all_blocking();
        assert!(matches!(
            resolution.outcome("main:dependency:a"),
            Some(DependencyOutcome::Failed {
                kind: FailureKind::PolicyError,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_user_fails() {
        let policy = simple_policy().dependency(dependency("a", "mallory", "db", &[("cluster", "k8s")]));
        let resolution = resolver(policy).resolve_all_blocking();
        assert!(!resolution.is_resolved("main:dependency:a"));
    }
}
