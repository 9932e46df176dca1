//! Builders shared by unit tests.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::event::{EventLevel, EventLog};
use crate::external::ExternalData;
use crate::policy::{
    Allocation, Cluster, Code, Component, Context, Contract, Criteria, Dependency, LabelOperations,
    Metadata, Policy, PolicyObject, Rule, RuleActions, RuleVerdict, Service, User,
};
use crate::resolve::{ComponentInstance, ComponentInstanceKey, PolicyResolution, Resolver};

/// Collects policy objects for a test.
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    objects: Vec<PolicyObject>,
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: Service) -> Self {
        self.objects.push(PolicyObject::Service(service));
        self
    }

    pub fn contract(mut self, contract: Contract) -> Self {
        self.objects.push(PolicyObject::Contract(contract));
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.objects.push(PolicyObject::Rule(rule));
        self
    }

    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.objects.push(PolicyObject::Dependency(dependency));
        self
    }

    pub fn cluster(mut self, name: &str) -> Self {
        self.objects.push(PolicyObject::Cluster(Cluster {
            metadata: Metadata::new("main", name),
            cluster_type: String::from("kubernetes"),
            config: BTreeMap::new(),
        }));
        self
    }

    pub fn build(self) -> Policy {
        Policy::from_objects(self.objects).unwrap()
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

pub fn service(name: &str, components: Vec<Component>) -> Service {
    Service {
        metadata: Metadata::new("main", name),
        labels: BTreeMap::new(),
        components,
    }
}

/// A code component whose params are a single template string.
pub fn code_component(name: &str, params: &str) -> Component {
    Component {
        name: name.to_string(),
        criteria: None,
        contract: None,
        code: Some(Code {
            code_type: String::from("raw"),
            params: Value::String(params.to_string()),
        }),
        discovery: Value::Null,
        dependencies: vec![],
    }
}

pub fn contract_component(name: &str, contract: &str) -> Component {
    Component {
        name: name.to_string(),
        criteria: None,
        contract: Some(contract.to_string()),
        code: None,
        discovery: Value::Null,
        dependencies: vec![],
    }
}

/// Gates a component behind a criteria expression.
pub fn gated(mut component: Component, expression: &str) -> Component {
    component.criteria = Some(Criteria {
        require_all: vec![expression.to_string()],
        ..Criteria::default()
    });
    component
}

/// Makes a component depend on sibling components.
pub fn after(mut component: Component, siblings: &[&str]) -> Component {
    component.dependencies = siblings.iter().map(ToString::to_string).collect();
    component
}

/// Sets the discovery template of a component.
pub fn discovering(mut component: Component, discovery: Value) -> Component {
    component.discovery = discovery;
    component
}

pub fn contract(name: &str, contexts: Vec<Context>) -> Contract {
    Contract {
        metadata: Metadata::new("main", name),
        contexts,
    }
}

pub fn context(name: &str, criteria: Option<&str>, service: &str) -> Context {
    Context {
        name: name.to_string(),
        criteria: criteria.map(|c| Criteria {
            require_all: vec![c.to_string()],
            ..Criteria::default()
        }),
        change_labels: None,
        allocation: Allocation {
            service: service.to_string(),
            keys: vec![],
        },
    }
}

/// Sets the allocation key templates of a context.
pub fn allocated(mut context: Context, keys: &[&str]) -> Context {
    context.allocation.keys = keys.iter().map(ToString::to_string).collect();
    context
}

pub fn dependency(name: &str, user: &str, contract: &str, pairs: &[(&str, &str)]) -> Dependency {
    Dependency {
        metadata: Metadata::new("main", name),
        user: user.to_string(),
        contract: contract.to_string(),
        labels: labels(pairs),
    }
}

pub fn rule_reject(name: &str) -> Rule {
    Rule {
        metadata: Metadata::new("main", name),
        criteria: None,
        actions: RuleActions {
            dependency: Some(RuleVerdict::Reject),
            ingress: None,
            change_labels: None,
        },
    }
}

pub fn rule_reject_ingress(name: &str) -> Rule {
    let mut rule = rule_reject(name);
    rule.actions.dependency = None;
    rule.actions.ingress = Some(RuleVerdict::Reject);
    rule
}

pub fn rule_set_labels(name: &str, pairs: &[(&str, &str)]) -> Rule {
    Rule {
        metadata: Metadata::new("main", name),
        criteria: None,
        actions: RuleActions {
            dependency: None,
            ingress: None,
            change_labels: Some(LabelOperations {
                set: labels(pairs),
                remove: vec![],
            }),
        },
    }
}

pub fn with_criteria(mut rule: Rule, expression: &str) -> Rule {
    rule.criteria = Some(Criteria {
        require_all: vec![expression.to_string()],
        ..Criteria::default()
    });
    rule
}

pub fn users() -> Vec<User> {
    ["alice", "bob", "carol"]
        .into_iter()
        .map(|name| User {
            name: name.to_string(),
            labels: BTreeMap::new(),
        })
        .collect()
}

pub fn resolver(builder: PolicyBuilder) -> Resolver {
    Resolver::new(Arc::new(builder.build()), ExternalData::with_users(users()))
}

impl Resolver {
    /// Resolves against an empty actual state on a throwaway runtime.
    pub fn resolve_all_blocking(&self) -> PolicyResolution {
        tokio_test::block_on(self.resolve_all(&PolicyResolution::new())).unwrap()
    }
}

/// Asserts that `dependency` resolved and returns its instances.
pub fn resolve_ok<'a>(resolution: &'a PolicyResolution, dependency: &str) -> Vec<&'a ComponentInstance> {
    assert!(
        resolution.is_resolved(dependency),
        "{dependency} did not resolve: {:?}\nevents: {:#?}",
        resolution.outcome(dependency),
        resolution.events.entries()
    );
    resolution.dependency_instances(dependency)
}

/// Asserts that some event at `level` contains `needle`.
pub fn assert_logged(events: &EventLog, level: EventLevel, needle: &str) {
    assert!(
        events.contains(level, needle),
        "no {level:?} event containing {needle:?} in {:#?}",
        events.entries()
    );
}

/// A code instance for `service`/`component` with the given edges.
pub fn instance(service: &str, component: &str, edges: &[&ComponentInstance]) -> ComponentInstance {
    let key = ComponentInstanceKey::for_service("k8s", "", "main", "c", "default", vec![], service)
        .with_component(component);
    let mut instance = ComponentInstance::new(key);
    instance.is_code = true;
    instance.code_type = Some(String::from("raw"));
    instance.add_dependency("main:dependency:d", 0);
    for edge in edges {
        instance.add_edge(edge.key.key());
    }
    instance
}

/// Builds a resolution from instances.
pub fn resolution(instances: &[&ComponentInstance]) -> PolicyResolution {
    let mut resolution = PolicyResolution::new();
    for instance in instances {
        resolution
            .component_instances
            .insert(instance.key.key(), (*instance).clone());
    }
    resolution
}
