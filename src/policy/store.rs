//! In-memory policy snapshot.
//!
//! A [`Policy`] holds every object of one policy generation, indexed by
//! kind, namespace and name. Lookups are kind-parameterized: asking for a
//! [`Service`] either returns a service or fails with a typed error, never
//! an object of another kind.

use std::collections::HashMap;

use crate::error::PolicyError;

use super::objects::{
    Cluster, Contract, Dependency, ObjectKind, PolicyObject, Rule, Service,
};

/// Identity of an object inside a policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectRef {
    kind: ObjectKind,
    namespace: String,
    name: String,
}

/// Immutable snapshot of all policy objects.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Objects in declaration order.
    objects: Vec<PolicyObject>,
    /// Index into `objects`.
    index: HashMap<ObjectRef, usize>,
}

/// Policy object types that can be looked up by kind.
pub trait PolicyKind: Sized {
    /// Kind of this object type.
    const KIND: ObjectKind;

    /// Extracts this type from a policy object.
    fn from_object(object: &PolicyObject) -> Option<&Self>;
}

macro_rules! policy_kind {
    ($ty:ident, $variant:ident) => {
        impl PolicyKind for $ty {
            const KIND: ObjectKind = ObjectKind::$variant;

            fn from_object(object: &PolicyObject) -> Option<&Self> {
                match object {
                    PolicyObject::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

policy_kind!(Service, Service);
policy_kind!(Contract, Contract);
policy_kind!(Rule, Rule);
policy_kind!(Cluster, Cluster);
policy_kind!(Dependency, Dependency);

impl Policy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a policy from objects, rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if two objects share kind, namespace and name.
    pub fn from_objects(objects: impl IntoIterator<Item = PolicyObject>) -> Result<Self, PolicyError> {
        let mut policy = Self::new();
        for object in objects {
            policy.add_object(object)?;
        }
        Ok(policy)
    }

    /// Adds an object to the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if an object with the same identity already exists.
    pub fn add_object(&mut self, object: PolicyObject) -> Result<(), PolicyError> {
        let metadata = object.metadata();
        let key = ObjectRef {
            kind: object.kind(),
            namespace: metadata.namespace.clone(),
            name: metadata.name.clone(),
        };

        if self.index.contains_key(&key) {
            return Err(PolicyError::Duplicate {
                kind: key.kind.to_string(),
                namespace: key.namespace,
                name: key.name,
            });
        }

        self.index.insert(key, self.objects.len());
        self.objects.push(object);
        Ok(())
    }

    /// Gets an object of any kind.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotFound`] if the object does not exist.
    pub fn get_object(
        &self,
        kind: ObjectKind,
        name: &str,
        namespace: &str,
    ) -> Result<&PolicyObject, PolicyError> {
        let key = ObjectRef {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.index
            .get(&key)
            .and_then(|idx| self.objects.get(*idx))
            .ok_or_else(|| PolicyError::not_found(kind.as_str(), namespace, name))
    }

    /// Gets a typed object.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotFound`] if the object does not exist and
    /// [`PolicyError::KindMismatch`] if the stored object has another kind.
    pub fn get<T: PolicyKind>(&self, name: &str, namespace: &str) -> Result<&T, PolicyError> {
        let object = self.get_object(T::KIND, name, namespace)?;
        T::from_object(object).ok_or_else(|| PolicyError::KindMismatch {
            expected: T::KIND.to_string(),
            actual: object.kind().to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// Gets all objects of a kind, in declaration order.
    #[must_use]
    pub fn get_objects_by_kind(&self, kind: ObjectKind) -> Vec<&PolicyObject> {
        self.objects.iter().filter(|o| o.kind() == kind).collect()
    }

    /// Gets all typed objects of a kind, in declaration order.
    #[must_use]
    pub fn all<T: PolicyKind>(&self) -> Vec<&T> {
        self.objects.iter().filter_map(T::from_object).collect()
    }

    /// Returns the rules of a namespace in declaration order.
    #[must_use]
    pub fn rules_in(&self, namespace: &str) -> Vec<&Rule> {
        self.all::<Rule>()
            .into_iter()
            .filter(|r| r.metadata.namespace == namespace)
            .collect()
    }

    /// Returns all dependencies in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&Dependency> {
        self.all::<Dependency>()
    }

    /// Returns every object in declaration order.
    #[must_use]
    pub fn objects(&self) -> &[PolicyObject] {
        &self.objects
    }

    /// Returns the number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the policy has no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Splits a reference of the form `name` or `namespace/name`.
///
/// # Errors
///
/// Returns [`PolicyError::MalformedReference`] for empty parts or more than
/// one separator.
pub fn parse_reference<'a>(
    reference: &'a str,
    current_namespace: &'a str,
) -> Result<(&'a str, &'a str), PolicyError> {
    let malformed = |reason: &str| PolicyError::MalformedReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = reference.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) if !name.is_empty() => Ok((current_namespace, name)),
        (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => Ok((ns, name)),
        (_, _, Some(_)) => Err(malformed("expected 'name' or 'namespace/name'")),
        _ => Err(malformed("empty namespace or name")),
    }
}
