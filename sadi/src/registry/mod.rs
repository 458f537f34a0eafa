//! Access to a catalog of SADI service descriptions.

pub mod memory;
pub mod sparql;

pub use memory::InMemoryRegistry;
pub use sparql::SparqlRegistry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A constraint a service declares on one property of its input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRestriction {
    pub on_property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_from: Option<String>,
}

impl PropertyRestriction {
    pub fn new(on_property: impl Into<String>) -> Self {
        Self {
            on_property: on_property.into(),
            values_from: None,
        }
    }

    pub fn with_values_from(mut self, class: impl Into<String>) -> Self {
        self.values_from = Some(class.into());
        self
    }
}

/// A service as described by the registry. The service URI is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_instance_query: Option<String>,
    #[serde(default)]
    pub restrictions: Vec<PropertyRestriction>,
}

impl ServiceDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: String::new(),
            input_classes: Vec::new(),
            input_instance_query: None,
            restrictions: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_class(mut self, class: impl Into<String>) -> Self {
        let class = class.into();
        if !self.input_classes.contains(&class) {
            self.input_classes.push(class);
        }
        self
    }

    pub fn with_input_instance_query(mut self, query: impl Into<String>) -> Self {
        self.input_instance_query = Some(query.into());
        self
    }

    /// Replace (never extend) the attached restrictions.
    pub fn with_restrictions(mut self, restrictions: Vec<PropertyRestriction>) -> Self {
        self.restrictions = restrictions;
        self
    }

    pub fn accepts_any_class<S: AsRef<str>>(&self, classes: &[S]) -> bool {
        classes
            .iter()
            .any(|c| self.input_classes.iter().any(|own| own == c.as_ref()))
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("malformed registry response: {0}")]
    Malformed(String),

    #[error("unknown service: {0}")]
    UnknownService(String),
}

impl RegistryError {
    /// True when the catalog cannot be reached at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RegistryError::Unavailable(_))
    }
}

/// Read-only view of a service catalog.
pub trait RegistryClient: Send + Sync {
    /// Services whose declared input class is any of `classes`, in the
    /// registry's own order.
    fn find_by_input_class(&self, classes: &[String]) -> Result<Vec<ServiceDescriptor>, RegistryError>;

    /// One page of the full catalog. Stable for a fixed offset and limit.
    fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<ServiceDescriptor>, RegistryError>;

    /// Return `service` with its property restrictions replaced by the
    /// registry's current ones.
    fn augment_with_property_restrictions(
        &self,
        service: ServiceDescriptor,
    ) -> Result<ServiceDescriptor, RegistryError>;

    fn service_count(&self) -> Result<usize, RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_descriptor_json_defaults() {
        let json = r#"{"uri": "http://ex/svc", "name": "Svc"}"#;
        let service: ServiceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(service, ServiceDescriptor::new("http://ex/svc", "Svc"));
    }

    #[test]
    fn test_with_restrictions_replaces() {
        let service = ServiceDescriptor::new("http://ex/svc", "Svc")
            .with_restrictions(vec![PropertyRestriction::new("http://ex/p1")])
            .with_restrictions(vec![PropertyRestriction::new("http://ex/p2")
                .with_values_from("http://ex/C")]);
        assert_eq!(
            service.restrictions,
            vec![PropertyRestriction {
                on_property: "http://ex/p2".to_string(),
                values_from: Some("http://ex/C".to_string()),
            }]
        );
    }

    #[test]
    fn test_accepts_any_class() {
        let service = ServiceDescriptor::new("http://ex/svc", "Svc")
            .with_input_class("http://ex/T1")
            .with_input_class("http://ex/T1");
        assert_eq!(service.input_classes.len(), 1);
        assert!(service.accepts_any_class(&["http://ex/T3", "http://ex/T1"]));
        assert!(!service.accepts_any_class::<&str>(&[]));
    }
}
