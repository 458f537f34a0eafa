//! A registry held entirely in memory.
//!
//! Used for offline runs (loaded from a JSON array of descriptors) and as the
//! registry behind the engine's tests.

use super::{PropertyRestriction, RegistryClient, RegistryError, ServiceDescriptor};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryRegistry {
    services: RwLock<Vec<ServiceDescriptor>>,
    restrictions: RwLock<HashMap<String, Vec<PropertyRestriction>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from descriptors. Any restrictions they carry move into the
    /// restriction table, so listings return bare descriptors just like a
    /// remote registry would.
    pub fn from_services(services: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        let registry = Self::new();
        for service in services {
            registry.register(service);
        }
        registry
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let services: Vec<ServiceDescriptor> =
            serde_json::from_str(json).map_err(|e| RegistryError::Malformed(e.to_string()))?;
        Ok(Self::from_services(services))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::Unavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Add a service, or replace the one with the same URI in place.
    pub fn register(&self, mut service: ServiceDescriptor) {
        let restrictions = std::mem::take(&mut service.restrictions);
        {
            let mut table = self
                .restrictions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            table.insert(service.uri.clone(), restrictions);
        }
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match services.iter_mut().find(|s| s.uri == service.uri) {
            Some(existing) => *existing = service,
            None => services.push(service),
        }
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryClient for InMemoryRegistry {
    fn find_by_input_class(&self, classes: &[String]) -> Result<Vec<ServiceDescriptor>, RegistryError> {
        let services = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(services
            .iter()
            .filter(|s| s.accepts_any_class(classes))
            .cloned()
            .collect())
    }

    fn list_all(&self, offset: usize, limit: usize) -> Result<Vec<ServiceDescriptor>, RegistryError> {
        let services = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(services.iter().skip(offset).take(limit).cloned().collect())
    }

    fn augment_with_property_restrictions(
        &self,
        service: ServiceDescriptor,
    ) -> Result<ServiceDescriptor, RegistryError> {
        let table = self
            .restrictions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let restrictions = table
            .get(&service.uri)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(service.uri.clone()))?;
        Ok(service.with_restrictions(restrictions))
    }

    fn service_count(&self) -> Result<usize, RegistryError> {
        Ok(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> InMemoryRegistry {
        InMemoryRegistry::from_services(vec![
            ServiceDescriptor::new("http://ex/a", "A").with_input_class("http://ex/T1"),
            ServiceDescriptor::new("http://ex/b", "B")
                .with_input_class("http://ex/T2")
                .with_restrictions(vec![PropertyRestriction::new("http://ex/p")]),
            ServiceDescriptor::new("http://ex/c", "C").with_input_class("http://ex/T1"),
        ])
    }

    #[test]
    fn test_find_keeps_registration_order() {
        let found = catalog()
            .find_by_input_class(&["http://ex/T1".to_string()])
            .unwrap();
        let uris: Vec<&str> = found.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, vec!["http://ex/a", "http://ex/c"]);
    }

    #[test]
    fn test_listing_strips_restrictions_until_augmented() {
        let registry = catalog();
        let page = registry.list_all(1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert!(page[0].restrictions.is_empty());

        let augmented = registry
            .augment_with_property_restrictions(page[0].clone())
            .unwrap();
        assert_eq!(augmented.restrictions, vec![PropertyRestriction::new("http://ex/p")]);
        // Idempotent: augmenting again replaces rather than appends.
        let again = registry.augment_with_property_restrictions(augmented).unwrap();
        assert_eq!(again.restrictions.len(), 1);
    }

    #[test]
    fn test_pages_past_the_end_are_empty() {
        let registry = catalog();
        assert_eq!(registry.list_all(2, 25).unwrap().len(), 1);
        assert!(registry.list_all(3, 25).unwrap().is_empty());
        assert_eq!(registry.service_count().unwrap(), 3);
    }

    #[test]
    fn test_register_replaces_in_place() {
        let registry = catalog();
        registry.register(ServiceDescriptor::new("http://ex/a", "A2"));
        let page = registry.list_all(0, 10).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].name, "A2");
    }

    #[test]
    fn test_unknown_service_cannot_be_augmented() {
        let err = catalog()
            .augment_with_property_restrictions(ServiceDescriptor::new("http://ex/zzz", "Z"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownService(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_from_json() {
        let registry = InMemoryRegistry::from_json(
            r#"[{"uri": "http://ex/a", "name": "A", "input_classes": ["http://ex/T1"],
                 "restrictions": [{"on_property": "http://ex/p", "values_from": "http://ex/C"}]}]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            InMemoryRegistry::from_json("{not json"),
            Err(RegistryError::Malformed(_))
        ));
    }
}
