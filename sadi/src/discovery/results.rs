//! Listener-side collection of discovery events.

use super::events::{DiscoveryEvent, EmitError, EventSink};
use crate::registry::ServiceDescriptor;

/// Services found so far, kept sorted by case-insensitive name, plus the
/// latest status and progress. A repeated service URI is ignored.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    services: Vec<ServiceDescriptor>,
    status: Option<String>,
    progress: u8,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event in. Returns true if it added a service.
    pub fn apply(&mut self, event: DiscoveryEvent) -> bool {
        match event {
            DiscoveryEvent::ServiceFound { service } => self.insert(service),
            DiscoveryEvent::StatusMessage { message } => {
                self.status = Some(message);
                false
            }
            DiscoveryEvent::Progress { percent } => {
                self.progress = percent;
                false
            }
        }
    }

    fn insert(&mut self, service: ServiceDescriptor) -> bool {
        if self.contains(&service.uri) {
            return false;
        }
        let key = service.name.to_lowercase();
        let position = self
            .services
            .partition_point(|existing| existing.name.to_lowercase() < key);
        self.services.insert(position, service);
        true
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.services.iter().any(|s| s.uri == uri)
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }
}

impl EventSink for ResultSet {
    fn emit(&mut self, event: DiscoveryEvent) -> Result<(), EmitError> {
        self.apply(event);
        Ok(())
    }
}
