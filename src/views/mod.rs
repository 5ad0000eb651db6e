//! View-locator registry.
//!
//! A view locator maps an event to the routing key of the projection
//! instance responsible for it. Locators are constructed once at startup,
//! registered under a view type tag, and handed to consumers through an
//! explicit [`LocatorRegistry`] rather than looked up from process-wide state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::event::EventRecord;

/// Error types for locator registry operations.
///
/// None of these are concurrency conflicts; they describe wiring mistakes.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("Locator already registered for view type: {0}")]
    Duplicate(String),

    #[error("No locator registered for view type: {0}")]
    NotRegistered(String),

    #[error("Failed to activate locator for view type {view_type}: {reason}")]
    Activation { view_type: String, reason: String },
}

/// Maps an event to the routing key of the view instance that consumes it.
pub trait ViewLocator: Send + Sync {
    /// Routing key for `event`, or `None` if the view ignores it.
    fn locate(&self, event: &EventRecord) -> Option<String>;
}

impl<F> ViewLocator for F
where
    F: Fn(&EventRecord) -> Option<String> + Send + Sync,
{
    fn locate(&self, event: &EventRecord) -> Option<String> {
        self(event)
    }
}

/// Routes every event to a view keyed by its aggregate id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateIdLocator;

impl ViewLocator for AggregateIdLocator {
    fn locate(&self, event: &EventRecord) -> Option<String> {
        Some(event.aggregate_id.clone())
    }
}

/// Routes events by the value of a metadata key. Events without the key
/// are not routed.
#[derive(Debug, Clone)]
pub struct MetadataKeyLocator {
    key: String,
}

impl MetadataKeyLocator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl ViewLocator for MetadataKeyLocator {
    fn locate(&self, event: &EventRecord) -> Option<String> {
        event.metadata.get(&self.key).map(str::to_string)
    }
}

/// Registry of one locator instance per view type tag.
#[derive(Default, Clone)]
pub struct LocatorRegistry {
    locators: HashMap<String, Arc<dyn ViewLocator>>,
}

impl fmt::Debug for LocatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut view_types: Vec<&String> = self.locators.keys().collect();
        view_types.sort();
        f.debug_struct("LocatorRegistry")
            .field("view_types", &view_types)
            .finish()
    }
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already constructed locator for `view_type`.
    pub fn register<L>(&mut self, view_type: &str, locator: L) -> Result<(), LocatorError>
    where
        L: ViewLocator + 'static,
    {
        if self.locators.contains_key(view_type) {
            warn!(view_type, "Duplicate view locator registration");
            return Err(LocatorError::Duplicate(view_type.to_string()));
        }

        info!(view_type, "Registering view locator");
        self.locators
            .insert(view_type.to_string(), Arc::new(locator));
        Ok(())
    }

    /// Construct a locator with `activate` and register it.
    ///
    /// A construction failure is reported as [`LocatorError::Activation`]
    /// and leaves the registry unchanged.
    pub fn register_with<L, E, F>(&mut self, view_type: &str, activate: F) -> Result<(), LocatorError>
    where
        L: ViewLocator + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<L, E>,
    {
        if self.locators.contains_key(view_type) {
            return Err(LocatorError::Duplicate(view_type.to_string()));
        }

        let locator = activate().map_err(|e| LocatorError::Activation {
            view_type: view_type.to_string(),
            reason: e.to_string(),
        })?;
        self.register(view_type, locator)
    }

    /// The locator registered for `view_type`.
    pub fn resolve(&self, view_type: &str) -> Result<Arc<dyn ViewLocator>, LocatorError> {
        self.locators
            .get(view_type)
            .cloned()
            .ok_or_else(|| LocatorError::NotRegistered(view_type.to_string()))
    }

    /// Routing key for `event` under the locator registered for `view_type`.
    pub fn route(&self, view_type: &str, event: &EventRecord) -> Result<Option<String>, LocatorError> {
        let key = self.resolve(view_type)?.locate(event);
        debug!(
            view_type,
            aggregate_id = %event.aggregate_id,
            global_sequence_number = event.global_sequence_number,
            routed = key.is_some(),
            "Located view"
        );
        Ok(key)
    }

    pub fn contains(&self, view_type: &str) -> bool {
        self.locators.contains_key(view_type)
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }
}
