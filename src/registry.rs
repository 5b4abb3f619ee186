//! Process-wide schema registry.
//!
//! Every compiled schema registers itself by name, so dynamically built
//! schema types are compiled once and shared the same way statically
//! declared ones are.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::schema::Schema;

/// Global, thread-safe map: schema name -> compiled schema.
static REGISTRY: Lazy<DashMap<String, Arc<Schema>>> = Lazy::new(DashMap::new);

/// Register a compiled schema under its name. Re-registering a name
/// replaces the previous entry.
pub fn register_schema(schema: &Arc<Schema>) {
    let previous = REGISTRY.insert(schema.name().to_string(), schema.clone());
    if previous.is_some() {
        log::warn!("schema '{}' re-registered, replacing previous entry", schema.name());
    } else {
        log::debug!("registered schema '{}'", schema.name());
    }
}

/// Look up a compiled schema by name.
pub fn lookup_schema(name: &str) -> Option<Arc<Schema>> {
    REGISTRY.get(name).map(|entry| entry.value().clone())
}
