//! redb table definitions for the pushgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Deployments keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Deployment id keyed by the deployment's client-facing key.
pub const DEPLOYMENT_KEYS: TableDefinition<&str, &str> = TableDefinition::new("deployment_keys");

/// Release history (JSON array, oldest first) keyed by deployment id.
pub const HISTORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("histories");
