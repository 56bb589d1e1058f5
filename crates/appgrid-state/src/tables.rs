//! redb table definitions for the appgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized objects).
//! Keys follow the pattern `{namespace}/{name}`.

use redb::TableDefinition;

/// AppService objects keyed by `{namespace}/{name}`.
pub const APP_SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("app_services");

/// Pod objects keyed by `{namespace}/{name}`.
pub const PODS: TableDefinition<&str, &[u8]> = TableDefinition::new("pods");
