//! graphsync-core: schema model and query compilers for the graphsync ingestion engine.
//!
//! This crate holds everything that does not talk to the database:
//! - Property references and their resolution against records and constants
//! - Node, relationship, and MatchLink schemas
//! - The pure compilers that turn schemas into upsert, index, and cleanup Cypher
//! - Engine configuration
//! - Schema and argument errors

pub mod cleanupbuilder;
pub mod config;
pub mod error;
pub mod property;
pub mod querybuilder;
pub mod record;
pub mod schema;
pub mod statement;

pub use config::{EngineConfig, RetryConfig};
pub use error::SchemaError;
pub use property::{resolve, PropertyMap, PropertyRef, PropertySource};
pub use record::{Constants, Record, UpdateTag};
pub use schema::{ConditionalLabel, LinkDirection, MatchLinkSchema, NodeSchema, RelSchema};
pub use statement::Statement;
