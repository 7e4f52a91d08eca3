//! Typed object mapping over a schemaless, indexed key-value store.
//!
//! - [`Field`]: a typed attribute with validation, wire encoding and secondary
//!   index derivation
//! - [`SchemaBuilder`] / [`SchemaRegistry`]: declarative model definitions
//!   with inheritance, checked together once at startup
//! - [`Entity`]: an owned, in-memory handle on one record, mutated through
//!   explicit accessors
//! - [`Migrator`]: exact-version forward and reverse migration steps
//! - [`ModelHooks`]: optional per-model logic run around persistence
//!
//! This crate performs no I/O. Managers in the storage layer move
//! [`Record`]s between entities and a backend.

mod entity;
mod error;
mod field;
mod hooks;
mod migration;
mod schema;
mod value;

pub use entity::Entity;
pub use error::{ModelError, ModelResult};
pub use field::{Field, FieldDefault, FieldKind};
pub use hooks::ModelHooks;
pub use migration::{MigrationData, MigrationStep, Migrator, migrate_record};
pub use schema::{Backlink, ModelSchema, SchemaBuilder, SchemaRegistry, SchemaRegistryBuilder};
pub use value::{Record, Tag, VERSION_KEY, Value, version_label};
