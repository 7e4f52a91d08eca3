//! Model schemas and the registry that ties them together.
//!
//! A schema is declared once with [`SchemaBuilder`] and frozen by
//! [`SchemaRegistry::build`], which resolves inheritance, validates every
//! field definition and registers reverse lookups ("backlinks") for every
//! relation field on its target model.

use crate::entity::Entity;
use crate::field::Field;
use crate::hooks::ModelHooks;
use crate::migration::Migrator;
use crate::value::{Record, Value};
use crate::{ModelError, ModelResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Declarative definition of a model, consumed by the registry.
#[derive(Clone)]
pub struct SchemaBuilder {
    name: String,
    bucket: Option<String>,
    version: Option<u32>,
    fields: Vec<Field>,
    migrator: Option<Arc<Migrator>>,
    hooks: Option<Arc<dyn ModelHooks>>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bucket: None,
            version: None,
            fields: Vec::new(),
            migrator: None,
            hooks: None,
        }
    }

    /// Inherits the fields, version, migrator and hooks of `parent`. The
    /// subtype's own definitions win whether they are added before or after
    /// this call. Parent fields come first in field order.
    #[must_use]
    pub fn extends(mut self, parent: &SchemaBuilder) -> Self {
        let mut own = std::mem::take(&mut self.fields);
        let mut fields = Vec::with_capacity(parent.fields.len() + own.len());
        for field in &parent.fields {
            match own.iter().position(|f| f.name() == field.name()) {
                Some(i) => fields.push(own.remove(i)),
                None => fields.push(field.clone()),
            }
        }
        fields.extend(own);
        self.fields = fields;
        self.version = self.version.or(parent.version);
        if self.migrator.is_none() {
            self.migrator = parent.migrator.clone();
        }
        if self.hooks.is_none() {
            self.hooks = parent.hooks.clone();
        }
        self
    }

    /// Bucket name; defaults to the lower-cased model name.
    #[must_use]
    pub fn bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn field(mut self, name: &str, field: Field) -> Self {
        let field = field.named(name);
        match self.fields.iter_mut().find(|f| f.name() == name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    #[must_use]
    pub fn migrator(mut self, migrator: Migrator) -> Self {
        self.migrator = Some(Arc::new(migrator));
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: impl ModelHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> ModelResult<()> {
        let mut indexes = BTreeSet::new();
        let mut prefixes: Vec<(String, &str)> = Vec::new();
        for field in &self.fields {
            field.check_definition(&self.name)?;
            if let Some(index) = field.index() {
                if !indexes.insert(index) {
                    return Err(ModelError::schema(format!(
                        "{}: index {index:?} is used by more than one field",
                        self.name
                    )));
                }
            }
            if let Some(prefix) = field.physical_prefix() {
                prefixes.push((prefix, field.name()));
            }
        }
        for (prefix, owner) in &prefixes {
            for field in &self.fields {
                if field.name() == *owner {
                    continue;
                }
                let clash = field.name().starts_with(prefix.as_str())
                    || field
                        .physical_prefix()
                        .is_some_and(|other| other.starts_with(prefix.as_str()) || prefix.starts_with(&other));
                if clash {
                    return Err(ModelError::schema(format!(
                        "{}: fields {owner:?} and {:?} overlap on prefix {prefix:?}",
                        self.name,
                        field.name()
                    )));
                }
            }
        }
        if let Some(migrator) = &self.migrator {
            migrator.check(&self.name, self.version)?;
        }
        Ok(())
    }
}

/// A reverse lookup registered on a relation's target model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlink {
    /// Model holding the relation field.
    pub model: String,
    pub field: String,
    /// Index the relation is stored under on `model`.
    pub index: String,
}

/// A frozen model definition.
pub struct ModelSchema {
    name: String,
    bucket: String,
    version: Option<u32>,
    fields: Vec<Field>,
    migrator: Option<Arc<Migrator>>,
    hooks: Option<Arc<dyn ModelHooks>>,
    backlinks: BTreeMap<String, Backlink>,
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("version", &self.version)
            .field("fields", &self.fields)
            .field("backlinks", &self.backlinks)
            .finish_non_exhaustive()
    }
}

impl ModelSchema {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Current version records of this model are written at.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> ModelResult<&Field> {
        self.fields
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| ModelError::UnknownField {
                model: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Field `name`, which must be indexed, and its index name.
    pub fn indexed_field(&self, name: &str) -> ModelResult<(&Field, &str)> {
        let field = self.field(name)?;
        let index = field.index().ok_or_else(|| {
            ModelError::validation(format!("{}.{name} is not indexed", self.name))
        })?;
        Ok((field, index))
    }

    #[must_use]
    pub fn migrator(&self) -> Option<&Migrator> {
        self.migrator.as_deref()
    }

    #[must_use]
    pub fn hooks(&self) -> Option<&dyn ModelHooks> {
        self.hooks.as_deref()
    }

    #[must_use]
    pub fn backlinks(&self) -> &BTreeMap<String, Backlink> {
        &self.backlinks
    }

    pub fn backlink(&self, name: &str) -> ModelResult<&Backlink> {
        self.backlinks.get(name).ok_or_else(|| {
            ModelError::schema(format!("{} has no backlink named {name:?}", self.name))
        })
    }

    /// Creates a new, unsaved entity with every field at its default.
    pub fn create_default(self: &Arc<Self>, key: &str) -> ModelResult<Entity> {
        self.create(key, std::iter::empty::<(&str, Value)>())
    }

    /// Creates a new, unsaved entity. Fields missing from `values` take
    /// their defaults; fields without one are required.
    pub fn create<I, K, V>(self: &Arc<Self>, key: &str, values: I) -> ModelResult<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut supplied: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in values {
            let name = name.as_ref();
            self.field(name)?;
            supplied.insert(name.to_string(), value.into());
        }
        let mut record = Record::new();
        record.set_version(self.version);
        for field in &self.fields {
            let value = match supplied.remove(field.name()) {
                Some(value) => value,
                None => field.initial_value().ok_or_else(|| {
                    ModelError::validation(format!(
                        "{}.{} is required",
                        self.name,
                        field.name()
                    ))
                })?,
            };
            let value = field.validate(&value)?;
            field.write(&value, &mut record)?;
        }
        Ok(Entity::from_parts(Arc::clone(self), key, record, Vec::new()))
    }
}

/// The set of models known to a manager.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn get(&self, model: &str) -> ModelResult<Arc<ModelSchema>> {
        self.models
            .get(model)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(model.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.values()
    }
}

/// Collects schema declarations and validates them together.
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    schemas: Vec<SchemaBuilder>,
}

impl SchemaRegistryBuilder {
    #[must_use]
    pub fn register(mut self, schema: SchemaBuilder) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Validates every schema and resolves relations and backlinks.
    pub fn build(self) -> ModelResult<SchemaRegistry> {
        let mut names = BTreeSet::new();
        for schema in &self.schemas {
            if !names.insert(schema.name.clone()) {
                return Err(ModelError::schema(format!(
                    "model {:?} is registered twice",
                    schema.name
                )));
            }
            schema.check()?;
        }

        let mut backlinks: BTreeMap<String, BTreeMap<String, Backlink>> = BTreeMap::new();
        for schema in &self.schemas {
            for field in &schema.fields {
                let (Some(target), Some(index)) = (field.target(), field.index()) else {
                    continue;
                };
                if !names.contains(target) {
                    return Err(ModelError::schema(format!(
                        "{}.{} refers to unknown model {target:?}",
                        schema.name,
                        field.name()
                    )));
                }
                let name = field
                    .backlink_name()
                    .map_or_else(|| format!("{}s", schema.name.to_lowercase()), str::to_string);
                let links = backlinks.entry(target.to_string()).or_default();
                if links.contains_key(&name) {
                    return Err(ModelError::schema(format!(
                        "backlink {name:?} on {target} is declared more than once"
                    )));
                }
                links.insert(
                    name,
                    Backlink {
                        model: schema.name.clone(),
                        field: field.name().to_string(),
                        index: index.to_string(),
                    },
                );
            }
        }

        let mut buckets = BTreeSet::new();
        let mut models = BTreeMap::new();
        for schema in self.schemas {
            let bucket = schema
                .bucket
                .clone()
                .unwrap_or_else(|| schema.name.to_lowercase());
            if !buckets.insert(bucket.clone()) {
                return Err(ModelError::schema(format!(
                    "bucket {bucket:?} is used by more than one model"
                )));
            }
            let links = backlinks.remove(&schema.name).unwrap_or_default();
            models.insert(
                schema.name.clone(),
                Arc::new(ModelSchema {
                    name: schema.name,
                    bucket,
                    version: schema.version,
                    fields: schema.fields,
                    migrator: schema.migrator,
                    hooks: schema.hooks,
                    backlinks: links,
                }),
            );
        }
        Ok(SchemaRegistry { models })
    }
}
