//! Static registry of entity descriptors and the belongs-to relations between them.
//!
//! Entities and relations are registered once at startup (in code or from a JSON
//! document) and looked up by name afterwards. Registration order matters: it is
//! the edge-iteration order used by join-path search and the tie-break used by
//! bottom-up ordering, so the same registry always yields the same plans.

use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    bfs::{bottom_up_order, shortest_join_path},
    errors::CascadeError,
    filters::{DefaultFilter, FilterRegistry},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_active_column")]
    pub active_column: String,
    #[serde(default = "default_updated_at_column")]
    pub updated_at_column: String,
    #[serde(default)]
    pub filters: Vec<DefaultFilter>,
}

impl EntityType {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, table: T) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_column: default_id_column(),
            active_column: default_active_column(),
            updated_at_column: default_updated_at_column(),
            filters: Vec::new(),
        }
    }

    pub fn with_id_column<T: Into<String>>(mut self, column: T) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_soft_delete_columns<A: Into<String>, U: Into<String>>(
        mut self,
        active: A,
        updated_at: U,
    ) -> Self {
        self.active_column = active.into();
        self.updated_at_column = updated_at.into();
        self
    }

    pub fn with_filter<N: Into<String>, P: Into<String>>(mut self, name: N, predicate: P) -> Self {
        self.filters.push(DefaultFilter::new(name, predicate));
        self
    }
}

/// A belongs-to edge: `source.foreign_key` references `target.primary_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub source: String,
    pub name: String,
    pub target: String,
    pub foreign_key: String,
    #[serde(default)]
    pub primary_key: Option<String>,
}

impl Relation {
    pub fn belongs_to<S, N, T, F>(source: S, name: N, target: T, foreign_key: F) -> Self
    where
        S: Into<String>,
        N: Into<String>,
        T: Into<String>,
        F: Into<String>,
    {
        Self {
            source: source.into(),
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            primary_key: None,
        }
    }

    pub fn with_primary_key<T: Into<String>>(mut self, column: T) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Referenced column on the target. Filled with the target's identity column on registration.
    pub fn primary_key(&self) -> &str {
        self.primary_key.as_deref().unwrap_or("id")
    }
}

/// Ordered relation hops leading from a dependent entity back to an ancestor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinPath {
    hops: Vec<Relation>,
}

impl JoinPath {
    pub fn new(hops: Vec<Relation>) -> Self {
        Self { hops }
    }

    pub fn hops(&self) -> &[Relation] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// True when the hops chain from `from` and end at `to`.
    pub fn connects(&self, from: &str, to: &str) -> bool {
        if self.hops.is_empty() {
            return from == to;
        }
        let mut current = from;
        for hop in &self.hops {
            if hop.source != current {
                return false;
            }
            current = hop.target.as_str();
        }
        current == to
    }

    /// Relation names joined with dots, e.g. `subproject.project`.
    pub fn describe(&self) -> String {
        self.hops
            .iter()
            .map(|hop| hop.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Dependency-graph provider consumed by the orderer.
pub trait SchemaGraph {
    /// Every entity reachable from `root` through reverse belongs-to edges,
    /// leaf-first, `root` last.
    fn bottom_up_types(&self, root: &str) -> Result<Vec<String>, CascadeError>;

    /// Shortest chain of belongs-to hops from `from` to `to`, if any.
    fn path_to(&self, from: &str, to: &str) -> Result<Option<JoinPath>, CascadeError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub entities: Vec<EntityType>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entities: Vec<EntityType>,
    index: AHashMap<String, usize>,
    relations: Vec<Relation>,
    filters: FilterRegistry,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: SchemaConfig) -> Result<Self, CascadeError> {
        let mut registry = Self::new();
        for entity in config.entities {
            registry.register_entity(entity)?;
        }
        for relation in config.relations {
            registry.register_relation(relation)?;
        }
        Ok(registry)
    }

    pub fn from_json(input: &str) -> Result<Self, CascadeError> {
        let config: SchemaConfig =
            serde_json::from_str(input).map_err(|e| CascadeError::schema(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CascadeError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| CascadeError::schema(format!("{}: {e}", path.display())))?;
        Self::from_json(&input)
    }

    pub fn register_entity(&mut self, entity: EntityType) -> Result<(), CascadeError> {
        validate_entity(&entity)?;
        if self.index.contains_key(&entity.name) {
            return Err(CascadeError::schema(format!(
                "entity {} registered twice",
                entity.name
            )));
        }
        self.filters
            .register(&entity.name, entity.filters.clone());
        self.index.insert(entity.name.clone(), self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    pub fn register_relation(&mut self, mut relation: Relation) -> Result<(), CascadeError> {
        if relation.name.trim().is_empty() || relation.foreign_key.trim().is_empty() {
            return Err(CascadeError::schema(
                "relation name and foreign key must be set",
            ));
        }
        self.entity(&relation.source)?;
        let target = self.entity(&relation.target)?;
        if relation.primary_key.is_none() {
            relation.primary_key = Some(target.id_column.clone());
        }
        if self.relation(&relation.source, &relation.name).is_some() {
            return Err(CascadeError::schema(format!(
                "relation {}.{} registered twice",
                relation.source, relation.name
            )));
        }
        self.relations.push(relation);
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType, CascadeError> {
        self.index
            .get(name)
            .map(|&idx| &self.entities[idx])
            .ok_or_else(|| CascadeError::schema(format!("unknown entity {name}")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn relation(&self, source: &str, name: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|rel| rel.source == source && rel.name == name)
    }

    /// Belongs-to edges leaving `source`, in registration order.
    pub fn outgoing<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.iter().filter(move |rel| rel.source == source)
    }

    /// Belongs-to edges pointing at `target`, in registration order.
    pub fn incoming<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.iter().filter(move |rel| rel.target == target)
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub(crate) fn position(&self, name: &str) -> usize {
        self.index.get(name).copied().unwrap_or(usize::MAX)
    }
}

impl SchemaGraph for SchemaRegistry {
    fn bottom_up_types(&self, root: &str) -> Result<Vec<String>, CascadeError> {
        bottom_up_order(self, root)
    }

    fn path_to(&self, from: &str, to: &str) -> Result<Option<JoinPath>, CascadeError> {
        shortest_join_path(self, from, to)
    }
}

fn validate_entity(entity: &EntityType) -> Result<(), CascadeError> {
    if entity.name.trim().is_empty() {
        return Err(CascadeError::schema("entity name must be set"));
    }
    if entity.table.trim().is_empty() {
        return Err(CascadeError::schema(format!(
            "entity {} has no table",
            entity.name
        )));
    }
    if entity.id_column.trim().is_empty() {
        return Err(CascadeError::schema(format!(
            "entity {} has no identity column",
            entity.name
        )));
    }
    Ok(())
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_active_column() -> String {
    "active".to_string()
}

fn default_updated_at_column() -> String {
    "updated_at".to_string()
}
