use rusqlite::types::Value;
use serde::Serialize;

use crate::{
    errors::CascadeError,
    filters::QueryContext,
    schema::{EntityType, JoinPath, SchemaRegistry},
};

/// The anchor rows of a cascade: one entity, optionally narrowed by a SQL
/// predicate over its own columns with positional `?` parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RootSelection {
    entity: String,
    predicate: Option<String>,
    params: Vec<Value>,
}

impl RootSelection {
    pub fn new<T: Into<String>>(entity: T) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            params: Vec::new(),
        }
    }

    pub fn filter<T: Into<String>>(mut self, predicate: T) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn bind<V: Into<Value>>(mut self, value: V) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    fn select_ids(&self, root: &EntityType, ctx: &QueryContext<'_>) -> String {
        let mut clauses = Vec::new();
        if let Some(predicate) = self.predicate.as_deref() {
            clauses.push(format!("({predicate})"));
        }
        for filter in ctx.effective_filters(&root.name) {
            clauses.push(format!("({})", filter.predicate));
        }
        let mut sql = format!(
            "SELECT {} FROM {}",
            quote(&root.id_column),
            quote(&root.table)
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql
    }
}

/// A `SELECT` of identities of one entity, ready to be wrapped by a delete,
/// update or count statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopedQuery {
    pub entity: String,
    pub table: String,
    pub id_column: String,
    pub active_column: String,
    pub updated_at_column: String,
    pub select_sql: String,
    #[serde(skip)]
    pub params: Vec<Value>,
}

/// Builds the query selecting the rows of `entity` related to the root
/// selection. The root entity reuses the selection as is; any other entity is
/// joined along `join` up to the root table and restricted to root identities
/// in the selection.
pub fn build_scoped_query(
    registry: &SchemaRegistry,
    ctx: &QueryContext<'_>,
    root: &RootSelection,
    entity: &str,
    join: Option<&JoinPath>,
) -> Result<ScopedQuery, CascadeError> {
    let descriptor = registry.entity(entity)?;
    let root_type = registry.entity(root.entity())?;
    let root_ids = root.select_ids(root_type, ctx);
    if entity == root.entity() {
        return Ok(scoped(descriptor, root_ids, root.params().to_vec()));
    }
    let path = join.ok_or_else(|| CascadeError::no_path(entity, root.entity()))?;
    if path.is_empty() || !path.connects(entity, root.entity()) {
        return Err(CascadeError::invalid_input(format!(
            "join path {} does not lead from {entity} to {}",
            path.describe(),
            root.entity()
        )));
    }

    let mut sql = format!(
        "SELECT t0.{} FROM {} AS t0",
        quote(&descriptor.id_column),
        quote(&descriptor.table)
    );
    let mut aliases = vec![("t0".to_string(), descriptor)];
    for (idx, hop) in path.hops().iter().enumerate() {
        let target = registry.entity(&hop.target)?;
        let alias = format!("t{}", idx + 1);
        sql.push_str(&format!(
            " JOIN {} AS {alias} ON {alias}.{} = t{idx}.{}",
            quote(&target.table),
            quote(hop.primary_key()),
            quote(&hop.foreign_key)
        ));
        aliases.push((alias, target));
    }
    let (root_alias, _) = &aliases[aliases.len() - 1];
    let mut clauses = vec![format!(
        "{root_alias}.{} IN ({root_ids})",
        quote(&root_type.id_column)
    )];
    for (alias, joined) in &aliases {
        for filter in ctx.effective_filters(&joined.name) {
            clauses.push(format!(
                "{alias}.{id} IN (SELECT {id} FROM {} WHERE {})",
                quote(&joined.table),
                filter.predicate,
                id = quote(&joined.id_column)
            ));
        }
    }
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
    Ok(scoped(descriptor, sql, root.params().to_vec()))
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn scoped(entity: &EntityType, select_sql: String, params: Vec<Value>) -> ScopedQuery {
    ScopedQuery {
        entity: entity.name.clone(),
        table: entity.table.clone(),
        id_column: entity.id_column.clone(),
        active_column: entity.active_column.clone(),
        updated_at_column: entity.updated_at_column.clone(),
        select_sql,
        params,
    }
}
