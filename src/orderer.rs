use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::{
    errors::CascadeError,
    schema::{JoinPath, SchemaGraph, SchemaRegistry},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub entity: String,
    /// `None` only for the root entity, which is selected directly.
    pub join: Option<JoinPath>,
}

/// Ordered steps of one cascade: dependents first, root last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    root: String,
    steps: Vec<PlanStep>,
}

impl DeletionPlan {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn entities(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.entity.as_str()).collect()
    }

    pub fn step(&self, entity: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.entity == entity)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Turns the schema graph into deletion order and join paths, leaving out
/// entities that must never be purged (audit trails and the like).
pub struct DependencyOrderer<'a> {
    graph: &'a dyn SchemaGraph,
    registry: &'a SchemaRegistry,
    exclusions: AHashSet<String>,
}

impl<'a> DependencyOrderer<'a> {
    pub fn new(graph: &'a dyn SchemaGraph, registry: &'a SchemaRegistry) -> Self {
        Self {
            graph,
            registry,
            exclusions: AHashSet::new(),
        }
    }

    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions.extend(exclusions.into_iter().map(Into::into));
        self
    }

    pub fn bottom_up(&self, root: &str) -> Result<Vec<String>, CascadeError> {
        if self.exclusions.contains(root) {
            return Err(CascadeError::invalid_input(format!(
                "root entity {root} cannot be excluded"
            )));
        }
        let mut ordered: Vec<String> = self
            .graph
            .bottom_up_types(root)?
            .into_iter()
            .filter(|entity| entity != root && !self.exclusions.contains(entity))
            .collect();
        ordered.push(root.to_string());
        Ok(ordered)
    }

    pub fn path_to(&self, from: &str, to: &str) -> Result<JoinPath, CascadeError> {
        self.graph
            .path_to(from, to)?
            .ok_or_else(|| CascadeError::no_path(from, to))
    }

    /// Walks the named relations starting at `from`; the walk must end at `to`.
    pub fn resolve_override<S: AsRef<str>>(
        &self,
        from: &str,
        to: &str,
        relations: &[S],
    ) -> Result<JoinPath, CascadeError> {
        let mut hops = Vec::with_capacity(relations.len());
        let mut current = from.to_string();
        for name in relations {
            let name = name.as_ref();
            let rel = self.registry.relation(&current, name).ok_or_else(|| {
                CascadeError::invalid_input(format!("{current} has no relation {name}"))
            })?;
            current = rel.target.clone();
            hops.push(rel.clone());
        }
        let path = JoinPath::new(hops);
        if path.is_empty() || !path.connects(from, to) {
            return Err(CascadeError::invalid_input(format!(
                "join override {} for {from} does not reach {to}",
                path.describe()
            )));
        }
        Ok(path)
    }

    /// Resolves every step before anything is executed, so a broken schema or
    /// override never leaves a cascade half done.
    pub fn plan(
        &self,
        root: &str,
        overrides: &AHashMap<String, Vec<String>>,
    ) -> Result<DeletionPlan, CascadeError> {
        self.registry.entity(root)?;
        let entities = self.bottom_up(root)?;
        for entity in overrides.keys() {
            if entity == root || !entities.contains(entity) {
                tracing::warn!(entity = %entity, "join override ignored, entity is not cascaded");
            }
        }
        let mut steps = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity == root {
                continue;
            }
            let join = if let Some(relations) = overrides.get(&entity) {
                self.resolve_override(&entity, root, relations.as_slice())?
            } else {
                self.path_to(&entity, root)?
            };
            steps.push(PlanStep {
                entity,
                join: Some(join),
            });
        }
        let mut steps = order_by_join_paths(root, steps)?;
        steps.push(PlanStep {
            entity: root.to_string(),
            join: None,
        });
        Ok(DeletionPlan {
            root: root.to_string(),
            steps,
        })
    }
}

/// Keeps the graph's order where it can, but never deletes an entity while a
/// pending entity still joins through its table. Schema cycles can put such an
/// entity first, which would leave the joining entity's rows behind.
fn order_by_join_paths(root: &str, steps: Vec<PlanStep>) -> Result<Vec<PlanStep>, CascadeError> {
    // joined_through[x] = entities whose join path passes through x
    let mut joined_through: AHashMap<String, AHashSet<String>> = AHashMap::new();
    for step in &steps {
        let Some(join) = &step.join else { continue };
        for hop in join.hops() {
            if hop.target != root && hop.target != step.entity {
                joined_through
                    .entry(hop.target.clone())
                    .or_default()
                    .insert(step.entity.clone());
            }
        }
    }

    let mut pending = steps;
    let mut emitted: AHashSet<String> = AHashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending.iter().position(|step| {
            joined_through
                .get(&step.entity)
                .map(|users| users.iter().all(|user| emitted.contains(user)))
                .unwrap_or(true)
        });
        let Some(idx) = ready else {
            let stuck: Vec<&str> = pending.iter().map(|step| step.entity.as_str()).collect();
            return Err(CascadeError::invalid_input(format!(
                "join paths of {} pass through each other, no deletion order reaches every row",
                stuck.join(", ")
            )));
        };
        if idx != 0 {
            tracing::debug!(
                entity = %pending[idx].entity,
                deferred = %pending[0].entity,
                "deletion order adjusted around a schema cycle"
            );
        }
        let step = pending.remove(idx);
        emitted.insert(step.entity.clone());
        ordered.push(step);
    }
    Ok(ordered)
}
