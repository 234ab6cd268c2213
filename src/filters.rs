//! Default query filters and their temporary suspension.
//!
//! [`FilterRegistry`] holds the filters currently in force for every registered
//! entity. It is process-wide state: [`ScopeGuard`] clears filters in place and
//! restores its own entry snapshot on exit, so overlapping guards from
//! independent callers must be serialised by those callers. Query building
//! never reads the registry directly; it goes through a [`QueryContext`], which
//! can suspend filters for a set of entities without touching shared state.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::CascadeError;

/// A named SQL predicate over an entity's own columns, applied to every query
/// against that entity unless suspended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultFilter {
    pub name: String,
    pub predicate: String,
}

impl DefaultFilter {
    pub fn new<N: Into<String>, P: Into<String>>(name: N, predicate: P) -> Self {
        Self {
            name: name.into(),
            predicate: predicate.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FilterRegistry {
    inner: RwLock<AHashMap<String, Vec<DefaultFilter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AHashMap::new()),
        }
    }

    pub fn register(&self, entity: &str, filters: Vec<DefaultFilter>) {
        self.inner.write().insert(entity.to_string(), filters);
    }

    pub fn get(&self, entity: &str) -> Option<Vec<DefaultFilter>> {
        self.inner.read().get(entity).cloned()
    }

    /// Replaces the filters of an already registered entity.
    pub fn set(&self, entity: &str, filters: Vec<DefaultFilter>) -> Result<(), CascadeError> {
        match self.inner.write().get_mut(entity) {
            Some(slot) => {
                *slot = filters;
                Ok(())
            }
            None => Err(CascadeError::schema(format!(
                "no filters registered for {entity}"
            ))),
        }
    }

    pub fn add(&self, entity: &str, filter: DefaultFilter) -> Result<(), CascadeError> {
        match self.inner.write().get_mut(entity) {
            Some(slot) => {
                slot.push(filter);
                Ok(())
            }
            None => Err(CascadeError::schema(format!(
                "no filters registered for {entity}"
            ))),
        }
    }

    /// Empties the filters of every listed entity and returns what they held,
    /// under a single write lock. Nothing changes unless every entity is
    /// registered.
    pub fn take_all<S: AsRef<str>>(
        &self,
        entities: &[S],
    ) -> Result<Vec<(String, Vec<DefaultFilter>)>, CascadeError> {
        let mut inner = self.inner.write();
        let mut seen = AHashSet::new();
        let mut names = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity = entity.as_ref();
            if !inner.contains_key(entity) {
                return Err(CascadeError::schema(format!(
                    "no filters registered for {entity}"
                )));
            }
            if seen.insert(entity) {
                names.push(entity);
            }
        }
        Ok(names
            .into_iter()
            .map(|name| {
                let filters = inner.get_mut(name).map(std::mem::take).unwrap_or_default();
                (name.to_string(), filters)
            })
            .collect())
    }

    /// Drops the entity from the registry altogether.
    pub fn remove(&self, entity: &str) -> Option<Vec<DefaultFilter>> {
        self.inner.write().remove(entity)
    }
}

/// Clears the filters of a set of entities until [`ScopeGuard::exit`] is called
/// or the guard is dropped, then writes back the filters captured at entry.
pub struct ScopeGuard<'a> {
    registry: &'a FilterRegistry,
    snapshot: Vec<(String, Vec<DefaultFilter>)>,
    active: bool,
}

impl<'a> ScopeGuard<'a> {
    pub fn enter<S: AsRef<str>>(
        registry: &'a FilterRegistry,
        entities: &[S],
    ) -> Result<Self, CascadeError> {
        let snapshot = registry.take_all(entities)?;
        tracing::debug!(entities = snapshot.len(), "default filters suspended");
        Ok(Self {
            registry,
            snapshot,
            active: true,
        })
    }

    pub fn suspended(&self) -> impl Iterator<Item = &str> {
        self.snapshot.iter().map(|(entity, _)| entity.as_str())
    }

    /// Filters as they were when the guard was entered.
    pub fn captured(&self, entity: &str) -> Option<&[DefaultFilter]> {
        self.snapshot
            .iter()
            .find(|(name, _)| name == entity)
            .map(|(_, filters)| filters.as_slice())
    }

    pub fn exit(mut self) -> Result<(), CascadeError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), CascadeError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        let mut failed = Vec::new();
        for (entity, filters) in &self.snapshot {
            if self.registry.set(entity, filters.clone()).is_err() {
                failed.push(entity.as_str());
            }
        }
        if failed.is_empty() {
            tracing::debug!(entities = self.snapshot.len(), "default filters restored");
            Ok(())
        } else {
            Err(CascadeError::restoration(
                format!("default filters of {} could not be restored", failed.join(", ")),
                None,
            ))
        }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::error!("{err}");
        }
    }
}

/// Runs `block` with the filters of `entities` suspended and restores them
/// afterwards, whether or not `block` succeeded.
pub fn with_suspended_filters<S, T, F>(
    registry: &FilterRegistry,
    entities: &[S],
    block: F,
) -> Result<T, CascadeError>
where
    S: AsRef<str>,
    F: FnOnce() -> Result<T, CascadeError>,
{
    let guard = ScopeGuard::enter(registry, entities)?;
    let outcome = block();
    let restored = guard.exit();
    CascadeError::settle(outcome, restored)
}

/// Per-call view of the filter registry with some entities' filters suspended.
pub struct QueryContext<'a> {
    filters: &'a FilterRegistry,
    suspended: AHashSet<String>,
}

impl<'a> QueryContext<'a> {
    pub fn new(filters: &'a FilterRegistry) -> Self {
        Self {
            filters,
            suspended: AHashSet::new(),
        }
    }

    pub fn suspend<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suspended.extend(entities.into_iter().map(Into::into));
        self
    }

    pub fn is_suspended(&self, entity: &str) -> bool {
        self.suspended.contains(entity)
    }

    pub fn effective_filters(&self, entity: &str) -> Vec<DefaultFilter> {
        if self.is_suspended(entity) {
            return Vec::new();
        }
        self.filters.get(entity).unwrap_or_default()
    }
}
