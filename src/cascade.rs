//! Cascade engine: deletes or deactivates a root selection together with every
//! row that depends on it, one entity at a time, dependents first.
//!
//! A run resolves its whole plan up front, then suspends default filters,
//! switches foreign-key checks off and executes every step inside a single
//! transaction. Foreign-key checks and filters are put back afterwards on every
//! path, and a failure to put them back is reported alongside the error that
//! aborted the run.

use std::{fmt, str::FromStr};

use ahash::AHashMap;
use chrono::Utc;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::{
    errors::CascadeError,
    filters::{QueryContext, ScopeGuard},
    orderer::{DeletionPlan, DependencyOrderer},
    query::{RootSelection, ScopedQuery, build_scoped_query},
    schema::{SchemaGraph, SchemaRegistry},
    store::CascadeStore,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionMethod {
    /// Physically remove rows. Irreversible once committed.
    #[default]
    Hard,
    /// Clear the active flag and stamp the modification time.
    Soft,
}

impl DeletionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionMethod::Hard => "hard",
            DeletionMethod::Soft => "soft",
        }
    }
}

impl fmt::Display for DeletionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletionMethod {
    type Err = CascadeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(':').to_ascii_lowercase().as_str() {
            "hard" => Ok(DeletionMethod::Hard),
            "soft" => Ok(DeletionMethod::Soft),
            _ => Err(CascadeError::unsupported_method(s)),
        }
    }
}

/// How default filters are taken out of the way during a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterSuspension {
    /// Filters are bypassed in the queries of this run only. Shared filter
    /// state is left alone, so concurrent runs do not interfere.
    #[default]
    Scoped,
    /// Filters are also cleared in the shared registry for the duration of the
    /// run. Runs over overlapping entities must not execute concurrently.
    Global,
}

#[derive(Clone, Debug, Default)]
pub struct CascadeOptions {
    /// Entity name to relation names walked from that entity to the root.
    pub join_overrides: AHashMap<String, Vec<String>>,
    pub method: DeletionMethod,
    pub exclusions: Vec<String>,
    pub filter_suspension: FilterSuspension,
}

impl CascadeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: DeletionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_method_name(self, name: &str) -> Result<Self, CascadeError> {
        Ok(self.with_method(name.parse()?))
    }

    pub fn with_join<E, S>(mut self, entity: E, relations: &[S]) -> Self
    where
        E: Into<String>,
        S: AsRef<str>,
    {
        self.join_overrides.insert(
            entity.into(),
            relations.iter().map(|r| r.as_ref().to_string()).collect(),
        );
        self
    }

    pub fn exclude<E: Into<String>>(mut self, entity: E) -> Self {
        self.exclusions.push(entity.into());
        self
    }

    pub fn with_filter_suspension(mut self, suspension: FilterSuspension) -> Self {
        self.filter_suspension = suspension;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeOutcome {
    pub entity: String,
    pub affected: usize,
}

/// Rows affected per entity, in plan order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub method: DeletionMethod,
    pub dry_run: bool,
    pub outcomes: Vec<TypeOutcome>,
}

impl CascadeReport {
    pub fn total(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.affected).sum()
    }

    pub fn affected(&self, entity: &str) -> Option<usize> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.entity == entity)
            .map(|outcome| outcome.affected)
    }

    pub fn entities(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .map(|outcome| outcome.entity.as_str())
            .collect()
    }
}

pub struct CascadeEngine<'a> {
    registry: &'a SchemaRegistry,
    graph: &'a dyn SchemaGraph,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            graph: registry,
        }
    }

    /// Uses another dependency-graph provider in place of the registry's own.
    pub fn with_graph(mut self, graph: &'a dyn SchemaGraph) -> Self {
        self.graph = graph;
        self
    }

    pub fn plan(
        &self,
        root: &RootSelection,
        options: &CascadeOptions,
    ) -> Result<DeletionPlan, CascadeError> {
        DependencyOrderer::new(self.graph, self.registry)
            .with_exclusions(options.exclusions.iter().cloned())
            .plan(root.entity(), &options.join_overrides)
    }

    /// Counts the rows a run with the same arguments would affect. Nothing is
    /// modified and no checks are toggled.
    pub fn preview<S: CascadeStore + ?Sized>(
        &self,
        store: &S,
        root: &RootSelection,
        options: &CascadeOptions,
    ) -> Result<CascadeReport, CascadeError> {
        let plan = self.plan(root, options)?;
        let queries = self.build_queries(&plan, root)?;
        let mut outcomes = Vec::with_capacity(queries.len());
        for query in &queries {
            outcomes.push(TypeOutcome {
                entity: query.entity.clone(),
                affected: store.count_matching(query)?,
            });
        }
        Ok(CascadeReport {
            method: options.method,
            dry_run: true,
            outcomes,
        })
    }

    pub fn run<S: CascadeStore + ?Sized>(
        &self,
        store: &S,
        root: &RootSelection,
        options: &CascadeOptions,
    ) -> Result<CascadeReport, CascadeError> {
        let plan = self.plan(root, options)?;
        let queries = self.build_queries(&plan, root)?;
        tracing::info!(
            root = %plan.root(),
            steps = plan.len(),
            method = %options.method,
            "starting cascade"
        );

        let entities = plan.entities();
        let guard = match options.filter_suspension {
            FilterSuspension::Scoped => None,
            FilterSuspension::Global => Some(ScopeGuard::enter(
                self.registry.filters(),
                entities.as_slice(),
            )?),
        };
        let outcome = with_integrity_checks_disabled(store, || {
            apply_in_transaction(store, &queries, options.method)
        });
        let restored = guard.map_or(Ok(()), ScopeGuard::exit);
        let outcomes = CascadeError::settle(outcome, restored)?;

        Ok(CascadeReport {
            method: options.method,
            dry_run: false,
            outcomes,
        })
    }

    fn build_queries(
        &self,
        plan: &DeletionPlan,
        root: &RootSelection,
    ) -> Result<Vec<ScopedQuery>, CascadeError> {
        let ctx = QueryContext::new(self.registry.filters()).suspend(plan.entities());
        plan.steps()
            .iter()
            .map(|step| {
                build_scoped_query(self.registry, &ctx, root, &step.entity, step.join.as_ref())
            })
            .collect()
    }
}

/// Switches foreign-key checks off around `block` and puts the previous
/// setting back afterwards, even when `block` fails.
fn with_integrity_checks_disabled<S, T, F>(store: &S, block: F) -> Result<T, CascadeError>
where
    S: CascadeStore + ?Sized,
    F: FnOnce() -> Result<T, CascadeError>,
{
    let previous = store.integrity_checks()?;
    store.set_integrity_checks(false)?;
    let outcome = block();
    let restored = store.set_integrity_checks(previous);
    if let Err(err) = &restored {
        tracing::error!("could not restore foreign key checks: {err}");
    }
    CascadeError::settle(outcome, restored)
}

fn apply_in_transaction<S: CascadeStore + ?Sized>(
    store: &S,
    queries: &[ScopedQuery],
    method: DeletionMethod,
) -> Result<Vec<TypeOutcome>, CascadeError> {
    store.begin()?;
    let stamp = now_timestamp();
    let mut outcomes = Vec::with_capacity(queries.len());
    for query in queries {
        match apply_step(store, query, method, &stamp) {
            Ok(affected) => outcomes.push(TypeOutcome {
                entity: query.entity.clone(),
                affected,
            }),
            Err(err) => return Err(roll_back(store, err)),
        }
    }
    if let Err(err) = store.commit() {
        return Err(roll_back(store, err));
    }
    Ok(outcomes)
}

fn apply_step<S: CascadeStore + ?Sized>(
    store: &S,
    query: &ScopedQuery,
    method: DeletionMethod,
    stamp: &str,
) -> Result<usize, CascadeError> {
    tracing::info!(entity = %query.entity, "{method} deleting {}", query.table);
    let affected = match method {
        DeletionMethod::Hard => store.delete_matching(query)?,
        DeletionMethod::Soft => store.update_matching(
            query,
            &[
                (query.active_column.clone(), Value::Integer(0)),
                (query.updated_at_column.clone(), Value::Text(stamp.to_string())),
            ],
        )?,
    };
    tracing::info!(entity = %query.entity, affected, "{affected} {} {method} deleted", query.table);
    Ok(affected)
}

fn roll_back<S: CascadeStore + ?Sized>(store: &S, err: CascadeError) -> CascadeError {
    tracing::warn!("cascade aborted, rolling back: {err}");
    match store.rollback() {
        Ok(()) => err,
        Err(rollback_err) => {
            CascadeError::transaction(format!("{err}; rollback failed: {rollback_err}"))
        }
    }
}

fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}
