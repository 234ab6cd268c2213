//! Ordered cascading deletion for SQLite schemas.
//!
//! Given a root selection, every entity that depends on it through belongs-to
//! relations is hard deleted or soft deactivated, leaves first and the root
//! last, inside one transaction with foreign-key checks and default filters
//! suspended for the duration of the run.

pub mod bfs;
pub mod cascade;
pub mod client;
pub mod errors;
pub mod filters;
pub mod orderer;
pub mod query;
pub mod schema;
pub mod store;

pub use crate::cascade::{
    CascadeEngine, CascadeOptions, CascadeReport, DeletionMethod, FilterSuspension, TypeOutcome,
};
pub use crate::errors::CascadeError;
pub use crate::filters::{
    DefaultFilter, FilterRegistry, QueryContext, ScopeGuard, with_suspended_filters,
};
pub use crate::orderer::{DeletionPlan, DependencyOrderer, PlanStep};
pub use crate::query::{RootSelection, ScopedQuery};
pub use crate::schema::{EntityType, JoinPath, Relation, SchemaConfig, SchemaGraph, SchemaRegistry};
pub use crate::store::{CascadeStore, SqliteStore};
