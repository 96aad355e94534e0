//! Implicit per-activation state: who is calling, and from which entry point.
//!
//! Three independent stores exist. The mutation context is established by
//! transactional mutation handlers, the query context by read handlers, and
//! the auth-only scope by detached follow-up work that outlives the mutation
//! that started it.

pub mod resolve;
pub mod store;

use crate::config::Environment;
use crate::error::GateError;
use crate::permission::AuthData;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::futures::TaskLocalFuture;

pub use resolve::{
    ScopedIdentity, observed_identity, resolve_identity, resolve_scoped_identity,
    set_observed_identity, spawn_detached,
};
pub use store::ContextStore;

static NEXT_ACTIVATION_ID: AtomicU64 = AtomicU64::new(1);

fn next_activation_id() -> u64 {
    NEXT_ACTIVATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Anything that can report the caller identity of its activation.
pub trait IdentityCarrier {
    fn auth(&self) -> Option<&AuthData>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub mutation_id: u64,
    pub auth: Option<AuthData>,
    pub environment: Environment,
}

impl MutationContext {
    pub fn new(auth: Option<AuthData>, environment: Environment) -> Self {
        Self {
            mutation_id: next_activation_id(),
            auth,
            environment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub query_id: u64,
    pub auth: Option<AuthData>,
}

impl QueryContext {
    pub fn new(auth: Option<AuthData>) -> Self {
        Self {
            query_id: next_activation_id(),
            auth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthScope {
    pub auth: Option<AuthData>,
}

impl IdentityCarrier for MutationContext {
    fn auth(&self) -> Option<&AuthData> {
        self.auth.as_ref()
    }
}

impl IdentityCarrier for QueryContext {
    fn auth(&self) -> Option<&AuthData> {
        self.auth.as_ref()
    }
}

impl IdentityCarrier for AuthScope {
    fn auth(&self) -> Option<&AuthData> {
        self.auth.as_ref()
    }
}

tokio::task_local! {
    static MUTATION_CONTEXT: MutationContext;
    static QUERY_CONTEXT: QueryContext;
    static AUTH_SCOPE: AuthScope;
}

pub fn mutation_store() -> ContextStore<MutationContext> {
    ContextStore::new("mutation", &MUTATION_CONTEXT)
}

pub fn query_store() -> ContextStore<QueryContext> {
    ContextStore::new("query", &QUERY_CONTEXT)
}

pub fn auth_scope_store() -> ContextStore<AuthScope> {
    ContextStore::new("auth scope", &AUTH_SCOPE)
}

pub fn run_with_mutation_context<F>(
    context: MutationContext,
    future: F,
) -> TaskLocalFuture<MutationContext, F>
where
    F: Future,
{
    tracing::debug!(
        mutation_id = context.mutation_id,
        caller = context.auth.as_ref().map(|a| a.id.as_str()),
        "entering mutation context"
    );
    mutation_store().run(context, future)
}

pub fn run_with_query_context<F>(context: QueryContext, future: F) -> TaskLocalFuture<QueryContext, F>
where
    F: Future,
{
    query_store().run(context, future)
}

pub fn run_with_auth_scope<F>(auth: Option<AuthData>, future: F) -> TaskLocalFuture<AuthScope, F>
where
    F: Future,
{
    auth_scope_store().run(AuthScope { auth }, future)
}

pub fn run_with_mutation_context_sync<R>(context: MutationContext, f: impl FnOnce() -> R) -> R {
    mutation_store().run_sync(context, f)
}

pub fn run_with_query_context_sync<R>(context: QueryContext, f: impl FnOnce() -> R) -> R {
    query_store().run_sync(context, f)
}

pub fn run_with_auth_scope_sync<R>(auth: Option<AuthData>, f: impl FnOnce() -> R) -> R {
    auth_scope_store().run_sync(AuthScope { auth }, f)
}

/// Returns the active mutation context; calling this outside a mutation
/// handler is a programming error.
pub fn mutation_context() -> Result<MutationContext, GateError> {
    mutation_store().require()
}

pub fn query_context() -> Result<QueryContext, GateError> {
    query_store().require()
}
