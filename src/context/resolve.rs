use crate::context::{
    IdentityCarrier, auth_scope_store, mutation_store, query_store, run_with_auth_scope,
};
use crate::permission::AuthData;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::future::Future;
use tokio::task::JoinHandle;

/// Identity of the top-level caller that is not inside any request scope,
/// e.g. the user of a client render pass.
static OBSERVED_IDENTITY: Lazy<RwLock<Option<AuthData>>> = Lazy::new(|| RwLock::new(None));

pub fn set_observed_identity(auth: Option<AuthData>) {
    *OBSERVED_IDENTITY.write() = auth;
}

pub fn observed_identity() -> Option<AuthData> {
    OBSERVED_IDENTITY.read().clone()
}

/// Current caller identity.
///
/// Order: active mutation context, active query context, then the
/// process-wide observed identity.
pub fn resolve_identity() -> Option<AuthData> {
    if let Some(auth) = mutation_store().with(|ctx| ctx.auth().cloned()) {
        return auth;
    }
    if let Some(auth) = query_store().with(|ctx| ctx.auth().cloned()) {
        return auth;
    }
    observed_identity()
}

/// Identity as seen by detached work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedIdentity {
    /// Identity was propagated; `None` means nobody is logged in.
    Known(Option<AuthData>),
    /// No mutation context or auth scope reached this task.
    Unknown,
}

impl ScopedIdentity {
    pub fn is_known(&self) -> bool {
        matches!(self, ScopedIdentity::Known(_))
    }

    pub fn into_known(self) -> Option<Option<AuthData>> {
        match self {
            ScopedIdentity::Known(auth) => Some(auth),
            ScopedIdentity::Unknown => None,
        }
    }
}

/// Identity for background work: mutation context first, then an explicit
/// auth-only scope. Never falls back to the observed identity.
pub fn resolve_scoped_identity() -> ScopedIdentity {
    if let Some(auth) = mutation_store().with(|ctx| ctx.auth().cloned()) {
        return ScopedIdentity::Known(auth);
    }
    if let Some(auth) = auth_scope_store().with(|scope| scope.auth().cloned()) {
        return ScopedIdentity::Known(auth);
    }
    ScopedIdentity::Unknown
}

/// Spawns follow-up work that keeps the caller's identity.
///
/// The identity is captured before the task detaches; inside the task it is
/// visible through [`resolve_scoped_identity`]. An `Unknown` capture stays
/// unknown in the task.
pub fn spawn_detached<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match resolve_scoped_identity() {
        ScopedIdentity::Known(auth) => {
            tracing::debug!(
                caller = auth.as_ref().map(|a| a.id.as_str()),
                "spawning detached task with captured identity"
            );
            tokio::spawn(run_with_auth_scope(auth, future))
        }
        ScopedIdentity::Unknown => {
            tracing::warn!("spawning detached task without a propagated identity");
            tokio::spawn(future)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScopedIdentity, resolve_identity, resolve_scoped_identity, spawn_detached};
    use crate::config::Environment;
    use crate::context::{
        MutationContext, QueryContext, run_with_auth_scope, run_with_mutation_context,
        run_with_query_context, run_with_query_context_sync,
    };
    use crate::permission::AuthData;

    #[test]
    fn mutation_context_wins_over_query_context() {
        let query = QueryContext::new(Some(AuthData::new("reader")));
        let mutation = MutationContext::new(Some(AuthData::new("writer")), Environment::Client);
        let seen = run_with_query_context_sync(query, || {
            crate::context::run_with_mutation_context_sync(mutation, resolve_identity)
        });
        assert_eq!(seen.map(|a| a.id), Some("writer".to_string()));
    }

    #[test]
    fn anonymous_mutation_context_is_authoritative() {
        let query = QueryContext::new(Some(AuthData::new("reader")));
        let mutation = MutationContext::new(None, Environment::Client);
        let seen = run_with_query_context_sync(query, || {
            crate::context::run_with_mutation_context_sync(mutation, resolve_identity)
        });
        assert_eq!(seen, None);
    }

    #[test]
    fn scoped_identity_ignores_query_context() {
        let query = QueryContext::new(Some(AuthData::new("reader")));
        let seen = run_with_query_context_sync(query, resolve_scoped_identity);
        assert_eq!(seen, ScopedIdentity::Unknown);
        assert!(!seen.is_known());
    }

    #[tokio::test]
    async fn auth_scope_distinguishes_anonymous_from_unknown() {
        let seen = run_with_auth_scope(None, async { resolve_scoped_identity() }).await;
        assert_eq!(seen, ScopedIdentity::Known(None));
        assert_eq!(seen.into_known(), Some(None));
        assert_eq!(resolve_scoped_identity().into_known(), None);
    }

    #[tokio::test]
    async fn detached_task_keeps_mutation_identity() {
        let mutation = MutationContext::new(Some(AuthData::new("u1")), Environment::Authoritative);
        let handle = run_with_mutation_context(mutation, async {
            spawn_detached(async {
                tokio::task::yield_now().await;
                resolve_scoped_identity()
            })
        })
        .await;
        let seen = handle.await.expect("join");
        assert_eq!(seen, ScopedIdentity::Known(Some(AuthData::new("u1"))));
    }

    #[tokio::test]
    async fn detached_task_without_identity_stays_unknown() {
        let handle = run_with_query_context(QueryContext::new(Some(AuthData::new("r"))), async {
            spawn_detached(async { resolve_scoped_identity() })
        })
        .await;
        assert_eq!(handle.await.expect("join"), ScopedIdentity::Unknown);
    }
}
