//! Lifecycle of one permission check as seen by a consumer.
//!
//! A check starts `Unknown`, moves to the client's optimistic guess, and ends
//! at the authoritative answer. Once authoritative, the value never goes back
//! for that target; asking about a new target starts over.

use crate::catalog::RuleRegistry;
use crate::check::{PermissionCheck, Target};
use crate::config::Environment;
use crate::context::{QueryContext, resolve_identity, run_with_query_context};
use crate::error::GateError;
use crate::permission::AuthData;
use crate::query::builder::WhereBuilder;
use crate::query::executor::QueryExecutor;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unknown,
    Optimistic(bool),
    Authoritative(bool),
}

impl PermissionState {
    pub fn allowed(self) -> Option<bool> {
        match self {
            PermissionState::Unknown => None,
            PermissionState::Optimistic(allowed) | PermissionState::Authoritative(allowed) => {
                Some(allowed)
            }
        }
    }

    pub fn is_authoritative(self) -> bool {
        matches!(self, PermissionState::Authoritative(_))
    }

    /// Next state after `update` arrives. Authoritative is terminal, and
    /// nothing moves a known state back to `Unknown`.
    pub fn apply(self, update: PermissionState) -> PermissionState {
        match (self, update) {
            (PermissionState::Authoritative(_), _) => self,
            (_, PermissionState::Unknown) => self,
            (_, next) => next,
        }
    }
}

pub type AuthorityFut<'a> = Pin<Box<dyn Future<Output = Result<bool, GateError>> + Send + 'a>>;

/// The trusted side that answers permission checks.
pub trait PermissionAuthority: Send + Sync {
    fn check_permission<'a>(
        &'a self,
        table: &'a str,
        target: Option<&'a Target>,
        auth: Option<&'a AuthData>,
    ) -> AuthorityFut<'a>;
}

/// Authoritative evaluation against a local executor.
///
/// Each check runs inside a query context carrying the caller's identity, the
/// same way a server request handler would.
pub struct LocalAuthority {
    registry: Arc<RuleRegistry>,
    executor: Arc<dyn QueryExecutor>,
    max_condition_depth: usize,
}

impl LocalAuthority {
    pub fn new(registry: Arc<RuleRegistry>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            registry,
            executor,
            max_condition_depth: crate::query::plan::DEFAULT_MAX_EXPR_DEPTH,
        }
    }

    pub fn with_max_condition_depth(mut self, max_condition_depth: usize) -> Self {
        self.max_condition_depth = max_condition_depth;
        self
    }
}

impl PermissionAuthority for LocalAuthority {
    fn check_permission<'a>(
        &'a self,
        table: &'a str,
        target: Option<&'a Target>,
        auth: Option<&'a AuthData>,
    ) -> AuthorityFut<'a> {
        let context = QueryContext::new(auth.cloned());
        Box::pin(run_with_query_context(context, async move {
            let check = crate::check::build_permission_check(
                &self.registry,
                table,
                crate::check::Strategy::default(),
            );
            let eb = WhereBuilder::new(table, Environment::Authoritative)
                .with_max_depth(self.max_condition_depth);
            let query = check.query(&eb, target)?;
            let allowed = self.executor.exists(&query).await?;
            Ok::<bool, GateError>(allowed)
        }))
    }
}

/// Publishes the state of one table's permission check over a watch channel.
pub struct PermissionWatch {
    check: PermissionCheck,
    max_condition_depth: usize,
    tx: watch::Sender<PermissionState>,
    generation: AtomicU64,
}

impl PermissionWatch {
    pub fn new(check: PermissionCheck) -> Self {
        let (tx, _rx) = watch::channel(PermissionState::Unknown);
        Self {
            check,
            max_condition_depth: crate::query::plan::DEFAULT_MAX_EXPR_DEPTH,
            tx,
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_max_condition_depth(mut self, max_condition_depth: usize) -> Self {
        self.max_condition_depth = max_condition_depth;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> PermissionState {
        *self.tx.borrow()
    }

    /// Starts over for a new target. The generation moves under the channel
    /// lock, so no update can land between the bump and the reset.
    fn retarget(&self) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *state = PermissionState::Unknown;
        });
        generation
    }

    fn publish(&self, generation: u64, update: PermissionState) {
        self.tx.send_if_modified(|state| {
            if self.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!(table = self.check.table(), "dropping stale permission update");
                return false;
            }
            let next = state.apply(update);
            let changed = next != *state;
            *state = next;
            changed
        });
    }

    /// Drives one check to its authoritative answer.
    ///
    /// The optimistic guess comes from `local` using this check's strategy
    /// and the caller from [`resolve_identity`]; the final answer comes from
    /// `authority` and supersedes the guess.
    pub async fn resolve(
        &self,
        target: Option<Target>,
        local: &dyn QueryExecutor,
        authority: &dyn PermissionAuthority,
    ) -> Result<bool, GateError> {
        self.resolve_for(resolve_identity(), target, local, authority)
            .await
    }

    /// Like [`PermissionWatch::resolve`], for an explicit identity.
    pub async fn resolve_for(
        &self,
        auth: Option<AuthData>,
        target: Option<Target>,
        local: &dyn QueryExecutor,
        authority: &dyn PermissionAuthority,
    ) -> Result<bool, GateError> {
        let generation = self.retarget();
        let eb = WhereBuilder::new(self.check.table(), Environment::Client)
            .with_max_depth(self.max_condition_depth);

        let query = self.check.query_for(&eb, auth.as_ref(), target.as_ref())?;
        let guess = local.exists(&query).await?;
        tracing::debug!(
            table = self.check.table(),
            strategy = %self.check.strategy(),
            guess,
            "optimistic permission guess"
        );
        self.publish(generation, PermissionState::Optimistic(guess));

        let allowed = authority
            .check_permission(self.check.table(), target.as_ref(), auth.as_ref())
            .await?;
        if allowed != guess {
            tracing::info!(
                table = self.check.table(),
                guess,
                allowed,
                "authoritative answer overrides optimistic guess"
            );
        }
        self.publish(generation, PermissionState::Authoritative(allowed));
        Ok(allowed)
    }
}
