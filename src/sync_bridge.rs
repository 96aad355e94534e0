use crate::Gate;
use crate::check::Target;
use crate::context::{
    MutationContext, QueryContext, run_with_mutation_context_sync, run_with_query_context_sync,
};
use crate::error::GateError;
use crate::permission::AuthData;
use crate::query::executor::{QueryExecutor, QueryResult};
use crate::query::plan::{Expr, Query};
use crate::status::{PermissionAuthority, PermissionWatch};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Runs `f` to completion on `rt` from synchronous code.
///
/// Inside a runtime the call goes through `block_in_place`, which only a
/// multi-thread runtime supports; from a current-thread runtime this returns
/// [`GateError::UnsupportedRuntime`] instead of blocking.
pub fn block_on_gate<F, T>(rt: &Handle, f: F) -> Result<T, GateError>
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(current) => match current.runtime_flavor() {
            RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(|| rt.block_on(f))),
            flavor => Err(GateError::UnsupportedRuntime {
                flavor: format!("{flavor:?}"),
            }),
        },
        Err(_) => Ok(rt.block_on(f)),
    }
}

/// Blocking facade over [`Gate`] for callers without an async runtime.
///
/// Blocking methods may also be called from a multi-thread runtime worker;
/// from a current-thread runtime they fail with
/// [`GateError::UnsupportedRuntime`].
///
/// Context stores are entered on the calling thread, so identity set through
/// `run_mutation_sync` / `run_query_sync` is visible to everything the
/// closure does synchronously.
pub struct GateSync {
    inner: Arc<Gate>,
    rt: Handle,
}

impl GateSync {
    pub fn new(inner: Arc<Gate>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn gate(&self) -> &Gate {
        &self.inner
    }

    pub fn can(&self, table: &str, target: Option<&Target>) -> Result<Expr, GateError> {
        self.inner.can(table, target)
    }

    pub fn run_mutation_sync<R>(&self, auth: Option<AuthData>, f: impl FnOnce() -> R) -> R {
        let context = MutationContext::new(auth, self.inner.config().environment);
        run_with_mutation_context_sync(context, f)
    }

    pub fn run_query_sync<R>(&self, auth: Option<AuthData>, f: impl FnOnce() -> R) -> R {
        run_with_query_context_sync(QueryContext::new(auth), f)
    }

    pub fn execute(
        &self,
        executor: &dyn QueryExecutor,
        query: &Query,
    ) -> Result<QueryResult, GateError> {
        Ok(block_on_gate(&self.rt, executor.execute(query))??)
    }

    pub fn check_permission(
        &self,
        authority: &dyn PermissionAuthority,
        table: &str,
        target: Option<&Target>,
        auth: Option<&AuthData>,
    ) -> Result<bool, GateError> {
        block_on_gate(&self.rt, authority.check_permission(table, target, auth))?
    }

    /// Drives `watch` to its authoritative answer. The caller identity is
    /// read on the calling thread before the runtime takes over.
    pub fn resolve_permission(
        &self,
        watch: &PermissionWatch,
        target: Option<Target>,
        local: &dyn QueryExecutor,
        authority: &dyn PermissionAuthority,
    ) -> Result<bool, GateError> {
        let auth = crate::context::resolve_identity();
        block_on_gate(
            &self.rt,
            watch.resolve_for(auth, target, local, authority),
        )?
    }
}

#[cfg(test)]
mod tests {
    use super::GateSync;
    use crate::Gate;
    use crate::catalog::schema::{ColumnDef, TableSchema};
    use crate::catalog::types::{ColumnType, Row, Value};
    use crate::check::{Strategy, Target};
    use crate::config::GateConfig;
    use crate::error::GateErrorCode;
    use crate::permission::AuthData;
    use crate::predicate::server_where;
    use crate::query::executor::MemoryExecutor;
    use crate::status::PermissionState;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn schema() -> TableSchema {
        TableSchema::new(
            "doc",
            vec![
                ColumnDef::new("id", ColumnType::Text),
                ColumnDef::new("owner", ColumnType::Text),
            ],
            &["id"],
        )
        .expect("schema")
    }

    fn executor() -> Arc<MemoryExecutor> {
        let exec = Arc::new(MemoryExecutor::default());
        exec.create_table(schema());
        exec.insert(
            "doc",
            Row::from_values(vec![Value::from("d1"), Value::from("alice")]),
        )
        .expect("insert");
        exec
    }

    #[test]
    fn resolves_permission_without_ambient_runtime() {
        let rt = Runtime::new().expect("runtime");
        let client = Arc::new(
            Gate::new(GateConfig::client().with_strategy(Strategy::OptimisticDeny))
                .expect("client gate"),
        );
        client
            .register_rule(
                schema(),
                server_where("doc", |eb, auth| Ok(eb.owned_by("owner", auth).into())),
            )
            .expect("register");
        let server = Gate::with_registry(GateConfig::server(), Arc::clone(client.registry()))
            .expect("server gate");

        let exec = executor();
        let authority = server.local_authority(exec.clone());
        let sync = GateSync::new(Arc::clone(&client), rt.handle().clone());
        let watch = client.watch("doc");

        let allowed = sync.run_query_sync(Some(AuthData::new("alice")), || {
            sync.resolve_permission(&watch, Some(Target::id("d1")), exec.as_ref(), &authority)
        });
        assert!(allowed.expect("resolve"));
        assert_eq!(watch.state(), PermissionState::Authoritative(true));

        let denied = sync
            .check_permission(&authority, "doc", Some(&Target::id("d1")), Some(&AuthData::new("bob")))
            .expect("check");
        assert!(!denied);
    }

    #[tokio::test]
    async fn current_thread_runtime_is_rejected() {
        let gate = Gate::new(GateConfig::server()).expect("server gate");
        gate.register_rule(
            schema(),
            server_where("doc", |eb, auth| Ok(eb.owned_by("owner", auth).into())),
        )
        .expect("register");
        let gate = Arc::new(gate);
        let authority = gate.local_authority(executor());
        let sync = GateSync::new(Arc::clone(&gate), tokio::runtime::Handle::current());

        let err = sync
            .check_permission(&authority, "doc", Some(&Target::id("d1")), Some(&AuthData::new("alice")))
            .expect_err("current-thread runtime");
        assert_eq!(err.code(), GateErrorCode::UnsupportedRuntime);
        assert_eq!(err.code_str(), "unsupported_runtime");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_worker_can_block() {
        let gate = Gate::new(GateConfig::server()).expect("server gate");
        gate.register_rule(
            schema(),
            server_where("doc", |eb, auth| Ok(eb.owned_by("owner", auth).into())),
        )
        .expect("register");
        let gate = Arc::new(gate);
        let authority = gate.local_authority(executor());
        let sync = GateSync::new(Arc::clone(&gate), tokio::runtime::Handle::current());

        let allowed = sync
            .check_permission(&authority, "doc", Some(&Target::id("d1")), Some(&AuthData::new("alice")))
            .expect("check");
        assert!(allowed);
    }
}
