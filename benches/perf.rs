use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rowgate::Gate;
use rowgate::catalog::schema::{ColumnDef, TableSchema};
use rowgate::catalog::types::{ColumnType, Row, Value};
use rowgate::check::{Strategy, Target};
use rowgate::config::GateConfig;
use rowgate::permission::AuthData;
use rowgate::predicate::server_where;
use rowgate::query::executor::{MemoryExecutor, QueryExecutor};
use rowgate::query::plan::CmpOp;
use std::sync::Arc;
use tokio::runtime::Runtime;

const TABLE_NAME: &str = "issue";
const SEEDED_ROWS: i64 = 10_000;

fn schema() -> TableSchema {
    TableSchema::new(
        TABLE_NAME,
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("creator", ColumnType::Text),
            ColumnDef::new("state", ColumnType::Text),
        ],
        &["id"],
    )
    .expect("schema")
}

fn setup_gate(config: GateConfig) -> Gate {
    let gate = Gate::new(config).expect("gate");
    gate.register_rule(
        schema(),
        server_where(TABLE_NAME, |eb, auth| {
            Ok(eb
                .or([
                    eb.and([eb.owned_by("creator", auth), eb.cmp("state", "open")]),
                    eb.cmp_lit(auth.map_or(false, |a| a.has_role("admin")), CmpOp::Eq, true),
                ])
                .into())
        }),
    )
    .expect("register");
    gate
}

fn setup_executor(seed_rows: i64) -> Arc<MemoryExecutor> {
    let exec = Arc::new(MemoryExecutor::default());
    exec.create_table(schema());
    for id in 1..=seed_rows {
        exec.insert(
            TABLE_NAME,
            Row::from_values(vec![
                Value::Integer(id),
                Value::Text(format!("user-{}", id % 100).into()),
                Value::from(if id % 3 == 0 { "closed" } else { "open" }),
            ]),
        )
        .expect("seed row");
    }
    exec
}

fn bench_rule_evaluation(c: &mut Criterion) {
    let client = setup_gate(GateConfig::client());
    let server = setup_gate(GateConfig::server());
    let rule = client.registry().require(TABLE_NAME).expect("rule");
    let auth = AuthData::new("user-7");

    c.bench_function("server_only_rule_client_short_circuit", |b| {
        let eb = client.builder(TABLE_NAME);
        b.iter(|| black_box(rule.predicate.eval(&eb, Some(&auth)).expect("eval")));
    });

    c.bench_function("server_only_rule_authoritative_eval", |b| {
        let eb = server.builder(TABLE_NAME);
        b.iter(|| black_box(rule.predicate.eval(&eb, Some(&auth)).expect("eval")));
    });

    for strategy in [
        Strategy::Optimistic,
        Strategy::OptimisticDeny,
        Strategy::OptimisticAllow,
    ] {
        let check = client.permission_check_with(TABLE_NAME, strategy);
        let eb = client.builder(TABLE_NAME);
        let target = Target::id(42_i64);
        c.bench_function(&format!("permission_condition_{strategy}"), |b| {
            b.iter(|| {
                black_box(
                    check
                        .condition_for(&eb, Some(&auth), Some(&target))
                        .expect("condition"),
                )
            });
        });
    }
}

fn bench_permission_queries(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let client = setup_gate(GateConfig::client());
    let server = setup_gate(GateConfig::server());
    let exec = setup_executor(SEEDED_ROWS);
    let authority = server.local_authority(exec.clone());
    let auth = AuthData::new("user-7");
    let target = Target::id(SEEDED_ROWS / 2);

    c.bench_function("optimistic_permission_query_exists", |b| {
        let check = client.permission_check(TABLE_NAME);
        let eb = client.builder(TABLE_NAME);
        b.iter(|| {
            rt.block_on(async {
                let query = check
                    .query_for(&eb, Some(&auth), Some(&target))
                    .expect("query");
                black_box(exec.exists(&query).await.expect("exists"))
            })
        });
    });

    c.bench_function("authoritative_check_permission", |b| {
        use rowgate::status::PermissionAuthority;
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    authority
                        .check_permission(TABLE_NAME, Some(&target), Some(&auth))
                        .await
                        .expect("check"),
                )
            })
        });
    });
}

criterion_group!(benches, bench_rule_evaluation, bench_permission_queries);
criterion_main!(benches);
