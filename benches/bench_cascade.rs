use std::time::Duration;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rusqlite::params;
use sqlitecascade::{
    CascadeEngine, CascadeOptions, DeletionMethod, EntityType, Relation, RootSelection,
    SchemaRegistry, SqliteStore,
};

const SEED: u64 = 0xCA5C;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn bench_scales() -> &'static [usize] {
    #[cfg(feature = "bench-ci")]
    {
        &[100, 500]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[1_000, 5_000]
    }
}

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    for (name, table) in [
        ("Project", "projects"),
        ("Task", "tasks"),
        ("Attachment", "attachments"),
    ] {
        registry
            .register_entity(EntityType::new(name, table))
            .expect("entity");
    }
    registry
        .register_relation(Relation::belongs_to("Task", "project", "Project", "project_id"))
        .expect("relation");
    registry
        .register_relation(Relation::belongs_to("Attachment", "task", "Task", "task_id"))
        .expect("relation");
    registry
}

/// `projects` rows, each with a random handful of tasks and attachments.
fn populated_store(projects: usize, seed: u64) -> SqliteStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = SqliteStore::open_in_memory().expect("store");
    let conn = store.connection();
    conn.execute_batch(
        "CREATE TABLE projects (id INTEGER PRIMARY KEY, active INTEGER NOT NULL, updated_at TEXT);
         CREATE TABLE tasks (id INTEGER PRIMARY KEY, project_id INTEGER NOT NULL, active INTEGER NOT NULL DEFAULT 1, updated_at TEXT);
         CREATE TABLE attachments (id INTEGER PRIMARY KEY, task_id INTEGER NOT NULL, active INTEGER NOT NULL DEFAULT 1, updated_at TEXT);
         CREATE INDEX idx_tasks_project ON tasks(project_id);
         CREATE INDEX idx_attachments_task ON attachments(task_id);
         BEGIN;",
    )
    .expect("schema");
    let mut task_id = 0_i64;
    for project in 0..projects as i64 {
        let active = i64::from(rng.gen_bool(0.5));
        conn.execute(
            "INSERT INTO projects(id, active) VALUES (?1, ?2)",
            params![project, active],
        )
        .expect("project");
        for _ in 0..rng.gen_range(1..6) {
            task_id += 1;
            conn.execute(
                "INSERT INTO tasks(id, project_id) VALUES (?1, ?2)",
                params![task_id, project],
            )
            .expect("task");
            for _ in 0..rng.gen_range(0..4) {
                conn.execute("INSERT INTO attachments(task_id) VALUES (?1)", params![task_id])
                    .expect("attachment");
            }
        }
    }
    conn.execute_batch("COMMIT").expect("commit");
    store
}

fn bench_cascade(c: &mut Criterion) {
    let registry = registry();
    let engine = CascadeEngine::new(&registry);
    let root = RootSelection::new("Project").filter("active = 0");
    let mut group = c.benchmark_group("cascade");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &projects in bench_scales() {
        for method in [DeletionMethod::Hard, DeletionMethod::Soft] {
            let options = CascadeOptions::new().with_method(method);
            group.bench_function(
                BenchmarkId::new(method.as_str(), projects),
                |b| {
                    b.iter_batched(
                        || populated_store(projects, SEED + projects as u64),
                        |store| engine.run(&store, &root, &options).expect("cascade"),
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let registry = registry();
    let engine = CascadeEngine::new(&registry);
    let root = RootSelection::new("Project");
    let options = CascadeOptions::new();
    c.bench_function("plan", |b| {
        b.iter(|| engine.plan(&root, &options).expect("plan"));
    });
}

criterion_group!(
    name = cascade_benches;
    config = Criterion::default();
    targets = bench_cascade, bench_plan
);
criterion_main!(cascade_benches);
