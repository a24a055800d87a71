use divan::{black_box, AllocProfiler, Bencher};
use ivm::{ChangeSet, Direction, Entity, FilterValue, Ivm, IvmConfig, MemoryExecutor, MemoryStore, Query};
use serde_json::json;
use tokio::runtime::Runtime;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

/// `users` users with `posts_per_user` posts each; every other post published.
fn seeded(users: usize, posts_per_user: usize) -> Ivm<MemoryStore, MemoryExecutor> {
    let engine = Ivm::in_memory(IvmConfig {
        track_changes: true,
        ..IvmConfig::default()
    });
    engine.store().seed(
        "users",
        (0..users).map(|u| Entity::from(json!({ "id": format!("u{u}"), "score": u }))),
    );
    engine.store().seed(
        "posts",
        (0..users * posts_per_user).map(|p| {
            Entity::from(json!({
                "id": format!("p{p}"),
                "userId": format!("u{}", p / posts_per_user),
                "published": p % 2 == 0,
            }))
        }),
    );
    engine
}

fn users_with_published_posts() -> Query {
    Query::new("users").exists(
        Query::new("posts")
            .where_eq("userId", FilterValue::parent(1, "id"))
            .where_eq("published", true),
    )
}

#[divan::bench(args = [100, 1000])]
fn initial_fetch(bencher: Bencher, users: usize) {
    let rt = runtime();
    bencher
        .with_inputs(|| {
            let engine = seeded(users, 4);
            let sub = engine.subscribe(users_with_published_posts(), |_| {}, |_| {}).unwrap();
            (engine, sub)
        })
        .bench_values(|(engine, sub)| {
            rt.block_on(engine.update_views()).unwrap();
            black_box(sub);
        });
}

#[divan::bench(args = [100, 1000])]
fn fast_path_inserts(bencher: Bencher, users: usize) {
    let rt = runtime();
    bencher
        .with_inputs(|| {
            let engine = seeded(users, 0);
            engine
                .subscribe(Query::new("users").order_by("score", Direction::Desc), |_| {}, |_| {})
                .unwrap();
            rt.block_on(engine.update_views()).unwrap();
            let batch = (0..10).fold(ChangeSet::new(), |changes, i| {
                changes.insert("users", json!({ "id": format!("n{i}"), "score": i }))
            });
            (engine, batch)
        })
        .bench_values(|(engine, batch)| {
            rt.block_on(async {
                engine.buffer_changes(batch).await.unwrap();
                engine.update_views().await.unwrap();
            });
            black_box(engine);
        });
}

#[divan::bench(args = [100, 1000])]
fn exists_eviction(bencher: Bencher, users: usize) {
    let rt = runtime();
    bencher
        .with_inputs(|| {
            let engine = seeded(users, 4);
            engine.subscribe(users_with_published_posts(), |_| {}, |_| {}).unwrap();
            rt.block_on(engine.update_views()).unwrap();
            engine
        })
        .bench_values(|engine| {
            rt.block_on(async {
                let batch = ChangeSet::new().delete("posts", "p0").delete("posts", "p2");
                engine.buffer_changes(batch).await.unwrap();
                engine.update_views().await.unwrap();
                engine.flush_changes_to_listeners().await;
            });
            black_box(engine);
        });
}
