use std::sync::Arc;
use std::time::Duration;

use race_core::config::StoreConfig;
use race_core::store::StateStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Counter {
    value: u32,
}

fn store(lock_wait_ms: u64) -> StateStore {
    StateStore::in_memory(StoreConfig {
        lock_wait_ms,
        lock_poll_ms: 2,
        ..StoreConfig::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_never_lose_increments() {
    const WRITERS: u32 = 50;
    let store = Arc::new(store(30_000));
    let ttl = Duration::from_secs(60);
    store.set("counter", &Counter::default(), ttl).await.expect("seed");

    let mut tasks = Vec::new();
    for _ in 0..WRITERS {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .update_atomic("counter", ttl, |c: &mut Counter| {
                    c.value += 1;
                    c.value
                })
                .await
        }));
    }
    let mut seen = Vec::new();
    for task in tasks {
        let (_, observed) = task.await.expect("join").expect("update").expect("value present");
        seen.push(observed);
    }

    let counter: Counter = store.get("counter").await.expect("read").expect("value");
    assert_eq!(counter.value, WRITERS);
    seen.sort_unstable();
    assert_eq!(seen, (1..=WRITERS).collect::<Vec<_>>());
}

#[tokio::test]
async fn updating_a_missing_key_is_a_no_op() {
    let store = store(1_000);
    let result = store
        .update_atomic("bot_state:404", Duration::from_secs(60), |c: &mut Counter| {
            c.value += 1;
        })
        .await
        .expect("no contention");
    assert!(result.is_none());
    assert!(store.get::<Counter>("bot_state:404").await.expect("read").is_none());
}
