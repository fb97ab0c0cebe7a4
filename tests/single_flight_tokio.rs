#![cfg(all(test, feature = "future"))]

use flightcache::{
    future::{Cache, LoadingCache},
    notification::{InvalidationBus, NodeId},
    InvalidationSignal,
};

use async_lock::Barrier;
use futures_util::FutureExt;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

const NUM_TASKS: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
struct LocalizationOptions {
    default_culture: String,
    supported: Vec<String>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_get_with_and_try_get_with() {
    let cache: Cache<String, Arc<String>> = Cache::new();
    let call_counter = Arc::new(AtomicUsize::default());
    let barrier = Arc::new(Barrier::new(NUM_TASKS));

    let tasks: Vec<_> = (0..NUM_TASKS)
        .map(|task_id| {
            let my_cache = cache.clone();
            let my_call_counter = Arc::clone(&call_counter);
            let my_barrier = Arc::clone(&barrier);

            tokio::spawn(async move {
                my_barrier.wait().await;

                let key = "key1".to_string();
                let init = async move {
                    my_call_counter.fetch_add(1, Ordering::AcqRel);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    Arc::new(format!("computed by task {task_id}"))
                };
                if task_id % 2 == 0 {
                    my_cache.get_with(key, init).await
                } else {
                    // A different error type makes a separate flight.
                    my_cache
                        .try_get_with(key, init.map(Ok::<_, std::io::Error>))
                        .await
                        .unwrap()
                }
            })
        })
        .collect();

    let values: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // `get_with` and `try_get_with` are coalesced separately, but whichever
    // finishes first publishes, and the other leader then reads that value.
    let calls = call_counter.load(Ordering::Acquire);
    assert!((1..=2).contains(&calls));
    assert_eq!(cache.entry_count(), 1);
    let published = cache.get(&"key1".to_string()).unwrap();
    let matching = values.iter().filter(|v| Arc::ptr_eq(v, &published)).count();
    assert!(matching >= NUM_TASKS / 2);
}

#[tokio::test]
async fn waiters_receive_the_same_error() {
    let cache: Cache<u32, u32> = Cache::new();
    let barrier = Arc::new(Barrier::new(NUM_TASKS));
    let calls = Arc::new(AtomicUsize::default());

    let tasks: Vec<_> = (0..NUM_TASKS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = Arc::clone(&barrier);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .try_get_with(1, async move {
                        calls.fetch_add(1, Ordering::AcqRel);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Err(anyhow::anyhow!("upstream timed out"))
                    })
                    .await
            })
        })
        .collect();

    let errors: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap_err())
        .collect();

    // On a single threaded runtime every task reaches the cache before the
    // leader's future resolves.
    assert_eq!(calls.load(Ordering::Acquire), 1);
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
    assert_eq!(errors[0].to_string(), "upstream timed out");
    assert!(!cache.contains_key(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn options_are_computed_once_and_recomputed_after_remote_invalidation() {
    let calls = Arc::new(AtomicUsize::default());
    let loader_calls = Arc::clone(&calls);
    let options: LoadingCache<&'static str, Arc<LocalizationOptions>, anyhow::Error> =
        Cache::builder()
            .name("options")
            .build_loading(move |_key: Arc<&'static str>| {
                let calls = Arc::clone(&loader_calls);
                async move {
                    calls.fetch_add(1, Ordering::AcqRel);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok(Arc::new(LocalizationOptions {
                        default_culture: "en".into(),
                        supported: vec!["en".into(), "fr".into()],
                    }))
                }
                .boxed()
            });

    let barrier = Arc::new(Barrier::new(2));
    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let options = options.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                options.get_or_compute("options").await.unwrap()
            })
        })
        .collect();
    let values: Vec<_> = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert!(Arc::ptr_eq(&values[0], &values[1]));
    assert_eq!(values[0].supported, vec!["en", "fr"]);
    assert_eq!(calls.load(Ordering::Acquire), 1);

    // Another node reports a change of the underlying settings.
    let bus = InvalidationBus::new();
    let here = bus.subscribe(NodeId::new());
    bus.publish(NodeId::new(), InvalidationSignal::All);
    assert_eq!(here.apply_pending(&options), Ok(1));

    let recomputed = options.get_or_compute("options").await.unwrap();
    assert_eq!(calls.load(Ordering::Acquire), 2);
    // Same data, fresh computation.
    assert_eq!(*recomputed, *values[0]);
    assert!(!Arc::ptr_eq(&recomputed, &values[0]));
}

#[tokio::test]
async fn invalidation_racing_a_computation_is_not_lost() {
    let cache: Cache<&str, u32> = Cache::builder().enable_stats().build();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();

    let leader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_with("k", async move {
                    started_tx.send(()).unwrap();
                    resume_rx.await.unwrap();
                    1
                })
                .await
        })
    };

    started_rx.await.unwrap();
    cache.invalidate(&"k");
    resume_tx.send(()).unwrap();
    assert_eq!(leader.await.unwrap(), 1);

    let calls = AtomicUsize::new(0);
    let value = cache
        .get_with("k", async {
            calls.fetch_add(1, Ordering::AcqRel);
            2
        })
        .await;
    assert_eq!(value, 2);
    assert_eq!(calls.load(Ordering::Acquire), 1);
    assert_eq!(cache.stats().stale_load_count(), 1);
}

#[tokio::test]
async fn dropping_the_leader_releases_the_key() {
    let cache: Cache<&str, u32> = Cache::new();

    // The leader's future is dropped by the timeout while its init future is
    // still pending.
    let timed_out = tokio::time::timeout(
        std::time::Duration::from_millis(20),
        cache.get_with("k", std::future::pending()),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!cache.contains_key(&"k"));

    assert_eq!(cache.get_with("k", async { 7 }).await, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn calls_after_an_invalidation_do_not_wait_for_an_older_computation() {
    let cache: Cache<&str, u32> = Cache::builder().enable_stats().build();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();

    let leader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_with("k", async move {
                    started_tx.send(()).unwrap();
                    resume_rx.await.unwrap();
                    1
                })
                .await
        })
    };

    started_rx.await.unwrap();
    cache.invalidate(&"k");

    // The older computation is still blocked, so joining it would time out.
    let calls = AtomicUsize::new(0);
    let fresh = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        cache.get_with("k", async {
            calls.fetch_add(1, Ordering::AcqRel);
            2
        }),
    )
    .await
    .expect("waited for a computation started before the invalidation");
    assert_eq!(fresh, 2);
    assert_eq!(calls.load(Ordering::Acquire), 1);

    resume_tx.send(()).unwrap();
    assert_eq!(leader.await.unwrap(), 1);
    assert_eq!(cache.get(&"k"), Some(2));
    assert_eq!(cache.stats().stale_load_count(), 1);
}

#[tokio::test]
async fn invalidating_another_key_keeps_a_computation() {
    // One segment, so both keys share it.
    let cache: Cache<&str, u32> = Cache::builder().num_segments(1).enable_stats().build();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();

    let leader = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_with("a", async move {
                    started_tx.send(()).unwrap();
                    resume_rx.await.unwrap();
                    1
                })
                .await
        })
    };

    started_rx.await.unwrap();
    cache.invalidate(&"b");
    resume_tx.send(()).unwrap();

    assert_eq!(leader.await.unwrap(), 1);
    assert_eq!(cache.get(&"a"), Some(1));
    assert_eq!(cache.stats().stale_load_count(), 0);
}
