#![cfg(all(test, feature = "future"))]

use flightcache::{
    deferred::PendingInvalidations,
    future::Cache,
    localization::{
        LanguageInfo, LanguageSource, RequestLocalizationOptionsProvider, SourceError,
    },
    notification::{InvalidationBus, NodeId, RemovalCause},
    InvalidationSignal,
};

use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

#[tokio::test]
async fn run_async_applies_remote_signals_until_the_bus_is_dropped() {
    init_logger();

    let removed = Arc::new(Mutex::new(Vec::new()));
    let removed1 = Arc::clone(&removed);
    let cache: Cache<String, u32> = Cache::builder()
        .name("remote")
        .invalidation_listener(move |k, v, cause| removed1.lock().push((k, v, cause)))
        .build();
    cache.get_with("a".to_string(), async { 1 }).await;
    cache.get_with("b".to_string(), async { 2 }).await;

    let bus = InvalidationBus::new();
    let local = NodeId::new();
    let subscriber = bus.subscribe(local);
    let runner = {
        let cache = cache.clone();
        tokio::spawn(async move { subscriber.run_async(&cache).await })
    };

    // Our own signals are not applied twice.
    bus.publish(local, InvalidationSignal::Key("b".to_string()));
    bus.publish(NodeId::new(), InvalidationSignal::Key("a".to_string()));
    eventually(|| !cache.contains_key(&"a".to_string())).await;
    assert!(cache.contains_key(&"b".to_string()));

    drop(bus);
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run_async did not return")
        .unwrap();

    let removed = removed.lock();
    assert_eq!(removed.len(), 1);
    assert_eq!(*removed[0].0, "a");
    assert_eq!(removed[0].1, 1);
    assert_eq!(removed[0].2, RemovalCause::Signaled);
}

#[tokio::test]
async fn page_cache_invalidates_on_commit_only() {
    let renders = Arc::new(AtomicUsize::new(0));
    let pages: Cache<String, String> = Cache::new();
    let render = |slug: &'static str| {
        let renders = &renders;
        async move {
            let n = renders.fetch_add(1, Ordering::AcqRel);
            format!("<h1>{slug} v{n}</h1>")
        }
    };

    let home = "home".to_string();
    assert_eq!(pages.get_with(home.clone(), render("home")).await, "<h1>home v0</h1>");

    // An update that is rolled back leaves the cached page alone.
    let mut pending = PendingInvalidations::new();
    pending.invalidate(home.clone());
    pending.rollback();
    assert_eq!(pages.get_with(home.clone(), render("home")).await, "<h1>home v0</h1>");

    // A committed update invalidates, but only once committed.
    let mut pending = PendingInvalidations::new();
    pending.invalidate(home.clone());
    pending.invalidate(home.clone());
    assert!(pages.contains_key(&home));
    assert_eq!(pending.commit(&pages), 1);
    assert_eq!(pages.get_with(home.clone(), render("home")).await, "<h1>home v1</h1>");
}

#[tokio::test]
async fn committed_invalidations_reach_other_nodes() {
    let bus = InvalidationBus::new();
    let (writer, reader) = (NodeId::new(), NodeId::new());
    let reader_cache: Cache<u32, &str> = Cache::new();
    let reader_subscriber = bus.subscribe(reader);
    reader_cache.get_with(1, async { "one" }).await;
    reader_cache.get_with(2, async { "two" }).await;

    let mut pending = PendingInvalidations::new();
    pending.invalidate(1);
    for signal in pending.into_signals() {
        bus.publish(writer, signal);
    }

    assert_eq!(reader_subscriber.apply_pending(&reader_cache), Ok(1));
    assert_eq!(reader_cache.get(&1), None);
    assert_eq!(reader_cache.get(&2), Some("two"));
}

struct Languages {
    reads: AtomicUsize,
}

// Lets the test keep a handle on the read counter after the provider took the
// source.
struct SharedLanguages(Arc<Languages>);

impl LanguageSource for SharedLanguages {
    fn languages(&self) -> BoxFuture<'_, Result<Vec<LanguageInfo>, SourceError>> {
        async move {
            self.0.reads.fetch_add(1, Ordering::AcqRel);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![
                LanguageInfo::new("en", "en"),
                LanguageInfo::new("fr", "fr"),
            ])
        }
        .boxed()
    }

    fn default_language_setting(&self) -> BoxFuture<'_, Result<Option<String>, SourceError>> {
        async { Ok(None) }.boxed()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn localization_options_follow_language_changes() {
    init_logger();

    let languages = Arc::new(Languages {
        reads: AtomicUsize::new(0),
    });
    let provider = Arc::new(RequestLocalizationOptionsProvider::new(SharedLanguages(
        Arc::clone(&languages),
    )));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.get_localization_options().await.unwrap() })
        })
        .collect();
    for options in futures_util::future::join_all(tasks).await {
        let options = options.unwrap();
        assert_eq!(options.default_request_culture.culture, "en");
        assert_eq!(options.supported_cultures, vec!["en", "fr"]);
    }
    let reads = languages.reads.load(Ordering::Acquire);
    // Tasks spawned after the first computation finished read the cache.
    assert_eq!(reads, 1);

    let bus = InvalidationBus::new();
    let subscriber = bus.subscribe(NodeId::new());
    bus.publish(NodeId::new(), InvalidationSignal::All);
    assert_eq!(subscriber.apply_pending(&provider), Ok(1));

    provider.get_localization_options().await.unwrap();
    assert_eq!(languages.reads.load(Ordering::Acquire), 2);
}
