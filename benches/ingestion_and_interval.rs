//! Benchmarks the two hottest per-item paths: ingesting a decoded item
//! through the full seen-gate/creator/item pipeline, and computing the
//! adaptive poll interval from a activity window.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use zine_sync::ingestion::{ingest_item, IngestionDeps};
use zine_sync::interval::{activity_metrics, next_interval, should_adjust};
use zine_sync::provider::DecodedItem;
use zine_sync::store::memory::{
    InMemoryCreatorStore, InMemoryDlqStore, InMemoryItemStore, InMemorySeenStore,
    InMemorySubscriptionItemStore, InMemoryUserItemStore,
};
use zine_sync::time::ManualClock;
use zine_sync::types::{ContentType, Provider, SubscriptionId, SubscriptionStatus, UserId};

fn deps() -> IngestionDeps {
    IngestionDeps {
        seen: Arc::new(InMemorySeenStore::new()),
        items: Arc::new(InMemoryItemStore::new()),
        creators: Arc::new(InMemoryCreatorStore::new()),
        user_items: Arc::new(InMemoryUserItemStore::new()),
        subscription_items: Arc::new(InMemorySubscriptionItemStore::new()),
        dlq: Arc::new(InMemoryDlqStore::new()),
        clock: Arc::new(ManualClock::new(1_700_000_000_000)),
    }
}

fn decoded_item(id: &str) -> DecodedItem {
    DecodedItem {
        provider_item_id: id.to_owned(),
        title: "Bench video".to_owned(),
        canonical_url: "https://example.invalid/watch".to_owned(),
        thumbnail_url: Some("https://example.invalid/thumb.jpg".to_owned()),
        published_at: Some(1_700_000_000_000),
        duration_seconds: Some(600),
        summary: Some("a description of reasonable length for a bench payload".to_owned()),
        is_playable: true,
        raw: serde_json::json!({ "id": id, "kind": "youtube#video" }),
    }
}

fn bench_ingest_new_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("ingest_item/first_seen", |b| {
        b.to_async(&rt).iter_batched(
            || (deps(), UserId::new(), SubscriptionId::new(), decoded_item(&uuid::Uuid::new_v4().to_string())),
            |(deps, user_id, subscription_id, item)| async move {
                black_box(
                    ingest_item(
                        &deps,
                        user_id,
                        subscription_id,
                        Provider::Youtube,
                        ContentType::Video,
                        "channel1",
                        "Channel One",
                        item,
                    )
                    .await
                    .unwrap(),
                )
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_ingest_duplicate_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("ingest_item/already_seen", |b| {
        b.to_async(&rt).iter_batched(
            || {
                let deps = deps();
                let user_id = UserId::new();
                let subscription_id = SubscriptionId::new();
                let item = decoded_item("dup");
                rt.block_on(ingest_item(
                    &deps,
                    user_id,
                    subscription_id,
                    Provider::Youtube,
                    ContentType::Video,
                    "channel1",
                    "Channel One",
                    item.clone(),
                ))
                .unwrap();
                (deps, user_id, subscription_id, item)
            },
            |(deps, user_id, subscription_id, item)| async move {
                black_box(
                    ingest_item(
                        &deps,
                        user_id,
                        subscription_id,
                        Provider::Youtube,
                        ContentType::Video,
                        "channel1",
                        "Channel One",
                        item,
                    )
                    .await
                    .unwrap(),
                )
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_interval_evaluation(c: &mut Criterion) {
    let recent: Vec<i64> = (0..100)
        .map(|i| 1_700_000_000_000 - i * 3_600 * 1_000)
        .collect();

    c.bench_function("interval/activity_metrics_100_items", |b| {
        b.iter(|| black_box(activity_metrics(black_box(&recent), 1_700_000_000_000)));
    });

    c.bench_function("interval/next_interval", |b| {
        let metrics = activity_metrics(&recent, 1_700_000_000_000);
        b.iter(|| black_box(next_interval(black_box(metrics))));
    });

    c.bench_function("interval/should_adjust", |b| {
        let sub = zine_sync::domain::Subscription {
            id: SubscriptionId::new(),
            user_id: UserId::new(),
            provider: Provider::Youtube,
            provider_channel_id: "UCabc".to_owned(),
            creator_id: None,
            total_items: None,
            last_published_at: None,
            last_polled_at: None,
            poll_interval_seconds: 3_600,
            status: SubscriptionStatus::Active,
            disconnected_at: None,
            disconnected_reason: None,
            created_at: 0,
            updated_at: 0,
        };
        let metrics = activity_metrics(&recent, 1_700_000_000_000);
        let now = 3_600 * 24 * 1_000;
        b.iter(|| black_box(should_adjust(black_box(&sub), now, metrics)));
    });
}

criterion_group!(
    benches,
    bench_ingest_new_item,
    bench_ingest_duplicate_item,
    bench_interval_evaluation
);
criterion_main!(benches);
