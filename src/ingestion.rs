//! Turns a decoded provider item into canonical `Item`/`Creator`/`UserItem`
//! rows, gated by the `ProviderItemsSeen` idempotency check.

use std::sync::Arc;

use crate::domain::{Creator, DeadLetterQueue, Item, SubscriptionItem, UserItem};
use crate::provider::DecodedItem;
use crate::store::{CreatorStore, DlqStore, ItemStore, SeenStore, SubscriptionItemStore, UserItemStore};
use crate::time::{new_sortable_id, Clock};
use crate::types::{
    ContentType, CreatorId, DeadLetterQueueId, DlqStatus, ItemId, Provider, SkipReason,
    SubscriptionId, SubscriptionItemId, UserId, UserItemId, UserItemState,
};
use crate::Result;

/// Result of one `ingest_item` call. `published_at` is the sole channel by
/// which a caller learns the timestamp of a newly created item — watermark
/// math must read it from here, never recompute it by re-scanning input.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub created: bool,
    pub item_id: Option<ItemId>,
    pub user_item_id: Option<UserItemId>,
    pub skipped: Option<SkipReason>,
    pub published_at: Option<i64>,
}

impl IngestOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            created: false,
            item_id: None,
            user_item_id: None,
            skipped: Some(reason),
            published_at: None,
        }
    }
}

#[derive(Clone)]
pub struct IngestionDeps {
    pub seen: Arc<dyn SeenStore>,
    pub items: Arc<dyn ItemStore>,
    pub creators: Arc<dyn CreatorStore>,
    pub user_items: Arc<dyn UserItemStore>,
    pub subscription_items: Arc<dyn SubscriptionItemStore>,
    pub dlq: Arc<dyn DlqStore>,
    pub clock: Arc<dyn Clock>,
}

/// Ingests one decoded item for `user_id` under `subscription_id`.
///
/// Step order mirrors the idempotency design: the `ProviderItemsSeen` gate
/// fires first and is never rolled back, so a failure in any later step
/// surfaces via the DLQ rather than retrying the same item forever.
///
/// # Errors
/// Propagates store errors from any step after the seen-gate; the caller is
/// expected to have already recorded a DLQ entry by the time this returns
/// `Err` (done internally here) and to treat the error as "this one item
/// failed", not as a reason to abort the rest of the batch.
pub async fn ingest_item(
    deps: &IngestionDeps,
    user_id: UserId,
    subscription_id: SubscriptionId,
    provider: Provider,
    content_type: ContentType,
    creator_provider_id: &str,
    creator_name: &str,
    decoded: DecodedItem,
) -> Result<IngestOutcome> {
    let now = deps.clock.now_millis();

    let first_seen = deps
        .seen
        .try_seen(
            user_id,
            provider,
            &decoded.provider_item_id,
            Some(subscription_id),
            now,
        )
        .await?;
    if !first_seen {
        return Ok(IngestOutcome::skipped(SkipReason::AlreadySeen));
    }

    match ingest_after_seen_gate(
        deps,
        user_id,
        subscription_id,
        provider,
        content_type,
        creator_provider_id,
        creator_name,
        &decoded,
        now,
    )
    .await
    {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            record_dlq(deps, user_id, subscription_id, provider, &decoded, &err, now).await;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn ingest_after_seen_gate(
    deps: &IngestionDeps,
    user_id: UserId,
    subscription_id: SubscriptionId,
    provider: Provider,
    content_type: ContentType,
    creator_provider_id: &str,
    creator_name: &str,
    decoded: &DecodedItem,
    now: i64,
) -> Result<IngestOutcome> {
    let creator_id = find_or_create_creator(deps, provider, creator_provider_id, creator_name, now).await?;
    let item = find_or_create_item(deps, provider, content_type, creator_id, decoded, now).await?;

    let user_item = UserItem {
        id: UserItemId::new(),
        user_id,
        item_id: item.id,
        state: UserItemState::Inbox,
        ingested_at: now,
        bookmarked_at: None,
        archived_at: None,
        last_opened_at: None,
        progress_position: None,
        progress_duration: Some(item.duration_seconds.unwrap_or(0)),
        is_finished: false,
        finished_at: None,
        created_at: now,
        updated_at: now,
    };
    let Some(inserted) = deps.user_items.try_insert(user_item).await? else {
        return Ok(IngestOutcome::skipped(SkipReason::UserItemExists));
    };

    deps.subscription_items
        .try_insert(SubscriptionItem {
            id: SubscriptionItemId::new(),
            subscription_id,
            item_id: item.id,
            provider_item_id: decoded.provider_item_id.clone(),
            published_at: decoded.published_at,
            fetched_at: now,
        })
        .await?;

    Ok(IngestOutcome {
        created: true,
        item_id: Some(item.id),
        user_item_id: Some(inserted.id),
        skipped: None,
        published_at: decoded.published_at,
    })
}

async fn find_or_create_creator(
    deps: &IngestionDeps,
    provider: Provider,
    creator_provider_id: &str,
    name: &str,
    now: i64,
) -> Result<CreatorId> {
    if let Some(mut existing) = deps.creators.find_by_provider_id(provider, creator_provider_id).await? {
        if existing.name != name {
            existing.name = name.to_owned();
            existing.updated_at = now;
            let updated = deps.creators.update(existing).await?;
            return Ok(updated.id);
        }
        return Ok(existing.id);
    }

    let creator = Creator {
        id: CreatorId::new(),
        provider,
        provider_creator_id: creator_provider_id.to_owned(),
        name: name.to_owned(),
        normalized_name: name.trim().to_lowercase(),
        image_url: None,
        handle: None,
        external_url: None,
        description: None,
        created_at: now,
        updated_at: now,
    };
    let inserted = deps.creators.insert(creator).await?;
    Ok(inserted.id)
}

async fn find_or_create_item(
    deps: &IngestionDeps,
    provider: Provider,
    content_type: ContentType,
    creator_id: CreatorId,
    decoded: &DecodedItem,
    now: i64,
) -> Result<Item> {
    if let Some(existing) = deps
        .items
        .find_by_provider_id(provider, &decoded.provider_item_id)
        .await?
    {
        return Ok(existing);
    }

    let item = Item {
        id: ItemId(new_sortable_id()),
        content_type,
        provider,
        provider_id: decoded.provider_item_id.clone(),
        canonical_url: decoded.canonical_url.clone(),
        title: decoded.title.clone(),
        thumbnail_url: decoded.thumbnail_url.clone(),
        creator_id: Some(creator_id),
        duration_seconds: decoded.duration_seconds,
        published_at: decoded.published_at,
        summary: decoded.summary.clone(),
        raw_metadata: Some(decoded.raw.clone()),
        created_at: now,
        updated_at: now,
    };
    deps.items.insert(item).await
}

async fn record_dlq(
    deps: &IngestionDeps,
    user_id: UserId,
    subscription_id: SubscriptionId,
    provider: Provider,
    decoded: &DecodedItem,
    err: &crate::Error,
    now: i64,
) {
    let entry = DeadLetterQueue {
        id: DeadLetterQueueId::new(),
        subscription_id: Some(subscription_id),
        user_id,
        provider,
        provider_id: decoded.provider_item_id.clone(),
        raw_data: decoded.raw.clone(),
        error_message: err.to_string(),
        error_type: Some(format!("{:?}", err.kind())),
        error_stack: None,
        retry_count: 0,
        last_retry_at: None,
        status: DlqStatus::Pending,
        created_at: now,
    };
    if let Err(dlq_err) = deps.dlq.insert(entry).await {
        tracing::error!(error = %dlq_err, "failed to record dead-letter entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{
        InMemoryCreatorStore, InMemoryDlqStore, InMemoryItemStore, InMemorySeenStore,
        InMemorySubscriptionItemStore, InMemoryUserItemStore,
    };
    use crate::time::ManualClock;

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

    fn decoded(id: &str, published_at: i64) -> DecodedItem {
        DecodedItem {
            provider_item_id: id.to_owned(),
            title: "title".to_owned(),
            canonical_url: "https://example.invalid".to_owned(),
            thumbnail_url: None,
            published_at: Some(published_at),
            duration_seconds: Some(300),
            summary: None,
            is_playable: true,
            raw: serde_json::json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn first_ingestion_creates_item_and_user_item() {
        let deps = deps();
        let outcome = ingest_item(
            &deps,
            UserId::new(),
            SubscriptionId::new(),
            Provider::Youtube,
            ContentType::Video,
            "channel1",
            "Channel One",
            decoded("v1", 1_000),
        )
        .await
        .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.published_at, Some(1_000));
    }

    #[tokio::test]
    async fn repeat_ingestion_of_same_provider_item_is_already_seen() {
        let deps = deps();
        let user_id = UserId::new();
        let subscription_id = SubscriptionId::new();
        ingest_item(
            &deps,
            user_id,
            subscription_id,
            Provider::Youtube,
            ContentType::Video,
            "channel1",
            "Channel One",
            decoded("v1", 1_000),
        )
        .await
        .unwrap();

        let second = ingest_item(
            &deps,
            user_id,
            subscription_id,
            Provider::Youtube,
            ContentType::Video,
            "channel1",
            "Channel One",
            decoded("v1", 1_000),
        )
        .await
        .unwrap();

        assert!(!second.created);
        assert_eq!(second.skipped, Some(SkipReason::AlreadySeen));
    }

    #[tokio::test]
    async fn idempotency_gate_survives_unsubscribe_and_resubscribe() {
        let deps = deps();
        let user_id = UserId::new();
        let sub_a = SubscriptionId::new();
        let sub_b = SubscriptionId::new();
        ingest_item(
            &deps,
            user_id,
            sub_a,
            Provider::Youtube,
            ContentType::Video,
            "channel1",
            "Channel One",
            decoded("v1", 1_000),
        )
        .await
        .unwrap();

        // simulate re-subscribe: subscription_items for sub_a purged, but the
        // ProviderItemsSeen row is never purged
        deps.subscription_items.delete_for_subscription(sub_a).await.unwrap();

        let outcome = ingest_item(
            &deps,
            user_id,
            sub_b,
            Provider::Youtube,
            ContentType::Video,
            "channel1",
            "Channel One",
            decoded("v1", 1_000),
        )
        .await
        .unwrap();
        assert!(!outcome.created);
    }
}
