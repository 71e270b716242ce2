//! Subscription Contract Integration Tests
//!
//! Admission, matching, dynamic filters, rate limiting, lifecycle
//! notifications and disposal of the generic subscription registry.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use adapter_push::{
    CallerContext, CancelReason, HookError, KeyResolver, PushError, ResolutionError,
    SubscriptionEvent, SubscriptionHooks, SubscriptionRegistry, SubscriptionRequest,
    SubscriptionState, SubscriptionUpdate, TagValue, TagValueStatus, TopicHierarchyMatcher,
    Variant,
};

const DEADLINE: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

fn registry() -> SubscriptionRegistry<TagValue> {
    SubscriptionRegistry::builder("contract").build()
}

async fn subscribe(
    registry: &SubscriptionRegistry<TagValue>,
    keys: &[&str],
) -> adapter_push::Subscription<TagValue> {
    registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(keys.iter().copied()),
            CancellationToken::new(),
        )
        .await
        .unwrap()
}

/// Snapshot hook that takes a while to build its items.
struct SlowSnapshot;

#[async_trait]
impl SubscriptionHooks<TagValue> for SlowSnapshot {
    async fn on_keys_added(
        &self,
        _context: &CallerContext,
        keys: &[String],
    ) -> Result<Vec<TagValue>, HookError> {
        let snapshot = keys.iter().map(|key| TagValue::new(key.clone(), "V1")).collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(snapshot)
    }
}

/// Resolver that never answers for names starting with `slow`.
struct StallingResolver;

#[async_trait]
impl KeyResolver for StallingResolver {
    async fn resolve(
        &self,
        _context: &CallerContext,
        names: &[String],
    ) -> Vec<Result<String, ResolutionError>> {
        if names.iter().any(|name| name.starts_with("slow")) {
            std::future::pending::<()>().await;
        }
        names.iter().cloned().map(Ok).collect()
    }
}

/// Next Added/Cancelled notification, skipping key changes.
async fn next_lifecycle(rx: &mut broadcast::Receiver<SubscriptionEvent>) -> SubscriptionEvent {
    loop {
        let event = timeout(DEADLINE, rx.recv()).await.unwrap().unwrap();
        if !matches!(event, SubscriptionEvent::KeysChanged(_)) {
            return event;
        }
    }
}

/// Added/Cancelled notifications already waiting, skipping key changes.
fn pending_lifecycle(rx: &mut broadcast::Receiver<SubscriptionEvent>) -> Vec<SubscriptionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if !matches!(event, SubscriptionEvent::KeysChanged(_)) {
            events.push(event);
        }
    }
    events
}

/// Wait until `key` leaves the registry-wide subscribed set.
async fn await_key_released(rx: &mut broadcast::Receiver<SubscriptionEvent>, key: &str) {
    timeout(DEADLINE, async {
        loop {
            if let Ok(SubscriptionEvent::KeysChanged(changes)) = rx.recv().await
                && changes.unsubscribed.contains(key)
            {
                return;
            }
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn second_subscription_rejected_at_capacity() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .max_concurrent_subscriptions(1)
        .build();

    let mut first = subscribe(&registry, &["T1"]).await;
    let second = registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(second.unwrap_err(), PushError::CapacityExceeded { limit: 1 });
    assert_eq!(first.state(), SubscriptionState::Active);
    assert_eq!(registry.subscription_count(), 1);

    registry.publish(TagValue::new("T1", 1.0));
    let item = timeout(DEADLINE, first.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(item.tag_id, "T1");
}

#[tokio::test]
async fn rejection_happens_before_resolution() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .max_concurrent_subscriptions(1)
        .build();
    let _first = subscribe(&registry, &["T1"]).await;
    let mut lifecycle = registry.lifecycle_events();

    let rejected = registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T2"]),
            CancellationToken::new(),
        )
        .await;

    assert!(matches!(rejected, Err(PushError::CapacityExceeded { .. })));
    assert!(!registry.is_key_subscribed("T2"));
    assert!(lifecycle.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_subscribes_respect_capacity() {
    const LIMIT: usize = 3;
    const CALLERS: usize = 16;

    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .max_concurrent_subscriptions(LIMIT)
        .build();
    let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));

    let tasks: Vec<_> = (0..CALLERS)
        .map(|i| {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                registry
                    .subscribe(
                        CallerContext::anonymous(),
                        SubscriptionRequest::new([format!("T{i}")]),
                        CancellationToken::new(),
                    )
                    .await
            })
        })
        .collect();

    let mut admitted = Vec::new();
    let mut rejected = 0_u64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(subscription) => admitted.push(subscription),
            Err(PushError::CapacityExceeded { limit }) => {
                assert_eq!(limit, LIMIT);
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(admitted.len(), LIMIT);
    assert_eq!(rejected, 13);
    assert_eq!(registry.subscription_count(), LIMIT);
    assert_eq!(registry.stats().rejected, rejected);
}

#[tokio::test]
async fn cancelled_token_refused_before_admission() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .max_concurrent_subscriptions(1)
        .build();
    let mut lifecycle = registry.lifecycle_events();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]),
            cancel,
        )
        .await;

    assert_eq!(result.unwrap_err(), PushError::Cancelled);
    assert!(lifecycle.try_recv().is_err());
    assert!(!registry.is_key_subscribed("T1"));

    // The slot was never taken.
    let live = subscribe(&registry, &["T1"]).await;
    assert_eq!(live.state(), SubscriptionState::Active);
}

// =============================================================================
// Matching
// =============================================================================

#[tokio::test]
async fn exact_match_preserves_item() {
    let registry = registry();
    let mut sub = subscribe(&registry, &["T1"]).await;

    let sent = TagValue::new("T1", 0.1 + 0.2)
        .with_sample_time(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
        .with_status(TagValueStatus::Uncertain)
        .with_units("bar");
    assert!(registry.publish(sent.clone()));

    let received = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(received, sent);
    assert_eq!(
        received.value.as_f64().map(f64::to_bits),
        Some((0.1_f64 + 0.2).to_bits())
    );
    assert_eq!(sub.queued_count(), 0);
}

#[tokio::test]
async fn wildcard_match_delivers_descendants_in_order() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .matcher(Arc::new(TopicHierarchyMatcher::default()))
        .build();
    let mut sub = subscribe(&registry, &["root"]).await;

    registry.publish(TagValue::new("root/child", 1.0));
    registry.publish(TagValue::new("unrelated", 2.0));
    registry.publish(TagValue::new("root", 3.0));

    let first = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    let second = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.tag_id, "root/child");
    assert_eq!(second.tag_id, "root");
    assert!(timeout(QUIET, sub.next()).await.is_err());
}

#[tokio::test]
async fn empty_key_matches_nothing() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .matcher(Arc::new(adapter_push::PredicateMatcher::new(|_: &str, _: &str| true)))
        .build();
    let mut sub = subscribe(&registry, &["anything"]).await;

    assert!(registry.publish(TagValue::new("", 1.0)));
    assert!(registry.publish(TagValue::new("real", 2.0)));

    let item = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(item.tag_id, "real");
}

// =============================================================================
// Dynamic Filters
// =============================================================================

#[tokio::test]
async fn unsubscribed_key_stops_delivery() {
    let registry = registry();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut lifecycle = registry.lifecycle_events();

    let mut sub = registry
        .subscribe_with_updates(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["K"]),
            UnboundedReceiverStream::new(updates_rx),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    registry.publish(TagValue::new("K", "V1"));
    let first = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.value, Variant::from("V1"));

    updates_tx.send(SubscriptionUpdate::unsubscribe(["K"])).unwrap();
    await_key_released(&mut lifecycle, "K").await;

    registry.publish(TagValue::new("K", "V2"));
    assert!(timeout(QUIET, sub.next()).await.is_err());
    assert_eq!(sub.delivered_count(), 1);
    assert!(sub.filter_keys().is_empty());
}

#[tokio::test]
async fn subscribed_key_starts_delivery() {
    let registry = registry();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut lifecycle = registry.lifecycle_events();

    let mut sub = registry
        .subscribe_with_updates(
            CallerContext::anonymous(),
            SubscriptionRequest::empty(),
            UnboundedReceiverStream::new(updates_rx),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    updates_tx.send(SubscriptionUpdate::subscribe(["T7"])).unwrap();
    timeout(DEADLINE, async {
        loop {
            if let Ok(SubscriptionEvent::KeysChanged(changes)) = lifecycle.recv().await
                && changes.subscribed.contains("T7")
            {
                return;
            }
        }
    })
    .await
    .unwrap();

    registry.publish(TagValue::new("T7", 7.0));
    let item = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(item.tag_id, "T7");
    assert_eq!(sub.filter_keys(), vec!["T7".to_string()]);
}

#[tokio::test]
async fn completed_update_stream_ends_subscription() {
    let registry = registry();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel::<SubscriptionUpdate>();
    let mut lifecycle = registry.lifecycle_events();

    let mut sub = registry
        .subscribe_with_updates(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]),
            UnboundedReceiverStream::new(updates_rx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(next_lifecycle(&mut lifecycle).await, SubscriptionEvent::Added { .. }));

    drop(updates_tx);

    match next_lifecycle(&mut lifecycle).await {
        SubscriptionEvent::Cancelled { id, reason } => {
            assert_eq!(id, sub.id());
            assert_eq!(reason, CancelReason::UpdatesCompleted);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(timeout(DEADLINE, sub.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn cancellation_interrupts_pending_update() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .resolver(Arc::new(StallingResolver))
        .build();
    let cancel = CancellationToken::new();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let mut sub = registry
        .subscribe_with_updates(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]),
            UnboundedReceiverStream::new(updates_rx),
            cancel.clone(),
        )
        .await
        .unwrap();

    updates_tx.send(SubscriptionUpdate::subscribe(["slow-tag"])).unwrap();
    tokio::time::sleep(QUIET).await;
    cancel.cancel();

    // The reader drops the update stream once it stops.
    timeout(DEADLINE, updates_tx.closed()).await.unwrap();
    assert!(timeout(DEADLINE, sub.next()).await.unwrap().is_none());
    assert_eq!(sub.state(), SubscriptionState::Cancelled);
}

// =============================================================================
// Snapshot Ordering
// =============================================================================

#[tokio::test]
async fn snapshot_precedes_values_published_during_subscribe() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .hooks(Arc::new(SlowSnapshot))
        .build();
    let producer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.publish(TagValue::new("K", "V2"));
        })
    };

    let mut sub = subscribe(&registry, &["K"]).await;
    producer.await.unwrap();

    let first = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    let second = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.value, Variant::from("V1"));
    assert_eq!(second.value, Variant::from("V2"));
    assert_eq!(sub.delivered_count(), 2);
}

#[tokio::test]
async fn snapshot_precedes_values_published_during_update() {
    let registry = SubscriptionRegistry::<TagValue>::builder("contract")
        .hooks(Arc::new(SlowSnapshot))
        .build();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let mut sub = registry
        .subscribe_with_updates(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]),
            UnboundedReceiverStream::new(updates_rx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let initial = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(initial.tag_id, "T1");

    updates_tx.send(SubscriptionUpdate::subscribe(["K"])).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    registry.publish(TagValue::new("K", "V2"));

    let first = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    let second = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(first.value, Variant::from("V1"));
    assert_eq!(second.value, Variant::from("V2"));
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn publish_interval_coalesces_bursts() {
    let registry = registry();
    let mut sub = registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["T1"]).with_publish_interval(Duration::from_secs(1)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    for i in 0..20_i64 {
        registry.publish(TagValue::new("T1", i));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    let queued = sub.queued_count();
    assert!((1..=2).contains(&queued), "delivered {queued} items");

    let mut last = None;
    for _ in 0..queued {
        last = Some(sub.next().await.unwrap().unwrap());
    }
    assert_eq!(last.map(|v| v.value), Some(Variant::Int64(19)));
}

#[tokio::test(start_paused = true)]
async fn publish_interval_keeps_latest_per_key() {
    let registry = registry();
    let mut sub = registry
        .subscribe(
            CallerContext::anonymous(),
            SubscriptionRequest::new(["A", "B"]).with_publish_interval(Duration::from_millis(500)),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    registry.publish(TagValue::new("A", 1.0));
    registry.publish(TagValue::new("B", 10.0));
    registry.publish(TagValue::new("A", 2.0));
    assert_eq!(sub.queued_count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut latest: HashMap<String, Variant> = HashMap::new();
    while sub.queued_count() > 0 {
        let item = sub.next().await.unwrap().unwrap();
        latest.insert(item.tag_id, item.value);
    }
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["A"], Variant::from(2.0));
    assert_eq!(latest["B"], Variant::from(10.0));
}

// =============================================================================
// Lifecycle Notifications
// =============================================================================

#[tokio::test]
async fn one_added_and_one_cancelled_notification() {
    let registry = registry();
    let mut lifecycle = registry.lifecycle_events();
    let cancel = CancellationToken::new();

    let context = CallerContext::new("operator");
    let sub = registry
        .subscribe(context.clone(), SubscriptionRequest::new(["T1"]), cancel.clone())
        .await
        .unwrap();

    match next_lifecycle(&mut lifecycle).await {
        SubscriptionEvent::Added { id, context: added } => {
            assert_eq!(id, sub.id());
            assert_eq!(added, context);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    cancel.cancel();
    match next_lifecycle(&mut lifecycle).await {
        SubscriptionEvent::Cancelled { id, reason } => {
            assert_eq!(id, sub.id());
            assert_eq!(reason, CancelReason::Caller);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    sub.cancel();
    drop(sub);
    assert!(pending_lifecycle(&mut lifecycle).is_empty());
    assert_eq!(registry.subscription_count(), 0);
}

#[tokio::test]
async fn shared_key_subscribed_upstream_once() {
    let registry = registry();
    let mut lifecycle = registry.lifecycle_events();

    let first = subscribe(&registry, &["T1"]).await;
    let second = subscribe(&registry, &["T1", "T2"]).await;
    assert_eq!(registry.subscriber_count("T1"), 2);
    assert_eq!(registry.subscribed_keys(), vec!["T1".to_string(), "T2".to_string()]);

    drop(first);
    assert!(registry.is_key_subscribed("T1"));
    drop(second);
    assert!(registry.subscribed_keys().is_empty());

    let mut subscribed = Vec::new();
    let mut unsubscribed = Vec::new();
    while let Ok(event) = lifecycle.try_recv() {
        if let SubscriptionEvent::KeysChanged(changes) = event {
            subscribed.extend(changes.subscribed);
            unsubscribed.extend(changes.unsubscribed);
        }
    }
    subscribed.sort();
    unsubscribed.sort();
    assert_eq!(subscribed, vec!["T1".to_string(), "T2".to_string()]);
    assert_eq!(unsubscribed, vec!["T1".to_string(), "T2".to_string()]);
}

// =============================================================================
// Disposal
// =============================================================================

#[tokio::test]
async fn dispose_is_idempotent() {
    let registry = registry();
    let mut a = subscribe(&registry, &["T1"]).await;
    let b = subscribe(&registry, &["T2"]).await;
    registry.publish(TagValue::new("T1", 1.0));
    let mut lifecycle = registry.lifecycle_events();

    registry.dispose();
    registry.dispose();
    b.cancel();
    b.cancel();

    let cancelled = pending_lifecycle(&mut lifecycle)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                SubscriptionEvent::Cancelled {
                    reason: CancelReason::Disposed,
                    ..
                }
            )
        })
        .count();
    assert_eq!(cancelled, 2);
    assert!(pending_lifecycle(&mut lifecycle).is_empty());

    assert!(registry.is_disposed());
    assert_eq!(a.state(), SubscriptionState::Cancelled);
    assert_eq!(b.state(), SubscriptionState::Cancelled);

    // Queued items stay readable after disposal.
    let item = timeout(DEADLINE, a.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(item.tag_id, "T1");
    assert!(timeout(DEADLINE, a.next()).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispose_while_publishing() {
    let registry = registry();
    let mut subs = Vec::new();
    for _ in 0..8 {
        subs.push(subscribe(&registry, &["T1"]).await);
    }

    let producer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut i = 0_i64;
            while registry.publish(TagValue::new("T1", i)) {
                i += 1;
                tokio::task::yield_now().await;
            }
            i
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.dispose();
    timeout(DEADLINE, producer).await.unwrap().unwrap();

    for mut sub in subs {
        assert_eq!(sub.state(), SubscriptionState::Cancelled);
        let drained = timeout(DEADLINE, sub.by_ref().count()).await.unwrap();
        assert_eq!(u64::try_from(drained).unwrap(), sub.delivered_count());
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_keep_per_producer_order() {
    const PRODUCERS: i64 = 4;
    const PER_PRODUCER: i64 = 250;

    let registry = registry();
    let mut subs = Vec::new();
    for _ in 0..6 {
        subs.push(subscribe(&registry, &["K"]).await);
    }

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for seq in 0..PER_PRODUCER {
                    registry.publish(TagValue::new("K", producer * 1_000_000 + seq));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let expected = usize::try_from(PRODUCERS * PER_PRODUCER).unwrap();
    for mut sub in subs {
        let mut last_seen: HashMap<i64, i64> = HashMap::new();
        for _ in 0..expected {
            let item = timeout(DEADLINE, sub.next()).await.unwrap().unwrap().unwrap();
            let Variant::Int64(raw) = item.value else {
                panic!("unexpected value {:?}", item.value);
            };
            let (producer, seq) = (raw / 1_000_000, raw % 1_000_000);
            if let Some(previous) = last_seen.insert(producer, seq) {
                assert!(seq > previous, "producer {producer} out of order");
            }
        }
        assert_eq!(sub.queued_count(), 0);
    }
}
