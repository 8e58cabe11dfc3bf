//! Append-mostly storage for error events.
//!
//! Events are written once by ingestion; the processing pipeline later sets
//! `group_id` and `has_been_processed`. Nothing else mutates them.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Duration;
use faultline_core::{TimeRange, UtcDateTime};
use tokio::sync::RwLock;

use super::types::{
    bucket_start, stats_windows, ErrorEvent, ErrorTrackingError, EventQuery, EventSummary,
    GroupStats, TimeBucketPoint, TopErrorType,
};

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Returns `false` when an event with the same id already exists
    async fn insert(&self, event: &ErrorEvent) -> Result<bool, ErrorTrackingError>;

    async fn get(
        &self,
        project_id: i32,
        event_id: &str,
    ) -> Result<Option<ErrorEvent>, ErrorTrackingError>;

    /// Newest first, with the total number of matches
    async fn query(&self, query: &EventQuery) -> Result<(Vec<ErrorEvent>, u64), ErrorTrackingError>;

    async fn assign_group(&self, event_id: &str, group_id: i32) -> Result<(), ErrorTrackingError>;

    async fn mark_processed(&self, event_id: &str) -> Result<(), ErrorTrackingError>;

    /// Events still waiting for the processing pipeline, oldest received first
    async fn unprocessed(&self, limit: u64) -> Result<Vec<ErrorEvent>, ErrorTrackingError>;

    async fn group_stats(
        &self,
        group_id: i32,
        now: UtcDateTime,
    ) -> Result<GroupStats, ErrorTrackingError>;

    async fn count_for_group(
        &self,
        group_id: i32,
        range: TimeRange,
    ) -> Result<i64, ErrorTrackingError>;

    /// Non-empty buckets only, oldest first
    async fn time_buckets(
        &self,
        project_id: i32,
        range: TimeRange,
        bucket: Duration,
    ) -> Result<Vec<TimeBucketPoint>, ErrorTrackingError>;

    async fn top_types(
        &self,
        project_id: i32,
        range: TimeRange,
        limit: u64,
    ) -> Result<Vec<TopErrorType>, ErrorTrackingError>;

    async fn summary(
        &self,
        project_id: i32,
        range: TimeRange,
    ) -> Result<EventSummary, ErrorTrackingError>;
}

/// Process-local event store for tests and single-node development
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<String, ErrorEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    async fn update<F>(&self, event_id: &str, apply: F) -> Result<(), ErrorTrackingError>
    where
        F: FnOnce(&mut ErrorEvent) + Send,
    {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(event_id)
            .ok_or(ErrorTrackingError::EventNotFound)?;
        apply(event);
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: &ErrorEvent) -> Result<bool, ErrorTrackingError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.id) {
            return Ok(false);
        }
        events.insert(event.id.clone(), event.clone());
        Ok(true)
    }

    async fn get(
        &self,
        project_id: i32,
        event_id: &str,
    ) -> Result<Option<ErrorEvent>, ErrorTrackingError> {
        let events = self.events.read().await;
        Ok(events
            .get(event_id)
            .filter(|e| e.project_id == project_id)
            .cloned())
    }

    async fn query(&self, query: &EventQuery) -> Result<(Vec<ErrorEvent>, u64), ErrorTrackingError> {
        let events = self.events.read().await;
        let mut matched: Vec<&ErrorEvent> = events.values().filter(|e| query.matches(e)).collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));

        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(query.offset as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn assign_group(&self, event_id: &str, group_id: i32) -> Result<(), ErrorTrackingError> {
        self.update(event_id, |e| e.group_id = Some(group_id)).await
    }

    async fn mark_processed(&self, event_id: &str) -> Result<(), ErrorTrackingError> {
        self.update(event_id, |e| e.has_been_processed = true).await
    }

    async fn unprocessed(&self, limit: u64) -> Result<Vec<ErrorEvent>, ErrorTrackingError> {
        let events = self.events.read().await;
        let mut pending: Vec<&ErrorEvent> =
            events.values().filter(|e| !e.has_been_processed).collect();
        pending.sort_by(|a, b| a.received_at.cmp(&b.received_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending.into_iter().take(limit as usize).cloned().collect())
    }

    async fn group_stats(
        &self,
        group_id: i32,
        now: UtcDateTime,
    ) -> Result<GroupStats, ErrorTrackingError> {
        let [day, week, month] = stats_windows(now);
        let events = self.events.read().await;
        let mut stats = GroupStats::default();
        let mut users = HashSet::new();

        for event in events.values().filter(|e| e.group_id == Some(group_id)) {
            stats.event_count += 1;
            if let Some(key) = event.user_key() {
                users.insert(key);
            }
            if event.timestamp >= day {
                stats.count_24h += 1;
            }
            if event.timestamp >= week {
                stats.count_7d += 1;
            }
            if event.timestamp >= month {
                stats.count_30d += 1;
            }
        }
        stats.user_count = users.len() as i64;
        Ok(stats)
    }

    async fn count_for_group(
        &self,
        group_id: i32,
        range: TimeRange,
    ) -> Result<i64, ErrorTrackingError> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.group_id == Some(group_id) && range.contains(e.timestamp))
            .count() as i64)
    }

    async fn time_buckets(
        &self,
        project_id: i32,
        range: TimeRange,
        bucket: Duration,
    ) -> Result<Vec<TimeBucketPoint>, ErrorTrackingError> {
        let events = self.events.read().await;
        let mut counts: BTreeMap<UtcDateTime, i64> = BTreeMap::new();
        for event in events
            .values()
            .filter(|e| e.project_id == project_id && range.contains(e.timestamp))
        {
            *counts.entry(bucket_start(event.timestamp, bucket)).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(bucket, count)| TimeBucketPoint { bucket, count })
            .collect())
    }

    async fn top_types(
        &self,
        project_id: i32,
        range: TimeRange,
        limit: u64,
    ) -> Result<Vec<TopErrorType>, ErrorTrackingError> {
        let events = self.events.read().await;
        let mut by_type: HashMap<&str, TopErrorType> = HashMap::new();
        for event in events
            .values()
            .filter(|e| e.project_id == project_id && range.contains(e.timestamp))
        {
            let entry = by_type
                .entry(event.error_type.as_str())
                .or_insert_with(|| TopErrorType {
                    error_type: event.error_type.clone(),
                    count: 0,
                    last_seen: event.timestamp,
                });
            entry.count += 1;
            entry.last_seen = entry.last_seen.max(event.timestamp);
        }

        let mut types: Vec<TopErrorType> = by_type.into_values().collect();
        types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.error_type.cmp(&b.error_type)));
        types.truncate(limit as usize);
        Ok(types)
    }

    async fn summary(
        &self,
        project_id: i32,
        range: TimeRange,
    ) -> Result<EventSummary, ErrorTrackingError> {
        let events = self.events.read().await;
        let mut summary = EventSummary::default();
        let mut groups = HashSet::new();
        let mut users = HashSet::new();

        for event in events
            .values()
            .filter(|e| e.project_id == project_id && range.contains(e.timestamp))
        {
            summary.total_events += 1;
            if !event.has_been_processed {
                summary.unprocessed_events += 1;
            }
            if event.level.is_high_severity() {
                summary.high_severity_events += 1;
            }
            if let Some(group_id) = event.group_id {
                groups.insert(group_id);
            }
            if let Some(key) = event.user_key() {
                users.insert(key);
            }
        }
        summary.unique_groups = groups.len() as i64;
        summary.unique_users = users.len() as i64;
        Ok(summary)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::event;
    use super::*;
    use faultline_core::parse_timestamp_str;
    use faultline_entities::error_events::UserContext;

    fn at(s: &str) -> UtcDateTime {
        parse_timestamp_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_per_id() {
        let store = InMemoryEventStore::new();
        let e = event("a", 1, "2024-01-15T10:00:00Z");
        assert!(store.insert(&e).await.unwrap());
        assert!(!store.insert(&e).await.unwrap());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_is_scoped_to_project() {
        let store = InMemoryEventStore::new();
        store.insert(&event("a", 1, "2024-01-15T10:00:00Z")).await.unwrap();
        assert!(store.get(1, "a").await.unwrap().is_some());
        assert!(store.get(2, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = InMemoryEventStore::new();
        let mut warning = event("b", 1, "2024-01-15T11:00:00Z");
        warning.level = crate::services::types::EventLevel::Warning;
        warning.message = "Disk almost full".to_string();
        store.insert(&event("a", 1, "2024-01-15T10:00:00Z")).await.unwrap();
        store.insert(&warning).await.unwrap();
        store.insert(&event("c", 1, "2024-01-15T12:00:00Z")).await.unwrap();
        store.insert(&event("d", 2, "2024-01-15T12:00:00Z")).await.unwrap();

        let (events, total) = store
            .query(&EventQuery {
                project_id: 1,
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(events.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);

        let (events, total) = store
            .query(&EventQuery {
                project_id: 1,
                search: Some("DISK".to_string()),
                limit: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].id, "b");
    }

    #[tokio::test]
    async fn test_group_stats_windows_and_users() {
        let store = InMemoryEventStore::new();
        let now = at("2024-02-01T00:00:00Z");
        let timestamps = [
            ("a", "2024-01-31T12:00:00Z"),
            ("b", "2024-01-28T00:00:00Z"),
            ("c", "2024-01-10T00:00:00Z"),
            ("d", "2023-12-01T00:00:00Z"),
        ];
        for (i, (id, ts)) in timestamps.iter().enumerate() {
            let mut e = event(id, 1, ts);
            e.user = Some(UserContext {
                id: Some(format!("u{}", i % 2)),
                ..Default::default()
            });
            store.insert(&e).await.unwrap();
            store.assign_group(id, 9).await.unwrap();
        }

        let stats = store.group_stats(9, now).await.unwrap();
        assert_eq!(stats.event_count, 4);
        assert_eq!(stats.user_count, 2);
        assert_eq!(stats.count_24h, 1);
        assert_eq!(stats.count_7d, 2);
        assert_eq!(stats.count_30d, 3);

        let range = TimeRange::ending_at(now, Duration::days(7));
        assert_eq!(store.count_for_group(9, range).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_time_buckets_and_summary() {
        let store = InMemoryEventStore::new();
        store.insert(&event("a", 1, "2024-01-15T10:05:00Z")).await.unwrap();
        store.insert(&event("b", 1, "2024-01-15T10:55:00Z")).await.unwrap();
        store.insert(&event("c", 1, "2024-01-15T12:30:00Z")).await.unwrap();
        store.mark_processed("c").await.unwrap();
        store.assign_group("c", 4).await.unwrap();

        let range = TimeRange::new(at("2024-01-15T00:00:00Z"), at("2024-01-16T00:00:00Z"));
        let buckets = store.time_buckets(1, range, Duration::hours(1)).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket, at("2024-01-15T10:00:00Z"));
        assert_eq!(buckets[0].count, 2);

        let summary = store.summary(1, range).await.unwrap();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.unprocessed_events, 2);
        assert_eq!(summary.unique_groups, 1);
        assert_eq!(summary.high_severity_events, 3);

        let top = store.top_types(1, range, 5).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].count, 3);
        assert_eq!(top[0].last_seen, at("2024-01-15T12:30:00Z"));
    }

    #[tokio::test]
    async fn test_mark_processed_unknown_event() {
        let store = InMemoryEventStore::new();
        assert!(matches!(
            store.mark_processed("missing").await,
            Err(ErrorTrackingError::EventNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unprocessed_oldest_first() {
        let store = InMemoryEventStore::new();
        store.insert(&event("late", 1, "2024-01-15T12:00:00Z")).await.unwrap();
        store.insert(&event("early", 2, "2024-01-15T10:00:00Z")).await.unwrap();
        store.insert(&event("done", 1, "2024-01-15T09:00:00Z")).await.unwrap();
        store.mark_processed("done").await.unwrap();

        let pending = store.unprocessed(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(store.unprocessed(1).await.unwrap().len(), 1);
    }
}
