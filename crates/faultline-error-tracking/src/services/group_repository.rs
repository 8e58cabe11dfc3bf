//! Error groups keyed by `(project_id, fingerprint_hash)`.
//!
//! At most one group exists per key. Creation either holds a row lock or
//! relies on the unique index and recovers from the violation; callers only
//! see the tagged [`FindOrCreate`] outcome.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use faultline_ai::ErrorAnalysis;
use faultline_core::UtcDateTime;
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{
    CreateGroupError, ErrorGroup, ErrorTrackingError, FindOrCreate, GroupFilter, GroupStats,
    GroupStatus, MetadataPatch, NewErrorGroup,
};

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn find_by_fingerprint(
        &self,
        project_id: i32,
        fingerprint_hash: &str,
    ) -> Result<Option<ErrorGroup>, ErrorTrackingError>;

    async fn get(&self, project_id: i32, group_id: i32) -> Result<ErrorGroup, ErrorTrackingError>;

    /// Fails with [`CreateGroupError::AlreadyExists`] when the key is taken
    async fn create_group(&self, group: NewErrorGroup) -> Result<ErrorGroup, CreateGroupError>;

    /// Sets `last_seen = max(last_seen, seen_at)`
    async fn update_last_seen(
        &self,
        group_id: i32,
        seen_at: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError>;

    async fn update_statistics(
        &self,
        group_id: i32,
        stats: &GroupStats,
        now: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError>;

    async fn merge_metadata(
        &self,
        group_id: i32,
        patch: MetadataPatch,
    ) -> Result<ErrorGroup, ErrorTrackingError>;

    /// Stores the summary and the analysis bookkeeping in one write
    async fn record_analysis(
        &self,
        group_id: i32,
        analysis: &ErrorAnalysis,
        analyzed_at: UtcDateTime,
        event_count: i64,
    ) -> Result<ErrorGroup, ErrorTrackingError>;

    async fn list_groups(
        &self,
        filter: &GroupFilter,
    ) -> Result<(Vec<ErrorGroup>, u64), ErrorTrackingError>;

    async fn update_status(
        &self,
        project_id: i32,
        group_id: i32,
        status: GroupStatus,
    ) -> Result<ErrorGroup, ErrorTrackingError>;

    /// Create-or-recover: insert first, and on a unique violation re-read the
    /// row the concurrent winner created.
    async fn find_or_create(
        &self,
        group: NewErrorGroup,
        seen_at: UtcDateTime,
    ) -> Result<FindOrCreate, ErrorTrackingError> {
        if let Some(existing) = self
            .find_by_fingerprint(group.project_id, &group.fingerprint_hash)
            .await?
        {
            let updated = self.update_last_seen(existing.id, seen_at).await?;
            return Ok(FindOrCreate::Found(updated));
        }

        let project_id = group.project_id;
        let fingerprint_hash = group.fingerprint_hash.clone();
        match self.create_group(group).await {
            Ok(created) => Ok(FindOrCreate::Created(created)),
            Err(CreateGroupError::AlreadyExists) => {
                debug!(
                    project_id,
                    fingerprint_hash = %fingerprint_hash,
                    "Lost group creation race, re-reading"
                );
                let existing = self
                    .find_by_fingerprint(project_id, &fingerprint_hash)
                    .await?
                    .ok_or(ErrorTrackingError::GroupNotFound)?;
                let updated = self.update_last_seen(existing.id, seen_at).await?;
                Ok(FindOrCreate::ConflictRetried(updated))
            }
            Err(CreateGroupError::Other(e)) => Err(e),
        }
    }
}

/// Orders groups for listing; unknown sort keys fall back to `last_seen`
pub(crate) fn sort_groups(groups: &mut [ErrorGroup], sort_by: Option<&str>, ascending: bool) {
    groups.sort_by(|a, b| {
        let ordering = match sort_by.unwrap_or("last_seen") {
            "first_seen" => a.first_seen.cmp(&b.first_seen),
            "event_count" => a.event_count.cmp(&b.event_count),
            "created_at" => a.created_at.cmp(&b.created_at),
            _ => a.last_seen.cmp(&b.last_seen),
        };
        let ordering = if ascending { ordering } else { ordering.reverse() };
        ordering.then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Default)]
struct State {
    next_id: i32,
    groups: BTreeMap<i32, ErrorGroup>,
}

/// Process-local repository; the mutex stands in for the unique index
#[derive(Default)]
pub struct InMemoryGroupRepository {
    state: Mutex<State>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<ErrorGroup> {
        self.state.lock().await.groups.values().cloned().collect()
    }

    async fn update<F>(&self, group_id: i32, apply: F) -> Result<ErrorGroup, ErrorTrackingError>
    where
        F: FnOnce(&mut ErrorGroup) + Send,
    {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or(ErrorTrackingError::GroupNotFound)?;
        apply(group);
        Ok(group.clone())
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn find_by_fingerprint(
        &self,
        project_id: i32,
        fingerprint_hash: &str,
    ) -> Result<Option<ErrorGroup>, ErrorTrackingError> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .values()
            .find(|g| g.project_id == project_id && g.fingerprint_hash == fingerprint_hash)
            .cloned())
    }

    async fn get(&self, project_id: i32, group_id: i32) -> Result<ErrorGroup, ErrorTrackingError> {
        let state = self.state.lock().await;
        state
            .groups
            .get(&group_id)
            .filter(|g| g.project_id == project_id)
            .cloned()
            .ok_or(ErrorTrackingError::GroupNotFound)
    }

    async fn create_group(&self, group: NewErrorGroup) -> Result<ErrorGroup, CreateGroupError> {
        let mut state = self.state.lock().await;
        let taken = state.groups.values().any(|g| {
            g.project_id == group.project_id && g.fingerprint_hash == group.fingerprint_hash
        });
        if taken {
            return Err(CreateGroupError::AlreadyExists);
        }

        state.next_id += 1;
        let created = group.into_group(state.next_id, Utc::now());
        state.groups.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_last_seen(
        &self,
        group_id: i32,
        seen_at: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let now = Utc::now();
        self.update(group_id, |g| g.touch(seen_at, now)).await
    }

    async fn update_statistics(
        &self,
        group_id: i32,
        stats: &GroupStats,
        now: UtcDateTime,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let stats = *stats;
        self.update(group_id, |g| g.apply_stats(&stats, now)).await
    }

    async fn merge_metadata(
        &self,
        group_id: i32,
        patch: MetadataPatch,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let now = Utc::now();
        self.update(group_id, |g| {
            g.metadata.apply(patch);
            g.updated_at = now;
        })
        .await
    }

    async fn record_analysis(
        &self,
        group_id: i32,
        analysis: &ErrorAnalysis,
        analyzed_at: UtcDateTime,
        event_count: i64,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let analysis = analysis.clone();
        self.update(group_id, |g| g.apply_analysis(&analysis, analyzed_at, event_count))
            .await
    }

    async fn list_groups(
        &self,
        filter: &GroupFilter,
    ) -> Result<(Vec<ErrorGroup>, u64), ErrorTrackingError> {
        let state = self.state.lock().await;
        let mut groups: Vec<ErrorGroup> = state
            .groups
            .values()
            .filter(|g| g.project_id == filter.project_id)
            .filter(|g| filter.status.map_or(true, |s| g.status == s))
            .cloned()
            .collect();
        sort_groups(&mut groups, filter.sort_by.as_deref(), filter.ascending);

        let total = groups.len() as u64;
        let page = groups
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn update_status(
        &self,
        project_id: i32,
        group_id: i32,
        status: GroupStatus,
    ) -> Result<ErrorGroup, ErrorTrackingError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .get_mut(&group_id)
            .filter(|g| g.project_id == project_id)
            .ok_or(ErrorTrackingError::GroupNotFound)?;
        group.status = status;
        group.updated_at = now;
        Ok(group.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::types::GroupOutcome;
    use faultline_core::parse_timestamp_str;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn seed(project_id: i32, hash: &str, first_seen: &str) -> NewErrorGroup {
        NewErrorGroup {
            project_id,
            fingerprint_hash: hash.to_string(),
            fingerprint: vec!["TypeError".to_string(), "boom".to_string()],
            title: "TypeError: boom".to_string(),
            error_type: "TypeError".to_string(),
            message: "boom".to_string(),
            platform: "javascript".to_string(),
            first_seen: parse_timestamp_str(first_seen).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_find_or_create_created_then_found() {
        let repo = InMemoryGroupRepository::new();
        let first = repo
            .find_or_create(seed(1, "h", "2024-01-15T10:00:00Z"), parse_timestamp_str("2024-01-15T10:00:00Z").unwrap())
            .await
            .unwrap();
        assert_eq!(first.kind(), GroupOutcome::Created);
        assert_eq!(first.group().status, GroupStatus::Unresolved);

        let later = parse_timestamp_str("2024-01-15T12:00:00Z").unwrap();
        let second = repo
            .find_or_create(seed(1, "h", "2024-01-15T12:00:00Z"), later)
            .await
            .unwrap();
        assert_eq!(second.kind(), GroupOutcome::Found);
        assert_eq!(second.group().id, first.group().id);
        assert_eq!(second.group().last_seen, later);
        assert_eq!(
            second.group().first_seen,
            parse_timestamp_str("2024-01-15T10:00:00Z").unwrap()
        );
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_backwards() {
        let repo = InMemoryGroupRepository::new();
        let created = repo
            .create_group(seed(1, "h", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();
        let late = parse_timestamp_str("2024-01-15T12:00:00Z").unwrap();
        repo.update_last_seen(created.id, late).await.unwrap();
        let group = repo
            .update_last_seen(created.id, parse_timestamp_str("2024-01-15T11:00:00Z").unwrap())
            .await
            .unwrap();
        assert_eq!(group.last_seen, late);
    }

    #[tokio::test]
    async fn test_same_hash_in_other_project_is_separate() {
        let repo = InMemoryGroupRepository::new();
        let a = repo.create_group(seed(1, "h", "2024-01-15T10:00:00Z")).await.unwrap();
        let b = repo.create_group(seed(2, "h", "2024-01-15T10:00:00Z")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(matches!(
            repo.create_group(seed(1, "h", "2024-01-15T10:00:00Z")).await,
            Err(CreateGroupError::AlreadyExists)
        ));
    }

    /// Hides the first lookup so the insert hits the existing row
    struct RacingRepository {
        inner: InMemoryGroupRepository,
        hidden: AtomicBool,
    }

    #[async_trait]
    impl GroupRepository for RacingRepository {
        async fn find_by_fingerprint(
            &self,
            project_id: i32,
            fingerprint_hash: &str,
        ) -> Result<Option<ErrorGroup>, ErrorTrackingError> {
            if self.hidden.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_by_fingerprint(project_id, fingerprint_hash).await
        }
        async fn get(&self, project_id: i32, group_id: i32) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.get(project_id, group_id).await
        }
        async fn create_group(&self, group: NewErrorGroup) -> Result<ErrorGroup, CreateGroupError> {
            self.inner.create_group(group).await
        }
        async fn update_last_seen(&self, group_id: i32, seen_at: UtcDateTime) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.update_last_seen(group_id, seen_at).await
        }
        async fn update_statistics(&self, group_id: i32, stats: &GroupStats, now: UtcDateTime) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.update_statistics(group_id, stats, now).await
        }
        async fn merge_metadata(&self, group_id: i32, patch: MetadataPatch) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.merge_metadata(group_id, patch).await
        }
        async fn record_analysis(&self, group_id: i32, analysis: &ErrorAnalysis, analyzed_at: UtcDateTime, event_count: i64) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.record_analysis(group_id, analysis, analyzed_at, event_count).await
        }
        async fn list_groups(&self, filter: &GroupFilter) -> Result<(Vec<ErrorGroup>, u64), ErrorTrackingError> {
            self.inner.list_groups(filter).await
        }
        async fn update_status(&self, project_id: i32, group_id: i32, status: GroupStatus) -> Result<ErrorGroup, ErrorTrackingError> {
            self.inner.update_status(project_id, group_id, status).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_as_found_row() {
        let repo = RacingRepository {
            inner: InMemoryGroupRepository::new(),
            hidden: AtomicBool::new(false),
        };
        let winner = repo
            .create_group(seed(1, "h", "2024-01-15T10:00:00Z"))
            .await
            .unwrap();

        repo.hidden.store(true, Ordering::SeqCst);
        let outcome = repo
            .find_or_create(
                seed(1, "h", "2024-01-15T10:01:00Z"),
                parse_timestamp_str("2024-01-15T10:01:00Z").unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.kind(), GroupOutcome::ConflictRetried);
        assert_eq!(outcome.group().id, winner.id);
    }

    #[tokio::test]
    async fn test_concurrent_find_or_create_converges() {
        let repo = Arc::new(InMemoryGroupRepository::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.find_or_create(
                    seed(1, "same", "2024-01-15T10:00:00Z"),
                    parse_timestamp_str("2024-01-15T10:00:00Z").unwrap(),
                )
                .await
                .unwrap()
            }));
        }

        let mut created = 0;
        let mut ids = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            if outcome.is_created() {
                created += 1;
            }
            ids.push(outcome.group().id);
        }
        assert_eq!(created, 1);
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_groups_filters_and_sorts() {
        let repo = InMemoryGroupRepository::new();
        let a = repo.create_group(seed(1, "a", "2024-01-15T10:00:00Z")).await.unwrap();
        let b = repo.create_group(seed(1, "b", "2024-01-15T11:00:00Z")).await.unwrap();
        repo.create_group(seed(2, "c", "2024-01-15T12:00:00Z")).await.unwrap();
        repo.update_status(1, a.id, GroupStatus::Resolved).await.unwrap();

        let (groups, total) = repo
            .list_groups(&GroupFilter {
                project_id: 1,
                page: 1,
                page_size: 20,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(groups[0].id, b.id);

        let (groups, total) = repo
            .list_groups(&GroupFilter {
                project_id: 1,
                status: Some(GroupStatus::Resolved),
                page: 1,
                page_size: 20,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(groups[0].id, a.id);

        assert!(matches!(
            repo.update_status(2, a.id, GroupStatus::Ignored).await,
            Err(ErrorTrackingError::GroupNotFound)
        ));
    }

    #[tokio::test]
    async fn test_merge_metadata_keeps_siblings() {
        let repo = InMemoryGroupRepository::new();
        let group = repo.create_group(seed(1, "a", "2024-01-15T10:00:00Z")).await.unwrap();
        let now = parse_timestamp_str("2024-01-15T13:00:00Z").unwrap();

        repo.update_statistics(
            group.id,
            &GroupStats {
                event_count: 5,
                user_count: 2,
                count_24h: 5,
                count_7d: 5,
                count_30d: 5,
            },
            now,
        )
        .await
        .unwrap();
        let updated = repo
            .merge_metadata(
                group.id,
                MetadataPatch::Extra {
                    key: "owner".to_string(),
                    value: serde_json::json!("payments"),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.event_count, 5);
        assert_eq!(updated.metadata.stats.unwrap().count_24h, 5);
        assert_eq!(updated.metadata.extra["owner"], "payments");
    }

    #[tokio::test]
    async fn test_stale_statistics_never_lower_counts() {
        let repo = InMemoryGroupRepository::new();
        let group = repo.create_group(seed(1, "a", "2024-01-15T10:00:00Z")).await.unwrap();
        let now = parse_timestamp_str("2024-01-15T13:00:00Z").unwrap();
        let stats = |count| GroupStats {
            event_count: count,
            user_count: count,
            count_24h: count,
            count_7d: count,
            count_30d: count,
        };

        repo.update_statistics(group.id, &stats(2), now).await.unwrap();
        let updated = repo.update_statistics(group.id, &stats(1), now).await.unwrap();

        assert_eq!(updated.event_count, 2);
        assert_eq!(updated.user_count, 2);
        assert_eq!(updated.metadata.stats.unwrap().count_24h, 2);
    }
}
