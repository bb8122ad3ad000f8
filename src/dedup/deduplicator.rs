use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use crate::config::rank_in;
use crate::db::{ClusterMember, ClusterWrite, MergePlan, MergeWrite, Repository, RewriteOutcome};
use crate::error::{AppError, Result};
use crate::models::{EventDraft, MasterEvent};

use super::bucket::{bucket_of, buckets_in_window};
use super::locks::BucketLocks;
use super::matcher::MatchRule;
use super::union_find::UnionFind;

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub event: MasterEvent,
    pub created: bool,
    /// False when merging was a no-op (the draft was already merged as is).
    pub changed: bool,
    pub canonical_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RerunOutcome {
    pub drafts: usize,
    pub clusters: usize,
    pub clusters_rewritten: usize,
    pub rewrite: RewriteOutcome,
}

/// A draft freshly extracted for a batch pass, with the content hash it
/// was extracted from.
#[derive(Debug, Clone)]
pub struct FreshDraft {
    pub draft: EventDraft,
    /// Content hash the draft was read from; `None` keeps the stored
    /// extraction marker as it is.
    pub content_hash: Option<String>,
}

pub struct Deduplicator {
    repository: Arc<Repository>,
    rule: MatchRule,
    source_priority: Vec<String>,
    locks: BucketLocks,
}

/// Arena slot for batch clustering.
struct Slot {
    draft: EventDraft,
    rank: i64,
    content_hash: Option<String>,
    /// Master event and rank the raw post is linked with before this pass.
    linked: Option<(i64, i64)>,
    snapshot_unchanged: bool,
}

impl Deduplicator {
    pub fn new(repository: Arc<Repository>, rule: MatchRule, source_priority: Vec<String>) -> Self {
        Self {
            repository,
            rule,
            source_priority,
            locks: BucketLocks::new(),
        }
    }

    pub fn locks(&self) -> &BucketLocks {
        &self.locks
    }

    pub fn rank(&self, source: &str) -> i64 {
        rank_in(&self.source_priority, source)
    }

    /// Merges one draft into the master event table.
    ///
    /// The bucket locks covering the draft's window are held from candidate
    /// search until the write commits.
    pub async fn merge(&self, draft: EventDraft, content_hash: &str) -> Result<MergeOutcome> {
        // A post that moved to another day is still judged against its current
        // master, so that master's bucket joins the window. It is read under
        // the locks; if it lies outside them, relock with it included.
        let mut buckets = self.window(&draft);
        let (_guard, linked) = loop {
            let guard = self.locks.lock_buckets(&buckets).await;
            let linked = self.repository.link_for_raw_post(draft.raw_post_id).await?;
            let current_bucket = match &linked {
                Some(link) => self
                    .repository
                    .get_master_event(link.master_event_id)
                    .await?
                    .map(|m| m.bucket),
                None => None,
            };
            match current_bucket {
                Some(bucket) if !buckets.contains(&bucket) => {
                    drop(guard);
                    buckets.push(bucket);
                }
                _ => break (guard, linked),
            }
        };

        let candidates = self.repository.masters_in_buckets(buckets).await?;
        let rank = self.rank(&draft.source);

        let target = self.choose_target(&draft, &candidates, linked.as_ref().map(|l| l.master_event_id));
        let plan = match target {
            Some(master_event_id) => MergePlan::Attach {
                master_event_id,
                draft: draft.clone(),
                rank,
                content_hash: content_hash.to_string(),
            },
            None => MergePlan::Create {
                draft: draft.clone(),
                rank,
                content_hash: content_hash.to_string(),
            },
        };

        match self.repository.apply_merge(plan).await? {
            MergeWrite::Applied {
                master_event_id,
                created,
                changed,
                canonical_changed,
            } => {
                let event = self
                    .repository
                    .get_master_event(master_event_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("master event {}", master_event_id)))?;
                if changed {
                    tracing::debug!(
                        raw_post_id = draft.raw_post_id,
                        master_event_id,
                        created,
                        canonical_changed,
                        "Merged draft '{}'",
                        draft.title
                    );
                }
                Ok(MergeOutcome {
                    event,
                    created,
                    changed,
                    canonical_changed,
                })
            }
            MergeWrite::Conflict { existing, attempted } => {
                tracing::error!(
                    raw_post_id = draft.raw_post_id,
                    existing_master_id = existing,
                    attempted_master_id = ?attempted,
                    "Refused merge that would remap raw post; incident logged"
                );
                Err(AppError::Integrity {
                    raw_post_id: draft.raw_post_id,
                    existing,
                    attempted,
                })
            }
        }
    }

    /// Picks the master event a draft belongs to. A raw post already linked
    /// to a matching (or otherwise empty) cluster stays where it is.
    fn choose_target(
        &self,
        draft: &EventDraft,
        candidates: &[MasterEvent],
        linked_to: Option<i64>,
    ) -> Option<i64> {
        let mut best: Option<(f64, i64)> = None;
        for event in candidates {
            let others: Vec<&EventDraft> = event
                .links
                .iter()
                .filter(|l| l.raw_post_id != draft.raw_post_id)
                .map(|l| &l.draft)
                .collect();

            if Some(event.id) == linked_to {
                let stays = others.is_empty() || others.iter().any(|d| self.rule.matches(draft, d));
                if stays {
                    return Some(event.id);
                }
                continue;
            }

            let score = others
                .iter()
                .filter_map(|d| self.rule.score(draft, d))
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
            if let Some(score) = score {
                let better = match best {
                    None => true,
                    Some((best_score, best_id)) => {
                        score > best_score || (score == best_score && event.id < best_id)
                    }
                };
                if better {
                    best = Some((score, event.id));
                }
            }
        }

        // A linked post matching nothing gets a create plan, which the
        // repository refuses as a conflict.
        best.map(|(_, id)| id)
    }

    /// Re-clusters the buckets touched by `sources` from scratch.
    ///
    /// `fresh` holds drafts re-extracted from the sources' raw posts; every
    /// other contributor in the affected buckets is represented by its stored
    /// snapshot. Clustering is the transitive closure of the match rule, so
    /// the result does not depend on processing order.
    pub async fn rerun(
        &self,
        sources: &[String],
        fresh: Vec<FreshDraft>,
        rule: Option<MatchRule>,
    ) -> Result<RerunOutcome> {
        let rule = rule.unwrap_or(self.rule);
        let _guard = self.locks.lock_table().await;

        let mut buckets: BTreeSet<NaiveDate> = BTreeSet::new();
        for day in self.repository.buckets_for_sources(sources.to_vec()).await? {
            if rule.same_day {
                buckets.insert(day);
            } else {
                let spill = rule.max_start_delta.num_days() + 1;
                for offset in -spill..=spill {
                    buckets.insert(day + Duration::days(offset));
                }
            }
        }
        for f in &fresh {
            buckets.extend(buckets_in_window(
                f.draft.start,
                rule.max_start_delta,
                rule.same_day,
                rule.calendar_tz,
            ));
        }

        let masters = self
            .repository
            .masters_in_buckets(buckets.into_iter().collect())
            .await?;

        let mut slots: BTreeMap<i64, Slot> = BTreeMap::new();
        let mut members_of: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for event in &masters {
            for link in &event.links {
                members_of.entry(event.id).or_default().insert(link.raw_post_id);
                slots.insert(
                    link.raw_post_id,
                    Slot {
                        rank: self.rank(&link.source),
                        draft: link.draft.clone(),
                        content_hash: None,
                        linked: Some((event.id, link.priority_rank)),
                        snapshot_unchanged: true,
                    },
                );
            }
        }
        let fresh_ids: BTreeSet<i64> = fresh.iter().map(|f| f.draft.raw_post_id).collect();
        // Links of the selected sources with no current draft leave their clusters.
        let stale: Vec<i64> = slots
            .iter()
            .filter(|(id, slot)| sources.contains(&slot.draft.source) && !fresh_ids.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        let mut affected: BTreeSet<i64> = BTreeSet::new();
        for id in &stale {
            if let Some(Slot { linked: Some((m, _)), .. }) = slots.remove(id) {
                affected.insert(m);
            }
        }

        for f in fresh {
            let rank = self.rank(&f.draft.source);
            match slots.get_mut(&f.draft.raw_post_id) {
                Some(slot) => {
                    slot.snapshot_unchanged = slot.draft.same_fields(&f.draft);
                    slot.draft = f.draft;
                    slot.rank = rank;
                    slot.content_hash = f.content_hash;
                }
                None => {
                    // Linked outside the affected buckets: leave it alone.
                    if let Some(link) = self.repository.link_for_raw_post(f.draft.raw_post_id).await? {
                        tracing::debug!(
                            raw_post_id = link.raw_post_id,
                            master_event_id = link.master_event_id,
                            "Skipping draft linked outside the rerun window"
                        );
                        continue;
                    }
                    slots.insert(
                        f.draft.raw_post_id,
                        Slot {
                            rank,
                            draft: f.draft,
                            content_hash: f.content_hash,
                            linked: None,
                            snapshot_unchanged: false,
                        },
                    );
                }
            }
        }

        // Arena in raw post id order.
        let arena: Vec<Slot> = slots.into_values().collect();
        let mut uf = UnionFind::new(arena.len());

        let mut by_start: Vec<usize> = (0..arena.len()).collect();
        by_start.sort_by_key(|&i| (arena[i].draft.start, arena[i].draft.raw_post_id));
        for (pos, &i) in by_start.iter().enumerate() {
            for &j in &by_start[pos + 1..] {
                if arena[j].draft.start - arena[i].draft.start > rule.max_start_delta {
                    break;
                }
                if rule.matches(&arena[i].draft, &arena[j].draft) {
                    uf.union(i, j);
                }
            }
        }
        let groups = uf.groups();

        let mut claimed: BTreeSet<i64> = BTreeSet::new();
        let mut writes = Vec::new();
        let mut extracted = Vec::new();

        for group in &groups {
            let keeper = group
                .iter()
                .filter_map(|&i| arena[i].linked.map(|(m, _)| m))
                .collect::<BTreeSet<i64>>()
                .into_iter()
                .find(|m| !claimed.contains(m));
            if let Some(keeper) = keeper {
                claimed.insert(keeper);
            }

            let member_ids: BTreeSet<i64> = group.iter().map(|&i| arena[i].draft.raw_post_id).collect();
            let unchanged = match keeper {
                Some(k) => {
                    members_of.get(&k) == Some(&member_ids)
                        && group.iter().all(|&i| {
                            let slot = &arena[i];
                            slot.snapshot_unchanged && slot.linked == Some((k, slot.rank))
                        })
                }
                None => false,
            };

            for &i in group {
                if let Some(hash) = &arena[i].content_hash {
                    extracted.push((arena[i].draft.raw_post_id, hash.clone()));
                }
            }
            if unchanged {
                continue;
            }

            for &i in group {
                if let Some((m, _)) = arena[i].linked {
                    affected.insert(m);
                }
            }
            writes.push(ClusterWrite {
                keeper,
                members: group
                    .iter()
                    .map(|&i| ClusterMember {
                        draft: arena[i].draft.clone(),
                        rank: arena[i].rank,
                    })
                    .collect(),
            });
        }

        let clusters_rewritten = writes.len();
        let rewrite = self
            .repository
            .apply_rewrite(writes, stale, affected.into_iter().collect(), extracted)
            .await?;

        tracing::info!(
            drafts = arena.len(),
            clusters = groups.len(),
            clusters_rewritten,
            events_created = rewrite.events_created,
            events_removed = rewrite.events_removed,
            links_removed = rewrite.links_removed,
            "Deduplication pass complete"
        );

        Ok(RerunOutcome {
            drafts: arena.len(),
            clusters: groups.len(),
            clusters_rewritten,
            rewrite,
        })
    }

    fn window(&self, draft: &EventDraft) -> Vec<NaiveDate> {
        if self.rule.same_day {
            vec![bucket_of(draft.start, self.rule.calendar_tz)]
        } else {
            buckets_in_window(draft.start, self.rule.max_start_delta, false, self.rule.calendar_tz)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::models::NewRawPost;
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Europe::Oslo;

    struct Fixture {
        repo: Arc<Repository>,
        dedup: Deduplicator,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(Repository::new(":memory:", Oslo).await.unwrap());
        let dedup = Deduplicator::new(
            Arc::clone(&repo),
            MatchRule::from_config(&DedupConfig::default()),
            vec!["Navet".to_string(), "Peoply".to_string()],
        );
        Fixture { repo, dedup }
    }

    fn oslo(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Oslo.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap().with_timezone(&Utc)
    }

    impl Fixture {
        async fn post(&self, source: &str, id: &str, fetched_minute: u32) -> i64 {
            self.repo
                .upsert_raw_post(NewRawPost {
                    source: source.to_string(),
                    source_id: id.to_string(),
                    url: None,
                    content: format!("{}-{}", source, id),
                    fetched_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, fetched_minute, 0).unwrap(),
                })
                .await
                .unwrap()
                .id
        }

        async fn draft(&self, source: &str, id: &str, fetched_minute: u32, title: &str, start: DateTime<Utc>) -> EventDraft {
            let raw_post_id = self.post(source, id, fetched_minute).await;
            EventDraft {
                raw_post_id,
                source: source.to_string(),
                fetched_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, fetched_minute, 0).unwrap(),
                title: title.to_string(),
                start,
                timezone: "Europe/Oslo".to_string(),
                end: None,
                location: None,
                organizer: None,
                description: None,
                url: Some(format!("https://{}.example/{}", source.to_lowercase(), id)),
            }
        }
    }

    #[tokio::test]
    async fn career_fair_merges_with_navet_canonical() {
        let f = fixture().await;
        let navet = f.draft("Navet", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let peoply = f.draft("Peoply", "cf", 5, "career fair!!", oslo(10, 14, 30)).await;

        let first = f.dedup.merge(navet, "h1").await.unwrap();
        assert!(first.created);
        let second = f.dedup.merge(peoply, "h2").await.unwrap();
        assert!(!second.created);
        assert!(!second.canonical_changed);
        assert_eq!(first.event.id, second.event.id);

        let event = second.event;
        assert_eq!(event.links.len(), 2);
        assert_eq!(event.canonical_link().unwrap().source, "Navet");
        assert_eq!(event.title, "Career Fair");
    }

    #[tokio::test]
    async fn canonical_is_priority_regardless_of_arrival() {
        let f = fixture().await;
        let navet = f.draft("Navet", "cf", 30, "Career Fair", oslo(10, 14, 0)).await;
        let peoply = f.draft("Peoply", "cf", 0, "career fair!!", oslo(10, 14, 30)).await;

        let first = f.dedup.merge(peoply, "h").await.unwrap();
        assert_eq!(first.event.title, "career fair!!");
        let second = f.dedup.merge(navet, "h").await.unwrap();
        assert!(second.canonical_changed);
        assert_eq!(second.event.canonical_link().unwrap().source, "Navet");
        assert_eq!(second.event.title, "Career Fair");
        assert_eq!(second.event.start, oslo(10, 14, 0));
        assert_eq!(
            second.event.links.iter().filter(|l| l.is_canonical).count(),
            1
        );
    }

    #[tokio::test]
    async fn different_titles_stay_separate() {
        let f = fixture().await;
        let fair = f.draft("Navet", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let games = f.draft("Peoply", "bg", 0, "Board Game Night", oslo(10, 20, 0)).await;

        let a = f.dedup.merge(fair, "h").await.unwrap();
        let b = f.dedup.merge(games, "h").await.unwrap();
        assert_ne!(a.event.id, b.event.id);
        assert_eq!(f.repo.list_master_events(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn merging_twice_changes_nothing() {
        let f = fixture().await;
        let navet = f.draft("Navet", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let first = f.dedup.merge(navet.clone(), "h").await.unwrap();
        let second = f.dedup.merge(navet, "h").await.unwrap();

        assert!(!second.changed);
        assert_eq!(first.event.id, second.event.id);
        assert_eq!(first.event.updated_at, second.event.updated_at);
        assert_eq!(second.event.links.len(), 1);
        assert!(f.repo.incidents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remapping_a_linked_post_is_refused() {
        let f = fixture().await;
        let navet = f.draft("Navet", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let peoply = f.draft("Peoply", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let original = f.dedup.merge(navet, "h").await.unwrap();
        f.dedup.merge(peoply.clone(), "h").await.unwrap();

        // The Peoply post is edited into something else entirely.
        let mut edited = peoply.clone();
        edited.title = "Board Game Night".to_string();
        let err = f.dedup.merge(edited, "h2").await.unwrap_err();
        assert!(matches!(err, AppError::Integrity { existing, .. } if existing == original.event.id));

        let link = f.repo.link_for_raw_post(peoply.raw_post_id).await.unwrap().unwrap();
        assert_eq!(link.master_event_id, original.event.id);
        assert_eq!(link.draft.title, "Career Fair");
        assert_eq!(f.repo.incidents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rescheduled_sole_post_stays_with_its_master() {
        let f = fixture().await;
        let quiz = f.draft("Peoply", "quiz", 0, "Quiz night", oslo(10, 19, 0)).await;
        let original = f.dedup.merge(quiz.clone(), "h").await.unwrap();

        // Moved a week ahead: the old master's bucket lies outside the new window.
        let mut moved = quiz;
        moved.start = oslo(17, 19, 0);
        let outcome = f.dedup.merge(moved, "h2").await.unwrap();
        assert_eq!(outcome.event.id, original.event.id);
        assert_eq!(outcome.event.start, oslo(17, 19, 0));
        assert!(f.repo.incidents().await.unwrap().is_empty());
        assert_eq!(f.repo.list_master_events(None).await.unwrap().len(), 1);
    }

    async fn cluster_signature(repo: &Repository) -> Vec<Vec<i64>> {
        let mut clusters: Vec<Vec<i64>> = repo
            .list_master_events(None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| {
                let mut ids: Vec<i64> = e.links.iter().map(|l| l.raw_post_id).collect();
                ids.sort();
                ids
            })
            .collect();
        clusters.sort();
        clusters
    }

    #[tokio::test]
    async fn rerun_clusters_transitively_in_any_order() {
        // A-B and B-C are within two hours, A-C is not.
        let mut signatures = Vec::new();
        for order in [[0usize, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
            let f = fixture().await;
            let drafts = vec![
                f.draft("Navet", "a", 0, "Hackathon", oslo(10, 10, 0)).await,
                f.draft("Peoply", "b", 0, "Hackathon!", oslo(10, 11, 30)).await,
                f.draft("Facebook", "c", 0, "hackathon", oslo(10, 13, 0)).await,
                f.draft("Peoply", "d", 0, "Quiz", oslo(10, 11, 0)).await,
            ];
            let fresh: Vec<FreshDraft> = order
                .iter()
                .map(|&i| FreshDraft {
                    draft: drafts[i].clone(),
                    content_hash: Some("h".to_string()),
                })
                .collect();

            let sources = vec!["Navet".to_string(), "Peoply".to_string(), "Facebook".to_string()];
            let outcome = f.dedup.rerun(&sources, fresh, None).await.unwrap();
            assert_eq!(outcome.drafts, 4);
            assert_eq!(outcome.clusters, 2);

            let sig = cluster_signature(&f.repo).await;
            let hackathon = f
                .repo
                .list_master_events(Some("Facebook".to_string()))
                .await
                .unwrap();
            assert_eq!(hackathon.len(), 1);
            assert_eq!(hackathon[0].canonical_link().unwrap().source, "Navet");
            signatures.push(sig);
        }
        assert_eq!(signatures[0], vec![vec![1, 2, 3], vec![4]]);
        assert!(signatures.iter().all(|s| *s == signatures[0]));
    }

    #[tokio::test]
    async fn rerun_consolidates_incremental_fragments_and_is_idempotent() {
        let f = fixture().await;
        let a = f.draft("Navet", "a", 0, "Hackathon", oslo(10, 10, 0)).await;
        let c = f.draft("Facebook", "c", 0, "hackathon", oslo(10, 13, 0)).await;
        let b = f.draft("Peoply", "b", 0, "Hackathon!", oslo(10, 11, 30)).await;

        // Incrementally A and C land apart; B then joins one of them.
        let ea = f.dedup.merge(a.clone(), "h").await.unwrap().event.id;
        let ec = f.dedup.merge(c.clone(), "h").await.unwrap().event.id;
        assert_ne!(ea, ec);
        f.dedup.merge(b.clone(), "h").await.unwrap();
        assert_eq!(f.repo.list_master_events(None).await.unwrap().len(), 2);

        let sources = vec!["Navet".to_string()];
        let fresh = vec![FreshDraft {
            draft: a.clone(),
            content_hash: Some("h".to_string()),
        }];
        let outcome = f.dedup.rerun(&sources, fresh.clone(), None).await.unwrap();
        assert_eq!(outcome.rewrite.events_removed, 1);

        let events = f.repo.list_master_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, ea.min(ec));
        assert_eq!(events[0].links.len(), 3);
        let before = events[0].updated_at;

        let again = f.dedup.rerun(&sources, fresh, None).await.unwrap();
        assert_eq!(again.clusters_rewritten, 0);
        let after = f.repo.get_master_event(events[0].id).await.unwrap().unwrap();
        assert_eq!(after.updated_at, before);
    }

    #[tokio::test]
    async fn generic_title_does_not_bridge_distinct_events() {
        let f = fixture().await;
        let drafts = vec![
            f.draft("Navet", "bekk", 0, "Bedpres: Bekk", oslo(13, 17, 15)).await,
            f.draft("Navet", "netcompany", 0, "Bedpres: Netcompany", oslo(13, 17, 15)).await,
            f.draft("Peoply", "generic", 0, "Bedpres", oslo(13, 17, 15)).await,
        ];
        let fresh = drafts
            .into_iter()
            .map(|draft| FreshDraft {
                draft,
                content_hash: Some("h".to_string()),
            })
            .collect();

        let sources = vec!["Navet".to_string(), "Peoply".to_string()];
        let outcome = f.dedup.rerun(&sources, fresh, None).await.unwrap();
        assert_eq!(outcome.clusters, 3);
        assert_eq!(cluster_signature(&f.repo).await, vec![vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn rerun_drops_links_without_a_current_draft() {
        let f = fixture().await;
        let navet = f.draft("Navet", "cf", 0, "Career Fair", oslo(10, 14, 0)).await;
        let peoply = f.draft("Peoply", "cf", 0, "career fair!!", oslo(10, 14, 30)).await;
        let quiz = f.draft("Peoply", "quiz", 0, "Quiz", oslo(10, 19, 0)).await;
        let fair = f.dedup.merge(navet.clone(), "h").await.unwrap().event.id;
        f.dedup.merge(peoply, "h").await.unwrap();
        f.dedup.merge(quiz, "h").await.unwrap();

        // Only the Navet post still yields a draft.
        let sources = vec!["Navet".to_string(), "Peoply".to_string()];
        let fresh = vec![FreshDraft {
            draft: navet,
            content_hash: Some("h".to_string()),
        }];
        let outcome = f.dedup.rerun(&sources, fresh.clone(), None).await.unwrap();
        assert_eq!(outcome.rewrite.links_removed, 2);
        assert_eq!(outcome.rewrite.events_removed, 1);

        let events = f.repo.list_master_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, fair);
        assert_eq!(events[0].links.len(), 1);
        assert_eq!(events[0].links[0].source, "Navet");

        let again = f.dedup.rerun(&sources, fresh, None).await.unwrap();
        assert_eq!(again.rewrite.links_removed, 0);
        assert_eq!(again.clusters_rewritten, 0);
    }
}
