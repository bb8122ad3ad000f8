use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection as SqlConnection, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::dedup::{bucket_of, canonical_index, CanonicalKey};
use crate::error::Result;
use crate::models::{Classification, EventDraft, EventStatus, MasterEvent, NewRawPost, RawPost, SourceLink};

use super::schema::SCHEMA;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPostUpsert {
    pub id: i64,
    pub inserted: bool,
    pub content_changed: bool,
}

/// A single-draft write decided by the deduplicator.
#[derive(Debug, Clone)]
pub enum MergePlan {
    Create {
        draft: EventDraft,
        rank: i64,
        content_hash: String,
    },
    Attach {
        master_event_id: i64,
        draft: EventDraft,
        rank: i64,
        content_hash: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeWrite {
    Applied {
        master_event_id: i64,
        created: bool,
        /// False when the write was a no-op re-merge.
        changed: bool,
        canonical_changed: bool,
    },
    /// The raw post is already linked elsewhere; nothing was written
    /// besides an incident row.
    Conflict { existing: i64, attempted: Option<i64> },
}

/// One cluster of a batch deduplication pass.
#[derive(Debug, Clone)]
pub struct ClusterWrite {
    /// Existing master event that keeps its id, or `None` to create one.
    pub keeper: Option<i64>,
    pub members: Vec<ClusterMember>,
}

#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub draft: EventDraft,
    pub rank: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub events_created: usize,
    pub events_removed: usize,
    pub links_written: usize,
    pub links_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearOutcome {
    pub links_removed: usize,
    pub events_removed: usize,
}

#[derive(Debug, Clone)]
pub struct IntegrityIncident {
    pub id: i64,
    pub raw_post_id: i64,
    pub existing_master_id: i64,
    pub attempted_master_id: Option<i64>,
    pub detail: String,
    pub logged_at: DateTime<Utc>,
}

pub struct Repository {
    conn: Connection,
    calendar_tz: Tz,
}

const RAW_POST_COLUMNS: &str = "id, source, source_id, url, content, content_hash, fetched_at, \
     last_seen_at, status, confidence, evidence, classified_hash, extracted_hash, review_reason";

const MASTER_COLUMNS: &str = "m.id, m.title, m.start_utc, m.timezone, m.end_utc, m.location, \
     m.organizer, m.description, m.url, m.bucket, m.created_at, m.updated_at";

impl Repository {
    pub async fn new(db_path: &str, calendar_tz: Tz) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, calendar_tz })
    }

    // Raw post operations

    pub async fn upsert_raw_post(&self, post: NewRawPost) -> Result<RawPostUpsert> {
        let hash = post.content_hash();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = fmt_ts(Utc::now());
                let existing: Option<(i64, String)> = tx
                    .query_row(
                        "SELECT id, content_hash FROM raw_posts WHERE source = ?1 AND source_id = ?2",
                        params![post.source, post.source_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                let outcome = match existing {
                    None => {
                        tx.execute(
                            r#"INSERT INTO raw_posts (source, source_id, url, content, content_hash, fetched_at, last_seen_at)
                               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                            params![
                                post.source,
                                post.source_id,
                                post.url,
                                post.content,
                                hash,
                                fmt_ts(post.fetched_at),
                                now,
                            ],
                        )?;
                        RawPostUpsert {
                            id: tx.last_insert_rowid(),
                            inserted: true,
                            content_changed: true,
                        }
                    }
                    Some((id, old_hash)) if old_hash == hash => {
                        tx.execute(
                            "UPDATE raw_posts SET last_seen_at = ?1 WHERE id = ?2",
                            params![now, id],
                        )?;
                        RawPostUpsert {
                            id,
                            inserted: false,
                            content_changed: false,
                        }
                    }
                    Some((id, _)) => {
                        // Prior status stays for audit; the hash mismatch queues reclassification.
                        tx.execute(
                            r#"UPDATE raw_posts SET url = ?1, content = ?2, content_hash = ?3,
                                   last_seen_at = ?4, review_reason = NULL
                               WHERE id = ?5"#,
                            params![post.url, post.content, hash, now, id],
                        )?;
                        RawPostUpsert {
                            id,
                            inserted: false,
                            content_changed: true,
                        }
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }

    /// Posts never classified, still pending, or changed since classification.
    pub async fn posts_to_classify(&self, source: Option<String>) -> Result<Vec<RawPost>> {
        self.query_raw_posts(
            r#"(status IS NULL OR status = 'contains-event'
                OR classified_hash IS NULL OR classified_hash != content_hash)"#,
            source,
        )
        .await
    }

    /// Confirmed events whose current content has not been merged or flagged.
    pub async fn posts_to_merge(&self, source: Option<String>) -> Result<Vec<RawPost>> {
        self.query_raw_posts(
            r#"status = 'is-event-llm' AND classified_hash = content_hash
               AND (extracted_hash IS NULL OR extracted_hash != content_hash)"#,
            source,
        )
        .await
    }

    /// All confirmed events of a source with a current classification.
    pub async fn event_posts(&self, source: String) -> Result<Vec<RawPost>> {
        self.query_raw_posts(
            "status = 'is-event-llm' AND classified_hash = content_hash",
            Some(source),
        )
        .await
    }

    pub async fn flagged_posts(&self) -> Result<Vec<RawPost>> {
        self.query_raw_posts("review_reason IS NOT NULL", None).await
    }

    async fn query_raw_posts(
        &self,
        condition: &'static str,
        source: Option<String>,
    ) -> Result<Vec<RawPost>> {
        let posts = self
            .conn
            .call(move |conn| {
                let mut sql = format!("SELECT {} FROM raw_posts WHERE {}", RAW_POST_COLUMNS, condition);
                if source.is_some() {
                    sql.push_str(" AND source = ?1");
                }
                sql.push_str(" ORDER BY id");
                let mut stmt = conn.prepare(&sql)?;
                let posts = match &source {
                    Some(source) => stmt
                        .query_map(params![source], raw_post_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                    None => stmt
                        .query_map([], raw_post_from_row)?
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                };
                Ok(posts)
            })
            .await?;
        Ok(posts)
    }

    pub async fn save_classification(
        &self,
        id: i64,
        classification: Classification,
        content_hash: String,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE raw_posts SET status = ?1, confidence = ?2, evidence = ?3, classified_hash = ?4
                       WHERE id = ?5"#,
                    params![
                        classification.status.as_str(),
                        classification.confidence,
                        classification.evidence,
                        content_hash,
                        id
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Marks a post for manual review; it is not retried until its content changes.
    pub async fn flag_for_review(&self, id: i64, reason: String, content_hash: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE raw_posts SET review_reason = ?1, extracted_hash = ?2 WHERE id = ?3",
                    params![reason, content_hash, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Master event operations

    pub async fn link_for_raw_post(&self, raw_post_id: i64) -> Result<Option<SourceLink>> {
        let link = self
            .conn
            .call(move |conn| {
                let link = conn
                    .query_row(
                        r#"SELECT id, master_event_id, raw_post_id, source, priority_rank, is_canonical,
                                  fetched_at, draft_json
                           FROM source_links WHERE raw_post_id = ?1"#,
                        params![raw_post_id],
                        link_from_row,
                    )
                    .optional()?;
                Ok(link)
            })
            .await?;
        Ok(link)
    }

    /// Candidate lookup through the bucket index.
    pub async fn masters_in_buckets(&self, buckets: Vec<NaiveDate>) -> Result<Vec<MasterEvent>> {
        if buckets.is_empty() {
            return Ok(Vec::new());
        }
        let events = self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; buckets.len()].join(", ");
                let sql = format!(
                    "SELECT {} FROM master_events m WHERE m.bucket IN ({}) ORDER BY m.id",
                    MASTER_COLUMNS, placeholders
                );
                let keys: Vec<String> = buckets.iter().map(fmt_bucket).collect();
                let events = load_masters(conn, &sql, params_from_iter(keys.iter()))?;
                Ok(events)
            })
            .await?;
        Ok(events)
    }

    /// Buckets occupied by master events that have a link from any of `sources`.
    pub async fn buckets_for_sources(&self, sources: Vec<String>) -> Result<Vec<NaiveDate>> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let buckets = self
            .conn
            .call(move |conn| {
                let placeholders = vec!["?"; sources.len()].join(", ");
                let sql = format!(
                    r#"SELECT DISTINCT m.bucket FROM master_events m
                       JOIN source_links l ON l.master_event_id = m.id
                       WHERE l.source IN ({}) ORDER BY m.bucket"#,
                    placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let buckets = stmt
                    .query_map(params_from_iter(sources.iter()), |row| {
                        let s: String = row.get(0)?;
                        parse_bucket(&s, 0)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(buckets)
            })
            .await?;
        Ok(buckets)
    }

    pub async fn apply_merge(&self, plan: MergePlan) -> Result<MergeWrite> {
        let tz = self.calendar_tz;
        let (draft, rank, content_hash, target) = match plan {
            MergePlan::Create {
                draft,
                rank,
                content_hash,
            } => (draft, rank, content_hash, None),
            MergePlan::Attach {
                master_event_id,
                draft,
                rank,
                content_hash,
            } => (draft, rank, content_hash, Some(master_event_id)),
        };
        let draft_json = serde_json::to_string(&draft)?;

        let write = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<(i64, i64, String)> = tx
                    .query_row(
                        "SELECT id, master_event_id, draft_json FROM source_links WHERE raw_post_id = ?1",
                        params![draft.raw_post_id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let write = match (existing, target) {
                    (Some((_, existing_master, _)), attempted) if attempted != Some(existing_master) => {
                        tx.execute(
                            r#"INSERT INTO integrity_incidents (raw_post_id, existing_master_id, attempted_master_id, detail)
                               VALUES (?1, ?2, ?3, ?4)"#,
                            params![
                                draft.raw_post_id,
                                existing_master,
                                attempted,
                                format!(
                                    "draft '{}' from {} no longer matches its master event",
                                    draft.title, draft.source
                                )
                            ],
                        )?;
                        MergeWrite::Conflict {
                            existing: existing_master,
                            attempted,
                        }
                    }
                    (Some((link_id, master_id, old_json)), _) => {
                        let changed = old_json != draft_json;
                        let mut canonical_changed = false;
                        if changed {
                            tx.execute(
                                "UPDATE source_links SET draft_json = ?1, priority_rank = ?2 WHERE id = ?3",
                                params![draft_json, rank, link_id],
                            )?;
                            canonical_changed = recanonicalize(&tx, master_id, tz, true)?;
                        }
                        MergeWrite::Applied {
                            master_event_id: master_id,
                            created: false,
                            changed,
                            canonical_changed,
                        }
                    }
                    (None, None) => {
                        let master_id = insert_master(&tx, &draft, tz)?;
                        insert_link(&tx, master_id, &draft, rank, &draft_json, true)?;
                        MergeWrite::Applied {
                            master_event_id: master_id,
                            created: true,
                            changed: true,
                            canonical_changed: true,
                        }
                    }
                    (None, Some(master_id)) => {
                        insert_link(&tx, master_id, &draft, rank, &draft_json, false)?;
                        let canonical_changed = recanonicalize(&tx, master_id, tz, false)?;
                        MergeWrite::Applied {
                            master_event_id: master_id,
                            created: false,
                            changed: true,
                            canonical_changed,
                        }
                    }
                };

                // A refused draft is consumed too: the same content logs one incident.
                let sql = match write {
                    MergeWrite::Applied { .. } => {
                        "UPDATE raw_posts SET extracted_hash = ?1, review_reason = NULL WHERE id = ?2"
                    }
                    MergeWrite::Conflict { .. } => "UPDATE raw_posts SET extracted_hash = ?1 WHERE id = ?2",
                };
                tx.execute(sql, params![content_hash, draft.raw_post_id])?;
                tx.commit()?;
                Ok(write)
            })
            .await?;
        Ok(write)
    }

    /// Rewrites a set of clusters in one transaction. `stale` raw posts lose
    /// their links and are re-queued unless flagged. Master events in
    /// `affected` that end up without links are removed; `extracted` lists
    /// raw posts whose current content was consumed by this pass.
    pub async fn apply_rewrite(
        &self,
        clusters: Vec<ClusterWrite>,
        stale: Vec<i64>,
        affected: Vec<i64>,
        extracted: Vec<(i64, String)>,
    ) -> Result<RewriteOutcome> {
        let tz = self.calendar_tz;
        let mut prepared = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let mut members = Vec::with_capacity(cluster.members.len());
            for member in cluster.members {
                let json = serde_json::to_string(&member.draft)?;
                members.push((member, json));
            }
            prepared.push((cluster.keeper, members));
        }

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut outcome = RewriteOutcome::default();
                let mut touched: BTreeSet<i64> = affected.into_iter().collect();

                for raw_post_id in &stale {
                    outcome.links_removed += tx.execute(
                        "DELETE FROM source_links WHERE raw_post_id = ?1",
                        params![raw_post_id],
                    )?;
                    tx.execute(
                        "UPDATE raw_posts SET extracted_hash = NULL WHERE id = ?1 AND review_reason IS NULL",
                        params![raw_post_id],
                    )?;
                }

                for (keeper, members) in &prepared {
                    let Some((first, _)) = members.first() else {
                        continue;
                    };
                    let master_id = match keeper {
                        Some(id) => *id,
                        None => {
                            outcome.events_created += 1;
                            insert_master(&tx, &first.draft, tz)?
                        }
                    };
                    touched.insert(master_id);

                    for (member, json) in members {
                        tx.execute(
                            r#"INSERT INTO source_links (master_event_id, raw_post_id, source, priority_rank, is_canonical, fetched_at, draft_json)
                               VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
                               ON CONFLICT(raw_post_id) DO UPDATE SET
                                   master_event_id = excluded.master_event_id,
                                   source = excluded.source,
                                   priority_rank = excluded.priority_rank,
                                   is_canonical = 0,
                                   fetched_at = excluded.fetched_at,
                                   draft_json = excluded.draft_json"#,
                            params![
                                master_id,
                                member.draft.raw_post_id,
                                member.draft.source,
                                member.rank,
                                fmt_ts(member.draft.fetched_at),
                                json
                            ],
                        )?;
                        outcome.links_written += 1;
                    }
                }

                for (raw_post_id, hash) in &extracted {
                    tx.execute(
                        "UPDATE raw_posts SET extracted_hash = ?1, review_reason = NULL WHERE id = ?2",
                        params![hash, raw_post_id],
                    )?;
                }

                for master_id in touched {
                    if link_count(&tx, master_id)? == 0 {
                        tx.execute("DELETE FROM master_events WHERE id = ?1", params![master_id])?;
                        outcome.events_removed += 1;
                    } else {
                        recanonicalize(&tx, master_id, tz, true)?;
                    }
                }

                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }

    pub async fn get_master_event(&self, id: i64) -> Result<Option<MasterEvent>> {
        let event = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM master_events m WHERE m.id = ?1", MASTER_COLUMNS);
                Ok(load_masters(conn, &sql, params![id])?.into_iter().next())
            })
            .await?;
        Ok(event)
    }

    /// Earliest master event starting at or after `now`.
    pub async fn next_upcoming(&self, now: DateTime<Utc>) -> Result<Option<MasterEvent>> {
        let now = fmt_ts(now);
        let event = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM master_events m WHERE m.start_utc >= ?1 ORDER BY m.start_utc, m.id LIMIT 1",
                    MASTER_COLUMNS
                );
                Ok(load_masters(conn, &sql, params![now])?.into_iter().next())
            })
            .await?;
        Ok(event)
    }

    pub async fn random_master_event(&self) -> Result<Option<MasterEvent>> {
        let event = self
            .conn
            .call(|conn| {
                let sql = format!(
                    "SELECT {} FROM master_events m ORDER BY RANDOM() LIMIT 1",
                    MASTER_COLUMNS
                );
                Ok(load_masters(conn, &sql, [])?.into_iter().next())
            })
            .await?;
        Ok(event)
    }

    /// Master events with at least one link from `source`, or all when `None`.
    pub async fn list_master_events(&self, source: Option<String>) -> Result<Vec<MasterEvent>> {
        let events = self
            .conn
            .call(move |conn| {
                let events = match source {
                    Some(source) => {
                        let sql = format!(
                            r#"SELECT {} FROM master_events m
                               WHERE EXISTS (SELECT 1 FROM source_links l
                                             WHERE l.master_event_id = m.id AND l.source = ?1)
                               ORDER BY m.start_utc, m.id"#,
                            MASTER_COLUMNS
                        );
                        load_masters(conn, &sql, params![source])?
                    }
                    None => {
                        let sql = format!(
                            "SELECT {} FROM master_events m ORDER BY m.start_utc, m.id",
                            MASTER_COLUMNS
                        );
                        load_masters(conn, &sql, [])?
                    }
                };
                Ok(events)
            })
            .await?;
        Ok(events)
    }

    /// Removes a source's links, cascading to master events left without
    /// any, and re-queues the source's posts for merging.
    pub async fn clear_source(&self, source: String) -> Result<ClearOutcome> {
        let tz = self.calendar_tz;
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let affected: Vec<i64> = {
                    let mut stmt = tx.prepare(
                        "SELECT DISTINCT master_event_id FROM source_links WHERE source = ?1 ORDER BY master_event_id",
                    )?;
                    let ids = stmt
                        .query_map(params![source], |row| row.get(0))?
                        .collect::<std::result::Result<Vec<i64>, _>>()?;
                    ids
                };

                let links_removed =
                    tx.execute("DELETE FROM source_links WHERE source = ?1", params![source])?;
                tx.execute(
                    "UPDATE raw_posts SET extracted_hash = NULL WHERE source = ?1 AND review_reason IS NULL",
                    params![source],
                )?;

                let mut events_removed = 0;
                for master_id in affected {
                    if link_count(&tx, master_id)? == 0 {
                        tx.execute("DELETE FROM master_events WHERE id = ?1", params![master_id])?;
                        events_removed += 1;
                    } else {
                        recanonicalize(&tx, master_id, tz, true)?;
                    }
                }

                tx.commit()?;
                Ok(ClearOutcome {
                    links_removed,
                    events_removed,
                })
            })
            .await?;
        Ok(outcome)
    }

    pub async fn incidents(&self) -> Result<Vec<IntegrityIncident>> {
        let incidents = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, raw_post_id, existing_master_id, attempted_master_id, detail, logged_at
                       FROM integrity_incidents ORDER BY id"#,
                )?;
                let incidents = stmt
                    .query_map([], |row| {
                        let logged_at: String = row.get(5)?;
                        Ok(IntegrityIncident {
                            id: row.get(0)?,
                            raw_post_id: row.get(1)?,
                            existing_master_id: row.get(2)?,
                            attempted_master_id: row.get(3)?,
                            detail: row.get(4)?,
                            logged_at: parse_datetime(&logged_at).unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(incidents)
            })
            .await?;
        Ok(incidents)
    }

    #[cfg(test)]
    pub(crate) async fn execute_sql(&self, sql: &'static str) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn insert_master(conn: &SqlConnection, draft: &EventDraft, tz: Tz) -> rusqlite::Result<i64> {
    conn.execute(
        r#"INSERT INTO master_events (title, start_utc, timezone, end_utc, location, organizer, description, url, bucket)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            draft.title,
            fmt_ts(draft.start),
            draft.timezone,
            draft.end.map(fmt_ts),
            draft.location,
            draft.organizer,
            draft.description,
            draft.url,
            fmt_bucket(&bucket_of(draft.start, tz)),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_link(
    conn: &SqlConnection,
    master_id: i64,
    draft: &EventDraft,
    rank: i64,
    draft_json: &str,
    canonical: bool,
) -> rusqlite::Result<()> {
    conn.execute(
        r#"INSERT INTO source_links (master_event_id, raw_post_id, source, priority_rank, is_canonical, fetched_at, draft_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            master_id,
            draft.raw_post_id,
            draft.source,
            rank,
            canonical,
            fmt_ts(draft.fetched_at),
            draft_json
        ],
    )?;
    Ok(())
}

fn link_count(conn: &SqlConnection, master_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM source_links WHERE master_event_id = ?1",
        params![master_id],
        |row| row.get(0),
    )
}

/// Re-selects the canonical link of a master event. Display fields are
/// rewritten from the canonical snapshot when it changed or `force` is set.
/// Returns whether the canonical link changed.
fn recanonicalize(conn: &SqlConnection, master_id: i64, tz: Tz, force: bool) -> rusqlite::Result<bool> {
    let links = load_links(conn, master_id)?;
    let keys: Vec<CanonicalKey> = links.iter().map(CanonicalKey::from).collect();
    let Some(best) = canonical_index(&keys) else {
        return Ok(false);
    };

    let canonical_flags: Vec<usize> = links
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_canonical)
        .map(|(i, _)| i)
        .collect();
    let changed = canonical_flags != [best];

    if changed {
        conn.execute(
            "UPDATE source_links SET is_canonical = (id = ?1) WHERE master_event_id = ?2",
            params![links[best].id, master_id],
        )?;
    }

    if changed || force {
        let draft = &links[best].draft;
        conn.execute(
            r#"UPDATE master_events SET title = ?1, start_utc = ?2, timezone = ?3, end_utc = ?4,
                   location = ?5, organizer = ?6, description = ?7, url = ?8, bucket = ?9,
                   updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
               WHERE id = ?10"#,
            params![
                draft.title,
                fmt_ts(draft.start),
                draft.timezone,
                draft.end.map(fmt_ts),
                draft.location,
                draft.organizer,
                draft.description,
                draft.url,
                fmt_bucket(&bucket_of(draft.start, tz)),
                master_id
            ],
        )?;
    }

    Ok(changed)
}

fn load_masters<P: rusqlite::Params>(
    conn: &SqlConnection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<MasterEvent>> {
    let mut stmt = conn.prepare(sql)?;
    let mut events = stmt
        .query_map(params, master_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for event in &mut events {
        event.links = load_links(conn, event.id)?;
    }
    Ok(events)
}

fn load_links(conn: &SqlConnection, master_id: i64) -> rusqlite::Result<Vec<SourceLink>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, master_event_id, raw_post_id, source, priority_rank, is_canonical, fetched_at, draft_json
           FROM source_links WHERE master_event_id = ?1
           ORDER BY is_canonical DESC, priority_rank, fetched_at, raw_post_id"#,
    )?;
    let links = stmt
        .query_map(params![master_id], link_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(links)
}

fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn fmt_bucket(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_bucket(s: &str, column: usize) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn required_ts(row: &Row, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(column)?;
    parse_datetime(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Text,
            format!("invalid timestamp: {}", s).into(),
        )
    })
}

fn optional_ts(row: &Row, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(column)?
        .and_then(|s| parse_datetime(&s)))
}

fn raw_post_from_row(row: &Row) -> rusqlite::Result<RawPost> {
    Ok(RawPost {
        id: row.get(0)?,
        source: row.get(1)?,
        source_id: row.get(2)?,
        url: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        fetched_at: required_ts(row, 6)?,
        last_seen_at: required_ts(row, 7)?,
        status: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| EventStatus::parse(&s)),
        confidence: row.get(9)?,
        evidence: row.get(10)?,
        classified_hash: row.get(11)?,
        extracted_hash: row.get(12)?,
        review_reason: row.get(13)?,
    })
}

fn master_from_row(row: &Row) -> rusqlite::Result<MasterEvent> {
    let bucket: String = row.get(9)?;
    Ok(MasterEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        start: required_ts(row, 2)?,
        timezone: row.get(3)?,
        end: optional_ts(row, 4)?,
        location: row.get(5)?,
        organizer: row.get(6)?,
        description: row.get(7)?,
        url: row.get(8)?,
        bucket: parse_bucket(&bucket, 9)?,
        created_at: required_ts(row, 10)?,
        updated_at: required_ts(row, 11)?,
        links: Vec::new(),
    })
}

fn link_from_row(row: &Row) -> rusqlite::Result<SourceLink> {
    let draft_json: String = row.get(7)?;
    let draft: EventDraft = serde_json::from_str(&draft_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(SourceLink {
        id: row.get(0)?,
        master_event_id: row.get(1)?,
        raw_post_id: row.get(2)?,
        source: row.get(3)?,
        priority_rank: row.get(4)?,
        is_canonical: row.get::<_, i64>(5)? != 0,
        fetched_at: required_ts(row, 6)?,
        draft,
    })
}
