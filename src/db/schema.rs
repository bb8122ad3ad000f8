pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- raw_posts table: every fetched item, never deleted
CREATE TABLE IF NOT EXISTS raw_posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    source_id TEXT NOT NULL,
    url TEXT,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    status TEXT,
    confidence REAL,
    evidence TEXT,
    classified_hash TEXT,
    extracted_hash TEXT,
    review_reason TEXT,
    UNIQUE(source, source_id)
);

CREATE INDEX IF NOT EXISTS idx_raw_posts_source ON raw_posts(source);
CREATE INDEX IF NOT EXISTS idx_raw_posts_status ON raw_posts(status);

-- master_events table: one row per real-world event
CREATE TABLE IF NOT EXISTS master_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    start_utc TEXT NOT NULL,
    timezone TEXT NOT NULL,
    end_utc TEXT,
    location TEXT,
    organizer TEXT,
    description TEXT,
    url TEXT,
    bucket TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

-- calendar-day buckets bound candidate search during merges
CREATE INDEX IF NOT EXISTS idx_master_events_bucket ON master_events(bucket);
CREATE INDEX IF NOT EXISTS idx_master_events_start ON master_events(start_utc);

-- source_links table: a raw post belongs to at most one master event
CREATE TABLE IF NOT EXISTS source_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    master_event_id INTEGER NOT NULL REFERENCES master_events(id) ON DELETE CASCADE,
    raw_post_id INTEGER NOT NULL UNIQUE REFERENCES raw_posts(id),
    source TEXT NOT NULL,
    priority_rank INTEGER NOT NULL,
    is_canonical INTEGER NOT NULL DEFAULT 0,
    fetched_at TEXT NOT NULL,
    draft_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_source_links_master ON source_links(master_event_id);
CREATE INDEX IF NOT EXISTS idx_source_links_source ON source_links(source);

-- integrity_incidents table: rejected merges kept for manual inspection
CREATE TABLE IF NOT EXISTS integrity_incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raw_post_id INTEGER NOT NULL,
    existing_master_id INTEGER NOT NULL,
    attempted_master_id INTEGER,
    detail TEXT NOT NULL,
    logged_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);
"#;
