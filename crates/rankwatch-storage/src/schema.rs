//! Postgres schema for the keyword registry and ranking history.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS trackers (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    location    TEXT NOT NULL,
    language    TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS keywords (
    id                 UUID PRIMARY KEY,
    tracker_id         UUID NOT NULL REFERENCES trackers(id) ON DELETE CASCADE,
    keyword_text       TEXT NOT NULL,
    target_url         TEXT,
    category           TEXT,
    search_volume      BIGINT,
    volume_checked_at  TIMESTAMPTZ,
    created_at         TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS keywords_tracker_text_idx
    ON keywords (tracker_id, keyword_text);

CREATE TABLE IF NOT EXISTS ranking_observations (
    id           UUID PRIMARY KEY,
    keyword_id   UUID NOT NULL REFERENCES keywords(id) ON DELETE CASCADE,
    run_id       UUID NOT NULL,
    observed_at  TIMESTAMPTZ NOT NULL,
    position     INTEGER,
    matched_url  TEXT
);

CREATE INDEX IF NOT EXISTS ranking_observations_keyword_time_idx
    ON ranking_observations (keyword_id, observed_at DESC);
"#;
