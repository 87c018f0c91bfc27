use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                phone_number    TEXT NOT NULL UNIQUE,
                full_name       TEXT NOT NULL DEFAULT '',
                avatar          TEXT,
                password        TEXT NOT NULL,
                is_active       INTEGER NOT NULL DEFAULT 0,
                date_joined     TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE auth_tokens (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                key         TEXT NOT NULL UNIQUE,
                user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE registration_profiles (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                verification_code   INTEGER NOT NULL,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            -- owner_id carries no foreign key: ownership outlives the user row
            CREATE TABLE videos (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                hash_key        TEXT NOT NULL UNIQUE,
                owner_id        INTEGER NOT NULL,
                title           TEXT NOT NULL DEFAULT '',
                description     TEXT NOT NULL DEFAULT '',
                photo           TEXT,
                likes_count     INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0),
                plays_count     INTEGER NOT NULL DEFAULT 0 CHECK (plays_count >= 0),
                clips_count     INTEGER NOT NULL DEFAULT 0 CHECK (clips_count >= 0),
                duration        REAL NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_videos_owner ON videos(owner_id);

            CREATE TABLE clips (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id    INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
                owner_id    INTEGER NOT NULL,
                ord         INTEGER NOT NULL CHECK (ord >= 0),
                mp4         TEXT NOT NULL,
                photo       TEXT NOT NULL,
                duration    REAL NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE(video_id, ord)
            );

            CREATE TABLE video_users (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id            INTEGER NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
                user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                hash_key            TEXT NOT NULL UNIQUE,
                status              INTEGER NOT NULL DEFAULT 1,
                new_likes_count     INTEGER NOT NULL DEFAULT 0 CHECK (new_likes_count >= 0),
                new_clips_count     INTEGER NOT NULL DEFAULT 0 CHECK (new_clips_count >= 0),
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                UNIQUE(video_id, user_id)
            );

            CREATE INDEX idx_video_users_user ON video_users(user_id);

            CREATE TABLE activities (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                actor_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                verb            TEXT NOT NULL,
                object_kind     TEXT,
                object_id       INTEGER,
                target_kind     TEXT,
                target_id       INTEGER,
                created_at      TEXT NOT NULL,
                CHECK ((object_kind IS NULL) = (object_id IS NULL)),
                CHECK ((target_kind IS NULL) = (target_id IS NULL))
            );

            CREATE INDEX idx_activities_object ON activities(object_kind, object_id);
            CREATE INDEX idx_activities_target ON activities(target_kind, target_id);
            CREATE INDEX idx_activities_actor ON activities(actor_id, verb, created_at);
            CREATE INDEX idx_activities_created ON activities(created_at, id);

            CREATE TABLE feedbacks (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE devices (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                platform            TEXT NOT NULL,
                registration_id     TEXT NOT NULL,
                name                TEXT NOT NULL DEFAULT '',
                active              INTEGER NOT NULL DEFAULT 1,
                date_created        TEXT NOT NULL
            );

            CREATE INDEX idx_devices_registration ON devices(platform, registration_id);
            CREATE INDEX idx_devices_user ON devices(user_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
