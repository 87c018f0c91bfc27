use crate::Database;
use crate::models::{FeedbackRow, get_time, to_db_time};
use anyhow::Result;
use chrono::{DateTime, Utc};

impl Database {
    pub fn create_feedback(&self, user_id: i64, body: &str, now: DateTime<Utc>) -> Result<FeedbackRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO feedbacks (user_id, body, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, body, to_db_time(now)],
            )?;
            let id = conn.last_insert_rowid();
            let row = conn.query_row(
                "SELECT id, user_id, body, created_at FROM feedbacks WHERE id = ?1",
                [id],
                |row| {
                    Ok(FeedbackRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        body: row.get(2)?,
                        created_at: get_time(row, 3)?,
                    })
                },
            )?;
            Ok(row)
        })
    }
}
