use crate::models::{DeviceRow, to_db_time};
use crate::{Database, OptionalExt, placeholders};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use gravvy_types::models::DevicePlatform;
use tracing::info;

impl Database {
    /// Tie a push registration id to the user. An id already known for the
    /// platform is moved over (duplicates are pruned, keeping the newest);
    /// any other device of that platform the user had is removed.
    pub fn register_device(
        &self,
        user_id: i64,
        platform: DevicePlatform,
        registration_id: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeviceRow> {
        self.with_tx(|conn| {
            let ts = to_db_time(now);
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM devices WHERE platform = ?1 AND registration_id = ?2
                     ORDER BY id DESC LIMIT 1",
                    [platform.as_str(), registration_id],
                    |row| row.get(0),
                )
                .optional()?;

            let device_id = match existing {
                Some(id) => {
                    conn.execute(
                        "DELETE FROM devices WHERE platform = ?1 AND registration_id = ?2 AND id != ?3",
                        rusqlite::params![platform.as_str(), registration_id, id],
                    )?;
                    conn.execute(
                        "UPDATE devices SET user_id = ?1, date_created = ?2,
                             name = COALESCE(?3, name), active = 1
                         WHERE id = ?4",
                        rusqlite::params![user_id, ts, name, id],
                    )?;
                    id
                }
                None => {
                    conn.execute(
                        "INSERT INTO devices (user_id, platform, registration_id, name, active, date_created)
                         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                        rusqlite::params![
                            user_id,
                            platform.as_str(),
                            registration_id,
                            name.unwrap_or(""),
                            ts
                        ],
                    )?;
                    conn.last_insert_rowid()
                }
            };

            let pruned = conn.execute(
                "DELETE FROM devices WHERE user_id = ?1 AND platform = ?2 AND id != ?3",
                rusqlite::params![user_id, platform.as_str(), device_id],
            )?;
            info!(
                "Registered {} device {} for user {} (pruned {})",
                platform, device_id, user_id, pruned
            );

            conn.query_row(
                &format!("SELECT {} FROM devices WHERE id = ?1", DeviceRow::COLUMNS),
                [device_id],
                DeviceRow::from_row,
            )
            .optional()?
            .ok_or_else(|| anyhow!("Device vanished after register: {}", device_id))
        })
    }

    /// Active devices of the given users.
    pub fn devices_for_users(&self, user_ids: &[i64]) -> Result<Vec<DeviceRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM devices WHERE active = 1 AND user_id IN ({}) ORDER BY id",
                DeviceRow::COLUMNS,
                placeholders(user_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(user_ids), DeviceRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{active_user, t0};

    const TOKEN: &str = "740f4707bebcf74f9b7c25d48e3358945f6aa01da5ddb387462c7eaf61bb78ad";

    #[test]
    fn registration_moves_token_between_users() {
        let db = Database::open_in_memory().unwrap();
        let a = active_user(&db, "+18005551234");
        let b = active_user(&db, "+18005551235");

        let first = db
            .register_device(a.id, DevicePlatform::Apns, TOKEN, Some("phone"), t0())
            .unwrap();
        assert_eq!(first.user_id, a.id);
        assert_eq!(first.name, "phone");

        let moved = db
            .register_device(b.id, DevicePlatform::Apns, TOKEN, None, t0())
            .unwrap();
        assert_eq!(moved.id, first.id);
        assert_eq!(moved.user_id, b.id);
        assert_eq!(moved.name, "phone");

        assert!(db.devices_for_users(&[a.id]).unwrap().is_empty());
        assert_eq!(db.devices_for_users(&[a.id, b.id]).unwrap().len(), 1);
    }

    #[test]
    fn a_user_keeps_one_device_per_platform() {
        let db = Database::open_in_memory().unwrap();
        let a = active_user(&db, "+18005551234");

        db.register_device(a.id, DevicePlatform::Gcm, "old-gcm", None, t0())
            .unwrap();
        db.register_device(a.id, DevicePlatform::Apns, TOKEN, None, t0())
            .unwrap();
        let newest = db
            .register_device(a.id, DevicePlatform::Gcm, "new-gcm", None, t0())
            .unwrap();

        let devices = db.devices_for_users(&[a.id]).unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().any(|d| d.id == newest.id));
        assert!(devices.iter().all(|d| d.registration_id != "old-gcm"));
    }
}
