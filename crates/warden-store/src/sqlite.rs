//! SQLite-based store implementation

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};
use warden_api::{ChallengeView, VmStatus};
use warden_util::{ChallengeId, RemoteVmId, UserId, VmId};

use crate::{AuditEvent, GlobalConfig, NewVm, StoreResult, VmRecord, VmStore};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Platform tables (owned by the embedding platform)
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT ''
            );

            -- Global template config (single row)
            CREATE TABLE IF NOT EXISTS global_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                template_id INTEGER NOT NULL,
                template_name TEXT NOT NULL,
                max_duration_hours INTEGER NOT NULL
            );

            -- Flag table: row exists = challenge shows the VM panel
            CREATE TABLE IF NOT EXISTS challenge_vms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                challenge_id INTEGER NOT NULL UNIQUE
                    REFERENCES challenges(id) ON DELETE CASCADE
            );

            -- One VM per user; remote identity unique across the cluster
            CREATE TABLE IF NOT EXISTS vms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
                remote_vmid INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL,
                ip_address TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_started_at TEXT,
                expires_at TEXT NOT NULL,
                managed INTEGER NOT NULL DEFAULT 1
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_vms_expires ON vms(expires_at);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn row_to_vm(row: &Row<'_>) -> rusqlite::Result<VmRecord> {
        let status_str: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        let last_started_at: Option<String> = row.get(7)?;
        let expires_at: String = row.get(8)?;

        Ok(VmRecord {
            id: VmId::new(row.get(0)?),
            user_id: UserId::new(row.get(1)?),
            remote_vmid: RemoteVmId::new(row.get::<_, i64>(2)? as u32),
            name: row.get(3)?,
            ip_address: row.get(4)?,
            // Rows are only ever written from the closed enum; a value that
            // fails to parse means outside interference and degrades to Error.
            status: status_str.parse().unwrap_or(VmStatus::Error),
            created_at: parse_ts(&created_at),
            last_started_at: last_started_at.as_deref().map(parse_ts),
            expires_at: parse_ts(&expires_at),
            managed: row.get::<_, i64>(9)? != 0,
        })
    }
}

const VM_COLUMNS: &str =
    "id, user_id, remote_vmid, name, ip_address, status, created_at, last_started_at, expires_at, managed";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| warden_util::now())
}

impl VmStore for SqliteStore {
    fn global_config(&self) -> StoreResult<Option<GlobalConfig>> {
        let conn = self.conn.lock().unwrap();

        let config = conn
            .query_row(
                "SELECT template_id, template_name, max_duration_hours FROM global_config WHERE id = 1",
                [],
                |row| {
                    Ok(GlobalConfig {
                        template_id: RemoteVmId::new(row.get::<_, i64>(0)? as u32),
                        template_name: row.get(1)?,
                        max_duration_hours: row.get::<_, i64>(2)? as u32,
                    })
                },
            )
            .optional()?;

        Ok(config)
    }

    fn set_global_config(&self, config: &GlobalConfig) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO global_config (id, template_id, template_name, max_duration_hours)
            VALUES (1, ?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET template_id = excluded.template_id,
                          template_name = excluded.template_name,
                          max_duration_hours = excluded.max_duration_hours
            "#,
            params![
                config.template_id.as_u32() as i64,
                config.template_name,
                config.max_duration_hours as i64,
            ],
        )?;

        debug!(template_id = %config.template_id, "Global config set");
        Ok(())
    }

    fn vm_for_user(&self, user_id: UserId) -> StoreResult<Option<VmRecord>> {
        let conn = self.conn.lock().unwrap();

        let vm = conn
            .query_row(
                &format!("SELECT {VM_COLUMNS} FROM vms WHERE user_id = ?"),
                [user_id.as_i64()],
                Self::row_to_vm,
            )
            .optional()?;

        Ok(vm)
    }

    fn vm_by_id(&self, id: VmId) -> StoreResult<Option<VmRecord>> {
        let conn = self.conn.lock().unwrap();

        let vm = conn
            .query_row(
                &format!("SELECT {VM_COLUMNS} FROM vms WHERE id = ?"),
                [id.as_i64()],
                Self::row_to_vm,
            )
            .optional()?;

        Ok(vm)
    }

    fn insert_vm(&self, vm: &NewVm) -> StoreResult<VmRecord> {
        let conn = self.conn.lock().unwrap();
        let created_at = warden_util::now();

        conn.execute(
            r#"
            INSERT INTO vms (user_id, remote_vmid, name, status, created_at, expires_at, managed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                vm.user_id.as_i64(),
                vm.remote_vmid.as_u32() as i64,
                vm.name,
                vm.status.as_str(),
                created_at.to_rfc3339(),
                vm.expires_at.to_rfc3339(),
                vm.managed as i64,
            ],
        )?;

        let id = VmId::new(conn.last_insert_rowid());
        debug!(vm_id = %id, user_id = %vm.user_id, remote_vmid = %vm.remote_vmid, "VM row inserted");

        Ok(VmRecord {
            id,
            user_id: vm.user_id,
            remote_vmid: vm.remote_vmid,
            name: vm.name.clone(),
            ip_address: None,
            status: vm.status,
            created_at,
            last_started_at: None,
            expires_at: vm.expires_at,
            managed: vm.managed,
        })
    }

    fn update_status(
        &self,
        id: VmId,
        status: VmStatus,
        last_started_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        match last_started_at {
            Some(at) => {
                conn.execute(
                    "UPDATE vms SET status = ?, last_started_at = ? WHERE id = ?",
                    params![status.as_str(), at.to_rfc3339(), id.as_i64()],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE vms SET status = ? WHERE id = ?",
                    params![status.as_str(), id.as_i64()],
                )?;
            }
        }

        debug!(vm_id = %id, status = %status, "VM status updated");
        Ok(())
    }

    fn update_ip(&self, id: VmId, ip_address: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE vms SET ip_address = ? WHERE id = ?",
            params![ip_address, id.as_i64()],
        )?;

        debug!(vm_id = %id, ip_address, "VM address recorded");
        Ok(())
    }

    fn delete_vm(&self, id: VmId) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute("DELETE FROM vms WHERE id = ?", [id.as_i64()])?;
        Ok(removed > 0)
    }

    fn managed_vms(&self) -> StoreResult<Vec<VmRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt =
            conn.prepare(&format!("SELECT {VM_COLUMNS} FROM vms WHERE managed = 1 ORDER BY id"))?;
        let rows = stmt.query_map([], Self::row_to_vm)?;

        let mut vms = Vec::new();
        for row in rows {
            vms.push(row?);
        }
        Ok(vms)
    }

    fn expired_managed_vms(&self, now: DateTime<Utc>) -> StoreResult<Vec<VmRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {VM_COLUMNS} FROM vms WHERE managed = 1 AND expires_at <= ? ORDER BY id"
        ))?;
        let rows = stmt.query_map([now.to_rfc3339()], Self::row_to_vm)?;

        let mut vms = Vec::new();
        for row in rows {
            vms.push(row?);
        }
        Ok(vms)
    }

    fn set_challenge_vm(&self, challenge_id: ChallengeId, enabled: bool) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let changed = if enabled {
            conn.execute(
                "INSERT OR IGNORE INTO challenge_vms (challenge_id) VALUES (?)",
                [challenge_id.as_i64()],
            )?
        } else {
            conn.execute(
                "DELETE FROM challenge_vms WHERE challenge_id = ?",
                [challenge_id.as_i64()],
            )?
        };

        Ok(changed > 0)
    }

    fn challenge_vm_enabled(&self, challenge_id: ChallengeId) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM challenge_vms WHERE challenge_id = ?",
                [challenge_id.as_i64()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(exists.is_some())
    }

    fn list_challenges(&self) -> StoreResult<Vec<ChallengeView>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT c.id, c.name, c.category, cv.challenge_id IS NOT NULL
            FROM challenges c
            LEFT JOIN challenge_vms cv ON cv.challenge_id = c.id
            ORDER BY c.id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChallengeView {
                id: ChallengeId::new(row.get(0)?),
                name: row.get(1)?,
                category: row.get(2)?,
                vm_enabled: row.get(3)?,
            })
        })?;

        let mut challenges = Vec::new();
        for row in rows {
            challenges.push(row?);
        }
        Ok(challenges)
    }

    fn user_name(&self, user_id: UserId) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();

        let name = conn
            .query_row(
                "SELECT name FROM users WHERE id = ?",
                [user_id.as_i64()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(name)
    }

    fn upsert_user(&self, user_id: UserId, name: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO users (id, name) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
            params![user_id.as_i64(), name],
        )?;

        Ok(())
    }

    fn upsert_challenge(
        &self,
        challenge_id: ChallengeId,
        name: &str,
        category: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO challenges (id, name, category) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, category = excluded.category
            "#,
            params![challenge_id.as_i64(), name, category],
        )?;

        Ok(())
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_json) = row?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp: parse_ts(&timestamp),
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
