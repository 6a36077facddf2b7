use rusqlite::{types::Type, Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{AuthConfig, Integration, ResourceDescriptor};

/// SQLite store for integrations and resource descriptors
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

/// Decode a JSON text column, surfacing bad JSON as a conversion failure of that column
fn json_column<T: serde::de::DeserializeOwned>(index: usize, text: &str) -> SqliteResult<T> {
    serde_json::from_str(text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn json_text<T: serde::Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl SqliteStorage {
    /// Open (or create) the store; accepts `sqlite:` prefixed URLs
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = Connection::open(clean_path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                name TEXT PRIMARY KEY,
                base_url TEXT NOT NULL,
                auth_json TEXT NOT NULL,
                probe_path TEXT NOT NULL DEFAULT '/',
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Resources go away with their integration
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                name TEXT PRIMARY KEY,
                integration TEXT NOT NULL,
                descriptor_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (integration) REFERENCES integrations(name) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_resources_integration ON resources(integration)",
            [],
        )?;

        Ok(())
    }

    pub async fn save_integration(&self, integration: &Integration) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO integrations (name, base_url, auth_json, probe_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(name) DO UPDATE SET
                base_url = excluded.base_url,
                auth_json = excluded.auth_json,
                probe_path = excluded.probe_path
            "#,
            rusqlite::params![
                integration.name,
                integration.base_url,
                json_text(&integration.auth)?,
                integration.probe_path,
                integration.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn list_integrations(&self) -> SqliteResult<Vec<Integration>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT name, base_url, auth_json, probe_path, created_at FROM integrations ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::integration_from_row)?;

        let mut integrations = Vec::new();
        for row in rows {
            integrations.push(row?);
        }
        Ok(integrations)
    }

    pub async fn delete_integration(&self, name: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute("DELETE FROM integrations WHERE name = ?1", rusqlite::params![name])?;
        Ok(affected > 0)
    }

    pub async fn save_resource(&self, descriptor: &ResourceDescriptor) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO resources (name, integration, descriptor_json, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![
                descriptor.name,
                descriptor.integration,
                json_text(descriptor)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub async fn get_resource(&self, name: &str) -> SqliteResult<Option<ResourceDescriptor>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT descriptor_json FROM resources WHERE name = ?1")?;
        let mut rows = stmt.query_map(rusqlite::params![name], |row| {
            json_column::<ResourceDescriptor>(0, &row.get::<_, String>(0)?)
        })?;
        rows.next().transpose()
    }

    pub async fn list_resources(&self) -> SqliteResult<Vec<ResourceDescriptor>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT descriptor_json FROM resources ORDER BY name")?;
        let rows = stmt.query_map([], |row| json_column::<ResourceDescriptor>(0, &row.get::<_, String>(0)?))?;

        let mut descriptors = Vec::new();
        for row in rows {
            descriptors.push(row?);
        }
        Ok(descriptors)
    }

    pub async fn delete_resource(&self, name: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute("DELETE FROM resources WHERE name = ?1", rusqlite::params![name])?;
        Ok(affected > 0)
    }

    fn integration_from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Integration> {
        let auth: AuthConfig = json_column(2, &row.get::<_, String>(2)?)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

        Ok(Integration {
            name: row.get(0)?,
            base_url: row.get(1)?,
            auth,
            probe_path: row.get(3)?,
            created_at,
        })
    }
}
