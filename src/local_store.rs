use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const USER_KEY: &str = "user";
pub const RESUME_DATA_KEY: &str = "resumeData";
pub const PROFESSIONAL_INFO_KEY: &str = "professionalInfo";
pub const ONBOARDING_PROFILE_KEY: &str = "onboardingProfile";
pub const ONBOARDING_DATA_KEY: &str = "onboardingData";
pub const CONTACTS_PREFIX: &str = "contacts_";

/// Key/value storage for everything the client keeps on this machine.
///
/// Values are JSON strings under the same key names the web client used,
/// so data written by either stays readable by the migration.
pub struct LocalStore {
    conn: Connection,
    path: PathBuf,
}

impl LocalStore {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open local store at {}", path.display()))?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("ai", "offerloop", "offerloop") {
            Ok(proj_dirs.data_dir().join("offerloop.db"))
        } else {
            Ok(PathBuf::from("offerloop.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='local_storage'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Local store not initialized. Run 'offerloop init' first."));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read '{}'", key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )
            .with_context(|| format!("Failed to write '{}'", key))?;
        debug!(key, bytes = value.len(), "local store write");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM local_storage WHERE key = ?1", [key])
            .with_context(|| format!("Failed to remove '{}'", key))?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // substr comparison instead of LIKE so '_' in the prefix is literal
        let mut stmt = self.conn.prepare(
            "SELECT key FROM local_storage WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map([prefix], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()
            .context("Failed to list local keys")
    }

    /// Reads a JSON value. Text that no longer parses as JSON is removed and
    /// reported as absent. JSON of the wrong shape is an error and stays put.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.read_value(key)? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .with_context(|| format!("'{}' does not have the expected shape", key))
    }

    /// Reads a JSON array element by element, skipping elements that do not
    /// fit `T`. Unparseable text is removed like in `read_json`.
    pub fn read_json_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        match self.read_value(key)? {
            Some(value) => decode_list(key, value),
            None => Ok(Vec::new()),
        }
    }

    fn read_value(&self, key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding unparseable local value");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize '{}'", key))?;
        self.set(key, &raw)
    }
}

/// Decodes each element of a JSON array on its own. A value that is not an
/// array is an error.
pub fn decode_list<T: DeserializeOwned>(key: &str, value: Value) -> Result<Vec<T>> {
    let Value::Array(items) = value else {
        return Err(anyhow!("'{}' is not a JSON array", key));
    };
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value(item) {
            Ok(value) => decoded.push(value),
            Err(e) => warn!(key, index, error = %e, "skipping malformed list element"),
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResumeData;

    #[test]
    fn test_set_get_remove() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.get("user").unwrap(), None);

        store.set("user", "{}").unwrap();
        store.set("user", "{\"a\":1}").unwrap();
        assert_eq!(store.get("user").unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(store.contains("user").unwrap());

        store.remove("user").unwrap();
        assert!(!store.contains("user").unwrap());
    }

    #[test]
    fn test_keys_with_prefix_treats_underscore_literally() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set("contacts_a_gmail_com", "[]").unwrap();
        store.set("contacts_b_x_com", "[]").unwrap();
        store.set("contactsX", "[]").unwrap();
        store.set("resumeData", "{}").unwrap();

        let keys = store.keys_with_prefix(CONTACTS_PREFIX).unwrap();
        assert_eq!(keys, vec!["contacts_a_gmail_com", "contacts_b_x_com"]);
    }

    #[test]
    fn test_read_json_clears_corrupt_value() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set(RESUME_DATA_KEY, "{not json").unwrap();

        let resume: Option<ResumeData> = store.read_json(RESUME_DATA_KEY).unwrap();
        assert!(resume.is_none());
        assert!(!store.contains(RESUME_DATA_KEY).unwrap());
    }

    #[test]
    fn test_read_json_keeps_value_of_wrong_shape() {
        let store = LocalStore::open_in_memory().unwrap();
        store.set(RESUME_DATA_KEY, r#"{"name":["not","text"]}"#).unwrap();

        assert!(store.read_json::<ResumeData>(RESUME_DATA_KEY).is_err());
        assert!(store.contains(RESUME_DATA_KEY).unwrap());
    }

    #[test]
    fn test_read_json_list_skips_bad_elements() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .set("contacts_a_x_com", r#"[{"name":"Ada"},"stray",{"name":{"first":"Bo"}},{"major":"CS"}]"#)
            .unwrap();

        let list: Vec<ResumeData> = store.read_json_list("contacts_a_x_com").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "Ada");
        assert_eq!(list[1].major, "CS");
        assert!(store.contains("contacts_a_x_com").unwrap());

        store.set("contacts_a_x_com", r#"{"name":"Ada"}"#).unwrap();
        assert!(store.read_json_list::<ResumeData>("contacts_a_x_com").is_err());
        assert!(store.contains("contacts_a_x_com").unwrap());

        store.set("contacts_a_x_com", "[{oops").unwrap();
        assert!(store.read_json_list::<ResumeData>("contacts_a_x_com").unwrap().is_empty());
        assert!(!store.contains("contacts_a_x_com").unwrap());
    }

    #[test]
    fn test_write_then_read_json() {
        let store = LocalStore::open_in_memory().unwrap();
        let resume = ResumeData {
            name: "Ada Lovelace".to_string(),
            major: "Mathematics".to_string(),
            ..Default::default()
        };
        store.write_json(RESUME_DATA_KEY, &resume).unwrap();

        let loaded: Option<ResumeData> = store.read_json(RESUME_DATA_KEY).unwrap();
        assert_eq!(loaded, Some(resume));
    }

    #[test]
    fn test_ensure_initialized_requires_init() {
        let store = LocalStore {
            conn: Connection::open_in_memory().unwrap(),
            path: PathBuf::from(":memory:"),
        };
        assert!(store.ensure_initialized().is_err());
        store.init().unwrap();
        assert!(store.ensure_initialized().is_ok());
    }
}
