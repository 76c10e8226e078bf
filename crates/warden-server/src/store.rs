use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;
use warden_config::StoreSeed;

use crate::error::StoreError;

/// Permission and credential records consulted per request.
///
/// Absence is meaningful: a missing allow/privileged record reads as "not
/// permitted", a missing override credential as "use the shared one".
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_allowed(&self, author_id: i64, peer_id: i64) -> Result<Option<bool>, StoreError>;
    async fn find_privileged(&self, author_id: i64) -> Result<Option<bool>, StoreError>;
    async fn find_override_credential(&self, peer_id: i64) -> Result<Option<String>, StoreError>;
    async fn find_shared_credential(&self) -> Result<String, StoreError>;
    async fn find_help_text(&self) -> Result<String, StoreError>;

    async fn set_allowed(&self, author_id: i64, peer_id: i64, allowed: bool)
        -> Result<(), StoreError>;
    async fn set_privileged(&self, author_id: i64, privileged: bool) -> Result<(), StoreError>;
    async fn set_help_text(&self, text: &str) -> Result<(), StoreError>;
    async fn set_shared_credential(&self, credential: &str) -> Result<(), StoreError>;
    async fn set_override_credential(
        &self,
        peer_id: i64,
        credential: Option<&str>,
    ) -> Result<(), StoreError>;
}

pub struct Store {
    backend: Mutex<StoreBackend>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

#[derive(Default)]
struct MemoryStore {
    chat_users: HashMap<(i64, i64), bool>,
    privileged: HashMap<i64, bool>,
    overrides: HashMap<i64, String>,
    shared_credential: Option<String>,
    help_text: Option<String>,
}

struct SqliteStore {
    conn: Connection,
}

impl Store {
    pub fn open(cfg: &warden_config::Store) -> Result<Self, StoreError> {
        let backend = match cfg.sqlite_path.as_deref() {
            Some(path) if cfg.kind == "sqlite" => StoreBackend::Sqlite(SqliteStore::new(path)?),
            _ => StoreBackend::Memory(MemoryStore::default()),
        };
        Ok(Self {
            backend: Mutex::new(backend),
        })
    }

    pub fn memory() -> Self {
        Self {
            backend: Mutex::new(StoreBackend::Memory(MemoryStore::default())),
        }
    }

    /// Writes seed records that do not exist yet; existing records win.
    pub async fn seed(&self, seed: &StoreSeed) -> Result<(), StoreError> {
        let mut backend = self.backend.lock().await;
        if let Some(credential) = &seed.shared_credential {
            if backend.shared_credential()?.is_none() {
                backend.set_shared_credential(credential)?;
            }
        }
        if let Some(text) = &seed.help_text {
            if backend.help_text()?.is_none() {
                backend.set_help_text(text)?;
            }
        }
        for user_id in &seed.privileged_users {
            if backend.privileged(*user_id)?.is_none() {
                debug!(user_id, "seeding privileged user");
                backend.set_privileged(*user_id, true)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for Store {
    async fn find_allowed(&self, author_id: i64, peer_id: i64) -> Result<Option<bool>, StoreError> {
        self.backend.lock().await.allowed(author_id, peer_id)
    }

    async fn find_privileged(&self, author_id: i64) -> Result<Option<bool>, StoreError> {
        self.backend.lock().await.privileged(author_id)
    }

    async fn find_override_credential(&self, peer_id: i64) -> Result<Option<String>, StoreError> {
        self.backend.lock().await.override_credential(peer_id)
    }

    async fn find_shared_credential(&self) -> Result<String, StoreError> {
        self.backend
            .lock()
            .await
            .shared_credential()?
            .ok_or(StoreError::MissingSetting("shared_credential"))
    }

    async fn find_help_text(&self) -> Result<String, StoreError> {
        self.backend
            .lock()
            .await
            .help_text()?
            .ok_or(StoreError::MissingSetting("help_text"))
    }

    async fn set_allowed(
        &self,
        author_id: i64,
        peer_id: i64,
        allowed: bool,
    ) -> Result<(), StoreError> {
        self.backend
            .lock()
            .await
            .set_allowed(author_id, peer_id, allowed)
    }

    async fn set_privileged(&self, author_id: i64, privileged: bool) -> Result<(), StoreError> {
        self.backend.lock().await.set_privileged(author_id, privileged)
    }

    async fn set_help_text(&self, text: &str) -> Result<(), StoreError> {
        self.backend.lock().await.set_help_text(text)
    }

    async fn set_shared_credential(&self, credential: &str) -> Result<(), StoreError> {
        self.backend.lock().await.set_shared_credential(credential)
    }

    async fn set_override_credential(
        &self,
        peer_id: i64,
        credential: Option<&str>,
    ) -> Result<(), StoreError> {
        self.backend
            .lock()
            .await
            .set_override_credential(peer_id, credential)
    }
}

impl StoreBackend {
    fn allowed(&self, author_id: i64, peer_id: i64) -> Result<Option<bool>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.chat_users.get(&(author_id, peer_id)).copied()),
            StoreBackend::Sqlite(store) => store.allowed(author_id, peer_id),
        }
    }

    fn set_allowed(&mut self, author_id: i64, peer_id: i64, allowed: bool) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.chat_users.insert((author_id, peer_id), allowed);
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_allowed(author_id, peer_id, allowed),
        }
    }

    fn privileged(&self, author_id: i64) -> Result<Option<bool>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.privileged.get(&author_id).copied()),
            StoreBackend::Sqlite(store) => store.privileged(author_id),
        }
    }

    fn set_privileged(&mut self, author_id: i64, privileged: bool) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.privileged.insert(author_id, privileged);
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_privileged(author_id, privileged),
        }
    }

    fn override_credential(&self, peer_id: i64) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.overrides.get(&peer_id).cloned()),
            StoreBackend::Sqlite(store) => store.override_credential(peer_id),
        }
    }

    fn set_override_credential(
        &mut self,
        peer_id: i64,
        credential: Option<&str>,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                match credential {
                    Some(v) => store.overrides.insert(peer_id, v.to_string()),
                    None => store.overrides.remove(&peer_id),
                };
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_override_credential(peer_id, credential),
        }
    }

    fn shared_credential(&self) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.shared_credential.clone()),
            StoreBackend::Sqlite(store) => store.setting(Setting::SharedCredential),
        }
    }

    fn set_shared_credential(&mut self, credential: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.shared_credential = Some(credential.to_string());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_setting(Setting::SharedCredential, credential),
        }
    }

    fn help_text(&self) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.help_text.clone()),
            StoreBackend::Sqlite(store) => store.setting(Setting::HelpText),
        }
    }

    fn set_help_text(&mut self, text: &str) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store.help_text = Some(text.to_string());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_setting(Setting::HelpText, text),
        }
    }
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chat_users (
                user_id INTEGER NOT NULL,
                peer_id INTEGER NOT NULL,
                is_allowed INTEGER NOT NULL,
                PRIMARY KEY (user_id, peer_id)
            );
            CREATE TABLE IF NOT EXISTS peers (
                peer_id INTEGER PRIMARY KEY,
                override_credential TEXT
            );
            CREATE TABLE IF NOT EXISTS privileged_users (
                user_id INTEGER PRIMARY KEY,
                is_privileged INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                shared_credential TEXT,
                help_text TEXT
            );
            ",
        )?;
        Ok(Self { conn })
    }

    fn allowed(&self, author_id: i64, peer_id: i64) -> Result<Option<bool>, StoreError> {
        let allowed: Option<i64> = self
            .conn
            .query_row(
                "SELECT is_allowed FROM chat_users WHERE user_id = ?1 AND peer_id = ?2",
                params![author_id, peer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(allowed.map(|v| v != 0))
    }

    fn set_allowed(&mut self, author_id: i64, peer_id: i64, allowed: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO chat_users(user_id, peer_id, is_allowed)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, peer_id) DO UPDATE SET is_allowed=excluded.is_allowed
            ",
            params![author_id, peer_id, if allowed { 1 } else { 0 }],
        )?;
        Ok(())
    }

    fn privileged(&self, author_id: i64) -> Result<Option<bool>, StoreError> {
        let privileged: Option<i64> = self
            .conn
            .query_row(
                "SELECT is_privileged FROM privileged_users WHERE user_id = ?1",
                params![author_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(privileged.map(|v| v != 0))
    }

    fn set_privileged(&mut self, author_id: i64, privileged: bool) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO privileged_users(user_id, is_privileged)
            VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET is_privileged=excluded.is_privileged
            ",
            params![author_id, if privileged { 1 } else { 0 }],
        )?;
        Ok(())
    }

    fn override_credential(&self, peer_id: i64) -> Result<Option<String>, StoreError> {
        let credential: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT override_credential FROM peers WHERE peer_id = ?1",
                params![peer_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(credential.flatten())
    }

    fn set_override_credential(
        &mut self,
        peer_id: i64,
        credential: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO peers(peer_id, override_credential)
            VALUES (?1, ?2)
            ON CONFLICT(peer_id) DO UPDATE SET override_credential=excluded.override_credential
            ",
            params![peer_id, credential],
        )?;
        Ok(())
    }

    fn setting(&self, setting: Setting) -> Result<Option<String>, StoreError> {
        let value: Option<Option<String>> = self
            .conn
            .query_row(setting.select_sql(), [], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    fn set_setting(&mut self, setting: Setting, value: &str) -> Result<(), StoreError> {
        self.conn.execute(setting.upsert_sql(), params![value])?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Setting {
    SharedCredential,
    HelpText,
}

impl Setting {
    fn select_sql(self) -> &'static str {
        match self {
            Setting::SharedCredential => "SELECT shared_credential FROM settings WHERE id = 1",
            Setting::HelpText => "SELECT help_text FROM settings WHERE id = 1",
        }
    }

    fn upsert_sql(self) -> &'static str {
        match self {
            Setting::SharedCredential => {
                "
                INSERT INTO settings(id, shared_credential) VALUES (1, ?1)
                ON CONFLICT(id) DO UPDATE SET shared_credential=excluded.shared_credential
                "
            }
            Setting::HelpText => {
                "
                INSERT INTO settings(id, help_text) VALUES (1, ?1)
                ON CONFLICT(id) DO UPDATE SET help_text=excluded.help_text
                "
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_store() -> Store {
        Store::open(&warden_config::Store {
            kind: "sqlite".to_string(),
            sqlite_path: Some(":memory:".to_string()),
            seed: StoreSeed::default(),
        })
        .unwrap()
    }

    async fn exercise(store: &Store) {
        assert_eq!(store.find_allowed(5, 2000000001).await.unwrap(), None);
        store.set_allowed(5, 2000000001, true).await.unwrap();
        assert_eq!(store.find_allowed(5, 2000000001).await.unwrap(), Some(true));
        store.set_allowed(5, 2000000001, false).await.unwrap();
        assert_eq!(store.find_allowed(5, 2000000001).await.unwrap(), Some(false));
        assert_eq!(store.find_allowed(5, 2000000002).await.unwrap(), None);

        assert_eq!(store.find_override_credential(77).await.unwrap(), None);
        store.set_override_credential(77, Some("sk-own")).await.unwrap();
        assert_eq!(
            store.find_override_credential(77).await.unwrap().as_deref(),
            Some("sk-own")
        );
        store.set_override_credential(77, None).await.unwrap();
        assert_eq!(store.find_override_credential(77).await.unwrap(), None);

        assert!(matches!(
            store.find_shared_credential().await,
            Err(StoreError::MissingSetting("shared_credential"))
        ));
        store.set_shared_credential("sk-shared").await.unwrap();
        store.set_help_text("usage").await.unwrap();
        assert_eq!(store.find_shared_credential().await.unwrap(), "sk-shared");
        assert_eq!(store.find_help_text().await.unwrap(), "usage");
    }

    #[tokio::test]
    async fn memory_store_round_trips_records() {
        exercise(&Store::memory()).await;
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_records() {
        exercise(&sqlite_store()).await;
    }

    #[tokio::test]
    async fn seed_does_not_overwrite_existing_records() {
        let store = sqlite_store();
        store.set_help_text("edited by operator").await.unwrap();
        store.set_privileged(9, false).await.unwrap();
        store
            .seed(&StoreSeed {
                shared_credential: Some("sk-seed".to_string()),
                help_text: Some("seeded help".to_string()),
                privileged_users: vec![9, 10],
            })
            .await
            .unwrap();

        assert_eq!(store.find_help_text().await.unwrap(), "edited by operator");
        assert_eq!(store.find_shared_credential().await.unwrap(), "sk-seed");
        assert_eq!(store.find_privileged(9).await.unwrap(), Some(false));
        assert_eq!(store.find_privileged(10).await.unwrap(), Some(true));
    }
}
