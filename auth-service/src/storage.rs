//! Credential store
//!
//! [`UserRepository`] 是凭据存储的契约；[`UserStorage`] 是基于 redb 的实现。
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `users` | `user_id` | `UserRecord` (JSON) | 用户记录 |
//! | `email_index` | 小写 email | `user_id` | 邮箱唯一索引 |
//! | `one_time_tokens` | sha256(token) | `OneTimeToken` (JSON) | 激活 / 重置密码令牌 |
//! | `revoked_tokens` | sha256(token) | exp (秒) | 已注销的会话令牌 |
//!
//! 邮箱唯一性在同一个写事务里检查并写入，redb 串行化所有写事务，
//! 因此并发注册同一邮箱只会有一个成功。修改用户同样是读-改-写在一个
//! 写事务内完成 ([`UserRepository::patch`])，并发修改不会互相覆盖。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::models::{Role, UserInfo};
use thiserror::Error;

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

const EMAIL_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("email_index");

const ONE_TIME_TOKENS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("one_time_tokens");

const REVOKED_TOKENS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("revoked_tokens");

/// Stored user record (includes secrets, never serialized outward)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    /// 密码最后修改时间 (毫秒)；不晚于此时签发的令牌失效
    #[serde(default)]
    pub password_changed_at: i64,
}

impl UserRecord {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields to change on an existing user; `None` leaves a field as stored
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
    pub password_changed_at: Option<i64>,
}

impl UserPatch {
    fn apply(&self, user: &mut UserRecord) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(changed_at) = self.password_changed_at {
            user.password_changed_at = changed_at;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeTokenKind {
    Activation,
    PasswordReset,
}

/// Activation / reset token entry, keyed by the token digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeToken {
    pub user_id: String,
    pub kind: OneTimeTokenKind,
    /// Unix millis
    pub expires_at: i64,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Email already registered")]
    EmailTaken,

    #[error("User not found: {0}")]
    UserNotFound(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Lowercased, trimmed email used as index key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Credential store contract
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user; fails with [`StorageError::EmailTaken`] on duplicate email
    async fn create(&self, user: &UserRecord) -> StorageResult<()>;

    async fn get(&self, id: &str) -> StorageResult<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>>;

    /// Apply `patch` to the stored record inside one write transaction and
    /// return the result; re-checks email uniqueness when the email changed
    async fn patch(&self, id: &str, patch: &UserPatch) -> StorageResult<UserRecord>;

    /// Returns false when the user did not exist
    async fn delete(&self, id: &str) -> StorageResult<bool>;

    /// One page of users in id order, plus the total count
    async fn list(&self, offset: u64, limit: u64) -> StorageResult<(Vec<UserRecord>, u64)>;

    async fn put_one_time_token(&self, digest: &str, token: &OneTimeToken) -> StorageResult<()>;

    /// Remove and return a token; a token can be redeemed once
    async fn take_one_time_token(&self, digest: &str) -> StorageResult<Option<OneTimeToken>>;

    /// Remember a revoked session token until its own `exp`
    async fn revoke_token(&self, digest: &str, exp: i64) -> StorageResult<()>;

    async fn is_token_revoked(&self, digest: &str) -> StorageResult<bool>;

    /// Drop revocations whose token has expired anyway; returns how many were removed
    async fn purge_revoked(&self, now_secs: i64) -> StorageResult<usize>;

    async fn revoked_count(&self) -> StorageResult<u64>;
}

/// redb-backed credential store
#[derive(Clone)]
pub struct UserStorage {
    db: Arc<Database>,
}

impl UserStorage {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS_TABLE)?;
            let _ = write_txn.open_table(EMAIL_INDEX_TABLE)?;
            let _ = write_txn.open_table(ONE_TIME_TOKENS_TABLE)?;
            let _ = write_txn.open_table(REVOKED_TOKENS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn get_sync(&self, id: &str) -> StorageResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UserRepository for UserStorage {
    async fn create(&self, user: &UserRecord) -> StorageResult<()> {
        let key = normalize_email(&user.email);
        let txn = self.db.begin_write()?;
        {
            let mut index = txn.open_table(EMAIL_INDEX_TABLE)?;
            if index.get(key.as_str())?.is_some() {
                return Err(StorageError::EmailTaken);
            }
            index.insert(key.as_str(), user.id.as_str())?;

            let mut users = txn.open_table(USERS_TABLE)?;
            let value = serde_json::to_vec(user)?;
            users.insert(user.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<UserRecord>> {
        self.get_sync(id)
    }

    async fn find_by_email(&self, email: &str) -> StorageResult<Option<UserRecord>> {
        let key = normalize_email(email);
        let user_id = {
            let read_txn = self.db.begin_read()?;
            let index = read_txn.open_table(EMAIL_INDEX_TABLE)?;
            match index.get(key.as_str())? {
                Some(id) => id.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_sync(&user_id)
    }

    async fn patch(&self, id: &str, patch: &UserPatch) -> StorageResult<UserRecord> {
        let txn = self.db.begin_write()?;
        let user = {
            let mut users = txn.open_table(USERS_TABLE)?;

            // Read and clone first to avoid borrow conflict
            let mut user: UserRecord = match users.get(id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => return Err(StorageError::UserNotFound(id.to_string())),
            };

            let old_key = normalize_email(&user.email);
            patch.apply(&mut user);
            user.updated_at = shared::util::now_millis();

            let new_key = normalize_email(&user.email);
            if old_key != new_key {
                let mut index = txn.open_table(EMAIL_INDEX_TABLE)?;
                if index.get(new_key.as_str())?.is_some() {
                    return Err(StorageError::EmailTaken);
                }
                index.remove(old_key.as_str())?;
                index.insert(new_key.as_str(), id)?;
            }

            let value = serde_json::to_vec(&user)?;
            users.insert(id, value.as_slice())?;
            user
        };
        txn.commit()?;
        Ok(user)
    }

    async fn delete(&self, id: &str) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut users = txn.open_table(USERS_TABLE)?;
            let existing: Option<UserRecord> = match users.remove(id)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            };
            if let Some(user) = &existing {
                let mut index = txn.open_table(EMAIL_INDEX_TABLE)?;
                index.remove(normalize_email(&user.email).as_str())?;
            }
            existing.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    async fn list(&self, offset: u64, limit: u64) -> StorageResult<(Vec<UserRecord>, u64)> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS_TABLE)?;
        let total = table.len()?;

        let mut users = Vec::new();
        for result in table.iter()?.skip(offset as usize).take(limit as usize) {
            let (_key, value) = result?;
            users.push(serde_json::from_slice(value.value())?);
        }
        Ok((users, total))
    }

    async fn put_one_time_token(&self, digest: &str, token: &OneTimeToken) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ONE_TIME_TOKENS_TABLE)?;
            let value = serde_json::to_vec(token)?;
            table.insert(digest, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn take_one_time_token(&self, digest: &str) -> StorageResult<Option<OneTimeToken>> {
        let txn = self.db.begin_write()?;
        let token = {
            let mut table = txn.open_table(ONE_TIME_TOKENS_TABLE)?;
            match table.remove(digest)? {
                Some(value) => Some(serde_json::from_slice(value.value())?),
                None => None,
            }
        };
        txn.commit()?;
        Ok(token)
    }

    async fn revoke_token(&self, digest: &str, exp: i64) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(REVOKED_TOKENS_TABLE)?;
            table.insert(digest, exp)?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn is_token_revoked(&self, digest: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REVOKED_TOKENS_TABLE)?;
        Ok(table.get(digest)?.is_some())
    }

    async fn purge_revoked(&self, now_secs: i64) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(REVOKED_TOKENS_TABLE)?;
            let mut expired = Vec::new();
            for result in table.iter()? {
                let (key, exp) = result?;
                if exp.value() <= now_secs {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str())?;
            }
            expired.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    async fn revoked_count(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REVOKED_TOKENS_TABLE)?;
        Ok(table.len()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, email: &str) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            name: "Test".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Customer,
            is_active: true,
            created_at: 1,
            updated_at: 1,
            password_changed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_email_unique_case_insensitive() {
        let storage = UserStorage::open_in_memory().unwrap();
        storage.create(&record("u1", "Alice@Example.com")).await.unwrap();

        let err = storage.create(&record("u2", "alice@example.COM")).await.unwrap_err();
        assert!(matches!(err, StorageError::EmailTaken));

        let found = storage.find_by_email("ALICE@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
    }

    fn email(email: &str) -> UserPatch {
        UserPatch {
            email: Some(email.to_string()),
            ..UserPatch::default()
        }
    }

    #[tokio::test]
    async fn test_patch_reindexes_email() {
        let storage = UserStorage::open_in_memory().unwrap();
        storage.create(&record("u1", "a@example.com")).await.unwrap();
        storage.create(&record("u2", "b@example.com")).await.unwrap();

        assert!(matches!(
            storage.patch("u1", &email("B@example.com")).await,
            Err(StorageError::EmailTaken)
        ));

        let u1 = storage.patch("u1", &email("c@example.com")).await.unwrap();
        assert_eq!(u1.email, "c@example.com");
        assert!(u1.updated_at > 1);
        assert!(storage.find_by_email("a@example.com").await.unwrap().is_none());
        assert_eq!(storage.find_by_email("c@example.com").await.unwrap().unwrap().id, "u1");
    }

    #[tokio::test]
    async fn test_patch_missing_user() {
        let storage = UserStorage::open_in_memory().unwrap();
        let err = storage.patch("ghost", &UserPatch::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::UserNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_patches_touch_only_their_fields() {
        let storage = UserStorage::open_in_memory().unwrap();
        storage.create(&record("u1", "a@example.com")).await.unwrap();

        let deactivate = UserPatch {
            is_active: Some(false),
            ..UserPatch::default()
        };
        let new_password = UserPatch {
            password_hash: Some("new-hash".to_string()),
            password_changed_at: Some(42),
            ..UserPatch::default()
        };
        storage.patch("u1", &deactivate).await.unwrap();
        storage.patch("u1", &new_password).await.unwrap();

        let stored = storage.get("u1").await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.password_hash, "new-hash");
        assert_eq!(stored.password_changed_at, 42);
        assert_eq!(stored.name, "Test");
    }

    #[tokio::test]
    async fn test_delete_frees_email() {
        let storage = UserStorage::open_in_memory().unwrap();
        storage.create(&record("u1", "a@example.com")).await.unwrap();

        assert!(storage.delete("u1").await.unwrap());
        assert!(!storage.delete("u1").await.unwrap());
        storage.create(&record("u2", "a@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_pages() {
        let storage = UserStorage::open_in_memory().unwrap();
        for i in 0..5 {
            storage
                .create(&record(&format!("u{i}"), &format!("u{i}@example.com")))
                .await
                .unwrap();
        }

        let (page, total) = storage.list(2, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "u2");
    }

    #[tokio::test]
    async fn test_one_time_token_redeemed_once() {
        let storage = UserStorage::open_in_memory().unwrap();
        let token = OneTimeToken {
            user_id: "u1".to_string(),
            kind: OneTimeTokenKind::Activation,
            expires_at: i64::MAX,
        };
        storage.put_one_time_token("digest", &token).await.unwrap();

        assert_eq!(storage.take_one_time_token("digest").await.unwrap(), Some(token));
        assert_eq!(storage.take_one_time_token("digest").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_revocations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.redb");
        {
            let storage = UserStorage::open(&path).unwrap();
            storage.revoke_token("digest-a", 100).await.unwrap();
            storage.revoke_token("digest-b", 300).await.unwrap();
        }

        let storage = UserStorage::open(&path).unwrap();
        assert!(storage.is_token_revoked("digest-a").await.unwrap());
        assert_eq!(storage.revoked_count().await.unwrap(), 2);

        assert_eq!(storage.purge_revoked(200).await.unwrap(), 1);
        assert!(!storage.is_token_revoked("digest-a").await.unwrap());
        assert!(storage.is_token_revoked("digest-b").await.unwrap());
    }
}
