//! 注销令牌列表
//!
//! 按令牌 SHA-256 摘要写入凭据存储的 `revoked_tokens` 表，保留到令牌自身
//! 过期为止；服务重启后注销依然有效。

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::storage::{StorageResult, UserRepository};

/// Hex SHA-256 of a token, never the token itself
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn UserRepository>,
}

impl RevocationList {
    pub fn new(store: Arc<dyn UserRepository>) -> Self {
        Self { store }
    }

    pub async fn revoke(&self, token: &str, exp: i64) -> StorageResult<()> {
        self.store.revoke_token(&token_digest(token), exp).await
    }

    pub async fn is_revoked(&self, token: &str) -> StorageResult<bool> {
        self.store.is_token_revoked(&token_digest(token)).await
    }

    /// Drop entries whose token has expired anyway; returns how many were removed
    pub async fn purge_expired(&self, now_secs: i64) -> StorageResult<usize> {
        self.store.purge_revoked(now_secs).await
    }

    pub async fn len(&self) -> StorageResult<u64> {
        self.store.revoked_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UserStorage;

    #[tokio::test]
    async fn test_revoke_and_purge() {
        let list = RevocationList::new(Arc::new(UserStorage::open_in_memory().unwrap()));
        list.revoke("token-a", 100).await.unwrap();
        list.revoke("token-b", 300).await.unwrap();

        assert!(list.is_revoked("token-a").await.unwrap());
        assert!(!list.is_revoked("token-c").await.unwrap());

        assert_eq!(list.purge_expired(200).await.unwrap(), 1);
        assert!(!list.is_revoked("token-a").await.unwrap());
        assert!(list.is_revoked("token-b").await.unwrap());
        assert_eq!(list.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revocation_outlives_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.redb");
        {
            let list = RevocationList::new(Arc::new(UserStorage::open(&path).unwrap()));
            list.revoke("token-a", i64::MAX).await.unwrap();
        }

        let reopened = RevocationList::new(Arc::new(UserStorage::open(&path).unwrap()));
        assert!(reopened.is_revoked("token-a").await.unwrap());
    }

    #[test]
    fn test_digest_hides_token() {
        let digest = token_digest("secret-token");
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("secret"));
    }
}
