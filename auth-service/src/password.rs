//! 密码哈希
//!
//! argon2id(password ‖ pepper)，盐值随机生成并写入 PHC 字符串。
//! pepper 只存在于进程配置中，不会出现在哈希里。

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng},
};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone)]
pub struct PasswordHasher {
    pepper: String,
    /// 用于未知邮箱登录时的等时校验
    dummy_hash: String,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(pepper: impl Into<String>) -> Result<Self, argon2::password_hash::Error> {
        let pepper = pepper.into();
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = Argon2::default()
            .hash_password(b"timing-equalizer", &salt)?
            .to_string();
        Ok(Self { pepper, dummy_hash })
    }

    fn peppered(&self, password: &str) -> Vec<u8> {
        let mut input = Vec::with_capacity(password.len() + self.pepper.len());
        input.extend_from_slice(password.as_bytes());
        input.extend_from_slice(self.pepper.as_bytes());
        input
    }

    /// Hash password using argon2
    pub fn hash(&self, password: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(&self.peppered(password), &salt)?;
        Ok(hash.to_string())
    }

    /// Verify password using argon2
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
        let parsed = PasswordHash::new(hash)?;
        Ok(Argon2::default()
            .verify_password(&self.peppered(password), &parsed)
            .is_ok())
    }

    /// 对不存在的账户也做一次完整校验，使耗时与真实账户一致
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify(password, &self.dummy_hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::new("pepper-1").unwrap();
        let hash = hasher.hash("secret123").unwrap();

        assert!(hasher.verify("secret123", &hash).unwrap());
        assert!(!hasher.verify("secret124", &hash).unwrap());
        assert!(!hash.contains("pepper-1"));
    }

    #[test]
    fn test_pepper_is_required_to_verify() {
        let hash = PasswordHasher::new("pepper-1").unwrap().hash("secret123").unwrap();
        let other = PasswordHasher::new("pepper-2").unwrap();
        assert!(!other.verify("secret123", &hash).unwrap());
    }

    #[test]
    fn test_salted() {
        let hasher = PasswordHasher::new("p").unwrap();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }
}
