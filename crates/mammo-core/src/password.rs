//! 口令摘要
//!
//! 加盐迭代 SHA-256，存储格式为十六进制字符串。

use crate::models::Credential;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// 默认迭代次数
pub const DEFAULT_ITERATIONS: u32 = 10_000;

const SALT_LEN: usize = 16;

/// 使用随机盐生成口令摘要
pub fn hash_password(password: &str, iterations: u32) -> Credential {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = to_hex(&salt);

    let iterations = iterations.max(1);
    let hash = derive(password, &salt, iterations);
    Credential {
        salt,
        hash,
        iterations,
    }
}

/// 校验口令
pub fn verify_password(password: &str, credential: &Credential) -> bool {
    let candidate = derive(password, &credential.salt, credential.iterations.max(1));
    constant_time_eq(candidate.as_bytes(), credential.hash.as_bytes())
}

fn derive(password: &str, salt: &str, iterations: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt.as_bytes());
        digest = hasher.finalize();
    }

    format!("{:x}", digest)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let credential = hash_password("password123", 100);
        assert!(verify_password("password123", &credential));
        assert!(!verify_password("password124", &credential));
        assert!(!verify_password("", &credential));
    }

    #[test]
    fn test_salt_differs_per_hash() {
        let a = hash_password("same-secret", 10);
        let b = hash_password("same-secret", 10);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.salt.len(), SALT_LEN * 2);
    }

    #[test]
    fn test_hash_never_contains_cleartext() {
        let credential = hash_password("visible-secret", 10);
        assert!(!credential.hash.contains("visible-secret"));
        assert_eq!(credential.hash.len(), 64);
    }
}
