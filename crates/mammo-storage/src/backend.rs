//! 键值存储后端

use mammo_core::{MammoError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

/// 键值存储接口
///
/// 写入是同步的，调用返回即已落盘。
pub trait KeyValueStore: Send + Sync {
    /// 读取键对应的值
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入键值
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// 删除键，键不存在时不报错
    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// 文件存储，每个键对应目录下的一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(|e| {
            MammoError::StoreUnavailable(format!("{}: {}", base_path.display(), e))
        })?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                Err(MammoError::StoreUnavailable(format!("{}: {}", path.display(), e)))
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        let tmp_path = self.base_path.join(format!("{}.json.tmp", key));

        // 先写临时文件再改名，避免半截文件
        std::fs::write(&tmp_path, value)
            .and_then(|_| std::fs::rename(&tmp_path, &path))
            .map_err(|e| {
                error!("Failed to write {}: {}", path.display(), e);
                MammoError::StoreUnavailable(format!("{}: {}", path.display(), e))
            })?;

        debug!("Stored {} bytes under key {}", value.len(), key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MammoError::StoreUnavailable(format!("{}: {}", path.display(), e))),
        }
    }
}

/// 内存存储，可模拟介质不可用
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 切换不可用状态，之后的读写都返回 `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(MammoError::StoreUnavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert_eq!(store.get("missing").unwrap(), None);
        store.put("users", "[]").unwrap();
        assert_eq!(store.get("users").unwrap().as_deref(), Some("[]"));
        assert!(dir.path().join("users.json").exists());
        assert!(!dir.path().join("users.json.tmp").exists());

        store.remove("users").unwrap();
        assert_eq!(store.get("users").unwrap(), None);
        store.remove("users").unwrap();
    }

    #[test]
    fn test_file_store_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested")).unwrap();
        store.put("k", "1").unwrap();
        store.put("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_memory_store_unavailable() {
        let store = MemoryStore::new();
        store.put("k", "v").unwrap();

        store.set_unavailable(true);
        assert!(matches!(store.get("k"), Err(MammoError::StoreUnavailable(_))));
        assert!(matches!(store.put("k", "w"), Err(MammoError::StoreUnavailable(_))));

        store.set_unavailable(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
