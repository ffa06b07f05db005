//! 病例、用户和会话集合的读写

use crate::backend::KeyValueStore;
use crate::seed;
use mammo_core::{PatientCase, Result, User};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// 持久化集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Cases,
    Users,
    CurrentSession,
}

impl Collection {
    /// 集合对应的固定键名
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Cases => "radiology_cases_v2",
            Collection::Users => "xai_system_users",
            Collection::CurrentSession => "xai_active_session",
        }
    }
}

/// 类型化的记录存储
pub struct RecordStore {
    backend: Box<dyn KeyValueStore>,
    seed_iterations: u32,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("seed_iterations", &self.seed_iterations)
            .finish()
    }
}

impl RecordStore {
    /// `seed_iterations` 为示例账户口令摘要的迭代次数
    pub fn new(backend: Box<dyn KeyValueStore>, seed_iterations: u32) -> Self {
        Self {
            backend,
            seed_iterations,
        }
    }

    /// 读取病例集合，首次读取写入示例病例
    ///
    /// 原始上传影像从不落盘，读回的病例 `image_upload` 恒为空。
    pub fn load_cases(&self) -> Result<Vec<PatientCase>> {
        match self.read::<Vec<PatientCase>>(Collection::Cases)? {
            Some(cases) => Ok(cases),
            None => {
                let cases = seed::initial_cases();
                self.save_cases(&cases)?;
                info!("Seeded {} example cases", cases.len());
                Ok(cases)
            }
        }
    }

    /// 保存病例集合
    pub fn save_cases(&self, cases: &[PatientCase]) -> Result<()> {
        self.write(Collection::Cases, &cases)
    }

    /// 读取用户集合，首次读取写入示例账户
    pub fn load_users(&self) -> Result<Vec<User>> {
        match self.read::<Vec<User>>(Collection::Users)? {
            Some(users) => Ok(users),
            None => {
                let users = seed::initial_users(self.seed_iterations);
                self.save_users(&users)?;
                info!("Seeded {} example users", users.len());
                Ok(users)
            }
        }
    }

    /// 保存用户集合
    pub fn save_users(&self, users: &[User]) -> Result<()> {
        self.write(Collection::Users, &users)
    }

    /// 读取当前会话用户
    pub fn load_session(&self) -> Result<Option<User>> {
        self.read(Collection::CurrentSession)
    }

    /// 写入或清除当前会话
    pub fn save_session(&self, user: Option<&User>) -> Result<()> {
        match user {
            Some(user) => self.write(Collection::CurrentSession, user),
            None => self.backend.remove(Collection::CurrentSession.key()),
        }
    }

    fn read<T: DeserializeOwned>(&self, collection: Collection) -> Result<Option<T>> {
        match self.backend.get(collection.key())? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, collection: Collection, value: &T) -> Result<()> {
        let data = serde_json::to_string(value)?;
        self.backend.put(collection.key(), &data)?;
        debug!("Saved collection {}", collection.key());
        Ok(())
    }
}
