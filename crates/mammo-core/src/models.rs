//! 核心数据模型定义

use crate::error::{MammoError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserRole {
    /// 管理员 - 账户管理
    Admin,
    /// 医生 - 上传、分析和复核病例
    Doctor,
    /// 研究人员 - 只读统计视图
    Researcher,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "Admin"),
            UserRole::Doctor => write!(f, "Doctor"),
            UserRole::Researcher => write!(f, "Researcher"),
        }
    }
}

impl FromStr for UserRole {
    type Err = MammoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "doctor" => Ok(UserRole::Doctor),
            "researcher" => Ok(UserRole::Researcher),
            other => Err(MammoError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// 账户状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UserStatus {
    Active,     // 正常
    Pending,    // 待审核
    Blocked,    // 已封禁
    Unverified, // 邮箱未验证
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "Active"),
            UserStatus::Pending => write!(f, "Pending"),
            UserStatus::Blocked => write!(f, "Blocked"),
            UserStatus::Unverified => write!(f, "Unverified"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = MammoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "pending" => Ok(UserStatus::Pending),
            "blocked" => Ok(UserStatus::Blocked),
            "unverified" => Ok(UserStatus::Unverified),
            other => Err(MammoError::Validation(format!("Unknown status: {}", other))),
        }
    }
}

/// 加盐口令摘要
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub salt: String,
    pub hash: String,
    pub iterations: u32,
}

/// 一次性验证码
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OneTimeCode {
    pub code: String,
    pub issued_at: DateTime<Utc>,
    /// 已失败的比对次数
    pub attempts: u32,
}

impl OneTimeCode {
    pub fn new(code: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            code,
            issued_at,
            attempts: 0,
        }
    }
}

/// 用户信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String, // 已规范化为小写
    pub credential: Credential,
    pub role: UserRole,
    pub specialization: String,
    pub status: UserStatus,
    pub joined_at: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<OneTimeCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_code: Option<OneTimeCode>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// 管理员直接创建的账户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,
    pub specialization: String,
}

/// 用户部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub specialization: Option<String>,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
}

impl UserUpdate {
    pub fn status(status: UserStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.specialization.is_none()
            && self.role.is_none()
            && self.status.is_none()
    }
}

/// 病例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseStatus {
    Pending,  // 待分析
    Analyzed, // 已分析
    #[serde(rename = "In Review")]
    InReview, // 复核中
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::Pending => write!(f, "Pending"),
            CaseStatus::Analyzed => write!(f, "Analyzed"),
            CaseStatus::InReview => write!(f, "In Review"),
        }
    }
}

/// AI诊断结论
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Diagnosis {
    Malignant, // 恶性
    Benign,    // 良性
    Invalid,   // 非乳腺影像
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnosis::Malignant => write!(f, "Malignant"),
            Diagnosis::Benign => write!(f, "Benign"),
            Diagnosis::Invalid => write!(f, "Invalid"),
        }
    }
}

/// 关注区域，坐标与半径均归一化到 [0,1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RegionOfInterest {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

/// 诊断结果中最多保留的影响因素数量
pub const MAX_FACTORS: usize = 3;

/// AI分析结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub diagnosis: Diagnosis,
    pub confidence: f64,
    pub explanation: String,
    pub factors: Vec<String>,
    pub region: RegionOfInterest,
}

impl AnalysisResult {
    /// 校验外部模型返回的结果
    ///
    /// 置信度和关注区域必须落在 [0,1]；影响因素截断为前三个；
    /// Invalid 结论不携带置信度、因素和区域。
    pub fn validated(mut self) -> Result<Self> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);

        if !in_unit(self.confidence) {
            return Err(MammoError::DiagnosticFailure(format!(
                "confidence out of range: {}",
                self.confidence
            )));
        }
        let roi = self.region;
        if !(in_unit(roi.x) && in_unit(roi.y) && in_unit(roi.r)) {
            return Err(MammoError::DiagnosticFailure(format!(
                "region of interest out of range: ({}, {}, {})",
                roi.x, roi.y, roi.r
            )));
        }

        if self.diagnosis == Diagnosis::Invalid {
            self.confidence = 0.0;
            self.factors.clear();
            self.region = RegionOfInterest::default();
        }
        self.factors.truncate(MAX_FACTORS);
        Ok(self)
    }
}

/// 对话角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// 对话消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

/// 会话内上传的原始影像，不会被持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// 患者病例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientCase {
    pub id: String,
    pub patient_id: String, // 规范化为大写
    pub date: NaiveDate,
    pub status: CaseStatus,
    #[serde(skip)]
    pub image_upload: Option<ImageUpload>,
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<AnalysisResult>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub notes: String,
}

/// 每日扫描计数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyScanCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// 某类诊断结论在已分析病例中的占比
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisShare {
    pub diagnosis: Diagnosis,
    pub count: usize,
    pub percentage: f64,
}

/// 系统统计（派生数据，不持久化）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    pub total_scans: usize,
    pub malignant_found: usize,
    pub avg_confidence: f64,
    pub active_doctors: usize,
    pub daily_scans: Vec<DailyScanCount>,
    pub diagnosis_breakdown: Vec<DiagnosisShare>,
}
