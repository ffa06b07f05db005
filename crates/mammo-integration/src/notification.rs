//! 通知投递模块
//!
//! 验证码、重置码和联系表单都通过事务邮件服务投递，调用方只关心成功与否。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// 验证码用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodePurpose {
    Verification,
    PasswordReset,
    Resend,
}

impl CodePurpose {
    pub fn subject(&self) -> &'static str {
        match self {
            CodePurpose::Verification => "Clinician Verification Code",
            CodePurpose::PasswordReset => "Account Recovery Code",
            CodePurpose::Resend => "Security Code Resend",
        }
    }
}

/// 验证码邮件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMessage {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
    pub code: String,
}

impl CodeMessage {
    pub fn new(purpose: CodePurpose, to_email: &str, to_name: &str, code: &str) -> Self {
        Self {
            to_email: to_email.trim().to_lowercase(),
            to_name: to_name.to_string(),
            subject: purpose.subject().to_string(),
            body: format!("Your medical system security code is: {}", code),
            code: code.to_string(),
        }
    }
}

/// 联系表单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInquiry {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

/// 通知发送接口
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// 发送验证码邮件
    async fn send_code(&self, message: &CodeMessage) -> bool;

    /// 投递联系表单
    async fn send_inquiry(&self, inquiry: &ContactInquiry) -> bool;
}

/// 事务邮件服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJsConfig {
    pub endpoint: String,
    pub service_id: String,
    pub template_id: String,
    pub public_key: String,
    pub reply_to: String,
    pub timeout: Duration,
}

impl Default for EmailJsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.emailjs.com/api/v1.0/email/send".to_string(),
            service_id: String::new(),
            template_id: String::new(),
            public_key: String::new(),
            reply_to: "support@xaiplatform.org".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// 基于 REST 接口的事务邮件发送器
pub struct EmailJsSender {
    client: reqwest::Client,
    config: EmailJsConfig,
}

impl EmailJsSender {
    pub fn new(config: EmailJsConfig) -> mammo_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| mammo_core::MammoError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// 验证码模板参数
    pub fn code_payload(&self, message: &CodeMessage) -> serde_json::Value {
        json!({
            "service_id": self.config.service_id,
            "template_id": self.config.template_id,
            "user_id": self.config.public_key,
            "template_params": {
                "to_email": message.to_email,
                "user_email": message.to_email,
                "email": message.to_email,
                "to_name": message.to_name,
                "subject": message.subject,
                "message": message.body,
                "code": message.code,
                "reply_to": self.config.reply_to,
            }
        })
    }

    /// 联系表单模板参数
    pub fn inquiry_payload(&self, inquiry: &ContactInquiry) -> serde_json::Value {
        json!({
            "service_id": self.config.service_id,
            "template_id": self.config.template_id,
            "user_id": self.config.public_key,
            "template_params": {
                "from_name": inquiry.name,
                "from_email": inquiry.email,
                "subject": inquiry.subject,
                "message": inquiry.message,
            }
        })
    }

    async fn post(&self, payload: serde_json::Value) -> bool {
        match self.client.post(&self.config.endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Email provider rejected request: {} {}", status, body);
                false
            }
            Err(e) => {
                error!("Email provider unreachable: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl NotificationSender for EmailJsSender {
    async fn send_code(&self, message: &CodeMessage) -> bool {
        info!("Dispatching '{}' to {}", message.subject, message.to_email);
        self.post(self.code_payload(message)).await
    }

    async fn send_inquiry(&self, inquiry: &ContactInquiry) -> bool {
        info!("Dispatching contact inquiry from {}", inquiry.email);
        self.post(self.inquiry_payload(inquiry)).await
    }
}

/// 本地发件箱
///
/// 开发和测试环境使用：消息留在内存中，可选追加写入 JSON Lines 文件。
#[derive(Debug, Default)]
pub struct OutboxSender {
    codes: Mutex<Vec<CodeMessage>>,
    inquiries: Mutex<Vec<ContactInquiry>>,
    spool_path: Option<PathBuf>,
    failing: AtomicBool,
}

impl OutboxSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同时把消息追加写入文件
    pub fn with_spool(path: impl Into<PathBuf>) -> Self {
        Self {
            spool_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// 模拟投递失败
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 已投递的验证码邮件
    pub fn sent_codes(&self) -> Vec<CodeMessage> {
        self.codes.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 最近一封发往指定地址的验证码
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        let email = email.trim().to_lowercase();
        self.sent_codes()
            .into_iter()
            .rev()
            .find(|m| m.to_email == email)
            .map(|m| m.code)
    }

    pub fn sent_inquiries(&self) -> Vec<ContactInquiry> {
        self.inquiries.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn spool<T: Serialize>(&self, kind: &str, item: &T) -> bool {
        let Some(path) = &self.spool_path else {
            return true;
        };
        let line = json!({ "kind": kind, "message": item }).to_string();
        let written = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
            })
            .and_then(|mut file| writeln!(file, "{}", line));
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to spool {} to {}: {}", kind, path.display(), e);
                false
            }
        }
    }
}

#[async_trait]
impl NotificationSender for OutboxSender {
    async fn send_code(&self, message: &CodeMessage) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            warn!("Outbox rejected '{}' to {}", message.subject, message.to_email);
            return false;
        }
        if !self.spool("code", message) {
            return false;
        }
        if let Ok(mut codes) = self.codes.lock() {
            codes.push(message.clone());
        }
        info!("Queued '{}' to {} in outbox", message.subject, message.to_email);
        true
    }

    async fn send_inquiry(&self, inquiry: &ContactInquiry) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        if !self.spool("inquiry", inquiry) {
            return false;
        }
        if let Ok(mut inquiries) = self.inquiries.lock() {
            inquiries.push(inquiry.clone());
        }
        info!("Queued contact inquiry from {} in outbox", inquiry.email);
        true
    }
}
