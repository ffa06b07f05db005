//! 服务装配
//!
//! 按配置创建存储、通知和诊断服务，并持有当前会话。
//! 命令行和演示程序都只通过 [`ReviewSystem`] 调用业务操作。

use crate::config::AppConfig;
use anyhow::{Context, Result as AnyResult};
use chrono::Duration;
use mammo_core::{
    ChatMessage, ImageUpload, MammoError, NewUser, PatientCase, Result, SystemStats, User,
    UserRole, UserUpdate,
};
use mammo_identity::{CodeKind, CodePolicy, IdentityService, SessionContext};
use mammo_integration::{
    ContactInquiry, DiagnosticService, EmailJsConfig, EmailJsSender, GenerativeConfig,
    GenerativeDiagnosticClient, NotificationSender, OutboxSender,
};
use mammo_storage::{FileStore, KeyValueStore, MemoryStore, RecordStore};
use mammo_workflow::{compute_stats, CaseFilter, CaseRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// 阅片平台
pub struct ReviewSystem {
    identity: IdentityService,
    registry: CaseRegistry,
    notifier: Arc<dyn NotificationSender>,
    session: SessionContext,
}

impl ReviewSystem {
    /// 按配置装配全部服务，并恢复上次保存的会话
    pub fn from_config(config: &AppConfig) -> AnyResult<Self> {
        let backend: Box<dyn KeyValueStore> = match config.storage.backend.as_str() {
            "memory" => Box::new(MemoryStore::new()),
            _ => Box::new(
                FileStore::new(&config.storage.data_dir)
                    .with_context(|| format!("Cannot open data dir {}", config.storage.data_dir))?,
            ),
        };
        let store = Arc::new(RecordStore::new(backend, config.identity.hash_iterations));

        let n = &config.notification;
        let notifier: Arc<dyn NotificationSender> = match n.provider.as_str() {
            "emailjs" => Arc::new(EmailJsSender::new(EmailJsConfig {
                endpoint: n.endpoint.clone(),
                service_id: n.service_id.clone(),
                template_id: n.template_id.clone(),
                public_key: n.public_key.clone(),
                reply_to: n.reply_to.clone(),
                timeout: n.timeout(),
            })?),
            _ => match config.outbox_spool_path() {
                Some(path) => Arc::new(OutboxSender::with_spool(path)),
                None => Arc::new(OutboxSender::new()),
            },
        };

        let d = &config.diagnostics;
        if d.api_key.is_empty() {
            warn!("No diagnostics API key configured, analysis requests will be rejected");
        }
        let diagnostics = Arc::new(GenerativeDiagnosticClient::new(GenerativeConfig {
            endpoint: d.endpoint.clone(),
            model: d.model.clone(),
            api_key: d.api_key.clone(),
            timeout: d.timeout(),
        })?);

        let system = Self::assemble(store, notifier, diagnostics, config)?;
        info!(
            "Review system ready ({} storage, {} notifications)",
            config.storage.backend, n.provider
        );
        Ok(system)
    }

    /// 用给定的协作方装配
    pub fn assemble(
        store: Arc<RecordStore>,
        notifier: Arc<dyn NotificationSender>,
        diagnostics: Arc<dyn DiagnosticService>,
        config: &AppConfig,
    ) -> AnyResult<Self> {
        let policy = CodePolicy::new(
            Duration::minutes(config.identity.code_ttl_minutes),
            config.identity.max_code_attempts,
        );
        let identity = IdentityService::new(store.clone(), notifier.clone())?
            .with_policy(policy)
            .with_hash_iterations(config.identity.hash_iterations);
        let registry = CaseRegistry::new(store, diagnostics)?;
        let session = identity.restore_session()?;

        Ok(Self {
            identity,
            registry,
            notifier,
            session,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn current_user(&self) -> Option<&User> {
        self.session.user()
    }

    pub async fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
        role: UserRole,
        specialization: &str,
    ) -> Result<String> {
        self.identity
            .register(name, email, password, role, specialization)
            .await
    }

    pub fn verify(&mut self, email: &str, code: &str) -> Result<User> {
        self.identity.verify(email, code)
    }

    pub fn login(&mut self, email: &str, password: &str) -> Result<User> {
        self.identity.login(&mut self.session, email, password)
    }

    pub fn logout(&mut self) -> Result<()> {
        self.identity.logout(&mut self.session)
    }

    pub async fn request_password_reset(&mut self, email: &str) -> Result<()> {
        self.identity.request_password_reset(email).await
    }

    pub fn reset_password(&mut self, email: &str, code: &str, new_password: &str) -> Result<()> {
        self.identity.reset_password(email, code, new_password)
    }

    pub async fn resend_code(&mut self, email: &str, kind: CodeKind) -> Result<()> {
        self.identity.resend_code(email, kind).await
    }

    /// 账户列表，仅管理员可见
    pub fn users(&self) -> Result<&[User]> {
        self.session.require_admin()?;
        Ok(self.identity.users())
    }

    pub fn add_user(&mut self, new_user: NewUser) -> Result<User> {
        self.identity.add_user(&self.session, new_user)
    }

    pub fn update_user(&mut self, user_id: &str, update: UserUpdate) -> Result<User> {
        self.identity.update_user(&mut self.session, user_id, update)
    }

    /// 按邮箱定位账户后修改，命令行使用
    pub fn update_user_by_email(&mut self, email: &str, update: UserUpdate) -> Result<User> {
        self.session.require_admin()?;
        let user_id = self
            .identity
            .find_by_email(email)
            .map(|u| u.id.clone())
            .ok_or_else(|| MammoError::UnknownAccount(email.to_string()))?;
        self.update_user(&user_id, update)
    }

    pub fn worklist(&self) -> Result<&[PatientCase]> {
        self.session.require_user()?;
        Ok(self.registry.worklist())
    }

    pub fn query_cases(&self, filter: &CaseFilter) -> Result<Vec<PatientCase>> {
        self.session.require_user()?;
        Ok(self.registry.query(filter))
    }

    pub fn patient_ids(&self) -> Result<Vec<String>> {
        self.session.require_user()?;
        Ok(self.registry.patient_ids())
    }

    pub fn get_case(&self, case_id: &str) -> Result<&PatientCase> {
        self.session.require_user()?;
        self.registry
            .get_case(case_id)
            .ok_or_else(|| MammoError::NotFound(format!("case {}", case_id)))
    }

    pub fn create_case(&mut self, patient_ref: &str, upload: ImageUpload) -> Result<PatientCase> {
        self.registry.create_case(&self.session, patient_ref, upload)
    }

    pub async fn request_analysis(&mut self, case_id: &str) -> Result<PatientCase> {
        self.registry.request_analysis(&self.session, case_id).await
    }

    pub fn update_notes(&mut self, case_id: &str, notes: &str) -> Result<PatientCase> {
        self.registry.update_notes(&self.session, case_id, notes)
    }

    pub async fn continue_chat<F>(
        &mut self,
        case_id: &str,
        message: &str,
        on_fragment: F,
    ) -> Result<ChatMessage>
    where
        F: FnMut(&str),
    {
        self.registry
            .continue_chat(&self.session, case_id, message, on_fragment)
            .await
    }

    /// 统计指标，需要登录
    pub fn stats(&self) -> Result<SystemStats> {
        self.session.require_user()?;
        Ok(compute_stats(self.registry.worklist(), self.identity.users()))
    }

    /// 投递联系表单，无需登录
    pub async fn contact(&self, inquiry: ContactInquiry) -> Result<()> {
        if inquiry.name.trim().is_empty() || inquiry.message.trim().is_empty() {
            return Err(MammoError::Validation(
                "name and message are required".to_string(),
            ));
        }
        if !inquiry.email.contains('@') {
            return Err(MammoError::Validation(format!(
                "invalid email address: {}",
                inquiry.email
            )));
        }
        if !self.notifier.send_inquiry(&inquiry).await {
            return Err(MammoError::NotificationFailure(
                "contact inquiry could not be delivered".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::{self, StreamExt};
    use mammo_core::{AnalysisResult, CaseStatus, Diagnosis, RegionOfInterest, UserStatus};
    use mammo_integration::{ChatRequest, DiagnosticRequest, FragmentStream};

    struct FixedDiagnostics;

    #[async_trait]
    impl DiagnosticService for FixedDiagnostics {
        async fn analyze(&self, _request: DiagnosticRequest) -> Result<AnalysisResult> {
            Ok(AnalysisResult {
                diagnosis: Diagnosis::Benign,
                confidence: 0.8,
                explanation: "uniform density".to_string(),
                factors: vec!["Density".to_string()],
                region: RegionOfInterest { x: 0.3, y: 0.3, r: 0.1 },
            })
        }

        async fn continue_chat(&self, _request: ChatRequest) -> Result<FragmentStream> {
            Ok(stream::iter(vec![Ok("Routine follow-up.".to_string())]).boxed())
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.backend = "memory".to_string();
        config.identity.hash_iterations = 10;
        config.notification.outbox_path = None;
        config
    }

    fn system() -> (ReviewSystem, Arc<OutboxSender>) {
        let config = test_config();
        let store = Arc::new(RecordStore::new(Box::new(MemoryStore::new()), 10));
        let outbox = Arc::new(OutboxSender::new());
        let system =
            ReviewSystem::assemble(store, outbox.clone(), Arc::new(FixedDiagnostics), &config)
                .unwrap();
        (system, outbox)
    }

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let system = ReviewSystem::from_config(&test_config()).unwrap();
        assert!(system.current_user().is_none());
        assert!(matches!(system.stats(), Err(MammoError::Permission(_))));
    }

    #[tokio::test]
    async fn test_outbox_spools_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("fresh-data");
        let mut config = test_config();
        config.storage.backend = "file".to_string();
        config.storage.data_dir = data_dir.to_string_lossy().into_owned();

        let mut system = ReviewSystem::from_config(&config).unwrap();
        system
            .register("Dr. Park", "park@clinic.org", "pw-park", UserRole::Doctor, "")
            .await
            .unwrap();

        let spooled = std::fs::read_to_string(data_dir.join(crate::config::OUTBOX_FILE)).unwrap();
        assert!(spooled.contains("park@clinic.org"));
        assert!(data_dir.join("xai_system_users.json").exists());
    }

    #[tokio::test]
    async fn test_onboarding_to_review() {
        let (mut system, outbox) = system();

        system
            .register("Dr. Lee", "lee@clinic.org", "pw-lee", UserRole::Doctor, "")
            .await
            .unwrap();
        assert!(matches!(
            system.login("lee@clinic.org", "pw-lee"),
            Err(MammoError::VerificationRequired { .. })
        ));
        let code = outbox.last_code_for("lee@clinic.org").unwrap();
        system.verify("lee@clinic.org", &code).unwrap();
        system.login("lee@clinic.org", "pw-lee").unwrap();

        let case = system
            .create_case(
                "p-77",
                ImageUpload {
                    bytes: vec![9, 9, 9],
                    mime_type: "image/png".to_string(),
                },
            )
            .unwrap();
        system.request_analysis(&case.id).await.unwrap();
        let reply = system
            .continue_chat(&case.id, "Next?", |_| {})
            .await
            .unwrap();
        assert_eq!(reply.text, "Routine follow-up.");

        let stats = system.stats().unwrap();
        assert_eq!(stats.total_scans, 3);
        assert_eq!(stats.active_doctors, 2);

        let reviewed = system.update_notes(&case.id, "Benign, annual screening.").unwrap();
        assert_eq!(reviewed.status, CaseStatus::InReview);
        assert_eq!(system.get_case(&case.id).unwrap().patient_id, "P-77");
    }

    #[tokio::test]
    async fn test_admin_surface() {
        let (mut system, _) = system();
        system.login("doctor@example.com", "password123").unwrap();
        assert!(matches!(system.users(), Err(MammoError::Permission(_))));
        system.logout().unwrap();

        system.login("admin@example.com", "password123").unwrap();
        assert_eq!(system.users().unwrap().len(), 3);
        let blocked = system
            .update_user_by_email("research@example.com", UserUpdate::status(UserStatus::Blocked))
            .unwrap();
        assert_eq!(blocked.status, UserStatus::Blocked);
    }

    #[tokio::test]
    async fn test_contact_inquiry() {
        let (system, outbox) = system();
        let inquiry = ContactInquiry {
            name: "Visitor".to_string(),
            email: "visitor@example.com".to_string(),
            subject: "Pilot".to_string(),
            message: "We would like a demo.".to_string(),
        };
        system.contact(inquiry.clone()).await.unwrap();
        assert_eq!(outbox.sent_inquiries(), vec![inquiry]);

        let empty = ContactInquiry {
            name: String::new(),
            email: "v@example.com".to_string(),
            subject: String::new(),
            message: String::new(),
        };
        assert!(matches!(
            system.contact(empty).await,
            Err(MammoError::Validation(_))
        ));
    }
}
