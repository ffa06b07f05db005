//! 病例登记
//!
//! 持有内存中的病例集合（按创建时间倒序），每次变更后立即写回存储；
//! 写入失败时内存状态回滚到变更前。

use crate::chat::InProgressTurn;
use crate::state_machine::{CaseEvent, CaseStateMachine};
use crate::worklist::CaseFilter;
use futures::StreamExt;
use mammo_core::utils::{decode_data_url, encode_data_url, generate_case_id, normalize_patient_ref};
use mammo_core::{
    CaseStatus, ChatMessage, ChatRole, Clock, ImageUpload, MammoError, PatientCase, Result,
    SystemClock, UserRole,
};
use mammo_identity::SessionContext;
use mammo_integration::{ChatRequest, DiagnosticRequest, DiagnosticService};
use mammo_storage::RecordStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 病例登记
pub struct CaseRegistry {
    store: Arc<RecordStore>,
    cases: Vec<PatientCase>,
    diagnostics: Arc<dyn DiagnosticService>,
    state_machine: CaseStateMachine,
    clock: Arc<dyn Clock>,
}

impl CaseRegistry {
    pub fn new(store: Arc<RecordStore>, diagnostics: Arc<dyn DiagnosticService>) -> Result<Self> {
        let cases = store.load_cases()?;
        info!("Case registry loaded {} cases", cases.len());
        Ok(Self {
            store,
            cases,
            diagnostics,
            state_machine: CaseStateMachine::new(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 工作列表，最新的病例在前
    pub fn worklist(&self) -> &[PatientCase] {
        &self.cases
    }

    pub fn get_case(&self, case_id: &str) -> Option<&PatientCase> {
        self.cases.iter().find(|c| c.id == case_id)
    }

    pub fn query(&self, filter: &CaseFilter) -> Vec<PatientCase> {
        filter.apply(&self.cases)
    }

    /// 出现过的病人编号，去重后按工作列表顺序排列
    pub fn patient_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.cases
            .iter()
            .filter(|c| seen.insert(c.patient_id.as_str()))
            .map(|c| c.patient_id.clone())
            .collect()
    }

    /// 为上传的影像登记新病例
    pub fn create_case(
        &mut self,
        session: &SessionContext,
        patient_ref: &str,
        upload: ImageUpload,
    ) -> Result<PatientCase> {
        let doctor = session.require_role(UserRole::Doctor)?;
        let patient_id = normalize_patient_ref(patient_ref);
        if patient_id.is_empty() {
            return Err(MammoError::Validation("patient reference must not be empty".to_string()));
        }
        if upload.bytes.is_empty() {
            return Err(MammoError::Validation("image upload is empty".to_string()));
        }

        let case = PatientCase {
            id: generate_case_id(),
            patient_id,
            date: self.clock.now().date_naive(),
            status: CaseStatus::Pending,
            preview_url: Some(encode_data_url(&upload)),
            image_upload: Some(upload),
            analysis_result: None,
            chat_history: Vec::new(),
            notes: String::new(),
        };

        self.cases.insert(0, case.clone());
        if let Err(e) = self.store.save_cases(&self.cases) {
            self.cases.remove(0);
            error!("Failed to persist new case: {}", e);
            return Err(e);
        }

        info!("{} created case {} for {}", doctor.email, case.id, case.patient_id);
        Ok(case)
    }

    /// 请求AI分析
    ///
    /// 优先使用会话内的原始上传，否则从预览还原。失败时病例保持原样。
    pub async fn request_analysis(
        &mut self,
        session: &SessionContext,
        case_id: &str,
    ) -> Result<PatientCase> {
        session.require_role(UserRole::Doctor)?;
        let index = self.index_of(case_id)?;
        let image = self.image_for(&self.cases[index])?;

        info!("Requesting analysis for case {}", case_id);
        let result = self
            .diagnostics
            .analyze(DiagnosticRequest { image })
            .await
            .and_then(|result| result.validated())
            .map_err(|e| {
                error!("Analysis failed for case {}: {}", case_id, e);
                match e {
                    MammoError::DiagnosticFailure(_) => e,
                    other => MammoError::DiagnosticFailure(other.to_string()),
                }
            })?;

        let mut case = self.cases[index].clone();
        case.status = self
            .state_machine
            .transition(case.status, CaseEvent::AnalysisCompleted)?;
        info!(
            "Case {} analyzed: {} ({:.2})",
            case_id, result.diagnosis, result.confidence
        );
        case.analysis_result = Some(result);
        self.commit(index, case)
    }

    /// 覆盖备注，病例进入复核
    pub fn update_notes(
        &mut self,
        session: &SessionContext,
        case_id: &str,
        notes: &str,
    ) -> Result<PatientCase> {
        session.require_role(UserRole::Doctor)?;
        let index = self.index_of(case_id)?;

        let mut case = self.cases[index].clone();
        case.notes = notes.to_string();
        case.status = self
            .state_machine
            .transition(case.status, CaseEvent::NotesEdited)?;
        debug!("Notes updated on case {}", case_id);
        self.commit(index, case)
    }

    /// 追加一条对话
    pub fn append_chat_turn(
        &mut self,
        session: &SessionContext,
        case_id: &str,
        role: ChatRole,
        text: &str,
    ) -> Result<PatientCase> {
        session.require_role(UserRole::Doctor)?;
        let index = self.index_of(case_id)?;

        let mut case = self.cases[index].clone();
        case.chat_history.push(ChatMessage {
            role,
            text: text.to_string(),
        });
        self.commit(index, case)
    }

    /// 基于分析结果追问
    ///
    /// 用户消息先写入；模型回复的片段在 [`InProgressTurn`] 中累积，
    /// 每收到一段调用一次 `on_fragment`，结束后作为一条消息写入。
    /// 服务出错时写入固定的兜底回复，不向调用方返回错误。
    pub async fn continue_chat<F>(
        &mut self,
        session: &SessionContext,
        case_id: &str,
        message: &str,
        mut on_fragment: F,
    ) -> Result<ChatMessage>
    where
        F: FnMut(&str),
    {
        session.require_role(UserRole::Doctor)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(MammoError::Validation("message must not be empty".to_string()));
        }
        let index = self.index_of(case_id)?;
        let analysis = self.cases[index].analysis_result.clone().ok_or_else(|| {
            MammoError::Validation(format!("case {} has no analysis to discuss", case_id))
        })?;

        let request = ChatRequest {
            analysis,
            history: self.cases[index].chat_history.clone(),
            message: message.to_string(),
        };
        self.append_chat_turn(session, case_id, ChatRole::User, message)?;

        let mut turn = InProgressTurn::new();
        let mut failed = false;
        match self.diagnostics.continue_chat(request).await {
            Ok(mut fragments) => {
                while let Some(fragment) = fragments.next().await {
                    match fragment {
                        Ok(fragment) => {
                            turn.push(&fragment);
                            on_fragment(&fragment);
                        }
                        Err(e) => {
                            warn!("Chat stream for case {} broke off: {}", case_id, e);
                            failed = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Chat service unavailable for case {}: {}", case_id, e);
                failed = true;
            }
        }

        debug!(
            "Chat turn on case {} finished after {} fragments",
            case_id,
            turn.fragment_count()
        );
        let reply = if failed { turn.fail() } else { turn.finalize() };

        let index = self.index_of(case_id)?;
        let mut case = self.cases[index].clone();
        case.chat_history.push(reply.clone());
        self.commit(index, case)?;
        Ok(reply)
    }

    fn image_for(&self, case: &PatientCase) -> Result<ImageUpload> {
        if let Some(upload) = &case.image_upload {
            return Ok(upload.clone());
        }
        let preview = case.preview_url.as_deref().ok_or_else(|| {
            MammoError::DiagnosticFailure(format!("case {} has no image", case.id))
        })?;
        decode_data_url(preview).map_err(|e| {
            MammoError::DiagnosticFailure(format!(
                "preview of case {} cannot be decoded: {}",
                case.id, e
            ))
        })
    }

    fn index_of(&self, case_id: &str) -> Result<usize> {
        self.cases
            .iter()
            .position(|c| c.id == case_id)
            .ok_or_else(|| MammoError::NotFound(format!("case {}", case_id)))
    }

    fn commit(&mut self, index: usize, case: PatientCase) -> Result<PatientCase> {
        let previous = std::mem::replace(&mut self.cases[index], case);
        if let Err(e) = self.store.save_cases(&self.cases) {
            self.cases[index] = previous;
            error!("Failed to persist case update: {}", e);
            return Err(e);
        }
        Ok(self.cases[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use mammo_core::{AnalysisResult, Diagnosis, RegionOfInterest};
    use mammo_integration::FragmentStream;
    use mammo_storage::seed::initial_users;
    use mammo_storage::{FileStore, MemoryStore};
    use std::sync::Mutex;

    /// 按脚本返回结果的诊断服务
    struct ScriptedDiagnostics {
        verdict: std::result::Result<AnalysisResult, String>,
        fragments: Option<Vec<std::result::Result<String, String>>>,
        seen_images: Mutex<Vec<ImageUpload>>,
    }

    impl ScriptedDiagnostics {
        fn returning(diagnosis: Diagnosis, confidence: f64) -> Self {
            Self {
                verdict: Ok(AnalysisResult {
                    diagnosis,
                    confidence,
                    explanation: "irregular mass".to_string(),
                    factors: vec!["Density".to_string()],
                    region: RegionOfInterest {
                        x: 0.4,
                        y: 0.5,
                        r: 0.1,
                    },
                }),
                fragments: Some(vec![Ok("Consider ".to_string()), Ok("a biopsy.".to_string())]),
                seen_images: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                verdict: Err("model timeout".to_string()),
                fragments: None,
                seen_images: Mutex::new(Vec::new()),
            }
        }

        fn with_fragments(
            mut self,
            fragments: Option<Vec<std::result::Result<String, String>>>,
        ) -> Self {
            self.fragments = fragments;
            self
        }
    }

    #[async_trait]
    impl DiagnosticService for ScriptedDiagnostics {
        async fn analyze(&self, request: DiagnosticRequest) -> Result<AnalysisResult> {
            self.seen_images.lock().unwrap().push(request.image);
            self.verdict
                .clone()
                .map_err(MammoError::DiagnosticFailure)
        }

        async fn continue_chat(&self, _request: ChatRequest) -> Result<FragmentStream> {
            match &self.fragments {
                Some(fragments) => {
                    let items: Vec<Result<String>> = fragments
                        .iter()
                        .cloned()
                        .map(|f| f.map_err(MammoError::DiagnosticFailure))
                        .collect();
                    Ok(stream::iter(items).boxed())
                }
                None => Err(MammoError::DiagnosticFailure("unreachable".to_string())),
            }
        }
    }

    fn doctor_session() -> SessionContext {
        let users = initial_users(1);
        SessionContext::signed_in(users.into_iter().find(|u| u.role == UserRole::Doctor).unwrap())
    }

    fn researcher_session() -> SessionContext {
        let users = initial_users(1);
        SessionContext::signed_in(
            users
                .into_iter()
                .find(|u| u.role == UserRole::Researcher)
                .unwrap(),
        )
    }

    fn upload() -> ImageUpload {
        ImageUpload {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            mime_type: "image/jpeg".to_string(),
        }
    }

    fn memory_registry(
        diagnostics: ScriptedDiagnostics,
    ) -> (CaseRegistry, Arc<RecordStore>, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(RecordStore::new(Box::new(memory.clone()), 1));
        let registry = CaseRegistry::new(store.clone(), Arc::new(diagnostics)).unwrap();
        (registry, store, memory)
    }

    #[tokio::test]
    async fn test_case_lifecycle_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::new(Box::new(FileStore::new(dir.path()).unwrap()), 1));
        let diagnostics = Arc::new(ScriptedDiagnostics::returning(Diagnosis::Malignant, 0.95));
        let mut registry = CaseRegistry::new(store.clone(), diagnostics).unwrap();
        let session = doctor_session();

        let case = registry.create_case(&session, "p-01", upload()).unwrap();
        assert_eq!(case.patient_id, "P-01");
        assert_eq!(case.status, CaseStatus::Pending);
        assert_eq!(registry.worklist()[0].id, case.id);

        let analyzed = registry.request_analysis(&session, &case.id).await.unwrap();
        assert_eq!(analyzed.status, CaseStatus::Analyzed);
        let result = analyzed.analysis_result.as_ref().unwrap();
        assert_eq!(result.diagnosis, Diagnosis::Malignant);
        assert_eq!(result.confidence, 0.95);

        let reviewed = registry
            .update_notes(&session, &case.id, "Refer for core biopsy.")
            .unwrap();
        assert_eq!(reviewed.status, CaseStatus::InReview);

        let reloaded = store.load_cases().unwrap();
        let persisted = reloaded.iter().find(|c| c.id == case.id).unwrap();
        assert_eq!(persisted.notes, "Refer for core biopsy.");
        assert_eq!(persisted.status, CaseStatus::InReview);
        assert_eq!(persisted.patient_id, "P-01");
        assert!(persisted.image_upload.is_none());
        assert_eq!(persisted.preview_url, case.preview_url);
    }

    #[tokio::test]
    async fn test_analysis_after_reload_uses_preview() {
        let (mut registry, store, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let session = doctor_session();
        let case = registry.create_case(&session, "P-02", upload()).unwrap();

        let diagnostics = Arc::new(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let mut reloaded = CaseRegistry::new(store, diagnostics.clone()).unwrap();
        assert!(reloaded.get_case(&case.id).unwrap().image_upload.is_none());

        reloaded.request_analysis(&session, &case.id).await.unwrap();
        assert_eq!(diagnostics.seen_images.lock().unwrap()[0], upload());
    }

    #[tokio::test]
    async fn test_failed_analysis_leaves_case_untouched() {
        let (mut registry, store, _) = memory_registry(ScriptedDiagnostics::failing());
        let session = doctor_session();
        let case = registry.create_case(&session, "P-03", upload()).unwrap();

        let err = registry.request_analysis(&session, &case.id).await.unwrap_err();
        assert!(matches!(err, MammoError::DiagnosticFailure(_)));
        assert_eq!(registry.get_case(&case.id).unwrap(), &case);
        assert_eq!(store.load_cases().unwrap()[0].status, CaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_remote_preview_cannot_be_analyzed() {
        let (mut registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let err = registry
            .request_analysis(&doctor_session(), "case-1")
            .await
            .unwrap_err();
        assert!(matches!(err, MammoError::DiagnosticFailure(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_result_is_rejected() {
        let (mut registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 1.7));
        let session = doctor_session();
        let case = registry.create_case(&session, "P-04", upload()).unwrap();

        assert!(registry.request_analysis(&session, &case.id).await.is_err());
        assert!(registry.get_case(&case.id).unwrap().analysis_result.is_none());
    }

    #[tokio::test]
    async fn test_mutations_require_doctor() {
        let (mut registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let researcher = researcher_session();

        assert!(matches!(
            registry.create_case(&researcher, "P-05", upload()),
            Err(MammoError::Permission(_))
        ));
        assert!(matches!(
            registry.update_notes(&SessionContext::anonymous(), "case-1", "x"),
            Err(MammoError::Permission(_))
        ));
        assert!(matches!(
            registry.create_case(&doctor_session(), "   ", upload()),
            Err(MammoError::Validation(_))
        ));
        assert!(matches!(
            registry.update_notes(&doctor_session(), "case-404", "x"),
            Err(MammoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_stream_becomes_one_turn() {
        let (mut registry, store, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Malignant, 0.95));
        let session = doctor_session();

        let mut seen = Vec::new();
        let reply = registry
            .continue_chat(&session, "case-3", "Next step?", |f| seen.push(f.to_string()))
            .await
            .unwrap();
        assert_eq!(seen, vec!["Consider ", "a biopsy."]);
        assert_eq!(reply.text, "Consider a biopsy.");

        let history = &store.load_cases().unwrap()[1].chat_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("Next step?"));
        assert_eq!(history[1], ChatMessage::model("Consider a biopsy."));
    }

    #[tokio::test]
    async fn test_chat_failure_appends_fallback() {
        let diagnostics = ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9).with_fragments(
            Some(vec![Ok("Partial".to_string()), Err("reset".to_string())]),
        );
        let (mut registry, _, _) = memory_registry(diagnostics);
        let session = doctor_session();

        let reply = registry
            .continue_chat(&session, "case-1", "Explain", |_| {})
            .await
            .unwrap();
        assert_eq!(reply.text, crate::CHAT_FALLBACK);

        let history = &registry.get_case("case-1").unwrap().chat_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text, crate::CHAT_FALLBACK);
    }

    #[tokio::test]
    async fn test_chat_unavailable_appends_fallback() {
        let diagnostics =
            ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9).with_fragments(None);
        let (mut registry, _, _) = memory_registry(diagnostics);

        let reply = registry
            .continue_chat(&doctor_session(), "case-1", "Explain", |_| {})
            .await
            .unwrap();
        assert_eq!(reply, ChatMessage::model(crate::CHAT_FALLBACK));
    }

    #[tokio::test]
    async fn test_chat_requires_analysis() {
        let (mut registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let session = doctor_session();
        let case = registry.create_case(&session, "P-06", upload()).unwrap();

        let err = registry
            .continue_chat(&session, &case.id, "Anything?", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MammoError::Validation(_)));
        assert!(registry.get_case(&case.id).unwrap().chat_history.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_rolls_back() {
        let (mut registry, _, memory) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let session = doctor_session();
        memory.set_unavailable(true);

        assert!(matches!(
            registry.update_notes(&session, "case-1", "lost"),
            Err(MammoError::StoreUnavailable(_))
        ));
        assert_eq!(registry.get_case("case-1").unwrap().notes, "");
        assert!(registry.create_case(&session, "P-07", upload()).is_err());
        assert_eq!(registry.worklist().len(), 2);
    }

    #[tokio::test]
    async fn test_query_filters_worklist() {
        let (registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let filter = CaseFilter {
            status: Some(vec![CaseStatus::Analyzed]),
            ..Default::default()
        };
        assert_eq!(registry.query(&filter).len(), 2);
    }

    #[tokio::test]
    async fn test_patient_ids_are_distinct_in_worklist_order() {
        let (mut registry, _, _) =
            memory_registry(ScriptedDiagnostics::returning(Diagnosis::Benign, 0.9));
        let session = doctor_session();
        registry.create_case(&session, "p-01", upload()).unwrap();
        registry.create_case(&session, "p-02", upload()).unwrap();
        registry.create_case(&session, "P-01", upload()).unwrap();

        assert_eq!(
            registry.patient_ids(),
            vec!["P-01", "P-02", "P001-IMG4.JPEG", "P003-IMG5.JPG"]
        );
    }
}
