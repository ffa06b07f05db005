//! AI诊断服务模块
//!
//! 影像分类走一次性的 `generateContent` 调用，返回结构化 JSON；
//! 基于分析结果的追问走 `streamGenerateContent` 的 SSE 流，逐段返回文本。

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::{self, BoxStream, StreamExt};
use mammo_core::{
    AnalysisResult, ChatMessage, ChatRole, Diagnosis, ImageUpload, MammoError, RegionOfInterest,
    Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, error, info};

/// 分类提示词
const ANALYSIS_PROMPT: &str = "You are a clinical diagnostic assistant for mammography and breast \
ultrasound. First decide whether the image is a breast scan. If it is not, set diagnosis to \
\"Invalid\", confidence to 0 and the region to zeros. Otherwise classify it as \"Malignant\" or \
\"Benign\", give a confidence between 0 and 1, a paragraph explaining the local features, the top \
three contributing factors, and a normalized region of interest {x, y, r}.";

/// 追问返回的文本片段流
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// 分类请求
#[derive(Debug, Clone)]
pub struct DiagnosticRequest {
    pub image: ImageUpload,
}

/// 追问请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub analysis: AnalysisResult,
    pub history: Vec<ChatMessage>,
    pub message: String,
}

/// AI诊断服务接口
#[async_trait]
pub trait DiagnosticService: Send + Sync {
    /// 对影像做分类
    async fn analyze(&self, request: DiagnosticRequest) -> Result<AnalysisResult>;

    /// 基于分析结果继续对话，返回惰性、有限且不可重放的片段流
    async fn continue_chat(&self, request: ChatRequest) -> Result<FragmentStream>;
}

/// 生成式模型接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerativeConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// 模型返回的结构化结论
#[derive(Debug, Deserialize)]
struct ModelVerdict {
    diagnosis: Diagnosis,
    confidence: f64,
    explanation: String,
    #[serde(default)]
    factors: Vec<String>,
    #[serde(default)]
    region: RegionOfInterest,
}

/// 基于 REST 接口的生成式模型客户端
pub struct GenerativeDiagnosticClient {
    client: reqwest::Client,
    config: GenerativeConfig,
}

impl GenerativeDiagnosticClient {
    pub fn new(config: GenerativeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MammoError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model,
            method
        )
    }

    async fn post(&self, url: String, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Diagnostic service unreachable: {}", e);
                MammoError::DiagnosticFailure(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("Diagnostic service returned {}: {}", status, text);
            return Err(MammoError::DiagnosticFailure(format!("HTTP {}", status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl DiagnosticService for GenerativeDiagnosticClient {
    async fn analyze(&self, request: DiagnosticRequest) -> Result<AnalysisResult> {
        info!(
            "Requesting analysis for {} bytes of {}",
            request.image.bytes.len(),
            request.image.mime_type
        );
        let body = analysis_body(&request.image);
        let response = self.post(self.url("generateContent"), &body).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| MammoError::DiagnosticFailure(format!("unreadable response: {}", e)))?;
        parse_analysis_response(&payload)
    }

    async fn continue_chat(&self, request: ChatRequest) -> Result<FragmentStream> {
        let body = chat_body(&request)?;
        let response = self
            .post(self.url("streamGenerateContent?alt=sse"), &body)
            .await?;
        debug!("Chat stream opened");

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| MammoError::DiagnosticFailure(e.to_string()))
            })
            .boxed();
        Ok(sse_fragments(chunks))
    }
}

/// 分类请求体
pub fn analysis_body(image: &ImageUpload) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": STANDARD.encode(&image.bytes),
                    }
                },
                { "text": ANALYSIS_PROMPT },
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "diagnosis": { "type": "STRING", "enum": ["Malignant", "Benign", "Invalid"] },
                    "confidence": { "type": "NUMBER" },
                    "explanation": { "type": "STRING" },
                    "factors": { "type": "ARRAY", "items": { "type": "STRING" } },
                    "region": {
                        "type": "OBJECT",
                        "properties": {
                            "x": { "type": "NUMBER" },
                            "y": { "type": "NUMBER" },
                            "r": { "type": "NUMBER" },
                        },
                        "required": ["x", "y", "r"],
                    },
                },
                "required": ["diagnosis", "confidence", "explanation", "factors", "region"],
            }
        }
    })
}

/// 追问请求体，分析结果作为系统指令
pub fn chat_body(request: &ChatRequest) -> Result<Value> {
    let analysis = serde_json::to_string(&request.analysis)?;
    let instruction = format!(
        "You are an oncology assistant. Provide clinical follow-up based on this analysis: {}. \
         If the analysis was Invalid, explain that only mammograms or breast ultrasound scans \
         are processed.",
        analysis
    );

    let mut contents: Vec<Value> = request
        .history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Model => "model",
            };
            json!({ "role": role, "parts": [{ "text": turn.text }] })
        })
        .collect();
    contents.push(json!({ "role": "user", "parts": [{ "text": request.message }] }));

    Ok(json!({
        "systemInstruction": { "parts": [{ "text": instruction }] },
        "contents": contents,
    }))
}

/// 拼接首个候选结果中的全部文本
pub fn extract_text(payload: &Value) -> String {
    payload["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// 解析分类响应并校验取值范围
pub fn parse_analysis_response(payload: &Value) -> Result<AnalysisResult> {
    if let Some(message) = payload["error"]["message"].as_str() {
        return Err(MammoError::DiagnosticFailure(message.to_string()));
    }
    let text = extract_text(payload);
    if text.trim().is_empty() {
        return Err(MammoError::DiagnosticFailure(
            "empty response from model".to_string(),
        ));
    }

    let verdict: ModelVerdict = serde_json::from_str(text.trim())
        .map_err(|e| MammoError::DiagnosticFailure(format!("malformed verdict: {}", e)))?;

    AnalysisResult {
        diagnosis: verdict.diagnosis,
        confidence: verdict.confidence,
        explanation: verdict.explanation,
        factors: verdict.factors,
        region: verdict.region,
    }
    .validated()
}

/// 解析一行 SSE，返回其中的文本片段
pub fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let payload: Value = serde_json::from_str(data)
        .map_err(|e| MammoError::DiagnosticFailure(format!("malformed stream event: {}", e)))?;
    if let Some(message) = payload["error"]["message"].as_str() {
        return Err(MammoError::DiagnosticFailure(message.to_string()));
    }

    let text = extract_text(&payload);
    Ok(if text.is_empty() { None } else { Some(text) })
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        match parse_sse_line(line.trim_end()) {
            Ok(Some(text)) => self.pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// 把字节块流切分成 SSE 行并转换为文本片段流
///
/// 第一个错误之后流即结束。
pub fn sse_fragments(body: BoxStream<'static, Result<Vec<u8>>>) -> FragmentStream {
    let state = SseState {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state.pending.push_back(Err(e));
                }
                None => {
                    state.flush();
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
