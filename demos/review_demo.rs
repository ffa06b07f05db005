//! 阅片流程演示程序
//!
//! 在内存存储上走完一遍完整流程：医生注册并验证邮箱、登录、上传影像、
//! 请求AI分析、追问、编辑备注，最后由研究人员查看统计指标。
//! AI诊断服务使用固定脚本，无需网络与密钥。

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mammo::core::{
    AnalysisResult, Diagnosis, ImageUpload, RegionOfInterest, UserRole,
};
use mammo::integration::{
    ChatRequest, DiagnosticRequest, DiagnosticService, FragmentStream, OutboxSender,
};
use mammo::storage::seed::SEED_PASSWORD;
use mammo::storage::{MemoryStore, RecordStore};
use mammo::{AppConfig, ReviewSystem};
use std::sync::Arc;

/// 固定输出的诊断服务
struct ScriptedDiagnostics;

#[async_trait]
impl DiagnosticService for ScriptedDiagnostics {
    async fn analyze(&self, request: DiagnosticRequest) -> mammo::Result<AnalysisResult> {
        println!("   (诊断服务收到 {} 字节影像)", request.image.bytes.len());
        Ok(AnalysisResult {
            diagnosis: Diagnosis::Malignant,
            confidence: 0.87,
            explanation: "Irregular mass with spiculated margins in the upper outer quadrant."
                .to_string(),
            factors: vec![
                "Spiculated Margins".to_string(),
                "High Density".to_string(),
            ],
            region: RegionOfInterest {
                x: 0.62,
                y: 0.35,
                r: 0.12,
            },
        })
    }

    async fn continue_chat(&self, request: ChatRequest) -> mammo::Result<FragmentStream> {
        let fragments = vec![
            Ok(format!("Regarding \"{}\": ", request.message)),
            Ok("the spiculated margins ".to_string()),
            Ok("warrant a core needle biopsy.".to_string()),
        ];
        Ok(stream::iter(fragments).boxed())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = AppConfig::default();
    config.storage.backend = "memory".to_string();
    config.identity.hash_iterations = 100;

    let store = Arc::new(RecordStore::new(
        Box::new(MemoryStore::new()),
        config.identity.hash_iterations,
    ));
    let outbox = Arc::new(OutboxSender::new());
    let mut system = ReviewSystem::assemble(
        store,
        outbox.clone(),
        Arc::new(ScriptedDiagnostics),
        &config,
    )?;

    println!("🚀 乳腺影像阅片平台演示\n");

    // 1. 注册并验证
    let email = system
        .register(
            "Dr. Amelia Chen",
            "amelia.chen@clinic.org",
            "s3cure-pass",
            UserRole::Doctor,
            "",
        )
        .await?;
    let code = outbox
        .last_code_for(&email)
        .ok_or_else(|| anyhow::anyhow!("no verification code was dispatched"))?;
    println!("✅ 注册完成，验证码已发送至 {}", email);

    let user = system.verify(&email, &code)?;
    println!("✅ 邮箱验证通过，账户状态: {}", user.status);

    // 2. 登录
    let user = system.login(&email, "s3cure-pass")?;
    println!("✅ 已登录: {} ({}, {})\n", user.name, user.role, user.specialization);

    // 3. 上传影像并分析
    let case = system.create_case(
        "P104-LCC.PNG",
        ImageUpload {
            bytes: vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a],
            mime_type: "image/png".to_string(),
        },
    )?;
    println!("📋 新建病例 {} (状态: {})", case.id, case.status);

    let case = system.request_analysis(&case.id).await?;
    if let Some(result) = &case.analysis_result {
        println!(
            "🔬 分析结果: {} 置信度 {:.0}%",
            result.diagnosis,
            result.confidence * 100.0
        );
        println!("   {}", result.explanation);
    }

    // 4. 追问
    print!("\n💬 ");
    let reply = system
        .continue_chat(&case.id, "What is the recommended next step?", |fragment| {
            print!("{}", fragment);
        })
        .await?;
    println!("\n   (共 {} 字)", reply.text.chars().count());

    // 5. 编辑备注
    let case = system.update_notes(&case.id, "Recommend biopsy, discussed with patient.")?;
    println!("📝 备注已保存，病例状态: {}\n", case.status);

    // 6. 研究人员查看统计
    system.logout()?;
    system.login("research@example.com", SEED_PASSWORD)?;
    let stats = system.stats()?;
    println!("📊 统计指标:");
    println!("   病例总数: {}", stats.total_scans);
    println!("   恶性病例: {}", stats.malignant_found);
    println!("   平均置信度: {:.2}", stats.avg_confidence);
    println!("   在岗医生: {}", stats.active_doctors);
    for share in &stats.diagnosis_breakdown {
        println!(
            "   {}: {} ({:.2}%)",
            share.diagnosis, share.count, share.percentage
        );
    }

    Ok(())
}
