//! 首次启动时写入的示例数据

use chrono::NaiveDate;
use mammo_core::password::hash_password;
use mammo_core::{
    AnalysisResult, CaseStatus, Diagnosis, PatientCase, RegionOfInterest, User, UserRole,
    UserStatus,
};

/// 示例账户的初始口令
pub const SEED_PASSWORD: &str = "password123";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// 两个已分析的示例病例
pub fn initial_cases() -> Vec<PatientCase> {
    vec![
        PatientCase {
            id: "case-1".to_string(),
            patient_id: "P001-IMG4.JPEG".to_string(),
            date: date(2024, 7, 28),
            status: CaseStatus::Analyzed,
            image_upload: None,
            preview_url: Some(
                "https://storage.googleapis.com/aistudio-hosting/test-assets/mammogram-benign.jpg"
                    .to_string(),
            ),
            analysis_result: Some(AnalysisResult {
                diagnosis: Diagnosis::Benign,
                confidence: 0.9488,
                explanation: "The scan shows uniform tissue density and no suspicious masses or \
                              microcalcifications."
                    .to_string(),
                factors: vec![
                    "Low Density".to_string(),
                    "Smooth Margins".to_string(),
                    "Uniform Tissue".to_string(),
                ],
                region: RegionOfInterest {
                    x: 0.6,
                    y: 0.4,
                    r: 0.2,
                },
            }),
            chat_history: Vec::new(),
            notes: String::new(),
        },
        PatientCase {
            id: "case-3".to_string(),
            patient_id: "P003-IMG5.JPG".to_string(),
            date: date(2024, 7, 26),
            status: CaseStatus::Analyzed,
            image_upload: None,
            preview_url: Some(
                concat!(
                    "https://storage.googleapis.com/aistudio-hosting/",
                    "test-assets/mammogram-malignant.jpg"
                )
                .to_string(),
            ),
            analysis_result: Some(AnalysisResult {
                diagnosis: Diagnosis::Malignant,
                confidence: 0.9533,
                explanation: "High-density mass with spiculated margins and architectural \
                              distortion."
                    .to_string(),
                factors: vec![
                    "High Density Mass".to_string(),
                    "Irregular Shape".to_string(),
                    "Spiculated Margins".to_string(),
                ],
                region: RegionOfInterest {
                    x: 0.5,
                    y: 0.5,
                    r: 0.15,
                },
            }),
            chat_history: Vec::new(),
            notes: "Urgent biopsy recommended.".to_string(),
        },
    ]
}

/// 三个角色各一个的示例账户
pub fn initial_users(iterations: u32) -> Vec<User> {
    let seed = |id: &str,
                name: &str,
                email: &str,
                specialization: &str,
                role: UserRole,
                joined: NaiveDate| User {
        id: id.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        credential: hash_password(SEED_PASSWORD, iterations),
        role,
        specialization: specialization.to_string(),
        status: UserStatus::Active,
        joined_at: joined,
        verification_code: None,
        reset_code: None,
    };

    vec![
        seed(
            "u-1",
            "Dr. John Radiologist",
            "doctor@example.com",
            "Oncology Radiology",
            UserRole::Doctor,
            date(2024, 1, 15),
        ),
        seed(
            "u-2",
            "Admin Controller",
            "admin@example.com",
            "System Admin",
            UserRole::Admin,
            date(2024, 1, 1),
        ),
        seed(
            "u-3",
            "Sarah Researcher",
            "research@example.com",
            "Data Science",
            UserRole::Researcher,
            date(2024, 2, 10),
        ),
    ]
}
