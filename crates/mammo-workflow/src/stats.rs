//! 统计汇总

use mammo_core::utils::round2;
use mammo_core::{
    CaseStatus, DailyScanCount, Diagnosis, DiagnosisShare, PatientCase, SystemStats, User,
    UserRole, UserStatus,
};
use std::collections::BTreeMap;

/// 从当前病例和用户集合计算统计指标
///
/// 只有状态为 Analyzed 的病例计入阳性数、平均置信度、每日计数和诊断构成。
pub fn compute_stats(cases: &[PatientCase], users: &[User]) -> SystemStats {
    let analyzed: Vec<&PatientCase> = cases
        .iter()
        .filter(|c| c.status == CaseStatus::Analyzed)
        .collect();

    let diagnoses: Vec<Diagnosis> = analyzed
        .iter()
        .filter_map(|c| c.analysis_result.as_ref().map(|r| r.diagnosis))
        .collect();

    let malignant_found = diagnoses
        .iter()
        .filter(|d| **d == Diagnosis::Malignant)
        .count();

    let avg_confidence = if analyzed.is_empty() {
        0.0
    } else {
        let sum: f64 = analyzed
            .iter()
            .map(|c| c.analysis_result.as_ref().map_or(0.0, |r| r.confidence))
            .sum();
        round2(sum / analyzed.len() as f64)
    };

    let active_doctors = users
        .iter()
        .filter(|u| u.role == UserRole::Doctor && u.status == UserStatus::Active)
        .count();

    let mut per_day: BTreeMap<chrono::NaiveDate, usize> = BTreeMap::new();
    for case in &analyzed {
        *per_day.entry(case.date).or_insert(0) += 1;
    }
    let daily_scans = per_day
        .into_iter()
        .map(|(date, count)| DailyScanCount { date, count })
        .collect();

    SystemStats {
        total_scans: cases.len(),
        malignant_found,
        avg_confidence,
        active_doctors,
        daily_scans,
        diagnosis_breakdown: breakdown(&diagnoses),
    }
}

fn breakdown(diagnoses: &[Diagnosis]) -> Vec<DiagnosisShare> {
    let total = diagnoses.len();
    [Diagnosis::Malignant, Diagnosis::Benign, Diagnosis::Invalid]
        .into_iter()
        .map(|diagnosis| {
            let count = diagnoses.iter().filter(|d| **d == diagnosis).count();
            let percentage = if total == 0 {
                0.0
            } else {
                round2(count as f64 * 100.0 / total as f64)
            };
            DiagnosisShare {
                diagnosis,
                count,
                percentage,
            }
        })
        .collect()
}
