//! 工作列表过滤

use chrono::NaiveDate;
use mammo_core::utils::normalize_patient_ref;
use mammo_core::{CaseStatus, Diagnosis, PatientCase};
use serde::{Deserialize, Serialize};

/// 工作列表过滤器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFilter {
    pub status: Option<Vec<CaseStatus>>,
    pub diagnosis: Option<Vec<Diagnosis>>,
    /// 患者标识前缀，大小写不敏感
    pub patient_prefix: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Default for CaseFilter {
    fn default() -> Self {
        Self {
            status: None,
            diagnosis: None,
            patient_prefix: None,
            date_from: None,
            date_to: None,
            limit: Some(50),
            offset: Some(0),
        }
    }
}

impl CaseFilter {
    pub fn matches(&self, case: &PatientCase) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&case.status) {
                return false;
            }
        }
        if let Some(diagnoses) = &self.diagnosis {
            match &case.analysis_result {
                Some(result) if diagnoses.contains(&result.diagnosis) => {}
                _ => return false,
            }
        }
        if let Some(prefix) = &self.patient_prefix {
            if !case.patient_id.starts_with(&normalize_patient_ref(prefix)) {
                return false;
            }
        }
        if self.date_from.map_or(false, |from| case.date < from) {
            return false;
        }
        if self.date_to.map_or(false, |to| case.date > to) {
            return false;
        }
        true
    }

    /// 过滤并分页，保持工作列表原有顺序
    pub fn apply(&self, cases: &[PatientCase]) -> Vec<PatientCase> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(50);

        cases
            .iter()
            .filter(|case| self.matches(case))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mammo_storage::seed::initial_cases;

    #[test]
    fn test_default_filter_keeps_order() {
        let cases = initial_cases();
        let result = CaseFilter::default().apply(&cases);
        let ids: Vec<&str> = result.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["case-1", "case-3"]);
    }

    #[test]
    fn test_filter_by_diagnosis_and_patient() {
        let cases = initial_cases();

        let malignant = CaseFilter {
            diagnosis: Some(vec![Diagnosis::Malignant]),
            ..Default::default()
        };
        assert_eq!(malignant.apply(&cases)[0].id, "case-3");

        let by_patient = CaseFilter {
            patient_prefix: Some("p001".to_string()),
            ..Default::default()
        };
        assert_eq!(by_patient.apply(&cases).len(), 1);
    }

    #[test]
    fn test_paging_and_dates() {
        let cases = initial_cases();
        let second_page = CaseFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        assert_eq!(second_page.apply(&cases)[0].id, "case-3");

        let since = CaseFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 7, 27),
            ..Default::default()
        };
        assert_eq!(since.apply(&cases).len(), 1);

        let beyond = CaseFilter {
            offset: Some(10),
            ..Default::default()
        };
        assert!(beyond.apply(&cases).is_empty());
    }
}
