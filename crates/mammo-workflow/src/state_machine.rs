//! 病例状态机
//!
//! 病例以 Pending 创建；AI结果写入后进入 Analyzed；编辑备注后进入
//! In Review，且不会自动回到 Analyzed。

use mammo_core::{CaseStatus, MammoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 病例状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseEvent {
    AnalysisCompleted,
    NotesEdited,
}

/// 病例状态机
#[derive(Debug)]
pub struct CaseStateMachine {
    transitions: HashMap<(CaseStatus, CaseEvent), CaseStatus>,
}

impl CaseStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        for state in Self::all_states() {
            // 重新分析会覆盖旧结果
            transitions.insert((state, CaseEvent::AnalysisCompleted), CaseStatus::Analyzed);
            transitions.insert((state, CaseEvent::NotesEdited), CaseStatus::InReview);
        }

        Self { transitions }
    }

    pub fn can_transition(&self, from: CaseStatus, event: CaseEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: CaseStatus, event: CaseEvent) -> Result<CaseStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| MammoError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            })
    }

    pub fn all_states() -> Vec<CaseStatus> {
        vec![CaseStatus::Pending, CaseStatus::Analyzed, CaseStatus::InReview]
    }
}

impl Default for CaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_and_review() {
        let sm = CaseStateMachine::new();
        let analyzed = sm
            .transition(CaseStatus::Pending, CaseEvent::AnalysisCompleted)
            .unwrap();
        assert_eq!(analyzed, CaseStatus::Analyzed);
        let review = sm.transition(analyzed, CaseEvent::NotesEdited).unwrap();
        assert_eq!(review, CaseStatus::InReview);
    }

    #[test]
    fn test_notes_edit_from_any_state() {
        let sm = CaseStateMachine::new();
        for state in CaseStateMachine::all_states() {
            assert_eq!(
                sm.transition(state, CaseEvent::NotesEdited).unwrap(),
                CaseStatus::InReview
            );
        }
    }
}
