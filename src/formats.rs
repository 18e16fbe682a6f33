use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::UnitKind;
use crate::prompt::SummaryStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Lenient parse for model output; unknown values fall back to medium.
    pub fn parse_loose(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" | "urgent" | "critical" => Self::High,
            "low" | "minor" => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub text: String,
    pub priority: Priority,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// The unit a summary was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub unit_id: String,
    pub title: String,
    pub kind: UnitKind,
    pub page_id: String,
    pub page_title: String,
    pub word_count: usize,
}

/// Output of one run. Downstream delivery reads `summary`, `action_items`,
/// `key_insights`, `priority` and `reading_time_minutes`; keep them stable.
///
/// `source_content` always holds exactly one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub id: String,
    pub user_id: String,
    pub page_id: String,
    pub source_content: Vec<SourceRef>,
    pub summary: String,
    pub action_items: Vec<ActionItem>,
    pub key_insights: Vec<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub word_count: usize,
    pub reading_time_minutes: u32,
    pub is_repetition: bool,
    pub model: String,
    pub style: SummaryStyle,
    /// Content instances the run considered; feeds the repetition ratio.
    pub candidate_count: usize,
    pub created_at: DateTime<Utc>,
}

impl SummaryResult {
    pub fn source(&self) -> Option<&SourceRef> {
        self.source_content.first()
    }
}
