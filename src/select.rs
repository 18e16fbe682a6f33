use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::formats::SummaryResult;
use crate::observe::{PipelineEvent, PipelineObserver};
use crate::score::ScoredCandidate;
use crate::store::HistoryStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Repetition is allowed once summaries / content instances reaches this.
    pub repetition_threshold: f64,
    /// Score added per summary since a unit was last used, in repetition mode.
    pub staleness_weight: f64,
    pub recency_window_hours: i64,
    /// How many recent summaries feed the staleness map.
    pub history_limit: usize,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            repetition_threshold: 0.01,
            staleness_weight: 10.0,
            recency_window_hours: 24,
            history_limit: 20,
        }
    }
}

/// What the selector knows about a user's past runs. Read once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionHistory {
    pub summarized_ids: HashSet<String>,
    pub summary_count: usize,
    pub content_instance_count: usize,
    /// Unit id to how many summaries ago it was last used (1 = most recent).
    pub summaries_ago: HashMap<String, usize>,
    /// Number of recent summaries `summaries_ago` was built from.
    pub window: usize,
}

impl SelectionHistory {
    /// `recent` must be ordered most recent first.
    pub fn from_recent(
        recent: &[SummaryResult],
        summarized_ids: HashSet<String>,
        stats: HistoryStats,
    ) -> Self {
        let mut summaries_ago = HashMap::new();
        for (index, summary) in recent.iter().enumerate() {
            for source in &summary.source_content {
                summaries_ago
                    .entry(source.unit_id.clone())
                    .or_insert(index + 1);
            }
        }
        Self {
            summarized_ids,
            summary_count: stats.summary_count,
            content_instance_count: stats.content_instance_count,
            summaries_ago,
            window: recent.len(),
        }
    }

    pub fn repetition_ratio(&self) -> f64 {
        self.summary_count as f64 / self.content_instance_count.max(1) as f64
    }

    pub fn staleness(&self, unit_id: &str) -> usize {
        self.summaries_ago
            .get(unit_id)
            .copied()
            .unwrap_or(self.window + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Fresh(ScoredCandidate),
    Repeat {
        candidate: ScoredCandidate,
        summaries_ago: usize,
    },
    NoSelection {
        reason: String,
    },
}

impl Selection {
    pub fn candidate(&self) -> Option<&ScoredCandidate> {
        match self {
            Self::Fresh(candidate) | Self::Repeat { candidate, .. } => Some(candidate),
            Self::NoSelection { .. } => None,
        }
    }

    pub fn is_repetition(&self) -> bool {
        matches!(self, Self::Repeat { .. })
    }
}

/// Picks at most one candidate: the best unprocessed one, else the stalest
/// one when the history allows repetition.
pub fn select(
    candidates: Vec<ScoredCandidate>,
    history: &SelectionHistory,
    recently_processed: &HashSet<String>,
    policy: &SelectionPolicy,
    observer: &dyn PipelineObserver,
) -> Selection {
    let total = candidates.len();
    let ratio = history.repetition_ratio();

    let (mut available, used): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| {
        !history.summarized_ids.contains(&c.unit.id) && !recently_processed.contains(&c.unit.id)
    });
    let available_count = available.len();

    let selection = if !available.is_empty() {
        available.sort_by(|a, b| b.total.total_cmp(&a.total));
        Selection::Fresh(available.swap_remove(0))
    } else if used.is_empty() {
        Selection::NoSelection {
            reason: "no content units were extracted".to_owned(),
        }
    } else if ratio < policy.repetition_threshold {
        Selection::NoSelection {
            reason: format!(
                "every unit was already summarized and the repetition ratio {ratio:.4} is below {}",
                policy.repetition_threshold
            ),
        }
    } else {
        let mut repeated = used
            .into_iter()
            .map(|mut candidate| {
                let summaries_ago = history.staleness(&candidate.unit.id);
                candidate.breakdown.repetition_bonus =
                    policy.staleness_weight * summaries_ago as f64;
                candidate.total = candidate.breakdown.universal + candidate.breakdown.repetition_bonus;
                (candidate, summaries_ago)
            })
            .collect::<Vec<_>>();
        repeated.sort_by(|a, b| b.0.total.total_cmp(&a.0.total));
        let (candidate, summaries_ago) = repeated.swap_remove(0);
        Selection::Repeat {
            candidate,
            summaries_ago,
        }
    };

    observer.record(PipelineEvent::SelectionMade {
        unit_id: selection.candidate().map(|c| c.unit.id.clone()),
        repetition: selection.is_repetition(),
        candidates: total,
        available: available_count,
        repetition_ratio: ratio,
    });

    selection
}
