use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{ContentUnit, HighlightKind, ToggleLevel, UnitKind, UnitSource};
use crate::observe::{PipelineEvent, PipelineObserver};

const STRUCTURED_TITLE_PREFIXES: &[&str] = &[
    "week", "day", "chapter", "lesson", "module", "part", "unit", "step", "session", "lecture",
];

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| (*w).to_owned()).collect()
}

/// Every scoring constant. Relative ordering matters more than the exact
/// values; golden tests pin the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub toggle_base: f64,
    pub highlight_base: f64,
    pub section_base: f64,
    pub list_item_base: f64,
    pub page_base: f64,

    pub learning_keywords: Vec<String>,
    pub learning_multiplier: f64,
    pub structured_title_bonus: f64,
    pub length_tier_words: [usize; 3],
    pub length_tier_bonus: [f64; 3],
    pub quality_keywords: Vec<String>,
    pub quality_multiplier: f64,
    pub type_action_multiplier: f64,
    pub focused_bonus: f64,
    pub video_bonus: f64,
    pub open_todo_bonus: f64,
    pub list_item_count_bonus: f64,
    pub list_item_count_cap: usize,
    pub callout_bonus: f64,

    pub recency_days: f64,
    pub action_keywords: Vec<String>,
    pub action_multiplier: f64,
    pub insight_keywords: Vec<String>,
    pub insight_multiplier: f64,
    pub meeting_keywords: Vec<String>,
    pub meeting_bonus: f64,
    pub project_keywords: Vec<String>,
    pub project_bonus: f64,
    pub short_body_chars: usize,
    pub short_body_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            toggle_base: 15.0,
            highlight_base: 10.0,
            section_base: 12.0,
            list_item_base: 8.0,
            page_base: 5.0,

            learning_keywords: words(&[
                "learn", "lesson", "lecture", "tutorial", "course", "concept", "explain",
                "example", "exercise", "practice", "study", "video", "chapter", "review",
            ]),
            learning_multiplier: 3.0,
            structured_title_bonus: 5.0,
            length_tier_words: [50, 150, 300],
            length_tier_bonus: [8.0, 7.0, 5.0],
            quality_keywords: words(&[
                "important", "essential", "critical", "fundamental", "core", "summary",
                "takeaway", "principle", "best practice", "key",
            ]),
            quality_multiplier: 2.0,
            type_action_multiplier: 1.5,
            focused_bonus: 5.0,
            video_bonus: 2.0,
            open_todo_bonus: 4.0,
            list_item_count_bonus: 0.5,
            list_item_count_cap: 10,
            callout_bonus: 2.0,

            recency_days: 10.0,
            action_keywords: words(&[
                "todo", "to do", "action item", "next step", "follow up", "deadline", "need to",
                "must", "should", "schedule", "implement", "assign",
            ]),
            action_multiplier: 2.0,
            insight_keywords: words(&[
                "insight", "learned", "realized", "observation", "conclusion", "therefore",
                "pattern", "idea", "because",
            ]),
            insight_multiplier: 1.5,
            meeting_keywords: words(&["meeting", "agenda", "minutes", "attendees", "standup", "sync"]),
            meeting_bonus: 3.0,
            project_keywords: words(&[
                "project", "milestone", "roadmap", "sprint", "release", "launch", "deliverable",
            ]),
            project_bonus: 3.0,
            short_body_chars: 50,
            short_body_penalty: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub type_specific: f64,
    pub universal: f64,
    pub repetition_bonus: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.base + self.type_specific + self.universal + self.repetition_bonus
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub unit: ContentUnit,
    pub total: f64,
    pub breakdown: ScoreBreakdown,
}

pub fn score_units(
    units: Vec<ContentUnit>,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
    observer: &dyn PipelineObserver,
) -> Vec<ScoredCandidate> {
    units
        .into_iter()
        .map(|unit| {
            let scored = score_unit(unit, weights, now);
            observer.record(PipelineEvent::UnitScored {
                unit_id: scored.unit.id.clone(),
                kind: scored.unit.kind(),
                total: scored.total,
                base: scored.breakdown.base,
                type_specific: scored.breakdown.type_specific,
                universal: scored.breakdown.universal,
            });
            scored
        })
        .collect()
}

pub fn score_unit(unit: ContentUnit, weights: &ScoringWeights, now: DateTime<Utc>) -> ScoredCandidate {
    let text = unit.search_text();
    let breakdown = ScoreBreakdown {
        base: base_score(unit.kind(), weights),
        type_specific: type_specific_score(&unit, &text, weights),
        universal: universal_score(&unit, &text, weights, now),
        repetition_bonus: 0.0,
    };
    ScoredCandidate {
        total: breakdown.total(),
        unit,
        breakdown,
    }
}

pub fn base_score(kind: UnitKind, weights: &ScoringWeights) -> f64 {
    match kind {
        UnitKind::Toggle => weights.toggle_base,
        UnitKind::Highlight => weights.highlight_base,
        UnitKind::Section => weights.section_base,
        UnitKind::ListItem => weights.list_item_base,
        UnitKind::Page => weights.page_base,
    }
}

fn type_specific_score(unit: &ContentUnit, text: &str, weights: &ScoringWeights) -> f64 {
    let quality = keyword_hits(text, &weights.quality_keywords) as f64 * weights.quality_multiplier;
    let action =
        keyword_hits(text, &weights.action_keywords) as f64 * weights.type_action_multiplier;
    let length = length_bonus(unit.word_count, weights);

    match &unit.source {
        UnitSource::Toggle { level, .. } => {
            let mut score = keyword_hits(text, &weights.learning_keywords) as f64
                * weights.learning_multiplier
                + length
                + quality
                + action
                + weights.focused_bonus;
            if looks_structured(&unit.title) {
                score += weights.structured_title_bonus;
            }
            if *level == ToggleLevel::Video {
                score += weights.video_bonus;
            }
            score
        }
        UnitSource::Section { heading_level } => {
            let mut score = length + quality + action;
            if looks_structured(&unit.title) {
                score += weights.structured_title_bonus;
            }
            if (1..=2).contains(heading_level) {
                score += weights.focused_bonus;
            }
            score
        }
        UnitSource::ListItem {
            item_count,
            is_completed,
            ..
        } => {
            let mut score = action
                + (*item_count).min(weights.list_item_count_cap) as f64
                    * weights.list_item_count_bonus;
            if *is_completed == Some(false) {
                score += weights.open_todo_bonus;
            }
            score
        }
        UnitSource::Highlight { highlight } => {
            let mut score = quality + weights.focused_bonus;
            if *highlight == HighlightKind::Callout {
                score += weights.callout_bonus;
            }
            score
        }
        UnitSource::Page { .. } => length + quality,
    }
}

/// Factors shared by every unit kind; also the basis of repetition scoring.
pub fn universal_score(
    unit: &ContentUnit,
    text: &str,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = 0.0;

    if let Some(edited) = unit.last_edited_at {
        let age_days = (now - edited).num_seconds().max(0) as f64 / 86_400.0;
        score += (weights.recency_days - age_days).max(0.0);
    }

    score += keyword_hits(text, &weights.action_keywords) as f64 * weights.action_multiplier;
    score += keyword_hits(text, &weights.insight_keywords) as f64 * weights.insight_multiplier;
    if keyword_hits(text, &weights.meeting_keywords) > 0 {
        score += weights.meeting_bonus;
    }
    if keyword_hits(text, &weights.project_keywords) > 0 {
        score += weights.project_bonus;
    }
    if unit.body.trim().chars().count() < weights.short_body_chars {
        score -= weights.short_body_penalty;
    }

    score
}

/// Lexicon categories the unit matches, used for tagging.
pub fn matched_lexicons(unit: &ContentUnit, weights: &ScoringWeights) -> Vec<&'static str> {
    let text = unit.search_text();
    [
        ("learning", &weights.learning_keywords),
        ("quality", &weights.quality_keywords),
        ("action", &weights.action_keywords),
        ("insight", &weights.insight_keywords),
        ("meeting", &weights.meeting_keywords),
        ("project", &weights.project_keywords),
    ]
    .into_iter()
    .filter(|(_, lexicon)| keyword_hits(&text, lexicon) > 0)
    .map(|(name, _)| name)
    .collect()
}

/// Endings a text word may add to a lexicon word and still count as a hit.
const INFLECTIONS: &[&str] = &["", "s", "es", "ed", "d", "ing"];

/// Distinct lexicon entries present in already lower-cased text. Entries
/// match whole words, so "sync" does not hit "async"; multi-word entries
/// must appear as consecutive words.
pub fn keyword_hits(text: &str, lexicon: &[String]) -> usize {
    let tokens = tokenize(text);
    lexicon
        .iter()
        .filter(|keyword| {
            let keyword = keyword.to_lowercase();
            let phrase = tokenize(&keyword);
            !phrase.is_empty()
                && tokens.windows(phrase.len()).any(|window| {
                    window
                        .iter()
                        .zip(&phrase)
                        .all(|(word, wanted)| word_matches(word, wanted))
                })
        })
        .count()
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect()
}

fn word_matches(word: &str, wanted: &str) -> bool {
    word.strip_prefix(wanted)
        .is_some_and(|rest| INFLECTIONS.contains(&rest))
}

fn length_bonus(word_count: usize, weights: &ScoringWeights) -> f64 {
    let [short, medium, long] = weights.length_tier_words;
    let [short_bonus, medium_bonus, long_bonus] = weights.length_tier_bonus;
    if word_count >= long {
        long_bonus
    } else if word_count >= medium {
        medium_bonus
    } else if word_count >= short {
        short_bonus
    } else {
        0.0
    }
}

fn looks_structured(title: &str) -> bool {
    let title = title.trim();
    if title.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return true;
    }
    if title.contains(':') || title.contains(" - ") {
        return true;
    }
    let lower = title.to_lowercase();
    STRUCTURED_TITLE_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}
