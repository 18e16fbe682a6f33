use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::{ContentUnit, HighlightKind, ToggleLevel, UnitSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    #[default]
    Concise,
    Detailed,
    BulletPoints,
    Actionable,
}

impl SummaryStyle {
    fn instruction(self) -> &'static str {
        match self {
            Self::Concise => "Write a concise summary of 3 to 5 sentences.",
            Self::Detailed => {
                "Write a detailed summary of several short paragraphs covering every important point."
            }
            Self::BulletPoints => "Write the summary as 4 to 8 bullet points, one idea per bullet.",
            Self::Actionable => {
                "Write a short summary that leads with what the reader should do next."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    #[default]
    Learner,
    Practitioner,
    Manager,
}

impl Perspective {
    fn instruction(self) -> &'static str {
        match self {
            Self::Learner => "The reader is studying this material and wants to remember and understand it.",
            Self::Practitioner => "The reader wants to apply this material in day-to-day work.",
            Self::Manager => "The reader needs decisions, risks and owners more than details.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Budget for the formatted content block, in chars.
    pub context_chars: usize,
    pub truncation_marker: String,
    pub max_prior_summaries: usize,
    pub prior_summary_chars: usize,
    pub style: SummaryStyle,
    pub perspective: Perspective,
    pub language: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            context_chars: 12_000,
            truncation_marker: "\n[...content truncated...]".to_owned(),
            max_prior_summaries: 3,
            prior_summary_chars: 800,
            style: SummaryStyle::default(),
            perspective: Perspective::default(),
            language: "English".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("exactly one content unit may be summarized per run, got {0}")]
pub struct UnitCountViolation(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub instructions: String,
    pub input: String,
}

/// Formats the single selected unit for the model, within the context budget.
pub fn preprocess(units: &[ContentUnit], config: &PromptConfig) -> Result<String, UnitCountViolation> {
    let [unit] = units else {
        return Err(UnitCountViolation(units.len()));
    };
    let formatted = format!("{}\n\n{}", framing(unit), unit.body.trim());
    Ok(truncate_chars(&formatted, config.context_chars, &config.truncation_marker))
}

/// Cuts `text` so the result, marker included, fits in `budget` chars.
pub fn truncate_chars(text: &str, budget: usize, marker: &str) -> String {
    if text.chars().count() <= budget {
        return text.to_owned();
    }
    let marker_chars = marker.chars().count();
    if marker_chars >= budget {
        return marker.chars().take(budget).collect();
    }
    let mut out = text.chars().take(budget - marker_chars).collect::<String>();
    out.push_str(marker);
    out
}

fn framing(unit: &ContentUnit) -> String {
    let mut lines = vec![format!("Title: {}", unit.title)];
    match &unit.source {
        UnitSource::Toggle {
            parent_title,
            level,
            is_closed,
            ..
        } => {
            lines.push(format!("Source: toggle on the page \"{}\"", unit.page_title));
            if let Some(parent) = parent_title {
                lines.push(format!("Category: {parent}"));
            }
            lines.push(
                match level {
                    ToggleLevel::CategoryOverview => "Role: overview text of a category of nested toggles",
                    ToggleLevel::Video => "Role: one entry (such as a video or lesson) inside a category",
                    ToggleLevel::Standalone => "Role: standalone collapsible section",
                }
                .to_owned(),
            );
            if *is_closed {
                lines.push(
                    "Note: the toggle was collapsed and its contents could not be read; only its title is known."
                        .to_owned(),
                );
            }
        }
        UnitSource::Section { heading_level } => {
            if *heading_level == 0 {
                lines.push(format!(
                    "Source: introduction of the document \"{}\"",
                    unit.page_title
                ));
            } else {
                lines.push(format!(
                    "Source: level {heading_level} section of the document \"{}\"",
                    unit.page_title
                ));
            }
        }
        UnitSource::ListItem {
            list_kind,
            item_count,
            is_completed,
            parent_title,
        } => {
            lines.push(format!(
                "Source: {item_count} item(s) of a {} on the page \"{}\"",
                list_kind.label(),
                unit.page_title
            ));
            if let Some(parent) = parent_title {
                lines.push(format!("Listed under: {parent}"));
            }
            match is_completed {
                Some(true) => lines.push("Status: completed".to_owned()),
                Some(false) => lines.push("Status: open".to_owned()),
                None => {}
            }
        }
        UnitSource::Highlight { highlight } => {
            let label = match highlight {
                HighlightKind::Callout => "callout",
                HighlightKind::Quote => "quote",
            };
            lines.push(format!(
                "Source: {label} highlighted by the author on the page \"{}\"",
                unit.page_title
            ));
        }
        UnitSource::Page { profile } => {
            lines.push(format!(
                "Source: the whole page \"{}\" ({} blocks, {} layout)",
                unit.page_title,
                profile.total_blocks,
                profile.primary_pattern.as_str()
            ));
        }
    }
    lines.join("\n")
}

fn kind_instruction(unit: &ContentUnit) -> &'static str {
    match &unit.source {
        UnitSource::Toggle { is_closed: true, .. } => {
            "Only the title of this section is available. Explain what it most likely covers and what to review, and say clearly that the details were not readable."
        }
        UnitSource::Toggle {
            level: ToggleLevel::Video,
            ..
        } => "Summarize this entry as study notes: the main ideas, then how they connect to its category.",
        UnitSource::Toggle { .. } => "Summarize the main ideas of this section.",
        UnitSource::Section { .. } => {
            "Summarize this section and how it fits into the surrounding document."
        }
        UnitSource::ListItem { .. } => {
            "Summarize these list items, grouping related ones and calling out anything still open."
        }
        UnitSource::Highlight { .. } => {
            "The author highlighted this passage. Explain why it matters and how to apply it."
        }
        UnitSource::Page { .. } => "Summarize the page as a whole, leading with its purpose.",
    }
}

/// System and user prompt for the summary call. `prior_summaries` switches
/// on repetition mode.
pub fn summary_prompt(
    unit: &ContentUnit,
    formatted: &str,
    prior_summaries: Option<&[String]>,
    config: &PromptConfig,
) -> Prompt {
    let mut instructions = vec![
        "You turn personal notes into short digests that help the reader revisit their own material."
            .to_owned(),
        config.style.instruction().to_owned(),
        config.perspective.instruction().to_owned(),
        format!("Write in {}.", config.language),
        "Use only the content between BEGIN_CONTENT and END_CONTENT. Do not invent facts.".to_owned(),
    ];
    if prior_summaries.is_some() {
        instructions.push(
            "This content was summarized before. Take a fresh angle: different takeaways, questions or applications."
                .to_owned(),
        );
    }

    let mut input = format!(
        "{}\n\nBEGIN_CONTENT\n{formatted}\nEND_CONTENT\n",
        kind_instruction(unit)
    );

    if let Some(prior) = prior_summaries {
        let prior = prior
            .iter()
            .take(config.max_prior_summaries)
            .collect::<Vec<_>>();
        if !prior.is_empty() {
            input.push_str("\nEarlier summaries of the same content. Do not repeat their angle:\n");
            for (idx, summary) in prior.iter().enumerate() {
                input.push_str(&format!(
                    "\nBEGIN_PRIOR_SUMMARY {n}\n{}\nEND_PRIOR_SUMMARY {n}\n",
                    truncate_chars(summary.trim(), config.prior_summary_chars, &config.truncation_marker),
                    n = idx + 1
                ));
            }
        }
    }

    Prompt {
        instructions: instructions.join("\n"),
        input,
    }
}

pub fn action_items_prompt(summary: &str, title: &str) -> Prompt {
    Prompt {
        instructions: [
            "Extract concrete action items from the summary.",
            "Return ONLY a JSON object of the form",
            r#"{"action_items":[{"text":"...","priority":"high|medium|low","category":"...","due_date":null}]}"#,
            "Use an empty list when there is nothing to do.",
        ]
        .join("\n"),
        input: format!("Title: {title}\n\nBEGIN_SUMMARY\n{}\nEND_SUMMARY\n", summary.trim()),
    }
}

pub fn key_insights_prompt(summary: &str, title: &str) -> Prompt {
    Prompt {
        instructions: [
            "Extract the 1 to 5 most important insights from the summary, each one sentence.",
            "Return ONLY a JSON object of the form",
            r#"{"key_insights":["..."]}"#,
        ]
        .join("\n"),
        input: format!("Title: {title}\n\nBEGIN_SUMMARY\n{}\nEND_SUMMARY\n", summary.trim()),
    }
}
