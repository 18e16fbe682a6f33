use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::analyze::StructuralProfile;
use crate::block::ListKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Toggle,
    Section,
    ListItem,
    Highlight,
    Page,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::Section => "section",
            Self::ListItem => "list_item",
            Self::Highlight => "highlight",
            Self::Page => "page",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleLevel {
    /// Outer toggle grouping nested toggles; only its own non-toggle body.
    CategoryOverview,
    /// Nested toggle inside a category.
    Video,
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Children,
    ClosedPlaceholder,
    ErrorPlaceholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    Callout,
    Quote,
}

/// Variant-specific data of a [`ContentUnit`]; exactly one per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitSource {
    Toggle {
        parent_title: Option<String>,
        level: ToggleLevel,
        is_closed: bool,
        method: ExtractionMethod,
    },
    Section {
        heading_level: u8,
    },
    ListItem {
        list_kind: ListKind,
        item_count: usize,
        is_completed: Option<bool>,
        parent_title: Option<String>,
    },
    Highlight {
        highlight: HighlightKind,
    },
    Page {
        profile: Box<StructuralProfile>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: String,
    pub page_id: String,
    pub page_title: String,
    pub title: String,
    pub body: String,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub source: UnitSource,
}

impl ContentUnit {
    pub fn new(
        id: impl Into<String>,
        page: (&str, &str),
        title: impl Into<String>,
        body: impl Into<String>,
        source: UnitSource,
    ) -> Self {
        let body = body.into();
        Self {
            id: id.into(),
            page_id: page.0.to_owned(),
            page_title: page.1.to_owned(),
            title: title.into(),
            word_count: word_count(&body),
            body,
            last_edited_at: None,
            source,
        }
    }

    pub fn edited_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_edited_at = at;
        self
    }

    pub fn kind(&self) -> UnitKind {
        match self.source {
            UnitSource::Toggle { .. } => UnitKind::Toggle,
            UnitSource::Section { .. } => UnitKind::Section,
            UnitSource::ListItem { .. } => UnitKind::ListItem,
            UnitSource::Highlight { .. } => UnitKind::Highlight,
            UnitSource::Page { .. } => UnitKind::Page,
        }
    }

    pub fn is_closed_placeholder(&self) -> bool {
        matches!(self.source, UnitSource::Toggle { is_closed: true, .. })
    }

    /// Title and body lower-cased, for keyword matching.
    pub fn search_text(&self) -> String {
        format!("{}\n{}", self.title, self.body).to_lowercase()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Stable id for units that do not map one-to-one onto a source block.
pub fn synthetic_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = sha2::Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    format!("{prefix}_{}", &hex::encode(digest)[..24])
}

/// Short single-line label derived from free text.
pub fn title_from_text(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first_line.chars().count() <= max_chars {
        return first_line.to_owned();
    }
    let cut = first_line.chars().take(max_chars).collect::<String>();
    format!("{}…", cut.trim_end())
}
