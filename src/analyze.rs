use serde::{Deserialize, Serialize};

use crate::block::{BlockKind, ListKind, RawBlock};

const LEARNING_TITLE_HINTS: &[&str] = &[
    "video", "notes", "course", "lecture", "lesson", "tutorial", "class", "study", "learning",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    Toggles,
    Highlights,
    Headings,
    Lists,
    Paragraphs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    HierarchicalToggles,
    FlatToggles,
    StructuredHeadings,
    ListHeavy,
    HighlightFocused,
    Mixed,
    Simple,
}

impl Pattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HierarchicalToggles => "hierarchical_toggles",
            Self::FlatToggles => "flat_toggles",
            Self::StructuredHeadings => "structured_headings",
            Self::ListHeavy => "list_heavy",
            Self::HighlightFocused => "highlight_focused",
            Self::Mixed => "mixed",
            Self::Simple => "simple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStyle {
    Nested,
    Sectioned,
    Listed,
    Annotated,
    Freeform,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCounts {
    pub paragraphs: usize,
    pub headings: [usize; 3],
    pub bulleted: usize,
    pub numbered: usize,
    pub todos: usize,
    pub toggles: usize,
    pub toggles_with_children: usize,
    pub callouts: usize,
    pub quotes: usize,
    pub code: usize,
    pub child_pages: usize,
    pub other: usize,
}

impl BlockCounts {
    pub fn heading_total(&self) -> usize {
        self.headings.iter().sum()
    }

    pub fn list_total(&self) -> usize {
        self.bulleted + self.numbered + self.todos
    }

    pub fn highlight_total(&self) -> usize {
        self.callouts + self.quotes
    }
}

/// Shape of one page. Computed once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralProfile {
    pub counts: BlockCounts,
    pub total_blocks: usize,
    pub total_chars: usize,
    pub average_chars: f64,
    pub density: Density,
    pub complexity: Complexity,
    pub dominant: ContentCategory,
    pub primary_pattern: Pattern,
    pub organization: OrganizationStyle,
    pub consistency: f64,
    pub title_suggests_learning: bool,
}

/// Classifies a page from its top-level block list in a single pass.
pub fn analyze(blocks: &[RawBlock], page_title: &str) -> StructuralProfile {
    let mut counts = BlockCounts::default();
    let mut total_chars = 0usize;

    for block in blocks {
        total_chars += block.text.chars().count();

        if block.is_toggle() {
            counts.toggles += 1;
            if block.carries_children() {
                counts.toggles_with_children += 1;
            }
            continue;
        }

        if let Some(level) = block.kind.heading_level() {
            counts.headings[usize::from(level - 1)] += 1;
            continue;
        }

        match block.kind.list_kind() {
            Some(ListKind::Bulleted) => counts.bulleted += 1,
            Some(ListKind::Numbered) => counts.numbered += 1,
            Some(ListKind::ToDo) => counts.todos += 1,
            None => match block.kind {
                BlockKind::Paragraph => counts.paragraphs += 1,
                BlockKind::Callout => counts.callouts += 1,
                BlockKind::Quote => counts.quotes += 1,
                BlockKind::Code => counts.code += 1,
                BlockKind::ChildPage => counts.child_pages += 1,
                _ => counts.other += 1,
            },
        }
    }

    let total_blocks = blocks.len();
    let average_chars = if total_blocks == 0 {
        0.0
    } else {
        total_chars as f64 / total_blocks as f64
    };

    let title_lower = page_title.to_lowercase();
    let title_suggests_learning = LEARNING_TITLE_HINTS
        .iter()
        .any(|hint| title_lower.contains(hint));

    let density = density_for(total_chars);
    let complexity = complexity_for(&counts);
    let dominant = dominant_category(&counts);
    let primary_pattern = classify(&counts, total_blocks, title_suggests_learning);
    let organization = organization_for(primary_pattern);
    let consistency = consistency_for(&counts, dominant, total_blocks);

    tracing::debug!(
        page_title,
        total_blocks,
        total_chars,
        pattern = primary_pattern.as_str(),
        ?dominant,
        ?complexity,
        "page analyzed"
    );

    StructuralProfile {
        counts,
        total_blocks,
        total_chars,
        average_chars,
        density,
        complexity,
        dominant,
        primary_pattern,
        organization,
        consistency,
        title_suggests_learning,
    }
}

fn density_for(total_chars: usize) -> Density {
    if total_chars > 3000 {
        Density::High
    } else if total_chars > 1000 {
        Density::Medium
    } else {
        Density::Low
    }
}

fn complexity_for(counts: &BlockCounts) -> Complexity {
    let weighted = counts.toggles * 3 + counts.heading_total() * 2 + counts.list_total();
    if weighted >= 20 {
        Complexity::Complex
    } else if weighted >= 8 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

fn dominant_category(counts: &BlockCounts) -> ContentCategory {
    let weighted = [
        (ContentCategory::Toggles, counts.toggles as f64 * 2.0),
        (ContentCategory::Highlights, counts.highlight_total() as f64 * 2.0),
        (ContentCategory::Headings, counts.heading_total() as f64 * 1.5),
        (ContentCategory::Lists, counts.list_total() as f64),
        (ContentCategory::Paragraphs, counts.paragraphs as f64 * 0.5),
    ];

    let mut best = weighted[0];
    for candidate in &weighted[1..] {
        if candidate.1 > best.1 {
            best = *candidate;
        }
    }
    best.0
}

fn classify(counts: &BlockCounts, total_blocks: usize, title_suggests_learning: bool) -> Pattern {
    if counts.toggles >= 2 && (title_suggests_learning || counts.toggles_with_children >= 1) {
        return Pattern::HierarchicalToggles;
    }
    if counts.toggles >= 1 {
        return Pattern::FlatToggles;
    }
    if counts.heading_total() >= 3 && counts.headings[1] >= 2 {
        return Pattern::StructuredHeadings;
    }
    let lists = counts.list_total();
    if lists >= 5 && lists > counts.paragraphs {
        return Pattern::ListHeavy;
    }
    if counts.highlight_total() >= 2 {
        return Pattern::HighlightFocused;
    }
    if total_blocks >= 8 {
        return Pattern::Mixed;
    }
    Pattern::Simple
}

fn organization_for(pattern: Pattern) -> OrganizationStyle {
    match pattern {
        Pattern::HierarchicalToggles | Pattern::FlatToggles => OrganizationStyle::Nested,
        Pattern::StructuredHeadings => OrganizationStyle::Sectioned,
        Pattern::ListHeavy => OrganizationStyle::Listed,
        Pattern::HighlightFocused => OrganizationStyle::Annotated,
        Pattern::Mixed | Pattern::Simple => OrganizationStyle::Freeform,
    }
}

/// Share of blocks that belong to the dominant category, in `0.0..=1.0`.
fn consistency_for(counts: &BlockCounts, dominant: ContentCategory, total_blocks: usize) -> f64 {
    if total_blocks == 0 {
        return 0.0;
    }
    let dominant_count = match dominant {
        ContentCategory::Toggles => counts.toggles,
        ContentCategory::Highlights => counts.highlight_total(),
        ContentCategory::Headings => counts.heading_total(),
        ContentCategory::Lists => counts.list_total(),
        ContentCategory::Paragraphs => counts.paragraphs,
    };
    dominant_count as f64 / total_blocks as f64
}
