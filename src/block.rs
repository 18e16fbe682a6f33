use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph,
    #[serde(rename = "heading_1")]
    Heading1,
    #[serde(rename = "heading_2")]
    Heading2,
    #[serde(rename = "heading_3")]
    Heading3,
    BulletedListItem,
    NumberedListItem,
    ToDo,
    Toggle,
    Callout,
    Quote,
    Code,
    ChildPage,
    Divider,
    #[serde(other)]
    Unsupported,
}

impl BlockKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "paragraph" => Self::Paragraph,
            "heading_1" => Self::Heading1,
            "heading_2" => Self::Heading2,
            "heading_3" => Self::Heading3,
            "bulleted_list_item" => Self::BulletedListItem,
            "numbered_list_item" => Self::NumberedListItem,
            "to_do" => Self::ToDo,
            "toggle" => Self::Toggle,
            "callout" => Self::Callout,
            "quote" => Self::Quote,
            "code" => Self::Code,
            "child_page" => Self::ChildPage,
            "divider" => Self::Divider,
            _ => Self::Unsupported,
        }
    }

    pub fn heading_level(self) -> Option<u8> {
        match self {
            Self::Heading1 => Some(1),
            Self::Heading2 => Some(2),
            Self::Heading3 => Some(3),
            _ => None,
        }
    }

    pub fn list_kind(self) -> Option<ListKind> {
        match self {
            Self::BulletedListItem => Some(ListKind::Bulleted),
            Self::NumberedListItem => Some(ListKind::Numbered),
            Self::ToDo => Some(ListKind::ToDo),
            _ => None,
        }
    }

    pub fn is_highlight(self) -> bool {
        matches!(self, Self::Callout | Self::Quote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Bulleted,
    Numbered,
    ToDo,
}

impl ListKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Bulleted => "bulleted list",
            Self::Numbered => "numbered list",
            Self::ToDo => "to-do list",
        }
    }
}

/// One node of the source document.
///
/// `has_children` mirrors the API hint and is advisory only: collapsed
/// toggles often report `false` and still yield children when queried.
/// `children` holds whatever the materialization pass fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub id: String,
    pub kind: BlockKind,
    pub text: String,
    pub has_children: bool,
    pub depth: usize,
    pub checked: Option<bool>,
    pub toggleable: bool,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub children: Vec<RawBlock>,
    pub children_error: Option<String>,
    pub truncated: bool,
}

impl RawBlock {
    pub fn new(id: impl Into<String>, kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            has_children: false,
            depth: 0,
            checked: None,
            toggleable: false,
            last_edited_at: None,
            children: Vec::new(),
            children_error: None,
            truncated: false,
        }
    }

    pub fn with_children(mut self, children: Vec<RawBlock>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    pub fn hinted(mut self) -> Self {
        self.has_children = true;
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn toggleable(mut self) -> Self {
        self.toggleable = true;
        self
    }

    pub fn edited_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_edited_at = Some(at);
        self
    }

    /// Toggle blocks and toggleable headings both hide their body behind a
    /// collapsed title.
    pub fn is_toggle(&self) -> bool {
        self.kind == BlockKind::Toggle || (self.toggleable && self.kind.heading_level().is_some())
    }

    pub fn is_heading(&self) -> bool {
        self.kind.heading_level().is_some()
    }

    /// Whether materialization should query this block's children.
    pub fn wants_children(&self) -> bool {
        self.is_toggle() || self.has_children
    }

    pub fn carries_children(&self) -> bool {
        self.has_children || !self.children.is_empty()
    }

    /// Latest edit time of this block and everything below it.
    pub fn latest_edit(&self) -> Option<DateTime<Utc>> {
        self.children
            .iter()
            .filter_map(RawBlock::latest_edit)
            .chain(self.last_edited_at)
            .max()
    }
}

#[derive(Debug, Clone)]
pub struct PageTree {
    pub page_id: String,
    pub title: String,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub blocks: Vec<RawBlock>,
}

impl PageTree {
    /// Pre-order walk over every materialized block.
    pub fn walk(&self) -> Vec<&RawBlock> {
        let mut out = Vec::new();
        let mut stack: Vec<&RawBlock> = self.blocks.iter().rev().collect();
        while let Some(block) = stack.pop() {
            out.push(block);
            stack.extend(block.children.iter().rev());
        }
        out
    }
}

pub fn render_text(blocks: &[RawBlock]) -> String {
    let mut out = String::new();
    render_into(blocks, 0, &mut out);
    out.trim_end().to_owned()
}

fn render_into(blocks: &[RawBlock], indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let mut number = 0usize;

    for block in blocks {
        if block.kind == BlockKind::NumberedListItem {
            number += 1;
        } else {
            number = 0;
        }

        let text = block.text.trim();
        let line = match block.kind {
            BlockKind::Heading1 | BlockKind::Heading2 | BlockKind::Heading3 => {
                let level = block.kind.heading_level().unwrap_or(1) as usize;
                format!("{} {text}", "#".repeat(level))
            }
            BlockKind::BulletedListItem => format!("- {text}"),
            BlockKind::NumberedListItem => format!("{number}. {text}"),
            BlockKind::ToDo => {
                let mark = if block.checked == Some(true) { "x" } else { " " };
                format!("[{mark}] {text}")
            }
            BlockKind::Toggle => format!("▸ {text}"),
            BlockKind::Callout | BlockKind::Quote => format!("> {text}"),
            BlockKind::Code => format!("```\n{text}\n```"),
            BlockKind::ChildPage => format!("[page] {text}"),
            BlockKind::Divider => "---".to_owned(),
            BlockKind::Paragraph | BlockKind::Unsupported => text.to_owned(),
        };

        if !text.is_empty() || block.kind == BlockKind::Divider {
            out.push_str(&pad);
            out.push_str(&line);
            out.push('\n');
        }

        if !block.children.is_empty() {
            render_into(&block.children, indent + 1, out);
        }
    }
}
