#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use pagedigest::block::{BlockKind, RawBlock};
use pagedigest::content::UnitKind;
use pagedigest::fetch::InMemoryFetcher;
use pagedigest::formats::{Priority, SourceRef, SummaryResult};
use pagedigest::prompt::SummaryStyle;

pub const PAGE_ID: &str = "page-rust";
pub const USER_ID: &str = "ada";

/// Unit ids produced by hierarchical extraction of [`course_notes`].
pub const COURSE_UNIT_IDS: [&str; 5] = ["v1", "v2", "m1:overview", "v3", "glossary"];

pub fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-10T09:00:00Z")
        .expect("parse fixed clock")
        .with_timezone(&Utc)
}

fn para(id: &str, text: &str) -> RawBlock {
    RawBlock::new(id, BlockKind::Paragraph, text)
}

/// Three top-level toggles, two of them categories of nested toggles, one
/// nested toggle collapsed.
pub fn course_notes() -> Vec<RawBlock> {
    vec![
        RawBlock::new("m1", BlockKind::Toggle, "Module 1: Ownership").with_children(vec![
            para(
                "m1p",
                "Ownership is the core idea that makes Rust memory safe without a garbage collector.",
            ),
            RawBlock::new("v1", BlockKind::Toggle, "Video: Moves and copies").with_children(vec![
                para(
                    "v1p",
                    "This lecture explains move semantics with an example. Important: values are moved by default, and Copy types are duplicated instead.",
                ),
            ]),
            RawBlock::new("v2", BlockKind::Toggle, "Video: Borrowing"),
        ]),
        RawBlock::new("m2", BlockKind::Toggle, "Module 2: Traits").with_children(vec![
            RawBlock::new("v3", BlockKind::Toggle, "Video: Trait objects").with_children(vec![
                para(
                    "v3p",
                    "Trait objects enable dynamic dispatch through a vtable; prefer generics when the type is known at compile time.",
                ),
            ]),
        ]),
        RawBlock::new("glossary", BlockKind::Toggle, "Glossary").with_children(vec![para(
            "gp",
            "Lifetime: the region of code for which a reference is valid.",
        )]),
    ]
}

pub fn course_fetcher() -> InMemoryFetcher {
    InMemoryFetcher::new().with_page(PAGE_ID, "Rust course notes", course_notes())
}

pub fn empty_fetcher() -> InMemoryFetcher {
    InMemoryFetcher::new().with_page(PAGE_ID, "Empty", Vec::new())
}

pub fn past_summary(unit_id: &str, minutes_ago: i64, candidate_count: usize) -> SummaryResult {
    SummaryResult {
        id: format!("past-{unit_id}"),
        user_id: USER_ID.to_owned(),
        page_id: PAGE_ID.to_owned(),
        source_content: vec![SourceRef {
            unit_id: unit_id.to_owned(),
            title: unit_id.to_owned(),
            kind: UnitKind::Toggle,
            page_id: PAGE_ID.to_owned(),
            page_title: "Rust course notes".to_owned(),
            word_count: 20,
        }],
        summary: format!("Earlier digest of {unit_id}."),
        action_items: Vec::new(),
        key_insights: Vec::new(),
        priority: Priority::Low,
        tags: Vec::new(),
        word_count: 4,
        reading_time_minutes: 1,
        is_repetition: false,
        model: "gpt-4.1".to_owned(),
        style: SummaryStyle::Concise,
        candidate_count,
        // Older than the 24h recency window.
        created_at: now() - Duration::days(2) - Duration::minutes(minutes_ago),
    }
}

pub const ACTIONS_JSON: &str = r#"{"action_items":[{"text":"Rewatch the borrowing video","priority":"high","category":"study"}]}"#;
pub const INSIGHTS_JSON: &str = r#"{"key_insights":["Values move by default.","Copy types are duplicated."]}"#;
