use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::analyze::StructuralProfile;
use crate::block::{BlockKind, ListKind, PageTree, RawBlock, render_text};
use crate::content::{
    ContentUnit, ExtractionMethod, HighlightKind, ToggleLevel, UnitSource, synthetic_id,
    title_from_text,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionLimits {
    pub min_unit_chars: usize,
    pub min_section_chars: usize,
    pub min_list_item_chars: usize,
    pub min_highlight_chars: usize,
    pub min_list_run: usize,
    pub mixed_toggle_slice: usize,
    pub mixed_section_slice: usize,
    pub mixed_highlight_slice: usize,
    pub title_chars: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            min_unit_chars: 10,
            min_section_chars: 50,
            min_list_item_chars: 15,
            min_highlight_chars: 20,
            min_list_run: 3,
            mixed_toggle_slice: 3,
            mixed_section_slice: 2,
            mixed_highlight_slice: 2,
            title_chars: 80,
        }
    }
}

/// Body for a toggle whose children could not be read. A pure function of
/// its inputs so repeated runs produce identical units.
pub fn closed_toggle_placeholder(
    toggle_title: &str,
    page_title: &str,
    parent_title: Option<&str>,
) -> String {
    let location = match parent_title {
        Some(parent) => format!("inside \"{parent}\" on the page \"{page_title}\""),
        None => format!("on the page \"{page_title}\""),
    };
    format!(
        "\"{toggle_title}\" is a collapsed toggle {location}. \
Its contents could not be retrieved from the document, so the toggle title is the only available evidence.\n\
\n\
Topic: {toggle_title}\n\
\n\
Infer what a section titled \"{toggle_title}\" most likely covers, outline the key ideas worth reviewing, \
and suggest opening the toggle in the source document for the full details."
    )
}

pub fn hierarchical_toggles(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let mut units = Vec::new();

    for block in tree.blocks.iter().filter(|b| b.is_toggle()) {
        let nested = block
            .children
            .iter()
            .filter(|c| c.is_toggle())
            .collect::<Vec<_>>();
        if nested.is_empty() {
            let unit = toggle_unit(tree, block, None, ToggleLevel::Standalone, limits);
            push_viable(&mut units, unit, limits);
            continue;
        }

        for video in nested {
            let unit = toggle_unit(tree, video, Some(block.text.as_str()), ToggleLevel::Video, limits);
            push_viable(&mut units, unit, limits);
        }

        let overview = block
            .children
            .iter()
            .filter(|c| !c.is_toggle())
            .cloned()
            .collect::<Vec<_>>();
        if overview.is_empty() {
            continue;
        }
        let body = render_text(&overview);
        let unit = ContentUnit::new(
            format!("{}:overview", block.id),
            (&tree.page_id, &tree.title),
            format!("{} (overview)", block.text.trim()),
            body,
            UnitSource::Toggle {
                parent_title: None,
                level: ToggleLevel::CategoryOverview,
                is_closed: false,
                method: ExtractionMethod::Children,
            },
        )
        .edited_at(overview.iter().filter_map(RawBlock::latest_edit).max());
        push_viable(&mut units, unit, limits);
    }

    units
}

pub fn flat_toggles(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let mut units = Vec::new();
    for block in tree.blocks.iter().filter(|b| b.is_toggle()) {
        let unit = toggle_unit(tree, block, None, ToggleLevel::Standalone, limits);
        push_viable(&mut units, unit, limits);
    }
    units
}

pub fn structured_sections(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    struct Section<'a> {
        heading: Option<&'a RawBlock>,
        blocks: Vec<RawBlock>,
    }

    let mut units = Vec::new();
    let mut current = Section {
        heading: None,
        blocks: Vec::new(),
    };

    let flush = |section: Section<'_>, units: &mut Vec<ContentUnit>| {
        let body = render_text(&section.blocks);
        if body.chars().count() <= limits.min_section_chars {
            return;
        }
        let edited = section
            .blocks
            .iter()
            .filter_map(RawBlock::latest_edit)
            .chain(section.heading.and_then(|h| h.last_edited_at))
            .max();
        let unit = match section.heading {
            Some(heading) => ContentUnit::new(
                heading.id.clone(),
                (&tree.page_id, &tree.title),
                heading.text.trim(),
                body,
                UnitSource::Section {
                    heading_level: heading.kind.heading_level().unwrap_or(1),
                },
            ),
            None => ContentUnit::new(
                synthetic_id("intro", &[&tree.page_id]),
                (&tree.page_id, &tree.title),
                format!("{} (introduction)", tree.title),
                body,
                UnitSource::Section { heading_level: 0 },
            ),
        };
        push_viable(units, unit.edited_at(edited), limits);
    };

    for block in &tree.blocks {
        if block.is_heading() {
            let next = Section {
                heading: Some(block),
                blocks: block.children.clone(),
            };
            flush(std::mem::replace(&mut current, next), &mut units);
            continue;
        }
        current.blocks.push(block.clone());
    }
    flush(current, &mut units);

    units
}

pub fn list_collections(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let mut units = Vec::new();
    let mut run: Vec<&RawBlock> = Vec::new();
    let mut run_kind: Option<ListKind> = None;
    let mut context: Option<&str> = None;

    for block in &tree.blocks {
        match block.kind.list_kind() {
            Some(kind) if run_kind == Some(kind) => run.push(block),
            Some(kind) => {
                flush_list_run(tree, &mut run, run_kind, context, limits, &mut units);
                run_kind = Some(kind);
                run.push(block);
            }
            None => {
                flush_list_run(tree, &mut run, run_kind, context, limits, &mut units);
                run_kind = None;
                if block.is_heading() {
                    context = Some(block.text.trim());
                }
            }
        }
    }
    flush_list_run(tree, &mut run, run_kind, context, limits, &mut units);

    units
}

fn flush_list_run(
    tree: &PageTree,
    run: &mut Vec<&RawBlock>,
    kind: Option<ListKind>,
    context: Option<&str>,
    limits: &ExtractionLimits,
    units: &mut Vec<ContentUnit>,
) {
    let items = std::mem::take(run);
    let Some(kind) = kind else {
        return;
    };
    if items.len() < limits.min_list_run.max(1) {
        if !items.is_empty() {
            tracing::trace!(items = items.len(), kind = kind.label(), "list run too short");
        }
        return;
    }

    let owned = items.iter().map(|b| (*b).clone()).collect::<Vec<_>>();
    let is_completed = (kind == ListKind::ToDo)
        .then(|| items.iter().all(|b| b.checked == Some(true)));
    let title = match context {
        Some(heading) => heading.to_owned(),
        None => format!("{}: {}", tree.title, kind.label()),
    };

    let unit = ContentUnit::new(
        synthetic_id("list", &[&tree.page_id, &items[0].id]),
        (&tree.page_id, &tree.title),
        title,
        render_text(&owned),
        UnitSource::ListItem {
            list_kind: kind,
            item_count: items.len(),
            is_completed,
            parent_title: context.map(str::to_owned),
        },
    )
    .edited_at(owned.iter().filter_map(RawBlock::latest_edit).max());
    push_viable(units, unit, limits);
}

pub fn individual_list_items(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let mut units = Vec::new();
    let mut context: Option<&str> = None;

    for block in &tree.blocks {
        if block.is_heading() {
            context = Some(block.text.trim());
            continue;
        }
        let Some(kind) = block.kind.list_kind() else {
            continue;
        };
        if block.text.trim().chars().count() < limits.min_list_item_chars {
            continue;
        }

        let unit = ContentUnit::new(
            block.id.clone(),
            (&tree.page_id, &tree.title),
            title_from_text(&block.text, limits.title_chars),
            render_text(std::slice::from_ref(block)),
            UnitSource::ListItem {
                list_kind: kind,
                item_count: 1,
                is_completed: if kind == ListKind::ToDo {
                    Some(block.checked == Some(true))
                } else {
                    None
                },
                parent_title: context.map(str::to_owned),
            },
        )
        .edited_at(block.latest_edit());
        push_viable(&mut units, unit, limits);
    }

    units
}

pub fn highlights(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let mut units = Vec::new();
    for block in tree.walk() {
        let highlight = match block.kind {
            BlockKind::Callout => HighlightKind::Callout,
            BlockKind::Quote => HighlightKind::Quote,
            _ => continue,
        };
        if block.text.trim().chars().count() < limits.min_highlight_chars {
            continue;
        }

        let unit = ContentUnit::new(
            block.id.clone(),
            (&tree.page_id, &tree.title),
            title_from_text(&block.text, limits.title_chars),
            render_text(std::slice::from_ref(block)),
            UnitSource::Highlight { highlight },
        )
        .edited_at(block.latest_edit());
        push_viable(&mut units, unit, limits);
    }
    units
}

/// Bounded samples from several extractors, for pages without a dominant
/// pattern. Unlike the other strategies this merges instead of
/// short-circuiting.
pub fn mixed(tree: &PageTree, limits: &ExtractionLimits) -> Vec<ContentUnit> {
    let slices = [
        (flat_toggles(tree, limits), limits.mixed_toggle_slice),
        (structured_sections(tree, limits), limits.mixed_section_slice),
        (highlights(tree, limits), limits.mixed_highlight_slice),
    ];

    let mut seen = HashSet::new();
    let mut units = Vec::new();
    for (extracted, max) in slices {
        for unit in extracted.into_iter().take(max) {
            if seen.insert(unit.id.clone()) {
                units.push(unit);
            }
        }
    }
    units
}

pub fn full_page(
    tree: &PageTree,
    profile: &StructuralProfile,
    limits: &ExtractionLimits,
) -> Vec<ContentUnit> {
    let body = render_text(&tree.blocks);
    let edited = tree
        .blocks
        .iter()
        .filter_map(RawBlock::latest_edit)
        .chain(tree.last_edited_at)
        .max();

    let unit = ContentUnit::new(
        synthetic_id("page", &[&tree.page_id]),
        (&tree.page_id, &tree.title),
        tree.title.clone(),
        body,
        UnitSource::Page {
            profile: Box::new(profile.clone()),
        },
    )
    .edited_at(edited);

    let mut units = Vec::new();
    push_viable(&mut units, unit, limits);
    units
}

/// Unit for a toggle's rendered children. Toggles whose children are
/// missing or render to almost nothing (an embed, an empty paragraph) get a
/// placeholder instead, since the title is all there is to go on.
fn toggle_unit(
    tree: &PageTree,
    toggle: &RawBlock,
    parent_title: Option<&str>,
    level: ToggleLevel,
    limits: &ExtractionLimits,
) -> ContentUnit {
    let body = render_text(&toggle.children);
    if body.trim().chars().count() < limits.min_unit_chars {
        return placeholder_unit(tree, toggle, parent_title, level);
    }
    ContentUnit::new(
        toggle.id.clone(),
        (&tree.page_id, &tree.title),
        toggle.text.trim(),
        body,
        UnitSource::Toggle {
            parent_title: parent_title.map(|t| t.trim().to_owned()),
            level,
            is_closed: false,
            method: ExtractionMethod::Children,
        },
    )
    .edited_at(toggle.latest_edit())
}

fn placeholder_unit(
    tree: &PageTree,
    toggle: &RawBlock,
    parent_title: Option<&str>,
    level: ToggleLevel,
) -> ContentUnit {
    let parent_title = parent_title.map(|t| t.trim().to_owned());
    let method = if toggle.children_error.is_some() {
        ExtractionMethod::ErrorPlaceholder
    } else {
        ExtractionMethod::ClosedPlaceholder
    };
    tracing::debug!(
        block_id = %toggle.id,
        ?method,
        truncated = toggle.truncated,
        "toggle has no readable children; using placeholder"
    );

    ContentUnit::new(
        toggle.id.clone(),
        (&tree.page_id, &tree.title),
        toggle.text.trim(),
        closed_toggle_placeholder(toggle.text.trim(), &tree.title, parent_title.as_deref()),
        UnitSource::Toggle {
            parent_title,
            level,
            is_closed: true,
            method,
        },
    )
    .edited_at(toggle.last_edited_at)
}

fn push_viable(units: &mut Vec<ContentUnit>, unit: ContentUnit, limits: &ExtractionLimits) {
    if unit.body.trim().chars().count() < limits.min_unit_chars {
        tracing::trace!(unit_id = %unit.id, "discarding unit below minimum length");
        return;
    }
    units.push(unit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::analyze;
    use crate::content::UnitKind;

    fn tree(blocks: Vec<RawBlock>) -> PageTree {
        PageTree {
            page_id: "page".to_owned(),
            title: "Course notes".to_owned(),
            last_edited_at: None,
            blocks,
        }
    }

    fn para(id: &str, text: &str) -> RawBlock {
        RawBlock::new(id, BlockKind::Paragraph, text)
    }

    fn bullet(id: &str, text: &str) -> RawBlock {
        RawBlock::new(id, BlockKind::BulletedListItem, text)
    }

    #[test]
    fn hierarchical_toggles_emit_videos_overview_and_placeholders() {
        let page = tree(vec![
            RawBlock::new("cat", BlockKind::Toggle, "Module 1").with_children(vec![
                para("intro", "This module covers ownership and borrowing."),
                RawBlock::new("v1", BlockKind::Toggle, "Ownership video").with_children(vec![
                    para("v1p", "Each value has a single owner."),
                ]),
                RawBlock::new("v2", BlockKind::Toggle, "Borrowing video"),
            ]),
            RawBlock::new("solo", BlockKind::Toggle, "Glossary").with_children(vec![
                para("g", "Lifetime: the scope a reference is valid for."),
            ]),
            RawBlock::new("closed", BlockKind::Toggle, "Week 3"),
        ]);

        let units = hierarchical_toggles(&page, &ExtractionLimits::default());
        let ids = units.iter().map(|u| u.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["v1", "v2", "cat:overview", "solo", "closed"]);

        let v2 = &units[1];
        assert!(v2.is_closed_placeholder());
        assert!(matches!(
            &v2.source,
            UnitSource::Toggle { parent_title: Some(parent), level: ToggleLevel::Video, .. } if parent == "Module 1"
        ));
        assert!(v2.body.contains("Borrowing video"));

        assert!(matches!(
            units[2].source,
            UnitSource::Toggle { level: ToggleLevel::CategoryOverview, .. }
        ));
        assert!(units[4].is_closed_placeholder());
    }

    #[test]
    fn placeholder_text_is_deterministic() {
        let a = closed_toggle_placeholder("Week 3", "Course notes", None);
        let b = closed_toggle_placeholder("Week 3", "Course notes", None);
        assert_eq!(a, b);
        assert!(a.contains("Week 3"));
        assert!(a.contains("Course notes"));
        assert_ne!(a, closed_toggle_placeholder("Week 4", "Course notes", None));
    }

    #[test]
    fn fetch_errors_degrade_to_error_placeholders() {
        let mut failed = RawBlock::new("t", BlockKind::Toggle, "Broken toggle");
        failed.children_error = Some("document API error (500): boom".to_owned());
        let page = tree(vec![failed]);

        let units = flat_toggles(&page, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert!(matches!(
            units[0].source,
            UnitSource::Toggle {
                is_closed: true,
                method: ExtractionMethod::ErrorPlaceholder,
                ..
            }
        ));
    }

    #[test]
    fn toggles_without_readable_children_become_placeholders() {
        let page = tree(vec![
            RawBlock::new("t1", BlockKind::Toggle, "Architecture diagram")
                .with_children(vec![RawBlock::new("img", BlockKind::Unsupported, "")]),
            RawBlock::new("t2", BlockKind::Toggle, "Other").with_children(vec![para(
                "p",
                "Deploys go out every Tuesday after the freeze lifts.",
            )]),
            RawBlock::new("t3", BlockKind::Toggle, "Blank notes")
                .with_children(vec![para("e1", ""), para("e2", "  ")]),
        ]);

        let units = flat_toggles(&page, &ExtractionLimits::default());
        let ids = units.iter().map(|u| u.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        assert!(matches!(
            units[0].source,
            UnitSource::Toggle {
                is_closed: true,
                method: ExtractionMethod::ClosedPlaceholder,
                ..
            }
        ));
        assert!(units[0].body.contains("Architecture diagram"));
        assert!(!units[1].is_closed_placeholder());
        assert!(units[2].is_closed_placeholder());

        let nested = tree(vec![RawBlock::new("cat", BlockKind::Toggle, "Module 4")
            .with_children(vec![RawBlock::new("v", BlockKind::Toggle, "Demo video")
                .with_children(vec![RawBlock::new("embed", BlockKind::Unsupported, "")])])]);
        let units = hierarchical_toggles(&nested, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert!(units[0].is_closed_placeholder());
        assert!(matches!(
            &units[0].source,
            UnitSource::Toggle { parent_title: Some(parent), level: ToggleLevel::Video, .. } if parent == "Module 4"
        ));
    }

    #[test]
    fn sections_split_on_headings_and_flush_the_last_one() {
        let long = "A paragraph that is comfortably longer than fifty characters in total.";
        let page = tree(vec![
            RawBlock::new("h1", BlockKind::Heading2, "Goals"),
            para("p1", long),
            RawBlock::new("h2", BlockKind::Heading2, "Too short"),
            para("p2", "tiny"),
            RawBlock::new("h3", BlockKind::Heading2, "Risks"),
            para("p3", long),
            bullet("b3", "and a bullet"),
        ]);

        let units = structured_sections(&page, &ExtractionLimits::default());
        let ids = units.iter().map(|u| u.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["h1", "h3"]);
        assert!(units[1].body.contains("- and a bullet"));
        assert_eq!(units[1].title, "Risks");
    }

    #[test]
    fn list_runs_group_by_kind_and_drop_short_runs() {
        let mut blocks = (0..5)
            .map(|i| bullet(&format!("b{i}"), &format!("bullet item {i}")))
            .collect::<Vec<_>>();
        blocks.push(RawBlock::new("n0", BlockKind::NumberedListItem, "numbered item"));
        let page = tree(blocks);

        let units = list_collections(&page, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert!(matches!(
            units[0].source,
            UnitSource::ListItem {
                list_kind: ListKind::Bulleted,
                item_count: 5,
                ..
            }
        ));
        assert!(!units[0].body.contains("numbered item"));
    }

    #[test]
    fn list_runs_are_interrupted_by_other_blocks() {
        let page = tree(vec![
            bullet("a", "first"),
            bullet("b", "second"),
            para("p", "interruption"),
            bullet("c", "third"),
            bullet("d", "fourth"),
            bullet("e", "fifth"),
        ]);

        let units = list_collections(&page, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert!(units[0].body.starts_with("- third"));
    }

    #[test]
    fn individual_items_respect_minimum_length_and_completion() {
        let page = tree(vec![
            RawBlock::new("h", BlockKind::Heading2, "Chores"),
            RawBlock::new("t1", BlockKind::ToDo, "Renew the passport before June").checked(true),
            RawBlock::new("t2", BlockKind::ToDo, "short"),
        ]);

        let units = individual_list_items(&page, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert!(matches!(
            &units[0].source,
            UnitSource::ListItem { is_completed: Some(true), parent_title: Some(parent), .. } if parent == "Chores"
        ));
    }

    #[test]
    fn highlights_are_found_inside_toggles() {
        let page = tree(vec![
            RawBlock::new("t", BlockKind::Toggle, "Week 1").with_children(vec![
                RawBlock::new("c", BlockKind::Callout, "Key idea: prefer borrowing over cloning."),
            ]),
            RawBlock::new("q", BlockKind::Quote, "too short"),
        ]);

        let units = highlights(&page, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id, "c");
        assert_eq!(units[0].kind(), UnitKind::Highlight);
    }

    #[test]
    fn mixed_takes_bounded_slices() {
        let long = "This section body is long enough to pass the fifty character minimum.";
        let mut blocks = (0..5)
            .map(|i| {
                RawBlock::new(format!("t{i}"), BlockKind::Toggle, format!("Toggle {i}"))
                    .with_children(vec![para(&format!("tp{i}"), "toggle body text")])
            })
            .collect::<Vec<_>>();
        for i in 0..3 {
            blocks.push(RawBlock::new(format!("h{i}"), BlockKind::Heading2, format!("H{i}")));
            blocks.push(para(&format!("hp{i}"), long));
        }

        let units = mixed(&tree(blocks), &ExtractionLimits::default());
        let toggles = units.iter().filter(|u| u.kind() == UnitKind::Toggle).count();
        let sections = units.iter().filter(|u| u.kind() == UnitKind::Section).count();
        assert_eq!(toggles, 3);
        assert_eq!(sections, 2);
    }

    #[test]
    fn full_page_renders_everything_with_profile() {
        let page = tree(vec![
            RawBlock::new("h", BlockKind::Heading1, "Notes"),
            para("p", "Just a couple of lines of text."),
        ]);
        let profile = analyze(&page.blocks, &page.title);

        let units = full_page(&page, &profile, &ExtractionLimits::default());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].body, "# Notes\nJust a couple of lines of text.");
        assert!(matches!(units[0].source, UnitSource::Page { .. }));

        let empty = full_page(&tree(vec![]), &profile, &ExtractionLimits::default());
        assert!(empty.is_empty());
    }
}
