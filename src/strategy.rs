use serde::{Deserialize, Serialize};

use crate::analyze::{Pattern, StructuralProfile};
use crate::block::PageTree;
use crate::content::ContentUnit;
use crate::extract::{self, ExtractionLimits};
use crate::observe::{PipelineEvent, PipelineObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    HierarchicalToggle,
    FlatToggle,
    StructuredSection,
    ListCollection,
    IndividualList,
    Highlight,
    Mixed,
    FullPage,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HierarchicalToggle => "hierarchical_toggle",
            Self::FlatToggle => "flat_toggle",
            Self::StructuredSection => "structured_section",
            Self::ListCollection => "list_collection",
            Self::IndividualList => "individual_list",
            Self::Highlight => "highlight",
            Self::Mixed => "mixed",
            Self::FullPage => "full_page",
        }
    }

    pub fn extract(
        self,
        tree: &PageTree,
        profile: &StructuralProfile,
        limits: &ExtractionLimits,
    ) -> Vec<ContentUnit> {
        match self {
            Self::HierarchicalToggle => extract::hierarchical_toggles(tree, limits),
            Self::FlatToggle => extract::flat_toggles(tree, limits),
            Self::StructuredSection => extract::structured_sections(tree, limits),
            Self::ListCollection => extract::list_collections(tree, limits),
            Self::IndividualList => extract::individual_list_items(tree, limits),
            Self::Highlight => extract::highlights(tree, limits),
            Self::Mixed => extract::mixed(tree, limits),
            Self::FullPage => extract::full_page(tree, profile, limits),
        }
    }
}

/// Ordered strategies for a profile. Always ends in [`Strategy::FullPage`].
pub fn plan(profile: &StructuralProfile) -> Vec<Strategy> {
    let mut strategies = match profile.primary_pattern {
        Pattern::HierarchicalToggles => vec![Strategy::HierarchicalToggle, Strategy::Highlight],
        Pattern::FlatToggles => vec![Strategy::FlatToggle, Strategy::Highlight],
        Pattern::StructuredHeadings => vec![Strategy::StructuredSection, Strategy::Highlight],
        // Grouping runs first whatever the complexity; pages without a long
        // enough run fall through to single items.
        Pattern::ListHeavy => vec![Strategy::ListCollection, Strategy::IndividualList],
        Pattern::HighlightFocused => vec![Strategy::Highlight, Strategy::StructuredSection],
        Pattern::Mixed => vec![Strategy::Mixed],
        Pattern::Simple => vec![Strategy::FullPage],
    };
    if strategies.last() != Some(&Strategy::FullPage) {
        strategies.push(Strategy::FullPage);
    }
    strategies
}

#[derive(Debug, Clone)]
pub struct Extraction {
    /// Strategy that produced `units`; `None` when every strategy came up empty.
    pub strategy: Option<Strategy>,
    pub units: Vec<ContentUnit>,
}

/// Runs the planned strategies in order and keeps the first non-empty result.
pub fn extract_candidates(
    tree: &PageTree,
    profile: &StructuralProfile,
    limits: &ExtractionLimits,
    observer: &dyn PipelineObserver,
) -> Extraction {
    for strategy in plan(profile) {
        let units = strategy.extract(tree, profile, limits);
        observer.record(PipelineEvent::StrategyAttempted {
            strategy,
            units: units.len(),
        });
        if !units.is_empty() {
            return Extraction {
                strategy: Some(strategy),
                units,
            };
        }
    }
    Extraction {
        strategy: None,
        units: Vec::new(),
    }
}
