use std::sync::Mutex;

use serde::Serialize;

use crate::content::UnitKind;
use crate::strategy::Strategy;
use crate::summarize::RunStage;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageEntered {
        stage: RunStage,
    },
    StrategyAttempted {
        strategy: Strategy,
        units: usize,
    },
    UnitScored {
        unit_id: String,
        kind: UnitKind,
        total: f64,
        base: f64,
        type_specific: f64,
        universal: f64,
    },
    SelectionMade {
        unit_id: Option<String>,
        repetition: bool,
        candidates: usize,
        available: usize,
        repetition_ratio: f64,
    },
}

pub trait PipelineObserver: Send + Sync {
    fn record(&self, event: PipelineEvent);
}

/// Default observer: forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn record(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::StageEntered { stage } => {
                tracing::debug!(stage = stage.as_str(), "run stage");
            }
            PipelineEvent::StrategyAttempted { strategy, units } => {
                tracing::info!(strategy = strategy.as_str(), units, "extraction strategy");
            }
            PipelineEvent::UnitScored {
                unit_id,
                kind,
                total,
                base,
                type_specific,
                universal,
            } => {
                tracing::debug!(
                    unit_id = %unit_id,
                    kind = kind.as_str(),
                    total,
                    base,
                    type_specific,
                    universal,
                    "scored unit"
                );
            }
            PipelineEvent::SelectionMade {
                unit_id,
                repetition,
                candidates,
                available,
                repetition_ratio,
            } => match unit_id {
                Some(unit_id) => tracing::info!(
                    unit_id = %unit_id,
                    repetition,
                    candidates,
                    available,
                    "selected unit"
                ),
                None => tracing::info!(
                    candidates,
                    available,
                    repetition_ratio,
                    "no unit selected"
                ),
            },
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn stages(&self) -> Vec<RunStage> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::StageEntered { stage } => Some(stage),
                _ => None,
            })
            .collect()
    }

    pub fn strategies(&self) -> Vec<(Strategy, usize)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::StrategyAttempted { strategy, units } => Some((strategy, units)),
                _ => None,
            })
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn record(&self, event: PipelineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
