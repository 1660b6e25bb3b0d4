//! Stage machine turning raw stage signals into observable progress.
//!
//! ```text
//! READY ──► PARSING ──► GENERATING ──► COMPLETED
//!   │          │             │
//!   └──────────┴─────────────┴──────► ERROR
//!
//! COMPLETED / ERROR ──(reset)──► READY
//! ```
//!
//! Every observable change yields exactly one [`ProgressState`]; a signal that
//! changes nothing yields none. Forward jumps fill in the skipped stages (each
//! at 100%) so the observed stage sequence never skips a stage.

use crate::error::ProgressError;
use crate::events::StageSignal;
use crate::progress::{GenerationBands, ProgressState, Stage};

pub struct ProgressStateMachine {
    state: ProgressState,
    bands: GenerationBands,
    unknown_total_increment: f64,
    parsing_closed: bool,
}

impl ProgressStateMachine {
    pub fn new(bands: GenerationBands, unknown_total_increment: f64) -> Self {
        Self {
            state: ProgressState::ready(),
            bands,
            unknown_total_increment: unknown_total_increment.max(0.0),
            parsing_closed: false,
        }
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn bands(&self) -> &GenerationBands {
        &self.bands
    }

    /// Apply one signal, returning the states to emit in order.
    pub fn apply(&mut self, signal: &StageSignal) -> Result<Vec<ProgressState>, ProgressError> {
        let stage = self.state.stage;
        if stage.is_terminal() {
            return Err(ProgressError::Terminal(stage));
        }

        let mut emitted = Vec::new();
        match signal {
            StageSignal::Parsing {
                processed,
                total,
                message,
            } => {
                if stage == Stage::Generating || self.parsing_closed {
                    return Err(ProgressError::InvalidTransition {
                        from: stage,
                        signal: signal.name(),
                    });
                }
                let percentage = self.parse_percentage(*processed, *total);
                let message = message.clone().unwrap_or_else(|| match total {
                    Some(total) => format!("parsing {processed}/{total}"),
                    None => format!("parsing {processed}"),
                });
                if stage == Stage::Ready {
                    self.transition(Stage::Parsing, percentage, message, &mut emitted);
                } else {
                    self.advance(percentage, message, &mut emitted);
                }
            }
            StageSignal::EndOfParsing => {
                if stage == Stage::Generating {
                    return Err(ProgressError::InvalidTransition {
                        from: stage,
                        signal: signal.name(),
                    });
                }
                self.parsing_closed = true;
            }
            StageSignal::Generating {
                phase,
                percent,
                message,
            } => {
                let percentage = self.bands.map(*phase, *percent)?;
                let message = message.clone().unwrap_or_else(|| {
                    let band = self.bands.band(*phase).map(|b| b.name.as_str());
                    format!("generating: {}", band.unwrap_or("output"))
                });
                if stage == Stage::Generating {
                    self.advance(percentage, message, &mut emitted);
                } else {
                    self.fill_through(Stage::Parsing, &mut emitted);
                    self.transition(Stage::Generating, percentage, message, &mut emitted);
                }
            }
            StageSignal::Completed { message } => {
                self.fill_through(Stage::Generating, &mut emitted);
                let message = message.clone().unwrap_or_else(|| "completed".to_string());
                self.transition(Stage::Completed, 100.0, message, &mut emitted);
            }
            StageSignal::Failed { message } => {
                let percentage = self.state.percentage;
                self.transition(Stage::Error, percentage, message.clone(), &mut emitted);
            }
        }
        Ok(emitted)
    }

    /// External reset, e.g. the input changed and prior output is stale.
    /// Returns `None` when the machine is already in its initial state.
    pub fn reset(&mut self, message: impl Into<String>) -> Option<ProgressState> {
        if self.state.stage == Stage::Ready && self.state.percentage == 0.0 && !self.parsing_closed
        {
            return None;
        }
        self.parsing_closed = false;
        self.state = ProgressState {
            stage: Stage::Ready,
            percentage: 0.0,
            message: message.into(),
        };
        Some(self.state.clone())
    }

    fn parse_percentage(&self, processed: u64, total: Option<u64>) -> f64 {
        let computed = match total {
            Some(0) => 100.0,
            Some(total) => (processed as f64 * 100.0) / total as f64,
            None => processed as f64 * self.unknown_total_increment,
        };
        computed.min(100.0)
    }

    /// Bring a READY or PARSING machine up to `target` (inclusive), emitting
    /// each stage passed over at 100%.
    fn fill_through(&mut self, target: Stage, emitted: &mut Vec<ProgressState>) {
        if self.state.stage == Stage::Ready {
            self.transition(Stage::Parsing, 100.0, "parsing skipped".to_string(), emitted);
        }
        if target == Stage::Generating && self.state.stage == Stage::Parsing {
            self.transition(
                Stage::Generating,
                100.0,
                "generation skipped".to_string(),
                emitted,
            );
        }
    }

    fn transition(
        &mut self,
        stage: Stage,
        percentage: f64,
        message: String,
        emitted: &mut Vec<ProgressState>,
    ) {
        self.state = ProgressState {
            stage,
            percentage: percentage.clamp(0.0, 100.0),
            message,
        };
        emitted.push(self.state.clone());
    }

    /// Same-stage update; the percentage never moves backwards.
    fn advance(&mut self, percentage: f64, message: String, emitted: &mut Vec<ProgressState>) {
        let percentage = percentage.clamp(0.0, 100.0).max(self.state.percentage);
        if percentage == self.state.percentage && message == self.state.message {
            return;
        }
        self.state.percentage = percentage;
        self.state.message = message;
        emitted.push(self.state.clone());
    }
}
