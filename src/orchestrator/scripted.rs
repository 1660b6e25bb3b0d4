//! Deterministic engine that replays a fixed list of steps.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::EngineError;
use crate::events::{Artifact, HumanDecision, ProposedAction, StageSignal};
use crate::orchestrator::{ExecutionEngine, RunOutcome, RunRequest, WorkerContext};

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Parse `units` units, one checkpoint each, then close the parsing stage.
    Parse { units: u64, total_known: bool },
    /// Run generation sub-phase `phase` in `steps` equal increments.
    Generate { phase: usize, steps: u32 },
    Artifact(Artifact),
    /// Pause for operator confirmation; a rejection fails the run.
    Confirm(ProposedAction),
    Fail(String),
}

pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    unit_delay: Duration,
    response: Option<Value>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            unit_delay: Duration::ZERO,
            response: None,
        }
    }

    /// Parse `units`, run both default sub-phases, publish one artifact.
    pub fn demo(units: u64) -> Self {
        Self::new(vec![
            ScriptStep::Parse {
                units,
                total_known: true,
            },
            ScriptStep::Generate { phase: 0, steps: 4 },
            ScriptStep::Generate { phase: 1, steps: 4 },
            ScriptStep::Artifact(Artifact {
                artifact_id: "summary".to_string(),
                title: "Summary".to_string(),
                media_type: "text/markdown".to_string(),
                content: format!("Processed {units} units."),
            }),
        ])
    }

    pub fn with_unit_delay(mut self, delay: Duration) -> Self {
        self.unit_delay = delay;
        self
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    fn unit(&self, ctx: &WorkerContext) -> Result<(), EngineError> {
        ctx.checkpoint()?;
        if !self.unit_delay.is_zero() {
            std::thread::sleep(self.unit_delay);
        }
        Ok(())
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn execute(
        &self,
        request: &RunRequest,
        ctx: &mut WorkerContext,
    ) -> Result<RunOutcome, EngineError> {
        for step in &self.steps {
            match step {
                ScriptStep::Parse { units, total_known } => {
                    for processed in 1..=*units {
                        self.unit(ctx)?;
                        ctx.emit_stage(StageSignal::Parsing {
                            processed,
                            total: total_known.then_some(*units),
                            message: None,
                        });
                    }
                    ctx.emit_stage(StageSignal::EndOfParsing);
                }
                ScriptStep::Generate { phase, steps } => {
                    let steps = (*steps).max(1);
                    for step in 1..=steps {
                        self.unit(ctx)?;
                        ctx.emit_stage(StageSignal::Generating {
                            phase: *phase,
                            percent: f64::from(step) * 100.0 / f64::from(steps),
                            message: None,
                        });
                    }
                }
                ScriptStep::Artifact(artifact) => {
                    ctx.checkpoint()?;
                    ctx.emit_artifact(artifact.clone());
                }
                ScriptStep::Confirm(action) => {
                    if let HumanDecision::Reject { reason } =
                        ctx.request_confirmation(action.clone())?
                    {
                        return Err(EngineError::Failed(format!(
                            "action '{}' rejected: {}",
                            action.action_id,
                            reason.as_deref().unwrap_or("no reason given")
                        )));
                    }
                }
                ScriptStep::Fail(message) => return Err(EngineError::Failed(message.clone())),
            }
        }

        let content = self.response.clone().unwrap_or_else(|| {
            json!({
                "workflow_id": request.workflow_id,
                "input": request.input,
                "steps": self.steps.len(),
            })
        });
        Ok(RunOutcome::new(content))
    }
}
