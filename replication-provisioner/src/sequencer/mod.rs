//! Provisioning sequencer
//!
//! Applies the plan against a single session:
//! - each step runs in its own transaction and commits on success
//! - a failed step is rolled back and the run stops there
//! - earlier committed steps stay applied; nothing is retried
//!
//! Re-running after a partial failure hits "already exists" at the step that
//! created the object. Cleaning that up is left to the operator.

mod ident;
mod steps;

pub use ident::{Identifier, IdentifierError, SlotName, MAX_IDENTIFIER_LEN};
pub use steps::{
    build_plan, ProvisioningStep, ProvisioningTargets, ReplicationTargets, StepKind,
    DEFAULT_SCHEMA, OUTPUT_PLUGIN,
};

use crate::connection::{DatabaseSession, SessionError};
use common::{Telemetry, TelemetryEvent};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// A statement failed. Carries the step identity and the database cause.
#[derive(Debug, Error)]
#[error("step {index} ({}) failed executing `{statement}`", .kind.name())]
pub struct ProvisioningStepError {
    pub index: usize,
    pub kind: StepKind,
    pub statement: String,
    #[source]
    pub source: SessionError,
}

impl ProvisioningStepError {
    pub fn is_already_exists(&self) -> bool {
        self.source.is_already_exists()
    }
}

/// Where a run is. `Done` and `Failed` are terminal; there is no way back.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunState {
    Init,
    SessionAcquired,
    Step(usize),
    Done,
    Failed { index: usize, cause: String },
}

pub struct Sequencer<'a> {
    run_id: String,
    plan: Vec<ProvisioningStep>,
    telemetry: &'a Telemetry,
    state: RunState,
}

impl<'a> Sequencer<'a> {
    pub fn new(run_id: impl Into<String>, plan: Vec<ProvisioningStep>, telemetry: &'a Telemetry) -> Self {
        Self {
            run_id: run_id.into(),
            plan,
            telemetry,
            state: RunState::Init,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(run_id = %self.run_id, from = ?self.state, to = ?next, "Sequencer transition");
        self.state = next;
    }

    /// Run every step on `session`, then release it.
    ///
    /// Consumes the sequencer: a run happens once. The session is closed on
    /// both outcomes.
    pub async fn run<S>(mut self, mut session: S) -> Result<Vec<StepKind>, ProvisioningStepError>
    where
        S: DatabaseSession,
    {
        self.transition(RunState::SessionAcquired);
        let outcome = self.apply_all(&mut session).await;
        session.close().await;
        outcome
    }

    async fn apply_all<S>(&mut self, session: &mut S) -> Result<Vec<StepKind>, ProvisioningStepError>
    where
        S: DatabaseSession,
    {
        let mut applied = Vec::with_capacity(self.plan.len());

        let plan = std::mem::take(&mut self.plan);
        for step in &plan {
            self.transition(RunState::Step(step.index));

            let span = info_span!("step", index = step.index, name = step.kind.name());
            let result = apply_step(session, step).instrument(span).await;

            match result {
                Ok(()) => {
                    info!(
                        index = step.index,
                        statement = %step.statement,
                        "Executed statement"
                    );
                    self.telemetry.send(TelemetryEvent::StepCompleted {
                        run_id: self.run_id.clone(),
                        index: step.index,
                        step: step.kind.name().to_string(),
                    });
                    applied.push(step.kind);
                }
                Err(cause) => {
                    error!(
                        index = step.index,
                        step = step.kind.name(),
                        statement = %step.statement,
                        error = %cause,
                        "Statement failed, aborting remaining steps"
                    );
                    self.transition(RunState::Failed {
                        index: step.index,
                        cause: cause.to_string(),
                    });
                    self.telemetry.send(TelemetryEvent::StepFailed {
                        run_id: self.run_id.clone(),
                        index: step.index,
                        step: step.kind.name().to_string(),
                        error: cause.to_string(),
                    });
                    return Err(ProvisioningStepError {
                        index: step.index,
                        kind: step.kind,
                        statement: step.statement.clone(),
                        source: cause,
                    });
                }
            }
        }

        self.transition(RunState::Done);
        Ok(applied)
    }
}

/// One step in its own transaction. Rolls back before returning an error.
async fn apply_step<S>(session: &mut S, step: &ProvisioningStep) -> Result<(), SessionError>
where
    S: DatabaseSession,
{
    session.begin().await?;

    let result = match session.execute(&step.statement).await {
        Ok(()) => session.commit().await,
        Err(e) => Err(e),
    };

    if let Err(cause) = result {
        if let Err(rollback_err) = session.rollback().await {
            warn!(error = %rollback_err, "Rollback failed");
        }
        return Err(cause);
    }

    Ok(())
}
