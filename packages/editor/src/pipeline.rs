//! # Editing Pipeline
//!
//! Coordinates one submission: apply the user batch, then run rule rounds
//! until nothing more fires.
//!
//! ```text
//! submit(requests)
//!   round 0: Document::apply(user batch) ──▶ on_batch
//!   round 1: RuleEngine::run_round ──▶ Document::apply ──▶ on_batch
//!   ...
//!   round n: no requests ──▶ done
//! ```
//!
//! Each applied round is handed to the caller as soon as it lands, so viewers
//! see the user's change before slow async rules finish. A batch is marked
//! `complete` when no rule could react to it; otherwise a trailing empty
//! batch closes the operation.

use crate::errors::EditorError;
use crate::model::Source;
use crate::mutations::{ApplyOutcome, ChangeRequest, MutationError};
use crate::rules::{RoundOutput, RuleEngine};
use crate::updates::UpdateBatch;
use crate::Document;

/// One applied round of a submission
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedBatch {
    /// 0 for the submitted batch, then one per rule round
    pub round: usize,
    pub origin: Source,
    pub outcome: ApplyOutcome,
    /// No further batches follow for this submission
    pub complete: bool,
}

impl AppliedBatch {
    /// Wire form of this round.
    ///
    /// Every round carries its own inverse and pinned redo list, so undoing
    /// and redoing an operation restores rule output with its original ids.
    pub fn into_update_batch(self, request_id: Option<String>) -> UpdateBatch {
        UpdateBatch {
            updates: self.outcome.updates,
            undo_change_requests: self.outcome.undo_requests,
            redo_change_requests: self.outcome.redo_requests,
            complete: self.complete,
            request_id,
        }
    }
}

/// Summary of a finished submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitReport {
    /// Rule rounds that applied changes
    pub rounds: usize,
    /// Inverse of every applied round, latest round first
    pub undo_requests: Vec<ChangeRequest>,
    pub redo_requests: Vec<ChangeRequest>,
}

/// Manages the full submit → propagate pipeline for one document
pub struct Pipeline {
    document: Document,
    engine: RuleEngine,
}

impl Pipeline {
    pub fn new(document: Document, engine: RuleEngine) -> Self {
        Self { document, engine }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Apply `requests` and propagate through the rule engine.
    ///
    /// `on_batch` sees every applied round in order. Rejections of the user
    /// batch are returned; rejections of rule output are logged and skipped.
    pub async fn submit<F>(
        &mut self,
        source: Source,
        requests: &[ChangeRequest],
        mut on_batch: F,
    ) -> Result<SubmitReport, EditorError>
    where
        F: FnMut(AppliedBatch) + Send,
    {
        let outcome = self.document.apply(source, requests)?;
        let mut report = SubmitReport {
            rounds: 0,
            undo_requests: outcome.undo_requests.clone(),
            redo_requests: outcome.redo_requests.clone(),
        };

        let mut updates = outcome.updates.clone();
        let mut closed = !self.engine.matches_any(&updates);
        let mut sent_complete = closed;
        on_batch(AppliedBatch {
            round: 0,
            origin: source,
            outcome,
            complete: closed,
        });

        let max_rounds = self.engine.config().max_rounds;
        let mut round = 0;

        while !closed {
            let output = self.engine.run_round(self.document.graph(), &updates).await;
            if output.is_empty() {
                break;
            }

            round += 1;
            if round > max_rounds {
                tracing::error!(
                    path = %self.document.path.display(),
                    rounds = max_rounds,
                    rules = ?output.fired,
                    "rule cascade exceeded round bound"
                );
                return Err(EditorError::RuleCycle {
                    rounds: max_rounds,
                    rules: output.fired,
                });
            }

            let outcome = self.apply_rule_output(&output)?;
            updates = outcome.updates.clone();
            closed = updates.is_empty() || !self.engine.matches_any(&updates);
            if !outcome.is_empty() {
                report.rounds = round;
                let mut undo = outcome.undo_requests.clone();
                undo.append(&mut report.undo_requests);
                report.undo_requests = undo;
                report.redo_requests.extend(outcome.redo_requests.iter().cloned());
                sent_complete = closed;
                on_batch(AppliedBatch {
                    round,
                    origin: Source::System,
                    outcome,
                    complete: closed,
                });
            }
        }

        if !sent_complete {
            on_batch(AppliedBatch {
                round,
                origin: Source::System,
                outcome: ApplyOutcome::default(),
                complete: true,
            });
        }

        Ok(report)
    }

    /// Apply a round's requests; if the batch is rejected, fall back to one
    /// request at a time so a single stale request does not drop the round.
    fn apply_rule_output(&mut self, output: &RoundOutput) -> Result<ApplyOutcome, EditorError> {
        match self.document.apply(Source::System, &output.requests) {
            Ok(outcome) => return Ok(outcome),
            Err(EditorError::Mutation(MutationError::Rejected { index, error })) => {
                tracing::warn!(index, error = %error, "rule batch rejected, applying individually");
            }
            Err(error) => return Err(error),
        }

        let mut merged = ApplyOutcome::default();
        for request in &output.requests {
            match self.document.apply(Source::System, std::slice::from_ref(request)) {
                Ok(outcome) => {
                    merged.updates.extend(outcome.updates);
                    let mut undo = outcome.undo_requests;
                    undo.append(&mut merged.undo_requests);
                    merged.undo_requests = undo;
                    merged.redo_requests.extend(outcome.redo_requests);
                }
                Err(EditorError::Mutation(MutationError::Rejected { error, .. })) => {
                    tracing::warn!(?request, error = %error, "skipping stale rule request");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::{EchoAlgebra, SvgTypesetter};
    use crate::model::{CellType, NodeId, Position, StyleData, StyleRole};
    use crate::rules::{EvaluatorRule, RuleEngineConfig, RuleRegistry, TypesetterRule};
    use crate::updates::UpdateEvent;
    use std::sync::Arc;

    fn pipeline(registry: RuleRegistry) -> Pipeline {
        Pipeline::new(
            Document::new("test.nb"),
            RuleEngine::new(registry, RuleEngineConfig::default()),
        )
    }

    fn insert_cell() -> ChangeRequest {
        ChangeRequest::InsertEmptyCell {
            cell_type: CellType::Formula,
            after: Position::Bottom,
            id: None,
        }
    }

    fn formula(cell: u64, text: &str) -> ChangeRequest {
        ChangeRequest::InsertStyle {
            id: None,
            cell_id: NodeId(cell),
            parent_id: None,
            role: StyleRole::Input,
            source: Source::User,
            data: StyleData::Formula(text.into()),
        }
    }

    #[tokio::test]
    async fn test_batch_without_matching_rules_is_complete() {
        let mut pipeline = pipeline(RuleRegistry::new());
        let mut batches = Vec::new();
        pipeline
            .submit(Source::User, &[insert_cell()], |b| batches.push(b))
            .await
            .unwrap();

        assert_eq!(batches.len(), 1);
        assert!(batches[0].complete);
    }

    #[tokio::test]
    async fn test_rounds_are_emitted_in_order() {
        let mut pipeline = pipeline(RuleRegistry::new());
        pipeline
            .submit(Source::User, &[insert_cell()], |_| {})
            .await
            .unwrap();

        let mut batches = Vec::new();
        let report = pipeline
            .submit(Source::User, &[formula(1, "x = 3")], |b| batches.push(b))
            .await
            .unwrap();

        // Classifier output may still trigger the symbol table, so the
        // operation is closed by a trailing empty batch
        let rounds: Vec<usize> = batches.iter().map(|b| b.round).collect();
        assert_eq!(rounds, vec![0, 1, 1]);
        assert!(!batches[0].complete);
        assert!(!batches[1].complete);
        let last = batches.last().unwrap();
        assert!(last.complete);
        assert!(last.outcome.is_empty());
        assert_eq!(report.rounds, 1);
        // Classifier output is reverted before the submitted formula
        assert_eq!(
            report.undo_requests.last(),
            Some(&ChangeRequest::DeleteStyle { style_id: NodeId(2) })
        );
        assert!(report.undo_requests.len() > 1);
        assert!(matches!(
            report.redo_requests.last(),
            Some(ChangeRequest::InsertStyle { id: Some(id), .. }) if *id != NodeId(2)
        ));
    }

    #[tokio::test]
    async fn test_async_rules_attach_children() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(TypesetterRule::new(Arc::new(SvgTypesetter)));
        registry.add_rule(EvaluatorRule::new(Arc::new(EchoAlgebra::default())));
        let mut pipeline = pipeline(registry);

        pipeline
            .submit(Source::User, &[insert_cell()], |_| {})
            .await
            .unwrap();
        let mut events = Vec::new();
        pipeline
            .submit(Source::User, &[formula(1, "1 + 1")], |b| {
                events.extend(b.outcome.updates.iter().map(|u| u.event()))
            })
            .await
            .unwrap();

        let graph = pipeline.document().graph();
        let children = graph.children_of(NodeId(2));
        assert!(children
            .iter()
            .any(|s| s.data == StyleData::Evaluation("= 1 + 1".into())));
        assert!(children
            .iter()
            .any(|s| matches!(&s.data, StyleData::Svg(svg) if svg.contains("1 + 1"))));
        assert_eq!(
            events.iter().filter(|e| **e == UpdateEvent::StyleInserted).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_rejected_user_batch_emits_nothing() {
        let mut pipeline = pipeline(RuleRegistry::new());
        let mut batches = Vec::new();
        let result = pipeline
            .submit(
                Source::User,
                &[ChangeRequest::DeleteCell { cell_id: NodeId(3) }],
                |b| batches.push(b),
            )
            .await;

        assert!(result.is_err());
        assert!(batches.is_empty());
    }
}
