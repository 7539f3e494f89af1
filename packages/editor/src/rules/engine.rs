//! One propagation round: match, gather inputs, compute, dedup.

use super::{ContextNode, Rule, RuleContext, RuleError, RuleId, RuleInput, RuleMode, RuleRegistry};
use crate::graph::Graph;
use crate::mutations::ChangeRequest;
use crate::updates::Update;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuleEngineConfig {
    /// Rounds after the user batch before the cascade counts as a cycle
    pub max_rounds: usize,
    /// Per-invocation bound on async rules
    pub rule_timeout: Duration,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 16,
            rule_timeout: Duration::from_secs(10),
        }
    }
}

/// Requests collected in one round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundOutput {
    /// Sync outputs first, then async outputs in completion order; deduplicated
    pub requests: Vec<ChangeRequest>,
    /// Rules that contributed at least one request
    pub fired: Vec<RuleId>,
}

impl RoundOutput {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn extend(&mut self, rule: RuleId, requests: Vec<ChangeRequest>) {
        if requests.is_empty() {
            return;
        }
        if !self.fired.contains(&rule) {
            self.fired.push(rule);
        }
        self.requests.extend(requests);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    registry: RuleRegistry,
    config: RuleEngineConfig,
}

impl RuleEngine {
    pub fn new(registry: RuleRegistry, config: RuleEngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuleEngineConfig {
        &self.config
    }

    /// Whether any registered rule reacts to at least one of `updates`
    pub fn matches_any(&self, updates: &[Update]) -> bool {
        updates
            .iter()
            .any(|update| self.registry.rules().any(|rule| rule.matches(update)))
    }

    /// Run every matching rule against one batch of updates.
    ///
    /// Rule failures (errors, timeouts, panics) are logged and yield no
    /// requests.
    pub async fn run_round(&self, graph: &Graph, updates: &[Update]) -> RoundOutput {
        let mut output = RoundOutput::default();
        let mut pending = Vec::new();

        for update in updates {
            for rule in self.registry.rules() {
                if !rule.matches(update) {
                    continue;
                }
                let ctx = gather(graph, rule.input(), update);
                match rule.mode() {
                    RuleMode::Sync => {
                        let result = catch_unwind(AssertUnwindSafe(|| rule.compute(graph, &ctx)))
                            .unwrap_or_else(|panic| Err(panicked(panic)));
                        let requests = contain(rule.id(), result);
                        output.extend(rule.id(), requests);
                    }
                    RuleMode::Async => pending.push((rule.clone(), ctx)),
                }
            }
        }

        let timeout = self.config.rule_timeout;
        let mut in_flight: FuturesUnordered<_> = pending
            .into_iter()
            .map(|(rule, ctx)| invoke_async(rule, ctx, timeout))
            .collect();

        while let Some((id, result)) = in_flight.next().await {
            output.extend(id, contain(id, result));
        }

        output.requests = dedup(output.requests);
        output
    }
}

async fn invoke_async(
    rule: Arc<dyn Rule>,
    ctx: RuleContext,
    timeout: Duration,
) -> (RuleId, Result<Vec<ChangeRequest>, RuleError>) {
    let id = rule.id();
    let computation = AssertUnwindSafe(rule.compute_async(ctx)).catch_unwind();
    let result = match tokio::time::timeout(timeout, computation).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(panicked(panic)),
        Err(_) => Err(RuleError::Timeout(timeout.as_millis() as u64)),
    };
    (id, result)
}

fn panicked(panic: Box<dyn Any + Send>) -> RuleError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RuleError::Panicked(message)
}

fn contain(rule: RuleId, result: Result<Vec<ChangeRequest>, RuleError>) -> Vec<ChangeRequest> {
    match result {
        Ok(requests) => requests,
        Err(error) => {
            tracing::warn!(rule = %rule, error = %error, "rule invocation failed");
            Vec::new()
        }
    }
}

/// Read the rule's declared inputs from the current graph
fn gather(graph: &Graph, input: RuleInput, update: &Update) -> RuleContext {
    let mut ctx = RuleContext {
        update: Some(update.clone()),
        children: update
            .style()
            .map(|style| graph.children_of(style.id).into_iter().cloned().collect())
            .unwrap_or_default(),
        ..RuleContext::default()
    };

    match input {
        RuleInput::Changed => {}
        RuleInput::Parent => {
            ctx.parent = update
                .style()
                .and_then(|style| graph.get_node(style.parent()).ok())
                .map(ContextNode::from);
        }
        RuleInput::OwningCell => {
            let cell_id = match update.style() {
                Some(style) => Some(style.cell_id),
                None => match update {
                    Update::CellInserted { cell, .. } => Some(cell.id),
                    Update::CellMoved { cell_id, .. }
                    | Update::CellResized { cell_id, .. }
                    | Update::StrokeInserted { cell_id, .. }
                    | Update::StrokeDeleted { cell_id, .. } => Some(*cell_id),
                    _ => None,
                },
            };
            ctx.cell = cell_id.and_then(|id| graph.cell(id)).cloned();
        }
        RuleInput::Endpoints => {
            ctx.endpoints = update.relationship().and_then(|rel| {
                let from = graph.get_node(rel.from).ok()?;
                let to = graph.get_node(rel.to).ok()?;
                Some((ContextNode::from(from), ContextNode::from(to)))
            });
        }
    }

    ctx
}

/// Drop structurally equal requests, keeping the first occurrence
fn dedup(requests: Vec<ChangeRequest>) -> Vec<ChangeRequest> {
    let mut unique: Vec<ChangeRequest> = Vec::with_capacity(requests.len());
    for request in requests {
        if !unique.contains(&request) {
            unique.push(request);
        }
    }
    unique
}
