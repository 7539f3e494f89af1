//! # Rule Engine
//!
//! Rules react to applied updates and emit further change requests.
//!
//! ```text
//! apply(batch) ──▶ updates ──▶ matching rules ──▶ change requests
//!      ▲                                               │
//!      └──────────────── next round ◀──────────────────┘
//! ```
//!
//! Each rule declares, as data, which updates it cares about ([`Trigger`])
//! and which nodes it reads ([`RuleInput`]). Sync rules compute in-process
//! against the current graph; async rules get an owned [`RuleContext`]
//! snapshot and may call external collaborators.

mod engine;
mod evaluator;
mod substitution_hints;
mod symbol_classifier;
mod symbol_table;
mod typesetter;

pub use engine::{RuleEngine, RuleEngineConfig, RoundOutput};
pub use evaluator::EvaluatorRule;
pub use substitution_hints::SubstitutionHintsRule;
pub use symbol_classifier::SymbolClassifierRule;
pub use symbol_table::SymbolTableRule;
pub use typesetter::TypesetterRule;

use crate::external::CollaboratorError;
use crate::graph::{Graph, GraphError};
use crate::model::{Cell, NodeKind, NodeRef, RelationshipRole, Style};
use crate::mutations::ChangeRequest;
use crate::updates::{Update, UpdateEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Stable rule identity, used for diagnostics and as style/relationship source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleId {
    SymbolClassifier,
    SymbolTable,
    SubstitutionHints,
    Typesetter,
    Evaluator,
    /// Embedder-defined rules
    Custom(u32),
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleId::SymbolClassifier => f.write_str("symbol-classifier"),
            RuleId::SymbolTable => f.write_str("symbol-table"),
            RuleId::SubstitutionHints => f.write_str("substitution-hints"),
            RuleId::Typesetter => f.write_str("typesetter"),
            RuleId::Evaluator => f.write_str("evaluator"),
            RuleId::Custom(n) => write!(f, "custom-{}", n),
        }
    }
}

/// Which updates a rule reacts to. `None` fields match anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub event: UpdateEvent,
    pub kind: Option<NodeKind>,
    pub relationship: Option<RelationshipRole>,
}

impl Trigger {
    pub const fn on(event: UpdateEvent) -> Self {
        Self {
            event,
            kind: None,
            relationship: None,
        }
    }

    pub const fn style(event: UpdateEvent, kind: NodeKind) -> Self {
        Self {
            event,
            kind: Some(kind),
            relationship: None,
        }
    }

    pub const fn relationship(event: UpdateEvent, role: RelationshipRole) -> Self {
        Self {
            event,
            kind: None,
            relationship: Some(role),
        }
    }

    pub fn matches(&self, update: &Update) -> bool {
        self.event == update.event()
            && self.kind.map_or(true, |k| update.kind() == Some(k))
            && self
                .relationship
                .map_or(true, |r| update.relationship_role() == Some(r))
    }
}

/// Which node(s) a rule reads besides the update itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleInput {
    /// Only the changed entity
    Changed,
    /// The changed style's parent (style or cell)
    Parent,
    /// The cell owning the changed style
    OwningCell,
    /// Both endpoints of the changed relationship
    Endpoints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    Sync,
    Async,
}

/// Inputs gathered for one invocation, owned so async rules can hold them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleContext {
    pub update: Option<Update>,
    /// Current direct children of the changed style
    pub children: Vec<Style>,
    pub parent: Option<ContextNode>,
    pub cell: Option<Cell>,
    pub endpoints: Option<(ContextNode, ContextNode)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContextNode {
    Cell(Cell),
    Style(Style),
}

impl ContextNode {
    pub fn as_style(&self) -> Option<&Style> {
        match self {
            ContextNode::Style(style) => Some(style),
            ContextNode::Cell(_) => None,
        }
    }
}

impl From<NodeRef<'_>> for ContextNode {
    fn from(node: NodeRef<'_>) -> Self {
        match node {
            NodeRef::Cell(cell) => ContextNode::Cell(cell.clone()),
            NodeRef::Style(style) => ContextNode::Style(style.clone()),
        }
    }
}

impl RuleContext {
    /// The update that fired the rule
    pub fn update(&self) -> Result<&Update, RuleError> {
        self.update
            .as_ref()
            .ok_or_else(|| RuleError::MissingInput("update".to_string()))
    }

    pub fn style(&self) -> Result<&Style, RuleError> {
        self.update()?
            .style()
            .ok_or_else(|| RuleError::MissingInput("style".to_string()))
    }
}

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Missing rule input: {0}")]
    MissingInput(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("Rule {0} does not implement {1:?} computation")]
    WrongMode(RuleId, RuleMode),

    #[error("Rule panicked: {0}")]
    Panicked(String),
}

#[async_trait]
pub trait Rule: Send + Sync + fmt::Debug {
    fn id(&self) -> RuleId;

    fn triggers(&self) -> &[Trigger];

    fn input(&self) -> RuleInput {
        RuleInput::Changed
    }

    fn mode(&self) -> RuleMode {
        RuleMode::Sync
    }

    /// In-process computation against the current graph
    fn compute(&self, _graph: &Graph, _ctx: &RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        Err(RuleError::WrongMode(self.id(), RuleMode::Sync))
    }

    /// Computation that may suspend on an external collaborator
    async fn compute_async(&self, _ctx: RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        Err(RuleError::WrongMode(self.id(), RuleMode::Async))
    }

    fn matches(&self, update: &Update) -> bool {
        self.triggers().iter().any(|t| t.matches(update))
    }
}

/// Ordered set of rules keyed by id
#[derive(Clone)]
pub struct RuleRegistry {
    rules: BTreeMap<RuleId, Arc<dyn Rule>>,
}

impl RuleRegistry {
    /// Registry with the built-in synchronous rules
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.add_rule(SymbolClassifierRule);
        registry.add_rule(SymbolTableRule);
        registry.add_rule(SubstitutionHintsRule);
        registry
    }

    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Register a rule. Returns `false` (and keeps the existing one) on a
    /// duplicate id.
    pub fn add_rule(&mut self, rule: impl Rule + 'static) -> bool {
        self.add_shared(Arc::new(rule))
    }

    pub fn add_shared(&mut self, rule: Arc<dyn Rule>) -> bool {
        let id = rule.id();
        if self.rules.contains_key(&id) {
            tracing::warn!(rule = %id, "duplicate rule registration ignored");
            return false;
        }
        self.rules.insert(id, rule);
        true
    }

    pub fn get(&self, id: RuleId) -> Option<&Arc<dyn Rule>> {
        self.rules.get(&id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<dyn Rule>> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}
