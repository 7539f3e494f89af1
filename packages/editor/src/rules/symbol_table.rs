//! # Symbol Table
//!
//! Keeps `SymbolDependency` and `DuplicateDefinition` relationships in line
//! with document order.
//!
//! For one symbol name, definitions and uses are ordered by the position of
//! their owning cell. A use depends on the last definition in a strictly
//! earlier cell; consecutive definitions are linked as duplicates:
//!
//! ```text
//! cell 0: x = 3 ─┬─ dependency ─▶ cell 1: x + 1
//!                └─ duplicate ──▶ cell 2: x = 5 ── dependency ─▶ cell 3: 2x
//! ```
//!
//! Inserting a redefinition therefore migrates the dependencies of every later
//! use from the superseded definition to the new one.

use super::{Rule, RuleContext, RuleError, RuleId, Trigger};
use crate::graph::{Graph, RelationshipPattern, StylePattern};
use crate::model::{
    NodeId, NodeKind, RelationshipData, RelationshipRole, Source, StyleRole, StyleType,
};
use crate::mutations::ChangeRequest;
use crate::updates::{Update, UpdateEvent};
use std::collections::BTreeSet;

const DEFINITION: NodeKind = NodeKind::new(StyleRole::Symbol, StyleType::SymbolDefinition);
const USE: NodeKind = NodeKind::new(StyleRole::Symbol, StyleType::SymbolUse);

const TRIGGERS: &[Trigger] = &[
    Trigger::style(UpdateEvent::StyleInserted, DEFINITION),
    Trigger::style(UpdateEvent::StyleChanged, DEFINITION),
    Trigger::style(UpdateEvent::StyleDeleted, DEFINITION),
    Trigger::style(UpdateEvent::StyleInserted, USE),
    Trigger::style(UpdateEvent::StyleChanged, USE),
    Trigger::style(UpdateEvent::StyleDeleted, USE),
    Trigger::on(UpdateEvent::CellMoved),
];

const SOURCE: Source = Source::Rule(RuleId::SymbolTable);

#[derive(Debug, Default)]
pub struct SymbolTableRule;

impl Rule for SymbolTableRule {
    fn id(&self) -> RuleId {
        RuleId::SymbolTable
    }

    fn triggers(&self) -> &[Trigger] {
        TRIGGERS
    }

    fn compute(&self, graph: &Graph, ctx: &RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        let mut names = BTreeSet::new();
        match ctx.update()? {
            Update::StyleChanged { style, previous } => {
                names.extend(style.data.symbol_name().map(str::to_string));
                names.extend(previous.symbol_name().map(str::to_string));
            }
            Update::CellMoved { .. } => {
                let symbols = StylePattern::any().role(StyleRole::Symbol);
                for style in graph.find_styles(&symbols, None, false) {
                    names.extend(style.data.symbol_name().map(str::to_string));
                }
            }
            update => {
                if let Some(style) = update.style() {
                    names.extend(style.data.symbol_name().map(str::to_string));
                }
            }
        }

        let mut requests = Vec::new();
        for name in names {
            requests.extend(reconcile_symbol(graph, &name)?);
        }
        Ok(requests)
    }
}

/// Symbol styles for `name` of one type, ordered by document position
fn ordered(graph: &Graph, kind: NodeKind, name: &str) -> Result<Vec<NodeId>, RuleError> {
    let mut keyed = Vec::new();
    for style in graph.find_styles(&StylePattern::kind(kind), None, false) {
        if style.data.symbol_name() != Some(name) {
            continue;
        }
        let cell = graph.top_level_ancestor_of(style.id)?;
        keyed.push((graph.position_of(cell)?, style.id));
    }
    keyed.sort();
    Ok(keyed.into_iter().map(|(_, id)| id).collect())
}

fn cell_position(graph: &Graph, id: NodeId) -> Result<usize, RuleError> {
    let cell = graph.top_level_ancestor_of(id)?;
    Ok(graph.position_of(cell)?)
}

fn reconcile_symbol(graph: &Graph, name: &str) -> Result<Vec<ChangeRequest>, RuleError> {
    let definitions = ordered(graph, DEFINITION, name)?;
    let uses = ordered(graph, USE, name)?;

    let mut desired: Vec<(RelationshipRole, NodeId, NodeId)> = Vec::new();

    for pair in definitions.windows(2) {
        desired.push((RelationshipRole::DuplicateDefinition, pair[0], pair[1]));
    }

    let mut def_positions = Vec::with_capacity(definitions.len());
    for def in &definitions {
        def_positions.push((cell_position(graph, *def)?, *def));
    }
    for use_id in uses {
        let position = cell_position(graph, use_id)?;
        let active = def_positions
            .iter()
            .rev()
            .find(|(def_position, _)| *def_position < position);
        if let Some((_, def)) = active {
            desired.push((RelationshipRole::SymbolDependency, *def, use_id));
        }
    }

    let mut requests = Vec::new();
    let mut existing = Vec::new();
    for role in [
        RelationshipRole::DuplicateDefinition,
        RelationshipRole::SymbolDependency,
    ] {
        let pattern = RelationshipPattern::any()
            .role(role)
            .source(SOURCE)
            .symbol(name);
        for rel in graph.find_relationships(&pattern) {
            let key = (rel.role, rel.from, rel.to);
            if desired.contains(&key) && !existing.contains(&key) {
                existing.push(key);
            } else {
                requests.push(ChangeRequest::DeleteRelationship {
                    relationship_id: rel.id,
                });
            }
        }
    }

    for (role, from, to) in desired {
        if existing.contains(&(role, from, to)) {
            continue;
        }
        requests.push(ChangeRequest::InsertRelationship {
            id: None,
            from,
            to,
            role,
            source: SOURCE,
            data: RelationshipData::Symbol {
                name: name.to_string(),
            },
        });
    }

    Ok(requests)
}
