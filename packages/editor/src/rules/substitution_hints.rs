//! Attaches a substitution hint (`x = 3`) under each use that depends on a
//! definition, and retracts it together with the dependency.

use super::{ContextNode, Rule, RuleContext, RuleError, RuleId, RuleInput, Trigger};
use crate::graph::{Graph, RelationshipPattern, StylePattern};
use crate::model::{
    NodeId, NodeKind, RelationshipRole, Source, Style, StyleData, StyleRole, StyleType,
};
use crate::mutations::ChangeRequest;
use crate::updates::{Update, UpdateEvent};

const DEFINITION: NodeKind = NodeKind::new(StyleRole::Symbol, StyleType::SymbolDefinition);

const TRIGGERS: &[Trigger] = &[
    Trigger::relationship(
        UpdateEvent::RelationshipInserted,
        RelationshipRole::SymbolDependency,
    ),
    Trigger::relationship(
        UpdateEvent::RelationshipDeleted,
        RelationshipRole::SymbolDependency,
    ),
    Trigger::style(UpdateEvent::StyleChanged, DEFINITION),
];

const SOURCE: Source = Source::Rule(RuleId::SubstitutionHints);

#[derive(Debug, Default)]
pub struct SubstitutionHintsRule;

impl Rule for SubstitutionHintsRule {
    fn id(&self) -> RuleId {
        RuleId::SubstitutionHints
    }

    fn triggers(&self) -> &[Trigger] {
        TRIGGERS
    }

    fn input(&self) -> RuleInput {
        RuleInput::Endpoints
    }

    fn compute(&self, graph: &Graph, ctx: &RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        match ctx.update()? {
            Update::RelationshipInserted { relationship } => {
                // Already retracted later in the same batch
                if graph.relationship(relationship.id).is_none() {
                    return Ok(Vec::new());
                }
                if !hints_for(graph, relationship.id).is_empty() {
                    return Ok(Vec::new());
                }
                let Some((ContextNode::Style(definition), ContextNode::Style(usage))) =
                    &ctx.endpoints
                else {
                    return Err(RuleError::MissingInput("dependency endpoints".to_string()));
                };
                Ok(hint_text(definition)
                    .map(|text| {
                        vec![ChangeRequest::InsertStyle {
                            id: None,
                            cell_id: usage.cell_id,
                            parent_id: Some(usage.id),
                            role: StyleRole::Hint,
                            source: SOURCE,
                            data: StyleData::Hint {
                                relationship: relationship.id,
                                text,
                            },
                        }]
                    })
                    .unwrap_or_default())
            }

            Update::RelationshipDeleted { relationship } => Ok(hints_for(graph, relationship.id)
                .into_iter()
                .map(|hint| ChangeRequest::DeleteStyle { style_id: hint.id })
                .collect()),

            Update::StyleChanged { style, .. } => {
                let Some(definition) = graph.style(style.id) else {
                    return Ok(Vec::new());
                };
                let Some(text) = hint_text(definition) else {
                    return Ok(Vec::new());
                };
                let pattern = RelationshipPattern::any()
                    .role(RelationshipRole::SymbolDependency)
                    .from(definition.id);

                let mut requests = Vec::new();
                for rel in graph.find_relationships(&pattern) {
                    for hint in hints_for(graph, rel.id) {
                        let data = StyleData::Hint {
                            relationship: rel.id,
                            text: text.clone(),
                        };
                        if hint.data != data {
                            requests.push(ChangeRequest::ChangeStyle {
                                style_id: hint.id,
                                data,
                            });
                        }
                    }
                }
                Ok(requests)
            }

            _ => Ok(Vec::new()),
        }
    }
}

fn hint_text(definition: &Style) -> Option<String> {
    match &definition.data {
        StyleData::SymbolDefinition { name, value } => Some(format!("{name} = {value}")),
        _ => None,
    }
}

/// Hint styles derived from relationship `id`
fn hints_for(graph: &Graph, id: NodeId) -> Vec<&Style> {
    let pattern = StylePattern::any()
        .role(StyleRole::Hint)
        .style_type(StyleType::Hint)
        .source(SOURCE);
    graph
        .find_styles(&pattern, None, false)
        .into_iter()
        .filter(|style| matches!(style.data, StyleData::Hint { relationship, .. } if relationship == id))
        .collect()
}
