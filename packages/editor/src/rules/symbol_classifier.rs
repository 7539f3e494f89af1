//! Derives `Symbol` child styles from a formula's text.

use super::{Rule, RuleContext, RuleError, RuleId, Trigger};
use crate::formula;
use crate::graph::{Graph, StylePattern};
use crate::model::{NodeKind, Source, Style, StyleData, StyleRole, StyleType};
use crate::mutations::ChangeRequest;
use crate::updates::UpdateEvent;

const FORMULA: NodeKind = NodeKind::new(StyleRole::Input, StyleType::Formula);

const TRIGGERS: &[Trigger] = &[
    Trigger::style(UpdateEvent::StyleInserted, FORMULA),
    Trigger::style(UpdateEvent::StyleChanged, FORMULA),
];

#[derive(Debug, Default)]
pub struct SymbolClassifierRule;

impl Rule for SymbolClassifierRule {
    fn id(&self) -> RuleId {
        RuleId::SymbolClassifier
    }

    fn triggers(&self) -> &[Trigger] {
        TRIGGERS
    }

    fn compute(&self, graph: &Graph, ctx: &RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        // Reconcile against what the formula says *now*, not what the update carried
        let Some(style) = graph.style(ctx.style()?.id) else {
            return Ok(Vec::new());
        };
        let StyleData::Formula(text) = &style.data else {
            return Ok(Vec::new());
        };

        let symbols = formula::analyze(text);
        let mut desired: Vec<StyleData> = Vec::new();
        if let Some((name, value)) = symbols.definition {
            desired.push(StyleData::SymbolDefinition { name, value });
        }
        desired.extend(
            symbols
                .uses
                .into_iter()
                .map(|name| StyleData::SymbolUse { name }),
        );

        let pattern = StylePattern::any()
            .role(StyleRole::Symbol)
            .source(Source::Rule(RuleId::SymbolClassifier));
        let existing = graph.find_styles(&pattern, Some(style.id), false);

        Ok(reconcile(style, &existing, desired))
    }
}

fn reconcile(parent: &Style, existing: &[&Style], desired: Vec<StyleData>) -> Vec<ChangeRequest> {
    let mut requests = Vec::new();
    let mut kept = Vec::new();

    for data in desired {
        if let Some(same) = existing
            .iter()
            .find(|s| !kept.contains(&s.id) && s.data == data)
        {
            kept.push(same.id);
            continue;
        }

        // A definition whose value changed keeps its style (and relationships)
        let revalued = existing.iter().find(|s| {
            !kept.contains(&s.id)
                && s.data.style_type() == data.style_type()
                && s.data.symbol_name() == data.symbol_name()
        });
        match revalued {
            Some(style) => {
                kept.push(style.id);
                requests.push(ChangeRequest::ChangeStyle {
                    style_id: style.id,
                    data,
                });
            }
            None => requests.push(ChangeRequest::InsertStyle {
                id: None,
                cell_id: parent.cell_id,
                parent_id: Some(parent.id),
                role: StyleRole::Symbol,
                source: Source::Rule(RuleId::SymbolClassifier),
                data,
            }),
        }
    }

    for style in existing {
        if !kept.contains(&style.id) {
            requests.push(ChangeRequest::DeleteStyle { style_id: style.id });
        }
    }

    requests
}
