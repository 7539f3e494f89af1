//! Sends formulas to the computer-algebra engine and stores the result.
//!
//! Engine errors (syntax, evaluation) are rule failures: logged, no change.

use super::{Rule, RuleContext, RuleError, RuleId, RuleMode, Trigger};
use crate::external::ComputerAlgebra;
use crate::model::{NodeKind, Source, StyleData, StyleRole, StyleType};
use crate::mutations::ChangeRequest;
use crate::updates::UpdateEvent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

const FORMULA: NodeKind = NodeKind::new(StyleRole::Input, StyleType::Formula);

const TRIGGERS: &[Trigger] = &[
    Trigger::style(UpdateEvent::StyleInserted, FORMULA),
    Trigger::style(UpdateEvent::StyleChanged, FORMULA),
];

const SOURCE: Source = Source::Rule(RuleId::Evaluator);

pub struct EvaluatorRule {
    cas: Arc<dyn ComputerAlgebra>,
}

impl EvaluatorRule {
    pub fn new(cas: Arc<dyn ComputerAlgebra>) -> Self {
        Self { cas }
    }
}

impl fmt::Debug for EvaluatorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRule").finish_non_exhaustive()
    }
}

#[async_trait]
impl Rule for EvaluatorRule {
    fn id(&self) -> RuleId {
        RuleId::Evaluator
    }

    fn triggers(&self) -> &[Trigger] {
        TRIGGERS
    }

    fn mode(&self) -> RuleMode {
        RuleMode::Async
    }

    async fn compute_async(&self, ctx: RuleContext) -> Result<Vec<ChangeRequest>, RuleError> {
        let style = ctx.style()?;
        let StyleData::Formula(text) = &style.data else {
            return Ok(Vec::new());
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let existing = ctx
            .children
            .iter()
            .find(|child| child.role == StyleRole::Evaluation && child.source == SOURCE);
        if ctx.update()?.event() == UpdateEvent::StyleInserted && existing.is_some() {
            return Ok(Vec::new());
        }

        let result = self.cas.execute(text).await?;
        let data = StyleData::Evaluation(result);

        match existing {
            Some(child) if child.data == data => Ok(Vec::new()),
            Some(child) => Ok(vec![ChangeRequest::ChangeStyle {
                style_id: child.id,
                data,
            }]),
            None => Ok(vec![ChangeRequest::InsertStyle {
                id: None,
                cell_id: style.cell_id,
                parent_id: Some(style.id),
                role: StyleRole::Evaluation,
                source: SOURCE,
                data,
            }]),
        }
    }
}
