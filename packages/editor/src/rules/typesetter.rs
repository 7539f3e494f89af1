//! Renders formulas to SVG through the external typesetter.

use super::{Rule, RuleContext, RuleError, RuleId, RuleMode, Trigger};
use crate::external::Typesetter;
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

const SOURCE: Source = Source::Rule(RuleId::Typesetter);

pub struct TypesetterRule {
    typesetter: Arc<dyn Typesetter>,
}

impl TypesetterRule {
    pub fn new(typesetter: Arc<dyn Typesetter>) -> Self {
        Self { typesetter }
    }
}

impl fmt::Debug for TypesetterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypesetterRule").finish_non_exhaustive()
    }
}

#[async_trait]
impl Rule for TypesetterRule {
    fn id(&self) -> RuleId {
        RuleId::Typesetter
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
        let existing = ctx
            .children
            .iter()
            .find(|child| child.role == StyleRole::Representation && child.source == SOURCE);

        let inserted = ctx.update()?.event() == UpdateEvent::StyleInserted;
        if inserted && existing.is_some() {
            return Ok(Vec::new());
        }

        let svg = self.typesetter.typeset(text).await?;
        let data = StyleData::Svg(svg);

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
                role: StyleRole::Representation,
                source: SOURCE,
                data,
            }]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::fakes::SvgTypesetter;
    use crate::model::{NodeId, Style};
    use crate::updates::Update;

    fn rule() -> TypesetterRule {
        TypesetterRule::new(Arc::new(SvgTypesetter))
    }

    fn formula(text: &str) -> Style {
        Style {
            id: NodeId(2),
            cell_id: NodeId(1),
            parent_id: None,
            role: StyleRole::Input,
            source: Source::User,
            data: StyleData::Formula(text.into()),
        }
    }

    fn representation(svg: &str) -> Style {
        Style {
            id: NodeId(3),
            cell_id: NodeId(1),
            parent_id: Some(NodeId(2)),
            role: StyleRole::Representation,
            source: SOURCE,
            data: StyleData::Svg(svg.into()),
        }
    }

    #[tokio::test]
    async fn test_new_formula_gets_representation() {
        let ctx = RuleContext {
            update: Some(Update::StyleInserted {
                style: formula("x + 1"),
            }),
            ..RuleContext::default()
        };

        let requests = rule().compute_async(ctx).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(matches!(
            &requests[0],
            ChangeRequest::InsertStyle {
                parent_id: Some(NodeId(2)),
                role: StyleRole::Representation,
                data: StyleData::Svg(svg),
                ..
            } if svg.contains("x + 1")
        ));
    }

    #[tokio::test]
    async fn test_existing_representation_is_kept_on_insert() {
        let ctx = RuleContext {
            update: Some(Update::StyleInserted {
                style: formula("x + 1"),
            }),
            children: vec![representation("<svg>restored</svg>")],
            ..RuleContext::default()
        };

        assert!(rule().compute_async(ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_changed_formula_updates_representation() {
        let ctx = RuleContext {
            update: Some(Update::StyleChanged {
                style: formula("x + 2"),
                previous: StyleData::Formula("x + 1".into()),
            }),
            children: vec![representation("<svg><text>x + 1</text></svg>")],
            ..RuleContext::default()
        };

        let requests = rule().compute_async(ctx).await.unwrap();
        assert_eq!(
            requests,
            vec![ChangeRequest::ChangeStyle {
                style_id: NodeId(3),
                data: StyleData::Svg("<svg><text>x + 2</text></svg>".into()),
            }]
        );
    }
}
