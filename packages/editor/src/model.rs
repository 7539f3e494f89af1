//! # Notebook Data Model
//!
//! Cells, styles and relationships share a single per-document id space.
//!
//! ```text
//! Cell ──┬── Style (parent_id = None)
//!        │     └── Style (parent_id = Some(style))
//!        └── Style ...
//!
//! Relationship: Style|Cell ──role──▶ Style|Cell
//! ```
//!
//! Style payloads are a closed tagged union ([`StyleData`]); the variant is the
//! style's *type*. Rules match on [`NodeKind`] (role + type) structurally.

use crate::rules::RuleId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for cells, styles and relationships within one document.
///
/// Allocated from the document's monotonic counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

// ============================================================================
// Cells
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CellType {
    Formula,
    Text,
    Figure,
    Image,
    Plot,
}

impl CellType {
    /// Height given to freshly inserted empty cells (in CSS pixels)
    pub fn default_height(self) -> f64 {
        match self {
            CellType::Formula | CellType::Text => 72.0,
            CellType::Figure | CellType::Plot => 288.0,
            CellType::Image => 216.0,
        }
    }
}

/// Client-chosen stroke identifier, unique within its cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(pub String);

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrokeId {
    fn from(id: &str) -> Self {
        StrokeId(id.to_string())
    }
}

/// A single ink stroke. `path` is opaque SVG path data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub path: String,
}

impl Stroke {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: StrokeId(id.into()),
            path: path.into(),
        }
    }
}

/// Stroke record nested inside every cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeData {
    pub strokes: Vec<Stroke>,
}

impl StrokeData {
    pub fn get(&self, id: &StrokeId) -> Option<&Stroke> {
        self.strokes.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &StrokeId) -> bool {
        self.get(id).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: NodeId,
    pub cell_type: CellType,
    pub height: f64,
    #[serde(default)]
    pub strokes: StrokeData,
}

impl Cell {
    pub fn empty(id: NodeId, cell_type: CellType) -> Self {
        Self {
            id,
            cell_type,
            height: cell_type.default_height(),
            strokes: StrokeData::default(),
        }
    }
}

/// Where a cell goes in the document sequence.
///
/// On the wire: `"top"`, `"bottom"`, or the id of the cell to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PositionRepr", into = "PositionRepr")]
pub enum Position {
    Top,
    Bottom,
    After(NodeId),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PositionRepr {
    Named(NamedPosition),
    After(NodeId),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NamedPosition {
    Top,
    Bottom,
}

impl From<PositionRepr> for Position {
    fn from(repr: PositionRepr) -> Self {
        match repr {
            PositionRepr::Named(NamedPosition::Top) => Position::Top,
            PositionRepr::Named(NamedPosition::Bottom) => Position::Bottom,
            PositionRepr::After(id) => Position::After(id),
        }
    }
}

impl From<Position> for PositionRepr {
    fn from(position: Position) -> Self {
        match position {
            Position::Top => PositionRepr::Named(NamedPosition::Top),
            Position::Bottom => PositionRepr::Named(NamedPosition::Bottom),
            Position::After(id) => PositionRepr::After(id),
        }
    }
}

// ============================================================================
// Styles
// ============================================================================

/// Coarse semantic category of a style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleRole {
    Input,
    Representation,
    Evaluation,
    Attribute,
    Hint,
    Symbol,
}

/// Style payload. The variant is the style's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StyleData {
    /// Plain-text formula as typed or recognized
    Formula(String),
    Text(String),
    /// Typeset markup
    Svg(String),
    /// Result returned by the computer-algebra collaborator
    Evaluation(String),
    #[serde(rename_all = "camelCase")]
    SymbolDefinition { name: String, value: String },
    #[serde(rename_all = "camelCase")]
    SymbolUse { name: String },
    /// Hint derived from a relationship; retracted together with it
    #[serde(rename_all = "camelCase")]
    Hint { relationship: NodeId, text: String },
    #[serde(rename_all = "camelCase")]
    Tool { name: String, data: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StyleType {
    Formula,
    Text,
    Svg,
    Evaluation,
    SymbolDefinition,
    SymbolUse,
    Hint,
    Tool,
}

impl StyleData {
    pub fn style_type(&self) -> StyleType {
        match self {
            StyleData::Formula(_) => StyleType::Formula,
            StyleData::Text(_) => StyleType::Text,
            StyleData::Svg(_) => StyleType::Svg,
            StyleData::Evaluation(_) => StyleType::Evaluation,
            StyleData::SymbolDefinition { .. } => StyleType::SymbolDefinition,
            StyleData::SymbolUse { .. } => StyleType::SymbolUse,
            StyleData::Hint { .. } => StyleType::Hint,
            StyleData::Tool { .. } => StyleType::Tool,
        }
    }

    /// Symbol name for definition and use payloads
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            StyleData::SymbolDefinition { name, .. } | StyleData::SymbolUse { name } => Some(name),
            _ => None,
        }
    }
}

/// Structural match key used by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeKind {
    pub role: StyleRole,
    pub style_type: StyleType,
}

impl NodeKind {
    pub const fn new(role: StyleRole, style_type: StyleType) -> Self {
        Self { role, style_type }
    }
}

/// Who produced a style or relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Source {
    User,
    System,
    Rule(RuleId),
}

impl Source {
    pub fn is_rule(&self) -> bool {
        matches!(self, Source::Rule(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub id: NodeId,
    /// Cell this style tree hangs from
    pub cell_id: NodeId,
    /// `None` when attached directly to the cell
    pub parent_id: Option<NodeId>,
    pub role: StyleRole,
    pub source: Source,
    pub data: StyleData,
}

impl Style {
    pub fn kind(&self) -> NodeKind {
        NodeKind::new(self.role, self.data.style_type())
    }

    /// Immediate parent node (style or cell)
    pub fn parent(&self) -> NodeId {
        self.parent_id.unwrap_or(self.cell_id)
    }
}

// ============================================================================
// Relationships
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationshipRole {
    SymbolDependency,
    DuplicateDefinition,
    Transformation,
    Equivalence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelationshipData {
    None,
    Symbol { name: String },
    Substitution { from: String, to: String },
}

impl RelationshipData {
    pub fn symbol_name(&self) -> Option<&str> {
        match self {
            RelationshipData::Symbol { name } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: NodeId,
    pub from: NodeId,
    pub to: NodeId,
    pub role: RelationshipRole,
    pub source: Source,
    pub data: RelationshipData,
}

impl Relationship {
    pub fn touches(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }
}

/// Borrowed view of any graph node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRef<'a> {
    Cell(&'a Cell),
    Style(&'a Style),
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        match self {
            NodeRef::Cell(cell) => cell.id,
            NodeRef::Style(style) => style.id,
        }
    }

    pub fn as_style(&self) -> Option<&'a Style> {
        match self {
            NodeRef::Style(style) => Some(style),
            NodeRef::Cell(_) => None,
        }
    }

    pub fn as_cell(&self) -> Option<&'a Cell> {
        match self {
            NodeRef::Cell(cell) => Some(cell),
            NodeRef::Style(_) => None,
        }
    }
}
