//! # Graph Store
//!
//! In-memory nodes (cells, styles) and typed edges (relationships) of one
//! notebook, plus the ordered cell sequence.
//!
//! The store only offers primitive, invariant-preserving operations:
//! - inserts fail on id collisions and missing parents/endpoints
//! - deletes fail if they would orphan a style or leave a dangling edge
//!
//! Cascading deletes are expanded by the change applier so that every
//! removed entity gets its own update and inverse. The one exception is
//! [`Graph::purge_cell`] / [`Graph::purge_style`], which the client mirror
//! uses to apply deletions idempotently.
//!
//! All lookups iterate in id order (or document order for cells), so two
//! stores holding the same content compare and traverse identically.

use crate::model::{
    Cell, NodeId, NodeKind, NodeRef, Position, Relationship, RelationshipRole, Source, Stroke,
    StrokeId, Style, StyleData, StyleRole, StyleType,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Dangling reference: {id} refers to missing node {missing}")]
    Dangling { id: NodeId, missing: NodeId },

    #[error("Id collision: {0} is live or was never allocated")]
    IdCollision(NodeId),

    #[error("Deleting {id} would orphan {dependents} dependent entities")]
    WouldOrphan { id: NodeId, dependents: usize },

    #[error("Parent cycle detected at {0}")]
    Cycle(NodeId),

    #[error("Node {id} is not a {expected}")]
    WrongKind { id: NodeId, expected: &'static str },

    #[error("Style {style} cannot hang from {parent}: parent belongs to another cell")]
    ForeignParent { style: NodeId, parent: NodeId },

    #[error("Cell {cell} cannot be positioned relative to itself")]
    SelfPosition { cell: NodeId },

    #[error("Stroke {stroke} not found in cell {cell}")]
    StrokeNotFound { cell: NodeId, stroke: StrokeId },

    #[error("Stroke {stroke} already exists in cell {cell}")]
    DuplicateStroke { cell: NodeId, stroke: StrokeId },

    #[error("Cell order out of sync with cell table")]
    OrderMismatch,
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Structural predicate over styles. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StylePattern {
    pub role: Option<StyleRole>,
    pub style_type: Option<StyleType>,
    pub source: Option<Source>,
}

impl StylePattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: NodeKind) -> Self {
        Self {
            role: Some(kind.role),
            style_type: Some(kind.style_type),
            source: None,
        }
    }

    pub fn role(mut self, role: StyleRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn style_type(mut self, style_type: StyleType) -> Self {
        self.style_type = Some(style_type);
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn matches(&self, style: &Style) -> bool {
        self.role.map_or(true, |r| r == style.role)
            && self.style_type.map_or(true, |t| t == style.data.style_type())
            && self.source.map_or(true, |s| s == style.source)
    }
}

/// Structural predicate over relationships
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipPattern {
    pub role: Option<RelationshipRole>,
    pub source: Option<Source>,
    pub from: Option<NodeId>,
    pub to: Option<NodeId>,
    pub symbol: Option<String>,
}

impl RelationshipPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: RelationshipRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn from(mut self, from: NodeId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: NodeId) -> Self {
        self.to = Some(to);
        self
    }

    pub fn symbol(mut self, name: impl Into<String>) -> Self {
        self.symbol = Some(name.into());
        self
    }

    pub fn matches(&self, rel: &Relationship) -> bool {
        self.role.map_or(true, |r| r == rel.role)
            && self.source.map_or(true, |s| s == rel.source)
            && self.from.map_or(true, |f| f == rel.from)
            && self.to.map_or(true, |t| t == rel.to)
            && self
                .symbol
                .as_deref()
                .map_or(true, |name| rel.data.symbol_name() == Some(name))
    }
}

/// Node/edge store for a single notebook
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    /// Cell ids in document order
    order: Vec<NodeId>,
    cells: BTreeMap<NodeId, Cell>,
    styles: BTreeMap<NodeId, Style>,
    relationships: BTreeMap<NodeId, Relationship>,
    /// Next id to hand out; ids below this have been allocated at some point
    next_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            cells: BTreeMap::new(),
            styles: BTreeMap::new(),
            relationships: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Rebuild a store from persisted parts, validating every invariant
    pub fn from_parts(
        next_id: u64,
        cells: Vec<Cell>,
        styles: Vec<Style>,
        relationships: Vec<Relationship>,
    ) -> GraphResult<Self> {
        let mut graph = Self {
            next_id,
            ..Self::new()
        };

        for cell in cells {
            let id = cell.id;
            if graph.cells.insert(id, cell).is_some() {
                return Err(GraphError::IdCollision(id));
            }
            graph.order.push(id);
        }
        for style in styles {
            let id = style.id;
            if graph.cells.contains_key(&id) || graph.styles.insert(id, style).is_some() {
                return Err(GraphError::IdCollision(id));
            }
        }
        for rel in relationships {
            let id = rel.id;
            if graph.contains(id) || graph.relationships.insert(id, rel).is_some() {
                return Err(GraphError::IdCollision(id));
            }
        }

        graph.check_integrity()?;
        Ok(graph)
    }

    // ========================================================================
    // Ids
    // ========================================================================

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn allocate_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Allocate a fresh id, or validate a pinned one (undo/redo restore).
    ///
    /// A pinned id must have been allocated before and must not be live.
    pub fn claim_id(&mut self, pinned: Option<NodeId>) -> GraphResult<NodeId> {
        match pinned {
            None => Ok(self.allocate_id()),
            Some(id) => {
                self.ensure_free(id)?;
                Ok(id)
            }
        }
    }

    fn ensure_free(&self, id: NodeId) -> GraphResult<()> {
        if id.0 == 0 || id.0 >= self.next_id || self.contains(id) {
            return Err(GraphError::IdCollision(id));
        }
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.cells.contains_key(&id)
            || self.styles.contains_key(&id)
            || self.relationships.contains_key(&id)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn get_node(&self, id: NodeId) -> GraphResult<NodeRef<'_>> {
        if let Some(cell) = self.cells.get(&id) {
            return Ok(NodeRef::Cell(cell));
        }
        if let Some(style) = self.styles.get(&id) {
            return Ok(NodeRef::Style(style));
        }
        Err(GraphError::NotFound(id))
    }

    pub fn cell(&self, id: NodeId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    pub fn style(&self, id: NodeId) -> Option<&Style> {
        self.styles.get(&id)
    }

    pub fn relationship(&self, id: NodeId) -> Option<&Relationship> {
        self.relationships.get(&id)
    }

    pub fn require_cell(&self, id: NodeId) -> GraphResult<&Cell> {
        self.cells.get(&id).ok_or(GraphError::NotFound(id))
    }

    pub fn require_style(&self, id: NodeId) -> GraphResult<&Style> {
        self.styles.get(&id).ok_or(GraphError::NotFound(id))
    }

    /// Cells in document order
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.order.iter().filter_map(|id| self.cells.get(id))
    }

    pub fn cell_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn cell_count(&self) -> usize {
        self.order.len()
    }

    pub fn styles(&self) -> impl Iterator<Item = &Style> {
        self.styles.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn position_of(&self, cell_id: NodeId) -> GraphResult<usize> {
        self.order
            .iter()
            .position(|id| *id == cell_id)
            .ok_or(GraphError::NotFound(cell_id))
    }

    /// Relative position that would put a cell back where `cell_id` is now
    pub fn position_before(&self, cell_id: NodeId) -> GraphResult<Position> {
        let index = self.position_of(cell_id)?;
        Ok(match index {
            0 => Position::Top,
            _ => Position::After(self.order[index - 1]),
        })
    }

    fn resolve_position(&self, position: Position) -> GraphResult<usize> {
        match position {
            Position::Top => Ok(0),
            Position::Bottom => Ok(self.order.len()),
            Position::After(id) => Ok(self.position_of(id)? + 1),
        }
    }

    /// Walk up the parent chain to the owning cell.
    ///
    /// Dangling parents and cycles are invariant violations and error loudly.
    pub fn top_level_ancestor_of(&self, id: NodeId) -> GraphResult<NodeId> {
        if self.cells.contains_key(&id) {
            return Ok(id);
        }
        if self.relationships.contains_key(&id) {
            return Err(GraphError::WrongKind {
                id,
                expected: "cell or style",
            });
        }

        let mut current = self.styles.get(&id).ok_or(GraphError::NotFound(id))?;
        let mut steps = 0;
        while let Some(parent_id) = current.parent_id {
            steps += 1;
            if steps > self.styles.len() {
                return Err(GraphError::Cycle(id));
            }
            current = self.styles.get(&parent_id).ok_or(GraphError::Dangling {
                id: current.id,
                missing: parent_id,
            })?;
        }

        if !self.cells.contains_key(&current.cell_id) {
            return Err(GraphError::Dangling {
                id: current.id,
                missing: current.cell_id,
            });
        }
        Ok(current.cell_id)
    }

    /// Styles directly under `id` (a cell or a style)
    pub fn children_of(&self, id: NodeId) -> Vec<&Style> {
        self.styles.values().filter(|s| s.parent() == id).collect()
    }

    /// All styles below `id`, deepest first
    pub fn descendants_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_post_order(id, &mut out);
        out
    }

    fn collect_post_order(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children_of(id) {
            self.collect_post_order(child.id, out);
            out.push(child.id);
        }
    }

    /// Relationships with at least one endpoint in `ids`, in id order
    pub fn relationships_touching(&self, ids: &[NodeId]) -> Vec<&Relationship> {
        let set: BTreeSet<NodeId> = ids.iter().copied().collect();
        self.relationships
            .values()
            .filter(|r| set.contains(&r.from) || set.contains(&r.to))
            .collect()
    }

    /// Find styles matching `pattern`.
    ///
    /// With a scope, only styles under that node are considered: direct
    /// children, or the whole subtree when `recursive` is set.
    pub fn find_styles(
        &self,
        pattern: &StylePattern,
        scope: Option<NodeId>,
        recursive: bool,
    ) -> Vec<&Style> {
        match scope {
            None => self.styles.values().filter(|s| pattern.matches(s)).collect(),
            Some(scope) if recursive => {
                let mut ids = self.descendants_of(scope);
                ids.sort();
                ids.into_iter()
                    .filter_map(|id| self.styles.get(&id))
                    .filter(|s| pattern.matches(s))
                    .collect()
            }
            Some(scope) => self
                .children_of(scope)
                .into_iter()
                .filter(|s| pattern.matches(s))
                .collect(),
        }
    }

    pub fn find_relationships(&self, pattern: &RelationshipPattern) -> Vec<&Relationship> {
        self.relationships
            .values()
            .filter(|r| pattern.matches(r))
            .collect()
    }

    // ========================================================================
    // Primitive mutations
    // ========================================================================

    pub fn insert_cell(&mut self, cell: Cell, position: Position) -> GraphResult<()> {
        self.ensure_free(cell.id)?;
        let index = self.resolve_position(position)?;
        self.order.insert(index, cell.id);
        self.cells.insert(cell.id, cell);
        Ok(())
    }

    /// Remove a cell with no remaining styles or relationships.
    ///
    /// Returns the cell and the position that would restore it.
    pub fn delete_cell(&mut self, id: NodeId) -> GraphResult<(Cell, Position)> {
        let position = self.position_before(id)?;
        let dependents = self.children_of(id).len() + self.relationships_touching(&[id]).len();
        if dependents > 0 {
            return Err(GraphError::WouldOrphan { id, dependents });
        }
        let index = self.position_of(id)?;
        self.order.remove(index);
        let cell = self.cells.remove(&id).ok_or(GraphError::NotFound(id))?;
        Ok((cell, position))
    }

    /// Re-order a cell. Returns the position that would undo the move.
    pub fn move_cell(&mut self, id: NodeId, position: Position) -> GraphResult<Position> {
        if position == Position::After(id) {
            return Err(GraphError::SelfPosition { cell: id });
        }
        let previous = self.position_before(id)?;
        if let Position::After(target) = position {
            self.require_cell(target)?;
        }
        let index = self.position_of(id)?;
        self.order.remove(index);
        let new_index = self.resolve_position(position)?;
        self.order.insert(new_index, id);
        Ok(previous)
    }

    /// Set a cell's height, returning the previous one
    pub fn resize_cell(&mut self, id: NodeId, height: f64) -> GraphResult<f64> {
        let cell = self.cells.get_mut(&id).ok_or(GraphError::NotFound(id))?;
        Ok(std::mem::replace(&mut cell.height, height))
    }

    /// Add a stroke at `index` (appended when `None`), returning where it landed
    pub fn insert_stroke(
        &mut self,
        cell_id: NodeId,
        stroke: Stroke,
        index: Option<usize>,
    ) -> GraphResult<usize> {
        let cell = self.cells.get_mut(&cell_id).ok_or(GraphError::NotFound(cell_id))?;
        if cell.strokes.contains(&stroke.id) {
            return Err(GraphError::DuplicateStroke {
                cell: cell_id,
                stroke: stroke.id,
            });
        }
        let strokes = &mut cell.strokes.strokes;
        let index = index.unwrap_or(strokes.len()).min(strokes.len());
        strokes.insert(index, stroke);
        Ok(index)
    }

    /// Remove a stroke, returning it with the index it occupied
    pub fn delete_stroke(
        &mut self,
        cell_id: NodeId,
        stroke_id: &StrokeId,
    ) -> GraphResult<(Stroke, usize)> {
        let cell = self.cells.get_mut(&cell_id).ok_or(GraphError::NotFound(cell_id))?;
        let index = cell
            .strokes
            .strokes
            .iter()
            .position(|s| &s.id == stroke_id)
            .ok_or_else(|| GraphError::StrokeNotFound {
                cell: cell_id,
                stroke: stroke_id.clone(),
            })?;
        Ok((cell.strokes.strokes.remove(index), index))
    }

    pub fn insert_style(&mut self, style: Style) -> GraphResult<()> {
        self.ensure_free(style.id)?;
        self.require_cell(style.cell_id)?;
        if let Some(parent_id) = style.parent_id {
            let parent = match self.get_node(parent_id)? {
                NodeRef::Style(parent) => parent,
                NodeRef::Cell(_) => {
                    return Err(GraphError::WrongKind {
                        id: parent_id,
                        expected: "style",
                    })
                }
            };
            if parent.cell_id != style.cell_id {
                return Err(GraphError::ForeignParent {
                    style: style.id,
                    parent: parent_id,
                });
            }
        }
        self.styles.insert(style.id, style);
        Ok(())
    }

    /// Remove a leaf style with no incident relationships
    pub fn delete_style(&mut self, id: NodeId) -> GraphResult<Style> {
        self.require_style(id)?;
        let dependents = self.children_of(id).len() + self.relationships_touching(&[id]).len();
        if dependents > 0 {
            return Err(GraphError::WouldOrphan { id, dependents });
        }
        self.styles.remove(&id).ok_or(GraphError::NotFound(id))
    }

    /// Replace a style's payload, returning the old one
    pub fn change_style(&mut self, id: NodeId, data: StyleData) -> GraphResult<StyleData> {
        let style = self.styles.get_mut(&id).ok_or(GraphError::NotFound(id))?;
        Ok(std::mem::replace(&mut style.data, data))
    }

    pub fn insert_relationship(&mut self, rel: Relationship) -> GraphResult<()> {
        self.ensure_free(rel.id)?;
        for endpoint in [rel.from, rel.to] {
            if !self.cells.contains_key(&endpoint) && !self.styles.contains_key(&endpoint) {
                return Err(GraphError::NotFound(endpoint));
            }
        }
        self.relationships.insert(rel.id, rel);
        Ok(())
    }

    pub fn delete_relationship(&mut self, id: NodeId) -> GraphResult<Relationship> {
        self.relationships.remove(&id).ok_or(GraphError::NotFound(id))
    }

    // ========================================================================
    // Idempotent removal (client mirror)
    // ========================================================================

    /// Remove a cell with everything hanging from it. No-op if absent.
    pub fn purge_cell(&mut self, id: NodeId) {
        if !self.cells.contains_key(&id) {
            return;
        }
        let mut doomed = self.descendants_of(id);
        doomed.push(id);
        self.relationships
            .retain(|_, r| !doomed.contains(&r.from) && !doomed.contains(&r.to));
        for style_id in &doomed {
            self.styles.remove(style_id);
        }
        self.order.retain(|cell_id| *cell_id != id);
        self.cells.remove(&id);
    }

    /// Remove a style subtree and its relationships. No-op if absent.
    pub fn purge_style(&mut self, id: NodeId) {
        if !self.styles.contains_key(&id) {
            return;
        }
        let mut doomed = self.descendants_of(id);
        doomed.push(id);
        self.relationships
            .retain(|_, r| !doomed.contains(&r.from) && !doomed.contains(&r.to));
        for style_id in &doomed {
            self.styles.remove(style_id);
        }
    }

    /// Rewind the id counter after a rolled-back batch.
    ///
    /// Only valid when no live id is at or above `next_id`.
    pub(crate) fn rewind_next_id(&mut self, next_id: u64) {
        let highest = self
            .cells
            .keys()
            .chain(self.styles.keys())
            .chain(self.relationships.keys())
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        self.next_id = next_id.max(highest + 1);
    }

    /// Remove a stroke if present
    pub fn purge_stroke(&mut self, cell_id: NodeId, stroke_id: &StrokeId) {
        if let Some(cell) = self.cells.get_mut(&cell_id) {
            cell.strokes.strokes.retain(|s| &s.id != stroke_id);
        }
    }

    /// Remove a relationship if present
    pub fn purge_relationship(&mut self, id: NodeId) {
        self.relationships.remove(&id);
    }

    /// Insert or replace a cell in place (keeps position when present)
    pub fn upsert_cell(&mut self, cell: Cell, position: Position) -> GraphResult<()> {
        if let Some(existing) = self.cells.get_mut(&cell.id) {
            *existing = cell;
            return Ok(());
        }
        self.next_id = self.next_id.max(cell.id.0 + 1);
        self.insert_cell(cell, position)
    }

    pub fn upsert_style(&mut self, style: Style) -> GraphResult<()> {
        if let Some(existing) = self.styles.get_mut(&style.id) {
            *existing = style;
            return Ok(());
        }
        self.next_id = self.next_id.max(style.id.0 + 1);
        self.insert_style(style)
    }

    pub fn upsert_relationship(&mut self, rel: Relationship) -> GraphResult<()> {
        if let Some(existing) = self.relationships.get_mut(&rel.id) {
            *existing = rel;
            return Ok(());
        }
        self.next_id = self.next_id.max(rel.id.0 + 1);
        self.insert_relationship(rel)
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Verify every structural invariant of the store
    pub fn check_integrity(&self) -> GraphResult<()> {
        if self.order.len() != self.cells.len() {
            return Err(GraphError::OrderMismatch);
        }
        for id in &self.order {
            if !self.cells.contains_key(id) {
                return Err(GraphError::NotFound(*id));
            }
        }

        let all_ids = self
            .cells
            .keys()
            .chain(self.styles.keys())
            .chain(self.relationships.keys());
        for id in all_ids {
            if id.0 == 0 || id.0 >= self.next_id {
                return Err(GraphError::IdCollision(*id));
            }
        }

        for style in self.styles.values() {
            let cell_id = self.top_level_ancestor_of(style.id)?;
            if cell_id != style.cell_id {
                return Err(GraphError::ForeignParent {
                    style: style.id,
                    parent: style.parent(),
                });
            }
        }

        for rel in self.relationships.values() {
            for endpoint in [rel.from, rel.to] {
                if !self.cells.contains_key(&endpoint) && !self.styles.contains_key(&endpoint) {
                    return Err(GraphError::Dangling {
                        id: rel.id,
                        missing: endpoint,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellType, RelationshipData};

    fn style(graph: &mut Graph, cell: NodeId, parent: Option<NodeId>, data: StyleData) -> NodeId {
        let id = graph.allocate_id();
        graph
            .insert_style(Style {
                id,
                cell_id: cell,
                parent_id: parent,
                role: StyleRole::Input,
                source: Source::User,
                data,
            })
            .unwrap();
        id
    }

    fn cell(graph: &mut Graph, position: Position) -> NodeId {
        let id = graph.allocate_id();
        graph.insert_cell(Cell::empty(id, CellType::Formula), position).unwrap();
        id
    }

    #[test]
    fn test_cell_positions() {
        let mut graph = Graph::new();
        let a = cell(&mut graph, Position::Bottom);
        let b = cell(&mut graph, Position::Bottom);
        let c = cell(&mut graph, Position::Top);
        let d = cell(&mut graph, Position::After(c));

        assert_eq!(graph.cell_ids(), &[c, d, a, b]);
        assert_eq!(graph.position_of(a).unwrap(), 2);
        assert_eq!(graph.position_before(c).unwrap(), Position::Top);
        assert_eq!(graph.position_before(a).unwrap(), Position::After(d));
    }

    #[test]
    fn test_move_cell_returns_previous_position() {
        let mut graph = Graph::new();
        let a = cell(&mut graph, Position::Bottom);
        let b = cell(&mut graph, Position::Bottom);
        let c = cell(&mut graph, Position::Bottom);

        let previous = graph.move_cell(a, Position::After(c)).unwrap();
        assert_eq!(graph.cell_ids(), &[b, c, a]);
        assert_eq!(previous, Position::Top);

        graph.move_cell(a, previous).unwrap();
        assert_eq!(graph.cell_ids(), &[a, b, c]);

        assert_eq!(
            graph.move_cell(a, Position::After(a)),
            Err(GraphError::SelfPosition { cell: a })
        );
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut graph = Graph::new();
        let a = cell(&mut graph, Position::Bottom);
        graph.delete_cell(a).unwrap();
        let b = cell(&mut graph, Position::Bottom);
        assert!(b > a);

        // A deleted id may be restored, a live or unallocated one may not
        assert_eq!(graph.claim_id(Some(a)), Ok(a));
        assert_eq!(graph.claim_id(Some(b)), Err(GraphError::IdCollision(b)));
        assert_eq!(
            graph.claim_id(Some(NodeId(999))),
            Err(GraphError::IdCollision(NodeId(999)))
        );
    }

    #[test]
    fn test_top_level_ancestor_resolves_deep_chains() {
        let mut graph = Graph::new();
        let c = cell(&mut graph, Position::Bottom);
        let mut parent = None;
        let mut last = c;
        for i in 0..10 {
            last = style(&mut graph, c, parent, StyleData::Text(i.to_string()));
            parent = Some(last);
        }
        assert_eq!(graph.top_level_ancestor_of(last).unwrap(), c);
        assert_eq!(graph.top_level_ancestor_of(c).unwrap(), c);
        assert_eq!(
            graph.top_level_ancestor_of(NodeId(500)),
            Err(GraphError::NotFound(NodeId(500)))
        );
    }

    #[test]
    fn test_top_level_ancestor_fails_loudly_on_dangling_parent() {
        let mut graph = Graph::new();
        let c = cell(&mut graph, Position::Bottom);
        let parent = style(&mut graph, c, None, StyleData::Text("p".into()));
        let child = style(&mut graph, c, Some(parent), StyleData::Text("c".into()));

        // Bypass the primitives to simulate corruption
        graph.styles.remove(&parent);

        assert_eq!(
            graph.top_level_ancestor_of(child),
            Err(GraphError::Dangling {
                id: child,
                missing: parent
            })
        );
        assert!(graph.check_integrity().is_err());
    }

    #[test]
    fn test_deletes_refuse_to_orphan() {
        let mut graph = Graph::new();
        let c = cell(&mut graph, Position::Bottom);
        let s = style(&mut graph, c, None, StyleData::Formula("x = 1".into()));
        let t = style(&mut graph, c, None, StyleData::Formula("x".into()));
        let rel_id = graph.allocate_id();
        graph
            .insert_relationship(Relationship {
                id: rel_id,
                from: s,
                to: t,
                role: RelationshipRole::SymbolDependency,
                source: Source::User,
                data: RelationshipData::None,
            })
            .unwrap();

        assert!(matches!(
            graph.delete_cell(c),
            Err(GraphError::WouldOrphan { .. })
        ));
        assert!(matches!(
            graph.delete_style(s),
            Err(GraphError::WouldOrphan { dependents: 1, .. })
        ));

        graph.delete_relationship(rel_id).unwrap();
        graph.delete_style(s).unwrap();
        graph.delete_style(t).unwrap();
        graph.delete_cell(c).unwrap();
        assert_eq!(graph.cell_count(), 0);
    }

    #[test]
    fn test_find_styles_scoped_and_recursive() {
        let mut graph = Graph::new();
        let c = cell(&mut graph, Position::Bottom);
        let top = style(&mut graph, c, None, StyleData::Formula("x".into()));
        let nested = style(&mut graph, c, Some(top), StyleData::Text("n".into()));
        let other = cell(&mut graph, Position::Bottom);
        style(&mut graph, other, None, StyleData::Text("o".into()));

        let text = StylePattern::any().style_type(StyleType::Text);
        assert_eq!(graph.find_styles(&text, None, false).len(), 2);
        assert!(graph.find_styles(&text, Some(c), false).is_empty());

        let found: Vec<NodeId> = graph
            .find_styles(&text, Some(c), true)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(found, vec![nested]);

        assert_eq!(graph.descendants_of(c), vec![nested, top]);
    }

    #[test]
    fn test_purge_is_idempotent() {
        let mut graph = Graph::new();
        let c = cell(&mut graph, Position::Bottom);
        let s = style(&mut graph, c, None, StyleData::Formula("x".into()));
        style(&mut graph, c, Some(s), StyleData::Text("y".into()));

        graph.purge_cell(c);
        let after_once = graph.clone();
        graph.purge_cell(c);

        assert_eq!(graph, after_once);
        assert_eq!(graph.styles().count(), 0);
        graph.check_integrity().unwrap();
    }

    #[test]
    fn test_style_parent_must_share_cell() {
        let mut graph = Graph::new();
        let a = cell(&mut graph, Position::Bottom);
        let b = cell(&mut graph, Position::Bottom);
        let s = style(&mut graph, a, None, StyleData::Formula("x".into()));
        let id = graph.allocate_id();
        let result = graph.insert_style(Style {
            id,
            cell_id: b,
            parent_id: Some(s),
            role: StyleRole::Hint,
            source: Source::User,
            data: StyleData::Text("bad".into()),
        });
        assert_eq!(result, Err(GraphError::ForeignParent { style: id, parent: s }));
    }
}
