//! The node and cell arena, wiring and dirty propagation.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use slab::Slab;

use crate::cell::{Cell, CellDescriptor, CellId, Direction, NodeId};
use crate::collector::{DirtyCollector, DirtyReason, Propagation, VecDirtyCollector};
use crate::error::GraphError;
use crate::node::Node;
use crate::value::{Value, ValueType};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Graph`], part of every hash-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(u64);

const COLOR_COMPONENTS: [&str; 3] = ["r", "g", "b"];

struct NodeEntry {
    serial: u64,
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    cells: Vec<CellId>,
    node: Option<Box<dyn Node>>,
}

/// Arena owning every node and cell of a graph.
///
/// Edits (`connect`, `disconnect`, `set_value`, node removal) take `&mut self` and propagate
/// dirtiness immediately. Evaluation only needs `&Graph`, so any number of threads can
/// evaluate a graph that is not being edited.
pub struct Graph {
    id: GraphId,
    nodes: Slab<NodeEntry>,
    cells: Slab<Cell>,
    next_serial: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// Creates the cells of a node while it is being added to a [`Graph`].
pub struct NodeBuilder<'g> {
    graph: &'g mut Graph,
    node: NodeId,
}

impl NodeBuilder<'_> {
    /// Handle of the node under construction.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Read access to the graph.
    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Add a top-level input cell.
    pub fn input(&mut self, mut descriptor: CellDescriptor) -> CellId {
        descriptor.direction = Direction::In;
        self.graph.insert_cell(self.node, None, descriptor)
    }

    /// Add a top-level output cell.
    pub fn output(&mut self, mut descriptor: CellDescriptor) -> CellId {
        descriptor.direction = Direction::Out;
        self.graph.insert_cell(self.node, None, descriptor)
    }

    /// Add a child cell under a compound cell of this node.
    pub fn child(&mut self, parent: CellId, descriptor: CellDescriptor) -> CellId {
        self.graph.insert_cell(self.node, Some(parent), descriptor)
    }

    /// Wire two cells of this node so that `dst` reads from `src`.
    ///
    /// Mismatched types are skipped with a warning.
    pub fn wire(&mut self, src: CellId, dst: CellId) {
        if let Err(err) = self.graph.check_types(src, dst) {
            tracing::warn!(%err, "skipping internal wiring");
            return;
        }
        self.graph.link(src, dst);
    }
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            id: GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed)),
            nodes: Slab::new(),
            cells: Slab::new(),
            next_serial: 1,
        }
    }

    /// Identity of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    /// Add a top-level node. `build` creates the node's cells and returns the node.
    pub fn add_node<N: Node>(
        &mut self,
        name: impl Into<String>,
        build: impl FnOnce(&mut NodeBuilder<'_>) -> N,
    ) -> NodeId {
        self.insert_node(None, name.into(), build)
    }

    /// Add a node owned by `parent`.
    pub fn add_node_in<N: Node>(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        build: impl FnOnce(&mut NodeBuilder<'_>) -> N,
    ) -> Result<NodeId, GraphError> {
        self.node_entry(parent)?;
        Ok(self.insert_node(Some(parent), name.into(), build))
    }

    fn insert_node<N: Node>(
        &mut self,
        parent: Option<NodeId>,
        name: String,
        build: impl FnOnce(&mut NodeBuilder<'_>) -> N,
    ) -> NodeId {
        let serial = self.next_serial();
        let index = self.nodes.insert(NodeEntry {
            serial,
            name,
            parent,
            children: Vec::new(),
            cells: Vec::new(),
            node: None,
        });
        let id = NodeId { index, serial };
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.index)) {
            parent.children.push(id);
        }

        let node = build(&mut NodeBuilder { graph: self, node: id });
        tracing::trace!(node = ?id, type_name = node.type_name(), "added node");
        self.nodes[index].node = Some(Box::new(node));
        id
    }

    fn node_entry(&self, id: NodeId) -> Result<&NodeEntry, GraphError> {
        self.nodes
            .get(id.index)
            .filter(|entry| entry.serial == id.serial)
            .ok_or_else(|| GraphError::UnknownNode(format!("{id:?}")))
    }

    /// Returns true if the handle resolves.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.node_entry(id).is_ok()
    }

    /// The node behind a handle.
    pub fn node(&self, id: NodeId) -> Result<&dyn Node, GraphError> {
        self.node_entry(id)?
            .node
            .as_deref()
            .ok_or_else(|| GraphError::UnknownNode(self.node_path(id)))
    }

    /// The node behind a handle, downcast to its concrete type.
    pub fn node_as<N: Node>(&self, id: NodeId) -> Option<&N> {
        self.node(id).ok()?.as_any().downcast_ref::<N>()
    }

    /// Name of a node.
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.node_entry(id).ok().map(|entry| entry.name.as_str())
    }

    /// Dotted path of a node through its owners.
    pub fn node_path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(entry) = current.and_then(|id| self.node_entry(id).ok()) {
            names.push(entry.name.as_str());
            current = entry.parent;
        }
        if names.is_empty() {
            return format!("{id:?}");
        }
        names.reverse();
        names.join(".")
    }

    /// Owner of a node.
    pub fn node_parent(&self, id: NodeId) -> Option<NodeId> {
        self.node_entry(id).ok()?.parent
    }

    /// Nodes owned by `id`.
    pub fn node_children(&self, id: NodeId) -> &[NodeId] {
        self.node_entry(id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or_default()
    }

    /// Top-level cells of a node, in creation order.
    pub fn cells_of(&self, id: NodeId) -> &[CellId] {
        self.node_entry(id)
            .map(|entry| entry.cells.as_slice())
            .unwrap_or_default()
    }

    /// Find a top-level node by name.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, entry)| entry.parent.is_none() && entry.name == name)
            .map(|(index, entry)| NodeId {
                index,
                serial: entry.serial,
            })
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Remove a node with its cells and the nodes it owns.
    ///
    /// Cells reading from removed cells lose their source and are dirtied; they are returned.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Vec<CellId>, GraphError> {
        self.node_entry(id)?;

        let mut orphans = Vec::new();
        self.remove_node_recursive(id, &mut orphans);
        orphans.retain(|cell| self.contains_cell(*cell));
        tracing::trace!(node = ?id, orphans = orphans.len(), "removed node");

        Ok(self.propagate_edit(&orphans))
    }

    fn remove_node_recursive(&mut self, id: NodeId, orphans: &mut Vec<CellId>) {
        let Ok(entry) = self.node_entry(id) else {
            return;
        };
        let children = entry.children.clone();
        let cells = entry.cells.clone();
        let parent = entry.parent;

        for child in children {
            self.remove_node_recursive(child, orphans);
        }
        for cell in cells {
            self.remove_cell_recursive(cell, orphans);
        }
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.index)) {
            parent.children.retain(|child| *child != id);
        }
        self.nodes.remove(id.index);
    }

    // ========================================================================
    // Cells
    // ========================================================================

    pub(crate) fn insert_cell(
        &mut self,
        node: NodeId,
        parent: Option<CellId>,
        mut descriptor: CellDescriptor,
    ) -> CellId {
        if let Some(default) = &descriptor.default {
            if default.value_type() != descriptor.value_type {
                tracing::warn!(
                    cell = descriptor.name,
                    expected = descriptor.value_type.name(),
                    found = default.value_type().name(),
                    "ignoring default of the wrong type"
                );
                descriptor.default = None;
            }
        }

        if descriptor.default.is_none() {
            descriptor.default = descriptor.value_type.default_value();
        }

        let serial = self.next_serial();
        let component_defaults = match (&descriptor.value_type, &descriptor.default) {
            (ValueType::Color3f, Some(Value::Color3f(c))) => Some(*c),
            _ => None,
        };
        let direction = descriptor.direction;
        let dynamic = descriptor.dynamic;

        let index = self.cells.insert(Cell {
            serial,
            node,
            parent,
            children: Vec::new(),
            descriptor,
            value: None,
            input: None,
            outputs: Vec::new(),
            dirty_count: 0,
        });
        let id = CellId { index, serial };

        match parent {
            Some(parent) => {
                if let Some(parent) = self.cells.get_mut(parent.index) {
                    parent.children.push(id);
                }
            }
            None => {
                if let Some(entry) = self.nodes.get_mut(node.index) {
                    entry.cells.push(id);
                }
            }
        }

        if let Some(defaults) = component_defaults {
            for (name, default) in COLOR_COMPONENTS.iter().zip(defaults) {
                let mut child = CellDescriptor::input(*name, ValueType::Float).with_default(default);
                child.direction = direction;
                child.dynamic = dynamic;
                self.insert_cell(node, Some(id), child);
            }
        }

        id
    }

    pub(crate) fn cell(&self, id: CellId) -> Result<&Cell, GraphError> {
        self.cells
            .get(id.index)
            .filter(|cell| cell.serial == id.serial)
            .ok_or_else(|| GraphError::UnknownCell(format!("{id:?}")))
    }

    fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells
            .get_mut(id.index)
            .filter(|cell| cell.serial == id.serial)
    }

    /// Returns true if the handle resolves.
    pub fn contains_cell(&self, id: CellId) -> bool {
        self.cell(id).is_ok()
    }

    /// Add a cell to an existing node after construction.
    pub fn add_cell(
        &mut self,
        node: NodeId,
        descriptor: CellDescriptor,
    ) -> Result<CellId, GraphError> {
        self.node_entry(node)?;
        Ok(self.insert_cell(node, None, descriptor.dynamic()))
    }

    /// Remove a cell and its children. Cells reading from it lose their source and are
    /// dirtied; they are returned.
    pub fn remove_cell(&mut self, id: CellId) -> Result<Vec<CellId>, GraphError> {
        let cell = self.cell(id)?;
        let (node, parent) = (cell.node, cell.parent);

        let mut orphans = Vec::new();
        self.remove_cell_recursive(id, &mut orphans);
        match parent.and_then(|p| self.cell_mut(p)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => {
                if let Some(entry) = self.nodes.get_mut(node.index) {
                    entry.cells.retain(|cell| *cell != id);
                }
            }
        }
        orphans.retain(|cell| self.contains_cell(*cell));

        Ok(self.propagate_edit(&orphans))
    }

    fn remove_cell_recursive(&mut self, id: CellId, orphans: &mut Vec<CellId>) {
        let Ok(cell) = self.cell(id) else {
            return;
        };
        let children = cell.children.clone();
        for child in children {
            self.remove_cell_recursive(child, orphans);
        }

        self.unlink(id);
        let downstream = self
            .cell_mut(id)
            .map(|cell| std::mem::take(&mut cell.outputs))
            .unwrap_or_default();
        for consumer in downstream {
            if let Some(consumer) = self.cell_mut(consumer) {
                consumer.input = None;
            }
            orphans.push(consumer);
        }
        self.cells.remove(id.index);
    }

    /// Descriptor of a cell.
    pub fn descriptor(&self, id: CellId) -> Result<&CellDescriptor, GraphError> {
        Ok(&self.cell(id)?.descriptor)
    }

    /// Node owning a cell.
    pub fn cell_node(&self, id: CellId) -> Result<NodeId, GraphError> {
        Ok(self.cell(id)?.node)
    }

    /// Compound parent of a cell.
    pub fn cell_parent(&self, id: CellId) -> Option<CellId> {
        self.cell(id).ok()?.parent
    }

    /// Children of a compound cell.
    pub fn cell_children(&self, id: CellId) -> &[CellId] {
        self.cell(id)
            .map(|cell| cell.children.as_slice())
            .unwrap_or_default()
    }

    /// Child of a compound cell by name.
    pub fn child(&self, id: CellId, name: &str) -> Option<CellId> {
        self.cell_children(id)
            .iter()
            .copied()
            .find(|child| self.cell(*child).is_ok_and(|c| c.descriptor.name == name))
    }

    /// Returns true if `id` is `ancestor` or lies beneath it.
    pub fn is_within(&self, id: CellId, ancestor: CellId) -> bool {
        let mut current = Some(id);
        while let Some(cell) = current {
            if cell == ancestor {
                return true;
            }
            current = self.cell_parent(cell);
        }
        false
    }

    /// Resolve a dotted cell path such as `"in.channelData"` on a node.
    pub fn cell_by_path(&self, node: NodeId, path: &str) -> Result<CellId, GraphError> {
        let mut names = path.split('.');
        let first = names.next().unwrap_or_default();
        let mut current = self
            .cells_of(node)
            .iter()
            .copied()
            .find(|cell| self.cell(*cell).is_ok_and(|c| c.descriptor.name == first));
        for name in names {
            current = current.and_then(|cell| self.child(cell, name));
        }
        current.ok_or_else(|| {
            GraphError::UnknownCell(format!("{}.{}", self.node_path(node), path))
        })
    }

    /// Full dotted path of a cell, for diagnostics.
    pub fn cell_path(&self, id: CellId) -> String {
        let Ok(cell) = self.cell(id) else {
            return format!("{id:?}");
        };
        let mut names = vec![cell.descriptor.name.as_str()];
        let mut parent = cell.parent;
        while let Some(p) = parent.and_then(|p| self.cell(p).ok()) {
            names.push(p.descriptor.name.as_str());
            parent = p.parent;
        }
        names.reverse();
        format!("{}.{}", self.node_path(cell.node), names.join("."))
    }

    /// Direct upstream source of a cell.
    pub fn input(&self, id: CellId) -> Option<CellId> {
        self.cell(id).ok()?.input
    }

    /// The cell at the top of the source chain. A cell without a source is its own source.
    pub fn source(&self, id: CellId) -> CellId {
        let mut current = id;
        while let Some(input) = self.input(current) {
            current = input;
        }
        current
    }

    /// Cells reading directly from `id`.
    pub fn outputs(&self, id: CellId) -> &[CellId] {
        self.cell(id)
            .map(|cell| cell.outputs.as_slice())
            .unwrap_or_default()
    }

    /// The explicitly set value of a cell, or its default.
    pub fn stored_value(&self, id: CellId) -> Option<&Value> {
        let cell = self.cell(id).ok()?;
        cell.value.as_ref().or(cell.descriptor.default.as_ref())
    }

    /// Number of times the cell was dirtied by edits.
    pub fn dirty_count(&self, id: CellId) -> u64 {
        self.cell(id).map(|cell| cell.dirty_count).unwrap_or(0)
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    fn check_types(&self, src: CellId, dst: CellId) -> Result<(), GraphError> {
        let (s, d) = (self.cell(src)?, self.cell(dst)?);
        if s.descriptor.value_type != d.descriptor.value_type {
            return Err(GraphError::TypeMismatch {
                cell: self.cell_path(dst),
                expected: d.descriptor.value_type,
                found: s.descriptor.value_type,
            });
        }
        for child in &d.children {
            let name = &self.cell(*child)?.descriptor.name;
            let Some(src_child) = self.child(src, name) else {
                return Err(GraphError::UnknownCell(format!(
                    "{}.{}",
                    self.cell_path(src),
                    name
                )));
            };
            self.check_types(src_child, *child)?;
        }
        Ok(())
    }

    /// Link `dst` (and its children pairwise) to `src`, replacing existing sources.
    /// Returns the relinked cells.
    fn link(&mut self, src: CellId, dst: CellId) -> Vec<CellId> {
        let mut linked = Vec::new();
        let mut pending = vec![(src, dst)];
        while let Some((src, dst)) = pending.pop() {
            self.unlink(dst);
            if let Some(cell) = self.cell_mut(dst) {
                cell.input = Some(src);
            }
            if let Some(cell) = self.cell_mut(src) {
                cell.outputs.push(dst);
            }
            linked.push(dst);

            for child in self.cell_children(dst).to_vec() {
                let name = match self.cell(child) {
                    Ok(cell) => cell.descriptor.name.clone(),
                    Err(_) => continue,
                };
                if let Some(src_child) = self.child(src, &name) {
                    pending.push((src_child, child));
                }
            }
        }
        linked
    }

    fn unlink(&mut self, dst: CellId) -> bool {
        let Some(src) = self.cell_mut(dst).and_then(|cell| cell.input.take()) else {
            return false;
        };
        if let Some(src) = self.cell_mut(src) {
            src.outputs.retain(|cell| *cell != dst);
        }
        true
    }

    fn with_descendants(&self, id: CellId) -> Vec<CellId> {
        let mut all = vec![id];
        let mut i = 0;
        while i < all.len() {
            all.extend_from_slice(self.cell_children(all[i]));
            i += 1;
        }
        all
    }

    /// Make `dst` read from `src`.
    ///
    /// Compound cells are wired child by child. Fails if the types differ, or if `src`
    /// already depends on `dst`. Returns the dirtied cells.
    pub fn connect(&mut self, src: CellId, dst: CellId) -> Result<Vec<CellId>, GraphError> {
        self.check_types(src, dst)?;

        let sources: HashSet<CellId> = self.with_descendants(src).into_iter().collect();
        let closure = self.affected(&self.with_descendants(dst));
        if let Some(hit) = closure.iter().find(|cell| sources.contains(cell)) {
            return Err(GraphError::Cycle {
                path: vec![
                    self.cell_path(dst),
                    self.cell_path(*hit),
                    self.cell_path(dst),
                ],
            });
        }

        let linked = self.link(src, dst);
        tracing::trace!(src = %self.cell_path(src), dst = %self.cell_path(dst), "connected");
        Ok(self.propagate_edit(&linked))
    }

    /// Remove the source of `dst` and its children. Returns the dirtied cells.
    pub fn disconnect(&mut self, dst: CellId) -> Result<Vec<CellId>, GraphError> {
        self.cell(dst)?;
        let unlinked: Vec<CellId> = self
            .with_descendants(dst)
            .into_iter()
            .filter(|cell| self.unlink(*cell))
            .collect();
        tracing::trace!(dst = %self.cell_path(dst), "disconnected");
        Ok(self.propagate_edit(&unlinked))
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Set the value of an unconnected input. Compound values are distributed to children.
    ///
    /// Setting a value equal to the current one is a no-op. Returns the dirtied cells.
    pub fn set_value(
        &mut self,
        id: CellId,
        value: impl Into<Value>,
    ) -> Result<Vec<CellId>, GraphError> {
        let mut collector = VecDirtyCollector::new();
        self.set_value_with(id, value, &mut collector)?;
        Ok(collector.into_cells())
    }

    /// Like [`Graph::set_value`], reporting dirtied cells to `collector`.
    pub fn set_value_with<C: DirtyCollector>(
        &mut self,
        id: CellId,
        value: impl Into<Value>,
        collector: &mut C,
    ) -> Result<(), GraphError> {
        let value = value.into();
        let assignments = self.assignments(id, value)?;

        let mut edited = Vec::new();
        for (cell, value) in assignments {
            if self.stored_value(cell) == Some(&value) {
                continue;
            }
            if let Some(cell) = self.cell_mut(cell) {
                cell.value = Some(value);
            }
            edited.push(cell);
        }

        self.propagate(
            edited.into_iter().map(|cell| (cell, DirtyReason::Edited)),
            collector,
        );
        Ok(())
    }

    fn assignments(&self, id: CellId, value: Value) -> Result<Vec<(CellId, Value)>, GraphError> {
        let cell = self.cell(id)?;
        if cell.descriptor.direction != Direction::In || cell.input.is_some() {
            return Err(GraphError::NotSettable(self.cell_path(id)));
        }
        if value.value_type() != cell.descriptor.value_type {
            return Err(GraphError::TypeMismatch {
                cell: self.cell_path(id),
                expected: cell.descriptor.value_type,
                found: value.value_type(),
            });
        }

        match value {
            Value::Color3f(components) => {
                let mut assignments = Vec::new();
                for (child, component) in cell.children.iter().zip(components) {
                    assignments.extend(self.assignments(*child, Value::Float(component))?);
                }
                Ok(assignments)
            }
            value => Ok(vec![(id, value)]),
        }
    }

    // ========================================================================
    // Dirty propagation
    // ========================================================================

    /// Every cell that an edit of `seeds` would dirty, without dirtying anything.
    pub fn affected(&self, seeds: &[CellId]) -> Vec<CellId> {
        let mut visited: HashSet<CellId> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<CellId> = seeds.iter().copied().collect();
        let mut next = Vec::new();

        while let Some(cell) = queue.pop_front() {
            if !self.contains_cell(cell) || !visited.insert(cell) {
                continue;
            }
            order.push(cell);

            let mut parent = self.cell_parent(cell);
            while let Some(p) = parent {
                if visited.insert(p) {
                    order.push(p);
                }
                parent = self.cell_parent(p);
            }

            next.clear();
            self.dependents(cell, &mut next);
            queue.extend(next.iter().map(|(cell, _)| *cell));
        }
        order
    }

    fn dependents(&self, id: CellId, out: &mut Vec<(CellId, DirtyReason)>) {
        let Ok(cell) = self.cell(id) else {
            return;
        };
        out.extend(
            cell.outputs
                .iter()
                .map(|consumer| (*consumer, DirtyReason::Upstream(id))),
        );

        let Some(node) = self
            .nodes
            .get(cell.node.index)
            .and_then(|entry| entry.node.as_deref())
        else {
            return;
        };
        let mut affected = Vec::new();
        node.affects(self, id, &mut affected);
        out.extend(
            affected
                .into_iter()
                .map(|output| (output, DirtyReason::Affected(id))),
        );
    }

    fn propagate_edit(&mut self, seeds: &[CellId]) -> Vec<CellId> {
        let mut collector = VecDirtyCollector::new();
        self.propagate(
            seeds.iter().map(|cell| (*cell, DirtyReason::Edited)),
            &mut collector,
        );
        collector.into_cells()
    }

    fn propagate<C: DirtyCollector>(
        &mut self,
        seeds: impl IntoIterator<Item = (CellId, DirtyReason)>,
        collector: &mut C,
    ) {
        let mut visited: HashSet<CellId> = HashSet::new();
        let mut queue: VecDeque<(CellId, DirtyReason)> = seeds.into_iter().collect();
        let mut next = Vec::new();

        while let Some((id, reason)) = queue.pop_front() {
            if visited.contains(&id) {
                continue;
            }
            let Some(cell) = self.cell_mut(id) else {
                continue;
            };
            visited.insert(id);
            cell.dirty_count += 1;
            let mut parent = cell.parent;
            let propagation = collector.notify(id, reason);

            // Compound fingerprints combine their children.
            let mut child = id;
            while let Some(p) = parent {
                if !visited.insert(p) {
                    break;
                }
                let Some(cell) = self.cell_mut(p) else {
                    break;
                };
                cell.dirty_count += 1;
                parent = cell.parent;
                collector.notify(p, DirtyReason::Child(child));
                child = p;
            }

            if propagation == Propagation::Stop {
                continue;
            }
            next.clear();
            self.dependents(id, &mut next);
            queue.extend(next.drain(..));
        }

        tracing::trace!(graph = ?self.id, dirtied = visited.len(), "propagated dirtiness");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintHasher;
    use crate::runtime::EvalContext;

    struct Tint {
        color: CellId,
        output: CellId,
    }

    impl Node for Tint {
        fn type_name(&self) -> &'static str {
            "Tint"
        }

        fn affects(&self, graph: &Graph, input: CellId, outputs: &mut Vec<CellId>) {
            if graph.is_within(input, self.color) {
                outputs.push(self.output);
            }
        }

        fn hash(
            &self,
            _output: CellId,
            ctx: &EvalContext<'_>,
            hasher: &mut FingerprintHasher,
        ) -> Result<(), GraphError> {
            hasher.append_fingerprint(ctx.hash(self.color)?);
            Ok(())
        }

        fn compute(&self, _output: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError> {
            Ok(Value::Float(ctx.get::<[f32; 3]>(self.color)?[0]))
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn tint(graph: &mut Graph, name: &str) -> (CellId, CellId) {
        let node = graph.add_node(name, |b| Tint {
            color: b.input(CellDescriptor::input("color", ValueType::Color3f)),
            output: b.output(CellDescriptor::output("out", ValueType::Float)),
        });
        let tint = graph.node_as::<Tint>(node).unwrap();
        (tint.color, tint.output)
    }

    #[test]
    fn test_color_cells_have_components() {
        let mut graph = Graph::new();
        let (color, _) = tint(&mut graph, "tint");
        let names: Vec<&str> = graph
            .cell_children(color)
            .iter()
            .map(|child| graph.descriptor(*child).unwrap().name())
            .collect();
        assert_eq!(names, ["r", "g", "b"]);
        assert_eq!(graph.stored_value(graph.child(color, "g").unwrap()), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_component_edit_dirties_parent_and_output() {
        let mut graph = Graph::new();
        let (color, output) = tint(&mut graph, "tint");
        let green = graph.child(color, "g").unwrap();

        let dirtied = graph.set_value(green, 0.5f32).unwrap();
        assert_eq!(dirtied.len(), 3);
        assert!(dirtied.contains(&green));
        assert!(dirtied.contains(&color));
        assert!(dirtied.contains(&output));
        assert_eq!(graph.dirty_count(color), 1);
    }

    #[test]
    fn test_affected_does_not_mark() {
        let mut graph = Graph::new();
        let (color, output) = tint(&mut graph, "first");
        let (downstream_color, downstream_output) = tint(&mut graph, "second");
        let red = graph.child(color, "r").unwrap();
        graph.connect(color, downstream_color).unwrap();
        let before = graph.dirty_count(downstream_output);

        let affected = graph.affected(&[red]);
        assert!(affected.contains(&output));
        assert!(affected.contains(&downstream_output));
        assert_eq!(graph.dirty_count(downstream_output), before);
    }

    #[test]
    fn test_compound_values_are_distributed() {
        let mut graph = Graph::new();
        let (color, _) = tint(&mut graph, "tint");
        graph.set_value(color, [0.1f32, 0.2, 0.3]).unwrap();
        let blue = graph.child(color, "b").unwrap();
        assert_eq!(graph.stored_value(blue), Some(&Value::Float(0.3)));
    }
}
