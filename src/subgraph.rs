//! Container nodes and cell promotion.
//!
//! A [`SubGraph`] owns other nodes (added with [`Graph::add_node_in`]). Promoting a cell of
//! a child node exposes it on the container: a promoted input becomes a settable input of the
//! container driving the internal one, a promoted output becomes a container output reading
//! from the internal one.

use std::any::Any;

use crate::cell::{CellId, Direction, NodeId};
use crate::error::GraphError;
use crate::fingerprint::FingerprintHasher;
use crate::graph::Graph;
use crate::node::Node;
use crate::runtime::EvalContext;
use crate::value::{Value, ValueType};

/// A node grouping child nodes. Its only cells are promoted ones, which are always wired.
#[derive(Debug, Default)]
pub struct SubGraph;

impl SubGraph {
    /// Create a container.
    pub fn new() -> Self {
        Self
    }
}

impl Node for SubGraph {
    fn type_name(&self) -> &'static str {
        "SubGraph"
    }

    fn hash(
        &self,
        output: CellId,
        ctx: &EvalContext<'_>,
        _hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        Err(GraphError::NotComputable(ctx.graph().cell_path(output)))
    }

    fn compute(&self, output: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError> {
        Err(GraphError::NotComputable(ctx.graph().cell_path(output)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Graph {
    /// The container a cell could be promoted to.
    fn container_of(&self, cell: CellId) -> Option<NodeId> {
        let container = self.node_parent(self.cell_node(cell).ok()?)?;
        self.node_as::<SubGraph>(container).map(|_| container)
    }

    fn is_promoted_on(&self, cell: CellId, container: NodeId) -> bool {
        self.cell_node(cell).is_ok_and(|node| node == container)
            && self.descriptor(cell).is_ok_and(|d| d.is_dynamic())
    }

    /// Returns true if `cell` is a top-level cell of a node inside a [`SubGraph`] that can be
    /// exposed on it: not promoted yet, and for inputs, not connected.
    pub fn can_promote(&self, cell: CellId) -> bool {
        let Ok(descriptor) = self.descriptor(cell) else {
            return false;
        };
        if self.cell_parent(cell).is_some() || self.container_of(cell).is_none() {
            return false;
        }
        if self.is_promoted(cell) {
            return false;
        }
        descriptor.direction() == Direction::Out || self.input(cell).is_none()
    }

    /// Returns true if `cell` is exposed on its container.
    pub fn is_promoted(&self, cell: CellId) -> bool {
        let Some(container) = self.container_of(cell) else {
            return false;
        };
        match self.descriptor(cell).map(|d| d.direction()) {
            Ok(Direction::In) => self
                .input(cell)
                .is_some_and(|src| self.is_promoted_on(src, container)),
            Ok(Direction::Out) => self
                .outputs(cell)
                .iter()
                .any(|dst| self.is_promoted_on(*dst, container)),
            Err(_) => false,
        }
    }

    /// Expose `cell` on its container and return the new container cell.
    ///
    /// The container cell takes the internal cell's name, suffixed with a number if the name
    /// is taken. A promoted input starts with the internal input's values.
    pub fn promote(&mut self, cell: CellId) -> Result<CellId, GraphError> {
        if !self.can_promote(cell) {
            return Err(GraphError::CannotPromote(self.cell_path(cell)));
        }
        let container = self
            .container_of(cell)
            .ok_or_else(|| GraphError::CannotPromote(self.cell_path(cell)))?;

        let name = self.unique_cell_name(container, self.descriptor(cell)?.name());
        let promoted = self.clone_cell(container, None, cell, Some(name))?;

        match self.descriptor(cell)?.direction() {
            Direction::In => {
                self.copy_values(cell, promoted)?;
                self.connect(promoted, cell)?;
            }
            Direction::Out => {
                self.connect(cell, promoted)?;
            }
        }
        tracing::trace!(cell = %self.cell_path(cell), promoted = %self.cell_path(promoted), "promoted");
        Ok(promoted)
    }

    /// Remove the container cell exposing `cell`. A promoted input keeps the values last set
    /// on the container. Returns the dirtied cells.
    pub fn unpromote(&mut self, cell: CellId) -> Result<Vec<CellId>, GraphError> {
        if !self.is_promoted(cell) {
            return Err(GraphError::CannotPromote(self.cell_path(cell)));
        }
        let container = self
            .container_of(cell)
            .ok_or_else(|| GraphError::CannotPromote(self.cell_path(cell)))?;

        let mut dirtied = Vec::new();
        match self.descriptor(cell)?.direction() {
            Direction::In => {
                let Some(promoted) = self.input(cell) else {
                    return Err(GraphError::CannotPromote(self.cell_path(cell)));
                };
                dirtied.extend(self.disconnect(cell)?);
                dirtied.extend(self.copy_values(promoted, cell)?);
                dirtied.extend(self.remove_cell(promoted)?);
            }
            Direction::Out => {
                let promoted: Vec<CellId> = self
                    .outputs(cell)
                    .iter()
                    .copied()
                    .filter(|dst| self.is_promoted_on(*dst, container))
                    .collect();
                for dst in promoted {
                    dirtied.extend(self.remove_cell(dst)?);
                }
            }
        }
        Ok(dirtied)
    }

    fn unique_cell_name(&self, node: NodeId, base: &str) -> String {
        let taken = |name: &str| {
            self.cells_of(node)
                .iter()
                .any(|cell| self.descriptor(*cell).is_ok_and(|d| d.name() == name))
        };
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}{n}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }

    /// Recreate `template` (with compound children) on `node`.
    fn clone_cell(
        &mut self,
        node: NodeId,
        parent: Option<CellId>,
        template: CellId,
        name: Option<String>,
    ) -> Result<CellId, GraphError> {
        let mut descriptor = self.descriptor(template)?.clone().dynamic();
        if let Some(name) = name {
            descriptor.name = name;
        }
        let value_type = descriptor.value_type;
        let id = self.insert_cell(node, parent, descriptor);

        // Color children are created with the parent.
        if value_type == ValueType::Compound {
            for child in self.cell_children(template).to_vec() {
                self.clone_cell(node, Some(id), child, None)?;
            }
        }
        Ok(id)
    }

    /// Copy stored input values leaf by leaf, matching children by name.
    fn copy_values(&mut self, from: CellId, to: CellId) -> Result<Vec<CellId>, GraphError> {
        let children = self.cell_children(from).to_vec();
        if children.is_empty() {
            let Some(value) = self.stored_value(from).cloned() else {
                return Ok(Vec::new());
            };
            if self.descriptor(to)?.direction() != Direction::In || self.input(to).is_some() {
                return Ok(Vec::new());
            }
            return self.set_value(to, value);
        }

        let mut dirtied = Vec::new();
        for child in children {
            let name = self.descriptor(child)?.name().to_string();
            if let Some(target) = self.child(to, &name) {
                dirtied.extend(self.copy_values(child, target)?);
            }
        }
        Ok(dirtied)
    }
}
