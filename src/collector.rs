use crate::cell::CellId;

/// Why a cell is being dirtied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyReason {
    /// The cell is the origin of an edit: its value was set or its source changed.
    Edited,
    /// The cell reads from an upstream cell that was dirtied.
    Upstream(CellId),
    /// The cell's node declared it affected by one of its inputs.
    Affected(CellId),
    /// A child of this compound cell was dirtied.
    Child(CellId),
}

/// Decides whether dirtiness keeps propagating past a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Continue to everything downstream of the cell.
    #[default]
    Propagate,
    /// Mark the cell, but do not follow its links.
    Stop,
}

/// Receives every cell dirtied by a graph edit.
///
/// The graph always marks the notified cell; the collector only decides whether propagation
/// continues past it. Stopping early is only sound when the caller knows nothing downstream can
/// observe the change.
pub trait DirtyCollector {
    /// Called once per dirtied cell, in propagation order.
    fn notify(&mut self, cell: CellId, reason: DirtyReason) -> Propagation;
}

/// A collector that propagates everywhere and records nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropagateDirtyCollector;

impl DirtyCollector for PropagateDirtyCollector {
    fn notify(&mut self, _: CellId, _: DirtyReason) -> Propagation {
        Propagation::Propagate
    }
}

/// A collector that records every dirtied cell into a Vec.
#[derive(Debug, Clone, Default)]
pub struct VecDirtyCollector {
    dirtied: Vec<(CellId, DirtyReason)>,
}

impl VecDirtyCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded cells with the reason each was dirtied.
    pub fn dirtied(&self) -> &[(CellId, DirtyReason)] {
        &self.dirtied
    }

    /// Recorded cells only.
    pub fn into_cells(self) -> Vec<CellId> {
        self.dirtied.into_iter().map(|(cell, _)| cell).collect()
    }
}

impl DirtyCollector for VecDirtyCollector {
    fn notify(&mut self, cell: CellId, reason: DirtyReason) -> Propagation {
        self.dirtied.push((cell, reason));
        Propagation::Propagate
    }
}

impl<F> DirtyCollector for F
where
    F: FnMut(CellId, DirtyReason) -> Propagation,
{
    fn notify(&mut self, cell: CellId, reason: DirtyReason) -> Propagation {
        self(cell, reason)
    }
}
