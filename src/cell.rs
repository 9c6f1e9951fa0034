//! Cell handles and descriptors.

use std::fmt;

use crate::value::{Value, ValueType};

/// Stable handle to a cell in a [`Graph`](crate::Graph).
///
/// Arena slots are reused, so a handle also carries the serial number the cell was created
/// with. Handles of removed cells never resolve again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub(crate) index: usize,
    pub(crate) serial: u64,
}

/// Stable handle to a node in a [`Graph`](crate::Graph).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) serial: u64,
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({}v{})", self.index, self.serial)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.serial)
    }
}

/// Whether a cell stores a value or computes one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Holds a value, or reads one from its source.
    In,
    /// Computed by its node, or passed through from its source.
    Out,
}

/// Static description of a cell: name, direction, type, default and flags.
#[derive(Debug, Clone)]
pub struct CellDescriptor {
    pub(crate) name: String,
    pub(crate) direction: Direction,
    pub(crate) value_type: ValueType,
    pub(crate) default: Option<Value>,
    pub(crate) cacheable: bool,
    pub(crate) dynamic: bool,
}

impl CellDescriptor {
    /// Describe an input cell.
    pub fn input(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, Direction::In, value_type)
    }

    /// Describe an output cell.
    pub fn output(name: impl Into<String>, value_type: ValueType) -> Self {
        Self::new(name, Direction::Out, value_type)
    }

    fn new(name: impl Into<String>, direction: Direction, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            direction,
            value_type,
            default: None,
            cacheable: true,
            dynamic: false,
        }
    }

    /// Set the default value. The value must match the declared type.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Keep computed values of this output out of the value cache.
    ///
    /// Used for outputs that re-expose data already cached under another fingerprint.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Mark the cell as added after construction (promoted cells, user cells).
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Cell name, unique among its siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Declared type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Default value, if declared.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Whether computed values go through the value cache.
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Whether the cell was added after construction.
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }
}

/// Arena record of a cell.
#[derive(Debug)]
pub(crate) struct Cell {
    pub serial: u64,
    pub node: NodeId,
    pub parent: Option<CellId>,
    pub children: Vec<CellId>,
    pub descriptor: CellDescriptor,
    pub value: Option<Value>,
    pub input: Option<CellId>,
    pub outputs: Vec<CellId>,
    pub dirty_count: u64,
}
