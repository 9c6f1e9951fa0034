//! Error types for graph editing, evaluation and task execution.

use std::sync::Arc;

use crate::value::ValueType;

/// Errors raised while editing or evaluating a graph.
///
/// `GraphError` is `Clone` because a coalesced computation hands the same failure to every
/// thread that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// A connection or an evaluation would close a dependency cycle.
    ///
    /// The `path` holds the cells forming the cycle, first to last.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle {
        /// Cell paths forming the cycle.
        path: Vec<String>,
    },

    /// A value or a connection does not match the declared type of a cell.
    #[error("type mismatch on `{cell}`: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Path of the offending cell.
        cell: String,
        /// Declared type.
        expected: ValueType,
        /// Type that was supplied.
        found: ValueType,
    },

    /// A cell handle or path does not resolve.
    #[error("unknown cell: {0}")]
    UnknownCell(String),

    /// A node handle does not resolve, or the node is of a different kind.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// Only unconnected cells that store values can be set.
    #[error("cell `{0}` cannot be set")]
    NotSettable(String),

    /// The cell cannot be promoted onto, or unpromoted from, the given container.
    #[error("cannot promote `{0}`")]
    CannotPromote(String),

    /// An output was requested that its node does not know how to compute.
    #[error("cell `{0}` cannot be computed")]
    NotComputable(String),

    /// A context variable required by a computation is absent or of the wrong type.
    #[error("missing context variable `{0}`")]
    MissingContextVariable(String),

    /// A tile origin passed in a context is not a multiple of the tile size.
    #[error("tile origin ({x}, {y}) is not aligned to the tile grid")]
    UnalignedTileOrigin {
        /// Horizontal origin.
        x: i32,
        /// Vertical origin.
        y: i32,
    },

    /// An image primitive was built with inconsistent bounds and buffers.
    #[error("invalid image primitive: {0}")]
    InvalidPrimitive(String),

    /// The thread computing a shared value unwound before producing it.
    #[error("computation abandoned by its owning thread")]
    Abandoned,

    /// Failure reported by a node implementation or an external producer.
    #[error("compute failed: {0}")]
    Compute(Arc<anyhow::Error>),
}

impl GraphError {
    /// Wrap a failure reported by node code.
    ///
    /// A `GraphError` that travelled through `anyhow` is returned as itself, so structural
    /// failures raised below a collaborator stay structural.
    pub fn compute(err: impl Into<anyhow::Error>) -> Self {
        match err.into().downcast::<GraphError>() {
            Ok(graph) => graph,
            Err(err) => GraphError::Compute(Arc::new(err)),
        }
    }

    /// Returns the wrapped node failure, if any.
    pub fn compute_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            GraphError::Compute(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast a wrapped node failure to a concrete type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.compute_error().and_then(|e| e.downcast_ref::<E>())
    }

    /// Returns `true` for errors that indicate a broken graph rather than a failed compute.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GraphError::Cycle { .. } | GraphError::TypeMismatch { .. }
        )
    }
}

impl From<anyhow::Error> for GraphError {
    fn from(err: anyhow::Error) -> Self {
        GraphError::compute(err)
    }
}

/// Errors returned by [`Runtime::execute`](crate::Runtime::execute).
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The node is not a task.
    #[error("node `{0}` is not a task")]
    NotATask(String),

    /// Resolving the task's inputs failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The external renderer reported a failure.
    #[error("renderer `{renderer}` failed")]
    Renderer {
        /// Name of the renderer.
        renderer: String,
        /// The renderer's own error.
        #[source]
        source: anyhow::Error,
    },
}
