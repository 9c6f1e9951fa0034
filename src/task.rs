//! Side-effecting tasks, kept apart from the value cache.
//!
//! A [`Task`] node still exposes ordinary cells, but its action is run with
//! [`Runtime::execute`](crate::Runtime::execute) and never memoized. [`Task::task_hash`]
//! fingerprints the action so callers can skip repeating identical executions themselves.

use std::any::Any;
use std::sync::Arc;

use crate::cell::{CellDescriptor, CellId, NodeId};
use crate::context::Context;
use crate::error::{ExecuteError, GraphError};
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::graph::{Graph, NodeBuilder};
use crate::node::Node;
use crate::runtime::EvalContext;
use crate::value::{Object, Value, ValueType};

/// An action a node performs outside of the pure value model.
pub trait Task {
    /// Fingerprint of the action [`execute`](Task::execute) would perform under this
    /// context. The default fingerprint means there is nothing to do.
    fn task_hash(&self, ctx: &EvalContext<'_>) -> Result<Fingerprint, GraphError>;

    /// Perform the action.
    fn execute(&self, ctx: &EvalContext<'_>) -> Result<(), ExecuteError>;
}

/// Back end receiving fully resolved scenes.
pub trait Renderer: Send + Sync + 'static {
    /// Name used in error reports.
    fn name(&self) -> &str;

    /// Render `scene` for `context`.
    fn render(&self, scene: &Arc<dyn Object>, context: &Context) -> anyhow::Result<()>;
}

/// Passes its `in` scene through to `out` and hands it to a [`Renderer`] on execute.
///
/// `out` is wired from `in`, so its value and fingerprint never depend on whether the
/// render ran.
pub struct ExecutableRender {
    input: CellId,
    output: CellId,
    renderer: Arc<dyn Renderer>,
}

impl ExecutableRender {
    /// Add the `in` and `out` scene cells.
    pub fn new(b: &mut NodeBuilder<'_>, renderer: Arc<dyn Renderer>) -> Self {
        let input = b.input(CellDescriptor::input("in", ValueType::Object));
        let output = b.output(CellDescriptor::output("out", ValueType::Object));
        b.wire(input, output);
        Self {
            input,
            output,
            renderer,
        }
    }

    /// The scene input.
    pub fn input(&self) -> CellId {
        self.input
    }

    /// The pass-through scene output.
    pub fn output(&self) -> CellId {
        self.output
    }

    fn scene(&self, ctx: &EvalContext<'_>) -> Result<Option<Arc<dyn Object>>, GraphError> {
        ctx.get(self.input)
    }
}

impl Node for ExecutableRender {
    fn type_name(&self) -> &'static str {
        "ExecutableRender"
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

    fn as_task(&self) -> Option<&dyn Task> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Task for ExecutableRender {
    fn task_hash(&self, ctx: &EvalContext<'_>) -> Result<Fingerprint, GraphError> {
        if self.scene(ctx)?.is_none() {
            return Ok(Fingerprint::default());
        }
        let mut hasher = FingerprintHasher::with_seed(self.type_name());
        hasher
            .append_f32(ctx.context().frame())
            .append_fingerprint(ctx.hash(self.input)?);
        Ok(hasher.finish())
    }

    fn execute(&self, ctx: &EvalContext<'_>) -> Result<(), ExecuteError> {
        let Some(scene) = self.scene(ctx)? else {
            tracing::debug!(renderer = self.renderer.name(), "no scene to render");
            return Ok(());
        };
        self.renderer
            .render(&scene, ctx.context())
            .map_err(|source| ExecuteError::Renderer {
                renderer: self.renderer.name().to_string(),
                source,
            })
    }
}

/// Returns true if `node` performs an external action.
pub fn is_task(graph: &Graph, node: NodeId) -> bool {
    graph.node(node).is_ok_and(|node| node.as_task().is_some())
}
