use std::any::Any;

use crate::cell::CellId;
use crate::error::GraphError;
use crate::fingerprint::FingerprintHasher;
use crate::graph::Graph;
use crate::runtime::EvalContext;
use crate::task::Task;
use crate::value::Value;

/// Behaviour of a graph node: dependency declaration, hashing and computation.
///
/// A node owns a fixed set of cells created through [`NodeBuilder`](crate::NodeBuilder) and
/// remembers their handles. The three protocols must agree with each other:
///
/// - [`affects`](Node::affects) must list every output whose value can change when `input`
///   changes. Missing an output means stale cache reads; listing too many only costs recomputes.
/// - [`hash`](Node::hash) must append exactly the values [`compute`](Node::compute) reads. The
///   runtime has already seeded the hasher with the node type and the output name.
/// - [`compute`](Node::compute) must be deterministic given the hashed contributors.
///
/// Outputs wired to an upstream source, compound outputs and inputs are resolved by the
/// runtime and never reach `hash` or `compute`. An output can also be forwarded per request
/// with [`pass_through`](Node::pass_through).
///
/// # Example
///
/// ```
/// use plug_flow::*;
///
/// struct Double { input: CellId, output: CellId }
///
/// impl Node for Double {
///     fn type_name(&self) -> &'static str { "Double" }
///
///     fn affects(&self, _: &Graph, input: CellId, outputs: &mut Vec<CellId>) {
///         if input == self.input {
///             outputs.push(self.output);
///         }
///     }
///
///     fn hash(&self, _: CellId, ctx: &EvalContext<'_>, h: &mut FingerprintHasher) -> Result<(), GraphError> {
///         h.append_fingerprint(ctx.hash(self.input)?);
///         Ok(())
///     }
///
///     fn compute(&self, _: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError> {
///         Ok(Value::Float(ctx.get::<f32>(self.input)? * 2.0))
///     }
///
///     fn as_any(&self) -> &dyn std::any::Any { self }
/// }
///
/// let mut graph = Graph::new();
/// let node = graph.add_node("double", |b| Double {
///     input: b.input(CellDescriptor::input("in", ValueType::Float).with_default(0.0f32)),
///     output: b.output(CellDescriptor::output("out", ValueType::Float)),
/// });
/// let (input, output) = {
///     let double = graph.node_as::<Double>(node).unwrap();
///     (double.input, double.output)
/// };
/// graph.set_value(input, 21.0f32).unwrap();
///
/// let runtime = Runtime::new();
/// assert_eq!(runtime.get::<f32>(&graph, output, &Context::new()).unwrap(), 42.0);
/// ```
pub trait Node: Any + Send + Sync {
    /// Node kind, used to seed output fingerprints.
    fn type_name(&self) -> &'static str;

    /// Push the outputs of this node affected by a change of `input`.
    ///
    /// `input` may be a child of a compound input; `graph` allows resolving parents.
    fn affects(&self, _graph: &Graph, _input: CellId, _outputs: &mut Vec<CellId>) {}

    /// Append this node's contribution to the fingerprint of `output`.
    fn hash(
        &self,
        output: CellId,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError>;

    /// Produce the value of `output`.
    fn compute(&self, output: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError>;

    /// Resolve `output` to another cell for this request, instead of hashing and computing it.
    ///
    /// The returned cell's fingerprint and value are used verbatim. Everything read here must
    /// be covered by [`affects`](Node::affects), like anything read by `hash`.
    fn pass_through(
        &self,
        _output: CellId,
        _ctx: &EvalContext<'_>,
    ) -> Result<Option<CellId>, GraphError> {
        Ok(None)
    }

    /// Task behaviour, for nodes that perform external actions.
    fn as_task(&self) -> Option<&dyn Task> {
        None
    }

    /// Upcast for [`Graph::node_as`].
    fn as_any(&self) -> &dyn Any;
}
