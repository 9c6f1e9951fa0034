//! Evaluation runtime: the hash and compute protocol.

use std::cell::RefCell;
use std::sync::Arc;

use crate::cache::{CacheOutcome, HashCache, HashKey, ValueCache};
use crate::cell::{CellId, Direction, NodeId};
use crate::context::Context;
use crate::error::{ExecuteError, GraphError};
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::graph::{Graph, GraphId};
use crate::tracer::{ComputeResult, NoopTracer, Tracer, TracerCellKey};
use crate::value::{FromValue, Value, ValueType};

/// Default value-cache budget: 512 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 512 * 1024 * 1024;

/// Default number of memoized fingerprints.
pub const DEFAULT_HASH_CACHE_CAPACITY: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Hash,
    Compute,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    graph: GraphId,
    cell: CellId,
    context: Fingerprint,
    phase: Phase,
    fingerprint: Option<Fingerprint>,
}

impl Frame {
    fn same_request(&self, other: &Frame) -> bool {
        self.graph == other.graph
            && self.cell == other.cell
            && self.context == other.context
            && self.phase == other.phase
    }
}

thread_local! {
    static EVAL_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the evaluation stack when a hash or compute frame ends, including on unwind.
struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        EVAL_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Evaluates cells of graphs: fingerprints first, then values through the shared cache.
///
/// `Runtime` is cheap to clone; clones share their caches and tracer. One runtime can serve
/// any number of graphs and threads.
///
/// # Example
///
/// ```
/// use plug_flow::{Context, Runtime};
///
/// let runtime = Runtime::builder()
///     .memory_limit(64 * 1024 * 1024)
///     .build();
/// assert_eq!(runtime.cache().memory_limit(), 64 * 1024 * 1024);
/// let _ = Context::new();
/// ```
#[derive(Clone)]
pub struct Runtime {
    values: Arc<ValueCache>,
    hashes: Arc<HashCache>,
    tracer: Arc<dyn Tracer>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cached_values", &self.values.len())
            .field("memory_usage", &self.values.memory_usage())
            .finish()
    }
}

/// Builder for [`Runtime`] with custom settings.
pub struct RuntimeBuilder {
    memory_limit: usize,
    hash_cache_capacity: usize,
    tracer: Arc<dyn Tracer>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            hash_cache_capacity: DEFAULT_HASH_CACHE_CAPACITY,
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Set the value-cache budget in bytes. `0` disables value caching; concurrent requests
    /// for the same fingerprint are still coalesced.
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set how many fingerprints are memoized. `0` disables fingerprint memoization.
    pub fn hash_cache_capacity(mut self, entries: usize) -> Self {
        self.hash_cache_capacity = entries;
        self
    }

    /// Set the tracer receiving evaluation events.
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Build the runtime with the configured settings.
    pub fn build(self) -> Runtime {
        Runtime {
            values: Arc::new(ValueCache::new(self.memory_limit, Arc::clone(&self.tracer))),
            hashes: Arc::new(HashCache::new(self.hash_cache_capacity)),
            tracer: self.tracer,
        }
    }
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for custom settings.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The shared value cache.
    pub fn cache(&self) -> &ValueCache {
        &self.values
    }

    /// The configured tracer.
    pub fn tracer(&self) -> &dyn Tracer {
        &*self.tracer
    }

    /// Drop every cached value and fingerprint.
    pub fn clear_caches(&self) {
        self.values.clear();
        self.hashes.clear();
    }

    /// Evaluation handle for `graph` under `context`.
    pub fn eval<'a>(&'a self, graph: &'a Graph, context: Context) -> EvalContext<'a> {
        EvalContext {
            runtime: self,
            graph,
            context,
        }
    }

    /// Fingerprint of `cell` under `context`, without computing its value.
    pub fn hash(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<Fingerprint, GraphError> {
        self.hash_cell(graph, cell, context)
    }

    /// Value of `cell` under `context`.
    pub fn value(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<Value, GraphError> {
        self.value_cell(graph, cell, context)
    }

    /// Typed value of `cell` under `context`.
    pub fn get<T: FromValue>(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<T, GraphError> {
        let value = self.value_cell(graph, cell, context)?;
        convert(graph, cell, value)
    }

    /// Fingerprint of the action a task node would perform under `context`.
    pub fn task_hash(
        &self,
        graph: &Graph,
        node: NodeId,
        context: &Context,
    ) -> Result<Fingerprint, ExecuteError> {
        let task = graph
            .node(node)?
            .as_task()
            .ok_or_else(|| ExecuteError::NotATask(graph.node_path(node)))?;
        Ok(task.task_hash(&self.eval(graph, context.clone()))?)
    }

    /// Perform the external action of a task node. Nothing is cached.
    pub fn execute(
        &self,
        graph: &Graph,
        node: NodeId,
        context: &Context,
    ) -> Result<(), ExecuteError> {
        let task = graph
            .node(node)?
            .as_task()
            .ok_or_else(|| ExecuteError::NotATask(graph.node_path(node)))?;

        tracing::info!(node = %graph.node_path(node), frame = context.frame(), "executing task");
        let result = task.execute(&self.eval(graph, context.clone()));
        if let Err(err) = &result {
            tracing::warn!(node = %graph.node_path(node), %err, "task failed");
        }
        result
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    fn tracer_key(&self, graph: &Graph, cell: CellId, context: &Context) -> TracerCellKey {
        let node_type = graph
            .cell_node(cell)
            .and_then(|node| graph.node(node))
            .map(|node| node.type_name())
            .unwrap_or("?");
        TracerCellKey {
            cell,
            node_type,
            context: context.fingerprint(),
        }
    }

    fn enter(&self, graph: &Graph, frame: Frame, context: &Context) -> Result<FrameGuard, GraphError> {
        let cycle = EVAL_STACK.with(|stack| {
            let stack = stack.borrow();
            stack
                .iter()
                .position(|f| {
                    f.same_request(&frame)
                        || (frame.fingerprint.is_some() && f.fingerprint == frame.fingerprint)
                })
                .map(|start| stack[start..].iter().map(|f| f.cell).collect::<Vec<_>>())
        });

        if let Some(mut cells) = cycle {
            cells.push(frame.cell);
            self.tracer.on_cycle_detected(
                cells
                    .iter()
                    .map(|cell| self.tracer_key(graph, *cell, context))
                    .collect(),
            );
            return Err(GraphError::Cycle {
                path: cells.iter().map(|cell| graph.cell_path(*cell)).collect(),
            });
        }

        EVAL_STACK.with(|stack| stack.borrow_mut().push(frame));
        Ok(FrameGuard)
    }

    fn hash_cell(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<Fingerprint, GraphError> {
        let record = graph.cell(cell)?;
        if let Some(input) = record.input {
            return self.hash_cell(graph, input, context);
        }

        let key = HashKey {
            graph: graph.id(),
            cell,
            dirty_count: record.dirty_count,
            context: context.fingerprint(),
        };
        if let Some(fingerprint) = self.hashes.get(&key) {
            return Ok(fingerprint);
        }

        let _frame = self.enter(
            graph,
            Frame {
                graph: key.graph,
                cell,
                context: key.context,
                phase: Phase::Hash,
                fingerprint: None,
            },
            context,
        )?;

        let descriptor = &record.descriptor;
        let fingerprint = if descriptor.value_type.is_compound() {
            let mut hasher = FingerprintHasher::with_seed(descriptor.value_type.name());
            for child in &record.children {
                hasher.append_fingerprint(self.hash_cell(graph, *child, context)?);
            }
            hasher.finish()
        } else {
            match descriptor.direction {
                Direction::In => {
                    let mut hasher = FingerprintHasher::with_seed(descriptor.value_type.name());
                    if let Some(value) = graph.stored_value(cell) {
                        value.hash_into(&mut hasher);
                    }
                    hasher.finish()
                }
                Direction::Out => {
                    let node = graph.node(record.node)?;
                    let eval = self.eval(graph, context.clone());
                    if let Some(forward) = node.pass_through(cell, &eval)? {
                        let fingerprint = self.hash_cell(graph, forward, context)?;
                        self.hashes.insert(key, fingerprint);
                        return Ok(fingerprint);
                    }
                    let mut hasher = FingerprintHasher::with_seed(node.type_name());
                    hasher.append_str(&descriptor.name);
                    let mut parent = record.parent;
                    while let Some(p) = parent {
                        let p = graph.cell(p)?;
                        hasher.append_str(&p.descriptor.name);
                        parent = p.parent;
                    }
                    node.hash(cell, &eval, &mut hasher)?;
                    hasher.finish()
                }
            }
        };

        self.hashes.insert(key, fingerprint);
        self.tracer
            .on_hash(self.tracer_key(graph, cell, context), fingerprint);
        Ok(fingerprint)
    }

    fn value_cell(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<Value, GraphError> {
        let record = graph.cell(cell)?;
        if let Some(input) = record.input {
            return self.value_cell(graph, input, context);
        }

        let descriptor = &record.descriptor;
        match descriptor.value_type {
            ValueType::Color3f => {
                let mut components = [0.0f32; 3];
                for (component, child) in components.iter_mut().zip(&record.children) {
                    *component = convert(graph, *child, self.value_cell(graph, *child, context)?)?;
                }
                return Ok(Value::Color3f(components));
            }
            ValueType::Compound => return Err(GraphError::NotComputable(graph.cell_path(cell))),
            _ => {}
        }

        if descriptor.direction == Direction::In {
            return graph
                .stored_value(cell)
                .cloned()
                .ok_or_else(|| GraphError::NotComputable(graph.cell_path(cell)));
        }

        let fingerprint = self.hash_cell(graph, cell, context)?;
        let node = graph.node(record.node)?;
        if let Some(forward) = node.pass_through(cell, &self.eval(graph, context.clone()))? {
            return self.value_cell(graph, forward, context);
        }

        let key = self.tracer_key(graph, cell, context);
        let span_id = self.tracer.new_span_id();
        let frame = Frame {
            graph: graph.id(),
            cell,
            context: key.context,
            phase: Phase::Compute,
            fingerprint: Some(fingerprint),
        };

        let compute = || {
            let _frame = self.enter(graph, frame, context)?;
            self.tracer.on_compute_start(span_id, key);
            self.compute_checked(graph, cell, context)
        };

        let result = if descriptor.cacheable {
            self.values.get_or_compute(fingerprint, compute)
        } else {
            compute().map(|value| (value, CacheOutcome::Computed))
        };

        match result {
            Ok((value, outcome)) => {
                let result = if !descriptor.cacheable {
                    ComputeResult::Uncached
                } else {
                    self.tracer
                        .on_cache_check(span_id, key, outcome == CacheOutcome::Hit);
                    match outcome {
                        CacheOutcome::Hit => ComputeResult::CacheHit,
                        CacheOutcome::Coalesced => ComputeResult::Coalesced,
                        CacheOutcome::Computed => ComputeResult::Computed,
                    }
                };
                self.tracer.on_compute_end(span_id, key, result);
                Ok(value)
            }
            Err(err) => {
                self.tracer.on_compute_end(
                    span_id,
                    key,
                    ComputeResult::Error {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    fn compute_checked(
        &self,
        graph: &Graph,
        cell: CellId,
        context: &Context,
    ) -> Result<Value, GraphError> {
        let record = graph.cell(cell)?;
        let node = graph.node(record.node)?;
        let value = node.compute(cell, &self.eval(graph, context.clone()))?;

        let expected = record.descriptor.value_type;
        if value.value_type() != expected {
            return Err(GraphError::TypeMismatch {
                cell: graph.cell_path(cell),
                expected,
                found: value.value_type(),
            });
        }
        Ok(value)
    }
}

fn convert<T: FromValue>(graph: &Graph, cell: CellId, value: Value) -> Result<T, GraphError> {
    let found = value.value_type();
    T::from_value(&value).ok_or_else(|| GraphError::TypeMismatch {
        cell: graph.cell_path(cell),
        expected: T::TYPE,
        found,
    })
}

/// Evaluation handle passed to [`Node::hash`](crate::Node::hash) and
/// [`Node::compute`](crate::Node::compute).
///
/// Reads go through the runtime, so every upstream value is itself hashed, cached and
/// coalesced. Scoping a different context is done by deriving a new [`Context`] and
/// passing it to the `*_in` methods, or with [`EvalContext::scoped`].
#[derive(Clone)]
pub struct EvalContext<'a> {
    runtime: &'a Runtime,
    graph: &'a Graph,
    context: Context,
}

impl<'a> EvalContext<'a> {
    /// The current context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The graph being evaluated.
    pub fn graph(&self) -> &'a Graph {
        self.graph
    }

    /// The runtime performing the evaluation.
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// The same evaluation under another context.
    pub fn scoped(&self, context: Context) -> EvalContext<'a> {
        EvalContext {
            runtime: self.runtime,
            graph: self.graph,
            context,
        }
    }

    /// Fingerprint of `cell` in the current context.
    pub fn hash(&self, cell: CellId) -> Result<Fingerprint, GraphError> {
        self.runtime.hash_cell(self.graph, cell, &self.context)
    }

    /// Fingerprint of `cell` in `context`.
    pub fn hash_in(&self, cell: CellId, context: &Context) -> Result<Fingerprint, GraphError> {
        self.runtime.hash_cell(self.graph, cell, context)
    }

    /// Value of `cell` in the current context.
    pub fn value(&self, cell: CellId) -> Result<Value, GraphError> {
        self.runtime.value_cell(self.graph, cell, &self.context)
    }

    /// Value of `cell` in `context`.
    pub fn value_in(&self, cell: CellId, context: &Context) -> Result<Value, GraphError> {
        self.runtime.value_cell(self.graph, cell, context)
    }

    /// Typed value of `cell` in the current context.
    pub fn get<T: FromValue>(&self, cell: CellId) -> Result<T, GraphError> {
        self.get_in(cell, &self.context)
    }

    /// Typed value of `cell` in `context`.
    pub fn get_in<T: FromValue>(&self, cell: CellId, context: &Context) -> Result<T, GraphError> {
        let value = self.runtime.value_cell(self.graph, cell, context)?;
        convert(self.graph, cell, value)
    }
}
