#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod cache;
mod cell;
mod collector;
mod context;
mod error;
mod fingerprint;
pub mod geometry;
mod graph;
pub mod image;
mod node;
mod runtime;
mod subgraph;
pub mod task;
pub mod tracer;
mod value;

pub use cache::{CacheOutcome, ValueCache};
pub use cell::{CellDescriptor, CellId, Direction, NodeId};
pub use collector::*;
pub use context::{Context, FRAME};
pub use error::{ExecuteError, GraphError};
pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use geometry::{Box2i, V2i};
pub use graph::{Graph, GraphId, NodeBuilder};
pub use node::Node;
pub use runtime::{
    EvalContext, Runtime, RuntimeBuilder, DEFAULT_HASH_CACHE_CAPACITY, DEFAULT_MEMORY_LIMIT,
};
pub use subgraph::SubGraph;
pub use task::{ExecutableRender, Renderer, Task};
pub use tracer::{ComputeResult, LogTracer, NoopTracer, SpanId, Tracer, TracerCellKey};
pub use value::{downcast_object, FromValue, Object, Value, ValueType};
