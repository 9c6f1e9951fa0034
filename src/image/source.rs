//! Source Adapter: bridges one whole, externally produced image into the tile model.
//!
//! The whole image is computed once per upstream change, by a [`PrimitiveProducer`], into an
//! internal cached output. Every image output is then derived by slicing that cached object,
//! so it is hashed from the object's fingerprint instead of re-hashing pixel buffers, and is
//! kept out of the value cache.

use std::any::Any;
use std::sync::Arc;

use crate::cell::{CellDescriptor, CellId};
use crate::error::GraphError;
use crate::fingerprint::FingerprintHasher;
use crate::geometry::Box2i;
use crate::graph::{Graph, NodeBuilder};
use crate::image::primitive::ImagePrimitive;
use crate::image::{
    append_tile_request, black_tile, global_context, tile_bound, tile_index, tile_request,
    ImageCells, TILE_PIXELS,
};
use crate::node::Node;
use crate::runtime::EvalContext;
use crate::value::{downcast_object, Object, Value, ValueType};

/// Produces the whole image an [`ImagePrimitiveSource`] slices.
///
/// The producer is called without the channel and tile context variables, so one produced
/// image serves every tile and channel request.
pub trait PrimitiveProducer: Send + Sync + 'static {
    /// Node type name.
    fn type_name(&self) -> &'static str;

    /// Returns true if a change of `input` can change the produced image.
    fn affects_primitive(&self, graph: &Graph, input: CellId) -> bool;

    /// Append everything [`compute_primitive`](PrimitiveProducer::compute_primitive) reads.
    fn hash_primitive(
        &self,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError>;

    /// Produce the image, or `None` if there is none.
    fn compute_primitive(&self, ctx: &EvalContext<'_>)
        -> anyhow::Result<Option<Arc<ImagePrimitive>>>;
}

/// A node exposing the image of a [`PrimitiveProducer`] as tiles.
///
/// When the producer yields no image, the windows are empty, the channel list is empty and
/// every tile is the shared zero tile. A requested channel the image lacks is also a zero
/// tile.
pub struct ImagePrimitiveSource<P> {
    producer: P,
    primitive: CellId,
    input_primitive: CellId,
    out: ImageCells,
}

impl<P: PrimitiveProducer> ImagePrimitiveSource<P> {
    /// Build the adapter's cells, then the producer's own cells with `producer`.
    pub fn new(b: &mut NodeBuilder<'_>, producer: impl FnOnce(&mut NodeBuilder<'_>) -> P) -> Self {
        let producer = producer(b);
        let out = ImageCells::output(b, "out", false);
        let primitive = b.output(CellDescriptor::output("__imagePrimitive", ValueType::Object));
        let input_primitive =
            b.input(CellDescriptor::input("__inputImagePrimitive", ValueType::Object));
        b.wire(primitive, input_primitive);

        Self {
            producer,
            primitive,
            input_primitive,
            out,
        }
    }

    /// The image outputs.
    pub fn out(&self) -> ImageCells {
        self.out
    }

    /// The internal cell caching the whole image.
    pub fn primitive_cell(&self) -> CellId {
        self.primitive
    }

    /// The producer.
    pub fn producer(&self) -> &P {
        &self.producer
    }

    fn primitive(&self, ctx: &EvalContext<'_>) -> Result<Option<Arc<ImagePrimitive>>, GraphError> {
        let object: Option<Arc<dyn Object>> =
            ctx.get_in(self.input_primitive, &global_context(ctx.context()))?;
        object
            .map(|object| {
                downcast_object::<ImagePrimitive>(&object).ok_or_else(|| {
                    GraphError::InvalidPrimitive(format!(
                        "expected ImagePrimitive, found {}",
                        object.type_name()
                    ))
                })
            })
            .transpose()
    }
}

impl<P: PrimitiveProducer> Node for ImagePrimitiveSource<P> {
    fn type_name(&self) -> &'static str {
        self.producer.type_name()
    }

    fn affects(&self, graph: &Graph, input: CellId, outputs: &mut Vec<CellId>) {
        if input == self.input_primitive {
            outputs.extend([
                self.out.display_window,
                self.out.data_window,
                self.out.channel_names,
                self.out.channel_data,
            ]);
        } else if self.producer.affects_primitive(graph, input) {
            outputs.push(self.primitive);
        }
    }

    fn hash(
        &self,
        output: CellId,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        let global = global_context(ctx.context());
        if output == self.primitive {
            return self.producer.hash_primitive(&ctx.scoped(global), hasher);
        }

        hasher.append_fingerprint(ctx.hash_in(self.input_primitive, &global)?);
        if output == self.out.channel_data {
            append_tile_request(ctx.context(), hasher)?;
        }
        Ok(())
    }

    fn compute(&self, output: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError> {
        if output == self.primitive {
            let global = ctx.scoped(global_context(ctx.context()));
            let primitive = self
                .producer
                .compute_primitive(&global)
                .map_err(GraphError::compute)?;
            return Ok(Value::Object(primitive.map(|p| p as Arc<dyn Object>)));
        }

        let primitive = self.primitive(ctx)?;
        let windows = |window: fn(&ImagePrimitive) -> Box2i| {
            primitive.as_deref().map(window).unwrap_or(Box2i::EMPTY)
        };

        if output == self.out.display_window {
            Ok(Value::Box2i(windows(ImagePrimitive::display_window)))
        } else if output == self.out.data_window {
            Ok(Value::Box2i(windows(ImagePrimitive::data_window)))
        } else if output == self.out.channel_names {
            let names: Vec<String> = primitive
                .iter()
                .flat_map(|p| p.channel_names().map(String::from))
                .collect();
            Ok(Value::from(names))
        } else if output == self.out.channel_data {
            let (channel, origin) = tile_request(ctx.context())?;
            let Some(primitive) = primitive else {
                return Ok(Value::FloatVector(black_tile()));
            };
            let Some(plane) = primitive.channel(&channel) else {
                return Ok(Value::FloatVector(black_tile()));
            };
            Ok(Value::FloatVector(slice_tile(
                primitive.data_window(),
                plane,
                origin,
            )))
        } else {
            Err(GraphError::NotComputable(ctx.graph().cell_path(output)))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Copy the tile at `origin` out of a plane covering `data_window`, zero outside of it.
fn slice_tile(data_window: Box2i, plane: &[f32], origin: crate::geometry::V2i) -> Arc<[f32]> {
    let bound = tile_bound(origin).intersect(&data_window);
    if bound.is_empty() {
        return black_tile();
    }

    let width = data_window.width() as usize;
    let span = bound.width() as usize;
    let mut tile = vec![0.0f32; TILE_PIXELS];
    for y in bound.min.y..=bound.max.y {
        let src = (y - data_window.min.y) as usize * width + (bound.min.x - data_window.min.x) as usize;
        let dst = tile_index(origin, bound.min.x, y);
        tile[dst..dst + span].copy_from_slice(&plane[src..src + span]);
    }
    Arc::from(tile)
}

/// Producer reading the whole image from an `Object` input named `image`.
///
/// The input can be set to an [`ImagePrimitive`] directly or wired from any node that
/// outputs one.
pub struct PrimitiveInput {
    image: CellId,
}

impl PrimitiveInput {
    /// Add the `image` input cell.
    pub fn new(b: &mut NodeBuilder<'_>) -> Self {
        Self {
            image: b.input(CellDescriptor::input("image", ValueType::Object)),
        }
    }

    /// The `image` input.
    pub fn image(&self) -> CellId {
        self.image
    }
}

impl PrimitiveProducer for PrimitiveInput {
    fn type_name(&self) -> &'static str {
        "ImageSource"
    }

    fn affects_primitive(&self, _graph: &Graph, input: CellId) -> bool {
        input == self.image
    }

    fn hash_primitive(
        &self,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        hasher.append_fingerprint(ctx.hash(self.image)?);
        Ok(())
    }

    fn compute_primitive(
        &self,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Option<Arc<ImagePrimitive>>> {
        let Some(object) = ctx.get::<Option<Arc<dyn Object>>>(self.image)? else {
            return Ok(None);
        };
        match downcast_object::<ImagePrimitive>(&object) {
            Some(image) => Ok(Some(image)),
            None => anyhow::bail!("`image` holds a {}, not an ImagePrimitive", object.type_name()),
        }
    }
}
