//! Tiled image decomposition.
//!
//! An image output is four cells grouped under one compound cell:
//!
//! - `displayWindow`: nominal full-frame bounds.
//! - `dataWindow`: bounds of the defined pixels.
//! - `channelNames`: ordered, unique channel names.
//! - `channelData`: one [`TILE_SIZE`]² float tile, selected by the [`CHANNEL_NAME`] and
//!   [`TILE_ORIGIN`] context variables.
//!
//! Tiles are row-major, rows ordered by increasing `y`, and always full size. Pixels outside
//! the data window are zero.

use std::sync::{Arc, OnceLock};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cell::{CellDescriptor, CellId, Direction};
use crate::context::Context;
use crate::error::GraphError;
use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::geometry::{Box2i, V2i};
use crate::graph::{Graph, NodeBuilder};
use crate::runtime::{EvalContext, Runtime};
use crate::value::ValueType;

pub mod grade;
pub mod primitive;
pub mod processor;
pub mod source;

/// Edge length of every tile, in pixels.
pub const TILE_SIZE: i32 = 64;

/// Number of floats in a tile.
pub const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// Context variable holding the requested channel name.
pub const CHANNEL_NAME: &str = "image:channelName";

/// Context variable holding the requested tile origin.
pub const TILE_ORIGIN: &str = "image:tileOrigin";

/// Origin of the tile containing `point`.
pub fn tile_origin(point: V2i) -> V2i {
    V2i::new(
        point.x.div_euclid(TILE_SIZE) * TILE_SIZE,
        point.y.div_euclid(TILE_SIZE) * TILE_SIZE,
    )
}

/// Pixel bounds of the tile at `origin`.
pub fn tile_bound(origin: V2i) -> Box2i {
    Box2i::from_origin_size(origin, TILE_SIZE, TILE_SIZE)
}

/// Returns true if `origin` lies on the tile grid.
pub fn is_tile_aligned(origin: V2i) -> bool {
    origin.x.rem_euclid(TILE_SIZE) == 0 && origin.y.rem_euclid(TILE_SIZE) == 0
}

/// Index of pixel `(x, y)` within the tile at `origin`.
#[inline]
pub fn tile_index(origin: V2i, x: i32, y: i32) -> usize {
    (y - origin.y) as usize * TILE_SIZE as usize + (x - origin.x) as usize
}

/// The shared all-zero tile.
pub fn black_tile() -> Arc<[f32]> {
    static BLACK: OnceLock<Arc<[f32]>> = OnceLock::new();
    Arc::clone(BLACK.get_or_init(|| Arc::from(vec![0.0f32; TILE_PIXELS])))
}

/// Origins of every tile overlapping `window`, row by row.
pub fn tile_origins(window: &Box2i) -> Vec<V2i> {
    if window.is_empty() {
        return Vec::new();
    }
    let min = tile_origin(window.min);
    let max = tile_origin(window.max);
    let mut origins = Vec::new();
    for y in (min.y..=max.y).step_by(TILE_SIZE as usize) {
        for x in (min.x..=max.x).step_by(TILE_SIZE as usize) {
            origins.push(V2i::new(x, y));
        }
    }
    origins
}

/// `base` with the channel and tile origin of a channel-data request.
pub fn channel_data_context(base: &Context, channel: &str, origin: V2i) -> Context {
    base.with(CHANNEL_NAME, channel).with(TILE_ORIGIN, origin)
}

/// `context` without the channel-data variables, for values that are not per tile.
pub fn global_context(context: &Context) -> Context {
    context.without(CHANNEL_NAME).without(TILE_ORIGIN)
}

/// The channel name and tile origin of a channel-data request.
pub fn tile_request(context: &Context) -> Result<(Arc<str>, V2i), GraphError> {
    let channel = context
        .get::<Arc<str>>(CHANNEL_NAME)
        .ok_or_else(|| GraphError::MissingContextVariable(CHANNEL_NAME.to_string()))?;
    let origin = context
        .get::<V2i>(TILE_ORIGIN)
        .ok_or_else(|| GraphError::MissingContextVariable(TILE_ORIGIN.to_string()))?;
    if !is_tile_aligned(origin) {
        return Err(GraphError::UnalignedTileOrigin {
            x: origin.x,
            y: origin.y,
        });
    }
    Ok((channel, origin))
}

/// Fold the channel name and tile origin of a request into a channel-data fingerprint.
pub fn append_tile_request(
    context: &Context,
    hasher: &mut FingerprintHasher,
) -> Result<(), GraphError> {
    let (channel, origin) = tile_request(context)?;
    hasher
        .append_str(&channel)
        .append_i32(origin.x)
        .append_i32(origin.y);
    Ok(())
}

/// The cells making up one image input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCells {
    /// Compound parent of the four image cells.
    pub root: CellId,
    /// `Box2i` display window.
    pub display_window: CellId,
    /// `Box2i` data window.
    pub data_window: CellId,
    /// `StringVector` channel names.
    pub channel_names: CellId,
    /// `FloatVector` tile of one channel.
    pub channel_data: CellId,
}

impl ImageCells {
    /// Add an image input named `name`.
    pub fn input(b: &mut NodeBuilder<'_>, name: &str) -> Self {
        let root = b.input(CellDescriptor::input(name, ValueType::Compound));
        Self::children(b, root, CellDescriptor::input, true)
    }

    /// Add an image output named `name`.
    ///
    /// Uncached outputs re-expose data that is already cached under another fingerprint.
    pub fn output(b: &mut NodeBuilder<'_>, name: &str, cacheable: bool) -> Self {
        let root = b.output(CellDescriptor::output(name, ValueType::Compound));
        Self::children(b, root, CellDescriptor::output, cacheable)
    }

    fn children(
        b: &mut NodeBuilder<'_>,
        root: CellId,
        describe: fn(&'static str, ValueType) -> CellDescriptor,
        cacheable: bool,
    ) -> Self {
        let mut child = |name: &'static str, value_type: ValueType| {
            let mut descriptor = describe(name, value_type);
            // An unconnected image input still reads as full-size zero tiles.
            if value_type == ValueType::FloatVector && descriptor.direction() == Direction::In {
                descriptor = descriptor.with_default(black_tile());
            }
            b.child(
                root,
                if cacheable {
                    descriptor
                } else {
                    descriptor.uncached()
                },
            )
        };
        Self {
            root,
            display_window: child("displayWindow", ValueType::Box2i),
            data_window: child("dataWindow", ValueType::Box2i),
            channel_names: child("channelNames", ValueType::StringVector),
            channel_data: child("channelData", ValueType::FloatVector),
        }
    }

    /// Resolve the image cells below an existing compound cell.
    pub fn from_root(graph: &Graph, root: CellId) -> Result<Self, GraphError> {
        let child = |name: &str| {
            graph
                .child(root, name)
                .ok_or_else(|| GraphError::UnknownCell(format!("{}.{}", graph.cell_path(root), name)))
        };
        Ok(Self {
            root,
            display_window: child("displayWindow")?,
            data_window: child("dataWindow")?,
            channel_names: child("channelNames")?,
            channel_data: child("channelData")?,
        })
    }

    /// Returns true if `cell` is one of these cells.
    pub fn contains(&self, graph: &Graph, cell: CellId) -> bool {
        graph.is_within(cell, self.root)
    }
}

/// Read access to an image, resolving every request through a [`Runtime`].
///
/// `ImageView` is meant for consumers outside of node computations. Nodes read their inputs
/// through [`EvalContext`] directly.
#[derive(Clone)]
pub struct ImageView<'a> {
    eval: EvalContext<'a>,
    cells: ImageCells,
}

impl<'a> ImageView<'a> {
    /// View of `cells` under `context`.
    pub fn new(runtime: &'a Runtime, graph: &'a Graph, cells: ImageCells, context: Context) -> Self {
        Self {
            eval: runtime.eval(graph, global_context(&context)),
            cells,
        }
    }

    /// The display window.
    pub fn display_window(&self) -> Result<Box2i, GraphError> {
        self.eval.get(self.cells.display_window)
    }

    /// The data window.
    pub fn data_window(&self) -> Result<Box2i, GraphError> {
        self.eval.get(self.cells.data_window)
    }

    /// The channel names.
    pub fn channel_names(&self) -> Result<Arc<[String]>, GraphError> {
        self.eval.get(self.cells.channel_names)
    }

    /// One tile of one channel.
    pub fn channel_data(&self, channel: &str, origin: V2i) -> Result<Arc<[f32]>, GraphError> {
        let context = channel_data_context(self.eval.context(), channel, origin);
        self.eval.get_in(self.cells.channel_data, &context)
    }

    /// Fingerprint of one tile of one channel.
    pub fn channel_data_hash(&self, channel: &str, origin: V2i) -> Result<Fingerprint, GraphError> {
        let context = channel_data_context(self.eval.context(), channel, origin);
        self.eval.hash_in(self.cells.channel_data, &context)
    }

    /// Origins of the tiles covering the data window.
    pub fn tile_origins(&self) -> Result<Vec<V2i>, GraphError> {
        Ok(tile_origins(&self.data_window()?))
    }

    /// A whole channel over the data window, row-major with rows by increasing `y`.
    ///
    /// With the `parallel` feature, tiles are requested concurrently.
    pub fn channel_plane(&self, channel: &str) -> Result<Vec<f32>, GraphError> {
        let window = self.data_window()?;
        let origins = tile_origins(&window);

        #[cfg(feature = "parallel")]
        let tiles = origins
            .par_iter()
            .map(|origin| self.channel_data(channel, *origin).map(|tile| (*origin, tile)))
            .collect::<Result<Vec<_>, _>>()?;
        #[cfg(not(feature = "parallel"))]
        let tiles = origins
            .iter()
            .map(|origin| self.channel_data(channel, *origin).map(|tile| (*origin, tile)))
            .collect::<Result<Vec<_>, _>>()?;

        let width = window.width() as usize;
        let mut plane = vec![0.0f32; window.area()];
        for (origin, tile) in tiles {
            let bound = tile_bound(origin).intersect(&window);
            let span = bound.width() as usize;
            for y in bound.min.y..=bound.max.y {
                let src = tile_index(origin, bound.min.x, y);
                let dst = (y - window.min.y) as usize * width + (bound.min.x - window.min.x) as usize;
                plane[dst..dst + span].copy_from_slice(&tile[src..src + span]);
            }
        }
        Ok(plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_origin_floors_negative_coordinates() {
        assert_eq!(tile_origin(V2i::new(0, 63)), V2i::new(0, 0));
        assert_eq!(tile_origin(V2i::new(64, 65)), V2i::new(64, 64));
        assert_eq!(tile_origin(V2i::new(-1, -64)), V2i::new(-64, -64));
        assert_eq!(tile_origin(V2i::new(-65, 0)), V2i::new(-128, 0));
    }

    #[test]
    fn test_tile_origins_cover_window() {
        let window = Box2i::new(V2i::new(-10, 0), V2i::new(100, 63));
        let origins = tile_origins(&window);
        assert_eq!(
            origins,
            vec![V2i::new(-64, 0), V2i::new(0, 0), V2i::new(64, 0)]
        );
        assert!(tile_origins(&Box2i::EMPTY).is_empty());
    }

    #[test]
    fn test_tile_request() {
        let context = channel_data_context(&Context::new(), "G", V2i::new(128, -64));
        let (channel, origin) = tile_request(&context).unwrap();
        assert_eq!(&*channel, "G");
        assert_eq!(origin, V2i::new(128, -64));

        let unaligned = context.with(TILE_ORIGIN, V2i::new(5, 0));
        assert!(matches!(
            tile_request(&unaligned),
            Err(GraphError::UnalignedTileOrigin { x: 5, y: 0 })
        ));
        assert!(matches!(
            tile_request(&Context::new()),
            Err(GraphError::MissingContextVariable(_))
        ));
    }

    #[test]
    fn test_global_context_strips_tile_variables() {
        let base = Context::new();
        let request = channel_data_context(&base, "R", V2i::new(0, 0));
        assert_eq!(global_context(&request).fingerprint(), base.fingerprint());
    }
}
