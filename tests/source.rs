//! Source Adapter: slicing one produced image into windows, names and tiles.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use plug_flow::image::primitive::ImagePrimitive;
use plug_flow::image::source::{ImagePrimitiveSource, PrimitiveInput, PrimitiveProducer};
use plug_flow::image::{black_tile, tile_index, tile_origins, ImageCells, ImageView, TILE_PIXELS};
use plug_flow::*;

// ============================================================================
// Producers
// ============================================================================

/// Produces a `width` x `height` gradient at the origin, counting productions.
struct Gradient {
    width: CellId,
    height: CellId,
    produced: Arc<AtomicU32>,
}

impl Gradient {
    fn new(b: &mut NodeBuilder<'_>, produced: Arc<AtomicU32>) -> Self {
        Self {
            width: b.input(CellDescriptor::input("width", ValueType::Int).with_default(100i64)),
            height: b.input(CellDescriptor::input("height", ValueType::Int).with_default(70i64)),
            produced,
        }
    }
}

impl PrimitiveProducer for Gradient {
    fn type_name(&self) -> &'static str {
        "Gradient"
    }

    fn affects_primitive(&self, _graph: &Graph, input: CellId) -> bool {
        input == self.width || input == self.height
    }

    fn hash_primitive(
        &self,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        hasher
            .append_fingerprint(ctx.hash(self.width)?)
            .append_fingerprint(ctx.hash(self.height)?);
        Ok(())
    }

    fn compute_primitive(
        &self,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Option<Arc<ImagePrimitive>>> {
        self.produced.fetch_add(1, Ordering::SeqCst);
        let width: i64 = ctx.get(self.width)?;
        let height: i64 = ctx.get(self.height)?;
        if width <= 0 || height <= 0 {
            return Ok(None);
        }
        let window = Box2i::from_origin_size(V2i::new(0, 0), width as i32, height as i32);
        let plane: Vec<f32> = (0..window.area()).map(|i| i as f32).collect();
        let image = ImagePrimitive::new(window, window).with_channel("Y", plane)?;
        Ok(Some(Arc::new(image)))
    }
}

/// Reads its Int input as a Bool.
struct Mistyped {
    size: CellId,
}

impl PrimitiveProducer for Mistyped {
    fn type_name(&self) -> &'static str {
        "Mistyped"
    }

    fn affects_primitive(&self, _graph: &Graph, input: CellId) -> bool {
        input == self.size
    }

    fn hash_primitive(
        &self,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        hasher.append_fingerprint(ctx.hash(self.size)?);
        Ok(())
    }

    fn compute_primitive(
        &self,
        ctx: &EvalContext<'_>,
    ) -> anyhow::Result<Option<Arc<ImagePrimitive>>> {
        let _: bool = ctx.get(self.size)?;
        Ok(None)
    }
}

fn gradient_graph(produced: &Arc<AtomicU32>) -> (Graph, NodeId, ImageCells) {
    let mut graph = Graph::new();
    let produced = Arc::clone(produced);
    let node = graph.add_node("gradient", |b| {
        ImagePrimitiveSource::new(b, |b| Gradient::new(b, produced))
    });
    let out = graph
        .node_as::<ImagePrimitiveSource<Gradient>>(node)
        .unwrap()
        .out();
    (graph, node, out)
}

fn input_graph() -> (Graph, CellId, ImageCells) {
    let mut graph = Graph::new();
    let node = graph.add_node("source", |b| ImagePrimitiveSource::new(b, PrimitiveInput::new));
    let source = graph
        .node_as::<ImagePrimitiveSource<PrimitiveInput>>(node)
        .unwrap();
    let (image, out) = (source.producer().image(), source.out());
    (graph, image, out)
}

/// Not an image.
#[derive(Debug)]
struct Scene;

impl Object for Scene {
    fn type_name(&self) -> &'static str {
        "Scene"
    }

    fn hash_into(&self, hasher: &mut FingerprintHasher) {
        hasher.append_str("scene");
    }

    fn memory_usage(&self) -> usize {
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Absent image
// ============================================================================

#[test]
fn test_absent_image_degrades_to_empty() {
    let (graph, _image, out) = input_graph();
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    assert!(view.display_window().unwrap().is_empty());
    assert!(view.data_window().unwrap().is_empty());
    assert!(view.channel_names().unwrap().is_empty());
    assert!(view.tile_origins().unwrap().is_empty());

    let tile = view.channel_data("R", V2i::new(0, 0)).unwrap();
    assert_eq!(tile.len(), TILE_PIXELS);
    assert!(tile.iter().all(|v| *v == 0.0));
}

#[test]
fn test_producer_without_image_degrades_to_empty() {
    let produced = Arc::new(AtomicU32::new(0));
    let (mut graph, node, out) = gradient_graph(&produced);
    let width = graph
        .node_as::<ImagePrimitiveSource<Gradient>>(node)
        .unwrap()
        .producer()
        .width;
    graph.set_value(width, 0i64).unwrap();

    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());
    assert!(view.data_window().unwrap().is_empty());
    assert!(view.channel_names().unwrap().is_empty());
    assert!(view.channel_plane("Y").unwrap().is_empty());
}

#[test]
fn test_wrong_object_is_an_error() {
    let (mut graph, image, out) = input_graph();
    graph
        .set_value(image, Arc::new(Scene) as Arc<dyn Object>)
        .unwrap();

    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());
    let err = view.data_window().unwrap_err();
    assert!(matches!(err, GraphError::Compute(_)));
    assert!(err.to_string().contains("Scene"));
}

#[test]
fn test_structural_failure_in_producer_stays_structural() {
    let mut graph = Graph::new();
    let node = graph.add_node("mistyped", |b| {
        ImagePrimitiveSource::new(b, |b| Mistyped {
            size: b.input(CellDescriptor::input("size", ValueType::Int).with_default(4i64)),
        })
    });
    let out = graph
        .node_as::<ImagePrimitiveSource<Mistyped>>(node)
        .unwrap()
        .out();

    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());
    let err = view.data_window().unwrap_err();
    assert!(err.is_structural());
    assert!(matches!(
        err,
        GraphError::TypeMismatch {
            expected: ValueType::Bool,
            found: ValueType::Int,
            ..
        }
    ));
}

// ============================================================================
// Slicing
// ============================================================================

#[test]
fn test_windows_and_channel_names() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, _, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    let window = Box2i::from_origin_size(V2i::new(0, 0), 100, 70);
    assert_eq!(view.display_window().unwrap(), window);
    assert_eq!(view.data_window().unwrap(), window);
    assert_eq!(view.channel_names().unwrap().as_ref(), ["Y"]);
    assert_eq!(
        view.tile_origins().unwrap(),
        vec![
            V2i::new(0, 0),
            V2i::new(64, 0),
            V2i::new(0, 64),
            V2i::new(64, 64)
        ]
    );
}

#[test]
fn test_partial_tile_copies_overlap_and_zero_fills() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, _, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    let origin = V2i::new(64, 64);
    let tile = view.channel_data("Y", origin).unwrap();
    assert_eq!(tile.len(), TILE_PIXELS);
    // Row-major over a 100 pixel wide window.
    assert_eq!(tile[tile_index(origin, 64, 64)], (64 * 100 + 64) as f32);
    assert_eq!(tile[tile_index(origin, 99, 69)], (69 * 100 + 99) as f32);
    assert_eq!(tile[tile_index(origin, 100, 64)], 0.0);
    assert_eq!(tile[tile_index(origin, 64, 70)], 0.0);
}

#[test]
fn test_outside_and_missing_channel_are_zero_tiles() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, _, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    let outside = view.channel_data("Y", V2i::new(256, -128)).unwrap();
    assert!(Arc::ptr_eq(&outside, &black_tile()));

    let missing = view.channel_data("Z", V2i::new(0, 0)).unwrap();
    assert!(Arc::ptr_eq(&missing, &black_tile()));
}

#[test]
fn test_unaligned_tile_request_fails() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, _, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    assert!(matches!(
        view.channel_data("Y", V2i::new(10, 0)),
        Err(GraphError::UnalignedTileOrigin { x: 10, y: 0 })
    ));
}

// ============================================================================
// Caching
// ============================================================================

#[test]
fn test_image_is_produced_once_for_all_tiles() {
    let produced = Arc::new(AtomicU32::new(0));
    let (mut graph, node, out) = gradient_graph(&produced);
    let runtime = Runtime::new();

    {
        let view = ImageView::new(&runtime, &graph, out, Context::new());
        for origin in view.tile_origins().unwrap() {
            view.channel_data("Y", origin).unwrap();
            view.channel_data("Z", origin).unwrap();
        }
        view.channel_names().unwrap();
    }
    assert_eq!(produced.load(Ordering::SeqCst), 1);

    // Requests under another frame share the image: the producer never reads the frame.
    {
        let view = ImageView::new(&runtime, &graph, out, Context::new().with(FRAME, 7.0f32));
        view.channel_data("Y", V2i::new(0, 0)).unwrap();
    }
    assert_eq!(produced.load(Ordering::SeqCst), 1);

    let height = graph
        .node_as::<ImagePrimitiveSource<Gradient>>(node)
        .unwrap()
        .producer()
        .height;
    let dirtied = graph.set_value(height, 10i64).unwrap();
    assert!(dirtied.contains(&out.channel_data));
    assert!(dirtied.contains(&out.data_window));

    let view = ImageView::new(&runtime, &graph, out, Context::new());
    assert_eq!(
        view.data_window().unwrap(),
        Box2i::from_origin_size(V2i::new(0, 0), 100, 10)
    );
    assert_eq!(produced.load(Ordering::SeqCst), 2);
}

#[test]
fn test_derived_outputs_are_not_stored_twice() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, node, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    for origin in view.tile_origins().unwrap() {
        view.channel_data("Y", origin).unwrap();
    }
    // Only the whole image is held by the value cache.
    assert_eq!(runtime.cache().len(), 1);

    let primitive = graph
        .node_as::<ImagePrimitiveSource<Gradient>>(node)
        .unwrap()
        .primitive_cell();
    let fingerprint = runtime.hash(&graph, primitive, &Context::new()).unwrap();
    assert!(runtime.cache().contains(fingerprint));
}

#[test]
fn test_channel_plane_reassembles_image() {
    let produced = Arc::new(AtomicU32::new(0));
    let (graph, _, out) = gradient_graph(&produced);
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &graph, out, Context::new());

    let plane = view.channel_plane("Y").unwrap();
    let expected: Vec<f32> = (0..100 * 70).map(|i| i as f32).collect();
    assert_eq!(plane, expected);
    assert_eq!(produced.load(Ordering::SeqCst), 1);
    assert_eq!(tile_origins(&view.data_window().unwrap()).len(), 4);
}
