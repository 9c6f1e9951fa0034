//! Containers and promotion.

use std::sync::Arc;

use plug_flow::image::grade::Grade;
use plug_flow::image::primitive::ImagePrimitive;
use plug_flow::image::source::{ImagePrimitiveSource, PrimitiveInput};
use plug_flow::image::{ImageCells, ImageView};
use plug_flow::*;

struct Boxed {
    graph: Graph,
    container: NodeId,
    grade: NodeId,
    source_out: ImageCells,
}

/// A source feeding a grade that lives inside a container.
fn boxed_grade() -> Boxed {
    let mut graph = Graph::new();
    let source = graph.add_node("source", |b| ImagePrimitiveSource::new(b, PrimitiveInput::new));
    let container = graph.add_node("box", |_| SubGraph::new());
    let grade = graph.add_node_in(container, "grade", Grade::new).unwrap();

    let (image, source_out) = {
        let source = graph
            .node_as::<ImagePrimitiveSource<PrimitiveInput>>(source)
            .unwrap();
        (source.producer().image(), source.out())
    };
    let window = Box2i::from_origin_size(V2i::new(0, 0), 2, 2);
    let primitive = ImagePrimitive::new(window, window)
        .with_channel("R", vec![0.5f32; 4])
        .unwrap();
    graph
        .set_value(image, Arc::new(primitive) as Arc<dyn Object>)
        .unwrap();

    Boxed {
        graph,
        container,
        grade,
        source_out,
    }
}

impl Boxed {
    fn grade(&self) -> &Grade {
        self.graph.node_as::<Grade>(self.grade).unwrap()
    }
}

#[test]
fn test_child_nodes_and_paths() {
    let boxed = boxed_grade();
    let graph = &boxed.graph;
    assert_eq!(graph.node_parent(boxed.grade), Some(boxed.container));
    assert_eq!(graph.node_children(boxed.container), &[boxed.grade]);
    assert_eq!(graph.node_path(boxed.grade), "box.grade");
    assert_eq!(
        graph.cell_path(boxed.grade().gain()),
        "box.grade.gain"
    );
    assert!(graph.find_node("grade").is_none());
}

#[test]
fn test_promote_input_drives_internal_cell() {
    let mut boxed = boxed_grade();
    let gain = boxed.grade().gain();
    boxed.graph.set_value(gain, [2.0f32; 3]).unwrap();

    assert!(boxed.graph.can_promote(gain));
    let promoted = boxed.graph.promote(gain).unwrap();
    assert!(boxed.graph.is_promoted(gain));
    assert!(!boxed.graph.can_promote(gain));
    assert_eq!(boxed.graph.cell_node(promoted).unwrap(), boxed.container);
    assert_eq!(boxed.graph.cell_path(promoted), "box.gain");
    assert!(boxed.graph.descriptor(promoted).unwrap().is_dynamic());

    // The promoted input starts with the internal value.
    assert_eq!(
        boxed.graph.stored_value(boxed.graph.child(promoted, "r").unwrap()),
        Some(&Value::Float(2.0))
    );

    // The internal input now reads from the container.
    assert!(matches!(
        boxed.graph.set_value(gain, [1.0f32; 3]),
        Err(GraphError::NotSettable(_))
    ));
    let dirtied = boxed.graph.set_value(promoted, [3.0f32; 3]).unwrap();
    assert!(dirtied.contains(&boxed.grade().output().channel_data));

    let grade_in = boxed.grade().input();
    boxed
        .graph
        .connect(boxed.source_out.root, grade_in.root)
        .unwrap();
    let runtime = Runtime::new();
    let view = ImageView::new(&runtime, &boxed.graph, boxed.grade().output(), Context::new());
    assert_eq!(view.channel_data("R", V2i::new(0, 0)).unwrap()[0], 1.5);
}

#[test]
fn test_promoted_names_are_unique() {
    let mut boxed = boxed_grade();
    let container = boxed.container;
    let other = boxed
        .graph
        .add_node_in(container, "grade2", Grade::new)
        .unwrap();
    let first = boxed.grade().gain();
    let second = boxed.graph.node_as::<Grade>(other).unwrap().gain();

    let a = boxed.graph.promote(first).unwrap();
    let b = boxed.graph.promote(second).unwrap();
    assert_eq!(boxed.graph.descriptor(a).unwrap().name(), "gain");
    assert_eq!(boxed.graph.descriptor(b).unwrap().name(), "gain1");
}

#[test]
fn test_unpromote_input_keeps_value() {
    let mut boxed = boxed_grade();
    let gain = boxed.grade().gain();
    let promoted = boxed.graph.promote(gain).unwrap();
    boxed.graph.set_value(promoted, [4.0f32; 3]).unwrap();

    boxed.graph.unpromote(gain).unwrap();
    assert!(!boxed.graph.is_promoted(gain));
    assert!(!boxed.graph.contains_cell(promoted));
    assert_eq!(boxed.graph.input(gain), None);

    let runtime = Runtime::new();
    assert_eq!(
        runtime
            .get::<[f32; 3]>(&boxed.graph, gain, &Context::new())
            .unwrap(),
        [4.0; 3]
    );
}

#[test]
fn test_promote_output_passes_through() {
    let mut boxed = boxed_grade();
    let grade_in = boxed.grade().input();
    boxed
        .graph
        .connect(boxed.source_out.root, grade_in.root)
        .unwrap();

    let out = boxed.grade().output();
    let promoted = boxed.graph.promote(out.root).unwrap();
    assert!(boxed.graph.is_promoted(out.root));
    let promoted = ImageCells::from_root(&boxed.graph, promoted).unwrap();

    let runtime = Runtime::new();
    let inner = ImageView::new(&runtime, &boxed.graph, out, Context::new());
    let outer = ImageView::new(&runtime, &boxed.graph, promoted, Context::new());
    assert_eq!(
        outer.channel_data_hash("R", V2i::new(0, 0)).unwrap(),
        inner.channel_data_hash("R", V2i::new(0, 0)).unwrap()
    );
    assert_eq!(outer.data_window().unwrap(), inner.data_window().unwrap());

    boxed.graph.unpromote(out.root).unwrap();
    assert!(!boxed.graph.is_promoted(out.root));
    assert!(!boxed.graph.contains_cell(promoted.channel_data));
}

#[test]
fn test_cannot_promote_outside_container() {
    let mut boxed = boxed_grade();
    let source_out = boxed.source_out.root;
    assert!(!boxed.graph.can_promote(source_out));
    assert!(matches!(
        boxed.graph.promote(source_out),
        Err(GraphError::CannotPromote(_))
    ));

    // Children of compound cells are promoted with their parent only.
    let red_gain = boxed.graph.child(boxed.grade().gain(), "r").unwrap();
    assert!(!boxed.graph.can_promote(red_gain));
    assert!(matches!(
        boxed.graph.unpromote(red_gain),
        Err(GraphError::CannotPromote(_))
    ));
}

#[test]
fn test_removing_container_removes_children() {
    let mut boxed = boxed_grade();
    let gain = boxed.grade().gain();
    boxed.graph.promote(gain).unwrap();
    let before = boxed.graph.node_count();

    boxed.graph.remove_node(boxed.container).unwrap();
    assert_eq!(boxed.graph.node_count(), before - 2);
    assert!(!boxed.graph.contains_node(boxed.grade));
    assert!(!boxed.graph.contains_cell(gain));
}
