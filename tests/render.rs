//! Task nodes: execute contract, task hashing and renderer failures.

use std::any::Any;
use std::sync::{Arc, Mutex};

use plug_flow::*;

#[derive(Debug)]
struct Scene(&'static str);

impl Object for Scene {
    fn type_name(&self) -> &'static str {
        "Scene"
    }

    fn hash_into(&self, hasher: &mut FingerprintHasher) {
        hasher.append_str(self.0);
    }

    fn memory_usage(&self) -> usize {
        self.0.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Records every render as (scene name, frame).
#[derive(Default)]
struct RecordingRenderer {
    renders: Mutex<Vec<(String, f32)>>,
    fail: bool,
}

impl Renderer for RecordingRenderer {
    fn name(&self) -> &str {
        "recording"
    }

    fn render(&self, scene: &Arc<dyn Object>, context: &Context) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("license unavailable");
        }
        let scene = downcast_object::<Scene>(scene).ok_or_else(|| anyhow::anyhow!("not a scene"))?;
        self.renders
            .lock()
            .unwrap()
            .push((scene.0.to_string(), context.frame()));
        Ok(())
    }
}

fn render_graph(renderer: Arc<RecordingRenderer>) -> (Graph, NodeId, CellId, CellId) {
    let mut graph = Graph::new();
    let node = graph.add_node("render", |b| ExecutableRender::new(b, renderer));
    let render = graph.node_as::<ExecutableRender>(node).unwrap();
    let (input, output) = (render.input(), render.output());
    (graph, node, input, output)
}

// ============================================================================
// Execute
// ============================================================================

#[test]
fn test_execute_renders_scene_every_time() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (mut graph, node, input, _) = render_graph(renderer.clone());
    graph
        .set_value(input, Arc::new(Scene("garden")) as Arc<dyn Object>)
        .unwrap();

    let runtime = Runtime::new();
    let frame3 = Context::new().with(FRAME, 3.0f32);
    runtime.execute(&graph, node, &frame3).unwrap();
    runtime.execute(&graph, node, &frame3).unwrap();

    let renders = renderer.renders.lock().unwrap();
    assert_eq!(
        *renders,
        vec![("garden".to_string(), 3.0), ("garden".to_string(), 3.0)]
    );
}

#[test]
fn test_absent_scene_is_a_no_op() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (graph, node, _, _) = render_graph(renderer.clone());

    let runtime = Runtime::new();
    let context = Context::new();
    runtime.execute(&graph, node, &context).unwrap();
    assert!(renderer.renders.lock().unwrap().is_empty());
    assert!(runtime.task_hash(&graph, node, &context).unwrap().is_default());
}

#[test]
fn test_renderer_failure_is_reported() {
    let renderer = Arc::new(RecordingRenderer {
        fail: true,
        ..Default::default()
    });
    let (mut graph, node, input, _) = render_graph(renderer);
    graph
        .set_value(input, Arc::new(Scene("garden")) as Arc<dyn Object>)
        .unwrap();

    let runtime = Runtime::new();
    match runtime.execute(&graph, node, &Context::new()) {
        Err(ExecuteError::Renderer { renderer, source }) => {
            assert_eq!(renderer, "recording");
            assert_eq!(source.to_string(), "license unavailable");
        }
        other => panic!("expected a renderer error, got {other:?}"),
    }
    // Nothing was stored on behalf of the task.
    assert!(runtime.cache().is_empty());
}

#[test]
fn test_execute_requires_a_task() {
    let mut graph = Graph::new();
    let container = graph.add_node("box", |_| SubGraph::new());

    let runtime = Runtime::new();
    assert!(matches!(
        runtime.execute(&graph, container, &Context::new()),
        Err(ExecuteError::NotATask(name)) if name == "box"
    ));
    assert!(!plug_flow::task::is_task(&graph, container));
}

// ============================================================================
// Hashing
// ============================================================================

#[test]
fn test_task_hash_follows_frame_and_scene() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (mut graph, node, input, _) = render_graph(renderer);
    graph
        .set_value(input, Arc::new(Scene("garden")) as Arc<dyn Object>)
        .unwrap();

    let runtime = Runtime::new();
    let frame1 = Context::new();
    let frame2 = Context::new().with(FRAME, 2.0f32);
    let garden1 = runtime.task_hash(&graph, node, &frame1).unwrap();
    assert!(!garden1.is_default());
    assert_eq!(garden1, runtime.task_hash(&graph, node, &frame1).unwrap());
    assert_ne!(garden1, runtime.task_hash(&graph, node, &frame2).unwrap());

    graph
        .set_value(input, Arc::new(Scene("desert")) as Arc<dyn Object>)
        .unwrap();
    assert_ne!(garden1, runtime.task_hash(&graph, node, &frame1).unwrap());
}

#[test]
fn test_pass_through_is_independent_of_execute() {
    let renderer = Arc::new(RecordingRenderer::default());
    let (mut graph, node, input, output) = render_graph(renderer);
    let scene: Arc<dyn Object> = Arc::new(Scene("garden"));
    graph.set_value(input, scene.clone()).unwrap();

    let runtime = Runtime::new();
    let context = Context::new();
    let before = runtime.hash(&graph, output, &context).unwrap();
    assert_eq!(before, runtime.hash(&graph, input, &context).unwrap());

    runtime.execute(&graph, node, &context).unwrap();
    assert_eq!(before, runtime.hash(&graph, output, &context).unwrap());

    let passed: Option<Arc<dyn Object>> = runtime.get(&graph, output, &context).unwrap();
    assert!(Arc::ptr_eq(&passed.unwrap(), &scene));
}
