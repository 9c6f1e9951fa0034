//! Shared cells of tile-by-tile channel data processors.

use crate::cell::{CellDescriptor, CellId};
use crate::error::GraphError;
use crate::graph::{Graph, NodeBuilder};
use crate::image::{ImageCells, TILE_PIXELS};
use crate::runtime::EvalContext;
use crate::value::{Value, ValueType};

/// Cells shared by every node that transforms channel data tile by tile.
///
/// `out.displayWindow`, `out.dataWindow` and `out.channelNames` pass `in` through unchanged;
/// only `out.channelData` is computed by the owning node. When `enabled` is false, the
/// channel data passes through as well.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDataProcessor {
    input: ImageCells,
    output: ImageCells,
    enabled: CellId,
}

impl ChannelDataProcessor {
    /// Add `in`, `out` and `enabled` and wire the pass-through outputs.
    pub fn new(b: &mut NodeBuilder<'_>) -> Self {
        let input = ImageCells::input(b, "in");
        let output = ImageCells::output(b, "out", true);
        let enabled = b.input(CellDescriptor::input("enabled", ValueType::Bool).with_default(true));

        b.wire(input.display_window, output.display_window);
        b.wire(input.data_window, output.data_window);
        b.wire(input.channel_names, output.channel_names);

        Self {
            input,
            output,
            enabled,
        }
    }

    /// The image input.
    pub fn input(&self) -> ImageCells {
        self.input
    }

    /// The image output.
    pub fn output(&self) -> ImageCells {
        self.output
    }

    /// The `enabled` input.
    pub fn enabled_cell(&self) -> CellId {
        self.enabled
    }

    /// Returns true if a change of `input` affects `out.channelData` regardless of the
    /// owning node's parameters.
    pub fn affects_channel_data(&self, graph: &Graph, input: CellId) -> bool {
        input == self.enabled || graph.is_within(input, self.input.channel_data)
    }

    /// Returns true if `in.channelData` can be forwarded as the output tile.
    ///
    /// A tile of the wrong size set directly on an unconnected input is not forwarded; the
    /// owning node substitutes the zero tile instead.
    pub fn can_forward_input(&self, graph: &Graph) -> bool {
        let channel_data = self.input.channel_data;
        if graph.input(channel_data).is_some() {
            return true;
        }
        match graph.stored_value(channel_data) {
            Some(Value::FloatVector(tile)) => tile.len() == TILE_PIXELS,
            _ => false,
        }
    }

    /// Whether processing is enabled for this request.
    pub fn enabled(&self, ctx: &EvalContext<'_>) -> Result<bool, GraphError> {
        ctx.get::<bool>(self.enabled)
    }
}
