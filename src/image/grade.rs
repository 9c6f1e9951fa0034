//! Per-channel tone grade.

use std::any::Any;
use std::sync::Arc;

use crate::cell::{CellDescriptor, CellId};
use crate::error::GraphError;
use crate::fingerprint::FingerprintHasher;
use crate::geometry::Box2i;
use crate::graph::{Graph, NodeBuilder};
use crate::image::processor::ChannelDataProcessor;
use crate::image::{
    append_tile_request, black_tile, global_context, tile_bound, tile_index, tile_request, ImageCells,
    TILE_PIXELS,
};
use crate::node::Node;
use crate::runtime::EvalContext;
use crate::value::{Value, ValueType};

/// Component of the color parameters used for a channel: `R` is 0, `G` is 1, anything else 2.
pub fn channel_component(channel: &str) -> usize {
    match channel {
        "R" => 0,
        "G" => 1,
        _ => 2,
    }
}

/// Linear coefficients and post-processing of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ChannelGrade {
    a: f32,
    b: f32,
    inv_gamma: f32,
    black_clamp: bool,
    white_clamp: bool,
}

impl ChannelGrade {
    #[inline]
    fn apply(&self, x: f32) -> f32 {
        let c = self.a * x + self.b;
        let mut value = if c >= 0.0 && self.inv_gamma != 1.0 {
            c.powf(self.inv_gamma)
        } else {
            c
        };
        if self.black_clamp && value < 0.0 {
            value = 0.0;
        }
        if self.white_clamp && value > 1.0 {
            value = 1.0;
        }
        value
    }
}

/// Grades each channel with `c = A * x + B`, then gamma, then optional clamps, where
/// `A = multiply * (gain - lift) / (whitePoint - blackPoint)` and
/// `B = offset + lift - A * blackPoint`, using the color component of the channel.
///
/// Pixels outside the input data window are zero. A channel whose gamma is not positive, or
/// whose white point equals its black point, passes the input tile through unchanged, as does
/// the whole node when `enabled` is false. An input tile of the wrong size reads as zeros.
pub struct Grade {
    processor: ChannelDataProcessor,
    black_point: CellId,
    white_point: CellId,
    lift: CellId,
    gain: CellId,
    multiply: CellId,
    offset: CellId,
    gamma: CellId,
    black_clamp: CellId,
    white_clamp: CellId,
}

impl Grade {
    /// Create the grade's cells with identity defaults and black clamping on.
    pub fn new(b: &mut NodeBuilder<'_>) -> Self {
        let processor = ChannelDataProcessor::new(b);
        let mut color = |name: &str, default: f32| {
            b.input(CellDescriptor::input(name, ValueType::Color3f).with_default([default; 3]))
        };
        let black_point = color("blackPoint", 0.0);
        let white_point = color("whitePoint", 1.0);
        let lift = color("lift", 0.0);
        let gain = color("gain", 1.0);
        let multiply = color("multiply", 1.0);
        let offset = color("offset", 0.0);
        let gamma = color("gamma", 1.0);

        let black_clamp =
            b.input(CellDescriptor::input("blackClamp", ValueType::Bool).with_default(true));
        let white_clamp =
            b.input(CellDescriptor::input("whiteClamp", ValueType::Bool).with_default(false));

        Self {
            processor,
            black_point,
            white_point,
            lift,
            gain,
            multiply,
            offset,
            gamma,
            black_clamp,
            white_clamp,
        }
    }

    /// The image input.
    pub fn input(&self) -> ImageCells {
        self.processor.input()
    }

    /// The image output.
    pub fn output(&self) -> ImageCells {
        self.processor.output()
    }

    /// The `enabled` input.
    pub fn enabled(&self) -> CellId {
        self.processor.enabled_cell()
    }

    /// `blackPoint` color input.
    pub fn black_point(&self) -> CellId {
        self.black_point
    }

    /// `whitePoint` color input.
    pub fn white_point(&self) -> CellId {
        self.white_point
    }

    /// `lift` color input.
    pub fn lift(&self) -> CellId {
        self.lift
    }

    /// `gain` color input.
    pub fn gain(&self) -> CellId {
        self.gain
    }

    /// `multiply` color input.
    pub fn multiply(&self) -> CellId {
        self.multiply
    }

    /// `offset` color input.
    pub fn offset(&self) -> CellId {
        self.offset
    }

    /// `gamma` color input.
    pub fn gamma(&self) -> CellId {
        self.gamma
    }

    /// `blackClamp` input.
    pub fn black_clamp(&self) -> CellId {
        self.black_clamp
    }

    /// `whiteClamp` input.
    pub fn white_clamp(&self) -> CellId {
        self.white_clamp
    }

    fn colors(&self) -> [CellId; 7] {
        [
            self.black_point,
            self.white_point,
            self.lift,
            self.gain,
            self.multiply,
            self.offset,
            self.gamma,
        ]
    }

    fn component(&self, ctx: &EvalContext<'_>, cell: CellId, index: usize) -> Result<f32, GraphError> {
        Ok(ctx.get::<[f32; 3]>(cell)?[index])
    }

    /// Returns true if the channel of this request is degenerate and passes through.
    fn is_degenerate(&self, ctx: &EvalContext<'_>, channel: &str) -> Result<bool, GraphError> {
        let index = channel_component(channel);
        let gamma = self.component(ctx, self.gamma, index)?;
        let black = self.component(ctx, self.black_point, index)?;
        let white = self.component(ctx, self.white_point, index)?;
        // Non-positive gamma has no defined power curve, and NaN gamma is treated the same.
        Ok(gamma.is_nan() || gamma <= 0.0 || white == black)
    }

    /// Returns true if the request leaves the input tile unchanged.
    fn forwards(&self, ctx: &EvalContext<'_>) -> Result<bool, GraphError> {
        if !self.processor.enabled(ctx)? {
            return Ok(true);
        }
        let (channel, _) = tile_request(ctx.context())?;
        self.is_degenerate(ctx, &channel)
    }

    fn channel_grade(&self, ctx: &EvalContext<'_>, channel: &str) -> Result<ChannelGrade, GraphError> {
        let index = channel_component(channel);
        let black = self.component(ctx, self.black_point, index)?;
        let white = self.component(ctx, self.white_point, index)?;
        let lift = self.component(ctx, self.lift, index)?;
        let gain = self.component(ctx, self.gain, index)?;
        let multiply = self.component(ctx, self.multiply, index)?;
        let offset = self.component(ctx, self.offset, index)?;
        let gamma = self.component(ctx, self.gamma, index)?;

        let a = multiply * (gain - lift) / (white - black);
        Ok(ChannelGrade {
            a,
            b: offset + lift - a * black,
            inv_gamma: 1.0 / gamma,
            black_clamp: ctx.get::<bool>(self.black_clamp)?,
            white_clamp: ctx.get::<bool>(self.white_clamp)?,
        })
    }
}

impl Node for Grade {
    fn type_name(&self) -> &'static str {
        "Grade"
    }

    fn affects(&self, graph: &Graph, input: CellId, outputs: &mut Vec<CellId>) {
        let affected = self.processor.affects_channel_data(graph, input)
            || input == self.processor.input().data_window
            || input == self.black_clamp
            || input == self.white_clamp
            || self.colors().iter().any(|color| graph.is_within(input, *color));
        if affected {
            outputs.push(self.processor.output().channel_data);
        }
    }

    fn pass_through(&self, output: CellId, ctx: &EvalContext<'_>) -> Result<Option<CellId>, GraphError> {
        if output != self.processor.output().channel_data {
            return Ok(None);
        }
        if !self.processor.can_forward_input(ctx.graph()) {
            return Ok(None);
        }
        if self.forwards(ctx)? {
            return Ok(Some(self.processor.input().channel_data));
        }
        Ok(None)
    }

    fn hash(
        &self,
        output: CellId,
        ctx: &EvalContext<'_>,
        hasher: &mut FingerprintHasher,
    ) -> Result<(), GraphError> {
        if output != self.processor.output().channel_data {
            return Err(GraphError::NotComputable(ctx.graph().cell_path(output)));
        }

        let input = self.processor.input();
        append_tile_request(ctx.context(), hasher)?;
        hasher
            .append_fingerprint(ctx.hash(input.channel_data)?)
            .append_fingerprint(ctx.hash_in(input.data_window, &global_context(ctx.context()))?);
        for color in self.colors() {
            hasher.append_fingerprint(ctx.hash(color)?);
        }
        hasher
            .append_fingerprint(ctx.hash(self.black_clamp)?)
            .append_fingerprint(ctx.hash(self.white_clamp)?);
        Ok(())
    }

    fn compute(&self, output: CellId, ctx: &EvalContext<'_>) -> Result<Value, GraphError> {
        if output != self.processor.output().channel_data {
            return Err(GraphError::NotComputable(ctx.graph().cell_path(output)));
        }

        let input = self.processor.input();
        let mut tile: Arc<[f32]> = ctx.get(input.channel_data)?;
        if tile.len() != TILE_PIXELS {
            tile = black_tile();
        }
        if self.forwards(ctx)? {
            return Ok(Value::FloatVector(tile));
        }

        let (channel, origin) = tile_request(ctx.context())?;
        let grade = self.channel_grade(ctx, &channel)?;
        let data_window: Box2i = ctx.get_in(input.data_window, &global_context(ctx.context()))?;

        let mut graded = vec![0.0f32; TILE_PIXELS];
        let bound = tile_bound(origin).intersect(&data_window);
        if !bound.is_empty() {
            for y in bound.min.y..=bound.max.y {
                let start = tile_index(origin, bound.min.x, y);
                let end = start + bound.width() as usize;
                for (out, x) in graded[start..end].iter_mut().zip(&tile[start..end]) {
                    *out = grade.apply(*x);
                }
            }
        }

        Ok(Value::FloatVector(Arc::from(graded)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ChannelGrade {
        ChannelGrade {
            a: 1.0,
            b: 0.0,
            inv_gamma: 1.0,
            black_clamp: false,
            white_clamp: false,
        }
    }

    #[test]
    fn test_channel_component() {
        assert_eq!(channel_component("R"), 0);
        assert_eq!(channel_component("G"), 1);
        assert_eq!(channel_component("B"), 2);
        assert_eq!(channel_component("A"), 2);
    }

    #[test]
    fn test_gamma_skips_negative_values() {
        let grade = ChannelGrade {
            inv_gamma: 0.5,
            ..identity()
        };
        assert_eq!(grade.apply(4.0), 2.0);
        assert_eq!(grade.apply(-4.0), -4.0);
    }

    #[test]
    fn test_clamps() {
        let grade = ChannelGrade {
            black_clamp: true,
            white_clamp: true,
            ..identity()
        };
        assert_eq!(grade.apply(-0.5), 0.0);
        assert_eq!(grade.apply(1.5), 1.0);
        assert_eq!(grade.apply(0.25), 0.25);
    }
}
