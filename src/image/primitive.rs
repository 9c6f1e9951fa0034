//! The whole, externally produced image consumed by the Source Adapter.

use std::any::Any;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::GraphError;
use crate::fingerprint::FingerprintHasher;
use crate::geometry::Box2i;
use crate::value::Object;

/// A whole image held in memory: windows plus one row-major float plane per channel.
///
/// Each plane covers the data window exactly, rows ordered by increasing `y`. Channel order
/// is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePrimitive {
    display_window: Box2i,
    data_window: Box2i,
    channels: IndexMap<String, Arc<[f32]>>,
}

impl ImagePrimitive {
    /// An image without channels.
    pub fn new(display_window: Box2i, data_window: Box2i) -> Self {
        Self {
            display_window,
            data_window,
            channels: IndexMap::new(),
        }
    }

    /// Add or replace a channel. The plane must have one value per data-window pixel.
    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        plane: impl Into<Arc<[f32]>>,
    ) -> Result<Self, GraphError> {
        self.insert_channel(name, plane)?;
        Ok(self)
    }

    /// Add or replace a channel in place.
    pub fn insert_channel(
        &mut self,
        name: impl Into<String>,
        plane: impl Into<Arc<[f32]>>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        let plane = plane.into();
        if plane.len() != self.data_window.area() {
            return Err(GraphError::InvalidPrimitive(format!(
                "channel `{}` has {} values, data window holds {}",
                name,
                plane.len(),
                self.data_window.area()
            )));
        }
        self.channels.insert(name, plane);
        Ok(())
    }

    /// Nominal full-frame bounds.
    pub fn display_window(&self) -> Box2i {
        self.display_window
    }

    /// Bounds of the stored pixels.
    pub fn data_window(&self) -> Box2i {
        self.data_window
    }

    /// Channel names in order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Plane of one channel.
    pub fn channel(&self, name: &str) -> Option<&Arc<[f32]>> {
        self.channels.get(name)
    }
}

impl Object for ImagePrimitive {
    fn type_name(&self) -> &'static str {
        "ImagePrimitive"
    }

    fn hash_into(&self, hasher: &mut FingerprintHasher) {
        for window in [self.display_window, self.data_window] {
            hasher
                .append_i32(window.min.x)
                .append_i32(window.min.y)
                .append_i32(window.max.x)
                .append_i32(window.max.y);
        }
        hasher.append_u64(self.channels.len() as u64);
        for (name, plane) in &self.channels {
            hasher.append_str(name).append_floats(plane);
        }
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .channels
                .iter()
                .map(|(name, plane)| name.len() + plane.len() * std::mem::size_of::<f32>())
                .sum::<usize>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::V2i;

    #[test]
    fn test_rejects_mismatched_plane() {
        let window = Box2i::from_origin_size(V2i::new(0, 0), 4, 4);
        let result = ImagePrimitive::new(window, window).with_channel("R", vec![0.0f32; 15]);
        assert!(matches!(result, Err(GraphError::InvalidPrimitive(_))));
    }

    #[test]
    fn test_channel_order_is_insertion_order() {
        let window = Box2i::from_origin_size(V2i::new(0, 0), 1, 1);
        let image = ImagePrimitive::new(window, window)
            .with_channel("R", vec![1.0f32])
            .and_then(|image| image.with_channel("A", vec![0.5f32]))
            .and_then(|image| image.with_channel("G", vec![0.0f32]))
            .unwrap();
        assert_eq!(image.channel_names().collect::<Vec<_>>(), ["R", "A", "G"]);
    }
}
