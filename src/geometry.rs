//! Integer vectors and rectangles used for image bounds and tile addressing.

/// Integer 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct V2i {
    /// Horizontal component.
    pub x: i32,
    /// Vertical component.
    pub y: i32,
}

impl V2i {
    /// Create a vector.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Integer rectangle with inclusive `min` and `max` corners.
///
/// A box whose `max` is below its `min` on either axis is empty. [`Box2i::EMPTY`] is the
/// canonical empty box, and every operation returning an empty result returns that value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Box2i {
    /// Lower-left corner, inclusive.
    pub min: V2i,
    /// Upper-right corner, inclusive.
    pub max: V2i,
}

impl Default for Box2i {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Box2i {
    /// The canonical empty rectangle.
    pub const EMPTY: Box2i = Box2i {
        min: V2i::new(i32::MAX, i32::MAX),
        max: V2i::new(i32::MIN, i32::MIN),
    };

    /// Create a box from inclusive corners.
    pub const fn new(min: V2i, max: V2i) -> Self {
        Self { min, max }
    }

    /// Create a box from an origin and a size. A non-positive size gives the empty box.
    pub fn from_origin_size(origin: V2i, width: i32, height: i32) -> Self {
        if width <= 0 || height <= 0 {
            return Self::EMPTY;
        }
        Self::new(
            origin,
            V2i::new(origin.x + width - 1, origin.y + height - 1),
        )
    }

    /// Returns true if the box contains no pixel.
    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y
    }

    /// Pixel count along x. Widened so a box spanning the whole `i32` range fits.
    pub fn width(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.max.x) - i64::from(self.min.x) + 1
        }
    }

    /// Pixel count along y.
    pub fn height(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.max.y) - i64::from(self.min.y) + 1
        }
    }

    /// Total pixel count, saturating at `usize::MAX`.
    pub fn area(&self) -> usize {
        let area = (self.width() as u64).saturating_mul(self.height() as u64);
        usize::try_from(area).unwrap_or(usize::MAX)
    }

    /// Returns true if `p` lies inside the box.
    pub fn contains(&self, p: V2i) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Overlap of two boxes, or [`Box2i::EMPTY`].
    pub fn intersect(&self, other: &Box2i) -> Box2i {
        let result = Box2i::new(
            V2i::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            V2i::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        );
        if result.is_empty() {
            Box2i::EMPTY
        } else {
            result
        }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Box2i) -> Box2i {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Box2i::new(
            V2i::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            V2i::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        )
    }
}
