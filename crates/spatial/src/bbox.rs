//! Axis-aligned bounding boxes in `D` dimensions.
//!
//! Boxes are closed on both ends: a point lying exactly on a face is inside.
//! An *empty* box has `min > max` on at least one axis and is the identity of
//! [`BoundingBox::union`].

/// Closed axis-aligned box `[min, max]` in `D` dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox<const D: usize> {
    /// Minimum corner
    pub min: [f64; D],
    /// Maximum corner
    pub max: [f64; D],
}

impl<const D: usize> BoundingBox<D> {
    /// Create a box from its corners.
    pub fn new(min: [f64; D], max: [f64; D]) -> Self {
        Self { min, max }
    }

    /// The empty box (`min = +inf`, `max = -inf`).
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; D],
            max: [f64::NEG_INFINITY; D],
        }
    }

    /// Tight box around a set of points. Empty when there are no points.
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a [f64; D]>,
    {
        let mut bbox = Self::empty();
        for p in points {
            bbox.include(p);
        }
        bbox
    }

    /// `true` if the box contains no point at all.
    pub fn is_empty(&self) -> bool {
        (0..D).any(|axis| !(self.min[axis] <= self.max[axis]))
    }

    /// Grow the box so it contains `point`.
    pub fn include(&mut self, point: &[f64; D]) {
        for axis in 0..D {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for axis in 0..D {
            out.min[axis] = self.min[axis].min(other.min[axis]);
            out.max[axis] = self.max[axis].max(other.max[axis]);
        }
        out
    }

    /// Centre of the box.
    pub fn center(&self) -> [f64; D] {
        let mut c = [0.0; D];
        for axis in 0..D {
            c[axis] = 0.5 * (self.min[axis] + self.max[axis]);
        }
        c
    }

    /// Side length along `axis` (zero for empty boxes).
    pub fn extent(&self, axis: usize) -> f64 {
        (self.max[axis] - self.min[axis]).max(0.0)
    }

    /// Longest side length.
    pub fn max_extent(&self) -> f64 {
        (0..D).map(|axis| self.extent(axis)).fold(0.0, f64::max)
    }

    /// Box grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        let mut out = *self;
        for axis in 0..D {
            out.min[axis] -= margin;
            out.max[axis] += margin;
        }
        out
    }

    /// Inclusive point containment.
    pub fn contains_point(&self, point: &[f64; D]) -> bool {
        (0..D).all(|axis| self.min[axis] <= point[axis] && point[axis] <= self.max[axis])
    }

    /// `true` if `other` lies entirely inside `self` (faces may touch).
    pub fn contains_box(&self, other: &Self) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..D).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }

    /// `true` if the two closed boxes share at least one point.
    pub fn intersects(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (0..D).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    /// Squared Euclidean distance from `point` to the box (zero inside).
    ///
    /// Returns `+inf` for an empty box.
    pub fn distance_sq_to_point(&self, point: &[f64; D]) -> f64 {
        if self.is_empty() {
            return f64::INFINITY;
        }
        let mut d2 = 0.0;
        for axis in 0..D {
            let gap = (self.min[axis] - point[axis])
                .max(point[axis] - self.max[axis])
                .max(0.0);
            d2 += gap * gap;
        }
        d2
    }

    /// Squared Euclidean distance between two boxes (zero if they touch).
    pub fn distance_sq_to_box(&self, other: &Self) -> f64 {
        if self.is_empty() || other.is_empty() {
            return f64::INFINITY;
        }
        let mut d2 = 0.0;
        for axis in 0..D {
            let gap = (other.min[axis] - self.max[axis])
                .max(self.min[axis] - other.max[axis])
                .max(0.0);
            d2 += gap * gap;
        }
        d2
    }

    /// Orthant of `point` relative to the box centre.
    ///
    /// Bit `axis` of the result is set when the coordinate is strictly greater
    /// than the centre, so points on the split plane fall in the lower child.
    pub fn orthant(&self, point: &[f64; D]) -> usize {
        let c = self.center();
        let mut index = 0usize;
        for axis in 0..D {
            if point[axis] > c[axis] {
                index |= 1 << axis;
            }
        }
        index
    }

    /// Equal-volume child box for `orthant` (see [`BoundingBox::orthant`]).
    pub fn child(&self, orthant: usize) -> Self {
        let c = self.center();
        let mut out = *self;
        for axis in 0..D {
            if orthant & (1 << axis) != 0 {
                out.min[axis] = c[axis];
            } else {
                out.max[axis] = c[axis];
            }
        }
        out
    }
}

impl<const D: usize> Default for BoundingBox<D> {
    fn default() -> Self {
        Self::empty()
    }
}
