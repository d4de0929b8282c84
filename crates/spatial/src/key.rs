//! Morton (Z-order) space-filling-curve keys.
//!
//! A key interleaves `depth` bits per axis. Within one level the bit of axis 0
//! is the most significant, so sorting keys numerically walks the Z-curve and
//! every key prefix names an octree cell. Keys are a pure function of the
//! position, the domain box and the depth; every rank that agrees on the
//! domain produces the same key for the same position.

use std::fmt;

use crate::bbox::BoundingBox;

/// Number of usable key bits. One bit is kept free so `1 << depth` never
/// overflows for `D = 1`.
pub const KEY_BITS: u32 = 63;

/// Position on the Morton curve at a fixed depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SpatialKey(u64);

impl SpatialKey {
    /// Smallest key.
    pub const MIN: SpatialKey = SpatialKey(0);

    /// Wrap a raw key value.
    pub fn from_raw(raw: u64) -> Self {
        SpatialKey(raw)
    }

    /// Raw key value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Deepest level that still fits into [`KEY_BITS`] for `dimension` axes.
    pub fn max_depth_for(dimension: usize) -> u32 {
        KEY_BITS / dimension.max(1) as u32
    }

    /// Encode `position` inside `domain` at `depth` bits per axis.
    ///
    /// Positions outside the domain (rounding, stale ranges) are clamped to
    /// the nearest boundary cell. Degenerate axes and NaN map to cell 0.
    /// A `depth` beyond [`SpatialKey::max_depth_for`] is clamped to it, here
    /// and in every other method taking a depth.
    pub fn encode<const D: usize>(position: &[f64; D], domain: &BoundingBox<D>, depth: u32) -> Self {
        let depth = clamp_depth::<D>(depth);
        let cells = grid_coordinates(position, domain, depth);
        let mut key = 0u64;
        for level in (0..depth).rev() {
            for axis in 0..D {
                key = (key << 1) | ((cells[axis] >> level) & 1);
            }
        }
        SpatialKey(key)
    }

    /// Integer grid cell of this key, one coordinate per axis.
    pub fn cell_coordinates<const D: usize>(self, depth: u32) -> [u64; D] {
        let depth = clamp_depth::<D>(depth);
        let mut cells = [0u64; D];
        let mut bit = 0u32;
        for level in 0..depth {
            for axis in (0..D).rev() {
                cells[axis] |= ((self.0 >> bit) & 1) << level;
                bit += 1;
            }
        }
        cells
    }

    /// Grid cell of this key in physical coordinates.
    pub fn decode_cell<const D: usize>(self, domain: &BoundingBox<D>, depth: u32) -> BoundingBox<D> {
        let depth = clamp_depth::<D>(depth);
        let cells = self.cell_coordinates::<D>(depth);
        let per_axis = (1u64 << depth) as f64;
        let mut out = BoundingBox::new(domain.min, domain.min);
        for axis in 0..D {
            let width = domain.extent(axis) / per_axis;
            out.min[axis] = domain.min[axis] + cells[axis] as f64 * width;
            out.max[axis] = out.min[axis] + width;
        }
        out
    }

    /// Key of the ancestor cell at `level`, clamped to `depth`.
    pub fn ancestor<const D: usize>(self, depth: u32, level: u32) -> Self {
        let depth = clamp_depth::<D>(depth);
        let level = level.min(depth);
        let shift = (depth - level) * D as u32;
        if shift >= 64 {
            SpatialKey(0)
        } else {
            SpatialKey(self.0 >> shift)
        }
    }

    /// Display adapter printing a leading `1` then one base-`2^D` digit per
    /// level, root first.
    pub fn display<const D: usize>(self, depth: u32) -> KeyDisplay<D> {
        KeyDisplay {
            key: self,
            depth: clamp_depth::<D>(depth),
        }
    }
}

/// See [`SpatialKey::display`].
pub struct KeyDisplay<const D: usize> {
    key: SpatialKey,
    depth: u32,
}

impl<const D: usize> fmt::Display for KeyDisplay<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1")?;
        let mask = (1u64 << D) - 1;
        for level in (0..self.depth).rev() {
            let digit = (self.key.0 >> (level * D as u32)) & mask;
            write!(f, "{digit:x}")?;
        }
        Ok(())
    }
}

fn clamp_depth<const D: usize>(depth: u32) -> u32 {
    depth.min(SpatialKey::max_depth_for(D))
}

/// Clamped integer grid coordinates of `position` at `depth`.
fn grid_coordinates<const D: usize>(position: &[f64; D], domain: &BoundingBox<D>, depth: u32) -> [u64; D] {
    let cells = 1u64 << depth;
    let scale = cells as f64;
    let mut out = [0u64; D];
    for axis in 0..D {
        let extent = domain.max[axis] - domain.min[axis];
        if !(extent > 0.0) || !extent.is_finite() {
            continue;
        }
        let t = (position[axis] - domain.min[axis]) / extent * scale;
        out[axis] = if t.is_nan() || t <= 0.0 {
            0
        } else if t >= scale {
            cells - 1
        } else {
            (t.floor() as u64).min(cells - 1)
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn unit_cube() -> BoundingBox<3> {
        BoundingBox::new([0.0; 3], [1.0; 3])
    }

    #[test]
    fn encode_is_deterministic() {
        let domain = unit_cube();
        let p = [0.3, 0.71, 0.05];
        let a = SpatialKey::encode(&p, &domain, 16);
        let b = SpatialKey::encode(&p, &domain, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn first_level_orders_axis_zero_first() {
        let domain = unit_cube();
        let low = SpatialKey::encode(&[0.25, 0.9, 0.9], &domain, 1);
        let high = SpatialKey::encode(&[0.75, 0.1, 0.1], &domain, 1);
        assert_eq!(low.raw(), 0b011);
        assert_eq!(high.raw(), 0b100);
        assert!(low < high);
    }

    #[test]
    fn out_of_range_positions_are_clamped() {
        let domain = unit_cube();
        let depth = 10;
        let below = SpatialKey::encode(&[-5.0, -1.0, -0.1], &domain, depth);
        let above = SpatialKey::encode(&[5.0, 1.0 + 1e-12, 2.0], &domain, depth);
        assert_eq!(below, SpatialKey::MIN);
        assert_eq!(above.cell_coordinates::<3>(depth), [1023, 1023, 1023]);
        let nan = SpatialKey::encode(&[f64::NAN, 0.0, 0.0], &domain, depth);
        assert_eq!(nan, SpatialKey::MIN);
    }

    #[test]
    fn degenerate_domain_maps_to_zero() {
        let domain = BoundingBox::new([1.0; 2], [1.0; 2]);
        assert_eq!(SpatialKey::encode(&[1.0, 1.0], &domain, 8), SpatialKey::MIN);
    }

    #[test]
    fn decoded_cell_contains_position() {
        let domain = BoundingBox::new([-2.0, 0.0, 10.0], [3.0, 0.5, 12.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for depth in [1, 5, 12, 21] {
            for _ in 0..200 {
                let mut p = [0.0; 3];
                for axis in 0..3 {
                    p[axis] = rng.gen_range(domain.min[axis]..domain.max[axis]);
                }
                let key = SpatialKey::encode(&p, &domain, depth);
                let cell = key.decode_cell(&domain, depth);
                assert!(
                    cell.expanded(1e-9).contains_point(&p),
                    "depth {depth}: cell {cell:?} does not contain {p:?}"
                );
            }
        }
    }

    #[test]
    fn ancestor_is_prefix() {
        let domain = unit_cube();
        let p = [0.9, 0.1, 0.6];
        let deep = SpatialKey::encode(&p, &domain, 12);
        let shallow = SpatialKey::encode(&p, &domain, 4);
        assert_eq!(deep.ancestor::<3>(12, 4), shallow);
        assert_eq!(deep.ancestor::<3>(12, 0), SpatialKey::MIN);
    }

    #[test]
    fn display_prints_one_digit_per_level() {
        let domain = unit_cube();
        let key = SpatialKey::encode(&[0.75, 0.1, 0.1], &domain, 2);
        assert_eq!(key.display::<3>(2).to_string(), "144");
    }

    #[test]
    fn depth_beyond_bit_budget_is_clamped() {
        let domain = unit_cube();
        let p = [0.3, 0.8, 0.55];
        let deepest = SpatialKey::encode(&p, &domain, 21);
        let too_deep = SpatialKey::encode(&p, &domain, 64);
        assert_eq!(too_deep, deepest);
        assert_eq!(too_deep.decode_cell(&domain, 100), deepest.decode_cell(&domain, 21));
        assert_eq!(too_deep.ancestor::<3>(80, 70), deepest);
        assert_eq!(too_deep.display::<3>(99).to_string().len(), 22);

        let line = BoundingBox::new([0.0], [1.0]);
        let key = SpatialKey::encode(&[1.0], &line, 200);
        assert_eq!(key.cell_coordinates::<1>(200), [(1u64 << 63) - 1]);
    }

    #[test]
    fn max_depth_fits_bit_budget() {
        assert_eq!(SpatialKey::max_depth_for(3), 21);
        assert_eq!(SpatialKey::max_depth_for(2), 31);
        assert_eq!(SpatialKey::max_depth_for(1), 63);
    }
}
