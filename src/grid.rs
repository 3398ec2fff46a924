// ============================================================================
// GRID MATH — pixel rectangles and grid division helpers (pure, no I/O)
// ============================================================================

/// An axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl PixelRect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.w as usize * self.h as usize
    }

    /// Bytes needed to hold this rectangle at `pixel_size` bytes per pixel.
    #[inline]
    pub fn byte_len(&self, pixel_size: usize) -> usize {
        self.area() * pixel_size
    }

    #[inline]
    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 > x0 && y1 > y0 {
            Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
        } else {
            None
        }
    }

    /// Smallest rectangle covering both. Empty rectangles are ignored.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        PixelRect::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// The parts of `self` not covered by `hole`, as up to four disjoint bands
    /// (full-width top and bottom, then left and right of the hole).
    pub fn subtract(&self, hole: &PixelRect) -> Vec<PixelRect> {
        let Some(inner) = self.intersect(hole) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };
        let mut bands = Vec::with_capacity(4);
        if inner.y > self.y {
            bands.push(PixelRect::new(self.x, self.y, self.w, inner.y - self.y));
        }
        if inner.bottom() < self.bottom() {
            bands.push(PixelRect::new(self.x, inner.bottom(), self.w, self.bottom() - inner.bottom()));
        }
        if inner.x > self.x {
            bands.push(PixelRect::new(self.x, inner.y, inner.x - self.x, inner.h));
        }
        if inner.right() < self.right() {
            bands.push(PixelRect::new(inner.right(), inner.y, self.right() - inner.right(), inner.h));
        }
        bands
    }
}

/// Number of divisions per axis so that no cell exceeds `max_resolution`
/// pixels along its longest edge. Always a power of two.
///
/// Overlapping cells carry the shared border pixel, so they are measured as
/// `ceil((n - 1) / D) + 1` pixels.
pub fn compute_divisions(width: u32, height: u32, max_resolution: u32, overlap: bool) -> u32 {
    let longest = width.max(height).max(1);
    let limit = max_resolution.max(1);
    let widest = |d: u32| {
        if overlap {
            (longest - 1).div_ceil(d) + 1
        } else {
            longest.div_ceil(d)
        }
    };
    let mut divisions = 1u32;
    while widest(divisions) > limit && divisions < longest {
        divisions *= 2;
    }
    divisions
}

/// Start and length of cell `c` along an axis of `len` pixels split `divisions` ways.
///
/// Without overlap the edges round to nearest, so cells tile the axis exactly.
/// With overlap every cell ends on the first pixel of its neighbour.
pub fn cell_span(len: u32, divisions: u32, c: u32, overlap: bool) -> (u32, u32) {
    let d = divisions.max(1) as u64;
    let c = c as u64;
    if overlap {
        if len < 2 {
            return (0, len);
        }
        let inner = (len - 1) as u64;
        let start = c * inner / d;
        let end = (c + 1) * inner / d;
        (start as u32, (end - start + 1) as u32)
    } else {
        let len = len as u64;
        let start = (2 * c * len + d) / (2 * d);
        let end = (2 * (c + 1) * len + d) / (2 * d);
        (start as u32, (end - start) as u32)
    }
}

/// Pixel rectangle of grid cell (cx, cy).
pub fn cell_rect(width: u32, height: u32, divisions: u32, cx: u32, cy: u32, overlap: bool) -> PixelRect {
    let (x, w) = cell_span(width, divisions, cx, overlap);
    let (y, h) = cell_span(height, divisions, cy, overlap);
    PixelRect::new(x, y, w, h)
}

/// Map a cell index on a grid of `divisions` onto a grid of `other` divisions.
///
/// Both counts are powers of two, so a coarser grid receives `cell / ratio`
/// and a finer grid the first of its covering cells.
#[inline]
pub fn map_cell(divisions: u32, cell: u32, other: u32) -> u32 {
    (cell as u64 * other as u64 / divisions.max(1) as u64) as u32
}

/// Copy the `region` part of `src` (laid out as `src_rect`) into `dst`
/// (laid out as `dst_rect`). `region` must lie inside both layouts.
pub fn blit(src: &[u8], src_rect: &PixelRect, dst: &mut [u8], dst_rect: &PixelRect, region: &PixelRect, pixel_size: usize) {
    let row_bytes = region.w as usize * pixel_size;
    for row in 0..region.h {
        let y = region.y + row;
        let s = ((y - src_rect.y) as usize * src_rect.w as usize + (region.x - src_rect.x) as usize) * pixel_size;
        let d = ((y - dst_rect.y) as usize * dst_rect.w as usize + (region.x - dst_rect.x) as usize) * pixel_size;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

/// Block coordinates of every `block_size` block touching `rect`.
pub fn blocks_covering(rect: &PixelRect, block_size: u32) -> impl Iterator<Item = (u32, u32)> {
    let bs = block_size.max(1);
    let (bx0, by0) = (rect.x / bs, rect.y / bs);
    let (bx1, by1) = if rect.is_empty() {
        (bx0, by0)
    } else {
        ((rect.right() - 1) / bs + 1, (rect.bottom() - 1) / bs + 1)
    };
    (by0..by1).flat_map(move |by| (bx0..bx1).map(move |bx| (bx, by)))
}

/// Rectangle of block (bx, by), clipped to the raster.
pub fn block_rect(bx: u32, by: u32, block_size: u32, width: u32, height: u32) -> PixelRect {
    let x = bx * block_size;
    let y = by * block_size;
    PixelRect::new(
        x,
        y,
        block_size.min(width.saturating_sub(x)),
        block_size.min(height.saturating_sub(y)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisions_halve_until_cells_fit() {
        assert_eq!(compute_divisions(256, 256, 64, false), 4);
        assert_eq!(compute_divisions(256, 256, 256, false), 1);
        assert_eq!(compute_divisions(1025, 513, 256, false), 8);
        assert_eq!(compute_divisions(300, 100, 64, false), 8);
    }

    #[test]
    fn overlap_cells_respect_the_ceiling() {
        // 256 pixels in four overlapping cells would need 65-pixel cells.
        assert_eq!(compute_divisions(256, 256, 64, true), 8);
        assert_eq!(compute_divisions(257, 257, 65, true), 4);
        assert_eq!(compute_divisions(256, 256, 256, true), 1);

        for len in [2u32, 64, 65, 100, 256, 257, 1000, 1024, 4097] {
            for limit in [2u32, 16, 33, 64, 65, 128, 256, 512] {
                let d = compute_divisions(len, len, limit, true);
                assert!(d.is_power_of_two());
                let widths: Vec<u32> = (0..d).map(|c| cell_span(len, d, c, true).1).collect();
                assert!(
                    widths.iter().all(|&w| w <= limit),
                    "{} px / {} divisions over ceiling {}: {:?}",
                    len,
                    d,
                    limit,
                    widths
                );
                if d > 1 {
                    // The next coarser grid would not have fitted.
                    let coarser = d / 2;
                    assert!((0..coarser).any(|c| cell_span(len, coarser, c, true).1 > limit));
                }
                for c in 0..d - 1 {
                    let (start, size) = cell_span(len, d, c, true);
                    let (next, _) = cell_span(len, d, c + 1, true);
                    assert_eq!(start + size - 1, next, "{} px / {} divisions", len, d);
                }
                let (start, size) = cell_span(len, d, d - 1, true);
                assert_eq!(start + size, len);
            }
        }
    }

    #[test]
    fn non_overlap_cells_tile_exactly() {
        assert_eq!(cell_rect(256, 256, 4, 0, 0, false), PixelRect::new(0, 0, 64, 64));
        for len in [7u32, 100, 255, 256, 1000] {
            let mut next = 0;
            for c in 0..4 {
                let (start, size) = cell_span(len, 4, c, false);
                assert_eq!(start, next);
                next = start + size;
            }
            assert_eq!(next, len);
        }
    }

    #[test]
    fn overlap_cells_share_one_column() {
        for len in [129u32, 200, 256, 1000] {
            for c in 0..3 {
                let a = cell_rect(len, len, 4, c, 0, true);
                let b = cell_rect(len, len, 4, c + 1, 0, true);
                assert_eq!(a.right() - 1, b.x);
            }
            let last = cell_rect(len, len, 4, 3, 3, true);
            assert_eq!(last.right(), len);
        }
    }

    #[test]
    fn coarse_mapping_shares_cells() {
        assert_eq!(map_cell(4, 3, 2), 1);
        assert_eq!(map_cell(4, 2, 2), 1);
        assert_eq!(map_cell(4, 1, 2), 0);
        assert_eq!(map_cell(4, 3, 4), 3);
        assert_eq!(map_cell(8, 7, 1), 0);
    }

    #[test]
    fn subtract_produces_disjoint_cover() {
        let outer = PixelRect::new(0, 0, 10, 10);
        let hole = PixelRect::new(3, 4, 4, 2);
        let bands = outer.subtract(&hole);
        let total: usize = bands.iter().map(|b| b.area()).sum();
        assert_eq!(total, 100 - 8);
        for (i, a) in bands.iter().enumerate() {
            assert!(a.intersect(&hole).is_none());
            for b in &bands[i + 1..] {
                assert!(a.intersect(b).is_none());
            }
        }
        assert_eq!(outer.subtract(&PixelRect::new(20, 20, 5, 5)), vec![outer]);
        assert!(hole.subtract(&outer).is_empty());
    }

    #[test]
    fn blocks_cover_rect_edges() {
        let blocks: Vec<_> = blocks_covering(&PixelRect::new(60, 0, 10, 1), 64).collect();
        assert_eq!(blocks, vec![(0, 0), (1, 0)]);
        assert_eq!(blocks_covering(&PixelRect::new(5, 5, 0, 3), 64).count(), 0);
        assert_eq!(block_rect(1, 1, 64, 100, 70), PixelRect::new(64, 64, 36, 6));
    }

    #[test]
    fn union_ignores_empty() {
        let a = PixelRect::new(2, 2, 3, 3);
        assert_eq!(PixelRect::default().union(&a), a);
        assert_eq!(a.union(&PixelRect::new(10, 0, 1, 1)), PixelRect::new(2, 0, 9, 5));
    }
}
