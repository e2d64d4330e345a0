use log::debug;

/// Pixel rectangle of one block, clipped to the raster extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBounds {
    pub block_x: usize,
    pub block_y: usize,

    // Half-open pixel bounds
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl BlockBounds {
    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    raster_width: usize,
    raster_height: usize,
    block_width: usize,
    block_height: usize,
    pub num_blocks_x: usize,
    pub num_blocks_y: usize,
    pub total_blocks: usize,
}

impl BlockGrid {
    pub fn new(
        raster_width: usize,
        raster_height: usize,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        let block_width = block_width.max(1);
        let block_height = block_height.max(1);
        let num_blocks_x = raster_width.div_ceil(block_width);
        let num_blocks_y = raster_height.div_ceil(block_height);
        let total_blocks = num_blocks_x * num_blocks_y;

        Self {
            raster_width,
            raster_height,
            block_width,
            block_height,
            num_blocks_x,
            num_blocks_y,
            total_blocks,
        }
    }

    pub fn block_size(&self) -> (usize, usize) {
        (self.block_width, self.block_height)
    }

    pub fn iter(&self) -> BlockIterator<'_> {
        BlockIterator::new(self)
    }

    /// Linear index of the block at `(block_x, block_y)`.
    pub fn index_of(&self, block_x: usize, block_y: usize) -> usize {
        block_y * self.num_blocks_x + block_x
    }

    pub fn get_block_bounds(&self, block_idx: usize) -> BlockBounds {
        let block_y = block_idx / self.num_blocks_x;
        let block_x = block_idx % self.num_blocks_x;
        self.bounds_at(block_x, block_y)
    }

    pub fn bounds_at(&self, block_x: usize, block_y: usize) -> BlockBounds {
        let x_min = block_x * self.block_width;
        let y_min = block_y * self.block_height;
        BlockBounds {
            block_x,
            block_y,
            x_min,
            y_min,
            x_max: (x_min + self.block_width).min(self.raster_width),
            y_max: (y_min + self.block_height).min(self.raster_height),
        }
    }
}

pub struct BlockIterator<'a> {
    grid: &'a BlockGrid,
    current_idx: usize,
}

impl<'a> BlockIterator<'a> {
    fn new(grid: &'a BlockGrid) -> Self {
        Self {
            grid,
            current_idx: 0,
        }
    }
}

impl Iterator for BlockIterator<'_> {
    type Item = (usize, BlockBounds);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx < self.grid.total_blocks {
            let bounds = self.grid.get_block_bounds(self.current_idx);
            let idx = self.current_idx;
            self.current_idx += 1;
            Some((idx, bounds))
        } else {
            None
        }
    }
}

/// Maps destination pixel indices along one axis onto source pixels.
///
/// Destination pixel `d` covers source pixels
/// `[floor(0.5 + d * ratio), floor(0.5 + (d + 1) * ratio))`, clipped to the
/// source extent and never empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMap {
    pub src_len: usize,
    pub dst_len: usize,
    pub ratio: f64,
}

impl AxisMap {
    pub fn new(src_len: usize, dst_len: usize) -> Self {
        Self {
            src_len,
            dst_len,
            ratio: src_len as f64 / dst_len.max(1) as f64,
        }
    }

    pub fn span(&self, d: usize) -> (usize, usize) {
        let start = ((0.5 + d as f64 * self.ratio) as usize).min(self.src_len.saturating_sub(1));
        let end = ((0.5 + (d + 1) as f64 * self.ratio) as usize).min(self.src_len);
        (start, end.max(start + 1))
    }

    /// Source pixel at the center of the footprint of `d`.
    pub fn center(&self, d: usize) -> usize {
        (((d as f64 + 0.5) * self.ratio) as usize).min(self.src_len.saturating_sub(1))
    }

    /// Source range needed to compute destination pixels `[d0, d1)` with a
    /// kernel of `radius` taps around each center.
    pub fn covering(&self, d0: usize, d1: usize, radius: usize) -> (usize, usize) {
        let (start, _) = self.span(d0);
        let (_, end) = self.span(d1 - 1);
        let lo = self.center(d0).saturating_sub(radius).min(start);
        let hi = (self.center(d1 - 1) + radius + 1).min(self.src_len).max(end);
        (lo, hi)
    }
}

/// Source rectangle feeding one destination block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceWindow {
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl SourceWindow {
    pub fn for_block(x_map: &AxisMap, y_map: &AxisMap, dst: &BlockBounds, radius: usize) -> Self {
        let (x_min, x_max) = x_map.covering(dst.x_min, dst.x_max, radius);
        let (y_min, y_max) = y_map.covering(dst.y_min, dst.y_max, radius);

        debug!(
            "Block ({}, {}): dst=[{}-{}, {}-{}] <- src=[{}-{}, {}-{}]",
            dst.block_x,
            dst.block_y,
            dst.x_min,
            dst.x_max,
            dst.y_min,
            dst.y_max,
            x_min,
            x_max,
            y_min,
            y_max
        );

        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> usize {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_grid_simple() {
        let grid = BlockGrid::new(4000, 4000, 2000, 2000);
        assert_eq!(grid.num_blocks_x, 2);
        assert_eq!(grid.num_blocks_y, 2);
        assert_eq!(grid.total_blocks, 4);
    }

    #[test]
    fn test_block_bounds_partial_edge() {
        let grid = BlockGrid::new(20, 20, 8, 8);
        assert_eq!(grid.total_blocks, 9);

        let bounds = grid.get_block_bounds(8);
        assert_eq!((bounds.block_x, bounds.block_y), (2, 2));
        assert_eq!(bounds.x_min, 16);
        assert_eq!(bounds.x_max, 20);
        assert_eq!(bounds.width(), 4);
        assert_eq!(bounds.height(), 4);
    }

    #[test]
    fn test_striped_grid() {
        let grid = BlockGrid::new(20, 5, 20, 1);
        assert_eq!(grid.num_blocks_x, 1);
        assert_eq!(grid.num_blocks_y, 5);
        assert_eq!(grid.index_of(0, 3), 3);
    }

    #[test]
    fn test_block_iterator() {
        let grid = BlockGrid::new(4000, 4000, 2000, 2000);
        let blocks: Vec<_> = grid.iter().collect();

        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].0, 0);
        assert_eq!(blocks[3].1.x_min, 2000);
    }

    #[test]
    fn test_axis_map_even_ratio() {
        let map = AxisMap::new(20, 10);
        assert_eq!(map.span(0), (0, 2));
        assert_eq!(map.span(9), (18, 20));
        assert_eq!(map.center(0), 1);
        assert_eq!(map.center(9), 19);
    }

    #[test]
    fn test_axis_map_odd_size_stays_in_extent() {
        // 21 -> 11 (ceil(21 / 2))
        let map = AxisMap::new(21, 11);
        for d in 0..11 {
            let (start, end) = map.span(d);
            assert!(start < end);
            assert!(end <= 21);
        }
        assert_eq!(map.span(10).1, 21);
    }

    #[test]
    fn test_source_window_with_radius() {
        let x_map = AxisMap::new(20, 10);
        let y_map = AxisMap::new(20, 10);
        let grid = BlockGrid::new(10, 10, 5, 5);
        let window = SourceWindow::for_block(&x_map, &y_map, &grid.get_block_bounds(0), 1);
        assert_eq!((window.x_min, window.x_max), (0, 11));

        let window = SourceWindow::for_block(&x_map, &y_map, &grid.get_block_bounds(3), 1);
        assert_eq!((window.x_min, window.x_max), (10, 20));
        assert_eq!((window.y_min, window.y_max), (10, 20));
    }
}
