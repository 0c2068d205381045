use crate::types::{SpecError, SpecResult};

/// A rectangular region of a raster's pixel grid.
///
/// Owns no pixel data; readers and writers address band arrays through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRegion {
    pub x_offset: usize,
    pub y_offset: usize,
    pub width: usize,
    pub height: usize,
}

impl BlockRegion {
    pub fn new(x_offset: usize, y_offset: usize, width: usize, height: usize) -> Self {
        Self {
            x_offset,
            y_offset,
            width,
            height,
        }
    }

    /// Number of pixels covered by this region
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Parameters controlling memory-bounded block iteration
#[derive(Debug, Clone)]
pub struct BlockIterParams {
    /// Memory budget in bytes for one block across all processed bands
    pub memory_budget: usize,
    /// Bytes needed per pixel per band (input + output buffers)
    pub bytes_per_pixel_band: usize,
}

impl Default for BlockIterParams {
    fn default() -> Self {
        Self {
            // 256 MB keeps full-scene processing well inside commodity RAM
            memory_budget: 256 * 1024 * 1024,
            bytes_per_pixel_band: 2 * std::mem::size_of::<f32>(),
        }
    }
}

/// Partitions a raster grid into row-aligned blocks sized to a memory budget.
///
/// Blocks cover the full raster exactly once, top to bottom. Block height is
/// at least one line even when a single line's estimated cost exceeds the
/// budget, so oversized rasters degrade to line-by-line processing instead
/// of failing.
#[derive(Debug)]
pub struct RasterBlockIterator {
    width: usize,
    height: usize,
    lines_per_block: usize,
    next_line: usize,
}

impl RasterBlockIterator {
    pub fn new(
        width: usize,
        height: usize,
        band_count: usize,
        params: &BlockIterParams,
    ) -> SpecResult<Self> {
        if width == 0 || height == 0 || band_count == 0 {
            return Err(SpecError::Configuration(format!(
                "Cannot iterate over empty raster ({}x{} with {} bands)",
                width, height, band_count
            )));
        }

        let line_cost = width * band_count * params.bytes_per_pixel_band;
        let lines_per_block = if line_cost == 0 {
            height
        } else {
            (params.memory_budget / line_cost).clamp(1, height)
        };

        log::debug!(
            "Block iteration over {}x{}x{} raster: {} lines per block ({} blocks, ~{} bytes each)",
            width,
            height,
            band_count,
            lines_per_block,
            (height + lines_per_block - 1) / lines_per_block,
            lines_per_block * line_cost
        );

        Ok(Self {
            width,
            height,
            lines_per_block,
            next_line: 0,
        })
    }

    /// Number of blocks this iterator will yield
    pub fn block_count(&self) -> usize {
        (self.height + self.lines_per_block - 1) / self.lines_per_block
    }

    /// Lines per full block (the last block may be shorter)
    pub fn lines_per_block(&self) -> usize {
        self.lines_per_block
    }
}

impl Iterator for RasterBlockIterator {
    type Item = BlockRegion;

    fn next(&mut self) -> Option<BlockRegion> {
        if self.next_line >= self.height {
            return None;
        }
        let y_offset = self.next_line;
        let height = self.lines_per_block.min(self.height - y_offset);
        self.next_line += height;
        Some(BlockRegion::new(0, y_offset, self.width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(budget: usize) -> BlockIterParams {
        BlockIterParams {
            memory_budget: budget,
            bytes_per_pixel_band: 4,
        }
    }

    #[test]
    fn test_blocks_cover_raster_exactly_once() {
        let blocks: Vec<_> = RasterBlockIterator::new(100, 57, 3, &params(100 * 3 * 4 * 10))
            .unwrap()
            .collect();

        let mut covered = 0;
        let mut expected_y = 0;
        for block in &blocks {
            assert_eq!(block.x_offset, 0);
            assert_eq!(block.width, 100);
            assert_eq!(block.y_offset, expected_y, "blocks must be contiguous");
            assert!(block.height >= 1);
            expected_y += block.height;
            covered += block.height;
        }
        assert_eq!(covered, 57);
    }

    #[test]
    fn test_tiny_budget_degrades_to_single_lines() {
        // One line costs 100 * 3 * 4 = 1200 bytes, far above the budget
        let iter = RasterBlockIterator::new(100, 5, 3, &params(16)).unwrap();
        assert_eq!(iter.lines_per_block(), 1);
        let blocks: Vec<_> = iter.collect();
        assert_eq!(blocks.len(), 5);
        assert!(blocks.iter().all(|b| b.height == 1));
    }

    #[test]
    fn test_large_budget_yields_single_block() {
        let blocks: Vec<_> = RasterBlockIterator::new(10, 10, 1, &params(usize::MAX))
            .unwrap()
            .collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], BlockRegion::new(0, 0, 10, 10));
    }

    #[test]
    fn test_empty_raster_rejected() {
        assert!(RasterBlockIterator::new(0, 10, 1, &params(1024)).is_err());
        assert!(RasterBlockIterator::new(10, 10, 0, &params(1024)).is_err());
    }
}
