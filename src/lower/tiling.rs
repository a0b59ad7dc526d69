//! 2-D block transfer tiling planner.
//!
//! Splits a rows × cols region into hardware-sized tiles and spreads the
//! tiles over the warps of a CTA. Used by prefetch, which may place any
//! tile on any warp.

use tracing::trace;

use crate::config::TargetConfig;
use crate::layout::ceil_div;

/// Tile shape, warp grid and repetitions for one 2-D region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TilePlan {
    pub shape: [u32; 2],
    pub elem_bits: u32,
    /// Tile extent in elements: [rows, cols].
    pub tile: [u32; 2],
    /// Warps along [rows, cols].
    pub grid: [u32; 2],
    /// Tiles each warp issues along [rows, cols].
    pub reps: [u32; 2],
}

impl TilePlan {
    pub fn new(shape: [u32; 2], elem_bits: u32, num_warps: u32, cfg: &TargetConfig) -> Self {
        let elem_bytes = (elem_bits / 8).max(1);
        let max_rows = cfg.max_block_bytes / cfg.max_block_row_bytes;
        let tile = [
            shape[0].min(max_rows).max(1),
            shape[1].min(cfg.max_block_row_bytes / elem_bytes).max(1),
        ];
        let grid = warp_grid(shape, tile, num_warps);
        let reps = [
            ceil_div(shape[0], tile[0] * grid[0]).max(1),
            ceil_div(shape[1], tile[1] * grid[1]).max(1),
        ];
        let plan = Self {
            shape,
            elem_bits,
            tile,
            grid,
            reps,
        };
        trace!(tile = ?plan.tile, grid = ?plan.grid, reps = ?plan.reps, "block tiling");
        plan
    }

    /// Warp coordinates [row, col] for linear warp id `warp`; columns vary
    /// fastest.
    pub fn warp_coords(&self, warp: u32) -> [u32; 2] {
        [warp / self.grid[1], warp % self.grid[1]]
    }

    /// Tile origin [y, x] in elements for repetition (r, c) of a warp at
    /// `coords`, wrapped into the region.
    pub fn origin(&self, coords: [u32; 2], r: u32, c: u32) -> [u32; 2] {
        [
            (coords[0] * self.tile[0] + r * self.grid[0] * self.tile[0]) % self.shape[0],
            (coords[1] * self.tile[1] + c * self.grid[1] * self.tile[1]) % self.shape[1],
        ]
    }

    /// All tile origins the warp `warp` issues, row-major over repetitions.
    pub fn origins(&self, warp: u32) -> Vec<[u32; 2]> {
        let coords = self.warp_coords(warp);
        let mut out = Vec::with_capacity((self.reps[0] * self.reps[1]) as usize);
        for r in 0..self.reps[0] {
            for c in 0..self.reps[1] {
                out.push(self.origin(coords, r, c));
            }
        }
        out
    }

    /// Bytes in one tile row.
    pub fn row_bytes(&self) -> u32 {
        self.tile[1] * self.elem_bits / 8
    }

    /// Element size of the transfer: 32-bit once a tile row reaches four
    /// bytes, otherwise the whole row as one element.
    pub fn transfer_bits(&self) -> u32 {
        if self.row_bytes() >= 4 {
            32
        } else {
            self.row_bytes() * 8
        }
    }

    /// Tile width counted in transfer elements.
    pub fn transfer_width(&self) -> u32 {
        ceil_div(self.row_bytes() * 8, self.transfer_bits())
    }
}

/// Double one grid dimension at a time until the grid holds `num_warps`
/// warps, steering toward whichever dimension has more tiles left per warp.
fn warp_grid(shape: [u32; 2], tile: [u32; 2], num_warps: u32) -> [u32; 2] {
    let row_col_ratio = ceil_div(tile[0], tile[1]);
    let col_row_ratio = ceil_div(tile[1], tile[0]);
    let mut grid = [1u32, 1u32];
    while grid[0] * grid[1] < num_warps {
        let row_metric = shape[0] / (tile[0] * col_row_ratio) / grid[0];
        let col_metric = shape[1] / (tile[1] * row_col_ratio) / grid[1];
        if row_metric >= col_metric && grid[0] < shape[0] / tile[0] {
            grid[0] *= 2;
        } else {
            grid[1] *= 2;
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn plan(shape: [u32; 2], bits: u32, warps: u32) -> TilePlan {
        TilePlan::new(shape, bits, warps, &TargetConfig::xe())
    }

    #[test]
    fn test_small_square_spreads_over_columns() {
        let p = plan([16, 16], 16, 4);
        assert_eq!(p.tile, [16, 16]);
        assert_eq!(p.grid, [1, 4]);
        assert_eq!(p.reps, [1, 1]);
        assert_eq!(p.transfer_bits(), 32);
        assert_eq!(p.transfer_width(), 8);
    }

    #[test]
    fn test_tile_limits() {
        let p = plan([256, 256], 16, 8);
        assert_eq!(p.tile, [32, 32]);
        let p = plan([256, 256], 8, 1);
        assert_eq!(p.tile, [32, 64]);
        let p = plan([256, 256], 32, 1);
        assert_eq!(p.tile, [32, 16]);
    }

    #[test]
    fn test_grid_balances_rows_first() {
        let p = plan([64, 64], 16, 4);
        assert_eq!(p.tile, [32, 32]);
        assert_eq!(p.grid, [2, 2]);
        assert_eq!(p.reps, [1, 1]);
    }

    #[test]
    fn test_narrow_rows_use_row_sized_elements() {
        let p = plan([8, 1], 16, 1);
        assert_eq!(p.row_bytes(), 2);
        assert_eq!(p.transfer_bits(), 16);
        assert_eq!(p.transfer_width(), 1);
    }

    #[test]
    fn test_tiles_cover_region_in_bounds() {
        for &(shape, bits, warps) in &[
            ([64u32, 64u32], 16u32, 4u32),
            ([128, 32], 32, 8),
            ([32, 256], 8, 4),
            ([100, 40], 16, 2),
        ] {
            let p = plan(shape, bits, warps);
            let mut covered = HashSet::new();
            for warp in 0..warps {
                for [y, x] in p.origins(warp) {
                    assert!(y < shape[0] && x < shape[1]);
                    for dy in 0..p.tile[0] {
                        for dx in 0..p.tile[1] {
                            if y + dy < shape[0] && x + dx < shape[1] {
                                covered.insert((y + dy, x + dx));
                            }
                        }
                    }
                }
            }
            assert_eq!(covered.len() as u32, shape[0] * shape[1], "{:?}", shape);
        }
    }
}
