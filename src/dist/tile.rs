//! Spatial tiling of the common raster extent.
//!
//! Tiles are the unit of work distribution: every tile is owned by
//! exactly one worker rank for the whole run, and every checkpoint
//! artifact is keyed by tile index. The tile list and the rank
//! assignment are both deterministic, so a restarted run reproduces the
//! same layout.

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::types::{InsarError, InsarResult};

/// A rectangular sub-region of the common raster grid.
///
/// Bounds are top-left inclusive, bottom-right exclusive, in (row, col)
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub index: usize,
    pub top_left: (usize, usize),
    pub bottom_right: (usize, usize),
}

impl Tile {
    pub fn rows(&self) -> usize {
        self.bottom_right.0 - self.top_left.0
    }

    pub fn cols(&self) -> usize {
        self.bottom_right.1 - self.top_left.1
    }

    pub fn num_cells(&self) -> usize {
        self.rows() * self.cols()
    }

    /// View of this tile's region within a full-extent raster.
    pub fn view<'a, T>(&self, raster: &'a Array2<T>) -> ArrayView2<'a, T> {
        raster.slice(s![
            self.top_left.0..self.bottom_right.0,
            self.top_left.1..self.bottom_right.1
        ])
    }
}

/// Split the full raster extent into a `tile_rows` x `tile_cols` grid of
/// non-overlapping tiles covering every pixel exactly once.
///
/// Tiles are emitted row-major over the tile grid and indexed in that
/// order. Row and column extents are split as evenly as possible, the
/// leading tiles absorbing the remainder.
pub fn partition(
    shape: (usize, usize),
    tile_rows: usize,
    tile_cols: usize,
) -> InsarResult<Vec<Tile>> {
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Err(InsarError::Config(format!(
            "Cannot tile an empty raster extent {}x{}",
            rows, cols
        )));
    }
    if tile_rows == 0 || tile_cols == 0 || tile_rows > rows || tile_cols > cols {
        return Err(InsarError::Config(format!(
            "Invalid tile grid {}x{} for raster extent {}x{}",
            tile_rows, tile_cols, rows, cols
        )));
    }

    let row_bounds = split_even(rows, tile_rows);
    let col_bounds = split_even(cols, tile_cols);

    let mut tiles = Vec::with_capacity(tile_rows * tile_cols);
    for &(r0, r1) in &row_bounds {
        for &(c0, c1) in &col_bounds {
            tiles.push(Tile {
                index: tiles.len(),
                top_left: (r0, c0),
                bottom_right: (r1, c1),
            });
        }
    }
    log::debug!(
        "Partitioned {}x{} extent into {} tiles ({}x{} grid)",
        rows,
        cols,
        tiles.len(),
        tile_rows,
        tile_cols
    );
    Ok(tiles)
}

/// Assign tile indices to worker ranks as contiguous, balanced chunks.
///
/// Rank sets are disjoint and their union is 0..num_tiles; ranks beyond
/// the tile count receive empty sets.
pub fn assign(num_tiles: usize, num_ranks: usize) -> InsarResult<Vec<Vec<usize>>> {
    if num_ranks == 0 {
        return Err(InsarError::Config(
            "Worker rank count must be positive".to_string(),
        ));
    }
    let base = num_tiles / num_ranks;
    let extra = num_tiles % num_ranks;

    let mut assignments = Vec::with_capacity(num_ranks);
    let mut next = 0;
    for rank in 0..num_ranks {
        let count = base + usize::from(rank < extra);
        assignments.push((next..next + count).collect());
        next += count;
    }
    Ok(assignments)
}

/// Split `len` into `parts` contiguous (start, end) spans, leading spans
/// one longer when `len` is not divisible.
fn split_even(len: usize, parts: usize) -> Vec<(usize, usize)> {
    let base = len / parts;
    let extra = len % parts;
    let mut bounds = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let size = base + usize::from(i < extra);
        bounds.push((start, start + size));
        start += size;
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_partition_exhaustive_and_disjoint() {
        let (rows, cols) = (17, 23);
        let tiles = partition((rows, cols), 3, 4).unwrap();
        assert_eq!(tiles.len(), 12);

        let mut cover = Array2::<u32>::zeros((rows, cols));
        for t in &tiles {
            for r in t.top_left.0..t.bottom_right.0 {
                for c in t.top_left.1..t.bottom_right.1 {
                    cover[[r, c]] += 1;
                }
            }
        }
        assert!(cover.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_partition_order_stable_and_indexed() {
        let tiles = partition((10, 10), 2, 2).unwrap();
        for (i, t) in tiles.iter().enumerate() {
            assert_eq!(t.index, i);
        }
        // row-major over the tile grid
        assert_eq!(tiles[0].top_left, (0, 0));
        assert_eq!(tiles[1].top_left.0, 0);
        assert!(tiles[2].top_left.0 > 0);
    }

    #[test]
    fn test_partition_rejects_bad_grid() {
        assert!(partition((10, 10), 0, 2).is_err());
        assert!(partition((10, 10), 11, 2).is_err());
        assert!(partition((0, 10), 1, 1).is_err());
    }

    #[test]
    fn test_assignment_disjoint_and_exhaustive() {
        let assignments = assign(10, 3).unwrap();
        assert_eq!(assignments.len(), 3);

        let mut seen = vec![0u32; 10];
        for ranks in &assignments {
            for &t in ranks {
                seen[t] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
        // balanced: 4, 3, 3
        assert_eq!(assignments[0].len(), 4);
        assert_eq!(assignments[1].len(), 3);
        assert_eq!(assignments[2].len(), 3);
    }

    #[test]
    fn test_more_ranks_than_tiles() {
        let assignments = assign(2, 5).unwrap();
        let owned: usize = assignments.iter().map(|a| a.len()).sum();
        assert_eq!(owned, 2);
        assert!(assignments[2].is_empty());
    }

    #[test]
    fn test_tile_view() {
        let raster = Array2::from_shape_fn((6, 6), |(r, c)| (r * 6 + c) as f32);
        let tiles = partition((6, 6), 2, 2).unwrap();
        let view = tiles[3].view(&raster);
        assert_eq!(view.dim(), (3, 3));
        assert_eq!(view[[0, 0]], raster[[3, 3]]);
    }
}
