//! Grid and Launcher: one kernel instance per grid cell.
//!
//! A launch is a parallel-for over the cells of a [`Grid`]. Cells share the
//! read-only inputs and stage their output writes in a private
//! [`CellWriter`]; the launcher commits the staged writes only after every
//! cell has returned `Ok`, so a failed launch leaves the output untouched.
//! Each output offset must be written by exactly one cell. Grid and tile
//! sizing guarantee that; debug builds verify it at commit time.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::addressing::cdiv;
use crate::memory::CellWriter;
use crate::types::Element;
use crate::{Result, TileError};

/// Number of cells along each grid axis. Unused axes have length 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Grid {
    dims: [usize; 2],
}

impl Grid {
    pub fn new_1d(cells: usize) -> Self {
        Self { dims: [cells, 1] }
    }

    pub fn new_2d(rows: usize, cols: usize) -> Self {
        Self { dims: [rows, cols] }
    }

    /// `ceil(extent / block)` cells along each axis.
    pub fn for_extents(extents: &[usize], blocks: &[usize]) -> Result<Self> {
        if extents.len() != blocks.len() {
            return Err(TileError::ShapeMismatch {
                expected: extents.to_vec(),
                got: blocks.to_vec(),
            });
        }
        if blocks.contains(&0) {
            return Err(TileError::InvalidArgument("block size of 0".into()));
        }
        match (extents, blocks) {
            ([e], [b]) => Ok(Self::new_1d(cdiv(*e, *b))),
            ([e0, e1], [b0, b1]) => Ok(Self::new_2d(cdiv(*e0, *b0), cdiv(*e1, *b1))),
            _ => Err(TileError::InvalidArgument(format!(
                "grids are 1-D or 2-D, got {} axes",
                extents.len()
            ))),
        }
    }

    pub fn dims(&self) -> [usize; 2] {
        self.dims
    }

    pub fn num_cells(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    /// Every cell, axis 1 fastest.
    pub fn cells(&self) -> impl Iterator<Item = GridCell> + '_ {
        let cols = self.dims[1];
        (0..self.num_cells()).map(move |i| GridCell {
            pid: [i / cols, i % cols],
        })
    }
}

/// Identity of one kernel instance within a launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridCell {
    pid: [usize; 2],
}

impl GridCell {
    /// Block index of this cell along `axis` (0 or 1).
    pub fn program_id(&self, axis: usize) -> usize {
        self.pid[axis]
    }
}

/// How cells of a launch are executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExecMode {
    Serial,
    Parallel,
}

/// Launcher settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub exec: ExecMode,
    /// Worker count for a dedicated pool; `None` uses rayon's global pool.
    pub threads: Option<usize>,
    /// Smallest tile extent accepted for blocked matmul. `1` disables the floor.
    pub min_tile: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            exec: ExecMode::Parallel,
            threads: None,
            min_tile: 16,
        }
    }
}

impl LaunchConfig {
    /// Defaults overridden by environment variables.
    ///
    /// - `TILEGRID_EXEC`: `"serial"` or `"parallel"` (case-insensitive)
    /// - `TILEGRID_THREADS`: worker count for a dedicated pool
    /// - `TILEGRID_MIN_TILE`: blocked-matmul tile floor
    ///
    /// Unrecognized values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("TILEGRID_EXEC") {
            match val.to_lowercase().as_str() {
                "serial" => config.exec = ExecMode::Serial,
                "parallel" => config.exec = ExecMode::Parallel,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("TILEGRID_THREADS")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            config.threads = Some(n);
        }
        if let Ok(val) = std::env::var("TILEGRID_MIN_TILE")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            config.min_tile = n;
        }
        config
    }
}

/// Timing and shape of a completed launch.
#[derive(Clone, Debug, Serialize)]
pub struct LaunchReport {
    pub grid: Grid,
    pub cells: usize,
    pub exec: ExecMode,
    pub writes: usize,
    pub elapsed_us: u64,
}

/// Runs kernel bodies over grids.
pub struct Launcher {
    config: LaunchConfig,
    pool: Option<rayon::ThreadPool>,
}

impl Launcher {
    pub fn new(config: LaunchConfig) -> Result<Self> {
        let pool = match (config.exec, config.threads) {
            (ExecMode::Parallel, Some(n)) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("tilegrid-{i}"))
                    .build()
                    .map_err(|e| TileError::ThreadPool(e.to_string()))?,
            ),
            _ => None,
        };
        info!(exec = ?config.exec, threads = ?config.threads, min_tile = config.min_tile, "Initialized launcher");
        Ok(Self { config, pool })
    }

    /// A launcher that runs cells one after another on the calling thread.
    pub fn serial() -> Self {
        Self {
            config: LaunchConfig {
                exec: ExecMode::Serial,
                ..LaunchConfig::default()
            },
            pool: None,
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Invoke `kernel` once per cell of `grid`, then commit every cell's
    /// stores into `out`.
    pub fn launch<T, F>(&self, grid: Grid, out: &mut [T], kernel: F) -> Result<LaunchReport>
    where
        T: Element,
        F: Fn(GridCell, &mut CellWriter<T>) -> Result<()> + Sync,
    {
        let start = Instant::now();
        debug!(grid = ?grid.dims(), cells = grid.num_cells(), exec = ?self.config.exec, "launch");

        let run_cell = |cell: GridCell| -> Result<CellWriter<T>> {
            let mut writer = CellWriter::new();
            kernel(cell, &mut writer)?;
            Ok(writer)
        };

        let staged: Vec<CellWriter<T>> = match self.config.exec {
            ExecMode::Serial => grid.cells().map(run_cell).collect::<Result<_>>()?,
            ExecMode::Parallel => {
                let cells: Vec<GridCell> = grid.cells().collect();
                let run_all = || cells.into_par_iter().map(run_cell).collect::<Result<Vec<_>>>();
                match &self.pool {
                    Some(pool) => pool.install(run_all)?,
                    None => run_all()?,
                }
            }
        };

        let writes = commit(staged, out)?;
        let report = LaunchReport {
            grid,
            cells: grid.num_cells(),
            exec: self.config.exec,
            writes,
            elapsed_us: start.elapsed().as_micros() as u64,
        };
        debug!(writes, elapsed_us = report.elapsed_us, "launch complete");
        Ok(report)
    }
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn commit<T: Element>(staged: Vec<CellWriter<T>>, out: &mut [T]) -> Result<usize> {
    if let Some(&(offset, _)) = staged
        .iter()
        .flat_map(|w| w.staged())
        .find(|&&(offset, _)| offset >= out.len())
    {
        return Err(TileError::InvalidArgument(format!(
            "store to offset {offset} past output of length {}",
            out.len()
        )));
    }

    #[cfg(debug_assertions)]
    {
        let mut written = vec![false; out.len()];
        for writer in &staged {
            for &(offset, _) in writer.staged() {
                if std::mem::replace(&mut written[offset], true) {
                    warn!(offset, "write-partitioning violated");
                    return Err(TileError::OverlappingWrite { offset });
                }
            }
        }
    }

    let mut count = 0;
    for writer in staged {
        for (offset, value) in writer.into_writes() {
            out[offset] = value;
            count += 1;
        }
    }
    Ok(count)
}

static DEFAULT_LAUNCHER: LazyLock<Arc<Launcher>> = LazyLock::new(|| {
    let config = LaunchConfig::from_env();
    let launcher = Launcher::new(config.clone()).unwrap_or_else(|e| {
        warn!(error = %e, "falling back to the global rayon pool");
        Launcher {
            config: LaunchConfig {
                threads: None,
                ..config
            },
            pool: None,
        }
    });
    Arc::new(launcher)
});

/// The shared launcher configured from the environment.
pub fn default_launcher() -> Arc<Launcher> {
    Arc::clone(&DEFAULT_LAUNCHER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{BlockRange, Offsets};
    use crate::block::Block;

    fn fill_index_kernel(
        n: usize,
        block: usize,
    ) -> impl Fn(GridCell, &mut CellWriter<f32>) -> Result<()> + Sync {
        move |cell, w| {
            let r = BlockRange::new(cell.program_id(0), block, n);
            let idx = r.indices();
            let values = Block::row(idx.iter().map(|&i| i as f32).collect());
            w.store(&Offsets::row(idx), &values, &r.mask())
        }
    }

    #[test]
    fn test_grid_for_extents() {
        assert_eq!(Grid::for_extents(&[1000], &[1024]).unwrap().dims(), [1, 1]);
        assert_eq!(Grid::for_extents(&[33, 17], &[16, 16]).unwrap().dims(), [3, 2]);
        assert!(Grid::for_extents(&[4], &[0]).is_err());
        assert!(Grid::for_extents(&[4, 4, 4], &[2, 2, 2]).is_err());
    }

    #[test]
    fn test_cells_cover_grid() {
        let g = Grid::new_2d(2, 3);
        let cells: Vec<_> = g.cells().map(|c| (c.program_id(0), c.program_id(1))).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_serial_and_parallel_agree() {
        let _ = tracing_subscriber::fmt::try_init();
        let n = 1000;
        let grid = Grid::for_extents(&[n], &[64]).unwrap();

        let mut serial = vec![-1.0f32; n];
        Launcher::serial()
            .launch(grid, &mut serial, fill_index_kernel(n, 64))
            .unwrap();

        let parallel_launcher = Launcher::new(LaunchConfig {
            threads: Some(4),
            ..LaunchConfig::default()
        })
        .unwrap();
        let mut parallel = vec![-1.0f32; n];
        let report = parallel_launcher
            .launch(grid, &mut parallel, fill_index_kernel(n, 64))
            .unwrap();

        assert_eq!(serial, parallel);
        assert_eq!(report.cells, 16);
        assert_eq!(report.writes, n);
        assert!(serial.iter().enumerate().all(|(i, &v)| v == i as f32));
    }

    #[test]
    fn test_failed_cell_leaves_output_untouched() {
        let mut out = vec![7.0f32; 8];
        let err = Launcher::serial().launch(Grid::new_1d(2), &mut out, |cell, w| {
            if cell.program_id(0) == 1 {
                return Err(TileError::InvalidArgument("boom".into()));
            }
            w.store(
                &Offsets::row(vec![0, 1, 2, 3]),
                &Block::zeros(1, 4),
                &crate::mask::Mask::all(1, 4),
            )
        });
        assert!(err.is_err());
        assert_eq!(out, vec![7.0; 8]);
    }

    #[test]
    fn test_store_past_output_rejected() {
        let mut out = vec![0.0f32; 2];
        let err = Launcher::serial().launch(Grid::new_1d(1), &mut out, |_, w| {
            w.store(
                &Offsets::row(vec![1, 2]),
                &Block::row(vec![5.0, 5.0]),
                &crate::mask::Mask::all(1, 2),
            )
        });
        assert!(matches!(err, Err(TileError::InvalidArgument(_))));
        assert_eq!(out, vec![0.0; 2]);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_overlapping_writes_detected() {
        let mut out = vec![0.0f32; 4];
        let err = Launcher::serial().launch(Grid::new_1d(2), &mut out, |_, w| {
            w.store(
                &Offsets::row(vec![0, 1]),
                &Block::row(vec![1.0, 1.0]),
                &crate::mask::Mask::all(1, 2),
            )
        });
        assert!(matches!(err, Err(TileError::OverlappingWrite { offset: 0 })));
        assert_eq!(out, vec![0.0; 4]);
    }
}
