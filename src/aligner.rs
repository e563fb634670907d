#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Discrete grid-search alignment of a two-axis stage onto the maximum of a
//! caller-supplied profit signal (usually optical power).

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::grid::{permute_outwards, Grid};
use crate::motion::{Axis, Motion};

/// Where a search starts from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StartPoint {
    /// Wherever the stage currently is.
    UseCurrent,
    At(f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Unvisited,
    Measured(f64),
    /// Outside the stage travel: visited, never measured.
    Skipped,
}

/// Profit readings taken during one search, indexed by grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementCache {
    nx: usize,
    ny: usize,
    cells: Vec<Cell>,
}

impl MeasurementCache {
    #[must_use]
    pub fn new(nx: usize, ny: usize) -> Self {
        MeasurementCache {
            nx,
            ny,
            cells: vec![Cell::Unvisited; nx * ny],
        }
    }

    #[must_use]
    pub fn for_grid(grid: &Grid) -> Self {
        Self::new(grid.nx(), grid.ny())
    }

    #[inline]
    fn flat_index(&self, (ix, iy): (usize, usize)) -> usize {
        iy * self.nx + ix
    }

    #[must_use]
    pub fn get(&self, index: (usize, usize)) -> Cell {
        self.cells[self.flat_index(index)]
    }

    #[must_use]
    pub fn value(&self, index: (usize, usize)) -> Option<f64> {
        match self.get(index) {
            Cell::Measured(v) => Some(v),
            Cell::Unvisited | Cell::Skipped => None,
        }
    }

    #[must_use]
    pub fn is_visited(&self, index: (usize, usize)) -> bool {
        self.get(index) != Cell::Unvisited
    }

    pub fn record(&mut self, index: (usize, usize), value: f64) {
        let i = self.flat_index(index);
        self.cells[i] = Cell::Measured(value);
    }

    pub fn skip(&mut self, index: (usize, usize)) {
        let i = self.flat_index(index);
        self.cells[i] = Cell::Skipped;
    }

    /// Copy every measured cell of `other` over this cache.
    pub fn merge(&mut self, other: &MeasurementCache) {
        debug_assert_eq!((self.nx, self.ny), (other.nx, other.ny));
        for (mine, theirs) in self.cells.iter_mut().zip(&other.cells) {
            if let Cell::Measured(_) = theirs {
                *mine = *theirs;
            }
        }
    }

    fn measured(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.cells.iter().enumerate().filter_map(|(i, cell)| match cell {
            Cell::Measured(v) => Some(((i % self.nx, i / self.nx), *v)),
            Cell::Unvisited | Cell::Skipped => None,
        })
    }

    #[must_use]
    pub fn num_measured(&self) -> usize {
        self.measured().count()
    }

    /// Largest measured value; the first cell in row-major `(iy, ix)` order
    /// wins ties.
    #[must_use]
    pub fn argmax(&self) -> Option<((usize, usize), f64)> {
        self.measured().fold(None, |best, (index, v)| match best {
            Some((_, best_v)) if v <= best_v => best,
            _ if v.is_nan() => best,
            _ => Some((index, v)),
        })
    }

    /// At least two readings, all identical.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        let mut values = self.measured().map(|(_, v)| v);
        let Some(first) = values.next() else {
            return false;
        };
        let mut count = 1;
        for v in values {
            if v != first {
                return false;
            }
            count += 1;
        }
        count > 1
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub index: (usize, usize),
    pub position: (f64, f64),
    /// Cached reading at `index`.
    pub profit: f64,
    pub measurements: usize,
    /// How many times the cursor moved to a better cell.
    pub recenterings: usize,
    pub cache: MeasurementCache,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub position: (f64, f64),
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstSignal {
    pub position: (f64, f64),
    pub profit: f64,
    /// Profit readings taken, including the initial check.
    pub measurements: usize,
}

/// Drives a stage it owns. The stage is exclusive to one aligner; callers
/// running several alignment sessions must serialize them.
#[derive(Debug)]
pub struct Aligner<M: Motion> {
    stage: M,
    coordinates: (f64, f64),
}

impl<M: Motion> Aligner<M> {
    /// # Errors
    /// Propagates a failure to read the stage position.
    pub fn new(stage: M) -> Result<Self> {
        let coordinates = stage.coordinates()?;
        Ok(Aligner { stage, coordinates })
    }

    #[inline]
    pub fn stage(&self) -> &M {
        &self.stage
    }

    #[inline]
    pub fn stage_mut(&mut self) -> &mut M {
        &mut self.stage
    }

    pub fn into_stage(self) -> M {
        self.stage
    }

    /// Last position found by [`Aligner::auto_align`] or
    /// [`Aligner::find_first_signal`].
    #[inline]
    #[must_use]
    pub fn coordinates(&self) -> (f64, f64) {
        self.coordinates
    }

    /// # Errors
    /// Propagates a failure to read the stage position.
    pub fn resolve(&self, start: StartPoint) -> Result<(f64, f64)> {
        match start {
            StartPoint::UseCurrent => self.stage.coordinates(),
            StartPoint::At(x, y) => Ok((x, y)),
        }
    }

    fn measure_cell<F>(
        &mut self,
        grid: &Grid,
        index: (usize, usize),
        cache: &mut MeasurementCache,
        profit: &mut F,
    ) -> Result<f64>
    where
        F: FnMut() -> Result<f64>,
    {
        self.stage.move_to(grid.coordinate(index.0, index.1))?;
        let value = profit()?;
        cache.record(index, value);
        Ok(value)
    }

    /// Hill climb over `grid` starting from the grid point nearest to `start`.
    ///
    /// Each round measures the not-yet-visited 8-neighbours of the current
    /// best cell, then moves to the best measured cell unless that is the
    /// current one. Among equal readings the first cell in row-major order is
    /// best, so the climb walks off plateaus towards lower indices. Neighbours
    /// outside the stage travel are never moved to. Stops at a local maximum;
    /// the stage is left at the last measured point.
    ///
    /// If a round leaves every reading identical (no signal gradient at all),
    /// the start cell is measured once more and the search ends there.
    ///
    /// # Errors
    /// [`Error::InvalidInput`] if the start cell lies outside the stage travel.
    /// Errors from the stage or the profit function propagate unchanged.
    pub fn search<F>(&mut self, grid: &Grid, start: (f64, f64), profit: &mut F) -> Result<SearchOutcome>
    where
        F: FnMut() -> Result<f64>,
    {
        let mut cursor = grid.nearest(start);
        let origin = grid.coordinate(cursor.0, cursor.1);
        if !self.stage.reachable(origin) {
            return Err(Error::InvalidInput(format!(
                "search start {origin:?} outside stage travel [0, {}]",
                self.stage.max_travel()
            )));
        }

        let mut cache = MeasurementCache::for_grid(grid);
        let mut current = self.measure_cell(grid, cursor, &mut cache, profit)?;
        let mut measurements = 1;
        let mut recenterings = 0;

        loop {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let Some(neighbour) = grid.offset(cursor, dx, dy) else {
                        continue;
                    };
                    if cache.is_visited(neighbour) {
                        continue;
                    }
                    if self.stage.reachable(grid.coordinate(neighbour.0, neighbour.1)) {
                        self.measure_cell(grid, neighbour, &mut cache, profit)?;
                        measurements += 1;
                    } else {
                        debug!("skipping out-of-travel cell {neighbour:?}");
                        cache.skip(neighbour);
                    }
                }
            }

            if cache.is_flat() {
                warn!("no profit gradient around {cursor:?}; re-measuring it and stopping");
                current = self.measure_cell(grid, cursor, &mut cache, profit)?;
                measurements += 1;
                break;
            }

            match cache.argmax() {
                Some((best, best_value)) if best != cursor => {
                    debug!("moving search cursor {cursor:?} -> {best:?} ({best_value})");
                    cursor = best;
                    current = best_value;
                    recenterings += 1;
                }
                _ => break,
            }
        }

        Ok(SearchOutcome {
            index: cursor,
            position: grid.coordinate(cursor.0, cursor.1),
            profit: current,
            measurements,
            recenterings,
            cache,
        })
    }

    /// Build a grid of `+/- span` around `start`, hill climb on it, move to
    /// the result and take a final reading there.
    ///
    /// # Errors
    /// Grid construction failures and anything [`Aligner::search`] returns.
    pub fn auto_align<F>(
        &mut self,
        start: StartPoint,
        span: f64,
        resolution: f64,
        profit: &mut F,
    ) -> Result<Alignment>
    where
        F: FnMut() -> Result<f64>,
    {
        let start = self.resolve(start)?;
        let grid = Grid::build(start, span, resolution)?;
        let outcome = self.search(&grid, start, profit)?;
        self.stage.move_to(outcome.position)?;
        self.coordinates = outcome.position;
        let final_profit = profit()?;
        info!(
            "aligned to ({:.4}, {:.4}) after {} measurements, profit {final_profit:.4e}",
            outcome.position.0, outcome.position.1, outcome.measurements
        );
        Ok(Alignment {
            position: outcome.position,
            profit: final_profit,
        })
    }

    // Scan one X column along Y, stopping once a reading reaches `threshold`.
    // Returns the best (iy, value) among the readings taken.
    fn measure_line<F>(
        &mut self,
        grid: &Grid,
        ix: usize,
        threshold: f64,
        cache: &mut MeasurementCache,
        profit: &mut F,
    ) -> Result<(Option<(usize, f64)>, usize)>
    where
        F: FnMut() -> Result<f64>,
    {
        let mut best: Option<(usize, f64)> = None;
        let mut measurements = 0;
        for (iy, &y) in grid.ys.iter().enumerate() {
            if !self.stage.within_travel(y) {
                continue;
            }
            self.stage.set_position(Axis::Y, y)?;
            let value = profit()?;
            measurements += 1;
            cache.record((ix, iy), value);
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((iy, value));
            }
            if value >= threshold {
                break;
            }
        }
        Ok((best, measurements))
    }

    /// Look for the first sign of a signal, scanning X columns outwards from
    /// `center` and stopping as soon as a column reaches `threshold`.
    ///
    /// A column that only reaches `soft_threshold` triggers a local
    /// [`Aligner::search`] from its best point; the hit is accepted if a fresh
    /// reading at the search result reaches `threshold`, otherwise the soft
    /// threshold doubles and scanning resumes.
    ///
    /// Returns the best measured cell (the stage is moved there), or the
    /// current position straight away if the first reading already exceeds
    /// `threshold`.
    ///
    /// # Errors
    /// Grid construction failures; stage and profit errors propagate.
    pub fn find_first_signal<F>(
        &mut self,
        center: StartPoint,
        span: f64,
        resolution: f64,
        profit: &mut F,
        threshold: f64,
        soft_threshold: Option<f64>,
    ) -> Result<FirstSignal>
    where
        F: FnMut() -> Result<f64>,
    {
        let center = self.resolve(center)?;
        let initial = profit()?;
        if initial > threshold {
            info!("signal {initial:.4e} already above threshold, skipping scan");
            return Ok(FirstSignal {
                position: self.stage.coordinates()?,
                profit: initial,
                measurements: 1,
            });
        }

        let grid = Grid::build(center, span, resolution)?;
        let (_, x_order) = permute_outwards(&grid.xs);
        let mut cache = MeasurementCache::for_grid(&grid);
        let mut soft_threshold = soft_threshold;
        let mut measurements = 1;

        for ix in x_order {
            let x = grid.xs[ix];
            if !self.stage.within_travel(x) {
                continue;
            }
            self.stage.set_position(Axis::X, x)?;
            let (column_best, taken) = self.measure_line(&grid, ix, threshold, &mut cache, profit)?;
            measurements += taken;
            let Some((iy, column_max)) = column_best else {
                continue;
            };
            if column_max >= threshold {
                break;
            }
            let Some(soft) = soft_threshold else {
                continue;
            };
            if column_max < soft {
                continue;
            }

            let peak = grid.coordinate(ix, iy);
            info!("attempting micro-optimization at ({:.4}, {:.4})...", peak.0, peak.1);
            let local = self.search(&grid, peak, profit)?;
            measurements += local.measurements;
            cache.merge(&local.cache);
            self.stage.move_to(local.position)?;
            let new_profit = profit()?;
            measurements += 1;
            cache.record(local.index, new_profit);
            if new_profit >= threshold {
                info!(
                    "micro-optimization successful: found signal at ({:.4}, {:.4})",
                    local.position.0, local.position.1
                );
                break;
            }
            info!("micro-optimization failed");
            soft_threshold = Some(soft * 2.0);
            self.stage.move_to(peak)?;
        }

        let Some((index, best)) = cache.argmax() else {
            warn!("no grid column within stage travel; staying put");
            return Ok(FirstSignal {
                position: self.stage.coordinates()?,
                profit: initial,
                measurements,
            });
        };
        let position = grid.coordinate(index.0, index.1);
        self.stage.move_to(position)?;
        self.coordinates = position;
        Ok(FirstSignal {
            position,
            profit: best,
            measurements,
        })
    }
}
