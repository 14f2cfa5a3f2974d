use std::ops::{Range, RangeInclusive};
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;

use crate::error::{ConfigError, SimulationError, try_filled};
use crate::params::{MAX_CELL_COUNT, SimulationParameters};

// In cell units. Covers f32 rounding for coordinates up to the largest
// aquarium with the smallest cells.
const OCTANT_TIE_TOLERANCE: f32 = 1e-4;

/// Flattened cell index, `x + y * nx + z * nx * ny`.
pub type CellId = u32;

/// How the agent permutation is ordered by cell key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortStrategy {
    /// Parallel unstable comparison sort on the keys.
    #[default]
    Comparison,
    /// Per-cell counts, prefix sum, scatter.
    Counting,
}

/// Which cells around an agent are scanned for neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stencil {
    /// The full 3x3x3 block around the agent's cell.
    #[default]
    Full,
    /// 2x2x2 block: per axis, the agent's cell plus the one on the side of
    /// the half it occupies. Exact because cells are twice the radius wide.
    /// An axis where the agent sits at mid-cell scans both sides.
    Octant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridConfig {
    pub sort: SortStrategy,
    pub stencil: Stencil,
}

impl GridConfig {
    pub const SORT_VAR1: GridConfig = GridConfig {
        sort: SortStrategy::Comparison,
        stencil: Stencil::Full,
    };
    pub const SORT_VAR2: GridConfig = GridConfig {
        sort: SortStrategy::Counting,
        stencil: Stencil::Octant,
    };
}

/// True when `a` and `b` are no further apart than `radius`. Shared by every
/// neighbor search so they agree on boundary cases.
#[inline]
pub fn within_radius(a: &Vector3<f32>, b: &Vector3<f32>, radius: f32) -> bool {
    (a - b).norm_squared() <= radius * radius
}

/// Geometry of the grid for the current parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Layout {
    cell_size: f32,
    half_extent: Vector3<f32>,
    dims: [usize; 3],
}

impl Layout {
    fn cell_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Unclamped fractional cell coordinate along one axis.
    #[inline]
    fn scaled(&self, coord: f32, axis: usize) -> f32 {
        (coord + self.half_extent[axis]) / self.cell_size
    }

    #[inline]
    fn clamp_axis(&self, cell: isize, axis: usize) -> usize {
        cell.clamp(0, self.dims[axis] as isize - 1) as usize
    }

    #[inline]
    fn axis_cell(&self, coord: f32, axis: usize) -> usize {
        self.clamp_axis(self.scaled(coord, axis).floor() as isize, axis)
    }

    #[inline]
    fn cell_coords(&self, position: &Vector3<f32>) -> [usize; 3] {
        [
            self.axis_cell(position.x, 0),
            self.axis_cell(position.y, 1),
            self.axis_cell(position.z, 2),
        ]
    }

    #[inline]
    fn flatten(&self, x: usize, y: usize, z: usize) -> CellId {
        (x + y * self.dims[0] + z * self.dims[0] * self.dims[1]) as CellId
    }

    #[inline]
    fn key(&self, position: &Vector3<f32>) -> CellId {
        let [x, y, z] = self.cell_coords(position);
        self.flatten(x, y, z)
    }

    /// Inclusive span of cells to scan along one axis.
    fn span(&self, coord: f32, axis: usize, stencil: Stencil) -> RangeInclusive<usize> {
        match stencil {
            Stencil::Full => {
                let own = self.axis_cell(coord, axis);
                own.saturating_sub(1)..=(own + 1).min(self.dims[axis] - 1)
            }
            Stencil::Octant => {
                let scaled = self.scaled(coord, axis);
                let own = scaled.floor();
                let offset = scaled - own;
                let own = own as isize;
                // Close to the middle of a cell, rounding in `scaled` and in
                // the distance test can disagree about which side a neighbor
                // at exactly `distance` is on. Scan both.
                let (low, high) = if (offset - 0.5).abs() <= OCTANT_TIE_TOLERANCE {
                    (own.saturating_sub(1), own.saturating_add(1))
                } else if offset > 0.5 {
                    (own, own.saturating_add(1))
                } else {
                    (own.saturating_sub(1), own)
                };
                self.clamp_axis(low, axis)..=self.clamp_axis(high, axis)
            }
        }
    }
}

/// Uniform grid over the aquarium, rebuilt from scratch every frame.
///
/// Building assigns each agent a cell key, orders agent indices by key, and
/// records for every occupied cell the contiguous `[start, end)` slice of
/// that ordering holding its agents. Unoccupied cells report an empty range.
/// All working buffers are sized at construction for the maximum agent and
/// cell counts, so building never allocates.
#[derive(Debug)]
pub struct UniformGrid {
    config: GridConfig,
    capacity: usize,
    layout: Layout,
    active: usize,
    boid_cell: Vec<CellId>,
    sorted: Vec<u32>,
    cell_start: Vec<u32>,
    cell_end: Vec<u32>,
    occupied: Vec<CellId>,
    counts: Vec<AtomicU32>,
    cursor: Vec<u32>,
}

impl UniformGrid {
    pub fn with_capacity(capacity: usize, config: GridConfig) -> Result<Self, SimulationError> {
        let mut occupied = Vec::new();
        occupied
            .try_reserve_exact(capacity)
            .map_err(|source| SimulationError::Allocation {
                what: "occupied cell list",
                len: capacity,
                source,
            })?;
        let mut counts = Vec::new();
        counts
            .try_reserve_exact(MAX_CELL_COUNT)
            .map_err(|source| SimulationError::Allocation {
                what: "cell counters",
                len: MAX_CELL_COUNT,
                source,
            })?;
        counts.extend((0..MAX_CELL_COUNT).map(|_| AtomicU32::new(0)));

        Ok(UniformGrid {
            config,
            capacity,
            layout: Layout {
                cell_size: 1.0,
                half_extent: Vector3::zeros(),
                dims: [1, 1, 1],
            },
            active: 0,
            boid_cell: try_filled("boid cell keys", capacity, 0)?,
            sorted: try_filled("sorted boid indices", capacity, 0)?,
            cell_start: try_filled("cell starts", MAX_CELL_COUNT, 0)?,
            cell_end: try_filled("cell ends", MAX_CELL_COUNT, 0)?,
            occupied,
            counts,
            cursor: try_filled("cell cursors", MAX_CELL_COUNT, 0)?,
        })
    }

    pub fn config(&self) -> GridConfig {
        self.config
    }

    pub fn set_config(&mut self, config: GridConfig) {
        self.config = config;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cell_size(&self) -> f32 {
        self.layout.cell_size
    }

    pub fn dims(&self) -> [usize; 3] {
        self.layout.dims
    }

    pub fn cell_count(&self) -> usize {
        self.layout.cell_count()
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Derives the grid geometry from `params`, rejecting configurations the
    /// fixed buffers cannot hold.
    pub fn configure(&mut self, params: &SimulationParameters) -> Result<(), ConfigError> {
        let cell_size = params.cell_size();
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ConfigError::InvalidDistance(params.distance));
        }
        if params.boids_count > self.capacity {
            return Err(ConfigError::TooManyBoids {
                count: params.boids_count,
                capacity: self.capacity,
            });
        }
        let mut dims = [1usize; 3];
        for (axis, dim) in dims.iter_mut().enumerate() {
            *dim = ((params.aquarium_size[axis] / cell_size).ceil() as usize).max(1);
        }
        let cells = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .unwrap_or(usize::MAX);
        if cells > MAX_CELL_COUNT {
            return Err(ConfigError::GridTooLarge {
                cells,
                max: MAX_CELL_COUNT,
            });
        }

        let layout = Layout {
            cell_size,
            half_extent: params.half_extent(),
            dims,
        };
        if layout != self.layout {
            if layout.dims != self.layout.dims {
                debug!("grid resized to {dims:?} cells of size {cell_size}");
            }
            self.clear_ranges();
            self.active = 0;
            self.layout = layout;
        }
        Ok(())
    }

    /// Rebuilds the grid for `positions`: key assignment, sort by key, then
    /// range extraction. Each phase completes before the next starts.
    pub fn build(
        &mut self,
        params: &SimulationParameters,
        positions: &[Vector3<f32>],
    ) -> Result<(), ConfigError> {
        self.configure(params)?;
        let n = positions.len();
        if n > self.capacity {
            return Err(ConfigError::TooManyBoids {
                count: n,
                capacity: self.capacity,
            });
        }
        self.clear_ranges();
        self.active = n;

        let layout = self.layout;
        self.boid_cell[..n]
            .par_iter_mut()
            .zip(positions.par_iter())
            .for_each(|(key, position)| *key = layout.key(position));

        match self.config.sort {
            SortStrategy::Comparison => self.sort_by_comparison(),
            SortStrategy::Counting => self.sort_by_counting(),
        }
        self.extract_ranges();
        Ok(())
    }

    fn sort_by_comparison(&mut self) {
        let n = self.active;
        let keys = &self.boid_cell[..n];
        let order = &mut self.sorted[..n];
        order
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| *slot = i as u32);
        order.par_sort_unstable_by_key(|&i| keys[i as usize]);
    }

    fn sort_by_counting(&mut self) {
        let n = self.active;
        let cells = self.layout.cell_count();
        let keys = &self.boid_cell[..n];
        let counts = &self.counts[..cells];

        counts.par_iter().for_each(|count| count.store(0, Ordering::Relaxed));
        keys.par_iter().for_each(|&key| {
            counts[key as usize].fetch_add(1, Ordering::Relaxed);
        });

        let mut running = 0u32;
        for (count, cursor) in counts.iter().zip(self.cursor[..cells].iter_mut()) {
            *cursor = running;
            running += count.load(Ordering::Relaxed);
        }

        for (agent, &key) in keys.iter().enumerate() {
            let cursor = &mut self.cursor[key as usize];
            self.sorted[*cursor as usize] = agent as u32;
            *cursor += 1;
        }
    }

    fn extract_ranges(&mut self) {
        let mut previous = None;
        for (slot, &agent) in self.sorted[..self.active].iter().enumerate() {
            let key = self.boid_cell[agent as usize];
            if previous != Some(key) {
                self.cell_start[key as usize] = slot as u32;
                self.occupied.push(key);
                previous = Some(key);
            }
            self.cell_end[key as usize] = slot as u32 + 1;
        }
    }

    fn clear_ranges(&mut self) {
        for key in self.occupied.drain(..) {
            self.cell_start[key as usize] = 0;
            self.cell_end[key as usize] = 0;
        }
    }

    pub fn cell_coords(&self, position: &Vector3<f32>) -> [usize; 3] {
        self.layout.cell_coords(position)
    }

    pub fn flatten(&self, x: usize, y: usize, z: usize) -> CellId {
        self.layout.flatten(x, y, z)
    }

    pub fn cell_key(&self, position: &Vector3<f32>) -> CellId {
        self.layout.key(position)
    }

    pub fn cell_of(&self, agent: usize) -> Option<CellId> {
        (agent < self.active).then(|| self.boid_cell[agent])
    }

    pub fn sorted_indices(&self) -> &[u32] {
        &self.sorted[..self.active]
    }

    /// `[start, end)` slice of `sorted_indices()` belonging to `cell`.
    pub fn cell_range(&self, cell: CellId) -> Range<usize> {
        let cell = cell as usize;
        if cell >= self.layout.cell_count() {
            return 0..0;
        }
        self.cell_start[cell] as usize..self.cell_end[cell] as usize
    }

    pub fn cell_members(&self, cell: CellId) -> &[u32] {
        &self.sorted[self.cell_range(cell)]
    }

    /// Distinct cells that hold at least one agent, in key order.
    pub fn occupied_cells(&self) -> &[CellId] {
        &self.occupied
    }

    /// Calls `f` for every agent in the stencil around `position`, without
    /// any distance test.
    pub fn for_each_candidate<F: FnMut(usize)>(&self, position: &Vector3<f32>, mut f: F) {
        let stencil = self.config.stencil;
        let xs = self.layout.span(position.x, 0, stencil);
        let ys = self.layout.span(position.y, 1, stencil);
        let zs = self.layout.span(position.z, 2, stencil);
        for z in zs {
            for y in ys.clone() {
                for x in xs.clone() {
                    for &agent in self.cell_members(self.layout.flatten(x, y, z)) {
                        f(agent as usize);
                    }
                }
            }
        }
    }

    /// Calls `f` for every agent other than `agent` within `radius` of it.
    /// `positions` must be the slice the grid was last built from.
    pub fn for_each_neighbor<F: FnMut(usize)>(
        &self,
        agent: usize,
        positions: &[Vector3<f32>],
        radius: f32,
        mut f: F,
    ) {
        let origin = &positions[agent];
        self.for_each_candidate(origin, |other| {
            if other != agent && within_radius(origin, &positions[other], radius) {
                f(other);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::random::rand_vec;

    fn params(distance: f32, size: f32, count: usize) -> SimulationParameters {
        SimulationParameters {
            distance,
            aquarium_size: Vector3::new(size, size, size),
            boids_count: count,
            ..Default::default()
        }
    }

    fn random_positions(seed: u64, count: usize, spread: f32) -> Vec<Vector3<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let half = Vector3::repeat(spread / 2.0);
        (0..count).map(|_| rand_vec(&mut rng, -half, half)).collect()
    }

    fn assert_range_integrity(grid: &UniformGrid, count: usize) {
        let mut seen = vec![0usize; count];
        let mut covered = 0;
        for cell in 0..grid.cell_count() as CellId {
            let range = grid.cell_range(cell);
            assert!(range.start <= range.end);
            for &agent in grid.cell_members(cell) {
                assert_eq!(grid.cell_of(agent as usize), Some(cell));
                seen[agent as usize] += 1;
            }
            covered += range.len();
        }
        assert_eq!(covered, count);
        assert!(seen.iter().all(|&hits| hits == 1));
    }

    #[test]
    fn flatten_matches_layout() {
        let mut grid = UniformGrid::with_capacity(8, GridConfig::default()).unwrap();
        grid.configure(&params(1.0, 10.0, 0)).unwrap();
        assert_eq!(grid.dims(), [5, 5, 5]);
        assert_eq!(grid.flatten(1, 2, 3), 1 + 2 * 5 + 3 * 25);
        assert_eq!(grid.cell_key(&Vector3::new(-5.0, -5.0, -5.0)), 0);
        assert_eq!(grid.cell_key(&Vector3::new(4.9, 4.9, 4.9)), 124);
    }

    #[test]
    fn out_of_bounds_positions_are_clamped() {
        let mut grid = UniformGrid::with_capacity(4, GridConfig::default()).unwrap();
        let positions = vec![
            Vector3::new(-500.0, 0.0, 0.0),
            Vector3::new(500.0, 500.0, 500.0),
            Vector3::new(f32::NAN, 0.0, f32::INFINITY),
            Vector3::new(5.0, 5.0, 5.0),
        ];
        grid.build(&params(1.0, 10.0, 4), &positions).unwrap();
        assert_eq!(grid.cell_coords(&positions[0]), [0, 2, 2]);
        assert_eq!(grid.cell_coords(&positions[1]), [4, 4, 4]);
        assert_eq!(grid.cell_coords(&positions[3]), [4, 4, 4]);
        assert!((grid.cell_key(&positions[2]) as usize) < grid.cell_count());
        assert_range_integrity(&grid, 4);
    }

    #[test]
    fn empty_cells_report_empty_ranges() {
        let mut grid = UniformGrid::with_capacity(2, GridConfig::default()).unwrap();
        let positions = vec![Vector3::new(-4.5, -4.5, -4.5), Vector3::new(-4.4, -4.5, -4.5)];
        grid.build(&params(1.0, 10.0, 2), &positions).unwrap();
        assert_eq!(grid.cell_range(0), 0..2);
        for cell in 1..grid.cell_count() as CellId {
            assert!(grid.cell_range(cell).is_empty());
        }
        assert!(grid.cell_range(u32::MAX).is_empty());
    }

    #[test]
    fn stale_ranges_are_cleared_between_builds() {
        let mut grid = UniformGrid::with_capacity(1, GridConfig::default()).unwrap();
        let p = params(1.0, 10.0, 1);
        grid.build(&p, &[Vector3::new(-4.5, -4.5, -4.5)]).unwrap();
        grid.build(&p, &[Vector3::new(4.5, 4.5, 4.5)]).unwrap();
        assert!(grid.cell_range(0).is_empty());
        assert_eq!(grid.cell_range(124), 0..1);
        assert_eq!(grid.occupied_cells(), &[124]);
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let mut grid = UniformGrid::with_capacity(1, GridConfig::default()).unwrap();
        let p = SimulationParameters {
            distance: 0.25,
            aquarium_size: Vector3::new(100.0, 100.0, 100.0),
            boids_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            grid.configure(&p),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn count_over_capacity_is_rejected() {
        let mut grid = UniformGrid::with_capacity(2, GridConfig::default()).unwrap();
        assert!(matches!(
            grid.configure(&params(1.0, 10.0, 3)),
            Err(ConfigError::TooManyBoids { .. })
        ));
    }

    #[test]
    fn both_sorts_produce_identical_ranges() {
        let positions = random_positions(17, 500, 30.0);
        let p = params(2.0, 30.0, positions.len());
        let mut by_comparison = UniformGrid::with_capacity(500, GridConfig::SORT_VAR1).unwrap();
        let mut by_counting = UniformGrid::with_capacity(500, GridConfig::SORT_VAR2).unwrap();
        by_comparison.build(&p, &positions).unwrap();
        by_counting.build(&p, &positions).unwrap();

        assert_eq!(by_comparison.occupied_cells(), by_counting.occupied_cells());
        for &cell in by_comparison.occupied_cells() {
            assert_eq!(by_comparison.cell_range(cell), by_counting.cell_range(cell));
            let mut a = by_comparison.cell_members(cell).to_vec();
            let mut b = by_counting.cell_members(cell).to_vec();
            a.sort_unstable();
            b.sort_unstable();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn stencils_find_exactly_the_brute_force_neighbors() {
        // Spread past the walls so clamped edge cells are exercised too.
        let positions = random_positions(23, 400, 36.0);
        let distance = 2.5;
        let p = params(distance, 30.0, positions.len());
        for config in [GridConfig::SORT_VAR1, GridConfig::SORT_VAR2] {
            let mut grid = UniformGrid::with_capacity(400, config).unwrap();
            grid.build(&p, &positions).unwrap();
            for i in 0..positions.len() {
                let mut found = Vec::new();
                grid.for_each_neighbor(i, &positions, distance, |j| found.push(j));
                found.sort_unstable();
                let expected: Vec<usize> = (0..positions.len())
                    .filter(|&j| j != i && within_radius(&positions[i], &positions[j], distance))
                    .collect();
                assert_eq!(found, expected, "agent {i} with {config:?}");
            }
        }
    }

    #[test]
    fn octant_scans_both_sides_at_mid_cell() {
        // distance 1, cells of 2: x = 0 sits at exactly 2.5 cells.
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(-1.5, 0.0, 0.0),
            Vector3::new(2.5, 0.0, 0.0),
            Vector3::new(0.0, -1.0 - 1e-5, 0.0),
        ];
        let mut grid = UniformGrid::with_capacity(4, GridConfig::SORT_VAR2).unwrap();
        grid.build(&params(1.0, 10.0, positions.len()), &positions).unwrap();

        let mut candidates = Vec::new();
        grid.for_each_candidate(&positions[0], |j| candidates.push(j));
        candidates.sort_unstable();
        assert_eq!(candidates, vec![0, 1, 2, 3]);
    }

    proptest! {
        #[test]
        fn every_agent_lands_in_exactly_one_range(
            coords in prop::collection::vec((-60.0f32..60.0, -60.0f32..60.0, -60.0f32..60.0), 0..200),
            distance in 0.5f32..10.0,
            counting in any::<bool>(),
        ) {
            let positions: Vec<Vector3<f32>> =
                coords.iter().map(|&(x, y, z)| Vector3::new(x, y, z)).collect();
            let config = if counting { GridConfig::SORT_VAR2 } else { GridConfig::SORT_VAR1 };
            let mut grid = UniformGrid::with_capacity(200, config).unwrap();
            grid.build(&params(distance, 50.0, positions.len()), &positions).unwrap();
            assert_range_integrity(&grid, positions.len());
        }
    }
}
