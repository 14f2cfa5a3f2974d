use nalgebra::Vector3;
use rand::prelude::*;
use rayon::prelude::*;

use crate::grid::{UniformGrid, within_radius};
use crate::obstacles::Obstacle;
use crate::params::SimulationParameters;
use crate::random::rand_unit_vec;

/// Depth of the band inside each wall where the wall pushes back.
pub const WALL_MARGIN: f32 = 4.0;
pub const WALL_ACCELERATION: f32 = 15.0;
/// Distance beyond an obstacle's surface at which it starts pushing.
pub const OBSTACLE_MARGIN: f32 = 2.0;
pub const OBSTACLE_ACCELERATION: f32 = 15.0;

// Neighbors closer than this are treated as coincident.
const COINCIDENT_DISTANCE_SQUARED: f32 = 1e-12;

/// Source of neighbor candidates for the force pass.
pub trait NeighborSearch: Sync {
    /// Calls `f` for every agent other than `agent` within `radius` of it.
    fn for_each_neighbor<F: FnMut(usize)>(
        &self,
        agent: usize,
        positions: &[Vector3<f32>],
        radius: f32,
        f: F,
    );
}

/// All-pairs scan. The reference the grid is checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForce;

impl NeighborSearch for BruteForce {
    fn for_each_neighbor<F: FnMut(usize)>(
        &self,
        agent: usize,
        positions: &[Vector3<f32>],
        radius: f32,
        mut f: F,
    ) {
        let origin = &positions[agent];
        for (other, position) in positions.iter().enumerate() {
            if other != agent && within_radius(origin, position, radius) {
                f(other);
            }
        }
    }
}

impl NeighborSearch for UniformGrid {
    fn for_each_neighbor<F: FnMut(usize)>(
        &self,
        agent: usize,
        positions: &[Vector3<f32>],
        radius: f32,
        f: F,
    ) {
        UniformGrid::for_each_neighbor(self, agent, positions, radius, f);
    }
}

/// Previous-frame state the force pass reads.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub positions: &'a [Vector3<f32>],
    pub velocities: &'a [Vector3<f32>],
}

/// Accumulated neighbor terms for one agent. The averages are already
/// divided by `count`, and stay zero when there are no neighbors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighborhood {
    pub separation: Vector3<f32>,
    pub avg_velocity: Vector3<f32>,
    pub avg_position: Vector3<f32>,
    pub count: usize,
}

impl Default for Neighborhood {
    fn default() -> Self {
        Neighborhood {
            separation: Vector3::zeros(),
            avg_velocity: Vector3::zeros(),
            avg_position: Vector3::zeros(),
            count: 0,
        }
    }
}

impl Neighborhood {
    fn add(&mut self, own: &Vector3<f32>, position: &Vector3<f32>, velocity: &Vector3<f32>) {
        let offset = own - position;
        let distance_squared = offset.norm_squared();
        if distance_squared > COINCIDENT_DISTANCE_SQUARED {
            self.separation += offset.normalize() / distance_squared;
        }
        self.avg_velocity += velocity;
        self.avg_position += position;
        self.count += 1;
    }

    fn averaged(mut self) -> Self {
        if self.count > 0 {
            let count = self.count as f32;
            self.avg_velocity /= count;
            self.avg_position /= count;
        }
        self
    }
}

/// Weighted separation, alignment and cohesion. An agent without neighbors
/// gets nothing from these terms.
pub fn flocking_acceleration(
    params: &SimulationParameters,
    neighborhood: &Neighborhood,
    position: &Vector3<f32>,
    velocity: &Vector3<f32>,
) -> Vector3<f32> {
    let mut acceleration = neighborhood.separation * params.separation;
    if neighborhood.count > 0 {
        acceleration += (neighborhood.avg_velocity - velocity) * params.alignment;
        acceleration += (neighborhood.avg_position - position) * params.cohesion;
    }
    acceleration
}

/// Soft push away from the walls. Zero outside the margin band, growing
/// linearly with depth into it, and still growing past the wall.
pub fn boundary_acceleration(aquarium_size: &Vector3<f32>, position: &Vector3<f32>) -> Vector3<f32> {
    let mut acceleration = Vector3::<f32>::zeros();
    for axis in 0..3 {
        let half = aquarium_size[axis] / 2.0;
        let margin = WALL_MARGIN.min(half);
        if margin <= 0.0 {
            continue;
        }
        let inner = half - margin;
        let p = position[axis];
        if p > inner {
            acceleration[axis] -= WALL_ACCELERATION * (p - inner) / margin;
        } else if p < -inner {
            acceleration[axis] += WALL_ACCELERATION * (-inner - p) / margin;
        }
    }
    acceleration
}

/// Push away from every obstacle whose influence shell contains `position`.
pub fn obstacle_acceleration(obstacles: &[Obstacle], position: &Vector3<f32>) -> Vector3<f32> {
    let mut acceleration = Vector3::<f32>::zeros();
    for obstacle in obstacles {
        let offset = position - obstacle.center;
        let distance = offset.norm();
        let reach = obstacle.radius + OBSTACLE_MARGIN;
        if distance >= reach {
            continue;
        }
        let intensity = (reach - distance) / OBSTACLE_MARGIN;
        // Dead center has no preferred direction; push upward.
        let away = offset.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::y);
        acceleration += away * (intensity * OBSTACLE_ACCELERATION);
    }
    acceleration
}

/// Computes every agent's acceleration from a read-only snapshot.
pub struct ForceEvaluator<'a, S> {
    search: &'a S,
    params: &'a SimulationParameters,
    obstacles: &'a [Obstacle],
}

impl<'a, S: NeighborSearch> ForceEvaluator<'a, S> {
    pub fn new(search: &'a S, params: &'a SimulationParameters, obstacles: &'a [Obstacle]) -> Self {
        ForceEvaluator {
            search,
            params,
            obstacles,
        }
    }

    pub fn neighborhood(&self, snapshot: Snapshot<'_>, agent: usize) -> Neighborhood {
        let own = &snapshot.positions[agent];
        let mut neighborhood = Neighborhood::default();
        self.search
            .for_each_neighbor(agent, snapshot.positions, self.params.distance, |other| {
                neighborhood.add(own, &snapshot.positions[other], &snapshot.velocities[other]);
            });
        neighborhood.averaged()
    }

    /// Total acceleration of one agent. Reads only the snapshot.
    pub fn acceleration<R: Rng + ?Sized>(
        &self,
        snapshot: Snapshot<'_>,
        agent: usize,
        rng: &mut R,
    ) -> Vector3<f32> {
        let position = &snapshot.positions[agent];
        let velocity = &snapshot.velocities[agent];
        let neighborhood = self.neighborhood(snapshot, agent);

        let mut acceleration = flocking_acceleration(self.params, &neighborhood, position, velocity);
        if self.params.noise > 0.0 {
            acceleration += rand_unit_vec(rng) * self.params.noise;
        }
        acceleration += boundary_acceleration(&self.params.aquarium_size, position);
        if !self.obstacles.is_empty() {
            acceleration += obstacle_acceleration(self.obstacles, position);
        }
        acceleration
    }

    pub fn evaluate(&self, snapshot: Snapshot<'_>, out: &mut [Vector3<f32>]) {
        debug_assert_eq!(snapshot.positions.len(), out.len());
        out.par_iter_mut()
            .enumerate()
            .for_each_init(rand::rng, |rng, (agent, acceleration)| {
                *acceleration = self.acceleration(snapshot, agent, rng);
            });
    }
}
