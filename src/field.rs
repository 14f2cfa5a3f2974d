use log::debug;
use nalgebra::{Vector3, Vector4};
use rand::prelude::*;

use crate::error::{ConfigError, SimulationError, try_filled};
use crate::params::{MAX_BOID_COUNT, SimulationParameters};
use crate::random::{rand_aquarium_position, rand_unit_vec};

/// Orientation every boid starts with: facing +z, with +y up and +x right.
pub const DEFAULT_FORWARD: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);
pub const DEFAULT_UP: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);
pub const DEFAULT_RIGHT: Vector3<f32> = Vector3::new(1.0, 0.0, 0.0);

/// One generation of kinematic state. The field keeps two and swaps them
/// once a frame has been fully integrated.
#[derive(Debug, Clone)]
pub(crate) struct Generation {
    pub(crate) position: Vec<Vector3<f32>>,
    pub(crate) velocity: Vec<Vector3<f32>>,
}

impl Generation {
    fn with_capacity(capacity: usize) -> Result<Self, SimulationError> {
        Ok(Generation {
            position: try_filled("positions", capacity, Vector3::zeros())?,
            velocity: try_filled("velocities", capacity, Vector3::zeros())?,
        })
    }
}

/// Everything the renderer needs to draw one boid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoidInstance {
    pub position: Vector3<f32>,
    pub forward: Vector3<f32>,
    pub up: Vector3<f32>,
    pub right: Vector3<f32>,
}

/// Borrowed views the integration phase works on: the generation being read,
/// the one being written, and the orientation basis updated in place.
pub(crate) struct IntegrationView<'a> {
    pub(crate) position: &'a [Vector3<f32>],
    pub(crate) velocity: &'a [Vector3<f32>],
    pub(crate) acceleration: &'a [Vector3<f32>],
    pub(crate) next_position: &'a mut [Vector3<f32>],
    pub(crate) next_velocity: &'a mut [Vector3<f32>],
    pub(crate) forward: &'a mut [Vector3<f32>],
    pub(crate) up: &'a mut [Vector3<f32>],
    pub(crate) right: &'a mut [Vector3<f32>],
}

/// Structure-of-arrays state for every boid, allocated once at a fixed
/// capacity. Only the first `active_count()` entries take part in a frame.
#[derive(Debug, Clone)]
pub struct BoidField {
    capacity: usize,
    active: usize,
    aquarium_size: Vector3<f32>,
    current: Generation,
    next: Generation,
    acceleration: Vec<Vector3<f32>>,
    forward: Vec<Vector3<f32>>,
    up: Vec<Vector3<f32>>,
    right: Vec<Vector3<f32>>,
}

impl BoidField {
    pub fn new() -> Result<Self, SimulationError> {
        Self::with_capacity(MAX_BOID_COUNT)
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, SimulationError> {
        if capacity > MAX_BOID_COUNT {
            return Err(ConfigError::TooManyBoids {
                count: capacity,
                capacity: MAX_BOID_COUNT,
            }
            .into());
        }
        Ok(BoidField {
            capacity,
            active: 0,
            aquarium_size: Vector3::zeros(),
            current: Generation::with_capacity(capacity)?,
            next: Generation::with_capacity(capacity)?,
            acceleration: try_filled("accelerations", capacity, Vector3::zeros())?,
            forward: try_filled("forward vectors", capacity, DEFAULT_FORWARD)?,
            up: try_filled("up vectors", capacity, DEFAULT_UP)?,
            right: try_filled("right vectors", capacity, DEFAULT_RIGHT)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    pub fn aquarium_size(&self) -> Vector3<f32> {
        self.aquarium_size
    }

    /// True when the active count or the volume no longer match `params`.
    pub fn needs_reset(&self, params: &SimulationParameters) -> bool {
        self.active != params.boids_count || self.aquarium_size != params.aquarium_size
    }

    /// Scatters `params.boids_count` boids uniformly through the aquarium
    /// with the default orientation and a random unit velocity. Entries past
    /// the active count are left as they were.
    pub fn reset<R: Rng + ?Sized>(
        &mut self,
        params: &SimulationParameters,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        let count = self.check_count(params.boids_count)?;
        for i in 0..count {
            self.current.position[i] = rand_aquarium_position(rng, params.aquarium_size);
            self.current.velocity[i] = rand_unit_vec(rng);
        }
        self.restart(count, params.aquarium_size);
        debug!(
            "reset {count} boids in aquarium {:?}",
            params.aquarium_size.as_slice()
        );
        Ok(())
    }

    /// Seeds explicit positions and velocities with the default orientation.
    pub fn load(
        &mut self,
        params: &SimulationParameters,
        positions: &[Vector3<f32>],
        velocities: &[Vector3<f32>],
    ) -> Result<(), ConfigError> {
        if positions.len() != params.boids_count {
            return Err(ConfigError::LengthMismatch {
                expected: params.boids_count,
                actual: positions.len(),
            });
        }
        if velocities.len() != positions.len() {
            return Err(ConfigError::LengthMismatch {
                expected: positions.len(),
                actual: velocities.len(),
            });
        }
        let count = self.check_count(positions.len())?;
        self.current.position[..count].copy_from_slice(positions);
        self.current.velocity[..count].copy_from_slice(velocities);
        self.restart(count, params.aquarium_size);
        Ok(())
    }

    fn check_count(&self, count: usize) -> Result<usize, ConfigError> {
        if count > self.capacity {
            return Err(ConfigError::TooManyBoids {
                count,
                capacity: self.capacity,
            });
        }
        Ok(count)
    }

    fn restart(&mut self, count: usize, aquarium_size: Vector3<f32>) {
        self.acceleration[..count].fill(Vector3::zeros());
        self.forward[..count].fill(DEFAULT_FORWARD);
        self.up[..count].fill(DEFAULT_UP);
        self.right[..count].fill(DEFAULT_RIGHT);
        self.active = count;
        self.aquarium_size = aquarium_size;
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.current.position[..self.active]
    }

    pub fn velocities(&self) -> &[Vector3<f32>] {
        &self.current.velocity[..self.active]
    }

    pub fn accelerations(&self) -> &[Vector3<f32>] {
        &self.acceleration[..self.active]
    }

    pub fn forwards(&self) -> &[Vector3<f32>] {
        &self.forward[..self.active]
    }

    pub fn ups(&self) -> &[Vector3<f32>] {
        &self.up[..self.active]
    }

    pub fn rights(&self) -> &[Vector3<f32>] {
        &self.right[..self.active]
    }

    pub fn instance(&self, index: usize) -> Option<BoidInstance> {
        (index < self.active).then(|| BoidInstance {
            position: self.current.position[index],
            forward: self.forward[index],
            up: self.up[index],
            right: self.right[index],
        })
    }

    pub fn instances(&self) -> impl ExactSizeIterator<Item = BoidInstance> + '_ {
        (0..self.active).map(move |i| BoidInstance {
            position: self.current.position[i],
            forward: self.forward[i],
            up: self.up[i],
            right: self.right[i],
        })
    }

    /// Positions as homogeneous points, ready for a 4-component instance buffer.
    pub fn positions_homogeneous(&self) -> Vec<Vector4<f32>> {
        self.positions().iter().map(|p| p.push(1.0)).collect()
    }

    /// Read-only snapshot of the current generation alongside the
    /// acceleration buffer the force phase writes.
    pub(crate) fn force_view(&mut self) -> (&[Vector3<f32>], &[Vector3<f32>], &mut [Vector3<f32>]) {
        let n = self.active;
        (
            &self.current.position[..n],
            &self.current.velocity[..n],
            &mut self.acceleration[..n],
        )
    }

    pub(crate) fn integration_view(&mut self) -> IntegrationView<'_> {
        let n = self.active;
        IntegrationView {
            position: &self.current.position[..n],
            velocity: &self.current.velocity[..n],
            acceleration: &self.acceleration[..n],
            next_position: &mut self.next.position[..n],
            next_velocity: &mut self.next.velocity[..n],
            forward: &mut self.forward[..n],
            up: &mut self.up[..n],
            right: &mut self.right[..n],
        }
    }

    pub(crate) fn swap_generations(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn params(count: usize) -> SimulationParameters {
        SimulationParameters {
            boids_count: count,
            aquarium_size: Vector3::new(10.0, 20.0, 30.0),
            ..Default::default()
        }
    }

    #[test]
    fn reset_fills_active_prefix() {
        let mut field = BoidField::with_capacity(64).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        field.reset(&params(40), &mut rng).unwrap();

        assert_eq!(field.active_count(), 40);
        assert_eq!(field.positions().len(), 40);
        for p in field.positions() {
            assert!(p.x.abs() <= 5.0 && p.y.abs() <= 10.0 && p.z.abs() <= 15.0);
        }
        for v in field.velocities() {
            assert!((v.norm() - 1.0).abs() < 1e-5);
        }
        assert!(field.forwards().iter().all(|f| *f == DEFAULT_FORWARD));
        assert!(!field.needs_reset(&params(40)));
        assert!(field.needs_reset(&params(41)));
    }

    #[test]
    fn reset_rejects_count_over_capacity() {
        let mut field = BoidField::with_capacity(8).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(
            field.reset(&params(9), &mut rng),
            Err(ConfigError::TooManyBoids { count: 9, capacity: 8 })
        );
        assert_eq!(field.active_count(), 0);
    }

    #[test]
    fn capacity_over_maximum_is_rejected() {
        assert!(matches!(
            BoidField::with_capacity(MAX_BOID_COUNT + 1),
            Err(SimulationError::Config(ConfigError::TooManyBoids { .. }))
        ));
    }

    #[test]
    fn load_checks_lengths() {
        let mut field = BoidField::with_capacity(4).unwrap();
        let positions = [Vector3::zeros(), Vector3::x()];
        let velocities = [Vector3::zeros()];
        assert!(matches!(
            field.load(&params(2), &positions, &velocities),
            Err(ConfigError::LengthMismatch { .. })
        ));
        assert!(matches!(
            field.load(&params(3), &positions, &positions),
            Err(ConfigError::LengthMismatch { .. })
        ));
        field.load(&params(2), &positions, &positions).unwrap();
        assert_eq!(field.positions(), &positions);
    }

    #[test]
    fn homogeneous_positions_have_unit_w() {
        let mut field = BoidField::with_capacity(2).unwrap();
        let positions = [Vector3::new(1.0, 2.0, 3.0), Vector3::new(-1.0, 0.0, 4.0)];
        field.load(&params(2), &positions, &positions).unwrap();
        let out = field.positions_homogeneous();
        assert_eq!(out[0], Vector4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(out[1].w, 1.0);
        assert_eq!(field.instances().len(), 2);
        assert!(field.instance(2).is_none());
    }
}
