use std::time::Instant;

use log::{debug, trace};
use rand::prelude::*;

use crate::error::{ConfigError, SimulationError};
use crate::field::BoidField;
use crate::forces::{BruteForce, ForceEvaluator, Snapshot};
use crate::grid::{GridConfig, UniformGrid};
use crate::integrator::integrate_all;
use crate::obstacles::Obstacles;
use crate::params::{MAX_BOID_COUNT, SimulationParameters};

/// How neighbors are found during the force pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// All-pairs scan, O(n^2).
    Naive,
    /// Uniform grid with bounded neighbor queries.
    Grid(GridConfig),
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::Grid(GridConfig::SORT_VAR1)
    }
}

/// Runs frames over a `BoidField`.
///
/// A frame is strictly phased: rebuild the grid (grid pipeline only),
/// evaluate every acceleration from the current generation, integrate into
/// the other generation, then swap. Every phase is data-parallel and
/// finishes before the next begins.
#[derive(Debug)]
pub struct SimulationDriver {
    pipeline: Pipeline,
    grid: UniformGrid,
    frame: u64,
}

impl SimulationDriver {
    pub fn new(pipeline: Pipeline) -> Result<Self, SimulationError> {
        Self::with_capacity(pipeline, MAX_BOID_COUNT)
    }

    pub fn with_capacity(pipeline: Pipeline, capacity: usize) -> Result<Self, SimulationError> {
        let config = match pipeline {
            Pipeline::Grid(config) => config,
            Pipeline::Naive => GridConfig::default(),
        };
        Ok(SimulationDriver {
            pipeline,
            grid: UniformGrid::with_capacity(capacity, config)?,
            frame: 0,
        })
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn set_pipeline(&mut self, pipeline: Pipeline) {
        if let Pipeline::Grid(config) = pipeline {
            self.grid.set_config(config);
        }
        if pipeline != self.pipeline {
            debug!("switching pipeline to {pipeline:?}");
        }
        self.pipeline = pipeline;
    }

    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn reset<R: Rng + ?Sized>(
        &mut self,
        params: &SimulationParameters,
        field: &mut BoidField,
        rng: &mut R,
    ) -> Result<(), ConfigError> {
        params.validate()?;
        field.reset(params, rng)
    }

    fn check(
        &mut self,
        params: &SimulationParameters,
        obstacles: &Obstacles,
        field: &BoidField,
    ) -> Result<(), ConfigError> {
        params.validate()?;
        obstacles.validate()?;
        if params.boids_count > field.capacity() {
            return Err(ConfigError::TooManyBoids {
                count: params.boids_count,
                capacity: field.capacity(),
            });
        }
        if let Pipeline::Grid(_) = self.pipeline {
            self.grid.configure(params)?;
        }
        Ok(())
    }

    /// Writes every active boid's acceleration into the field without
    /// moving anything.
    pub fn compute_accelerations(
        &mut self,
        params: &SimulationParameters,
        obstacles: &Obstacles,
        field: &mut BoidField,
    ) -> Result<(), SimulationError> {
        self.check(params, obstacles, field)?;
        self.evaluate_forces(params, obstacles, field)?;
        Ok(())
    }

    fn evaluate_forces(
        &mut self,
        params: &SimulationParameters,
        obstacles: &Obstacles,
        field: &mut BoidField,
    ) -> Result<(), ConfigError> {
        let (positions, velocities, accelerations) = field.force_view();
        let snapshot = Snapshot {
            positions,
            velocities,
        };
        match self.pipeline {
            Pipeline::Naive => {
                ForceEvaluator::new(&BruteForce, params, obstacles.as_slice())
                    .evaluate(snapshot, accelerations);
            }
            Pipeline::Grid(_) => {
                self.grid.build(params, positions)?;
                ForceEvaluator::new(&self.grid, params, obstacles.as_slice())
                    .evaluate(snapshot, accelerations);
            }
        }
        Ok(())
    }

    /// Advances the flock by `dt` seconds. When the active count or the
    /// aquarium changed since the field was last reset, the field is reset
    /// first. On return every output buffer describes the same, fully
    /// integrated frame.
    pub fn step(
        &mut self,
        params: &SimulationParameters,
        obstacles: &Obstacles,
        field: &mut BoidField,
        dt: f32,
    ) -> Result<(), SimulationError> {
        self.check(params, obstacles, field)?;
        if field.needs_reset(params) {
            field.reset(params, &mut rand::rng())?;
        }

        let started = Instant::now();
        self.evaluate_forces(params, obstacles, field)?;
        integrate_all(params, field.integration_view(), dt);
        field.swap_generations();
        self.frame += 1;

        trace!(
            "frame {} ({:?}, {} boids) took {:?}",
            self.frame,
            self.pipeline,
            field.active_count(),
            started.elapsed()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use rand::rngs::StdRng;

    use crate::obstacles::Obstacle;

    fn params(count: usize) -> SimulationParameters {
        SimulationParameters {
            boids_count: count,
            aquarium_size: Vector3::new(30.0, 30.0, 30.0),
            ..Default::default()
        }
    }

    #[test]
    fn step_resets_when_count_changes() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::default(), 64).unwrap();
        let mut field = BoidField::with_capacity(64).unwrap();
        let obstacles = Obstacles::new();

        driver.step(&params(10), &obstacles, &mut field, 0.016).unwrap();
        assert_eq!(field.active_count(), 10);
        driver.step(&params(32), &obstacles, &mut field, 0.016).unwrap();
        assert_eq!(field.active_count(), 32);
        assert_eq!(driver.frame(), 2);
    }

    #[test]
    fn invalid_parameters_never_reach_a_frame() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::Naive, 8).unwrap();
        let mut field = BoidField::with_capacity(8).unwrap();
        let bad = SimulationParameters {
            min_speed: 9.0,
            max_speed: 1.0,
            ..params(4)
        };
        let err = driver.step(&bad, &Obstacles::new(), &mut field, 0.016).unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Config(ConfigError::InvalidSpeedRange { .. })
        ));
        assert_eq!(driver.frame(), 0);
        assert_eq!(field.active_count(), 0);
    }

    #[test]
    fn count_over_field_capacity_is_rejected() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::Naive, 64).unwrap();
        let mut field = BoidField::with_capacity(4).unwrap();
        assert!(driver.step(&params(5), &Obstacles::new(), &mut field, 0.016).is_err());
    }

    #[test]
    fn step_moves_boids_and_keeps_speed_bounds() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::Grid(GridConfig::SORT_VAR2), 100).unwrap();
        let mut field = BoidField::with_capacity(100).unwrap();
        let p = params(100);
        let mut rng = StdRng::seed_from_u64(42);
        driver.reset(&p, &mut field, &mut rng).unwrap();
        let before = field.positions().to_vec();

        driver.step(&p, &Obstacles::new(), &mut field, 0.05).unwrap();
        assert_ne!(field.positions(), before.as_slice());
        for v in field.velocities() {
            let speed = v.norm();
            assert!(speed >= p.min_speed - 1e-3 && speed <= p.max_speed + 1e-3);
        }
        assert_eq!(driver.grid().active_count(), 100);
    }

    #[test]
    fn refused_nan_obstacle_never_reaches_the_flock() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::default(), 16).unwrap();
        let mut field = BoidField::with_capacity(16).unwrap();
        let mut obstacles = Obstacles::new();
        assert!(!obstacles.push(Obstacle::new(Vector3::new(f32::NAN, 0.0, 0.0), 1.0)));
        obstacles.push(Obstacle::new(Vector3::zeros(), 2.0));

        for _ in 0..5 {
            driver.step(&params(16), &obstacles, &mut field, 0.016).unwrap();
        }
        for p in field.positions() {
            assert!(p.iter().all(|c| c.is_finite()), "{p:?}");
        }
    }

    #[test]
    fn switching_pipeline_updates_grid_config() {
        let mut driver = SimulationDriver::with_capacity(Pipeline::Naive, 4).unwrap();
        driver.set_pipeline(Pipeline::Grid(GridConfig::SORT_VAR2));
        assert_eq!(driver.grid().config(), GridConfig::SORT_VAR2);
        assert_eq!(driver.pipeline(), Pipeline::Grid(GridConfig::SORT_VAR2));
    }
}
