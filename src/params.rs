use log::warn;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const MAX_BOID_COUNT: usize = 50_000;
pub const MAX_OBSTACLE_COUNT: usize = 32;

pub const MIN_DISTANCE: f32 = 0.5;
pub const MAX_DISTANCE: f32 = 100.0;

pub const MIN_SPEED: f32 = 0.0;
pub const MAX_SPEED: f32 = 50.0;

pub const MIN_AQUARIUM_SIZE: f32 = 1.0;
pub const MAX_AQUARIUM_SIZE_X: f32 = 100.0;
pub const MAX_AQUARIUM_SIZE_Y: f32 = 100.0;
pub const MAX_AQUARIUM_SIZE_Z: f32 = 100.0;

// Holds as long as cells are never smaller than 2 * MIN_DISTANCE = 1.
pub const MAX_CELL_COUNT: usize = (MAX_AQUARIUM_SIZE_X as usize)
    * (MAX_AQUARIUM_SIZE_Y as usize)
    * (MAX_AQUARIUM_SIZE_Z as usize);

pub const MIN_OBSTACLE_RADIUS: f32 = 0.1;

/// Per-frame configuration of the flock. Mutated between frames by whoever
/// owns the controls, read-only while a frame runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParameters {
    /// Interaction radius.
    pub distance: f32,
    pub separation: f32,
    pub alignment: f32,
    pub cohesion: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    pub noise: f32,
    /// Extents of the volume, centered at the origin.
    pub aquarium_size: Vector3<f32>,
    pub boids_count: usize,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        SimulationParameters {
            distance: 5.0,
            separation: 1.0,
            alignment: 0.5,
            cohesion: 0.3,
            min_speed: 2.0,
            max_speed: 10.0,
            noise: 0.5,
            aquarium_size: Vector3::new(40.0, 40.0, 40.0),
            boids_count: 1_000,
        }
    }
}

impl SimulationParameters {
    pub fn new(distance: f32, separation: f32, alignment: f32, cohesion: f32) -> Self {
        SimulationParameters {
            distance,
            separation,
            alignment,
            cohesion,
            ..Default::default()
        }
    }

    pub fn max_aquarium_size() -> Vector3<f32> {
        Vector3::new(MAX_AQUARIUM_SIZE_X, MAX_AQUARIUM_SIZE_Y, MAX_AQUARIUM_SIZE_Z)
    }

    /// Edge length of one grid cell. Twice the interaction radius, so every
    /// neighbor of an agent sits in its own cell or an adjacent one.
    pub fn cell_size(&self) -> f32 {
        2.0 * self.distance
    }

    pub fn half_extent(&self) -> Vector3<f32> {
        self.aquarium_size / 2.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boids_count > MAX_BOID_COUNT {
            return Err(ConfigError::TooManyBoids {
                count: self.boids_count,
                capacity: MAX_BOID_COUNT,
            });
        }
        if !(MIN_DISTANCE..=MAX_DISTANCE).contains(&self.distance) {
            return Err(ConfigError::InvalidDistance(self.distance));
        }
        for (name, value) in [
            ("separation", self.separation),
            ("alignment", self.alignment),
            ("cohesion", self.cohesion),
            ("noise", self.noise),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }
        let speeds_in_range = (MIN_SPEED..=MAX_SPEED).contains(&self.min_speed)
            && (MIN_SPEED..=MAX_SPEED).contains(&self.max_speed);
        if !speeds_in_range || self.min_speed > self.max_speed {
            return Err(ConfigError::InvalidSpeedRange {
                min: self.min_speed,
                max: self.max_speed,
            });
        }
        let max_size = Self::max_aquarium_size();
        let aquarium_ok = (0..3).all(|axis| {
            (MIN_AQUARIUM_SIZE..=max_size[axis]).contains(&self.aquarium_size[axis])
        });
        if !aquarium_ok {
            return Err(ConfigError::InvalidAquarium {
                x: self.aquarium_size.x,
                y: self.aquarium_size.y,
                z: self.aquarium_size.z,
            });
        }
        Ok(())
    }

    /// Returns a copy with every field pulled into its legal range. This is
    /// the only path by which user-facing input should reach the simulation.
    pub fn clamped(&self) -> Self {
        let defaults = SimulationParameters::default();
        let max_size = Self::max_aquarium_size();

        let mut min_speed = finite_or(self.min_speed, defaults.min_speed).clamp(MIN_SPEED, MAX_SPEED);
        let mut max_speed = finite_or(self.max_speed, defaults.max_speed).clamp(MIN_SPEED, MAX_SPEED);
        if min_speed > max_speed {
            std::mem::swap(&mut min_speed, &mut max_speed);
        }

        let mut aquarium_size = Vector3::<f32>::zeros();
        for axis in 0..3 {
            aquarium_size[axis] = finite_or(self.aquarium_size[axis], defaults.aquarium_size[axis])
                .clamp(MIN_AQUARIUM_SIZE, max_size[axis]);
        }

        let clamped = SimulationParameters {
            distance: finite_or(self.distance, defaults.distance).clamp(MIN_DISTANCE, MAX_DISTANCE),
            separation: finite_or(self.separation, defaults.separation).max(0.0),
            alignment: finite_or(self.alignment, defaults.alignment).max(0.0),
            cohesion: finite_or(self.cohesion, defaults.cohesion).max(0.0),
            min_speed,
            max_speed,
            noise: finite_or(self.noise, defaults.noise).max(0.0),
            aquarium_size,
            boids_count: self.boids_count.min(MAX_BOID_COUNT),
        };
        if clamped != *self {
            warn!("simulation parameters were clamped into range: {clamped:?}");
        }
        clamped
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}
