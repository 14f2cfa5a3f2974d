use nalgebra::Vector3;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::params::{MAX_OBSTACLE_COUNT, MIN_OBSTACLE_RADIUS};
use crate::random::rand_aquarium_position;

/// Sphere that boids steer away from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl Obstacle {
    pub fn new(center: Vector3<f32>, radius: f32) -> Self {
        Obstacle {
            center,
            radius: radius.max(MIN_OBSTACLE_RADIUS),
        }
    }

    /// Places a sphere uniformly inside the aquarium, with a radius drawn
    /// from `[min_radius, max_radius]`.
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        aquarium_size: Vector3<f32>,
        min_radius: f32,
        max_radius: f32,
    ) -> Self {
        let radius = if min_radius < max_radius {
            rng.random_range(min_radius..=max_radius)
        } else {
            min_radius
        };
        Obstacle::new(rand_aquarium_position(rng, aquarium_size), radius)
    }

    pub fn is_finite(&self) -> bool {
        self.center.iter().all(|c| c.is_finite()) && self.radius.is_finite()
    }
}

/// Bounded set of obstacles. Index-based removal shifts later entries down,
/// so callers holding indices across a removal must refresh them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Obstacles {
    items: Vec<Obstacle>,
}

impl Obstacles {
    pub fn new() -> Self {
        Obstacles {
            items: Vec::with_capacity(MAX_OBSTACLE_COUNT),
        }
    }

    pub fn capacity(&self) -> usize {
        MAX_OBSTACLE_COUNT
    }

    /// Adds an obstacle. Returns `false` and leaves the set unchanged once
    /// it is full, or when the obstacle is not finite.
    pub fn push(&mut self, obstacle: Obstacle) -> bool {
        if self.items.len() >= MAX_OBSTACLE_COUNT || !obstacle.is_finite() {
            return false;
        }
        self.items.push(Obstacle::new(obstacle.center, obstacle.radius));
        true
    }

    pub fn set(&mut self, index: usize, obstacle: Obstacle) -> bool {
        match self.items.get_mut(index) {
            Some(slot) if obstacle.is_finite() => {
                *slot = Obstacle::new(obstacle.center, obstacle.radius);
                true
            }
            _ => false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.items.len() > MAX_OBSTACLE_COUNT {
            return Err(ConfigError::TooManyObstacles {
                count: self.items.len(),
                capacity: MAX_OBSTACLE_COUNT,
            });
        }
        match self
            .items
            .iter()
            .position(|o| !o.is_finite() || o.radius < MIN_OBSTACLE_RADIUS)
        {
            Some(index) => Err(ConfigError::InvalidObstacle { index }),
            None => Ok(()),
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Obstacle> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> Option<&Obstacle> {
        self.items.get(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Obstacle] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Obstacle> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a Obstacles {
    type Item = &'a Obstacle;
    type IntoIter = std::slice::Iter<'a, Obstacle>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
