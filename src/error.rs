use std::collections::TryReserveError;

use thiserror::Error;

/// A configuration record that the simulation refuses to run with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("boid count {count} exceeds capacity {capacity}")]
    TooManyBoids { count: usize, capacity: usize },
    #[error("obstacle count {count} exceeds capacity {capacity}")]
    TooManyObstacles { count: usize, capacity: usize },
    #[error("obstacle {index} is not finite or has a radius below the minimum")]
    InvalidObstacle { index: usize },
    #[error("interaction distance {0} is outside the allowed range")]
    InvalidDistance(f32),
    #[error("speed range [{min}, {max}] is invalid")]
    InvalidSpeedRange { min: f32, max: f32 },
    #[error("aquarium extents ({x}, {y}, {z}) are outside the allowed range")]
    InvalidAquarium { x: f32, y: f32, z: f32 },
    #[error("{name} must be a non-negative finite number, got {value}")]
    NegativeWeight { name: &'static str, value: f32 },
    #[error("grid of {cells} cells exceeds the maximum of {max}")]
    GridTooLarge { cells: usize, max: usize },
    #[error("expected {expected} entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to allocate {what} for {len} entries: {source}")]
    Allocation {
        what: &'static str,
        len: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Allocates a vector of exactly `len` copies of `value`, reporting failure
/// instead of aborting.
pub(crate) fn try_filled<T: Clone>(
    what: &'static str,
    len: usize,
    value: T,
) -> Result<Vec<T>, SimulationError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|source| SimulationError::Allocation { what, len, source })?;
    buffer.resize(len, value);
    Ok(buffer)
}
