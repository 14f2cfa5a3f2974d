use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::obstacles::{Obstacle, Obstacles};
use crate::params::SimulationParameters;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Starting configuration for a run: flock parameters plus obstacles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub parameters: SimulationParameters,
    pub obstacles: Vec<Obstacle>,
}

impl Scenario {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parameters pulled into range, plus the usable obstacles. Non-finite
    /// obstacles and any beyond capacity are dropped.
    pub fn sanitized(&self) -> (SimulationParameters, Obstacles) {
        let parameters = self.parameters.clamped();
        let mut obstacles = Obstacles::new();
        for obstacle in &self.obstacles {
            if !obstacle.is_finite() {
                warn!("dropping non-finite obstacle {obstacle:?}");
                continue;
            }
            if !obstacles.push(*obstacle) {
                warn!(
                    "scenario lists {} obstacles, keeping the first {}",
                    self.obstacles.len(),
                    obstacles.capacity()
                );
                break;
            }
        }
        (parameters, obstacles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{MAX_BOID_COUNT, MAX_OBSTACLE_COUNT, MIN_OBSTACLE_RADIUS};

    #[test]
    fn parses_full_document() {
        let json = r#"{
            "parameters": { "distance": 2.0, "boids_count": 300, "aquarium_size": [20.0, 10.0, 20.0] },
            "obstacles": [ { "center": [1.0, 2.0, 3.0], "radius": 1.5 } ]
        }"#;
        let scenario = Scenario::from_reader(json.as_bytes()).unwrap();
        let (params, obstacles) = scenario.sanitized();
        assert_eq!(params.distance, 2.0);
        assert_eq!(params.boids_count, 300);
        assert_eq!(params.aquarium_size.y, 10.0);
        assert_eq!(obstacles.len(), 1);
        assert_eq!(obstacles.get(0).map(|o| o.radius), Some(1.5));
    }

    #[test]
    fn sanitizing_clamps_and_drops() {
        let mut scenario = Scenario::default();
        scenario.parameters.boids_count = MAX_BOID_COUNT * 2;
        scenario.obstacles.push(Obstacle {
            center: nalgebra::Vector3::new(f32::NAN, 0.0, 0.0),
            radius: 1.0,
        });
        for _ in 0..MAX_OBSTACLE_COUNT + 3 {
            scenario.obstacles.push(Obstacle {
                center: nalgebra::Vector3::zeros(),
                radius: 0.0,
            });
        }
        let (params, obstacles) = scenario.sanitized();
        assert_eq!(params.boids_count, MAX_BOID_COUNT);
        assert_eq!(obstacles.len(), MAX_OBSTACLE_COUNT);
        assert!(obstacles.iter().all(|o| o.radius == MIN_OBSTACLE_RADIUS));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Scenario::from_reader("{ nope".as_bytes()),
            Err(ScenarioError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            Scenario::from_path("/definitely/not/here.json"),
            Err(ScenarioError::Io(_))
        ));
    }
}
