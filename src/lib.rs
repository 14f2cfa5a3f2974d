pub mod error;
pub mod field;
pub mod forces;
pub mod grid;
pub mod integrator;
pub mod obstacles;
pub mod params;
pub mod random;
pub mod scenario;
pub mod simulation;

pub use error::{ConfigError, SimulationError};
pub use field::{BoidField, BoidInstance};
pub use forces::{BruteForce, ForceEvaluator, NeighborSearch, Neighborhood, Snapshot};
pub use grid::{GridConfig, SortStrategy, Stencil, UniformGrid};
pub use obstacles::{Obstacle, Obstacles};
pub use params::SimulationParameters;
pub use scenario::{Scenario, ScenarioError};
pub use simulation::{Pipeline, SimulationDriver};
