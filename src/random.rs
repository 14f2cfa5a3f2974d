use nalgebra::Vector3;
use rand::prelude::*;

/// Uniform sample from the axis-aligned box `[min, max)`. A collapsed axis
/// (`min >= max`) yields `min` for that axis.
pub fn rand_vec<R: Rng + ?Sized>(rng: &mut R, min: Vector3<f32>, max: Vector3<f32>) -> Vector3<f32> {
    Vector3::from_fn(|axis, _| {
        if min[axis] < max[axis] {
            rng.random_range(min[axis]..max[axis])
        } else {
            min[axis]
        }
    })
}

/// Uniformly distributed direction on the unit sphere.
pub fn rand_unit_vec<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f32> {
    // Rejection sampling inside the unit ball keeps the direction uniform.
    loop {
        let candidate = Vector3::new(
            rng.random_range(-1.0f32..1.0),
            rng.random_range(-1.0f32..1.0),
            rng.random_range(-1.0f32..1.0),
        );
        let norm_squared = candidate.norm_squared();
        if norm_squared > 1e-6 && norm_squared <= 1.0 {
            return candidate / norm_squared.sqrt();
        }
    }
}

/// Uniform position inside an aquarium of the given extents, centered at
/// the origin.
pub fn rand_aquarium_position<R: Rng + ?Sized>(rng: &mut R, aquarium_size: Vector3<f32>) -> Vector3<f32> {
    let half = aquarium_size / 2.0;
    rand_vec(rng, -half, half)
}
