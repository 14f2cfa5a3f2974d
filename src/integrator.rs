use nalgebra::Vector3;
use rayon::prelude::*;

use crate::field::IntegrationView;
use crate::params::SimulationParameters;

// Below this length a vector has no usable direction.
const DIRECTION_EPSILON: f32 = 1e-6;

/// Rescales `velocity` so its length lies in `[min_speed, max_speed]`,
/// keeping its direction. A velocity too short to have a direction is sent
/// along `fallback` at `min_speed`.
pub fn clamp_speed(
    velocity: Vector3<f32>,
    min_speed: f32,
    max_speed: f32,
    fallback: &Vector3<f32>,
) -> Vector3<f32> {
    let Some((direction, speed)) = direction_and_speed(&velocity) else {
        return fallback * min_speed;
    };
    if speed > max_speed {
        direction * max_speed
    } else if speed < min_speed {
        if speed > DIRECTION_EPSILON {
            direction * min_speed
        } else {
            fallback * min_speed
        }
    } else {
        velocity
    }
}

// `norm_squared` overflows f32 for components past ~1.8e19, so the length is
// taken after dividing by the largest component.
fn direction_and_speed(velocity: &Vector3<f32>) -> Option<(Vector3<f32>, f32)> {
    if velocity.iter().any(|c| c.is_nan()) {
        return None;
    }
    if velocity.iter().any(|c| c.is_infinite()) {
        let signs = velocity.map(|c| if c.is_infinite() { c.signum() } else { 0.0 });
        return Some((signs.normalize(), f32::INFINITY));
    }
    let largest = velocity.amax();
    if largest == 0.0 {
        return None;
    }
    let scaled = velocity / largest;
    let length = scaled.norm();
    Some((scaled / length, largest * length))
}

/// Orientation of one boid: left-handed, `right = up x forward`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub forward: Vector3<f32>,
    pub up: Vector3<f32>,
    pub right: Vector3<f32>,
}

impl Basis {
    /// Re-derives the basis from a new velocity, using the previous `up` as
    /// the seed for the cross products. `forward` is kept when the velocity
    /// has no direction, and `up` is re-seeded from the previous `right` when
    /// it has become parallel to `forward`.
    pub fn rederive(&self, velocity: &Vector3<f32>) -> Basis {
        let forward = velocity
            .try_normalize(DIRECTION_EPSILON)
            .unwrap_or(self.forward);
        let right = self
            .up
            .cross(&forward)
            .try_normalize(DIRECTION_EPSILON)
            .or_else(|| {
                (self.right - forward * self.right.dot(&forward)).try_normalize(DIRECTION_EPSILON)
            })
            .unwrap_or_else(|| any_perpendicular(&forward));
        let up = forward.cross(&right).normalize();
        Basis { forward, up, right }
    }
}

fn any_perpendicular(v: &Vector3<f32>) -> Vector3<f32> {
    let axis = if v.x.abs() < 0.9 { Vector3::x() } else { Vector3::y() };
    (axis - v * axis.dot(v)).normalize()
}

/// Semi-implicit Euler step for one boid: velocity first, clamped, then
/// position with the new velocity.
pub fn integrate(
    params: &SimulationParameters,
    position: &Vector3<f32>,
    velocity: &Vector3<f32>,
    acceleration: &Vector3<f32>,
    fallback: &Vector3<f32>,
    dt: f32,
) -> (Vector3<f32>, Vector3<f32>) {
    let next_velocity = clamp_speed(
        velocity + acceleration * dt,
        params.min_speed,
        params.max_speed,
        fallback,
    );
    (position + next_velocity * dt, next_velocity)
}

/// Integrates every active boid into the next generation and updates its
/// orientation. Each boid touches only its own slots.
pub(crate) fn integrate_all(params: &SimulationParameters, view: IntegrationView<'_>, dt: f32) {
    let IntegrationView {
        position,
        velocity,
        acceleration,
        next_position,
        next_velocity,
        forward,
        up,
        right,
    } = view;

    (next_position, next_velocity, forward, up, right)
        .into_par_iter()
        .enumerate()
        .for_each(|(i, (next_position, next_velocity, forward, up, right))| {
            let (p, v) = integrate(params, &position[i], &velocity[i], &acceleration[i], forward, dt);
            let basis = Basis {
                forward: *forward,
                up: *up,
                right: *right,
            }
            .rederive(&v);
            *next_position = p;
            *next_velocity = v;
            *forward = basis.forward;
            *up = basis.up;
            *right = basis.right;
        });
}
