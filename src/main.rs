use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use aquarium_boids::field::BoidField;
use aquarium_boids::grid::GridConfig;
use aquarium_boids::obstacles::{Obstacle, Obstacles};
use aquarium_boids::params::SimulationParameters;
use aquarium_boids::scenario::Scenario;
use aquarium_boids::simulation::{Pipeline, SimulationDriver};
use argh::FromArgs;
use colors_transform::{Color, Hsl};
use image::{Rgb, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rand::prelude::*;
use rand::rngs::StdRng;

const BACKGROUND: Rgb<u8> = Rgb([26, 26, 26]);
const OBSTACLE: Rgb<u8> = Rgb([90, 90, 90]);
const MIN_OBSTACLE_RADIUS: f32 = 1.0;
const MAX_OBSTACLE_RADIUS: f32 = 4.0;

#[derive(FromArgs)]
/// Run the flock headless, optionally writing a top-down PNG per frame.
struct Args {
    /// number of frames to simulate
    #[argh(option, default = "1000")]
    frames: usize,
    /// number of boids, overriding the scenario
    #[argh(option)]
    boids: Option<usize>,
    /// JSON scenario with parameters and obstacles
    #[argh(option)]
    scenario: Option<PathBuf>,
    /// neighbor search: naive, var1 or var2
    #[argh(option, default = "Pipeline::default()", from_str_fn(parse_pipeline))]
    pipeline: Pipeline,
    /// random obstacles to add on top of the scenario's
    #[argh(option, default = "0")]
    obstacles: usize,
    /// seconds per frame
    #[argh(option, default = "1.0 / 60.0")]
    dt: f32,
    /// directory for PNG frames; nothing is drawn when omitted
    #[argh(option)]
    out: Option<PathBuf>,
    /// frame width in pixels
    #[argh(option, default = "800")]
    width: u32,
    /// frame height in pixels
    #[argh(option, default = "800")]
    height: u32,
    /// seed for initial placement and random obstacles
    #[argh(option)]
    seed: Option<u64>,
}

fn parse_pipeline(value: &str) -> Result<Pipeline, String> {
    match value {
        "naive" => Ok(Pipeline::Naive),
        "var1" => Ok(Pipeline::Grid(GridConfig::SORT_VAR1)),
        "var2" => Ok(Pipeline::Grid(GridConfig::SORT_VAR2)),
        other => Err(format!("unknown pipeline {other:?}, expected naive, var1 or var2")),
    }
}

/// Maps the aquarium's x/z plane onto the image.
fn project(params: &SimulationParameters, img: &RgbImage, x: f32, z: f32) -> (f32, f32) {
    let half = params.half_extent();
    let u = (x + half.x) / params.aquarium_size.x * img.width() as f32;
    let v = (z + half.z) / params.aquarium_size.z * img.height() as f32;
    (u, v)
}

fn heading_colour(forward_x: f32, forward_z: f32) -> Rgb<u8> {
    let hue = forward_z.atan2(forward_x).to_degrees().rem_euclid(360.0);
    let rgb = Hsl::from(hue, 80.0, 60.0).to_rgb();
    Rgb([
        rgb.get_red() as u8,
        rgb.get_green() as u8,
        rgb.get_blue() as u8,
    ])
}

fn draw_obstacle(params: &SimulationParameters, img: &mut RgbImage, obstacle: &Obstacle) {
    let (cu, cv) = project(params, img, obstacle.center.x, obstacle.center.z);
    let ru = obstacle.radius / params.aquarium_size.x * img.width() as f32;
    let rv = obstacle.radius / params.aquarium_size.z * img.height() as f32;
    let (w, h) = (img.width() as i64, img.height() as i64);
    let u0 = ((cu - ru).floor() as i64).clamp(0, w);
    let u1 = ((cu + ru).ceil() as i64).clamp(0, w);
    let v0 = ((cv - rv).floor() as i64).clamp(0, h);
    let v1 = ((cv + rv).ceil() as i64).clamp(0, h);
    for v in v0..v1 {
        for u in u0..u1 {
            let du = (u as f32 + 0.5 - cu) / ru;
            let dv = (v as f32 + 0.5 - cv) / rv;
            if du * du + dv * dv <= 1.0 {
                img.put_pixel(u as u32, v as u32, OBSTACLE);
            }
        }
    }
}

fn render_frame(
    params: &SimulationParameters,
    obstacles: &Obstacles,
    field: &BoidField,
    width: u32,
    height: u32,
) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    for obstacle in obstacles {
        draw_obstacle(params, &mut img, obstacle);
    }
    for boid in field.instances() {
        let (u, v) = project(params, &img, boid.position.x, boid.position.z);
        // Boids pushed past the walls are simply not drawn.
        if u >= 0.0 && v >= 0.0 && (u as u32) < width && (v as u32) < height {
            img.put_pixel(u as u32, v as u32, heading_colour(boid.forward.x, boid.forward.z));
        }
    }
    img
}

fn save_frame(img: &RgbImage, dir: &Path, frame: usize) -> Result<(), Box<dyn Error>> {
    img.save(dir.join(format!("frames_{:0>8}.png", frame)))?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args: Args = argh::from_env();

    let scenario = match &args.scenario {
        Some(path) => Scenario::from_path(path)?,
        None => Scenario::default(),
    };
    let (mut params, mut obstacles) = scenario.sanitized();
    if let Some(boids) = args.boids {
        params.boids_count = boids;
        params = params.clamped();
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    for _ in 0..args.obstacles {
        let obstacle = Obstacle::random(
            &mut rng,
            params.aquarium_size,
            MIN_OBSTACLE_RADIUS,
            MAX_OBSTACLE_RADIUS,
        );
        if !obstacles.push(obstacle) {
            break;
        }
    }

    let mut field = BoidField::new()?;
    let mut driver = SimulationDriver::new(args.pipeline)?;
    driver.reset(&params, &mut field, &mut rng)?;
    if let Some(dir) = &args.out {
        fs::create_dir_all(dir)?;
    }
    info!(
        "simulating {} boids with {} obstacles for {} frames using {:?}",
        params.boids_count,
        obstacles.len(),
        args.frames,
        args.pipeline
    );

    let pbar = ProgressBar::new(args.frames as u64);
    pbar.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}/{eta_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
    )?);
    let started = Instant::now();
    for frame in 0..args.frames {
        driver.step(&params, &obstacles, &mut field, args.dt)?;
        if let Some(dir) = &args.out {
            let img = render_frame(&params, &obstacles, &field, args.width, args.height);
            save_frame(&img, dir, frame)?;
        }
        pbar.inc(1);
    }
    pbar.finish();

    let elapsed = started.elapsed();
    info!(
        "{} frames in {:.2?} ({:.3} ms/frame)",
        args.frames,
        elapsed,
        elapsed.as_secs_f64() * 1000.0 / args.frames.max(1) as f64
    );
    Ok(())
}
