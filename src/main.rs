use anyhow::{Context, Result};
use glam::Vec3;
use log::info;
use rusted_physics::engine::physics::{
    presets, CollisionGroup, ConvexShape, EntityBuilder, SimulationConfig, SimulationController,
};

/// Fixed update rate of the demo (60 steps per second)
const FIXED_TIMESTEP: f32 = 1.0 / 60.0;
const DEMO_STEPS: u32 = 120;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::load(&path)
            .with_context(|| format!("Failed to load simulation config from {path}"))?,
        None => SimulationConfig::default(),
    };

    let simulation = SimulationController::new(&config).context("Failed to create simulation")?;

    simulation.request_add(presets::ground(20.0, 0.0));
    let balls: Vec<_> = (0..5)
        .map(|i| {
            EntityBuilder::new_dynamic(ConvexShape::ball(0.5), 1.0)
                .position(i as f32 * 1.5 - 3.0, 2.0 + i as f32, 0.0)
                .collect_collisions(8)
                .build()
        })
        .collect();
    for ball in &balls {
        simulation.request_add(ball.clone());
    }

    for step in 0..DEMO_STEPS {
        simulation.step(FIXED_TIMESTEP);
        if step % 30 == 0 {
            let pose = simulation.body_pose(&balls[0])?;
            info!("Step {step}: first ball at {:.3}", pose.position);
        }
    }

    simulation.process_contacts();
    for ball in &balls {
        let pose = simulation.body_pose(ball)?;
        let contacts = ball.contacts().map_or(0, |c| c.current().len());
        info!("{:?} rests at y = {:.3} with {contacts} contact(s)", ball.id(), pose.position.y);
    }

    let hit = simulation.raycast(
        Vec3::new(-3.0, 10.0, 0.0),
        Vec3::new(-3.0, -10.0, 0.0),
        CollisionGroup::ALL,
        false,
    );
    if hit.succeeded {
        info!("Raycast hit {:?} at {:.3}", hit.collider.map(|c| c.id()), hit.point);
    }

    simulation.dispose();
    Ok(())
}
