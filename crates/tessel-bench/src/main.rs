//! Headless quad streaming benchmark.
//!
//! Pushes a grid of textured quads through the quad renderer for a number of
//! frames and logs the streaming counters.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release -p tessel-bench -- --quads 20000 --frames 120
//! cargo run --release -p tessel-bench -- --simulate --latency 64 --batch 256
//! cargo run --release -p tessel-bench -- --simulate --log tessel_engine=trace
//! ```

use std::rc::Rc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tessel_engine::coords::{Vec2, Viewport};
use tessel_engine::gpu::{Capabilities, GraphicsBackend, RecordingBackend, WgpuBackend, WgpuInit};
use tessel_engine::logging::{LoggingConfig, init_logging};
use tessel_engine::paint::Color;
use tessel_engine::render::{
    OrthographicCamera, QuadPrimitive, QuadRenderer, QuadRendererConfig, RenderStates, RenderStats, StateCache,
    Texture,
};

#[derive(Parser)]
#[command(name = "tessel-bench")]
#[command(about = "Stream batched quads through a GPU backend and report the counters")]
struct Args {
    /// Quads drawn per frame.
    #[arg(long, default_value_t = 10_000)]
    quads: usize,

    /// Frames to render.
    #[arg(long, default_value_t = 60)]
    frames: usize,

    /// Quads per batch.
    #[arg(long, default_value_t = 4096)]
    batch: usize,

    /// Use the simulated GPU instead of wgpu.
    #[arg(long)]
    simulate: bool,

    /// Commands the simulated GPU lags behind.
    #[arg(long, default_value_t = 32)]
    latency: usize,

    /// Distinct textures cycled through each frame.
    #[arg(long, default_value_t = 4)]
    textures: usize,

    /// Log filter, overriding `RUST_LOG` (e.g. "tessel_engine=debug").
    #[arg(long)]
    log: Option<String>,
}

const TARGET_SIZE: (u32, u32) = (1024, 768);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(match &args.log {
        Some(filter) => LoggingConfig::with_filter(filter.as_str()),
        None => LoggingConfig::default(),
    });

    if args.simulate {
        let mut gpu = RecordingBackend::new(Capabilities::FULL).with_latency(args.latency);
        let stats = run(&mut gpu, &args)?;
        report(&stats);
        log::info!("simulated GPU stalled {} times", gpu.stall_count());
        if !gpu.corruptions().is_empty() {
            anyhow::bail!("{} ring ranges were overwritten in flight", gpu.corruptions().len());
        }
    } else {
        let mut gpu = WgpuBackend::new_blocking(WgpuInit {
            target_size: TARGET_SIZE,
            ..WgpuInit::default()
        })
        .context("failed to create the wgpu backend")?;
        log::info!("adapter: {}", gpu.adapter_info().name);

        let stats = run(&mut gpu, &args)?;
        report(&stats);

        let pixels = gpu.read_target().context("target readback failed")?;
        let checksum = pixels
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        println!("target checksum: {checksum:016x} ({} pipelines)", gpu.pipeline_count());
    }
    Ok(())
}

fn run<B: GraphicsBackend>(gpu: &mut B, args: &Args) -> anyhow::Result<RenderStats> {
    let texture_count = args.textures.max(1);
    let mut textures = Vec::with_capacity(texture_count);
    for i in 0..texture_count {
        let shade = (i * 255 / texture_count) as u8;
        let texture = Texture::solid(gpu, &format!("bench #{i}"), Color::from_rgba8(255, shade, 255 - shade, 255))?;
        textures.push(texture);
    }

    let config = QuadRendererConfig {
        max_quads_per_batch: args.batch,
        primitive_buffer_size: args.batch * 4 * 80 * 3,
        ..QuadRendererConfig::default()
    };
    let mut renderer = QuadRenderer::new(gpu, &config)?;
    let viewport = Viewport::from_pixels(TARGET_SIZE.0, TARGET_SIZE.1);
    renderer.set_camera(gpu, Rc::new(OrthographicCamera::new(viewport)))?;

    let quads = grid(args.quads, viewport);
    let states = RenderStates::default();
    let mut cache = StateCache::new();

    let started = Instant::now();
    for _ in 0..args.frames {
        gpu.clear(Color::BLACK);
        renderer.apply_states(&states, &mut cache, gpu)?;
        renderer.begin_rendering(gpu)?;
        for (i, quad) in quads.iter().enumerate() {
            let texture = &textures[i * texture_count / quads.len().max(1)];
            renderer.draw(gpu, quad, texture.handle())?;
        }
        renderer.end_rendering(gpu)?;
        gpu.submit()?;
    }
    gpu.finish()?;
    let elapsed = started.elapsed();

    log::info!(
        "{} frames of {} quads in {:.2?} ({:.2?} per frame)",
        args.frames,
        quads.len(),
        elapsed,
        elapsed / args.frames.max(1) as u32
    );

    let stats = renderer.stats();
    renderer.dispose(gpu)?;
    for texture in textures {
        texture.dispose(gpu);
    }
    Ok(stats)
}

/// `count` small quads laid out row by row over the viewport.
fn grid(count: usize, viewport: Viewport) -> Vec<QuadPrimitive> {
    let columns = ((count as f32).sqrt().ceil() as usize).max(1);
    let rows = count.div_ceil(columns).max(1);
    let cell = Vec2::new(viewport.width / columns as f32, viewport.height / rows as f32);
    let size = Vec2::new(cell.x * 0.8, cell.y * 0.8);

    (0..count)
        .map(|i| {
            let position = Vec2::new((i % columns) as f32 * cell.x, (i / columns) as f32 * cell.y);
            let tint = Color::from_rgba8((i % 256) as u8, 128, 255, 255);
            QuadPrimitive::axis_aligned(position, size, Vec2::ZERO, Vec2::ONE, tint)
        })
        .collect()
}

fn report(stats: &RenderStats) {
    log::info!("rendered quads:    {}", stats.rendered_quad_count);
    log::info!("flushed buffers:   {}", stats.flushed_buffer_count);
    log::info!("largest batch:     {}", stats.largest_batch);
    log::info!("discarded buffers: {}", stats.discarded_buffer_count);
    log::info!("buffer waits:      {}", stats.buffer_wait_count);
}
