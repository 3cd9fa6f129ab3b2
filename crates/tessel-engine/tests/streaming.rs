use std::rc::Rc;

use tessel_engine::coords::Vec2;
use tessel_engine::error::RenderError;
use tessel_engine::gpu::{BlendFactor, Call, Capabilities, GraphicsBackend, PrimitiveKind, RecordingBackend, Toggle};
use tessel_engine::paint::Color;
use tessel_engine::render::{
    BlendingFactorState, GrowthPolicy, NoPendingBatch, PrimitiveStreamer, ProgramShader, QuadPrimitive,
    QuadRenderer, QuadRendererConfig, QuadVertex, RenderStates, Shader, StateCache, StreamerConfig,
    StreamerPreference, Texture, create_streamer,
};

fn quad(i: usize) -> QuadPrimitive {
    let x = i as f32;
    QuadPrimitive::axis_aligned(
        Vec2::new(x, x * 0.5),
        Vec2::new(1.0 + x, 2.0),
        Vec2::ZERO,
        Vec2::ONE,
        Color::from_rgba8((i % 256) as u8, 10, 20, 255),
    )
}

fn quads(n: usize) -> Vec<QuadPrimitive> {
    (0..n).map(quad).collect()
}

fn quad_program(gpu: &mut RecordingBackend) -> ProgramShader {
    let shader = ProgramShader::textured_quad(gpu, &["u_combinedMatrix", "u_texture"]).unwrap();
    Shader::<RecordingBackend>::begin(&shader, gpu);
    shader
}

fn quad_streamer(
    gpu: &mut RecordingBackend,
    vertex_count: usize,
    indices: Option<&[u16]>,
    config: StreamerConfig,
) -> Box<dyn PrimitiveStreamer<RecordingBackend, QuadPrimitive>> {
    create_streamer(gpu, QuadVertex::layout(), vertex_count, indices, &config).unwrap()
}

/// Every vertex byte the simulated GPU consumed, in execution order.
fn consumed_bytes(gpu: &RecordingBackend) -> Vec<u8> {
    gpu.executed_draws()
        .iter()
        .flat_map(|d| d.vertex_bytes.iter().copied())
        .collect()
}

fn draw_quads(gpu: &mut RecordingBackend, config: &QuadRendererConfig, batch: &[QuadPrimitive]) -> Vec<u8> {
    let texture = Texture::solid(gpu, "white", Color::WHITE).unwrap();
    let mut renderer = QuadRenderer::new(gpu, config).unwrap();
    renderer.begin_rendering(gpu).unwrap();
    for q in batch {
        renderer.draw(gpu, q, texture.handle()).unwrap();
    }
    renderer.end_rendering(gpu).unwrap();
    gpu.finish().unwrap();

    let bytes = consumed_bytes(gpu);
    renderer.dispose(gpu).unwrap();
    texture.dispose(gpu);
    bytes
}

#[test]
fn ring_is_never_overwritten_while_in_flight() {
    for caps in [Capabilities::FULL, Capabilities::BASELINE] {
        let mut gpu = RecordingBackend::new(caps).with_latency(24);
        let config = QuadRendererConfig {
            max_quads_per_batch: 3,
            primitive_buffer_size: 10 * 80,
            streamer: StreamerConfig {
                growth: GrowthPolicy::disabled(),
                ..StreamerConfig::default()
            },
            ..QuadRendererConfig::default()
        };
        let batch = quads(200);

        let bytes = draw_quads(&mut gpu, &config, &batch);

        assert!(gpu.corruptions().is_empty(), "{:?}: {:?}", caps, gpu.corruptions());
        assert!(gpu.stall_count() > 0);
        assert_eq!(bytes, bytemuck::cast_slice::<QuadPrimitive, u8>(&batch));
    }
}

/// Quad counts that leave an older lap's range at the top of the ring.
const MIXED_COUNTS: [usize; 14] = [1, 1, 1, 1, 1, 2, 2, 3, 1, 2, 4, 1, 3, 2];

fn quad_indices(quad_count: u16) -> Vec<u16> {
    (0..quad_count)
        .flat_map(|q| {
            let b = q * 4;
            [b, b + 1, b + 2, b, b + 2, b + 3]
        })
        .collect()
}

fn stream_mixed_counts(
    gpu: &mut RecordingBackend,
    streamer: &mut Box<dyn PrimitiveStreamer<RecordingBackend, QuadPrimitive>>,
    indexed: bool,
    first: usize,
) -> Vec<QuadPrimitive> {
    let mut streamed = Vec::new();
    let mut next = first;
    for _ in 0..3 {
        for count in MIXED_COUNTS {
            let batch: Vec<QuadPrimitive> = (next..next + count).map(quad).collect();
            next += count;
            let (kind, draw_count) = if indexed {
                (PrimitiveKind::Triangles, count as u32 * 6)
            } else {
                (PrimitiveKind::Quads, count as u32 * 4)
            };
            streamer.render(gpu, kind, &batch, count, draw_count, false).unwrap();
            streamed.extend(batch);
        }
    }
    streamed
}

#[test]
fn mixed_batch_sizes_never_overwrite_in_flight_ranges() {
    let indices = quad_indices(4);
    let cases: [(StreamerPreference, Option<&[u16]>); 3] = [
        (StreamerPreference::PersistentMap, None),
        (StreamerPreference::Upload, None),
        (StreamerPreference::PersistentMap, Some(indices.as_slice())),
    ];
    for (preference, indices) in cases {
        let mut gpu = RecordingBackend::new(Capabilities::FULL).with_latency(1000);
        let shader = quad_program(&mut gpu);
        let config = StreamerConfig {
            preference,
            growth: GrowthPolicy::disabled(),
        };
        let mut streamer = quad_streamer(&mut gpu, 16, indices, config);
        streamer.bind(&mut gpu, Shader::<RecordingBackend>::program(&shader)).unwrap();
        let indexed = indices.is_some();

        let mut streamed = stream_mixed_counts(&mut gpu, &mut streamer, indexed, 0);
        gpu.set_latency(2);
        streamed.extend(stream_mixed_counts(&mut gpu, &mut streamer, indexed, streamed.len()));
        gpu.finish().unwrap();

        assert!(gpu.corruptions().is_empty(), "{:?}: {:?}", preference, gpu.corruptions());
        assert_eq!(streamer.capacity_bytes(), 16 * QuadVertex::layout().stride());
        assert!(streamer.stats().buffer_wait_count > 0);
        if !indexed {
            assert_eq!(consumed_bytes(&gpu), bytemuck::cast_slice::<QuadPrimitive, u8>(&streamed));
        }

        streamer.dispose(&mut gpu);
        shader.dispose(&mut gpu);
        assert_eq!(gpu.live_fences(), 0);
    }
}

#[test]
fn bufferable_flushes_stream_the_same_vertices() {
    let batch = quads(12);

    let mut split = RecordingBackend::new(Capabilities::FULL).with_latency(4);
    let split_config = QuadRendererConfig {
        max_quads_per_batch: 4,
        buffer_capacity_flushes: true,
        primitive_buffer_size: 12 * 80,
        ..QuadRendererConfig::default()
    };
    let split_bytes = draw_quads(&mut split, &split_config, &batch);

    let mut whole = RecordingBackend::new(Capabilities::FULL).with_latency(4);
    let whole_config = QuadRendererConfig {
        max_quads_per_batch: 12,
        ..QuadRendererConfig::default()
    };
    let whole_bytes = draw_quads(&mut whole, &whole_config, &batch);

    assert_eq!(split.count_calls(Call::is_draw), 3);
    assert_eq!(whole.count_calls(Call::is_draw), 1);
    assert_eq!(split_bytes, whole_bytes);
}

#[test]
fn growth_stops_at_the_ceiling() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL).with_latency(10_000);
    let shader = quad_program(&mut gpu);
    let config = StreamerConfig {
        growth: GrowthPolicy {
            factor: 1.75,
            ceiling_bytes: 1024,
        },
        ..StreamerConfig::default()
    };
    let mut streamer = quad_streamer(&mut gpu, 8, None, config);
    streamer.bind(&mut gpu, Shader::<RecordingBackend>::program(&shader)).unwrap();

    let pair = quads(2);
    let mut capacities = vec![streamer.capacity_bytes()];
    for _ in 0..40 {
        streamer.render(&mut gpu, PrimitiveKind::Quads, &pair, 2, 8, false).unwrap();
        let capacity = streamer.capacity_bytes();
        assert!(capacity <= 1024);
        if capacities.last() != Some(&capacity) {
            capacities.push(capacity);
        }
    }

    let stride = QuadVertex::layout().stride();
    assert_eq!(capacities, vec![8 * stride, 14 * stride, 24 * stride, 42 * stride, 51 * stride]);
    let stats = streamer.stats();
    assert_eq!(stats.discarded_buffer_count, 4);
    assert!(stats.buffer_wait_count > stats.discarded_buffer_count);

    gpu.finish().unwrap();
    assert!(gpu.corruptions().is_empty());
    streamer.dispose(&mut gpu);
    shader.dispose(&mut gpu);
    assert_eq!(gpu.live_buffers(), 0);
}

#[test]
fn indexed_streams_wait_but_never_grow() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL).with_latency(10_000);
    let shader = quad_program(&mut gpu);
    let indices = quad_indices(4);
    let mut streamer = quad_streamer(&mut gpu, 16, Some(&indices), StreamerConfig::default());
    streamer.bind(&mut gpu, Shader::<RecordingBackend>::program(&shader)).unwrap();

    let one = quads(1);
    for _ in 0..12 {
        streamer.render(&mut gpu, PrimitiveKind::Triangles, &one, 1, 6, false).unwrap();
    }

    assert_eq!(streamer.capacity_bytes(), 16 * QuadVertex::layout().stride());
    let stats = streamer.stats();
    assert_eq!(stats.discarded_buffer_count, 0);
    assert!(stats.buffer_wait_count > 0);
    assert_eq!(gpu.count_calls(|c| matches!(c, Call::DrawElements { .. })), 12);

    gpu.finish().unwrap();
    assert!(gpu.corruptions().is_empty());
    streamer.dispose(&mut gpu);
    shader.dispose(&mut gpu);
}

#[test]
fn oversized_batch_fails_without_writing() {
    for preference in [StreamerPreference::PersistentMap, StreamerPreference::Upload] {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let shader = quad_program(&mut gpu);
        let config = StreamerConfig {
            preference,
            ..StreamerConfig::default()
        };
        let mut streamer = quad_streamer(&mut gpu, 8, None, config);
        streamer.bind(&mut gpu, Shader::<RecordingBackend>::program(&shader)).unwrap();
        gpu.take_calls();

        let err = streamer
            .render(&mut gpu, PrimitiveKind::Quads, &quads(3), 3, 12, false)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::BatchTooLarge {
                write_size: 240,
                capacity: 160
            }
        ));
        assert!(gpu.calls().is_empty(), "{:?}", gpu.calls());

        streamer.dispose(&mut gpu);
        shader.dispose(&mut gpu);
    }
}

#[test]
fn five_quads_at_capacity_four() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL);
    let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
    let mut renderer = QuadRenderer::new(
        &mut gpu,
        &QuadRendererConfig {
            max_quads_per_batch: 4,
            ..QuadRendererConfig::default()
        },
    )
    .unwrap();

    renderer.begin_rendering(&mut gpu).unwrap();
    for q in quads(5) {
        renderer.draw(&mut gpu, &q, texture.handle()).unwrap();
    }
    renderer.end_rendering(&mut gpu).unwrap();

    let stats = renderer.stats();
    assert_eq!(stats.rendered_quad_count, 5);
    assert_eq!(stats.flushed_buffer_count, 2);
    renderer.dispose(&mut gpu).unwrap();
    texture.dispose(&mut gpu);
}

#[test]
fn texture_switch_costs_one_flush() {
    let mut gpu = RecordingBackend::new(Capabilities::BASELINE);
    let a = Texture::solid(&mut gpu, "a", Color::WHITE).unwrap();
    let b = Texture::solid(&mut gpu, "b", Color::BLACK).unwrap();
    let mut renderer = QuadRenderer::new(&mut gpu, &QuadRendererConfig::default()).unwrap();

    renderer.begin_rendering(&mut gpu).unwrap();
    renderer.draw(&mut gpu, &quad(0), a.handle()).unwrap();
    renderer.draw(&mut gpu, &quad(1), a.handle()).unwrap();
    renderer.draw(&mut gpu, &quad(2), b.handle()).unwrap();
    renderer.end_rendering(&mut gpu).unwrap();

    assert_eq!(renderer.stats().flushed_buffer_count, 2);
    renderer.dispose(&mut gpu).unwrap();
    a.dispose(&mut gpu);
    b.dispose(&mut gpu);
}

#[test]
fn reapplying_states_issues_no_calls() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL);
    let mut cache = StateCache::new();
    let states = RenderStates::default();

    states.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap();
    let issued = gpu.count_calls(Call::is_state_change);
    assert!(issued > 0);

    assert_eq!(states.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap(), 0);
    assert_eq!(gpu.count_calls(Call::is_state_change), issued);
}

#[test]
fn disabled_blending_is_emitted_once() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL);
    let mut cache = StateCache::new();
    let off = RenderStates {
        blending_factor: BlendingFactorState::off(),
        ..RenderStates::default()
    };
    let other_off = RenderStates {
        blending_factor: BlendingFactorState::new(BlendFactor::One, BlendFactor::Zero).disabled(),
        ..RenderStates::default()
    };

    off.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap();
    off.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap();
    assert_eq!(other_off.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap(), 0);

    assert_eq!(
        gpu.count_calls(|c| matches!(c, Call::SetEnabled(Toggle::Blend, false))),
        1
    );
    assert_eq!(gpu.count_calls(|c| matches!(c, Call::BlendFunc { .. })), 0);
}

#[test]
fn clearing_the_cache_reapplies_everything() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL);
    let mut cache = StateCache::new();
    let states = RenderStates::default();

    assert_eq!(states.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap(), 5);
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(states.apply(&mut cache, &mut gpu, &mut NoPendingBatch).unwrap(), 5);
}

#[test]
fn shared_shader_is_exposed_and_kept() {
    let mut gpu = RecordingBackend::new(Capabilities::FULL);
    let shader: Rc<dyn Shader<RecordingBackend>> =
        Rc::new(ProgramShader::textured_quad(&mut gpu, &["u_combinedMatrix", "u_texture"]).unwrap());
    let renderer = QuadRenderer::with_shader(&mut gpu, shader.clone(), &QuadRendererConfig::default()).unwrap();

    let exposed = renderer.shader().unwrap();
    assert!(Rc::ptr_eq(exposed, &shader));
    renderer.dispose(&mut gpu).unwrap();
    assert!(gpu.uniform_location(shader.program(), "u_texture").is_some());
}
