//! GPU pipeline: the double-buffered life/trail grids, the two step
//! kernels, and the display pass that composites them into a frame.
//!
//! One `tick` runs per display refresh. A tick applies configuration
//! changes, reallocates the grids when the viewport or render scale
//! changed, advances the simulation when a step is due, and composites
//! the current buffers with inter-step interpolation. Compute work waits
//! for completion before the tick returns, so consecutive ticks never
//! overlap GPU work on the same buffer pair.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use bytemuck::{Pod, Zeroable};
use winit::window::Window;

use crate::config::{self, Settings, SharedSettings};
use crate::engine::{DispatchHealth, StepClock};
use crate::grid::{grid_size_for, BufferPair, GridSize};
use crate::logo::LogoOverlay;

/// Fixed per-step decay of the accumulated life-presence channel.
const LIFE_DECAY: f32 = 0.01;
/// Fixed per-step decay of the activity trail channels.
const TRAIL_DECAY: f32 = 0.06;

/// Cell rule: toroidal Conway neighborhood over the packed cell word
/// (bit 0 alive, bits 8..16 age), plus hash-driven spawns gated by the
/// spawn probability and suppressed where the trail is still active.
const LIFE_STEP_SHADER: &str = r#"
struct LifeStepParams {
    size: vec2<u32>,
    update_counter: u32,
    spawn_probability: f32,
    idle_threshold: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
}

@group(0) @binding(0) var<storage, read> life_prev: array<u32>;
@group(0) @binding(1) var<storage, read_write> life_next: array<u32>;
@group(0) @binding(2) var<storage, read> trail_prev: array<vec4<f32>>;
@group(0) @binding(3) var<uniform> params: LifeStepParams;

fn lcg(seed: u32) -> u32 {
    return seed * 1664525u + 1013904223u;
}

fn hash01(seed: u32) -> f32 {
    return f32(lcg(lcg(seed)) & 0xffffffu) / 16777216.0;
}

fn alive_at(x: i32, y: i32) -> u32 {
    let w = i32(params.size.x);
    let h = i32(params.size.y);
    let xi = (x + w) % w;
    let yi = (y + h) % h;
    return life_prev[u32(yi) * params.size.x + u32(xi)] & 1u;
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.size.x || gid.y >= params.size.y) {
        return;
    }
    let idx = gid.y * params.size.x + gid.x;

    var neighbors = 0u;
    for (var dy: i32 = -1; dy <= 1; dy = dy + 1) {
        for (var dx: i32 = -1; dx <= 1; dx = dx + 1) {
            if (dx == 0 && dy == 0) {
                continue;
            }
            neighbors = neighbors + alive_at(i32(gid.x) + dx, i32(gid.y) + dy);
        }
    }

    let cell = life_prev[idx];
    let alive = cell & 1u;
    let age = (cell >> 8u) & 0xffu;

    var next_alive = 0u;
    var next_age = 0u;
    if (alive == 1u && (neighbors == 2u || neighbors == 3u)) {
        next_alive = 1u;
        next_age = min(age + 1u, 255u);
    } else if (alive == 0u && neighbors == 3u) {
        next_alive = 1u;
    }

    // Random spawns keep the canvas from going still. Suppressed where
    // the trail still carries activity above the idle threshold.
    if (next_alive == 0u) {
        let noise = hash01(idx ^ lcg(params.update_counter));
        if (noise < params.spawn_probability && trail_prev[idx].w <= params.idle_threshold) {
            next_alive = 1u;
        }
    }

    life_next[idx] = next_alive | (next_age << 8u);
}
"#;

/// Trail rule: exponential decay with the fixed constants, accumulation
/// of life presence and generation-to-generation activity, plus a
/// hash-picked neighbor bleed weighted by the trail spread.
const TRAIL_STEP_SHADER: &str = r#"
struct TrailStepParams {
    life_size: vec2<u32>,
    trail_size: vec2<u32>,
    life_decay: f32,
    trail_decay: f32,
    trail_spread: f32,
    update_counter: u32,
}

@group(0) @binding(0) var<storage, read> life_prev: array<u32>;
@group(0) @binding(1) var<storage, read> life_next: array<u32>;
@group(0) @binding(2) var<storage, read> trail_prev: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> trail_next: array<vec4<f32>>;
@group(0) @binding(4) var<uniform> params: TrailStepParams;

fn lcg(seed: u32) -> u32 {
    return seed * 1664525u + 1013904223u;
}

fn trail_at(x: i32, y: i32) -> vec4<f32> {
    let w = i32(params.trail_size.x);
    let h = i32(params.trail_size.y);
    let xi = (x + w) % w;
    let yi = (y + h) % h;
    return trail_prev[u32(yi) * params.trail_size.x + u32(xi)];
}

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.trail_size.x || gid.y >= params.trail_size.y) {
        return;
    }
    let idx = gid.y * params.trail_size.x + gid.x;

    let was = f32(life_prev[idx] & 1u);
    let now = f32(life_next[idx] & 1u);
    let activity = abs(now - was);

    // Bleed from one hash-picked neighbor rather than a symmetric blur;
    // that asymmetry is what gives the trails their watercolor run-out.
    var offsets = array<vec2<i32>, 4>(
        vec2<i32>(-1, 0),
        vec2<i32>(1, 0),
        vec2<i32>(0, -1),
        vec2<i32>(0, 1),
    );
    let pick = lcg(idx ^ lcg(params.update_counter));
    let o = offsets[pick & 3u];
    let bleed = trail_at(i32(gid.x) + o.x, i32(gid.y) + o.y);

    var v = mix(trail_prev[idx], bleed, clamp(params.trail_spread, 0.0, 1.0) * 0.5);
    v.x = clamp(v.x * (1.0 - params.life_decay) + now * params.life_decay, 0.0, 1.0);
    v.y = clamp(v.y * (1.0 - params.trail_decay) + activity, 0.0, 4.0);
    v.z = clamp(v.z * (1.0 - params.trail_decay) + now * params.trail_decay * 4.0, 0.0, 1.0);
    v.w = clamp(v.w * (1.0 - params.trail_decay) + activity * 0.5, 0.0, 1.0);

    trail_next[idx] = v;
}
"#;

const TRAIL_RESET_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read_write> trail: array<vec4<f32>>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&trail)) {
        trail[gid.x] = vec4<f32>(0.0);
    }
}
"#;

const DISPLAY_SHADER: &str = r#"
struct RenderUniforms {
    color1: vec4<f32>,
    color2: vec4<f32>,
    color3: vec4<f32>,
    bg_color: vec4<f32>,
    logo_size: vec2<f32>,
    logo_border: f32,
    logo_blend: f32,
    life_size: vec2<u32>,
    trail_size: vec2<u32>,
    output_size: vec2<u32>,
    time: f32,
    interpolation: f32,
    max_output: f32,
    update_counter: u32,
    invert_background: u32,
    bleach_background: u32,
    trail_sampling_noise: f32,
    activity_multiplier: f32,
    life_state_multiplier: f32,
    noise_speed: f32,
}

@group(0) @binding(0) var<storage, read> life_prev: array<u32>;
@group(0) @binding(1) var<storage, read> life_next: array<u32>;
@group(0) @binding(2) var<storage, read> trail_prev: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> trail_next: array<vec4<f32>>;
@group(0) @binding(4) var<uniform> u: RenderUniforms;
@group(1) @binding(0) var logo_tex: texture_2d<f32>;
@group(1) @binding(1) var logo_samp: sampler;

struct VertexOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    // Fullscreen triangle.
    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VertexOut;
    out.pos = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    return out;
}

fn lcg(seed: u32) -> u32 {
    return seed * 1664525u + 1013904223u;
}

fn hash01(seed: u32) -> f32 {
    return f32(lcg(lcg(seed)) & 0xffffffu) / 16777216.0;
}

fn lattice(cell: vec2<u32>, phase: u32) -> f32 {
    return hash01(cell.x ^ lcg(cell.y ^ lcg(phase)));
}

fn noise_at(cell: vec2<u32>, f: vec2<f32>, phase: u32) -> f32 {
    let a = lattice(cell, phase);
    let b = lattice(cell + vec2<u32>(1u, 0u), phase);
    let c = lattice(cell + vec2<u32>(0u, 1u), phase);
    let d = lattice(cell + vec2<u32>(1u, 1u), phase);
    let s = f * f * (3.0 - 2.0 * f);
    return mix(mix(a, b, s.x), mix(c, d, s.x), s.y);
}

// Animated value noise: bilinear in space, linear in time.
fn value_noise(p: vec2<f32>, t: f32) -> f32 {
    let cell = vec2<u32>(p);
    let f = fract(p);
    let t0 = u32(t);
    return mix(noise_at(cell, f, t0), noise_at(cell, f, t0 + 1u), fract(t));
}

fn clamp_cell(p: vec2<f32>, size: vec2<u32>) -> vec2<u32> {
    let limit = vec2<f32>(size) - 1.0;
    return vec2<u32>(clamp(p, vec2<f32>(0.0), limit));
}

fn cell_state(cell: u32) -> vec2<f32> {
    return vec2<f32>(f32(cell & 1u), f32((cell >> 8u) & 0xffu) / 255.0);
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let life_size = vec2<f32>(u.life_size);
    let out_size = vec2<f32>(u.output_size);
    let pixel = in.uv * out_size;
    let cell_f = in.uv * life_size;

    // Jittered trail lookup; the jitter radius is the user's trail scale.
    let seed = u32(pixel.x) ^ lcg(u32(pixel.y) ^ lcg(u.update_counter));
    let jitter = (vec2<f32>(hash01(seed), hash01(lcg(seed))) - 0.5) * u.trail_sampling_noise;

    let life_cell = clamp_cell(cell_f, u.life_size);
    let trail_cell = clamp_cell(cell_f + jitter, u.trail_size);
    let life_idx = life_cell.y * u.life_size.x + life_cell.x;
    let trail_idx = trail_cell.y * u.trail_size.x + trail_cell.x;

    let life = mix(cell_state(life_prev[life_idx]), cell_state(life_next[life_idx]), u.interpolation);
    let trail = mix(trail_prev[trail_idx], trail_next[trail_idx], u.interpolation);

    let phase = value_noise(cell_f * 0.25, u.time * u.noise_speed);

    var color = u.bg_color.rgb;
    let w1 = clamp(trail.x + life.x * u.life_state_multiplier, 0.0, 1.0);
    let w2 = clamp(trail.y * (0.5 + phase) + u.activity_multiplier * life.y, 0.0, 1.0);
    let w3 = clamp(trail.z * (1.0 - phase), 0.0, 1.0);
    color = mix(color, u.color1.rgb, w1);
    color = mix(color, u.color2.rgb, w2);
    color = mix(color, u.color3.rgb, w3);

    if (u.bleach_background != 0u) {
        color = 1.0 - (1.0 - color) * (1.0 - u.bg_color.rgb * 0.5);
    }
    if (u.invert_background != 0u) {
        color = 1.0 - color;
    }

    // Logo overlay in the bottom-right corner, inset by its border.
    let logo_origin = out_size - u.logo_size - vec2<f32>(u.logo_border);
    let in_logo = u.logo_size.x > 0.0
        && all(pixel >= logo_origin)
        && all(pixel < logo_origin + u.logo_size);
    let logo_uv = clamp(
        (pixel - logo_origin) / max(u.logo_size, vec2<f32>(1.0)),
        vec2<f32>(0.0),
        vec2<f32>(1.0),
    );
    let logo = textureSampleLevel(logo_tex, logo_samp, logo_uv, 0.0);
    let mask = select(0.0, logo.a * abs(u.logo_blend), in_logo);
    let lit = select(color * (1.0 - logo.rgb * logo.a), max(color, logo.rgb), u.logo_blend >= 0.0);
    color = mix(color, lit, mask);

    return vec4<f32>(clamp(color, vec3<f32>(0.0), vec3<f32>(u.max_output)), 1.0);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LifeStepParams {
    size: [u32; 2],
    update_counter: u32,
    spawn_probability: f32,
    idle_threshold: f32,
    _pad: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TrailStepParams {
    life_size: [u32; 2],
    trail_size: [u32; 2],
    life_decay: f32,
    trail_decay: f32,
    trail_spread: f32,
    update_counter: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RenderUniforms {
    color1: [f32; 4],
    color2: [f32; 4],
    color3: [f32; 4],
    bg_color: [f32; 4],
    logo_size: [f32; 2],
    logo_border: f32,
    logo_blend: f32,
    life_size: [u32; 2],
    trail_size: [u32; 2],
    output_size: [u32; 2],
    time: f32,
    interpolation: f32,
    max_output: f32,
    update_counter: u32,
    invert_background: u32,
    bleach_background: u32,
    trail_sampling_noise: f32,
    activity_multiplier: f32,
    life_state_multiplier: f32,
    noise_speed: f32,
}

fn rgb1(color: [f32; 3]) -> [f32; 4] {
    [color[0], color[1], color[2], 1.0]
}

/// The four state buffers for one grid size, plus bind groups for both
/// previous/next orientations. Reallocated wholesale on resize.
struct GridBuffers {
    size: GridSize,
    life: BufferPair<wgpu::Buffer>,
    trail: BufferPair<wgpu::Buffer>,
    life_step_bind: [wgpu::BindGroup; 2],
    trail_step_bind: [wgpu::BindGroup; 2],
    display_bind: [wgpu::BindGroup; 2],
}

/// Pipeline controller. Owns the device, the grids, the step clock and
/// the logo overlay; the host calls [`SaverPipeline::tick`] once per
/// display refresh and [`SaverPipeline::resize_surface`] on viewport
/// changes.
pub struct SaverPipeline {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    life_step_pipeline: wgpu::ComputePipeline,
    trail_step_pipeline: wgpu::ComputePipeline,
    trail_reset_pipeline: wgpu::ComputePipeline,
    display_pipeline: wgpu::RenderPipeline,

    life_step_layout: wgpu::BindGroupLayout,
    trail_step_layout: wgpu::BindGroupLayout,
    trail_reset_layout: wgpu::BindGroupLayout,
    display_layout: wgpu::BindGroupLayout,
    logo_layout: wgpu::BindGroupLayout,

    life_params_buf: wgpu::Buffer,
    trail_params_buf: wgpu::Buffer,
    render_uniforms_buf: wgpu::Buffer,

    sampler: wgpu::Sampler,
    placeholder_logo: wgpu::Texture,
    logo_bind: wgpu::BindGroup,

    grids: Option<GridBuffers>,
    logo: LogoOverlay,
    clock: StepClock,
    health: DispatchHealth,

    settings: SharedSettings,
    prefs_path: PathBuf,
    preview: bool,
    started: Instant,
}

impl SaverPipeline {
    pub fn new(
        window: Arc<Window>,
        settings: SharedSettings,
        prefs_path: PathBuf,
        assets_dir: PathBuf,
        preview: bool,
    ) -> anyhow::Result<Self> {
        pollster::block_on(Self::new_async(window, settings, prefs_path, assets_dir, preview))
    }

    async fn new_async(
        window: Arc<Window>,
        settings: SharedSettings,
        prefs_path: PathBuf,
        assets_dir: PathBuf,
        preview: bool,
    ) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let size = window.inner_size();
        let surface = instance
            .create_surface(window)
            .context("creating drawable surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no compatible GPU adapter")?;
        log::info!("GPU adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Conway Watercolor"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("acquiring GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let shader = |label, source| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        };
        let life_step_shader = shader("Life Step", LIFE_STEP_SHADER);
        let trail_step_shader = shader("Trail Step", TRAIL_STEP_SHADER);
        let trail_reset_shader = shader("Trail Reset", TRAIL_RESET_SHADER);
        let display_shader = shader("Display", DISPLAY_SHADER);

        let storage = |read_only| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let uniform = wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let entry = |binding, visibility, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty,
            count: None,
        };

        let compute = wgpu::ShaderStages::COMPUTE;
        let fragment = wgpu::ShaderStages::FRAGMENT;

        let life_step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Life Step Layout"),
            entries: &[
                entry(0, compute, storage(true)),
                entry(1, compute, storage(false)),
                entry(2, compute, storage(true)),
                entry(3, compute, uniform),
            ],
        });
        let trail_step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Trail Step Layout"),
            entries: &[
                entry(0, compute, storage(true)),
                entry(1, compute, storage(true)),
                entry(2, compute, storage(true)),
                entry(3, compute, storage(false)),
                entry(4, compute, uniform),
            ],
        });
        let trail_reset_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Trail Reset Layout"),
            entries: &[entry(0, compute, storage(false))],
        });
        let display_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Display Layout"),
            entries: &[
                entry(0, fragment, storage(true)),
                entry(1, fragment, storage(true)),
                entry(2, fragment, storage(true)),
                entry(3, fragment, storage(true)),
                entry(4, fragment, uniform),
            ],
        });
        let logo_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Logo Layout"),
            entries: &[
                entry(
                    0,
                    fragment,
                    wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                ),
                entry(
                    1,
                    fragment,
                    wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                ),
            ],
        });

        let compute_pipeline = |label, layout: &wgpu::BindGroupLayout, module| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: "main",
                compilation_options: Default::default(),
            })
        };
        let life_step_pipeline = compute_pipeline("Life Step", &life_step_layout, &life_step_shader);
        let trail_step_pipeline =
            compute_pipeline("Trail Step", &trail_step_layout, &trail_step_shader);
        let trail_reset_pipeline =
            compute_pipeline("Trail Reset", &trail_reset_layout, &trail_reset_shader);

        let display_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Display"),
                bind_group_layouts: &[&display_layout, &logo_layout],
                push_constant_ranges: &[],
            });
        let display_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Display"),
            layout: Some(&display_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &display_shader,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &display_shader,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let uniform_buffer = |label, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let life_params_buf = uniform_buffer("Life Params", std::mem::size_of::<LifeStepParams>());
        let trail_params_buf =
            uniform_buffer("Trail Params", std::mem::size_of::<TrailStepParams>());
        let render_uniforms_buf =
            uniform_buffer("Render Uniforms", std::mem::size_of::<RenderUniforms>());

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Logo Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Bound whenever no logo is selected, so the logo bind group
        // never has a hole in it.
        let placeholder_logo = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Logo Placeholder"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &placeholder_logo,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let logo_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Logo Bind"),
            layout: &logo_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(
                        &placeholder_logo.create_view(&Default::default()),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        // Offset the kernel counter per session so repeated runs diverge.
        let session_seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_secs() % 10_000) as u32)
            .unwrap_or(0);

        Ok(Self {
            device,
            queue,
            surface,
            surface_config,
            life_step_pipeline,
            trail_step_pipeline,
            trail_reset_pipeline,
            display_pipeline,
            life_step_layout,
            trail_step_layout,
            trail_reset_layout,
            display_layout,
            logo_layout,
            life_params_buf,
            trail_params_buf,
            render_uniforms_buf,
            sampler,
            placeholder_logo,
            logo_bind,
            grids: None,
            logo: LogoOverlay::new(assets_dir),
            clock: StepClock::new(session_seed),
            health: DispatchHealth::default(),
            settings,
            prefs_path,
            preview,
            started: Instant::now(),
        })
    }

    /// Host resize callback. Grid reallocation happens on the next tick,
    /// when the new dimensions are observed.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    /// One display tick: apply configuration, resize if needed, step or
    /// hold, refresh the logo, composite and present.
    ///
    /// Errors are fatal (resource exhaustion); every recoverable
    /// condition is absorbed and logged here.
    pub fn tick(&mut self) -> anyhow::Result<()> {
        let settings = config::snapshot(&self.settings);

        let viewport = (self.surface_config.width, self.surface_config.height);
        let wanted = grid_size_for(viewport, settings.render_scale_cells(), self.preview);
        let mut dims_changed = false;
        if self.grids.as_ref().map(|g| g.size) != Some(wanted) {
            if wanted.is_empty() {
                self.grids = None;
            } else {
                self.allocate_grids(wanted);
            }
            // In-flight interpolation refers to buffers that no longer
            // exist; clear it and present the fresh buffers as-is.
            self.clock.reset_phase();
            dims_changed = true;
        }

        self.clock.retune(settings.step_wait_frames());

        if self
            .logo
            .refresh(&self.device, &self.queue, &self.settings, &self.prefs_path)
        {
            self.rebuild_logo_bind();
        }

        if !dims_changed && self.grids.is_some() && self.clock.tick() {
            self.step(&settings);
        }

        match self.render(&settings) {
            Ok(()) => {
                if self.health.success() {
                    log::info!("dispatch succeeded again, leaving degraded state");
                }
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                anyhow::bail!("drawable surface out of memory");
            }
            Err(err) => {
                if matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) {
                    self.surface.configure(&self.device, &self.surface_config);
                }
                log::debug!("skipping tick: {err}");
                if self.health.failure() {
                    log::warn!("dispatch failing repeatedly, pipeline is degraded");
                }
            }
        }
        Ok(())
    }

    fn make_storage_buffer(&self, label: &str, bytes: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Discard and reallocate all four state buffers for `size`, build
    /// bind groups for both orientations, and reset the "next" buffers to
    /// the dead/zero state.
    fn allocate_grids(&mut self, size: GridSize) {
        log::info!("allocating {}x{} grids", size.width, size.height);

        let life_bytes = (size.cells() * 4) as u64;
        let trail_bytes = (size.cells() * 16) as u64;
        let life = BufferPair::new(
            self.make_storage_buffer("Life A", life_bytes),
            self.make_storage_buffer("Life B", life_bytes),
        );
        let trail = BufferPair::new(
            self.make_storage_buffer("Trail A", trail_bytes),
            self.make_storage_buffer("Trail B", trail_bytes),
        );

        let (life_a, life_b) = life.slots();
        let (trail_a, trail_b) = trail.slots();
        let bind = |label: &str, layout: &wgpu::BindGroupLayout, buffers: &[&wgpu::Buffer]| {
            let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
                .iter()
                .enumerate()
                .map(|(i, buffer)| wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource: buffer.as_entire_binding(),
                })
                .collect();
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &entries,
            })
        };

        // Orientation 0: slot A is "previous". Orientation 1: flipped.
        let life_step_bind = [
            bind(
                "Life Step A->B",
                &self.life_step_layout,
                &[life_a, life_b, trail_a, &self.life_params_buf],
            ),
            bind(
                "Life Step B->A",
                &self.life_step_layout,
                &[life_b, life_a, trail_b, &self.life_params_buf],
            ),
        ];
        let trail_step_bind = [
            bind(
                "Trail Step A->B",
                &self.trail_step_layout,
                &[life_a, life_b, trail_a, trail_b, &self.trail_params_buf],
            ),
            bind(
                "Trail Step B->A",
                &self.trail_step_layout,
                &[life_b, life_a, trail_b, trail_a, &self.trail_params_buf],
            ),
        ];
        let display_bind = [
            bind(
                "Display A",
                &self.display_layout,
                &[life_a, life_b, trail_a, trail_b, &self.render_uniforms_buf],
            ),
            bind(
                "Display B",
                &self.display_layout,
                &[life_b, life_a, trail_b, trail_a, &self.render_uniforms_buf],
            ),
        ];

        // The "next" pair must read as fully dead before its first
        // presentation: clear the life buffer explicitly and run the
        // trail-reset kernel over the trail buffer.
        self.queue
            .write_buffer(life.next(), 0, &vec![0u8; life_bytes as usize]);

        let reset_bind = bind("Trail Reset", &self.trail_reset_layout, &[trail.next()]);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Trail Reset"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Trail Reset"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.trail_reset_pipeline);
            pass.set_bind_group(0, &reset_bind, &[]);
            pass.dispatch_workgroups((size.cells() as u32 + 63) / 64, 1, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::Wait);

        self.grids = Some(GridBuffers {
            size,
            life,
            trail,
            life_step_bind,
            trail_step_bind,
            display_bind,
        });
    }

    /// Advance the simulation by one step: swap both buffer pairs, then
    /// dispatch the life-step and trail-step kernels and wait for them.
    fn step(&mut self, settings: &Settings) {
        let Some(grids) = self.grids.as_mut() else {
            return;
        };
        grids.life.swap();
        grids.trail.swap();

        let size = grids.size;
        let life_params = LifeStepParams {
            size: [size.width, size.height],
            update_counter: self.clock.seeded_counter(),
            spawn_probability: settings.spawn_probability,
            idle_threshold: settings.idle_threshold,
            _pad: [0.0; 3],
        };
        self.queue
            .write_buffer(&self.life_params_buf, 0, bytemuck::bytes_of(&life_params));

        let trail_params = TrailStepParams {
            life_size: [size.width, size.height],
            trail_size: [size.width, size.height],
            life_decay: LIFE_DECAY,
            trail_decay: TRAIL_DECAY,
            trail_spread: 1.0 - settings.idle_threshold,
            update_counter: self.clock.update_counter(),
        };
        self.queue
            .write_buffer(&self.trail_params_buf, 0, bytemuck::bytes_of(&trail_params));

        let orientation = grids.life.flipped() as usize;
        let groups_x = (size.width + 7) / 8;
        let groups_y = (size.height + 7) / 8;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Simulation Step"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Life Step"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.life_step_pipeline);
            pass.set_bind_group(0, &grids.life_step_bind[orientation], &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Trail Step"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.trail_step_pipeline);
            pass.set_bind_group(0, &grids.trail_step_bind[orientation], &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        // Waiting here keeps a strict order between consecutive ticks:
        // the next tick never touches a buffer pair still in flight.
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Composite the current buffers into the drawable and present it.
    /// Does nothing while the grids are not yet allocated.
    fn render(&mut self, settings: &Settings) -> Result<(), wgpu::SurfaceError> {
        let Some(grids) = self.grids.as_ref() else {
            log::debug!("not ready: grids not allocated");
            return Ok(());
        };

        let frame = self.surface.get_current_texture()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let logo = self.logo.descriptor();
        let uniforms = RenderUniforms {
            color1: rgb1(settings.color1),
            color2: rgb1(settings.color2),
            color3: rgb1(settings.color3),
            bg_color: rgb1(settings.background_color),
            logo_size: logo.size,
            logo_border: logo.border,
            logo_blend: logo.blend,
            life_size: [grids.size.width, grids.size.height],
            trail_size: [grids.size.width, grids.size.height],
            output_size: [self.surface_config.width, self.surface_config.height],
            time: self.started.elapsed().as_secs_f32(),
            interpolation: self.clock.interpolation(),
            // SDR surface; an EDR-capable host would pass its headroom.
            max_output: 1.0,
            update_counter: self.clock.seeded_counter(),
            invert_background: settings.invert_background as u32,
            bleach_background: settings.bleach_background as u32,
            trail_sampling_noise: settings.trail_scale,
            activity_multiplier: settings.activity_multiplier,
            life_state_multiplier: settings.life_state_multiplier,
            noise_speed: settings.noise_speed,
        };
        self.queue
            .write_buffer(&self.render_uniforms_buf, 0, bytemuck::bytes_of(&uniforms));

        let orientation = grids.life.flipped() as usize;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Display"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Display"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.display_pipeline);
            pass.set_bind_group(0, &grids.display_bind[orientation], &[]);
            pass.set_bind_group(1, &self.logo_bind, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn rebuild_logo_bind(&mut self) {
        let view = match self.logo.texture() {
            Some(texture) => texture.create_view(&Default::default()),
            None => self.placeholder_logo.create_view(&Default::default()),
        };
        self.logo_bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Logo Bind"),
            layout: &self.logo_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_structs_have_gpu_compatible_sizes() {
        // WGSL struct layouts are written without implicit padding; the
        // Rust sides must match byte for byte.
        assert_eq!(std::mem::size_of::<LifeStepParams>(), 32);
        assert_eq!(std::mem::size_of::<TrailStepParams>(), 32);
        assert_eq!(std::mem::size_of::<RenderUniforms>(), 144);
    }

    #[test]
    fn rgb1_appends_unit_alpha() {
        assert_eq!(rgb1([0.1, 0.2, 0.3]), [0.1, 0.2, 0.3, 1.0]);
    }
}
