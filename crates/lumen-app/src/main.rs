// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::Parser;
use glam::Vec4;
use lumen_core::{fatal, init_tracing, OrFatal};
use lumen_render::{FramesInFlight, RenderSize, Renderer, TickResult, VsyncPolicy};
use lumen_render_vk::{
    vk, CapabilityRegistry, EnabledCapabilities, EngineConfig, GraphicsPipelineDesc, PipelineError,
    PipelineId, PushConstantValue, RuntimeSupport, VkEngine,
};
use tracing::{info, warn};

use lumen_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::Key,
    window::{Window, WindowId},
};

use config::RenderCfg;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const DEBUG_UTILS: &str = "VK_EXT_debug_utils";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// on | off | triple_buffering
    #[arg(long)]
    vsync: Option<VsyncPolicy>,
    /// 2 or 3
    #[arg(long)]
    frames_in_flight: Option<FramesInFlight>,
    /// Enable the Khronos validation layer and route its messages to the log
    #[arg(long)]
    validation: bool,
}

fn validation_from_env() -> bool {
    std::env::var("LUMEN_VALIDATION").is_ok_and(|v| v == "1")
}

/// Rejections are logged by the registry and otherwise ignored.
fn capabilities(cfg: &RenderCfg, validation: bool) -> EnabledCapabilities {
    let runtime = RuntimeSupport::probe().unwrap_or_else(|e| {
        warn!("could not query the vulkan runtime ({e}); optional capabilities disabled");
        RuntimeSupport::default()
    });
    let mut reg = CapabilityRegistry::new(runtime);

    let mut layers = cfg.layers.clone();
    let mut instance_extensions = cfg.instance_extensions.clone();
    if validation {
        for (list, name) in [
            (&mut layers, VALIDATION_LAYER),
            (&mut instance_extensions, DEBUG_UTILS),
        ] {
            if !list.iter().any(|n| n == name) {
                list.push(name.to_owned());
            }
        }
    }

    for l in &layers {
        let _ = reg.enable_layer(l);
    }
    for e in &instance_extensions {
        let _ = reg.enable_instance_extension(e);
    }
    for e in &cfg.device_extensions {
        let _ = reg.enable_device_extension(e);
    }
    reg.finish()
}

/// Slow hue drift so it's obvious frames are flowing.
fn tint_at(t: f32) -> Vec4 {
    Vec4::new(
        0.75 + 0.25 * t.sin(),
        0.75 + 0.25 * (t + 2.1).sin(),
        0.75 + 0.25 * (t + 4.2).sin(),
        1.0,
    )
}

fn next_vsync(p: VsyncPolicy) -> VsyncPolicy {
    match p {
        VsyncPolicy::On => VsyncPolicy::Off,
        VsyncPolicy::Off => VsyncPolicy::TripleBuffering,
        VsyncPolicy::TripleBuffering => VsyncPolicy::On,
    }
}

fn window_size(window: &Window) -> RenderSize {
    let s = window.inner_size();
    RenderSize {
        width: s.width,
        height: s.height,
    }
}

struct App {
    // Field order matters on drop: the engine lets go of the surface before
    // the window goes away.
    engine: VkEngine,
    window: Option<Window>,
    triangle: Option<PipelineId>,
    render_size: RenderSize,
    vsync: VsyncPolicy,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
    started: Instant,
}

impl App {
    /// Needs a live swapchain for the render pass; retried after each reset
    /// while the window is still 0x0.
    fn ensure_triangle(&mut self) {
        if self.triangle.is_some() {
            return;
        }
        let desc = GraphicsPipelineDesc::new(
            include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv")).to_vec(),
            include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv")).to_vec(),
        )
        .with_push_constants(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<Vec4>() as u32,
        })
        .with_draw(3, 1);

        match self.engine.register_graphics_pipeline(&desc) {
            Ok(id) => {
                info!("triangle pipeline registered ({id:?})");
                self.triangle = Some(id);
            }
            Err(PipelineError::Detached) => {}
            Err(e) => fatal("register triangle pipeline", &e.into()),
        }
    }

    fn hard_reset(&mut self) {
        if let Some(w) = &self.window {
            self.render_size = window_size(w);
        }
        self.paused = self.render_size.is_zero();
        self.engine
            .hard_reset(self.render_size)
            .or_fatal("swapchain hard reset");
        self.ensure_triangle();
    }

    fn draw(&mut self) {
        if let Some(id) = self.triangle {
            let tint = tint_at(self.started.elapsed().as_secs_f32());
            if let Err(e) = self.engine.set_push_constant(
                id,
                vk::ShaderStageFlags::FRAGMENT,
                0,
                PushConstantValue::Vec4(tint),
            ) {
                warn!("tint push constant rejected: {e}");
            }
        }

        match self.engine.update() {
            TickResult::Ok => self.frames = self.frames.saturating_add(1),
            TickResult::ResizeNeeded => self.hard_reset(),
            TickResult::Error => fatal("render tick", &anyhow!("update returned ERROR")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = event_loop
                .create_window(Window::default_attributes().with_title("lumen"))
                .or_fatal("create_window");
            self.render_size = window_size(&window);

            self.engine
                .attach_surface(&window, &window, self.render_size)
                .or_fatal("attach surface");
            info!(
                "attached to {} ({} frames in flight, vsync {})",
                self.engine.device_name().unwrap_or("?"),
                self.engine.frames_in_flight().get(),
                self.vsync
            );

            self.window = Some(window);
            self.ensure_triangle();
        }

        self.paused = self.render_size.is_zero();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                self.engine.shutdown();
                self.triangle = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                info!(
                    "Resized → {}x{}",
                    self.render_size.width, self.render_size.height
                );
                if !self.exiting && self.window.is_some() {
                    self.hard_reset();
                    if !self.paused {
                        if let Some(w) = &self.window {
                            w.request_redraw();
                        }
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.paused = occluded || self.render_size.is_zero();
                info!("Occluded={} → paused={}", occluded, self.paused);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                if let Key::Character(c) = &event.logical_key {
                    if c.as_str().eq_ignore_ascii_case("v") {
                        self.vsync = next_vsync(self.vsync);
                        info!("vsync → {}", self.vsync);
                        if self.engine.set_vsync(self.vsync) {
                            self.hard_reset();
                        }
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                self.draw();
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // window-size=0 or occluded → sleep
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // Presentation paces us when vsync is on; otherwise keep drawing.
        event_loop.set_control_flow(match self.vsync {
            VsyncPolicy::On => ControlFlow::Wait,
            VsyncPolicy::Off | VsyncPolicy::TripleBuffering => ControlFlow::Poll,
        });
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load(&args.config);

    let validation = args.validation || validation_from_env();
    let vsync = args.vsync.unwrap_or(cfg.render.vsync);
    let engine_cfg = EngineConfig {
        frames_in_flight: args.frames_in_flight.unwrap_or(cfg.render.frames_in_flight),
        vsync,
        clear_color: cfg.render.clear_color,
        application_name: "lumen-app".to_owned(),
    };
    let caps = capabilities(&cfg.render, validation);
    let engine = VkEngine::initialize(caps, engine_cfg).or_fatal("engine initialise");

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        engine,
        window: None,
        triangle: None,
        render_size: RenderSize {
            width: 1,
            height: 1,
        },
        vsync,
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
        started: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    app.engine.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_key_cycles_through_every_policy() {
        let mut p = VsyncPolicy::On;
        let mut seen = Vec::new();
        for _ in 0..3 {
            p = next_vsync(p);
            seen.push(p);
        }
        assert_eq!(
            seen,
            vec![VsyncPolicy::Off, VsyncPolicy::TripleBuffering, VsyncPolicy::On]
        );
    }

    #[test]
    fn tint_stays_in_a_visible_range() {
        for i in 0..100 {
            let t = tint_at(i as f32 * 0.37);
            assert!(t.x >= 0.5 && t.x <= 1.0);
            assert!(t.y >= 0.5 && t.z <= 1.0);
            assert_eq!(t.w, 1.0);
        }
    }

    #[test]
    fn cli_overrides_parse() {
        let a = Args::parse_from([
            "lumen-app",
            "--vsync",
            "off",
            "--frames-in-flight",
            "3",
            "--validation",
        ]);
        assert_eq!(a.vsync, Some(VsyncPolicy::Off));
        assert_eq!(a.frames_in_flight, Some(FramesInFlight::TRIPLE));
        assert!(a.validation);
        assert!(Args::try_parse_from(["lumen-app", "--frames-in-flight", "5"]).is_err());
    }
}
