// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};
use vireo_core::init_tracing;
use vireo_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use vireo_render::{
    FrameOutcome, RenderSize, Renderer, SceneData, ShaderBinaries, TextureData, Vertex,
};
use vireo_render_vk::VkRenderer;

mod config;
mod scene;

use config::AppCfg;
use scene::Camera;

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/cube.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/cube.frag.spv"));
const TEXTURE_SIZE: u32 = 256;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "vireo.toml")]
    config: PathBuf,
    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,
    /// Force validation layers on
    #[arg(long, conflicts_with = "no_validation")]
    validation: bool,
    /// Force validation layers off
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn validation_override(&self) -> Option<bool> {
        match (self.validation, self.no_validation) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

struct SceneAssets {
    vertices: Vec<Vertex>,
    indices: Vec<u16>,
    texture: Vec<u8>,
}

impl SceneAssets {
    fn builtin() -> Self {
        let (vertices, indices) = scene::cube();
        Self {
            vertices,
            indices,
            texture: scene::checkerboard(TEXTURE_SIZE, 8),
        }
    }

    fn data(&self) -> SceneData<'_> {
        SceneData {
            vertices: &self.vertices,
            indices: &self.indices,
            texture: TextureData {
                pixels: &self.texture,
                width: TEXTURE_SIZE,
                height: TEXTURE_SIZE,
            },
            shaders: ShaderBinaries {
                vertex: VERT_SPV,
                fragment: FRAG_SPV,
            },
        }
    }
}

struct App {
    args: Args,
    cfg: AppCfg,
    assets: SceneAssets,
    camera: Camera,

    // renderer before window: it must be dropped first
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    paused: bool,
    failed: bool,

    started: Instant,
    presented: u64,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(args: Args, cfg: AppCfg) -> Self {
        let camera = Camera {
            spin_degrees_per_second: cfg.render.spin_degrees_per_second,
        };
        let now = Instant::now();
        App {
            args,
            cfg,
            assets: SceneAssets::builtin(),
            camera,
            renderer: None,
            window: None,
            render_size: RenderSize {
                width: 1,
                height: 1,
            },
            paused: false,
            failed: false,
            started: now,
            presented: 0,
            frames: 0,
            last_fps_instant: now,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = vireo_platform::create_window(event_loop, &self.cfg.window_settings())?;
        let size = vireo_platform::render_size(window.inner_size());
        self.render_size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        let rcfg = self.cfg.renderer_config(self.args.validation_override());
        let renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            &rcfg,
            &self.assets.data(),
        )?;
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Renderer first, then the window it presents to.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn fatal(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("fatal: {e:#}");
        self.failed = true;
        self.shutdown(event_loop);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let elapsed = self.started.elapsed().as_secs_f32();
        renderer.set_transform(self.camera.mvp(elapsed, renderer.extent()));

        match renderer.render() {
            Ok(FrameOutcome::Presented | FrameOutcome::PresentedAndRecreated) => {
                self.presented += 1;
                self.frames = self.frames.saturating_add(1);
                if self.args.frames.is_some_and(|limit| self.presented >= limit) {
                    info!(presented = self.presented, "frame limit reached");
                    self.shutdown(event_loop);
                }
            }
            Ok(FrameOutcome::Skipped) => {}
            Ok(FrameOutcome::Paused) => self.paused = true,
            Err(e) => self.fatal(event_loop, e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fatal(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
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
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = vireo_platform::render_size(new_size);
                let now_paused = self.render_size.is_empty();
                if self.paused != now_paused {
                    info!(
                        width = self.render_size.width,
                        height = self.render_size.height,
                        paused = now_paused,
                        "resized"
                    );
                }
                self.paused = now_paused;
                if let Some(r) = self.renderer.as_mut() {
                    r.resize(self.render_size);
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if !self.paused {
                    self.redraw(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.paused {
            // minimised: sleep until the next resize
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
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
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(args, cfg);
    event_loop.run_app(&mut app)?;
    if app.failed {
        bail!("exited after a fatal renderer error");
    }
    Ok(())
}
