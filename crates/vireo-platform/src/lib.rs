// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue. Re-exports `winit` so the app pins one version.

use anyhow::{Context, Result};
use tracing::info;
use vireo_render::RenderSize;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

pub use winit;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

pub fn window_attributes(settings: &WindowSettings) -> WindowAttributes {
    Window::default_attributes()
        .with_title(settings.title.clone())
        .with_inner_size(LogicalSize::new(settings.width, settings.height))
        .with_resizable(settings.resizable)
}

pub fn create_window(event_loop: &ActiveEventLoop, settings: &WindowSettings) -> Result<Window> {
    let window = event_loop
        .create_window(window_attributes(settings))
        .context("create_window")?;
    let size = window.inner_size();
    info!(
        title = %settings.title,
        width = size.width,
        height = size.height,
        "window created"
    );
    Ok(window)
}

/// Physical pixels straight through; a minimised window yields an empty size.
pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize {
        width: size.width,
        height: size.height,
    }
}
