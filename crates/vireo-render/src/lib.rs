// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral core of the renderer.
//!
//! Everything that decides *what* happens on the GPU lives here: device
//! selection policy, the memory/transfer engine, the swapchain manager, the
//! frame pipeline and the command recorder. They talk to the GPU only through
//! [`DeviceApi`], which `vireo-render-vk` implements on top of `ash`.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod api;
pub mod device;
pub mod error;
pub mod frame;
pub mod memory;
pub mod recorder;
pub mod swapchain;
pub mod targets;
pub mod transfer;

#[cfg(test)]
mod fake;

pub use api::{DeviceApi, Submission};
pub use error::{RenderError, VkResultExt};
pub use frame::{FrameOutcome, FramePipeline, SceneBindings, SlotState, MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Vertex layout consumed by the graphics pipeline (binding 0, stride 32).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

/// Preferred presentation mode. FIFO is the guaranteed fallback.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub validation: bool,
    pub validation_layers: Vec<String>,
    pub device_extensions: Vec<String>,
    pub present_mode: PresentModePreference,
    pub msaa_samples: u32,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_owned()],
            device_extensions: vec!["VK_KHR_swapchain".to_owned()],
            present_mode: PresentModePreference::Mailbox,
            msaa_samples: 4,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// RGBA8 pixels, row-major, `width * height * 4` bytes.
#[derive(Clone, Copy, Debug)]
pub struct TextureData<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Compiled SPIR-V blobs. Opaque to the renderer.
#[derive(Clone, Copy, Debug)]
pub struct ShaderBinaries<'a> {
    pub vertex: &'a [u8],
    pub fragment: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct SceneData<'a> {
    pub vertices: &'a [Vertex],
    pub indices: &'a [u16],
    pub texture: TextureData<'a>,
    pub shaders: ShaderBinaries<'a>,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
        scene: &SceneData<'_>,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Flags a resize; the swapchain is rebuilt by the next presented frame.
    fn resize(&mut self, size: RenderSize);
    fn render(&mut self) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    /// Column-major model-view-projection written to the frame's uniform.
    fn set_transform(&mut self, mvp: [[f32; 4]; 4]);
    /// Current swapchain extent.
    fn extent(&self) -> RenderSize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_pipeline_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::offset_of!(Vertex, color), 12);
        assert_eq!(std::mem::offset_of!(Vertex, uv), 24);
    }

    #[test]
    fn zero_sized_extent_is_empty() {
        assert!(RenderSize { width: 0, height: 600 }.is_empty());
        assert!(!RenderSize { width: 1, height: 1 }.is_empty());
    }
}
