// SPDX-License-Identifier: CEPL-1.0
//! Fatal renderer errors.
//!
//! Only unrecoverable conditions are errors. Surface invalidation
//! (`ERROR_OUT_OF_DATE_KHR`, `SUBOPTIMAL_KHR`) and window resizes are
//! handled by the frame pipeline and never show up here.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no physical device satisfies the required queues and extensions")]
    NoSuitableDevice,

    #[error("no memory type matches mask {type_bits:#b} with properties {properties:?}")]
    NoMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("image is in layout {actual:?}, {expected:?} required")]
    ImageLayoutMismatch {
        expected: vk::ImageLayout,
        actual: vk::ImageLayout,
    },

    #[error("upload of {len} bytes at offset {offset} overruns a {capacity} byte buffer")]
    UploadOutOfBounds {
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error("pixel buffer holds {actual} bytes, {expected} expected")]
    PixelSizeMismatch { expected: usize, actual: usize },

    #[error("geometry needs vertices and indices ({vertices} vertices, {indices} indices given)")]
    EmptyGeometry { vertices: usize, indices: usize },

    #[error("surface reports no formats")]
    NoSurfaceFormat,

    #[error("surface no longer offers format {0:?}")]
    SurfaceFormatChanged(vk::Format),

    #[error("acquired image {index} has no framebuffer ({count} exist)")]
    NoFramebuffer { index: u32, count: usize },
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Tags a raw `VkResult` with the name of the call that produced it.
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_names_the_call() {
        let res: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = res.call("queue_submit").unwrap_err();
        assert!(err.to_string().starts_with("queue_submit failed"));
    }

    #[test]
    fn transition_error_lists_both_layouts() {
        let err = RenderError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        let msg = err.to_string();
        assert!(msg.contains("GENERAL"));
        assert!(msg.contains("PRESENT_SRC_KHR"));
    }
}
