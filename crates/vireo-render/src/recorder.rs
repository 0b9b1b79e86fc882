// SPDX-License-Identifier: CEPL-1.0
//! The one render pass and one indexed draw recorded every frame.

use ash::vk;

use crate::api::DeviceApi;
use crate::error::{Result, VkResultExt};

/// Everything a single frame's draw needs. Built fresh per frame by the
/// frame pipeline.
#[derive(Clone, Copy, Debug)]
pub struct DrawCommand {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub vertex_offset: vk::DeviceSize,
    pub index_buffer: vk::Buffer,
    pub index_offset: vk::DeviceSize,
    pub index_count: u32,
}

impl DrawCommand {
    /// Colour clear, then depth cleared to the far plane.
    pub fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ]
    }
}

/// Records `draw` into `cmd` from scratch. `cmd` must be reset (or fresh).
pub fn record_draw<D: DeviceApi>(dev: &D, cmd: vk::CommandBuffer, draw: &DrawCommand) -> Result<()> {
    let area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: draw.extent,
    };
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: draw.extent.width as f32,
        height: draw.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    dev.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
        .call("vkBeginCommandBuffer")?;
    dev.cmd_begin_render_pass(
        cmd,
        draw.render_pass,
        draw.framebuffer,
        area,
        &draw.clear_values(),
    );
    dev.cmd_bind_pipeline(cmd, draw.pipeline);
    dev.cmd_bind_vertex_buffer(cmd, draw.vertex_buffer, draw.vertex_offset);
    dev.cmd_bind_index_buffer(cmd, draw.index_buffer, draw.index_offset, vk::IndexType::UINT16);
    dev.cmd_set_viewport(cmd, viewport);
    dev.cmd_set_scissor(cmd, area);
    dev.cmd_bind_descriptor_set(cmd, draw.layout, draw.descriptor_set);
    dev.cmd_draw_indexed(cmd, draw.index_count, 1);
    dev.cmd_end_render_pass(cmd);
    dev.end_command_buffer(cmd).call("vkEndCommandBuffer")
}
