// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptors and the single graphics pipeline.

use std::ffi::CStr;
use std::io::Cursor;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use tracing::debug;
use vireo_render::memory::Buffer;
use vireo_render::transfer::TransferEngine;
use vireo_render::{ShaderBinaries, Vertex, MAX_FRAMES_IN_FLIGHT};

use crate::api::VkDevice;

/// Column-major model-view-projection, the whole uniform block.
pub type Mvp = [[f32; 4]; 4];
const UBO_SIZE: vk::DeviceSize = std::mem::size_of::<Mvp>() as vk::DeviceSize;

/// Attachments in framebuffer order.
///
/// Multisampled: `[colour, depth, resolve]`, the resolve target being the
/// swapchain image. Single-sampled: `[colour, depth]`, colour being the
/// swapchain image.
pub fn attachment_descriptions(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let multisampled = samples != vk::SampleCountFlags::TYPE_1;
    let color = vk::AttachmentDescription {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: if multisampled {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: if multisampled {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    if !multisampled {
        return vec![color, depth];
    }
    let resolve = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    vec![color, depth, resolve]
}

pub unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let attachments = attachment_descriptions(color_format, depth_format, samples);
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_refs = [vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref);
    if attachments.len() == 3 {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }

    // previous frame's colour and depth writes finish before this one clears
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass))
        .dependencies(std::slice::from_ref(&dependency));
    let pass = device
        .create_render_pass(&info, None)
        .context("vkCreateRenderPass")?;
    debug!(attachments = attachments.len(), ?samples, "render pass created");
    Ok(pass)
}

/// Binding 0: vertex-stage uniform. Binding 1: fragment-stage texture.
pub unsafe fn create_descriptor_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    let ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    Ok(device
        .create_descriptor_set_layout(&ci, None)
        .context("vkCreateDescriptorSetLayout")?)
}

pub unsafe fn create_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        max_anisotropy: 1.0,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        compare_op: vk::CompareOp::ALWAYS,
        ..Default::default()
    };
    Ok(device
        .create_sampler(&ci, None)
        .context("vkCreateSampler")?)
}

/// Binding 0 with `pos`, `color`, `uv` at locations 0..=2.
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: std::mem::offset_of!(Vertex, uv) as u32,
        },
    ]
}

unsafe fn create_shader_module(device: &ash::Device, spv: &[u8]) -> Result<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(spv)).context("read_spv")?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device
        .create_shader_module(&ci, None)
        .context("vkCreateShaderModule")?)
}

pub unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    samples: vk::SampleCountFlags,
    shaders: &ShaderBinaries<'_>,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    // --- Shader modules (destroyed before return on every path) ---
    let vs = create_shader_module(device, shaders.vertex)?;
    let fs = match create_shader_module(device, shaders.fragment) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };
    let entry: &CStr = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // --- Fixed-function state ---
    let vb = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let va = vertex_attributes();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &vb,
        vertex_attribute_description_count: va.len() as u32,
        p_vertex_attribute_descriptions: va.as_ptr(),
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    // viewport and scissor follow the swapchain, so recreation keeps the pipeline
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: samples,
        ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = match device.create_pipeline_layout(&layout_info, None) {
        Ok(l) => l,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            device.destroy_shader_module(fs, None);
            return Err(anyhow!("vkCreatePipelineLayout failed: {e}"));
        }
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };
    let created = device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    );
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);

    match created {
        Ok(p) => {
            debug!(?samples, "graphics pipeline created");
            Ok((layout, p[0]))
        }
        Err((_, err)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(anyhow!("vkCreateGraphicsPipelines failed: {err}"))
        }
    }
}

/// One host-visible uniform buffer and one descriptor set per frame slot.
pub struct FrameUniforms {
    buffers: Vec<Buffer>,
    pool: vk::DescriptorPool,
    sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
}

impl FrameUniforms {
    pub fn new(
        eng: &TransferEngine<'_, VkDevice>,
        set_layout: vk::DescriptorSetLayout,
        texture_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<Self> {
        let device = eng.device().raw();
        let props = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        let mut buffers = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            match eng.create_buffer(UBO_SIZE, vk::BufferUsageFlags::UNIFORM_BUFFER, props) {
                Ok(b) => buffers.push(b),
                Err(e) => {
                    buffers.into_iter().for_each(|b| eng.destroy_buffer(b));
                    return Err(e.into());
                }
            }
        }

        let count = MAX_FRAMES_IN_FLIGHT as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: count,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        let allocated = unsafe {
            device
                .create_descriptor_pool(&pool_ci, None)
                .and_then(|pool| {
                    let layouts = [set_layout; MAX_FRAMES_IN_FLIGHT];
                    let alloc = vk::DescriptorSetAllocateInfo {
                        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
                        descriptor_pool: pool,
                        descriptor_set_count: count,
                        p_set_layouts: layouts.as_ptr(),
                        ..Default::default()
                    };
                    match device.allocate_descriptor_sets(&alloc) {
                        Ok(sets) => Ok((pool, sets)),
                        Err(e) => {
                            device.destroy_descriptor_pool(pool, None);
                            Err(e)
                        }
                    }
                })
        };
        let (pool, sets) = match allocated {
            Ok(v) => v,
            Err(e) => {
                buffers.into_iter().for_each(|b| eng.destroy_buffer(b));
                return Err(anyhow!("descriptor allocation failed: {e}"));
            }
        };
        let sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT] = sets
            .try_into()
            .map_err(|_| anyhow!("driver returned the wrong number of descriptor sets"))?;

        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: texture_view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.handle,
                offset: 0,
                range: UBO_SIZE,
            })
            .collect();
        let mut writes = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT * 2);
        for (i, &set) in sets.iter().enumerate() {
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: &buffer_infos[i],
                ..Default::default()
            });
            writes.push(vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 1,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: &image_info,
                ..Default::default()
            });
        }
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        debug!(sets = MAX_FRAMES_IN_FLIGHT, "frame uniforms created");

        Ok(Self { buffers, pool, sets })
    }

    pub fn sets(&self) -> [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT] {
        self.sets
    }

    /// Only call once `slot`'s fence has been waited on.
    pub fn write(
        &self,
        eng: &TransferEngine<'_, VkDevice>,
        slot: usize,
        mvp: &Mvp,
    ) -> vireo_render::error::Result<()> {
        eng.write_host_visible(&self.buffers[slot], 0, bytemuck::bytes_of(mvp))
    }

    /// Sets are freed with the pool.
    pub fn destroy(self, eng: &TransferEngine<'_, VkDevice>) {
        unsafe {
            eng.device()
                .raw()
                .destroy_descriptor_pool(self.pool, None)
        };
        for b in self.buffers {
            eng.destroy_buffer(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    #[test]
    fn multisampled_pass_resolves_into_the_swapchain_image() {
        let a = attachment_descriptions(COLOR, DEPTH, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(a[1].format, DEPTH);
        assert_eq!(a[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn single_sample_pass_draws_straight_to_the_swapchain() {
        let a = attachment_descriptions(COLOR, DEPTH, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(a[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(a[1].final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn both_passes_clear_colour_and_depth() {
        for samples in [vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_8] {
            let a = attachment_descriptions(COLOR, DEPTH, samples);
            assert_eq!(a[0].load_op, vk::AttachmentLoadOp::CLEAR);
            assert_eq!(a[1].load_op, vk::AttachmentLoadOp::CLEAR);
        }
    }

    #[test]
    fn vertex_attributes_cover_the_vertex_layout() {
        let va = vertex_attributes();
        let offsets: Vec<u32> = va.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(va[2].format, vk::Format::R32G32_SFLOAT);
        let last = va[2].offset + 8;
        assert_eq!(last as usize, std::mem::size_of::<Vertex>());
    }

    #[test]
    fn uniform_block_is_one_mat4() {
        assert_eq!(UBO_SIZE, 64);
    }
}
