// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend. Builds the instance, device and pipeline objects with
//! `ash`, then drives the core frame pipeline through [`VkDevice`].

use std::mem::ManuallyDrop;

use anyhow::Result;
use ash::khr::swapchain;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;
use vireo_render::device::{max_usable_sample_count, select_device, DeviceQueues};
use vireo_render::memory::{Image, MemoryTypeTable};
use vireo_render::swapchain::{create_image_view, SwapchainParams, SwapchainState};
use vireo_render::targets::{PresentTargets, TargetConfig};
use vireo_render::transfer::{GeometryBuffer, TransferEngine};
use vireo_render::{
    DeviceApi, FrameOutcome, FramePipeline, RenderSize, Renderer, RendererConfig, SceneBindings,
    SceneData,
};

mod api;
mod device;
mod instance;
mod pipeline;

pub use api::VkDevice;

use instance::InstanceContext;
use pipeline::{FrameUniforms, Mvp};

const IDENTITY: Mvp = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Configured extensions plus `VK_KHR_swapchain`, without duplicates.
pub fn required_device_extensions(configured: &[String]) -> Vec<String> {
    let swapchain_ext = swapchain::NAME.to_string_lossy().into_owned();
    let mut out: Vec<String> = Vec::with_capacity(configured.len() + 1);
    for ext in std::iter::once(&swapchain_ext).chain(configured) {
        if !out.contains(ext) {
            out.push(ext.clone());
        }
    }
    out
}

/// Resources released by value at teardown.
struct Scene {
    frames: FramePipeline,
    geometry: GeometryBuffer,
    texture: Image,
    texture_view: vk::ImageView,
    uniforms: FrameUniforms,
    bindings: SceneBindings,
}

pub struct VkRenderer {
    instance: InstanceContext,
    device: VkDevice,
    memory: MemoryTypeTable,
    queues: DeviceQueues,
    graphics_pool: vk::CommandPool,
    transfer_pool: vk::CommandPool,

    set_layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,

    scene: ManuallyDrop<Scene>,
    clear_color: [f32; 4],
    mvp: Mvp,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: &RendererConfig,
    scene: &SceneData<'_>,
) -> Result<VkRenderer> {
    // 1) Instance, debug messenger, surface
    let ctx = InstanceContext::new(window, display, config)?;

    // 2) Physical device by policy, then logical device and queues
    let extensions = required_device_extensions(&config.device_extensions);
    let candidates = device::enumerate_candidates(&ctx.instance, &ctx.surface_loader, ctx.surface)?;
    let selection = select_device(candidates, &extensions)?;
    let (raw_device, queues) = device::create_logical_device(&ctx.instance, &selection, &extensions)?;
    let families = selection.queues;
    let device = VkDevice::new(
        &ctx.instance,
        raw_device,
        ctx.surface_loader.clone(),
        ctx.surface,
        selection.handle,
    );
    let memory = selection.memory;

    let depth_format = device::pick_depth_format(&ctx.instance, selection.handle)?;
    let samples = max_usable_sample_count(selection.framebuffer_samples, config.msaa_samples);

    // 3) Command pools: resettable ring on graphics, one-shot on transfer
    let graphics_pool = device::create_command_pool(
        device.raw(),
        families.graphics,
        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER | vk::CommandPoolCreateFlags::TRANSIENT,
    )?;
    let transfer_pool = device::create_command_pool(
        device.raw(),
        families.transfer,
        vk::CommandPoolCreateFlags::TRANSIENT,
    )?;
    let transfer = TransferEngine::new(&device, &memory, transfer_pool, queues.transfer);
    // layout transitions into shader-read need a queue with fragment stages
    let graphics = TransferEngine::new(&device, &memory, graphics_pool, queues.graphics);

    // 4) Scene data onto the GPU
    // written on the transfer family, read on the graphics family
    let geometry = transfer.upload_geometry(
        scene.vertices,
        scene.indices,
        &[families.transfer, families.graphics],
    )?;
    let texture = graphics.upload_texture(&scene.texture)?;
    let texture_view = create_image_view(
        &device,
        texture.handle,
        texture.format,
        vk::ImageAspectFlags::COLOR,
    )?;
    let sampler = pipeline::create_sampler(device.raw())?;
    let set_layout = pipeline::create_descriptor_set_layout(device.raw())?;
    let uniforms = FrameUniforms::new(&graphics, set_layout, texture_view, sampler)?;

    // 5) Swapchain first: the render pass is bound to its format
    let swapchain = SwapchainState::create(
        &device,
        &SwapchainParams {
            surface: ctx.surface,
            queues: families,
            window: size,
            present_mode: config.present_mode,
            pinned_format: None,
        },
    )?;
    let surface_format = swapchain.format;
    let render_pass =
        pipeline::create_render_pass(device.raw(), surface_format.format, depth_format, samples)?;
    let (pipeline_layout, pipeline) = pipeline::create_pipeline(
        device.raw(),
        render_pass,
        set_layout,
        samples,
        &scene.shaders,
    )?;

    // 6) Extent-dependent targets and the frame ring
    let target_config = TargetConfig {
        surface: ctx.surface,
        queues: families,
        present_mode: config.present_mode,
        render_pass,
        samples,
        depth_format,
    };
    let targets = PresentTargets::new(&graphics, swapchain, &target_config)?;
    let frames = FramePipeline::new(
        &device,
        graphics_pool,
        queues.graphics,
        queues.present,
        targets,
        target_config,
        size,
    )?;

    let bindings = SceneBindings {
        pipeline,
        layout: pipeline_layout,
        descriptor_sets: uniforms.sets(),
        geometry: geometry.buffer.handle,
        vertex_offset: geometry.vertex_offset,
        index_offset: geometry.index_offset,
        index_count: geometry.index_count,
    };
    info!(
        device = %selection.name,
        ?samples,
        format = ?surface_format.format,
        ?depth_format,
        "vulkan renderer ready"
    );

    Ok(VkRenderer {
        instance: ctx,
        device,
        memory,
        queues,
        graphics_pool,
        transfer_pool,
        set_layout,
        sampler,
        scene: ManuallyDrop::new(Scene {
            frames,
            geometry,
            texture,
            texture_view,
            uniforms,
            bindings,
        }),
        clear_color: config.clear_color,
        mvp: IDENTITY,
    })
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle() so nothing in flight references what follows (done
//   by destroy_with_scene; a failure is logged, teardown continues)
// - Pipeline, pipeline layout, render pass
// - Frame ring (fences, semaphores, command buffers) and present targets
//   (framebuffers, attachments, swapchain views, swapchain)
// - Scene resources: uniforms + descriptor pool, texture view, texture,
//   geometry, sampler, then the set layout
// - Command pools BEFORE the device
// - Device, then surface, debug messenger, instance last
impl Drop for VkRenderer {
    fn drop(&mut self) {
        // SAFETY: `scene` is taken exactly once, here.
        let scene = unsafe { ManuallyDrop::take(&mut self.scene) };
        let eng = TransferEngine::new(
            &self.device,
            &self.memory,
            self.graphics_pool,
            self.queues.graphics,
        );
        // idle wait, then pipeline, layout and render pass, then ring and targets
        scene.frames.destroy_with_scene(&eng, &scene.bindings);

        scene.uniforms.destroy(&eng);
        self.device.destroy_image_view(scene.texture_view);
        eng.destroy_image(scene.texture);
        eng.destroy_buffer(scene.geometry.buffer);

        unsafe {
            let d = self.device.raw();
            d.destroy_sampler(self.sampler, None);
            d.destroy_descriptor_set_layout(self.set_layout, None);
            d.destroy_command_pool(self.transfer_pool, None);
            d.destroy_command_pool(self.graphics_pool, None);
            d.destroy_device(None);
            self.instance.destroy();
        }
        info!("vulkan renderer destroyed");
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
        scene: &SceneData<'_>,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, config, scene) }
    }

    fn resize(&mut self, size: RenderSize) {
        self.scene.frames.resize(size);
    }

    // STRICT PER-FRAME ORDER lives in FramePipeline::render_frame; the
    // uniform for a slot is written from inside it, after that slot's fence.
    fn render(&mut self) -> Result<FrameOutcome> {
        let eng = TransferEngine::new(
            &self.device,
            &self.memory,
            self.graphics_pool,
            self.queues.graphics,
        );
        let Scene {
            frames,
            uniforms,
            bindings,
            ..
        } = &mut *self.scene;
        let mvp = self.mvp;
        let outcome = frames.render_frame(&eng, bindings, self.clear_color, |slot| {
            uniforms.write(&eng, slot, &mvp)
        })?;
        Ok(outcome)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_transform(&mut self, mvp: [[f32; 4]; 4]) {
        self.mvp = mvp;
    }

    fn extent(&self) -> RenderSize {
        let vk::Extent2D { width, height } = self.scene.frames.extent();
        RenderSize { width, height }
    }
}
