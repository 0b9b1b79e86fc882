// SPDX-License-Identifier: CEPL-1.0
//! Recording stand-in for a GPU device, used by the unit tests.
//!
//! Every call is appended to a log. Fences and semaphores carry state and the
//! fake panics on the misuse a validation layer would flag (waiting on a fence
//! nothing will signal, submitting with a non-reset fence, consuming an
//! unsignaled semaphore). Work completes at the next wait.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::api::{DeviceApi, Submission};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateBuffer {
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        concurrent: bool,
    },
    DestroyBuffer(vk::Buffer),
    AllocateMemory {
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        type_index: u32,
    },
    FreeMemory(vk::DeviceMemory),
    BindBufferMemory(vk::Buffer, vk::DeviceMemory),
    CreateImage {
        image: vk::Image,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        samples: vk::SampleCountFlags,
    },
    DestroyImage(vk::Image),
    BindImageMemory(vk::Image, vk::DeviceMemory),
    WriteMemory {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    },
    CreateImageView(vk::ImageView, vk::Image),
    DestroyImageView(vk::ImageView),
    CreateFramebuffer(vk::Framebuffer, u32, u32),
    DestroyFramebuffer(vk::Framebuffer),
    DestroyPipeline(vk::Pipeline),
    DestroyPipelineLayout(vk::PipelineLayout),
    DestroyRenderPass(vk::RenderPass),
    AllocateCommandBuffers(vk::CommandPool, Vec<vk::CommandBuffer>),
    FreeCommandBuffers(vk::CommandPool, Vec<vk::CommandBuffer>),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer, vk::CommandBufferUsageFlags),
    EndCommandBuffer(vk::CommandBuffer),
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        width: u32,
        height: u32,
    },
    ImageBarrier {
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    BeginRenderPass {
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        width: u32,
        height: u32,
        clear_count: usize,
    },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline(vk::CommandBuffer, vk::Pipeline),
    BindVertexBuffer(vk::CommandBuffer, vk::Buffer, vk::DeviceSize),
    BindIndexBuffer(vk::CommandBuffer, vk::Buffer, vk::DeviceSize, vk::IndexType),
    SetViewport(vk::CommandBuffer, f32, f32),
    SetScissor(vk::CommandBuffer, u32, u32),
    BindDescriptorSet(vk::CommandBuffer, vk::PipelineLayout, vk::DescriptorSet),
    DrawIndexed(vk::CommandBuffer, u32, u32),
    QueueSubmit {
        queue: vk::Queue,
        cmd: vk::CommandBuffer,
        wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
        signal: Option<vk::Semaphore>,
        fence: vk::Fence,
    },
    QueueWaitIdle(vk::Queue),
    DeviceWaitIdle,
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence(vk::Fence, bool),
    DestroyFence(vk::Fence),
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        format: vk::Format,
        width: u32,
        height: u32,
        min_image_count: u32,
        present_mode: vk::PresentModeKHR,
        concurrent: bool,
    },
    DestroySwapchain(vk::SwapchainKHR),
    Acquire {
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        result: Result<u32, vk::Result>,
    },
    Present {
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Attached to a submission the fake GPU has not retired yet.
    Pending,
}

struct State {
    next_handle: u64,
    calls: Vec<Call>,
    memory_type_bits: u32,
    alignment: vk::DeviceSize,
    sizes: HashMap<u64, vk::DeviceSize>,
    live: HashSet<u64>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    swapchain_images: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    next_image: u32,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    failures: HashMap<&'static str, vk::Result>,
}

pub struct FakeDevice {
    state: RefCell<State>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_handle: 0x1000,
                calls: Vec::new(),
                memory_type_bits: u32::MAX,
                alignment: 256,
                sizes: HashMap::new(),
                live: HashSet::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                caps: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 3,
                    current_extent: vk::Extent2D {
                        width: u32::MAX,
                        height: u32::MAX,
                    },
                    min_image_extent: vk::Extent2D {
                        width: 1,
                        height: 1,
                    },
                    max_image_extent: vk::Extent2D {
                        width: 4096,
                        height: 4096,
                    },
                    max_image_array_layers: 1,
                    current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    ..Default::default()
                },
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::R8G8B8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                swapchain_images: HashMap::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                failures: HashMap::new(),
            }),
        }
    }

    pub fn set_memory_type_bits(&self, bits: u32) {
        self.state.borrow_mut().memory_type_bits = bits;
    }

    pub fn set_capabilities(&self, caps: vk::SurfaceCapabilitiesKHR) {
        self.state.borrow_mut().caps = caps;
    }

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.borrow_mut().formats = formats;
    }

    /// Results returned by the next acquires, in order. Once drained,
    /// acquires succeed round-robin over the swapchain images.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = VkResult<(u32, bool)>>) {
        self.state.borrow_mut().acquire_script.extend(results);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = VkResult<bool>>) {
        self.state.borrow_mut().present_script.extend(results);
    }

    /// Makes every later call named `call` fail with `result`.
    pub fn fail(&self, call: &'static str, result: vk::Result) {
        self.state.borrow_mut().failures.insert(call, result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence).copied()
    }

    /// Handles created and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().live.len()
    }

    fn next<H: Handle>(&self) -> H {
        let mut s = self.state.borrow_mut();
        s.next_handle += 1;
        let raw = s.next_handle;
        s.live.insert(raw);
        H::from_raw(raw)
    }

    fn log(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn release<H: Handle>(&self, handle: H) {
        let raw = handle.as_raw();
        assert!(
            self.state.borrow_mut().live.remove(&raw),
            "handle {raw:#x} destroyed twice or never created"
        );
    }

    fn check(&self, call: &'static str) -> VkResult<()> {
        match self.state.borrow().failures.get(call) {
            Some(&err) => Err(err),
            None => Ok(()),
        }
    }

    fn retire_all(&self) {
        for state in self.state.borrow_mut().fences.values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
    }

    fn requirements(&self, raw: u64) -> vk::MemoryRequirements {
        let s = self.state.borrow();
        let size = s.sizes.get(&raw).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: size.div_ceil(s.alignment) * s.alignment,
            alignment: s.alignment,
            memory_type_bits: s.memory_type_bits,
        }
    }
}

impl DeviceApi for FakeDevice {
    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        self.check("create_buffer")?;
        assert!(info.size > 0, "zero-sized buffer");
        let concurrent = info.sharing_mode == vk::SharingMode::CONCURRENT;
        if concurrent {
            assert!(
                info.queue_family_index_count > 1,
                "concurrent buffer needs at least two queue families"
            );
        }
        let buffer: vk::Buffer = self.next();
        self.state
            .borrow_mut()
            .sizes
            .insert(buffer.as_raw(), info.size);
        self.log(Call::CreateBuffer {
            buffer,
            size: info.size,
            usage: info.usage,
            concurrent,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.release(buffer);
        self.log(Call::DestroyBuffer(buffer));
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.requirements(buffer.as_raw())
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        self.check("bind_buffer_memory")?;
        self.log(Call::BindBufferMemory(buffer, memory));
        Ok(())
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        self.check("create_image")?;
        let image: vk::Image = self.next();
        let texels = info.extent.width as u64 * info.extent.height as u64 * 4;
        self.state.borrow_mut().sizes.insert(image.as_raw(), texels);
        self.log(Call::CreateImage {
            image,
            width: info.extent.width,
            height: info.extent.height,
            format: info.format,
            usage: info.usage,
            samples: info.samples,
        });
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.release(image);
        self.log(Call::DestroyImage(image));
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.requirements(image.as_raw())
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        self.check("bind_image_memory")?;
        self.log(Call::BindImageMemory(image, memory));
        Ok(())
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        self.check("allocate_memory")?;
        let memory: vk::DeviceMemory = self.next();
        self.log(Call::AllocateMemory {
            memory,
            size: info.allocation_size,
            type_index: info.memory_type_index,
        });
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.release(memory);
        self.log(Call::FreeMemory(memory));
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        self.check("write_memory")?;
        self.log(Call::WriteMemory {
            memory,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        self.check("create_image_view")?;
        let view: vk::ImageView = self.next();
        self.log(Call::CreateImageView(view, info.image));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view);
        self.log(Call::DestroyImageView(view));
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        self.check("create_framebuffer")?;
        let fb: vk::Framebuffer = self.next();
        self.log(Call::CreateFramebuffer(fb, info.width, info.height));
        Ok(fb)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer);
        self.log(Call::DestroyFramebuffer(framebuffer));
    }

    // built outside the fake, so only logged
    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.log(Call::DestroyPipeline(pipeline));
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.log(Call::DestroyPipelineLayout(layout));
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.log(Call::DestroyRenderPass(render_pass));
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        let bufs: Vec<vk::CommandBuffer> = (0..count).map(|_| self.next()).collect();
        self.log(Call::AllocateCommandBuffers(pool, bufs.clone()));
        Ok(bufs)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for &b in buffers {
            self.release(b);
        }
        self.log(Call::FreeCommandBuffers(pool, buffers.to_vec()));
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.check("reset_command_buffer")?;
        self.log(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        self.check("begin_command_buffer")?;
        self.log(Call::BeginCommandBuffer(cmd, flags));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.check("end_command_buffer")?;
        self.log(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.log(Call::CopyBuffer {
            cmd,
            src,
            dst,
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        self.log(Call::CopyBufferToImage {
            cmd,
            src,
            dst,
            layout,
            width: region.image_extent.width,
            height: region.image_extent.height,
        });
    }

    fn cmd_image_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.log(Call::ImageBarrier {
            cmd,
            image: barrier.image,
            old: barrier.old_layout,
            new: barrier.new_layout,
            src_access: barrier.src_access_mask,
            dst_access: barrier.dst_access_mask,
            src_stage,
            dst_stage,
        });
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.log(Call::BeginRenderPass {
            cmd,
            render_pass,
            framebuffer,
            width: render_area.extent.width,
            height: render_area.extent.height,
            clear_count: clear_values.len(),
        });
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.log(Call::EndRenderPass(cmd));
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.log(Call::BindPipeline(cmd, pipeline));
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        self.log(Call::BindVertexBuffer(cmd, buffer, offset));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.log(Call::BindIndexBuffer(cmd, buffer, offset, index_type));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.log(Call::SetViewport(cmd, viewport.width, viewport.height));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.log(Call::SetScissor(
            cmd,
            scissor.extent.width,
            scissor.extent.height,
        ));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.log(Call::BindDescriptorSet(cmd, layout, set));
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32) {
        self.log(Call::DrawIndexed(cmd, index_count, instance_count));
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submission: &Submission,
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.check("queue_submit")?;
        {
            let mut s = self.state.borrow_mut();
            if let Some((sem, _)) = submission.wait {
                let signaled = s.semaphores.get_mut(&sem).expect("unknown semaphore");
                assert!(*signaled, "submit waits on a semaphore nothing signaled");
                *signaled = false;
            }
            if let Some(sem) = submission.signal {
                let signaled = s.semaphores.get_mut(&sem).expect("unknown semaphore");
                assert!(!*signaled, "submit signals an already signaled semaphore");
                *signaled = true;
            }
            if fence != vk::Fence::null() {
                let state = s.fences.get_mut(&fence).expect("unknown fence");
                assert_eq!(
                    *state,
                    FenceState::Unsignaled,
                    "submitted with a fence that was not reset"
                );
                *state = FenceState::Pending;
            }
        }
        self.log(Call::QueueSubmit {
            queue,
            cmd: submission.command_buffer,
            wait: submission.wait,
            signal: submission.signal,
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        self.check("queue_wait_idle")?;
        self.retire_all();
        self.log(Call::QueueWaitIdle(queue));
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        self.check("device_wait_idle")?;
        self.retire_all();
        self.log(Call::DeviceWaitIdle);
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.check("create_semaphore")?;
        let sem: vk::Semaphore = self.next();
        self.state.borrow_mut().semaphores.insert(sem, false);
        self.log(Call::CreateSemaphore(sem));
        Ok(sem)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore);
        self.state.borrow_mut().semaphores.remove(&semaphore);
        self.log(Call::DestroySemaphore(semaphore));
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        self.check("create_fence")?;
        let fence: vk::Fence = self.next();
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.state.borrow_mut().fences.insert(fence, state);
        self.log(Call::CreateFence(fence, signaled));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.release(fence);
        self.state.borrow_mut().fences.remove(&fence);
        self.log(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.check("wait_for_fence")?;
        {
            let mut s = self.state.borrow_mut();
            let state = s.fences.get_mut(&fence).expect("unknown fence");
            assert_ne!(
                *state,
                FenceState::Unsignaled,
                "waiting on a reset fence with no pending submission would block forever"
            );
            *state = FenceState::Signaled;
        }
        self.log(Call::WaitForFence(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.check("reset_fence")?;
        {
            let mut s = self.state.borrow_mut();
            let state = s.fences.get_mut(&fence).expect("unknown fence");
            assert_ne!(*state, FenceState::Pending, "reset of an in-flight fence");
            *state = FenceState::Unsignaled;
        }
        self.log(Call::ResetFence(fence));
        Ok(())
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.check("surface_capabilities")?;
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.check("surface_formats")?;
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.check("surface_present_modes")?;
        Ok(self.state.borrow().present_modes.clone())
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        self.check("create_swapchain")?;
        let swapchain: vk::SwapchainKHR = self.next();
        let images = (0..info.min_image_count)
            .map(|i| vk::Image::from_raw(0xF000_0000 + (swapchain.as_raw() << 4) + i as u64))
            .collect();
        {
            let mut s = self.state.borrow_mut();
            s.swapchain_images.insert(swapchain, images);
            s.next_image = 0;
        }
        self.log(Call::CreateSwapchain {
            swapchain,
            format: info.image_format,
            width: info.image_extent.width,
            height: info.image_extent.height,
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            concurrent: info.image_sharing_mode == vk::SharingMode::CONCURRENT,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        Ok(self
            .state
            .borrow()
            .swapchain_images
            .get(&swapchain)
            .cloned()
            .unwrap_or_default())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release(swapchain);
        self.state.borrow_mut().swapchain_images.remove(&swapchain);
        self.log(Call::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let result = {
            let mut s = self.state.borrow_mut();
            let count = s
                .swapchain_images
                .get(&swapchain)
                .map_or(0, |v| v.len() as u32);
            let result = match s.acquire_script.pop_front() {
                Some(r) => r,
                None => {
                    let idx = s.next_image;
                    s.next_image = (idx + 1) % count.max(1);
                    Ok((idx, false))
                }
            };
            if result.is_ok() {
                let signaled = s.semaphores.get_mut(&signal).expect("unknown semaphore");
                assert!(!*signaled, "acquire signals a semaphore still pending");
                *signaled = true;
            }
            result
        };
        self.log(Call::Acquire {
            swapchain,
            signal,
            result: result.map(|(i, _)| i),
        });
        result
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        {
            let mut s = self.state.borrow_mut();
            let signaled = s.semaphores.get_mut(&wait).expect("unknown semaphore");
            assert!(*signaled, "present waits on a semaphore nothing signaled");
            *signaled = false;
        }
        self.log(Call::Present {
            queue,
            swapchain,
            image_index,
            wait,
        });
        self.state
            .borrow_mut()
            .present_script
            .pop_front()
            .unwrap_or(Ok(false))
    }
}
