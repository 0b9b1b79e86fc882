// SPDX-License-Identifier: CEPL-1.0
//! Per-frame state machine over a fixed ring of frame slots.
//!
//! Per call: wait on the slot's fence, acquire, reset, record, submit,
//! present, advance. The fence is only reset once an image has actually
//! been acquired, so an aborted acquire leaves it signalled and the retry
//! does not block.

use ash::vk;
use tracing::{debug, trace, warn};

use crate::api::{DeviceApi, Submission};
use crate::error::{RenderError, Result, VkResultExt};
use crate::recorder::{record_draw, DrawCommand};
use crate::targets::{PresentTargets, TargetConfig};
use crate::transfer::TransferEngine;
use crate::RenderSize;

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Where a slot stands in the frame protocol.
///
/// Between calls a slot is `Idle` (never used, or its last attempt never
/// reached the queue) or `Submitted` (work queued, retired at the next wait
/// on its fence). The other states only exist inside a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    Waiting,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Debug)]
struct FrameSlot {
    cmd: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    state: SlotState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Presented, then the swapchain was rebuilt (out-of-date, suboptimal
    /// or a pending resize).
    PresentedAndRecreated,
    /// Acquire reported the swapchain out of date. Nothing was recorded;
    /// the next call retries the same slot.
    Skipped,
    /// The window has no area. Nothing was touched.
    Paused,
}

/// The scene side of a draw: fixed for the lifetime of the pipeline.
#[derive(Clone, Debug)]
pub struct SceneBindings {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    /// One set per frame slot.
    pub descriptor_sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
    pub geometry: vk::Buffer,
    pub vertex_offset: vk::DeviceSize,
    pub index_offset: vk::DeviceSize,
    pub index_count: u32,
}

#[derive(Debug)]
pub struct FramePipeline {
    slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT],
    pool: vk::CommandPool,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    targets: PresentTargets,
    target_config: TargetConfig,
    window: RenderSize,
    resize_pending: bool,
    frame: u64,
}

fn create_slot<D: DeviceApi>(dev: &D, cmd: vk::CommandBuffer) -> Result<FrameSlot> {
    let image_available = dev.create_semaphore().call("vkCreateSemaphore")?;
    let render_finished = match dev.create_semaphore().call("vkCreateSemaphore") {
        Ok(s) => s,
        Err(e) => {
            dev.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    // signalled so the very first wait returns immediately
    let in_flight = match dev.create_fence(true).call("vkCreateFence") {
        Ok(f) => f,
        Err(e) => {
            dev.destroy_semaphore(render_finished);
            dev.destroy_semaphore(image_available);
            return Err(e);
        }
    };
    Ok(FrameSlot {
        cmd,
        image_available,
        render_finished,
        in_flight,
        state: SlotState::Idle,
    })
}

fn destroy_slot<D: DeviceApi>(dev: &D, slot: &FrameSlot) {
    dev.destroy_fence(slot.in_flight);
    dev.destroy_semaphore(slot.render_finished);
    dev.destroy_semaphore(slot.image_available);
}

impl FramePipeline {
    /// `pool` is a resettable pool on the graphics family. Takes ownership
    /// of `targets`.
    pub fn new<D: DeviceApi>(
        dev: &D,
        pool: vk::CommandPool,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
        targets: PresentTargets,
        target_config: TargetConfig,
        window: RenderSize,
    ) -> Result<Self> {
        let cmds = dev
            .allocate_command_buffers(pool, MAX_FRAMES_IN_FLIGHT as u32)
            .call("vkAllocateCommandBuffers")?;

        let mut built = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for &cmd in &cmds {
            match create_slot(dev, cmd) {
                Ok(slot) => built.push(slot),
                Err(e) => {
                    for slot in &built {
                        destroy_slot(dev, slot);
                    }
                    dev.free_command_buffers(pool, &cmds);
                    return Err(e);
                }
            }
        }
        let Ok(slots) = <[FrameSlot; MAX_FRAMES_IN_FLIGHT]>::try_from(built) else {
            unreachable!("one slot per allocated command buffer");
        };
        debug!(slots = MAX_FRAMES_IN_FLIGHT, "frame ring created");

        Ok(Self {
            slots,
            pool,
            graphics_queue,
            present_queue,
            targets,
            target_config,
            window,
            resize_pending: false,
            frame: 0,
        })
    }

    /// Index of the slot the next call will use.
    pub fn current_slot(&self) -> usize {
        (self.frame % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot].state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Records a new window size. The swapchain follows after the next
    /// presented frame.
    pub fn resize(&mut self, window: RenderSize) {
        if window != self.window {
            debug!(width = window.width, height = window.height, "resize flagged");
        }
        self.window = window;
        self.resize_pending = true;
    }

    /// Rebuilds the targets now. A zero-area window keeps the resize
    /// pending instead.
    pub fn recreate<D: DeviceApi>(&mut self, eng: &TransferEngine<'_, D>) -> Result<bool> {
        let done = self
            .targets
            .recreate(eng, &self.target_config, self.window)?;
        self.resize_pending = !done;
        Ok(done)
    }

    /// Runs one iteration of the frame protocol.
    ///
    /// `update_slot` is called with the slot index after that slot's fence
    /// has been waited on, so per-slot host-visible data (uniforms) can be
    /// rewritten without racing the GPU.
    pub fn render_frame<D: DeviceApi>(
        &mut self,
        eng: &TransferEngine<'_, D>,
        scene: &SceneBindings,
        clear_color: [f32; 4],
        update_slot: impl FnOnce(usize) -> Result<()>,
    ) -> Result<FrameOutcome> {
        if self.window.is_empty() {
            return Ok(FrameOutcome::Paused);
        }
        let i = self.current_slot();
        let image_index = match self.submit_slot(eng, i, scene, clear_color, update_slot) {
            Ok(Some(index)) => index,
            Ok(None) => {
                self.slots[i].state = SlotState::Idle;
                warn!(frame = self.frame, "swapchain out of date on acquire");
                self.recreate(eng)?;
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => {
                // nothing reached the queue
                self.slots[i].state = SlotState::Idle;
                return Err(e);
            }
        };

        let slot = &mut self.slots[i];
        slot.state = SlotState::Presenting;
        let presented = eng.device().queue_present(
            self.present_queue,
            self.targets.swapchain.handle,
            image_index,
            slot.render_finished,
        );
        // in flight until the next wait on this slot
        slot.state = SlotState::Submitted;
        let stale = match presented {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(result) => {
                return Err(RenderError::Vulkan {
                    call: "vkQueuePresentKHR",
                    result,
                })
            }
        };
        trace!(frame = self.frame, slot = i, image_index, "frame presented");
        self.frame += 1;

        if stale || self.resize_pending {
            if stale {
                warn!("swapchain out of date or suboptimal on present");
            }
            self.recreate(eng)?;
            return Ok(FrameOutcome::PresentedAndRecreated);
        }
        Ok(FrameOutcome::Presented)
    }

    /// Wait, acquire, reset, record and submit for slot `i`. `None` when
    /// acquire found the swapchain out of date; the fence is then untouched.
    fn submit_slot<D: DeviceApi>(
        &mut self,
        eng: &TransferEngine<'_, D>,
        i: usize,
        scene: &SceneBindings,
        clear_color: [f32; 4],
        update_slot: impl FnOnce(usize) -> Result<()>,
    ) -> Result<Option<u32>> {
        let dev = eng.device();
        let slot = &mut self.slots[i];

        slot.state = SlotState::Waiting;
        dev.wait_for_fence(slot.in_flight, u64::MAX)
            .call("vkWaitForFences")?;

        slot.state = SlotState::Acquiring;
        let acquired = dev.acquire_next_image(
            self.targets.swapchain.handle,
            u64::MAX,
            slot.image_available,
        );
        let image_index = match acquired {
            // suboptimal still presents; present reports it again
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(None),
            Err(result) => {
                return Err(RenderError::Vulkan {
                    call: "vkAcquireNextImageKHR",
                    result,
                })
            }
        };

        update_slot(i)?;

        let slot = &mut self.slots[i];
        dev.reset_fence(slot.in_flight).call("vkResetFences")?;
        dev.reset_command_buffer(slot.cmd)
            .call("vkResetCommandBuffer")?;

        slot.state = SlotState::Recording;
        let Some(framebuffer) = self.targets.framebuffer(image_index) else {
            return Err(RenderError::NoFramebuffer {
                index: image_index,
                count: self.targets.image_count(),
            });
        };
        let draw = DrawCommand {
            render_pass: self.target_config.render_pass,
            framebuffer,
            extent: self.targets.extent(),
            clear_color,
            pipeline: scene.pipeline,
            layout: scene.layout,
            descriptor_set: scene.descriptor_sets[i],
            vertex_buffer: scene.geometry,
            vertex_offset: scene.vertex_offset,
            index_buffer: scene.geometry,
            index_offset: scene.index_offset,
            index_count: scene.index_count,
        };
        record_draw(dev, slot.cmd, &draw)?;

        // colour output waits for the image; earlier stages may start
        let submission = Submission {
            command_buffer: slot.cmd,
            wait: Some((
                slot.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(slot.render_finished),
        };
        dev.queue_submit(self.graphics_queue, &submission, slot.in_flight)
            .call("vkQueueSubmit")?;
        slot.state = SlotState::Submitted;
        Ok(Some(image_index))
    }

    /// Full presentation teardown: waits for the device to go idle, then
    /// releases the scene's pipeline and layout, the render pass, the ring
    /// and the targets (attachments, swapchain views, swapchain). A failed
    /// wait is logged and the teardown goes on.
    pub fn destroy_with_scene<D: DeviceApi>(
        self,
        eng: &TransferEngine<'_, D>,
        scene: &SceneBindings,
    ) {
        let dev = eng.device();
        if let Err(result) = dev.device_wait_idle() {
            warn!(%result, "vkDeviceWaitIdle failed during teardown");
        }
        dev.destroy_pipeline(scene.pipeline);
        dev.destroy_pipeline_layout(scene.layout);
        dev.destroy_render_pass(self.target_config.render_pass);
        self.destroy(eng);
    }

    /// Caller must have waited for the device to go idle.
    pub fn destroy<D: DeviceApi>(self, eng: &TransferEngine<'_, D>) {
        let dev = eng.device();
        for slot in &self.slots {
            destroy_slot(dev, slot);
        }
        let cmds: Vec<_> = self.slots.iter().map(|s| s.cmd).collect();
        dev.free_command_buffers(self.pool, &cmds);
        self.targets.destroy(eng);
    }
}
