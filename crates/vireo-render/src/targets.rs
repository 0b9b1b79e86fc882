// SPDX-License-Identifier: CEPL-1.0
//! Everything sized from the swapchain extent: the swapchain itself, the
//! multisampled colour and depth attachments, and one framebuffer per
//! swapchain image. Rebuilt together by [`PresentTargets::recreate`].

use ash::vk;
use tracing::{debug, info};

use crate::api::DeviceApi;
use crate::device::QueueFamilyIndices;
use crate::error::{Result, VkResultExt};
use crate::memory::Image;
use crate::swapchain::{create_image_view, SwapchainParams, SwapchainState};
use crate::transfer::{ImageDesc, TransferEngine};
use crate::{PresentModePreference, RenderSize};

/// Fixed inputs to every (re)build of the targets.
#[derive(Clone, Copy, Debug)]
pub struct TargetConfig {
    pub surface: vk::SurfaceKHR,
    pub queues: QueueFamilyIndices,
    pub present_mode: PresentModePreference,
    /// Attachment order must match [`PresentTargets`] framebuffers:
    /// `[msaa colour, depth, resolve]`, or `[colour, depth]` at one sample.
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
}

impl TargetConfig {
    pub fn swapchain_params(
        &self,
        window: RenderSize,
        pinned_format: Option<vk::SurfaceFormatKHR>,
    ) -> SwapchainParams {
        SwapchainParams {
            surface: self.surface,
            queues: self.queues,
            window,
            present_mode: self.present_mode,
            pinned_format,
        }
    }

    pub fn multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }
}

#[derive(Debug)]
struct Attachment {
    image: Image,
    view: vk::ImageView,
}

impl Attachment {
    fn create<D: DeviceApi>(
        eng: &TransferEngine<'_, D>,
        desc: ImageDesc,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image = eng.create_image(desc, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        match create_image_view(eng.device(), image.handle, desc.format, aspect) {
            Ok(view) => Ok(Self { image, view }),
            Err(e) => {
                eng.destroy_image(image);
                Err(e)
            }
        }
    }

    fn destroy<D: DeviceApi>(self, eng: &TransferEngine<'_, D>) {
        eng.device().destroy_image_view(self.view);
        eng.destroy_image(self.image);
    }
}

#[derive(Debug)]
pub struct PresentTargets {
    pub swapchain: SwapchainState,
    color: Option<Attachment>,
    depth: Option<Attachment>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl PresentTargets {
    /// Builds attachments and framebuffers around an existing swapchain.
    /// Takes ownership of `swapchain`; on failure it is destroyed too.
    pub fn new<D: DeviceApi>(
        eng: &TransferEngine<'_, D>,
        swapchain: SwapchainState,
        cfg: &TargetConfig,
    ) -> Result<Self> {
        let mut targets = Self {
            swapchain,
            color: None,
            depth: None,
            framebuffers: Vec::new(),
        };
        if let Err(e) = targets.build_attachments(eng, cfg) {
            targets.release(eng);
            return Err(e);
        }
        Ok(targets)
    }

    fn build_attachments<D: DeviceApi>(
        &mut self,
        eng: &TransferEngine<'_, D>,
        cfg: &TargetConfig,
    ) -> Result<()> {
        let vk::Extent2D { width, height } = self.swapchain.extent;

        if cfg.multisampled() {
            self.color = Some(Attachment::create(
                eng,
                ImageDesc {
                    width,
                    height,
                    format: self.swapchain.format.format,
                    usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    samples: cfg.samples,
                },
                vk::ImageAspectFlags::COLOR,
            )?);
        }
        let depth = self.depth.insert(Attachment::create(
            eng,
            ImageDesc {
                width,
                height,
                format: cfg.depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                samples: cfg.samples,
            },
            vk::ImageAspectFlags::DEPTH,
        )?);
        let depth_view = depth.view;
        let color_view = self.color.as_ref().map(|c| c.view);

        for view in self.swapchain.views.iter() {
            let attachments: Vec<vk::ImageView> = match color_view {
                Some(msaa) => vec![msaa, depth_view, view],
                None => vec![view, depth_view],
            };
            let info = vk::FramebufferCreateInfo::default()
                .render_pass(cfg.render_pass)
                .attachments(&attachments)
                .width(width)
                .height(height)
                .layers(1);
            let fb = eng
                .device()
                .create_framebuffer(&info)
                .call("vkCreateFramebuffer")?;
            self.framebuffers.push(fb);
        }
        debug!(count = self.framebuffers.len(), width, height, "framebuffers created");
        Ok(())
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.swapchain.format
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// STRICT ORDER: framebuffers -> attachments (view, image) -> swapchain
    /// (views, handle). Leaves `self` empty.
    fn release<D: DeviceApi>(&mut self, eng: &TransferEngine<'_, D>) {
        let dev = eng.device();
        for fb in self.framebuffers.drain(..) {
            dev.destroy_framebuffer(fb);
        }
        if let Some(color) = self.color.take() {
            color.destroy(eng);
        }
        if let Some(depth) = self.depth.take() {
            depth.destroy(eng);
        }
        std::mem::take(&mut self.swapchain).destroy(dev);
    }

    /// Waits for the device to go idle, tears everything down and builds it
    /// again at the current window size, keeping the surface format.
    ///
    /// Returns `false` without touching anything when the window has no
    /// area; the caller retries once it does.
    pub fn recreate<D: DeviceApi>(
        &mut self,
        eng: &TransferEngine<'_, D>,
        cfg: &TargetConfig,
        window: RenderSize,
    ) -> Result<bool> {
        if window.is_empty() {
            debug!("swapchain recreation deferred: window has no area");
            return Ok(false);
        }
        let dev = eng.device();
        dev.device_wait_idle().call("vkDeviceWaitIdle")?;

        let format = self.swapchain.format;
        self.release(eng);
        let swapchain = SwapchainState::create(dev, &cfg.swapchain_params(window, Some(format)))?;
        *self = Self::new(eng, swapchain, cfg)?;

        info!(
            width = self.swapchain.extent.width,
            height = self.swapchain.extent.height,
            images = self.image_count(),
            "swapchain recreated"
        );
        Ok(true)
    }

    pub fn destroy<D: DeviceApi>(mut self, eng: &TransferEngine<'_, D>) {
        self.release(eng);
    }
}
