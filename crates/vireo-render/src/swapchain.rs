// SPDX-License-Identifier: CEPL-1.0
//! Swapchain creation and teardown.
//!
//! A swapchain is always destroyed and rebuilt as a unit: image count and
//! extent can change between builds, so nothing is patched in place.

use ash::vk;
use tracing::{debug, info};

use crate::api::DeviceApi;
use crate::device::QueueFamilyIndices;
use crate::error::{RenderError, Result, VkResultExt};
use crate::{PresentModePreference, RenderSize};

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

pub fn query_support<D: DeviceApi>(dev: &D) -> Result<SwapchainSupport> {
    Ok(SwapchainSupport {
        capabilities: dev
            .surface_capabilities()
            .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
        formats: dev
            .surface_formats()
            .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
        present_modes: dev
            .surface_present_modes()
            .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
    })
}

fn same_format(a: &vk::SurfaceFormatKHR, b: &vk::SurfaceFormatKHR) -> bool {
    a.format == b.format && a.color_space == b.color_space
}

/// BGRA8 sRGB when offered, otherwise whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| same_format(f, &PREFERRED_FORMAT))
        .or_else(|| formats.first())
        .copied()
        .ok_or(RenderError::NoSurfaceFormat)
}

/// The preferred mode if the surface offers it. FIFO is always available.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let want = match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if modes.contains(&want) {
        want
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's own extent when it dictates one, else the window size
/// clamped to what the surface accepts.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

/// 2D single-mip view over `image`.
pub fn create_image_view<D: DeviceApi>(
    dev: &D,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    dev.create_image_view(&info).call("vkCreateImageView")
}

/// Presentable images. Owned by the swapchain and released with it.
#[derive(Debug, Default)]
pub struct SwapchainImages(Vec<vk::Image>);

impl SwapchainImages {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Views created over the swapchain images; released by [`ImageViews::destroy`].
#[derive(Debug, Default)]
pub struct ImageViews(Vec<vk::ImageView>);

impl ImageViews {
    pub fn iter(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.0.iter().copied()
    }

    pub fn destroy<D: DeviceApi>(self, dev: &D) {
        for view in self.0 {
            dev.destroy_image_view(view);
        }
    }
}

/// Inputs for [`SwapchainState::create`].
#[derive(Clone, Copy, Debug)]
pub struct SwapchainParams {
    pub surface: vk::SurfaceKHR,
    pub queues: QueueFamilyIndices,
    pub window: RenderSize,
    pub present_mode: PresentModePreference,
    /// Format the render pass was built for. When set, the surface must
    /// still offer it.
    pub pinned_format: Option<vk::SurfaceFormatKHR>,
}

#[derive(Debug, Default)]
pub struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub images: SwapchainImages,
    pub views: ImageViews,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainState {
    pub fn create<D: DeviceApi>(dev: &D, params: &SwapchainParams) -> Result<Self> {
        let support = query_support(dev)?;
        let format = match params.pinned_format {
            Some(pinned) => {
                if !support.formats.iter().any(|f| same_format(f, &pinned)) {
                    return Err(RenderError::SurfaceFormatChanged(pinned.format));
                }
                pinned
            }
            None => choose_surface_format(&support.formats)?,
        };
        let present_mode = choose_present_mode(&support.present_modes, params.present_mode);
        let caps = &support.capabilities;
        let extent = choose_extent(caps, params.window);
        let min_image_count = choose_image_count(caps);

        let families = [params.queues.graphics, params.queues.present];
        let mut info = vk::SwapchainCreateInfoKHR::default()
            .surface(params.surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        info = if families[0] != families[1] {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let handle = dev.create_swapchain(&info).call("vkCreateSwapchainKHR")?;
        let images = match dev.swapchain_images(handle).call("vkGetSwapchainImagesKHR") {
            Ok(images) => images,
            Err(e) => {
                dev.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match create_image_view(dev, image, format.format, vk::ImageAspectFlags::COLOR) {
                Ok(v) => views.push(v),
                Err(e) => {
                    ImageViews(views).destroy(dev);
                    dev.destroy_swapchain(handle);
                    return Err(e);
                }
            }
        }

        info!(
            format = ?format.format,
            color_space = ?format.color_space,
            present_mode = ?present_mode,
            width = extent.width,
            height = extent.height,
            images = images.len(),
            "swapchain created"
        );
        Ok(Self {
            handle,
            images: SwapchainImages(images),
            views: ImageViews(views),
            format,
            present_mode,
            extent,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first, then the swapchain (which takes its images with it).
    pub fn destroy<D: DeviceApi>(self, dev: &D) {
        self.views.destroy(dev);
        if self.handle != vk::SwapchainKHR::null() {
            dev.destroy_swapchain(self.handle);
            debug!("swapchain destroyed");
        }
    }
}
