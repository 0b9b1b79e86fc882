// SPDX-License-Identifier: CEPL-1.0
//! Physical-device enumeration and logical device creation.

use std::ffi::{c_char, CString};

use anyhow::{anyhow, Context, Result};
use ash::khr::surface;
use ash::{vk, Instance};
use tracing::debug;
use vireo_render::device::{
    DeviceCandidate, DeviceQueues, PhysicalDeviceSelection, QueueFamilyInfo,
};
use vireo_render::memory::MemoryTypeTable;

/// Depth formats in order of preference.
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate whose optimal-tiling features allow depth attachments.
pub fn choose_depth_format(
    optimal_features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&f| {
        optimal_features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub unsafe fn pick_depth_format(instance: &Instance, phys: vk::PhysicalDevice) -> Result<vk::Format> {
    choose_depth_format(|f| {
        instance
            .get_physical_device_format_properties(phys, f)
            .optimal_tiling_features
    })
    .ok_or_else(|| anyhow!("no supported depth attachment format"))
}

unsafe fn describe(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let props = instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let queue_families = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilyInfo {
            flags: q.queue_flags,
            queue_count: q.queue_count,
            // a failed query just means this family is not used for present
            supports_present: surface_loader
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false),
        })
        .collect();

    let extensions = instance
        .enumerate_device_extension_properties(phys)
        .context("vkEnumerateDeviceExtensionProperties")?
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();

    let formats = surface_loader
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surface_loader
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();

    let memory = MemoryTypeTable::from_properties(&instance.get_physical_device_memory_properties(phys));
    let limits = props.limits;

    Ok(DeviceCandidate {
        handle: phys,
        name,
        device_type: props.device_type,
        queue_families,
        extensions,
        swapchain_adequate: !formats.is_empty() && !modes.is_empty(),
        memory,
        framebuffer_samples: limits.framebuffer_color_sample_counts
            & limits.framebuffer_depth_sample_counts,
    })
}

/// Every physical device, described for the selection policy.
pub unsafe fn enumerate_candidates(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<DeviceCandidate>> {
    let physical = instance
        .enumerate_physical_devices()
        .context("vkEnumeratePhysicalDevices")?;
    let mut out = Vec::with_capacity(physical.len());
    for phys in physical {
        let candidate = describe(instance, surface_loader, surface, phys)?;
        debug!(device = %candidate.name, kind = ?candidate.device_type, "physical device found");
        out.push(candidate);
    }
    Ok(out)
}

/// One queue per unique family, all at priority 1.0.
pub unsafe fn create_logical_device(
    instance: &Instance,
    selection: &PhysicalDeviceSelection,
    extensions: &[String],
) -> Result<(ash::Device, DeviceQueues)> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = selection
        .queues
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let ext_names = extensions
        .iter()
        .map(|e| CString::new(e.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let device = instance
        .create_device(selection.handle, &info, None)
        .context("vkCreateDevice")?;

    let q = selection.queues;
    let queues = DeviceQueues {
        graphics: device.get_device_queue(q.graphics, 0),
        present: device.get_device_queue(q.present, 0),
        transfer: device.get_device_queue(q.transfer, 0),
    };
    debug!(families = ?q.unique(), "logical device created");
    Ok((device, queues))
}

pub unsafe fn create_command_pool(
    device: &ash::Device,
    family: u32,
    flags: vk::CommandPoolCreateFlags,
) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: family,
        flags,
        ..Default::default()
    };
    Ok(device
        .create_command_pool(&info, None)
        .context("vkCreateCommandPool")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_d32_when_supported() {
        let f = choose_depth_format(|_| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(f, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn falls_through_to_first_supported() {
        let f = choose_depth_format(|f| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::FormatFeatureFlags::SAMPLED_IMAGE
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        });
        assert_eq!(f, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn none_when_nothing_is_depth_capable() {
        assert_eq!(choose_depth_format(|_| vk::FormatFeatureFlags::empty()), None);
    }
}
