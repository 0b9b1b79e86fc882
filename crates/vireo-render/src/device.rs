// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection policy.
//!
//! The backend enumerates devices and describes each one as a
//! [`DeviceCandidate`]; the choice itself is a pure function so it can be
//! tested without a GPU.

use ash::vk;
use tracing::{debug, info};

use crate::error::{RenderError, Result};
use crate::memory::MemoryTypeTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    /// A transfer-only family when the device has one, else `graphics`.
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct families, ascending. One queue is created per entry.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.transfer];
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// Picks graphics, present and transfer families. Present prefers the
/// graphics family so both usually share one queue.
pub fn find_queue_families(families: &[QueueFamilyInfo]) -> Option<QueueFamilyIndices> {
    let usable = |f: &&QueueFamilyInfo| f.queue_count > 0;
    let index = |i: usize| i as u32;

    let graphics = families
        .iter()
        .position(|f| usable(&f) && f.flags.contains(vk::QueueFlags::GRAPHICS))
        .map(index)?;
    let present = if families[graphics as usize].supports_present {
        graphics
    } else {
        families
            .iter()
            .position(|f| usable(&f) && f.supports_present)
            .map(index)?
    };
    let transfer = families
        .iter()
        .position(|f| {
            usable(&f)
                && f.flags.contains(vk::QueueFlags::TRANSFER)
                && !f.flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(index)
        .unwrap_or(graphics);

    Some(QueueFamilyIndices {
        graphics,
        present,
        transfer,
    })
}

/// Everything the policy needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<String>,
    /// The surface offers at least one format and one present mode.
    pub swapchain_adequate: bool,
    pub memory: MemoryTypeTable,
    /// Sample counts usable for both colour and depth framebuffers.
    pub framebuffer_samples: vk::SampleCountFlags,
}

/// The chosen device. Immutable for the process lifetime.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceSelection {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub memory: MemoryTypeTable,
    pub queues: QueueFamilyIndices,
    pub framebuffer_samples: vk::SampleCountFlags,
}

/// Queue handles fetched once when the logical device is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

pub fn device_type_score(ty: vk::PhysicalDeviceType) -> u32 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

fn rejection(c: &DeviceCandidate, required: &[String]) -> Option<String> {
    if let Some(missing) = required.iter().find(|e| !c.extensions.contains(e)) {
        return Some(format!("missing extension {missing}"));
    }
    if !c.swapchain_adequate {
        return Some("surface offers no formats or present modes".into());
    }
    None
}

/// Rejects candidates lacking queues, required extensions or surface
/// support, then takes the highest score. Ties keep enumeration order.
pub fn select_device(
    candidates: Vec<DeviceCandidate>,
    required_extensions: &[String],
) -> Result<PhysicalDeviceSelection> {
    let mut best: Option<(u32, DeviceCandidate, QueueFamilyIndices)> = None;
    for c in candidates {
        let Some(queues) = find_queue_families(&c.queue_families) else {
            debug!(device = %c.name, "rejected: missing graphics or present queue");
            continue;
        };
        if let Some(reason) = rejection(&c, required_extensions) {
            debug!(device = %c.name, %reason, "rejected");
            continue;
        }
        let score = device_type_score(c.device_type);
        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, c, queues));
        }
    }

    let (_, c, queues) = best.ok_or(RenderError::NoSuitableDevice)?;
    info!(
        device = %c.name,
        kind = ?c.device_type,
        graphics = queues.graphics,
        present = queues.present,
        transfer = queues.transfer,
        "physical device selected"
    );
    Ok(PhysicalDeviceSelection {
        handle: c.handle,
        name: c.name,
        device_type: c.device_type,
        memory: c.memory,
        queues,
        framebuffer_samples: c.framebuffer_samples,
    })
}

/// Highest sample count present in `supported` that does not exceed `cap`.
/// `TYPE_1` is always the floor.
pub fn max_usable_sample_count(supported: vk::SampleCountFlags, cap: u32) -> vk::SampleCountFlags {
    const ORDER: [(vk::SampleCountFlags, u32); 6] = [
        (vk::SampleCountFlags::TYPE_64, 64),
        (vk::SampleCountFlags::TYPE_32, 32),
        (vk::SampleCountFlags::TYPE_16, 16),
        (vk::SampleCountFlags::TYPE_8, 8),
        (vk::SampleCountFlags::TYPE_4, 4),
        (vk::SampleCountFlags::TYPE_2, 2),
    ];
    ORDER
        .iter()
        .find(|(flag, n)| *n <= cap && supported.contains(*flag))
        .map(|(flag, _)| *flag)
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}
