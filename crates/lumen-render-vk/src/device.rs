// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, warn};

use crate::capability::fixed_cstr;
use crate::driver::DeviceLimits;
use crate::error::SelectError;

/// Added to discrete GPUs so they beat integrated parts of similar size.
pub const DISCRETE_GPU_BONUS: u32 = 1000;

/// One enumerated GPU, reduced to what selection looks at.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    /// First queue family that can both draw and present to the surface.
    pub graphics_present_family: Option<u32>,
    pub extensions: Vec<String>,
    pub limits: DeviceLimits,
}

#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub queue_family: u32,
    pub limits: DeviceLimits,
}

/// `None` when the device can't drive the surface at all.
pub fn score(candidate: &PhysicalDeviceCandidate, required: &[String]) -> Option<u32> {
    candidate.graphics_present_family?;
    if let Some(missing) = required
        .iter()
        .find(|r| !candidate.extensions.iter().any(|e| e == *r))
    {
        debug!("{}: missing device extension {missing}", candidate.name);
        return None;
    }
    let bonus = if candidate.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_GPU_BONUS
    } else {
        0
    };
    Some(bonus.saturating_add(candidate.max_image_dimension_2d))
}

/// Highest score wins; on a tie the first enumerated device is kept.
pub fn select(
    candidates: &[PhysicalDeviceCandidate],
    required: &[String],
) -> Result<SelectedDevice, SelectError> {
    if candidates.is_empty() {
        return Err(SelectError::NoDevices);
    }
    let mut best: Option<(u32, &PhysicalDeviceCandidate)> = None;
    for c in candidates {
        let Some(s) = score(c, required) else {
            info!("rejecting {} ({:?})", c.name, c.device_type);
            continue;
        };
        debug!("candidate {} scored {s}", c.name);
        if best.map_or(true, |(b, _)| s > b) {
            best = Some((s, c));
        }
    }
    let (s, c) = best.ok_or(SelectError::NoSuitableDevice)?;
    let queue_family = c
        .graphics_present_family
        .ok_or(SelectError::NoSuitableDevice)?;
    info!("selected {} ({:?}, score {s})", c.name, c.device_type);
    Ok(SelectedDevice {
        handle: c.handle,
        name: c.name.clone(),
        queue_family,
        limits: c.limits,
    })
}

/// What enumeration learned about one GPU before it becomes a candidate.
pub(crate) struct DeviceReport {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub graphics_present_family: Option<u32>,
    pub extensions: VkResult<Vec<String>>,
    pub limits: DeviceLimits,
}

impl DeviceReport {
    /// A device whose extensions can't be listed is skipped, not fatal.
    fn into_candidate(self) -> Option<PhysicalDeviceCandidate> {
        let extensions = match self.extensions {
            Ok(list) => list,
            Err(e) => {
                warn!("{}: device extension query failed ({e}); skipping", self.name);
                return None;
            }
        };
        Some(PhysicalDeviceCandidate {
            handle: self.handle,
            name: self.name,
            device_type: self.device_type,
            max_image_dimension_2d: self.max_image_dimension_2d,
            graphics_present_family: self.graphics_present_family,
            extensions,
            limits: self.limits,
        })
    }
}

pub(crate) fn candidates_from(
    reports: impl IntoIterator<Item = DeviceReport>,
) -> Vec<PhysicalDeviceCandidate> {
    reports
        .into_iter()
        .filter_map(DeviceReport::into_candidate)
        .collect()
}

pub(crate) fn enumerate_candidates(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<PhysicalDeviceCandidate>, SelectError> {
    // SAFETY: instance is live for the duration of this call; every
    // physical-device handle below was enumerated from it.
    unsafe {
        let devices = instance
            .enumerate_physical_devices()
            .map_err(SelectError::Vulkan)?;
        let mut reports = Vec::with_capacity(devices.len());
        for phys in devices {
            let props = instance.get_physical_device_properties(phys);
            let qprops = instance.get_physical_device_queue_family_properties(phys);
            let family = qprops.iter().enumerate().find_map(|(i, q)| {
                let i = i as u32;
                let present = surface_loader
                    .get_physical_device_surface_support(phys, i, surface)
                    .unwrap_or(false);
                (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i)
            });
            reports.push(DeviceReport {
                handle: phys,
                name: fixed_cstr(&props.device_name),
                device_type: props.device_type,
                max_image_dimension_2d: props.limits.max_image_dimension2_d,
                graphics_present_family: family,
                extensions: instance.enumerate_device_extension_properties(phys).map(|l| {
                    l.iter().map(|e| fixed_cstr(&e.extension_name)).collect()
                }),
                limits: DeviceLimits {
                    max_push_constants_size: props.limits.max_push_constants_size,
                },
            });
        }
        Ok(candidates_from(reports))
    }
}
