// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_render::{RenderSize, VsyncPolicy};
use tracing::{info, warn};

use crate::driver::{ensure_live, Driver, ImageIndex, SwapchainRequest};
use crate::error::{RecordError, SwapchainError};

/// One more than the minimum for overlap, capped by the max (0 == no max).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

/// `current_extent` of u32::MAX means the surface lets us pick.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

fn is_8bit_unorm_or_srgb(f: vk::Format) -> bool {
    matches!(
        f,
        vk::Format::B8G8R8A8_UNORM
            | vk::Format::B8G8R8A8_SRGB
            | vk::Format::R8G8B8A8_UNORM
            | vk::Format::R8G8B8A8_SRGB
            | vk::Format::A8B8G8R8_UNORM_PACK32
            | vk::Format::A8B8G8R8_SRGB_PACK32
    )
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, SwapchainError> {
    let nonlinear = vk::ColorSpaceKHR::SRGB_NONLINEAR;
    for want in [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM] {
        if let Some(f) = formats
            .iter()
            .find(|f| f.format == want && f.color_space == nonlinear)
        {
            return Ok(*f);
        }
    }
    if let Some(f) = formats
        .iter()
        .find(|f| f.color_space == nonlinear && is_8bit_unorm_or_srgb(f.format))
    {
        return Ok(*f);
    }
    formats.first().copied().ok_or(SwapchainError::NoSurfaceFormats)
}

/// Prefer IDENTITY if supported, otherwise use current to avoid extra blits.
pub fn choose_pre_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

pub fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|a| caps.supported_composite_alpha.contains(*a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Returns the mode and whether the policy had to fall back to FIFO.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: VsyncPolicy,
) -> (vk::PresentModeKHR, bool) {
    let wanted = match policy {
        VsyncPolicy::On => return (vk::PresentModeKHR::FIFO, false),
        VsyncPolicy::Off => vk::PresentModeKHR::IMMEDIATE,
        VsyncPolicy::TripleBuffering => vk::PresentModeKHR::MAILBOX,
    };
    if modes.contains(&wanted) {
        (wanted, false)
    } else {
        (vk::PresentModeKHR::FIFO, true)
    }
}

/// Present-mode selection that remembers which policy it last warned about,
/// so a fallback is reported once per policy change instead of per rebuild.
#[derive(Debug, Default)]
pub struct PresentModePolicy {
    last: Option<VsyncPolicy>,
    warnings: usize,
}

impl PresentModePolicy {
    pub fn resolve(
        &mut self,
        modes: &[vk::PresentModeKHR],
        policy: VsyncPolicy,
    ) -> vk::PresentModeKHR {
        let (mode, fell_back) = choose_present_mode(modes, policy);
        if fell_back && self.last != Some(policy) {
            warn!("vsync `{policy}` is not supported by this surface; falling back to FIFO");
            self.warnings += 1;
        }
        self.last = Some(policy);
        mode
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }
}

/// The presentable chain for one surface, plus everything built against its
/// images: views, the render pass and one framebuffer per image.
#[derive(Debug, Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    pub fn build(
        driver: &dyn Driver,
        surface: vk::SurfaceKHR,
        want: RenderSize,
        vsync: VsyncPolicy,
        present: &mut PresentModePolicy,
    ) -> Result<Self, SwapchainError> {
        let surface = ensure_live(surface, "surface")?;
        let support = driver
            .surface_support(surface)
            .map_err(SwapchainError::vk("surface query"))?;
        let caps = &support.capabilities;

        let extent = choose_extent(caps, want);
        if extent.width == 0 || extent.height == 0 {
            return Err(SwapchainError::ZeroExtent);
        }
        let format = choose_surface_format(&support.formats)?;
        let present_mode = present.resolve(&support.present_modes, vsync);
        let request = SwapchainRequest {
            surface,
            image_count: choose_image_count(caps),
            format,
            extent,
            pre_transform: choose_pre_transform(caps),
            composite_alpha: choose_composite_alpha(caps),
            present_mode,
        };

        let handle = driver
            .create_swapchain(&request)
            .map_err(SwapchainError::vk("swapchain creation"))?;
        let mut sc = Swapchain {
            handle,
            format,
            extent,
            present_mode,
            ..Default::default()
        };
        if let Err(e) = sc.populate(driver) {
            sc.destroy(driver);
            return Err(e);
        }

        info!(
            "swapchain: {:?} / {:?}, {:?}, {}x{}, images(min={} max={} -> {})",
            format.format,
            format.color_space,
            present_mode,
            extent.width,
            extent.height,
            caps.min_image_count,
            caps.max_image_count,
            sc.images.len()
        );
        Ok(sc)
    }

    fn populate(&mut self, driver: &dyn Driver) -> Result<(), SwapchainError> {
        self.images = driver
            .swapchain_images(self.handle)
            .map_err(SwapchainError::vk("swapchain image query"))?;
        for &image in &self.images {
            let view = driver
                .create_image_view(image, self.format.format)
                .map_err(SwapchainError::vk("image view creation"))?;
            self.views.push(view);
        }
        self.render_pass = driver
            .create_render_pass(self.format.format)
            .map_err(SwapchainError::vk("render pass creation"))?;
        for &view in &self.views {
            let fb = driver
                .create_framebuffer(self.render_pass, view, self.extent)
                .map_err(SwapchainError::vk("framebuffer creation"))?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image: ImageIndex) -> Result<vk::Framebuffer, RecordError> {
        self.framebuffers
            .get(image.as_usize())
            .copied()
            .ok_or(RecordError::ImageOutOfRange {
                index: image.0,
                count: self.framebuffers.len(),
            })
    }

    /// Framebuffers, render pass, views, then the swapchain. Null entries left
    /// by a partial build are skipped. The caller guarantees the device is idle.
    pub fn destroy(&mut self, driver: &dyn Driver) {
        for fb in self.framebuffers.drain(..) {
            driver.destroy_framebuffer(fb);
        }
        if self.render_pass != vk::RenderPass::null() {
            driver.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        for view in self.views.drain(..) {
            driver.destroy_image_view(view);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}
