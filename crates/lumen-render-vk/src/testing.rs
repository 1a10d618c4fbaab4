// SPDX-License-Identifier: CEPL-1.0
//! In-process stand-in for a GPU. Submissions stay pending until the CPU
//! waits on their fence (or the device idles), which models a GPU that is
//! always as far behind as the synchronisation allows.
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::driver::{
    DeviceLimits, Driver, GraphicsPipelineRequest, ImageIndex, SubmitRequest, SurfaceSupport,
    SwapchainRequest,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Acquire {
    Image(u32),
    Suboptimal(u32),
    OutOfDate,
    Fail(vk::Result),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Present {
    Ok,
    Suboptimal,
    OutOfDate,
    Fail(vk::Result),
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Cmd {
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: [f32; 4],
    },
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    Viewport(vk::Viewport),
    Scissor(vk::Rect2D),
    Push {
        stages: vk::ShaderStageFlags,
        offset: u32,
        len: usize,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

#[derive(Clone, Copy, Debug, Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

#[derive(Default)]
pub(crate) struct FakeState {
    next_handle: u64,
    /// Every live object and what kind it is; empty after a clean teardown.
    pub live: HashMap<u64, &'static str>,
    fences: HashMap<u64, FenceState>,
    /// Binary semaphores: `true` while a signal is waiting to be consumed.
    semaphores: HashMap<u64, bool>,
    pending: VecDeque<u64>,
    pub max_pending: usize,
    pub submits: usize,
    pub empty_submits: usize,
    pub fence_waits: Vec<vk::Fence>,
    /// Waits that found their fence unsignaled and had to block.
    pub blocking_waits: Vec<vk::Fence>,
    pub idle_waits: usize,
    pub submitted: Vec<SubmitRequest>,
    pub acquire_signals: Vec<vk::Semaphore>,
    pub present_waits: Vec<(u32, vk::Semaphore)>,
    /// Kind of every object in creation order.
    pub created: Vec<&'static str>,
    pub support: SurfaceSupport,
    swapchain_images: HashMap<u64, u32>,
    pub swapchains_created: Vec<SwapchainRequest>,
    pub acquire_script: VecDeque<Acquire>,
    pub present_script: VecDeque<Present>,
    round_robin: u32,
    pub presented: Vec<u32>,
    pub commands: Vec<(vk::CommandBuffer, Cmd)>,
    pub limits: DeviceLimits,
    /// Fail the n-th (0-based) creation of the given kind.
    pub fail_create: Option<(&'static str, usize)>,
    created_by_kind: HashMap<&'static str, usize>,
}

pub(crate) struct FakeDriver {
    pub state: RefCell<FakeState>,
}

impl FakeDriver {
    pub fn new(min_images: u32, max_images: u32, extent: vk::Extent2D) -> Self {
        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min_images,
                max_image_count: max_images,
                current_extent: extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 8192,
                    height: 8192,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        FakeDriver {
            state: RefCell::new(FakeState {
                next_handle: 0x1000,
                support,
                limits: DeviceLimits::default(),
                ..Default::default()
            }),
        }
    }

    pub fn surface() -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0xdead)
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().support.capabilities.current_extent =
            vk::Extent2D { width, height };
    }

    pub fn script_acquire(&self, outcomes: impl IntoIterator<Item = Acquire>) {
        self.state.borrow_mut().acquire_script.extend(outcomes);
    }

    pub fn script_present(&self, outcomes: impl IntoIterator<Item = Present>) {
        self.state.borrow_mut().present_script.extend(outcomes);
    }

    pub fn fail_nth(&self, kind: &'static str, n: usize) {
        let mut s = self.state.borrow_mut();
        s.fail_create = Some((kind, n));
        s.created_by_kind.clear();
    }

    pub fn live_count(&self, kind: &str) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|k| **k == kind)
            .count()
    }

    pub fn live_total(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_pending(&self, fence: vk::Fence) -> bool {
        self.state
            .borrow()
            .fences
            .get(&fence.as_raw())
            .map(|f| f.pending)
            .unwrap_or(false)
    }

    pub fn viewports(&self) -> Vec<vk::Viewport> {
        self.state
            .borrow()
            .commands
            .iter()
            .filter_map(|(_, c)| match c {
                Cmd::Viewport(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.state.borrow().commands.iter().map(|(_, c)| *c).collect()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    fn mint(&self, kind: &'static str) -> VkResult<u64> {
        let mut s = self.state.borrow_mut();
        let this = {
            let n = s.created_by_kind.entry(kind).or_insert(0);
            *n += 1;
            *n - 1
        };
        if s.fail_create == Some((kind, this)) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        s.next_handle += 1;
        let h = s.next_handle;
        s.live.insert(h, kind);
        s.created.push(kind);
        Ok(h)
    }

    fn release(&self, raw: u64, kind: &'static str) {
        let mut s = self.state.borrow_mut();
        match s.live.remove(&raw) {
            Some(k) => assert_eq!(k, kind, "destroyed a {k} through destroy_{kind}"),
            None => panic!("double destroy or foreign {kind} handle {raw:#x}"),
        }
    }

    fn record(&self, cmd: vk::CommandBuffer, c: Cmd) {
        self.state.borrow_mut().commands.push((cmd, c));
    }

    fn signal_semaphore(s: &mut FakeState, semaphore: vk::Semaphore) -> VkResult<()> {
        let signaled = s
            .semaphores
            .get_mut(&semaphore.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        assert!(!*signaled, "signaled semaphore {semaphore:?} twice");
        *signaled = true;
        Ok(())
    }

    fn consume_semaphore(s: &mut FakeState, semaphore: vk::Semaphore) -> VkResult<()> {
        let signaled = s
            .semaphores
            .get_mut(&semaphore.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        assert!(*signaled, "waited on semaphore {semaphore:?} with no signal pending");
        *signaled = false;
        Ok(())
    }

    pub fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state
            .borrow()
            .semaphores
            .get(&semaphore.as_raw())
            .copied()
            .unwrap_or(false)
    }

    /// Retires submissions in queue order up to and including `fence`.
    fn retire_through(s: &mut FakeState, fence: u64) {
        while let Some(f) = s.pending.pop_front() {
            if let Some(st) = s.fences.get_mut(&f) {
                st.pending = false;
                st.signaled = true;
            }
            if f == fence {
                break;
            }
        }
    }
}

impl Driver for FakeDriver {
    fn limits(&self) -> DeviceLimits {
        self.state.borrow().limits
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.idle_waits += 1;
        while let Some(f) = s.pending.pop_front() {
            if let Some(st) = s.fences.get_mut(&f) {
                st.pending = false;
                st.signaled = true;
            }
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let h = self.mint("fence")?;
        self.state.borrow_mut().fences.insert(
            h,
            FenceState {
                signaled,
                pending: false,
            },
        );
        Ok(vk::Fence::from_raw(h))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        assert!(!self.is_pending(fence), "destroyed a fence with GPU work pending");
        self.release(fence.as_raw(), "fence");
        self.state.borrow_mut().fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.fence_waits.push(fence);
        let st = *s
            .fences
            .get(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        if st.signaled {
            return Ok(());
        }
        if !st.pending {
            // Nothing will ever signal it: a real wait would hang forever.
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        s.blocking_waits.push(fence);
        Self::retire_through(&mut s, fence.as_raw());
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let st = s
            .fences
            .get_mut(&fence.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        assert!(!st.pending, "reset a fence with GPU work pending");
        st.signaled = false;
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let h = self.mint("semaphore")?;
        self.state.borrow_mut().semaphores.insert(h, false);
        Ok(vk::Semaphore::from_raw(h))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore.as_raw(), "semaphore");
        self.state
            .borrow_mut()
            .semaphores
            .remove(&semaphore.as_raw());
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        Ok(self.state.borrow().support.clone())
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        let h = self.mint("swapchain")?;
        let mut s = self.state.borrow_mut();
        s.swapchain_images.insert(h, request.image_count);
        s.swapchains_created.push(*request);
        s.round_robin = 0;
        Ok(vk::SwapchainKHR::from_raw(h))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let s = self.state.borrow();
        let n = *s
            .swapchain_images
            .get(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        Ok((0..n)
            .map(|i| vk::Image::from_raw(swapchain.as_raw() * 0x100 + u64::from(i) + 1))
            .collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release(swapchain.as_raw(), "swapchain");
        self.state
            .borrow_mut()
            .swapchain_images
            .remove(&swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        let count = *s
            .swapchain_images
            .get(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let next = s.acquire_script.pop_front();
        let acquired = match next {
            Some(Acquire::Image(i)) => (i, false),
            Some(Acquire::Suboptimal(i)) => (i, true),
            Some(Acquire::OutOfDate) => return Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Some(Acquire::Fail(e)) => return Err(e),
            None => {
                let i = s.round_robin % count;
                s.round_robin += 1;
                (i, false)
            }
        };
        Self::signal_semaphore(&mut s, signal)?;
        s.acquire_signals.push(signal);
        Ok(acquired)
    }

    fn queue_submit(&self, request: &SubmitRequest) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.submits += 1;
        if request.command_buffer == vk::CommandBuffer::null() {
            s.empty_submits += 1;
        }
        s.submitted.push(*request);
        if request.wait != vk::Semaphore::null() {
            Self::consume_semaphore(&mut s, request.wait)?;
        }
        if request.signal != vk::Semaphore::null() {
            Self::signal_semaphore(&mut s, request.signal)?;
        }
        if request.fence != vk::Fence::null() {
            let raw = request.fence.as_raw();
            let st = s.fences.get_mut(&raw).ok_or(vk::Result::ERROR_UNKNOWN)?;
            assert!(
                !st.signaled && !st.pending,
                "submitted with a fence that was not reset"
            );
            st.pending = true;
            s.pending.push_back(raw);
            let depth = s.pending.len();
            s.max_pending = s.max_pending.max(depth);
        }
        Ok(())
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image: ImageIndex,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        Self::consume_semaphore(&mut s, wait)?;
        s.presented.push(image.0);
        s.present_waits.push((image.0, wait));
        let next = s.present_script.pop_front().unwrap_or(Present::Ok);
        match next {
            Present::Ok => Ok(false),
            Present::Suboptimal => Ok(true),
            Present::OutOfDate => Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            Present::Fail(e) => Err(e),
        }
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.mint("image_view")?))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(view.as_raw(), "image_view");
    }

    fn create_render_pass(&self, _color_format: vk::Format) -> VkResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.mint("render_pass")?))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(render_pass.as_raw(), "render_pass");
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        Ok(vk::Framebuffer::from_raw(self.mint("framebuffer")?))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer.as_raw(), "framebuffer");
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(self.mint("command_pool")?))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release(pool.as_raw(), "command_pool");
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        // Freed implicitly with their pool, so not tracked as live objects.
        let mut s = self.state.borrow_mut();
        s.created.push("command_buffer");
        Ok((0..count)
            .map(|_| {
                s.next_handle += 1;
                vk::CommandBuffer::from_raw(s.next_handle)
            })
            .collect())
    }

    fn reset_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: [f32; 4],
    ) {
        self.record(
            cmd,
            Cmd::BeginRenderPass {
                framebuffer,
                extent,
                clear,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(cmd, Cmd::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(cmd, Cmd::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record(cmd, Cmd::Viewport(viewport));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.record(cmd, Cmd::Scissor(scissor));
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        self.record(
            cmd,
            Cmd::Push {
                stages,
                offset,
                len: bytes.len(),
            },
        );
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            cmd,
            Cmd::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        Ok(vk::ShaderModule::from_raw(self.mint("shader_module")?))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.release(module.as_raw(), "shader_module");
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(
            self.mint("descriptor_set_layout")?,
        ))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout.as_raw(), "descriptor_set_layout");
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_ranges: &[vk::PushConstantRange],
    ) -> VkResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(self.mint("pipeline_layout")?))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(layout.as_raw(), "pipeline_layout");
    }

    fn create_graphics_pipeline(
        &self,
        _request: &GraphicsPipelineRequest,
    ) -> VkResult<vk::Pipeline> {
        Ok(vk::Pipeline::from_raw(self.mint("pipeline")?))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release(pipeline.as_raw(), "pipeline");
    }
}

/// Smallest valid SPIR-V blob: the magic number plus a padded header.
pub(crate) fn spirv_blob() -> Vec<u8> {
    let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> FakeDriver {
        FakeDriver::new(
            2,
            3,
            vk::Extent2D {
                width: 64,
                height: 64,
            },
        )
    }

    #[test]
    fn submit_moves_the_signal_from_wait_to_signal_semaphore() {
        let fake = driver();
        let (a, b) = (fake.create_semaphore().unwrap(), fake.create_semaphore().unwrap());
        FakeDriver::signal_semaphore(&mut fake.state.borrow_mut(), a).unwrap();
        fake.queue_submit(&SubmitRequest {
            command_buffer: vk::CommandBuffer::null(),
            wait: a,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: b,
            fence: vk::Fence::null(),
        })
        .unwrap();
        assert!(!fake.is_signaled(a));
        assert!(fake.is_signaled(b));
        fake.destroy_semaphore(a);
        fake.destroy_semaphore(b);
    }

    #[test]
    #[should_panic(expected = "no signal pending")]
    fn waiting_on_an_unsignaled_semaphore_panics() {
        let fake = driver();
        let sem = fake.create_semaphore().unwrap();
        let _ = fake.queue_present(vk::SwapchainKHR::null(), ImageIndex(0), sem);
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn signaling_a_semaphore_twice_panics() {
        let fake = driver();
        let sem = fake.create_semaphore().unwrap();
        let mut s = fake.state.borrow_mut();
        FakeDriver::signal_semaphore(&mut s, sem).unwrap();
        let _ = FakeDriver::signal_semaphore(&mut s, sem);
    }
}
