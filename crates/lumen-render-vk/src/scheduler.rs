// SPDX-License-Identifier: CEPL-1.0
//! Per-tick state machine: BEGIN_FRAME -> RECORD -> SUBMIT -> PRESENT, plus
//! the two recovery paths.
//!
//! Fence discipline: at the start of every tick each frame slot's fence is
//! either signaled or pending on the queue. A slot's fence is reset only
//! once an image has been acquired for it, and every reset is followed by a
//! submit that signals it again (the real one, or the empty one SoftReset
//! issues).
use ash::vk;
use lumen_render::{FramesInFlight, RenderSize, TickResult, VsyncPolicy};
use tracing::{debug, error, info, warn};

use crate::command::CommandRecorder;
use crate::driver::{ensure_live, Driver, FrameSlotId, ImageIndex, SubmitRequest};
use crate::error::{FrameError, PipelineError, SetupError, SwapchainError};
use crate::pipeline::{GraphicsPipelineDesc, PipelineId, PipelineRegistry, RenderPipeline};
use crate::push_constant::PushConstantValue;
use crate::swapchain::{PresentModePolicy, Swapchain};
use crate::sync::SyncPool;

/// Both blocking points wait forever; a stalled GPU stalls the caller.
const WAIT_FOREVER: u64 = u64::MAX;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub frames_in_flight: FramesInFlight,
    pub vsync: VsyncPolicy,
    pub clear_color: [f32; 4],
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            frames_in_flight: FramesInFlight::default(),
            vsync: VsyncPolicy::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Everything rebuilt by a hard reset.
#[derive(Debug, Default)]
struct FrameTarget {
    swapchain: Swapchain,
    commands: CommandRecorder,
    sync: SyncPool,
}

impl FrameTarget {
    fn destroy(&mut self, driver: &dyn Driver) {
        self.sync.destroy(driver);
        self.commands.destroy(driver);
        self.swapchain.destroy(driver);
    }
}

/// Owns a half-built target during a rebuild and tears it down unless the
/// rebuild runs to completion.
struct StagedTarget<'a> {
    driver: &'a dyn Driver,
    target: FrameTarget,
    armed: bool,
}

impl<'a> StagedTarget<'a> {
    fn new(driver: &'a dyn Driver) -> Self {
        StagedTarget {
            driver,
            target: FrameTarget::default(),
            armed: true,
        }
    }

    fn commit(mut self) -> FrameTarget {
        self.armed = false;
        std::mem::take(&mut self.target)
    }
}

impl Drop for StagedTarget<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("rebuild failed part way; releasing what was built");
            self.target.destroy(self.driver);
        }
    }
}

/// The image held between BEGIN_FRAME and PRESENT and how far the frame
/// got, so an abandoned frame can be unwound correctly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Acquired {
    image: ImageIndex,
    suboptimal: bool,
    fence_reset: bool,
    submitted: bool,
}

pub struct FrameScheduler {
    surface: vk::SurfaceKHR,
    frames: FramesInFlight,
    vsync: VsyncPolicy,
    clear_color: [f32; 4],
    present_policy: PresentModePolicy,
    /// `None` while the surface is 0x0 or after a failed rebuild.
    target: Option<FrameTarget>,
    pipelines: PipelineRegistry,
    /// Colour format the registered pipelines were last built against.
    pipeline_format: Option<vk::Format>,
    frame: FrameSlotId,
    acquired: Option<Acquired>,
}

impl FrameScheduler {
    pub fn new(
        driver: &dyn Driver,
        surface: vk::SurfaceKHR,
        config: SchedulerConfig,
        size: RenderSize,
    ) -> Result<Self, SetupError> {
        let mut s = FrameScheduler {
            surface: ensure_live(surface, "surface").map_err(SwapchainError::from)?,
            frames: config.frames_in_flight,
            vsync: config.vsync,
            clear_color: config.clear_color,
            present_policy: PresentModePolicy::default(),
            target: None,
            pipelines: PipelineRegistry::default(),
            pipeline_format: None,
            frame: FrameSlotId(0),
            acquired: None,
        };
        s.target = s.build_target(driver, size)?;
        s.pipeline_format = s.target.as_ref().map(|t| t.swapchain.format.format);
        Ok(s)
    }

    pub fn frames_in_flight(&self) -> FramesInFlight {
        self.frames
    }

    pub fn current_frame(&self) -> FrameSlotId {
        self.frame
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    pub fn image_count(&self) -> usize {
        self.target
            .as_ref()
            .map_or(0, |t| t.swapchain.image_count())
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.target.as_ref().map(|t| t.swapchain.extent)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.target.as_ref().map(|t| t.swapchain.present_mode)
    }

    /// Which frame slot's fence currently guards `image`, if any.
    pub fn image_owner(&self, image: ImageIndex) -> Option<FrameSlotId> {
        self.target.as_ref().and_then(|t| t.sync.owner(image))
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// Takes effect at the next hard reset. Returns whether one is needed.
    pub fn set_vsync(&mut self, policy: VsyncPolicy) -> bool {
        let changed = self.vsync != policy;
        self.vsync = policy;
        changed
    }

    pub fn register_pipeline(&mut self, pipeline: Box<dyn RenderPipeline>) -> PipelineId {
        self.pipelines.register(pipeline)
    }

    pub fn register_graphics_pipeline(
        &mut self,
        driver: &dyn Driver,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, PipelineError> {
        let rp = self
            .target
            .as_ref()
            .map(|t| t.swapchain.render_pass())
            .ok_or(PipelineError::Detached)?;
        self.pipelines.register_graphics(driver, rp, desc)
    }

    /// Waits for the device so no pending frame still uses the pipeline.
    pub fn unregister_pipeline(
        &mut self,
        driver: &dyn Driver,
        id: PipelineId,
    ) -> Result<(), PipelineError> {
        driver
            .device_wait_idle()
            .map_err(PipelineError::vk("device idle before unregister"))?;
        self.pipelines.unregister(driver, id)
    }

    pub fn set_push_constant(
        &mut self,
        id: PipelineId,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: PushConstantValue,
    ) -> Result<(), PipelineError> {
        self.pipelines.set_push_constant(id, stages, offset, value)
    }

    /// One full tick.
    pub fn update(&mut self, driver: &dyn Driver) -> TickResult {
        if self.target.is_none() {
            return TickResult::ResizeNeeded;
        }
        let drawn = match self.begin_frame(driver) {
            Ok(Some(_)) => self.record(driver).and_then(|()| self.submit(driver)),
            Ok(None) => return TickResult::ResizeNeeded,
            Err(e) => Err(e),
        };
        if let Err(e) = drawn {
            error!("frame abandoned: {e}");
            if let Err(e) = self.soft_reset(driver) {
                error!("soft reset after abandoned frame failed: {e}");
            }
            return TickResult::Error;
        }
        self.present(driver)
    }

    /// BEGIN_FRAME. `Ok(None)` means the swapchain is out of date.
    pub fn begin_frame(&mut self, driver: &dyn Driver) -> Result<Option<ImageIndex>, FrameError> {
        if let Some(a) = self.acquired {
            warn!("begin_frame with image {} still acquired", a.image.0);
            return Ok(Some(a.image));
        }
        let target = self.target.as_mut().ok_or(FrameError::Detached)?;
        let slot = target.sync.frame(self.frame);
        let fence = ensure_live(slot.fence, "frame fence")?;
        let acquire = ensure_live(slot.acquire, "acquire semaphore")?;
        let swapchain = ensure_live(target.swapchain.handle, "swapchain")?;

        driver
            .wait_for_fence(fence, WAIT_FOREVER)
            .map_err(FrameError::vk("frame fence wait"))?;

        let (index, suboptimal) =
            match driver.acquire_next_image(swapchain, acquire, WAIT_FOREVER) {
                Ok(r) => r,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("acquire: swapchain out of date");
                    return Ok(None);
                }
                Err(e) => return Err(FrameError::vk("image acquire")(e)),
            };
        let image = ImageIndex(index);
        if image.as_usize() >= target.sync.image_count() {
            return Err(crate::error::RecordError::ImageOutOfRange {
                index,
                count: target.sync.image_count(),
            }
            .into());
        }

        // Past this point the acquire semaphore is pending, so the frame
        // must be submitted or handed to soft_reset.
        self.acquired = Some(Acquired {
            image,
            suboptimal,
            fence_reset: false,
            submitted: false,
        });

        if let Some(owner) = target.sync.owner(image) {
            if owner != self.frame {
                let other = ensure_live(target.sync.frame(owner).fence, "image owner fence")?;
                driver
                    .wait_for_fence(other, WAIT_FOREVER)
                    .map_err(FrameError::vk("image owner fence wait"))?;
            }
        }
        driver
            .reset_fence(fence)
            .map_err(FrameError::vk("frame fence reset"))?;
        if let Some(a) = &mut self.acquired {
            a.fence_reset = true;
        }
        target.sync.claim(image, self.frame);
        Ok(Some(image))
    }

    /// RECORD into the current slot's command buffer.
    pub fn record(&mut self, driver: &dyn Driver) -> Result<(), FrameError> {
        let a = self.acquired.ok_or(FrameError::NothingAcquired)?;
        let target = self.target.as_ref().ok_or(FrameError::Detached)?;
        target.commands.record(
            driver,
            self.frame,
            &target.swapchain,
            a.image,
            self.clear_color,
            &self.pipelines,
        )?;
        Ok(())
    }

    /// SUBMIT: wait on acquire at colour output, signal present + fence.
    pub fn submit(&mut self, driver: &dyn Driver) -> Result<(), FrameError> {
        let a = self.acquired.ok_or(FrameError::NothingAcquired)?;
        let target = self.target.as_ref().ok_or(FrameError::Detached)?;
        let slot = target.sync.frame(self.frame);
        let request = SubmitRequest {
            command_buffer: ensure_live(target.commands.buffer(self.frame), "command buffer")?,
            wait: ensure_live(slot.acquire, "acquire semaphore")?,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: ensure_live(target.sync.present_semaphore(a.image), "present semaphore")?,
            fence: ensure_live(slot.fence, "frame fence")?,
        };
        driver
            .queue_submit(&request)
            .map_err(FrameError::vk("queue submit"))?;
        self.acquired = Some(Acquired {
            submitted: true,
            ..a
        });
        Ok(())
    }

    /// PRESENT, then advance the frame slot whatever the outcome.
    pub fn present(&mut self, driver: &dyn Driver) -> TickResult {
        let Some(a) = self.acquired.take() else {
            error!("present without an acquired image");
            return TickResult::Error;
        };
        let Some(target) = self.target.as_ref() else {
            return TickResult::Error;
        };
        let result = match (
            ensure_live(target.swapchain.handle, "swapchain"),
            ensure_live(target.sync.present_semaphore(a.image), "present semaphore"),
        ) {
            (Ok(sc), Ok(wait)) => classify_present(driver.queue_present(sc, a.image, wait)),
            _ => TickResult::Error,
        };
        self.advance();
        match result {
            TickResult::Ok if a.suboptimal => TickResult::ResizeNeeded,
            r => r,
        }
    }

    fn advance(&mut self) {
        self.frame = FrameSlotId((self.frame.0 + 1) % self.frames.as_usize());
    }

    /// Gives an acquired image back to the presentation engine without
    /// drawing to it. Only that image's ownership is cleared.
    pub fn soft_reset(&mut self, driver: &dyn Driver) -> Result<(), FrameError> {
        let Some(a) = self.acquired.take() else {
            debug!("soft reset: nothing acquired");
            return Ok(());
        };
        let target = self.target.as_mut().ok_or(FrameError::Detached)?;
        let slot = target.sync.frame(self.frame);
        let present = ensure_live(target.sync.present_semaphore(a.image), "present semaphore")?;
        let swapchain = ensure_live(target.swapchain.handle, "swapchain")?;

        // After a real submit the present semaphore is already on its way;
        // otherwise an empty batch consumes the acquire and re-arms the fence.
        if !a.submitted {
            let fence = ensure_live(slot.fence, "frame fence")?;
            if !a.fence_reset {
                driver
                    .reset_fence(fence)
                    .map_err(FrameError::vk("frame fence reset"))?;
            }
            driver
                .queue_submit(&SubmitRequest {
                    command_buffer: vk::CommandBuffer::null(),
                    wait: ensure_live(slot.acquire, "acquire semaphore")?,
                    wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    signal: present,
                    fence,
                })
                .map_err(FrameError::vk("empty submit"))?;
        }
        match driver.queue_present(swapchain, a.image, present) {
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {}
            Err(e) => warn!("soft reset present: {e}"),
        }
        target.sync.release(a.image);
        self.advance();
        info!("soft reset released image {}", a.image.0);
        Ok(())
    }

    /// Device-idle, tear everything down, rebuild in dependency order. A
    /// 0x0 size leaves the scheduler detached until the next reset.
    pub fn hard_reset(&mut self, driver: &dyn Driver, size: RenderSize) -> Result<(), SetupError> {
        driver
            .device_wait_idle()
            .map_err(SetupError::vk("device idle before reset"))?;
        if let Some(mut old) = self.target.take() {
            old.destroy(driver);
        }
        self.acquired = None;
        self.frame = FrameSlotId(0);

        self.target = self.build_target(driver, size)?;
        if let Some(t) = &self.target {
            let format = t.swapchain.format.format;
            if self.pipeline_format.is_some_and(|f| f != format) {
                self.pipelines.rebuild(driver, t.swapchain.render_pass())?;
            }
            self.pipeline_format = Some(format);
            info!(
                "hard reset: {}x{}, {} images",
                t.swapchain.extent.width,
                t.swapchain.extent.height,
                t.swapchain.image_count()
            );
        }
        Ok(())
    }

    fn build_target(
        &mut self,
        driver: &dyn Driver,
        size: RenderSize,
    ) -> Result<Option<FrameTarget>, SetupError> {
        if size.is_zero() {
            info!("surface is 0x0; waiting for a real size");
            return Ok(None);
        }
        let mut staged = StagedTarget::new(driver);
        staged.target.swapchain = match Swapchain::build(
            driver,
            self.surface,
            size,
            self.vsync,
            &mut self.present_policy,
        ) {
            Err(SwapchainError::ZeroExtent) => {
                info!("surface reports a 0x0 extent; waiting for a real size");
                return Ok(None);
            }
            r => r?,
        };
        staged.target.commands = CommandRecorder::new(driver, self.frames)?;
        staged.target.sync =
            SyncPool::new(driver, self.frames, staged.target.swapchain.image_count())?;
        Ok(Some(staged.commit()))
    }

    /// Waits for the device and destroys everything the scheduler owns. The
    /// surface itself belongs to the caller.
    pub fn shutdown(&mut self, driver: &dyn Driver) {
        if let Err(e) = driver.device_wait_idle() {
            warn!("device_wait_idle at shutdown failed: {e}");
        }
        self.acquired = None;
        self.pipelines.destroy_all(driver);
        if let Some(mut t) = self.target.take() {
            t.destroy(driver);
        }
    }
}

fn classify_present(r: ash::prelude::VkResult<bool>) -> TickResult {
    match r {
        Ok(false) => TickResult::Ok,
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => TickResult::ResizeNeeded,
        Err(e) => {
            error!("present failed: {e}");
            TickResult::Error
        }
    }
}
