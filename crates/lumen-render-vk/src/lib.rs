// SPDX-License-Identifier: CEPL-1.0
//! Vulkan frame engine: capability registration, device selection, the
//! swapchain, per-frame synchronization, command recording, pipelines and
//! the frame scheduler that ties them together.
#![deny(unsafe_op_in_unsafe_fn)]

use anyhow::Result;
use lumen_render::{FramesInFlight, RenderSize, Renderer, TickResult, VsyncPolicy};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};

pub mod capability;
mod catalog;
pub mod command;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod push_constant;
pub mod scheduler;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod testing;

pub use ash::vk;
pub use capability::{CapabilityRegistry, EnabledCapabilities, RuntimeSupport};
pub use command::CommandContext;
pub use context::{CoreContext, LogicalDevice};
pub use driver::{Driver, FrameSlotId, ImageIndex};
pub use error::{
    CapabilityError, FrameError, PipelineError, PushConstantError, RecordError, SetupError,
};
pub use pipeline::{DescriptorBinding, GraphicsPipelineDesc, PipelineId, RenderPipeline};
pub use push_constant::PushConstantValue;
pub use scheduler::{FrameScheduler, SchedulerConfig};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub frames_in_flight: FramesInFlight,
    pub vsync: VsyncPolicy,
    pub clear_color: [f32; 4],
    pub application_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            frames_in_flight: FramesInFlight::default(),
            vsync: VsyncPolicy::default(),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            application_name: "lumen".to_owned(),
        }
    }
}

impl EngineConfig {
    fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            frames_in_flight: self.frames_in_flight,
            vsync: self.vsync,
            clear_color: self.clear_color,
        }
    }
}

/// The engine a host drives. Instance at `initialize`, device and swapchain
/// at `attach_surface`, one tick per `update`.
pub struct VkEngine {
    config: EngineConfig,
    surface: Option<vk::SurfaceKHR>,
    scheduler: Option<FrameScheduler>,
    context: CoreContext,
}

impl VkEngine {
    pub fn initialize(caps: EnabledCapabilities, config: EngineConfig) -> Result<Self, SetupError> {
        let context = CoreContext::new(caps, &config.application_name)?;
        info!(
            "engine initialised ({} frames in flight, vsync {})",
            config.frames_in_flight.get(),
            config.vsync
        );
        Ok(VkEngine {
            config,
            surface: None,
            scheduler: None,
            context,
        })
    }

    pub fn context(&self) -> &CoreContext {
        &self.context
    }

    pub fn scheduler(&self) -> Option<&FrameScheduler> {
        self.scheduler.as_ref()
    }

    pub fn frames_in_flight(&self) -> FramesInFlight {
        self.config.frames_in_flight
    }

    pub fn device_name(&self) -> Option<&str> {
        self.context.device().map(LogicalDevice::name)
    }

    fn build_scheduler(
        &mut self,
        surface: vk::SurfaceKHR,
        size: RenderSize,
    ) -> Result<FrameScheduler, SetupError> {
        let config = self.config.scheduler();
        let device = self.context.ensure_device(surface)?;
        FrameScheduler::new(device, surface, config, size)
    }

    /// Registers a caller-built pipeline. Recording follows registration order.
    pub fn register_pipeline(
        &mut self,
        pipeline: Box<dyn RenderPipeline>,
    ) -> Result<PipelineId, PipelineError> {
        let s = self.scheduler.as_mut().ok_or(PipelineError::Detached)?;
        Ok(s.register_pipeline(pipeline))
    }

    pub fn register_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<PipelineId, PipelineError> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.register_graphics_pipeline(d, desc),
            _ => Err(PipelineError::Detached),
        }
    }

    pub fn unregister_pipeline(&mut self, id: PipelineId) -> Result<(), PipelineError> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.unregister_pipeline(d, id),
            _ => Err(PipelineError::UnknownPipeline(id)),
        }
    }

    /// BEGIN_FRAME on its own, for hosts that drive the tick phase by phase
    /// and may abandon a frame with `soft_reset`. `Ok(None)` means the
    /// swapchain is out of date.
    pub fn begin_frame(&mut self) -> Result<Option<ImageIndex>, FrameError> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.begin_frame(d),
            _ => Err(FrameError::Detached),
        }
    }

    pub fn record_frame(&mut self) -> Result<(), FrameError> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.record(d),
            _ => Err(FrameError::Detached),
        }
    }

    pub fn submit_frame(&mut self) -> Result<(), FrameError> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.submit(d),
            _ => Err(FrameError::Detached),
        }
    }

    pub fn present_frame(&mut self) -> TickResult {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.present(d),
            _ => {
                error!("present_frame called with no surface attached");
                TickResult::Error
            }
        }
    }

    /// Stored on the CPU and pushed every time the pipeline records.
    pub fn set_push_constant(
        &mut self,
        id: PipelineId,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: PushConstantValue,
    ) -> Result<(), PipelineError> {
        let s = self
            .scheduler
            .as_mut()
            .ok_or(PipelineError::UnknownPipeline(id))?;
        s.set_push_constant(id, stages, offset, value)
    }
}

impl Renderer for VkEngine {
    fn attach_surface(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<()> {
        if self.surface.is_some() {
            return Err(SetupError::SurfaceAlreadyAttached.into());
        }
        let surface = self.context.create_surface(window, display)?;
        match self.build_scheduler(surface, size) {
            Ok(s) => {
                info!(
                    "surface attached on {} ({}x{})",
                    self.device_name().unwrap_or("?"),
                    size.width,
                    size.height
                );
                self.scheduler = Some(s);
                self.surface = Some(surface);
                Ok(())
            }
            Err(e) => {
                self.context.destroy_surface(surface);
                Err(e.into())
            }
        }
    }

    fn update(&mut self) -> TickResult {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => s.update(d),
            _ => {
                error!("update called with no surface attached");
                TickResult::Error
            }
        }
    }

    fn hard_reset(&mut self, size: RenderSize) -> Result<()> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => Ok(s.hard_reset(d, size)?),
            _ => Err(SetupError::NoSurface.into()),
        }
    }

    fn soft_reset(&mut self) -> Result<()> {
        match (self.scheduler.as_mut(), self.context.device()) {
            (Some(s), Some(d)) => Ok(s.soft_reset(d)?),
            _ => Err(SetupError::NoSurface.into()),
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.config.clear_color = rgba;
        if let Some(s) = self.scheduler.as_mut() {
            s.set_clear_color(rgba);
        }
    }

    fn set_vsync(&mut self, policy: VsyncPolicy) -> bool {
        let changed = self.config.vsync != policy;
        self.config.vsync = policy;
        if let Some(s) = self.scheduler.as_mut() {
            s.set_vsync(policy);
        }
        changed && self.scheduler.is_some()
    }

    /// Idempotent. The instance itself goes when the engine is dropped.
    fn shutdown(&mut self) {
        if let (Some(mut s), Some(d)) = (self.scheduler.take(), self.context.device()) {
            s.shutdown(d);
        }
        if let Some(surface) = self.surface.take() {
            self.context.destroy_surface(surface);
            info!("engine shut down");
        }
    }
}

impl Drop for VkEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
