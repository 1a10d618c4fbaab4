// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_render::FramesInFlight;

use crate::driver::{ensure_live, Driver, FrameSlotId, ImageIndex};
use crate::error::RecordError;
use crate::pipeline::PipelineRegistry;
use crate::swapchain::Swapchain;

/// What a pipeline sees while it records: the open command buffer and the
/// target it is drawing into.
pub struct CommandContext<'a> {
    driver: &'a dyn Driver,
    cmd: vk::CommandBuffer,
    extent: vk::Extent2D,
    frame: FrameSlotId,
    image: ImageIndex,
}

impl<'a> CommandContext<'a> {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn frame(&self) -> FrameSlotId {
        self.frame
    }

    pub fn image(&self) -> ImageIndex {
        self.image
    }

    /// Binds and sets viewport/scissor to the whole target, so pipelines
    /// survive a resize untouched.
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) -> Result<(), RecordError> {
        let pipeline = ensure_live(pipeline, "pipeline")?;
        self.driver.cmd_bind_pipeline(self.cmd, pipeline);
        self.driver.cmd_set_viewport(
            self.cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.extent.width as f32,
                height: self.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.driver.cmd_set_scissor(
            self.cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
        );
        Ok(())
    }

    pub fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), RecordError> {
        let layout = ensure_live(layout, "pipeline layout")?;
        self.driver
            .cmd_push_constants(self.cmd, layout, stages, offset, bytes);
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.driver
            .cmd_draw(self.cmd, vertex_count, instance_count, 0, 0);
    }

    #[cfg(test)]
    pub(crate) fn for_tests(driver: &'a dyn Driver, extent: vk::Extent2D) -> Self {
        use ash::vk::Handle;
        CommandContext {
            driver,
            cmd: vk::CommandBuffer::from_raw(0xc0),
            extent,
            frame: FrameSlotId(0),
            image: ImageIndex(0),
        }
    }
}

/// One command pool and one primary buffer per frame slot. Buffers are
/// re-recorded from scratch every tick.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandRecorder {
    pub fn new(driver: &dyn Driver, frames: FramesInFlight) -> Result<Self, RecordError> {
        let pool = driver
            .create_command_pool()
            .map_err(RecordError::vk("command pool creation"))?;
        match driver.allocate_command_buffers(pool, frames.get()) {
            Ok(buffers) => Ok(CommandRecorder { pool, buffers }),
            Err(e) => {
                driver.destroy_command_pool(pool);
                Err(RecordError::vk("command buffer allocation")(e))
            }
        }
    }

    pub fn buffer(&self, slot: FrameSlotId) -> vk::CommandBuffer {
        self.buffers
            .get(slot.0)
            .copied()
            .unwrap_or(vk::CommandBuffer::null())
    }

    /// Reset, begin, one render pass over `image` with every pipeline in
    /// registration order, end.
    pub fn record(
        &self,
        driver: &dyn Driver,
        slot: FrameSlotId,
        target: &Swapchain,
        image: ImageIndex,
        clear: [f32; 4],
        pipelines: &PipelineRegistry,
    ) -> Result<(), RecordError> {
        let cmd = ensure_live(self.buffer(slot), "command buffer")?;
        let render_pass = ensure_live(target.render_pass(), "render pass")?;
        let framebuffer = ensure_live(target.framebuffer(image)?, "framebuffer")?;
        let extent = target.extent;

        driver
            .reset_command_buffer(cmd)
            .map_err(RecordError::vk("command buffer reset"))?;
        driver
            .begin_command_buffer(cmd)
            .map_err(RecordError::vk("command buffer begin"))?;
        driver.cmd_begin_render_pass(cmd, render_pass, framebuffer, extent, clear);

        let mut ctx = CommandContext {
            driver,
            cmd,
            extent,
            frame: slot,
            image,
        };
        let drawn = pipelines.record_all(&mut ctx);

        // Close the pass either way so the buffer is left in a sane state.
        driver.cmd_end_render_pass(cmd);
        drawn?;
        driver
            .end_command_buffer(cmd)
            .map_err(RecordError::vk("command buffer end"))
    }

    /// Frees the buffers along with the pool. The caller guarantees none of
    /// them are pending.
    pub fn destroy(&mut self, driver: &dyn Driver) {
        self.buffers.clear();
        if self.pool != vk::CommandPool::null() {
            driver.destroy_command_pool(self.pool);
            self.pool = vk::CommandPool::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::PresentModePolicy;
    use crate::testing::{Cmd, FakeDriver};
    use ash::vk::Handle;
    use lumen_render::{RenderSize, VsyncPolicy};

    fn extent() -> vk::Extent2D {
        vk::Extent2D {
            width: 320,
            height: 200,
        }
    }

    #[test]
    fn one_buffer_per_frame_slot() {
        let fake = FakeDriver::new(2, 3, extent());
        let mut rec = CommandRecorder::new(&fake, FramesInFlight::TRIPLE).unwrap();
        assert_eq!(rec.buffers.len(), 3);
        assert_ne!(rec.buffer(FrameSlotId(2)), vk::CommandBuffer::null());
        assert_eq!(rec.buffer(FrameSlotId(3)), vk::CommandBuffer::null());
        rec.destroy(&fake);
        assert_eq!(fake.live_total(), 0);
    }

    fn swapchain(fake: &FakeDriver) -> Swapchain {
        Swapchain::build(
            fake,
            FakeDriver::surface(),
            RenderSize {
                width: 320,
                height: 200,
            },
            VsyncPolicy::On,
            &mut PresentModePolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn empty_registry_records_a_clear_only_pass() {
        let fake = FakeDriver::new(2, 3, extent());
        let mut sc = swapchain(&fake);
        let mut rec = CommandRecorder::new(&fake, FramesInFlight::DOUBLE).unwrap();
        rec.record(
            &fake,
            FrameSlotId(0),
            &sc,
            ImageIndex(1),
            [0.1, 0.2, 0.3, 1.0],
            &PipelineRegistry::default(),
        )
        .unwrap();
        let fb = sc.framebuffer(ImageIndex(1)).unwrap();
        let cmds = fake.commands();
        assert_eq!(cmds.len(), 2);
        assert!(matches!(
            cmds[0],
            Cmd::BeginRenderPass { framebuffer, clear, extent: e }
                if framebuffer == fb && clear == [0.1, 0.2, 0.3, 1.0] && e.width == 320
        ));
        assert!(matches!(cmds[1], Cmd::EndRenderPass));
        rec.destroy(&fake);
        sc.destroy(&fake);
        assert_eq!(fake.live_total(), 0);
    }

    #[test]
    fn out_of_range_image_aborts_recording() {
        let fake = FakeDriver::new(2, 3, extent());
        let mut sc = swapchain(&fake);
        let mut rec = CommandRecorder::new(&fake, FramesInFlight::DOUBLE).unwrap();
        let r = rec.record(
            &fake,
            FrameSlotId(1),
            &sc,
            ImageIndex(7),
            [0.0; 4],
            &PipelineRegistry::default(),
        );
        assert!(matches!(
            r,
            Err(RecordError::ImageOutOfRange { index: 7, count: 3 })
        ));
        assert!(fake.commands().is_empty());
        rec.destroy(&fake);
        sc.destroy(&fake);
    }

    #[test]
    fn bind_sets_full_target_viewport_and_scissor() {
        let fake = FakeDriver::new(2, 3, extent());
        let mut ctx = CommandContext {
            driver: &fake,
            cmd: vk::CommandBuffer::from_raw(9),
            extent: extent(),
            frame: FrameSlotId(0),
            image: ImageIndex(0),
        };
        ctx.bind_pipeline(vk::Pipeline::from_raw(3)).unwrap();
        assert!(ctx.bind_pipeline(vk::Pipeline::null()).is_err());
        let vp = fake.viewports();
        assert_eq!(vp.len(), 1);
        assert_eq!((vp[0].width, vp[0].height), (320.0, 200.0));
        assert!(matches!(
            fake.commands()[2],
            Cmd::Scissor(r) if r.extent.width == 320 && r.extent.height == 200
        ));
    }
}
