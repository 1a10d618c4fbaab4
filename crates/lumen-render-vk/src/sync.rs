// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use lumen_render::FramesInFlight;
use tracing::{debug, warn};

use crate::driver::{Driver, FrameSlotId, ImageIndex};
use crate::error::SyncError;

/// Per frame-in-flight: the semaphore acquire signals and the fence the
/// frame's submit signals.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSync {
    pub acquire: vk::Semaphore,
    pub fence: vk::Fence,
}

fn create(what: &'static str) -> impl FnOnce(vk::Result) -> SyncError {
    move |result| SyncError::Create { what, result }
}

/// Fences and semaphores for every frame slot and every swapchain image.
///
/// `image_owner[i]` names the frame slot whose fence last guarded writes to
/// image `i`; a different slot acquiring that image must wait on it first.
#[derive(Debug, Default)]
pub struct SyncPool {
    frames: Vec<FrameSync>,
    present: Vec<vk::Semaphore>,
    image_owner: Vec<Option<FrameSlotId>>,
}

impl SyncPool {
    /// Fences start signaled so the first wait on each slot returns at once.
    pub fn new(
        driver: &dyn Driver,
        frames: FramesInFlight,
        image_count: usize,
    ) -> Result<Self, SyncError> {
        let mut pool = SyncPool {
            frames: vec![FrameSync::default(); frames.as_usize()],
            present: vec![vk::Semaphore::null(); image_count],
            image_owner: vec![None; image_count],
        };
        if let Err(e) = pool.populate(driver) {
            pool.destroy(driver);
            return Err(e);
        }
        debug!(
            "sync pool: {} frame slots, {} image slots",
            pool.frames.len(),
            pool.present.len()
        );
        Ok(pool)
    }

    fn populate(&mut self, driver: &dyn Driver) -> Result<(), SyncError> {
        for f in &mut self.frames {
            f.acquire = driver.create_semaphore().map_err(create("acquire semaphore"))?;
            f.fence = driver.create_fence(true).map_err(create("frame fence"))?;
        }
        for s in &mut self.present {
            *s = driver.create_semaphore().map_err(create("present semaphore"))?;
        }
        Ok(())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn image_count(&self) -> usize {
        self.present.len()
    }

    pub fn frame(&self, slot: FrameSlotId) -> FrameSync {
        self.frames[slot.0]
    }

    pub fn present_semaphore(&self, image: ImageIndex) -> vk::Semaphore {
        self.present[image.as_usize()]
    }

    pub fn owner(&self, image: ImageIndex) -> Option<FrameSlotId> {
        self.image_owner.get(image.as_usize()).copied().flatten()
    }

    pub fn claim(&mut self, image: ImageIndex, slot: FrameSlotId) {
        if let Some(o) = self.image_owner.get_mut(image.as_usize()) {
            *o = Some(slot);
        }
    }

    pub fn release(&mut self, image: ImageIndex) {
        if let Some(o) = self.image_owner.get_mut(image.as_usize()) {
            *o = None;
        }
    }

    /// Waits for the device to go idle, then destroys whatever was created.
    /// Safe on a partially built or already destroyed pool.
    pub fn destroy(&mut self, driver: &dyn Driver) {
        if let Err(e) = driver.device_wait_idle() {
            warn!("device_wait_idle before sync teardown failed: {e}");
        }
        for f in self.frames.drain(..) {
            if f.fence != vk::Fence::null() {
                driver.destroy_fence(f.fence);
            }
            if f.acquire != vk::Semaphore::null() {
                driver.destroy_semaphore(f.acquire);
            }
        }
        for s in self.present.drain(..) {
            if s != vk::Semaphore::null() {
                driver.destroy_semaphore(s);
            }
        }
        self.image_owner.clear();
    }
}
