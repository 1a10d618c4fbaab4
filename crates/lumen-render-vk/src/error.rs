// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("`{name}` is not a known {kind}")]
    Unknown { kind: &'static str, name: String },

    #[error("{kind} `{name}` is already enabled")]
    Duplicate { kind: &'static str, name: String },

    #[error("{kind} `{name}` is not supported by the installed runtime")]
    Unsupported { kind: &'static str, name: String },
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no physical devices were enumerated")]
    NoDevices,

    #[error("no physical device offers graphics+present with the required extensions")]
    NoSuitableDevice,

    #[error("vulkan error enumerating physical devices: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("`{0}` contains an interior NUL and cannot be passed to the driver")]
    InvalidName(String),

    #[error("instance was created without `{0}`, which this window system needs")]
    MissingSurfaceExtension(String),

    #[error("window handle unavailable: {0}")]
    Window(#[from] raw_window_handle::HandleError),

    #[error("vulkan error during {stage}: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("a graphics instance already exists in this process")]
    AlreadyInitialised,

    #[error("a surface is already attached")]
    SurfaceAlreadyAttached,

    #[error("no surface is attached")]
    NoSurface,

    #[error(transparent)]
    Swapchain(#[from] SwapchainError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl SetupError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> SetupError {
        move |result| SetupError::Vulkan { stage, result }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{what} is VK_NULL_HANDLE")]
pub struct HandleError {
    pub what: &'static str,
}

#[derive(Debug, Error)]
pub enum SwapchainError {
    #[error("surface reported no formats")]
    NoSurfaceFormats,

    #[error("surface extent is 0x0")]
    ZeroExtent,

    #[error("vulkan error during {stage}: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),
}

impl SwapchainError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> SwapchainError {
        move |result| SwapchainError::Vulkan { stage, result }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("vulkan error creating {what}: {result}")]
    Create {
        what: &'static str,
        result: vk::Result,
    },

    #[error("vulkan error waiting on {what}: {result}")]
    Wait {
        what: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("vulkan error during {stage}: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error("image index {index} out of range ({count} framebuffers)")]
    ImageOutOfRange { index: u32, count: usize },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    PushConstant(#[from] PushConstantError),
}

impl RecordError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> RecordError {
        move |result| RecordError::Vulkan { stage, result }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("shader blob for {stage:?} is not valid SPIR-V: {reason}")]
    InvalidSpirv {
        stage: vk::ShaderStageFlags,
        reason: String,
    },

    #[error("push constant range {offset}+{size} exceeds the device limit of {limit} bytes")]
    PushRangeTooLarge { offset: u32, size: u32, limit: u32 },

    #[error("no pipeline registered under {0:?}")]
    UnknownPipeline(crate::pipeline::PipelineId),

    #[error("pipeline {0:?} does not accept push constants")]
    NoPushConstants(crate::pipeline::PipelineId),

    #[error("no render pass to build against; the surface is detached")]
    Detached,

    #[error("vulkan error during {stage}: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    PushConstant(#[from] PushConstantError),
}

impl PipelineError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> PipelineError {
        move |result| PipelineError::Vulkan { stage, result }
    }
}

/// A failed step inside one render tick.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no swapchain is attached")]
    Detached,

    #[error("no image is acquired for this frame")]
    NothingAcquired,

    #[error("vulkan error during {stage}: {result}")]
    Vulkan {
        stage: &'static str,
        result: vk::Result,
    },

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error(transparent)]
    Record(#[from] RecordError),
}

impl FrameError {
    pub(crate) fn vk(stage: &'static str) -> impl FnOnce(vk::Result) -> FrameError {
        move |result| FrameError::Vulkan { stage, result }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushConstantError {
    #[error("push constant offset {0} is not 4-byte aligned")]
    Misaligned(u32),

    #[error("push constant write {offset}+{size} exceeds {limit} bytes")]
    OutOfBounds { offset: u32, size: u32, limit: u32 },

    #[error("no push constant range for {stages:?} covers {offset}+{size}")]
    NotCovered {
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    },
}
