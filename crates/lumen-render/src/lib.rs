// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How presented images reach the display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsyncPolicy {
    /// Wait for vertical blank; always available.
    #[default]
    On,
    /// Tear freely; falls back to `On` when the driver can't.
    Off,
    /// Newest-frame-wins queue; falls back to `On` when the driver can't.
    TripleBuffering,
}

impl fmt::Display for VsyncPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VsyncPolicy::On => "on",
            VsyncPolicy::Off => "off",
            VsyncPolicy::TripleBuffering => "triple_buffering",
        })
    }
}

#[derive(Debug, Error)]
#[error("unknown vsync policy `{0}` (expected on | off | triple_buffering)")]
pub struct UnknownVsyncPolicy(String);

impl FromStr for VsyncPolicy {
    type Err = UnknownVsyncPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "fifo" => Ok(VsyncPolicy::On),
            "off" | "immediate" => Ok(VsyncPolicy::Off),
            "triple_buffering" | "triple" | "mailbox" => Ok(VsyncPolicy::TripleBuffering),
            _ => Err(UnknownVsyncPolicy(s.to_owned())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("frames in flight must be 2 or 3, got {0}")]
pub struct InvalidFramesInFlight(pub u32);

/// Number of frames the CPU may record ahead of the GPU. Fixed for the
/// lifetime of a renderer; only 2 and 3 are meaningful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u32")]
pub struct FramesInFlight(u32);

impl FramesInFlight {
    pub const DOUBLE: FramesInFlight = FramesInFlight(2);
    pub const TRIPLE: FramesInFlight = FramesInFlight(3);

    pub fn new(n: u32) -> Result<Self, InvalidFramesInFlight> {
        match n {
            2 | 3 => Ok(FramesInFlight(n)),
            other => Err(InvalidFramesInFlight(other)),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Default for FramesInFlight {
    fn default() -> Self {
        FramesInFlight::DOUBLE
    }
}

impl TryFrom<u32> for FramesInFlight {
    type Error = InvalidFramesInFlight;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        FramesInFlight::new(n)
    }
}

impl FromStr for FramesInFlight {
    type Err = InvalidFramesInFlight;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s.trim().parse::<u32>().map_err(|_| InvalidFramesInFlight(0))?;
        FramesInFlight::new(n)
    }
}

/// Outcome of one render tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickResult {
    Ok,
    /// The swapchain no longer matches the surface; call `hard_reset`.
    ResizeNeeded,
    /// Anything else. Treated as fatal by convention.
    Error,
}

pub trait Renderer {
    fn attach_surface(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<()>;

    fn update(&mut self) -> TickResult;
    fn hard_reset(&mut self, size: RenderSize) -> Result<()>;
    /// Abandons a frame that was acquired but not presented, handing the
    /// image back without drawing to it. No-op when no frame is open.
    fn soft_reset(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _policy: VsyncPolicy) -> bool {
        false
    }
    fn shutdown(&mut self);
}
