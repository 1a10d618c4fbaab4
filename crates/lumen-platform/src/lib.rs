// SPDX-License-Identifier: CEPL-1.0
//! Windowing lives outside the engine; hosts reach winit through here so the
//! version is pinned in one place.
pub use winit;
