// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use lumen_render::{FramesInFlight, VsyncPolicy};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: VsyncPolicy,
    pub frames_in_flight: FramesInFlight,
    pub layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub device_extensions: Vec<String>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: VsyncPolicy::On,
            frames_in_flight: FramesInFlight::DOUBLE,
            layers: Vec::new(),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

/// A broken file is never fatal: warn and run with defaults.
pub fn parse_or_default(text: &str, origin: &str) -> AppCfg {
    match toml::from_str::<AppCfg>(text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{origin}: {e}; using defaults");
            AppCfg::default()
        }
    }
}

pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_or_default(&s, &path.display().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}
