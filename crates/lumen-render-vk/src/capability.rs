// SPDX-License-Identifier: CEPL-1.0
//! Setup-time bookkeeping of the optional layers and extensions the caller
//! asks for. The result is a plain value handed to the core context; nothing
//! here is global.
use std::ffi::CStr;

use ash::vk;
use tracing::{info, warn};

use crate::catalog;
use crate::error::CapabilityError;

/// What the installed loader/ICDs offer at instance level.
#[derive(Clone, Debug, Default)]
pub struct RuntimeSupport {
    pub layers: Vec<String>,
    pub instance_extensions: Vec<String>,
}

impl RuntimeSupport {
    /// Queries the loader the engine links against.
    pub fn probe() -> Result<Self, vk::Result> {
        Self::query(&ash::Entry::linked())
    }

    pub fn query(entry: &ash::Entry) -> Result<Self, vk::Result> {
        // SAFETY: entry holds loaded global-level function pointers.
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let exts = unsafe { entry.enumerate_instance_extension_properties(None)? };
        Ok(RuntimeSupport {
            layers: layers
                .iter()
                .map(|l| fixed_cstr(&l.layer_name))
                .collect(),
            instance_extensions: exts
                .iter()
                .map(|e| fixed_cstr(&e.extension_name))
                .collect(),
        })
    }
}

pub(crate) fn fixed_cstr(raw: &[std::ffi::c_char]) -> String {
    // SAFETY: the driver fills these fixed arrays with a NUL-terminated string.
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// The frozen outcome of registration, consumed once by `CoreContext`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnabledCapabilities {
    pub layers: Vec<String>,
    pub instance_extensions: Vec<String>,
    /// Validated later against the chosen physical device.
    pub device_extensions: Vec<String>,
}

impl EnabledCapabilities {
    pub fn has_instance_extension(&self, name: &str) -> bool {
        self.instance_extensions.iter().any(|e| e == name)
    }
}

#[derive(Debug)]
pub struct CapabilityRegistry {
    runtime: RuntimeSupport,
    enabled: EnabledCapabilities,
}

impl CapabilityRegistry {
    pub fn new(runtime: RuntimeSupport) -> Self {
        CapabilityRegistry {
            runtime,
            enabled: EnabledCapabilities::default(),
        }
    }

    /// Rejections are logged and leave the registry untouched; the caller may
    /// ignore the error.
    pub fn enable_layer(&mut self, name: &str) -> Result<(), CapabilityError> {
        let r = admit(
            "layer",
            name,
            catalog::LAYERS,
            Some(self.runtime.layers.as_slice()),
            &self.enabled.layers,
        );
        self.commit(r, name, |e| &mut e.layers)
    }

    pub fn enable_instance_extension(&mut self, name: &str) -> Result<(), CapabilityError> {
        let r = admit(
            "instance extension",
            name,
            catalog::INSTANCE_EXTENSIONS,
            Some(self.runtime.instance_extensions.as_slice()),
            &self.enabled.instance_extensions,
        );
        self.commit(r, name, |e| &mut e.instance_extensions)
    }

    pub fn enable_device_extension(&mut self, name: &str) -> Result<(), CapabilityError> {
        let r = admit(
            "device extension",
            name,
            catalog::DEVICE_EXTENSIONS,
            None,
            &self.enabled.device_extensions,
        );
        self.commit(r, name, |e| &mut e.device_extensions)
    }

    pub fn enabled(&self) -> &EnabledCapabilities {
        &self.enabled
    }

    pub fn finish(self) -> EnabledCapabilities {
        self.enabled
    }

    fn commit(
        &mut self,
        r: Result<(), CapabilityError>,
        name: &str,
        list: impl FnOnce(&mut EnabledCapabilities) -> &mut Vec<String>,
    ) -> Result<(), CapabilityError> {
        match r {
            Ok(()) => {
                info!("capability enabled: {name}");
                list(&mut self.enabled).push(name.to_owned());
                Ok(())
            }
            Err(e) => {
                warn!("capability ignored: {e}");
                Err(e)
            }
        }
    }
}

fn admit(
    kind: &'static str,
    name: &str,
    known: &[&str],
    runtime: Option<&[String]>,
    already: &[String],
) -> Result<(), CapabilityError> {
    if !catalog::is_known(known, name) {
        return Err(CapabilityError::Unknown {
            kind,
            name: name.to_owned(),
        });
    }
    if already.iter().any(|n| n == name) {
        return Err(CapabilityError::Duplicate {
            kind,
            name: name.to_owned(),
        });
    }
    if let Some(runtime) = runtime {
        if !runtime.iter().any(|n| n == name) {
            return Err(CapabilityError::Unsupported {
                kind,
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(RuntimeSupport {
            layers: vec!["VK_LAYER_KHRONOS_validation".into()],
            instance_extensions: vec!["VK_KHR_surface".into(), "VK_EXT_debug_utils".into()],
        })
    }

    #[test]
    fn known_and_supported_layer_is_enabled() {
        let mut r = registry();
        assert_eq!(r.enable_layer("VK_LAYER_KHRONOS_validation"), Ok(()));
        assert_eq!(r.enabled().layers, vec!["VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn unknown_name_is_rejected_without_side_effects() {
        let mut r = registry();
        assert!(matches!(
            r.enable_layer("VK_LAYER_made_up"),
            Err(CapabilityError::Unknown { .. })
        ));
        assert!(matches!(
            r.enable_instance_extension("VK_KHR_swapchain"),
            Err(CapabilityError::Unknown { .. })
        ));
        assert_eq!(r.finish(), EnabledCapabilities::default());
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut r = registry();
        r.enable_instance_extension("VK_EXT_debug_utils").unwrap();
        assert!(matches!(
            r.enable_instance_extension("VK_EXT_debug_utils"),
            Err(CapabilityError::Duplicate { .. })
        ));
        assert_eq!(r.enabled().instance_extensions.len(), 1);
    }

    #[test]
    fn known_but_unsupported_layer_is_a_no_op() {
        let mut r = registry();
        assert!(matches!(
            r.enable_layer("VK_LAYER_LUNARG_api_dump"),
            Err(CapabilityError::Unsupported { .. })
        ));
        assert!(r.enabled().layers.is_empty());
    }

    #[test]
    fn device_extensions_are_queued_without_runtime_check() {
        let mut r = registry();
        assert_eq!(r.enable_device_extension("VK_EXT_hdr_metadata"), Ok(()));
        assert!(matches!(
            r.enable_device_extension("VK_EXT_hdr_metadata"),
            Err(CapabilityError::Duplicate { .. })
        ));
        let caps = r.finish();
        assert_eq!(caps.device_extensions, vec!["VK_EXT_hdr_metadata"]);
    }
}
