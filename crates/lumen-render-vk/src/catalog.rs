// SPDX-License-Identifier: CEPL-1.0
//! Names the capability registry will accept. Anything outside these lists is
//! almost certainly a typo, so it is rejected before it reaches the loader.

pub(crate) const LAYERS: &[&str] = &[
    "VK_LAYER_KHRONOS_validation",
    "VK_LAYER_KHRONOS_synchronization2",
    "VK_LAYER_KHRONOS_shader_object",
    "VK_LAYER_KHRONOS_profiles",
    "VK_LAYER_LUNARG_api_dump",
    "VK_LAYER_LUNARG_monitor",
    "VK_LAYER_LUNARG_screenshot",
    "VK_LAYER_LUNARG_gfxreconstruct",
    "VK_LAYER_LUNARG_crash_diagnostic",
    "VK_LAYER_MESA_overlay",
    "VK_LAYER_MESA_device_select",
    "VK_LAYER_RENDERDOC_Capture",
    "VK_LAYER_NV_optimus",
    "VK_LAYER_AMD_switchable_graphics",
    "VK_LAYER_VALVE_steam_overlay",
    "VK_LAYER_VALVE_steam_fossilize",
    "VK_LAYER_OBS_HOOK",
];

pub(crate) const INSTANCE_EXTENSIONS: &[&str] = &[
    "VK_KHR_surface",
    "VK_KHR_win32_surface",
    "VK_KHR_xlib_surface",
    "VK_KHR_xcb_surface",
    "VK_KHR_wayland_surface",
    "VK_KHR_android_surface",
    "VK_KHR_display",
    "VK_KHR_get_display_properties2",
    "VK_KHR_get_physical_device_properties2",
    "VK_KHR_get_surface_capabilities2",
    "VK_KHR_device_group_creation",
    "VK_KHR_external_fence_capabilities",
    "VK_KHR_external_memory_capabilities",
    "VK_KHR_external_semaphore_capabilities",
    "VK_KHR_portability_enumeration",
    "VK_KHR_surface_protected_capabilities",
    "VK_EXT_debug_utils",
    "VK_EXT_debug_report",
    "VK_EXT_validation_features",
    "VK_EXT_validation_flags",
    "VK_EXT_layer_settings",
    "VK_EXT_swapchain_colorspace",
    "VK_EXT_surface_maintenance1",
    "VK_EXT_headless_surface",
    "VK_EXT_metal_surface",
    "VK_EXT_acquire_xlib_display",
    "VK_EXT_direct_mode_display",
    "VK_EXT_display_surface_counter",
    "VK_MVK_macos_surface",
    "VK_MVK_ios_surface",
];

pub(crate) const DEVICE_EXTENSIONS: &[&str] = &[
    "VK_KHR_swapchain",
    "VK_KHR_swapchain_mutable_format",
    "VK_KHR_incremental_present",
    "VK_KHR_present_id",
    "VK_KHR_present_wait",
    "VK_KHR_maintenance1",
    "VK_KHR_maintenance2",
    "VK_KHR_maintenance3",
    "VK_KHR_maintenance4",
    "VK_KHR_maintenance5",
    "VK_KHR_dynamic_rendering",
    "VK_KHR_synchronization2",
    "VK_KHR_timeline_semaphore",
    "VK_KHR_create_renderpass2",
    "VK_KHR_imageless_framebuffer",
    "VK_KHR_push_descriptor",
    "VK_KHR_descriptor_update_template",
    "VK_KHR_dedicated_allocation",
    "VK_KHR_get_memory_requirements2",
    "VK_KHR_bind_memory2",
    "VK_KHR_buffer_device_address",
    "VK_KHR_shader_draw_parameters",
    "VK_KHR_shader_float16_int8",
    "VK_KHR_shader_non_semantic_info",
    "VK_KHR_storage_buffer_storage_class",
    "VK_KHR_16bit_storage",
    "VK_KHR_8bit_storage",
    "VK_KHR_multiview",
    "VK_KHR_sampler_mirror_clamp_to_edge",
    "VK_KHR_sampler_ycbcr_conversion",
    "VK_KHR_draw_indirect_count",
    "VK_KHR_depth_stencil_resolve",
    "VK_KHR_driver_properties",
    "VK_KHR_external_memory",
    "VK_KHR_external_memory_fd",
    "VK_KHR_external_memory_win32",
    "VK_KHR_external_semaphore",
    "VK_KHR_external_semaphore_fd",
    "VK_KHR_external_semaphore_win32",
    "VK_KHR_external_fence",
    "VK_KHR_external_fence_fd",
    "VK_KHR_external_fence_win32",
    "VK_KHR_portability_subset",
    "VK_KHR_pipeline_library",
    "VK_KHR_acceleration_structure",
    "VK_KHR_ray_tracing_pipeline",
    "VK_KHR_ray_query",
    "VK_KHR_deferred_host_operations",
    "VK_KHR_fragment_shading_rate",
    "VK_EXT_descriptor_indexing",
    "VK_EXT_hdr_metadata",
    "VK_EXT_memory_budget",
    "VK_EXT_memory_priority",
    "VK_EXT_extended_dynamic_state",
    "VK_EXT_extended_dynamic_state2",
    "VK_EXT_extended_dynamic_state3",
    "VK_EXT_swapchain_maintenance1",
    "VK_EXT_full_screen_exclusive",
    "VK_EXT_robustness2",
    "VK_EXT_scalar_block_layout",
    "VK_EXT_shader_object",
    "VK_EXT_mesh_shader",
    "VK_EXT_conservative_rasterization",
    "VK_EXT_line_rasterization",
    "VK_EXT_vertex_input_dynamic_state",
    "VK_EXT_pipeline_creation_cache_control",
    "VK_EXT_calibrated_timestamps",
    "VK_EXT_host_query_reset",
    "VK_EXT_index_type_uint8",
    "VK_EXT_sampler_filter_minmax",
    "VK_EXT_separate_stencil_usage",
    "VK_EXT_subgroup_size_control",
    "VK_EXT_texel_buffer_alignment",
    "VK_EXT_pci_bus_info",
    "VK_AMD_device_coherent_memory",
    "VK_AMD_shader_info",
    "VK_NV_device_diagnostic_checkpoints",
    "VK_NV_device_diagnostics_config",
];

pub(crate) fn is_known(list: &[&str], name: &str) -> bool {
    list.iter().any(|&n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalogs_have_no_duplicates() {
        for list in [LAYERS, INSTANCE_EXTENSIONS, DEVICE_EXTENSIONS] {
            let set: HashSet<_> = list.iter().collect();
            assert_eq!(set.len(), list.len());
        }
    }

    #[test]
    fn swapchain_and_validation_are_known() {
        assert!(is_known(DEVICE_EXTENSIONS, "VK_KHR_swapchain"));
        assert!(is_known(LAYERS, "VK_LAYER_KHRONOS_validation"));
        assert!(!is_known(INSTANCE_EXTENSIONS, "VK_KHR_swapchain"));
    }
}
