// SPDX-License-Identifier: CEPL-1.0
//! Instance, surfaces and the logical device.
//!
//! STRICT ORDER:
//! 1) VkInstance at initialise (layers + instance extensions frozen here)
//! 2) VkSurfaceKHR from THIS instance when a window is attached
//! 3) Physical device picked AGAINST that surface (present support)
//! 4) VkDevice with the swapchain extension + queued device extensions
//! Teardown runs the list backwards.
use std::ffi::{c_char, c_void, CStr, CString};
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, trace, warn, Level};

use crate::capability::{EnabledCapabilities, RuntimeSupport};
use crate::device::{self, SelectedDevice};
use crate::driver::{
    DeviceLimits, Driver, GraphicsPipelineRequest, ImageIndex, SubmitRequest, SurfaceSupport,
    SwapchainRequest,
};
use crate::error::SetupError;

/// One instance per process.
static INSTANCE_LIVE: AtomicBool = AtomicBool::new(false);

const ENGINE_NAME: &CStr = c"lumen";
const SURFACE_EXTENSION: &str = "VK_KHR_surface";
const SWAPCHAIN_EXTENSION: &str = "VK_KHR_swapchain";
const DEBUG_UTILS_EXTENSION: &str = "VK_EXT_debug_utils";

/// Window-system surface extensions. Whichever the runtime offers are
/// enabled up front, since the display handle is unknown until attach.
const PLATFORM_SURFACE_EXTENSIONS: &[&str] = &[
    "VK_KHR_win32_surface",
    "VK_KHR_xlib_surface",
    "VK_KHR_xcb_surface",
    "VK_KHR_wayland_surface",
    "VK_KHR_android_surface",
    "VK_EXT_metal_surface",
];

/// The instance extension list actually passed to the driver.
fn instance_extensions(caps: &EnabledCapabilities, runtime: &RuntimeSupport) -> Vec<String> {
    let mut out: Vec<String> = vec![SURFACE_EXTENSION.to_owned()];
    let platform = PLATFORM_SURFACE_EXTENSIONS
        .iter()
        .filter(|&&p| runtime.instance_extensions.iter().any(|e| e == p))
        .map(|&p| p.to_owned());
    for name in platform.chain(caps.instance_extensions.iter().cloned()) {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn c_names(names: &[String]) -> Result<Vec<CString>, SetupError> {
    names
        .iter()
        .map(|n| CString::new(n.as_str()).map_err(|_| SetupError::InvalidName(n.clone())))
        .collect()
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the driver hands us a valid callback struct for the duration
    // of the call; p_message is NUL-terminated when non-null.
    let msg = unsafe {
        let p = (*data).p_message;
        if p.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(p).to_string_lossy()
    };
    let level = severity_level(severity);
    if level == Level::ERROR {
        error!("[vulkan {types:?}] {msg}");
    } else if level == Level::WARN {
        warn!("[vulkan {types:?}] {msg}");
    } else if level == Level::DEBUG {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// The logical device and the one graphics queue the engine uses. This is
/// what the frame engine drives through [`Driver`].
pub struct LogicalDevice {
    phys: vk::PhysicalDevice,
    name: String,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    surface_loader: surface::Instance,
    swapchain_loader: swapchain::Device,
    limits: DeviceLimits,
    extensions: Vec<String>,
}

impl LogicalDevice {
    fn create(
        instance: &ash::Instance,
        surface_loader: &surface::Instance,
        chosen: SelectedDevice,
        extensions: Vec<String>,
    ) -> Result<Self, SetupError> {
        let priorities = [1.0_f32];
        let qinfo = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: chosen.queue_family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        };

        let names = c_names(&extensions)?;
        let ptrs: Vec<*const c_char> = names.iter().map(|n| n.as_ptr()).collect();
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: 1,
            p_queue_create_infos: &qinfo,
            enabled_extension_count: ptrs.len() as u32,
            pp_enabled_extension_names: ptrs.as_ptr(),
            ..Default::default()
        };

        // SAFETY: chosen.handle was enumerated from `instance`; every pointer
        // in dinfo outlives the call.
        let device = unsafe { instance.create_device(chosen.handle, &dinfo, None) }
            .map_err(SetupError::vk("device creation"))?;
        let queue = unsafe { device.get_device_queue(chosen.queue_family, 0) };
        let swapchain_loader = swapchain::Device::new(instance, &device);

        info!(
            "logical device on {} (queue family {}, extensions: {})",
            chosen.name,
            chosen.queue_family,
            extensions.join(", ")
        );
        Ok(LogicalDevice {
            phys: chosen.handle,
            name: chosen.name,
            device,
            queue_family: chosen.queue_family,
            queue,
            surface_loader: surface_loader.clone(),
            swapchain_loader,
            limits: chosen.limits,
            extensions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

/// Owns the instance, every surface created from it and, once a surface has
/// been attached, the logical device.
pub struct CoreContext {
    entry: Entry,
    instance: ash::Instance,
    instance_extensions: Vec<String>,
    surface_loader: surface::Instance,
    debug: Option<DebugMessenger>,
    device_extensions: Vec<String>,
    device: Option<LogicalDevice>,
    surfaces: Vec<vk::SurfaceKHR>,
}

impl CoreContext {
    /// Any failure here is fatal for the caller: there is no degraded mode.
    pub fn new(caps: EnabledCapabilities, application_name: &str) -> Result<Self, SetupError> {
        if INSTANCE_LIVE.swap(true, Ordering::AcqRel) {
            return Err(SetupError::AlreadyInitialised);
        }
        let r = Self::create(caps, application_name);
        if r.is_err() {
            INSTANCE_LIVE.store(false, Ordering::Release);
        }
        r
    }

    fn create(caps: EnabledCapabilities, application_name: &str) -> Result<Self, SetupError> {
        let entry = Entry::linked();
        let runtime =
            RuntimeSupport::query(&entry).map_err(SetupError::vk("instance capability query"))?;
        let extensions = instance_extensions(&caps, &runtime);
        let app = CString::new(application_name)
            .map_err(|_| SetupError::InvalidName(application_name.to_owned()))?;

        let instance = create_instance(&entry, &app, &caps.layers, &extensions)?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let debug = if extensions.iter().any(|e| e == DEBUG_UTILS_EXTENSION) {
            match create_debug_messenger(&entry, &instance) {
                Ok(d) => Some(d),
                Err(e) => {
                    // SAFETY: nothing else was created from the instance yet.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            "vulkan instance ready (layers: [{}], extensions: [{}])",
            caps.layers.join(", "),
            extensions.join(", ")
        );
        Ok(CoreContext {
            entry,
            instance,
            instance_extensions: extensions,
            surface_loader,
            debug,
            device_extensions: caps.device_extensions,
            device: None,
            surfaces: Vec::new(),
        })
    }

    pub fn instance_extensions(&self) -> &[String] {
        &self.instance_extensions
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug.is_some()
    }

    pub fn create_surface(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<vk::SurfaceKHR, SetupError> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        let required = ash_window::enumerate_required_extensions(dh)
            .map_err(SetupError::vk("surface extension query"))?;
        for &ptr in required {
            // SAFETY: ash-window returns pointers to static NUL-terminated names.
            let name = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
            if !self.instance_extensions.iter().any(|e| *e == name) {
                return Err(SetupError::MissingSurfaceExtension(name.into_owned()));
            }
        }

        // SAFETY: the handles come from a live window; the instance carries
        // the extensions checked above.
        let surface =
            unsafe { ash_window::create_surface(&self.entry, &self.instance, dh, wh, None) }
                .map_err(SetupError::vk("surface creation"))?;
        self.surfaces.push(surface);
        debug!("surface created");
        Ok(surface)
    }

    /// The caller guarantees nothing built on the surface is still alive.
    pub fn destroy_surface(&mut self, surface: vk::SurfaceKHR) {
        if let Some(i) = self.surfaces.iter().position(|&s| s == surface) {
            self.surfaces.swap_remove(i);
            // SAFETY: created by this context and no longer referenced.
            unsafe { self.surface_loader.destroy_surface(surface, None) };
        }
    }

    /// Picks the physical device against `surface` and creates the logical
    /// device on first use. Later calls return the existing device.
    pub fn ensure_device(&mut self, surface: vk::SurfaceKHR) -> Result<&LogicalDevice, SetupError> {
        let dev = match self.device.take() {
            Some(d) => d,
            None => self.create_device(surface)?,
        };
        let dev: &LogicalDevice = self.device.insert(dev);
        Ok(dev)
    }

    fn create_device(&self, surface: vk::SurfaceKHR) -> Result<LogicalDevice, SetupError> {
        let candidates =
            device::enumerate_candidates(&self.instance, &self.surface_loader, surface)?;
        let mut required = vec![SWAPCHAIN_EXTENSION.to_owned()];
        for e in &self.device_extensions {
            if !required.contains(e) {
                required.push(e.clone());
            }
        }
        let chosen = device::select(&candidates, &required)?;
        LogicalDevice::create(&self.instance, &self.surface_loader, chosen, required)
    }

    pub fn device(&self) -> Option<&LogicalDevice> {
        self.device.as_ref()
    }
}

fn create_instance(
    entry: &Entry,
    app: &CStr,
    layers: &[String],
    extensions: &[String],
) -> Result<ash::Instance, SetupError> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let layer_names = c_names(layers)?;
    let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
    let ext_names = c_names(extensions)?;
    let ext_ptrs: Vec<*const c_char> = ext_names.iter().map(|n| n.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        ..Default::default()
    };

    // SAFETY: every pointer in create_info outlives the call.
    unsafe { entry.create_instance(&create_info, None) }
        .map_err(SetupError::vk("instance creation"))
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger, SetupError> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    // SAFETY: the instance was created with VK_EXT_debug_utils enabled.
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .map_err(SetupError::vk("debug messenger creation"))?;
    Ok(DebugMessenger { loader, messenger })
}

// STRICT TEARDOWN ORDER:
// - Device (the scheduler has already released everything built on it)
// - Surfaces AFTER device
// - Debug messenger, then instance last.
impl Drop for CoreContext {
    fn drop(&mut self) {
        // SAFETY: the handles below were created by this context and are
        // destroyed exactly once, children before parents.
        unsafe {
            if let Some(d) = self.device.take() {
                if let Err(e) = d.device.device_wait_idle() {
                    warn!("device_wait_idle before device teardown failed: {e}");
                }
                d.device.destroy_device(None);
            }
            for s in self.surfaces.drain(..) {
                self.surface_loader.destroy_surface(s, None);
            }
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        INSTANCE_LIVE.store(false, Ordering::Release);
        debug!("vulkan instance destroyed");
    }
}

// SAFETY (whole impl): every handle passed in was created from this device
// (the frame engine checks liveness with `ensure_live` first) and every
// pointer placed in a create/submit info outlives the call it is used in.
impl Driver for LogicalDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe {
            self.device
                .wait_for_fences(slice::from_ref(&fence), true, timeout_ns)
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(slice::from_ref(&fence)) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> VkResult<SurfaceSupport> {
        unsafe {
            Ok(SurfaceSupport {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(self.phys, surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(self.phys, surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(self.phys, surface)?,
            })
        }
    }

    fn create_swapchain(&self, request: &SwapchainRequest) -> VkResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: request.surface,
            min_image_count: request.image_count,
            image_format: request.format.format,
            image_color_space: request.format.color_space,
            image_extent: request.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: request.pre_transform,
            composite_alpha: request.composite_alpha,
            present_mode: request.present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn queue_submit(&self, request: &SubmitRequest) -> VkResult<()> {
        let waits = [request.wait];
        let wait_stages = [request.wait_stage];
        let signals = [request.signal];
        let cmds = [request.command_buffer];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: u32::from(request.wait != vk::Semaphore::null()),
            p_wait_semaphores: waits.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            // A null buffer makes this an empty batch.
            command_buffer_count: u32::from(request.command_buffer != vk::CommandBuffer::null()),
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: u32::from(request.signal != vk::Semaphore::null()),
            p_signal_semaphores: signals.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, slice::from_ref(&submit), request.fence)
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image: ImageIndex,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image.0,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.queue, &present) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_render_pass(&self, color_format: vk::Format) -> VkResult<vk::RenderPass> {
        // Single color attachment -> present
        let color_att = vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let att_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &att_ref,
            ..Default::default()
        };
        // The layout transition must wait for the acquire semaphore, which is
        // waited on at COLOR_ATTACHMENT_OUTPUT.
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_att,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        unsafe { self.device.create_render_pass(&info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_command_pool(&self) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: self.queue_family,
            ..Default::default()
        };
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &begin) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear: [f32; 4],
    ) {
        let clears = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear },
        }];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe {
            self.device
                .cmd_set_viewport(cmd, 0, slice::from_ref(&viewport))
        }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, slice::from_ref(&scissor)) }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        bytes: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(cmd, layout, stages, offset, bytes)
        }
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn create_shader_module(&self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(code),
            p_code: code.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_shader_module(&info, None) }
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_descriptor_set_layout(&info, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_ranges: &[vk::PushConstantRange],
    ) -> VkResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            push_constant_range_count: push_ranges.len() as u32,
            p_push_constant_ranges: push_ranges.as_ptr(),
            ..Default::default()
        };
        unsafe { self.device.create_pipeline_layout(&info, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        request: &GraphicsPipelineRequest,
    ) -> VkResult<vk::Pipeline> {
        // STRICT: the render pass color format MUST match the swapchain the
        // pipeline draws into. A format change means a rebuild.
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: request.vertex,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: request.fragment,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // Vertices come from gl_VertexIndex; no vertex buffers.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: request.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: std::ptr::null(), // dynamic
            scissor_count: 1,
            p_scissors: std::ptr::null(), // dynamic
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: request.cull_mode,
            front_face: request.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: request.layout,
            render_pass: request.render_pass,
            subpass: 0,
            ..Default::default()
        };
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, e)| e)?;
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(exts: &[&str]) -> RuntimeSupport {
        RuntimeSupport {
            layers: Vec::new(),
            instance_extensions: exts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn surface_extension_is_always_first() {
        let exts = instance_extensions(&EnabledCapabilities::default(), &runtime(&[]));
        assert_eq!(exts, vec![SURFACE_EXTENSION]);
    }

    #[test]
    fn supported_platform_surfaces_are_added() {
        let rt = runtime(&["VK_KHR_surface", "VK_KHR_xcb_surface", "VK_KHR_wayland_surface"]);
        let exts = instance_extensions(&EnabledCapabilities::default(), &rt);
        assert_eq!(
            exts,
            vec!["VK_KHR_surface", "VK_KHR_xcb_surface", "VK_KHR_wayland_surface"]
        );
    }

    #[test]
    fn caller_extensions_are_appended_without_duplicates() {
        let caps = EnabledCapabilities {
            instance_extensions: vec!["VK_EXT_debug_utils".into(), "VK_KHR_surface".into()],
            ..Default::default()
        };
        let exts = instance_extensions(&caps, &runtime(&["VK_KHR_xlib_surface"]));
        assert_eq!(
            exts,
            vec!["VK_KHR_surface", "VK_KHR_xlib_surface", "VK_EXT_debug_utils"]
        );
    }

    #[test]
    fn interior_nul_is_rejected() {
        assert!(matches!(
            c_names(&["VK_bad\0name".to_owned()]),
            Err(SetupError::InvalidName(_))
        ));
        assert_eq!(c_names(&["VK_KHR_surface".to_owned()]).unwrap().len(), 1);
    }

    #[test]
    fn driver_severity_maps_to_tracing_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(severity_level(S::ERROR), Level::ERROR);
        assert_eq!(severity_level(S::WARNING), Level::WARN);
        assert_eq!(severity_level(S::INFO), Level::DEBUG);
        assert_eq!(severity_level(S::VERBOSE), Level::TRACE);
    }
}
