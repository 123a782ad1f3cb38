// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use ash::ext::debug_utils;
use ash::khr::swapchain;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigurationError, EngineResult, VkResultExt};
use crate::memory::select_memory_type;
use crate::surface::WindowSurface;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call.
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else {
        debug!("[vulkan] {msg}");
    }
    vk::FALSE
}

/// Instance plus its optional debug messenger. Destroyed after everything else.
struct InstanceOwner {
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    instance: Instance,
    entry: Entry,
}

impl InstanceOwner {
    unsafe fn new(display: Option<RawDisplayHandle>, validation: bool) -> EngineResult<Self> {
        let entry = Entry::linked();

        let app_name = c"Prism";
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: app_name.as_ptr(),
            application_version: 0,
            p_engine_name: app_name.as_ptr(),
            engine_version: 0,
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let mut extensions: Vec<*const c_char> = match display {
            Some(dh) => ash_window::enumerate_required_extensions(dh)
                .creating("instance (surface extensions)")?
                .to_vec(),
            None => Vec::new(),
        };

        let validation = validation && unsafe { has_validation_layer(&entry) };
        let layers = [VALIDATION_LAYER.as_ptr()];
        if validation {
            extensions.push(debug_utils::NAME.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
            pp_enabled_layer_names: if validation {
                layers.as_ptr()
            } else {
                std::ptr::null()
            },
            ..Default::default()
        };
        let instance = unsafe { entry.create_instance(&create_info, None) }.creating("instance")?;

        let mut owner = InstanceOwner {
            debug: None,
            instance,
            entry,
        };

        if validation {
            let loader = debug_utils::Instance::new(&owner.entry, &owner.instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
                .creating("debug messenger")?;
            owner.debug = Some((loader, messenger));
            info!("vulkan validation enabled");
        }

        Ok(owner)
    }
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn has_validation_layer(entry: &Entry) -> bool {
    let layers = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
    let found = layers
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER);
    if !found {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
    }
    found
}

/// Human-readable summary of the selected physical device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: &'static str,
    pub api_version: (u32, u32, u32),
    pub driver_version: u32,
    pub vram_bytes: u64,
}

pub fn device_type_label(ty: vk::PhysicalDeviceType) -> &'static str {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Sum of all device-local heaps.
pub fn device_local_bytes(mem: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    mem.memory_heaps[..mem.memory_heap_count as usize]
        .iter()
        .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|h| h.size)
        .sum()
}

/// First family with graphics that `can_present` accepts.
pub fn pick_queue_family(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, q)| q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|(i, _)| i as u32)
        .find(|&i| can_present(i))
}

/// Ordering key for physical devices; lower sorts first.
pub fn device_preference(ty: vk::PhysicalDeviceType) -> u8 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    }
}

/// Owns the logical device, its single graphics/present queue and the command
/// pool everything else allocates from. Created first, destroyed last.
pub struct DeviceContext {
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    device: ash::Device,
    phys: vk::PhysicalDevice,
    props: vk::PhysicalDeviceProperties,
    mem_props: vk::PhysicalDeviceMemoryProperties,
    instance: InstanceOwner,
}

impl DeviceContext {
    /// Instance, window surface, then a device whose queue can present to it.
    /// The returned surface must be dropped before the context.
    pub fn with_surface(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> EngineResult<(Self, WindowSurface)> {
        // STRICT ORDER:
        // 1) instance with the platform WSI extensions
        // 2) surface from THIS instance
        // 3) physical device + queue family queried AGAINST this surface
        // 4) logical device with the swapchain extension
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            let instance = InstanceOwner::new(Some(dh), validation)?;
            let surface = WindowSurface::new(&instance.entry, &instance.instance, dh, wh)?;
            let (phys, family) = pick_physical_device(&instance.instance, |phys, i| {
                surface.supports(phys, i)
            })?;
            let parts = create_device(&instance.instance, phys, family, &[swapchain::NAME.as_ptr()])?;
            Ok((Self::assemble(instance, phys, family, parts), surface))
        }
    }

    /// Device without any surface, used for offscreen work and GPU tests.
    pub fn headless(validation: bool) -> EngineResult<Self> {
        unsafe {
            let instance = InstanceOwner::new(None, validation)?;
            let (phys, family) = pick_physical_device(&instance.instance, |_, _| true)?;
            let parts = create_device(&instance.instance, phys, family, &[])?;
            Ok(Self::assemble(instance, phys, family, parts))
        }
    }

    fn assemble(
        instance: InstanceOwner,
        phys: vk::PhysicalDevice,
        queue_family: u32,
        (device, queue, command_pool): (ash::Device, vk::Queue, vk::CommandPool),
    ) -> Self {
        let props = unsafe { instance.instance.get_physical_device_properties(phys) };
        let mem_props = unsafe { instance.instance.get_physical_device_memory_properties(phys) };
        let ctx = DeviceContext {
            command_pool,
            queue,
            device,
            phys,
            props,
            mem_props,
            instance,
        };
        let info = ctx.device_info();
        info!(
            "device: {} ({}), api {}.{}.{}, queue family {}",
            info.name,
            info.device_type,
            info.api_version.0,
            info.api_version.1,
            info.api_version.2,
            queue_family
        );
        ctx
    }

    pub fn acquire_queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn allocate_command_buffer(&self, pool: vk::CommandPool) -> EngineResult<vk::CommandBuffer> {
        Ok(self.allocate_command_buffers(pool, 1)?[0])
    }

    pub fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> EngineResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&alloc_info) }.creating("command buffer")
    }

    /// Fails with `NoSuitableMemory` when no type satisfies both the mask and the flags.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> EngineResult<u32> {
        Ok(select_memory_type(&self.mem_props, type_bits, required)?)
    }

    /// Records into a throwaway primary buffer, submits it and blocks until the
    /// queue drains. The buffer is freed on every path.
    pub fn submit_one_shot<F>(&self, record: F) -> EngineResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let cmd = self.allocate_command_buffer(self.command_pool)?;
        let result = unsafe { self.record_and_wait(cmd, record) };
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, std::slice::from_ref(&cmd));
        }
        result
    }

    unsafe fn record_and_wait<F>(&self, cmd: vk::CommandBuffer, record: F) -> EngineResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let d = &self.device;
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe { d.begin_command_buffer(cmd, &bi) }.submitting("begin one-shot")?;
        record(d, cmd);
        unsafe { d.end_command_buffer(cmd) }.submitting("end one-shot")?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        unsafe { d.queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null()) }
            .submitting("one-shot submit")?;
        unsafe { d.queue_wait_idle(self.queue) }.submitting("one-shot queue wait")
    }

    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }.submitting("device_wait_idle")
    }

    pub fn device_info(&self) -> DeviceInfo {
        let p = &self.props;
        // SAFETY: the driver fills `device_name` with a NUL-terminated string.
        let name = unsafe { CStr::from_ptr(p.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        DeviceInfo {
            name,
            device_type: device_type_label(p.device_type),
            api_version: (
                vk::api_version_major(p.api_version),
                vk::api_version_minor(p.api_version),
                vk::api_version_patch(p.api_version),
            ),
            driver_version: p.driver_version,
            vram_bytes: device_local_bytes(&self.mem_props),
        }
    }

    /// First of D32 / D32S8 / D24S8 usable as an optimal-tiling depth attachment.
    pub fn pick_depth_format(&self) -> EngineResult<vk::Format> {
        let inst = &self.instance.instance;
        let phys = self.phys;
        choose_depth_format(|fmt| unsafe {
            inst.get_physical_device_format_properties(phys, fmt)
                .optimal_tiling_features
        })
        .ok_or_else(|| ConfigurationError::NoDepthFormat.into())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        // `instance` drops after this body: messenger, then instance.
    }
}

pub(crate) const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn choose_depth_format(
    mut features: impl FnMut(vk::Format) -> vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&f| features(f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
    device_exts: &[*const c_char],
) -> EngineResult<(ash::Device, vk::Queue, vk::CommandPool)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = unsafe { instance.create_device(phys, &dinfo, None) }.creating("logical device")?;
    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    match unsafe { device.create_command_pool(&pool_info, None) } {
        Ok(pool) => Ok((device, queue, pool)),
        Err(e) => {
            unsafe { device.destroy_device(None) };
            Err(e).creating("command pool")
        }
    }
}

unsafe fn pick_physical_device(
    instance: &Instance,
    mut can_present: impl FnMut(vk::PhysicalDevice, u32) -> bool,
) -> EngineResult<(vk::PhysicalDevice, u32)> {
    let mut devices = unsafe { instance.enumerate_physical_devices() }.creating("device list")?;
    devices.sort_by_key(|&phys| {
        let props = unsafe { instance.get_physical_device_properties(phys) };
        device_preference(props.device_type)
    });
    for phys in devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        if let Some(family) = pick_queue_family(&families, |i| can_present(phys, i)) {
            return Ok((phys, family));
        }
    }
    Err(ConfigurationError::NoSuitableDevice.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn queue_family_needs_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1),
        ];
        assert_eq!(pick_queue_family(&families, |i| i == 2), Some(2));
        assert_eq!(pick_queue_family(&families, |_| true), Some(1));
        assert_eq!(pick_queue_family(&families, |i| i == 0), None);
    }

    #[test]
    fn empty_families_are_skipped() {
        let families = [family(vk::QueueFlags::GRAPHICS, 0), family(vk::QueueFlags::GRAPHICS, 2)];
        assert_eq!(pick_queue_family(&families, |_| true), Some(1));
    }

    #[test]
    fn discrete_gpus_sort_first() {
        let mut tys = [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        tys.sort_by_key(|&t| device_preference(t));
        assert_eq!(tys[0], vk::PhysicalDeviceType::DISCRETE_GPU);
        assert_eq!(tys[2], vk::PhysicalDeviceType::CPU);
    }

    #[test]
    fn vram_counts_only_device_local_heaps() {
        let mut mem = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 3,
            ..Default::default()
        };
        mem.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        mem.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        mem.memory_heaps[2] = vk::MemoryHeap {
            size: 256 << 20,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        // heap beyond the count must be ignored
        mem.memory_heaps[3] = vk::MemoryHeap {
            size: 1 << 40,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        assert_eq!(device_local_bytes(&mem), (8 << 30) + (256 << 20));
    }

    #[test]
    fn depth_format_prefers_d32() {
        let all = |_| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(choose_depth_format(all), Some(vk::Format::D32_SFLOAT));

        let only_d24 = |f| {
            if f == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            }
        };
        assert_eq!(choose_depth_format(only_d24), Some(vk::Format::D24_UNORM_S8_UINT));
        assert_eq!(choose_depth_format(|_| vk::FormatFeatureFlags::empty()), None);
    }

    #[test]
    fn type_labels() {
        assert_eq!(device_type_label(vk::PhysicalDeviceType::DISCRETE_GPU), "Discrete GPU");
        assert_eq!(device_type_label(vk::PhysicalDeviceType::OTHER), "Other");
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn headless_context_reports_device() {
        let ctx = DeviceContext::headless(false).unwrap();
        let info = ctx.device_info();
        assert!(!info.name.is_empty());
        ctx.submit_one_shot(|_, _| {}).unwrap();
    }
}
