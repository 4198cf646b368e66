//! Vulkan context management
//!
//! Owns the instance, debug messenger, window surface and logical device.
//! Destruction happens in one place, in reverse creation order, once every
//! resource created from the device has been released.

use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};

use super::window::Window;
use super::{VulkanError, VulkanResult};

/// Queue families and properties of the selected GPU
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first GPU that can render to `surface`, preferring discrete GPUs
    fn select(instance: &Instance, surface: vk::SurfaceKHR, surface_loader: &Surface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut candidates: Vec<Self> = devices
            .into_iter()
            .filter_map(|device| match Self::evaluate(instance, device, surface, surface_loader) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::debug!("Skipping GPU: {e}");
                    None
                }
            })
            .collect();
        candidates.sort_by_key(|info| info.properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU);

        let selected = candidates
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::InitializationFailed("No suitable GPU found".to_string()))?;

        log::info!("Selected GPU: {}", selected.name());
        Ok(selected)
    }

    fn evaluate(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_2 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.2 is required".to_string()));
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features12);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        if features12.buffer_device_address == vk::FALSE {
            return Err(VulkanError::InitializationFailed("buffer device address unsupported".to_string()));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            let present_support = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .map_err(VulkanError::Api)?
            };
            if present_support && present_family.is_none() {
                present_family = Some(index);
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device).map_err(VulkanError::Api)? };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed("VK_KHR_swapchain not supported".to_string()));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self { device, properties, memory_properties, graphics_family, present_family })
    }

    /// Human-readable device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Core Vulkan objects shared by the device and the swapchain
pub struct VulkanContext {
    entry: Entry,
    instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    physical_device: PhysicalDeviceInfo,
    device: Device,
    swapchain_loader: SwapchainLoader,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl VulkanContext {
    /// Create the instance, a surface for `window` and a logical device
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let (instance, debug) = create_instance(&entry, window, app_name, enable_validation)?;
        let surface_loader = Surface::new(&entry, &instance);

        let surface = match window.create_vulkan_surface(instance.handle()) {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(&instance, debug.as_ref());
                return Err(VulkanError::InitializationFailed(format!("Surface creation: {e}")));
            }
        };

        let device = PhysicalDeviceInfo::select(&instance, surface, &surface_loader)
            .and_then(|physical| create_logical_device(&instance, &physical).map(|device| (physical, device)));
        let (physical_device, device) = match device {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(&instance, debug.as_ref());
                return Err(e);
            }
        };

        let swapchain_loader = SwapchainLoader::new(&instance, &device);
        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical_device,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
        })
    }

    /// Vulkan entry points
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// The logical device
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Selected GPU
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Window surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface extension loader
    pub fn surface_loader(&self) -> &Surface {
        &self.surface_loader
    }

    /// Swapchain extension loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Queue for rendering and transfers
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue for presentation
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Find a memory type allowed by `type_bits` with all of `properties`
    pub fn find_memory_type(&self, type_bits: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let memory = &self.physical_device.memory_properties;
        (0..memory.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        destroy_instance(&self.instance, self.debug.as_ref());
        log::debug!("Vulkan context destroyed");
    }
}

fn create_instance(
    entry: &Entry,
    window: &Window,
    app_name: &str,
    enable_validation: bool,
) -> VulkanResult<(Instance, Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>)> {
    let app_name = CString::new(app_name)
        .map_err(|_| VulkanError::InitializationFailed("application name contains a NUL byte".to_string()))?;
    let engine_name = c"render_engine";
    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_2);

    let required = window
        .required_instance_extensions()
        .map_err(|e| VulkanError::InitializationFailed(format!("Failed to get required extensions: {e}")))?;
    let mut extension_names = required
        .into_iter()
        .map(CString::new)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| VulkanError::InitializationFailed("invalid extension name".to_string()))?;

    let validation_available = enable_validation && validation_layer_available(entry);
    if enable_validation && !validation_available {
        log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }
    if validation_available {
        extension_names.push(DebugUtils::name().to_owned());
    }
    let extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

    let layer_names: Vec<*const c_char> = if validation_available {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);
    let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

    if !validation_available {
        return Ok((instance, None));
    }

    let debug_utils = DebugUtils::new(entry, &instance);
    let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
        Ok(messenger) => {
            log::info!("Vulkan validation enabled");
            Ok((instance, Some((debug_utils, messenger))))
        }
        Err(e) => {
            unsafe { instance.destroy_instance(None) };
            Err(VulkanError::Api(e))
        }
    }
}

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

fn validation_layer_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
        })
        .unwrap_or(false)
}

fn create_logical_device(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Device> {
    let families: HashSet<u32> = [physical.graphics_family, physical.present_family].into_iter().collect();
    let priorities = [1.0];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&priorities)
                .build()
        })
        .collect();

    let extensions = [SwapchainLoader::name().as_ptr()];
    let mut features12 = vk::PhysicalDeviceVulkan12Features::builder().buffer_device_address(true);
    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features12);

    unsafe { instance.create_device(physical.device, &create_info, None).map_err(VulkanError::Api) }
}

fn destroy_instance(instance: &Instance, debug: Option<&(DebugUtils, vk::DebugUtilsMessengerEXT)>) {
    unsafe {
        if let Some((debug_utils, messenger)) = debug {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}
