// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation (validation layers + debug messenger when enabled)
// - Window surface
// - Physical device selection (graphics + present queues, swapchain support)
// - Logical device + queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::surface::{Surface, SurfaceSupport};
use crate::config::DeviceConfig;

/// Queue family indices for the two roles the renderer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Prefers one family that can do both; otherwise the first graphics
    /// family and the first family that can present.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
    ) -> Option<Self> {
        let is_graphics = |family: &vk::QueueFamilyProperties| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        };

        if let Some((index, _)) = (0u32..)
            .zip(families)
            .find(|(index, family)| is_graphics(family) && supports_present(*index))
        {
            return Some(Self { graphics: index, present: index });
        }

        let graphics = (0u32..).zip(families).find(|(_, family)| is_graphics(family))?.0;
        let present = (0..families.len() as u32).find(|&index| supports_present(index))?;

        Some(Self { graphics, present })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, for queue creation and concurrent sharing.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present]).into_iter().collect()
    }
}

/// Optional validation output, present only when layers were requested.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    fn new(entry: &Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = debug_messenger_create_info();
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to set up debug messenger")?;

        Ok(Self { loader, messenger })
    }

    unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.messenger, None);
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Memory allocator. Wrapped so buffers can allocate through a shared
    // `Arc<VulkanDevice>`; taken out in `drop` before the device goes away.
    allocator: Mutex<Option<Allocator>>,

    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: Surface,
    debug_messenger: Option<DebugMessenger>,
    pub instance: ash::Instance,
    _entry: Entry,

    // Queue handles
    pub queue_families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl VulkanDevice {
    /// Create Vulkan device
    ///
    /// # Arguments
    /// * `config` - Validation toggle plus layer/extension names
    /// * `display_handle`, `window_handle` - Native window the surface is created for
    pub fn new(
        config: &DeviceConfig,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", config.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        let instance = Self::create_instance(&entry, config, display_handle)?;

        // Step 3: Debug messenger if validation enabled
        let debug_messenger = if config.enable_validation {
            Some(DebugMessenger::new(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Surface
        let surface = Surface::new(&entry, &instance, display_handle, window_handle)?;

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface, config)?;

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, queue_families, config)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        // Step 7: Create memory allocator
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .context("Failed to create memory allocator")?;

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            surface,
            debug_messenger,
            instance,
            _entry: entry,
            queue_families,
            graphics_queue,
            present_queue,
        }))
    }

    fn create_instance(
        entry: &Entry,
        config: &DeviceConfig,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(config.app_name.as_str())?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        // Surface extensions for this platform, plus debug utils when validating
        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query required surface extensions")?
            .to_vec();
        if config.enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[cfg(target_os = "macos")]
        let flags = {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        };
        #[cfg(not(target_os = "macos"))]
        let flags = vk::InstanceCreateFlags::empty();

        Self::check_instance_extensions(entry, &extensions)?;

        let layer_names: Vec<*const c_char> = if config.enable_validation {
            Self::check_validation_layers(entry, config.validation_layers)?;
            config.validation_layers.iter().map(|name| name.as_ptr()).collect()
        } else {
            Vec::new()
        };

        // Chained so instance creation and destruction are validated too
        let mut debug_info = debug_messenger_create_info();

        let mut create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if config.enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn check_instance_extensions(entry: &Entry, required: &[*const c_char]) -> Result<()> {
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("Failed to enumerate instance extensions")?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();

        for &name in required {
            let name = unsafe { CStr::from_ptr(name) };
            if !available.contains(&name) {
                anyhow::bail!("Required instance extension {:?} is not available", name);
            }
            log::debug!("Instance extension: {:?}", name);
        }
        Ok(())
    }

    fn check_validation_layers(entry: &Entry, requested: &[&CStr]) -> Result<()> {
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;
        let available: Vec<&CStr> = available
            .iter()
            .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            .collect();

        let missing = missing_names(&available, requested);
        if !missing.is_empty() {
            anyhow::bail!("Validation layers requested, but not available: {:?}", missing);
        }
        Ok(())
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &Surface,
        config: &DeviceConfig,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each suitable device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

            let Some(queue_families) = Self::check_device(instance, surface, device, config)? else {
                log::debug!("Skipping unsuitable GPU: {}", name);
                continue;
            };

            let score = device_type_score(props.device_type);
            log::debug!("Candidate GPU: {} (score {})", name, score);

            if score > best_score {
                best_score = score;
                best_device = Some((device, queue_families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("Failed to find a suitable GPU"))
    }

    /// Returns the queue families to use if the device can drive this surface.
    fn check_device(
        instance: &ash::Instance,
        surface: &Surface,
        device: vk::PhysicalDevice,
        config: &DeviceConfig,
    ) -> Result<Option<QueueFamilies>> {
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let Some(queue_families) =
            QueueFamilies::find(&families, |index| surface.supports_present(device, index))
        else {
            return Ok(None);
        };

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .context("Failed to enumerate device extensions")?;
        let available: Vec<&CStr> = extensions
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
            .collect();
        if !missing_names(&available, config.device_extensions).is_empty() {
            return Ok(None);
        }

        // Only meaningful once swapchain support is known to exist
        let support: SurfaceSupport = surface.query_support(device)?;
        if !support.is_adequate() {
            return Ok(None);
        }

        Ok(Some(queue_families))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
        config: &DeviceConfig,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions: Vec<*const c_char> =
            config.device_extensions.iter().map(|name| name.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Run `f` with exclusive access to the memory allocator.
    pub fn with_allocator<T>(&self, f: impl FnOnce(&mut Allocator) -> Result<T>) -> Result<T> {
        let mut guard = self.allocator.lock();
        let allocator = guard.as_mut().context("Memory allocator already destroyed")?;
        f(allocator)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Reverse order of creation
        drop(self.allocator.lock().take());
        unsafe {
            self.device.destroy_device(None);
            self.surface.destroy();
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Prefer discrete over integrated over anything else.
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

/// Names from `required` that do not appear in `available`.
pub fn missing_names<'a>(available: &[&CStr], required: &[&'a CStr]) -> Vec<&'a CStr> {
    required
        .iter()
        .copied()
        .filter(|name| !available.contains(name))
        .collect()
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let found = QueueFamilies::find(&families, |i| i == 1 || i == 2).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 2, present: 2 });
        assert!(found.is_shared());
        assert_eq!(found.unique(), vec![2]);
    }

    #[test]
    fn splits_roles_across_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let found = QueueFamilies::find(&families, |i| i == 1).unwrap();
        assert_eq!(found, QueueFamilies { graphics: 0, present: 1 });
        assert!(!found.is_shared());
        assert_eq!(found.unique(), vec![0, 1]);
    }

    #[test]
    fn incomplete_families_are_rejected() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilies::find(&families, |_| false).is_none());

        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilies::find(&families, |_| true).is_none());
    }

    #[test]
    fn discrete_gpu_outranks_integrated() {
        assert!(
            device_type_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            device_type_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > device_type_score(vk::PhysicalDeviceType::CPU)
        );
    }

    #[test]
    fn reports_missing_extension_names() {
        let available = [ash::khr::surface::NAME, c"VK_KHR_maintenance1"];
        let required = [ash::khr::swapchain::NAME, c"VK_KHR_maintenance1"];
        assert_eq!(missing_names(&available, &required), vec![ash::khr::swapchain::NAME]);
        assert!(missing_names(&available, &available).is_empty());
    }
}
