//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::command::CommandPool;
use crate::dgc::{self, DeviceGeneratedCommands, PhysicalDeviceDeviceGeneratedCommandsFeaturesEXT};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// One queue family is used for both graphics and present.
pub struct DeviceContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
    pub(crate) command_pool: CommandPool,

    pub(crate) dgc: DeviceGeneratedCommands,
    pub(crate) shader_object: Option<ash::ext::shader_object::Device>,
}

impl DeviceContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the physical device memory properties.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics/present queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the graphics/present queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the command pool.
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get the device-generated-commands entry points.
    pub fn dgc(&self) -> &DeviceGeneratedCommands {
        &self.dgc
    }

    /// Get the shader-object loader, if shader-object mode was requested.
    pub fn shader_object(&self) -> Option<&ash::ext::shader_object::Device> {
        self.shader_object.as_ref()
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.command_pool.destroy(&self.device);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
    use_shader_objects: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "gearvk".to_string(),
            enable_validation: cfg!(debug_assertions),
            use_shader_objects: false,
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Request shader-object mode (enables VK_EXT_shader_object).
    pub fn shader_objects(mut self, enable: bool) -> Self {
        self.use_shader_objects = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<DeviceContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // Select best physical device
        let physical_device = unsafe { select_physical_device(&instance) }?;

        // Query capabilities
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        // Validate requirements
        if !capabilities.meets_requirements(self.use_shader_objects) {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        // Find the graphics queue family (also used for present)
        let queue_family = unsafe { find_graphics_queue_family(&instance, physical_device) }?;

        // Create logical device
        let (device, queue) = unsafe {
            create_device(
                &instance,
                physical_device,
                queue_family,
                self.use_shader_objects,
            )?
        };

        let device = Arc::new(device);

        // Resolve extension entry points
        let dgc = unsafe { DeviceGeneratedCommands::load(&instance, &device) }?;
        let shader_object = self
            .use_shader_objects
            .then(|| ash::ext::shader_object::Device::new(&instance, &device));

        // Create GPU allocator
        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        // Command pool for per-frame command buffers
        let command_pool = unsafe {
            CommandPool::new(
                &device,
                queue_family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?
        };

        Ok(DeviceContext {
            entry,
            instance,
            physical_device,
            memory_properties,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_family,
            queue,
            command_pool,
            dgc,
            shader_object,
        })
    }
}

/// Find the first queue family with graphics support.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    queue_families
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Required device extensions.
fn required_device_extensions(use_shader_objects: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        ash::khr::swapchain::NAME,
        dgc::EXTENSION_NAME,
        ash::khr::maintenance5::NAME,
    ];

    if use_shader_objects {
        extensions.push(ash::ext::shader_object::NAME);
    }

    extensions
}

/// Create the logical device and retrieve the queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    use_shader_objects: bool,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    // Get required extensions
    let extensions = required_device_extensions(use_shader_objects);
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Enable Vulkan 1.3 features
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true);

    // Enable Vulkan 1.2 features
    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().buffer_device_address(true);

    let mut maintenance5_features =
        vk::PhysicalDeviceMaintenance5FeaturesKHR::default().maintenance5(true);

    let mut dgc_features = PhysicalDeviceDeviceGeneratedCommandsFeaturesEXT {
        device_generated_commands: vk::TRUE,
        ..Default::default()
    };

    let mut shader_object_features =
        vk::PhysicalDeviceShaderObjectFeaturesEXT::default().shader_object(true);

    // Enable base features
    let features = vk::PhysicalDeviceFeatures::default().multi_draw_indirect(true);

    // Chain features together
    let mut features2 = vk::PhysicalDeviceFeatures2::default().features(features);

    // Create the device
    let mut device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2)
        .push_next(&mut vulkan_1_2_features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut maintenance5_features)
        .push_next(&mut dgc_features);

    if use_shader_objects {
        device_create_info = device_create_info.push_next(&mut shader_object_features);
    }

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    // Get queue handle
    let queue = device.get_device_queue(queue_family, 0);

    Ok((device, queue))
}
