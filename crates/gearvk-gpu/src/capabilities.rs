//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// PCI device ID
    pub device_id: u32,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Device-generated commands support (VK_EXT_device_generated_commands)
    pub supports_device_generated_commands: bool,
    /// Shader object support (VK_EXT_shader_object)
    pub supports_shader_object: bool,
    /// Maintenance5 support (VK_KHR_maintenance5)
    pub supports_maintenance5: bool,

    /// Sample counts supported for framebuffer color attachments
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    /// Sample counts supported for framebuffer depth attachments
    pub framebuffer_depth_sample_counts: vk::SampleCountFlags,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // Get basic properties
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        // Get available extensions
        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        // Parse device info
        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        // Calculate device-local memory
        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor,
            device_id: properties.device_id,
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            supports_device_generated_commands: available_extensions
                .contains("VK_EXT_device_generated_commands"),
            supports_shader_object: available_extensions.contains("VK_EXT_shader_object"),
            supports_maintenance5: available_extensions.contains("VK_KHR_maintenance5"),

            framebuffer_color_sample_counts: properties.limits.framebuffer_color_sample_counts,
            framebuffer_depth_sample_counts: properties.limits.framebuffer_depth_sample_counts,

            device_local_memory_mb,

            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements.
    pub fn meets_requirements(&self, use_shader_objects: bool) -> bool {
        // Require Vulkan 1.3 for dynamic rendering
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return false;
        }

        if !self.supports_device_generated_commands || !self.supports_maintenance5 {
            return false;
        }

        if use_shader_objects && !self.supports_shader_object {
            return false;
        }

        true
    }

    /// Check if both color and depth framebuffers support a sample count.
    pub fn supports_sample_count(&self, samples: vk::SampleCountFlags) -> bool {
        self.framebuffer_color_sample_counts.contains(samples)
            && self.framebuffer_depth_sample_counts.contains(samples)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }

    /// Log the full device description and extension list.
    pub fn log_device_info(&self) {
        tracing::info!(
            "apiVersion    = {}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version)
        );
        tracing::info!("driverVersion = {:04x}", self.driver_version);
        tracing::info!("vendor        = {:?}", self.vendor);
        tracing::info!("deviceID      = {:04x}", self.device_id);
        tracing::info!("deviceType    = {:?}", self.device_type);
        tracing::info!("deviceName    = {}", self.device_name);
        tracing::info!("deviceExtensions:");
        let mut extensions: Vec<&String> = self.available_extensions.iter().collect();
        extensions.sort();
        for ext in extensions {
            tracing::info!("    {ext}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn sample_count_requires_color_and_depth() {
        let caps = GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_id: 0,
            device_name: String::new(),
            device_type: vk::PhysicalDeviceType::OTHER,
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            supports_device_generated_commands: true,
            supports_shader_object: false,
            supports_maintenance5: true,
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            device_local_memory_mb: 0,
            available_extensions: HashSet::new(),
        };

        assert!(caps.supports_sample_count(vk::SampleCountFlags::TYPE_1));
        // Color supports 4x but depth does not.
        assert!(!caps.supports_sample_count(vk::SampleCountFlags::TYPE_4));
    }
}
