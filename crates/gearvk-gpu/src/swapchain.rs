//! Swapchain management.
//!
//! A [`SwapchainUnit`] bundles the swapchain with the render targets sized to
//! it: an optional multisampled color image and a depth image. The whole unit
//! is destroyed and rebuilt together when the surface changes.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::find_memory_type;
use crate::surface::{SurfaceCapabilities, SurfaceContext};
use ash::vk;

/// Swapchain configuration chosen against the surface.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub min_image_count: u32,
    pub depth_format: vk::Format,
}

impl SwapchainConfig {
    /// Choose a configuration from surface capabilities.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn choose(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_caps: &SurfaceCapabilities,
        desired_present_mode: vk::PresentModeKHR,
    ) -> Self {
        Self {
            surface_format: choose_surface_format(&surface_caps.formats),
            present_mode: choose_present_mode(&surface_caps.present_modes, desired_present_mode),
            min_image_count: choose_image_count(&surface_caps.capabilities),
            depth_format: select_depth_format(instance, physical_device),
        }
    }
}

/// Pick the desired present mode if the surface lists it, FIFO otherwise.
///
/// FIFO support is mandated by the specification of VK_KHR_surface.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    desired: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&desired) {
        desired
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Clamp a double-buffered image count to the surface limits.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = 2.max(capabilities.min_image_count);
    // max_image_count == 0 means no upper limit
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

/// Select the best surface format.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    // Fall back to first available
    available[0]
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Select a depth format the device supports for optimal-tiling attachments.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn select_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> vk::Format {
    let props = instance.get_physical_device_format_properties(
        physical_device,
        vk::Format::D32_SFLOAT,
    );

    if props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    {
        vk::Format::D32_SFLOAT
    } else {
        // Mandatory depth format when D32_SFLOAT is not an attachment format
        vk::Format::X8_D24_UNORM_PACK32
    }
}

/// A transient render-target image with its view and dedicated memory.
///
/// These are allocated directly rather than through the allocator so that
/// lazily-allocated memory can be preferred. Transient attachments never
/// need backing store on tile-based GPUs.
pub struct AttachmentImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
}

impl AttachmentImage {
    /// Create a transient attachment image.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = device.create_image(&image_info, None)?;

        let requirements = device.get_image_memory_requirements(image);

        // Prefer lazily-allocated memory; fall back to plain device-local
        let type_index = find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        )
        .or_else(|| {
            find_memory_type(
                memory_properties,
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        })
        .ok_or_else(|| {
            GpuError::NoCompatibleMemoryType(format!(
                "no device-local memory type for {format:?} attachment"
            ))
        })?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);

        let memory = device.allocate_memory(&alloc_info, None)?;
        device.bind_image_memory(image, memory, 0)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = device.create_image_view(&view_info, None)?;

        Ok(Self {
            image,
            view,
            memory,
            format,
        })
    }

    /// Destroy the image, view, and memory.
    ///
    /// # Safety
    /// The device must be valid and the image must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image, None);
        device.free_memory(self.memory, None);
    }
}

/// A swapchain together with the render targets sized to it.
pub struct SwapchainUnit {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Multisampled color target, present only when samples > 1.
    pub color_msaa: Option<AttachmentImage>,
    pub depth: AttachmentImage,
    /// Per-image flag: false until the image has been presented once, so the
    /// first transition of each image can start from UNDEFINED.
    presented_once: Vec<bool>,
}

impl SwapchainUnit {
    /// Build a swapchain and its attachments.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn build(
        gpu: &DeviceContext,
        surface: &SurfaceContext,
        config: &SwapchainConfig,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        desired_extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let device = gpu.device();
        let extent = calculate_extent(
            surface_capabilities,
            desired_extent.width,
            desired_extent.height,
        );

        let queue_families = [gpu.queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(config.min_image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = surface
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        // Get swapchain images
        let images = surface.swapchain_loader.get_swapchain_images(swapchain)?;

        // Create image views
        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(config.surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Multisampled color target, only needed when resolving
        let color_msaa = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(AttachmentImage::new(
                device,
                gpu.memory_properties(),
                extent,
                config.surface_format.format,
                samples,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
            )?)
        };

        let depth = AttachmentImage::new(
            device,
            gpu.memory_properties(),
            extent,
            config.depth_format,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        let presented_once = vec![false; images.len()];

        tracing::debug!(
            width = extent.width,
            height = extent.height,
            images = images.len(),
            "built swapchain"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: config.surface_format.format,
            extent,
            color_msaa,
            depth,
            presented_once,
        })
    }

    /// Layout the given image is in before this frame's transition.
    pub fn initial_layout(&self, image_index: u32) -> vk::ImageLayout {
        if self.presented_once[image_index as usize] {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else {
            vk::ImageLayout::UNDEFINED
        }
    }

    /// Acquire the next image.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        surface: &SurfaceContext,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = surface.swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            // OUT_OF_DATE means no image was acquired; caller must rebuild.
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image and mark it as presented.
    ///
    /// Returns true when the swapchain is suboptimal or out of date and
    /// should be rebuilt before the next frame.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &mut self,
        surface: &SurfaceContext,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = surface.swapchain_loader.queue_present(queue, &present_info);

        self.presented_once[image_index as usize] = true;

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain and its attachments.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device, surface: &SurfaceContext) {
        if let Some(color) = &self.color_msaa {
            color.destroy(device);
        }
        self.depth.destroy(device);

        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        surface.swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];

        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_respects_surface_limits() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);

        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 0, // unbounded
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 2);

        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn extent_uses_surface_extent_when_fixed() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            ..Default::default()
        };

        let extent = calculate_extent(&caps, 300, 300);
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }

    #[test]
    fn extent_clamps_when_window_managed() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = calculate_extent(&caps, 50, 3000);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 2000);
    }
}
