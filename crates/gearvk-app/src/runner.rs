//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use gearvk_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use gearvk_gpu::sync::reset_fence;
use gearvk_gpu::{
    DeviceContext, DeviceContextBuilder, FrameRing, GpuError, SurfaceContext, SwapchainConfig,
    SwapchainUnit,
};
use gearvk_render::{GearRenderer, PushConstants, VariantMode};

use crate::driver::{AcquireOutcome, FrameDriver, FrameLoop, PresentOutcome, StepOutcome};
use crate::frame::{FrameState, VIEW_ROT_STEP};

/// Frames in flight.
const FRAMES_IN_FLIGHT: usize = 2;

/// Seconds between FPS reports.
const FPS_REPORT_INTERVAL: f64 = 5.0;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// MSAA sample count for the render targets.
    pub samples: vk::SampleCountFlags,
    /// Desired present mode; falls back to FIFO when unsupported.
    pub present_mode: vk::PresentModeKHR,
    /// Run borderless fullscreen.
    pub fullscreen: bool,
    /// Log device properties and extensions at startup.
    pub print_device_info: bool,
    /// Provide shading variants as shader objects instead of pipelines.
    pub use_shader_objects: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "gearvk".to_string(),
            width: 300,
            height: 300,
            samples: vk::SampleCountFlags::TYPE_1,
            present_mode: vk::PresentModeKHR::FIFO,
            fullscreen: false,
            print_device_info: false,
            use_shader_objects: false,
            validation: cfg!(debug_assertions),
        }
    }
}

/// Parse an MSAA sample count into Vulkan flags.
pub fn sample_count_from_u32(samples: u32) -> Option<vk::SampleCountFlags> {
    match samples {
        1 => Some(vk::SampleCountFlags::TYPE_1),
        2 => Some(vk::SampleCountFlags::TYPE_2),
        4 => Some(vk::SampleCountFlags::TYPE_4),
        8 => Some(vk::SampleCountFlags::TYPE_8),
        16 => Some(vk::SampleCountFlags::TYPE_16),
        32 => Some(vk::SampleCountFlags::TYPE_32),
        64 => Some(vk::SampleCountFlags::TYPE_64),
        _ => None,
    }
}

/// Run the gears application with the given configuration.
///
/// This function initializes logging, creates the window and GPU context,
/// and runs the event loop until the application exits.
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = GearsRunner {
        config,
        state: None,
        error: None,
    };

    event_loop.run_app(&mut runner)?;

    // A fatal error inside the loop exits it; surface it as the run's
    // result so the process reports failure.
    match runner.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct GearsRunner {
    config: AppConfig,
    state: Option<AppState>,
    /// Fatal error carried out of the event loop.
    error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState {
    window: Arc<Window>,
    frame_loop: FrameLoop<VulkanFrame>,
    run_start: Instant,
    last_frame_time: Instant,
    // FPS reporting window
    fps_window_start: Instant,
    fps_window_frames: u64,
}

impl ApplicationHandler for GearsRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let result = match &mut self.state {
                    Some(state) => state.render_frame(),
                    None => return,
                };
                match result {
                    Ok(()) => {
                        if let Some(state) = &self.state {
                            state.window.request_redraw();
                        }
                    }
                    // A failed frame is fatal: a submit error can leave a
                    // slot fence reset with nothing to signal it, so the
                    // loop must not keep rendering.
                    Err(e) => {
                        error!("Render error: {e}");
                        self.error = Some(e);
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(state) = &mut self.state {
                    state.frame_loop.request_resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    self.handle_key(event_loop, &event.logical_key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl GearsRunner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        // Create window
        let mut window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        if self.config.fullscreen {
            window_attrs = window_attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let size = window.inner_size();

        let vulkan = VulkanFrame::new(&self.config, window.as_ref(), size.width, size.height)?;

        let now = Instant::now();
        Ok(AppState {
            window,
            frame_loop: FrameLoop::new(vulkan),
            run_start: now,
            last_frame_time: now,
            fps_window_start: now,
            fps_window_frames: 0,
        })
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        if matches!(key, Key::Named(NamedKey::Escape)) {
            if let Some(mut state) = self.state.take() {
                state.cleanup();
            }
            event_loop.exit();
            return;
        }

        let Some(state) = &mut self.state else {
            return;
        };
        let frame_state = state.frame_loop.state_mut();

        match key {
            Key::Named(NamedKey::ArrowUp) => frame_state.rotate_view(VIEW_ROT_STEP, 0.0),
            Key::Named(NamedKey::ArrowDown) => frame_state.rotate_view(-VIEW_ROT_STEP, 0.0),
            Key::Named(NamedKey::ArrowLeft) => frame_state.rotate_view(0.0, VIEW_ROT_STEP),
            Key::Named(NamedKey::ArrowRight) => frame_state.rotate_view(0.0, -VIEW_ROT_STEP),
            Key::Character(c) if c.as_str() == "a" => frame_state.toggle_animation(),
            _ => {}
        }
    }
}

impl AppState {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        if self.frame_loop.step(dt)? == StepOutcome::Rendered {
            self.fps_window_frames += 1;

            let elapsed = self.fps_window_start.elapsed().as_secs_f64();
            if elapsed >= FPS_REPORT_INTERVAL {
                info!(
                    "{} frames in {:.1} seconds = {:.3} FPS",
                    self.fps_window_frames,
                    elapsed,
                    self.fps_window_frames as f64 / elapsed
                );
                self.fps_window_start = now;
                self.fps_window_frames = 0;
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        let frames = self.frame_loop.frames_presented();
        let elapsed = self.run_start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            info!(
                "Rendered {} frames in {:.1} seconds ({:.3} FPS average)",
                frames,
                elapsed,
                frames as f64 / elapsed
            );
        }

        info!("Starting cleanup...");
        unsafe {
            if let Err(e) = self.frame_loop.driver_mut().destroy() {
                error!("Cleanup error: {e}");
            }
        }
        info!("Cleanup complete");
    }
}

/// The Vulkan-backed frame driver.
struct VulkanFrame {
    gpu: DeviceContext,
    surface: SurfaceContext,
    swapchain_config: SwapchainConfig,
    unit: SwapchainUnit,
    ring: FrameRing,
    renderer: GearRenderer,
    samples: vk::SampleCountFlags,
    desired_present_mode: vk::PresentModeKHR,
}

impl VulkanFrame {
    fn new(
        config: &AppConfig,
        window: &Window,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let gpu = DeviceContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .shader_objects(config.use_shader_objects)
            .build()?;

        if config.print_device_info {
            gpu.capabilities().log_device_info();
        }

        if config.samples != vk::SampleCountFlags::TYPE_1
            && !gpu.capabilities().supports_sample_count(config.samples)
        {
            anyhow::bail!(
                "sample count {:?} not supported by {}",
                config.samples,
                gpu.capabilities().device_name
            );
        }

        let surface = unsafe { SurfaceContext::from_window(&gpu, window)? };
        if !surface.supports_present(&gpu, gpu.queue_family())? {
            anyhow::bail!("graphics queue family cannot present to the surface");
        }

        let caps = surface.capabilities(&gpu)?;
        let swapchain_config = unsafe {
            SwapchainConfig::choose(
                gpu.instance(),
                gpu.physical_device(),
                &caps,
                config.present_mode,
            )
        };

        let unit = unsafe {
            SwapchainUnit::build(
                &gpu,
                &surface,
                &swapchain_config,
                &caps.capabilities,
                vk::Extent2D { width, height },
                config.samples,
                None,
            )?
        };

        let ring =
            unsafe { FrameRing::new(gpu.device(), gpu.command_pool(), FRAMES_IN_FLIGHT)? };

        let mode = if config.use_shader_objects {
            VariantMode::ShaderObjects
        } else {
            VariantMode::Pipelines
        };
        let renderer = unsafe {
            GearRenderer::new(
                &gpu,
                mode,
                swapchain_config.surface_format.format,
                swapchain_config.depth_format,
                config.samples,
            )?
        };

        Ok(Self {
            gpu,
            surface,
            swapchain_config,
            unit,
            ring,
            renderer,
            samples: config.samples,
            desired_present_mode: config.present_mode,
        })
    }

    /// Record one frame into the slot's command buffer.
    ///
    /// # Safety
    /// The slot's previous submission must have retired.
    unsafe fn record(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        state: &FrameState,
    ) -> gearvk_gpu::Result<()> {
        let device = self.gpu.device();
        let extent = self.unit.extent;

        // An index past the image list means acquire and rebuild got out of
        // sync, which is a bug, not a condition to render through.
        if image_index as usize >= self.unit.images.len() {
            return Err(GpuError::InvalidState(format!(
                "image index {image_index} out of range for {} swapchain images",
                self.unit.images.len()
            )));
        }
        let swapchain_image = self.unit.images[image_index as usize];
        let swapchain_view = self.unit.image_views[image_index as usize];

        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let aspect = extent.height as f32 / extent.width as f32;
        self.renderer.record_projection_update(&self.gpu, cmd, aspect);

        // Transition render targets for this frame
        let color_range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .level_count(1)
            .layer_count(1);
        let depth_range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::DEPTH)
            .level_count(1)
            .layer_count(1);

        let mut barriers = vec![
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .old_layout(self.unit.initial_layout(image_index))
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swapchain_image)
                .subresource_range(color_range),
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.unit.depth.image)
                .subresource_range(depth_range),
        ];
        if let Some(msaa) = &self.unit.color_msaa {
            barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(msaa.image)
                    .subresource_range(color_range),
            );
        }
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &barriers,
        );

        // Render into the MSAA target and resolve, or straight into the
        // swapchain image at one sample.
        let clear_color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        let color_attachment = if let Some(msaa) = &self.unit.color_msaa {
            vk::RenderingAttachmentInfo::default()
                .image_view(msaa.view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                .resolve_image_view(swapchain_view)
                .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(clear_color)
        } else {
            vk::RenderingAttachmentInfo::default()
                .image_view(swapchain_view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(clear_color)
        };
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.unit.depth.view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        device.cmd_begin_rendering(cmd, &rendering_info);

        let push = PushConstants {
            angle: state.angle,
            view_rot_x: state.view_rot[0],
            view_rot_y: state.view_rot[1],
            aspect,
        };
        self.renderer.record_draw(&self.gpu, cmd, &push, extent);

        device.cmd_end_rendering(cmd);

        // Hand the swapchain image to the presentation engine
        let present_barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swapchain_image)
            .subresource_range(color_range);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[present_barrier],
        );

        end_command_buffer(device, cmd)
    }

    /// Destroy all Vulkan resources.
    ///
    /// # Safety
    /// Must not be called while frames are in flight; waits for idle first.
    unsafe fn destroy(&mut self) -> anyhow::Result<()> {
        self.gpu.wait_idle()?;

        self.renderer.destroy(&self.gpu)?;
        self.ring.destroy(self.gpu.device(), self.gpu.command_pool());
        self.unit.destroy(self.gpu.device(), &self.surface);
        self.surface.destroy();

        Ok(())
    }
}

impl FrameDriver for VulkanFrame {
    type Error = GpuError;

    fn slot_count(&self) -> usize {
        self.ring.len()
    }

    fn built_extent(&self) -> (u32, u32) {
        (self.unit.extent.width, self.unit.extent.height)
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), Self::Error> {
        unsafe { self.ring.wait(self.gpu.device(), slot) }
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, Self::Error> {
        let semaphore = self.ring.slot(slot).image_acquired;
        let result =
            unsafe { self.unit.acquire_next_image(&self.surface, semaphore, u64::MAX) };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Image {
                image_index,
                suboptimal,
            }),
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(e),
        }
    }

    fn record_and_submit(
        &mut self,
        slot: usize,
        image_index: u32,
        state: &FrameState,
    ) -> Result<(), Self::Error> {
        let device = self.gpu.device();
        let frame_slot = self.ring.slot(slot);
        let cmd = frame_slot.command_buffer;

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.record(cmd, image_index, state)?;

            // The submission below is what re-signals the fence.
            reset_fence(device, frame_slot.in_flight)?;
            submit_command_buffers(
                device,
                self.gpu.queue(),
                &[cmd],
                &[frame_slot.image_acquired],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[self.ring.render_done],
                frame_slot.in_flight,
            )?;
        }

        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, Self::Error> {
        let _ = slot;
        let suboptimal = unsafe {
            self.unit.present(
                &self.surface,
                self.gpu.queue(),
                image_index,
                &[self.ring.render_done],
            )?
        };

        Ok(if suboptimal {
            PresentOutcome::Stale
        } else {
            PresentOutcome::Presented
        })
    }

    fn rebuild(&mut self, extent: (u32, u32)) -> Result<(), Self::Error> {
        unsafe {
            self.gpu.wait_idle()?;

            // The ring is recreated alongside the swapchain unit. After the
            // idle wait nothing is pending against its fences or semaphores.
            self.ring.destroy(self.gpu.device(), self.gpu.command_pool());
            self.unit.destroy(self.gpu.device(), &self.surface);

            let caps = self.surface.capabilities(&self.gpu)?;
            self.swapchain_config = SwapchainConfig::choose(
                self.gpu.instance(),
                self.gpu.physical_device(),
                &caps,
                self.desired_present_mode,
            );
            self.unit = SwapchainUnit::build(
                &self.gpu,
                &self.surface,
                &self.swapchain_config,
                &caps.capabilities,
                vk::Extent2D {
                    width: extent.0,
                    height: extent.1,
                },
                self.samples,
                None,
            )?;
            self.ring = FrameRing::new(self.gpu.device(), self.gpu.command_pool(), FRAMES_IN_FLIGHT)?;
        }

        info!(
            "Rebuilt swapchain at {}x{}",
            self.unit.extent.width, self.unit.extent.height
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_counts_parse() {
        assert_eq!(
            sample_count_from_u32(1),
            Some(vk::SampleCountFlags::TYPE_1)
        );
        assert_eq!(
            sample_count_from_u32(4),
            Some(vk::SampleCountFlags::TYPE_4)
        );
        assert_eq!(
            sample_count_from_u32(64),
            Some(vk::SampleCountFlags::TYPE_64)
        );
        assert_eq!(sample_count_from_u32(3), None);
        assert_eq!(sample_count_from_u32(128), None);
    }
}
