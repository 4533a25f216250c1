//! The gear renderer.
//!
//! Owns the scene resources: the shared vertex buffer, the uniform buffer
//! with the projection matrix, the shading variant set, and the indirect
//! draw table consumed through VK_EXT_device_generated_commands.

use crate::camera::scene_projection;
use crate::table::{
    build_entries, Drawable, IndirectEntry, VariantMode, DRAW_TOKEN_OFFSET,
    EXECUTION_SET_TOKEN_OFFSET, SEQUENCE_STRIDE,
};
use crate::variants::{
    bind_gear_vertex_buffer, PipelineVariants, ShaderObjectVariants, ShadingVariantSet,
    VARIANT_STAGES,
};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use gearvk_gpu::dgc::{
    self, GeneratedCommandsInfoEXT, GeneratedCommandsMemoryRequirementsInfoEXT,
    IndirectCommandsExecutionSetTokenEXT, IndirectCommandsLayoutCreateInfoEXT,
    IndirectCommandsLayoutEXT, IndirectCommandsLayoutTokenEXT, IndirectCommandsTokenDataEXT,
    IndirectCommandsTokenTypeEXT, IndirectExecutionSetInfoTypeEXT,
};
use gearvk_gpu::{
    write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder, DeviceContext, GpuBuffer,
    Result,
};
use gearvk_mesh::{generate_gear, GearMesh, GearParams, GearVertex};
use gpu_allocator::MemoryLocation;

/// The three gears of the classic scene.
pub const GEAR_PARAMS: [GearParams; 3] = [
    GearParams {
        inner_radius: 1.0,
        outer_radius: 4.0,
        width: 1.0,
        teeth: 20,
        tooth_depth: 0.7,
    },
    GearParams {
        inner_radius: 0.5,
        outer_radius: 2.0,
        width: 2.0,
        teeth: 10,
        tooth_depth: 0.7,
    },
    GearParams {
        inner_radius: 1.3,
        outer_radius: 2.0,
        width: 0.5,
        teeth: 10,
        tooth_depth: 0.7,
    },
];

/// Number of generated-command sequences, one per gear.
pub const SEQUENCE_COUNT: u32 = 3;

/// Per-frame values pushed to the vertex shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PushConstants {
    /// Drive gear angle in degrees.
    pub angle: f32,
    /// Scene rotation about X in degrees.
    pub view_rot_x: f32,
    /// Scene rotation about Y in degrees.
    pub view_rot_y: f32,
    /// Window aspect as height / width.
    pub aspect: f32,
}

/// Concatenate gear meshes into one vertex stream with per-gear spans.
pub fn concat_meshes(meshes: &[GearMesh]) -> (Vec<GearVertex>, Vec<Drawable>) {
    let total: usize = meshes.iter().map(|m| m.vertices.len()).sum();
    let mut vertices = Vec::with_capacity(total);
    let mut drawables = Vec::with_capacity(meshes.len());

    for mesh in meshes {
        drawables.push(Drawable {
            first_vertex: vertices.len() as u32,
            vertex_count: mesh.vertex_count(),
        });
        vertices.extend_from_slice(&mesh.vertices);
    }

    (vertices, drawables)
}

/// Renders the gear scene through device-generated commands.
pub struct GearRenderer {
    vertex_buffer: GpuBuffer,
    uniform_buffer: GpuBuffer,
    indirect_buffer: GpuBuffer,
    preprocess_buffer: GpuBuffer,

    descriptor_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,

    variants: Box<dyn ShadingVariantSet>,
    commands_layout: IndirectCommandsLayoutEXT,

    indirect_address: vk::DeviceAddress,
    indirect_size: vk::DeviceSize,
    preprocess_address: vk::DeviceAddress,
    preprocess_size: vk::DeviceSize,
}

impl GearRenderer {
    /// Create the renderer for the given variant mode and target formats.
    ///
    /// # Safety
    /// The context must outlive the renderer; formats must match the
    /// swapchain the renderer will draw into.
    pub unsafe fn new(
        gpu: &DeviceContext,
        mode: VariantMode,
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let device = gpu.device();

        // Tessellate and upload the gears
        let meshes: Vec<GearMesh> = GEAR_PARAMS.iter().map(|p| generate_gear(p)).collect();
        let (vertices, drawables) = concat_meshes(&meshes);

        tracing::info!(
            vertices = vertices.len(),
            mode = ?mode,
            "uploading gear geometry"
        );

        let mut allocator = gpu.allocator().lock();

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
        let vertex_buffer = allocator.create_buffer(
            vertex_bytes.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            "gear vertices",
        )?;
        vertex_buffer.write(vertex_bytes)?;

        // Projection UBO, updated in-band with vkCmdUpdateBuffer
        let uniform_buffer = allocator.create_buffer(
            std::mem::size_of::<glam::Mat4>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "projection ubo",
        )?;

        // Indirect draw table, written once
        let entries = build_entries(mode, &drawables);
        let entry_bytes: &[u8] = bytemuck::cast_slice(&entries);
        let indirect_buffer = allocator.create_buffer(
            entry_bytes.len() as u64,
            vk::BufferUsageFlags::INDIRECT_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "indirect draw table",
        )?;
        indirect_buffer.write(entry_bytes)?;

        drop(allocator);

        // Descriptor interface: a single UBO visible to the vertex stage
        let descriptor_layout = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
        }];
        let descriptor_pool = DescriptorPool::new(device, 1, &pool_sizes)?;
        let descriptor_set = descriptor_pool.allocate(device, &[descriptor_layout])?[0];
        write_uniform_buffer(
            device,
            descriptor_set,
            0,
            uniform_buffer.buffer,
            0,
            uniform_buffer.size,
        );

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<PushConstants>() as u32);

        let set_layouts = [descriptor_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout = device.create_pipeline_layout(&layout_info, None)?;

        // Shading variants and their execution set
        let variants: Box<dyn ShadingVariantSet> = match mode {
            VariantMode::Pipelines => Box::new(PipelineVariants::new(
                gpu,
                pipeline_layout,
                color_format,
                depth_format,
                samples,
            )?),
            VariantMode::ShaderObjects => Box::new(ShaderObjectVariants::new(
                gpu,
                descriptor_layout,
                push_constant_range,
                samples,
            )?),
        };

        // Sequence layout: select the variant, then draw
        let execution_set_token = IndirectCommandsExecutionSetTokenEXT {
            ty: match mode {
                VariantMode::Pipelines => IndirectExecutionSetInfoTypeEXT::PIPELINES,
                VariantMode::ShaderObjects => IndirectExecutionSetInfoTypeEXT::SHADER_OBJECTS,
            },
            shader_stages: VARIANT_STAGES,
        };
        let tokens = [
            IndirectCommandsLayoutTokenEXT {
                token_type: IndirectCommandsTokenTypeEXT::EXECUTION_SET,
                data: IndirectCommandsTokenDataEXT {
                    p_execution_set: &execution_set_token,
                },
                offset: EXECUTION_SET_TOKEN_OFFSET,
                ..Default::default()
            },
            IndirectCommandsLayoutTokenEXT {
                token_type: IndirectCommandsTokenTypeEXT::DRAW,
                offset: DRAW_TOKEN_OFFSET,
                ..Default::default()
            },
        ];
        let layout_create = IndirectCommandsLayoutCreateInfoEXT {
            shader_stages: VARIANT_STAGES,
            indirect_stride: SEQUENCE_STRIDE,
            pipeline_layout,
            token_count: tokens.len() as u32,
            p_tokens: tokens.as_ptr(),
            ..Default::default()
        };
        let commands_layout = gpu.dgc().create_indirect_commands_layout(&layout_create)?;

        // Preprocess scratch, sized by the driver
        let mem_info = GeneratedCommandsMemoryRequirementsInfoEXT {
            indirect_execution_set: variants.execution_set(),
            indirect_commands_layout: commands_layout,
            max_sequence_count: SEQUENCE_COUNT,
            max_draw_count: 0,
            ..Default::default()
        };
        let requirements = gpu.dgc().get_generated_commands_memory_requirements(&mem_info);

        tracing::debug!(size = requirements.size, "preprocess scratch requirements");

        let mut allocator = gpu.allocator().lock();
        let preprocess_buffer = allocator.create_buffer_with_usage2(
            requirements.size.max(1),
            dgc::BUFFER_USAGE_2_PREPROCESS_BUFFER_EXT
                | vk::BufferUsageFlags2KHR::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            "dgc preprocess scratch",
        )?;
        drop(allocator);

        let indirect_address = indirect_buffer.device_address(device);
        let indirect_size = (entries.len() * std::mem::size_of::<IndirectEntry>()) as u64;
        let preprocess_address = preprocess_buffer.device_address(device);
        let preprocess_size = requirements.size;

        Ok(Self {
            vertex_buffer,
            uniform_buffer,
            indirect_buffer,
            preprocess_buffer,
            descriptor_layout,
            descriptor_pool,
            descriptor_set,
            pipeline_layout,
            variants,
            commands_layout,
            indirect_address,
            indirect_size,
            preprocess_address,
            preprocess_size,
        })
    }

    /// The variant mode the renderer was built with.
    pub fn mode(&self) -> VariantMode {
        self.variants.mode()
    }

    /// Record an in-band update of the projection matrix.
    ///
    /// Must be recorded outside a rendering instance.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn record_projection_update(
        &self,
        gpu: &DeviceContext,
        cmd: vk::CommandBuffer,
        aspect: f32,
    ) {
        let device = gpu.device();
        let projection = scene_projection(aspect);

        // Previous frame's reads must retire before the transfer
        let pre_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.uniform_buffer.buffer)
            .size(vk::WHOLE_SIZE);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::VERTEX_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            &[pre_barrier],
            &[],
        );

        device.cmd_update_buffer(
            cmd,
            self.uniform_buffer.buffer,
            0,
            bytemuck::bytes_of(&projection),
        );

        let post_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::UNIFORM_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.uniform_buffer.buffer)
            .size(vk::WHOLE_SIZE);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::VERTEX_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[post_barrier],
            &[],
        );
    }

    /// Record the gear draws through the generated-commands path.
    ///
    /// # Safety
    /// Must be recorded inside a dynamic rendering instance.
    pub unsafe fn record_draw(
        &self,
        gpu: &DeviceContext,
        cmd: vk::CommandBuffer,
        push: &PushConstants,
        extent: vk::Extent2D,
    ) {
        let device = gpu.device();

        bind_gear_vertex_buffer(device, cmd, self.vertex_buffer.buffer);
        self.variants.bind_baseline(gpu, cmd, extent);

        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline_layout,
            0,
            &[self.descriptor_set],
            &[],
        );
        device.cmd_push_constants(
            cmd,
            self.pipeline_layout,
            vk::ShaderStageFlags::VERTEX,
            0,
            bytemuck::bytes_of(push),
        );

        let info = GeneratedCommandsInfoEXT {
            shader_stages: VARIANT_STAGES,
            indirect_execution_set: self.variants.execution_set(),
            indirect_commands_layout: self.commands_layout,
            indirect_address: self.indirect_address,
            indirect_address_size: self.indirect_size,
            preprocess_address: self.preprocess_address,
            preprocess_size: self.preprocess_size,
            max_sequence_count: SEQUENCE_COUNT,
            sequence_count_address: 0,
            max_draw_count: 0,
            ..Default::default()
        };
        gpu.dgc().cmd_execute_generated_commands(cmd, false, &info);
    }

    /// Destroy all renderer resources.
    ///
    /// # Safety
    /// Nothing recorded by the renderer may still be in flight.
    pub unsafe fn destroy(&mut self, gpu: &DeviceContext) -> Result<()> {
        let device = gpu.device();

        gpu.dgc().destroy_indirect_commands_layout(self.commands_layout);
        self.variants.destroy(gpu);

        device.destroy_pipeline_layout(self.pipeline_layout, None);
        self.descriptor_pool.destroy(device);
        device.destroy_descriptor_set_layout(self.descriptor_layout, None);

        let mut allocator = gpu.allocator().lock();
        allocator.free_buffer(&mut self.vertex_buffer)?;
        allocator.free_buffer(&mut self.uniform_buffer)?;
        allocator.free_buffer(&mut self.indirect_buffer)?;
        allocator.free_buffer(&mut self.preprocess_buffer)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshes_concatenate_contiguously() {
        let meshes: Vec<GearMesh> = GEAR_PARAMS.iter().map(|p| generate_gear(p)).collect();
        let (vertices, drawables) = concat_meshes(&meshes);

        assert_eq!(drawables.len(), 3);
        assert_eq!(drawables[0].first_vertex, 0);

        let mut expected_start = 0;
        for (drawable, mesh) in drawables.iter().zip(&meshes) {
            assert_eq!(drawable.first_vertex, expected_start);
            assert_eq!(drawable.vertex_count, mesh.vertex_count());
            expected_start += mesh.vertex_count();
        }
        assert_eq!(vertices.len() as u32, expected_start);
    }

    #[test]
    fn classic_scene_vertex_counts() {
        let meshes: Vec<GearMesh> = GEAR_PARAMS.iter().map(|p| generate_gear(p)).collect();

        // 46 * teeth + 10 vertices per gear
        assert_eq!(meshes[0].vertex_count(), 930);
        assert_eq!(meshes[1].vertex_count(), 470);
        assert_eq!(meshes[2].vertex_count(), 470);
    }

    #[test]
    fn push_constants_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<PushConstants>(), 16);
    }
}
