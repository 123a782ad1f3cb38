// SPDX-License-Identifier: CEPL-1.0
use std::collections::HashMap;

use ash::vk;
use egui::{ClippedPrimitive, TextureId, TexturesDelta};
use egui_ash_renderer::{Options as EguiRendererOptions, Renderer as EguiRenderer};
use prism_render::TextureHandle;
use tracing::{debug, warn};

use crate::context::DeviceContext;
use crate::error::{EngineResult, VkResultExt};

/// Upper bound on simultaneously registered user textures.
const MAX_USER_TEXTURES: u32 = 16;

/// Where sampleable images are published for the UI to draw.
pub trait TextureRegistry {
    fn register(&mut self, view: vk::ImageView, sampler: vk::Sampler) -> EngineResult<TextureHandle>;
    /// The handle is invalid afterwards; unknown handles are ignored.
    fn unregister(&mut self, handle: TextureHandle);
}

/// One frame of tessellated UI output.
#[derive(Default)]
pub struct UiFrame {
    pub primitives: Vec<ClippedPrimitive>,
    pub textures_delta: TexturesDelta,
    pub pixels_per_point: f32,
}

struct UserTexture {
    id: TextureId,
    set: vk::DescriptorSet,
}

/// egui drawn into the window render pass, plus the user-texture table through
/// which the scene image is sampled.
pub struct EguiCompositor {
    device: ash::Device,
    renderer: EguiRenderer,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    textures: HashMap<TextureHandle, UserTexture>,
    next_handle: u64,
    pending_free: Vec<Vec<TextureId>>,
}

fn is_srgb(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32
    )
}

impl EguiCompositor {
    pub fn new(
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        target_format: vk::Format,
        frames_in_flight: usize,
    ) -> EngineResult<Self> {
        let device = ctx.device();
        let options = EguiRendererOptions {
            in_flight_frames: frames_in_flight,
            srgb_framebuffer: is_srgb(target_format),
            ..Default::default()
        };
        let renderer = EguiRenderer::with_default_allocator(
            ctx.instance(),
            ctx.physical_device(),
            device.clone(),
            render_pass,
            options,
        )?;

        let mut owned = EguiCompositor {
            device: device.clone(),
            renderer,
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            textures: HashMap::new(),
            next_handle: 1,
            pending_free: vec![Vec::new(); frames_in_flight.max(1)],
        };

        // Must stay compatible with the renderer's own set 0.
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let layout_ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        owned.set_layout = unsafe { device.create_descriptor_set_layout(&layout_ci, None) }
            .creating("user texture set layout")?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: MAX_USER_TEXTURES,
        };
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            max_sets: MAX_USER_TEXTURES,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        owned.pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .creating("user texture descriptor pool")?;
        Ok(owned)
    }

    /// egui id to draw a registered texture with.
    pub fn egui_texture(&self, handle: TextureHandle) -> Option<TextureId> {
        self.textures.get(&handle).map(|t| t.id)
    }

    /// Frees egui textures released while `slot` was last used. Only call once the
    /// slot's fence has been observed.
    pub fn release_deferred(&mut self, slot: usize) -> EngineResult<()> {
        let pending = &mut self.pending_free[slot];
        if !pending.is_empty() {
            self.renderer.free_textures(pending.as_slice())?;
            pending.clear();
        }
        Ok(())
    }

    /// Creates or patches egui-managed textures. Blocking upload on `queue`.
    pub fn upload(
        &mut self,
        queue: vk::Queue,
        pool: vk::CommandPool,
        delta: &TexturesDelta,
    ) -> EngineResult<()> {
        if !delta.set.is_empty() {
            self.renderer.set_textures(queue, pool, delta.set.as_slice())?;
        }
        Ok(())
    }

    /// Records the UI draw. Must be inside the window render pass.
    pub fn record(
        &mut self,
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
        pixels_per_point: f32,
        primitives: &[ClippedPrimitive],
    ) -> EngineResult<()> {
        self.renderer
            .cmd_draw(cmd, extent, pixels_per_point, primitives)?;
        Ok(())
    }

    /// Textures released this frame are freed after `slot` comes round again.
    pub fn defer_free(&mut self, slot: usize, ids: &[TextureId]) {
        self.pending_free[slot].extend_from_slice(ids);
    }

    fn allocate_set(&self, view: vk::ImageView, sampler: vk::Sampler) -> EngineResult<vk::DescriptorSet> {
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.pool,
            descriptor_set_count: 1,
            p_set_layouts: &self.set_layout,
            ..Default::default()
        };
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc) }
            .creating("user texture descriptor set")?[0];
        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(set)
    }
}

impl TextureRegistry for EguiCompositor {
    fn register(&mut self, view: vk::ImageView, sampler: vk::Sampler) -> EngineResult<TextureHandle> {
        let set = self.allocate_set(view, sampler)?;
        let id = self.renderer.add_user_texture(set);
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        self.textures.insert(handle, UserTexture { id, set });
        debug!("registered user texture {handle:?} as {id:?}");
        Ok(handle)
    }

    fn unregister(&mut self, handle: TextureHandle) {
        if let Some(tex) = self.textures.remove(&handle) {
            self.renderer.remove_user_texture(tex.id);
            if let Err(e) = unsafe { self.device.free_descriptor_sets(self.pool, &[tex.set]) } {
                warn!("freeing descriptor set of {handle:?} failed: {e}");
            }
            debug!("unregistered user texture {handle:?}");
        }
    }
}

impl Drop for EguiCompositor {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
