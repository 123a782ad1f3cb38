// SPDX-License-Identifier: CEPL-1.0
//! The 3D scene rendered into its own colour + depth target, sized by the UI
//! viewport rather than the window, and published to the compositor as a texture.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use prism_math::glam::Mat4;
use prism_math::Transform;
use prism_render::{RenderSize, TextureHandle};
use tracing::{debug, info, warn};

use crate::compositor::TextureRegistry;
use crate::context::DeviceContext;
use crate::error::{EngineResult, VkResultExt};
use crate::memory::{create_host_visible, GpuBuffer, GpuImage, GpuSampler};
use crate::mesh::Mesh;
use crate::pipeline::{ScenePass, ScenePipeline, UniformLayout, SCENE_COLOR_FORMAT};

/// Matches the `SceneUniforms` block in `scene.vert`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl SceneUniforms {
    pub fn compose(transform: &Transform, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: transform.model().to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }
}

/// Publishes `view`/`sampler` under a fresh handle, then retires `old`.
pub fn reregister(
    registry: &mut dyn TextureRegistry,
    old: Option<TextureHandle>,
    view: vk::ImageView,
    sampler: vk::Sampler,
) -> EngineResult<TextureHandle> {
    let fresh = registry.register(view, sampler)?;
    if let Some(old) = old {
        registry.unregister(old);
    }
    Ok(fresh)
}

fn to_extent(size: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Everything whose size follows the viewport.
struct SceneTargets {
    device: ash::Device,
    framebuffer: vk::Framebuffer,
    sampler: GpuSampler,
    depth: GpuImage,
    color: GpuImage,
}

impl SceneTargets {
    fn new(
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        extent: vk::Extent2D,
    ) -> EngineResult<Self> {
        let color = GpuImage::new(
            ctx,
            extent,
            SCENE_COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = GpuImage::new(
            ctx,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        let sampler = GpuSampler::linear_repeat(ctx)?;
        let mut targets = SceneTargets {
            device: ctx.device().clone(),
            framebuffer: vk::Framebuffer::null(),
            sampler,
            depth,
            color,
        };
        let attachments = [targets.color.view(), targets.depth.view()];
        let fb_ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        targets.framebuffer = unsafe { ctx.device().create_framebuffer(&fb_ci, None) }
            .creating("scene framebuffer")?;
        Ok(targets)
    }

    fn extent(&self) -> vk::Extent2D {
        self.color.extent()
    }
}

impl Drop for SceneTargets {
    fn drop(&mut self) {
        // Framebuffer goes before the views it references; the images follow as fields.
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// One uniform buffer and descriptor set per buffering slot.
struct SlotUniforms {
    device: ash::Device,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<GpuBuffer>,
}

impl SlotUniforms {
    fn new(ctx: &DeviceContext, set_layout: vk::DescriptorSetLayout, slots: usize) -> EngineResult<Self> {
        let device = ctx.device();
        let ubo_size = std::mem::size_of::<SceneUniforms>() as vk::DeviceSize;
        let buffers = (0..slots)
            .map(|_| create_host_visible(ctx, ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut owned = SlotUniforms {
            device: device.clone(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            buffers,
        };
        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: slots as u32,
        };
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: slots as u32,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        owned.pool = unsafe { device.create_descriptor_pool(&pool_ci, None) }
            .creating("scene descriptor pool")?;

        let layouts = vec![set_layout; slots];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: owned.pool,
            descriptor_set_count: slots as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        owned.sets = unsafe { device.allocate_descriptor_sets(&alloc) }
            .creating("scene descriptor sets")?;

        let infos: Vec<vk::DescriptorBufferInfo> = owned
            .buffers
            .iter()
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.handle(),
                offset: 0,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = owned
            .sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
        Ok(owned)
    }
}

impl Drop for SlotUniforms {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

pub struct SceneConfig {
    pub slots: usize,
    pub clear_color: [f32; 4],
}

pub struct OffscreenScene {
    device: ash::Device,
    // STRICT DROP ORDER: targets and uniforms reference the pass and layout.
    targets: SceneTargets,
    uniforms: SlotUniforms,
    mesh: Mesh,
    pipeline: ScenePipeline,
    _set_layout: UniformLayout,
    pass: ScenePass,
    depth_format: vk::Format,
    clear_color: [f32; 4],
    view: Mat4,
    proj: Mat4,
    transform: Transform,
    texture: TextureHandle,
}

impl OffscreenScene {
    pub fn new(
        ctx: &DeviceContext,
        registry: &mut dyn TextureRegistry,
        size: RenderSize,
        config: SceneConfig,
    ) -> EngineResult<Self> {
        let device = ctx.device();
        let depth_format = ctx.pick_depth_format()?;
        let pass = ScenePass::new(device, depth_format)?;
        let set_layout = UniformLayout::new(device)?;
        let pipeline = ScenePipeline::new(device, pass.handle(), set_layout.handle())?;
        let mesh = Mesh::cube(ctx)?;
        let uniforms = SlotUniforms::new(ctx, set_layout.handle(), config.slots.max(1))?;
        // A minimised start still needs a valid image to sample.
        let size = if size.is_zero() { RenderSize::new(1, 1) } else { size };
        let targets = SceneTargets::new(ctx, pass.handle(), depth_format, to_extent(size))?;
        let texture = reregister(registry, None, targets.color.view(), targets.sampler.handle())?;
        info!(
            "offscreen scene ready: {}x{}, depth {:?}",
            size.width, size.height, depth_format
        );
        Ok(Self {
            device: device.clone(),
            targets,
            uniforms,
            mesh,
            pipeline,
            _set_layout: set_layout,
            pass,
            depth_format,
            clear_color: config.clear_color,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            transform: Transform::IDENTITY,
            texture,
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn size(&self) -> RenderSize {
        let e = self.targets.extent();
        RenderSize::new(e.width, e.height)
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    /// Last write wins; read by the next `render`.
    pub fn set_view_projection(&mut self, view: Mat4, proj: Mat4) {
        self.view = view;
        self.proj = proj;
    }

    pub fn color_image(&self) -> vk::Image {
        self.targets.color.image()
    }

    /// Writes `slot`'s uniforms and draws the scene in its own submission. Returns
    /// after the queue is idle, so the colour image is complete for sampling.
    pub fn render(&self, ctx: &DeviceContext, slot: usize) -> EngineResult<()> {
        let uniforms = SceneUniforms::compose(&self.transform, self.view, self.proj);
        self.uniforms.buffers[slot].write(bytemuck::bytes_of(&uniforms))?;

        let extent = self.targets.extent();
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.pass.handle(),
            framebuffer: self.targets.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let set = self.uniforms.sets[slot];

        ctx.submit_one_shot(|d, cmd| unsafe {
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.handle());
            d.cmd_set_viewport(cmd, 0, &[viewport]);
            d.cmd_set_scissor(cmd, 0, &[scissor]);
            self.mesh.bind(d, cmd);
            d.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout(),
                0,
                &[set],
                &[],
            );
            d.cmd_draw_indexed(cmd, self.mesh.index_count(), 1, 0, 0, 0);
            d.cmd_end_render_pass(cmd);
        })
    }

    /// Rebuilds the size-dependent targets and republishes the texture. Zero and
    /// unchanged sizes are ignored. Returns whether a rebuild happened.
    pub fn resize(
        &mut self,
        ctx: &DeviceContext,
        registry: &mut dyn TextureRegistry,
        size: RenderSize,
    ) -> EngineResult<bool> {
        if size.is_zero() || size == self.size() {
            return Ok(false);
        }
        ctx.wait_idle()?;
        let fresh = SceneTargets::new(ctx, self.pass.handle(), self.depth_format, to_extent(size))?;
        self.texture = reregister(
            registry,
            Some(self.texture),
            fresh.color.view(),
            fresh.sampler.handle(),
        )?;
        self.targets = fresh;
        debug!("offscreen scene resized to {}x{}", size.width, size.height);
        Ok(true)
    }
}

impl Drop for OffscreenScene {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!("idle wait before scene teardown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_math::glam::Vec3;

    /// Hands out increasing handles and keeps the set of live ones.
    #[derive(Default)]
    struct FakeRegistry {
        next: u64,
        live: Vec<(TextureHandle, vk::ImageView)>,
    }

    impl TextureRegistry for FakeRegistry {
        fn register(&mut self, view: vk::ImageView, _sampler: vk::Sampler) -> EngineResult<TextureHandle> {
            self.next += 1;
            let h = TextureHandle(self.next);
            self.live.push((h, view));
            Ok(h)
        }

        fn unregister(&mut self, handle: TextureHandle) {
            self.live.retain(|(h, _)| *h != handle);
        }
    }

    fn view(raw: u64) -> vk::ImageView {
        use ash::vk::Handle;
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn reregister_changes_handle_and_retires_old() {
        let mut reg = FakeRegistry::default();
        let first = reregister(&mut reg, None, view(1), vk::Sampler::null()).unwrap();
        let second = reregister(&mut reg, Some(first), view(2), vk::Sampler::null()).unwrap();
        assert_ne!(first, second);
        assert_eq!(reg.live, vec![(second, view(2))]);
    }

    #[test]
    fn uniforms_are_three_column_major_matrices() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 3 * 64);
        let t = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Transform::IDENTITY
        };
        let u = SceneUniforms::compose(&t, Mat4::IDENTITY, Mat4::IDENTITY);
        // translation lives in the fourth column
        assert_eq!(u.model[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(u.view, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn compose_is_pure() {
        let t = Transform::IDENTITY;
        let v = Mat4::look_at_rh(Vec3::new(0.0, -5.0, 5.0), Vec3::ZERO, Vec3::Z);
        let p = Mat4::perspective_rh(45f32.to_radians(), 1.5, 0.1, 100.0);
        assert_eq!(
            SceneUniforms::compose(&t, v, p),
            SceneUniforms::compose(&t, v, p)
        );
    }

    fn read_color(ctx: &DeviceContext, scene: &OffscreenScene) -> Vec<u8> {
        let e = scene.targets.extent();
        let len = (e.width * e.height * 4) as vk::DeviceSize;
        let buf = create_host_visible(ctx, len, vk::BufferUsageFlags::TRANSFER_DST).unwrap();
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let barrier = |old, new, src, dst| vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: src,
            dst_access_mask: dst,
            old_layout: old,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: scene.color_image(),
            subresource_range: range,
            ..Default::default()
        };
        ctx.submit_one_shot(|d, cmd| unsafe {
            d.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier(
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::SHADER_READ,
                    vk::AccessFlags::TRANSFER_READ,
                )],
            );
            let region = vk::BufferImageCopy {
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_extent: vk::Extent3D {
                    width: e.width,
                    height: e.height,
                    depth: 1,
                },
                ..Default::default()
            };
            d.cmd_copy_image_to_buffer(
                cmd,
                scene.color_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buf.handle(),
                &[region],
            );
        })
        .unwrap();
        buf.read(len as usize).unwrap()
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn repeated_renders_are_identical_across_slots() {
        let ctx = DeviceContext::headless(false).unwrap();
        let mut reg = FakeRegistry::default();
        let mut scene = OffscreenScene::new(
            &ctx,
            &mut reg,
            RenderSize::new(64, 64),
            SceneConfig {
                slots: 2,
                clear_color: [0.05, 0.05, 0.05, 1.0],
            },
        )
        .unwrap();
        let v = Mat4::look_at_rh(Vec3::new(0.0, -3.0, 3.0), Vec3::ZERO, Vec3::Z);
        let mut p = Mat4::perspective_rh(45f32.to_radians(), 1.0, 0.1, 100.0);
        p.y_axis.y *= -1.0;
        scene.set_view_projection(v, p);

        scene.render(&ctx, 0).unwrap();
        let a = read_color(&ctx, &scene);
        scene.render(&ctx, 1).unwrap();
        let b = read_color(&ctx, &scene);
        scene.render(&ctx, 0).unwrap();
        let c = read_color(&ctx, &scene);
        assert_eq!(a, b);
        assert_eq!(a, c);
        // something other than the clear colour was drawn
        assert!(a.chunks(4).any(|px| px != &a[..4]));
    }

    #[test]
    #[ignore = "requires a Vulkan device"]
    fn resize_publishes_a_new_handle() {
        let ctx = DeviceContext::headless(false).unwrap();
        let mut reg = FakeRegistry::default();
        let mut scene = OffscreenScene::new(
            &ctx,
            &mut reg,
            RenderSize::new(64, 64),
            SceneConfig {
                slots: 2,
                clear_color: [0.0; 4],
            },
        )
        .unwrap();
        let before = scene.texture();
        assert!(!scene.resize(&ctx, &mut reg, RenderSize::new(0, 0)).unwrap());
        assert!(!scene.resize(&ctx, &mut reg, RenderSize::new(64, 64)).unwrap());
        assert_eq!(scene.texture(), before);

        assert!(scene.resize(&ctx, &mut reg, RenderSize::new(128, 96)).unwrap());
        assert_ne!(scene.texture(), before);
        assert_eq!(scene.size(), RenderSize::new(128, 96));
        assert!(reg.live.iter().all(|(h, _)| *h != before));
        assert_eq!(reg.live.len(), 1);
    }
}
