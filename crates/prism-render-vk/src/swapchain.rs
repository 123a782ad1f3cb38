// SPDX-License-Identifier: CEPL-1.0
use ash::khr::swapchain;
use ash::vk;
use prism_render::RenderSize;
use tracing::{debug, info};

use crate::context::DeviceContext;
use crate::error::{ConfigurationError, EngineError, EngineResult, VkResultExt};
use crate::surface::WindowSurface;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VsyncMode {
    /// Paced to the display refresh.
    #[default]
    Fifo,
    /// Latest-image-wins, falls back to FIFO.
    Mailbox,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresentConfig {
    pub desired_image_count: u32,
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub clear_color: [f32; 4],
}

impl PresentConfig {
    /// `true` when this changed the present mode the next build will pick.
    pub fn set_vsync(&mut self, on: bool) -> bool {
        let changed = self.vsync != on;
        self.vsync = on;
        changed
    }
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            desired_image_count: 2,
            vsync: true,
            vsync_mode: VsyncMode::Fifo,
            clear_color: [0.1, 0.1, 0.1, 1.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Ready(u32),
    /// Out of date; nothing was signaled and the chain must be rebuilt.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Ok,
    /// Out of date or suboptimal; rebuild before the next frame.
    Stale,
}

/// Image count and extent, always derived together from one capabilities query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub extent: vk::Extent2D,
}

pub fn plan_swapchain(
    caps: &vk::SurfaceCapabilitiesKHR,
    desired_image_count: u32,
    want: RenderSize,
) -> SwapchainPlan {
    let mut image_count = desired_image_count.max(caps.min_image_count).max(2);
    if caps.max_image_count != 0 {
        image_count = image_count.min(caps.max_image_count);
    }
    SwapchainPlan {
        image_count,
        extent: extent_from_caps(caps, want),
    }
}

fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, ConfigurationError> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    match formats {
        [] => Err(ConfigurationError::UnsupportedSurfaceFormat),
        // A lone UNDEFINED entry means the surface takes anything.
        [only] if only.format == vk::Format::UNDEFINED => Ok(preferred),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .unwrap_or(formats[0])),
    }
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    vsync: bool,
    mode: VsyncMode,
) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (vsync, mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, VsyncMode::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, VsyncMode::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Presentable images, their views and framebuffers, and the window render pass
/// they are bound to. The render pass and format survive rebuilds.
pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    config: PresentConfig,
}

impl Swapchain {
    pub fn create(
        ctx: &DeviceContext,
        surface: &WindowSurface,
        config: PresentConfig,
        extent: RenderSize,
    ) -> EngineResult<Self> {
        let phys = ctx.physical_device();
        let format = choose_surface_format(&surface.formats(phys)?)?;
        let render_pass = unsafe { create_window_render_pass(ctx.device(), format.format)? };

        let mut sc = Swapchain {
            device: ctx.device().clone(),
            loader: swapchain::Device::new(ctx.instance(), ctx.device()),
            handle: vk::SwapchainKHR::null(),
            format,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            render_pass,
            config,
        };
        sc.build(ctx, surface, extent)?;
        info!(
            "swapchain ready: {} images, {}x{}, {:?}/{:?}, {:?}",
            sc.images.len(),
            sc.extent.width,
            sc.extent.height,
            sc.format.format,
            sc.format.color_space,
            sc.present_mode
        );
        Ok(sc)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub(crate) fn config_mut(&mut self) -> &mut PresentConfig {
        &mut self.config
    }

    /// `signal_on_ready` is armed only for `Ready`.
    pub fn acquire_next(&self, timeout: u64, signal_on_ready: vk::Semaphore) -> EngineResult<Acquire> {
        let res = unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout, signal_on_ready, vk::Fence::null())
        };
        match res {
            // Suboptimal still signals the semaphore; present will report it.
            Ok((index, _suboptimal)) => Ok(Acquire::Ready(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(result) => Err(EngineError::CommandSubmission {
                stage: "acquire_next_image",
                result,
            }),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_on: vk::Semaphore,
    ) -> EngineResult<Present> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait_on,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.loader.queue_present(queue, &present) } {
            Ok(false) => Ok(Present::Ok),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(result) => Err(EngineError::CommandSubmission {
                stage: "queue_present",
                result,
            }),
        }
    }

    /// Full device idle, tear down views / framebuffers / chain, recreate at `extent`.
    pub fn rebuild(
        &mut self,
        ctx: &DeviceContext,
        surface: &WindowSurface,
        extent: RenderSize,
    ) -> EngineResult<()> {
        if extent.is_zero() {
            debug!("swapchain rebuild skipped: zero extent");
            return Ok(());
        }
        ctx.wait_idle()?;
        self.destroy_chain();
        self.build(ctx, surface, extent)?;
        info!(
            "swapchain rebuilt: {} images, {}x{}",
            self.images.len(),
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Begins the window pass on `image_index`'s framebuffer with the configured clear.
    pub unsafe fn begin_render_pass(&self, cmd: vk::CommandBuffer, image_index: u32) {
        let clears = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.config.clear_color,
            },
        }];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[image_index as usize],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE)
        };
    }

    fn build(
        &mut self,
        ctx: &DeviceContext,
        surface: &WindowSurface,
        want: RenderSize,
    ) -> EngineResult<()> {
        let phys = ctx.physical_device();
        let caps = surface.capabilities(phys)?;
        let plan = plan_swapchain(&caps, self.config.desired_image_count, want);
        if plan.extent.width == 0 || plan.extent.height == 0 {
            // Window minimized between the notification and now.
            return Err(EngineError::SurfaceStale);
        }
        let modes = surface.present_modes(phys)?;
        let present_mode = choose_present_mode(&modes, self.config.vsync, self.config.vsync_mode);

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle(),
            min_image_count: plan.image_count,
            image_format: self.format.format,
            image_color_space: self.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        unsafe {
            self.handle = self
                .loader
                .create_swapchain(&swap_info, None)
                .creating("swapchain")?;
            self.images = self
                .loader
                .get_swapchain_images(self.handle)
                .creating("swapchain images")?;
        }
        self.extent = plan.extent;
        self.present_mode = present_mode;

        for &image in &self.images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { self.device.create_image_view(&iv_info, None) }
                .creating("swapchain image view")?;
            self.views.push(view);
        }

        for &view in &self.views {
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { self.device.create_framebuffer(&fb_info, None) }
                .creating("swapchain framebuffer")?;
            self.framebuffers.push(fb);
        }
        debug_assert_eq!(self.framebuffers.len(), self.image_count());
        Ok(())
    }

    // STRICT ORDER: framebuffers -> views -> chain. Render pass is kept.
    fn destroy_chain(&mut self) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(fb, None);
            }
            for iv in self.views.drain(..) {
                self.device.destroy_image_view(iv, None);
            }
            self.images.clear();
            self.loader.destroy_swapchain(self.handle, None);
        }
        self.handle = vk::SwapchainKHR::null();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_chain();
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

unsafe fn create_window_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> EngineResult<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // The acquire semaphore is waited at COLOR_ATTACHMENT_OUTPUT; the layout
    // transition must not start earlier.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.creating("window render pass")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_honours_desired_within_limits() {
        let c = caps(2, 8, (1280, 720));
        assert_eq!(plan_swapchain(&c, 2, RenderSize::new(1280, 720)).image_count, 2);
        assert_eq!(plan_swapchain(&c, 3, RenderSize::new(1280, 720)).image_count, 3);
        assert_eq!(plan_swapchain(&c, 16, RenderSize::new(1280, 720)).image_count, 8);
        // driver minimum wins over a smaller request
        let c = caps(3, 0, (1280, 720));
        assert_eq!(plan_swapchain(&c, 2, RenderSize::new(1280, 720)).image_count, 3);
    }

    #[test]
    fn resize_changes_extent_only() {
        let small = plan_swapchain(&caps(2, 8, (u32::MAX, u32::MAX)), 2, RenderSize::new(640, 480));
        let large = plan_swapchain(&caps(2, 8, (u32::MAX, u32::MAX)), 2, RenderSize::new(1920, 1080));
        assert_eq!(small.image_count, large.image_count);
        assert_eq!(small.extent, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(large.extent, vk::Extent2D { width: 1920, height: 1080 });
    }

    #[test]
    fn defined_current_extent_wins_over_request() {
        let plan = plan_swapchain(&caps(2, 8, (800, 600)), 2, RenderSize::new(1280, 720));
        assert_eq!(plan.extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let plan = plan_swapchain(&caps(2, 8, (u32::MAX, u32::MAX)), 2, RenderSize::new(10_000, 0));
        assert_eq!(plan.extent, vk::Extent2D { width: 4096, height: 1 });
    }

    #[test]
    fn surface_format_prefers_bgra_srgb_nonlinear() {
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let picked = choose_surface_format(&[other, preferred]).unwrap();
        assert_eq!(picked.format, preferred.format);
        assert_eq!(picked.color_space, preferred.color_space);
        assert_eq!(choose_surface_format(&[other]).unwrap().format, other.format);
    }

    #[test]
    fn surface_format_edge_cases() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(ConfigurationError::UnsupportedSurfaceFormat)
        ));
        let undefined = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(
            choose_surface_format(&[undefined]).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn vsync_toggle_reports_changes_and_moves_present_mode() {
        use vk::PresentModeKHR as M;
        let modes = [M::FIFO, M::MAILBOX, M::IMMEDIATE];
        let mut cfg = PresentConfig::default();
        assert!(!cfg.set_vsync(true));
        assert!(cfg.set_vsync(false));
        assert_eq!(choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode), M::IMMEDIATE);
        assert!(!cfg.set_vsync(false));
        assert!(cfg.set_vsync(true));
        assert_eq!(choose_present_mode(&modes, cfg.vsync, cfg.vsync_mode), M::FIFO);
    }

    #[test]
    fn present_mode_selection() {
        use vk::PresentModeKHR as M;
        let all = [M::FIFO, M::MAILBOX, M::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, true, VsyncMode::Fifo), M::FIFO);
        assert_eq!(choose_present_mode(&all, true, VsyncMode::Mailbox), M::MAILBOX);
        assert_eq!(choose_present_mode(&all, false, VsyncMode::Fifo), M::IMMEDIATE);
        assert_eq!(choose_present_mode(&[M::FIFO], true, VsyncMode::Mailbox), M::FIFO);
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], false, VsyncMode::Fifo), M::MAILBOX);
    }
}
