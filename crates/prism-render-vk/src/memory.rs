// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and samplers with single ownership, plus the staging path
//! that is the only way host data reaches device-local memory.

use ash::vk;

use crate::context::DeviceContext;
use crate::error::{ConfigurationError, EngineError, EngineResult, VkResultExt};

/// Lowest memory type index allowed by `type_bits` that has every `required` flag.
pub fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, ConfigurationError> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32))
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(ConfigurationError::NoSuitableMemory {
            type_bits,
            required,
        })
}

const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Host-visible buffers only: map, copy, unmap. The memory is coherent, no flush.
    pub fn write(&self, bytes: &[u8]) -> EngineResult<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(EngineError::ResourceCreation {
                what: "buffer write larger than allocation",
                result: vk::Result::ERROR_MEMORY_MAP_FAILED,
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .submitting("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn read(&self, len: usize) -> EngineResult<Vec<u8>> {
        let len = len.min(self.size as usize);
        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .submitting("map_memory")?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), len);
            self.device.unmap_memory(self.memory);
        }
        Ok(out)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        // Null handles are legal here; a half-built buffer still cleans up.
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Buffer plus bound memory satisfying both `usage` and `props`.
pub fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> EngineResult<GpuBuffer> {
    let device = ctx.device();
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = unsafe { device.create_buffer(&bci, None) }.creating("buffer")?;
    let mut owned = GpuBuffer {
        device: device.clone(),
        buffer,
        memory: vk::DeviceMemory::null(),
        size,
    };

    let req = unsafe { device.get_buffer_memory_requirements(buffer) };
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index: ctx.find_memory_type(req.memory_type_bits, props)?,
        ..Default::default()
    };
    owned.memory = unsafe { device.allocate_memory(&mai, None) }.creating("buffer memory")?;
    unsafe { device.bind_buffer_memory(buffer, owned.memory, 0) }.creating("buffer binding")?;
    Ok(owned)
}

pub fn create_host_visible(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> EngineResult<GpuBuffer> {
    create_buffer(ctx, size, usage, HOST_VISIBLE)
}

/// One-shot copy; blocks until the queue is idle.
pub fn copy_buffer(
    ctx: &DeviceContext,
    src: &GpuBuffer,
    dst: &GpuBuffer,
    size: vk::DeviceSize,
) -> EngineResult<()> {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    ctx.submit_one_shot(|d, cmd| unsafe {
        d.cmd_copy_buffer(cmd, src.handle(), dst.handle(), std::slice::from_ref(&region));
    })
}

/// host -> staging (host-visible) -> new device-local buffer. Staging is released
/// before returning.
pub fn upload_via_staging(
    ctx: &DeviceContext,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> EngineResult<GpuBuffer> {
    if data.is_empty() {
        return Err(EngineError::ResourceCreation {
            what: "staging buffer for an empty upload",
            result: vk::Result::ERROR_INITIALIZATION_FAILED,
        });
    }
    let size = data.len() as vk::DeviceSize;
    let staging = create_host_visible(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(data)?;

    let dst = create_buffer(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    copy_buffer(ctx, &staging, &dst, size)?;
    Ok(dst)
}

/// Device -> host readback of the first `len` bytes of `src`. `src` needs `TRANSFER_SRC`.
pub fn download(ctx: &DeviceContext, src: &GpuBuffer, len: vk::DeviceSize) -> EngineResult<Vec<u8>> {
    let len = len.min(src.size());
    if len == 0 {
        return Ok(Vec::new());
    }
    let readback = create_host_visible(ctx, len, vk::BufferUsageFlags::TRANSFER_DST)?;
    copy_buffer(ctx, src, &readback, len)?;
    readback.read(len as usize)
}

/// 2D image, its memory and one view over the whole image.
pub struct GpuImage {
    device: ash::Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

impl GpuImage {
    pub fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> EngineResult<Self> {
        let device = ctx.device();
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = unsafe { device.create_image(&img_ci, None) }.creating("image")?;
        let mut owned = GpuImage {
            device: device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            extent,
        };

        let req = unsafe { device.get_image_memory_requirements(image) };
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: ctx
                .find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
            ..Default::default()
        };
        owned.memory = unsafe { device.allocate_memory(&alloc, None) }.creating("image memory")?;
        unsafe { device.bind_image_memory(image, owned.memory, 0) }.creating("image binding")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        owned.view = unsafe { device.create_image_view(&view_ci, None) }.creating("image view")?;
        Ok(owned)
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub struct GpuSampler {
    device: ash::Device,
    sampler: vk::Sampler,
}

impl GpuSampler {
    pub fn linear_repeat(ctx: &DeviceContext) -> EngineResult<Self> {
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 1.0,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let sampler = unsafe { ctx.device().create_sampler(&ci, None) }.creating("sampler")?;
        Ok(Self {
            device: ctx.device().clone(),
            sampler,
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for GpuSampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}
