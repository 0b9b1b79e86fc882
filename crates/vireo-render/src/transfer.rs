// SPDX-License-Identifier: CEPL-1.0
//! Host-to-device transfers.
//!
//! Device-local memory is not host-writable, so every upload goes through a
//! host-visible staging buffer and a one-shot copy on the transfer queue. The
//! copy is waited on with `queue_wait_idle` before the staging buffer is
//! released. Uploads are setup-time work; nothing here runs per frame.

use ash::vk;
use tracing::debug;

use crate::api::{DeviceApi, Submission};
use crate::error::{RenderError, Result, VkResultExt};
use crate::memory::{Buffer, Image, MemoryTypeTable};
use crate::{TextureData, Vertex};

const STAGING_PROPS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Access masks and pipeline stages for one supported layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The closed transition table. Only the two transitions a sampled texture
/// goes through are known; every other pair is an error.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RenderError::UnsupportedLayoutTransition { old, new }),
    }
}

/// Vertex and index data packed into one device-local buffer.
#[derive(Debug)]
pub struct GeometryBuffer {
    pub buffer: Buffer,
    pub vertex_offset: vk::DeviceSize,
    pub index_offset: vk::DeviceSize,
    pub index_count: u32,
}

/// Parameters for [`TransferEngine::create_image`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

pub struct TransferEngine<'a, D: DeviceApi> {
    dev: &'a D,
    memory: &'a MemoryTypeTable,
    pool: vk::CommandPool,
    queue: vk::Queue,
}

impl<'a, D: DeviceApi> TransferEngine<'a, D> {
    /// `pool` must belong to the family of `queue`.
    pub fn new(
        dev: &'a D,
        memory: &'a MemoryTypeTable,
        pool: vk::CommandPool,
        queue: vk::Queue,
    ) -> Self {
        Self {
            dev,
            memory,
            pool,
            queue,
        }
    }

    pub fn device(&self) -> &'a D {
        self.dev
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        self.memory
            .find(type_bits, properties)
            .ok_or(RenderError::NoMemoryType {
                type_bits,
                properties,
            })
    }

    fn allocate(
        &self,
        req: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::DeviceMemory, u32)> {
        let memory_type = self.find_memory_type(req.memory_type_bits, properties)?;
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: memory_type,
            ..Default::default()
        };
        let memory = self.dev.allocate_memory(&mai).call("vkAllocateMemory")?;
        Ok((memory, memory_type))
    }

    /// Buffer with its own allocation. The allocation is sized from the
    /// driver's requirements, so it may be larger than `size`.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        self.create_shared_buffer(size, usage, properties, &[])
    }

    /// As [`Self::create_buffer`], but usable from every queue family in
    /// `families` without ownership transfers. One distinct family (or
    /// none) gives an exclusive buffer.
    pub fn create_shared_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        families: &[u32],
    ) -> Result<Buffer> {
        let mut distinct: Vec<u32> = Vec::with_capacity(families.len());
        for &f in families {
            if !distinct.contains(&f) {
                distinct.push(f);
            }
        }
        let bci = vk::BufferCreateInfo::default().size(size).usage(usage);
        let bci = if distinct.len() > 1 {
            bci.sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&distinct)
        } else {
            bci.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };
        let handle = self.dev.create_buffer(&bci).call("vkCreateBuffer")?;
        let req = self.dev.buffer_memory_requirements(handle);

        let (memory, memory_type) = match self.allocate(req, properties) {
            Ok(m) => m,
            Err(e) => {
                self.dev.destroy_buffer(handle);
                return Err(e);
            }
        };
        if let Err(e) = self
            .dev
            .bind_buffer_memory(handle, memory)
            .call("vkBindBufferMemory")
        {
            self.dev.destroy_buffer(handle);
            self.dev.free_memory(memory);
            return Err(e);
        }

        debug!(size, allocated = req.size, memory_type, ?usage, "buffer created");
        Ok(Buffer {
            handle,
            size,
            memory,
            allocated_size: req.size.max(size),
            memory_type,
        })
    }

    pub fn create_staging_buffer(&self, size: vk::DeviceSize) -> Result<Buffer> {
        self.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, STAGING_PROPS)
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        self.dev.destroy_buffer(buffer.handle);
        self.dev.free_memory(buffer.memory);
    }

    /// 2D, single mip, optimal tiling, starts in `UNDEFINED`.
    pub fn create_image(
        &self,
        desc: ImageDesc,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Image> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let handle = self.dev.create_image(&ici).call("vkCreateImage")?;
        let req = self.dev.image_memory_requirements(handle);

        let (memory, _) = match self.allocate(req, properties) {
            Ok(m) => m,
            Err(e) => {
                self.dev.destroy_image(handle);
                return Err(e);
            }
        };
        if let Err(e) = self
            .dev
            .bind_image_memory(handle, memory)
            .call("vkBindImageMemory")
        {
            self.dev.destroy_image(handle);
            self.dev.free_memory(memory);
            return Err(e);
        }

        debug!(
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            "image created"
        );
        Ok(Image {
            handle,
            memory,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }

    pub fn destroy_image(&self, image: Image) {
        self.dev.destroy_image(image.handle);
        self.dev.free_memory(image.memory);
    }

    /// Direct host write into a host-visible buffer (uniforms).
    pub fn write_host_visible(
        &self,
        dst: &Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<()> {
        check_bounds(dst, offset, data.len())?;
        self.dev
            .write_memory(dst.memory, offset, data)
            .call("vkMapMemory")
    }

    /// Allocates and begins a one-time-submit command buffer on the
    /// transfer pool.
    pub fn begin_single_time(&self) -> Result<vk::CommandBuffer> {
        let cmd = self
            .dev
            .allocate_command_buffers(self.pool, 1)
            .call("vkAllocateCommandBuffers")?[0];
        if let Err(e) = self
            .dev
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .call("vkBeginCommandBuffer")
        {
            self.dev.free_command_buffers(self.pool, &[cmd]);
            return Err(e);
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for `cmd`, then frees it.
    pub fn submit_single_time(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let res = self
            .dev
            .end_command_buffer(cmd)
            .call("vkEndCommandBuffer")
            .and_then(|()| {
                let submission = Submission {
                    command_buffer: cmd,
                    ..Default::default()
                };
                self.dev
                    .queue_submit(self.queue, &submission, vk::Fence::null())
                    .call("vkQueueSubmit")
            })
            .and_then(|()| self.dev.queue_wait_idle(self.queue).call("vkQueueWaitIdle"));
        self.dev.free_command_buffers(self.pool, &[cmd]);
        res
    }

    /// Fills a fresh staging buffer with `data` and runs `record` against it
    /// in a one-shot command buffer. The staging buffer is released on every
    /// path, after the queue has gone idle.
    fn with_staging(
        &self,
        data: &[u8],
        record: impl FnOnce(vk::CommandBuffer, vk::Buffer),
    ) -> Result<()> {
        let staging = self.create_staging_buffer(data.len() as vk::DeviceSize)?;
        let res = self
            .dev
            .write_memory(staging.memory, 0, data)
            .call("vkMapMemory")
            .and_then(|()| self.begin_single_time())
            .and_then(|cmd| {
                record(cmd, staging.handle);
                self.submit_single_time(cmd)
            });
        self.destroy_buffer(staging);
        res
    }

    /// Copies `data` into device-local `dst` at `dst_offset`. Returns once
    /// the copy has completed on the GPU.
    pub fn upload_to_buffer(
        &self,
        dst: &Buffer,
        dst_offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_bounds(dst, dst_offset, data.len())?;
        let size = data.len() as vk::DeviceSize;
        self.with_staging(data, |cmd, staging| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset,
                size,
            };
            self.dev.cmd_copy_buffer(cmd, staging, dst.handle, region);
        })?;
        debug!(bytes = size, dst_offset, "buffer upload complete");
        Ok(())
    }

    /// Copies tightly packed texels into `dst`, which must already be in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn upload_to_image(
        &self,
        dst: &Image,
        pixels: &[u8],
        rows: u32,
        cols: u32,
        texel_size: u32,
    ) -> Result<()> {
        if dst.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(RenderError::ImageLayoutMismatch {
                expected: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                actual: dst.layout,
            });
        }
        let expected = rows as usize * cols as usize * texel_size as usize;
        if pixels.len() != expected {
            return Err(RenderError::PixelSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        if pixels.is_empty() {
            return Ok(());
        }
        self.with_staging(pixels, |cmd, staging| {
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: cols,
                    height: rows,
                    depth: 1,
                },
            };
            self.dev.cmd_copy_buffer_to_image(
                cmd,
                staging,
                dst.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                region,
            );
        })?;
        debug!(rows, cols, texel_size, "image upload complete");
        Ok(())
    }

    /// Records and waits for a barrier moving `image` to `new`. On success
    /// the tracked layout is updated; on failure it is left untouched.
    pub fn transition_image_layout(&self, image: &mut Image, new: vk::ImageLayout) -> Result<()> {
        let masks = transition_masks(image.layout, new)?;
        let barrier = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: masks.src_access,
            dst_access_mask: masks.dst_access,
            old_layout: image.layout,
            new_layout: new,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: image.handle,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let cmd = self.begin_single_time()?;
        self.dev
            .cmd_image_barrier(cmd, masks.src_stage, masks.dst_stage, &barrier);
        self.submit_single_time(cmd)?;
        image.layout = new;
        Ok(())
    }

    /// Creates a sampled RGBA8 texture and fills it:
    /// undefined -> transfer dst, copy, transfer dst -> shader read.
    pub fn upload_texture(&self, texture: &TextureData<'_>) -> Result<Image> {
        let mut image = self.create_image(
            ImageDesc {
                width: texture.width,
                height: texture.height,
                format: vk::Format::R8G8B8A8_SRGB,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                samples: vk::SampleCountFlags::TYPE_1,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let res = self
            .transition_image_layout(&mut image, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .and_then(|()| {
                self.upload_to_image(&image, texture.pixels, texture.height, texture.width, 4)
            })
            .and_then(|()| {
                self.transition_image_layout(&mut image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            });
        match res {
            Ok(()) => Ok(image),
            Err(e) => {
                self.destroy_image(image);
                Err(e)
            }
        }
    }

    /// One device-local buffer with vertices at offset 0 and indices right
    /// after them.
    ///
    /// The copy runs on this engine's queue while draws read the buffer on
    /// the graphics queue; `families` lists every queue family that touches
    /// it, so a dedicated transfer family gets a concurrent buffer.
    pub fn upload_geometry(
        &self,
        vertices: &[Vertex],
        indices: &[u16],
        families: &[u32],
    ) -> Result<GeometryBuffer> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::EmptyGeometry {
                vertices: vertices.len(),
                indices: indices.len(),
            });
        }
        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_offset = vertex_bytes.len() as vk::DeviceSize;
        let total = index_offset + index_bytes.len() as vk::DeviceSize;

        let buffer = self.create_shared_buffer(
            total,
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::INDEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            families,
        )?;
        let res = self
            .upload_to_buffer(&buffer, 0, vertex_bytes)
            .and_then(|()| self.upload_to_buffer(&buffer, index_offset, index_bytes));
        if let Err(e) = res {
            self.destroy_buffer(buffer);
            return Err(e);
        }
        Ok(GeometryBuffer {
            buffer,
            vertex_offset: 0,
            index_offset,
            index_count: indices.len() as u32,
        })
    }
}

fn check_bounds(dst: &Buffer, offset: vk::DeviceSize, len: usize) -> Result<()> {
    let len = len as vk::DeviceSize;
    match offset.checked_add(len) {
        Some(end) if end <= dst.size => Ok(()),
        _ => Err(RenderError::UploadOutOfBounds {
            offset,
            len,
            capacity: dst.size,
        }),
    }
}
