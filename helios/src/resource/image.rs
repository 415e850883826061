use std::ptr;

use anyhow::Result;
use ash::vk;
use derivative::Derivative;
use glam::UVec3;

use crate::allocators::{ArcAllocator, MemoryAllocation, MemoryLocation};
use crate::descriptor::{
    BindlessTable, COMBINED_IMAGE_SAMPLER_BINDING, SAMPLED_IMAGE_BINDING, STORAGE_IMAGE_BINDING,
};
use crate::resource::{ResourceCreateFlags, SamplerDescription};
use crate::traits::Destructible;
use crate::HeliosError;

/// Number of mips a full chain has for the given base dimensions
pub fn full_mip_level_count(width: u32, height: u32) -> u32 {
    (32 - width.max(height).max(1).leading_zeros()).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescription {
    pub ty: vk::ImageType,
    pub dimensions: UVec3,
    pub format: vk::Format,
    pub usage_flags: vk::ImageUsageFlags,
    pub sampler: Option<SamplerDescription>,
    pub layer_count: u32,
    pub samples: vk::SampleCountFlags,
    pub create_flags: ResourceCreateFlags,
    /// Explicit mip count, otherwise derived from the create flags
    pub mip_count: Option<u32>,
}

impl Default for TextureDescription {
    fn default() -> Self {
        Self {
            ty: vk::ImageType::TYPE_2D,
            dimensions: UVec3::ONE,
            format: vk::Format::R8G8B8A8_UNORM,
            usage_flags: vk::ImageUsageFlags::SAMPLED,
            sampler: None,
            layer_count: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            create_flags: ResourceCreateFlags::empty(),
            mip_count: None,
        }
    }
}

impl TextureDescription {
    /// Every texture is sampleable; blit-generated mips additionally need the
    /// transfer usages.
    pub fn new(
        ty: vk::ImageType,
        dimensions: UVec3,
        format: vk::Format,
        usage_flags: vk::ImageUsageFlags,
        create_flags: ResourceCreateFlags,
    ) -> Self {
        let mut usage_flags = usage_flags | vk::ImageUsageFlags::SAMPLED;
        if create_flags.contains(ResourceCreateFlags::CREATE_MIPS) {
            usage_flags |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }
        Self {
            ty,
            dimensions,
            format,
            usage_flags,
            create_flags,
            ..Default::default()
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        if let Some(count) = self.mip_count {
            return count;
        }
        if self
            .create_flags
            .intersects(ResourceCreateFlags::EXPOSE_MIPS | ResourceCreateFlags::CREATE_MIPS)
        {
            full_mip_level_count(self.dimensions.x, self.dimensions.y)
        } else {
            1
        }
    }

    /// Pool reuse equivalence. Dimensions are ignored since a pooled texture
    /// can be resized in place.
    pub fn reuse_compatible(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.create_flags == other.create_flags
            && self.layer_count == other.layer_count
            && self.format == other.format
            && self.usage_flags == other.usage_flags
            && self.sampler == other.sampler
            && self.samples == other.samples
            && self.mip_count == other.mip_count
    }

    pub fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

#[derive(Debug, Default, Copy, Clone)]
struct MipView {
    view: vk::ImageView,
    sampled_slot: Option<u32>,
    combined_slot: Option<u32>,
    storage_slot: Option<u32>,
}

/// A texture plus its mip-chain views and bindless slots.
///
/// When the description is graph-memory-controlled the raw image is created
/// without memory; the render graph's aliaser binds it and then calls
/// [`Texture::rg_finalize`]. Otherwise the texture owns its allocation and
/// finalizes immediately.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Texture {
    device: crate::device::LogicalDevice,
    #[derivative(Debug = "ignore")]
    allocator: ArcAllocator,
    #[derivative(Debug = "ignore")]
    bindless: BindlessTable,
    description: TextureDescription,
    handle: Option<vk::Image>,
    #[derivative(Debug = "ignore")]
    allocation: Option<MemoryAllocation>,
    mip_chain: Vec<MipView>,
    name: Option<String>,
}

impl Texture {
    pub fn new(
        device: crate::device::LogicalDevice,
        allocator: ArcAllocator,
        bindless: BindlessTable,
        description: TextureDescription,
        name: Option<String>,
    ) -> Result<Self> {
        debug_assert!(
            !description
                .create_flags
                .contains(ResourceCreateFlags::EXPOSE_MIPS | ResourceCreateFlags::CREATE_MIPS),
            "a texture can't both expose and blit-generate its mips"
        );
        let mut texture = Self {
            device,
            allocator,
            bindless,
            description,
            handle: None,
            allocation: None,
            mip_chain: Vec::new(),
            name,
        };
        texture.invalidate()?;
        Ok(texture)
    }

    /// Recreates the underlying [`VkImage`](vk::Image), pushing the previous
    /// image, views and bindless slots through deferred deletion.
    pub fn invalidate(&mut self) -> Result<()> {
        self.destroy_handle()?;

        let mip_levels = self.description.mip_level_count();
        let image_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            p_next: ptr::null(),
            flags: if self.description.layer_count == 6 {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            },
            image_type: self.description.ty,
            format: self.description.format,
            extent: vk::Extent3D {
                width: self.description.dimensions.x,
                height: self.description.dimensions.y,
                depth: self.description.dimensions.z,
            },
            mip_levels,
            array_layers: self.description.layer_count,
            samples: self.description.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: self.description.usage_flags,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: ptr::null(),
            initial_layout: vk::ImageLayout::UNDEFINED,
            _marker: Default::default(),
        };
        let handle = unsafe { self.device.get_handle().create_image(&image_ci, None)? };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Created VkImage {:p}", handle);

        self.handle = Some(handle);
        self.apply_debug_name();

        if self.description.create_flags.graph_bound() {
            return Ok(());
        }

        let requirements = unsafe {
            self.device
                .get_handle()
                .get_image_memory_requirements(handle)
        };
        let allocation = self.allocator.allocate(
            self.name.as_deref().unwrap_or("texture"),
            &requirements,
            MemoryLocation::GpuOnly,
        )?;
        unsafe {
            self.device.get_handle().bind_image_memory(
                handle,
                allocation.memory()?,
                allocation.offset()?,
            )?
        };
        self.allocation = Some(allocation);
        self.build_mip_chain()
    }

    /// Post-bind finalizer invoked by the memory aliaser
    pub fn rg_finalize(&mut self) -> Result<()> {
        self.build_mip_chain()
    }

    fn build_mip_chain(&mut self) -> Result<()> {
        let image = self.handle.ok_or(HeliosError::UninitializedResource)?;
        let mip_levels = self.description.mip_level_count();
        let expose_mips = self
            .description
            .create_flags
            .contains(ResourceCreateFlags::EXPOSE_MIPS);
        let create_mips = self
            .description
            .create_flags
            .contains(ResourceCreateFlags::CREATE_MIPS);
        let dont_touch_sampled = self
            .description
            .create_flags
            .contains(ResourceCreateFlags::DONT_TOUCH_SAMPLED_IMAGES);
        let aspect_mask = if self.description.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_type = match (self.description.layer_count, self.description.ty) {
            (1, vk::ImageType::TYPE_1D) => vk::ImageViewType::TYPE_1D,
            (1, vk::ImageType::TYPE_3D) => vk::ImageViewType::TYPE_3D,
            (1, _) => vk::ImageViewType::TYPE_2D,
            (6, _) => vk::ImageViewType::CUBE,
            _ => vk::ImageViewType::TYPE_2D_ARRAY,
        };

        let chain_len = if expose_mips { mip_levels } else { 1 };
        self.mip_chain.clear();
        for base_mip in 0..chain_len {
            let view = unsafe {
                self.device.get_handle().create_image_view(
                    &vk::ImageViewCreateInfo {
                        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                        p_next: ptr::null(),
                        flags: vk::ImageViewCreateFlags::empty(),
                        image,
                        view_type,
                        format: self.description.format,
                        components: Default::default(),
                        subresource_range: vk::ImageSubresourceRange {
                            aspect_mask,
                            base_mip_level: base_mip,
                            level_count: if create_mips { mip_levels } else { 1 },
                            base_array_layer: 0,
                            layer_count: self.description.layer_count,
                        },
                        _marker: Default::default(),
                    },
                    None,
                )?
            };

            let mut mip = MipView {
                view,
                ..Default::default()
            };
            if !dont_touch_sampled {
                mip.sampled_slot = Some(self.bindless.publish(
                    SAMPLED_IMAGE_BINDING,
                    vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                )?);
                let (sampler, _) = match self.description.sampler.as_ref() {
                    Some(description) => self.bindless.get_sampler(description)?,
                    None => self.bindless.get_default_sampler()?,
                };
                mip.combined_slot = Some(self.bindless.publish(
                    COMBINED_IMAGE_SAMPLER_BINDING,
                    vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    },
                )?);
            }
            if self
                .description
                .usage_flags
                .contains(vk::ImageUsageFlags::STORAGE)
            {
                mip.storage_slot = Some(self.bindless.publish(
                    STORAGE_IMAGE_BINDING,
                    vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::GENERAL,
                    },
                )?);
            }
            self.mip_chain.push(mip);
        }
        Ok(())
    }

    /// Recreates the image when the extent actually changed. Returns whether
    /// an invalidation happened so the pool can mark the resource for rebind.
    pub fn resize(&mut self, dimensions: UVec3) -> Result<bool> {
        if self.description.dimensions == dimensions {
            return Ok(false);
        }
        self.description.dimensions = dimensions;
        self.invalidate()?;
        Ok(true)
    }

    pub fn handle(&self) -> Result<vk::Image> {
        self.handle
            .ok_or_else(|| anyhow::Error::from(HeliosError::UninitializedResource))
    }

    pub fn get_description(&self) -> &TextureDescription {
        &self.description
    }

    pub fn view(&self, mip_level: u32) -> Result<vk::ImageView> {
        let index = (mip_level as usize).min(self.mip_chain.len().saturating_sub(1));
        self.mip_chain
            .get(index)
            .map(|mip| mip.view)
            .ok_or_else(|| anyhow::Error::from(HeliosError::UninitializedResource))
    }

    pub fn sampled_slot(&self, mip_level: u32) -> Option<u32> {
        self.mip_chain.get(mip_level as usize)?.sampled_slot
    }

    pub fn combined_slot(&self, mip_level: u32) -> Option<u32> {
        self.mip_chain.get(mip_level as usize)?.combined_slot
    }

    pub fn storage_slot(&self, mip_level: u32) -> Option<u32> {
        self.mip_chain.get(mip_level as usize)?.storage_slot
    }

    pub fn memory_requirements(&self) -> Result<vk::MemoryRequirements> {
        let handle = self.handle()?;
        Ok(unsafe {
            self.device
                .get_handle()
                .get_image_memory_requirements(handle)
        })
    }

    /// Binds the image into bucket memory at the aliaser-chosen offset
    pub fn bind_memory(&self, memory: vk::DeviceMemory, offset: u64) -> Result<()> {
        let handle = self.handle()?;
        unsafe {
            self.device
                .get_handle()
                .bind_image_memory(handle, memory, offset)?
        };
        Ok(())
    }

    /// Dynamic rendering attachment descriptor for one mip of this texture
    pub fn attachment_info(
        &self,
        layout: vk::ImageLayout,
        clear_value: vk::ClearValue,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        mip_level: u32,
    ) -> Result<vk::RenderingAttachmentInfo<'static>> {
        Ok(vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            p_next: ptr::null(),
            image_view: self.view(mip_level)?,
            image_layout: layout,
            resolve_mode: vk::ResolveModeFlags::NONE,
            resolve_image_view: vk::ImageView::null(),
            resolve_image_layout: vk::ImageLayout::UNDEFINED,
            load_op,
            store_op,
            clear_value,
            _marker: Default::default(),
        })
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
        self.apply_debug_name();
    }

    fn apply_debug_name(&self) {
        let (Some(debug_utils), Some(handle), Some(name)) = (
            self.device.get_debug_utils(),
            self.handle,
            self.name.as_deref(),
        ) else {
            return;
        };
        if let Ok(name) = std::ffi::CString::new(name) {
            let info = vk::DebugUtilsObjectNameInfoEXT::default()
                .object_handle(handle)
                .object_name(&name);
            unsafe {
                debug_utils.set_debug_utils_object_name(&info).ok();
            }
        }
    }

    fn destroy_handle(&mut self) -> Result<()> {
        if self.handle.is_none() && self.mip_chain.is_empty() {
            return Ok(());
        }
        let handle = self.handle.take();
        let allocation = self.allocation.take();
        let mip_chain = std::mem::take(&mut self.mip_chain);
        let device = self.device.clone();
        let allocator = self.allocator.clone();
        let bindless = self.bindless.clone();
        self.device.defer_deletion(move || {
            for mip in mip_chain {
                if let Some(slot) = mip.sampled_slot {
                    bindless.release(SAMPLED_IMAGE_BINDING, slot).ok();
                }
                if let Some(slot) = mip.combined_slot {
                    bindless.release(COMBINED_IMAGE_SAMPLER_BINDING, slot).ok();
                }
                if let Some(slot) = mip.storage_slot {
                    bindless.release(STORAGE_IMAGE_BINDING, slot).ok();
                }
                unsafe { device.get_handle().destroy_image_view(mip.view, None) };
            }
            if let Some(image) = handle {
                #[cfg(feature = "log-lifetimes")]
                tracing::trace!("Destroying VkImage {:p}", image);

                unsafe { device.get_handle().destroy_image(image, None) };
            }
            if let Some(allocation) = allocation {
                allocator.free(allocation).ok();
            }
        })
    }
}

impl Destructible for Texture {
    fn destroy(&mut self) {
        self.destroy_handle().ok();
    }
}

#[cfg(feature = "raii")]
impl Drop for Texture {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mip_chain_counts() {
        assert_eq!(full_mip_level_count(1, 1), 1);
        assert_eq!(full_mip_level_count(2, 2), 2);
        assert_eq!(full_mip_level_count(1920, 1080), 11);
        assert_eq!(full_mip_level_count(256, 1), 9);
    }

    #[test]
    fn reuse_ignores_dimensions() {
        let a = TextureDescription::new(
            vk::ImageType::TYPE_2D,
            UVec3::new(128, 128, 1),
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ResourceCreateFlags::empty(),
        );
        let mut b = a.clone();
        b.dimensions = UVec3::new(512, 512, 1);
        assert!(a.reuse_compatible(&b));

        b.format = vk::Format::R8G8B8A8_UNORM;
        assert!(!a.reuse_compatible(&b));
    }

    #[test]
    fn create_mips_widens_usage() {
        let description = TextureDescription::new(
            vk::ImageType::TYPE_2D,
            UVec3::new(64, 64, 1),
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::empty(),
            ResourceCreateFlags::CREATE_MIPS,
        );
        assert!(description.usage_flags.contains(
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        ));
        assert_eq!(description.mip_level_count(), 7);
    }
}
