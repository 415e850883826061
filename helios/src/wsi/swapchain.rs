use std::ptr;

use anyhow::Result;
use ash::vk;

use crate::traits::Destructible;
use crate::wsi::Surface;

/// Outcome of a swapchain acquire or present. Out-of-date and suboptimal are
/// the recoverable class of GPU errors: the orchestrator skips the frame and
/// rebuilds swapchain-dependent state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Acquire {
    Next(u32),
    Stale,
}

pub struct Swapchain {
    handle: vk::SwapchainKHR,
    ext: ash::khr::swapchain::Device,
    device: crate::device::LogicalDevice,

    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        instance: &ash::Instance,
        device: crate::device::LogicalDevice,
        physical_device: &crate::device::PhysicalDevice,
        surface: &Surface,
        preferred_extent: vk::Extent2D,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let capabilities = surface.get_capabilities(physical_device.handle())?;
        let formats = surface.get_formats(physical_device.handle())?;
        let present_modes = surface.get_present_modes(physical_device.handle())?;

        let surface_format = formats
            .iter()
            .find(|format| {
                format.format == vk::Format::B8G8R8A8_UNORM
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .copied()
            .unwrap_or(formats[0]);
        let present_mode = present_modes
            .iter()
            .find(|&&mode| mode == vk::PresentModeKHR::MAILBOX)
            .copied()
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: preferred_extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: preferred_extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        let swapchain_ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            p_next: ptr::null(),
            flags: vk::SwapchainCreateFlagsKHR::empty(),
            surface: surface.handle(),
            min_image_count: image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: usage,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            queue_family_index_count: 0,
            p_queue_family_indices: ptr::null(),
            pre_transform: capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old_swapchain
                .map(|swapchain| swapchain.handle)
                .unwrap_or(vk::SwapchainKHR::null()),
            _marker: Default::default(),
        };

        let ext = ash::khr::swapchain::Device::new(instance, device.get_handle());
        let handle = unsafe { ext.create_swapchain(&swapchain_ci, None)? };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkSwapchainKHR {:p}", handle);

        Ok(Self {
            handle,
            ext,
            device,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
        })
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn get_images(&self) -> Result<Vec<vk::Image>> {
        Ok(unsafe { self.ext.get_swapchain_images(self.handle)? })
    }

    pub fn create_image_views(&self, images: &[vk::Image]) -> Result<Vec<vk::ImageView>> {
        images
            .iter()
            .map(|&image| {
                Ok(unsafe {
                    self.device.get_handle().create_image_view(
                        &vk::ImageViewCreateInfo {
                            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                            p_next: ptr::null(),
                            flags: vk::ImageViewCreateFlags::empty(),
                            image,
                            view_type: vk::ImageViewType::TYPE_2D,
                            format: self.format,
                            components: Default::default(),
                            subresource_range: vk::ImageSubresourceRange {
                                aspect_mask: vk::ImageAspectFlags::COLOR,
                                base_mip_level: 0,
                                level_count: 1,
                                base_array_layer: 0,
                                layer_count: 1,
                            },
                            _marker: Default::default(),
                        },
                        None,
                    )?
                })
            })
            .collect()
    }

    /// Acquires the next back buffer, mapping out-of-date/suboptimal to
    /// [`Acquire::Stale`] instead of an error.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: &crate::sync::BinarySemaphore,
    ) -> Result<Acquire> {
        let result = unsafe {
            self.ext.acquire_next_image(
                self.handle,
                timeout,
                semaphore.handle(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, false)) => Ok(Acquire::Next(index)),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(error) => Err(error.into()),
        }
    }

    /// Presents the back buffer; `Stale` asks the orchestrator to rebuild
    pub fn present(
        &self,
        queue: &crate::device::Queue,
        wait_semaphore: &crate::sync::BinarySemaphore,
        image_index: u32,
    ) -> Result<Acquire> {
        let wait_semaphores = [wait_semaphore.handle()];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            p_next: ptr::null(),
            wait_semaphore_count: 1,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            swapchain_count: 1,
            p_swapchains: swapchains.as_ptr(),
            p_image_indices: image_indices.as_ptr(),
            p_results: ptr::null_mut(),
            _marker: Default::default(),
        };
        let result = unsafe { self.ext.queue_present(queue.handle(), &present_info) };
        match result {
            Ok(false) => Ok(Acquire::Next(image_index)),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(error) => Err(error.into()),
        }
    }
}

impl Destructible for Swapchain {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkSwapchainKHR {:p}", self.handle);

        unsafe {
            self.ext.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}
