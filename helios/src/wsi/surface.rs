use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::traits::Destructible;

#[derive(Clone)]
pub struct Surface {
    handle: vk::SurfaceKHR,
    ext: ash::khr::surface::Instance,
}

impl Surface {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<Self> {
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkSurfaceKHR {:p}", handle);

        Ok(Self {
            handle,
            ext: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    pub fn get_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe {
            self.ext
                .get_physical_device_surface_capabilities(physical_device, self.handle)?
        })
    }

    pub fn get_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe {
            self.ext
                .get_physical_device_surface_formats(physical_device, self.handle)?
        })
    }

    pub fn get_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>> {
        Ok(unsafe {
            self.ext
                .get_physical_device_surface_present_modes(physical_device, self.handle)?
        })
    }
}

impl Destructible for Surface {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkSurfaceKHR {:p}", self.handle);

        unsafe {
            self.ext.destroy_surface(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for Surface {
    fn drop(&mut self) {
        self.destroy();
    }
}
