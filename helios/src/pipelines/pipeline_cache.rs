use std::path::{Path, PathBuf};
use std::ptr;

use anyhow::Result;
use ash::vk;
use tracing::{debug, warn};

use crate::traits::Destructible;

/// Pipeline cache persisted to a file keyed by the gpu's vendor/device ids
/// and driver/device uuids, so stale caches from other drivers are never
/// loaded.
pub struct PipelineCache {
    handle: vk::PipelineCache,
    device: crate::device::LogicalDevice,
    path: Option<PathBuf>,
}

impl PipelineCache {
    pub fn new(
        device: crate::device::LogicalDevice,
        physical_device: &crate::device::PhysicalDevice,
        directory: Option<&Path>,
    ) -> Result<Self> {
        let path = directory.map(|directory| {
            directory.join(format!("{}.pipeline_cache", physical_device.pipeline_cache_key()))
        });
        let initial_data = match path.as_deref() {
            Some(path) => match std::fs::read(path) {
                Ok(data) => {
                    debug!("Loaded pipeline cache ({} bytes) from {path:?}", data.len());
                    data
                }
                Err(_) => Vec::new(),
            },
            None => Vec::new(),
        };

        // The driver validates the blob's own header; a corrupt file just
        // falls back to an empty cache.
        let create = |data: &[u8]| unsafe {
            device.get_handle().create_pipeline_cache(
                &vk::PipelineCacheCreateInfo {
                    s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::PipelineCacheCreateFlags::empty(),
                    initial_data_size: data.len(),
                    p_initial_data: if data.is_empty() {
                        ptr::null()
                    } else {
                        data.as_ptr() as *const _
                    },
                    _marker: Default::default(),
                },
                None,
            )
        };
        let handle = match create(&initial_data) {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Pipeline cache blob was rejected, starting clean");
                create(&[])?
            }
        };

        Ok(Self {
            handle,
            device,
            path,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    /// Serializes the cache back to its keyed file
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let data = unsafe { self.device.get_handle().get_pipeline_cache_data(self.handle)? };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &data)?;
        debug!("Saved pipeline cache ({} bytes) to {path:?}", data.len());
        Ok(())
    }
}

impl Destructible for PipelineCache {
    fn destroy(&mut self) {
        if let Err(error) = self.save() {
            warn!("Failed to save pipeline cache: {error}");
        }
        unsafe {
            self.device
                .get_handle()
                .destroy_pipeline_cache(self.handle, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for PipelineCache {
    fn drop(&mut self) {
        self.destroy();
    }
}
