use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::device::physical_device::PhysicalDevice;
use crate::traits::Destructible;
use crate::util::DeletionQueue;
use crate::HeliosError;

#[derive(Derivative)]
#[derivative(Debug)]
struct LogicalDeviceInner {
    #[derivative(Debug = "ignore")]
    handle: ash::Device,
    /// Queue families in use
    queue_families: Vec<u32>,
    #[derivative(Debug = "ignore")]
    debug_utils: Option<ash::ext::debug_utils::Device>,
    /// Global frame counter, advanced once per presented frame. Keys the
    /// deferred deletion buckets.
    frame_number: AtomicU64,
    #[derivative(Debug = "ignore")]
    deletion_queue: Mutex<DeletionQueue>,
}

impl Destructible for LogicalDeviceInner {
    fn destroy(&mut self) {
        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Destroying VkDevice {:p}", self.handle.handle());

        // Destructors may defer further deletions, so drain outside the lock
        // until the queue runs dry.
        loop {
            let funcs = match self.deletion_queue.lock() {
                Ok(mut queue) => queue.drain_all(),
                Err(_) => break,
            };
            if funcs.is_empty() {
                break;
            }
            for func in funcs {
                func();
            }
        }
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for LogicalDeviceInner {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Effectively [`ash::Device`] with shared ownership, plus the two pieces of
/// process-wide mutable state the render graph relies on: the global frame
/// counter and the frame-buffered deferred deletion queue.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct LogicalDevice {
    inner: Arc<LogicalDeviceInner>,
}

pub struct LogicalDeviceCreateInfo<'a> {
    pub instance: &'a ash::Instance,
    pub physical_device: &'a PhysicalDevice,
    pub device_ci: vk::DeviceCreateInfo<'a>,
    pub queue_families: Vec<u32>,
    pub debug_utils: bool,
}

impl LogicalDevice {
    pub fn new(create_info: LogicalDeviceCreateInfo) -> Result<Self> {
        let device = unsafe {
            create_info.instance.create_device(
                create_info.physical_device.handle(),
                &create_info.device_ci,
                None,
            )?
        };

        #[cfg(feature = "log-lifetimes")]
        tracing::trace!("Creating VkDevice {:p}", device.handle());

        let debug_utils = create_info
            .debug_utils
            .then(|| ash::ext::debug_utils::Device::new(create_info.instance, &device));

        Ok(Self {
            inner: Arc::new(LogicalDeviceInner {
                handle: device,
                queue_families: create_info.queue_families,
                debug_utils,
                frame_number: AtomicU64::new(0),
                deletion_queue: Mutex::new(DeletionQueue::new()),
            }),
        })
    }

    /// Get the underlying [`VkDevice`](ash::Device)
    pub fn get_handle(&self) -> &ash::Device {
        &self.inner.handle
    }

    pub fn get_debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.inner.debug_utils.as_ref()
    }

    pub fn get_used_queue_families(&self) -> &[u32] {
        &self.inner.queue_families
    }

    pub fn frame_number(&self) -> u64 {
        self.inner.frame_number.load(Ordering::Relaxed)
    }

    pub fn advance_frame(&self) -> u64 {
        self.inner.frame_number.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Swapchain invalidation resets the deletion window together with the
    /// frame counter.
    pub fn reset_frame_number(&self) {
        self.inner.frame_number.store(0, Ordering::Relaxed);
    }

    /// Queues `func` to run once the current frame is out of flight
    pub fn defer_deletion<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let frame = self.frame_number();
        self.inner
            .deletion_queue
            .lock()
            .map_err(HeliosError::from)?
            .push(frame, func);
        Ok(())
    }

    /// Flushes deletion buckets that are out of flight, or everything when
    /// `immediate` (only after a wait-idle). Destructors run outside the
    /// queue lock, since they may defer further deletions themselves.
    pub fn poll_deletion_queues(&self, immediate: bool) -> Result<()> {
        loop {
            let funcs = {
                let mut queue = self
                    .inner
                    .deletion_queue
                    .lock()
                    .map_err(HeliosError::from)?;
                if immediate {
                    queue.drain_all()
                } else {
                    queue.drain_expired(self.frame_number())
                }
            };
            if funcs.is_empty() {
                return Ok(());
            }
            for func in funcs {
                func();
            }
            if !immediate {
                return Ok(());
            }
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.inner.handle.device_wait_idle()? };
        Ok(())
    }

    pub fn cmd_begin_label(&self, cmd: vk::CommandBuffer, name: &CStr) {
        if let Some(debug_utils) = self.inner.debug_utils.as_ref() {
            let label = vk::DebugUtilsLabelEXT::default()
                .label_name(name)
                .color([1.0, 1.0, 1.0, 1.0]);
            unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
        }
    }

    pub fn cmd_end_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = self.inner.debug_utils.as_ref() {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
        }
    }
}

impl PartialEq for LogicalDevice {
    fn eq(&self, other: &Self) -> bool {
        self.inner.handle.handle() == other.inner.handle.handle()
    }
}
impl Eq for LogicalDevice {}
