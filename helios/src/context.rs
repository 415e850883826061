//! Frame orchestration: instance/device bring-up, swapchain ownership, the
//! per-frame acquire -> execute -> present loop and profiler readback.

use std::ffi::CStr;
use std::path::PathBuf;
use std::ptr;
use std::time::Instant;

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::info;

use crate::allocators::ArcAllocator;
use crate::command::{CmdBuffer, CommandPool};
use crate::descriptor::BindlessTable;
use crate::device::{LogicalDevice, LogicalDeviceCreateInfo, PhysicalDevice, Queue};
use crate::pipelines::{PipelineCache, PipelineLayout};
use crate::render_graph::TransientResourcePool;
use crate::sync::{BinarySemaphore, Fence};
use crate::wsi::{Acquire, Surface, Swapchain};
use crate::FRAMES_IN_FLIGHT;

/// One profiling entry: either CPU seconds since frame start, or (before
/// readback) GPU query indices that the next fence wait converts to seconds.
#[derive(Debug, Clone)]
pub struct ProfilerTask {
    pub name: String,
    pub color: [f32; 4],
    pub start: f64,
    pub end: f64,
}

/// Per in-flight frame slot state
pub struct FrameData {
    pub command_pool: CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub render_finished_fence: Fence,
    pub image_available: BinarySemaphore,
    pub render_finished: BinarySemaphore,

    pub timestamp_query_pool: Option<vk::QueryPool>,
    pub timestamp_capacity: u32,
    pub next_timestamp: u32,

    pub cpu_profiler: Vec<ProfilerTask>,
    pub gpu_profiler: Vec<ProfilerTask>,
    pub frame_start: Instant,
}

pub struct RenderContextCreateInfo {
    pub app_name: String,
    pub display_handle: RawDisplayHandle,
    pub window_handle: RawWindowHandle,
    pub extent: vk::Extent2D,
    pub enable_validation: bool,
    /// Where the pipeline cache file lives; `None` disables persistence
    pub pipeline_cache_directory: Option<PathBuf>,
}

/// Owns the Vulkan bring-up and drives the frame loop. The render graph
/// reaches everything it needs (device, queue, bindless set, frame data)
/// through this context.
///
/// Fields drop in declaration order, which doubles as the teardown order:
/// frame sync objects and pipeline state first, the swapchain before its
/// surface, and the device inner last through its outstanding clones. The
/// instance is never destroyed and lives for the process.
pub struct RenderContext {
    frames: Vec<FrameData>,
    pipeline_cache: PipelineCache,
    pipeline_layout: PipelineLayout,
    bindless: BindlessTable,

    swapchain: Swapchain,
    swapchain_images: Vec<vk::Image>,
    swapchain_views: Vec<vk::ImageView>,
    swapchain_needs_resize: bool,
    preferred_extent: vk::Extent2D,
    surface: Surface,

    allocator: ArcAllocator,
    general_queue: Queue,
    device: LogicalDevice,
    physical_device: PhysicalDevice,
    instance: ash::Instance,
    #[allow(dead_code)]
    entry: ash::Entry,

    global_frame_number: u64,
    current_frame_index: usize,
    current_image_index: u32,
}

impl RenderContext {
    pub fn new(create_info: RenderContextCreateInfo) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let app_name = std::ffi::CString::new(create_info.app_name.as_str())?;
        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_next: ptr::null(),
            p_application_name: app_name.as_ptr(),
            application_version: vk::make_api_version(0, 0, 1, 0),
            p_engine_name: app_name.as_ptr(),
            engine_version: vk::make_api_version(0, 0, 1, 0),
            api_version: vk::API_VERSION_1_3,
            _marker: Default::default(),
        };

        let mut instance_extensions: Vec<*const std::ffi::c_char> =
            ash_window::enumerate_required_extensions(create_info.display_handle)?.to_vec();
        if create_info.enable_validation {
            instance_extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
        let layers: Vec<*const std::ffi::c_char> = if create_info.enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo {
                    s_type: vk::StructureType::INSTANCE_CREATE_INFO,
                    p_next: ptr::null(),
                    flags: vk::InstanceCreateFlags::empty(),
                    p_application_info: &app_info,
                    enabled_layer_count: layers.len() as u32,
                    pp_enabled_layer_names: layers.as_ptr(),
                    enabled_extension_count: instance_extensions.len() as u32,
                    pp_enabled_extension_names: instance_extensions.as_ptr(),
                    _marker: Default::default(),
                },
                None,
            )?
        };

        let surface = Surface::new(
            &entry,
            &instance,
            create_info.display_handle,
            create_info.window_handle,
        )?;
        let physical_device = PhysicalDevice::select(&instance)?;
        info!(
            "Selected GPU: {}",
            physical_device
                .get_properties()
                .device_name_as_c_str()
                .unwrap_or(c"unknown")
                .to_string_lossy()
        );
        let queue_family = physical_device.find_general_queue_family(&instance)?;

        let queue_priority = 1.0f32;
        let queue_ci = vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            p_next: ptr::null(),
            flags: vk::DeviceQueueCreateFlags::empty(),
            queue_family_index: queue_family,
            queue_count: 1,
            p_queue_priorities: &queue_priority,
            _marker: Default::default(),
        };
        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .buffer_device_address(true)
            .host_query_reset(true);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13);
        let device_ci = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            p_next: &mut features2 as *mut _ as *const _,
            flags: vk::DeviceCreateFlags::empty(),
            queue_create_info_count: 1,
            p_queue_create_infos: &queue_ci,
            enabled_layer_count: 0,
            pp_enabled_layer_names: ptr::null(),
            enabled_extension_count: device_extensions.len() as u32,
            pp_enabled_extension_names: device_extensions.as_ptr(),
            p_enabled_features: ptr::null(),
            _marker: Default::default(),
        };

        let device = LogicalDevice::new(LogicalDeviceCreateInfo {
            instance: &instance,
            physical_device: &physical_device,
            device_ci,
            queue_families: vec![queue_family],
            debug_utils: create_info.enable_validation,
        })?;
        let general_queue = Queue::new(
            unsafe { device.get_handle().get_device_queue(queue_family, 0) },
            queue_family,
            0,
        );

        let allocator = ArcAllocator::new(gpu_allocator::vulkan::Allocator::new(
            &gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.get_handle().clone(),
                physical_device: physical_device.handle(),
                debug_settings: Default::default(),
                buffer_device_address: true,
                allocation_sizes: Default::default(),
            },
        )?);

        let bindless = BindlessTable::new(device.clone())?;
        let pipeline_layout = PipelineLayout::new(device.clone(), bindless.set_layout())?;
        let pipeline_cache = PipelineCache::new(
            device.clone(),
            &physical_device,
            create_info.pipeline_cache_directory.as_deref(),
        )?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            &physical_device,
            &surface,
            create_info.extent,
            None,
        )?;
        let swapchain_images = swapchain.get_images()?;
        let swapchain_views = swapchain.create_image_views(&swapchain_images)?;

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            let command_pool = CommandPool::new(
                device.clone(),
                queue_family,
                vk::CommandPoolCreateFlags::empty(),
            )?;
            let command_buffer = command_pool.allocate(1)?.remove(0).handle();
            frames.push(FrameData {
                command_pool,
                command_buffer,
                render_finished_fence: Fence::new(device.clone(), vk::FenceCreateFlags::SIGNALED)?,
                image_available: BinarySemaphore::new(device.clone())?,
                render_finished: BinarySemaphore::new(device.clone())?,
                timestamp_query_pool: None,
                timestamp_capacity: 0,
                next_timestamp: 0,
                cpu_profiler: Vec::new(),
                gpu_profiler: Vec::new(),
                frame_start: Instant::now(),
            });
        }

        Ok(Self {
            frames,
            pipeline_cache,
            pipeline_layout,
            bindless,
            swapchain,
            swapchain_images,
            swapchain_views,
            swapchain_needs_resize: false,
            preferred_extent: create_info.extent,
            surface,
            allocator,
            general_queue,
            device,
            physical_device,
            instance,
            entry,
            global_frame_number: 0,
            current_frame_index: 0,
            current_image_index: 0,
        })
    }

    /// Creates a transient resource pool bound to this context's device
    pub fn create_transient_pool(&self) -> TransientResourcePool {
        TransientResourcePool::new(
            self.device.clone(),
            self.allocator.clone(),
            self.bindless.clone(),
        )
    }

    /// Starts the frame: flushes out-of-flight deletions, rebuilds a stale
    /// swapchain (returning `false` so the caller skips the frame), waits on
    /// the in-flight fence, reads back the slot's GPU timestamps, acquires
    /// the next back buffer and ticks the pool.
    pub fn begin_frame(&mut self, pool: &mut TransientResourcePool) -> Result<bool> {
        self.device.poll_deletion_queues(false)?;

        if self.swapchain_needs_resize {
            self.device.wait_idle()?;
            self.invalidate_swapchain()?;
            self.swapchain_needs_resize = false;
            self.device.reset_frame_number();
            self.global_frame_number = 0;
            self.device.poll_deletion_queues(true)?;
            return Ok(false);
        }

        let frame = &mut self.frames[self.current_frame_index];
        frame.render_finished_fence.wait(u64::MAX)?;

        // The fence guarantees the slot's timestamps are available
        if let (Some(query_pool), true) = (frame.timestamp_query_pool, frame.next_timestamp > 0) {
            let mut ticks = vec![0u64; frame.next_timestamp as usize];
            let readback = unsafe {
                self.device.get_handle().get_query_pool_results(
                    query_pool,
                    0,
                    &mut ticks,
                    vk::QueryResultFlags::TYPE_64,
                )
            };
            if readback.is_ok() {
                let period_seconds = self.physical_device.timestamp_period() as f64 * 1e-9;
                let base = ticks.first().copied().unwrap_or(0);
                for task in frame.gpu_profiler.iter_mut() {
                    let begin = ticks.get(task.start as usize).copied().unwrap_or(base);
                    let end = ticks.get(task.end as usize).copied().unwrap_or(base);
                    task.start = begin.saturating_sub(base) as f64 * period_seconds;
                    task.end = end.saturating_sub(base) as f64 * period_seconds;
                }
            }
            frame.next_timestamp = 0;
        }

        match self
            .swapchain
            .acquire_next_image(u64::MAX, &frame.image_available)?
        {
            Acquire::Next(index) => self.current_image_index = index,
            Acquire::Stale => {
                self.swapchain_needs_resize = true;
                return Ok(false);
            }
        }

        let frame = &mut self.frames[self.current_frame_index];
        frame.render_finished_fence.reset()?;
        frame.command_pool.reset()?;
        frame.frame_start = Instant::now();

        pool.tick();
        Ok(true)
    }

    /// Presents with the render-finished semaphore and rotates the frame
    pub fn end_frame(&mut self) -> Result<()> {
        let frame = &self.frames[self.current_frame_index];
        if self.swapchain.present(
            &self.general_queue,
            &frame.render_finished,
            self.current_image_index,
        )? == Acquire::Stale
        {
            self.swapchain_needs_resize = true;
        }

        self.current_frame_index = (self.current_frame_index + 1) % FRAMES_IN_FLIGHT;
        self.global_frame_number += 1;
        self.device.advance_frame();
        Ok(())
    }

    fn invalidate_swapchain(&mut self) -> Result<()> {
        for view in self.swapchain_views.drain(..) {
            unsafe { self.device.get_handle().destroy_image_view(view, None) };
        }
        let new_swapchain = Swapchain::new(
            &self.instance,
            self.device.clone(),
            &self.physical_device,
            &self.surface,
            self.preferred_extent,
            Some(&self.swapchain),
        )?;
        // The device was idled; the replaced swapchain destroys on drop
        drop(std::mem::replace(&mut self.swapchain, new_swapchain));
        self.swapchain_images = self.swapchain.get_images()?;
        self.swapchain_views = self.swapchain.create_image_views(&self.swapchain_images)?;
        Ok(())
    }

    /// Ask for a different backbuffer size on the next rebuild
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        self.preferred_extent = extent;
        self.swapchain_needs_resize = true;
    }

    pub fn device(&self) -> &LogicalDevice {
        &self.device
    }

    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    pub fn general_queue(&self) -> Queue {
        self.general_queue
    }

    pub fn allocator(&self) -> &ArcAllocator {
        &self.allocator
    }

    pub fn bindless(&self) -> &BindlessTable {
        &self.bindless
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout.handle()
    }

    pub fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipeline_cache
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame_index
    }

    pub fn global_frame_number(&self) -> u64 {
        self.global_frame_number
    }

    pub fn current_frame(&self) -> &FrameData {
        &self.frames[self.current_frame_index]
    }

    pub fn current_frame_mut(&mut self) -> &mut FrameData {
        &mut self.frames[self.current_frame_index]
    }

    /// CPU and GPU profiler task lists of the current frame slot, for an
    /// external overlay
    pub fn profiler_tasks(&self) -> (&[ProfilerTask], &[ProfilerTask]) {
        let frame = self.current_frame();
        (&frame.cpu_profiler, &frame.gpu_profiler)
    }

    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn current_swapchain_image(&self) -> vk::Image {
        self.swapchain_images[self.current_image_index as usize]
    }

    pub fn current_swapchain_image_view(&self) -> vk::ImageView {
        self.swapchain_views[self.current_image_index as usize]
    }

    /// Teardown ahead of drop: waits for the GPU, drains deferred deletions,
    /// persists the pipeline cache and releases the raw objects no drop
    /// covers. Everything else is destroyed by the fields' own drops.
    pub fn shutdown(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        self.device.poll_deletion_queues(true)?;

        for frame in &mut self.frames {
            if let Some(query_pool) = frame.timestamp_query_pool.take() {
                unsafe { self.device.get_handle().destroy_query_pool(query_pool, None) };
            }
        }
        self.pipeline_cache.save()?;
        for view in self.swapchain_views.drain(..) {
            unsafe { self.device.get_handle().destroy_image_view(view, None) };
        }
        Ok(())
    }
}
