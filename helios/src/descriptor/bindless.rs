use std::collections::HashMap;
use std::ptr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::resource::SamplerDescription;
use crate::traits::Destructible;
use crate::util::IndexPool;
use crate::{HeliosError, FRAMES_IN_FLIGHT};

pub const STORAGE_IMAGE_BINDING: u32 = 0;
pub const SAMPLED_IMAGE_BINDING: u32 = 1;
pub const COMBINED_IMAGE_SAMPLER_BINDING: u32 = 2;
pub const SAMPLER_BINDING: u32 = 3;

const MAX_STORAGE_IMAGES: u32 = 65536;
const MAX_SAMPLED_IMAGES: u32 = 65536;
const MAX_COMBINED_IMAGE_SAMPLERS: u32 = 65536;
const MAX_SAMPLERS: u32 = 1024;

/// Slot usage counts for the debug overlay
#[derive(Debug, Default, Copy, Clone)]
pub struct BindlessStatistics {
    pub storage_images_used: usize,
    pub sampled_images_used: usize,
    pub combined_image_samplers_used: usize,
    pub samplers_used: usize,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct BindlessTableInner {
    device: crate::device::LogicalDevice,
    set_layout: vk::DescriptorSetLayout,
    pools: [vk::DescriptorPool; FRAMES_IN_FLIGHT],
    /// One descriptor set per in-flight frame. Publishing a slot writes every
    /// set so the slot is usable on the next frame without racing the GPU.
    sets: [vk::DescriptorSet; FRAMES_IN_FLIGHT],
    #[derivative(Debug = "ignore")]
    slots: Mutex<[IndexPool; 4]>,
    #[derivative(Debug = "ignore")]
    samplers: Mutex<HashMap<SamplerDescription, (vk::Sampler, u32)>>,
}

impl Destructible for BindlessTableInner {
    fn destroy(&mut self) {
        let device = self.device.get_handle();
        if let Ok(samplers) = self.samplers.lock() {
            for (sampler, _) in samplers.values() {
                unsafe { device.destroy_sampler(*sampler, None) };
            }
        }
        unsafe {
            for pool in self.pools {
                device.destroy_descriptor_pool(pool, None);
            }
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(feature = "raii")]
impl Drop for BindlessTableInner {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Bindless support: four process-wide index pools (storage image, sampled
/// image, combined image sampler, sampler), one descriptor set per buffered
/// frame.
///
/// Cheap to clone; the descriptor pools, layout and cached samplers are
/// torn down once the last clone drops.
#[derive(Debug, Clone)]
pub struct BindlessTable {
    inner: Arc<BindlessTableInner>,
}

fn descriptor_type_for_binding(binding: u32) -> vk::DescriptorType {
    match binding {
        STORAGE_IMAGE_BINDING => vk::DescriptorType::STORAGE_IMAGE,
        SAMPLED_IMAGE_BINDING => vk::DescriptorType::SAMPLED_IMAGE,
        COMBINED_IMAGE_SAMPLER_BINDING => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        SAMPLER_BINDING => vk::DescriptorType::SAMPLER,
        _ => unreachable!("unknown bindless binding"),
    }
}

impl BindlessTable {
    pub fn new(device: crate::device::LogicalDevice) -> Result<Self> {
        let binding_sizes = [
            (STORAGE_IMAGE_BINDING, MAX_STORAGE_IMAGES),
            (SAMPLED_IMAGE_BINDING, MAX_SAMPLED_IMAGES),
            (COMBINED_IMAGE_SAMPLER_BINDING, MAX_COMBINED_IMAGE_SAMPLERS),
            (SAMPLER_BINDING, MAX_SAMPLERS),
        ];

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = binding_sizes
            .iter()
            .map(|&(binding, count)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(descriptor_type_for_binding(binding))
                    .descriptor_count(count)
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
            | vk::DescriptorBindingFlags::UPDATE_UNUSED_WHILE_PENDING;
            4];
        let mut binding_flags_ci = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&binding_flags);
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags_ci);
        let set_layout = unsafe {
            device
                .get_handle()
                .create_descriptor_set_layout(&layout_ci, None)?
        };

        let pool_sizes: Vec<vk::DescriptorPoolSize> = binding_sizes
            .iter()
            .map(|&(binding, count)| vk::DescriptorPoolSize {
                ty: descriptor_type_for_binding(binding),
                descriptor_count: count,
            })
            .collect();

        let mut pools = [vk::DescriptorPool::null(); FRAMES_IN_FLIGHT];
        let mut sets = [vk::DescriptorSet::null(); FRAMES_IN_FLIGHT];
        for frame in 0..FRAMES_IN_FLIGHT {
            let pool = unsafe {
                device.get_handle().create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default()
                        .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                        .max_sets(1)
                        .pool_sizes(&pool_sizes),
                    None,
                )?
            };
            let set = unsafe {
                device.get_handle().allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(pool)
                        .set_layouts(std::slice::from_ref(&set_layout)),
                )?[0]
            };
            pools[frame] = pool;
            sets[frame] = set;
        }

        Ok(Self {
            inner: Arc::new(BindlessTableInner {
                device,
                set_layout,
                pools,
                sets,
                slots: Mutex::new(Default::default()),
                samplers: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.inner.set_layout
    }

    /// Descriptor set bound for the given in-flight frame slot
    pub fn set_for_frame(&self, frame_index: usize) -> vk::DescriptorSet {
        self.inner.sets[frame_index % FRAMES_IN_FLIGHT]
    }

    /// Allocates the smallest free slot for `binding` and writes the
    /// descriptor into every buffered frame's set.
    pub fn publish(&self, binding: u32, image_info: vk::DescriptorImageInfo) -> Result<u32> {
        if binding != SAMPLER_BINDING && image_info.image_view == vk::ImageView::null() {
            return Err(anyhow::Error::from(HeliosError::IncompleteDescriptorInfo));
        }
        if (binding == SAMPLER_BINDING || binding == COMBINED_IMAGE_SAMPLER_BINDING)
            && image_info.sampler == vk::Sampler::null()
        {
            return Err(anyhow::Error::from(HeliosError::IncompleteDescriptorInfo));
        }

        let slot = self
            .inner
            .slots
            .lock()
            .map_err(HeliosError::from)?[binding as usize]
            .allocate();

        let writes: Vec<vk::WriteDescriptorSet> = self
            .inner
            .sets
            .iter()
            .map(|set| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                p_next: ptr::null(),
                dst_set: *set,
                dst_binding: binding,
                dst_array_element: slot,
                descriptor_count: 1,
                descriptor_type: descriptor_type_for_binding(binding),
                p_image_info: &image_info,
                p_buffer_info: ptr::null(),
                p_texel_buffer_view: ptr::null(),
                _marker: Default::default(),
            })
            .collect();
        unsafe {
            self.inner
                .device
                .get_handle()
                .update_descriptor_sets(&writes, &[]);
        }

        Ok(slot)
    }

    /// Hands the slot to the deferred deletion queue; it is recycled only
    /// once every frame that might still reference it has finished.
    pub fn release(&self, binding: u32, slot: u32) -> Result<()> {
        let table = self.clone();
        self.inner.device.defer_deletion(move || {
            if let Ok(mut slots) = table.inner.slots.lock() {
                slots[binding as usize].release(slot);
            }
        })
    }

    /// Returns the cached sampler for `description`, creating and publishing
    /// it on first use.
    pub fn get_sampler(&self, description: &SamplerDescription) -> Result<(vk::Sampler, u32)> {
        if let Some(&entry) = self
            .inner
            .samplers
            .lock()
            .map_err(HeliosError::from)?
            .get(description)
        {
            return Ok(entry);
        }

        let sampler = unsafe {
            match description.reduction_mode {
                Some(mode) => {
                    let mut reduction =
                        vk::SamplerReductionModeCreateInfo::default().reduction_mode(mode);
                    let create_info = description.to_create_info().push_next(&mut reduction);
                    self.inner
                        .device
                        .get_handle()
                        .create_sampler(&create_info, None)?
                }
                None => {
                    let create_info = description.to_create_info();
                    self.inner
                        .device
                        .get_handle()
                        .create_sampler(&create_info, None)?
                }
            }
        };
        let slot = self.publish(
            SAMPLER_BINDING,
            vk::DescriptorImageInfo {
                sampler,
                image_view: vk::ImageView::null(),
                image_layout: vk::ImageLayout::UNDEFINED,
            },
        )?;
        self.inner
            .samplers
            .lock()
            .map_err(HeliosError::from)?
            .insert(*description, (sampler, slot));
        Ok((sampler, slot))
    }

    pub fn get_default_sampler(&self) -> Result<(vk::Sampler, u32)> {
        self.get_sampler(&SamplerDescription::default())
    }

    pub fn statistics(&self) -> Result<BindlessStatistics> {
        let slots = self.inner.slots.lock().map_err(HeliosError::from)?;
        Ok(BindlessStatistics {
            storage_images_used: slots[STORAGE_IMAGE_BINDING as usize].live_count(),
            sampled_images_used: slots[SAMPLED_IMAGE_BINDING as usize].live_count(),
            combined_image_samplers_used: slots[COMBINED_IMAGE_SAMPLER_BINDING as usize].live_count(),
            samplers_used: slots[SAMPLER_BINDING as usize].live_count(),
        })
    }
}

