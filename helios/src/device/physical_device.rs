use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::HeliosError;

/// Selected physical device together with the properties the renderer keeps
/// reaching for: queue families, limits, and the uuids that key the pipeline
/// cache file.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct PhysicalDevice {
    handle: vk::PhysicalDevice,
    #[derivative(Debug = "ignore")]
    properties: vk::PhysicalDeviceProperties,
    #[derivative(Debug = "ignore")]
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    driver_uuid: [u8; vk::UUID_SIZE],
    device_uuid: [u8; vk::UUID_SIZE],
}

impl PhysicalDevice {
    /// Picks the first device exposing a graphics+compute+transfer queue,
    /// preferring discrete GPUs.
    pub fn select(instance: &ash::Instance) -> Result<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };
        let mut fallback: Option<vk::PhysicalDevice> = None;
        for device in devices {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };
            let has_general_queue = families.iter().any(|family| {
                family.queue_flags.contains(
                    vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                )
            });
            if !has_general_queue {
                continue;
            }

            let properties = unsafe { instance.get_physical_device_properties(device) };
            if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                return Self::from_handle(instance, device);
            }
            fallback.get_or_insert(device);
        }

        match fallback {
            Some(device) => Self::from_handle(instance, device),
            None => Err(anyhow::Error::from(HeliosError::NoPhysicalDevice)),
        }
    }

    fn from_handle(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Result<Self> {
        let mut id_properties = vk::PhysicalDeviceIDProperties::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::default().push_next(&mut id_properties);
        unsafe { instance.get_physical_device_properties2(handle, &mut properties2) };

        let properties = properties2.properties;
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(handle) };
        Ok(Self {
            handle,
            properties,
            memory_properties,
            driver_uuid: id_properties.driver_uuid,
            device_uuid: id_properties.device_uuid,
        })
    }

    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    pub fn get_properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn get_memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Nanoseconds per timestamp tick, used to convert query pool results
    pub fn timestamp_period(&self) -> f32 {
        self.properties.limits.timestamp_period
    }

    pub fn find_general_queue_family(&self, instance: &ash::Instance) -> Result<u32> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(self.handle) };
        families
            .iter()
            .position(|family| {
                family.queue_flags.contains(
                    vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                )
            })
            .map(|index| index as u32)
            .ok_or_else(|| anyhow::Error::from(HeliosError::ImpossibleQueue))
    }

    /// File stem that keys the on-disk pipeline cache to this gpu + driver
    pub fn pipeline_cache_key(&self) -> String {
        let hex = |uuid: &[u8; vk::UUID_SIZE]| {
            uuid.iter().map(|byte| format!("{byte:02x}")).collect::<String>()
        };
        format!(
            "{:08x}_{:08x}_{}_{}",
            self.properties.vendor_id,
            self.properties.device_id,
            hex(&self.driver_uuid),
            hex(&self.device_uuid),
        )
    }
}
