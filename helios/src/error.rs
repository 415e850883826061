use std::sync::PoisonError;

/// Possible errors
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeliosError {
    #[error("No window was provided")]
    NoWindow,

    #[error("No suitable physical device has been found")]
    NoPhysicalDevice,

    #[error("It is impossible to create requested queue")]
    ImpossibleQueue,

    #[error("Poisoned mutex")]
    PoisonError,

    #[error("Swapchain is stale and must be recreated")]
    StaleSwapchain,

    #[error("Vulkan resource does not have a mapped pointer. You're most likely using GPU only memory")]
    NoMappedPointer,

    #[error("Insufficient space to upload the data")]
    InsufficientSpace,

    #[error("Expected buffer to have vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS")]
    NoShaderDeviceAddress,

    #[error("Memory bucket members have no common memory type bits")]
    IncompatibleMemoryTypeBits,

    #[error("Bindless slot is already populated")]
    SlotAlreadyPublished,

    #[error("Bindless publish is missing an image view or sampler for the target binding")]
    IncompleteDescriptorInfo,

    #[error("Resource has no underlying Vulkan handle, invalidate it first")]
    UninitializedResource,
}

impl<T> From<PoisonError<T>> for HeliosError {
    fn from(_: PoisonError<T>) -> Self {
        HeliosError::PoisonError
    }
}
