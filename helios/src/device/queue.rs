use ash::vk;

/// Represents a [`vk::Queue`] and its indices.
///
/// A single graphics+compute+transfer capable queue handles every submission;
/// the async pass types exist at the API surface only.
#[derive(Copy, Clone, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
    index: u32,
}

impl Queue {
    pub fn new(handle: vk::Queue, family_index: u32, index: u32) -> Self {
        Self {
            handle,
            family_index,
            index,
        }
    }

    /// Get the underlying copy of [`VkQueue`](vk::Queue)
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    pub fn get_family_index(&self) -> u32 {
        self.family_index
    }

    pub fn get_index(&self) -> u32 {
        self.index
    }
}
