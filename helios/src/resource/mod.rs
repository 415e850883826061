pub mod buffer;
pub mod image;
pub mod sampler;

use bitflags::bitflags;

pub use buffer::{Buffer, BufferDescription};
pub use image::{Texture, TextureDescription};
pub use sampler::SamplerDescription;

bitflags! {
    /// Creation behavior flags shared by textures and buffers
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ResourceCreateFlags: u8 {
        /// Create an image view per mip level
        const EXPOSE_MIPS = 1;
        /// Mip contents are blit-generated; widens usage with transfer bits
        const CREATE_MIPS = 1 << 1;
        /// Resource is created without memory, the render graph binds it later
        const GRAPH_MEMORY_CONTROLLED = 1 << 2;
        /// Opt out of memory aliasing even when the graph controls memory
        const FORCE_NO_ALIASING = 1 << 3;
        /// Skip publishing sampled/combined bindless slots, the owner manages them
        const DONT_TOUCH_SAMPLED_IMAGES = 1 << 4;
    }
}

bitflags! {
    /// Memory class flags for buffers
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ExtraBufferFlags: u32 {
        /// Buffer exposes a device address
        const ADDRESSABLE = 1;
        /// Device local memory, implies a device address
        const DEVICE_LOCAL = (1 << 1) | Self::ADDRESSABLE.bits();
        /// Host visible memory
        const HOST = 1 << 2;
        /// Device local and host visible at once
        const RESIZABLE_BAR = (1 << 3) | Self::DEVICE_LOCAL.bits() | Self::HOST.bits();
    }
}

impl ResourceCreateFlags {
    /// True when memory binding is deferred to the render graph's aliaser
    pub fn graph_bound(&self) -> bool {
        self.contains(ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED)
            && !self.contains(ResourceCreateFlags::FORCE_NO_ALIASING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebar_implies_device_local_and_host() {
        assert!(ExtraBufferFlags::RESIZABLE_BAR.contains(ExtraBufferFlags::DEVICE_LOCAL));
        assert!(ExtraBufferFlags::RESIZABLE_BAR.contains(ExtraBufferFlags::HOST));
        assert!(ExtraBufferFlags::DEVICE_LOCAL.contains(ExtraBufferFlags::ADDRESSABLE));
    }

    #[test]
    fn force_no_aliasing_overrides_graph_control() {
        let flags = ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED | ResourceCreateFlags::FORCE_NO_ALIASING;
        assert!(!flags.graph_bound());
        assert!(ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED.graph_bound());
    }
}
