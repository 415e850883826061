use bitflags::bitflags;

use crate::render_graph::error::RenderGraphError;

/// Stable identity of a logical graph resource within one frame's graph
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// A single subresource touched by a pass. `subresource_index` is the mip
/// level for textures and 0 for buffers. The name is the one the pass used,
/// which for write aliases differs from the canonical resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubresourceId {
    pub name: String,
    pub id: ResourceId,
    pub subresource_index: u32,
}

impl SubresourceId {
    pub fn new(name: impl Into<String>, id: ResourceId, subresource_index: u32) -> Self {
        Self {
            name: name.into(),
            id,
            subresource_index,
        }
    }
}

bitflags! {
    /// Access intent of one pass on one subresource. Cumulative: repeated
    /// declarations OR together, so a subresource can be storage-read and
    /// storage-written within the same pass. Empty means undefined.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ResourceState: u32 {
        const VERTEX_BUFFER = 1;
        const INDEX_BUFFER = 1 << 1;
        const UNIFORM_BUFFER = 1 << 2;
        const VERTEX_SHADER_RESOURCE = 1 << 3;
        const FRAGMENT_SHADER_RESOURCE = 1 << 4;
        const COMPUTE_SHADER_RESOURCE = 1 << 5;
        const STORAGE_BUFFER = 1 << 6;
        const RENDER_TARGET = 1 << 7;
        const DEPTH_READ = 1 << 8;
        const DEPTH_WRITE = 1 << 9;
        const INDIRECT_ARGUMENT = 1 << 10;
        const COPY_SOURCE = 1 << 11;
        const COPY_DESTINATION = 1 << 12;
        const RESOLVE_SOURCE = 1 << 13;
        const RESOLVE_DESTINATION = 1 << 14;
        const READ = 1 << 15;
        const WRITE = 1 << 16;
    }
}

impl ResourceState {
    pub fn is_undefined(&self) -> bool {
        self.is_empty()
    }
}

/// Declarative selector for a contiguous subset of a texture's mip levels
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MipSet {
    Explicit(u32),
    FirstMip,
    LastMip,
    AllMips,
    /// Inclusive range; `None` upper bound means through the last mip
    Range(u32, Option<u32>),
}

impl MipSet {
    /// Resolves against the texture's declared mip count into the range of
    /// mip indices the declaration touches.
    pub fn resolve(&self, mip_count: u32) -> Result<std::ops::Range<u32>, RenderGraphError> {
        debug_assert!(mip_count > 0);
        let (base, count) = match *self {
            MipSet::Explicit(mip) => (mip, 1),
            MipSet::FirstMip => (0, 1),
            MipSet::LastMip => (mip_count - 1, 1),
            MipSet::AllMips => (0, mip_count),
            MipSet::Range(first, last) => {
                let last = last.unwrap_or(mip_count - 1);
                if last < first {
                    return Err(RenderGraphError::InvalidMipRange {
                        base: first,
                        count: 0,
                        available: mip_count,
                    });
                }
                (first, last - first + 1)
            }
        };
        if base + count > mip_count {
            return Err(RenderGraphError::InvalidMipRange {
                base,
                count,
                available: mip_count,
            });
        }
        Ok(base..base + count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_set_resolution() {
        assert_eq!(MipSet::Explicit(3).resolve(8).unwrap(), 3..4);
        assert_eq!(MipSet::FirstMip.resolve(8).unwrap(), 0..1);
        assert_eq!(MipSet::LastMip.resolve(8).unwrap(), 7..8);
        assert_eq!(MipSet::AllMips.resolve(8).unwrap(), 0..8);
        assert_eq!(MipSet::Range(2, Some(5)).resolve(8).unwrap(), 2..6);
        assert_eq!(MipSet::Range(2, None).resolve(8).unwrap(), 2..8);
    }

    #[test]
    fn mip_set_rejects_out_of_range() {
        assert!(MipSet::Explicit(8).resolve(8).is_err());
        assert!(MipSet::Range(5, Some(2)).resolve(8).is_err());
        assert!(MipSet::Range(0, Some(9)).resolve(8).is_err());
    }

    #[test]
    fn states_accumulate() {
        let mut state = ResourceState::default();
        assert!(state.is_undefined());
        state |= ResourceState::STORAGE_BUFFER | ResourceState::READ;
        state |= ResourceState::STORAGE_BUFFER | ResourceState::WRITE;
        assert!(state.contains(
            ResourceState::STORAGE_BUFFER | ResourceState::READ | ResourceState::WRITE
        ));
    }
}
