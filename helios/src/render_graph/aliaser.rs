//! Packs transient resources with non-overlapping lifetimes into shared
//! memory allocations.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use ash::vk;
use derivative::Derivative;

use crate::allocators::MemoryAllocation;
use crate::render_graph::pool::ResourceHandle;
use crate::render_graph::resource::ResourceId;
use crate::util::align_up;
use crate::HeliosError;

/// Closed interval `[begin, end]` of pass indices in topological order
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Lifetime {
    pub begin: u32,
    pub end: u32,
}

impl Lifetime {
    pub fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Which pool vector the resource lives in
    pub handle: ResourceHandle,
    pub debug_name: String,
    /// Chooses the bucket allocation size this resource is assigned into
    pub requirements: vk::MemoryRequirements,
    /// Chooses the bucket by memory type
    pub property_flags: vk::MemoryPropertyFlags,
}

#[derive(Debug, Clone)]
pub(crate) struct AliasedResource {
    pub info: ResourceInfo,
    pub id: ResourceId,
    pub offset: u64,
}

/// A single allocation sized by its seed resource; aliased members attach at
/// computed byte offsets.
#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct MemoryBucket {
    pub property_flags: vk::MemoryPropertyFlags,
    pub requirements: vk::MemoryRequirements,
    #[derivative(Debug = "ignore")]
    pub allocation: Option<MemoryAllocation>,
    pub aliased: Vec<AliasedResource>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum OffsetKind {
    Start,
    End,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct MemoryRegion {
    offset: u64,
    size: u64,
}

/// Per-class aliaser state: resource infos and lifetimes for the current
/// frame, the rebind set, and the buckets that survive across frames.
#[derive(Debug, Default)]
pub struct ResourceMemoryAliaser {
    pub(crate) resource_info: HashMap<ResourceId, ResourceInfo>,
    pub(crate) lifetimes: HashMap<ResourceId, Lifetime>,
    pub(crate) needs_rebind: HashSet<ResourceId>,
    pub(crate) buckets: Vec<MemoryBucket>,
}

impl ResourceMemoryAliaser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill_resource_info(
        &mut self,
        handle: ResourceHandle,
        id: ResourceId,
        debug_name: &str,
        requirements: vk::MemoryRequirements,
        property_flags: vk::MemoryPropertyFlags,
    ) {
        self.resource_info.insert(
            id,
            ResourceInfo {
                handle,
                debug_name: debug_name.to_string(),
                requirements,
                property_flags,
            },
        );
    }

    pub fn set_lifetime(&mut self, id: ResourceId, lifetime: Lifetime) {
        self.lifetimes.insert(id, lifetime);
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.resource_info.contains_key(&id)
    }

    pub fn mark_rebind(&mut self, id: ResourceId) {
        self.needs_rebind.insert(id);
    }

    /// Per-frame bookkeeping reset; buckets persist
    pub fn clear_state(&mut self) {
        self.resource_info.clear();
        self.lifetimes.clear();
        self.needs_rebind.clear();
    }

    /// Buckets are rebuilt from scratch when the set of resources changed or
    /// any member's stored requirements no longer match the current map entry.
    pub(crate) fn needs_defragmentation(&self) -> bool {
        let mut resources_in_buckets = 0usize;
        for bucket in &self.buckets {
            resources_in_buckets += bucket.aliased.len();
            if resources_in_buckets > self.resource_info.len() {
                return true;
            }
            for aliased in &bucket.aliased {
                match self.resource_info.get(&aliased.id) {
                    Some(info)
                        if info.property_flags == aliased.info.property_flags
                            && info.requirements.size == aliased.info.requirements.size
                            && info.requirements.alignment == aliased.info.requirements.alignment
                            && info.requirements.memory_type_bits
                                == aliased.info.requirements.memory_type_bits => {}
                    _ => return true,
                }
            }
        }
        resources_in_buckets != self.resource_info.len()
    }
}

/// Non-aliasable byte intervals inside `bucket` for a candidate with the
/// given lifetime: one `(start, Start)`/`(end, End)` pair per already-aliased
/// member whose lifetime intersects, plus sentinels at 0 and the bucket size.
fn build_non_aliasable_offsets(
    bucket: &MemoryBucket,
    lifetimes: &HashMap<ResourceId, Lifetime>,
    candidate_lifetime: Lifetime,
) -> Vec<(u64, OffsetKind)> {
    let mut offsets = vec![(0u64, OffsetKind::End)];
    let seed = &bucket.aliased[0];
    for aliased in &bucket.aliased {
        let lifetime = lifetimes.get(&aliased.id).copied().unwrap_or_default();
        if lifetime.intersects(&candidate_lifetime) {
            offsets.push((aliased.offset, OffsetKind::Start));
            offsets.push((
                aliased.offset + aliased.info.requirements.size,
                OffsetKind::End,
            ));
        }
    }
    offsets.push((seed.info.requirements.size, OffsetKind::Start));
    offsets.sort_by_key(|&(offset, _)| offset);
    offsets
}

/// Walks adjacent offset pairs with a running depth counter; a gap between an
/// `End` at depth zero and the next `Start` is aliasable. Picks the tightest
/// fitting gap whose aligned offset still fits the bucket.
fn find_best_region(
    offsets: &[(u64, OffsetKind)],
    bucket: &MemoryBucket,
    candidate: &ResourceInfo,
) -> Option<MemoryRegion> {
    let seed_size = bucket.aliased[0].info.requirements.size;
    let mut best: Option<MemoryRegion> = None;
    let mut depth: i64 = 0;

    for window in offsets.windows(2) {
        let (current_offset, current_kind) = window[0];
        let (next_offset, next_kind) = window[1];
        depth = (depth + if current_kind == OffsetKind::Start { 1 } else { -1 }).max(0);

        let reached_aliasable_gap =
            depth == 0 && current_kind == OffsetKind::End && next_kind == OffsetKind::Start;

        // vkBind*Memory requires an aligned location
        let aligned_offset = align_up(current_offset, candidate.requirements.alignment);
        let region_size = next_offset.saturating_sub(aligned_offset);

        let fits_region = region_size > 0 && candidate.requirements.size <= region_size;
        let fits_allocation = aligned_offset + candidate.requirements.size <= seed_size;
        if !reached_aliasable_gap || !fits_region || !fits_allocation {
            continue;
        }

        if best.is_none_or(|best| region_size <= best.size) {
            best = Some(MemoryRegion {
                offset: aligned_offset,
                size: region_size,
            });
        }
    }

    best
}

/// Pure packing core. Takes resources sorted ascending by size, pops them
/// largest first and either aliases each into an existing bucket or opens a
/// new one seeded by it at offset 0. Deterministic: the same input produces
/// the same offsets.
pub(crate) fn pack_buckets(
    mut unaliased: Vec<(ResourceId, ResourceInfo)>,
    lifetimes: &HashMap<ResourceId, Lifetime>,
) -> Vec<MemoryBucket> {
    let mut buckets: Vec<MemoryBucket> = Vec::new();

    while let Some((id, info)) = unaliased.pop() {
        let candidate_lifetime = lifetimes.get(&id).copied().unwrap_or_default();

        let mut placement: Option<(usize, u64)> = None;
        for (bucket_index, bucket) in buckets.iter().enumerate() {
            // The seed resource fully occupies its bucket: eligibility needs
            // matching memory properties and a disjoint seed lifetime.
            let seed = &bucket.aliased[0];
            let seed_lifetime = lifetimes.get(&seed.id).copied().unwrap_or_default();
            if seed_lifetime.intersects(&candidate_lifetime)
                || info.property_flags != seed.info.property_flags
            {
                continue;
            }

            let offsets = build_non_aliasable_offsets(bucket, lifetimes, candidate_lifetime);
            if let Some(region) = find_best_region(&offsets, bucket, &info) {
                placement = Some((bucket_index, region.offset));
                break;
            }
        }

        match placement {
            Some((bucket_index, offset)) => {
                buckets[bucket_index]
                    .aliased
                    .push(AliasedResource { info, id, offset });
            }
            None => buckets.push(MemoryBucket {
                property_flags: info.property_flags,
                requirements: info.requirements,
                allocation: None,
                aliased: vec![AliasedResource {
                    info,
                    id,
                    offset: 0,
                }],
            }),
        }
    }

    buckets
}

/// Folds member requirements: max of alignments, intersection of memory type
/// bits, union of property flags. An empty intersection is fatal.
pub(crate) fn fold_bucket_requirements(
    bucket: &MemoryBucket,
) -> Result<(vk::MemoryRequirements, vk::MemoryPropertyFlags)> {
    let seed = &bucket.aliased[0];
    let mut requirements = seed.info.requirements;
    let mut property_flags = seed.info.property_flags;
    for aliased in &bucket.aliased {
        requirements.alignment = requirements.alignment.max(aliased.info.requirements.alignment);
        requirements.memory_type_bits &= aliased.info.requirements.memory_type_bits;
        property_flags |= aliased.info.property_flags;
    }
    if requirements.memory_type_bits == 0 {
        return Err(anyhow::Error::from(HeliosError::IncompatibleMemoryTypeBits));
    }
    Ok((requirements, property_flags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::pool::TextureHandle;

    fn info(size: u64, alignment: u64) -> ResourceInfo {
        ResourceInfo {
            handle: ResourceHandle::Texture(TextureHandle(0)),
            debug_name: String::new(),
            requirements: vk::MemoryRequirements {
                size,
                alignment,
                memory_type_bits: !0,
            },
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    fn lifetimes(entries: &[(u64, Lifetime)]) -> HashMap<ResourceId, Lifetime> {
        entries
            .iter()
            .map(|&(id, lifetime)| (ResourceId(id), lifetime))
            .collect()
    }

    #[test]
    fn disjoint_lifetimes_share_a_bucket_at_offset_zero() {
        let resources = vec![
            (ResourceId(0), info(4096, 256)),
            (ResourceId(1), info(4096, 256)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 1)),
            (1, Lifetime::new(2, 3)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].aliased.len(), 2);
        assert_eq!(buckets[0].aliased[0].offset, 0);
        assert_eq!(buckets[0].aliased[1].offset, 0);
    }

    #[test]
    fn overlapping_lifetimes_get_separate_buckets() {
        let resources = vec![
            (ResourceId(0), info(4096, 256)),
            (ResourceId(1), info(4096, 256)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 2)),
            (1, Lifetime::new(1, 3)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn mismatched_property_flags_never_alias() {
        let mut host = info(4096, 256);
        host.property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let resources = vec![(ResourceId(0), info(4096, 256)), (ResourceId(1), host)];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 0)),
            (1, Lifetime::new(5, 5)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        assert_eq!(buckets.len(), 2);
    }

    #[test]
    fn small_resource_fills_gap_next_to_live_one() {
        // Seed: 16KiB, lifetime [0, 10]. A 4KiB resource alive at [2, 3]
        // aliases into it only if it fits beside members that overlap it.
        let resources = vec![
            (ResourceId(1), info(4096, 256)),
            (ResourceId(2), info(8192, 256)),
            (ResourceId(0), info(16384, 256)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 1)),
            (2, Lifetime::new(2, 3)),
            (1, Lifetime::new(2, 3)),
        ]);
        // Pop order: seed 16KiB [0,1], then 8KiB [2,3] (disjoint from the
        // seed, offset 0), then 4KiB [2,3] which overlaps the 8KiB member and
        // must land after its end.
        let buckets = pack_buckets(resources, &lifetimes);
        assert_eq!(buckets.len(), 1);
        let aliased = &buckets[0].aliased;
        assert_eq!(aliased[1].offset, 0);
        assert_eq!(aliased[2].offset, 8192);
    }

    #[test]
    fn aligned_offsets_are_respected() {
        let resources = vec![
            (ResourceId(1), info(1000, 4096)),
            (ResourceId(2), info(1000, 4096)),
            (ResourceId(0), info(16384, 256)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 0)),
            (1, Lifetime::new(1, 2)),
            (2, Lifetime::new(1, 2)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        assert_eq!(buckets.len(), 1);
        let aliased = &buckets[0].aliased;
        assert_eq!(aliased[1].offset, 0);
        // Second overlapping member starts past 1000, aligned up to 4096
        assert_eq!(aliased[2].offset, 4096);
    }

    #[test]
    fn aliasing_never_inflates_memory() {
        let resources = vec![
            (ResourceId(2), info(1024, 64)),
            (ResourceId(1), info(2048, 64)),
            (ResourceId(0), info(8192, 64)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 1)),
            (1, Lifetime::new(2, 3)),
            (2, Lifetime::new(4, 5)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        for bucket in &buckets {
            let total: u64 = bucket.aliased.iter().map(|a| a.info.requirements.size).sum();
            let max = bucket
                .aliased
                .iter()
                .map(|a| a.info.requirements.size)
                .max()
                .unwrap();
            let bucket_size = bucket.aliased[0].info.requirements.size;
            assert!(bucket_size >= max);
            assert!(total >= bucket_size);
        }
    }

    #[test]
    fn packing_is_deterministic_replay() {
        let resources: Vec<(ResourceId, ResourceInfo)> = (0..6u64)
            .map(|i| (ResourceId(i), info(1024 * (i + 1), 256)))
            .collect();
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 1)),
            (1, Lifetime::new(1, 2)),
            (2, Lifetime::new(3, 4)),
            (3, Lifetime::new(0, 4)),
            (4, Lifetime::new(5, 6)),
            (5, Lifetime::new(2, 6)),
        ]);

        let first = pack_buckets(resources.clone(), &lifetimes);
        let second = pack_buckets(resources, &lifetimes);
        let layout = |buckets: &[MemoryBucket]| -> Vec<Vec<(ResourceId, u64)>> {
            buckets
                .iter()
                .map(|b| b.aliased.iter().map(|a| (a.id, a.offset)).collect())
                .collect()
        };
        assert_eq!(layout(&first), layout(&second));
    }

    #[test]
    fn overlap_inside_bucket_respects_all_members() {
        // Invariant: no two members with intersecting lifetimes overlap in
        // bytes.
        let resources: Vec<(ResourceId, ResourceInfo)> = vec![
            (ResourceId(3), info(1024, 256)),
            (ResourceId(2), info(2048, 256)),
            (ResourceId(1), info(4096, 256)),
            (ResourceId(0), info(8192, 256)),
        ];
        let lifetimes = lifetimes(&[
            (0, Lifetime::new(0, 1)),
            (1, Lifetime::new(2, 5)),
            (2, Lifetime::new(3, 5)),
            (3, Lifetime::new(4, 5)),
        ]);
        let buckets = pack_buckets(resources, &lifetimes);
        for bucket in &buckets {
            for (i, a) in bucket.aliased.iter().enumerate() {
                for b in bucket.aliased.iter().skip(i + 1) {
                    let la = lifetimes[&a.id];
                    let lb = lifetimes[&b.id];
                    let bytes_overlap = a.offset < b.offset + b.info.requirements.size
                        && b.offset < a.offset + a.info.requirements.size;
                    if bytes_overlap {
                        assert!(
                            !la.intersects(&lb),
                            "resources {:?} and {:?} overlap in bytes and time",
                            a.id,
                            b.id
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn fold_detects_incompatible_memory_types() {
        let mut a = info(4096, 256);
        a.requirements.memory_type_bits = 0b0011;
        let mut b = info(2048, 512);
        b.requirements.memory_type_bits = 0b1100;
        let bucket = MemoryBucket {
            property_flags: a.property_flags,
            requirements: a.requirements,
            allocation: None,
            aliased: vec![
                AliasedResource {
                    info: a,
                    id: ResourceId(0),
                    offset: 0,
                },
                AliasedResource {
                    info: b,
                    id: ResourceId(1),
                    offset: 0,
                },
            ],
        };
        assert!(fold_bucket_requirements(&bucket).is_err());
    }

    #[test]
    fn fold_takes_max_alignment() {
        let mut a = info(4096, 256);
        a.requirements.memory_type_bits = 0b0111;
        let mut b = info(2048, 1024);
        b.requirements.memory_type_bits = 0b0110;
        let bucket = MemoryBucket {
            property_flags: a.property_flags,
            requirements: a.requirements,
            allocation: None,
            aliased: vec![
                AliasedResource {
                    info: a,
                    id: ResourceId(0),
                    offset: 0,
                },
                AliasedResource {
                    info: b,
                    id: ResourceId(1),
                    offset: 0,
                },
            ],
        };
        let (requirements, _) = fold_bucket_requirements(&bucket).unwrap();
        assert_eq!(requirements.alignment, 1024);
        assert_eq!(requirements.memory_type_bits, 0b0110);
    }
}
