use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use ash::vk;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::warn;

use crate::context::RenderContext;
use crate::render_graph::error::RenderGraphError;
use crate::render_graph::executor::DependencyLevel;
use crate::render_graph::pass::{ExecuteFn, Pass, PassType};
use crate::render_graph::pool::{BufferHandle, ResourceHandle, TextureHandle, TransientResourcePool};
use crate::render_graph::resource::{ResourceId, SubresourceId};
use crate::render_graph::scheduler::{ExecutionContext, ResourceScheduler};
use crate::resource::{BufferDescription, ExtraBufferFlags, ResourceCreateFlags, TextureDescription};

#[derive(Debug, Default, Copy, Clone)]
pub struct RenderGraphStatistics {
    /// CPU build time in milliseconds
    pub build_time_ms: f32,
    pub barrier_batch_count: u32,
    pub barrier_count: u32,
}

/// Per-frame frame graph: passes declare named resource accesses, `build`
/// schedules them into dependency levels, `execute` records one command
/// buffer with inferred barriers and submits it.
pub struct RenderGraph {
    pub(crate) name: String,
    pub(crate) passes: Vec<Pass>,

    pub(crate) adjacency: DiGraph<u32, ()>,
    pub(crate) topological_order: Vec<u32>,
    pub(crate) dependency_levels: Vec<DependencyLevel>,

    next_resource_id: u64,
    pub(crate) name_to_id: HashMap<String, ResourceId>,
    pub(crate) id_to_name: HashMap<ResourceId, String>,
    /// Read-modify-write aliases: alias name -> aliased name
    pub(crate) alias_map: HashMap<String, String>,

    pub(crate) texture_creates: HashMap<String, TextureDescription>,
    pub(crate) buffer_creates: HashMap<String, BufferDescription>,
    pub(crate) texture_handles: HashMap<ResourceId, TextureHandle>,
    pub(crate) buffer_handles: HashMap<ResourceId, BufferHandle>,

    /// Real pass ids, not topological positions
    pub(crate) resources_used_by_pass: HashMap<ResourceId, HashSet<u32>>,

    resources_created: bool,
    pub(crate) stats: RenderGraphStatistics,
}

impl RenderGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passes: Vec::new(),
            adjacency: DiGraph::new(),
            topological_order: Vec::new(),
            dependency_levels: Vec::new(),
            next_resource_id: 0,
            name_to_id: HashMap::new(),
            id_to_name: HashMap::new(),
            alias_map: HashMap::new(),
            texture_creates: HashMap::new(),
            buffer_creates: HashMap::new(),
            texture_handles: HashMap::new(),
            buffer_handles: HashMap::new(),
            resources_used_by_pass: HashMap::new(),
            resources_created: false,
            stats: RenderGraphStatistics::default(),
        }
    }

    /// Registers a pass and immediately runs its setup callback, so
    /// declaration errors surface at the registration site.
    pub fn add_pass<S, E>(
        &mut self,
        name: &str,
        pass_type: PassType,
        setup: S,
        execute: E,
        queue_index: u8,
    ) -> Result<()>
    where
        S: FnOnce(&mut ResourceScheduler) -> Result<()>,
        E: FnMut(&ExecutionContext, vk::CommandBuffer) -> Result<()> + 'static,
    {
        let mut pass = Pass::new(
            self.passes.len() as u32,
            queue_index,
            name,
            pass_type,
            Box::new(execute) as ExecuteFn,
        );
        let mut scheduler = ResourceScheduler {
            graph: self,
            pass: &mut pass,
        };
        setup(&mut scheduler)?;
        self.passes.push(pass);
        Ok(())
    }

    pub fn statistics(&self) -> RenderGraphStatistics {
        self.stats
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub(crate) fn create_resource_id(&mut self, name: &str) -> Result<ResourceId> {
        debug_assert!(!name.is_empty(), "resource name is empty");
        if self.name_to_id.contains_key(name) {
            return Err(RenderGraphError::ResourceAlreadyExists(name.to_string()).into());
        }
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
        Ok(id)
    }

    /// Walks the alias map until a concrete resource name is found
    pub(crate) fn resolve_resource_name(&self, name: &str) -> Result<String, RenderGraphError> {
        if self.name_to_id.contains_key(name) {
            return Ok(name.to_string());
        }
        let mut current = name;
        loop {
            let target = self
                .alias_map
                .get(current)
                .ok_or_else(|| RenderGraphError::UnknownResource(name.to_string()))?;
            if self.name_to_id.contains_key(target) {
                return Ok(target.clone());
            }
            current = target;
        }
    }

    pub fn get_resource_id(&self, name: &str) -> Result<ResourceId> {
        let resolved = self.resolve_resource_name(name)?;
        Ok(self.name_to_id[&resolved])
    }

    pub fn texture_mip_count(&self, name: &str) -> Result<u32> {
        let resolved = self.resolve_resource_name(name)?;
        let description = self
            .texture_creates
            .get(&resolved)
            .ok_or_else(|| RenderGraphError::UnknownResource(name.to_string()))?;
        Ok(description.mip_level_count())
    }

    pub(crate) fn register_pass_use(&mut self, id: ResourceId, pass_id: u32) {
        self.resources_used_by_pass
            .entry(id)
            .or_default()
            .insert(pass_id);
    }

    pub(crate) fn texture_handle(&self, id: ResourceId) -> Result<TextureHandle> {
        self.texture_handles.get(&id).copied().ok_or_else(|| {
            RenderGraphError::UnknownResource(
                self.id_to_name.get(&id).cloned().unwrap_or_default(),
            )
            .into()
        })
    }

    pub(crate) fn buffer_handle(&self, id: ResourceId) -> Result<BufferHandle> {
        self.buffer_handles.get(&id).copied().ok_or_else(|| {
            RenderGraphError::UnknownResource(
                self.id_to_name.get(&id).cloned().unwrap_or_default(),
            )
            .into()
        })
    }

    /// Adjacency construction, topological sort and dependency level
    /// assignment.
    pub fn build(&mut self) -> Result<()> {
        if self.passes.is_empty() {
            return Err(RenderGraphError::EmptyGraph.into());
        }
        let build_begin = Instant::now();

        self.build_adjacency_lists();
        self.topological_sort()?;
        self.build_dependency_levels();

        for (name, id) in &self.name_to_id {
            if !self.resources_used_by_pass.contains_key(id) {
                warn!("Resource[{name}] is declared but never read or written");
            }
        }

        self.stats.build_time_ms = build_begin.elapsed().as_secs_f32() * 1000.0;
        Ok(())
    }

    /// Edge `p -> q` exists iff some subresource appears in both `p`'s writes
    /// and `q`'s reads. Pure read-read relationships never induce edges, and
    /// edges are unique per pass pair.
    fn build_adjacency_lists(&mut self) {
        let mut graph = DiGraph::with_capacity(self.passes.len(), self.passes.len());
        for pass in &self.passes {
            graph.add_node(pass.id);
        }

        let texture_read_sets: Vec<HashSet<&SubresourceId>> = self
            .passes
            .iter()
            .map(|pass| pass.texture_reads.iter().collect())
            .collect();
        let buffer_read_sets: Vec<HashSet<&SubresourceId>> = self
            .passes
            .iter()
            .map(|pass| pass.buffer_reads.iter().collect())
            .collect();

        for write_pass in &self.passes {
            for read_pass in &self.passes {
                if write_pass.id == read_pass.id {
                    continue;
                }
                let reader = read_pass.id as usize;
                let depends = write_pass
                    .texture_writes
                    .iter()
                    .any(|subresource| texture_read_sets[reader].contains(subresource))
                    || write_pass
                        .buffer_writes
                        .iter()
                        .any(|subresource| buffer_read_sets[reader].contains(subresource));
                if depends {
                    graph.update_edge(
                        NodeIndex::new(write_pass.id as usize),
                        NodeIndex::new(read_pass.id as usize),
                        (),
                    );
                }
            }
        }
        self.adjacency = graph;
    }

    fn topological_sort(&mut self) -> Result<()> {
        let order = petgraph::algo::toposort(&self.adjacency, None)
            .map_err(|_| RenderGraphError::CyclicGraph)?;
        self.topological_order = order.into_iter().map(|node| node.index() as u32).collect();
        Ok(())
    }

    /// Longest-path distance from a virtual root, relaxed in topological
    /// order. Passes sharing a level are mutually independent; within a
    /// level they keep original insertion order.
    fn build_dependency_levels(&mut self) {
        let mut longest_distances = vec![0u32; self.passes.len()];
        let mut level_count = 1u32;

        for &node in &self.topological_order {
            let node_index = NodeIndex::new(node as usize);
            let neighbors: Vec<NodeIndex> = self.adjacency.neighbors(node_index).collect();
            for adjacent in neighbors {
                let candidate = longest_distances[node as usize] + 1;
                if longest_distances[adjacent.index()] < candidate {
                    longest_distances[adjacent.index()] = candidate;
                    level_count = level_count.max(candidate + 1);
                }
            }
        }

        self.dependency_levels = (0..level_count).map(DependencyLevel::new).collect();
        for (pass_index, pass) in self.passes.iter_mut().enumerate() {
            let level = longest_distances[pass_index];
            pass.dependency_level = level;
            self.dependency_levels[level as usize].passes.push(pass.id);
        }
    }

    /// Creates (or reuses) all resources declared this frame, computes
    /// effective lifetimes and runs the memory aliaser.
    pub(crate) fn create_resources(&mut self, pool: &mut TransientResourcePool) -> Result<()> {
        if self.resources_created {
            return Ok(());
        }

        for (name, description) in self.texture_creates.iter_mut() {
            description.create_flags |= ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED;
            let force_no_aliasing = description
                .create_flags
                .contains(ResourceCreateFlags::FORCE_NO_ALIASING);
            if force_no_aliasing {
                description
                    .create_flags
                    .remove(ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED);
            }

            let id = self.name_to_id[name.as_str()];
            let handle = pool.create_texture(description, name, id)?;
            self.texture_handles.insert(id, handle);

            if !force_no_aliasing {
                let requirements = pool.get_texture(handle).inner().memory_requirements()?;
                pool.fill_resource_info(
                    ResourceHandle::Texture(handle),
                    id,
                    name,
                    requirements,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                );
            }
        }

        for (name, description) in self.buffer_creates.iter_mut() {
            description.create_flags |= ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED;
            let force_no_aliasing = description
                .create_flags
                .contains(ResourceCreateFlags::FORCE_NO_ALIASING);
            if force_no_aliasing {
                description
                    .create_flags
                    .remove(ResourceCreateFlags::GRAPH_MEMORY_CONTROLLED);
            }

            let id = self.name_to_id[name.as_str()];
            let handle = pool.create_buffer(description, name, id)?;
            self.buffer_handles.insert(id, handle);

            if !force_no_aliasing {
                let mut property_flags = vk::MemoryPropertyFlags::empty();
                if description
                    .extra_flags
                    .contains(ExtraBufferFlags::DEVICE_LOCAL)
                {
                    property_flags |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
                }
                if description.extra_flags.contains(ExtraBufferFlags::HOST) {
                    property_flags |= vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT;
                }
                let requirements = pool.get_buffer(handle).inner().memory_requirements()?;
                pool.fill_resource_info(
                    ResourceHandle::Buffer(handle),
                    id,
                    name,
                    requirements,
                    property_flags,
                );
            }
        }

        pool.calculate_effective_lifetimes(&self.topological_order, &self.resources_used_by_pass);
        pool.bind_resources_to_memory_regions()?;
        self.resources_created = true;
        Ok(())
    }

    /// Creates transient resources, records every dependency level into the
    /// frame's command buffer and submits it.
    pub fn execute(
        &mut self,
        ctx: &mut RenderContext,
        pool: &mut TransientResourcePool,
    ) -> Result<()> {
        if self.topological_order.is_empty() {
            return Err(RenderGraphError::NotBuilt.into());
        }
        self.create_resources(pool)?;
        crate::render_graph::executor::execute_graph(self, ctx, pool)
    }

    /// Graphviz rendering of the built adjacency, for debugging
    pub fn graphviz(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", self.name);
        let _ = writeln!(out, "\tnode [shape=rectangle, style=filled];");
        let _ = writeln!(out, "\tedge [color=black];");
        let _ = writeln!(out);
        for &pass_index in &self.topological_order {
            let pass = &self.passes[pass_index as usize];
            for adjacent in self.adjacency.neighbors(NodeIndex::new(pass_index as usize)) {
                let _ = writeln!(
                    out,
                    "\t\"{}\" -> \"{}\"",
                    pass.name,
                    self.passes[adjacent.index()].name
                );
            }
        }
        let _ = writeln!(out, "}}");
        out
    }

    pub fn dump_graphviz(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.graphviz())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::resource::{MipSet, ResourceState};
    use glam::UVec3;

    fn color_target(extent: UVec3) -> TextureDescription {
        TextureDescription::new(
            vk::ImageType::TYPE_2D,
            extent,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ResourceCreateFlags::empty(),
        )
    }

    fn noop_execute() -> impl FnMut(&ExecutionContext, vk::CommandBuffer) -> Result<()> {
        |_ctx: &ExecutionContext, _cmd: vk::CommandBuffer| Ok(())
    }

    fn edges(graph: &RenderGraph) -> HashSet<(u32, u32)> {
        graph
            .adjacency
            .edge_indices()
            .map(|edge| {
                let (a, b) = graph.adjacency.edge_endpoints(edge).unwrap();
                (a.index() as u32, b.index() as u32)
            })
            .collect()
    }

    fn linear_chain() -> RenderGraph {
        let mut graph = RenderGraph::new("LinearChain");
        graph
            .add_pass(
                "A",
                PassType::Graphics,
                |s| {
                    s.create_texture("X", color_target(UVec3::new(64, 64, 1)))?;
                    s.write_texture("X", MipSet::FirstMip, ResourceState::RENDER_TARGET, None)?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "B",
                PassType::Graphics,
                |s| {
                    s.read_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::FRAGMENT_SHADER_RESOURCE,
                    )?;
                    s.create_texture("Y", color_target(UVec3::new(64, 64, 1)))?;
                    s.write_texture("Y", MipSet::FirstMip, ResourceState::RENDER_TARGET, None)?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "C",
                PassType::Graphics,
                |s| {
                    s.read_texture(
                        "Y",
                        MipSet::FirstMip,
                        ResourceState::FRAGMENT_SHADER_RESOURCE,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
    }

    #[test]
    fn linear_chain_schedules_in_order() {
        let mut graph = linear_chain();
        graph.build().unwrap();

        assert_eq!(edges(&graph), HashSet::from([(0, 1), (1, 2)]));
        assert_eq!(graph.topological_order, vec![0, 1, 2]);
        let levels: Vec<u32> = graph.passes.iter().map(|p| p.dependency_level).collect();
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[test]
    fn diamond_shares_a_level() {
        let mut graph = RenderGraph::new("Diamond");
        graph
            .add_pass(
                "A",
                PassType::Compute,
                |s| {
                    s.create_texture("X", color_target(UVec3::new(32, 32, 1)))?;
                    s.write_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        None,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        for (pass, output) in [("B", "Y"), ("C", "Z")] {
            graph
                .add_pass(
                    pass,
                    PassType::Compute,
                    move |s| {
                        s.read_texture(
                            "X",
                            MipSet::FirstMip,
                            ResourceState::COMPUTE_SHADER_RESOURCE,
                        )?;
                        s.create_texture(output, color_target(UVec3::new(32, 32, 1)))?;
                        s.write_texture(
                            output,
                            MipSet::FirstMip,
                            ResourceState::COMPUTE_SHADER_RESOURCE,
                            None,
                        )?;
                        Ok(())
                    },
                    noop_execute(),
                    0,
                )
                .unwrap();
        }
        graph
            .add_pass(
                "D",
                PassType::Compute,
                |s| {
                    s.read_texture(
                        "Y",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    s.read_texture(
                        "Z",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph.build().unwrap();

        assert_eq!(
            edges(&graph),
            HashSet::from([(0, 1), (0, 2), (1, 3), (2, 3)])
        );
        let levels: Vec<u32> = graph.passes.iter().map(|p| p.dependency_level).collect();
        assert_eq!(levels, vec![0, 1, 1, 2]);
        // Producers strictly precede their consumers
        for &(writer, reader) in edges(&graph).iter() {
            assert!(
                graph.passes[writer as usize].dependency_level
                    < graph.passes[reader as usize].dependency_level
            );
        }
        // Within a level, insertion order is preserved
        assert_eq!(graph.dependency_levels[1].passes, vec![1, 2]);
    }

    #[test]
    fn read_modify_write_alias_resolves_to_original() {
        let mut graph = RenderGraph::new("Rmw");
        graph
            .add_pass(
                "A",
                PassType::Compute,
                |s| {
                    s.create_texture("X", color_target(UVec3::new(32, 32, 1)))?;
                    s.write_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        None,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "B",
                PassType::Compute,
                |s| {
                    s.read_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    s.write_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        Some("X-post"),
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "C",
                PassType::Compute,
                |s| {
                    s.read_texture(
                        "X-post",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph.build().unwrap();

        // The alias maps back to the concrete resource
        assert_eq!(
            graph.get_resource_id("X-post").unwrap(),
            graph.get_resource_id("X").unwrap()
        );
        assert_eq!(edges(&graph), HashSet::from([(0, 1), (1, 2)]));
        let levels: Vec<u32> = graph.passes.iter().map(|p| p.dependency_level).collect();
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let mut graph = RenderGraph::new("DuplicateAlias");
        let result = graph.add_pass(
            "A",
            PassType::Compute,
            |s| {
                s.create_texture("X", color_target(UVec3::new(8, 8, 1)))?;
                s.write_texture(
                    "X",
                    MipSet::FirstMip,
                    ResourceState::COMPUTE_SHADER_RESOURCE,
                    Some("X2"),
                )?;
                s.write_texture(
                    "X2",
                    MipSet::FirstMip,
                    ResourceState::COMPUTE_SHADER_RESOURCE,
                    Some("X2"),
                )?;
                Ok(())
            },
            noop_execute(),
            0,
        );
        let error = result.unwrap_err().downcast::<RenderGraphError>().unwrap();
        assert_eq!(error, RenderGraphError::AliasAlreadyExists("X2".into()));
    }

    #[test]
    fn empty_graph_fails_before_topological_sort() {
        let mut graph = RenderGraph::new("Empty");
        let error = graph
            .build()
            .unwrap_err()
            .downcast::<RenderGraphError>()
            .unwrap();
        assert_eq!(error, RenderGraphError::EmptyGraph);
    }

    #[test]
    fn single_pass_builds_trivially() {
        let mut graph = RenderGraph::new("Single");
        graph
            .add_pass("Only", PassType::Compute, |_| Ok(()), noop_execute(), 0)
            .unwrap();
        graph.build().unwrap();
        assert_eq!(graph.dependency_levels.len(), 1);
        assert_eq!(graph.adjacency.edge_count(), 0);
        assert_eq!(graph.passes[0].dependency_level, 0);
    }

    #[test]
    fn cyclic_graph_is_fatal() {
        let mut graph = RenderGraph::new("Cycle");
        graph
            .add_pass(
                "A",
                PassType::Compute,
                |s| {
                    s.create_texture("X", color_target(UVec3::new(8, 8, 1)))?;
                    s.create_texture("Y", color_target(UVec3::new(8, 8, 1)))?;
                    s.write_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        None,
                    )?;
                    s.read_texture(
                        "Y",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "B",
                PassType::Compute,
                |s| {
                    s.read_texture(
                        "X",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    s.write_texture(
                        "Y",
                        MipSet::FirstMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        None,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        let error = graph
            .build()
            .unwrap_err()
            .downcast::<RenderGraphError>()
            .unwrap();
        assert_eq!(error, RenderGraphError::CyclicGraph);
    }

    #[test]
    fn unknown_resource_is_a_declaration_error() {
        let mut graph = RenderGraph::new("Unknown");
        let result = graph.add_pass(
            "A",
            PassType::Compute,
            |s| {
                s.read_texture(
                    "Ghost",
                    MipSet::FirstMip,
                    ResourceState::COMPUTE_SHADER_RESOURCE,
                )?;
                Ok(())
            },
            noop_execute(),
            0,
        );
        let error = result.unwrap_err().downcast::<RenderGraphError>().unwrap();
        assert_eq!(error, RenderGraphError::UnknownResource("Ghost".into()));
    }

    #[test]
    fn edge_count_matches_write_read_pairs() {
        let mut graph = linear_chain();
        graph.build().unwrap();
        // One write-to-read coincidence per adjacent pair
        assert_eq!(graph.adjacency.edge_count(), 2);
    }

    #[test]
    fn graphviz_round_trips_the_adjacency() {
        let mut graph = linear_chain();
        graph.build().unwrap();
        let dot = graph.graphviz();

        let mut parsed = HashSet::new();
        for line in dot.lines() {
            let Some((from, to)) = line.trim().split_once(" -> ") else {
                continue;
            };
            let unquote = |s: &str| s.trim().trim_matches('"').to_string();
            parsed.insert((unquote(from), unquote(to)));
        }
        let expected: HashSet<(String, String)> = edges(&graph)
            .into_iter()
            .map(|(a, b)| {
                (
                    graph.passes[a as usize].name.clone(),
                    graph.passes[b as usize].name.clone(),
                )
            })
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn mip_reads_span_levels() {
        let mut graph = RenderGraph::new("Mips");
        graph
            .add_pass(
                "Produce",
                PassType::Compute,
                |s| {
                    let mut description = color_target(UVec3::new(256, 256, 1));
                    description.create_flags |= ResourceCreateFlags::EXPOSE_MIPS;
                    description.usage_flags |= vk::ImageUsageFlags::STORAGE;
                    s.create_texture("Pyramid", description)?;
                    s.write_texture(
                        "Pyramid",
                        MipSet::AllMips,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                        None,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph
            .add_pass(
                "ConsumeTail",
                PassType::Compute,
                |s| {
                    s.read_texture(
                        "Pyramid",
                        MipSet::LastMip,
                        ResourceState::COMPUTE_SHADER_RESOURCE,
                    )?;
                    Ok(())
                },
                noop_execute(),
                0,
            )
            .unwrap();
        graph.build().unwrap();

        // 256 -> 9 mips; the producer touches all of them, the consumer one
        assert_eq!(graph.passes[0].texture_writes.len(), 9);
        assert_eq!(graph.passes[1].texture_reads.len(), 1);
        assert_eq!(graph.passes[1].texture_reads[0].subresource_index, 8);
        assert_eq!(edges(&graph), HashSet::from([(0, 1)]));
    }
}
