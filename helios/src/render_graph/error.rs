use thiserror::Error;

/// Declaration and build errors. All of these indicate a programmer mistake
/// and abort the current frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderGraphError {
    #[error("Resource[{0}] doesn't exist")]
    UnknownResource(String),

    #[error("Resource[{0}] already exists")]
    ResourceAlreadyExists(String),

    #[error("Alias[{0}] is already in use")]
    AliasAlreadyExists(String),

    #[error("ClearOnExecute can only be called inside a pass that also writes Resource[{0}]")]
    ClearWithoutWrite(String),

    #[error("Max limit of {0} color render targets reached")]
    ColorAttachmentLimit(usize),

    #[error("Graphics pass [{0}] has no viewport/scissors set")]
    MissingViewport(String),

    #[error("Render graph has no passes")]
    EmptyGraph,

    #[error("Render graph was not built before execution")]
    NotBuilt,

    #[error("Render graph is not acyclic")]
    CyclicGraph,

    #[error("Invalid mip selection: base {base} count {count} of {available} mips")]
    InvalidMipRange {
        base: u32,
        count: u32,
        available: u32,
    },

    #[error("Failed to determine an image layout transition (state {current:#x} -> {next:#x})")]
    UndeterminedLayout { current: u32, next: u32 },
}
