/// Features of the active graphics context that select a streaming strategy.
///
/// Queried once when a streamer is created; never re-checked afterwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Immutable buffer storage that can stay mapped while the GPU reads it.
    pub persistent_mapping: bool,
    /// Fence objects that can be polled and waited on.
    pub fence_sync: bool,
    /// Vertex array / vertex format objects.
    pub vertex_formats: bool,
}

impl Capabilities {
    pub const FULL: Capabilities = Capabilities {
        persistent_mapping: true,
        fence_sync: true,
        vertex_formats: true,
    };

    /// Fences and vertex formats, no persistent mapping.
    pub const BASELINE: Capabilities = Capabilities {
        persistent_mapping: false,
        fence_sync: true,
        vertex_formats: true,
    };

    pub const NONE: Capabilities = Capabilities {
        persistent_mapping: false,
        fence_sync: false,
        vertex_formats: false,
    };
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::BASELINE
    }
}
