//! Error type shared by the streaming core and the backends.
//!
//! Every variant is fatal for the operation that produced it. Nothing in this
//! crate retries; callers decide whether to tear down or abort.

/// Errors produced by renderers, streamers and graphics backends.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// An operation that requires a bound object ran while it was unbound.
    #[error("{component} is not bound")]
    NotBound { component: &'static str },

    #[error("already rendering")]
    AlreadyRendering,

    #[error("not rendering")]
    NotRendering,

    /// A non-empty batch was flushed without any texture selected.
    #[error("flush requested with no texture bound")]
    NoTexture,

    #[error("texture {label:?} has zero size")]
    EmptyTexture { label: String },

    /// The vertex buffer cannot hold even a single batch.
    #[error("batch of {write_size} bytes exceeds vertex buffer capacity of {capacity} bytes")]
    BatchTooLarge { write_size: usize, capacity: usize },

    #[error("draw count {draw_count} is not a multiple of primitive count {primitive_count}")]
    InvalidDrawCount { draw_count: u32, primitive_count: usize },

    #[error("primitive count {requested} exceeds the {available} primitives supplied")]
    PrimitiveCountOutOfRange { requested: usize, available: usize },

    /// The graphics context does not expose a feature the caller asked for.
    #[error("graphics context lacks {0}")]
    MissingCapability(&'static str),

    #[error("unknown {kind} handle #{id}")]
    UnknownHandle { kind: &'static str, id: u32 },

    #[error("{operation}: range {offset}..{end} is outside of {object} ({size} bytes)")]
    OutOfBounds {
        operation: &'static str,
        object: String,
        offset: usize,
        end: usize,
        size: usize,
    },

    #[error("vertex attribute {attribute} ({components} x {component_type}) has no backend format")]
    UnsupportedVertexFormat {
        attribute: String,
        components: u8,
        component_type: &'static str,
    },

    /// Driver or device failure.
    #[error("{operation} failed for {object}: {reason}")]
    Gpu {
        operation: &'static str,
        object: String,
        reason: String,
    },
}

impl RenderError {
    pub fn gpu(operation: &'static str, object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Gpu {
            operation,
            object: object.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown(kind: &'static str, id: u32) -> Self {
        Self::UnknownHandle { kind, id }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
