use crate::error::Result;
use crate::gpu::{GraphicsBackend, ProgramDesc, ProgramId, ProgramSource, UniformLocation};

/// A linked program the renderer draws with.
pub trait Shader<B: GraphicsBackend + ?Sized> {
    fn program(&self) -> ProgramId;

    /// Makes the program current.
    fn begin(&self, gpu: &mut B) {
        gpu.use_program(Some(self.program()));
    }

    fn end(&self, gpu: &mut B) {
        gpu.use_program(None);
    }

    fn uniform_location(&self, gpu: &B, name: &str) -> Option<UniformLocation> {
        gpu.uniform_location(self.program(), name)
    }
}

/// Shader owning one backend program.
#[derive(Debug)]
pub struct ProgramShader {
    label: String,
    program: ProgramId,
    released: bool,
}

impl ProgramShader {
    pub fn create<B: GraphicsBackend + ?Sized>(gpu: &mut B, desc: &ProgramDesc<'_>) -> Result<Self> {
        let program = gpu.create_program(desc)?;
        Ok(Self {
            label: desc.label.to_owned(),
            program,
            released: false,
        })
    }

    /// The built-in textured quad program with `uniforms` declared in order.
    pub fn textured_quad<B: GraphicsBackend + ?Sized>(gpu: &mut B, uniforms: &[&str]) -> Result<Self> {
        Self::create(
            gpu,
            &ProgramDesc {
                label: "textured quad",
                source: ProgramSource::TexturedQuad,
                uniforms,
            },
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dispose<B: GraphicsBackend + ?Sized>(mut self, gpu: &mut B) {
        gpu.delete_program(self.program);
        self.released = true;
    }
}

impl<B: GraphicsBackend + ?Sized> Shader<B> for ProgramShader {
    fn program(&self) -> ProgramId {
        self.program
    }
}

impl Drop for ProgramShader {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("shader {:?} dropped without dispose; {} leaked", self.label, self.program);
        }
    }
}
