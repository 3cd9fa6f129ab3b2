use crate::error::Result;
use crate::gpu::{GraphicsBackend, TextureDesc, TextureId};
use crate::paint::Color;

/// Identity of a texture as seen by the renderer.
///
/// Two handles are the same texture iff they compare equal; a change of
/// handle between draws ends the current batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureHandle(TextureId);

impl TextureHandle {
    #[inline]
    pub const fn new(id: TextureId) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn id(self) -> TextureId {
        self.0
    }
}

impl From<TextureId> for TextureHandle {
    fn from(id: TextureId) -> Self {
        Self(id)
    }
}

/// Binds a texture for the next flush and returns the sampler unit it is on.
///
/// Closures `FnMut(&mut B, TextureHandle) -> i32` are binders.
pub trait TextureBinder<B: GraphicsBackend + ?Sized> {
    fn bind(&mut self, gpu: &mut B, texture: TextureHandle) -> i32;
}

impl<B, F> TextureBinder<B> for F
where
    B: GraphicsBackend + ?Sized,
    F: FnMut(&mut B, TextureHandle) -> i32,
{
    fn bind(&mut self, gpu: &mut B, texture: TextureHandle) -> i32 {
        self(gpu, texture)
    }
}

/// Binds every texture to unit 0.
#[derive(Debug, Default, Copy, Clone)]
pub struct DefaultTextureBinder;

impl<B: GraphicsBackend + ?Sized> TextureBinder<B> for DefaultTextureBinder {
    fn bind(&mut self, gpu: &mut B, texture: TextureHandle) -> i32 {
        gpu.bind_texture(0, texture.id());
        0
    }
}

/// RGBA8 texture owned by the caller.
#[derive(Debug)]
pub struct Texture {
    label: String,
    id: TextureId,
    width: u32,
    height: u32,
    released: bool,
}

impl Texture {
    pub fn create<B: GraphicsBackend + ?Sized>(
        gpu: &mut B,
        label: &str,
        width: u32,
        height: u32,
        rgba8: &[u8],
    ) -> Result<Self> {
        let id = gpu.create_texture(&TextureDesc {
            label,
            width,
            height,
            rgba8,
        })?;
        Ok(Self {
            label: label.to_owned(),
            id,
            width,
            height,
            released: false,
        })
    }

    /// 1x1 texture of one color.
    pub fn solid<B: GraphicsBackend + ?Sized>(gpu: &mut B, label: &str, color: Color) -> Result<Self> {
        Self::create(gpu, label, 1, 1, &color.pack_rgba8().to_le_bytes())
    }

    #[inline]
    pub fn handle(&self) -> TextureHandle {
        TextureHandle(self.id)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dispose<B: GraphicsBackend + ?Sized>(mut self, gpu: &mut B) {
        gpu.delete_texture(self.id);
        self.released = true;
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if !self.released {
            log::warn!("texture {:?} dropped without dispose; {} leaked", self.label, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::gpu::{Call, Capabilities, RecordingBackend};

    #[test]
    fn default_binder_uses_unit_zero() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();

        let unit = DefaultTextureBinder.bind(&mut gpu, texture.handle());
        assert_eq!(unit, 0);
        assert_eq!(
            gpu.calls().last(),
            Some(&Call::BindTexture {
                unit: 0,
                texture: texture.handle().id()
            })
        );
        texture.dispose(&mut gpu);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn closures_are_binders() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut binder = |gpu: &mut RecordingBackend, t: TextureHandle| {
            gpu.bind_texture(3, t.id());
            3
        };
        assert_eq!(binder.bind(&mut gpu, texture.handle()), 3);
        texture.dispose(&mut gpu);
    }

    #[test]
    fn empty_texture_is_rejected() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let err = Texture::create(&mut gpu, "empty", 0, 4, &[]).unwrap_err();
        assert!(matches!(err, RenderError::EmptyTexture { .. }));
    }
}
