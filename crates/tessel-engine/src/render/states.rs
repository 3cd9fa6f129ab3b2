//! Fixed-function pipeline state, diffed against what was last applied.
//!
//! [`RenderStates`] holds five independent groups. Applying them compares each
//! group with the value recorded in a [`StateCache`] and only issues backend
//! calls for the groups that changed. The first change flushes the pending
//! batch so already queued geometry is drawn with the state it was queued
//! under.

use std::fmt;

use crate::error::Result;
use crate::gpu::{BlendFactor, BlendOp, CullFace, DepthFunction, GraphicsBackend, Toggle};

/// Geometry queued under the current state, flushed before that state changes.
pub trait PendingBatch<B: GraphicsBackend + ?Sized> {
    fn flush_pending(&mut self, gpu: &mut B) -> Result<()>;
}

/// For applying states with no renderer involved.
pub struct NoPendingBatch;

impl<B: GraphicsBackend + ?Sized> PendingBatch<B> for NoPendingBatch {
    fn flush_pending(&mut self, _gpu: &mut B) -> Result<()> {
        Ok(())
    }
}

// ── blending factor ─────────────────────────────────────────────────────────

/// Common blend factor setups.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendingMode {
    Off,
    #[default]
    AlphaBlend,
    /// Alpha-blends color, keeps destination alpha.
    Color,
    Additive,
    /// Straight alpha in, premultiplied-style alpha accumulation.
    Premultiply,
    BlendAdd,
    Premultiplied,
}

/// Blend enable plus separate color/alpha factors.
///
/// Two disabled states are equal whatever their factors.
#[derive(Debug, Copy, Clone, Eq)]
pub struct BlendingFactorState {
    enabled: bool,
    src: BlendFactor,
    dst: BlendFactor,
    alpha_src: BlendFactor,
    alpha_dst: BlendFactor,
}

impl BlendingFactorState {
    pub const DEFAULT: Self = Self::from_mode(BlendingMode::AlphaBlend);

    pub const fn from_mode(mode: BlendingMode) -> Self {
        use BlendFactor::*;
        match mode {
            BlendingMode::Off => Self {
                enabled: false,
                ..Self::separate(SrcAlpha, OneMinusSrcAlpha, SrcAlpha, OneMinusSrcAlpha)
            },
            BlendingMode::AlphaBlend => Self::new(SrcAlpha, OneMinusSrcAlpha),
            BlendingMode::Color => Self::separate(SrcAlpha, OneMinusSrcAlpha, Zero, One),
            BlendingMode::Additive => Self::new(SrcAlpha, One),
            BlendingMode::Premultiply => Self::separate(SrcAlpha, OneMinusSrcAlpha, One, OneMinusSrcAlpha),
            BlendingMode::BlendAdd | BlendingMode::Premultiplied => Self::new(One, OneMinusSrcAlpha),
        }
    }

    /// Same factors for color and alpha.
    pub const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self::separate(src, dst, src, dst)
    }

    pub const fn separate(
        src: BlendFactor,
        dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    ) -> Self {
        Self {
            enabled: true,
            src,
            dst,
            alpha_src,
            alpha_dst,
        }
    }

    pub const fn off() -> Self {
        Self::from_mode(BlendingMode::Off)
    }

    /// Same factors, blending disabled.
    pub const fn disabled(self) -> Self {
        Self { enabled: false, ..self }
    }

    #[inline]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        gpu.set_enabled(Toggle::Blend, self.enabled);
        if self.enabled {
            gpu.blend_func_separate(self.src, self.dst, self.alpha_src, self.alpha_dst);
        }
    }
}

impl Default for BlendingFactorState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<BlendingMode> for BlendingFactorState {
    fn from(mode: BlendingMode) -> Self {
        Self::from_mode(mode)
    }
}

impl PartialEq for BlendingFactorState {
    fn eq(&self, other: &Self) -> bool {
        if !self.enabled && !other.enabled {
            return true;
        }
        self.enabled == other.enabled
            && self.src == other.src
            && self.dst == other.dst
            && self.alpha_src == other.alpha_src
            && self.alpha_dst == other.alpha_dst
    }
}

impl fmt::Display for BlendingFactorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.enabled {
            return f.write_str("blending factor: off");
        }
        write!(
            f,
            "blending factor: src {:?}, dst {:?}, alpha src {:?}, alpha dst {:?}",
            self.src, self.dst, self.alpha_src, self.alpha_dst
        )
    }
}

// ── blending equation ───────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendingEquationState {
    pub color: BlendOp,
    pub alpha: BlendOp,
}

impl BlendingEquationState {
    pub const DEFAULT: Self = Self::new(BlendOp::Add);

    pub const fn new(op: BlendOp) -> Self {
        Self { color: op, alpha: op }
    }

    pub const fn separate(color: BlendOp, alpha: BlendOp) -> Self {
        Self { color, alpha }
    }

    fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        gpu.blend_equation_separate(self.color, self.alpha);
    }
}

impl Default for BlendingEquationState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for BlendingEquationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blending equation: color {:?}, alpha {:?}", self.color, self.alpha)
    }
}

// ── depth ───────────────────────────────────────────────────────────────────

/// Depth test function (`None` disables the test) and depth writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: Option<DepthFunction>,
    pub write: bool,
}

impl DepthState {
    pub const DEFAULT_2D: Self = Self::new(None, false);
    pub const DEFAULT_3D_OPAQUE: Self = Self::new(Some(DepthFunction::Less), true);
    pub const DEFAULT_3D_TRANSPARENT: Self = Self::new(Some(DepthFunction::Less), false);

    pub const fn new(test: Option<DepthFunction>, write: bool) -> Self {
        Self { test, write }
    }

    fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        gpu.set_enabled(Toggle::DepthTest, self.test.is_some());
        if let Some(func) = self.test {
            gpu.depth_func(func);
        }
        gpu.depth_mask(self.write);
    }
}

impl Default for DepthState {
    fn default() -> Self {
        Self::DEFAULT_2D
    }
}

impl fmt::Display for DepthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.test {
            Some(func) => write!(f, "depth: test {func:?}, write {}", self.write),
            None => write!(f, "depth: no test, write {}", self.write),
        }
    }
}

// ── cull face ───────────────────────────────────────────────────────────────

/// Culled face; `None` disables culling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CullFaceState {
    pub mode: Option<CullFace>,
}

impl CullFaceState {
    pub const DEFAULT_2D: Self = Self::new(None);
    pub const DEFAULT_3D: Self = Self::new(Some(CullFace::Back));

    pub const fn new(mode: Option<CullFace>) -> Self {
        Self { mode }
    }

    fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        gpu.set_enabled(Toggle::CullFace, self.mode.is_some());
        if let Some(face) = self.mode {
            gpu.cull_face(face);
        }
    }
}

impl Default for CullFaceState {
    fn default() -> Self {
        Self::DEFAULT_2D
    }
}

impl fmt::Display for CullFaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Some(face) => write!(f, "cull face: {face:?}"),
            None => f.write_str("cull face: off"),
        }
    }
}

// ── point sprite ────────────────────────────────────────────────────────────

/// Point sprites and shader-controlled point size.
///
/// Equality looks at `enabled` only: a state differing just in
/// `size_enabled` is not re-applied.
#[derive(Debug, Copy, Clone, Eq)]
pub struct PointSpriteState {
    pub enabled: bool,
    pub size_enabled: bool,
}

impl PointSpriteState {
    pub const DEFAULT: Self = Self::new(false, false);

    pub const fn new(enabled: bool, size_enabled: bool) -> Self {
        Self { enabled, size_enabled }
    }

    fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        gpu.set_enabled(Toggle::PointSprite, self.enabled);
        gpu.set_enabled(Toggle::ProgramPointSize, self.size_enabled);
    }
}

impl Default for PointSpriteState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl PartialEq for PointSpriteState {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
    }
}

impl fmt::Display for PointSpriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point sprite: {}, size {}", self.enabled, self.size_enabled)
    }
}

// ── groups ──────────────────────────────────────────────────────────────────

/// One state group, tagged. Groups are applied in declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StateGroup {
    BlendingFactor(BlendingFactorState),
    BlendingEquation(BlendingEquationState),
    CullFace(CullFaceState),
    Depth(DepthState),
    PointSprite(PointSpriteState),
}

impl StateGroup {
    pub const COUNT: usize = 5;

    /// Position of the group in [`RenderStates::groups`] and in the cache.
    pub const fn slot(&self) -> usize {
        match self {
            StateGroup::BlendingFactor(_) => 0,
            StateGroup::BlendingEquation(_) => 1,
            StateGroup::CullFace(_) => 2,
            StateGroup::Depth(_) => 3,
            StateGroup::PointSprite(_) => 4,
        }
    }

    pub fn apply<B: GraphicsBackend + ?Sized>(&self, gpu: &mut B) {
        match self {
            StateGroup::BlendingFactor(s) => s.apply(gpu),
            StateGroup::BlendingEquation(s) => s.apply(gpu),
            StateGroup::CullFace(s) => s.apply(gpu),
            StateGroup::Depth(s) => s.apply(gpu),
            StateGroup::PointSprite(s) => s.apply(gpu),
        }
    }
}

impl fmt::Display for StateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateGroup::BlendingFactor(s) => fmt::Display::fmt(s, f),
            StateGroup::BlendingEquation(s) => fmt::Display::fmt(s, f),
            StateGroup::CullFace(s) => fmt::Display::fmt(s, f),
            StateGroup::Depth(s) => fmt::Display::fmt(s, f),
            StateGroup::PointSprite(s) => fmt::Display::fmt(s, f),
        }
    }
}

/// Last state applied to one graphics context.
///
/// Must be cleared whenever the context loses its state (context loss,
/// foreign code touching GL state).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StateCache {
    applied: [Option<StateGroup>; StateGroup::COUNT],
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything; the next apply re-issues every group.
    pub fn clear(&mut self) {
        self.applied = [None; StateGroup::COUNT];
    }

    pub fn is_empty(&self) -> bool {
        self.applied.iter().all(Option::is_none)
    }

    pub fn get(&self, slot: usize) -> Option<&StateGroup> {
        self.applied.get(slot)?.as_ref()
    }

    fn is_current(&self, group: &StateGroup) -> bool {
        self.applied[group.slot()].as_ref() == Some(group)
    }

    fn record(&mut self, group: StateGroup) {
        self.applied[group.slot()] = Some(group);
    }
}

impl fmt::Display for StateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for group in self.applied.iter().flatten() {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            fmt::Display::fmt(group, f)?;
        }
        Ok(())
    }
}

/// A full set of the five state groups.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RenderStates {
    pub blending_factor: BlendingFactorState,
    pub blending_equation: BlendingEquationState,
    pub cull_face: CullFaceState,
    pub depth: DepthState,
    pub point_sprite: PointSpriteState,
}

impl RenderStates {
    pub const DEFAULT: Self = Self {
        blending_factor: BlendingFactorState::DEFAULT,
        blending_equation: BlendingEquationState::DEFAULT,
        cull_face: CullFaceState::DEFAULT_2D,
        depth: DepthState::DEFAULT_2D,
        point_sprite: PointSpriteState::DEFAULT,
    };

    pub fn groups(&self) -> [StateGroup; StateGroup::COUNT] {
        [
            StateGroup::BlendingFactor(self.blending_factor),
            StateGroup::BlendingEquation(self.blending_equation),
            StateGroup::CullFace(self.cull_face),
            StateGroup::Depth(self.depth),
            StateGroup::PointSprite(self.point_sprite),
        ]
    }

    /// Applies every group that differs from `cache`.
    ///
    /// `pending` is flushed once, before the first changed group. Returns the
    /// number of groups applied.
    pub fn apply<B: GraphicsBackend + ?Sized>(
        &self,
        cache: &mut StateCache,
        gpu: &mut B,
        pending: &mut dyn PendingBatch<B>,
    ) -> Result<usize> {
        let mut applied = 0;
        for group in self.groups() {
            if cache.is_current(&group) {
                continue;
            }
            if applied == 0 {
                pending.flush_pending(gpu)?;
            }
            group.apply(gpu);
            cache.record(group);
            applied += 1;
        }
        Ok(applied)
    }
}
