//! Runtime texture and sampler references.
//!
//! The RHI owns the actual GPU objects. This crate only sees opaque
//! [`RhiTexture`] / [`RhiSampler`] handles, wrapped in a [`TextureResource`]
//! that also records what kind of texture the asset is at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::math::LinearColor;

/// Opaque handle to a GPU texture owned by the RHI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RhiTexture(pub u64);

/// Opaque handle to a GPU sampler state owned by the RHI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RhiSampler(pub u64);

bitflags::bitflags! {
    /// Runtime category of a texture asset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureKind: u32 {
        /// Plain 2D texture or 2D render target.
        const TEXTURE_2D = 1 << 0;
        /// Cube map.
        const TEXTURE_CUBE = 1 << 1;
        /// Volume (3D) texture.
        const TEXTURE_VOLUME = 1 << 2;
        /// Externally produced texture (video, camera feed).
        const EXTERNAL = 1 << 3;
        /// Streaming virtual texture.
        const VIRTUAL = 1 << 4;
        /// Runtime virtual texture, rendered on demand.
        const RUNTIME_VIRTUAL = 1 << 5;
    }
}

/// Texture slot category in a uniform expression set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureCategory {
    /// 2D texture slot.
    Texture2D,
    /// Cube texture slot.
    Cube,
    /// Volume texture slot.
    Volume,
    /// External texture slot.
    External,
    /// Virtual texture (physical layer) slot.
    Virtual,
}

impl TextureCategory {
    /// Number of categories.
    pub const COUNT: usize = 5;

    /// Every category, in schema order.
    pub const ALL: [TextureCategory; Self::COUNT] = [
        Self::Texture2D,
        Self::Cube,
        Self::Volume,
        Self::External,
        Self::Virtual,
    ];

    /// Dense index in `0..COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Runtime texture kinds that may be bound to a slot of this category.
    pub fn accepted_kinds(self) -> TextureKind {
        match self {
            Self::Texture2D => TextureKind::TEXTURE_2D,
            Self::Cube => TextureKind::TEXTURE_CUBE,
            Self::Volume => TextureKind::TEXTURE_VOLUME,
            Self::External => TextureKind::EXTERNAL,
            Self::Virtual => TextureKind::VIRTUAL | TextureKind::RUNTIME_VIRTUAL,
        }
    }

    /// Whether a texture of `kind` may be bound to this category.
    pub fn accepts(self, kind: TextureKind) -> bool {
        self.accepted_kinds().intersects(kind)
    }

    /// Member name prefix used in the buffer schema.
    pub fn member_prefix(self) -> &'static str {
        match self {
            Self::Texture2D => "Texture2D",
            Self::Cube => "TextureCube",
            Self::Volume => "VolumeTexture",
            Self::External => "ExternalTexture",
            Self::Virtual => "VirtualTexturePhysical",
        }
    }
}

/// Which sampler a texture slot binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerSource {
    /// The sampler state stored on the texture asset.
    #[default]
    FromTextureAsset,
    /// The shared wrap sampler.
    Wrap,
    /// The shared clamp sampler.
    Clamp,
}

/// Data of a runtime virtual texture needed to fill its physical slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeVirtualTextureData {
    /// Packed page table uniforms (two `uint4` rows).
    pub page_table_uniforms: [[u32; 4]; 2],
    /// Page table textures.
    pub page_tables: Vec<RhiTexture>,
    /// Packed `uint4` uniform per layer.
    pub layer_uniforms: Vec<[u32; 4]>,
    /// Physical texture per layer.
    pub physical_textures: Vec<RhiTexture>,
}

/// A texture asset as seen by the renderer.
///
/// `rhi` is `None` while the asset has no backing GPU resource (not yet
/// streamed in, failed to load). Binding such a texture degrades to a
/// placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureResource {
    label: String,
    kind: TextureKind,
    width: u32,
    height: u32,
    depth: u32,
    rhi: Option<RhiTexture>,
    sampler: Option<RhiSampler>,
    immutable_sampler: Option<RhiSampler>,
    external_id: Option<u128>,
    runtime_virtual: Option<RuntimeVirtualTextureData>,
}

/// Shared texture reference.
pub type TextureHandle = Arc<TextureResource>;

impl TextureResource {
    /// Create a texture of the given kind and size without a GPU resource.
    pub fn new(label: impl Into<String>, kind: TextureKind, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            kind,
            width,
            height,
            depth: 1,
            rhi: None,
            sampler: None,
            immutable_sampler: None,
            external_id: None,
            runtime_virtual: None,
        }
    }

    /// Create a 2D texture backed by `rhi`.
    pub fn texture_2d(label: impl Into<String>, width: u32, height: u32, rhi: RhiTexture) -> Self {
        Self::new(label, TextureKind::TEXTURE_2D, width, height).with_rhi(rhi)
    }

    /// Set the backing GPU resource.
    pub fn with_rhi(mut self, rhi: RhiTexture) -> Self {
        self.rhi = Some(rhi);
        self
    }

    /// Set the asset's own sampler state.
    pub fn with_sampler(mut self, sampler: RhiSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Set an immutable sampler (platforms with combined image samplers).
    pub fn with_immutable_sampler(mut self, sampler: RhiSampler) -> Self {
        self.immutable_sampler = Some(sampler);
        self
    }

    /// Set the depth (volume textures).
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Set the external texture registry id.
    pub fn with_external_id(mut self, id: u128) -> Self {
        self.external_id = Some(id);
        self
    }

    /// Attach runtime virtual texture layer data.
    pub fn with_runtime_virtual(mut self, data: RuntimeVirtualTextureData) -> Self {
        self.runtime_virtual = Some(data);
        self
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> TextureHandle {
        Arc::new(self)
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runtime category.
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Depth in texels.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Backing GPU resource, if any.
    pub fn rhi(&self) -> Option<RhiTexture> {
        self.rhi
    }

    /// Sampler state stored on the asset, if any.
    pub fn sampler(&self) -> Option<RhiSampler> {
        self.sampler
    }

    /// Immutable sampler, if any.
    pub fn immutable_sampler(&self) -> Option<RhiSampler> {
        self.immutable_sampler
    }

    /// External texture registry id, if any.
    pub fn external_id(&self) -> Option<u128> {
        self.external_id
    }

    /// Runtime virtual texture data, if any.
    pub fn runtime_virtual(&self) -> Option<&RuntimeVirtualTextureData> {
        self.runtime_virtual.as_ref()
    }

    /// Size as `(width, height, depth, 0)`.
    pub fn size(&self) -> LinearColor {
        LinearColor::new(
            self.width as f32,
            self.height as f32,
            self.depth as f32,
            0.0,
        )
    }
}

/// Placeholder textures and shared samplers supplied by the renderer.
///
/// Every slot that cannot be bound to its real resource falls back to one of
/// these, so a filled buffer never carries a null handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalResources {
    /// White 2D placeholder.
    pub white_texture_2d: RhiTexture,
    /// Black cube placeholder.
    pub black_texture_cube: RhiTexture,
    /// Black volume placeholder.
    pub black_texture_volume: RhiTexture,
    /// Black external placeholder.
    pub black_texture_external: RhiTexture,
    /// Placeholder virtual texture page table.
    pub black_page_table: RhiTexture,
    /// Placeholder virtual texture physical texture.
    pub black_physical: RhiTexture,
    /// Sampler used when no other sampler resolves.
    pub default_sampler: RhiSampler,
    /// Shared wrap sampler.
    pub wrap_sampler: RhiSampler,
    /// Shared clamp sampler.
    pub clamp_sampler: RhiSampler,
}

impl GlobalResources {
    /// Placeholder texture for a slot category.
    pub fn placeholder(&self, category: TextureCategory) -> RhiTexture {
        match category {
            TextureCategory::Texture2D => self.white_texture_2d,
            TextureCategory::Cube => self.black_texture_cube,
            TextureCategory::Volume => self.black_texture_volume,
            TextureCategory::External => self.black_texture_external,
            TextureCategory::Virtual => self.black_physical,
        }
    }

    /// Pick the sampler for a slot.
    ///
    /// The per-expression source wins; an asset without its own sampler
    /// state falls back to the default sampler.
    pub fn sampler_for(
        &self,
        source: SamplerSource,
        texture: Option<&TextureResource>,
    ) -> RhiSampler {
        match source {
            SamplerSource::FromTextureAsset => texture
                .and_then(TextureResource::sampler)
                .unwrap_or(self.default_sampler),
            SamplerSource::Wrap => self.wrap_sampler,
            SamplerSource::Clamp => self.clamp_sampler,
        }
    }
}

impl Default for GlobalResources {
    fn default() -> Self {
        Self {
            white_texture_2d: RhiTexture(0xF000_0001),
            black_texture_cube: RhiTexture(0xF000_0002),
            black_texture_volume: RhiTexture(0xF000_0003),
            black_texture_external: RhiTexture(0xF000_0004),
            black_page_table: RhiTexture(0xF000_0005),
            black_physical: RhiTexture(0xF000_0006),
            default_sampler: RhiSampler(0xF100_0001),
            wrap_sampler: RhiSampler(0xF100_0002),
            clamp_sampler: RhiSampler(0xF100_0003),
        }
    }
}

/// Registry of externally produced textures, keyed by external id.
///
/// Video players and camera feeds register their current frame here; external
/// texture expressions look it up at fill time.
#[derive(Debug, Default)]
pub struct ExternalTextureRegistry {
    textures: RwLock<HashMap<u128, TextureHandle>>,
}

impl ExternalTextureRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the texture for `id`.
    pub fn register(&self, id: u128, texture: TextureHandle) {
        self.textures.write().insert(id, texture);
    }

    /// Remove the texture for `id`.
    pub fn unregister(&self, id: u128) -> Option<TextureHandle> {
        self.textures.write().remove(&id)
    }

    /// Current texture for `id`.
    pub fn get(&self, id: u128) -> Option<TextureHandle> {
        self.textures.read().get(&id).cloned()
    }
}

static_assertions::assert_impl_all!(TextureResource: Send, Sync);
static_assertions::assert_impl_all!(ExternalTextureRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_compatibility() {
        assert!(TextureCategory::Texture2D.accepts(TextureKind::TEXTURE_2D));
        assert!(!TextureCategory::Texture2D.accepts(TextureKind::EXTERNAL));
        assert!(TextureCategory::Virtual.accepts(TextureKind::RUNTIME_VIRTUAL));
        assert!(!TextureCategory::Cube.accepts(TextureKind::TEXTURE_VOLUME));
    }

    #[test]
    fn test_external_registry() {
        let registry = ExternalTextureRegistry::new();
        let frame = TextureResource::new("frame", TextureKind::EXTERNAL, 1920, 1080)
            .with_rhi(RhiTexture(9))
            .into_handle();
        registry.register(42, frame.clone());
        assert!(Arc::ptr_eq(&registry.get(42).unwrap(), &frame));
        assert!(registry.unregister(42).is_some());
        assert!(registry.get(42).is_none());
    }

    #[test]
    fn test_sampler_policy() {
        let globals = GlobalResources::default();
        let with_sampler =
            TextureResource::texture_2d("albedo", 4, 4, RhiTexture(1)).with_sampler(RhiSampler(7));
        let without_sampler = TextureResource::texture_2d("mask", 4, 4, RhiTexture(2));

        assert_eq!(
            globals.sampler_for(SamplerSource::FromTextureAsset, Some(&with_sampler)),
            RhiSampler(7)
        );
        assert_eq!(
            globals.sampler_for(SamplerSource::FromTextureAsset, Some(&without_sampler)),
            globals.default_sampler
        );
        assert_eq!(
            globals.sampler_for(SamplerSource::Wrap, Some(&with_sampler)),
            globals.wrap_sampler
        );
        assert_eq!(
            globals.sampler_for(SamplerSource::Clamp, None),
            globals.clamp_sampler
        );
    }

    #[test]
    fn test_texture_size() {
        let tex = TextureResource::new("vol", TextureKind::TEXTURE_VOLUME, 8, 4).with_depth(2);
        assert_eq!(tex.size(), LinearColor::new(8.0, 4.0, 2.0, 0.0));
        assert!(tex.rhi().is_none());
    }
}
