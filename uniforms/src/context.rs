//! Per-draw render context and the published material state it reads.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::config::LayoutConfig;
use crate::error::UniformError;
use crate::hierarchy::{MaterialHierarchy, MaterialId};
use crate::layout::{BufferSchema, build_schema};
use crate::parameter::{ParameterInfo, ParameterKind, ParameterValue};
use crate::proxy::{self, RenderProxy};
use crate::set::UniformExpressionSet;
use crate::texture::{ExternalTextureRegistry, GlobalResources, TextureHandle};
use crate::virtual_texture::VirtualTextureProvider;

/// Shader feature level a material variant was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureLevel {
    /// Mobile class hardware.
    Es31,
    /// Desktop, shader model 5.
    Sm5,
    /// Desktop, shader model 6.
    Sm6,
}

impl FeatureLevel {
    /// Number of feature levels.
    pub const COUNT: usize = 3;

    /// Every feature level.
    pub const ALL: [FeatureLevel; Self::COUNT] = [Self::Es31, Self::Sm5, Self::Sm6];

    /// Dense index in `0..COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Log-once bookkeeping for degraded resources.
///
/// A missing or mistyped texture would otherwise warn every frame.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warned: Mutex<HashSet<String>>,
}

impl Diagnostics {
    /// Create empty diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `message` at warn level the first time `key` is seen.
    ///
    /// Returns `true` if the message was logged.
    pub fn warn_once(&self, key: &str, message: impl fmt::Display) -> bool {
        let mut warned = self.warned.lock();
        if warned.contains(key) {
            return false;
        }
        warned.insert(key.to_string());
        drop(warned);
        log::warn!("{message}");
        true
    }

    /// Number of distinct warnings logged so far.
    pub fn warned_count(&self) -> usize {
        self.warned.lock().len()
    }

    /// Forget all logged warnings.
    pub fn clear(&self) {
        self.warned.lock().clear();
    }
}

/// Immutable result of compiling one material variant.
#[derive(Debug)]
pub struct CompiledMaterial {
    name: String,
    set: UniformExpressionSet,
    schema: BufferSchema,
    referenced_textures: Vec<Option<TextureHandle>>,
}

impl CompiledMaterial {
    /// Bundle a set with its schema and default textures.
    pub fn new(
        name: impl Into<String>,
        set: UniformExpressionSet,
        referenced_textures: Vec<Option<TextureHandle>>,
        config: &LayoutConfig,
    ) -> Result<Self, UniformError> {
        let schema = build_schema(&set, config)?;
        Ok(Self {
            name: name.into(),
            set,
            schema,
            referenced_textures,
        })
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The uniform expression set.
    pub fn set(&self) -> &UniformExpressionSet {
        &self.set
    }

    /// The buffer schema built from the set.
    pub fn schema(&self) -> &BufferSchema {
        &self.schema
    }

    /// Default textures, indexed by texture expressions.
    pub fn referenced_textures(&self) -> &[Option<TextureHandle>] {
        &self.referenced_textures
    }
}

/// Publish-then-read slot for a material's compiled state.
///
/// Recompiles build a new [`CompiledMaterial`] off to the side and swap it in
/// with [`publish`](Self::publish). Readers hold the `Arc` they got from
/// [`current`](Self::current) until they are done, so an in-flight fill
/// always sees one consistent version.
#[derive(Debug)]
pub struct MaterialResource {
    id: u32,
    compiled: RwLock<Arc<CompiledMaterial>>,
    generation: AtomicU64,
    diagnostics: Diagnostics,
}

impl MaterialResource {
    /// Create a resource with its first compiled version.
    pub fn new(id: u32, compiled: CompiledMaterial) -> Self {
        Self {
            id,
            compiled: RwLock::new(Arc::new(compiled)),
            generation: AtomicU64::new(0),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Resource id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Swap in a new compiled version.
    pub fn publish(&self, compiled: CompiledMaterial) {
        let compiled = Arc::new(compiled);
        let name = compiled.name().to_string();
        *self.compiled.write() = compiled;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("Published material '{name}' (resource {}, generation {generation})", self.id);
    }

    /// The currently published version.
    pub fn current(&self) -> Arc<CompiledMaterial> {
        self.compiled.read().clone()
    }

    /// Number of publishes since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Log-once state shared by every fill of this material.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

/// Read-only inputs of one evaluation or fill.
///
/// Parameter lookups go to the render proxy chain when a proxy is set.
/// Without a proxy, the material hierarchy is consulted instead. Callers
/// supply the compiled default when both miss.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    material: &'a Arc<CompiledMaterial>,
    diagnostics: &'a Diagnostics,
    globals: &'a GlobalResources,
    proxy: Option<&'a dyn RenderProxy>,
    hierarchy: Option<(&'a MaterialHierarchy, MaterialId)>,
    external_textures: Option<&'a ExternalTextureRegistry>,
    virtual_textures: Option<&'a dyn VirtualTextureProvider>,
    feature_level: FeatureLevel,
}

impl<'a> RenderContext<'a> {
    /// Context with no override sources.
    pub fn new(
        material: &'a Arc<CompiledMaterial>,
        diagnostics: &'a Diagnostics,
        globals: &'a GlobalResources,
    ) -> Self {
        Self {
            material,
            diagnostics,
            globals,
            proxy: None,
            hierarchy: None,
            external_textures: None,
            virtual_textures: None,
            feature_level: FeatureLevel::Sm5,
        }
    }

    /// Use `proxy` as the runtime override chain.
    pub fn with_proxy(mut self, proxy: &'a dyn RenderProxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Resolve through `hierarchy` starting at `start` when no proxy is set.
    pub fn with_hierarchy(mut self, hierarchy: &'a MaterialHierarchy, start: MaterialId) -> Self {
        self.hierarchy = Some((hierarchy, start));
        self
    }

    /// Look external textures up in `registry`.
    pub fn with_external_textures(mut self, registry: &'a ExternalTextureRegistry) -> Self {
        self.external_textures = Some(registry);
        self
    }

    /// Allocate virtual texture stacks through `provider`.
    pub fn with_virtual_textures(mut self, provider: &'a dyn VirtualTextureProvider) -> Self {
        self.virtual_textures = Some(provider);
        self
    }

    /// Set the feature level.
    pub fn with_feature_level(mut self, feature_level: FeatureLevel) -> Self {
        self.feature_level = feature_level;
        self
    }

    /// The compiled material being rendered.
    pub fn material(&self) -> &'a Arc<CompiledMaterial> {
        self.material
    }

    /// Log-once state.
    pub fn diagnostics(&self) -> &'a Diagnostics {
        self.diagnostics
    }

    /// Placeholders and shared samplers.
    pub fn globals(&self) -> &'a GlobalResources {
        self.globals
    }

    /// Active render proxy.
    pub fn proxy(&self) -> Option<&'a dyn RenderProxy> {
        self.proxy
    }

    /// External texture registry.
    pub fn external_textures(&self) -> Option<&'a ExternalTextureRegistry> {
        self.external_textures
    }

    /// Virtual texture provider.
    pub fn virtual_textures(&self) -> Option<&'a dyn VirtualTextureProvider> {
        self.virtual_textures
    }

    /// Feature level.
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    /// Runtime value of a parameter, or `None` to use the compiled default.
    pub fn lookup_parameter(
        &self,
        info: &ParameterInfo,
        kind: ParameterKind,
    ) -> Option<ParameterValue> {
        if let Some(proxy) = self.proxy {
            return proxy::find_parameter(proxy, info, kind);
        }
        let (hierarchy, start) = self.hierarchy?;
        hierarchy.resolve(info, kind, start)
    }

    /// Default texture `index` of the compiled material.
    ///
    /// An out-of-range index is logged once and treated as a missing texture.
    pub fn referenced_texture(&self, index: u32) -> Option<TextureHandle> {
        let textures = self.material.referenced_textures();
        match textures.get(index as usize) {
            Some(texture) => texture.clone(),
            None => {
                self.diagnostics.warn_once(
                    &format!("{}:texture-index:{index}", self.material.name()),
                    format_args!(
                        "Texture index {index} out of range ({} referenced) in material '{}'",
                        textures.len(),
                        self.material.name()
                    ),
                );
                None
            }
        }
    }
}

impl fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("material", &self.material.name())
            .field("proxy", &self.proxy.map(|p| p.name()))
            .field("feature_level", &self.feature_level)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(MaterialResource: Send, Sync);
static_assertions::assert_impl_all!(RenderContext<'static>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::set::UniformExpressionSetBuilder;

    fn empty_material(name: &str) -> CompiledMaterial {
        let set = UniformExpressionSetBuilder::new().build().unwrap();
        CompiledMaterial::new(name, set, Vec::new(), &LayoutConfig::default()).unwrap()
    }

    #[test]
    fn test_warn_once() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.warn_once("a", "first"));
        assert!(!diagnostics.warn_once("a", "again"));
        assert!(diagnostics.warn_once("b", "other"));
        assert_eq!(diagnostics.warned_count(), 2);
        diagnostics.clear();
        assert_eq!(diagnostics.warned_count(), 0);
    }

    #[test]
    fn test_publish_swaps_version() {
        let resource = MaterialResource::new(1, empty_material("v1"));
        let before = resource.current();
        resource.publish(empty_material("v2"));

        assert_eq!(before.name(), "v1");
        assert_eq!(resource.current().name(), "v2");
        assert_eq!(resource.generation(), 1);
    }

    #[test]
    fn test_out_of_range_texture_logs_once() {
        let resource = MaterialResource::new(1, empty_material("m"));
        let compiled = resource.current();
        let globals = GlobalResources::default();
        let ctx = RenderContext::new(&compiled, resource.diagnostics(), &globals);

        assert!(ctx.referenced_texture(3).is_none());
        assert!(ctx.referenced_texture(3).is_none());
        assert_eq!(resource.diagnostics().warned_count(), 1);
    }

    #[test]
    fn test_feature_level_index() {
        for (i, level) in FeatureLevel::ALL.iter().enumerate() {
            assert_eq!(level.index(), i);
        }
    }
}
