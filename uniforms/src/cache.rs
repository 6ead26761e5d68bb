//! Cached uniform buffers per render proxy.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{CompiledMaterial, FeatureLevel, MaterialResource, RenderContext};
use crate::fill::{UniformBufferContents, fill};
use crate::proxy::{RenderProxy, chain_stamp};
use crate::texture::GlobalResources;
use crate::virtual_texture::VirtualTextureProvider;

#[derive(Debug, Default, Clone)]
struct CacheEntry {
    up_to_date: bool,
    compiled: Option<Arc<CompiledMaterial>>,
    chain_stamp: u64,
    contents: Option<Arc<UniformBufferContents>>,
}

impl CacheEntry {
    fn is_valid_for(&self, compiled: &Arc<CompiledMaterial>, stamp: u64) -> bool {
        self.up_to_date
            && self.chain_stamp == stamp
            && self
                .compiled
                .as_ref()
                .is_some_and(|cached| Arc::ptr_eq(cached, compiled))
    }
}

fn context_stamp(ctx: &RenderContext<'_>) -> u64 {
    ctx.proxy().map_or(0, chain_stamp)
}

/// Filled uniform buffers of one render proxy, one per feature level.
///
/// An entry is reused while it is up to date, was filled from the currently
/// published [`CompiledMaterial`], and no proxy in the context's chain has
/// published since. Publishing new overrides anywhere up the chain or a new
/// material version makes it stale.
#[derive(Debug, Default)]
pub struct UniformExpressionCache {
    entries: Mutex<[CacheEntry; FeatureLevel::COUNT]>,
}

impl UniformExpressionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the entry for the context's feature level can be reused with
    /// its material and proxy chain.
    pub fn is_valid_for(&self, ctx: &RenderContext<'_>) -> bool {
        let stamp = context_stamp(ctx);
        let entries = self.entries.lock();
        entries[ctx.feature_level().index()].is_valid_for(ctx.material(), stamp)
    }

    /// Mark every feature level stale.
    pub fn invalidate(&self) {
        for entry in self.entries.lock().iter_mut() {
            entry.up_to_date = false;
        }
    }

    /// Mark one feature level stale.
    pub fn invalidate_level(&self, level: FeatureLevel) {
        self.entries.lock()[level.index()].up_to_date = false;
    }

    /// Last filled buffer for `level`, even if stale.
    pub fn cached(&self, level: FeatureLevel) -> Option<Arc<UniformBufferContents>> {
        self.entries.lock()[level.index()].contents.clone()
    }

    /// Cached buffer for the context's feature level, refilled when stale.
    pub fn get_or_fill(&self, ctx: &RenderContext<'_>) -> Arc<UniformBufferContents> {
        let stamp = context_stamp(ctx);
        {
            let entries = self.entries.lock();
            let entry = &entries[ctx.feature_level().index()];
            if entry.is_valid_for(ctx.material(), stamp) {
                if let Some(contents) = &entry.contents {
                    return contents.clone();
                }
            }
        }
        self.refill_stamped(ctx, stamp)
    }

    /// Fill the buffer for the context's feature level unconditionally.
    pub fn refill(&self, ctx: &RenderContext<'_>) -> Arc<UniformBufferContents> {
        self.refill_stamped(ctx, context_stamp(ctx))
    }

    // The stamp is taken before filling; a publish racing the fill leaves
    // the entry stale rather than wrongly current.
    fn refill_stamped(&self, ctx: &RenderContext<'_>, stamp: u64) -> Arc<UniformBufferContents> {
        crate::profile_scope!("uniform_cache_refill");
        let compiled = ctx.material();
        let contents = Arc::new(fill(compiled.schema(), compiled.set(), ctx));
        let mut entries = self.entries.lock();
        entries[ctx.feature_level().index()] = CacheEntry {
            up_to_date: true,
            compiled: Some(compiled.clone()),
            chain_stamp: stamp,
            contents: Some(contents.clone()),
        };
        contents
    }
}

/// Render proxies waiting to have their caches refilled.
///
/// Parameter edits during a frame queue their proxy here; the renderer
/// flushes the queue once, at a point where no fill is in flight.
#[derive(Debug, Default)]
pub struct DeferredCacheQueue {
    pending: Mutex<Vec<(Arc<dyn RenderProxy>, Arc<MaterialResource>)>>,
}

impl DeferredCacheQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `proxy` for a refill against `material`. Duplicates are ignored.
    pub fn request(&self, proxy: Arc<dyn RenderProxy>, material: Arc<MaterialResource>) {
        let mut pending = self.pending.lock();
        let queued = pending
            .iter()
            .any(|(p, m)| Arc::ptr_eq(p, &proxy) && Arc::ptr_eq(m, &material));
        if !queued {
            pending.push((proxy, material));
        }
    }

    /// Number of queued proxies.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Refill every queued proxy's cache for `level`. Returns how many were
    /// refilled.
    pub fn flush(
        &self,
        globals: &GlobalResources,
        level: FeatureLevel,
        virtual_textures: Option<&dyn VirtualTextureProvider>,
    ) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut refilled = 0;
        for (proxy, material) in &pending {
            let Some(cache) = proxy.cache() else {
                continue;
            };
            let compiled = material.current();
            let mut ctx = RenderContext::new(&compiled, material.diagnostics(), globals)
                .with_proxy(&**proxy)
                .with_feature_level(level);
            if let Some(provider) = virtual_textures {
                ctx = ctx.with_virtual_textures(provider);
            }
            cache.refill(&ctx);
            refilled += 1;
        }
        log::debug!(
            "Flushed {} deferred uniform cache updates ({refilled} refilled)",
            pending.len()
        );
        refilled
    }
}
