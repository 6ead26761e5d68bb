//! Render proxies: the runtime parameter override chain.
//!
//! The renderer draws through a render proxy. Each proxy may answer a
//! parameter lookup itself or defer to its parent, forming a chain that ends
//! at the proxy of the base material. Lookups walk the chain iteratively and
//! stop, with a miss, if the chain revisits a proxy or grows past
//! [`MAX_PROXY_CHAIN_DEPTH`].

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::cache::UniformExpressionCache;
use crate::math::LinearColor;
use crate::parameter::{ParameterInfo, ParameterKind, ParameterTable, ParameterValue};

/// Longest proxy chain a lookup will follow.
pub const MAX_PROXY_CHAIN_DEPTH: usize = 64;

/// A source of runtime parameter overrides.
pub trait RenderProxy: Send + Sync + fmt::Debug {
    /// Debug name.
    fn name(&self) -> &str;

    /// Value set on this proxy itself, without consulting the parent.
    fn local_parameter(&self, info: &ParameterInfo, kind: ParameterKind) -> Option<ParameterValue>;

    /// Next proxy in the chain.
    fn parent(&self) -> Option<Arc<dyn RenderProxy>>;

    /// Counter bumped every time this proxy's render-side state changes.
    fn publish_generation(&self) -> u64 {
        0
    }

    /// Uniform expression cache owned by this proxy, if it keeps one.
    fn cache(&self) -> Option<&UniformExpressionCache> {
        None
    }
}

/// Look a parameter up along the proxy chain starting at `start`.
///
/// A texture override that holds no texture does not stop the walk; the
/// parent gets a chance to supply one.
pub fn find_parameter(
    start: &dyn RenderProxy,
    info: &ParameterInfo,
    kind: ParameterKind,
) -> Option<ParameterValue> {
    if let Some(value) = usable(start.local_parameter(info, kind)) {
        return Some(value);
    }

    let mut visited: Vec<*const ()> = vec![thin_ptr(start)];
    let mut next = start.parent();
    while let Some(proxy) = next {
        let ptr = thin_ptr(&*proxy);
        if visited.contains(&ptr) {
            log::warn!(
                "Render proxy '{}' appears twice in its own parent chain",
                proxy.name()
            );
            return None;
        }
        if visited.len() >= MAX_PROXY_CHAIN_DEPTH {
            log::warn!(
                "Render proxy chain deeper than {MAX_PROXY_CHAIN_DEPTH} while looking up '{}'",
                info.name
            );
            return None;
        }
        if let Some(value) = usable(proxy.local_parameter(info, kind)) {
            return Some(value);
        }
        visited.push(ptr);
        next = proxy.parent();
    }
    None
}

/// Fingerprint of the proxy chain starting at `start`.
///
/// Combines the identity and publish generation of every proxy the chain
/// walk visits, so publishing anywhere up the chain changes the result.
pub fn chain_stamp(start: &dyn RenderProxy) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut visited: Vec<*const ()> = vec![thin_ptr(start)];
    (thin_ptr(start) as usize, start.publish_generation()).hash(&mut hasher);
    let mut next = start.parent();
    while let Some(proxy) = next {
        let ptr = thin_ptr(&*proxy);
        if visited.contains(&ptr) || visited.len() >= MAX_PROXY_CHAIN_DEPTH {
            break;
        }
        (ptr as usize, proxy.publish_generation()).hash(&mut hasher);
        visited.push(ptr);
        next = proxy.parent();
    }
    hasher.finish()
}

fn usable(value: Option<ParameterValue>) -> Option<ParameterValue> {
    value.filter(|v| !matches!(v.as_texture(), Some(None)))
}

fn thin_ptr(proxy: &dyn RenderProxy) -> *const () {
    proxy as *const dyn RenderProxy as *const ()
}

#[derive(Debug, Clone, Default)]
struct ProxyState {
    parent: Option<Arc<dyn RenderProxy>>,
    parameters: ParameterTable,
}

/// Render proxy of a material instance.
///
/// Edits made on the game side land in a pending copy and stay invisible to
/// the renderer until [`publish`](Self::publish) swaps them in. Publishing is
/// the only way the render-side state changes. It invalidates the proxy's own
/// uniform expression cache and bumps the generation that caches of child
/// proxies fold into their [`chain_stamp`].
#[derive(Debug)]
pub struct InstanceRenderProxy {
    name: String,
    pending: Mutex<ProxyState>,
    published: RwLock<Arc<ProxyState>>,
    generation: AtomicU64,
    cache: UniformExpressionCache,
}

impl InstanceRenderProxy {
    /// Create a proxy with no overrides.
    pub fn new(name: impl Into<String>, parent: Option<Arc<dyn RenderProxy>>) -> Self {
        let state = ProxyState {
            parent,
            parameters: ParameterTable::new(),
        };
        Self {
            name: name.into(),
            pending: Mutex::new(state.clone()),
            published: RwLock::new(Arc::new(state)),
            generation: AtomicU64::new(0),
            cache: UniformExpressionCache::new(),
        }
    }

    /// Stage an override. Not visible until the next publish.
    pub fn set_parameter(&self, info: ParameterInfo, value: ParameterValue) {
        self.pending.lock().parameters.set(info, value);
    }

    /// Stage removal of an override.
    pub fn clear_parameter(&self, info: &ParameterInfo, kind: ParameterKind) {
        self.pending.lock().parameters.remove(info, kind);
    }

    /// Stage a new parent.
    pub fn set_parent(&self, parent: Option<Arc<dyn RenderProxy>>) {
        self.pending.lock().parent = parent;
    }

    /// Make all staged edits visible to the renderer at once.
    pub fn publish(&self) {
        let snapshot = Arc::new(self.pending.lock().clone());
        *self.published.write() = snapshot;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.cache.invalidate();
        log::debug!(
            "Published overrides for render proxy '{}' (generation {generation})",
            self.name
        );
    }

    /// Number of published overrides.
    pub fn published_len(&self) -> usize {
        self.published.read().parameters.len()
    }
}

impl RenderProxy for InstanceRenderProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_parameter(&self, info: &ParameterInfo, kind: ParameterKind) -> Option<ParameterValue> {
        self.published.read().parameters.find(info, kind).cloned()
    }

    fn parent(&self) -> Option<Arc<dyn RenderProxy>> {
        self.published.read().parent.clone()
    }

    fn publish_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn cache(&self) -> Option<&UniformExpressionCache> {
        Some(&self.cache)
    }
}

/// Proxy that forces one vector parameter to a fixed colour.
///
/// Used for selection highlights and debug views.
#[derive(Debug)]
pub struct ColoredRenderProxy {
    name: String,
    parent: Arc<dyn RenderProxy>,
    parameter: ParameterInfo,
    color: LinearColor,
}

impl ColoredRenderProxy {
    /// Override `parameter` with `color` on top of `parent`.
    pub fn new(parent: Arc<dyn RenderProxy>, parameter: ParameterInfo, color: LinearColor) -> Self {
        Self {
            name: format!("{} (colored)", parent.name()),
            parent,
            parameter,
            color,
        }
    }
}

impl RenderProxy for ColoredRenderProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_parameter(&self, info: &ParameterInfo, kind: ParameterKind) -> Option<ParameterValue> {
        (kind == ParameterKind::Vector && *info == self.parameter)
            .then_some(ParameterValue::Vector(self.color))
    }

    fn parent(&self) -> Option<Arc<dyn RenderProxy>> {
        Some(self.parent.clone())
    }
}

static_assertions::assert_impl_all!(InstanceRenderProxy: Send, Sync);
static_assertions::assert_impl_all!(ColoredRenderProxy: Send, Sync);
