//! # RedLilium Uniforms
//!
//! Material uniform expressions for RedLilium Engine.
//!
//! A compiled material variant carries a small tree of expressions for every
//! value its shader reads from the material uniform buffer. This crate
//! evaluates those trees against runtime parameter overrides and writes the
//! results into a byte buffer with a fixed, alignment-correct layout plus an
//! ordered table of texture and sampler handles.
//!
//! The flow for one material:
//!
//! 1. build nodes in an [`ExpressionArena`] and register the top-level ones
//!    with a [`UniformExpressionSetBuilder`]
//! 2. wrap the set in a [`CompiledMaterial`], which also computes its
//!    [`BufferSchema`], and publish it through a [`MaterialResource`]
//! 3. every frame, [`fill`] the buffer with a [`RenderContext`] that names the
//!    active [`RenderProxy`] chain, or cache the result per proxy with
//!    [`UniformExpressionCache`]
//!
//! Construction returns [`UniformError`] on malformed input. Evaluation and
//! filling never fail; unresolvable textures degrade to placeholders from
//! [`GlobalResources`] with a single warning.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod expression;
pub mod fill;
pub mod hierarchy;
pub mod layout;
pub mod math;
pub mod parameter;
pub mod profiling;
pub mod proxy;
pub mod set;
pub mod texture;
pub mod virtual_texture;

pub use cache::{DeferredCacheQueue, UniformExpressionCache};
pub use config::LayoutConfig;
pub use context::{CompiledMaterial, Diagnostics, FeatureLevel, MaterialResource, RenderContext};
pub use error::UniformError;
pub use expression::{Expression, ExpressionArena, ExpressionId, ExpressionRegistry};
pub use fill::{ResourceBinding, UniformBufferContents, fill, fill_into};
pub use hierarchy::{FunctionId, MaterialHierarchy, MaterialId};
pub use layout::{BufferSchema, SchemaMember, build_schema};
pub use math::{DELTA, LinearColor, ValueType, safe_divisor};
pub use parameter::{ParameterInfo, ParameterKind, ParameterTable, ParameterValue};
pub use proxy::{ColoredRenderProxy, InstanceRenderProxy, RenderProxy, chain_stamp};
pub use set::{UniformExpressionSet, UniformExpressionSetBuilder};
pub use texture::{GlobalResources, TextureCategory, TextureHandle, TextureResource};
pub use virtual_texture::{AllocatedVirtualTexture, VirtualTextureProvider, VirtualTextureStack};

/// Uniforms library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version.
pub fn init() {
    log::info!("RedLilium Uniforms v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
