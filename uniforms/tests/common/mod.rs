//! Shared fixtures for the uniform integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_uniforms::texture::{RhiTexture, TextureHandle};
use redlilium_uniforms::virtual_texture::AllocatedLayer;
use redlilium_uniforms::{
    AllocatedVirtualTexture, CompiledMaterial, Diagnostics, GlobalResources, LayoutConfig,
    RenderContext, UniformBufferContents, UniformExpressionSetBuilder, VirtualTextureProvider,
    VirtualTextureStack,
};

/// Route `log` output through the test harness.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compile a set into a material with the default layout.
pub fn compile(
    name: &str,
    builder: UniformExpressionSetBuilder,
    textures: Vec<Option<TextureHandle>>,
) -> Arc<CompiledMaterial> {
    let set = builder.build().expect("set should build");
    Arc::new(
        CompiledMaterial::new(name, set, textures, &LayoutConfig::default())
            .expect("schema should build"),
    )
}

/// Owns everything a [`RenderContext`] borrows.
pub struct Frame {
    pub compiled: Arc<CompiledMaterial>,
    pub diagnostics: Diagnostics,
    pub globals: GlobalResources,
}

impl Frame {
    pub fn new(compiled: Arc<CompiledMaterial>) -> Self {
        Self {
            compiled,
            diagnostics: Diagnostics::new(),
            globals: GlobalResources::default(),
        }
    }

    pub fn ctx(&self) -> RenderContext<'_> {
        RenderContext::new(&self.compiled, &self.diagnostics, &self.globals)
    }

    pub fn fill_with(&self, ctx: &RenderContext<'_>) -> UniformBufferContents {
        redlilium_uniforms::fill(self.compiled.schema(), self.compiled.set(), ctx)
    }

    pub fn fill(&self) -> UniformBufferContents {
        self.fill_with(&self.ctx())
    }

    pub fn offset(&self, member: &str) -> u32 {
        self.compiled
            .schema()
            .member(member)
            .unwrap_or_else(|| panic!("schema has no member {member}"))
            .offset
    }
}

/// Paging system stand-in: every stack gets page tables and per-layer
/// physical textures derived from its index.
pub struct FakeVirtualTextures;

impl FakeVirtualTextures {
    pub fn page_table(stack: usize, table: usize) -> RhiTexture {
        RhiTexture(0x1000 + (stack * 2 + table) as u64)
    }

    pub fn physical(stack: usize, layer: usize) -> RhiTexture {
        RhiTexture(0x2000 + (stack * 16 + layer) as u64)
    }
}

impl VirtualTextureProvider for FakeVirtualTextures {
    fn allocate(
        &self,
        stack_index: usize,
        stack: &VirtualTextureStack,
        layer_textures: &[Option<TextureHandle>],
    ) -> Option<AllocatedVirtualTexture> {
        let layers = layer_textures
            .iter()
            .enumerate()
            .map(|(layer, texture)| AllocatedLayer {
                physical: texture.as_ref().map(|_| Self::physical(stack_index, layer)),
                uniform: [stack_index as u32, layer as u32, 0, 1],
            })
            .collect();
        Some(AllocatedVirtualTexture {
            page_table_uniforms: [[stack_index as u32, 0, 0, 0], [stack_index as u32, 1, 0, 0]],
            page_tables: (0..stack.page_table_texture_count())
                .map(|table| Self::page_table(stack_index, table))
                .collect(),
            layers,
        })
    }
}
