//! Virtual texture stacks.
//!
//! A stack groups up to [`MAX_VIRTUAL_TEXTURE_LAYERS`] virtual texture
//! expressions that share one page table lookup in the shader. The virtual
//! texture paging system lives outside this crate; it is reached through the
//! [`VirtualTextureProvider`] trait and hands back an
//! [`AllocatedVirtualTexture`] per stack.

use crate::config::MAX_VIRTUAL_TEXTURE_LAYERS;
use crate::error::UniformError;
use crate::texture::{RhiTexture, RuntimeVirtualTextureData, TextureHandle};

/// A group of virtual texture layers sharing page tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VirtualTextureStack {
    layers: [Option<u32>; MAX_VIRTUAL_TEXTURE_LAYERS],
    layer_count: usize,
    preallocated_texture_index: Option<u32>,
}

impl VirtualTextureStack {
    /// An empty streaming stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty stack bound to the runtime virtual texture at `texture_index`
    /// in the material's referenced textures.
    pub fn preallocated(texture_index: u32) -> Self {
        Self {
            preallocated_texture_index: Some(texture_index),
            ..Self::default()
        }
    }

    /// Append a layer holding virtual texture expression `expression_index`.
    ///
    /// Returns the layer index, or `None` when the stack is full.
    pub fn add_layer(&mut self, expression_index: u32) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let layer = self.layer_count;
        self.layers[layer] = Some(expression_index);
        self.layer_count += 1;
        Some(layer)
    }

    /// Put `expression_index` at a fixed layer, growing the stack as needed.
    ///
    /// Used by preallocated stacks, whose layer order is dictated by the
    /// runtime virtual texture.
    pub fn set_layer(&mut self, layer: usize, expression_index: u32) -> Result<(), UniformError> {
        if layer >= MAX_VIRTUAL_TEXTURE_LAYERS {
            return Err(UniformError::InvalidConfig(format!(
                "virtual texture layer {layer} exceeds the {MAX_VIRTUAL_TEXTURE_LAYERS} layer limit"
            )));
        }
        self.layers[layer] = Some(expression_index);
        self.layer_count = self.layer_count.max(layer + 1);
        Ok(())
    }

    /// Layer that holds `expression_index`.
    pub fn find_layer(&self, expression_index: u32) -> Option<usize> {
        self.layers[..self.layer_count]
            .iter()
            .position(|layer| *layer == Some(expression_index))
    }

    /// Expression index stored at `layer`.
    pub fn layer(&self, layer: usize) -> Option<u32> {
        self.layers.get(layer).copied().flatten()
    }

    /// Number of layers in use, including holes left by [`Self::set_layer`].
    pub fn num_layers(&self) -> usize {
        self.layer_count
    }

    /// Whether no more layers can be added.
    pub fn is_full(&self) -> bool {
        self.layer_count >= MAX_VIRTUAL_TEXTURE_LAYERS
    }

    /// Runtime virtual texture this stack is bound to, if any.
    pub fn preallocated_texture_index(&self) -> Option<u32> {
        self.preallocated_texture_index
    }

    /// Number of packed page table `uint4` rows this stack needs.
    pub fn page_table_uniform_count(&self) -> usize {
        if self.layer_count <= 4 { 1 } else { 2 }
    }

    /// Number of page table textures this stack binds.
    pub fn page_table_texture_count(&self) -> usize {
        self.page_table_uniform_count()
    }
}

/// One allocated virtual texture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatedLayer {
    /// Physical texture holding the resident pages.
    pub physical: Option<RhiTexture>,
    /// Packed `uint4` uniform describing the layer.
    pub uniform: [u32; 4],
}

/// Page tables and physical textures produced for one stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllocatedVirtualTexture {
    /// Packed page table uniforms.
    pub page_table_uniforms: [[u32; 4]; 2],
    /// Page table textures (one or two).
    pub page_tables: Vec<RhiTexture>,
    /// Per-layer data, in stack layer order.
    pub layers: Vec<AllocatedLayer>,
}

impl AllocatedVirtualTexture {
    /// Build the allocation of a runtime virtual texture.
    pub fn from_runtime(data: &RuntimeVirtualTextureData) -> Self {
        let layers = data
            .layer_uniforms
            .iter()
            .enumerate()
            .map(|(i, uniform)| AllocatedLayer {
                physical: data.physical_textures.get(i).copied(),
                uniform: *uniform,
            })
            .collect();
        Self {
            page_table_uniforms: data.page_table_uniforms,
            page_tables: data.page_tables.clone(),
            layers,
        }
    }

    /// Page table texture `index`.
    pub fn page_table(&self, index: usize) -> Option<RhiTexture> {
        self.page_tables.get(index).copied()
    }

    /// Layer `index`.
    pub fn layer(&self, index: usize) -> Option<&AllocatedLayer> {
        self.layers.get(index)
    }
}

/// The virtual texture paging system, as seen from uniform filling.
pub trait VirtualTextureProvider: Send + Sync {
    /// Allocate (or look up) page tables for a streaming stack.
    ///
    /// `layer_textures` holds the resolved texture of each layer, `None` for
    /// layers that did not resolve. Returning `None` means the stack has no
    /// allocation this frame; its slots are filled with placeholders.
    fn allocate(
        &self,
        stack_index: usize,
        stack: &VirtualTextureStack,
        layer_textures: &[Option<TextureHandle>],
    ) -> Option<AllocatedVirtualTexture>;
}

/// Find the stack and layer that own virtual texture expression
/// `expression_index`.
///
/// # Panics
///
/// Panics if no stack owns the expression. A set built by
/// [`UniformExpressionSetBuilder`](crate::set::UniformExpressionSetBuilder)
/// always assigns every virtual texture expression, so hitting this means the
/// set was assembled incorrectly.
pub fn locate_stack_and_layer(
    stacks: &[VirtualTextureStack],
    expression_index: u32,
) -> (usize, usize) {
    stacks
        .iter()
        .enumerate()
        .find_map(|(stack_index, stack)| {
            stack
                .find_layer(expression_index)
                .map(|layer| (stack_index, layer))
        })
        .unwrap_or_else(|| {
            panic!("virtual texture expression {expression_index} is not part of any stack")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_layer_until_full() {
        let mut stack = VirtualTextureStack::new();
        for i in 0..MAX_VIRTUAL_TEXTURE_LAYERS as u32 {
            assert_eq!(stack.add_layer(i), Some(i as usize));
        }
        assert!(stack.is_full());
        assert_eq!(stack.add_layer(99), None);
        assert_eq!(stack.find_layer(5), Some(5));
        assert_eq!(stack.find_layer(99), None);
    }

    #[test]
    fn test_page_table_count() {
        let mut stack = VirtualTextureStack::new();
        for i in 0..4 {
            stack.add_layer(i);
        }
        assert_eq!(stack.page_table_uniform_count(), 1);
        stack.add_layer(4);
        assert_eq!(stack.page_table_uniform_count(), 2);
    }

    #[test]
    fn test_set_layer_leaves_holes() {
        let mut stack = VirtualTextureStack::preallocated(3);
        stack.set_layer(2, 10).unwrap();
        assert_eq!(stack.num_layers(), 3);
        assert_eq!(stack.layer(0), None);
        assert_eq!(stack.find_layer(10), Some(2));
        assert_eq!(stack.preallocated_texture_index(), Some(3));
        assert!(stack.set_layer(MAX_VIRTUAL_TEXTURE_LAYERS, 11).is_err());
    }

    #[test]
    fn test_locate() {
        let mut a = VirtualTextureStack::new();
        a.add_layer(0);
        a.add_layer(1);
        let mut b = VirtualTextureStack::new();
        b.add_layer(2);
        assert_eq!(locate_stack_and_layer(&[a.clone(), b.clone()], 1), (0, 1));
        assert_eq!(locate_stack_and_layer(&[a, b], 2), (1, 0));
    }

    #[test]
    #[should_panic(expected = "not part of any stack")]
    fn test_locate_missing_panics() {
        let stack = VirtualTextureStack::new();
        locate_stack_and_layer(&[stack], 7);
    }

    #[test]
    fn test_from_runtime() {
        let data = RuntimeVirtualTextureData {
            page_table_uniforms: [[1, 2, 3, 4], [0; 4]],
            page_tables: vec![RhiTexture(50)],
            layer_uniforms: vec![[9, 9, 9, 9], [8, 8, 8, 8]],
            physical_textures: vec![RhiTexture(60)],
        };
        let allocated = AllocatedVirtualTexture::from_runtime(&data);
        assert_eq!(allocated.page_table(0), Some(RhiTexture(50)));
        assert_eq!(allocated.layer(0).unwrap().physical, Some(RhiTexture(60)));
        assert_eq!(allocated.layer(1).unwrap().physical, None);
        assert_eq!(allocated.layer(1).unwrap().uniform, [8, 8, 8, 8]);
    }
}
