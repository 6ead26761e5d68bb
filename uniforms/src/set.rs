//! Uniform expression sets.
//!
//! A set lists the top-level expressions of one compiled material variant,
//! grouped by what they feed: vector rows, packed scalars, and one texture
//! slot list per [`TextureCategory`]. Every list is deduplicated by
//! structural identity, and two sets compare equal when their lists are
//! pairwise structurally identical, which is what allows variants to share
//! a shader permutation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::context::RenderContext;
use crate::error::UniformError;
use crate::expression::{Expression, ExpressionArena, ExpressionId, ExpressionRegistry};
use crate::texture::TextureCategory;
use crate::virtual_texture::{VirtualTextureStack, locate_stack_and_layer};

/// Id of a material parameter collection referenced by a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParameterCollectionId(pub u128);

/// Expressions of one material variant, grouped by buffer category.
#[derive(Debug, Clone, Default)]
pub struct UniformExpressionSet {
    arena: ExpressionArena,
    vectors: Vec<ExpressionId>,
    scalars: Vec<ExpressionId>,
    textures: [Vec<ExpressionId>; TextureCategory::COUNT],
    stacks: Vec<VirtualTextureStack>,
    parameter_collections: Vec<ParameterCollectionId>,
}

impl UniformExpressionSet {
    /// Arena holding every node of the set.
    pub fn arena(&self) -> &ExpressionArena {
        &self.arena
    }

    /// Vector expressions, one `float4` each.
    pub fn vectors(&self) -> &[ExpressionId] {
        &self.vectors
    }

    /// Scalar expressions, packed four per `float4`.
    pub fn scalars(&self) -> &[ExpressionId] {
        &self.scalars
    }

    /// Texture expressions of one category.
    pub fn textures(&self, category: TextureCategory) -> &[ExpressionId] {
        &self.textures[category.index()]
    }

    /// Virtual texture expressions (streaming and runtime).
    pub fn virtual_textures(&self) -> &[ExpressionId] {
        self.textures(TextureCategory::Virtual)
    }

    /// Virtual texture stacks.
    pub fn stacks(&self) -> &[VirtualTextureStack] {
        &self.stacks
    }

    /// Referenced parameter collections.
    pub fn parameter_collections(&self) -> &[ParameterCollectionId] {
        &self.parameter_collections
    }

    /// Whether the set has no expressions of any kind.
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
            && self.scalars.is_empty()
            && self.textures.iter().all(Vec::is_empty)
            && self.stacks.is_empty()
            && self.parameter_collections.is_empty()
    }

    /// Stack and layer owning virtual texture `index`.
    ///
    /// # Panics
    ///
    /// Panics if no stack owns it, which a built set never allows.
    pub fn locate_virtual_texture(&self, index: usize) -> (usize, usize) {
        locate_stack_and_layer(&self.stacks, index as u32)
    }

    /// Slot of an expression structurally identical to `id` (from `arena`).
    pub fn find_texture_expression(
        &self,
        category: TextureCategory,
        arena: &ExpressionArena,
        id: ExpressionId,
    ) -> Option<usize> {
        find_identical(&self.arena, self.textures(category), arena, id)
    }

    /// Counts per category.
    pub fn summary(&self) -> SetSummary {
        SetSummary {
            vectors: self.vectors.len(),
            scalars: self.scalars.len(),
            textures: std::array::from_fn(|i| self.textures[i].len()),
            stacks: self.stacks.len(),
            parameter_collections: self.parameter_collections.len(),
        }
    }

    /// One line per top-level expression, for debug dumps.
    pub fn describe(&self, registry: &ExpressionRegistry) -> String {
        let mut lines = Vec::new();
        for (i, id) in self.vectors.iter().enumerate() {
            lines.push(format!("vector[{i}] = {}", self.arena.describe(*id, registry)));
        }
        for (i, id) in self.scalars.iter().enumerate() {
            lines.push(format!("scalar[{i}] = {}", self.arena.describe(*id, registry)));
        }
        for category in TextureCategory::ALL {
            for (i, id) in self.textures(category).iter().enumerate() {
                lines.push(format!(
                    "{}[{i}] = {}",
                    category.member_prefix(),
                    self.arena.describe(*id, registry)
                ));
            }
        }
        lines.join("\n")
    }

    /// Hash of the 2D textures this set currently resolves to.
    ///
    /// Changes when streaming or an override swaps a bound texture, which
    /// tells the renderer that cached bindings are stale.
    pub fn referenced_texture_hash(&self, ctx: &RenderContext<'_>) -> u64 {
        let mut hasher = DefaultHasher::new();
        for id in self.textures(TextureCategory::Texture2D) {
            let texture = self.arena.resolve_texture(*id, ctx);
            texture.as_ref().and_then(|t| t.rhi()).hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl PartialEq for UniformExpressionSet {
    fn eq(&self, other: &Self) -> bool {
        let same = |a: &[ExpressionId], b: &[ExpressionId]| {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b)
                    .all(|(x, y)| self.arena.is_identical(*x, &other.arena, *y))
        };
        same(&self.vectors, &other.vectors)
            && same(&self.scalars, &other.scalars)
            && self
                .textures
                .iter()
                .zip(&other.textures)
                .all(|(a, b)| same(a, b))
            && self.stacks == other.stacks
            && self.parameter_collections == other.parameter_collections
    }
}

/// Expression counts of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetSummary {
    /// Vector expressions.
    pub vectors: usize,
    /// Scalar expressions.
    pub scalars: usize,
    /// Texture expressions per category.
    pub textures: [usize; TextureCategory::COUNT],
    /// Virtual texture stacks.
    pub stacks: usize,
    /// Parameter collections.
    pub parameter_collections: usize,
}

impl fmt::Display for SetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vectors, {} scalars", self.vectors, self.scalars)?;
        for category in TextureCategory::ALL {
            let count = self.textures[category.index()];
            if count > 0 {
                write!(f, ", {count} {}", category.member_prefix())?;
            }
        }
        if self.stacks > 0 {
            write!(f, ", {} VT stacks", self.stacks)?;
        }
        if self.parameter_collections > 0 {
            write!(f, ", {} parameter collections", self.parameter_collections)?;
        }
        Ok(())
    }
}

fn find_identical(
    arena: &ExpressionArena,
    list: &[ExpressionId],
    other: &ExpressionArena,
    id: ExpressionId,
) -> Option<usize> {
    list.iter()
        .position(|existing| arena.is_identical(*existing, other, id))
}

/// Builds a [`UniformExpressionSet`].
///
/// Nodes are created through [`arena_mut`](Self::arena_mut); top-level ones
/// are then registered with the `add_*` methods, which return the slot the
/// expression landed in (an existing slot when an identical expression was
/// already added).
#[derive(Debug, Default)]
pub struct UniformExpressionSetBuilder {
    set: UniformExpressionSet,
}

impl UniformExpressionSetBuilder {
    /// Start an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing arena.
    pub fn with_arena(arena: ExpressionArena) -> Self {
        Self {
            set: UniformExpressionSet {
                arena,
                ..UniformExpressionSet::default()
            },
        }
    }

    /// Arena for building nodes.
    pub fn arena_mut(&mut self) -> &mut ExpressionArena {
        &mut self.set.arena
    }

    /// Arena built so far.
    pub fn arena(&self) -> &ExpressionArena {
        &self.set.arena
    }

    /// Register a vector expression.
    pub fn add_vector(&mut self, id: ExpressionId) -> Result<usize, UniformError> {
        self.check_numeric(id)?;
        Ok(push_unique(&self.set.arena, &mut self.set.vectors, id))
    }

    /// Register a scalar expression.
    pub fn add_scalar(&mut self, id: ExpressionId) -> Result<usize, UniformError> {
        self.check_numeric(id)?;
        Ok(push_unique(&self.set.arena, &mut self.set.scalars, id))
    }

    /// Register a texture expression in a non-virtual category.
    ///
    /// Virtual textures go through [`add_virtual_texture`](Self::add_virtual_texture)
    /// so they get a stack.
    pub fn add_texture(
        &mut self,
        category: TextureCategory,
        id: ExpressionId,
    ) -> Result<usize, UniformError> {
        if category == TextureCategory::Virtual {
            return self.add_virtual_texture(id);
        }
        self.check_exists(id)?;
        let node = self.set.arena.get(id);
        let fits = match category {
            TextureCategory::External => matches!(node, Expression::ExternalTextureParameter(_)),
            _ => matches!(node, Expression::TextureParameter(_)),
        };
        if !fits {
            return Err(UniformError::InvalidExpression(format!(
                "{:?} cannot fill a {} slot",
                node.kind(),
                category.member_prefix()
            )));
        }
        Ok(push_unique(
            &self.set.arena,
            &mut self.set.textures[category.index()],
            id,
        ))
    }

    /// Register a virtual texture expression and assign it to a stack.
    ///
    /// Streaming virtual textures share the first stack with a free layer.
    /// Runtime virtual textures go to the stack preallocated for their
    /// texture, at the layer they sample.
    pub fn add_virtual_texture(&mut self, id: ExpressionId) -> Result<usize, UniformError> {
        self.check_exists(id)?;
        let list = &self.set.textures[TextureCategory::Virtual.index()];
        if let Some(existing) = find_identical(&self.set.arena, list, &self.set.arena, id) {
            return Ok(existing);
        }
        let index = list.len();
        let vt_index = index as u32;

        match self.set.arena.get(id).clone() {
            Expression::TextureParameter(_) => {
                let free = self
                    .set
                    .stacks
                    .iter()
                    .position(|s| s.preallocated_texture_index().is_none() && !s.is_full());
                let stack_index = match free {
                    Some(stack_index) => stack_index,
                    None => {
                        self.set.stacks.push(VirtualTextureStack::new());
                        self.set.stacks.len() - 1
                    }
                };
                self.set.stacks[stack_index]
                    .add_layer(vt_index)
                    .ok_or(UniformError::VirtualTextureStackFull { stack: stack_index })?;
            }
            Expression::RuntimeVirtualTextureParameter(runtime) => {
                let existing = self
                    .set
                    .stacks
                    .iter()
                    .position(|s| s.preallocated_texture_index() == Some(runtime.texture_index));
                let stack_index = match existing {
                    Some(stack_index) => stack_index,
                    None => {
                        self.set
                            .stacks
                            .push(VirtualTextureStack::preallocated(runtime.texture_index));
                        self.set.stacks.len() - 1
                    }
                };
                let stack = &mut self.set.stacks[stack_index];
                if stack.layer(runtime.layer_index as usize).is_some() {
                    return Err(UniformError::InvalidExpression(format!(
                        "runtime virtual texture layer {} of stack {stack_index} is already used",
                        runtime.layer_index
                    )));
                }
                stack.set_layer(runtime.layer_index as usize, vt_index)?;
            }
            other => {
                return Err(UniformError::InvalidExpression(format!(
                    "{:?} cannot fill a virtual texture slot",
                    other.kind()
                )));
            }
        }

        self.set.textures[TextureCategory::Virtual.index()].push(id);
        Ok(index)
    }

    /// Reference a parameter collection.
    pub fn add_parameter_collection(&mut self, id: ParameterCollectionId) -> usize {
        match self.set.parameter_collections.iter().position(|c| *c == id) {
            Some(index) => index,
            None => {
                self.set.parameter_collections.push(id);
                self.set.parameter_collections.len() - 1
            }
        }
    }

    /// Check the set and hand it out. The set is immutable from here on.
    pub fn build(self) -> Result<UniformExpressionSet, UniformError> {
        let set = self.set;
        for index in 0..set.virtual_textures().len() {
            let owned = set
                .stacks
                .iter()
                .any(|stack| stack.find_layer(index as u32).is_some());
            if !owned {
                return Err(UniformError::UnassignedVirtualTexture { index });
            }
        }
        log::debug!("Built uniform expression set: {}", set.summary());
        Ok(set)
    }

    fn check_exists(&self, id: ExpressionId) -> Result<(), UniformError> {
        if id.index() < self.set.arena.len() {
            Ok(())
        } else {
            Err(UniformError::InvalidExpression(format!(
                "node {} is not in the set's arena",
                id.index()
            )))
        }
    }

    fn check_numeric(&self, id: ExpressionId) -> Result<(), UniformError> {
        self.check_exists(id)?;
        let node = self.set.arena.get(id);
        if node.is_texture() {
            return Err(UniformError::InvalidExpression(format!(
                "{:?} is not a numeric expression",
                node.kind()
            )));
        }
        Ok(())
    }
}

fn push_unique(arena: &ExpressionArena, list: &mut Vec<ExpressionId>, id: ExpressionId) -> usize {
    match find_identical(arena, list, arena, id) {
        Some(index) => index,
        None => {
            list.push(id);
            list.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{RuntimeVirtualTextureExpression, TextureExpression};
    use crate::math::{LinearColor, ValueType};
    use crate::parameter::ParameterInfo;

    fn tinted(constant: f32) -> UniformExpressionSet {
        let mut builder = UniformExpressionSetBuilder::new();
        let arena = builder.arena_mut();
        let tint = arena.vector_parameter(ParameterInfo::global("Tint"), LinearColor::zeros());
        let k = arena.constant_scalar(constant);
        let scaled = arena.mul(tint, k).unwrap();
        let tex = arena.texture(TextureExpression::new(0));
        builder.add_vector(scaled).unwrap();
        builder.add_scalar(k).unwrap();
        builder.add_texture(TextureCategory::Texture2D, tex).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_equal_sets() {
        assert_eq!(tinted(2.0), tinted(2.0));
    }

    #[test]
    fn test_changed_constant_breaks_equality() {
        assert_ne!(tinted(2.0), tinted(3.0));
    }

    #[test]
    fn test_dedup_identical_expressions() {
        let mut builder = UniformExpressionSetBuilder::new();
        let arena = builder.arena_mut();
        let a = arena.constant(LinearColor::new(1.0, 2.0, 3.0, 4.0), ValueType::Float4);
        let b = arena.constant(LinearColor::new(1.0, 2.0, 3.0, 4.0), ValueType::Float4);
        assert_eq!(builder.add_vector(a).unwrap(), 0);
        assert_eq!(builder.add_vector(b).unwrap(), 0);
        let set = builder.build().unwrap();
        assert_eq!(set.vectors().len(), 1);
    }

    #[test]
    fn test_category_checks() {
        let mut builder = UniformExpressionSetBuilder::new();
        let arena = builder.arena_mut();
        let k = arena.constant_scalar(1.0);
        let tex = arena.texture(TextureExpression::new(0));
        assert!(builder.add_texture(TextureCategory::Cube, k).is_err());
        assert!(builder.add_texture(TextureCategory::External, tex).is_err());
        assert!(builder.add_scalar(tex).is_err());
    }

    #[test]
    fn test_streaming_vt_stacks_fill_in_order() {
        let mut builder = UniformExpressionSetBuilder::new();
        for i in 0..10 {
            let id = builder.arena_mut().texture(TextureExpression::new(i));
            assert_eq!(builder.add_virtual_texture(id).unwrap(), i as usize);
        }
        let set = builder.build().unwrap();
        assert_eq!(set.stacks().len(), 2);
        assert_eq!(set.stacks()[0].num_layers(), 8);
        assert_eq!(set.stacks()[1].num_layers(), 2);
        assert_eq!(set.locate_virtual_texture(9), (1, 1));
    }

    #[test]
    fn test_runtime_vt_gets_preallocated_stack() {
        let mut builder = UniformExpressionSetBuilder::new();
        let arena = builder.arena_mut();
        let streaming = arena.texture(TextureExpression::new(0));
        let layer1 = arena.runtime_virtual_texture(RuntimeVirtualTextureExpression {
            parameter: None,
            texture_index: 5,
            layer_index: 1,
        });
        let layer0 = arena.runtime_virtual_texture(RuntimeVirtualTextureExpression {
            parameter: None,
            texture_index: 5,
            layer_index: 0,
        });
        builder.add_virtual_texture(streaming).unwrap();
        builder.add_virtual_texture(layer1).unwrap();
        builder.add_virtual_texture(layer0).unwrap();
        let set = builder.build().unwrap();

        assert_eq!(set.stacks().len(), 2);
        assert_eq!(set.stacks()[1].preallocated_texture_index(), Some(5));
        assert_eq!(set.locate_virtual_texture(1), (1, 1));
        assert_eq!(set.locate_virtual_texture(2), (1, 0));
    }

    #[test]
    fn test_summary_and_describe() {
        let set = tinted(2.0);
        let summary = set.summary();
        assert_eq!(summary.vectors, 1);
        assert_eq!(summary.textures[TextureCategory::Texture2D.index()], 1);
        assert_eq!(summary.to_string(), "1 vectors, 1 scalars, 1 Texture2D");

        let dump = set.describe(&ExpressionRegistry::standard());
        assert!(dump.contains("vector[0] = FoldedMathMul"));
        assert!(dump.contains("Texture2D[0] = TextureParameter#0"));
        assert!(!set.is_empty());
        assert!(UniformExpressionSetBuilder::new().build().unwrap().is_empty());
    }

    #[test]
    fn test_find_texture_expression_across_arenas() {
        let set = tinted(2.0);
        let mut other = ExpressionArena::new();
        let same = other.texture(TextureExpression::new(0));
        let different = other.texture(TextureExpression::new(1));
        assert_eq!(
            set.find_texture_expression(TextureCategory::Texture2D, &other, same),
            Some(0)
        );
        assert_eq!(
            set.find_texture_expression(TextureCategory::Texture2D, &other, different),
            None
        );
    }
}
