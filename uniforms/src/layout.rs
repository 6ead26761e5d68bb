//! Uniform buffer layout.
//!
//! [`build_schema`] turns a [`UniformExpressionSet`] into an ordered list of
//! members with byte offsets. The member order is fixed:
//!
//! 1. packed virtual texture page table uniforms, per stack
//! 2. packed virtual texture uniforms, per virtual texture expression
//! 3. vector expressions
//! 4. scalar expressions, four per row
//! 5. texture and sampler slots per category (2D, cube, volume, external),
//!    then virtual texture page tables (texture only), then virtual texture
//!    physical textures and their samplers
//! 6. the shared wrap and clamp samplers
//!
//! Numeric members take one 16-byte row each. Resource slots are aligned to
//! the pointer alignment, and the total is rounded up to the struct
//! alignment. The result depends only on the set and the config.

use crate::config::{LayoutConfig, align_up};
use crate::error::UniformError;
use crate::set::UniformExpressionSet;
use crate::texture::TextureCategory;

/// What a schema member holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Packed page table `uint4` row of a virtual texture stack.
    PageTableUniform {
        /// Stack index.
        stack: usize,
        /// Row within the stack (0 or 1).
        row: usize,
    },
    /// Packed `uint4` of one virtual texture expression.
    VirtualTextureUniform {
        /// Index into the set's virtual textures.
        index: usize,
    },
    /// One vector expression.
    Vector {
        /// Index into the set's vectors.
        index: usize,
    },
    /// Up to four scalar expressions.
    Scalars {
        /// Index of the scalar in lane R.
        first: usize,
    },
    /// Texture slot.
    Texture {
        /// Slot category.
        category: TextureCategory,
        /// Index into the set's list for that category.
        index: usize,
    },
    /// Sampler slot paired with the texture slot before it.
    Sampler {
        /// Slot category.
        category: TextureCategory,
        /// Index into the set's list for that category.
        index: usize,
    },
    /// Page table texture of a virtual texture stack.
    PageTable {
        /// Stack index.
        stack: usize,
        /// Page table within the stack (0 or 1).
        table: usize,
    },
    /// Shared wrap sampler.
    WrapSampler,
    /// Shared clamp sampler.
    ClampSampler,
}

impl MemberKind {
    /// Whether the member is a texture or sampler slot.
    pub fn is_resource(self) -> bool {
        matches!(
            self,
            Self::Texture { .. }
                | Self::Sampler { .. }
                | Self::PageTable { .. }
                | Self::WrapSampler
                | Self::ClampSampler
        )
    }
}

/// One member of a uniform buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaMember {
    /// Member name as the shader declares it.
    pub name: String,
    /// What the member holds.
    pub kind: MemberKind,
    /// Byte offset from the start of the buffer.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

/// Byte layout of a material's uniform buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferSchema {
    members: Vec<SchemaMember>,
    size: u32,
    config: LayoutConfig,
}

impl BufferSchema {
    /// Members in buffer order.
    pub fn members(&self) -> &[SchemaMember] {
        &self.members
    }

    /// Total size in bytes, rounded to the struct alignment.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Config the schema was built with.
    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Member by name.
    pub fn member(&self, name: &str) -> Option<&SchemaMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Number of texture and sampler slots.
    pub fn resource_count(&self) -> usize {
        self.members.iter().filter(|m| m.kind.is_resource()).count()
    }
}

struct LayoutBuilder {
    config: LayoutConfig,
    offset: u32,
    members: Vec<SchemaMember>,
}

impl LayoutBuilder {
    fn numeric(&mut self, name: String, kind: MemberKind) {
        let size = LayoutConfig::NUMERIC_ROW_SIZE;
        self.offset = align_up(self.offset, size);
        self.members.push(SchemaMember {
            name,
            kind,
            offset: self.offset,
            size,
        });
        self.offset += size;
    }

    fn resource(&mut self, name: String, kind: MemberKind) {
        self.offset = align_up(self.offset, self.config.pointer_alignment);
        self.members.push(SchemaMember {
            name,
            kind,
            offset: self.offset,
            size: self.config.pointer_size,
        });
        self.offset += self.config.pointer_size;
    }
}

/// Compute the buffer layout of a set.
pub fn build_schema(
    set: &UniformExpressionSet,
    config: &LayoutConfig,
) -> Result<BufferSchema, UniformError> {
    crate::profile_function!();
    config.validate()?;

    for (stack_index, stack) in set.stacks().iter().enumerate() {
        if stack.num_layers() > config.max_virtual_texture_layers {
            return Err(UniformError::InvalidConfig(format!(
                "stack {stack_index} has {} layers, the platform allows {}",
                stack.num_layers(),
                config.max_virtual_texture_layers
            )));
        }
    }

    let mut builder = LayoutBuilder {
        config: *config,
        offset: 0,
        members: Vec::new(),
    };

    for (stack, vt_stack) in set.stacks().iter().enumerate() {
        for row in 0..vt_stack.page_table_uniform_count() {
            builder.numeric(
                format!("VTPackedPageTableUniform_{stack}_{row}"),
                MemberKind::PageTableUniform { stack, row },
            );
        }
    }
    for index in 0..set.virtual_textures().len() {
        builder.numeric(
            format!("VTPackedUniform_{index}"),
            MemberKind::VirtualTextureUniform { index },
        );
    }
    for index in 0..set.vectors().len() {
        builder.numeric(
            format!("VectorExpressions_{index}"),
            MemberKind::Vector { index },
        );
    }
    for (row, first) in (0..set.scalars().len()).step_by(4).enumerate() {
        builder.numeric(
            format!("ScalarExpressions_{row}"),
            MemberKind::Scalars { first },
        );
    }

    for category in [
        TextureCategory::Texture2D,
        TextureCategory::Cube,
        TextureCategory::Volume,
        TextureCategory::External,
    ] {
        push_texture_slots(&mut builder, set, category);
    }
    for (stack, vt_stack) in set.stacks().iter().enumerate() {
        for table in 0..vt_stack.page_table_texture_count() {
            builder.resource(
                format!("VirtualTexturePageTable_{stack}_{table}"),
                MemberKind::PageTable { stack, table },
            );
        }
    }
    push_texture_slots(&mut builder, set, TextureCategory::Virtual);

    builder.resource("Wrap_WorldGroupSettings".to_string(), MemberKind::WrapSampler);
    builder.resource("Clamp_WorldGroupSettings".to_string(), MemberKind::ClampSampler);

    let size = align_up(builder.offset, config.struct_alignment);
    Ok(BufferSchema {
        members: builder.members,
        size,
        config: *config,
    })
}

fn push_texture_slots(
    builder: &mut LayoutBuilder,
    set: &UniformExpressionSet,
    category: TextureCategory,
) {
    let prefix = category.member_prefix();
    for index in 0..set.textures(category).len() {
        builder.resource(
            format!("{prefix}_{index}"),
            MemberKind::Texture { category, index },
        );
        builder.resource(
            format!("{prefix}_{index}Sampler"),
            MemberKind::Sampler { category, index },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::TextureExpression;
    use crate::math::LinearColor;
    use crate::parameter::ParameterInfo;
    use crate::set::UniformExpressionSetBuilder;
    use rstest::rstest;

    fn set_with(vectors: usize, scalars: usize, textures: usize) -> UniformExpressionSet {
        let mut builder = UniformExpressionSetBuilder::new();
        for i in 0..vectors {
            let id = builder
                .arena_mut()
                .vector_parameter(ParameterInfo::global(format!("v{i}")), LinearColor::zeros());
            builder.add_vector(id).unwrap();
        }
        for i in 0..scalars {
            let id = builder
                .arena_mut()
                .scalar_parameter(ParameterInfo::global(format!("s{i}")), 0.0);
            builder.add_scalar(id).unwrap();
        }
        for i in 0..textures {
            let id = builder.arena_mut().texture(TextureExpression::new(i as u32));
            builder.add_texture(TextureCategory::Texture2D, id).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_empty_set_has_shared_samplers() {
        let schema = build_schema(&set_with(0, 0, 0), &LayoutConfig::default()).unwrap();
        assert_eq!(schema.members().len(), 2);
        assert_eq!(schema.members()[0].kind, MemberKind::WrapSampler);
        assert_eq!(schema.members()[1].offset, 8);
        assert_eq!(schema.size(), 16);
    }

    #[rstest]
    #[case::one_scalar(1, 1)]
    #[case::four_scalars(4, 1)]
    #[case::five_scalars(5, 2)]
    #[case::nine_scalars(9, 3)]
    fn test_scalar_packing(#[case] scalars: usize, #[case] rows: usize) {
        let schema = build_schema(&set_with(0, scalars, 0), &LayoutConfig::default()).unwrap();
        let scalar_rows = schema
            .members()
            .iter()
            .filter(|m| matches!(m.kind, MemberKind::Scalars { .. }))
            .count();
        assert_eq!(scalar_rows, rows);
    }

    #[test]
    fn test_offsets() {
        let schema = build_schema(&set_with(2, 5, 1), &LayoutConfig::default()).unwrap();
        let offsets: Vec<(&str, u32)> = schema
            .members()
            .iter()
            .map(|m| (m.name.as_str(), m.offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                ("VectorExpressions_0", 0),
                ("VectorExpressions_1", 16),
                ("ScalarExpressions_0", 32),
                ("ScalarExpressions_1", 48),
                ("Texture2D_0", 64),
                ("Texture2D_0Sampler", 72),
                ("Wrap_WorldGroupSettings", 80),
                ("Clamp_WorldGroupSettings", 88),
            ]
        );
        assert_eq!(schema.size(), 96);
        assert_eq!(schema.resource_count(), 4);
    }

    #[test]
    fn test_small_pointers_round_struct_size() {
        let config = LayoutConfig::new()
            .with_pointer_size(4)
            .with_pointer_alignment(4);
        let schema = build_schema(&set_with(1, 0, 1), &config).unwrap();
        // 16 numeric + 4 resource slots of 4 bytes = 32.
        assert_eq!(schema.size(), 32);
        let schema = build_schema(&set_with(1, 0, 0), &config).unwrap();
        // 16 + 8 = 24, rounded to 32.
        assert_eq!(schema.size(), 32);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LayoutConfig::new().with_pointer_alignment(3);
        assert!(build_schema(&set_with(0, 0, 0), &config).is_err());
    }

    #[test]
    fn test_virtual_texture_members() {
        let mut builder = UniformExpressionSetBuilder::new();
        for i in 0..5 {
            let id = builder.arena_mut().texture(TextureExpression::new(i));
            builder.add_virtual_texture(id).unwrap();
        }
        let set = builder.build().unwrap();
        let schema = build_schema(&set, &LayoutConfig::default()).unwrap();
        let names: Vec<&str> = schema.members().iter().map(|m| m.name.as_str()).collect();

        assert_eq!(&names[..3], &[
            "VTPackedPageTableUniform_0_0",
            "VTPackedPageTableUniform_0_1",
            "VTPackedUniform_0",
        ]);
        let page_tables = schema
            .members()
            .iter()
            .filter(|m| matches!(m.kind, MemberKind::PageTable { .. }))
            .count();
        assert_eq!(page_tables, 2);
        assert!(schema.member("VirtualTexturePhysical_4Sampler").is_some());

        let limited = LayoutConfig::new().with_max_virtual_texture_layers(4);
        assert!(build_schema(&set, &limited).is_err());
    }
}
