//! Uniform buffer filling.
//!
//! [`fill`] evaluates every member of a [`BufferSchema`] against a
//! [`RenderContext`] and writes the result into a byte buffer plus an
//! ordered resource table. A slot whose texture cannot be bound gets the
//! placeholder texture and sampler from [`GlobalResources`] and a one-time
//! warning; nothing here fails.

use crate::context::RenderContext;
use crate::expression::{Expression, ExpressionId};
use crate::layout::{BufferSchema, MemberKind};
use crate::set::{ParameterCollectionId, UniformExpressionSet};
use crate::texture::{
    GlobalResources, RhiSampler, RhiTexture, SamplerSource, TextureCategory, TextureHandle,
    TextureKind,
};
use crate::virtual_texture::AllocatedVirtualTexture;

/// One entry of the resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBinding {
    /// Texture slot.
    Texture(RhiTexture),
    /// Sampler slot.
    Sampler(RhiSampler),
}

impl ResourceBinding {
    fn raw(self) -> u64 {
        match self {
            Self::Texture(texture) => texture.0,
            Self::Sampler(sampler) => sampler.0,
        }
    }
}

/// Sampler baked into an external texture, for platforms that need
/// combined image samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImmutableSamplerEntry {
    /// Index into the set's external textures.
    pub external_index: usize,
    /// The bound texture.
    pub texture: RhiTexture,
    /// Its immutable sampler.
    pub sampler: RhiSampler,
}

/// A filled uniform buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformBufferContents {
    /// Buffer bytes, `schema.size()` long.
    pub bytes: Vec<u8>,
    /// Resource handles in member order.
    pub resources: Vec<ResourceBinding>,
    /// External textures bound together with an immutable sampler.
    pub immutable_samplers: Vec<ImmutableSamplerEntry>,
    /// Allocation of each virtual texture stack this fill.
    pub allocated_virtual_textures: Vec<Option<AllocatedVirtualTexture>>,
    /// Parameter collections the buffer depends on.
    pub parameter_collections: Vec<ParameterCollectionId>,
}

impl UniformBufferContents {
    /// Read a `float4` row written at `offset`.
    pub fn read_f32x4(&self, offset: u32) -> Option<[f32; 4]> {
        let start = offset as usize;
        let bytes = self.bytes.get(start..start + 16)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Read a `uint4` row written at `offset`.
    pub fn read_u32x4(&self, offset: u32) -> Option<[u32; 4]> {
        let start = offset as usize;
        let bytes = self.bytes.get(start..start + 16)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }
}

/// Fill a fresh buffer for `set`, laid out by `schema`.
pub fn fill(
    schema: &BufferSchema,
    set: &UniformExpressionSet,
    ctx: &RenderContext<'_>,
) -> UniformBufferContents {
    let mut out = UniformBufferContents::default();
    fill_into(schema, set, ctx, &mut out);
    out
}

/// Fill `out` in place, reusing its allocations.
///
/// `schema` must have been built from `set`.
///
/// # Panics
///
/// Panics if a streaming virtual texture expression is not owned by any
/// stack of `set`.
pub fn fill_into(
    schema: &BufferSchema,
    set: &UniformExpressionSet,
    ctx: &RenderContext<'_>,
    out: &mut UniformBufferContents,
) {
    crate::profile_function!();

    out.bytes.clear();
    out.bytes.resize(schema.size() as usize, 0);
    out.resources.clear();
    out.immutable_samplers.clear();
    out.parameter_collections.clear();
    out.parameter_collections
        .extend_from_slice(set.parameter_collections());

    let filler = Filler { set, ctx };
    out.allocated_virtual_textures = filler.allocate_virtual_textures();

    let bindings: [Vec<(RhiTexture, RhiSampler)>; TextureCategory::COUNT] =
        std::array::from_fn(|i| filler.bind_category(TextureCategory::ALL[i], out));
    let pointer_size = schema.config().pointer_size as usize;
    let globals = ctx.globals();

    for member in schema.members() {
        let offset = member.offset as usize;
        let row = match member.kind {
            MemberKind::PageTableUniform { stack, row } => {
                let packed = out.allocated_virtual_textures[stack]
                    .as_ref()
                    .map_or([0; 4], |vt| vt.page_table_uniforms[row]);
                Some(Row::U32(packed))
            }
            MemberKind::VirtualTextureUniform { index } => Some(Row::U32(
                filler.virtual_texture_uniform(index, &out.allocated_virtual_textures),
            )),
            MemberKind::Vector { index } => {
                let value = set.arena().evaluate(set.vectors()[index], ctx);
                Some(Row::F32([value.x, value.y, value.z, value.w]))
            }
            MemberKind::Scalars { first } => {
                let mut lanes = [0.0f32; 4];
                for (lane, id) in set.scalars().iter().skip(first).take(4).enumerate() {
                    lanes[lane] = set.arena().evaluate(*id, ctx).x;
                }
                Some(Row::F32(lanes))
            }
            _ => None,
        };
        if let Some(row) = row {
            let bytes = match &row {
                Row::F32(values) => bytemuck::bytes_of(values),
                Row::U32(values) => bytemuck::bytes_of(values),
            };
            out.bytes[offset..offset + 16].copy_from_slice(bytes);
            continue;
        }

        let binding = match member.kind {
            MemberKind::Texture { category, index } => {
                ResourceBinding::Texture(bindings[category.index()][index].0)
            }
            MemberKind::Sampler { category, index } => {
                ResourceBinding::Sampler(bindings[category.index()][index].1)
            }
            MemberKind::PageTable { stack, table } => ResourceBinding::Texture(
                out.allocated_virtual_textures[stack]
                    .as_ref()
                    .and_then(|vt| vt.page_table(table))
                    .unwrap_or(globals.black_page_table),
            ),
            MemberKind::WrapSampler => ResourceBinding::Sampler(globals.wrap_sampler),
            MemberKind::ClampSampler => ResourceBinding::Sampler(globals.clamp_sampler),
            _ => continue,
        };
        write_handle(&mut out.bytes[offset..offset + pointer_size], binding.raw());
        out.resources.push(binding);
    }
}

enum Row {
    F32([f32; 4]),
    U32([u32; 4]),
}

fn write_handle(slot: &mut [u8], raw: u64) {
    if slot.len() == 8 {
        slot.copy_from_slice(bytemuck::bytes_of(&raw));
    } else {
        slot.copy_from_slice(bytemuck::bytes_of(&(raw as u32)));
    }
}

struct Filler<'s, 'c> {
    set: &'s UniformExpressionSet,
    ctx: &'s RenderContext<'c>,
}

impl Filler<'_, '_> {
    fn material_name(&self) -> &str {
        self.ctx.material().name()
    }

    fn resolve(&self, id: ExpressionId) -> Option<TextureHandle> {
        self.set.arena().resolve_texture(id, self.ctx)
    }

    fn allocate_virtual_textures(&self) -> Vec<Option<AllocatedVirtualTexture>> {
        let vts = self.set.virtual_textures();
        self.set
            .stacks()
            .iter()
            .enumerate()
            .map(|(stack_index, stack)| {
                let layer_textures: Vec<Option<TextureHandle>> = (0..stack.num_layers())
                    .map(|layer| {
                        stack
                            .layer(layer)
                            .and_then(|vt| vts.get(vt as usize))
                            .and_then(|id| self.resolve(*id))
                    })
                    .collect();

                if let Some(texture_index) = stack.preallocated_texture_index() {
                    let texture = layer_textures
                        .iter()
                        .flatten()
                        .next()
                        .cloned()
                        .or_else(|| self.ctx.referenced_texture(texture_index));
                    return texture
                        .as_ref()
                        .and_then(|t| t.runtime_virtual())
                        .map(AllocatedVirtualTexture::from_runtime);
                }

                self.ctx
                    .virtual_textures()
                    .and_then(|provider| provider.allocate(stack_index, stack, &layer_textures))
            })
            .collect()
    }

    /// Packed uniform of virtual texture `index`: streaming first, then
    /// runtime, else zero.
    fn virtual_texture_uniform(
        &self,
        index: usize,
        allocated: &[Option<AllocatedVirtualTexture>],
    ) -> [u32; 4] {
        let Some(&id) = self.set.virtual_textures().get(index) else {
            return [0; 4];
        };
        let texture = self.resolve(id);

        if texture
            .as_ref()
            .is_some_and(|t| t.kind().contains(TextureKind::VIRTUAL))
        {
            let (stack, layer) = self.set.locate_virtual_texture(index);
            if let Some(layer) = allocated[stack].as_ref().and_then(|vt| vt.layer(layer)) {
                return layer.uniform;
            }
        }

        if let Expression::RuntimeVirtualTextureParameter(runtime) = self.set.arena().get(id) {
            let uniform = texture
                .as_ref()
                .and_then(|t| t.runtime_virtual())
                .and_then(|data| data.layer_uniforms.get(runtime.layer_index as usize));
            if let Some(uniform) = uniform {
                return *uniform;
            }
        }
        [0; 4]
    }

    fn bind_category(
        &self,
        category: TextureCategory,
        out: &mut UniformBufferContents,
    ) -> Vec<(RhiTexture, RhiSampler)> {
        self.set
            .textures(category)
            .iter()
            .enumerate()
            .map(|(index, id)| self.bind_slot(category, index, *id, out))
            .collect()
    }

    fn bind_slot(
        &self,
        category: TextureCategory,
        index: usize,
        id: ExpressionId,
        out: &mut UniformBufferContents,
    ) -> (RhiTexture, RhiSampler) {
        let globals = self.ctx.globals();
        let sampler_source = match self.set.arena().get(id) {
            Expression::TextureParameter(texture) => texture.sampler_source,
            _ => SamplerSource::FromTextureAsset,
        };
        let placeholder = |globals: &GlobalResources| {
            (
                globals.placeholder(category),
                globals.sampler_for(sampler_source, None),
            )
        };
        let slot = format!("{}_{index}", category.member_prefix());

        let Some(texture) = self.resolve(id) else {
            self.warn(
                &slot,
                "missing",
                format_args!(
                    "No texture for {slot} in material '{}', using placeholder",
                    self.material_name()
                ),
            );
            return placeholder(globals);
        };

        if !category.accepts(texture.kind()) {
            self.warn(
                &slot,
                "category",
                format_args!(
                    "Texture '{}' of kind {:?} bound to {slot} in material '{}', using placeholder",
                    texture.label(),
                    texture.kind(),
                    self.material_name()
                ),
            );
            return placeholder(globals);
        }

        let rhi = if category == TextureCategory::Virtual {
            self.physical_texture(index, id, &texture, out)
        } else {
            texture.rhi()
        };
        let Some(rhi) = rhi else {
            self.warn(
                &slot,
                "unbacked",
                format_args!(
                    "Texture '{}' for {slot} in material '{}' has no GPU resource, using placeholder",
                    texture.label(),
                    self.material_name()
                ),
            );
            return placeholder(globals);
        };

        let sampler = globals.sampler_for(sampler_source, Some(&*texture));
        if category == TextureCategory::External {
            if let Some(immutable) = texture.immutable_sampler() {
                out.immutable_samplers.push(ImmutableSamplerEntry {
                    external_index: index,
                    texture: rhi,
                    sampler: immutable,
                });
            }
        }
        (rhi, sampler)
    }

    fn physical_texture(
        &self,
        index: usize,
        id: ExpressionId,
        texture: &TextureHandle,
        out: &UniformBufferContents,
    ) -> Option<RhiTexture> {
        if texture.kind().contains(TextureKind::VIRTUAL) {
            let (stack, layer) = self.set.locate_virtual_texture(index);
            return out.allocated_virtual_textures[stack]
                .as_ref()
                .and_then(|vt| vt.layer(layer))
                .and_then(|layer| layer.physical);
        }
        match self.set.arena().get(id) {
            Expression::RuntimeVirtualTextureParameter(runtime) => texture
                .runtime_virtual()
                .and_then(|data| data.physical_textures.get(runtime.layer_index as usize))
                .copied(),
            _ => None,
        }
    }

    fn warn(&self, slot: &str, reason: &str, message: std::fmt::Arguments<'_>) {
        let key = format!("{}:{slot}:{reason}", self.material_name());
        self.ctx.diagnostics().warn_once(&key, message);
    }
}
