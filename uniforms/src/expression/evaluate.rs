//! The expression evaluator.

use crate::context::RenderContext;
use crate::math::{
    LinearColor, dot, frac, fractional, map_lanes, round_half_up, safe_divisor, sign, splat,
    to_vec3, zip_lanes,
};
use crate::parameter::{ParameterKind, ParameterValue};
use crate::texture::TextureHandle;

use super::{
    Expression, ExpressionArena, ExpressionId, FoldedMathOp, LogBase, RoundingOp, TextureProperty,
    TrigOp,
};

impl ExpressionArena {
    /// Evaluate a numeric expression to four lanes.
    ///
    /// Never fails. Texture nodes evaluate to zero; use
    /// [`resolve_texture`](Self::resolve_texture) for them.
    pub fn evaluate(&self, id: ExpressionId, ctx: &RenderContext<'_>) -> LinearColor {
        match self.get(id) {
            Expression::Constant { value, .. } => *value,
            Expression::ScalarParameter { info, default } => splat(
                ctx.lookup_parameter(info, ParameterKind::Scalar)
                    .as_ref()
                    .and_then(ParameterValue::as_scalar)
                    .unwrap_or(*default),
            ),
            Expression::VectorParameter { info, default } => ctx
                .lookup_parameter(info, ParameterKind::Vector)
                .as_ref()
                .and_then(ParameterValue::as_vector)
                .unwrap_or(*default),
            Expression::TextureParameter(_)
            | Expression::ExternalTextureParameter(_)
            | Expression::RuntimeVirtualTextureParameter(_) => LinearColor::zeros(),
            Expression::FoldedMath {
                op,
                a,
                b,
                value_type,
            } => {
                let va = self.evaluate(*a, ctx);
                let vb = self.evaluate(*b, ctx);
                match op {
                    FoldedMathOp::Add => va + vb,
                    FoldedMathOp::Sub => va - vb,
                    FoldedMathOp::Mul => va.component_mul(&vb),
                    FoldedMathOp::Div => zip_lanes(&va, &vb, |x, y| x / safe_divisor(y)),
                    FoldedMathOp::Dot => splat(dot(&va, &vb, *value_type)),
                    FoldedMathOp::Cross => {
                        let c = to_vec3(&va, self.value_type(*a))
                            .cross(&to_vec3(&vb, self.value_type(*b)));
                        LinearColor::new(c.x, c.y, c.z, 0.0)
                    }
                }
            }
            Expression::Trig { op, a, b } => {
                let va = self.evaluate(*a, ctx);
                match op {
                    TrigOp::Sin => map_lanes(&va, f32::sin),
                    TrigOp::Cos => map_lanes(&va, f32::cos),
                    TrigOp::Tan => map_lanes(&va, f32::tan),
                    TrigOp::Asin => map_lanes(&va, f32::asin),
                    TrigOp::Acos => map_lanes(&va, f32::acos),
                    TrigOp::Atan => map_lanes(&va, f32::atan),
                    TrigOp::Atan2 => {
                        let vb = b.map_or_else(LinearColor::zeros, |b| self.evaluate(b, ctx));
                        zip_lanes(&va, &vb, f32::atan2)
                    }
                }
            }
            Expression::Min { a, b } => {
                zip_lanes(&self.evaluate(*a, ctx), &self.evaluate(*b, ctx), f32::min)
            }
            Expression::Max { a, b } => {
                zip_lanes(&self.evaluate(*a, ctx), &self.evaluate(*b, ctx), f32::max)
            }
            Expression::Clamp { input, min, max } => {
                let lo = self.evaluate(*min, ctx);
                let hi = self.evaluate(*max, ctx);
                let mut out = self.evaluate(*input, ctx);
                for i in 0..4 {
                    out[i] = clamp(out[i], lo[i], hi[i]);
                }
                out
            }
            Expression::Saturate { input } => {
                map_lanes(&self.evaluate(*input, ctx), |x| clamp(x, 0.0, 1.0))
            }
            Expression::Rounding { op, input } => {
                let v = self.evaluate(*input, ctx);
                match op {
                    RoundingOp::Floor => map_lanes(&v, f32::floor),
                    RoundingOp::Ceil => map_lanes(&v, f32::ceil),
                    RoundingOp::Round => map_lanes(&v, round_half_up),
                    RoundingOp::Truncate => map_lanes(&v, f32::trunc),
                    RoundingOp::Frac => map_lanes(&v, frac),
                    RoundingOp::Sign => map_lanes(&v, sign),
                    RoundingOp::Abs => map_lanes(&v, f32::abs),
                }
            }
            Expression::Fmod { a, b } => {
                zip_lanes(&self.evaluate(*a, ctx), &self.evaluate(*b, ctx), |x, y| x % y)
            }
            Expression::ComponentSwizzle {
                input,
                indices,
                count,
            } => {
                let v = self.evaluate(*input, ctx);
                if *count == 1 {
                    return splat(v[indices[0] as usize]);
                }
                let mut out = LinearColor::zeros();
                for lane in 0..*count as usize {
                    out[lane] = v[indices[lane] as usize];
                }
                out
            }
            Expression::AppendVector { a, b, a_lanes } => {
                let va = self.evaluate(*a, ctx);
                let vb = self.evaluate(*b, ctx);
                let split = *a_lanes as usize;
                let total = (split + self.value_type(*b).lanes()).min(4);
                let mut out = LinearColor::zeros();
                for lane in 0..total {
                    out[lane] = if lane < split { va[lane] } else { vb[lane - split] };
                }
                out
            }
            Expression::SquareRoot { input } => map_lanes(&self.evaluate(*input, ctx), f32::sqrt),
            Expression::Length { input, value_type } => {
                let v = self.evaluate(*input, ctx);
                splat(dot(&v, &v, *value_type).sqrt())
            }
            Expression::Logarithm { base, input } => {
                let v = self.evaluate(*input, ctx);
                match base {
                    LogBase::Two => map_lanes(&v, f32::log2),
                    LogBase::Ten => map_lanes(&v, f32::log10),
                }
            }
            Expression::Periodic { input } => map_lanes(&self.evaluate(*input, ctx), fractional),
            Expression::TextureProperty { texture, property } => {
                let (width, height) = self
                    .resolve_texture(*texture, ctx)
                    .map(|t| (t.width().max(1) as f32, t.height().max(1) as f32))
                    .unwrap_or((1.0, 1.0));
                match property {
                    TextureProperty::Size => LinearColor::new(width, height, 0.0, 0.0),
                    TextureProperty::TexelSize => {
                        LinearColor::new(1.0 / width, 1.0 / height, 0.0, 0.0)
                    }
                }
            }
        }
    }

    /// Resolve the texture a texture expression refers to.
    ///
    /// `None` means "no texture": an explicit empty override, an empty
    /// default slot or an unknown index. Numeric nodes always return `None`.
    pub fn resolve_texture(
        &self,
        id: ExpressionId,
        ctx: &RenderContext<'_>,
    ) -> Option<TextureHandle> {
        match self.get(id) {
            Expression::TextureParameter(texture) => {
                if let Some(info) = &texture.parameter {
                    if let Some(value) = ctx.lookup_parameter(info, ParameterKind::Texture) {
                        return value.as_texture().flatten().cloned();
                    }
                }
                ctx.referenced_texture(texture.texture_index)
            }
            Expression::ExternalTextureParameter(external) => {
                let source = match &external.parameter {
                    Some(info) => ctx
                        .lookup_parameter(info, ParameterKind::Texture)
                        .and_then(|value| value.as_texture().flatten().cloned()),
                    None => None,
                }
                .or_else(|| {
                    external
                        .source_texture_index
                        .and_then(|index| ctx.referenced_texture(index))
                });

                let external_id = source
                    .as_ref()
                    .and_then(|texture| texture.external_id())
                    .or(external.external_id);
                let registered = external_id.and_then(|id| {
                    ctx.external_textures()
                        .and_then(|registry| registry.get(id))
                });
                registered.or(source)
            }
            Expression::RuntimeVirtualTextureParameter(runtime) => {
                if let Some(info) = &runtime.parameter {
                    if let Some(value) =
                        ctx.lookup_parameter(info, ParameterKind::RuntimeVirtualTexture)
                    {
                        return value.as_texture().flatten().cloned();
                    }
                }
                ctx.referenced_texture(runtime.texture_index)
            }
            _ => None,
        }
    }
}

/// Clamp without the `min <= max` precondition of [`f32::clamp`].
fn clamp(x: f32, lo: f32, hi: f32) -> f32 {
    if x < lo {
        lo
    } else if x < hi {
        x
    } else {
        hi
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::config::LayoutConfig;
    use crate::context::{CompiledMaterial, Diagnostics};
    use crate::expression::TextureExpression;
    use crate::math::{DELTA, ValueType};
    use crate::parameter::{ParameterInfo, ParameterTable};
    use crate::proxy::InstanceRenderProxy;
    use crate::set::UniformExpressionSetBuilder;
    use crate::texture::{GlobalResources, RhiTexture, TextureResource};

    fn material(textures: Vec<Option<TextureHandle>>) -> Arc<CompiledMaterial> {
        let set = UniformExpressionSetBuilder::new().build().unwrap();
        Arc::new(CompiledMaterial::new("test", set, textures, &LayoutConfig::default()).unwrap())
    }

    fn eval(arena: &ExpressionArena, id: ExpressionId) -> LinearColor {
        let compiled = material(Vec::new());
        let diagnostics = Diagnostics::new();
        let globals = GlobalResources::default();
        arena.evaluate(id, &RenderContext::new(&compiled, &diagnostics, &globals))
    }

    fn v4(x: f32, y: f32, z: f32, w: f32) -> LinearColor {
        LinearColor::new(x, y, z, w)
    }

    #[test]
    fn test_div_by_zero_uses_delta() {
        let mut arena = ExpressionArena::new();
        let one = arena.constant_scalar(1.0);
        let zero = arena.constant_scalar(0.0);
        let div = arena.div(one, zero).unwrap();
        let result = eval(&arena, div);
        assert_eq!(result.x, 1.0 / DELTA);
        assert!(result.iter().all(|lane| lane.is_finite()));
    }

    #[test]
    fn test_div_by_negative_tiny_keeps_sign() {
        let mut arena = ExpressionArena::new();
        let one = arena.constant_scalar(1.0);
        let tiny = arena.constant_scalar(-0.000001);
        let div = arena.div(one, tiny).unwrap();
        assert_eq!(eval(&arena, div).x, -1.0 / DELTA);
    }

    #[test]
    fn test_swizzle_single_lane_broadcasts() {
        let mut arena = ExpressionArena::new();
        let v = arena.constant(v4(1.0, 2.0, 3.0, 0.0), ValueType::Float3);
        let z = arena.swizzle(v, &[2]).unwrap();
        assert_eq!(eval(&arena, z), v4(3.0, 3.0, 3.0, 3.0));
    }

    #[test]
    fn test_swizzle_multi_lane_zero_fills() {
        let mut arena = ExpressionArena::new();
        let v = arena.constant(v4(1.0, 2.0, 3.0, 4.0), ValueType::Float4);
        let zy = arena.swizzle(v, &[2, 1]).unwrap();
        assert_eq!(eval(&arena, zy), v4(3.0, 2.0, 0.0, 0.0));
    }

    #[rstest]
    #[case::scalar_broadcast(
        v4(2.0, 2.0, 2.0, 2.0), ValueType::Float1,
        v4(1.0, 0.0, 0.0, 0.0), ValueType::Float3,
        v4(0.0, 2.0, -2.0, 0.0)
    )]
    #[case::two_lane_padded(
        v4(1.0, 0.0, 9.0, 9.0), ValueType::Float2,
        v4(0.0, 1.0, 9.0, 9.0), ValueType::Float2,
        v4(0.0, 0.0, 1.0, 0.0)
    )]
    #[case::three_lane(
        v4(0.0, 1.0, 0.0, 0.0), ValueType::Float3,
        v4(0.0, 0.0, 1.0, 0.0), ValueType::Float3,
        v4(1.0, 0.0, 0.0, 0.0)
    )]
    fn test_cross_coercion(
        #[case] a: LinearColor,
        #[case] a_type: ValueType,
        #[case] b: LinearColor,
        #[case] b_type: ValueType,
        #[case] expected: LinearColor,
    ) {
        let mut arena = ExpressionArena::new();
        let a = arena.constant(a, a_type);
        let b = arena.constant(b, b_type);
        let cross = arena.cross(a, b).unwrap();
        assert_eq!(eval(&arena, cross), expected);
    }

    #[test]
    fn test_dot_and_length_broadcast() {
        let mut arena = ExpressionArena::new();
        let v = arena.constant(v4(3.0, 4.0, 100.0, 100.0), ValueType::Float2);
        let dot = arena.dot(v, v).unwrap();
        let len = arena.length(v).unwrap();
        assert_eq!(eval(&arena, dot), splat(25.0));
        assert_eq!(eval(&arena, len), splat(5.0));
    }

    #[rstest]
    #[case::floor(RoundingOp::Floor, -1.5, -2.0)]
    #[case::ceil(RoundingOp::Ceil, -1.5, -1.0)]
    #[case::round_half_up(RoundingOp::Round, -1.5, -1.0)]
    #[case::round_up(RoundingOp::Round, 2.5, 3.0)]
    #[case::truncate(RoundingOp::Truncate, -1.5, -1.0)]
    #[case::frac(RoundingOp::Frac, -1.25, 0.75)]
    #[case::sign_zero(RoundingOp::Sign, 0.0, 0.0)]
    #[case::sign_negative(RoundingOp::Sign, -3.0, -1.0)]
    #[case::abs(RoundingOp::Abs, -3.0, 3.0)]
    fn test_rounding(#[case] op: RoundingOp, #[case] input: f32, #[case] expected: f32) {
        let mut arena = ExpressionArena::new();
        let x = arena.constant_scalar(input);
        let r = arena.rounding(op, x).unwrap();
        assert_eq!(eval(&arena, r), splat(expected));
    }

    #[test]
    fn test_periodic_keeps_sign() {
        let mut arena = ExpressionArena::new();
        let x = arena.constant_scalar(-1.25);
        let p = arena.periodic(x).unwrap();
        assert_eq!(eval(&arena, p), splat(-0.25));
    }

    #[test]
    fn test_clamp_min_max_saturate() {
        let mut arena = ExpressionArena::new();
        let x = arena.constant(v4(-1.0, 0.5, 2.0, 0.0), ValueType::Float3);
        let lo = arena.constant_scalar(0.0);
        let hi = arena.constant_scalar(1.0);
        let clamped = arena.clamp(x, lo, hi).unwrap();
        let saturated = arena.saturate(x).unwrap();
        let min = arena.min(x, hi).unwrap();
        let max = arena.max(x, lo).unwrap();
        assert_eq!(eval(&arena, clamped), v4(0.0, 0.5, 1.0, 0.0));
        assert_eq!(eval(&arena, saturated), v4(0.0, 0.5, 1.0, 0.0));
        assert_eq!(eval(&arena, min), v4(-1.0, 0.5, 1.0, 0.0));
        assert_eq!(eval(&arena, max), v4(0.0, 0.5, 2.0, 0.0));
    }

    #[test]
    fn test_append() {
        let mut arena = ExpressionArena::new();
        let xy = arena.constant(v4(1.0, 2.0, 0.0, 0.0), ValueType::Float2);
        let z = arena.constant_scalar(3.0);
        let xyz = arena.append(xy, z).unwrap();
        assert_eq!(eval(&arena, xyz), v4(1.0, 2.0, 3.0, 0.0));
    }

    #[test]
    fn test_unguarded_domains() {
        let mut arena = ExpressionArena::new();
        let zero = arena.constant_scalar(0.0);
        let two = arena.constant_scalar(2.0);
        let log = arena.log2(zero).unwrap();
        let asin = arena.trig(TrigOp::Asin, two).unwrap();
        let fmod = arena.fmod(two, zero).unwrap();
        let sqrt = arena.square_root(two).unwrap();
        let log10 = arena.log10(two).unwrap();

        assert_eq!(eval(&arena, log).x, f32::NEG_INFINITY);
        assert!(eval(&arena, asin).x.is_nan());
        assert!(eval(&arena, fmod).x.is_nan());
        assert_eq!(eval(&arena, sqrt).x, 2.0f32.sqrt());
        assert_eq!(eval(&arena, log10).x, 2.0f32.log10());
    }

    #[test]
    fn test_atan2() {
        let mut arena = ExpressionArena::new();
        let y = arena.constant_scalar(1.0);
        let x = arena.constant_scalar(0.0);
        let angle = arena.atan2(y, x).unwrap();
        assert_eq!(eval(&arena, angle).x, std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn test_parameter_default_and_proxy_override() {
        let mut arena = ExpressionArena::new();
        let gloss = arena.scalar_parameter(ParameterInfo::global("Gloss"), 0.25);
        let compiled = material(Vec::new());
        let diagnostics = Diagnostics::new();
        let globals = GlobalResources::default();

        let ctx = RenderContext::new(&compiled, &diagnostics, &globals);
        assert_eq!(arena.evaluate(gloss, &ctx), splat(0.25));

        let proxy = InstanceRenderProxy::new("inst", None);
        proxy.set_parameter(ParameterInfo::global("Gloss"), ParameterValue::Scalar(0.75));
        proxy.publish();
        let ctx = ctx.with_proxy(&proxy);
        assert_eq!(arena.evaluate(gloss, &ctx), splat(0.75));
    }

    #[test]
    fn test_hierarchy_used_only_without_proxy() {
        use crate::hierarchy::MaterialHierarchy;

        let mut arena = ExpressionArena::new();
        let tint = arena.vector_parameter(ParameterInfo::global("Tint"), LinearColor::zeros());
        let mut hierarchy = MaterialHierarchy::new();
        let base = hierarchy.add_base(
            "M",
            ParameterTable::new().with(
                ParameterInfo::global("Tint"),
                ParameterValue::Vector(v4(1.0, 0.0, 0.0, 1.0)),
            ),
        );
        let compiled = material(Vec::new());
        let diagnostics = Diagnostics::new();
        let globals = GlobalResources::default();
        let ctx = RenderContext::new(&compiled, &diagnostics, &globals)
            .with_hierarchy(&hierarchy, base);
        assert_eq!(arena.evaluate(tint, &ctx), v4(1.0, 0.0, 0.0, 1.0));

        let proxy = InstanceRenderProxy::new("empty", None);
        let ctx = ctx.with_proxy(&proxy);
        assert_eq!(arena.evaluate(tint, &ctx), LinearColor::zeros());
    }

    #[test]
    fn test_texture_property() {
        let texture = TextureResource::texture_2d("albedo", 256, 128, RhiTexture(1)).into_handle();
        let compiled = material(vec![Some(texture)]);
        let diagnostics = Diagnostics::new();
        let globals = GlobalResources::default();
        let ctx = RenderContext::new(&compiled, &diagnostics, &globals);

        let mut arena = ExpressionArena::new();
        let tex = arena.texture(TextureExpression::new(0));
        let missing = arena.texture(TextureExpression::new(4));
        let size = arena.texture_property(tex, TextureProperty::Size).unwrap();
        let texel = arena.texture_property(tex, TextureProperty::TexelSize).unwrap();
        let fallback = arena.texture_property(missing, TextureProperty::Size).unwrap();

        assert_eq!(arena.evaluate(size, &ctx), v4(256.0, 128.0, 0.0, 0.0));
        assert_eq!(arena.evaluate(texel, &ctx), v4(1.0 / 256.0, 1.0 / 128.0, 0.0, 0.0));
        assert_eq!(arena.evaluate(fallback, &ctx), v4(1.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_texture_override_with_null_resolves_to_none() {
        let texture = TextureResource::texture_2d("albedo", 4, 4, RhiTexture(1)).into_handle();
        let compiled = material(vec![Some(texture)]);
        let diagnostics = Diagnostics::new();
        let globals = GlobalResources::default();

        let mut hierarchy = crate::hierarchy::MaterialHierarchy::new();
        let base = hierarchy.add_base(
            "M",
            ParameterTable::new()
                .with(ParameterInfo::global("Albedo"), ParameterValue::Texture(None)),
        );
        let ctx = RenderContext::new(&compiled, &diagnostics, &globals)
            .with_hierarchy(&hierarchy, base);

        let mut arena = ExpressionArena::new();
        let param = arena.texture(TextureExpression::parameter(ParameterInfo::global("Albedo"), 0));
        let other = arena.texture(TextureExpression::parameter(ParameterInfo::global("Other"), 0));
        assert!(arena.resolve_texture(param, &ctx).is_none());
        assert!(arena.resolve_texture(other, &ctx).is_some());
    }
}
