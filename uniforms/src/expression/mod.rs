//! Uniform expression trees.
//!
//! Expressions live in an [`ExpressionArena`] and reference their children by
//! [`ExpressionId`]. Nodes are only ever appended and a node may only point at
//! nodes that already exist, so every tree is built bottom-up and cycles are
//! impossible by construction.
//!
//! The node kinds form a closed set ([`Expression`]). Evaluation is a single
//! `match` in [`evaluate`](ExpressionArena::evaluate); structural identity
//! ([`ExpressionArena::is_identical`]) compares kinds, payloads and children
//! recursively, which is what lets two compiled material variants share one
//! shader permutation.

mod evaluate;
mod registry;

pub use registry::{ExpressionKind, ExpressionRegistry};

use crate::error::UniformError;
use crate::math::{LinearColor, ValueType};
use crate::parameter::ParameterInfo;
use crate::texture::SamplerSource;

/// Stable index of a node inside an [`ExpressionArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpressionId(u32);

impl ExpressionId {
    /// Position of the node in its arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary arithmetic kept at runtime because it could not be folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FoldedMathOp {
    /// `a + b` per lane.
    Add,
    /// `a - b` per lane.
    Sub,
    /// `a * b` per lane.
    Mul,
    /// `a / b` per lane, with a guarded divisor.
    Div,
    /// Dot product over the node's meaningful lanes, broadcast.
    Dot,
    /// 3-lane cross product.
    Cross,
}

/// Trigonometric functions. Applied per lane, no domain guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrigOp {
    /// Sine.
    Sin,
    /// Cosine.
    Cos,
    /// Tangent.
    Tan,
    /// Arc sine.
    Asin,
    /// Arc cosine.
    Acos,
    /// Arc tangent.
    Atan,
    /// Two-argument arc tangent `atan2(a, b)`.
    Atan2,
}

/// Per-lane rounding and sign operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingOp {
    /// Round toward negative infinity.
    Floor,
    /// Round toward positive infinity.
    Ceil,
    /// Round half up.
    Round,
    /// Round toward zero.
    Truncate,
    /// `x - floor(x)`.
    Frac,
    /// `-1`, `0` or `1`.
    Sign,
    /// Absolute value.
    Abs,
}

/// Logarithm base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogBase {
    /// `log2`.
    Two,
    /// `log10`.
    Ten,
}

/// Texture property read by a [`Expression::TextureProperty`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureProperty {
    /// `(width, height)`.
    Size,
    /// `(1 / width, 1 / height)`.
    TexelSize,
}

/// A 2D/cube/volume/virtual texture reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureExpression {
    /// Parameter name when the texture can be overridden by instances.
    pub parameter: Option<ParameterInfo>,
    /// Index into the compiled material's referenced textures (the default).
    pub texture_index: u32,
    /// Sampler bound next to the texture.
    pub sampler_source: SamplerSource,
}

impl TextureExpression {
    /// A fixed texture reference.
    pub fn new(texture_index: u32) -> Self {
        Self {
            parameter: None,
            texture_index,
            sampler_source: SamplerSource::FromTextureAsset,
        }
    }

    /// An overridable texture parameter with a default texture.
    pub fn parameter(info: ParameterInfo, texture_index: u32) -> Self {
        Self {
            parameter: Some(info),
            texture_index,
            sampler_source: SamplerSource::FromTextureAsset,
        }
    }

    /// Set the sampler source.
    pub fn with_sampler_source(mut self, source: SamplerSource) -> Self {
        self.sampler_source = source;
        self
    }
}

/// An external texture reference (video, camera).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalTextureExpression {
    /// Parameter name when overridable.
    pub parameter: Option<ParameterInfo>,
    /// Referenced texture that owns the external id, if any.
    pub source_texture_index: Option<u32>,
    /// External texture registry id used when there is no source texture.
    pub external_id: Option<u128>,
}

/// A runtime virtual texture layer reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeVirtualTextureExpression {
    /// Parameter name when overridable.
    pub parameter: Option<ParameterInfo>,
    /// Index into the compiled material's referenced textures.
    pub texture_index: u32,
    /// Layer of the runtime virtual texture this expression samples.
    pub layer_index: u32,
}

/// One node of a uniform expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value.
    Constant {
        /// The value.
        value: LinearColor,
        /// Meaningful lanes.
        value_type: ValueType,
    },
    /// Named scalar, broadcast into all lanes.
    ScalarParameter {
        /// Parameter identity.
        info: ParameterInfo,
        /// Compiled-in default.
        default: f32,
    },
    /// Named vector.
    VectorParameter {
        /// Parameter identity.
        info: ParameterInfo,
        /// Compiled-in default.
        default: LinearColor,
    },
    /// Texture reference.
    TextureParameter(TextureExpression),
    /// External texture reference.
    ExternalTextureParameter(ExternalTextureExpression),
    /// Runtime virtual texture reference.
    RuntimeVirtualTextureParameter(RuntimeVirtualTextureExpression),
    /// Binary arithmetic.
    FoldedMath {
        /// Operation.
        op: FoldedMathOp,
        /// Left operand.
        a: ExpressionId,
        /// Right operand.
        b: ExpressionId,
        /// Meaningful operand lanes.
        value_type: ValueType,
    },
    /// Trigonometry. `b` is only used by [`TrigOp::Atan2`].
    Trig {
        /// Operation.
        op: TrigOp,
        /// First operand.
        a: ExpressionId,
        /// Second operand.
        b: Option<ExpressionId>,
    },
    /// Per-lane minimum.
    Min {
        /// Left operand.
        a: ExpressionId,
        /// Right operand.
        b: ExpressionId,
    },
    /// Per-lane maximum.
    Max {
        /// Left operand.
        a: ExpressionId,
        /// Right operand.
        b: ExpressionId,
    },
    /// Per-lane clamp.
    Clamp {
        /// Value.
        input: ExpressionId,
        /// Lower bound.
        min: ExpressionId,
        /// Upper bound.
        max: ExpressionId,
    },
    /// Clamp to `[0, 1]`.
    Saturate {
        /// Value.
        input: ExpressionId,
    },
    /// Rounding and sign.
    Rounding {
        /// Operation.
        op: RoundingOp,
        /// Value.
        input: ExpressionId,
    },
    /// Per-lane floating point remainder.
    Fmod {
        /// Dividend.
        a: ExpressionId,
        /// Divisor.
        b: ExpressionId,
    },
    /// Lane selection.
    ComponentSwizzle {
        /// Source.
        input: ExpressionId,
        /// Source lane per output lane. Only the first `count` are used.
        indices: [u8; 4],
        /// Number of selected lanes (1..=4).
        count: u8,
    },
    /// Concatenate the lanes of `a` and `b`.
    AppendVector {
        /// Leading lanes.
        a: ExpressionId,
        /// Trailing lanes.
        b: ExpressionId,
        /// Number of lanes taken from `a`.
        a_lanes: u8,
    },
    /// Per-lane square root.
    SquareRoot {
        /// Value.
        input: ExpressionId,
    },
    /// Vector length over the meaningful lanes, broadcast.
    Length {
        /// Value.
        input: ExpressionId,
        /// Meaningful lanes of `input`.
        value_type: ValueType,
    },
    /// Per-lane logarithm.
    Logarithm {
        /// Base.
        base: LogBase,
        /// Value.
        input: ExpressionId,
    },
    /// Per-lane `x - trunc(x)`.
    Periodic {
        /// Value.
        input: ExpressionId,
    },
    /// Size of a resolved texture.
    TextureProperty {
        /// Texture expression.
        texture: ExpressionId,
        /// Which property.
        property: TextureProperty,
    },
}

impl Expression {
    /// Child ids, in operand order.
    pub fn children(&self) -> impl Iterator<Item = ExpressionId> {
        let slots: [Option<ExpressionId>; 3] = match *self {
            Self::Constant { .. }
            | Self::ScalarParameter { .. }
            | Self::VectorParameter { .. }
            | Self::TextureParameter(_)
            | Self::ExternalTextureParameter(_)
            | Self::RuntimeVirtualTextureParameter(_) => [None, None, None],
            Self::FoldedMath { a, b, .. }
            | Self::Min { a, b }
            | Self::Max { a, b }
            | Self::Fmod { a, b }
            | Self::AppendVector { a, b, .. } => [Some(a), Some(b), None],
            Self::Trig { a, b, .. } => [Some(a), b, None],
            Self::Clamp { input, min, max } => [Some(input), Some(min), Some(max)],
            Self::Saturate { input }
            | Self::Rounding { input, .. }
            | Self::ComponentSwizzle { input, .. }
            | Self::SquareRoot { input }
            | Self::Length { input, .. }
            | Self::Logarithm { input, .. }
            | Self::Periodic { input } => [Some(input), None, None],
            Self::TextureProperty { texture, .. } => [Some(texture), None, None],
        };
        slots.into_iter().flatten()
    }

    /// Whether this node references a texture rather than producing numbers.
    pub fn is_texture(&self) -> bool {
        matches!(
            self,
            Self::TextureParameter(_)
                | Self::ExternalTextureParameter(_)
                | Self::RuntimeVirtualTextureParameter(_)
        )
    }

    /// Node kind tag.
    pub fn kind(&self) -> ExpressionKind {
        match self {
            Self::Constant { .. } => ExpressionKind::Constant,
            Self::ScalarParameter { .. } => ExpressionKind::ScalarParameter,
            Self::VectorParameter { .. } => ExpressionKind::VectorParameter,
            Self::TextureParameter(_) => ExpressionKind::TextureParameter,
            Self::ExternalTextureParameter(_) => ExpressionKind::ExternalTextureParameter,
            Self::RuntimeVirtualTextureParameter(_) => {
                ExpressionKind::RuntimeVirtualTextureParameter
            }
            Self::FoldedMath { .. } => ExpressionKind::FoldedMath,
            Self::Trig { .. } => ExpressionKind::Trig,
            Self::Min { .. } => ExpressionKind::Min,
            Self::Max { .. } => ExpressionKind::Max,
            Self::Clamp { .. } => ExpressionKind::Clamp,
            Self::Saturate { .. } => ExpressionKind::Saturate,
            Self::Rounding { .. } => ExpressionKind::Rounding,
            Self::Fmod { .. } => ExpressionKind::Fmod,
            Self::ComponentSwizzle { .. } => ExpressionKind::ComponentSwizzle,
            Self::AppendVector { .. } => ExpressionKind::AppendVector,
            Self::SquareRoot { .. } => ExpressionKind::SquareRoot,
            Self::Length { .. } => ExpressionKind::Length,
            Self::Logarithm { .. } => ExpressionKind::Logarithm,
            Self::Periodic { .. } => ExpressionKind::Periodic,
            Self::TextureProperty { .. } => ExpressionKind::TextureProperty,
        }
    }

    /// Compare everything except children.
    fn same_payload(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Constant {
                    value: va,
                    value_type: ta,
                },
                Self::Constant {
                    value: vb,
                    value_type: tb,
                },
            ) => va == vb && ta == tb,
            (
                Self::ScalarParameter {
                    info: ia,
                    default: da,
                },
                Self::ScalarParameter {
                    info: ib,
                    default: db,
                },
            ) => ia == ib && da == db,
            (
                Self::VectorParameter {
                    info: ia,
                    default: da,
                },
                Self::VectorParameter {
                    info: ib,
                    default: db,
                },
            ) => ia == ib && da == db,
            (Self::TextureParameter(a), Self::TextureParameter(b)) => a == b,
            (Self::ExternalTextureParameter(a), Self::ExternalTextureParameter(b)) => a == b,
            (Self::RuntimeVirtualTextureParameter(a), Self::RuntimeVirtualTextureParameter(b)) => {
                a == b
            }
            (
                Self::FoldedMath {
                    op: oa,
                    value_type: ta,
                    ..
                },
                Self::FoldedMath {
                    op: ob,
                    value_type: tb,
                    ..
                },
            ) => oa == ob && ta == tb,
            (Self::Trig { op: oa, b: ba, .. }, Self::Trig { op: ob, b: bb, .. }) => {
                oa == ob && ba.is_some() == bb.is_some()
            }
            (Self::Rounding { op: oa, .. }, Self::Rounding { op: ob, .. }) => oa == ob,
            (
                Self::ComponentSwizzle {
                    indices: ia,
                    count: ca,
                    ..
                },
                Self::ComponentSwizzle {
                    indices: ib,
                    count: cb,
                    ..
                },
            ) => ca == cb && ia[..*ca as usize] == ib[..*cb as usize],
            (Self::AppendVector { a_lanes: la, .. }, Self::AppendVector { a_lanes: lb, .. }) => {
                la == lb
            }
            (Self::Length { value_type: ta, .. }, Self::Length { value_type: tb, .. }) => ta == tb,
            (Self::Logarithm { base: ba, .. }, Self::Logarithm { base: bb, .. }) => ba == bb,
            (
                Self::TextureProperty { property: pa, .. },
                Self::TextureProperty { property: pb, .. },
            ) => pa == pb,
            (Self::Min { .. }, Self::Min { .. })
            | (Self::Max { .. }, Self::Max { .. })
            | (Self::Clamp { .. }, Self::Clamp { .. })
            | (Self::Saturate { .. }, Self::Saturate { .. })
            | (Self::Fmod { .. }, Self::Fmod { .. })
            | (Self::SquareRoot { .. }, Self::SquareRoot { .. })
            | (Self::Periodic { .. }, Self::Periodic { .. }) => true,
            _ => false,
        }
    }
}

/// Append-only storage for the nodes of one compiled material variant.
#[derive(Debug, Clone, Default)]
pub struct ExpressionArena {
    nodes: Vec<Expression>,
}

impl ExpressionArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a different, smaller arena.
    pub fn get(&self, id: ExpressionId) -> &Expression {
        &self.nodes[id.index()]
    }

    /// Iterate over `(id, node)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ExpressionId, &Expression)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (ExpressionId(i as u32), node))
    }

    /// Append a node after checking its children and payload.
    pub fn push(&mut self, expression: Expression) -> Result<ExpressionId, UniformError> {
        if let Some(child) = expression.children().find(|c| c.index() >= self.nodes.len()) {
            return Err(UniformError::InvalidExpression(format!(
                "{:?} references node {} which does not exist yet",
                expression.kind(),
                child.index()
            )));
        }

        match &expression {
            Expression::ComponentSwizzle { indices, count, .. } => {
                if !(1..=4).contains(count) {
                    return Err(UniformError::InvalidExpression(format!(
                        "swizzle selects {count} lanes, expected 1..=4"
                    )));
                }
                if let Some(bad) = indices[..*count as usize].iter().find(|&&i| i > 3) {
                    return Err(UniformError::InvalidExpression(format!(
                        "swizzle lane index {bad} out of range 0..=3"
                    )));
                }
            }
            Expression::AppendVector { a_lanes, .. } if !(1..=4).contains(a_lanes) => {
                return Err(UniformError::InvalidExpression(format!(
                    "append takes {a_lanes} leading lanes, expected 1..=4"
                )));
            }
            Expression::Trig { op, b, .. } if (*op == TrigOp::Atan2) != b.is_some() => {
                return Err(UniformError::InvalidExpression(format!(
                    "{op:?} has the wrong number of operands"
                )));
            }
            _ => {}
        }

        let id = u32::try_from(self.nodes.len())
            .map_err(|_| UniformError::InvalidExpression("arena is full".to_string()))?;
        self.nodes.push(expression);
        Ok(ExpressionId(id))
    }

    fn push_leaf(&mut self, expression: Expression) -> ExpressionId {
        let id = ExpressionId(self.nodes.len() as u32);
        self.nodes.push(expression);
        id
    }

    // ----- Leaves -----

    /// Literal value.
    pub fn constant(&mut self, value: LinearColor, value_type: ValueType) -> ExpressionId {
        self.push_leaf(Expression::Constant { value, value_type })
    }

    /// Literal scalar.
    pub fn constant_scalar(&mut self, value: f32) -> ExpressionId {
        self.constant(
            LinearColor::new(value, value, value, value),
            ValueType::Float1,
        )
    }

    /// Named scalar with a default.
    pub fn scalar_parameter(&mut self, info: ParameterInfo, default: f32) -> ExpressionId {
        self.push_leaf(Expression::ScalarParameter { info, default })
    }

    /// Named vector with a default.
    pub fn vector_parameter(&mut self, info: ParameterInfo, default: LinearColor) -> ExpressionId {
        self.push_leaf(Expression::VectorParameter { info, default })
    }

    /// Texture reference.
    pub fn texture(&mut self, texture: TextureExpression) -> ExpressionId {
        self.push_leaf(Expression::TextureParameter(texture))
    }

    /// External texture reference.
    pub fn external_texture(&mut self, texture: ExternalTextureExpression) -> ExpressionId {
        self.push_leaf(Expression::ExternalTextureParameter(texture))
    }

    /// Runtime virtual texture reference.
    pub fn runtime_virtual_texture(
        &mut self,
        texture: RuntimeVirtualTextureExpression,
    ) -> ExpressionId {
        self.push_leaf(Expression::RuntimeVirtualTextureParameter(texture))
    }

    // ----- Operators -----

    /// Binary arithmetic over the wider of the operands' lane counts.
    pub fn folded_math(
        &mut self,
        op: FoldedMathOp,
        a: ExpressionId,
        b: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        let value_type = self.checked_value_type(a)?.max(self.checked_value_type(b)?);
        self.push(Expression::FoldedMath {
            op,
            a,
            b,
            value_type,
        })
    }

    /// `a + b`.
    pub fn add(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Add, a, b)
    }

    /// `a - b`.
    pub fn sub(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Sub, a, b)
    }

    /// `a * b`.
    pub fn mul(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Mul, a, b)
    }

    /// `a / b`.
    pub fn div(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Div, a, b)
    }

    /// `dot(a, b)`.
    pub fn dot(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Dot, a, b)
    }

    /// `cross(a, b)`.
    pub fn cross(
        &mut self,
        a: ExpressionId,
        b: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        self.folded_math(FoldedMathOp::Cross, a, b)
    }

    /// Single-operand trigonometry.
    pub fn trig(&mut self, op: TrigOp, a: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Trig { op, a, b: None })
    }

    /// `atan2(y, x)`.
    pub fn atan2(
        &mut self,
        y: ExpressionId,
        x: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Trig {
            op: TrigOp::Atan2,
            a: y,
            b: Some(x),
        })
    }

    /// `min(a, b)`.
    pub fn min(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Min { a, b })
    }

    /// `max(a, b)`.
    pub fn max(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Max { a, b })
    }

    /// `clamp(input, min, max)`.
    pub fn clamp(
        &mut self,
        input: ExpressionId,
        min: ExpressionId,
        max: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Clamp { input, min, max })
    }

    /// `saturate(input)`.
    pub fn saturate(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Saturate { input })
    }

    /// Rounding or sign.
    pub fn rounding(
        &mut self,
        op: RoundingOp,
        input: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Rounding { op, input })
    }

    /// `fmod(a, b)`.
    pub fn fmod(&mut self, a: ExpressionId, b: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Fmod { a, b })
    }

    /// Select `lanes` (1 to 4 indices in `0..=3`) from `input`.
    pub fn swizzle(
        &mut self,
        input: ExpressionId,
        lanes: &[u8],
    ) -> Result<ExpressionId, UniformError> {
        if lanes.is_empty() || lanes.len() > 4 {
            return Err(UniformError::InvalidExpression(format!(
                "swizzle selects {} lanes, expected 1..=4",
                lanes.len()
            )));
        }
        let mut indices = [0u8; 4];
        indices[..lanes.len()].copy_from_slice(lanes);
        self.push(Expression::ComponentSwizzle {
            input,
            indices,
            count: lanes.len() as u8,
        })
    }

    /// Append the lanes of `b` after the meaningful lanes of `a`.
    pub fn append(
        &mut self,
        a: ExpressionId,
        b: ExpressionId,
    ) -> Result<ExpressionId, UniformError> {
        let a_lanes = self.checked_value_type(a)?.lanes();
        let b_lanes = self.checked_value_type(b)?.lanes();
        if a_lanes + b_lanes > 4 {
            return Err(UniformError::InvalidExpression(format!(
                "append of {a_lanes} and {b_lanes} lanes exceeds 4"
            )));
        }
        self.push(Expression::AppendVector {
            a,
            b,
            a_lanes: a_lanes as u8,
        })
    }

    /// `sqrt(input)`.
    pub fn square_root(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::SquareRoot { input })
    }

    /// `length(input)`.
    pub fn length(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        let value_type = self.checked_value_type(input)?;
        self.push(Expression::Length { input, value_type })
    }

    /// `log2(input)`.
    pub fn log2(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Logarithm {
            base: LogBase::Two,
            input,
        })
    }

    /// `log10(input)`.
    pub fn log10(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Logarithm {
            base: LogBase::Ten,
            input,
        })
    }

    /// `input - trunc(input)`.
    pub fn periodic(&mut self, input: ExpressionId) -> Result<ExpressionId, UniformError> {
        self.push(Expression::Periodic { input })
    }

    /// Size or texel size of a texture expression.
    pub fn texture_property(
        &mut self,
        texture: ExpressionId,
        property: TextureProperty,
    ) -> Result<ExpressionId, UniformError> {
        if texture.index() < self.nodes.len() && !self.get(texture).is_texture() {
            return Err(UniformError::InvalidExpression(format!(
                "texture property of non-texture node {}",
                texture.index()
            )));
        }
        self.push(Expression::TextureProperty { texture, property })
    }

    // ----- Queries -----

    fn checked_value_type(&self, id: ExpressionId) -> Result<ValueType, UniformError> {
        if id.index() >= self.nodes.len() {
            return Err(UniformError::InvalidExpression(format!(
                "node {} does not exist yet",
                id.index()
            )));
        }
        Ok(self.value_type(id))
    }

    /// Number of meaningful lanes produced by a node.
    pub fn value_type(&self, id: ExpressionId) -> ValueType {
        match self.get(id) {
            Expression::Constant { value_type, .. } => *value_type,
            Expression::ScalarParameter { .. } => ValueType::Float1,
            Expression::VectorParameter { .. }
            | Expression::TextureParameter(_)
            | Expression::ExternalTextureParameter(_)
            | Expression::RuntimeVirtualTextureParameter(_) => ValueType::Float4,
            Expression::FoldedMath { op, value_type, .. } => match op {
                FoldedMathOp::Dot => ValueType::Float1,
                FoldedMathOp::Cross => ValueType::Float3,
                _ => *value_type,
            },
            Expression::Trig { a, b, .. } => {
                let a = self.value_type(*a);
                b.map_or(a, |b| a.max(self.value_type(b)))
            }
            Expression::Min { a, b } | Expression::Max { a, b } | Expression::Fmod { a, b } => {
                self.value_type(*a).max(self.value_type(*b))
            }
            Expression::Clamp { input, .. }
            | Expression::Saturate { input }
            | Expression::Rounding { input, .. }
            | Expression::SquareRoot { input }
            | Expression::Logarithm { input, .. }
            | Expression::Periodic { input } => self.value_type(*input),
            Expression::ComponentSwizzle { count, .. } => ValueType::from_lanes(*count as usize),
            Expression::AppendVector { b, a_lanes, .. } => {
                ValueType::from_lanes(*a_lanes as usize + self.value_type(*b).lanes())
            }
            Expression::Length { .. } => ValueType::Float1,
            Expression::TextureProperty { .. } => ValueType::Float2,
        }
    }

    /// Whether a tree always evaluates to the same value.
    ///
    /// True iff every leaf reachable from `id` is a constant.
    pub fn is_constant(&self, id: ExpressionId) -> bool {
        match self.get(id) {
            Expression::Constant { .. } => true,
            Expression::ScalarParameter { .. }
            | Expression::VectorParameter { .. }
            | Expression::TextureParameter(_)
            | Expression::ExternalTextureParameter(_)
            | Expression::RuntimeVirtualTextureParameter(_) => false,
            node => node.children().all(|child| self.is_constant(child)),
        }
    }

    /// Structural identity between `a` in this arena and `b` in `other`.
    ///
    /// Two nodes are identical when they have the same kind, the same
    /// payload (operation, parameter, literal) and pairwise identical
    /// children. Ids are never compared across arenas.
    pub fn is_identical(&self, a: ExpressionId, other: &ExpressionArena, b: ExpressionId) -> bool {
        if std::ptr::eq(self, other) && a == b {
            return true;
        }
        let node_a = self.get(a);
        let node_b = other.get(b);
        node_a.same_payload(node_b)
            && node_a
                .children()
                .zip(node_b.children())
                .all(|(ca, cb)| self.is_identical(ca, other, cb))
    }

    /// Render a tree as a compact one-line string, for logs and debugging.
    pub fn describe(&self, id: ExpressionId, registry: &ExpressionRegistry) -> String {
        let node = self.get(id);
        let name = registry.name(node.kind());
        let detail = match node {
            Expression::Constant { value, .. } => {
                format!("({}, {}, {}, {})", value.x, value.y, value.z, value.w)
            }
            Expression::ScalarParameter { info, .. }
            | Expression::VectorParameter { info, .. } => format!("'{}'", info.name),
            Expression::TextureParameter(t) => format!("#{}", t.texture_index),
            Expression::FoldedMath { op, .. } => format!("{op:?}"),
            Expression::Trig { op, .. } => format!("{op:?}"),
            Expression::Rounding { op, .. } => format!("{op:?}"),
            _ => String::new(),
        };
        let children: Vec<String> = node
            .children()
            .map(|child| self.describe(child, registry))
            .collect();
        if children.is_empty() {
            format!("{name}{detail}")
        } else {
            format!("{name}{detail}[{}]", children.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_child_rejected() {
        let mut arena = ExpressionArena::new();
        let a = arena.constant_scalar(1.0);
        let result = arena.push(Expression::Min {
            a,
            b: ExpressionId(5),
        });
        assert!(matches!(result, Err(UniformError::InvalidExpression(_))));
    }

    #[test]
    fn test_bad_swizzle_rejected() {
        let mut arena = ExpressionArena::new();
        let v = arena.vector_parameter(ParameterInfo::global("v"), LinearColor::zeros());
        assert!(arena.swizzle(v, &[0, 4]).is_err());
        assert!(arena.swizzle(v, &[]).is_err());
        assert!(arena.swizzle(v, &[0, 1, 2, 3, 0]).is_err());
        assert!(arena.swizzle(v, &[3, 2, 1, 0]).is_ok());
    }

    #[test]
    fn test_append_overflow_rejected() {
        let mut arena = ExpressionArena::new();
        let v = arena.vector_parameter(ParameterInfo::global("v"), LinearColor::zeros());
        let s = arena.constant_scalar(1.0);
        assert!(arena.append(v, s).is_err());
        let xy = arena.swizzle(v, &[0, 1]).unwrap();
        let xyz = arena.append(xy, s).unwrap();
        assert_eq!(arena.value_type(xyz), ValueType::Float3);
    }

    #[test]
    fn test_is_constant() {
        let mut arena = ExpressionArena::new();
        let one = arena.constant_scalar(1.0);
        let two = arena.constant_scalar(2.0);
        let sum = arena.add(one, two).unwrap();
        let p = arena.scalar_parameter(ParameterInfo::global("p"), 0.0);
        let mixed = arena.mul(sum, p).unwrap();

        assert!(arena.is_constant(one));
        assert!(arena.is_constant(sum));
        assert!(!arena.is_constant(p));
        assert!(!arena.is_constant(mixed));
    }

    #[test]
    fn test_texture_property_is_not_constant() {
        let mut arena = ExpressionArena::new();
        let tex = arena.texture(TextureExpression::new(0));
        let size = arena.texture_property(tex, TextureProperty::Size).unwrap();
        assert!(!arena.is_constant(size));
    }

    #[test]
    fn test_identity_across_arenas() {
        let build = |value: f32| {
            let mut arena = ExpressionArena::new();
            let p = arena.scalar_parameter(ParameterInfo::global("gloss"), 0.5);
            let c = arena.constant_scalar(value);
            let root = arena.mul(p, c).unwrap();
            (arena, root)
        };
        let (a, ra) = build(2.0);
        let (b, rb) = build(2.0);
        let (c, rc) = build(3.0);

        assert!(a.is_identical(ra, &b, rb));
        assert!(!a.is_identical(ra, &c, rc));
    }

    #[test]
    fn test_identity_checks_operation() {
        let mut arena = ExpressionArena::new();
        let x = arena.constant_scalar(1.0);
        let y = arena.constant_scalar(2.0);
        let add = arena.add(x, y).unwrap();
        let sub = arena.sub(x, y).unwrap();
        let add_again = arena.add(x, y).unwrap();
        assert!(!arena.is_identical(add, &arena, sub));
        assert!(arena.is_identical(add, &arena, add_again));
    }

    #[test]
    fn test_dot_and_cross_value_types() {
        let mut arena = ExpressionArena::new();
        let v = arena.vector_parameter(ParameterInfo::global("v"), LinearColor::zeros());
        let d = arena.dot(v, v).unwrap();
        let c = arena.cross(v, v).unwrap();
        assert_eq!(arena.value_type(d), ValueType::Float1);
        assert_eq!(arena.value_type(c), ValueType::Float3);
    }

    #[test]
    fn test_describe() {
        let registry = ExpressionRegistry::standard();
        let mut arena = ExpressionArena::new();
        let p = arena.scalar_parameter(ParameterInfo::global("gloss"), 0.5);
        let c = arena.constant_scalar(2.0);
        let root = arena.mul(p, c).unwrap();
        assert_eq!(
            arena.describe(root, &registry),
            "FoldedMathMul[ScalarParameter'gloss', Constant(2, 2, 2, 2)]"
        );
    }
}
