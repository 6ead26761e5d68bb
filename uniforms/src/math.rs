//! Lane math shared by the expression evaluator.
//!
//! Every uniform expression produces a 4-lane [`LinearColor`]. Nodes also
//! record how many of those lanes carry meaning ([`ValueType`]) so that
//! reductions like dot products and lengths only read the valid lanes.

pub use nalgebra;

/// 4-lane float value produced by every numeric expression (r, g, b, a).
pub type LinearColor = nalgebra::Vector4<f32>;

/// 3-lane float vector used for cross products.
pub type Vec3 = nalgebra::Vector3<f32>;

/// Smallest divisor magnitude the evaluator lets through.
pub const DELTA: f32 = 0.00001;

/// Replace a near-zero divisor with `±DELTA`, keeping its sign.
///
/// Zero (including negative zero) counts as non-negative and maps to `+DELTA`.
/// Any divisor with a magnitude of at least `DELTA` is returned unchanged.
pub fn safe_divisor(x: f32) -> f32 {
    if x.abs() < DELTA {
        if x < 0.0 { -DELTA } else { DELTA }
    } else {
        x
    }
}

/// Number of semantically meaningful lanes in a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ValueType {
    /// Scalar (lane r).
    Float1,
    /// Two lanes (r, g).
    Float2,
    /// Three lanes (r, g, b).
    Float3,
    /// All four lanes.
    #[default]
    Float4,
}

impl ValueType {
    /// Number of meaningful lanes.
    pub fn lanes(self) -> usize {
        match self {
            Self::Float1 => 1,
            Self::Float2 => 2,
            Self::Float3 => 3,
            Self::Float4 => 4,
        }
    }

    /// Value type for a lane count, clamped to 1..=4.
    pub fn from_lanes(lanes: usize) -> Self {
        match lanes {
            0 | 1 => Self::Float1,
            2 => Self::Float2,
            3 => Self::Float3,
            _ => Self::Float4,
        }
    }

    /// The wider of two value types.
    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }
}

/// Broadcast a scalar into all four lanes.
pub fn splat(value: f32) -> LinearColor {
    LinearColor::new(value, value, value, value)
}

/// Coerce a value to three lanes for a cross product.
///
/// A scalar is broadcast into three identical lanes; a 2-lane value gets a
/// zero third lane; wider values keep their first three lanes.
pub fn to_vec3(value: &LinearColor, value_type: ValueType) -> Vec3 {
    match value_type {
        ValueType::Float1 => Vec3::new(value.x, value.x, value.x),
        ValueType::Float2 => Vec3::new(value.x, value.y, 0.0),
        ValueType::Float3 | ValueType::Float4 => value.xyz(),
    }
}

/// Dot product over the meaningful lanes.
pub fn dot(a: &LinearColor, b: &LinearColor, value_type: ValueType) -> f32 {
    (0..value_type.lanes()).map(|i| a[i] * b[i]).sum()
}

/// Apply `f` to every lane.
pub fn map_lanes(value: &LinearColor, f: impl Fn(f32) -> f32) -> LinearColor {
    value.map(f)
}

/// Apply `f` lane-wise to two values.
pub fn zip_lanes(a: &LinearColor, b: &LinearColor, f: impl Fn(f32, f32) -> f32) -> LinearColor {
    a.zip_map(b, f)
}

/// Sign of a value: `1`, `-1`, or `0` for zero.
pub fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Fractional part relative to floor (`x - floor(x)`), always in `[0, 1)`.
pub fn frac(x: f32) -> f32 {
    x - x.floor()
}

/// Fractional part relative to truncation (`x - trunc(x)`), keeps the sign of `x`.
pub fn fractional(x: f32) -> f32 {
    x - x.trunc()
}

/// Round half up (`floor(x + 0.5)`).
pub fn round_half_up(x: f32) -> f32 {
    (x + 0.5).floor()
}
