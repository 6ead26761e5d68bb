//! Stable names for expression node kinds.
//!
//! Debug dumps and set summaries refer to nodes by these names, so they stay
//! fixed even if the [`Expression`](super::Expression) enum is reordered.

use std::collections::HashMap;

/// Tag for each node kind of [`Expression`](super::Expression).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExpressionKind {
    /// Literal value.
    Constant,
    /// Named scalar parameter.
    ScalarParameter,
    /// Named vector parameter.
    VectorParameter,
    /// Named texture parameter.
    TextureParameter,
    /// Texture resolved through the external texture registry.
    ExternalTextureParameter,
    /// Runtime virtual texture parameter.
    RuntimeVirtualTextureParameter,
    /// Binary arithmetic: add, subtract, multiply, divide, dot or cross.
    FoldedMath,
    /// Trigonometric function.
    Trig,
    /// Per-lane minimum.
    Min,
    /// Per-lane maximum.
    Max,
    /// Per-lane clamp between two bounds.
    Clamp,
    /// Clamp to `[0, 1]`.
    Saturate,
    /// Floor, ceil, round, truncate, frac, sign or abs.
    Rounding,
    /// Floating-point remainder.
    Fmod,
    /// Lane selection.
    ComponentSwizzle,
    /// Concatenation of two values' lanes.
    AppendVector,
    /// Per-lane square root.
    SquareRoot,
    /// Vector length.
    Length,
    /// Base-2 or base-10 logarithm.
    Logarithm,
    /// Fractional part, `x - trunc(x)`.
    Periodic,
    /// Size or texel size of a texture.
    TextureProperty,
}

impl ExpressionKind {
    /// Every kind, in declaration order.
    pub const ALL: [ExpressionKind; 21] = [
        Self::Constant,
        Self::ScalarParameter,
        Self::VectorParameter,
        Self::TextureParameter,
        Self::ExternalTextureParameter,
        Self::RuntimeVirtualTextureParameter,
        Self::FoldedMath,
        Self::Trig,
        Self::Min,
        Self::Max,
        Self::Clamp,
        Self::Saturate,
        Self::Rounding,
        Self::Fmod,
        Self::ComponentSwizzle,
        Self::AppendVector,
        Self::SquareRoot,
        Self::Length,
        Self::Logarithm,
        Self::Periodic,
        Self::TextureProperty,
    ];

    /// Canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constant => "Constant",
            Self::ScalarParameter => "ScalarParameter",
            Self::VectorParameter => "VectorParameter",
            Self::TextureParameter => "TextureParameter",
            Self::ExternalTextureParameter => "ExternalTextureParameter",
            Self::RuntimeVirtualTextureParameter => "RuntimeVirtualTextureParameter",
            Self::FoldedMath => "FoldedMath",
            Self::Trig => "Trig",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Clamp => "Clamp",
            Self::Saturate => "Saturate",
            Self::Rounding => "Rounding",
            Self::Fmod => "Fmod",
            Self::ComponentSwizzle => "ComponentSwizzle",
            Self::AppendVector => "AppendVector",
            Self::SquareRoot => "SquareRoot",
            Self::Length => "Length",
            Self::Logarithm => "Logarithm",
            Self::Periodic => "Periodic",
            Self::TextureProperty => "TextureProperty",
        }
    }
}

/// Explicit table mapping node kinds to names and back.
///
/// Used when printing or summarizing expression sets so that a kind is always
/// reported under one stable name.
#[derive(Debug, Clone, Default)]
pub struct ExpressionRegistry {
    by_name: HashMap<&'static str, ExpressionKind>,
}

impl ExpressionRegistry {
    /// Registry with every built-in kind.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        for kind in ExpressionKind::ALL {
            registry.register(kind);
        }
        registry
    }

    /// Register one kind under its canonical name.
    pub fn register(&mut self, kind: ExpressionKind) {
        let previous = self.by_name.insert(kind.as_str(), kind);
        if previous.is_some() {
            log::debug!("Expression kind {} registered twice", kind.as_str());
        }
    }

    /// Name of a kind, or `"Unknown"` if it was never registered.
    pub fn name(&self, kind: ExpressionKind) -> &'static str {
        if self.by_name.contains_key(kind.as_str()) {
            kind.as_str()
        } else {
            "Unknown"
        }
    }

    /// Look a kind up by name.
    pub fn lookup(&self, name: &str) -> Option<ExpressionKind> {
        self.by_name.get(name).copied()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_round_trips_names() {
        let registry = ExpressionRegistry::standard();
        assert_eq!(registry.len(), ExpressionKind::ALL.len());
        for kind in ExpressionKind::ALL {
            assert_eq!(registry.lookup(registry.name(kind)), Some(kind));
        }
    }

    #[test]
    fn test_unregistered_kind() {
        let registry = ExpressionRegistry::default();
        assert_eq!(registry.name(ExpressionKind::Fmod), "Unknown");
        assert_eq!(registry.lookup("Fmod"), None);
    }
}
