//! Uniform system error types.

use std::fmt;

/// Errors raised while building expressions, sets and layouts.
///
/// Only the content/compile path returns these. Evaluation and buffer filling
/// never fail: they degrade to placeholder values instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformError {
    /// An expression node was malformed (dangling child, bad swizzle, ...).
    InvalidExpression(String),
    /// A virtual texture stack has no free layer left.
    VirtualTextureStackFull {
        /// Index of the full stack.
        stack: usize,
    },
    /// A virtual texture expression was not assigned to any stack.
    UnassignedVirtualTexture {
        /// Index of the expression in the set's virtual texture list.
        index: usize,
    },
    /// A layout or set configuration value is invalid.
    InvalidConfig(String),
    /// A material id does not exist in the hierarchy.
    UnknownMaterial(u32),
    /// A material function id does not exist in the hierarchy.
    UnknownFunction(u32),
}

impl fmt::Display for UniformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidExpression(msg) => write!(f, "invalid expression: {msg}"),
            Self::VirtualTextureStackFull { stack } => {
                write!(f, "virtual texture stack {stack} has no free layers")
            }
            Self::UnassignedVirtualTexture { index } => {
                write!(f, "virtual texture expression {index} belongs to no stack")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnknownMaterial(id) => write!(f, "unknown material id {id}"),
            Self::UnknownFunction(id) => write!(f, "unknown material function id {id}"),
        }
    }
}

impl std::error::Error for UniformError {}
