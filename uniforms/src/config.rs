//! Layout configuration.
//!
//! Platform constants that drive the uniform buffer layout. The defaults
//! match a 64-bit target with 16-byte constant buffer rows.

use crate::error::UniformError;

/// Maximum number of layers a single virtual texture stack can hold.
pub const MAX_VIRTUAL_TEXTURE_LAYERS: usize = 8;

/// Alignment and size constants for [`build_schema`](crate::layout::build_schema).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutConfig {
    /// Alignment of every texture and sampler slot, in bytes.
    pub pointer_alignment: u32,
    /// Size of a texture or sampler slot, in bytes.
    pub pointer_size: u32,
    /// The total struct size is rounded up to this, in bytes.
    pub struct_alignment: u32,
    /// Layer capacity of a virtual texture stack.
    pub max_virtual_texture_layers: usize,
}

impl LayoutConfig {
    /// Size of one numeric row (`float4` / `uint4`) in bytes.
    pub const NUMERIC_ROW_SIZE: u32 = 16;

    /// Create a config with the default platform constants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource slot alignment.
    pub fn with_pointer_alignment(mut self, alignment: u32) -> Self {
        self.pointer_alignment = alignment;
        self
    }

    /// Set the resource slot size.
    pub fn with_pointer_size(mut self, size: u32) -> Self {
        self.pointer_size = size;
        self
    }

    /// Set the struct alignment.
    pub fn with_struct_alignment(mut self, alignment: u32) -> Self {
        self.struct_alignment = alignment;
        self
    }

    /// Set the virtual texture stack capacity.
    pub fn with_max_virtual_texture_layers(mut self, layers: usize) -> Self {
        self.max_virtual_texture_layers = layers;
        self
    }

    /// Check that every constant is usable.
    pub fn validate(&self) -> Result<(), UniformError> {
        if !self.pointer_alignment.is_power_of_two() {
            return Err(UniformError::InvalidConfig(format!(
                "pointer alignment must be a power of 2, got {}",
                self.pointer_alignment
            )));
        }
        if !self.struct_alignment.is_power_of_two() {
            return Err(UniformError::InvalidConfig(format!(
                "struct alignment must be a power of 2, got {}",
                self.struct_alignment
            )));
        }
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(UniformError::InvalidConfig(format!(
                "pointer size must be 4 or 8 bytes, got {}",
                self.pointer_size
            )));
        }
        if self.max_virtual_texture_layers == 0
            || self.max_virtual_texture_layers > MAX_VIRTUAL_TEXTURE_LAYERS
        {
            return Err(UniformError::InvalidConfig(format!(
                "virtual texture layers must be in 1..={MAX_VIRTUAL_TEXTURE_LAYERS}, got {}",
                self.max_virtual_texture_layers
            )));
        }
        Ok(())
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pointer_alignment: 8,
            pointer_size: 8,
            struct_alignment: 16,
            max_virtual_texture_layers: MAX_VIRTUAL_TEXTURE_LAYERS,
        }
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two).
#[inline]
pub fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}
