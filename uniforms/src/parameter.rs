//! Material parameter identifiers and override tables.
//!
//! A parameter is identified by its name plus the layer or blend slot that
//! introduced it ([`ParameterInfo`]). Override tables are flat arrays of
//! `(info, value)` entries as produced by the editor/content layer.

use std::sync::Arc;

use crate::math::LinearColor;
use crate::texture::TextureHandle;

/// Which part of a layered material introduced a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterAssociation {
    /// Declared directly on the material.
    #[default]
    Global,
    /// Declared inside a layer function.
    Layer,
    /// Declared inside a blend function.
    Blend,
}

/// Identifies a named parameter and its layer/blend slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: Arc<str>,
    /// Layer/blend association.
    pub association: ParameterAssociation,
    /// Layer or blend slot index. Always `0` for global parameters.
    pub index: u32,
}

impl ParameterInfo {
    /// A global parameter.
    pub fn global(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            association: ParameterAssociation::Global,
            index: 0,
        }
    }

    /// A parameter declared in layer `index`.
    pub fn layer(name: impl Into<Arc<str>>, index: u32) -> Self {
        Self {
            name: name.into(),
            association: ParameterAssociation::Layer,
            index,
        }
    }

    /// A parameter declared in blend `index`.
    pub fn blend(name: impl Into<Arc<str>>, index: u32) -> Self {
        Self {
            name: name.into(),
            association: ParameterAssociation::Blend,
            index,
        }
    }

    /// Whether the parameter resolves without a layer lookup.
    pub fn is_global(&self) -> bool {
        self.association == ParameterAssociation::Global
    }
}

/// Kind of value a parameter holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Single float.
    Scalar,
    /// Four floats.
    Vector,
    /// Texture reference.
    Texture,
    /// Runtime virtual texture reference.
    RuntimeVirtualTexture,
}

/// A parameter value.
///
/// Texture values may be `None`: an override that explicitly references no
/// asset. Binding it degrades to the placeholder texture.
#[derive(Debug, Clone)]
pub enum ParameterValue {
    /// Single float.
    Scalar(f32),
    /// Four floats.
    Vector(LinearColor),
    /// Texture reference.
    Texture(Option<TextureHandle>),
    /// Runtime virtual texture reference.
    RuntimeVirtualTexture(Option<TextureHandle>),
}

impl ParameterValue {
    /// Kind of this value.
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Scalar(_) => ParameterKind::Scalar,
            Self::Vector(_) => ParameterKind::Vector,
            Self::Texture(_) => ParameterKind::Texture,
            Self::RuntimeVirtualTexture(_) => ParameterKind::RuntimeVirtualTexture,
        }
    }

    /// Scalar payload.
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Vector payload.
    pub fn as_vector(&self) -> Option<LinearColor> {
        match self {
            Self::Vector(v) => Some(*v),
            _ => None,
        }
    }

    /// Texture payload of either texture kind.
    pub fn as_texture(&self) -> Option<Option<&TextureHandle>> {
        match self {
            Self::Texture(t) | Self::RuntimeVirtualTexture(t) => Some(t.as_ref()),
            _ => None,
        }
    }
}

impl PartialEq for ParameterValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Vector(a), Self::Vector(b)) => a == b,
            (Self::Texture(a), Self::Texture(b))
            | (Self::RuntimeVirtualTexture(a), Self::RuntimeVirtualTexture(b)) => {
                match (a, b) {
                    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                    (None, None) => true,
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

/// One row of an override table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    /// Which parameter.
    pub info: ParameterInfo,
    /// Its value.
    pub value: ParameterValue,
}

/// Flat parameter table keyed by [`ParameterInfo`] and value kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    entries: Vec<ParameterEntry>,
}

impl ParameterTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a value (builder form).
    #[must_use]
    pub fn with(mut self, info: ParameterInfo, value: ParameterValue) -> Self {
        self.set(info, value);
        self
    }

    /// Add or replace the value for `info` of the same kind.
    pub fn set(&mut self, info: ParameterInfo, value: ParameterValue) {
        let kind = value.kind();
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.info == info && e.value.kind() == kind)
        {
            existing.value = value;
        } else {
            self.entries.push(ParameterEntry { info, value });
        }
    }

    /// Remove the value for `info` of `kind`. Returns whether one was removed.
    pub fn remove(&mut self, info: &ParameterInfo, kind: ParameterKind) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.info == *info && e.value.kind() == kind));
        before != self.entries.len()
    }

    /// Find the value for `info` of `kind`.
    pub fn find(&self, info: &ParameterInfo, kind: ParameterKind) -> Option<&ParameterValue> {
        self.entries
            .iter()
            .find(|e| e.info == *info && e.value.kind() == kind)
            .map(|e| &e.value)
    }

    /// Find a value by name only, ignoring the association.
    ///
    /// Used inside layer functions, where parameters are declared without a
    /// layer slot of their own.
    pub fn find_by_name(&self, name: &str, kind: ParameterKind) -> Option<&ParameterValue> {
        self.entries
            .iter()
            .find(|e| &*e.info.name == name && e.value.kind() == kind)
            .map(|e| &e.value)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::{RhiTexture, TextureResource};

    #[test]
    fn test_set_replaces_same_kind() {
        let mut table = ParameterTable::new();
        table.set(ParameterInfo::global("roughness"), ParameterValue::Scalar(0.2));
        table.set(ParameterInfo::global("roughness"), ParameterValue::Scalar(0.7));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table
                .find(&ParameterInfo::global("roughness"), ParameterKind::Scalar)
                .and_then(ParameterValue::as_scalar),
            Some(0.7)
        );
    }

    #[test]
    fn test_kinds_are_separate() {
        let table = ParameterTable::new()
            .with(ParameterInfo::global("tint"), ParameterValue::Scalar(1.0))
            .with(
                ParameterInfo::global("tint"),
                ParameterValue::Vector(LinearColor::new(1.0, 0.0, 0.0, 1.0)),
            );
        assert_eq!(table.len(), 2);
        assert!(
            table
                .find(&ParameterInfo::global("tint"), ParameterKind::Texture)
                .is_none()
        );
    }

    #[test]
    fn test_association_distinguishes_entries() {
        let table = ParameterTable::new()
            .with(ParameterInfo::layer("height", 0), ParameterValue::Scalar(1.0))
            .with(ParameterInfo::layer("height", 1), ParameterValue::Scalar(2.0));
        let value = table
            .find(&ParameterInfo::layer("height", 1), ParameterKind::Scalar)
            .and_then(ParameterValue::as_scalar);
        assert_eq!(value, Some(2.0));
        assert!(
            table
                .find(&ParameterInfo::global("height"), ParameterKind::Scalar)
                .is_none()
        );
    }

    #[test]
    fn test_remove() {
        let mut table =
            ParameterTable::new().with(ParameterInfo::global("a"), ParameterValue::Scalar(1.0));
        assert!(table.remove(&ParameterInfo::global("a"), ParameterKind::Scalar));
        assert!(table.is_empty());
        assert!(!table.remove(&ParameterInfo::global("a"), ParameterKind::Scalar));
    }

    #[test]
    fn test_texture_value_equality_is_by_handle() {
        let a = TextureResource::texture_2d("a", 1, 1, RhiTexture(1)).into_handle();
        let b = TextureResource::texture_2d("a", 1, 1, RhiTexture(1)).into_handle();
        assert_eq!(
            ParameterValue::Texture(Some(a.clone())),
            ParameterValue::Texture(Some(a))
        );
        assert_ne!(
            ParameterValue::Texture(Some(b)),
            ParameterValue::Texture(None)
        );
    }
}
