//! Material instance hierarchy and parameter resolution.
//!
//! A base material holds compiled defaults. Instances point at a parent
//! (instance or base) and carry a flat override table. Layered materials
//! additionally carry a stack of layer and blend functions; parameters that
//! belong to a layer or blend are looked up in the function that owns that
//! slot, and functions may themselves be instances of other functions.
//!
//! Every lookup threads a visited set through the walk. Re-entering a
//! material or function already visited in the same lookup reports a miss,
//! so a corrupted parent chain can never loop.

use fixedbitset::FixedBitSet;

use crate::error::UniformError;
use crate::math::LinearColor;
use crate::parameter::{
    ParameterAssociation, ParameterInfo, ParameterKind, ParameterTable, ParameterValue,
};
use crate::texture::TextureHandle;

/// Handle to a material in a [`MaterialHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(u32);

impl MaterialId {
    /// Raw index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a material function in a [`MaterialHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(u32);

impl FunctionId {
    /// Raw index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Layer and blend functions of a layered material.
///
/// On an instance, the stack is consulted before the parent. Parameters its
/// functions do not know are still looked up further up the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStack {
    /// Function per layer slot.
    pub layers: Vec<Option<FunctionId>>,
    /// Function per blend slot.
    pub blends: Vec<Option<FunctionId>>,
}

impl LayerStack {
    /// Function owning a layer or blend parameter.
    pub fn owner(&self, info: &ParameterInfo) -> Option<FunctionId> {
        let slots = match info.association {
            ParameterAssociation::Global => return None,
            ParameterAssociation::Layer => &self.layers,
            ParameterAssociation::Blend => &self.blends,
        };
        slots.get(info.index as usize).copied().flatten()
    }
}

/// A material function used as a layer or blend.
#[derive(Debug, Clone, Default)]
pub struct MaterialFunction {
    /// Debug name.
    pub name: String,
    /// Function this one is an instance of.
    pub base: Option<FunctionId>,
    /// Values overridden by this function instance.
    pub overrides: ParameterTable,
    /// Defaults compiled into this function.
    pub defaults: ParameterTable,
}

impl MaterialFunction {
    /// A function with defaults and no base.
    pub fn new(name: impl Into<String>, defaults: ParameterTable) -> Self {
        Self {
            name: name.into(),
            base: None,
            overrides: ParameterTable::new(),
            defaults,
        }
    }

    /// An instance of `base` with overrides.
    pub fn instance(name: impl Into<String>, base: FunctionId, overrides: ParameterTable) -> Self {
        Self {
            name: name.into(),
            base: Some(base),
            overrides,
            defaults: ParameterTable::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum MaterialNode {
    Base {
        name: String,
        defaults: ParameterTable,
        layers: Option<LayerStack>,
    },
    Instance {
        name: String,
        parent: MaterialId,
        overrides: ParameterTable,
        layers: Option<LayerStack>,
    },
}

impl MaterialNode {
    fn name(&self) -> &str {
        match self {
            Self::Base { name, .. } | Self::Instance { name, .. } => name,
        }
    }

    fn layers(&self) -> Option<&LayerStack> {
        match self {
            Self::Base { layers, .. } | Self::Instance { layers, .. } => layers.as_ref(),
        }
    }

    fn layers_mut(&mut self) -> &mut Option<LayerStack> {
        match self {
            Self::Base { layers, .. } | Self::Instance { layers, .. } => layers,
        }
    }

    fn table_mut(&mut self) -> &mut ParameterTable {
        match self {
            Self::Base { defaults, .. } => defaults,
            Self::Instance { overrides, .. } => overrides,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Effective,
    OverriddenOnly,
}

/// Outcome of looking a parameter up in a layer or blend function.
enum FunctionLookup {
    Found(ParameterValue),
    /// Declared with a default, but the lookup wants overrides only.
    Declared,
    Missing,
}

struct Visited {
    materials: FixedBitSet,
    functions: FixedBitSet,
}

/// Base materials, instances and functions, addressed by id.
#[derive(Debug, Clone, Default)]
pub struct MaterialHierarchy {
    materials: Vec<MaterialNode>,
    functions: Vec<MaterialFunction>,
}

impl MaterialHierarchy {
    /// Create an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a base material with its compiled defaults.
    pub fn add_base(&mut self, name: impl Into<String>, defaults: ParameterTable) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(MaterialNode::Base {
            name: name.into(),
            defaults,
            layers: None,
        });
        id
    }

    /// Add an instance of `parent`.
    pub fn add_instance(
        &mut self,
        name: impl Into<String>,
        parent: MaterialId,
        overrides: ParameterTable,
    ) -> Result<MaterialId, UniformError> {
        self.check_material(parent)?;
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(MaterialNode::Instance {
            name: name.into(),
            parent,
            overrides,
            layers: None,
        });
        Ok(id)
    }

    /// Add a material function.
    pub fn add_function(&mut self, function: MaterialFunction) -> Result<FunctionId, UniformError> {
        if let Some(base) = function.base {
            self.check_function(base)?;
        }
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(function);
        Ok(id)
    }

    /// Re-parent an instance.
    ///
    /// No cycle check happens here; lookups tolerate cyclic chains.
    pub fn set_parent(
        &mut self,
        instance: MaterialId,
        parent: MaterialId,
    ) -> Result<(), UniformError> {
        self.check_material(parent)?;
        match self.materials.get_mut(instance.index()) {
            Some(MaterialNode::Instance { parent: slot, .. }) => {
                *slot = parent;
                Ok(())
            }
            Some(MaterialNode::Base { .. }) => Err(UniformError::InvalidConfig(format!(
                "material {} is a base material and has no parent",
                instance.0
            ))),
            None => Err(UniformError::UnknownMaterial(instance.0)),
        }
    }

    /// Re-base a function instance.
    pub fn set_function_base(
        &mut self,
        function: FunctionId,
        base: FunctionId,
    ) -> Result<(), UniformError> {
        self.check_function(base)?;
        let slot = self
            .functions
            .get_mut(function.index())
            .ok_or(UniformError::UnknownFunction(function.0))?;
        slot.base = Some(base);
        Ok(())
    }

    /// Give a material its own layer stack.
    pub fn set_layers(
        &mut self,
        material: MaterialId,
        stack: LayerStack,
    ) -> Result<(), UniformError> {
        for function in stack.layers.iter().chain(&stack.blends).flatten() {
            self.check_function(*function)?;
        }
        let node = self
            .materials
            .get_mut(material.index())
            .ok_or(UniformError::UnknownMaterial(material.0))?;
        *node.layers_mut() = Some(stack);
        Ok(())
    }

    /// Set one value in a material's table (defaults for a base, overrides
    /// for an instance).
    pub fn set_parameter(
        &mut self,
        material: MaterialId,
        info: ParameterInfo,
        value: ParameterValue,
    ) -> Result<(), UniformError> {
        let node = self
            .materials
            .get_mut(material.index())
            .ok_or(UniformError::UnknownMaterial(material.0))?;
        node.table_mut().set(info, value);
        Ok(())
    }

    /// Drop one value from a material's table.
    pub fn clear_parameter(
        &mut self,
        material: MaterialId,
        info: &ParameterInfo,
        kind: ParameterKind,
    ) -> Result<bool, UniformError> {
        let node = self
            .materials
            .get_mut(material.index())
            .ok_or(UniformError::UnknownMaterial(material.0))?;
        Ok(node.table_mut().remove(info, kind))
    }

    /// Name of a material.
    pub fn name(&self, material: MaterialId) -> Option<&str> {
        self.materials.get(material.index()).map(MaterialNode::name)
    }

    /// Parent of an instance. `None` for base materials.
    pub fn parent(&self, material: MaterialId) -> Option<MaterialId> {
        match self.materials.get(material.index())? {
            MaterialNode::Instance { parent, .. } => Some(*parent),
            MaterialNode::Base { .. } => None,
        }
    }

    /// Function by id.
    pub fn function(&self, function: FunctionId) -> Option<&MaterialFunction> {
        self.functions.get(function.index())
    }

    /// Number of materials.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether the hierarchy has no materials.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Resolve the effective value of a parameter starting at `start`.
    ///
    /// Returns `None` when no material or function in the chain defines it,
    /// or when the chain loops back on itself. Callers fall back to their
    /// own default in that case.
    pub fn resolve(
        &self,
        info: &ParameterInfo,
        kind: ParameterKind,
        start: MaterialId,
    ) -> Option<ParameterValue> {
        let mut visited = self.visited();
        self.resolve_material(info, kind, start, Lookup::Effective, &mut visited)
    }

    /// Resolve only values explicitly overridden by an instance or a function
    /// instance, ignoring every compiled default.
    pub fn resolve_overridden(
        &self,
        info: &ParameterInfo,
        kind: ParameterKind,
        start: MaterialId,
    ) -> Option<ParameterValue> {
        let mut visited = self.visited();
        self.resolve_material(info, kind, start, Lookup::OverriddenOnly, &mut visited)
    }

    /// Resolve a scalar parameter.
    pub fn resolve_scalar(&self, info: &ParameterInfo, start: MaterialId) -> Option<f32> {
        self.resolve(info, ParameterKind::Scalar, start)
            .as_ref()
            .and_then(ParameterValue::as_scalar)
    }

    /// Resolve a vector parameter.
    pub fn resolve_vector(&self, info: &ParameterInfo, start: MaterialId) -> Option<LinearColor> {
        self.resolve(info, ParameterKind::Vector, start)
            .as_ref()
            .and_then(ParameterValue::as_vector)
    }

    /// Resolve a texture parameter. The inner `None` is an explicit
    /// "no texture" override.
    pub fn resolve_texture(
        &self,
        info: &ParameterInfo,
        start: MaterialId,
    ) -> Option<Option<TextureHandle>> {
        match self.resolve(info, ParameterKind::Texture, start)? {
            ParameterValue::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    fn visited(&self) -> Visited {
        Visited {
            materials: FixedBitSet::with_capacity(self.materials.len()),
            functions: FixedBitSet::with_capacity(self.functions.len()),
        }
    }

    fn check_material(&self, id: MaterialId) -> Result<(), UniformError> {
        if id.index() < self.materials.len() {
            Ok(())
        } else {
            Err(UniformError::UnknownMaterial(id.0))
        }
    }

    fn check_function(&self, id: FunctionId) -> Result<(), UniformError> {
        if id.index() < self.functions.len() {
            Ok(())
        } else {
            Err(UniformError::UnknownFunction(id.0))
        }
    }

    fn resolve_material(
        &self,
        info: &ParameterInfo,
        kind: ParameterKind,
        id: MaterialId,
        lookup: Lookup,
        visited: &mut Visited,
    ) -> Option<ParameterValue> {
        let node = self.materials.get(id.index())?;
        if visited.materials.put(id.index()) {
            log::debug!(
                "Material '{}' reached twice while resolving '{}'",
                node.name(),
                info.name
            );
            return None;
        }

        let (table, parent) = match node {
            MaterialNode::Base { defaults, .. } => (defaults, None),
            MaterialNode::Instance {
                overrides, parent, ..
            } => (overrides, Some(*parent)),
        };

        if parent.is_some() || lookup == Lookup::Effective {
            if let Some(value) = table.find(info, kind) {
                return Some(value.clone());
            }
        }

        if !info.is_global() {
            if let Some(function) = node.layers().and_then(|stack| stack.owner(info)) {
                match self.resolve_function(&info.name, kind, function, lookup, visited) {
                    FunctionLookup::Found(value) => return Some(value),
                    // The function owns the parameter but only has a default.
                    FunctionLookup::Declared => return None,
                    FunctionLookup::Missing => {}
                }
            }
        }

        parent.and_then(|parent| self.resolve_material(info, kind, parent, lookup, visited))
    }

    fn resolve_function(
        &self,
        name: &str,
        kind: ParameterKind,
        id: FunctionId,
        lookup: Lookup,
        visited: &mut Visited,
    ) -> FunctionLookup {
        let Some(function) = self.functions.get(id.index()) else {
            return FunctionLookup::Missing;
        };
        if visited.functions.put(id.index()) {
            log::debug!(
                "Material function '{}' reached twice while resolving '{name}'",
                function.name
            );
            return FunctionLookup::Missing;
        }

        if let Some(value) = function.overrides.find_by_name(name, kind) {
            return FunctionLookup::Found(value.clone());
        }
        if let Some(base) = function.base {
            match self.resolve_function(name, kind, base, lookup, visited) {
                FunctionLookup::Missing => {}
                found => return found,
            }
        }
        match (function.defaults.find_by_name(name, kind), lookup) {
            (Some(value), Lookup::Effective) => FunctionLookup::Found(value.clone()),
            (Some(_), Lookup::OverriddenOnly) => FunctionLookup::Declared,
            (None, _) => FunctionLookup::Missing,
        }
    }
}
