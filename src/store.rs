//! The storage collaborator the resolver runs against.
//!
//! A [`Store`] knows field definitions, the parent/child edges of the
//! namespace and the attributes each directory defines itself. Everything
//! else (inheritance, descendant sets, assignment checks) is derived from
//! those primitives in provided methods, which backends may override with
//! something faster.

use roaring::RoaringTreemap;
use std::collections::HashMap;
use tracing::warn;

use crate::datatype::{Scalar, ValueType};
use crate::error::{MetaQueryError, Result};
use crate::field::{AttributeMap, FieldDef, FieldHasher, FieldTypes, Registration, Scope, check_definition};
use crate::query::Conjunction;

pub type NodeId = u64;

/// Identity of the namespace root in the bundled stores.
pub const ROOT: NodeId = 1;

pub trait Store {
    fn field_defs(&self, scope: Scope) -> Result<FieldTypes>;
    fn add_field_def(&mut self, def: &FieldDef) -> Result<Registration>;
    /// Returns whether a definition was removed.
    fn remove_field_def(&mut self, name: &str, scope: Scope) -> Result<bool>;
    /// Values defined on the node itself, restricted to `fields`.
    fn own_attributes(&self, node: NodeId, fields: &[String]) -> Result<AttributeMap>;
    fn children(&self, node: NodeId) -> Result<Vec<NodeId>>;
    fn parent(&self, node: NodeId) -> Result<Option<NodeId>>;
    fn field_set(&self, name: &str) -> Result<Option<Conjunction>>;

    fn own_attributes_batch(&self, nodes: &[NodeId], fields: &[String]) -> Result<Vec<AttributeMap>> {
        nodes.iter().map(|node| self.own_attributes(*node, fields)).collect()
    }

    fn children_batch(&self, nodes: &[NodeId]) -> Result<Vec<Vec<NodeId>>> {
        nodes.iter().map(|node| self.children(*node)).collect()
    }

    /// Declared types of both scopes.
    fn all_field_types(&self) -> Result<FieldTypes> {
        let mut types = self.field_defs(Scope::File)?;
        types.extend(self.field_defs(Scope::Directory)?);
        Ok(types)
    }

    /// The node's ancestors, nearest first.
    fn ancestors(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent(node)?;
        while let Some(parent) = current {
            if parent == node || ancestors.contains(&parent) {
                return Err(MetaQueryError::Store(format!("Cycle in the namespace above {node}")));
            }
            ancestors.push(parent);
            current = self.parent(parent)?;
        }
        Ok(ancestors)
    }

    /// Own values plus everything inherited from ancestors.
    fn inherited_attributes(&self, node: NodeId, fields: &[String]) -> Result<AttributeMap> {
        let mut attrs = self.own_attributes(node, fields)?;
        for ancestor in self.ancestors(node)? {
            for (field, value) in self.own_attributes(ancestor, fields)? {
                attrs.entry(field).or_insert(value);
            }
        }
        Ok(attrs)
    }

    /// Every node strictly below `node`.
    fn descendants(&self, node: NodeId) -> Result<RoaringTreemap> {
        let mut found = RoaringTreemap::new();
        let mut frontier = vec![node];
        while !frontier.is_empty() {
            let next: Vec<NodeId> = self.children_batch(&frontier)?.into_iter().flatten().collect();
            for child in &next {
                if !found.insert(*child) {
                    return Err(MetaQueryError::Store(format!("Node {child} reached twice below {node}")));
                }
            }
            frontier = next;
        }
        Ok(found)
    }

    /// Validate a directory attribute assignment and return the value in
    /// the field's declared type. A field already defined on an ancestor or
    /// a descendant may not be set again, so inherited values never change
    /// on the way down. A field set counts as defining each of its members.
    fn checked_value(&self, node: NodeId, field: &str, value: &Scalar) -> Result<Scalar> {
        let types = self.field_defs(Scope::Directory)?;
        let value_type = *types.get(field).ok_or_else(|| {
            MetaQueryError::FieldDefinition(format!("The field '{field}' is not defined for directories"))
        })?;
        let typed = value.coerce(value_type).ok_or_else(|| MetaQueryError::Type {
            field: field.to_string(),
            value: value.to_string(),
            expected: value_type.to_string(),
        })?;
        let mut members = Vec::new();
        if value_type == ValueType::FieldSet {
            let set = self
                .field_set(&typed.to_string())?
                .ok_or_else(|| MetaQueryError::FieldDefinition(format!("Unknown field set '{typed}'")))?;
            members.extend(set.fields().map(str::to_string));
        }
        let fields: Vec<String> = types.keys().cloned().collect();
        let mut wanted = members.clone();
        wanted.push(field.to_string());
        for ancestor in self.ancestors(node)? {
            if let Some(clash) = defined_among(self, ancestor, &wanted, &fields, &types, None)? {
                warn!("Refusing to override '{}' inherited from {}", clash, ancestor);
                return Err(MetaQueryError::FieldDefinition(format!(
                    "Metadata conflict: '{clash}' is already defined on ancestor {ancestor}"
                )));
            }
        }
        for descendant in self.descendants(node)? {
            if let Some(clash) = defined_among(self, descendant, &wanted, &fields, &types, None)? {
                return Err(MetaQueryError::FieldDefinition(format!(
                    "Metadata conflict: '{clash}' is already defined on descendant {descendant}"
                )));
            }
        }
        // the node's own value for `field` is simply replaced
        if let Some(clash) = defined_among(self, node, &members, &fields, &types, Some(field))? {
            return Err(MetaQueryError::FieldDefinition(format!(
                "Metadata conflict: '{clash}' is already defined on {node}"
            )));
        }
        Ok(typed)
    }
}

/// The first of `wanted` that `node` defines, either itself or through one
/// of its field sets.
fn defined_among<S: Store + ?Sized>(
    store: &S,
    node: NodeId,
    wanted: &[String],
    fields: &[String],
    types: &FieldTypes,
    skip: Option<&str>,
) -> Result<Option<String>> {
    if wanted.is_empty() {
        return Ok(None);
    }
    for (field, value) in store.own_attributes(node, fields)? {
        if skip == Some(field.as_str()) {
            continue;
        }
        if wanted.contains(&field) {
            return Ok(Some(field));
        }
        if types.get(&field) != Some(&ValueType::FieldSet) {
            continue;
        }
        if let Some(set) = store.field_set(&value.to_string())? {
            if let Some(member) = set.fields().find(|member| wanted.iter().any(|w| w == *member)) {
                return Ok(Some(member.to_string()));
            }
        }
    }
    Ok(None)
}

type NodeMap<V> = HashMap<NodeId, V, FieldHasher>;

/// A store held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    fields: HashMap<Scope, FieldTypes>,
    parents: NodeMap<NodeId>,
    children: NodeMap<Vec<NodeId>>,
    attributes: NodeMap<AttributeMap>,
    field_sets: HashMap<String, Conjunction, FieldHasher>,
    next_node: NodeId,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut children = NodeMap::default();
        children.insert(ROOT, Vec::new());
        Self {
            fields: HashMap::new(),
            parents: NodeMap::default(),
            children,
            attributes: NodeMap::default(),
            field_sets: HashMap::default(),
            next_node: ROOT + 1,
        }
    }

    fn known(&self, node: NodeId) -> Result<()> {
        if self.children.contains_key(&node) {
            Ok(())
        } else {
            Err(MetaQueryError::Store(format!("Unknown node {node}")))
        }
    }

    pub fn add_node(&mut self, parent: NodeId) -> Result<NodeId> {
        self.known(parent)?;
        let node = self.next_node;
        self.next_node += 1;
        self.parents.insert(node, parent);
        self.children.insert(node, Vec::new());
        self.children.entry(parent).or_default().push(node);
        Ok(node)
    }

    pub fn set_attribute(&mut self, node: NodeId, field: &str, value: impl Into<Scalar>) -> Result<()> {
        self.known(node)?;
        let typed = self.checked_value(node, field, &value.into())?;
        self.attributes
            .entry(node)
            .or_default()
            .insert(field.to_string(), typed);
        Ok(())
    }

    pub fn define_field_set(&mut self, name: &str, members: Conjunction) -> Result<()> {
        let types = self.all_field_types()?;
        if let Some(unknown) = members.fields().find(|field| !types.contains_key(*field)) {
            return Err(MetaQueryError::FieldDefinition(format!(
                "Field set '{name}' uses the undefined field '{unknown}'"
            )));
        }
        self.field_sets.insert(name.to_string(), members);
        Ok(())
    }
}

impl Store for MemoryStore {
    fn field_defs(&self, scope: Scope) -> Result<FieldTypes> {
        Ok(self.fields.get(&scope).cloned().unwrap_or_default())
    }

    fn add_field_def(&mut self, def: &FieldDef) -> Result<Registration> {
        let same = self.field_defs(def.scope())?;
        let other = self.field_defs(def.scope().other())?;
        let registration = check_definition(def, &same, &other)?;
        self.fields
            .entry(def.scope())
            .or_default()
            .insert(def.name().to_string(), def.value_type());
        Ok(registration)
    }

    fn remove_field_def(&mut self, name: &str, scope: Scope) -> Result<bool> {
        let removed = self
            .fields
            .get_mut(&scope)
            .and_then(|types| types.remove(name))
            .is_some();
        if removed && scope == Scope::Directory {
            for attrs in self.attributes.values_mut() {
                attrs.remove(name);
            }
        }
        Ok(removed)
    }

    fn own_attributes(&self, node: NodeId, fields: &[String]) -> Result<AttributeMap> {
        self.known(node)?;
        let Some(attrs) = self.attributes.get(&node) else {
            return Ok(AttributeMap::default());
        };
        Ok(fields
            .iter()
            .filter_map(|field| attrs.get(field).map(|value| (field.clone(), value.clone())))
            .collect())
    }

    fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.children
            .get(&node)
            .cloned()
            .ok_or_else(|| MetaQueryError::Store(format!("Unknown node {node}")))
    }

    fn parent(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.known(node)?;
        Ok(self.parents.get(&node).copied())
    }

    fn field_set(&self, name: &str) -> Result<Option<Conjunction>> {
        Ok(self.field_sets.get(name).cloned())
    }
}
