// other maps keyed by field names use a fast non-cryptographic hasher
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::HashMap;

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use crate::datatype::{Scalar, Sentinel, ValueType};
use crate::error::{MetaQueryError, Result};

pub type FieldHasher = BuildHasherDefault<SeaHasher>;

/// Declared type per field name, for one scope.
pub type FieldTypes = HashMap<String, ValueType, FieldHasher>;

/// Concrete values of one node, keyed by field name.
pub type AttributeMap = HashMap<String, Scalar, FieldHasher>;

/// Names the catalog reserves for its own per-file bookkeeping.
pub const FILE_STANDARD_KEYS: [&str; 15] = [
    "SE",
    "CreationDate",
    "ModificationDate",
    "LastAccessDate",
    "User",
    "Group",
    "Path",
    "Name",
    "FileName",
    "CheckSum",
    "GUID",
    "UID",
    "GID",
    "Size",
    "Status",
];

lazy_static! {
    static ref FIELD_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Directory,
    File,
}

impl Scope {
    pub const fn other(self) -> Self {
        match self {
            Self::Directory => Self::File,
            Self::File => Self::Directory,
        }
    }
    pub const fn name(self) -> &'static str {
        match self {
            Self::Directory => "dir",
            Self::File => "file",
        }
    }
}

impl FromStr for Scope {
    type Err = MetaQueryError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dir" | "directory" => Ok(Self::Directory),
            "file" => Ok(Self::File),
            _ => Err(MetaQueryError::FieldDefinition(format!("Unknown scope '{s}'"))),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    value_type: ValueType,
    scope: Scope,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, value_type: ValueType, scope: Scope) -> Self {
        Self {
            name: name.into(),
            value_type,
            scope,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl fmt::Display for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} ({})", self.scope, self.name, self.value_type)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    Added,
    AlreadyExists,
}

pub fn is_reserved_word(name: &str) -> bool {
    matches!(name, "AND" | "OR" | "NOT") || Sentinel::recognize(name).is_some()
}

/// Decide whether `def` may be registered next to the fields already known
/// in its own scope and in the other scope.
pub fn check_definition(
    def: &FieldDef,
    same_scope: &FieldTypes,
    other_scope: &FieldTypes,
) -> Result<Registration> {
    if !FIELD_NAME.is_match(def.name()) || is_reserved_word(def.name()) {
        return Err(MetaQueryError::FieldDefinition(format!(
            "Illegal field name '{}'",
            def.name()
        )));
    }
    if def.scope() == Scope::File && FILE_STANDARD_KEYS.contains(&def.name()) {
        return Err(MetaQueryError::FieldDefinition(format!(
            "Illegal use of reserved field name '{}'",
            def.name()
        )));
    }
    if other_scope.contains_key(def.name()) {
        return Err(MetaQueryError::FieldDefinition(format!(
            "The field '{}' is already defined for scope {}",
            def.name(),
            def.scope().other()
        )));
    }
    match same_scope.get(def.name()) {
        Some(existing) if *existing == def.value_type() => Ok(Registration::AlreadyExists),
        Some(existing) => Err(MetaQueryError::FieldDefinition(format!(
            "Attempt to redefine '{}' with a different type: {}/{}",
            def.name(),
            def.value_type(),
            existing
        ))),
        None => Ok(Registration::Added),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(entries: &[(&str, ValueType)]) -> FieldTypes {
        entries
            .iter()
            .map(|(name, value_type)| (name.to_string(), *value_type))
            .collect()
    }

    #[test]
    fn redefinition_rules() {
        let dirs = types(&[("Run", ValueType::Int)]);
        let files = types(&[("Quality", ValueType::Float)]);
        let same = FieldDef::new("Run", ValueType::Int, Scope::Directory);
        assert_eq!(check_definition(&same, &dirs, &files), Ok(Registration::AlreadyExists));
        let retyped = FieldDef::new("Run", ValueType::String, Scope::Directory);
        assert!(check_definition(&retyped, &dirs, &files).is_err());
        let crossing = FieldDef::new("Quality", ValueType::Float, Scope::Directory);
        assert!(check_definition(&crossing, &dirs, &files).is_err());
        let fresh = FieldDef::new("Energy", ValueType::Float, Scope::Directory);
        assert_eq!(check_definition(&fresh, &dirs, &files), Ok(Registration::Added));
    }

    #[test]
    fn reserved_names_are_rejected() {
        let empty = FieldTypes::default();
        let size = FieldDef::new("Size", ValueType::Int, Scope::File);
        assert!(check_definition(&size, &empty, &empty).is_err());
        let missing = FieldDef::new("Missing", ValueType::String, Scope::Directory);
        assert!(check_definition(&missing, &empty, &empty).is_err());
        let spaced = FieldDef::new("two words", ValueType::String, Scope::Directory);
        assert!(check_definition(&spaced, &empty, &empty).is_err());
    }
}
