//! Schema types and builders for tfplug
//!
//! This module provides the schema system for defining provider, resource
//! and data source schemas. Besides describing attributes, a schema can
//! validate a configuration and coerce it to the declared types the same
//! way Terraform core does before a provider sees it.

use crate::types::{format_number, AttributePath, Diagnostic, Dynamic, DynamicValue};
use std::collections::BTreeMap;

/// AttributeType defines the type system for Terraform attributes
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Number, // Always f64
    Bool,
    List(Box<AttributeType>),                // Ordered, allows duplicates
    Set(Box<AttributeType>),                 // Unordered, no duplicates
    Map(Box<AttributeType>),                 // String keys only
    Object(BTreeMap<String, AttributeType>), // Fixed structure
}

impl AttributeType {
    fn describe(&self) -> String {
        match self {
            AttributeType::String => "string".to_string(),
            AttributeType::Number => "number".to_string(),
            AttributeType::Bool => "bool".to_string(),
            AttributeType::List(inner) => format!("list of {}", inner.describe()),
            AttributeType::Set(inner) => format!("set of {}", inner.describe()),
            AttributeType::Map(inner) => format!("map of {}", inner.describe()),
            AttributeType::Object(_) => "object".to_string(),
        }
    }

    /// Convert a value to this type using Terraform's implicit conversions
    /// (number and bool to string, numeric strings to number). Returns `None`
    /// when no conversion exists.
    pub fn coerce(&self, value: &Dynamic) -> Option<Dynamic> {
        match (self, value) {
            (_, Dynamic::Null) | (_, Dynamic::Unknown) => Some(value.clone()),
            (AttributeType::String, Dynamic::String(_)) => Some(value.clone()),
            (AttributeType::String, Dynamic::Number(n)) => Some(Dynamic::String(format_number(*n))),
            (AttributeType::String, Dynamic::Bool(b)) => Some(Dynamic::String(b.to_string())),
            (AttributeType::Number, Dynamic::Number(_)) => Some(value.clone()),
            (AttributeType::Number, Dynamic::String(s)) => s.parse::<f64>().ok().map(Dynamic::Number),
            (AttributeType::Bool, Dynamic::Bool(_)) => Some(value.clone()),
            (AttributeType::Bool, Dynamic::String(s)) => s.parse::<bool>().ok().map(Dynamic::Bool),
            (AttributeType::List(inner) | AttributeType::Set(inner), Dynamic::List(items)) => items
                .iter()
                .map(|item| inner.coerce(item))
                .collect::<Option<Vec<_>>>()
                .map(Dynamic::List),
            (AttributeType::Map(inner), Dynamic::Map(entries)) => entries
                .iter()
                .map(|(k, v)| inner.coerce(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Dynamic::Map),
            (AttributeType::Object(fields), Dynamic::Map(entries)) => {
                if entries.keys().any(|k| !fields.contains_key(k)) {
                    return None;
                }
                fields
                    .iter()
                    .map(|(k, ty)| {
                        let v = entries.get(k).cloned().unwrap_or(Dynamic::Null);
                        ty.coerce(&v).map(|v| (k.clone(), v))
                    })
                    .collect::<Option<BTreeMap<_, _>>>()
                    .map(Dynamic::Map)
            }
            _ => None,
        }
    }
}

/// Schema is returned by providers/resources/data sources
/// Version is used for state migration
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: i64,
    pub block: Block,
}

/// Block represents a configuration block
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub attributes: Vec<Attribute>,
    pub block_types: Vec<NestedBlock>,
    pub description: String,
    pub deprecated: bool,
}

/// Attribute represents a single configuration attribute
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub r#type: AttributeType,
    pub description: String,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub deprecated: bool,
}

impl Attribute {
    /// Computed attributes that the practitioner may not set
    pub fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// NestedBlock represents a nested configuration block such as `filter { ... }`
#[derive(Debug, Clone)]
pub struct NestedBlock {
    pub type_name: String,
    pub block: Block,
    pub nesting: NestingMode,
    pub min_items: usize,
    /// Zero means unlimited
    pub max_items: usize,
}

/// NestingMode defines how nested blocks are structured in a value:
/// `Single` is an object, `List` is a list of objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingMode {
    Single,
    List,
}

impl Block {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn nested_block(&self, name: &str) -> Option<&NestedBlock> {
        self.block_types.iter().find(|b| b.type_name == name)
    }

    /// Validate a configuration object against this block
    pub fn validate(&self, value: &Dynamic, path: &AttributePath) -> Vec<Diagnostic> {
        let mut diagnostics = vec![];

        let entries = match value {
            Dynamic::Map(entries) => entries,
            Dynamic::Null => return diagnostics,
            other => {
                diagnostics.push(
                    Diagnostic::error(
                        "Invalid block",
                        format!("expected an object, got {}", other.type_name()),
                    )
                    .with_attribute(path.clone()),
                );
                return diagnostics;
            }
        };

        for key in entries.keys() {
            if self.attribute(key).is_none() && self.nested_block(key).is_none() {
                diagnostics.push(
                    Diagnostic::error(
                        "Unsupported argument",
                        format!("An argument named {:?} is not expected here", key),
                    )
                    .with_attribute(child_path(path, key)),
                );
            }
        }

        for attr in &self.attributes {
            let attr_path = child_path(path, &attr.name);
            let value = entries.get(&attr.name).unwrap_or(&Dynamic::Null);

            if value.is_null() {
                if attr.required {
                    diagnostics.push(
                        Diagnostic::error(
                            "Missing required argument",
                            format!("The argument {:?} is required", attr.name),
                        )
                        .with_attribute(attr_path),
                    );
                }
                continue;
            }

            if attr.is_read_only() {
                diagnostics.push(
                    Diagnostic::error(
                        "Value for unconfigurable attribute",
                        format!("Can't configure a value for {:?}: its value will be decided automatically", attr.name),
                    )
                    .with_attribute(attr_path),
                );
                continue;
            }

            if attr.r#type.coerce(value).is_none() {
                diagnostics.push(
                    Diagnostic::error(
                        "Incorrect attribute value type",
                        format!(
                            "{:?} requires a {}, got {}",
                            attr.name,
                            attr.r#type.describe(),
                            value.type_name()
                        ),
                    )
                    .with_attribute(attr_path),
                );
            }
        }

        for nested in &self.block_types {
            let nested_path = child_path(path, &nested.type_name);
            let value = entries.get(&nested.type_name).unwrap_or(&Dynamic::Null);
            diagnostics.extend(nested.validate(value, &nested_path));
        }

        diagnostics
    }

    /// Convert configured values to their declared types. Attributes that are
    /// not set are filled with null so providers see the full object.
    pub fn coerce(&self, value: &Dynamic) -> Dynamic {
        let Dynamic::Map(entries) = value else {
            return value.clone();
        };

        let mut out = BTreeMap::new();
        for attr in &self.attributes {
            let raw = entries.get(&attr.name).unwrap_or(&Dynamic::Null);
            let converted = attr.r#type.coerce(raw).unwrap_or_else(|| raw.clone());
            out.insert(attr.name.clone(), converted);
        }
        for nested in &self.block_types {
            let raw = entries.get(&nested.type_name).unwrap_or(&Dynamic::Null);
            let converted = match (nested.nesting, raw) {
                (NestingMode::List, Dynamic::List(items)) => {
                    Dynamic::List(items.iter().map(|item| nested.block.coerce(item)).collect())
                }
                (NestingMode::List, Dynamic::Null) => Dynamic::List(vec![]),
                (NestingMode::Single, Dynamic::Map(_)) => nested.block.coerce(raw),
                _ => raw.clone(),
            };
            out.insert(nested.type_name.clone(), converted);
        }
        Dynamic::Map(out)
    }
}

impl NestedBlock {
    fn validate(&self, value: &Dynamic, path: &AttributePath) -> Vec<Diagnostic> {
        let items: Vec<&Dynamic> = match (self.nesting, value) {
            (_, Dynamic::Null) => vec![],
            (NestingMode::Single, Dynamic::Map(_)) => vec![value],
            (NestingMode::List, Dynamic::List(items)) => items.iter().collect(),
            (_, other) => {
                return vec![Diagnostic::error(
                    "Invalid block",
                    format!("block {:?} cannot be a {}", self.type_name, other.type_name()),
                )
                .with_attribute(path.clone())];
            }
        };

        let mut diagnostics = vec![];
        if items.len() < self.min_items {
            diagnostics.push(
                Diagnostic::error(
                    "Insufficient blocks",
                    format!(
                        "At least {} {:?} block(s) are required",
                        self.min_items, self.type_name
                    ),
                )
                .with_attribute(path.clone()),
            );
        }
        if self.max_items > 0 && items.len() > self.max_items {
            diagnostics.push(
                Diagnostic::error(
                    "Too many blocks",
                    format!(
                        "No more than {} {:?} block(s) are allowed",
                        self.max_items, self.type_name
                    ),
                )
                .with_attribute(path.clone()),
            );
        }

        for (idx, item) in items.into_iter().enumerate() {
            let item_path = match self.nesting {
                NestingMode::Single => path.clone(),
                NestingMode::List => path.clone().index(idx as i64),
            };
            diagnostics.extend(self.block.validate(item, &item_path));
        }
        diagnostics
    }
}

fn child_path(parent: &AttributePath, name: &str) -> AttributePath {
    parent.clone().attribute(name)
}

impl Schema {
    pub fn validate(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        self.block.validate(&config.value, &AttributePath::root())
    }

    pub fn coerce(&self, config: &DynamicValue) -> DynamicValue {
        DynamicValue::new(self.block.coerce(&config.value))
    }

    /// Planned state for a new object: the coerced config with every
    /// unset computed attribute marked unknown
    pub fn plan(&self, config: &DynamicValue) -> DynamicValue {
        let mut planned = self.coerce(config);
        if let Dynamic::Map(entries) = &mut planned.value {
            for attr in self.block.attributes.iter().filter(|a| a.computed) {
                let entry = entries.entry(attr.name.clone()).or_insert(Dynamic::Null);
                if entry.is_null() {
                    *entry = Dynamic::Unknown;
                }
            }
        }
        planned
    }
}

/// AttributeBuilder provides fluent API for building attributes
pub struct AttributeBuilder {
    attribute: Attribute,
}

impl AttributeBuilder {
    pub fn new(name: &str, attr_type: AttributeType) -> Self {
        Self {
            attribute: Attribute {
                name: name.to_string(),
                r#type: attr_type,
                description: String::new(),
                required: false,
                optional: false,
                computed: false,
                sensitive: false,
                deprecated: false,
            },
        }
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.attribute.description = desc.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.attribute.required = true;
        self.attribute.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.attribute.optional = true;
        self.attribute.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.attribute.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.attribute.sensitive = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.attribute.deprecated = true;
        self
    }

    pub fn build(self) -> Attribute {
        self.attribute
    }
}

/// NestedBlockBuilder builds `filter { ... }` style blocks
pub struct NestedBlockBuilder {
    nested: NestedBlock,
}

impl NestedBlockBuilder {
    pub fn new(type_name: &str, nesting: NestingMode) -> Self {
        Self {
            nested: NestedBlock {
                type_name: type_name.to_string(),
                block: Block::default(),
                nesting,
                min_items: 0,
                max_items: 0,
            },
        }
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.nested.block.description = desc.to_string();
        self
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.nested.block.attributes.push(attr);
        self
    }

    pub fn block(mut self, block: NestedBlock) -> Self {
        self.nested.block.block_types.push(block);
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.nested.min_items = min;
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.nested.max_items = max;
        self
    }

    pub fn build(self) -> NestedBlock {
        self.nested
    }
}

/// SchemaBuilder provides fluent API for building schemas
/// ALWAYS use this for consistency
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: Schema {
                version: 0,
                block: Block::default(),
            },
        }
    }

    pub fn version(mut self, version: i64) -> Self {
        self.schema.version = version;
        self
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.schema.block.attributes.push(attr);
        self
    }

    pub fn block(mut self, block: NestedBlock) -> Self {
        self.schema.block.block_types.push(block);
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.schema.block.description = desc.to_string();
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.schema.block.deprecated = true;
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
