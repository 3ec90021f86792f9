// Definition graph: entity records and their positional handles

pub mod naming;
pub mod registry;

pub use registry::{Declaration, Graph, GraphCounts, GraphParts, Savepoint};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Positional handle into one of the graph's arenas.
///
/// A handle is the 0-based creation position of its entity, so handle
/// equality is identity and handle order is creation order.
pub trait EntityId: Copy + Eq + std::hash::Hash + fmt::Debug {
    fn index(self) -> usize;
    fn from_index(index: usize) -> Self;
}

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(u32);

            impl EntityId for $name {
                fn index(self) -> usize {
                    self.0 as usize
                }

                fn from_index(index: usize) -> Self {
                    Self(index as u32)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

entity_id!(
    /// Handle of a [`Module`]
    ModuleId,
    /// Handle of a [`Resource`]
    ResourceId,
    /// Handle of a [`Class`]
    ClassId,
    /// Handle of a [`Tag`]
    TagId,
    /// Handle of an [`Attribute`]
    AttributeId,
    /// Handle of a [`Definition`]
    DefinitionId,
    /// Handle of a [`Relationship`]
    RelationshipId,
    /// Handle of an [`Example`]
    ExampleId,
    /// Handle of a [`TagExample`]
    TagExampleId,
    /// Handle of a [`TagUsage`]
    TagUsageId,
    /// Handle of an [`AttributeExample`]
    AttributeExampleId,
    /// Handle of an [`AttributeUsage`]
    AttributeUsageId,
    /// Handle of an [`Issue`]
    IssueId,
);

/// A mod or official content pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub identifier: String,
    pub name: String,
    pub version: Option<String>,
    pub official: bool,
}

/// One analyzed definition file, relative to its module's definition directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub module: ModuleId,
    pub content_hash: Option<String>,
}

/// The element name of a top-level definition, e.g. `ThingDef`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Class {
    pub identifier: String,
    pub name: String,
    pub module: Option<ModuleId>,
}

/// A distinct element name, global across every definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub identifier: String,
    pub name: String,
    pub module: Option<ModuleId>,
}

/// A distinct XML attribute name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub identifier: String,
    pub name: String,
    pub module: Option<ModuleId>,
}

/// A declared content record.
///
/// The parent is a weak reference: `parent_name` is what the document
/// declared, `parent` is filled in once every definition is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub identifier: String,
    pub is_abstract: bool,
    pub parent_name: Option<String>,
    pub parent: Option<DefinitionId>,
    pub module: Option<ModuleId>,
    pub class: Option<ClassId>,
    pub resource: Option<ResourceId>,
}

impl Definition {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            is_abstract: false,
            parent_name: None,
            parent: None,
            module: None,
            class: None,
            resource: None,
        }
    }

    /// Whether the declared parent name failed to resolve
    pub fn is_dangling(&self) -> bool {
        self.parent_name.is_some() && self.parent.is_none()
    }
}

/// `child` was observed directly inside `parent`, itself reached through `context`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub parent: TagId,
    pub child: TagId,
    pub context: Option<TagId>,
}

/// A distinct literal value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub value: String,
}

/// A value observed for the child tag of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagExample {
    pub example: ExampleId,
    pub relationship: RelationshipId,
}

/// Links a tag example to a definition that exhibited it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagUsage {
    pub example: TagExampleId,
    pub definition: DefinitionId,
}

/// A value observed for an attribute on a given tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeExample {
    pub example: ExampleId,
    pub tag: TagId,
    pub attribute: AttributeId,
}

/// Links an attribute example to a definition that exhibited it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeUsage {
    pub example: AttributeExampleId,
    pub definition: DefinitionId,
}

/// Issue severity, numbered as written to exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Trace = 1,
    Debug = 2,
    Information = 3,
    Warning = 4,
    Error = 5,
    Critical = 6,
}

impl Severity {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Severity::Trace),
            2 => Some(Severity::Debug),
            3 => Some(Severity::Information),
            4 => Some(Severity::Warning),
            5 => Some(Severity::Error),
            6 => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic recorded during analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    pub module: Option<ModuleId>,
    pub resource: Option<ResourceId>,
    pub definition: Option<DefinitionId>,
    pub class: Option<ClassId>,
    pub tag: Option<TagId>,
    pub attribute: Option<AttributeId>,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            module: None,
            resource: None,
            definition: None,
            class: None,
            tag: None,
            attribute: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Prefix the message with a `[location]` marker
    pub fn at(mut self, location: &str) -> Self {
        self.message = format!("[{}] {}", location, self.message);
        self
    }

    pub fn with_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_definition(mut self, definition: DefinitionId) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn with_class(mut self, class: ClassId) -> Self {
        self.class = Some(class);
        self
    }
}
