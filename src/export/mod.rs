// Compact JSON export: arrays in creation order, references as positions

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::ExportError;
use crate::graph::*;

/// Version written to the `format` field
pub const FORMAT: u32 = 1;

pub type ModuleRow = (String, String, Option<String>, bool);
pub type NamedRow = (String, String, Option<ModuleId>);
pub type DefinitionRow = (String, bool, Option<DefinitionId>, Option<ModuleId>, Option<ResourceId>);
pub type RelationshipRow = (Option<TagId>, Option<TagId>, Option<TagId>);
pub type TagExampleRow = (Option<ExampleId>, Option<RelationshipId>);
pub type TagUsageRow = (Option<TagExampleId>, Option<DefinitionId>);
pub type AttributeExampleRow = (Option<ExampleId>, Option<TagId>, Option<AttributeId>);
pub type AttributeUsageRow = (Option<AttributeExampleId>, Option<DefinitionId>);
pub type ResourceRow = (String, Option<ModuleId>);
pub type IssueRow = (u8, String);

/// The exported artifact.
///
/// Every array is ordered by creation, so a reference is the 0-based
/// position of its target in the array of the target's kind. Arrays must be
/// materialized in field order before references are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format: u32,
    pub size: GraphCounts,
    pub modules: Vec<ModuleRow>,
    pub classes: Vec<NamedRow>,
    pub tags: Vec<NamedRow>,
    pub definitions: Vec<DefinitionRow>,
    pub relationships: Vec<RelationshipRow>,
    pub examples: Vec<String>,
    #[serde(rename = "tag-examples")]
    pub tag_examples: Vec<TagExampleRow>,
    #[serde(rename = "tag-usage")]
    pub tag_usage: Vec<TagUsageRow>,
    pub attributes: Vec<NamedRow>,
    #[serde(rename = "attribute-examples")]
    pub attribute_examples: Vec<AttributeExampleRow>,
    #[serde(rename = "attribute-usage")]
    pub attribute_usage: Vec<AttributeUsageRow>,
    pub resources: Vec<ResourceRow>,
    pub issues: Vec<IssueRow>,
}

impl ExportDocument {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            format: FORMAT,
            size: graph.counts(),
            modules: graph
                .modules()
                .iter()
                .map(|m| (m.identifier.clone(), m.name.clone(), m.version.clone(), m.official))
                .collect(),
            classes: graph
                .classes()
                .iter()
                .map(|c| (c.identifier.clone(), c.name.clone(), c.module))
                .collect(),
            tags: graph
                .tags()
                .iter()
                .map(|t| (t.identifier.clone(), t.name.clone(), t.module))
                .collect(),
            definitions: graph
                .definitions()
                .iter()
                .map(|d| (d.identifier.clone(), d.is_abstract, d.parent, d.module, d.resource))
                .collect(),
            relationships: graph
                .relationships()
                .iter()
                .map(|r| (Some(r.parent), Some(r.child), r.context))
                .collect(),
            examples: graph.examples().iter().map(|e| e.value.clone()).collect(),
            tag_examples: graph
                .tag_examples()
                .iter()
                .map(|e| (Some(e.example), Some(e.relationship)))
                .collect(),
            tag_usage: graph
                .tag_usage()
                .iter()
                .map(|u| (Some(u.example), Some(u.definition)))
                .collect(),
            attributes: graph
                .attributes()
                .iter()
                .map(|a| (a.identifier.clone(), a.name.clone(), a.module))
                .collect(),
            attribute_examples: graph
                .attribute_examples()
                .iter()
                .map(|e| (Some(e.example), Some(e.tag), Some(e.attribute)))
                .collect(),
            attribute_usage: graph
                .attribute_usage()
                .iter()
                .map(|u| (Some(u.example), Some(u.definition)))
                .collect(),
            resources: graph
                .resources()
                .iter()
                .map(|r| (r.path.clone(), Some(r.module)))
                .collect(),
            issues: graph
                .issues()
                .iter()
                .map(|i| (i.severity.as_byte(), i.message.clone()))
                .collect(),
        }
    }

    pub fn write<W: Write>(&self, writer: W, pretty: bool) -> Result<(), ExportError> {
        if pretty {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            serde_json::to_writer(writer, self)?;
        }
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ExportError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn parse(text: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Rebuild a graph, validating every reference.
    ///
    /// Only what the format carries comes back: definitions lose their
    /// class, resources their content hash and issues their references.
    pub fn into_graph(self) -> Result<Graph, ExportError> {
        if self.format != FORMAT {
            return Err(ExportError::UnsupportedFormat(self.format));
        }

        let modules: Vec<Module> = self
            .modules
            .into_iter()
            .map(|(identifier, name, version, official)| Module {
                identifier,
                name,
                version,
                official,
            })
            .collect();

        let resources: Vec<Resource> = self
            .resources
            .into_iter()
            .enumerate()
            .map(|(index, (path, module))| {
                Ok(Resource {
                    path,
                    module: required(module, "resources", index, "module")?,
                    content_hash: None,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let parent_names: Vec<String> = self.definitions.iter().map(|row| row.0.clone()).collect();
        let definitions: Vec<Definition> = self
            .definitions
            .into_iter()
            .map(|(identifier, is_abstract, parent, module, resource)| Definition {
                identifier,
                is_abstract,
                parent_name: parent.and_then(|id| parent_names.get(id.index()).cloned()),
                parent,
                module,
                class: None,
                resource,
            })
            .collect();

        let relationships: Vec<Relationship> = self
            .relationships
            .into_iter()
            .enumerate()
            .map(|(index, (parent, child, context))| {
                Ok(Relationship {
                    parent: required(parent, "relationships", index, "parent")?,
                    child: required(child, "relationships", index, "child")?,
                    context,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let tag_examples: Vec<TagExample> = self
            .tag_examples
            .into_iter()
            .enumerate()
            .map(|(index, (example, relationship))| {
                Ok(TagExample {
                    example: required(example, "tag-examples", index, "example")?,
                    relationship: required(relationship, "tag-examples", index, "relationship")?,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let tag_usage: Vec<TagUsage> = self
            .tag_usage
            .into_iter()
            .enumerate()
            .map(|(index, (example, definition))| {
                Ok(TagUsage {
                    example: required(example, "tag-usage", index, "example")?,
                    definition: required(definition, "tag-usage", index, "definition")?,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let attribute_examples: Vec<AttributeExample> = self
            .attribute_examples
            .into_iter()
            .enumerate()
            .map(|(index, (example, tag, attribute))| {
                Ok(AttributeExample {
                    example: required(example, "attribute-examples", index, "example")?,
                    tag: required(tag, "attribute-examples", index, "tag")?,
                    attribute: required(attribute, "attribute-examples", index, "attribute")?,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let attribute_usage: Vec<AttributeUsage> = self
            .attribute_usage
            .into_iter()
            .enumerate()
            .map(|(index, (example, definition))| {
                Ok(AttributeUsage {
                    example: required(example, "attribute-usage", index, "example")?,
                    definition: required(definition, "attribute-usage", index, "definition")?,
                })
            })
            .collect::<Result<_, ExportError>>()?;

        let issues: Vec<Issue> = self
            .issues
            .into_iter()
            .enumerate()
            .map(|(index, (severity, message))| {
                let severity = Severity::from_byte(severity).ok_or(ExportError::UnknownSeverity { index, severity })?;
                Ok(Issue::new(severity, message))
            })
            .collect::<Result<_, ExportError>>()?;

        let parts = GraphParts {
            modules,
            resources,
            classes: named_rows(self.classes, |identifier, name, module| Class { identifier, name, module }),
            tags: named_rows(self.tags, |identifier, name, module| Tag { identifier, name, module }),
            attributes: named_rows(self.attributes, |identifier, name, module| Attribute {
                identifier,
                name,
                module,
            }),
            definitions,
            relationships,
            examples: self.examples.into_iter().map(|value| Example { value }).collect(),
            tag_examples,
            tag_usage,
            attribute_examples,
            attribute_usage,
            issues,
        };

        Ok(Graph::from_parts(parts)?)
    }
}

fn required<I>(reference: Option<I>, kind: &'static str, index: usize, field: &'static str) -> Result<I, ExportError> {
    reference.ok_or(ExportError::MissingReference { kind, index, field })
}

fn named_rows<T>(rows: Vec<NamedRow>, build: impl Fn(String, String, Option<ModuleId>) -> T) -> Vec<T> {
    rows.into_iter()
        .map(|(identifier, name, module)| build(identifier, name, module))
        .collect()
}

/// Write the compact export of a graph
pub fn export<W: Write>(graph: &Graph, writer: W) -> Result<(), ExportError> {
    ExportDocument::from_graph(graph).write(writer, false)
}

pub fn to_string(graph: &Graph) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&ExportDocument::from_graph(graph))?)
}

/// Read an export back into a graph
pub fn import<R: Read>(reader: R) -> Result<Graph, ExportError> {
    ExportDocument::from_reader(reader)?.into_graph()
}
