// Identity registry: one canonical entity per key, created on first reference

use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use super::naming;
use super::*;
use crate::error::GraphError;

/// Result of declaring a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    Created(DefinitionId),
    Existing(DefinitionId),
}

impl Declaration {
    pub fn id(self) -> DefinitionId {
        match self {
            Declaration::Created(id) | Declaration::Existing(id) => id,
        }
    }
}

/// Arena lengths at a point in time; see [`Graph::rollback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    modules: usize,
    resources: usize,
    classes: usize,
    tags: usize,
    attributes: usize,
    definitions: usize,
    relationships: usize,
    examples: usize,
    tag_examples: usize,
    tag_usage: usize,
    attribute_examples: usize,
    attribute_usage: usize,
    issues: usize,
}

/// Row counts per entity kind, keyed the way exports name them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    pub modules: usize,
    pub classes: usize,
    pub tags: usize,
    pub definitions: usize,
    pub relationships: usize,
    pub examples: usize,
    #[serde(rename = "tag-examples")]
    pub tag_examples: usize,
    #[serde(rename = "tag-usage")]
    pub tag_usage: usize,
    pub attributes: usize,
    #[serde(rename = "attribute-examples")]
    pub attribute_examples: usize,
    #[serde(rename = "attribute-usage")]
    pub attribute_usage: usize,
    pub resources: usize,
    pub issues: usize,
}

/// Every arena of a graph, in creation order.
///
/// Used to move a graph in and out of storage; [`Graph::from_parts`]
/// validates keys and references before rebuilding the identity maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphParts {
    pub modules: Vec<Module>,
    pub resources: Vec<Resource>,
    pub classes: Vec<Class>,
    pub tags: Vec<Tag>,
    pub attributes: Vec<Attribute>,
    pub definitions: Vec<Definition>,
    pub relationships: Vec<Relationship>,
    pub examples: Vec<Example>,
    pub tag_examples: Vec<TagExample>,
    pub tag_usage: Vec<TagUsage>,
    pub attribute_examples: Vec<AttributeExample>,
    pub attribute_usage: Vec<AttributeUsage>,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Default)]
struct Identities {
    modules: HashMap<String, ModuleId>,
    resources: HashMap<(ModuleId, String), ResourceId>,
    classes: HashMap<String, ClassId>,
    tags: HashMap<String, TagId>,
    attributes: HashMap<String, AttributeId>,
    definitions: HashMap<String, DefinitionId>,
    relationships: HashMap<Relationship, RelationshipId>,
    examples: HashMap<String, ExampleId>,
    tag_examples: HashMap<TagExample, TagExampleId>,
    tag_usage: HashMap<TagUsage, TagUsageId>,
    attribute_examples: HashMap<AttributeExample, AttributeExampleId>,
    attribute_usage: HashMap<AttributeUsage, AttributeUsageId>,
}

/// The definition graph.
///
/// Each entity kind lives in an append-only arena paired with an identity
/// map from its key to its handle. Entities are never removed except by
/// rolling back to a [`Savepoint`].
#[derive(Debug, Clone, Default)]
pub struct Graph {
    parts: GraphParts,
    identities: Identities,
}

fn get_or_create<K, I, T>(
    identities: &mut HashMap<K, I>,
    rows: &mut Vec<T>,
    key: K,
    create: impl FnOnce() -> T,
) -> (I, bool)
where
    K: Eq + Hash,
    I: EntityId,
{
    match identities.entry(key) {
        Entry::Occupied(entry) => (*entry.get(), false),
        Entry::Vacant(entry) => {
            let id = I::from_index(rows.len());
            rows.push(create());
            entry.insert(id);
            (id, true)
        }
    }
}

fn unwind<K, I, T>(identities: &mut HashMap<K, I>, rows: &mut Vec<T>, len: usize, key: impl Fn(&T) -> K)
where
    K: Eq + Hash,
{
    for row in rows.drain(len..) {
        identities.remove(&key(&row));
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // Modules and resources

    pub fn get_or_create_module(&mut self, identifier: &str) -> ModuleId {
        let identifier = identifier.trim();
        get_or_create(&mut self.identities.modules, &mut self.parts.modules, identifier.to_string(), || Module {
            identifier: identifier.to_string(),
            name: identifier.to_string(),
            version: None,
            official: false,
        })
        .0
    }

    /// Module metadata is the only state set after creation, once per module
    pub fn describe_module(&mut self, id: ModuleId, name: Option<String>, version: Option<String>, official: bool) {
        let module = &mut self.parts.modules[id.index()];
        if let Some(name) = name {
            module.name = name;
        }
        module.version = version;
        module.official = official;
    }

    pub fn find_module(&self, identifier: &str) -> Option<ModuleId> {
        self.identities.modules.get(identifier.trim()).copied()
    }

    pub fn get_or_create_resource(&mut self, module: ModuleId, path: &str, content_hash: Option<String>) -> ResourceId {
        get_or_create(
            &mut self.identities.resources,
            &mut self.parts.resources,
            (module, path.to_string()),
            || Resource { path: path.to_string(), module, content_hash },
        )
        .0
    }

    pub fn find_resource(&self, module: ModuleId, path: &str) -> Option<ResourceId> {
        self.identities.resources.get(&(module, path.to_string())).copied()
    }

    // Classes, tags and attributes

    /// `module` is recorded only when the class is created
    pub fn get_or_create_class(&mut self, identifier: &str, module: Option<ModuleId>) -> ClassId {
        let identifier = identifier.trim();
        get_or_create(&mut self.identities.classes, &mut self.parts.classes, identifier.to_string(), || Class {
            identifier: identifier.to_string(),
            name: naming::class_name(identifier),
            module,
        })
        .0
    }

    pub fn find_class(&self, identifier: &str) -> Option<ClassId> {
        self.identities.classes.get(identifier.trim()).copied()
    }

    pub fn get_or_create_tag(&mut self, identifier: &str, module: Option<ModuleId>) -> TagId {
        let identifier = identifier.trim();
        get_or_create(&mut self.identities.tags, &mut self.parts.tags, identifier.to_string(), || Tag {
            identifier: identifier.to_string(),
            name: naming::tag_name(identifier),
            module,
        })
        .0
    }

    pub fn find_tag(&self, identifier: &str) -> Option<TagId> {
        self.identities.tags.get(identifier.trim()).copied()
    }

    pub fn get_or_create_attribute(&mut self, identifier: &str, module: Option<ModuleId>) -> AttributeId {
        let identifier = identifier.trim();
        get_or_create(
            &mut self.identities.attributes,
            &mut self.parts.attributes,
            identifier.to_string(),
            || Attribute {
                identifier: identifier.to_string(),
                name: naming::attribute_name(identifier),
                module,
            },
        )
        .0
    }

    pub fn find_attribute(&self, identifier: &str) -> Option<AttributeId> {
        self.identities.attributes.get(identifier.trim()).copied()
    }

    // Definitions

    /// Register a definition unless one with the same identifier exists.
    ///
    /// An existing definition keeps the fields of its first declaration.
    pub fn declare_definition(&mut self, definition: Definition) -> Declaration {
        let key = definition.identifier.trim().to_string();
        let (id, created) = get_or_create(
            &mut self.identities.definitions,
            &mut self.parts.definitions,
            key.clone(),
            || Definition { identifier: key, ..definition },
        );
        if created {
            Declaration::Created(id)
        } else {
            Declaration::Existing(id)
        }
    }

    pub fn find_definition(&self, identifier: &str) -> Option<DefinitionId> {
        self.identities.definitions.get(identifier.trim()).copied()
    }

    /// Resolve every definition's parent name against the known definitions.
    ///
    /// Returns the definitions whose parent name matched nothing.
    pub fn resolve_references(&mut self) -> Vec<DefinitionId> {
        let mut dangling = Vec::new();
        for (index, definition) in self.parts.definitions.iter_mut().enumerate() {
            let Some(parent_name) = definition.parent_name.as_deref() else {
                continue;
            };
            definition.parent = self.identities.definitions.get(parent_name).copied();
            if definition.parent.is_none() {
                dangling.push(DefinitionId::from_index(index));
            }
        }
        dangling
    }

    // Relationships, examples and usage

    pub fn get_or_create_relationship(&mut self, parent: TagId, child: TagId, context: Option<TagId>) -> RelationshipId {
        let relationship = Relationship { parent, child, context };
        get_or_create(&mut self.identities.relationships, &mut self.parts.relationships, relationship, || relationship).0
    }

    pub fn find_relationship(&self, parent: TagId, child: TagId, context: Option<TagId>) -> Option<RelationshipId> {
        self.identities.relationships.get(&Relationship { parent, child, context }).copied()
    }

    pub fn get_or_create_example(&mut self, value: &str) -> ExampleId {
        get_or_create(&mut self.identities.examples, &mut self.parts.examples, value.to_string(), || Example {
            value: value.to_string(),
        })
        .0
    }

    pub fn find_example(&self, value: &str) -> Option<ExampleId> {
        self.identities.examples.get(value).copied()
    }

    pub fn get_or_create_tag_example(&mut self, relationship: RelationshipId, example: ExampleId) -> TagExampleId {
        let row = TagExample { example, relationship };
        get_or_create(&mut self.identities.tag_examples, &mut self.parts.tag_examples, row, || row).0
    }

    pub fn get_or_create_tag_usage(&mut self, example: TagExampleId, definition: DefinitionId) -> TagUsageId {
        let row = TagUsage { example, definition };
        get_or_create(&mut self.identities.tag_usage, &mut self.parts.tag_usage, row, || row).0
    }

    pub fn get_or_create_attribute_example(
        &mut self,
        attribute: AttributeId,
        tag: TagId,
        example: ExampleId,
    ) -> AttributeExampleId {
        let row = AttributeExample { example, tag, attribute };
        get_or_create(&mut self.identities.attribute_examples, &mut self.parts.attribute_examples, row, || row).0
    }

    pub fn get_or_create_attribute_usage(
        &mut self,
        example: AttributeExampleId,
        definition: DefinitionId,
    ) -> AttributeUsageId {
        let row = AttributeUsage { example, definition };
        get_or_create(&mut self.identities.attribute_usage, &mut self.parts.attribute_usage, row, || row).0
    }

    /// Definitions linked to a tag example
    pub fn tag_example_definitions(&self, example: TagExampleId) -> impl Iterator<Item = DefinitionId> + '_ {
        self.parts
            .tag_usage
            .iter()
            .filter(move |usage| usage.example == example)
            .map(|usage| usage.definition)
    }

    /// Definitions linked to an attribute example
    pub fn attribute_example_definitions(
        &self,
        example: AttributeExampleId,
    ) -> impl Iterator<Item = DefinitionId> + '_ {
        self.parts
            .attribute_usage
            .iter()
            .filter(move |usage| usage.example == example)
            .map(|usage| usage.definition)
    }

    // Issues

    pub fn record_issue(&mut self, issue: Issue) -> IssueId {
        let id = IssueId::from_index(self.parts.issues.len());
        self.parts.issues.push(issue);
        id
    }

    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &Issue> + '_ {
        self.parts.issues.iter().filter(move |issue| issue.severity == severity)
    }

    // Unit of work

    pub fn savepoint(&self) -> Savepoint {
        let parts = &self.parts;
        Savepoint {
            modules: parts.modules.len(),
            resources: parts.resources.len(),
            classes: parts.classes.len(),
            tags: parts.tags.len(),
            attributes: parts.attributes.len(),
            definitions: parts.definitions.len(),
            relationships: parts.relationships.len(),
            examples: parts.examples.len(),
            tag_examples: parts.tag_examples.len(),
            tag_usage: parts.tag_usage.len(),
            attribute_examples: parts.attribute_examples.len(),
            attribute_usage: parts.attribute_usage.len(),
            issues: parts.issues.len(),
        }
    }

    /// Discard everything created since `savepoint`.
    ///
    /// Arenas only ever grow, so truncating them and forgetting the keys of
    /// the dropped rows restores the exact prior state.
    pub fn rollback(&mut self, savepoint: Savepoint) {
        let (parts, ids) = (&mut self.parts, &mut self.identities);

        unwind(&mut ids.attribute_usage, &mut parts.attribute_usage, savepoint.attribute_usage, |row| *row);
        unwind(&mut ids.attribute_examples, &mut parts.attribute_examples, savepoint.attribute_examples, |row| *row);
        unwind(&mut ids.tag_usage, &mut parts.tag_usage, savepoint.tag_usage, |row| *row);
        unwind(&mut ids.tag_examples, &mut parts.tag_examples, savepoint.tag_examples, |row| *row);
        unwind(&mut ids.examples, &mut parts.examples, savepoint.examples, |row| row.value.clone());
        unwind(&mut ids.relationships, &mut parts.relationships, savepoint.relationships, |row| *row);
        unwind(&mut ids.definitions, &mut parts.definitions, savepoint.definitions, |row| row.identifier.clone());
        unwind(&mut ids.attributes, &mut parts.attributes, savepoint.attributes, |row| row.identifier.clone());
        unwind(&mut ids.tags, &mut parts.tags, savepoint.tags, |row| row.identifier.clone());
        unwind(&mut ids.classes, &mut parts.classes, savepoint.classes, |row| row.identifier.clone());
        unwind(&mut ids.resources, &mut parts.resources, savepoint.resources, |row| (row.module, row.path.clone()));
        unwind(&mut ids.modules, &mut parts.modules, savepoint.modules, |row| row.identifier.clone());
        parts.issues.truncate(savepoint.issues);
    }

    // Read access

    pub fn modules(&self) -> &[Module] {
        &self.parts.modules
    }

    pub fn resources(&self) -> &[Resource] {
        &self.parts.resources
    }

    pub fn classes(&self) -> &[Class] {
        &self.parts.classes
    }

    pub fn tags(&self) -> &[Tag] {
        &self.parts.tags
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.parts.attributes
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.parts.definitions
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.parts.relationships
    }

    pub fn examples(&self) -> &[Example] {
        &self.parts.examples
    }

    pub fn tag_examples(&self) -> &[TagExample] {
        &self.parts.tag_examples
    }

    pub fn tag_usage(&self) -> &[TagUsage] {
        &self.parts.tag_usage
    }

    pub fn attribute_examples(&self) -> &[AttributeExample] {
        &self.parts.attribute_examples
    }

    pub fn attribute_usage(&self) -> &[AttributeUsage] {
        &self.parts.attribute_usage
    }

    pub fn issues(&self) -> &[Issue] {
        &self.parts.issues
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.parts.modules[id.index()]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.parts.resources[id.index()]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.parts.classes[id.index()]
    }

    pub fn tag(&self, id: TagId) -> &Tag {
        &self.parts.tags[id.index()]
    }

    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        &self.parts.attributes[id.index()]
    }

    pub fn definition(&self, id: DefinitionId) -> &Definition {
        &self.parts.definitions[id.index()]
    }

    pub fn relationship(&self, id: RelationshipId) -> &Relationship {
        &self.parts.relationships[id.index()]
    }

    pub fn example(&self, id: ExampleId) -> &Example {
        &self.parts.examples[id.index()]
    }

    pub fn tag_example(&self, id: TagExampleId) -> &TagExample {
        &self.parts.tag_examples[id.index()]
    }

    pub fn attribute_example(&self, id: AttributeExampleId) -> &AttributeExample {
        &self.parts.attribute_examples[id.index()]
    }

    /// `module/path` location string of a resource
    pub fn location_of(&self, id: ResourceId) -> String {
        let resource = self.resource(id);
        format!("{}/{}", self.module(resource.module).identifier, resource.path)
    }

    /// C#-style declaration of a definition, e.g. `abstract ThingDef Wall: BuildingBase`
    pub fn declaration_of(&self, id: DefinitionId) -> String {
        let definition = self.definition(id);
        let mut result = String::with_capacity(64);
        if definition.is_abstract {
            result.push_str("abstract ");
        }
        match definition.class {
            Some(class) => result.push_str(&self.class(class).identifier),
            None => result.push_str("<unknown>"),
        }
        result.push(' ');
        result.push_str(&definition.identifier);
        if let Some(parent) = &definition.parent_name {
            result.push_str(": ");
            result.push_str(parent);
        }
        result
    }

    pub fn counts(&self) -> GraphCounts {
        let parts = &self.parts;
        GraphCounts {
            modules: parts.modules.len(),
            classes: parts.classes.len(),
            tags: parts.tags.len(),
            definitions: parts.definitions.len(),
            relationships: parts.relationships.len(),
            examples: parts.examples.len(),
            tag_examples: parts.tag_examples.len(),
            tag_usage: parts.tag_usage.len(),
            attributes: parts.attributes.len(),
            attribute_examples: parts.attribute_examples.len(),
            attribute_usage: parts.attribute_usage.len(),
            resources: parts.resources.len(),
            issues: parts.issues.len(),
        }
    }

    pub fn parts(&self) -> &GraphParts {
        &self.parts
    }

    pub fn into_parts(self) -> GraphParts {
        self.parts
    }

    /// Rebuild a graph from stored arenas, rejecting duplicate keys and
    /// references that point outside their target arena.
    pub fn from_parts(parts: GraphParts) -> Result<Self, GraphError> {
        validate_references(&parts)?;

        let mut ids = Identities::default();
        index_rows(&mut ids.modules, &parts.modules, "modules", |row| row.identifier.clone())?;
        index_rows(&mut ids.resources, &parts.resources, "resources", |row| (row.module, row.path.clone()))?;
        index_rows(&mut ids.classes, &parts.classes, "classes", |row| row.identifier.clone())?;
        index_rows(&mut ids.tags, &parts.tags, "tags", |row| row.identifier.clone())?;
        index_rows(&mut ids.attributes, &parts.attributes, "attributes", |row| row.identifier.clone())?;
        index_rows(&mut ids.definitions, &parts.definitions, "definitions", |row| row.identifier.clone())?;
        index_rows(&mut ids.relationships, &parts.relationships, "relationships", |row| *row)?;
        index_rows(&mut ids.examples, &parts.examples, "examples", |row| row.value.clone())?;
        index_rows(&mut ids.tag_examples, &parts.tag_examples, "tag-examples", |row| *row)?;
        index_rows(&mut ids.tag_usage, &parts.tag_usage, "tag-usage", |row| *row)?;
        index_rows(&mut ids.attribute_examples, &parts.attribute_examples, "attribute-examples", |row| *row)?;
        index_rows(&mut ids.attribute_usage, &parts.attribute_usage, "attribute-usage", |row| *row)?;

        Ok(Self { parts, identities: ids })
    }
}

fn index_rows<K, I, T>(
    identities: &mut HashMap<K, I>,
    rows: &[T],
    kind: &'static str,
    key: impl Fn(&T) -> K,
) -> Result<(), GraphError>
where
    K: Eq + Hash,
    I: EntityId,
{
    for (index, row) in rows.iter().enumerate() {
        if identities.insert(key(row), I::from_index(index)).is_some() {
            return Err(GraphError::DuplicateKey { kind, index });
        }
    }
    Ok(())
}

fn check<I: EntityId>(
    kind: &'static str,
    index: usize,
    target: &'static str,
    reference: Option<I>,
    len: usize,
) -> Result<(), GraphError> {
    match reference {
        Some(id) if id.index() >= len => Err(GraphError::DanglingReference {
            kind,
            index,
            target,
            reference: id.index(),
        }),
        _ => Ok(()),
    }
}

fn validate_references(parts: &GraphParts) -> Result<(), GraphError> {
    let modules = parts.modules.len();
    for (i, row) in parts.resources.iter().enumerate() {
        check("resources", i, "modules", Some(row.module), modules)?;
    }
    for (i, row) in parts.classes.iter().enumerate() {
        check("classes", i, "modules", row.module, modules)?;
    }
    for (i, row) in parts.tags.iter().enumerate() {
        check("tags", i, "modules", row.module, modules)?;
    }
    for (i, row) in parts.attributes.iter().enumerate() {
        check("attributes", i, "modules", row.module, modules)?;
    }
    for (i, row) in parts.definitions.iter().enumerate() {
        check("definitions", i, "definitions", row.parent, parts.definitions.len())?;
        check("definitions", i, "modules", row.module, modules)?;
        check("definitions", i, "classes", row.class, parts.classes.len())?;
        check("definitions", i, "resources", row.resource, parts.resources.len())?;
    }
    let tags = parts.tags.len();
    for (i, row) in parts.relationships.iter().enumerate() {
        check("relationships", i, "tags", Some(row.parent), tags)?;
        check("relationships", i, "tags", Some(row.child), tags)?;
        check("relationships", i, "tags", row.context, tags)?;
    }
    for (i, row) in parts.tag_examples.iter().enumerate() {
        check("tag-examples", i, "examples", Some(row.example), parts.examples.len())?;
        check("tag-examples", i, "relationships", Some(row.relationship), parts.relationships.len())?;
    }
    for (i, row) in parts.tag_usage.iter().enumerate() {
        check("tag-usage", i, "tag-examples", Some(row.example), parts.tag_examples.len())?;
        check("tag-usage", i, "definitions", Some(row.definition), parts.definitions.len())?;
    }
    for (i, row) in parts.attribute_examples.iter().enumerate() {
        check("attribute-examples", i, "examples", Some(row.example), parts.examples.len())?;
        check("attribute-examples", i, "tags", Some(row.tag), tags)?;
        check("attribute-examples", i, "attributes", Some(row.attribute), parts.attributes.len())?;
    }
    for (i, row) in parts.attribute_usage.iter().enumerate() {
        check("attribute-usage", i, "attribute-examples", Some(row.example), parts.attribute_examples.len())?;
        check("attribute-usage", i, "definitions", Some(row.definition), parts.definitions.len())?;
    }
    for (i, row) in parts.issues.iter().enumerate() {
        check("issues", i, "modules", row.module, modules)?;
        check("issues", i, "resources", row.resource, parts.resources.len())?;
        check("issues", i, "definitions", row.definition, parts.definitions.len())?;
        check("issues", i, "classes", row.class, parts.classes.len())?;
        check("issues", i, "tags", row.tag, tags)?;
        check("issues", i, "attributes", row.attribute, parts.attributes.len())?;
    }
    Ok(())
}
