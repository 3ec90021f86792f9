// Tag walker: turns one definition element into tags, relationships and usages

use tracing::{debug, trace};

use super::document::Element;
use super::policy::{Policy, NAME_ATTRIBUTE, NAME_TAG};
use crate::error::AnalysisError;
use crate::graph::{Declaration, Definition, DefinitionId, Graph, ModuleId, RelationshipId, ResourceId, TagId};

/// Suffix of the tag standing in for every array element under a parent
pub const ARRAY_SUFFIX: &str = "[]";

const PARENT_ATTRIBUTE: &str = "ParentName";
const ABSTRACT_ATTRIBUTE: &str = "Abstract";

/// Where a definition is being analyzed from
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub module: ModuleId,
    pub resource: ResourceId,
}

/// Analyze one top-level definition element.
///
/// Fails with [`AnalysisError::MissingIdentifier`] before creating the
/// definition, and with [`AnalysisError::DepthExceeded`] mid-walk; in the
/// latter case the caller is expected to roll the resource back.
pub fn analyze_definition(
    graph: &mut Graph,
    policy: &Policy,
    element: &Element,
    origin: Origin,
    max_depth: usize,
) -> Result<Declaration, AnalysisError> {
    let class = graph.get_or_create_class(&element.name, Some(origin.module));

    let identifier = definition_identifier(element).ok_or_else(|| AnalysisError::MissingIdentifier {
        class: graph.class(class).identifier.clone(),
    })?;

    let declaration = graph.declare_definition(Definition {
        is_abstract: element.attribute(ABSTRACT_ATTRIBUTE) == Some("True"),
        parent_name: element
            .attribute(PARENT_ATTRIBUTE)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        module: Some(origin.module),
        class: Some(class),
        resource: Some(origin.resource),
        ..Definition::new(identifier)
    });
    debug!("{}", graph.declaration_of(declaration.id()));

    let mut walker = Walker {
        graph,
        policy,
        module: origin.module,
        definition: declaration.id(),
        max_depth,
    };
    walker.walk(element, None, None, 0)?;

    Ok(declaration)
}

/// `Name` attribute if present, else the text of a `defName` child
fn definition_identifier(element: &Element) -> Option<String> {
    let from_attribute = element
        .attribute(NAME_ATTRIBUTE)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    from_attribute.or_else(|| {
        element
            .child(NAME_TAG)
            .map(|child| child.inner_text().trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

struct Walker<'a> {
    graph: &'a mut Graph,
    policy: &'a Policy,
    module: ModuleId,
    definition: DefinitionId,
    max_depth: usize,
}

impl Walker<'_> {
    /// `parent` is the tag of the enclosing element, `context` the tag
    /// enclosing that one.
    fn walk(
        &mut self,
        element: &Element,
        parent: Option<TagId>,
        context: Option<TagId>,
        depth: usize,
    ) -> Result<(), AnalysisError> {
        if depth > self.max_depth {
            return Err(AnalysisError::DepthExceeded {
                limit: self.max_depth,
                element: element.name.clone(),
            });
        }

        let behavior = self.policy.tag(&element.name);
        if behavior.exclude {
            return Ok(());
        }

        let (tag, relationship, collapsed) = match parent {
            Some(parent) if behavior.array_element => {
                let identifier = format!("{}{}", self.graph.tag(parent).identifier, ARRAY_SUFFIX);
                let tag = self.graph.get_or_create_tag(&identifier, Some(self.module));
                let relationship = self.graph.get_or_create_relationship(parent, tag, context);
                (tag, Some(relationship), true)
            }
            _ => {
                let tag = self.graph.get_or_create_tag(&element.name, Some(self.module));
                let relationship = parent.map(|parent| self.graph.get_or_create_relationship(parent, tag, context));
                (tag, relationship, false)
            }
        };

        if let Some(value) = element.leaf_text() {
            trace!("{} \"{}\"", self.graph.tag(tag).identifier, value);
            if behavior.examples {
                if let Some(relationship) = relationship {
                    self.record_value(relationship, value);
                }
            }
        } else if behavior.traverse || collapsed {
            trace!("{}", self.graph.tag(tag).identifier);
            for child in element.elements() {
                self.walk(child, Some(tag), parent, depth + 1)?;
            }
        }

        if behavior.attributes {
            for (name, value) in &element.attributes {
                self.record_attribute(tag, name, value);
            }
        }

        Ok(())
    }

    fn record_value(&mut self, relationship: RelationshipId, value: &str) {
        let example = self.graph.get_or_create_example(value);
        let example = self.graph.get_or_create_tag_example(relationship, example);
        self.graph.get_or_create_tag_usage(example, self.definition);
    }

    fn record_attribute(&mut self, tag: TagId, name: &str, value: &str) {
        let behavior = self.policy.attribute(name);
        if behavior.exclude {
            return;
        }

        trace!("@{} \"{}\"", name, value);
        let attribute = self.graph.get_or_create_attribute(name, Some(self.module));
        if behavior.examples {
            let example = self.graph.get_or_create_example(value);
            let example = self.graph.get_or_create_attribute_example(attribute, tag, example);
            self.graph.get_or_create_attribute_usage(example, self.definition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::document::Document;
    use crate::analyzer::policy::{BehaviorOverride, PolicyConfig};

    fn setup() -> (Graph, Origin) {
        let mut graph = Graph::new();
        let module = graph.get_or_create_module("Ludeon.RimWorld");
        let resource = graph.get_or_create_resource(module, "Buildings.xml", None);
        (graph, Origin { module, resource })
    }

    fn analyze_all(graph: &mut Graph, policy: &Policy, origin: Origin, xml: &str) -> Vec<Result<Declaration, AnalysisError>> {
        let document = Document::parse(xml).unwrap();
        document
            .root
            .elements()
            .map(|element| analyze_definition(graph, policy, element, origin, 64))
            .collect()
    }

    fn usage_count(graph: &Graph, tag: &str, value: &str) -> usize {
        let tag = graph.find_tag(tag).unwrap();
        let example = graph.find_example(value).unwrap();
        graph
            .tag_examples()
            .iter()
            .enumerate()
            .filter(|(_, row)| row.example == example && graph.relationship(row.relationship).child == tag)
            .map(|(index, _)| {
                graph
                    .tag_example_definitions(crate::graph::EntityId::from_index(index))
                    .count()
            })
            .sum()
    }

    #[test]
    fn test_single_wall_definition() {
        let (mut graph, origin) = setup();
        let results = analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs><ThingDef Name="Wall"><defName>Wall</defName><fillPercent>1.0</fillPercent></ThingDef></Defs>"#,
        );
        assert!(results.iter().all(Result::is_ok));

        assert_eq!(graph.definitions().len(), 1);
        let wall = graph.definition(graph.find_definition("Wall").unwrap());
        assert_eq!(graph.class(wall.class.unwrap()).identifier, "ThingDef");
        assert!(!wall.is_abstract);
        assert_eq!(wall.parent_name, None);
        assert_eq!(wall.resource, Some(origin.resource));

        // defName is documented as a tag, its value is the identifier
        let thing = graph.find_tag("ThingDef").unwrap();
        let def_name = graph.find_tag("defName").unwrap();
        let relationship = graph.find_relationship(thing, def_name, None).unwrap();
        assert!(graph.tag_examples().iter().all(|row| row.relationship != relationship));
        assert_eq!(graph.find_example("Wall"), None);
        assert_eq!(graph.examples().len(), 1);
        assert_eq!(graph.examples()[0].value, "1.0");
        assert_eq!(usage_count(&graph, "fillPercent", "1.0"), 1);

        // The Name attribute is recorded without examples
        assert!(graph.find_attribute("Name").is_some());
        assert!(graph.attribute_examples().is_empty());
    }

    #[test]
    fn test_shared_value_gains_definition_link() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs>
                <ThingDef><defName>Wall</defName><fillPercent>1.0</fillPercent></ThingDef>
                <ThingDef><defName>Door</defName><fillPercent>1.0</fillPercent></ThingDef>
            </Defs>"#,
        );

        assert_eq!(graph.definitions().len(), 2);
        assert_eq!(graph.examples().len(), 1);
        assert_eq!(graph.tag_examples().len(), 1);
        assert_eq!(graph.relationships().len(), 2);
        assert_eq!(graph.tag_usage().len(), 2);
        assert_eq!(usage_count(&graph, "fillPercent", "1.0"), 2);
    }

    #[test]
    fn test_missing_identifier_skips_only_that_definition() {
        let (mut graph, origin) = setup();
        let results = analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs>
                <ThingDef><label>nameless</label></ThingDef>
                <ThingDef><defName>Wall</defName></ThingDef>
            </Defs>"#,
        );

        assert!(matches!(&results[0], Err(AnalysisError::MissingIdentifier { class }) if class == "ThingDef"));
        assert!(results[1].is_ok());
        assert_eq!(graph.definitions().len(), 1);
        assert!(graph.find_definition("Wall").is_some());
    }

    #[test]
    fn test_name_attribute_wins_over_def_name() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs><ThingDef Name=" WallBase "><defName>Wall</defName></ThingDef></Defs>"#,
        );

        assert!(graph.find_definition("WallBase").is_some());
        assert_eq!(graph.find_definition("Wall"), None);
    }

    #[test]
    fn test_abstract_and_parent() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs>
                <ThingDef Name="BuildingBase" Abstract="True"/>
                <ThingDef Name="OtherBase" Abstract="true"/>
                <ThingDef ParentName="BuildingBase"><defName>Wall</defName></ThingDef>
            </Defs>"#,
        );

        let base = graph.find_definition("BuildingBase").unwrap();
        assert!(graph.definition(base).is_abstract);
        assert!(!graph.definition(graph.find_definition("OtherBase").unwrap()).is_abstract);

        let wall = graph.find_definition("Wall").unwrap();
        assert_eq!(graph.definition(wall).parent_name.as_deref(), Some("BuildingBase"));
        assert_eq!(graph.declaration_of(base), "abstract ThingDef BuildingBase");
        assert_eq!(graph.declaration_of(wall), "ThingDef Wall: BuildingBase");
    }

    #[test]
    fn test_context_is_grandparent() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <building><isInert>true</isInert></building>
                <plant><building><isInert>false</isInert></building></plant>
            </ThingDef></Defs>"#,
        );

        let thing = graph.find_tag("ThingDef").unwrap();
        let building = graph.find_tag("building").unwrap();
        let plant = graph.find_tag("plant").unwrap();
        let inert = graph.find_tag("isInert").unwrap();

        assert!(graph.find_relationship(thing, building, None).is_some());
        assert!(graph.find_relationship(building, inert, Some(thing)).is_some());
        assert!(graph.find_relationship(plant, building, Some(thing)).is_some());
        assert!(graph.find_relationship(building, inert, Some(plant)).is_some());
        assert_eq!(graph.tags().iter().filter(|tag| tag.identifier == "building").count(), 1);
    }

    #[test]
    fn test_leaf_detection() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <label>wall</label>
                <description>A <b>bold</b> wall</description>
                <graphicData><texPath>Things/Wall</texPath></graphicData>
            </ThingDef></Defs>"#,
        );

        assert!(graph.find_example("wall").is_some());
        assert!(graph.find_example("Things/Wall").is_some());
        // Mixed content is not a leaf, its text runs are not values
        assert_eq!(graph.find_example("A "), None);
        assert!(graph.find_example("bold").is_some());

        let graphic = graph.find_tag("graphicData").unwrap();
        assert!(graph
            .tag_examples()
            .iter()
            .all(|row| graph.relationship(row.relationship).child != graphic));
    }

    #[test]
    fn test_array_elements_collapse() {
        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <stuffCategories><li>Metallic</li><li>Woody</li><li>Stony</li></stuffCategories>
            </ThingDef></Defs>"#,
        );

        let thing = graph.find_tag("ThingDef").unwrap();
        let categories = graph.find_tag("stuffCategories").unwrap();
        let array = graph.find_tag("stuffCategories[]").unwrap();

        assert_eq!(graph.find_tag("li"), None);
        assert_eq!(graph.tag(array).name, "Stuff Categories[]");
        assert_eq!(
            graph.relationships().iter().filter(|row| row.child == array).count(),
            1
        );
        assert!(graph.find_relationship(categories, array, Some(thing)).is_some());
        // li values are not collected by default
        assert!(graph.examples().is_empty());
    }

    #[test]
    fn test_array_elements_continue_walk() {
        let mut config = PolicyConfig::default();
        config.tags.overrides.insert(
            "li".to_string(),
            BehaviorOverride {
                examples: Some(true),
                ..Default::default()
            },
        );
        let policy = Policy::from_config(&config);

        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &policy,
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <comps>
                    <li Class="CompProperties_Glower"><glowRadius>5</glowRadius></li>
                    <li Class="CompProperties_Glower"><glowRadius>5</glowRadius></li>
                </comps>
                <tradeTags><li>Exotic</li></tradeTags>
            </ThingDef></Defs>"#,
        );

        let comps = graph.find_tag("comps").unwrap();
        let array = graph.find_tag("comps[]").unwrap();
        let radius = graph.find_tag("glowRadius").unwrap();
        assert!(graph.find_relationship(array, radius, Some(comps)).is_some());
        assert_eq!(usage_count(&graph, "glowRadius", "5"), 1);
        assert_eq!(usage_count(&graph, "tradeTags[]", "Exotic"), 1);

        let class = graph.find_attribute("Class").unwrap();
        assert_eq!(graph.attribute_examples().len(), 1);
        let example = graph.attribute_examples()[0];
        assert_eq!(example.attribute, class);
        assert_eq!(example.tag, array);
        assert_eq!(graph.example(example.example).value, "CompProperties_Glower");
        assert_eq!(graph.attribute_usage().len(), 1);
    }

    #[test]
    fn test_excluded_subtree() {
        let mut config = PolicyConfig::default();
        config.tags.overrides.insert(
            "modExtensions".to_string(),
            BehaviorOverride {
                exclude: Some(true),
                ..Default::default()
            },
        );
        let policy = Policy::from_config(&config);

        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &policy,
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <modExtensions><li><hidden>1</hidden></li></modExtensions>
            </ThingDef></Defs>"#,
        );

        assert_eq!(graph.find_tag("modExtensions"), None);
        assert_eq!(graph.find_tag("hidden"), None);
        assert!(graph.examples().is_empty());
    }

    #[test]
    fn test_silent_tag_is_recorded_without_descending() {
        let mut config = PolicyConfig::default();
        config.tags.overrides.insert(
            "comps".to_string(),
            BehaviorOverride {
                traverse: Some(false),
                attributes: Some(false),
                examples: Some(false),
                array_element: Some(false),
                exclude: None,
            },
        );
        let policy = Policy::from_config(&config);

        let (mut graph, origin) = setup();
        analyze_all(
            &mut graph,
            &policy,
            origin,
            r#"<Defs><ThingDef><defName>Wall</defName>
                <comps Inherit="False"><li><glowRadius>5</glowRadius></li></comps>
            </ThingDef></Defs>"#,
        );

        let thing = graph.find_tag("ThingDef").unwrap();
        let comps = graph.find_tag("comps").unwrap();
        assert!(graph.find_relationship(thing, comps, None).is_some());
        assert_eq!(graph.find_tag("comps[]"), None);
        assert_eq!(graph.find_tag("glowRadius"), None);
        assert_eq!(graph.find_attribute("Inherit"), None);
        assert!(graph.examples().is_empty());
    }

    #[test]
    fn test_depth_limit() {
        let (mut graph, origin) = setup();
        let document = Document::parse(
            "<Defs><ThingDef><defName>Deep</defName><a><b><c><d>1</d></c></b></a></ThingDef></Defs>",
        )
        .unwrap();
        let element = document.root.child("ThingDef").unwrap();

        let result = analyze_definition(&mut graph, &Policy::default(), element, origin, 2);
        assert!(matches!(result, Err(AnalysisError::DepthExceeded { limit: 2, .. })));
    }

    #[test]
    fn test_duplicate_declaration_reuses_definition() {
        let (mut graph, origin) = setup();
        let results = analyze_all(
            &mut graph,
            &Policy::default(),
            origin,
            r#"<Defs>
                <ThingDef><defName>Wall</defName><label>wall</label></ThingDef>
                <ThingDef Abstract="True"><defName>Wall</defName><label>stone wall</label></ThingDef>
            </Defs>"#,
        );

        assert!(matches!(results[0], Ok(Declaration::Created(_))));
        assert!(matches!(results[1], Ok(Declaration::Existing(_))));
        assert_eq!(graph.definitions().len(), 1);
        assert!(!graph.definitions()[0].is_abstract);
        assert_eq!(usage_count(&graph, "label", "stone wall"), 1);
    }
}
