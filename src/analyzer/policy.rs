// Per-name behavior policy for tags and attributes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Array-element marker recognized out of the box
pub const ARRAY_MARKER: &str = "li";

/// Child element carrying a definition's identifier
pub const NAME_TAG: &str = "defName";

/// Attribute carrying an abstract definition's identifier
pub const NAME_ATTRIBUTE: &str = "Name";

/// How the walker treats one tag or attribute name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Behavior {
    /// Visit child elements
    pub traverse: bool,
    /// Record the element's XML attributes
    pub attributes: bool,
    /// Record literal values as examples
    pub examples: bool,
    /// Collapse occurrences into one `<parent>[]` tag
    pub array_element: bool,
    /// Skip the name and everything below it
    pub exclude: bool,
}

impl Behavior {
    pub const DEFAULT: Behavior = Behavior {
        traverse: true,
        attributes: true,
        examples: true,
        array_element: false,
        exclude: false,
    };
}

impl Default for Behavior {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Partial behavior applied on top of a table's default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traverse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_element: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<bool>,
}

impl BehaviorOverride {
    pub fn apply(&self, base: Behavior) -> Behavior {
        Behavior {
            traverse: self.traverse.unwrap_or(base.traverse),
            attributes: self.attributes.unwrap_or(base.attributes),
            examples: self.examples.unwrap_or(base.examples),
            array_element: self.array_element.unwrap_or(base.array_element),
            exclude: self.exclude.unwrap_or(base.exclude),
        }
    }

    /// Layer `other` over `self`; fields set in `other` win
    pub fn merge(self, other: BehaviorOverride) -> BehaviorOverride {
        BehaviorOverride {
            traverse: other.traverse.or(self.traverse),
            attributes: other.attributes.or(self.attributes),
            examples: other.examples.or(self.examples),
            array_element: other.array_element.or(self.array_element),
            exclude: other.exclude.or(self.exclude),
        }
    }
}

/// Configured behaviors for one kind of name.
///
/// `overrides` holds only what the user configured; the built-in overrides
/// sit underneath them when the [`Policy`] is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorTableConfig {
    #[serde(default)]
    pub default: Behavior,
    #[serde(default)]
    pub overrides: BTreeMap<String, BehaviorOverride>,
}

/// The `[policy]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub tags: BehaviorTableConfig,
    #[serde(default)]
    pub attributes: BehaviorTableConfig,
}

/// Tag overrides in effect before any configuration
pub fn builtin_tag_overrides() -> Vec<(&'static str, BehaviorOverride)> {
    vec![
        (
            ARRAY_MARKER,
            BehaviorOverride {
                traverse: Some(false),
                examples: Some(false),
                array_element: Some(true),
                ..Default::default()
            },
        ),
        // Its value is already the definition's identifier
        (
            NAME_TAG,
            BehaviorOverride {
                traverse: Some(false),
                attributes: Some(false),
                examples: Some(false),
                ..Default::default()
            },
        ),
    ]
}

/// Attribute overrides in effect before any configuration
pub fn builtin_attribute_overrides() -> Vec<(&'static str, BehaviorOverride)> {
    vec![(
        NAME_ATTRIBUTE,
        BehaviorOverride {
            examples: Some(false),
            ..Default::default()
        },
    )]
}

#[derive(Debug, Clone)]
struct BehaviorTable {
    default: Behavior,
    overrides: HashMap<String, Behavior>,
}

impl BehaviorTable {
    fn resolve(config: &BehaviorTableConfig, builtins: Vec<(&'static str, BehaviorOverride)>) -> Self {
        let mut partials: HashMap<String, BehaviorOverride> =
            builtins.into_iter().map(|(name, partial)| (name.to_string(), partial)).collect();
        for (name, partial) in &config.overrides {
            let merged = partials.get(name).copied().unwrap_or_default().merge(*partial);
            partials.insert(name.clone(), merged);
        }

        Self {
            default: config.default,
            overrides: partials
                .into_iter()
                .map(|(name, partial)| (name, partial.apply(config.default)))
                .collect(),
        }
    }

    fn behavior_of(&self, name: &str) -> Behavior {
        self.overrides.get(name).copied().unwrap_or(self.default)
    }
}

/// Resolved, immutable behavior lookup
#[derive(Debug, Clone)]
pub struct Policy {
    tags: BehaviorTable,
    attributes: BehaviorTable,
}

impl Policy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self {
            tags: BehaviorTable::resolve(&config.tags, builtin_tag_overrides()),
            attributes: BehaviorTable::resolve(&config.attributes, builtin_attribute_overrides()),
        }
    }

    pub fn tag(&self, name: &str) -> Behavior {
        self.tags.behavior_of(name)
    }

    pub fn attribute(&self, name: &str) -> Behavior {
        self.attributes.behavior_of(name)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}
