// Display names derived from identifiers

use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_TRANSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{L})(\p{N})").unwrap());
static CASE_TRANSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{Ll}|\p{N})(\p{Lu})").unwrap());
static ACRONYM_TRANSITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{Lu})(\p{Lu}\p{Ll})").unwrap());
static DEFINITION_ABBREVIATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bDef\b").unwrap());
static TEXTURE_ABBREVIATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bTex\b").unwrap());

/// Split an identifier on word boundaries and capitalize each word.
///
/// `fillPercent` becomes `Fill Percent`, `building_size` becomes
/// `Building Size`, `XMLParser` becomes `XML Parser`. Words that are
/// entirely uppercase are kept as they are.
pub fn title_case(identifier: &str) -> String {
    let spaced = identifier.replace('_', " ");
    let spaced = NUMBER_TRANSITION.replace_all(&spaced, "${1} ${2}");
    let spaced = CASE_TRANSITION.replace_all(&spaced, "${1} ${2}");
    let spaced = ACRONYM_TRANSITION.replace_all(&spaced, "${1} ${2}");

    spaced
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display name of a class, expanding the `Def` suffix
pub fn class_name(identifier: &str) -> String {
    DEFINITION_ABBREVIATION
        .replace_all(&title_case(identifier), "Definition")
        .into_owned()
}

/// Display name of a tag, expanding `Def` and `Tex`
pub fn tag_name(identifier: &str) -> String {
    let name = class_name(identifier);
    TEXTURE_ABBREVIATION.replace_all(&name, "Texture").into_owned()
}

/// Display name of an attribute
pub fn attribute_name(identifier: &str) -> String {
    title_case(identifier)
}

fn capitalize(word: &str) -> String {
    if !word.chars().any(char::is_lowercase) {
        return word.to_string();
    }

    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
