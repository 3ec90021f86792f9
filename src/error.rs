// Error taxonomy

use thiserror::Error;

use crate::graph::Severity;

/// Failures raised while analyzing one resource.
///
/// None of these escape the resource boundary: the coordinator turns each
/// into an [`Issue`](crate::graph::Issue) and moves on.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("{message}")]
    Parse { message: String },

    #[error("Skipping invalid XML definition file: root element is <{found}>, expected <{expected}>")]
    Structure { expected: String, found: String },

    #[error("Could not find name for {class} definition")]
    MissingIdentifier { class: String },

    #[error("Definition {definition} has unknown parent {parent}")]
    DanglingReference { definition: String, parent: String },

    #[error("Element nesting exceeds the maximum depth of {limit} at <{element}>")]
    DepthExceeded { limit: usize, element: String },

    #[error("Analysis aborted, discarding its contributions: {source}")]
    Transaction {
        #[source]
        source: Box<AnalysisError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Severity of the issue recorded for this failure
    pub fn severity(&self) -> Severity {
        match self {
            AnalysisError::Structure { .. } | AnalysisError::DanglingReference { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn transaction(source: AnalysisError) -> Self {
        AnalysisError::Transaction { source: Box::new(source) }
    }
}

impl From<roxmltree::Error> for AnalysisError {
    fn from(error: roxmltree::Error) -> Self {
        AnalysisError::Parse { message: error.to_string() }
    }
}

/// Invalid stored graph contents
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Duplicate key in {kind} at position {index}")]
    DuplicateKey { kind: &'static str, index: usize },

    #[error("Row {index} of {kind} references {target} #{reference}, which does not exist")]
    DanglingReference {
        kind: &'static str,
        index: usize,
        target: &'static str,
        reference: usize,
    },
}

/// Failures decoding an exported document
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unsupported export format {0}")]
    UnsupportedFormat(u32),

    #[error("Row {index} of {kind} has no {field}")]
    MissingReference {
        kind: &'static str,
        index: usize,
        field: &'static str,
    },

    #[error("Unknown issue severity {severity} in row {index}")]
    UnknownSeverity { index: usize, severity: u8 },

    #[error("Invalid graph: {0}")]
    Graph(#[from] GraphError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_of_failures() {
        let structure = AnalysisError::Structure {
            expected: "Defs".to_string(),
            found: "Patch".to_string(),
        };
        assert_eq!(structure.severity(), Severity::Warning);

        let missing = AnalysisError::MissingIdentifier { class: "ThingDef".to_string() };
        assert_eq!(missing.severity(), Severity::Error);
        assert_eq!(missing.to_string(), "Could not find name for ThingDef definition");

        let failed = AnalysisError::transaction(AnalysisError::DepthExceeded {
            limit: 4,
            element: "li".to_string(),
        });
        assert_eq!(failed.severity(), Severity::Error);
        assert!(failed.to_string().contains("maximum depth of 4"));
    }
}
