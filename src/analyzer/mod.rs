// Module analysis: discovery, concurrent loading and per-resource units of work

pub mod document;
pub mod policy;
pub mod walker;

use futures::future;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{AnalysisConfig, Config};
use crate::error::AnalysisError;
use crate::graph::{Declaration, EntityId, Graph, Issue, IssueId, ModuleId, Severity};
use document::LoadedDocument;
use policy::Policy;
use walker::Origin;

/// A module directory to analyze
#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub path: PathBuf,
    pub official: bool,
}

impl ModuleSource {
    pub fn new(path: impl Into<PathBuf>, official: bool) -> Self {
        Self {
            path: path.into(),
            official,
        }
    }

    /// Directory name, used when the module has no readable metadata
    fn directory_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Module identity read from its metadata document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub identifier: String,
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub modules: usize,
    pub resources: usize,
    /// Resources that recorded at least one error
    pub failed: usize,
    pub cancelled: bool,
}

/// Drives the analysis of modules into a single graph.
///
/// Documents are read and parsed concurrently, but every graph mutation
/// happens here, one resource at a time, in discovery order.
pub struct Analyzer {
    config: AnalysisConfig,
    policy: Policy,
    threads: usize,
    stop: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl Analyzer {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.analysis.clone(),
            policy: Policy::from_config(&config.policy),
            threads: config.performance.threads.max(1),
            stop: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Setting the returned flag stops scheduling new resources
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Nesting accepted by the loader: the document root plus `max_depth`
    /// levels below each definition
    fn nesting_limit(&self) -> usize {
        self.config.max_depth.saturating_add(1)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Analyze every module into a fresh graph and resolve parent references
    pub async fn analyze(&self, sources: &[ModuleSource]) -> (Graph, AnalysisSummary) {
        let mut graph = Graph::new();
        let summary = self.run(&mut graph, sources).await;
        self.finish(&mut graph);
        (graph, summary)
    }

    pub async fn run(&self, graph: &mut Graph, sources: &[ModuleSource]) -> AnalysisSummary {
        let mut summary = AnalysisSummary::default();

        for source in sources {
            if self.is_stopped() {
                break;
            }

            let module = self.register_module(graph, source).await;
            let resources = self.discover_resources(&source.path);
            info!(
                "Analyzing module {} ({} resources)",
                graph.module(module).identifier,
                resources.len()
            );
            if let Some(progress) = &self.progress {
                progress.inc_length(resources.len() as u64);
            }

            let stop = Arc::clone(&self.stop);
            let limit = self.nesting_limit();
            let mut loads = stream::iter(resources)
                .take_while(move |_| future::ready(!stop.load(Ordering::SeqCst)))
                .map(|(path, file)| async move {
                    let loaded = document::load(&file, limit).await;
                    (path, loaded)
                })
                .buffered(self.threads);

            while let Some((path, loaded)) = loads.next().await {
                let issues = self.analyze_resource(graph, module, &path, loaded);
                summary.resources += 1;
                if issues
                    .iter()
                    .any(|issue| graph.issues()[issue.index()].severity >= Severity::Error)
                {
                    summary.failed += 1;
                }
                if let Some(progress) = &self.progress {
                    progress.inc(1);
                    progress.set_message(path);
                }
            }

            summary.modules += 1;
        }

        summary.cancelled = self.is_stopped();
        if summary.cancelled {
            warn!("Analysis interrupted after {} resources", summary.resources);
        }
        summary
    }

    /// Read a module's metadata document
    pub async fn read_metadata(&self, module_dir: &Path) -> Result<ModuleMetadata, AnalysisError> {
        let loaded = document::load(&module_dir.join(&self.config.metadata_file), self.nesting_limit()).await?;
        let root = &loaded.document.root;
        let field = |name: &str| {
            root.child(name)
                .map(|element| element.inner_text().trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let identifier = field("packageId").ok_or_else(|| AnalysisError::MissingIdentifier {
            class: root.name.clone(),
        })?;
        Ok(ModuleMetadata {
            identifier,
            name: field("name"),
            version: field("modVersion"),
        })
    }

    /// Create the module entity, falling back to the directory name
    pub async fn register_module(&self, graph: &mut Graph, source: &ModuleSource) -> ModuleId {
        match self.read_metadata(&source.path).await {
            Ok(metadata) => {
                let module = graph.get_or_create_module(&metadata.identifier);
                graph.describe_module(module, metadata.name, metadata.version, source.official);
                module
            }
            Err(e) => {
                let identifier = source.directory_name();
                let module = graph.get_or_create_module(&identifier);
                graph.describe_module(module, None, None, source.official);

                let issue = Issue::warning(format!("Could not read module metadata: {}", e))
                    .at(&identifier)
                    .with_module(module);
                record_issue(graph, issue);
                module
            }
        }
    }

    /// Definition documents of a module, sorted, with `/`-separated paths
    /// relative to its definitions directory
    pub fn discover_resources(&self, module_dir: &Path) -> Vec<(String, PathBuf)> {
        let root = module_dir.join(&self.config.definitions_directory);

        WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file() && is_definition_file(entry.path()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&root).ok().map(relative_path)?;
                Some((relative, entry.into_path()))
            })
            .collect()
    }

    /// Apply one loaded resource to the graph as a single unit of work.
    ///
    /// Returns the issues recorded for it. A load failure creates nothing
    /// but the issue; a walk failure rolls back everything the resource
    /// contributed except its own resource row.
    pub fn analyze_resource(
        &self,
        graph: &mut Graph,
        module: ModuleId,
        path: &str,
        loaded: Result<LoadedDocument, AnalysisError>,
    ) -> Vec<IssueId> {
        let first_issue = graph.issues().len();
        let location = format!("{}/{}", graph.module(module).identifier, path);

        match loaded {
            Ok(loaded) => self.apply_document(graph, module, path, &location, loaded),
            Err(e) => {
                let issue = Issue::new(e.severity(), e.to_string())
                    .at(&location)
                    .with_module(module);
                record_issue(graph, issue);
            }
        }

        (first_issue..graph.issues().len()).map(IssueId::from_index).collect()
    }

    fn apply_document(&self, graph: &mut Graph, module: ModuleId, path: &str, location: &str, loaded: LoadedDocument) {
        let resource = graph.get_or_create_resource(module, path, Some(loaded.content_hash));
        let root = &loaded.document.root;

        if root.name != self.config.root_element {
            let e = AnalysisError::Structure {
                expected: self.config.root_element.clone(),
                found: root.name.clone(),
            };
            let issue = Issue::new(e.severity(), e.to_string())
                .at(location)
                .with_module(module)
                .with_resource(resource);
            record_issue(graph, issue);
            return;
        }

        debug!("Analyzing {}", location);
        let savepoint = graph.savepoint();
        let origin = Origin { module, resource };

        for element in root.elements() {
            match walker::analyze_definition(graph, &self.policy, element, origin, self.config.max_depth) {
                Ok(Declaration::Created(_)) => {}
                Ok(Declaration::Existing(definition)) => {
                    let issue = Issue::warning(format!(
                        "Duplicate definition {}, keeping the first declaration",
                        graph.definition(definition).identifier
                    ))
                    .at(location)
                    .with_module(module)
                    .with_resource(resource)
                    .with_definition(definition);
                    record_issue(graph, issue);
                }
                Err(e @ AnalysisError::MissingIdentifier { .. }) => {
                    let mut issue = Issue::new(e.severity(), e.to_string())
                        .at(location)
                        .with_module(module)
                        .with_resource(resource);
                    if let Some(class) = graph.find_class(&element.name) {
                        issue = issue.with_class(class);
                    }
                    record_issue(graph, issue);
                }
                Err(e) => {
                    graph.rollback(savepoint);
                    let e = AnalysisError::transaction(e);
                    let issue = Issue::new(e.severity(), e.to_string())
                        .at(location)
                        .with_module(module)
                        .with_resource(resource);
                    record_issue(graph, issue);
                    return;
                }
            }
        }
    }

    /// Resolve parent references once every resource is applied.
    ///
    /// Returns the dangling-parent issues recorded, if reporting is enabled.
    pub fn finish(&self, graph: &mut Graph) -> Vec<IssueId> {
        let dangling = graph.resolve_references();
        info!(
            "Analysis complete: {} definitions, {} unresolved parents",
            graph.definitions().len(),
            dangling.len()
        );

        if !self.config.report_dangling_parents {
            return Vec::new();
        }

        dangling
            .into_iter()
            .map(|id| {
                let definition = graph.definition(id);
                let e = AnalysisError::DanglingReference {
                    definition: definition.identifier.clone(),
                    parent: definition.parent_name.clone().unwrap_or_default(),
                };

                let mut issue = Issue::new(e.severity(), e.to_string()).with_definition(id);
                if let Some(resource) = definition.resource {
                    issue = issue.at(&graph.location_of(resource)).with_resource(resource);
                }
                if let Some(module) = definition.module {
                    issue = issue.with_module(module);
                }
                record_issue(graph, issue)
            })
            .collect()
    }
}

/// Record an issue, mirroring it to the log at its severity
fn record_issue(graph: &mut Graph, issue: Issue) -> IssueId {
    match issue.severity {
        Severity::Critical | Severity::Error => error!("{}", issue.message),
        Severity::Warning => warn!("{}", issue.message),
        _ => debug!("{}", issue.message),
    }
    graph.record_issue(issue)
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |extension| extension.eq_ignore_ascii_case("xml"))
}

fn relative_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use document::{Document, Element};
    use std::fs;
    use tempfile::TempDir;

    const ABOUT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ModMetaData>
  <packageId>Example.Walls</packageId>
  <name>Better Walls</name>
  <modVersion>1.2</modVersion>
</ModMetaData>"#;

    fn module_fixture(files: &[(&str, &str)], about: Option<&str>) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("BetterWalls");
        if let Some(about) = about {
            fs::create_dir_all(module.join("About")).unwrap();
            fs::write(module.join("About/About.xml"), about).unwrap();
        }
        for (path, contents) in files {
            let file = module.join("Defs").join(path);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, contents).unwrap();
        }
        (dir, module)
    }

    fn messages(graph: &Graph, severity: Severity) -> Vec<String> {
        graph.issues_with(severity).map(|issue| issue.message.clone()).collect()
    }

    #[tokio::test]
    async fn test_analyze_module() {
        let (_dir, module) = module_fixture(
            &[
                (
                    "Buildings/Walls.xml",
                    r#"<Defs>
                        <ThingDef Name="WallBase" Abstract="True"><fillPercent>1.0</fillPercent></ThingDef>
                        <ThingDef ParentName="WallBase"><defName>Wall</defName><fillPercent>1.0</fillPercent></ThingDef>
                    </Defs>"#,
                ),
                ("Apparel.xml", "<Defs><ThingDef><defName>Parka</defName></ThingDef></Defs>"),
                ("readme.txt", "not a definition"),
            ],
            Some(ABOUT),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, true)]).await;

        assert_eq!(summary, AnalysisSummary { modules: 1, resources: 2, failed: 0, cancelled: false });
        assert!(graph.issues().is_empty());

        let module = &graph.modules()[0];
        assert_eq!(module.identifier, "Example.Walls");
        assert_eq!(module.name, "Better Walls");
        assert_eq!(module.version.as_deref(), Some("1.2"));
        assert!(module.official);

        let paths: Vec<&str> = graph.resources().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["Apparel.xml", "Buildings/Walls.xml"]);
        assert!(graph.resources().iter().all(|r| r.content_hash.is_some()));

        let wall = graph.find_definition("Wall").unwrap();
        assert_eq!(graph.definition(wall).parent, graph.find_definition("WallBase"));
        assert_eq!(graph.find_definition("Parka").map(|id| id.index()), Some(0));
        assert_eq!(graph.tag_usage().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_resource_is_isolated() {
        let (_dir, module) = module_fixture(
            &[
                ("A.xml", "<Defs><ThingDef><defName>Broken</defName></Defs>"),
                ("B.xml", "<Defs><ThingDef><defName>Wall</defName></ThingDef></Defs>"),
            ],
            Some(ABOUT),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert_eq!(summary.resources, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(graph.resources().len(), 1);
        assert_eq!(graph.resources()[0].path, "B.xml");
        assert!(graph.find_definition("Wall").is_some());
        assert_eq!(graph.find_definition("Broken"), None);

        let errors = messages(&graph, Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("[Example.Walls/A.xml] "));
        assert_eq!(graph.issues()[0].module, Some(ModuleId::from_index(0)));
        assert_eq!(graph.issues()[0].resource, None);
    }

    #[tokio::test]
    async fn test_unexpected_root_is_skipped() {
        let (_dir, module) = module_fixture(
            &[("Patches.xml", "<Patch><Operation><xpath>/Defs</xpath></Operation></Patch>")],
            Some(ABOUT),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert_eq!(summary.failed, 0);
        assert!(graph.tags().is_empty());
        let warnings = messages(&graph, Severity::Warning);
        assert_eq!(
            warnings,
            vec!["[Example.Walls/Patches.xml] Skipping invalid XML definition file: root element is <Patch>, expected <Defs>"]
        );
        assert_eq!(graph.issues()[0].resource.map(|id| id.index()), Some(0));
    }

    #[tokio::test]
    async fn test_deep_document_fails_alone() {
        let deep = format!(
            "<Defs><ThingDef><defName>Deep</defName>{}1{}</ThingDef></Defs>",
            "<a>".repeat(10_000),
            "</a>".repeat(10_000)
        );
        let (_dir, module) = module_fixture(
            &[
                ("A.xml", "<Defs><ThingDef><defName>Wall</defName><label>wall</label></ThingDef></Defs>"),
                ("B.xml", deep.as_str()),
                ("C.xml", "<Defs><ThingDef><defName>Door</defName></ThingDef></Defs>"),
            ],
            Some(ABOUT),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert_eq!(summary.resources, 3);
        assert_eq!(summary.failed, 1);
        assert!(graph.find_definition("Wall").is_some());
        assert!(graph.find_definition("Door").is_some());
        assert_eq!(graph.find_definition("Deep"), None);
        assert_eq!(graph.find_tag("a"), None);

        let paths: Vec<&str> = graph.resources().iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["A.xml", "C.xml"]);
        let errors = messages(&graph, Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("[Example.Walls/B.xml] Element nesting exceeds the maximum depth of 65"));
    }

    #[test]
    fn test_walk_failure_rolls_back_resource() {
        let mut config = Config::default();
        config.analysis.max_depth = 2;
        let analyzer = Analyzer::new(&config);
        let mut graph = Graph::new();
        let module = graph.get_or_create_module("Example.Walls");

        let kept = Document::parse("<Defs><ThingDef><defName>Wall</defName><label>wall</label></ThingDef></Defs>").unwrap();
        analyzer.analyze_resource(
            &mut graph,
            module,
            "A.xml",
            Ok(LoadedDocument { document: kept, content_hash: "a".to_string() }),
        );

        // Built in memory, so only the walk sees how deep it is
        let deep = Element::new("ThingDef")
            .with_child(Element::new("defName").with_text("Deep"))
            .with_child(Element::new("a").with_child(Element::new("b").with_child(Element::new("c").with_text("1"))));
        let shallow = Element::new("ThingDef")
            .with_child(Element::new("defName").with_text("Shallow"))
            .with_child(Element::new("description").with_text("kept?"));
        let document = Document {
            root: Element::new("Defs").with_child(shallow).with_child(deep),
        };
        let issues = analyzer.analyze_resource(
            &mut graph,
            module,
            "B.xml",
            Ok(LoadedDocument { document, content_hash: "b".to_string() }),
        );

        assert_eq!(issues.len(), 1);
        assert!(graph.find_definition("Wall").is_some());
        assert_eq!(graph.find_definition("Shallow"), None);
        assert_eq!(graph.find_tag("description"), None);
        assert_eq!(graph.find_example("kept?"), None);
        assert_eq!(graph.definitions().len(), 1);

        let errors = messages(&graph, Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("[Example.Walls/B.xml] Analysis aborted"));
        assert_eq!(graph.resources().len(), 2);
        assert_eq!(graph.issues()[0].resource, graph.find_resource(module, "B.xml"));
    }

    #[tokio::test]
    async fn test_definition_issues() {
        let (_dir, module) = module_fixture(
            &[(
                "Things.xml",
                r#"<Defs>
                    <ThingDef><label>nameless</label></ThingDef>
                    <ThingDef ParentName="MissingBase"><defName>Wall</defName></ThingDef>
                    <ThingDef><defName>Wall</defName></ThingDef>
                </Defs>"#,
            )],
            Some(ABOUT),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert_eq!(summary.failed, 1);
        let errors: Vec<&Issue> = graph.issues_with(Severity::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "[Example.Walls/Things.xml] Could not find name for ThingDef definition");
        assert_eq!(errors[0].class, graph.find_class("ThingDef"));

        let wall = graph.find_definition("Wall");
        let warnings: Vec<&Issue> = graph.issues_with(Severity::Warning).collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("Duplicate definition Wall"));
        assert_eq!(warnings[0].definition, wall);
        assert_eq!(
            warnings[1].message,
            "[Example.Walls/Things.xml] Definition Wall has unknown parent MissingBase"
        );
        assert_eq!(warnings[1].definition, wall);
    }

    #[tokio::test]
    async fn test_dangling_parents_can_be_silenced() {
        let (_dir, module) = module_fixture(
            &[("Things.xml", r#"<Defs><ThingDef ParentName="Nowhere"><defName>Wall</defName></ThingDef></Defs>"#)],
            Some(ABOUT),
        );

        let mut config = Config::default();
        config.analysis.report_dangling_parents = false;
        let analyzer = Analyzer::new(&config);
        let (graph, _) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert!(graph.issues().is_empty());
        assert!(graph.definitions()[0].is_dangling());
    }

    #[tokio::test]
    async fn test_missing_metadata_falls_back_to_directory() {
        let (_dir, module) = module_fixture(&[("Things.xml", "<Defs/>")], None);

        let analyzer = Analyzer::new(&Config::default());
        let (graph, _) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert_eq!(graph.modules()[0].identifier, "BetterWalls");
        assert_eq!(graph.modules()[0].name, "BetterWalls");
        let warnings = messages(&graph, Severity::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("[BetterWalls] Could not read module metadata"));
    }

    #[tokio::test]
    async fn test_modules_share_entities() {
        let (_core_dir, core) = module_fixture(
            &[("Things.xml", "<Defs><ThingDef><defName>Wall</defName><label>wall</label></ThingDef></Defs>")],
            Some(ABOUT),
        );
        let (_mod_dir, addon) = module_fixture(
            &[("Things.xml", "<Defs><ThingDef><defName>Door</defName><label>wall</label></ThingDef></Defs>")],
            Some(ABOUT.replace("Example.Walls", "Example.Doors").as_str()),
        );

        let analyzer = Analyzer::new(&Config::default());
        let (graph, _) = analyzer
            .analyze(&[ModuleSource::new(&core, true), ModuleSource::new(&addon, false)])
            .await;

        assert_eq!(graph.modules().len(), 2);
        assert_eq!(graph.resources().len(), 2);
        assert_eq!(graph.tag_examples().len(), 1);
        assert_eq!(graph.tag_usage().len(), 2);
        // First introducer owns the tag
        let label = graph.find_tag("label").unwrap();
        assert_eq!(graph.tag(label).module, graph.find_module("Example.Walls"));
    }

    #[tokio::test]
    async fn test_stop_flag_prevents_scheduling() {
        let (_dir, module) = module_fixture(&[("Things.xml", "<Defs/>")], Some(ABOUT));

        let analyzer = Analyzer::new(&Config::default());
        analyzer.stop_handle().store(true, Ordering::SeqCst);
        let (graph, summary) = analyzer.analyze(&[ModuleSource::new(&module, false)]).await;

        assert!(summary.cancelled);
        assert_eq!(summary.resources, 0);
        assert!(graph.modules().is_empty());
    }

    #[test]
    fn test_load_failure_creates_no_resource() {
        let analyzer = Analyzer::new(&Config::default());
        let mut graph = Graph::new();
        let module = graph.get_or_create_module("Core");

        let failure = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let issues = analyzer.analyze_resource(&mut graph, module, "Missing.xml", Err(failure.into()));

        assert_eq!(issues, vec![IssueId::from_index(0)]);
        assert!(graph.resources().is_empty());
        assert_eq!(graph.issues()[0].severity, Severity::Error);
        assert!(graph.issues()[0].message.starts_with("[Core/Missing.xml] IO error"));
    }
}
