use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{LanguageConfig, NamingConfig};
use crate::error::UnsupportedLanguage;

/// Name of the compiled artifact, relative to the workspace
pub const EXECUTABLE: &str = "./solution";

const DEFAULT_STEM: &str = "solution";
const DEFAULT_CLASS: &str = "Solution";
const DEFAULT_IMAGE: &str = "debian:stable-slim";

/// How the source file inside the workspace is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceNaming {
    /// `<stem><suffix>` regardless of the source text
    Fixed(String),
    /// Named after the first `public class` declared in the source
    PublicClass,
}

/// Language-specific build and run recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub name: String,
    pub suffix: String,
    pub naming: SourceNaming,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    /// Container image used by the docker sandbox
    pub image: String,
}

/// Source file name chosen for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub file_name: String,
    pub class_name: String,
}

impl Adapter {
    fn new(
        name: &str,
        suffix: &str,
        naming: SourceNaming,
        compile: Option<&[&str]>,
        run: &[&str],
        image: &str,
    ) -> Self {
        let owned = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| s.to_string()).collect() };
        Self {
            name: name.to_string(),
            suffix: suffix.to_string(),
            naming,
            compile: compile.map(owned),
            run: owned(run),
            image: image.to_string(),
        }
    }

    /// Picks the workspace file name for a submission's source text
    pub fn source_file(&self, source_code: &str) -> SourceFile {
        match &self.naming {
            SourceNaming::Fixed(stem) => SourceFile {
                file_name: format!("{stem}{}", self.suffix),
                class_name: DEFAULT_CLASS.to_string(),
            },
            SourceNaming::PublicClass => {
                let class_name = public_class_name(source_code)
                    .unwrap_or(DEFAULT_CLASS)
                    .to_string();
                SourceFile {
                    file_name: format!("{class_name}{}", self.suffix),
                    class_name,
                }
            }
        }
    }

    pub fn has_compile_step(&self) -> bool {
        self.compile.is_some()
    }

    pub fn compile_command(&self, source: &SourceFile) -> Option<Vec<String>> {
        self.compile
            .as_ref()
            .map(|template| apply_template(template, source))
    }

    pub fn run_command(&self, source: &SourceFile) -> Vec<String> {
        apply_template(&self.run, source)
    }
}

impl From<&LanguageConfig> for Adapter {
    fn from(config: &LanguageConfig) -> Self {
        let naming = match config.naming {
            NamingConfig::Fixed => SourceNaming::Fixed(DEFAULT_STEM.to_string()),
            NamingConfig::PublicClass => SourceNaming::PublicClass,
        };
        Self {
            name: config.name.clone(),
            suffix: config.suffix.clone(),
            naming,
            compile: config.compile.clone(),
            run: config.run.clone(),
            image: config
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
        }
    }
}

/// Replaces `%SOURCE%`, `%EXECUTABLE%` and `%CLASS%` in each argument
fn apply_template(template: &[String], source: &SourceFile) -> Vec<String> {
    let mapping = [
        ("%SOURCE%", source.file_name.as_str()),
        ("%EXECUTABLE%", EXECUTABLE),
        ("%CLASS%", source.class_name.as_str()),
    ];

    template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}

/// Extracts the identifier following the first `public class`
///
/// Anything that is not a plain identifier is rejected, as the name ends up
/// as a file name inside the workspace.
fn public_class_name(source_code: &str) -> Option<&str> {
    let line = source_code.lines().find(|l| l.contains("public class"))?;
    let rest = line.split_once("public class")?.1.trim_start();
    let name = rest
        .split(|c: char| c.is_whitespace() || c == '{' || c == '<')
        .next()?;

    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    valid.then_some(name)
}

/// Maps language identifiers to their adapters
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    adapters: HashMap<String, Arc<Adapter>>,
}

impl LanguageRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the stock languages
    pub fn builtin() -> Self {
        let fixed = || SourceNaming::Fixed(DEFAULT_STEM.to_string());
        let mut registry = Self::empty();
        for adapter in [
            Adapter::new("python", ".py", fixed(), None, &["python", "%SOURCE%"], "python:3.12-slim"),
            Adapter::new("python3", ".py", fixed(), None, &["python3", "%SOURCE%"], "python:3.12-slim"),
            Adapter::new(
                "cpp",
                ".cpp",
                fixed(),
                Some(&["g++", "-O2", "-o", "%EXECUTABLE%", "%SOURCE%"]),
                &["%EXECUTABLE%"],
                "gcc:11.2.0",
            ),
            Adapter::new(
                "c",
                ".c",
                fixed(),
                Some(&["gcc", "-O2", "-o", "%EXECUTABLE%", "%SOURCE%"]),
                &["%EXECUTABLE%"],
                "gcc:11.2.0",
            ),
            Adapter::new(
                "java",
                ".java",
                SourceNaming::PublicClass,
                Some(&["javac", "%SOURCE%"]),
                &["java", "%CLASS%"],
                "openjdk:17-slim",
            ),
            Adapter::new(
                "go",
                ".go",
                fixed(),
                Some(&["go", "build", "-o", "%EXECUTABLE%", "%SOURCE%"]),
                &["%EXECUTABLE%"],
                "golang:1.18-alpine",
            ),
        ] {
            registry.register(adapter);
        }
        registry
    }

    /// Stock languages overridden or extended by configured ones
    pub fn from_config(languages: &[LanguageConfig]) -> Self {
        let mut registry = Self::builtin();
        for language in languages {
            log::debug!("Registering language {}", language.name);
            registry.register(Adapter::from(language));
        }
        registry
    }

    /// Adds an adapter, replacing any previous one with the same name
    pub fn register(&mut self, adapter: Adapter) {
        self.adapters.insert(adapter.name.clone(), Arc::new(adapter));
    }

    pub fn resolve(&self, language: &str) -> Result<Arc<Adapter>, UnsupportedLanguage> {
        self.adapters
            .get(language)
            .cloned()
            .ok_or_else(|| UnsupportedLanguage(language.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
