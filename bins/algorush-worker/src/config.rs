// Language strategy management for the grading worker
use algorush_common::types::Language;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Marker that bounds the solution unit in both template and submission,
/// e.g. `class Solution { ... };`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionUnit {
    pub keyword: String,
    pub name: String,
}

/// Compile/run contract for one language.
///
/// Commands run inside the sandbox with the workspace mounted as the
/// working directory, so file names are relative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    pub source_file: String,
    pub input_file: String,
    /// File produced by `compile` and consumed by `run`.
    pub artifact: String,
    /// Interpreted languages leave this out.
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
    pub solution_unit: SolutionUnit,
}

impl LanguageConfig {
    pub fn cpp() -> Self {
        Self {
            name: "cpp".to_string(),
            image: "gcc:11.2".to_string(),
            source_file: "solution.cpp".to_string(),
            input_file: "input.txt".to_string(),
            artifact: "solution".to_string(),
            compile: Some(
                ["g++", "-o", "solution", "solution.cpp", "-std=c++17"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            run: ["sh", "-c", "./solution < input.txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            solution_unit: SolutionUnit {
                keyword: "class".to_string(),
                name: "Solution".to_string(),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.run.is_empty() {
            bail!("language '{}' has an empty run command", self.name);
        }
        if matches!(&self.compile, Some(cmd) if cmd.is_empty()) {
            bail!("language '{}' has an empty compile command", self.name);
        }
        for file in [&self.source_file, &self.input_file, &self.artifact] {
            if file.is_empty() || file.contains('/') || file.contains("..") {
                bail!("language '{}' has an invalid file name: {:?}", self.name, file);
            }
        }
        if self.solution_unit.keyword.is_empty() || self.solution_unit.name.is_empty() {
            bail!("language '{}' has an empty solution unit marker", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language strategy registry
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language strategies from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to load {}", config_path.display()))
    }

    fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            lang.validate()?;
            let key = lang.name.to_lowercase();
            if configs.insert(key, lang).is_some() {
                bail!("duplicate language entry in languages.json");
            }
        }

        Ok(Self { configs })
    }

    /// Load config/languages.json, falling back to the built-in C++ strategy
    /// when the file does not exist.
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new("config/languages.json");
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::builtin())
        }
    }

    pub fn builtin() -> Self {
        let cpp = LanguageConfig::cpp();
        let mut configs = HashMap::new();
        configs.insert(cpp.name.clone(), cpp);
        Self { configs }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        let lang_name = language.to_string();
        self.configs
            .get(&lang_name)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", lang_name))
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}
