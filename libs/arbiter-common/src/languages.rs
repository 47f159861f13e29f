// Language registry: one template per supported language
//
// Loaded from `config/languages.json` when present, otherwise the built-in
// C++ and Python templates are used.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder in `compile` expanded to `sources/<name>` for every file
pub const SOURCES_PLACEHOLDER: &str = "{sources}";
/// Placeholder in `run` expanded to the entry file of an interpreted program
pub const ENTRY_PLACEHOLDER: &str = "{entry}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    Compiled,
    Interpreted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub kind: RunnerKind,
    /// Compiler argv, run with the workspace mounted at `/app`
    #[serde(default)]
    pub compile: Vec<String>,
    /// Program argv, run inside `/app`
    pub run: Vec<String>,
    /// Host paths mounted read-only at the same location. Paths missing on
    /// the host are skipped.
    pub toolchain_binds: Vec<PathBuf>,
    /// Entry file when a submission has more than one file
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn cpp() -> LanguageConfig {
    LanguageConfig {
        name: "cpp".to_string(),
        kind: RunnerKind::Compiled,
        compile: strings(&["g++", "-O2", SOURCES_PLACEHOLDER, "-o", "/app/build/a.out"]),
        run: strings(&["./a.out"]),
        toolchain_binds: ["/lib", "/lib64", "/usr", "/bin"].iter().map(PathBuf::from).collect(),
        entry_point: None,
        env: BTreeMap::new(),
    }
}

fn python() -> LanguageConfig {
    LanguageConfig {
        name: "python".to_string(),
        kind: RunnerKind::Interpreted,
        compile: Vec::new(),
        run: strings(&["python3", "/app/{entry}"]),
        toolchain_binds: ["/lib", "/lib64", "/usr"].iter().map(PathBuf::from).collect(),
        entry_point: Some("main.py".to_string()),
        env: BTreeMap::from([("LD_LIBRARY_PATH".to_string(), "/usr/local/lib".to_string())]),
    }
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson = serde_json::from_str(content)?;
        Self::from_configs(languages_json.languages)
    }

    fn from_configs(languages: Vec<LanguageConfig>) -> Result<Self> {
        let mut configs = HashMap::new();
        for lang in languages {
            validate(&lang)?;
            if configs.insert(lang.name.clone(), lang.clone()).is_some() {
                bail!("Language '{}' is configured twice", lang.name);
            }
        }
        if configs.is_empty() {
            bail!("No languages configured");
        }
        Ok(Self { configs })
    }

    /// Built-in C++ and Python templates
    pub fn builtin() -> Self {
        let configs = [cpp(), python()]
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self { configs }
    }

    /// Load from `path` if it exists, built-in templates otherwise
    pub fn load_or_builtin(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// Get configuration for a declared language
    pub fn get_config(&self, language: &str) -> Option<&LanguageConfig> {
        self.configs.get(&language.to_lowercase())
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.get_config(language).is_some()
    }

    /// List all supported languages, sorted
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

fn validate(lang: &LanguageConfig) -> Result<()> {
    if lang.name.is_empty() || lang.name != lang.name.to_lowercase() {
        bail!("Language name must be non-empty lowercase: '{}'", lang.name);
    }
    if lang.run.is_empty() {
        bail!("Language '{}' has an empty run command", lang.name);
    }
    match lang.kind {
        RunnerKind::Compiled if lang.compile.is_empty() => {
            bail!("Compiled language '{}' has no compile command", lang.name)
        }
        RunnerKind::Interpreted if !lang.run.iter().any(|a| a.contains(ENTRY_PLACEHOLDER)) => {
            bail!("Interpreted language '{}' must reference {} in run", lang.name, ENTRY_PLACEHOLDER)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_languages() {
        let manager = LanguageConfigManager::builtin();
        assert_eq!(manager.list_languages(), vec!["cpp", "python"]);
        assert_eq!(manager.get_config("cpp").unwrap().kind, RunnerKind::Compiled);
        assert_eq!(manager.get_config("Python").unwrap().kind, RunnerKind::Interpreted);
        assert!(manager.get_config("cobol").is_none());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "languages": [{
                "name": "lua",
                "kind": "interpreted",
                "run": ["lua", "/app/{entry}"],
                "toolchain_binds": ["/usr"],
                "entry_point": "main.lua"
            }]
        }"#;
        let manager = LanguageConfigManager::from_json(json).unwrap();
        assert!(manager.is_supported("lua"));
        assert!(!manager.is_supported("cpp"));
    }

    #[test]
    fn test_compiled_requires_compile_command() {
        let json = r#"{"languages": [{"name": "c", "kind": "compiled", "run": ["./a.out"], "toolchain_binds": []}]}"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_duplicate_language_rejected() {
        let json = r#"{"languages": [
            {"name": "lua", "kind": "interpreted", "run": ["lua", "{entry}"], "toolchain_binds": []},
            {"name": "lua", "kind": "interpreted", "run": ["lua", "{entry}"], "toolchain_binds": []}
        ]}"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_builtin() {
        let manager = LanguageConfigManager::load_or_builtin(Path::new("does/not/exist.json")).unwrap();
        assert!(manager.is_supported("cpp"));
    }

    #[test]
    fn test_shipped_languages_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/languages.json");
        let manager = LanguageConfigManager::load(&path).unwrap();
        assert_eq!(manager.list_languages(), vec!["c", "cpp", "python"]);
        assert_eq!(
            manager.get_config("python").unwrap().entry_point.as_deref(),
            Some("main.py")
        );
    }
}
