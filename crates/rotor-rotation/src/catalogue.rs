//! Model catalogue.
//!
//! The catalogue is the immutable list of providers and the models they
//! offer, tagged with the task categories each model is suited for.  It is
//! loaded once at startup (from TOML or the built-in table) and never mutated;
//! runtime status such as blacklisting lives in the
//! [`RotationManager`](crate::RotationManager).

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RotationError};

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Task-type classification used to filter model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Casual conversation.
    Dialog,
    /// Code generation and tool-heavy work.
    Code,
    /// Trivial completions where the cheapest model will do.
    Simple,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 3] = [Category::Dialog, Category::Code, Category::Simple];

    /// The lowercase name used in config files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dialog => "dialog",
            Self::Code => "code",
            Self::Simple => "simple",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dialog" => Ok(Self::Dialog),
            "code" => Ok(Self::Code),
            "simple" => Ok(Self::Simple),
            other => Err(format!(
                "unknown category `{other}` (expected dialog, code, or simple)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// A specific model offered by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier as sent to the provider (e.g. `"deepseek-chat"`).
    pub id: String,

    /// Name of the [`ProviderConfig`] serving this model.
    pub provider: String,

    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,

    /// Task categories this model is suited for.
    pub categories: BTreeSet<Category>,

    /// Whether the model is on a free tier.
    #[serde(default)]
    pub is_free: bool,

    /// Whether the model may be selected at all.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    /// Returns `true` if the model is tagged with `category`.
    pub fn serves(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    /// The display name, falling back to the id when none was configured.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}

/// Connection details for an upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name (e.g. `"groq"`).
    pub name: String,

    /// Base URL of the provider's API.
    pub base_url: String,

    /// Environment variable holding the API key.  Empty for keyless local
    /// providers.
    #[serde(default)]
    pub api_key_env: String,
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// The full set of providers and models known to the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalogue {
    /// Declared providers.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Declared models, in selection priority order.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

impl Catalogue {
    /// Build and validate a catalogue.
    pub fn new(providers: Vec<ProviderConfig>, models: Vec<ModelDescriptor>) -> Result<Self> {
        let catalogue = Self { providers, models };
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Parse a catalogue from TOML containing `[[providers]]` and
    /// `[[models]]` tables.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let catalogue: Catalogue = toml::from_str(input)?;
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Check that the catalogue is non-empty, model ids are unique, and every
    /// model references a declared provider.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(RotationError::EmptyCatalogue);
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if !provider_names.insert(provider.name.as_str()) {
                return Err(RotationError::InvalidCatalogue {
                    reason: format!("duplicate provider `{}`", provider.name),
                });
            }
        }

        let mut model_ids = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(RotationError::InvalidCatalogue {
                    reason: "model with empty id".into(),
                });
            }
            if !model_ids.insert(model.id.as_str()) {
                return Err(RotationError::InvalidCatalogue {
                    reason: format!("duplicate model id `{}`", model.id),
                });
            }
            if !provider_names.contains(model.provider.as_str()) {
                return Err(RotationError::UnknownProvider {
                    provider: model.provider.clone(),
                });
            }
            if model.categories.is_empty() {
                return Err(RotationError::InvalidCatalogue {
                    reason: format!("model `{}` has no categories", model.id),
                });
            }
        }

        Ok(())
    }

    /// Look up a model by id.
    pub fn model(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Look up a provider by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// The built-in catalogue of OpenAI-compatible providers, free tiers
    /// first and a local Ollama model as the last resort.
    pub fn builtin() -> Self {
        let providers = BUILTIN_PROVIDERS
            .iter()
            .map(|(name, base_url, key_env)| ProviderConfig {
                name: (*name).to_owned(),
                base_url: (*base_url).to_owned(),
                api_key_env: (*key_env).to_owned(),
            })
            .collect();

        let models = BUILTIN_MODELS
            .iter()
            .map(|entry| ModelDescriptor {
                id: entry.id.to_owned(),
                provider: entry.provider.to_owned(),
                display_name: entry.display_name.to_owned(),
                categories: entry.categories.iter().copied().collect(),
                is_free: entry.is_free,
                is_active: true,
            })
            .collect();

        Self { providers, models }
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

struct BuiltinModel {
    id: &'static str,
    provider: &'static str,
    display_name: &'static str,
    categories: &'static [Category],
    is_free: bool,
}

/// (name, base_url, api_key_env)
const BUILTIN_PROVIDERS: &[(&str, &str, &str)] = &[
    ("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    (
        "google",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "GOOGLE_API_KEY",
    ),
    ("openrouter", "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
    ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    ("ollama", "http://localhost:11434/v1", ""),
];

const BUILTIN_MODELS: &[BuiltinModel] = &[
    BuiltinModel {
        id: "llama-3.3-70b-versatile",
        provider: "groq",
        display_name: "Groq Llama 3.3 70B",
        categories: &[Category::Dialog, Category::Code],
        is_free: true,
    },
    BuiltinModel {
        id: "llama-3.1-8b-instant",
        provider: "groq",
        display_name: "Groq Llama 3.1 8B",
        categories: &[Category::Simple, Category::Dialog],
        is_free: true,
    },
    BuiltinModel {
        id: "gemini-2.5-flash",
        provider: "google",
        display_name: "Gemini 2.5 Flash",
        categories: &[Category::Dialog, Category::Code, Category::Simple],
        is_free: true,
    },
    BuiltinModel {
        id: "qwen/qwen-2.5-coder-32b-instruct",
        provider: "openrouter",
        display_name: "Qwen 2.5 Coder 32B",
        categories: &[Category::Code],
        is_free: false,
    },
    BuiltinModel {
        id: "deepseek-chat",
        provider: "deepseek",
        display_name: "DeepSeek Chat",
        categories: &[Category::Dialog, Category::Code],
        is_free: false,
    },
    BuiltinModel {
        id: "qwen2.5:latest",
        provider: "ollama",
        display_name: "Ollama Qwen 2.5",
        categories: &[Category::Dialog, Category::Code, Category::Simple],
        is_free: true,
    },
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
