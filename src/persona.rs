use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Administrator-editable description of the assistant.
///
/// The top-level sections are optional so that a partially filled config
/// can still be stored; prompt composition falls back to the default
/// persona when `ai`, `personality` or `expertise` is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<Personality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertise: Option<Expertise>,
    #[serde(default)]
    pub knowledge_sources: KnowledgeSources,
    #[serde(default)]
    pub behavior_patterns: BehaviorPatterns,
    #[serde(default)]
    pub knowledge_links: KnowledgeLinksSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiIdentity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub role: String,
    #[serde(default)]
    pub experience: String,
    #[serde(default)]
    pub characteristics: Vec<String>,
    #[serde(default)]
    pub communication_style: CommunicationStyle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommunicationStyle {
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub approach: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expertise {
    #[serde(default)]
    pub primary_skills: Vec<String>,
    #[serde(default)]
    pub specialized_areas: Vec<String>,
    #[serde(default)]
    pub software_proficiency: SoftwareProficiency,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoftwareProficiency {
    #[serde(default)]
    pub modeling: Vec<String>,
    #[serde(default)]
    pub texturing: Vec<String>,
    #[serde(default)]
    pub rendering: Vec<String>,
    #[serde(default)]
    pub compositing: Vec<String>,
    #[serde(default)]
    pub realtime: Vec<String>,
    #[serde(default)]
    pub ai_tools: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeSources {
    #[serde(default)]
    pub industry_standards: Vec<String>,
    #[serde(default)]
    pub learning_resources: Vec<String>,
    #[serde(default)]
    pub industry_news: Vec<String>,
    #[serde(default)]
    pub research_papers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorPatterns {
    #[serde(default)]
    pub analysis_approach: Vec<String>,
    #[serde(default)]
    pub response_structure: Vec<String>,
    #[serde(default)]
    pub teaching_style: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeLinksSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_duration_hours")]
    pub cache_duration_hours: u64,
    #[serde(default)]
    pub links: Vec<KnowledgeLink>,
}

impl Default for KnowledgeLinksSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_duration_hours: default_cache_duration_hours(),
            links: Vec::new(),
        }
    }
}

fn default_cache_duration_hours() -> u64 {
    24
}

impl KnowledgeLinksSettings {
    pub fn active_links(&self) -> impl Iterator<Item = &KnowledgeLink> {
        self.links.iter().filter(|l| l.active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeLink {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: LinkType,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    #[default]
    Web,
    Pdf,
    Documentation,
    Gallery,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Web => "web",
            LinkType::Pdf => "pdf",
            LinkType::Documentation => "documentation",
            LinkType::Gallery => "gallery",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl PersonaConfig {
    /// Rejects configs that cannot drive a persona prompt.
    pub fn validate(&self) -> Result<()> {
        if self.ai.is_none() || self.personality.is_none() || self.expertise.is_none() {
            anyhow::bail!("Invalid config structure: ai, personality and expertise are required");
        }
        let mut seen = std::collections::HashSet::new();
        for link in &self.knowledge_links.links {
            if link.id.trim().is_empty() {
                anyhow::bail!("Knowledge link '{}' has an empty id", link.title);
            }
            if !link.url.starts_with("http://") && !link.url.starts_with("https://") {
                anyhow::bail!(
                    "Knowledge link '{}' must use an http:// or https:// URL",
                    link.id
                );
            }
            if !seen.insert(link.id.as_str()) {
                anyhow::bail!("Duplicate knowledge link id '{}'", link.id);
            }
        }
        Ok(())
    }

    pub fn ai_name(&self) -> Option<&str> {
        self.ai.as_ref().map(|a| a.name.as_str())
    }
}

/// Holds the active persona and mirrors it to `persona.json`.
pub struct PersonaStore {
    path: PathBuf,
    current: RwLock<Option<PersonaConfig>>,
}

impl PersonaStore {
    /// Load the stored persona if one exists. A missing or malformed file is
    /// not an error; the service then runs with the default persona until an
    /// admin uploads one.
    pub fn open(path: PathBuf) -> Result<Self> {
        let current = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read persona: {}", path.display()))?;
            match serde_json::from_str::<PersonaConfig>(&content) {
                Ok(persona) => Some(persona),
                Err(e) => {
                    tracing::warn!("Ignoring malformed persona {}: {e}", path.display());
                    None
                }
            }
        } else {
            None
        };
        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> Option<PersonaConfig> {
        self.current
            .read()
            .expect("persona lock poisoned")
            .clone()
    }

    /// Validate, persist and install a new persona.
    pub fn replace(&self, persona: PersonaConfig) -> Result<()> {
        persona.validate()?;
        self.save_to_disk(&persona)?;
        *self.current.write().expect("persona lock poisoned") = Some(persona);
        Ok(())
    }

    fn save_to_disk(&self, persona: &PersonaConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(persona)?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write persona: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to write persona: {}", self.path.display()))?;
        Ok(())
    }
}

/// Persona written by `init`, so a fresh install has something to edit.
pub const DEFAULT_PERSONA_JSON: &str = r#"{
  "ai": { "name": "Peter" },
  "personality": {
    "role": "a CGI and professional photo-editing expert",
    "experience": "many years of studio experience",
    "characteristics": [
      "Friendly and enthusiastic",
      "Explains clearly, step by step",
      "Uses emoji where it helps"
    ],
    "communication_style": {
      "tone": "warm and encouraging",
      "approach": "detailed, practical analysis",
      "language": "natural and easy to follow",
      "format": "short sections with actionable bullet points"
    }
  },
  "expertise": {
    "primary_skills": ["CGI", "Photo manipulation", "Color grading", "Lighting"],
    "specialized_areas": ["Architectural visualization", "Texture design"],
    "software_proficiency": {
      "modeling": ["3ds Max", "Blender"],
      "texturing": ["Substance Painter"],
      "rendering": ["V-Ray", "Corona"],
      "compositing": ["Photoshop", "Nuke"],
      "realtime": ["Unreal Engine"],
      "ai_tools": ["Stable Diffusion"]
    }
  },
  "knowledge_sources": {
    "industry_standards": ["DBOX", "Binyan Studios", "The Boundary"]
  },
  "behavior_patterns": {
    "analysis_approach": ["Assess composition, lighting and materials first"],
    "response_structure": ["Summary", "Detailed suggestions", "Next steps"],
    "teaching_style": ["Encourage creative experimentation"]
  },
  "knowledge_links": {
    "enabled": false,
    "cache_duration_hours": 24,
    "links": []
  }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersonaConfig {
        serde_json::from_str(DEFAULT_PERSONA_JSON).unwrap()
    }

    #[test]
    fn test_default_persona_is_valid() {
        let persona = sample();
        persona.validate().unwrap();
        assert_eq!(persona.ai_name(), Some("Peter"));
        assert_eq!(persona.knowledge_links.cache_duration_hours, 24);
    }

    #[test]
    fn test_validate_rejects_missing_sections() {
        let persona: PersonaConfig =
            serde_json::from_str(r#"{"ai": {"name": "Peter"}, "expertise": {}}"#).unwrap();
        let err = persona.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid config structure"));
    }

    #[test]
    fn test_link_defaults_and_type_field() {
        let link: KnowledgeLink = serde_json::from_str(
            r#"{"id": "1", "title": "Docs", "url": "https://example.com", "type": "documentation"}"#,
        )
        .unwrap();
        assert_eq!(link.kind, LinkType::Documentation);
        assert_eq!(link.category, "general");
        assert_eq!(link.priority, Priority::Medium);
        assert!(link.active);
    }

    #[test]
    fn test_validate_rejects_duplicate_and_bad_links() {
        let mut persona = sample();
        let link = KnowledgeLink {
            id: "a".into(),
            title: "A".into(),
            url: "https://a.example".into(),
            kind: LinkType::Web,
            category: "general".into(),
            description: String::new(),
            priority: Priority::High,
            active: true,
        };
        persona.knowledge_links.links = vec![link.clone(), link.clone()];
        assert!(persona.validate().is_err());

        persona.knowledge_links.links = vec![KnowledgeLink {
            url: "ftp://a.example".into(),
            ..link
        }];
        assert!(persona.validate().is_err());
    }

    #[test]
    fn test_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persona.json");

        let store = PersonaStore::open(path.clone()).unwrap();
        assert!(store.get().is_none());
        store.replace(sample()).unwrap();

        let reopened = PersonaStore::open(path).unwrap();
        assert_eq!(reopened.get().unwrap().ai_name(), Some("Peter"));
    }

    #[test]
    fn test_store_rejects_invalid_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonaStore::open(dir.path().join("persona.json")).unwrap();
        store.replace(sample()).unwrap();

        assert!(store.replace(PersonaConfig::default()).is_err());
        assert_eq!(store.get().unwrap().ai_name(), Some("Peter"));
    }

    #[test]
    fn test_store_ignores_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persona.json");
        // `personality` without its required `role`
        std::fs::write(&path, r#"{"ai": {"name": "X"}, "personality": {}}"#).unwrap();

        let store = PersonaStore::open(path.clone()).unwrap();
        assert!(store.get().is_none());

        store.replace(sample()).unwrap();
        let reopened = PersonaStore::open(path).unwrap();
        assert_eq!(reopened.get().unwrap().ai_name(), Some("Peter"));
    }
}
