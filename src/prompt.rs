use std::fmt::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::TimeDelta;

use crate::knowledge::LinkCache;
use crate::persona::{Expertise, PersonaConfig, Personality};

/// Used whenever no usable persona has been configured.
pub const DEFAULT_PERSONA_PROMPT: &str = "You are Peter, a CGI and professional photo-editing expert with many years of experience.

PERSONALITY: Friendly, enthusiastic, explains things simply, uses emoji where it fits, answers in natural, conversational language.

EXPERTISE: CGI, photo manipulation, color grading, lighting, texture design, rendering, Adobe Photoshop workflows, digital art.

HOW TO ANSWER: Give detailed, professional analysis, concrete suggestions that can be acted on, explain the reasoning, guide step by step, and encourage creative experimentation.

QUALITY REFERENCES: Hold work to the standards of top studios such as DBOX, Binyan Studios, The Boundary and the world's leading CGI houses.";

/// Builds the system message sent ahead of every conversation.
pub struct PromptComposer {
    cache: Arc<LinkCache>,
}

impl PromptComposer {
    pub fn new(cache: Arc<LinkCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<LinkCache> {
        &self.cache
    }

    /// Never fails: a missing persona yields the default prompt and knowledge
    /// errors only drop the knowledge section.
    pub async fn compose(&self, persona: Option<&PersonaConfig>) -> String {
        let Some((persona, personality, expertise)) = persona.and_then(|p| {
            p.ai.as_ref()?;
            Some((p, p.personality.as_ref()?, p.expertise.as_ref()?))
        }) else {
            return DEFAULT_PERSONA_PROMPT.to_string();
        };

        let mut prompt = render_persona(persona, personality, expertise);

        match self.knowledge_section(persona).await {
            Ok(Some(section)) => prompt.push_str(&section),
            Ok(None) => {}
            Err(e) => tracing::error!("Error processing knowledge links: {e:#}"),
        }

        prompt
    }

    async fn knowledge_section(&self, persona: &PersonaConfig) -> Result<Option<String>> {
        let settings = &persona.knowledge_links;
        if !settings.enabled {
            return Ok(None);
        }
        let active: Vec<_> = settings.active_links().collect();
        if active.is_empty() {
            return Ok(None);
        }

        let hours = i64::try_from(settings.cache_duration_hours)?;
        let ttl = TimeDelta::try_hours(hours).ok_or_else(|| {
            anyhow::anyhow!("cache_duration_hours out of range: {hours}")
        })?;

        let mut section = String::from("\n\n## KNOWLEDGE BASE REFERENCES:\n");
        for link in active {
            let content = self.cache.resolve(link, ttl).await;
            write!(section, "\n### {} ({}):\n{}\n", link.title, link.category, content)?;
        }
        Ok(Some(section))
    }
}

fn render_persona(persona: &PersonaConfig, personality: &Personality, expertise: &Expertise) -> String {
    let name = persona.ai_name().unwrap_or("Peter");
    let mut prompt = format!("You are {name}, {}", personality.role);
    if !personality.experience.is_empty() {
        prompt.push_str(&format!(" with {}", personality.experience));
    }
    prompt.push('.');

    let style = &personality.communication_style;
    let mut style_lines = String::new();
    for (label, value) in [
        ("Tone", &style.tone),
        ("Approach", &style.approach),
        ("Language", &style.language),
        ("Format", &style.format),
    ] {
        if !value.is_empty() {
            style_lines.push_str(&format!("{label}: {value}\n"));
        }
    }
    let mut personality_body = bullets(&personality.characteristics);
    if !style_lines.is_empty() {
        if !personality_body.is_empty() {
            personality_body.push_str("\n\n");
        }
        personality_body.push_str(style_lines.trim_end());
    }
    section(&mut prompt, "PERSONALITY & COMMUNICATION STYLE", &personality_body);

    section(&mut prompt, "CORE EXPERTISE", &bullets(&expertise.primary_skills));
    section(&mut prompt, "SPECIALIZED AREAS", &bullets(&expertise.specialized_areas));

    let sw = &expertise.software_proficiency;
    section(
        &mut prompt,
        "TOOLS & SOFTWARE MASTERY",
        &labeled_bullets(&[
            ("Modeling", &sw.modeling),
            ("Texturing", &sw.texturing),
            ("Rendering", &sw.rendering),
            ("Compositing", &sw.compositing),
            ("Real-time", &sw.realtime),
            ("AI Tools", &sw.ai_tools),
        ]),
    );

    let ks = &persona.knowledge_sources;
    section(
        &mut prompt,
        "KNOWLEDGE BASE & REFERENCES",
        &labeled_lines(&[
            ("Industry Standards", &ks.industry_standards),
            ("Learning Resources", &ks.learning_resources),
            ("Industry News", &ks.industry_news),
            ("Research Papers", &ks.research_papers),
        ]),
    );

    let bp = &persona.behavior_patterns;
    section(&mut prompt, "ANALYSIS APPROACH", &bullets(&bp.analysis_approach));
    section(&mut prompt, "RESPONSE STRUCTURE", &bullets(&bp.response_structure));
    section(&mut prompt, "TEACHING STYLE", &bullets(&bp.teaching_style));

    prompt.push_str(
        "\n\nAlways remember: you are an expert with deep knowledge, a friendly approach, \
         and a focus on practical, actionable advice.",
    );
    prompt
}

fn section(prompt: &mut String, title: &str, body: &str) {
    if body.is_empty() {
        return;
    }
    prompt.push_str(&format!("\n\n## {title}:\n{body}"));
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("• {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn labeled_bullets(groups: &[(&str, &Vec<String>)]) -> String {
    groups
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(label, items)| format!("• {label}: {}", items.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn labeled_lines(groups: &[(&str, &Vec<String>)]) -> String {
    groups
        .iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(label, items)| format!("{label}: {}", items.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::tests::{CountingFetcher, link};
    use crate::persona::DEFAULT_PERSONA_JSON;
    use std::sync::atomic::Ordering;

    fn composer() -> (Arc<CountingFetcher>, PromptComposer) {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache = Arc::new(LinkCache::new(fetcher.clone()));
        (fetcher, PromptComposer::new(cache))
    }

    fn persona() -> PersonaConfig {
        serde_json::from_str(DEFAULT_PERSONA_JSON).unwrap()
    }

    #[tokio::test]
    async fn test_absent_persona_uses_default() {
        let (_, composer) = composer();
        assert_eq!(composer.compose(None).await, DEFAULT_PERSONA_PROMPT);
    }

    #[tokio::test]
    async fn test_missing_personality_uses_default_verbatim() {
        let (fetcher, composer) = composer();
        let mut p = persona();
        p.personality = None;
        p.knowledge_links.enabled = true;
        p.knowledge_links.links = vec![link("1", "https://a.example")];

        assert_eq!(composer.compose(Some(&p)).await, DEFAULT_PERSONA_PROMPT);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renders_persona_sections() {
        let (_, composer) = composer();
        let prompt = composer.compose(Some(&persona())).await;
        assert!(prompt.starts_with(
            "You are Peter, a CGI and professional photo-editing expert with many years of studio experience."
        ));
        assert!(prompt.contains("## PERSONALITY & COMMUNICATION STYLE:\n• Friendly and enthusiastic"));
        assert!(prompt.contains("Tone: warm and encouraging"));
        assert!(prompt.contains("• Modeling: 3ds Max, Blender"));
        assert!(prompt.contains("Industry Standards: DBOX, Binyan Studios, The Boundary"));
        assert!(!prompt.contains("Research Papers"));
        assert!(!prompt.contains("KNOWLEDGE BASE REFERENCES"));
    }

    #[tokio::test]
    async fn test_appends_active_links_only() {
        let (fetcher, composer) = composer();
        let mut p = persona();
        let mut inactive = link("2", "https://b.example");
        inactive.active = false;
        p.knowledge_links.enabled = true;
        p.knowledge_links.links = vec![link("1", "https://a.example"), inactive];

        let prompt = composer.compose(Some(&p)).await;
        assert!(prompt.contains("## KNOWLEDGE BASE REFERENCES:\n\n### Link 1 (tools):\nhttps://a.example#1\n"));
        assert!(!prompt.contains("b.example"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Second composition is served from the cache.
        let again = composer.compose(Some(&p)).await;
        assert_eq!(prompt, again);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_links_are_not_fetched() {
        let (fetcher, composer) = composer();
        let mut p = persona();
        p.knowledge_links.enabled = false;
        p.knowledge_links.links = vec![link("1", "https://a.example")];

        let prompt = composer.compose(Some(&p)).await;
        assert!(!prompt.contains("KNOWLEDGE BASE REFERENCES"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_knowledge_error_keeps_persona_prompt() {
        let (fetcher, composer) = composer();
        let mut p = persona();
        p.knowledge_links.enabled = true;
        p.knowledge_links.cache_duration_hours = u64::MAX;
        p.knowledge_links.links = vec![link("1", "https://a.example")];

        let prompt = composer.compose(Some(&p)).await;
        assert!(prompt.starts_with("You are Peter"));
        assert!(!prompt.contains("KNOWLEDGE BASE REFERENCES"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
