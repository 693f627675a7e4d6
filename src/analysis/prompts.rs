// src/analysis/prompts.rs — Prompt templates (built-in, directory overrides, per-task custom)

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{context, Environment};
use serde::Serialize;

use super::types::Category;
use crate::infra::errors::DeskError;

pub const SYSTEM: &str = "system";
pub const COMPREHENSIVE: &str = "comprehensive";
pub const QUICK: &str = "quick";

const BUILTIN: [(&str, &str); 7] = [
    (SYSTEM, include_str!("prompts/system.j2")),
    ("questioning", include_str!("prompts/questioning.j2")),
    ("anxiety_handling", include_str!("prompts/anxiety_handling.j2")),
    ("closing", include_str!("prompts/closing.j2")),
    ("flow", include_str!("prompts/flow.j2")),
    (COMPREHENSIVE, include_str!("prompts/comprehensive.j2")),
    (QUICK, include_str!("prompts/quick.j2")),
];

#[derive(Debug, Serialize)]
pub struct ScoreLine {
    pub name: &'static str,
    pub score: f64,
}

/// Named template sources. Rendering goes through one shared environment.
pub struct PromptLibrary {
    env: Environment<'static>,
    sources: BTreeMap<&'static str, String>,
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        Self {
            env: Environment::new(),
            sources: BUILTIN
                .iter()
                .map(|(name, src)| (*name, src.to_string()))
                .collect(),
        }
    }

    /// Built-ins, with `<dir>/<name>.j2` replacing any template it names.
    pub fn load(dir: Option<&Path>) -> Result<Self, DeskError> {
        let mut lib = Self::builtin();
        let Some(dir) = dir else {
            return Ok(lib);
        };
        for (name, _) in BUILTIN {
            let path = dir.join(format!("{name}.j2"));
            if path.exists() {
                let source = std::fs::read_to_string(&path)?;
                lib.env
                    .render_str(&source, context! { transcript => "" })
                    .map_err(|e| DeskError::Config(format!("{}: {e}", path.display())))?;
                tracing::info!(template = name, path = %path.display(), "Prompt override loaded");
                lib.sources.insert(name, source);
            }
        }
        Ok(lib)
    }

    fn render_source<S: Serialize>(&self, name: &str, source: &str, ctx: S) -> Result<String, DeskError> {
        self.env
            .render_str(source, ctx)
            .map(|s| s.trim().to_string())
            .map_err(|e| DeskError::Other(anyhow::anyhow!("render prompt '{name}': {e}")))
    }

    fn render(&self, name: &str, transcript: &str) -> Result<String, DeskError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| DeskError::not_found("Prompt template", name))?;
        self.render_source(name, source, context! { transcript => transcript })
    }

    pub fn system(&self) -> Result<String, DeskError> {
        self.render(SYSTEM, "")
    }

    /// Category prompt. A per-task custom prompt replaces the template; the
    /// transcript is appended when the custom text does not reference it.
    pub fn category(
        &self,
        category: Category,
        transcript: &str,
        custom: Option<&str>,
    ) -> Result<String, DeskError> {
        match custom {
            Some(custom) if !custom.trim().is_empty() => {
                let rendered =
                    self.render_source(category.as_str(), custom, context! { transcript => transcript })?;
                if custom.contains("transcript") {
                    Ok(rendered)
                } else {
                    Ok(format!("{rendered}\n\n【文字起こし】\n{transcript}"))
                }
            }
            _ => self.render(category.as_str(), transcript),
        }
    }

    pub fn quick(&self, transcript: &str) -> Result<String, DeskError> {
        self.render(QUICK, transcript)
    }

    pub fn comprehensive(&self, transcript: &str, scores: &[ScoreLine]) -> Result<String, DeskError> {
        let source = self
            .sources
            .get(COMPREHENSIVE)
            .ok_or_else(|| DeskError::not_found("Prompt template", COMPREHENSIVE))?;
        self.render_source(
            COMPREHENSIVE,
            source,
            context! { transcript => transcript, scores => scores },
        )
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}
