//! Built-in prompt templates rendered with minijinja.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{MetaAgent, TaskAnalysis};

const DECOMPOSER_TEMPLATE: &str = include_str!("prompts/decomposer.md");
const STEP_TEMPLATE: &str = include_str!("prompts/step.md");
const META_REVIEW_TEMPLATE: &str = include_str!("prompts/meta_review.md");
const MEMORY_CONTEXT_TEMPLATE: &str = include_str!("prompts/memory_context.md");

/// One retrieved document as shown in the memory context block.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryDocContext {
    pub relevance: String,
    pub source: String,
    pub content: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("decomposer", DECOMPOSER_TEMPLATE)
            .context("load decomposer template")?;
        env.add_template("step", STEP_TEMPLATE)
            .context("load step template")?;
        env.add_template("meta_review", META_REVIEW_TEMPLATE)
            .context("load meta review template")?;
        env.add_template("memory_context", MEMORY_CONTEXT_TEMPLATE)
            .context("load memory context template")?;
        Ok(Self { env })
    }

    pub fn render_decomposer(
        &self,
        task: &str,
        analysis: Option<&TaskAnalysis>,
        max_steps: usize,
    ) -> Result<String> {
        let template = self.env.get_template("decomposer")?;
        let rendered = template.render(context! {
            task => task.trim(),
            analysis => analysis,
            max_steps => max_steps,
        })?;
        Ok(rendered)
    }

    pub fn render_step(
        &self,
        task: &str,
        step: &str,
        index: usize,
        total: usize,
        completed: &[String],
        marker: &str,
    ) -> Result<String> {
        let template = self.env.get_template("step")?;
        let rendered = template.render(context! {
            task => task.trim(),
            step => step.trim(),
            index => index,
            total => total,
            completed => completed,
            marker => marker,
        })?;
        Ok(rendered)
    }

    pub fn render_meta_review(
        &self,
        role: MetaAgent,
        task: &str,
        needs_tests: bool,
        marker: &str,
    ) -> Result<String> {
        let template = self.env.get_template("meta_review")?;
        let rendered = template.render(context! {
            role => role.as_str(),
            task => task.trim(),
            needs_tests => needs_tests,
            marker => marker,
        })?;
        Ok(rendered)
    }

    pub fn render_memory_context(&self, documents: &[MemoryDocContext]) -> Result<String> {
        let template = self.env.get_template("memory_context")?;
        let rendered = template.render(context! { documents => documents })?;
        Ok(rendered)
    }
}
