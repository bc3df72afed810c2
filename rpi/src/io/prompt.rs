//! Stage prompts and review descriptions rendered from embedded templates.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{Stage, WorkItem};

const RESEARCH_TEMPLATE: &str = include_str!("prompts/research.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const ADHOC_TEMPLATE: &str = include_str!("prompts/adhoc.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// Everything a stage prompt can draw on.
#[derive(Debug, Clone)]
pub struct StagePromptInput<'a> {
    pub item: &'a WorkItem,
    pub feature_id: &'a str,
    pub stage: Stage,
    /// Path the stage's own artifact will be committed to.
    pub artifact_path: Option<&'a str>,
    pub research: Option<(&'a str, &'a str)>,
    pub plan: Option<(&'a str, &'a str)>,
    /// Reviewer feedback; only set for the entry stage of a rerun.
    pub feedback: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ReviewBodyInput<'a> {
    pub item: &'a WorkItem,
    pub summary: &'a str,
    pub research_path: &'a str,
    pub plan_path: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("research", RESEARCH_TEMPLATE),
            ("plan", PLAN_TEMPLATE),
            ("implement", IMPLEMENT_TEMPLATE),
            ("adhoc", ADHOC_TEMPLATE),
            ("review", REVIEW_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load {name} template"))?;
        }
        Ok(Self { env })
    }

    pub fn render_stage(&self, input: &StagePromptInput<'_>) -> Result<String> {
        let name = match input.stage {
            Stage::Research => "research",
            Stage::Plan => "plan",
            Stage::Implement => "implement",
            Stage::Completed => anyhow::bail!("completed runs have no stage prompt"),
        };
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(context! {
                item => input.item,
                feature_id => input.feature_id,
                artifact_path => input.artifact_path,
                research => input.research.map(|(_, content)| content.trim()),
                research_path => input.research.map(|(path, _)| path),
                plan => input.plan.map(|(_, content)| content.trim()),
                plan_path => input.plan.map(|(path, _)| path),
                feedback => non_empty(input.feedback),
            })
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered)
    }

    pub fn render_adhoc(
        &self,
        item: &WorkItem,
        feature_id: &str,
        question: &str,
        research: Option<&str>,
        plan: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("adhoc")?;
        let rendered = template
            .render(context! {
                item => item,
                feature_id => feature_id,
                question => question.trim(),
                research => non_empty(research),
                plan => non_empty(plan),
            })
            .context("render adhoc prompt")?;
        Ok(rendered)
    }

    pub fn render_review_body(&self, input: &ReviewBodyInput<'_>) -> Result<String> {
        let template = self.env.get_template("review")?;
        let summary = non_empty(Some(input.summary)).unwrap_or("Implementation complete.");
        let rendered = template
            .render(context! {
                item => input.item,
                summary => summary,
                research_path => input.research_path,
                plan_path => input.plan_path,
            })
            .context("render review body")?;
        Ok(rendered)
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}
