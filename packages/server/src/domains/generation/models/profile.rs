//! Per-kind behaviour: what to ask the backend, what shape to expect back,
//! and how to run it.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use extraction::ResultShape;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::inputs::JobInputs;

static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([a-z0-9_]+)\s*\}\}").unwrap());

/// Parameter values longer than this are rejected before any work starts.
pub const MAX_PARAMETER_CHARS: usize = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MarketAnalysis,
    ProductAnalysis,
    PainpointExtraction,
    ImageComposition,
    VirtualTryOn,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::MarketAnalysis,
        JobKind::ProductAnalysis,
        JobKind::PainpointExtraction,
        JobKind::ImageComposition,
        JobKind::VirtualTryOn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::MarketAnalysis => "market_analysis",
            JobKind::ProductAnalysis => "product_analysis",
            JobKind::PainpointExtraction => "painpoint_extraction",
            JobKind::ImageComposition => "image_composition",
            JobKind::VirtualTryOn => "virtual_try_on",
        }
    }

    pub fn profile(self) -> &'static KindProfile {
        match self {
            JobKind::MarketAnalysis => &MARKET_ANALYSIS,
            JobKind::ProductAnalysis => &PRODUCT_ANALYSIS,
            JobKind::PainpointExtraction => &PAINPOINT_EXTRACTION,
            JobKind::ImageComposition => &IMAGE_COMPOSITION,
            JobKind::VirtualTryOn => &VIRTUAL_TRY_ON,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown job kind '{}'", s))
    }
}

/// Whether Start waits for the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs inline; Start returns Done or Error
    Interactive,
    /// Submitted to the worker pool; Start returns Processing
    Background,
}

/// Which configured model a kind talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Text,
    Image,
}

#[derive(Debug)]
pub struct KindProfile {
    pub kind: JobKind,
    pub shape: ResultShape,
    pub mode: ExecutionMode,
    pub model: ModelTier,
    /// Prompt with `{{name}}` slots filled from the job's parameters
    pub prompt_template: &'static str,
    pub required_parameters: &'static [&'static str],
    pub min_images: usize,
    pub max_images: usize,
}

impl KindProfile {
    /// Static checks on inputs. Runs before the job is touched.
    pub fn validate(&self, inputs: &JobInputs) -> Result<(), String> {
        for name in self.required_parameters {
            if inputs.parameter(name).is_none() {
                return Err(format!("{} requires parameter '{}'", self.kind, name));
            }
        }

        if let Some((name, _)) = inputs
            .parameters
            .iter()
            .find(|(_, value)| value.chars().count() > MAX_PARAMETER_CHARS)
        {
            return Err(format!(
                "parameter '{}' exceeds {} characters",
                name, MAX_PARAMETER_CHARS
            ));
        }

        let count = inputs.images.len();
        if count < self.min_images || count > self.max_images {
            return Err(match (self.min_images, self.max_images) {
                (min, max) if min == max => {
                    format!("{} needs exactly {} images, got {}", self.kind, min, count)
                }
                (min, max) => format!(
                    "{} needs between {} and {} images, got {}",
                    self.kind, min, max, count
                ),
            });
        }

        for image in &inputs.images {
            image
                .source
                .validate()
                .map_err(|e| format!("image '{}': {}", image.label, e))?;
        }

        Ok(())
    }

    /// Fill the prompt template. Missing optional slots render empty.
    pub fn render_prompt(&self, inputs: &JobInputs) -> String {
        RE_PLACEHOLDER
            .replace_all(self.prompt_template, |caps: &Captures| {
                inputs.parameter(&caps[1]).unwrap_or("").to_string()
            })
            .trim()
            .to_string()
    }

    /// Stand-in for an unresolved structured result. Same top-level keys as a
    /// real answer so readers need no special casing.
    pub fn placeholder(&self) -> Value {
        match self.kind {
            JobKind::MarketAnalysis => json!({
                "status": "unavailable",
                "summary": "",
                "segments": [],
                "competitors": [],
                "trends": [],
                "risks": []
            }),
            JobKind::ProductAnalysis => json!({
                "status": "unavailable",
                "strengths": [],
                "weaknesses": [],
                "improvements": [],
                "audiences": []
            }),
            JobKind::PainpointExtraction => json!({
                "status": "unavailable",
                "painpoints": []
            }),
            JobKind::ImageComposition | JobKind::VirtualTryOn => json!({
                "status": "unavailable",
                "image": null
            }),
        }
    }
}

// ============================================================================
// Profiles
// ============================================================================

static MARKET_ANALYSIS: KindProfile = KindProfile {
    kind: JobKind::MarketAnalysis,
    shape: ResultShape::Structured,
    mode: ExecutionMode::Background,
    model: ModelTier::Text,
    prompt_template: r#"You are a market research analyst.

Product: {{product}}
Target market: {{market}}
Additional context: {{context}}

Analyse the market for this product. Respond with JSON only, no prose, using this structure:
{"summary": string, "segments": [{"name": string, "size": string, "needs": [string]}], "competitors": [{"name": string, "positioning": string}], "trends": [string], "risks": [string]}"#,
    required_parameters: &["product", "market"],
    min_images: 0,
    max_images: 0,
};

static PRODUCT_ANALYSIS: KindProfile = KindProfile {
    kind: JobKind::ProductAnalysis,
    shape: ResultShape::Structured,
    mode: ExecutionMode::Background,
    model: ModelTier::Text,
    prompt_template: r#"You are a product strategist reviewing a product and any attached product photos.

Product: {{product}}
Description: {{description}}

Respond with JSON only, no prose, using this structure:
{"strengths": [string], "weaknesses": [string], "improvements": [string], "audiences": [{"name": string, "reason": string}]}"#,
    required_parameters: &["product"],
    min_images: 0,
    max_images: 4,
};

static PAINPOINT_EXTRACTION: KindProfile = KindProfile {
    kind: JobKind::PainpointExtraction,
    shape: ResultShape::Structured,
    mode: ExecutionMode::Background,
    model: ModelTier::Text,
    prompt_template: r#"Identify the customer painpoints a product should address.

Product: {{product}}
Audience: {{audience}}
Customer feedback: {{feedback}}

Respond with JSON only, no prose, using this structure:
{"painpoints": [{"title": string, "description": string, "severity": "low" | "medium" | "high", "evidence": string}]}"#,
    required_parameters: &["product", "audience"],
    min_images: 0,
    max_images: 0,
};

static IMAGE_COMPOSITION: KindProfile = KindProfile {
    kind: JobKind::ImageComposition,
    shape: ResultShape::Media,
    mode: ExecutionMode::Interactive,
    model: ModelTier::Image,
    prompt_template: r#"Compose a single new image from the attached images.

Instructions: {{instructions}}
Style: {{style}}

Return the generated image."#,
    required_parameters: &["instructions"],
    min_images: 1,
    max_images: 4,
};

static VIRTUAL_TRY_ON: KindProfile = KindProfile {
    kind: JobKind::VirtualTryOn,
    shape: ResultShape::Media,
    mode: ExecutionMode::Interactive,
    model: ModelTier::Image,
    prompt_template: r#"Generate a photorealistic image of the person in the first image wearing the garment shown in the second image.
Keep the person's face, pose, body shape and background unchanged.
{{notes}}

Return the generated image."#,
    required_parameters: &[],
    min_images: 2,
    max_images: 2,
};
