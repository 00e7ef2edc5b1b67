//! Keyword-driven intent classification.
//!
//! The classifier is a pure function of the latest user text and a
//! [`KeywordTables`] value, so routing can be tested independently of the
//! wording shipped in `constants`.

use crate::constants::*;
use crate::types::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowIntent {
    ComponentSelection,
    CircuitDesign,
    ThreeDModeling,
    Simulation,
    Learning,
    None,
}

impl WorkflowIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowIntent::ComponentSelection => "component_selection",
            WorkflowIntent::CircuitDesign => "circuit_design",
            WorkflowIntent::ThreeDModeling => "three_d_modeling",
            WorkflowIntent::Simulation => "simulation",
            WorkflowIntent::Learning => "learning",
            WorkflowIntent::None => "none",
        }
    }

    /// Extra system guidance for the chat model when a workflow is detected.
    pub fn system_hint(&self) -> Option<&'static str> {
        match self {
            WorkflowIntent::ComponentSelection => Some(
                "The user is selecting components: give concrete part numbers, key ratings, and one alternative.",
            ),
            WorkflowIntent::CircuitDesign => Some(
                "The user is designing a circuit: describe topology, nets, and component values explicitly.",
            ),
            WorkflowIntent::ThreeDModeling => Some(
                "The user is working on 3D models or enclosures: give dimensions in millimetres and note tolerances.",
            ),
            WorkflowIntent::Simulation => Some(
                "The user is simulating: describe the analysis type, stimuli, and what to probe.",
            ),
            WorkflowIntent::Learning => Some(
                "The user is learning: build up from fundamentals and end with a short check question.",
            ),
            WorkflowIntent::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntentFlags {
    pub wants_image: bool,
    pub needs_deep_reasoning: bool,
    pub is_research_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub workflow: WorkflowIntent,
    pub flags: IntentFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowGroup {
    pub intent: WorkflowIntent,
    pub keywords: Vec<String>,
}

/// Keyword configuration for the classifier and the authorization gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeywordTables {
    /// Checked in order; the first group with a hit wins.
    pub workflows: Vec<WorkflowGroup>,
    pub image: Vec<String>,
    pub deep_reasoning: Vec<String>,
    pub research: Vec<String>,
    pub restricted_topics: Vec<String>,
    pub restricted_mode_phrases: Vec<String>,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

impl Default for KeywordTables {
    fn default() -> Self {
        let group = |intent, words: &[&str]| WorkflowGroup {
            intent,
            keywords: owned(words),
        };
        Self {
            workflows: vec![
                group(WorkflowIntent::ComponentSelection, COMPONENT_SELECTION_KEYWORDS),
                group(WorkflowIntent::CircuitDesign, CIRCUIT_DESIGN_KEYWORDS),
                group(WorkflowIntent::CircuitDesign, PCB_LAYOUT_KEYWORDS),
                group(WorkflowIntent::ThreeDModeling, THREE_D_MODELING_KEYWORDS),
                group(WorkflowIntent::Simulation, SIMULATION_KEYWORDS),
                group(WorkflowIntent::Learning, LEARNING_KEYWORDS),
            ],
            image: owned(IMAGE_KEYWORDS),
            deep_reasoning: owned(DEEP_REASONING_KEYWORDS),
            research: owned(RESEARCH_KEYWORDS),
            restricted_topics: owned(RESTRICTED_TOPIC_KEYWORDS),
            restricted_mode_phrases: owned(RESTRICTED_MODE_PHRASES),
        }
    }
}

impl KeywordTables {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut tables: KeywordTables = serde_json::from_str(&raw)?;
        tables.normalize();
        tables.validate()?;
        tracing::info!(
            "Loaded keyword tables from {} ({} workflow groups)",
            path.as_ref().display(),
            tables.workflows.len()
        );
        Ok(tables)
    }

    fn normalize(&mut self) {
        let lower = |v: &mut Vec<String>| {
            for w in v.iter_mut() {
                *w = w.trim().to_lowercase();
            }
            v.retain(|w| !w.is_empty());
        };
        for group in &mut self.workflows {
            lower(&mut group.keywords);
        }
        lower(&mut self.image);
        lower(&mut self.deep_reasoning);
        lower(&mut self.research);
        lower(&mut self.restricted_topics);
        lower(&mut self.restricted_mode_phrases);
    }

    /// Workflow groups must be disjoint, otherwise priority order silently
    /// decides ambiguous keywords.
    pub fn validate(&self) -> Result<()> {
        let mut owner: HashMap<&str, usize> = HashMap::new();
        for (idx, group) in self.workflows.iter().enumerate() {
            if group.intent == WorkflowIntent::None {
                return Err(GatewayError::Configuration(format!(
                    "workflow group {} maps to intent 'none'",
                    idx
                ))
                .into());
            }
            for kw in &group.keywords {
                if let Some(prev) = owner.insert(kw.as_str(), idx) {
                    if prev != idx {
                        return Err(GatewayError::Configuration(format!(
                            "keyword '{}' appears in workflow groups {} and {}",
                            kw, prev, idx
                        ))
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn any_match(text: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|kw| crate::text::contains_phrase(text, kw))
}

/// Classifies the latest user message. Always returns a value.
pub fn classify(text: &str, tables: &KeywordTables) -> Intent {
    let lowered = text.to_lowercase();

    let workflow = tables
        .workflows
        .iter()
        .find(|g| any_match(&lowered, &g.keywords))
        .map(|g| g.intent)
        .unwrap_or(WorkflowIntent::None);

    let flags = IntentFlags {
        wants_image: any_match(&lowered, &tables.image),
        needs_deep_reasoning: any_match(&lowered, &tables.deep_reasoning),
        is_research_mode: any_match(&lowered, &tables.research),
    };

    tracing::debug!(
        "Intent classified: workflow={} image={} reasoning={} research={}",
        workflow.as_str(),
        flags.wants_image,
        flags.needs_deep_reasoning,
        flags.is_research_mode
    );

    Intent { workflow, flags }
}
