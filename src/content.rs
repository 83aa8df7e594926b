//! Content provider: agreement text, reading list, training video and quiz.
//!
//! Content is read-only to the engine. The catalog is loaded from a JSON file
//! at startup and may be swapped at runtime (e.g. a newly required document),
//! which re-opens the documents gate for everyone who has not confirmed it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ConfigError;

/// Default minimum quiz score (percent) required to pass.
pub const DEFAULT_PASS_THRESHOLD: u32 = 80;
/// Default number of quiz attempts before review is required.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The confidentiality agreement shown on the NDA step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agreement {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// A required reading document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingDocument {
    pub id: String,
    pub title: String,
    /// Document location (URL or content key); rendering is the caller's concern.
    #[serde(default)]
    pub reference: Option<String>,
    pub minimum_reading_seconds: u64,
}

/// The training video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingVideo {
    pub reference: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Known duration in seconds. When absent, the player-reported duration is used.
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// How a question is answered and scored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice { options: Vec<String>, correct: String },
    TrueFalse { correct: bool },
    MultiSelect { options: Vec<String>, correct: Vec<String> },
    /// Free text, reviewed manually. Never auto-scored.
    OpenText,
}

impl QuestionKind {
    /// Whether the question participates in automatic scoring.
    pub fn is_scorable(&self) -> bool {
        !matches!(self, Self::OpenText)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::SingleChoice { .. } => "single_choice",
            Self::TrueFalse { .. } => "true_false",
            Self::MultiSelect { .. } => "multi_select",
            Self::OpenText => "open_text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// A question as shown to the employee, without the correct answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionView {
    pub id: String,
    pub prompt: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl From<&QuizQuestion> for QuestionView {
    fn from(q: &QuizQuestion) -> Self {
        let options = match &q.kind {
            QuestionKind::SingleChoice { options, .. } | QuestionKind::MultiSelect { options, .. } => {
                options.clone()
            }
            QuestionKind::TrueFalse { .. } | QuestionKind::OpenText => Vec::new(),
        };
        Self {
            id: q.id.clone(),
            prompt: q.prompt.clone(),
            kind: q.kind.label().to_string(),
            options,
        }
    }
}

fn default_pass_threshold() -> u32 {
    DEFAULT_PASS_THRESHOLD
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub questions: Vec<QuizQuestion>,
}

impl QuizConfig {
    /// Questions without their answers, for display.
    pub fn public_questions(&self) -> Vec<QuestionView> {
        self.questions.iter().map(QuestionView::from).collect()
    }
}

/// Everything the engine needs to know about onboarding content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCatalog {
    pub agreement: Agreement,
    pub documents: Vec<ReadingDocument>,
    pub video: TrainingVideo,
    pub quiz: QuizConfig,
}

impl ContentCatalog {
    /// Parse a catalog from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn document(&self, id: &str) -> Option<&ReadingDocument> {
        self.documents.iter().find(|d| d.id == id)
    }

    /// Reject catalogs the engine cannot enforce consistently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quiz.pass_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                key: "quiz.pass_threshold".into(),
                message: format!("{} is above 100", self.quiz.pass_threshold),
            });
        }
        if self.quiz.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "quiz.max_attempts".into(),
                message: "must allow at least one attempt".into(),
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.documents.iter().find(|d| !seen.insert(d.id.as_str())) {
            return Err(ConfigError::InvalidValue {
                key: "documents".into(),
                message: format!("duplicate document id {}", dup.id),
            });
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.quiz.questions.iter().find(|q| !seen.insert(q.id.as_str())) {
            return Err(ConfigError::InvalidValue {
                key: "quiz.questions".into(),
                message: format!("duplicate question id {}", dup.id),
            });
        }

        if let Some(d) = self.video.duration_seconds {
            if !d.is_finite() || d <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: "video.duration_seconds".into(),
                    message: format!("{d} is not a positive duration"),
                });
            }
        }
        Ok(())
    }
}

/// Source of onboarding content.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Current content snapshot.
    async fn catalog(&self) -> Arc<ContentCatalog>;
}

/// Content held in memory, optionally loaded from a JSON file.
pub struct StaticContent {
    catalog: RwLock<Arc<ContentCatalog>>,
}

impl StaticContent {
    pub fn new(catalog: ContentCatalog) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
        }
    }

    /// Load and validate a catalog from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let catalog = ContentCatalog::from_json(&json)?;
        info!(
            path = %path.display(),
            documents = catalog.documents.len(),
            questions = catalog.quiz.questions.len(),
            "Content catalog loaded"
        );
        Ok(Self::new(catalog))
    }

    /// Replace the catalog. Progress already recorded is kept.
    pub async fn replace(&self, catalog: ContentCatalog) -> Result<(), ConfigError> {
        catalog.validate()?;
        info!(documents = catalog.documents.len(), "Content catalog replaced");
        *self.catalog.write().await = Arc::new(catalog);
        Ok(())
    }
}

#[async_trait]
impl ContentProvider for StaticContent {
    async fn catalog(&self) -> Arc<ContentCatalog> {
        Arc::clone(&*self.catalog.read().await)
    }
}
