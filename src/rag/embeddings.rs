use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use fastembed::{
    EmbeddingModel, InitOptions, InitOptionsUserDefined, TextEmbedding, TokenizerFiles,
    UserDefinedEmbeddingModel,
};
use serde::{Deserialize, Serialize};

use super::records::{DoctorRecord, MedicineRecord};

/// What to do when the model cannot embed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFailurePolicy {
    /// Retry a failed batch text by text and substitute zero vectors for
    /// the texts that still fail. Lossy: those records become unreachable
    /// by similarity search.
    FailOpen,
    FailClosed,
}

pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

pub struct EmbeddingGenerator {
    model: TextEmbedding,
    dimension: usize,
}

impl EmbeddingGenerator {
    /// Loads the model from `model_dir` when present, otherwise the named
    /// all-MiniLM-L6-v2 model from the fastembed cache.
    pub fn new(model_dir: Option<&Path>, dimension: usize) -> Result<Self> {
        let model = match model_dir {
            Some(dir) if dir.exists() => {
                tracing::info!("Initializing embedding model from {}", dir.display());
                Self::load_user_defined(dir)?
            }
            other => {
                if let Some(dir) = other {
                    tracing::warn!(
                        "Model directory not found: {}, falling back to all-MiniLM-L6-v2",
                        dir.display()
                    );
                }
                TextEmbedding::try_new(InitOptions {
                    model_name: EmbeddingModel::AllMiniLML6V2,
                    show_download_progress: false,
                    ..Default::default()
                })
                .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))?
            }
        };

        let generator = Self { model, dimension };
        let probe = generator.generate_single("dimension probe")?;
        if probe.len() != dimension {
            anyhow::bail!(
                "Embedding model produces {} dimensions, configured {}",
                probe.len(),
                dimension
            );
        }

        tracing::info!("Embedding model initialized ({} dimensions)", dimension);
        Ok(generator)
    }

    fn load_user_defined(model_dir: &Path) -> Result<TextEmbedding> {
        let read = |name: &str| {
            std::fs::read(model_dir.join(name))
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", name, e))
        };

        let user_model = UserDefinedEmbeddingModel {
            onnx_file: read("model.onnx")?,
            tokenizer_files: TokenizerFiles {
                tokenizer_file: read("tokenizer.json")?,
                config_file: read("config.json")?,
                special_tokens_map_file: read("special_tokens_map.json")?,
                tokenizer_config_file: read("tokenizer_config.json")?,
            },
        };

        TextEmbedding::try_new_from_user_defined(user_model, InitOptionsUserDefined::default())
            .map_err(|e| anyhow::anyhow!("Failed to initialize embedding model: {}", e))
    }

    pub fn generate_single(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding model returned no vector"))
    }
}

impl TextEmbedder for EmbeddingGenerator {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(self.model.embed(texts, None)?)
    }
}

/// Embedding adapter applying the configured failure policy.
#[derive(Clone)]
pub struct Embeddings {
    embedder: Arc<dyn TextEmbedder>,
    policy: EmbeddingFailurePolicy,
}

impl Embeddings {
    pub fn new(embedder: Arc<dyn TextEmbedder>, policy: EmbeddingFailurePolicy) -> Self {
        Self { embedder, policy }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn policy(&self) -> EmbeddingFailurePolicy {
        self.policy
    }

    /// Embeds on the blocking pool; ONNX inference is CPU bound.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.embed_blocking(texts))
            .await
            .map_err(|e| anyhow::anyhow!("Embedding task failed: {}", e))?
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Embedding returned no vector"))
    }

    fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let count = texts.len();
        let error = match self.checked_embed(texts.clone()) {
            Ok(vectors) => return Ok(vectors),
            Err(e) => e,
        };

        match self.policy {
            EmbeddingFailurePolicy::FailClosed => {
                Err(error.context(format!("Failed to embed {} text(s)", count)))
            }
            EmbeddingFailurePolicy::FailOpen if count == 1 => {
                tracing::warn!("Embedding failed, substituting a zero vector: {}", error);
                Ok(vec![vec![0.0; self.dimension()]])
            }
            EmbeddingFailurePolicy::FailOpen => {
                tracing::warn!(
                    "Batch embedding of {} text(s) failed, retrying one by one: {}",
                    count,
                    error
                );
                let mut failed = 0;
                let vectors: Vec<Vec<f32>> = texts
                    .into_iter()
                    .map(|text| {
                        self.checked_embed(vec![text])
                            .ok()
                            .and_then(|mut v| v.pop())
                            .unwrap_or_else(|| {
                                failed += 1;
                                vec![0.0; self.dimension()]
                            })
                    })
                    .collect();
                if failed > 0 {
                    tracing::warn!(
                        "Substituted zero vectors for {} of {} text(s)",
                        failed,
                        count
                    );
                }
                Ok(vectors)
            }
        }
    }

    /// Embeds and checks the shape of the result.
    fn checked_embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let count = texts.len();
        let dimension = self.dimension();
        let vectors = self.embedder.embed(texts)?;
        if vectors.len() != count {
            anyhow::bail!("expected {} vectors, got {}", count, vectors.len());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            anyhow::bail!("expected {} dimensions, got {}", dimension, bad.len());
        }
        Ok(vectors)
    }
}

/// Searchable text for a medicine. Absent fields are left out entirely.
pub fn describe_medicine(medicine: &MedicineRecord) -> String {
    let mut parts = Vec::new();

    if !medicine.medicine_name.trim().is_empty() {
        parts.push(format!("Medicine: {}", medicine.medicine_name));
    }
    if let Some(description) = medicine.description() {
        parts.push(format!("Description: {}", description));
    }
    if let Some(category) = medicine.category() {
        parts.push(format!("Category: {}", category));
    }
    if let Some(variant) = medicine.variant() {
        parts.push(format!("Variant: {}", variant));
    }

    let prescription = if medicine.prescription_required {
        "Prescription required"
    } else {
        "No prescription required"
    };
    parts.push(format!("Prescription: {}", prescription));

    if medicine.price > 0.0 {
        let mut price = format!("Price: {}", medicine.price);
        if medicine.discount > 0.0 {
            price.push_str(&format!(" (Discount: {}%)", medicine.discount));
        }
        parts.push(price);
    }

    parts.join(" | ")
}

/// Searchable text for a doctor. Absent fields are left out entirely.
pub fn describe_doctor(doctor: &DoctorRecord) -> String {
    let mut parts = Vec::new();

    if !doctor.first_name.is_empty() && !doctor.last_name.is_empty() {
        parts.push(format!("Doctor: {} {}", doctor.first_name, doctor.last_name));
    }

    if !doctor.specialization_names.is_empty() {
        parts.push(format!(
            "Specializations: {}",
            doctor.specialization_names.join(", ")
        ));
    } else if !doctor.specialization_ids.is_empty() {
        let ids: Vec<String> = doctor.specialization_ids.iter().map(i64::to_string).collect();
        parts.push(format!("Specializations: {}", ids.join(", ")));
    }

    if !doctor.qualifications.is_empty() {
        parts.push(format!("Qualifications: {}", doctor.qualifications.join(", ")));
    }
    if doctor.experience_years > 0 {
        parts.push(format!("Experience: {} years", doctor.experience_years));
    }
    if doctor.patient_satisfaction_rate > 0.0 {
        parts.push(format!(
            "Patient Satisfaction: {}%",
            doctor.patient_satisfaction_rate
        ));
    }
    if let Some(address) = doctor.address.as_deref().filter(|a| !a.trim().is_empty()) {
        parts.push(format!("Location: {}", address));
    }
    if let Some(fee) = doctor.fee_pkr.filter(|f| *f > 0.0) {
        parts.push(format!("Consultation Fee: {} PKR", fee));
    }

    parts.join(" | ")
}
