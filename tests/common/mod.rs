#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use pillsure_rag::api::AppState;
use pillsure_rag::catalog::CatalogSource;
use pillsure_rag::config::RagSettings;
use pillsure_rag::error::LlmError;
use pillsure_rag::llm::CompletionModel;
use pillsure_rag::rag::embeddings::{EmbeddingFailurePolicy, Embeddings, TextEmbedder};
use pillsure_rag::rag::ingestion::IngestionPipeline;
use pillsure_rag::rag::memory_index::MemoryIndex;
use pillsure_rag::rag::recommender::RecommendationGenerator;
use pillsure_rag::rag::records::{CollectionKind, DoctorRecord, MedicineRecord, Specialization};
use pillsure_rag::rag::search::CatalogSearch;
use pillsure_rag::rag::vector_store::VectorIndex;
use pillsure_rag::rag::RagEngine;

pub const DIMENSION: usize = 64;

/// Hashes lowercase words into buckets. Texts sharing words are close.
pub struct BagOfWordsEmbedder;

impl TextEmbedder for BagOfWordsEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; DIMENSION];
                for word in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| w.len() > 2)
                {
                    let mut hasher = DefaultHasher::new();
                    word.hash(&mut hasher);
                    vector[(hasher.finish() % DIMENSION as u64) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

pub struct ScriptedLlm {
    reply: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionModel for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or(LlmError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    pub medicines: Vec<MedicineRecord>,
    pub doctors: Vec<DoctorRecord>,
    pub specializations: Vec<Specialization>,
}

fn page<T: Clone>(rows: &[T], offset: i64, limit: i64) -> Vec<T> {
    rows.iter()
        .skip(offset as usize)
        .take(limit as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn count(&self, kind: CollectionKind) -> Result<i64> {
        Ok(match kind {
            CollectionKind::Medicines => self.medicines.len() as i64,
            CollectionKind::Doctors => self.doctors.len() as i64,
        })
    }

    async fn medicines_page(&self, offset: i64, limit: i64) -> Result<Vec<MedicineRecord>> {
        Ok(page(&self.medicines, offset, limit))
    }

    async fn doctors_page(&self, offset: i64, limit: i64) -> Result<Vec<DoctorRecord>> {
        Ok(page(&self.doctors, offset, limit))
    }

    async fn medicine(&self, id: &str) -> Result<Option<MedicineRecord>> {
        Ok(self.medicines.iter().find(|m| m.id == id).cloned())
    }

    async fn doctor(&self, id: &str) -> Result<Option<DoctorRecord>> {
        Ok(self.doctors.iter().find(|d| d.id == id).cloned())
    }

    async fn specializations_by_ids(&self, ids: &[i64]) -> Result<Vec<Specialization>> {
        Ok(self
            .specializations
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn specializations(&self) -> Result<Vec<Specialization>> {
        Ok(self.specializations.clone())
    }
}

pub fn medicine(id: &str, name: &str, description: &str, price: f64, rx: bool) -> MedicineRecord {
    MedicineRecord {
        id: id.to_string(),
        medicine_name: name.to_string(),
        price,
        discount: 0.0,
        prescription_required: rx,
        drug_category: Some(if rx { "Antibiotic" } else { "Analgesic" }.to_string()),
        stock: 20,
        drug_description: Some(description.to_string()),
        drug_variant: None,
    }
}

/// Specialization names are resolved from `specialization_ids` at ingestion.
pub fn doctor(id: &str, first: &str, last: &str, specialization_ids: &[i64], satisfaction: f64) -> DoctorRecord {
    DoctorRecord {
        id: id.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        specialization_ids: specialization_ids.to_vec(),
        specialization_names: Vec::new(),
        qualifications: vec!["MBBS".to_string()],
        experience_years: 10,
        patient_satisfaction_rate: satisfaction,
        fee_pkr: Some(2000.0),
        is_active: true,
        address: Some("Lahore".to_string()),
    }
}

pub fn specialization(id: i64, name: &str) -> Specialization {
    Specialization {
        id,
        name: name.to_string(),
        description: None,
    }
}

/// Two medicines and three doctors; one doctor is below the satisfaction floor.
pub fn seeded_catalog() -> MemoryCatalog {
    MemoryCatalog {
        medicines: vec![
            medicine(
                "med-panadol",
                "Panadol",
                "Paracetamol for headache and fever relief",
                50.0,
                false,
            ),
            medicine(
                "med-augmentin",
                "Augmentin",
                "Antibiotic for bacterial infections",
                600.0,
                true,
            ),
        ],
        doctors: vec![
            doctor("doc-neuro", "Sara", "Ali", &[1], 92.0),
            doctor("doc-gp", "Omar", "Sheikh", &[2], 85.0),
            doctor("doc-low", "Bilal", "Raza", &[1], 55.0),
        ],
        specializations: vec![
            specialization(1, "Neurology"),
            specialization(2, "General Medicine"),
        ],
    }
}

pub fn rag_settings() -> RagSettings {
    RagSettings {
        doctor_min_satisfaction: 70.0,
        default_max_medicines: 10,
        default_max_doctors: 5,
        ingest_page_size: 2,
        ingest_interval_minutes: 0,
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub index: Arc<MemoryIndex>,
}

pub fn harness_with_index(
    catalog: MemoryCatalog,
    llm: Arc<dyn CompletionModel>,
    index: Arc<dyn VectorIndex>,
) -> Arc<AppState> {
    let embeddings = Embeddings::new(Arc::new(BagOfWordsEmbedder), EmbeddingFailurePolicy::FailOpen);
    let settings = rag_settings();
    let ingestion = Arc::new(IngestionPipeline::new(
        Arc::new(catalog),
        embeddings.clone(),
        index.clone(),
        settings.ingest_page_size,
    ));
    let engine = RagEngine::new(
        CatalogSearch::new(embeddings, index),
        RecommendationGenerator::new(llm),
        settings,
    );
    Arc::new(AppState { engine, ingestion })
}

pub fn harness(catalog: MemoryCatalog, llm: Arc<dyn CompletionModel>) -> Harness {
    let index = Arc::new(MemoryIndex::new(DIMENSION));
    let state = harness_with_index(catalog, llm, index.clone());
    Harness { state, index }
}

/// Harness with both collections already ingested.
pub async fn ingested(catalog: MemoryCatalog, llm: Arc<dyn CompletionModel>) -> Harness {
    let harness = harness(catalog, llm);
    harness
        .state
        .ingestion
        .full_reload()
        .await
        .expect("seed ingestion");
    harness
}
