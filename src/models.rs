use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rag::ingestion::IngestReport;
use crate::rag::recommender::{DoctorRecommendation, MedicineRecommendation, RecommendationSet};
use crate::rag::records::{DoctorMatch, DoctorRecord, MedicineMatch, MedicineRecord, Specialization};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub prescription_preference: Option<bool>,
    #[serde(default)]
    pub category_preference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomQuery {
    pub symptoms: String,
    #[serde(default)]
    pub user_preferences: Option<UserPreferences>,
    #[serde(default)]
    pub user_location: Option<String>,
    #[serde(default)]
    pub max_medicines: Option<u64>,
    #[serde(default)]
    pub max_doctors: Option<u64>,
}

impl SymptomQuery {
    pub fn new(symptoms: impl Into<String>) -> Self {
        Self {
            symptoms: symptoms.into(),
            user_preferences: None,
            user_location: None,
            max_medicines: None,
            max_doctors: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicineSearch {
    pub medicine_name: String,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorSearch {
    pub specialization: String,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorizedRecommendations {
    pub over_the_counter: Vec<MedicineRecommendation>,
    pub prescription_required: Vec<MedicineRecommendation>,
    pub doctors_by_specialization: BTreeMap<String, Vec<DoctorRecommendation>>,
    pub emergency_recommendations: Vec<String>,
    pub general_advice: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub medicines_found: usize,
    pub doctors_found: usize,
    pub search_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomResponse {
    pub query: String,
    pub medicine_recommendations: RecommendationSet<MedicineRecommendation>,
    pub doctor_recommendations: RecommendationSet<DoctorRecommendation>,
    pub categorized_recommendations: CategorizedRecommendations,
    pub search_metadata: SearchMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymptomResponse {
    /// Symptoms echoed back with empty results and zeroed metadata.
    pub fn failed(query: String, error: String) -> Self {
        Self {
            query,
            medicine_recommendations: RecommendationSet::default(),
            doctor_recommendations: RecommendationSet::default(),
            categorized_recommendations: CategorizedRecommendations::default(),
            search_metadata: SearchMetadata {
                medicines_found: 0,
                doctors_found: 0,
                search_timestamp: Utc::now(),
            },
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MedicineSearchResponse {
    pub medicines: Vec<MedicineMatch>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorSearchResponse {
    pub doctors: Vec<DoctorMatch>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpecializationsResponse {
    pub specializations: Vec<Specialization>,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub medicines: u64,
    pub doctors: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub status: String,
    pub collections: CollectionStats,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub collections: CollectionStats,
    pub llm_reachable: bool,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub reports: Vec<IngestReport>,
    pub collections: CollectionStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MedicineDetails {
    #[serde(flatten)]
    pub medicine: MedicineRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoctorDetails {
    #[serde(flatten)]
    pub doctor: DoctorRecord,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExampleQuery {
    pub symptoms: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExampleQueries {
    pub example_queries: Vec<ExampleQuery>,
    pub user_preferences_examples: Vec<UserPreferences>,
}

impl ExampleQueries {
    pub fn builtin() -> Self {
        let query = |symptoms: &str, description: &str| ExampleQuery {
            symptoms: symptoms.to_string(),
            description: description.to_string(),
        };
        Self {
            example_queries: vec![
                query("I have a headache and fever", "Common cold symptoms"),
                query(
                    "Chest pain and shortness of breath",
                    "Cardiac symptoms - should recommend cardiologist",
                ),
                query("Stomach ache and nausea", "Digestive issues"),
                query("Skin rash and itching", "Dermatological symptoms"),
                query("Back pain and muscle stiffness", "Orthopedic symptoms"),
            ],
            user_preferences_examples: vec![
                UserPreferences {
                    budget: Some(500.0),
                    prescription_preference: Some(false),
                    category_preference: Some("Pain Relief".to_string()),
                },
                UserPreferences {
                    budget: Some(1000.0),
                    prescription_preference: Some(true),
                    category_preference: Some("Antibiotics".to_string()),
                },
            ],
        }
    }
}
