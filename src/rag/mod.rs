pub mod embeddings;
pub mod filter;
pub mod ingestion;
pub mod memory_index;
pub mod recommender;
pub mod records;
pub mod search;
pub mod vector_store;

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;

use self::recommender::{
    Constraints, DoctorRecommendation, MedicineRecommendation, RecommendationGenerator,
    RecommendationSet,
};
use self::records::{CollectionKind, DoctorMatch, MedicineMatch};
use self::search::{CatalogSearch, DoctorFilters, MedicineFilters};
use crate::config::RagSettings;
use crate::models::{
    CategorizedRecommendations, CollectionStats, SearchMetadata, SymptomQuery, SymptomResponse,
    UserPreferences,
};

/// Upper bound on any caller-supplied result count.
pub const MAX_RESULTS: u64 = 100;

const DEFAULT_SPECIALIZATION: &str = "General";

pub fn clamp_limit(requested: Option<u64>, default: u64) -> u64 {
    requested.unwrap_or(default).clamp(1, MAX_RESULTS)
}

/// Answers symptom queries: retrieve, recommend, categorize.
pub struct RagEngine {
    search: CatalogSearch,
    recommender: RecommendationGenerator,
    settings: RagSettings,
}

impl RagEngine {
    pub fn new(
        search: CatalogSearch,
        recommender: RecommendationGenerator,
        settings: RagSettings,
    ) -> Self {
        Self {
            search,
            recommender,
            settings,
        }
    }

    pub fn search(&self) -> &CatalogSearch {
        &self.search
    }

    pub fn recommender(&self) -> &RecommendationGenerator {
        &self.recommender
    }

    /// Never fails: errors are folded into the response's `error` field.
    pub async fn answer(&self, query: SymptomQuery) -> SymptomResponse {
        tracing::info!("Processing symptoms query: {}", query.symptoms);
        match self.try_answer(&query).await {
            Ok(response) => {
                tracing::info!("Successfully processed symptoms query");
                response
            }
            Err(e) => {
                tracing::error!("Error processing symptoms query: {:#}", e);
                SymptomResponse::failed(query.symptoms, format!("{:#}", e))
            }
        }
    }

    async fn try_answer(&self, query: &SymptomQuery) -> Result<SymptomResponse> {
        let preferences = query.user_preferences.clone().unwrap_or_default();
        let location = query
            .user_location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        let max_medicines = clamp_limit(query.max_medicines, self.settings.default_max_medicines);
        let max_doctors = clamp_limit(query.max_doctors, self.settings.default_max_doctors);

        let (medicines, doctors) = tokio::try_join!(
            self.find_medicines(&query.symptoms, &preferences, max_medicines),
            self.find_doctors(&query.symptoms, location, max_doctors),
        )?;

        let constraints = Constraints {
            preferences,
            location: location.map(str::to_string),
        };
        let (medicine_recommendations, doctor_recommendations) = tokio::join!(
            self.recommender
                .recommend(&query.symptoms, &medicines, &constraints),
            self.recommender
                .recommend(&query.symptoms, &doctors, &constraints),
        );

        let categorized_recommendations =
            categorize(&medicine_recommendations, &doctor_recommendations);

        Ok(SymptomResponse {
            query: query.symptoms.clone(),
            medicine_recommendations,
            doctor_recommendations,
            categorized_recommendations,
            search_metadata: SearchMetadata {
                medicines_found: medicines.len(),
                doctors_found: doctors.len(),
                search_timestamp: Utc::now(),
            },
            error: None,
        })
    }

    /// Preference filters in the index, budget afterwards, best match first.
    pub async fn find_medicines(
        &self,
        symptoms: &str,
        preferences: &UserPreferences,
        limit: u64,
    ) -> Result<Vec<MedicineMatch>> {
        let filters = MedicineFilters {
            prescription_required: preferences.prescription_preference,
            category: preferences.category_preference.clone(),
        };
        let results = self
            .search
            .search_medicines(symptoms, limit, &filters)
            .await?;

        let mut results = apply_budget(results, preferences.budget);
        results.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(Ordering::Equal)
        });
        Ok(results)
    }

    /// Active doctors above the satisfaction floor, most satisfied first.
    pub async fn find_doctors(
        &self,
        symptoms: &str,
        location: Option<&str>,
        limit: u64,
    ) -> Result<Vec<DoctorMatch>> {
        let search_query = match location {
            Some(location) => format!("{} {}", symptoms, location),
            None => symptoms.to_string(),
        };
        let filters = DoctorFilters {
            specialization: None,
            min_satisfaction: Some(self.settings.doctor_min_satisfaction),
        };
        let mut results = self
            .search
            .search_doctors(&search_query, limit, &filters)
            .await?;

        results.sort_by(|a, b| {
            b.patient_satisfaction_rate
                .partial_cmp(&a.patient_satisfaction_rate)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.similarity_score
                        .partial_cmp(&a.similarity_score)
                        .unwrap_or(Ordering::Equal)
                })
        });
        Ok(results)
    }

    pub async fn stats(&self) -> Result<CollectionStats> {
        let index = self.search.index();
        let (medicines, doctors) = tokio::try_join!(
            index.count(CollectionKind::Medicines),
            index.count(CollectionKind::Doctors),
        )?;
        Ok(CollectionStats { medicines, doctors })
    }
}

/// Drops medicines priced above a positive budget.
pub fn apply_budget(medicines: Vec<MedicineMatch>, budget: Option<f64>) -> Vec<MedicineMatch> {
    match budget.filter(|b| *b > 0.0) {
        Some(budget) => medicines.into_iter().filter(|m| m.price <= budget).collect(),
        None => medicines,
    }
}

/// Splits medicines by prescription flag and groups doctors by specialization.
/// A medicine id lands in at most one list.
pub fn categorize(
    medicines: &RecommendationSet<MedicineRecommendation>,
    doctors: &RecommendationSet<DoctorRecommendation>,
) -> CategorizedRecommendations {
    let mut categorized = CategorizedRecommendations::default();

    let mut seen = HashSet::new();
    for medicine in &medicines.recommendations {
        let key = medicine
            .medicine_id
            .clone()
            .unwrap_or_else(|| medicine.medicine_name.trim().to_lowercase());
        if !seen.insert(key) {
            continue;
        }
        if medicine.prescription_required {
            categorized.prescription_required.push(medicine.clone());
        } else {
            categorized.over_the_counter.push(medicine.clone());
        }
    }

    for doctor in &doctors.recommendations {
        let specialization = match doctor.specialization.trim() {
            "" => DEFAULT_SPECIALIZATION.to_string(),
            s => s.to_string(),
        };
        categorized
            .doctors_by_specialization
            .entry(specialization)
            .or_default()
            .push(doctor.clone());
    }

    categorized.general_advice = distinct([&medicines.general_advice, &doctors.general_advice]);
    categorized.emergency_recommendations =
        distinct([&medicines.emergency_warning, &doctors.emergency_warning]);

    categorized
}

fn distinct(texts: [&Option<String>; 2]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for text in texts.into_iter().flatten() {
        if !text.trim().is_empty() && !out.contains(text) {
            out.push(text.clone());
        }
    }
    out
}
