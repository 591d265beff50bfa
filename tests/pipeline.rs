mod common;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use common::*;
use pillsure_rag::error::VectorStoreError;
use pillsure_rag::models::{SymptomQuery, UserPreferences};
use pillsure_rag::rag::filter::MetadataFilter;
use pillsure_rag::rag::ingestion::IngestTarget;
use pillsure_rag::rag::recommender::GENERIC_ADVICE;
use pillsure_rag::rag::records::CollectionKind;
use pillsure_rag::rag::search::DoctorFilters;
use pillsure_rag::rag::vector_store::{IndexHit, IndexPoint, VectorIndex};

#[tokio::test]
async fn headache_and_fever_splits_otc_and_prescription() {
    let llm = ScriptedLlm::replying("Sorry, I can only answer in prose today.");
    let h = ingested(seeded_catalog(), llm.clone()).await;

    let response = h
        .state
        .engine
        .answer(SymptomQuery::new("I have a headache and fever"))
        .await;

    assert!(response.error.is_none());
    let categorized = &response.categorized_recommendations;
    let otc: HashSet<_> = categorized
        .over_the_counter
        .iter()
        .filter_map(|m| m.medicine_id.clone())
        .collect();
    let rx: HashSet<_> = categorized
        .prescription_required
        .iter()
        .filter_map(|m| m.medicine_id.clone())
        .collect();

    assert!(otc.contains("med-panadol"));
    assert!(!otc.contains("med-augmentin"));
    assert!(!rx.contains("med-panadol"));
    assert!(otc.is_disjoint(&rx));
    assert_eq!(
        response.medicine_recommendations.recommendations[0].medicine_name,
        "Panadol"
    );
    assert_eq!(response.search_metadata.medicines_found, 2);
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn llm_answer_cannot_flip_prescription_flag() {
    let reply = r#"{
        "recommendations": [
            {"medicine_name": "Augmentin", "prescription_required": false, "reasoning": "infection"},
            {"medicine_name": "Panadol", "prescription_required": false, "reasoning": "fever"}
        ],
        "general_advice": "Drink fluids",
        "emergency_warning": "Seek care if fever exceeds 39C"
    }"#;
    let h = ingested(seeded_catalog(), ScriptedLlm::replying(reply)).await;

    let response = h
        .state
        .engine
        .answer(SymptomQuery::new("I have a headache and fever"))
        .await;

    let categorized = &response.categorized_recommendations;
    assert_eq!(categorized.prescription_required.len(), 1);
    assert_eq!(
        categorized.prescription_required[0].medicine_id.as_deref(),
        Some("med-augmentin")
    );
    assert_eq!(categorized.over_the_counter.len(), 1);
    assert!(categorized.general_advice.contains(&"Drink fluids".to_string()));
    assert_eq!(
        categorized.emergency_recommendations,
        vec!["Seek care if fever exceeds 39C".to_string()]
    );
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let h = ingested(seeded_catalog(), ScriptedLlm::unavailable()).await;
    let search = h.state.engine.search();
    let before = search
        .search_medicines("headache", 10, &Default::default())
        .await
        .unwrap();

    h.state.ingestion.ingest(CollectionKind::Medicines).await.unwrap();

    let after = search
        .search_medicines("headache", 10, &Default::default())
        .await
        .unwrap();
    assert_eq!(h.index.count(CollectionKind::Medicines).await.unwrap(), 2);
    assert_eq!(before, after);
}

#[tokio::test]
async fn doctor_specializations_survive_the_round_trip() {
    let mut catalog = seeded_catalog();
    catalog.doctors = vec![doctor("doc-card", "Hina", "Malik", &[3, 4], 95.0)];
    catalog.specializations = vec![
        specialization(3, "Cardiology"),
        specialization(4, "Internal Medicine"),
    ];
    let h = ingested(catalog, ScriptedLlm::unavailable()).await;

    let doctors = h
        .state
        .engine
        .search()
        .search_doctors(
            "heart",
            5,
            &DoctorFilters {
                specialization: Some("Cardiology".to_string()),
                min_satisfaction: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(doctors.len(), 1);
    assert_eq!(
        doctors[0].specialization_names,
        vec!["Cardiology".to_string(), "Internal Medicine".to_string()]
    );
}

#[tokio::test]
async fn otc_preference_never_returns_prescription_medicines() {
    let h = ingested(seeded_catalog(), ScriptedLlm::unavailable()).await;
    let preferences = UserPreferences {
        prescription_preference: Some(false),
        ..Default::default()
    };

    let results = h
        .state
        .engine
        .find_medicines("antibiotic for bacterial infections", &preferences, 10)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|m| !m.prescription_required));
}

#[tokio::test]
async fn budget_excludes_expensive_medicines_and_keeps_order() {
    let catalog = MemoryCatalog {
        medicines: vec![
            medicine("a", "Calpol", "headache fever syrup", 50.0, false),
            medicine("b", "Premium", "headache fever migraine relief", 600.0, false),
            medicine("c", "Disprin", "headache tablets", 100.0, false),
        ],
        ..Default::default()
    };
    let h = ingested(catalog, ScriptedLlm::unavailable()).await;
    let preferences = UserPreferences {
        budget: Some(500.0),
        ..Default::default()
    };

    let results = h
        .state
        .engine
        .find_medicines("headache fever", &preferences, 10)
        .await
        .unwrap();

    let ids: HashSet<_> = results.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, HashSet::from(["a", "c"]));
    assert!(results
        .windows(2)
        .all(|w| w[0].similarity_score >= w[1].similarity_score));
}

#[tokio::test]
async fn doctors_respect_floor_and_sort_by_satisfaction() {
    let h = ingested(seeded_catalog(), ScriptedLlm::unavailable()).await;

    let doctors = h
        .state
        .engine
        .find_doctors("headache", Some("Lahore"), 10)
        .await
        .unwrap();

    let ids: Vec<_> = doctors.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["doc-neuro", "doc-gp"]);
}

#[tokio::test]
async fn inactive_doctors_are_not_recommended() {
    let mut catalog = seeded_catalog();
    catalog.doctors[0].is_active = false;
    let h = ingested(catalog, ScriptedLlm::unavailable()).await;

    let doctors = h.state.engine.find_doctors("headache", None, 10).await.unwrap();
    assert!(doctors.iter().all(|d| d.id != "doc-neuro"));
}

#[tokio::test]
async fn empty_index_returns_generic_advice_without_calling_llm() {
    let llm = ScriptedLlm::replying("{}");
    let h = harness(seeded_catalog(), llm.clone());

    let response = h.state.engine.answer(SymptomQuery::new("cough")).await;

    assert!(response.error.is_none());
    assert!(response.medicine_recommendations.recommendations.is_empty());
    assert_eq!(
        response.medicine_recommendations.general_advice.as_deref(),
        Some(GENERIC_ADVICE)
    );
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn full_reload_reports_both_kinds() {
    let h = harness(seeded_catalog(), ScriptedLlm::unavailable());

    let reports = h.state.ingestion.run(IngestTarget::All).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].kind, CollectionKind::Medicines);
    assert_eq!(reports[0].processed, 2);
    assert_eq!(reports[1].processed, 3);
    let stats = h.state.engine.stats().await.unwrap();
    assert_eq!((stats.medicines, stats.doctors), (2, 3));
}

struct UnreachableIndex;

#[async_trait]
impl VectorIndex for UnreachableIndex {
    async fn upsert(
        &self,
        _kind: CollectionKind,
        _points: Vec<IndexPoint>,
    ) -> Result<Vec<String>, VectorStoreError> {
        Err(VectorStoreError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }

    async fn query(
        &self,
        _kind: CollectionKind,
        _vector: Vec<f32>,
        _k: u64,
        _filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>, VectorStoreError> {
        Err(VectorStoreError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }

    async fn count(&self, _kind: CollectionKind) -> Result<u64, VectorStoreError> {
        Ok(0)
    }

    async fn clear(&self, _kind: CollectionKind) -> Result<(), VectorStoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn index_failure_becomes_error_payload() {
    let state = harness_with_index(
        seeded_catalog(),
        ScriptedLlm::unavailable(),
        Arc::new(UnreachableIndex),
    );

    let response = state.engine.answer(SymptomQuery::new("fever")).await;

    assert_eq!(response.query, "fever");
    let error = response.error.expect("error message");
    assert!(error.contains("connection refused"));
    assert!(response.medicine_recommendations.recommendations.is_empty());
    assert_eq!(response.search_metadata.doctors_found, 0);
}

#[tokio::test]
async fn failed_reload_is_reported_in_status() {
    let state = harness_with_index(
        seeded_catalog(),
        ScriptedLlm::unavailable(),
        Arc::new(UnreachableIndex),
    );

    assert!(state.ingestion.run(IngestTarget::All).await.is_err());

    let status = state.ingestion.status().await;
    assert!(!status.is_ingesting);
    assert!(status
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("Full reload failed"));
}
