use std::sync::Arc;

use anyhow::Result;

use super::embeddings::Embeddings;
use super::filter::MetadataFilter;
use super::records::{CollectionKind, DoctorMatch, MedicineMatch};
use super::vector_store::VectorIndex;

/// Restrictions applied inside the medicine similarity query.
#[derive(Debug, Clone, Default)]
pub struct MedicineFilters {
    pub prescription_required: Option<bool>,
    pub category: Option<String>,
}

impl MedicineFilters {
    fn to_filter(&self) -> MetadataFilter {
        let mut filter = MetadataFilter::new();
        if let Some(rx) = self.prescription_required {
            filter = filter.eq("prescription_required", rx);
        }
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            filter = filter.eq("drug_category", category);
        }
        filter
    }
}

/// Restrictions applied inside the doctor similarity query. Inactive doctors
/// are always excluded.
#[derive(Debug, Clone, Default)]
pub struct DoctorFilters {
    pub specialization: Option<String>,
    pub min_satisfaction: Option<f64>,
}

impl DoctorFilters {
    fn to_filter(&self) -> MetadataFilter {
        let mut filter = MetadataFilter::new().eq("is_active", true);
        if let Some(specialization) = self.specialization.as_deref().filter(|s| !s.is_empty()) {
            filter = filter.contains("specialization_names", specialization);
        }
        if let Some(min) = self.min_satisfaction {
            filter = filter.gte("patient_satisfaction_rate", min);
        }
        filter
    }
}

/// Embeds a query and runs it against one collection.
#[derive(Clone)]
pub struct CatalogSearch {
    embeddings: Embeddings,
    index: Arc<dyn VectorIndex>,
}

impl CatalogSearch {
    pub fn new(embeddings: Embeddings, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn search_medicines(
        &self,
        query: &str,
        limit: u64,
        filters: &MedicineFilters,
    ) -> Result<Vec<MedicineMatch>> {
        let vector = self.embeddings.embed_one(query).await?;
        let hits = self
            .index
            .query(CollectionKind::Medicines, vector, limit, &filters.to_filter())
            .await?;
        Ok(hits.into_iter().map(MedicineMatch::from).collect())
    }

    pub async fn search_doctors(
        &self,
        query: &str,
        limit: u64,
        filters: &DoctorFilters,
    ) -> Result<Vec<DoctorMatch>> {
        let vector = self.embeddings.embed_one(query).await?;
        let hits = self
            .index
            .query(CollectionKind::Doctors, vector, limit, &filters.to_filter())
            .await?;
        Ok(hits.into_iter().map(DoctorMatch::from).collect())
    }
}
