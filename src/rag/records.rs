//! Typed records shared by ingestion, search and recommendation.
//!
//! The relational store is the source of truth; the vector index only holds
//! a flat projection (`metadata()`) keyed by the same identifier.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::filter::{Metadata, MetadataValue};
use super::vector_store::IndexHit;

/// Separator used to flatten list fields into a single metadata string.
/// A name that itself contains it will not survive the round trip.
pub const LIST_DELIMITER: char = ',';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Medicines,
    Doctors,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Medicines, CollectionKind::Doctors];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Medicines => "medicines",
            CollectionKind::Doctors => "doctors",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "medicines" | "medicine" => Ok(CollectionKind::Medicines),
            "doctors" | "doctor" => Ok(CollectionKind::Doctors),
            other => anyhow::bail!("Unknown collection: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineRecord {
    pub id: String,
    pub medicine_name: String,
    pub price: f64,
    pub discount: f64,
    pub prescription_required: bool,
    pub drug_category: Option<String>,
    pub stock: i64,
    pub drug_description: Option<String>,
    pub drug_variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorRecord {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub specialization_ids: Vec<i64>,
    /// Resolved from the specialization table at ingestion time.
    pub specialization_names: Vec<String>,
    pub qualifications: Vec<String>,
    pub experience_years: i64,
    pub patient_satisfaction_rate: f64,
    pub fee_pkr: Option<f64>,
    pub is_active: bool,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Specialization {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

pub fn encode_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(&LIST_DELIMITER.to_string())
}

pub fn decode_list(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return Vec::new();
    }
    encoded.split(LIST_DELIMITER).map(str::to_string).collect()
}

/// Names that would be split apart by [`decode_list`].
pub fn delimiter_collisions<S: AsRef<str>>(items: &[S]) -> Vec<&str> {
    items
        .iter()
        .map(|s| s.as_ref())
        .filter(|s| s.contains(LIST_DELIMITER))
        .collect()
}

/// Cosine distance to a similarity score clamped into `[0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f64 {
    (1.0 - distance as f64).clamp(0.0, 1.0)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl MedicineRecord {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("medicine without id");
        }
        if self.medicine_name.trim().is_empty() {
            anyhow::bail!("medicine {} has an empty name", self.id);
        }
        if !self.price.is_finite() || self.price < 0.0 {
            anyhow::bail!("medicine {} has an invalid price {}", self.id, self.price);
        }
        if !self.discount.is_finite() || !(0.0..=100.0).contains(&self.discount) {
            anyhow::bail!(
                "medicine {} has an invalid discount {}",
                self.id,
                self.discount
            );
        }
        Ok(())
    }

    pub fn category(&self) -> Option<&str> {
        non_empty(&self.drug_category)
    }

    pub fn description(&self) -> Option<&str> {
        non_empty(&self.drug_description)
    }

    pub fn variant(&self) -> Option<&str> {
        non_empty(&self.drug_variant)
    }

    pub fn metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("medicine_name".into(), self.medicine_name.as_str().into());
        m.insert("price".into(), self.price.into());
        m.insert("discount".into(), self.discount.into());
        m.insert(
            "prescription_required".into(),
            self.prescription_required.into(),
        );
        m.insert(
            "drug_category".into(),
            self.category().unwrap_or_default().into(),
        );
        m.insert("stock".into(), self.stock.into());
        m
    }
}

impl DoctorRecord {
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("doctor without id");
        }
        if self.first_name.trim().is_empty() && self.last_name.trim().is_empty() {
            anyhow::bail!("doctor {} has no name", self.id);
        }
        if !(0.0..=100.0).contains(&self.patient_satisfaction_rate) {
            anyhow::bail!(
                "doctor {} has an invalid satisfaction rate {}",
                self.id,
                self.patient_satisfaction_rate
            );
        }
        if self.experience_years < 0 {
            anyhow::bail!("doctor {} has negative experience", self.id);
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
            .trim_end()
            .to_string()
    }

    pub fn metadata(&self) -> Metadata {
        let ids: Vec<String> = self.specialization_ids.iter().map(i64::to_string).collect();
        let mut m = Metadata::new();
        m.insert("first_name".into(), self.first_name.as_str().into());
        m.insert("last_name".into(), self.last_name.as_str().into());
        m.insert("specialization_ids".into(), encode_list(&ids).into());
        m.insert(
            "specialization_names".into(),
            encode_list(&self.specialization_names).into(),
        );
        m.insert(
            "qualifications".into(),
            encode_list(&self.qualifications).into(),
        );
        m.insert("experience_years".into(), self.experience_years.into());
        m.insert(
            "patient_satisfaction_rate".into(),
            self.patient_satisfaction_rate.into(),
        );
        m.insert("fee_pkr".into(), self.fee_pkr.unwrap_or(0.0).into());
        m.insert("is_active".into(), self.is_active.into());
        m.insert(
            "address".into(),
            non_empty(&self.address).unwrap_or_default().into(),
        );
        m
    }
}

fn meta_str(metadata: &Metadata, key: &str) -> String {
    metadata
        .get(key)
        .and_then(MetadataValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn meta_f64(metadata: &Metadata, key: &str) -> f64 {
    metadata
        .get(key)
        .and_then(MetadataValue::as_f64)
        .unwrap_or_default()
}

fn meta_bool(metadata: &Metadata, key: &str) -> bool {
    metadata
        .get(key)
        .and_then(MetadataValue::as_bool)
        .unwrap_or_default()
}

/// A medicine retrieved from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicineMatch {
    pub id: String,
    pub medicine_name: String,
    pub price: f64,
    pub discount: f64,
    pub prescription_required: bool,
    pub drug_category: String,
    pub stock: i64,
    pub similarity_score: f64,
    pub document: String,
}

impl From<IndexHit> for MedicineMatch {
    fn from(hit: IndexHit) -> Self {
        let m = &hit.metadata;
        Self {
            medicine_name: meta_str(m, "medicine_name"),
            price: meta_f64(m, "price"),
            discount: meta_f64(m, "discount"),
            prescription_required: meta_bool(m, "prescription_required"),
            drug_category: meta_str(m, "drug_category"),
            stock: meta_f64(m, "stock") as i64,
            similarity_score: similarity_from_distance(hit.distance),
            document: hit.document,
            id: hit.id,
        }
    }
}

/// A doctor retrieved from the index, with list fields split back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorMatch {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub specialization_ids: Vec<String>,
    pub specialization_names: Vec<String>,
    pub qualifications: Vec<String>,
    pub experience_years: i64,
    pub patient_satisfaction_rate: f64,
    pub fee_pkr: f64,
    pub address: String,
    pub similarity_score: f64,
    pub document: String,
}

impl DoctorMatch {
    pub fn display_name(&self) -> String {
        format!("Dr. {} {}", self.first_name, self.last_name)
            .trim_end()
            .to_string()
    }

    /// Specialization names, falling back to raw ids when names are missing.
    pub fn specializations(&self) -> &[String] {
        if self.specialization_names.is_empty() {
            &self.specialization_ids
        } else {
            &self.specialization_names
        }
    }
}

impl From<IndexHit> for DoctorMatch {
    fn from(hit: IndexHit) -> Self {
        let m = &hit.metadata;
        Self {
            first_name: meta_str(m, "first_name"),
            last_name: meta_str(m, "last_name"),
            specialization_ids: decode_list(&meta_str(m, "specialization_ids")),
            specialization_names: decode_list(&meta_str(m, "specialization_names")),
            qualifications: decode_list(&meta_str(m, "qualifications")),
            experience_years: meta_f64(m, "experience_years") as i64,
            patient_satisfaction_rate: meta_f64(m, "patient_satisfaction_rate"),
            fee_pkr: meta_f64(m, "fee_pkr"),
            address: meta_str(m, "address"),
            similarity_score: similarity_from_distance(hit.distance),
            document: hit.document,
            id: hit.id,
        }
    }
}
