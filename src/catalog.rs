use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::config::DatabaseSettings;
use crate::rag::records::{CollectionKind, DoctorRecord, MedicineRecord, Specialization};

/// Read-only access to the relational catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn count(&self, kind: CollectionKind) -> Result<i64>;

    /// Rows ordered by id so consecutive pages never overlap.
    async fn medicines_page(&self, offset: i64, limit: i64) -> Result<Vec<MedicineRecord>>;

    /// Specialization names are left empty; ingestion resolves them.
    async fn doctors_page(&self, offset: i64, limit: i64) -> Result<Vec<DoctorRecord>>;

    async fn medicine(&self, id: &str) -> Result<Option<MedicineRecord>>;

    async fn doctor(&self, id: &str) -> Result<Option<DoctorRecord>>;

    async fn specializations_by_ids(&self, ids: &[i64]) -> Result<Vec<Specialization>>;

    async fn specializations(&self) -> Result<Vec<Specialization>>;
}

const MEDICINE_COLUMNS: &str = r#"
    id::text AS id,
    medicine_name,
    price::float8 AS price,
    discount::float8 AS discount,
    prescription_required,
    drug_category,
    stock::int8 AS stock,
    drug_description,
    drug_varient AS drug_variant
"#;

const DOCTOR_COLUMNS: &str = r#"
    id::text AS id,
    first_name,
    last_name,
    specialization_ids,
    qualifications,
    experience_years::int8 AS experience_years,
    patient_satisfaction_rate::float8 AS patient_satisfaction_rate,
    fee_pkr::float8 AS fee_pkr,
    is_active,
    address
"#;

#[derive(Debug, sqlx::FromRow)]
struct MedicineRow {
    id: String,
    medicine_name: Option<String>,
    price: Option<f64>,
    discount: Option<f64>,
    prescription_required: Option<bool>,
    drug_category: Option<String>,
    stock: Option<i64>,
    drug_description: Option<String>,
    drug_variant: Option<String>,
}

impl From<MedicineRow> for MedicineRecord {
    fn from(row: MedicineRow) -> Self {
        Self {
            id: row.id,
            medicine_name: row.medicine_name.unwrap_or_default(),
            // A missing price fails validation instead of reading as free.
            price: row.price.unwrap_or(f64::NAN),
            discount: row.discount.unwrap_or(0.0),
            prescription_required: row.prescription_required.unwrap_or(false),
            drug_category: row.drug_category,
            stock: row.stock.unwrap_or(0),
            drug_description: row.drug_description,
            drug_variant: row.drug_variant,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DoctorRow {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
    specialization_ids: Option<Json<Value>>,
    qualifications: Option<Json<Value>>,
    experience_years: Option<i64>,
    patient_satisfaction_rate: Option<f64>,
    fee_pkr: Option<f64>,
    is_active: Option<bool>,
    address: Option<String>,
}

impl From<DoctorRow> for DoctorRecord {
    fn from(row: DoctorRow) -> Self {
        Self {
            id: row.id,
            first_name: row.first_name.unwrap_or_default(),
            last_name: row.last_name.unwrap_or_default(),
            specialization_ids: row
                .specialization_ids
                .map(|Json(v)| parse_id_list(&v))
                .unwrap_or_default(),
            specialization_names: Vec::new(),
            qualifications: row
                .qualifications
                .map(|Json(v)| parse_string_list(&v))
                .unwrap_or_default(),
            experience_years: row.experience_years.unwrap_or(0),
            patient_satisfaction_rate: row.patient_satisfaction_rate.unwrap_or(0.0),
            fee_pkr: row.fee_pkr,
            is_active: row.is_active.unwrap_or(true),
            address: row.address,
        }
    }
}

/// Accepts `[1, 2]`, `["1", "2"]` or a bare `"1,2"`; unparsable entries are dropped.
pub fn parse_id_list(value: &Value) -> Vec<i64> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect(),
        Value::Number(n) => n.as_i64().into_iter().collect(),
        Value::String(s) => s
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect(),
        _ => Vec::new(),
    }
}

pub fn parse_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    pub async fn new(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .context("Failed to connect to the catalog database")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogSource for PostgresCatalog {
    async fn count(&self, kind: CollectionKind) -> Result<i64> {
        let sql = match kind {
            CollectionKind::Medicines => "SELECT COUNT(*) FROM medicines",
            CollectionKind::Doctors => "SELECT COUNT(*) FROM doctors",
        };
        let (count,): (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn medicines_page(&self, offset: i64, limit: i64) -> Result<Vec<MedicineRecord>> {
        let sql = format!(
            "SELECT {} FROM medicines ORDER BY id LIMIT $1 OFFSET $2",
            MEDICINE_COLUMNS
        );
        let rows = sqlx::query_as::<_, MedicineRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MedicineRecord::from).collect())
    }

    async fn doctors_page(&self, offset: i64, limit: i64) -> Result<Vec<DoctorRecord>> {
        let sql = format!(
            "SELECT {} FROM doctors ORDER BY id LIMIT $1 OFFSET $2",
            DOCTOR_COLUMNS
        );
        let rows = sqlx::query_as::<_, DoctorRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DoctorRecord::from).collect())
    }

    async fn medicine(&self, id: &str) -> Result<Option<MedicineRecord>> {
        let sql = format!("SELECT {} FROM medicines WHERE id::text = $1", MEDICINE_COLUMNS);
        let row = sqlx::query_as::<_, MedicineRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(MedicineRecord::from))
    }

    async fn doctor(&self, id: &str) -> Result<Option<DoctorRecord>> {
        let sql = format!("SELECT {} FROM doctors WHERE id::text = $1", DOCTOR_COLUMNS);
        let row = sqlx::query_as::<_, DoctorRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DoctorRecord::from))
    }

    async fn specializations_by_ids(&self, ids: &[i64]) -> Result<Vec<Specialization>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Specialization>(
            r#"
            SELECT id::int8 AS id, name, description
            FROM specializations
            WHERE id::int8 = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn specializations(&self) -> Result<Vec<Specialization>> {
        let rows = sqlx::query_as::<_, Specialization>(
            "SELECT id::int8 AS id, name, description FROM specializations ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
