//! Projects the relational catalog into the vector index.
//!
//! Runs are not checkpointed: a failed run is simply rerun from the start,
//! which is safe because upserts are idempotent on the record id.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::embeddings::{describe_doctor, describe_medicine, Embeddings};
use super::records::{delimiter_collisions, CollectionKind, DoctorRecord, MedicineRecord};
use super::vector_store::{IndexPoint, VectorIndex};
use crate::catalog::CatalogSource;
use crate::error::IngestError;

/// Called after each page with (kind, rows seen, total rows).
pub type ProgressFn = dyn Fn(CollectionKind, u64, u64) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub kind: CollectionKind,
    pub total: u64,
    pub processed: u64,
    pub skipped: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestTarget {
    All,
    Medicines,
    Doctors,
}

impl From<CollectionKind> for IngestTarget {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Medicines => IngestTarget::Medicines,
            CollectionKind::Doctors => IngestTarget::Doctors,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStatus {
    pub is_ingesting: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub medicines: Option<IngestReport>,
    pub doctors: Option<IngestReport>,
    pub last_error: Option<String>,
    pub schedule_interval_minutes: u64,
}

struct PreparedPage {
    fetched: usize,
    points: Vec<IndexPoint>,
}

pub struct IngestionPipeline {
    catalog: Arc<dyn CatalogSource>,
    embeddings: Embeddings,
    index: Arc<dyn VectorIndex>,
    page_size: i64,
    status: Mutex<IngestStatus>,
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        embeddings: Embeddings,
        index: Arc<dyn VectorIndex>,
        page_size: i64,
    ) -> Self {
        Self {
            catalog,
            embeddings,
            index,
            page_size: page_size.max(1),
            status: Mutex::new(IngestStatus::default()),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogSource> {
        &self.catalog
    }

    pub async fn status(&self) -> IngestStatus {
        self.status.lock().await.clone()
    }

    pub async fn ingest(&self, kind: CollectionKind) -> Result<IngestReport> {
        self.ingest_with_progress(kind, &|_, _, _| {}).await
    }

    /// Pages through the catalog by id and upserts every valid row.
    /// Invalid rows are skipped and counted; any index or catalog failure
    /// aborts the rest of the run.
    pub async fn ingest_with_progress(
        &self,
        kind: CollectionKind,
        progress: &ProgressFn,
    ) -> Result<IngestReport> {
        let total = self
            .catalog
            .count(kind)
            .await
            .with_context(|| format!("Failed to count {}", kind))?
            .max(0) as u64;
        tracing::info!("Starting {} ingestion: {} rows", kind, total);

        let mut offset: u64 = 0;
        let mut processed: u64 = 0;
        let mut skipped: u64 = 0;

        while offset < total {
            let page = match kind {
                CollectionKind::Medicines => self.prepare_medicines(offset as i64).await?,
                CollectionKind::Doctors => self.prepare_doctors(offset as i64).await?,
            };
            if page.fetched == 0 {
                break;
            }

            let written = page.points.len() as u64;
            if !page.points.is_empty() {
                self.index.upsert(kind, page.points).await.with_context(|| {
                    format!("Failed to upsert {} page at offset {}", kind, offset)
                })?;
            }

            offset += page.fetched as u64;
            processed += written;
            skipped += page.fetched as u64 - written;
            progress(kind, offset.min(total), total);
            tracing::info!("Ingested {} {}/{}", kind, offset.min(total), total);
        }

        let report = IngestReport {
            kind,
            total,
            processed,
            skipped,
            finished_at: Utc::now(),
        };
        if skipped > 0 {
            tracing::warn!("{} ingestion skipped {} invalid row(s)", kind, skipped);
        }
        tracing::info!("{} ingestion complete: {} indexed", kind, processed);

        let mut status = self.status.lock().await;
        match kind {
            CollectionKind::Medicines => status.medicines = Some(report.clone()),
            CollectionKind::Doctors => status.doctors = Some(report.clone()),
        }
        Ok(report)
    }

    pub async fn full_reload(&self) -> Result<Vec<IngestReport>> {
        self.full_reload_with_progress(&|_, _, _| {}).await
    }

    /// Clears both collections and ingests each kind in turn. A failure in
    /// either kind fails the reload; the clear is not rolled back, so the
    /// index stays stale until a rerun succeeds.
    pub async fn full_reload_with_progress(
        &self,
        progress: &ProgressFn,
    ) -> Result<Vec<IngestReport>> {
        tracing::info!("Starting full data reload...");
        for kind in CollectionKind::ALL {
            self.index
                .clear(kind)
                .await
                .with_context(|| format!("Failed to clear {}", kind))?;
        }

        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for kind in CollectionKind::ALL {
            match self.ingest_with_progress(kind, progress).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!("{} ingestion failed: {:#}", kind, e);
                    failures.push(format!("{}: {:#}", kind, e));
                }
            }
        }

        if !failures.is_empty() {
            anyhow::bail!("Full reload failed ({})", failures.join("; "));
        }
        tracing::info!("Full data reload completed");
        Ok(reports)
    }

    /// Re-reads one row and upserts it. `Ok(false)` when the row does not
    /// exist in the catalog.
    pub async fn update_one(&self, kind: CollectionKind, id: &str) -> Result<bool> {
        let point = match kind {
            CollectionKind::Medicines => match self.catalog.medicine(id).await? {
                Some(medicine) => {
                    medicine.validate()?;
                    self.medicine_points(vec![medicine]).await?.pop()
                }
                None => None,
            },
            CollectionKind::Doctors => match self.catalog.doctor(id).await? {
                Some(doctor) => {
                    let mut doctors = vec![doctor];
                    self.resolve_specializations(&mut doctors).await?;
                    doctors[0].validate()?;
                    self.doctor_points(doctors).await?.pop()
                }
                None => None,
            },
        };

        let Some(point) = point else {
            tracing::warn!("{} record {} not found, nothing to update", kind, id);
            return Ok(false);
        };
        self.index.upsert(kind, vec![point]).await?;
        tracing::info!("Updated {} record {}", kind, id);
        Ok(true)
    }

    pub async fn run(&self, target: IngestTarget) -> Result<Vec<IngestReport>, IngestError> {
        self.run_with_progress(target, &|_, _, _| {}).await
    }

    /// Runs an ingestion while holding the single-run guard and records the
    /// outcome in the status. A concurrent call gets `AlreadyRunning`.
    pub async fn run_with_progress(
        &self,
        target: IngestTarget,
        progress: &ProgressFn,
    ) -> Result<Vec<IngestReport>, IngestError> {
        {
            let mut status = self.status.lock().await;
            if status.is_ingesting {
                return Err(IngestError::AlreadyRunning);
            }
            status.is_ingesting = true;
            status.last_error = None;
        }

        let work = async {
            match target {
                IngestTarget::All => self.full_reload_with_progress(progress).await,
                IngestTarget::Medicines => self
                    .ingest_with_progress(CollectionKind::Medicines, progress)
                    .await
                    .map(|r| vec![r]),
                IngestTarget::Doctors => self
                    .ingest_with_progress(CollectionKind::Doctors, progress)
                    .await
                    .map(|r| vec![r]),
            }
        };

        // Catch panics so `is_ingesting` is always reset.
        let result = std::panic::AssertUnwindSafe(work).catch_unwind().await;

        let mut status = self.status.lock().await;
        status.is_ingesting = false;
        status.last_run_at = Some(Utc::now());
        match result {
            Ok(Ok(reports)) => Ok(reports),
            Ok(Err(e)) => {
                tracing::error!("Ingestion error: {:#}", e);
                status.last_error = Some(format!("{:#}", e));
                Err(IngestError::Failed(e))
            }
            Err(panic_info) => {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("Ingestion panicked: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("Ingestion panicked: {}", s)
                } else {
                    "Ingestion panicked with unknown error".to_string()
                };
                tracing::error!("{}", panic_msg);
                status.last_error = Some(panic_msg.clone());
                Err(IngestError::Failed(anyhow::anyhow!(panic_msg)))
            }
        }
    }

    /// Periodic full reload. Overlapping runs are skipped.
    pub fn start_scheduler(pipeline: Arc<Self>, interval_minutes: u64) {
        if interval_minutes == 0 {
            return;
        }
        tokio::spawn(async move {
            pipeline.status.lock().await.schedule_interval_minutes = interval_minutes;
            let interval = Duration::from_secs(interval_minutes * 60);

            loop {
                tokio::time::sleep(interval).await;
                tracing::info!("Scheduled full reload starting...");
                match pipeline.run(IngestTarget::All).await {
                    Ok(_) => {}
                    Err(IngestError::AlreadyRunning) => {
                        tracing::info!("Skipping scheduled reload, ingestion already running")
                    }
                    Err(e) => tracing::error!("Scheduled reload failed: {}", e),
                }
            }
        });
    }

    /// Fills `specialization_names` for a batch of doctors with a single
    /// lookup. Unknown ids are left out of the names.
    pub async fn resolve_specializations(&self, doctors: &mut [DoctorRecord]) -> Result<()> {
        let ids: Vec<i64> = doctors
            .iter()
            .flat_map(|d| d.specialization_ids.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let names: HashMap<i64, String> = self
            .catalog
            .specializations_by_ids(&ids)
            .await
            .context("Failed to resolve specializations")?
            .into_iter()
            .map(|s| (s.id, s.name))
            .collect();

        for doctor in doctors.iter_mut() {
            doctor.specialization_names = doctor
                .specialization_ids
                .iter()
                .filter_map(|id| names.get(id).cloned())
                .collect();
        }
        Ok(())
    }

    async fn prepare_medicines(&self, offset: i64) -> Result<PreparedPage> {
        let rows = self
            .catalog
            .medicines_page(offset, self.page_size)
            .await
            .with_context(|| format!("Failed to read medicines at offset {}", offset))?;
        let fetched = rows.len();

        let valid: Vec<MedicineRecord> = rows
            .into_iter()
            .filter(|m| match m.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Skipping medicine: {}", e);
                    false
                }
            })
            .collect();

        Ok(PreparedPage {
            fetched,
            points: self.medicine_points(valid).await?,
        })
    }

    async fn prepare_doctors(&self, offset: i64) -> Result<PreparedPage> {
        let mut rows = self
            .catalog
            .doctors_page(offset, self.page_size)
            .await
            .with_context(|| format!("Failed to read doctors at offset {}", offset))?;
        let fetched = rows.len();
        self.resolve_specializations(&mut rows).await?;

        let valid: Vec<DoctorRecord> = rows
            .into_iter()
            .filter(|d| match d.validate() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Skipping doctor: {}", e);
                    false
                }
            })
            .collect();

        Ok(PreparedPage {
            fetched,
            points: self.doctor_points(valid).await?,
        })
    }

    async fn medicine_points(&self, medicines: Vec<MedicineRecord>) -> Result<Vec<IndexPoint>> {
        let documents: Vec<String> = medicines.iter().map(describe_medicine).collect();
        let vectors = self.embeddings.embed_texts(documents.clone()).await?;

        Ok(medicines
            .into_iter()
            .zip(documents)
            .zip(vectors)
            .map(|((medicine, document), vector)| IndexPoint {
                metadata: medicine.metadata(),
                id: Some(medicine.id),
                document,
                vector,
            })
            .collect())
    }

    async fn doctor_points(&self, doctors: Vec<DoctorRecord>) -> Result<Vec<IndexPoint>> {
        for doctor in &doctors {
            let collisions: Vec<&str> = delimiter_collisions(&doctor.specialization_names)
                .into_iter()
                .chain(delimiter_collisions(&doctor.qualifications))
                .collect();
            if !collisions.is_empty() {
                tracing::warn!(
                    "Doctor {} has list values containing the delimiter, they will be split on read: {:?}",
                    doctor.id,
                    collisions
                );
            }
        }

        let documents: Vec<String> = doctors.iter().map(describe_doctor).collect();
        let vectors = self.embeddings.embed_texts(documents.clone()).await?;

        Ok(doctors
            .into_iter()
            .zip(documents)
            .zip(vectors)
            .map(|((doctor, document), vector)| IndexPoint {
                metadata: doctor.metadata(),
                id: Some(doctor.id),
                document,
                vector,
            })
            .collect())
    }
}
