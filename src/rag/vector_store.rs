use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vectors_config, Condition, CountPointsBuilder,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId, PointStruct, Range,
    SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use super::filter::{Condition as FilterCondition, Metadata, MetadataFilter, MetadataValue};
use super::records::CollectionKind;
use crate::error::VectorStoreError;

/// A record to write: id (assigned when absent), document text, vector and
/// flat metadata. Re-upserting an id replaces all of it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPoint {
    pub id: Option<String>,
    pub document: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// A nearest-neighbour result. `distance` is cosine distance.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub distance: f32,
    pub document: String,
    pub metadata: Metadata,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns the ids written, in input order.
    async fn upsert(
        &self,
        kind: CollectionKind,
        points: Vec<IndexPoint>,
    ) -> Result<Vec<String>, VectorStoreError>;

    /// At most `k` hits ordered by ascending distance.
    async fn query(
        &self,
        kind: CollectionKind,
        vector: Vec<f32>,
        k: u64,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>, VectorStoreError>;

    async fn count(&self, kind: CollectionKind) -> Result<u64, VectorStoreError>;

    async fn clear(&self, kind: CollectionKind) -> Result<(), VectorStoreError>;
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), VectorStoreError> {
    if vector.len() != expected {
        return Err(VectorStoreError::InvalidDimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

const RECORD_ID_KEY: &str = "record_id";
const TEXT_KEY: &str = "text";
const METADATA_KEY: &str = "metadata";

pub struct VectorStore {
    client: Qdrant,
    collection_prefix: String,
    dimension: usize,
}

impl VectorStore {
    pub async fn new(
        url: &str,
        collection_prefix: &str,
        dimension: usize,
    ) -> Result<Self, VectorStoreError> {
        tracing::info!("Building Qdrant client for URL: {}", url);
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Unreachable {
                reason: e.to_string(),
            })?;

        let store = Self {
            client,
            collection_prefix: collection_prefix.to_string(),
            dimension,
        };

        for kind in CollectionKind::ALL {
            store.ensure_collection(kind).await?;
        }
        tracing::info!("Qdrant collections ready");

        Ok(store)
    }

    fn collection_name(&self, kind: CollectionKind) -> String {
        format!("{}{}", self.collection_prefix, kind.as_str())
    }

    async fn ensure_collection(&self, kind: CollectionKind) -> Result<(), VectorStoreError> {
        let name = self.collection_name(kind);
        let exists = self
            .client
            .collection_exists(&name)
            .await
            .map_err(|e| VectorStoreError::Unreachable {
                reason: e.to_string(),
            })?;

        if !exists {
            tracing::info!("Creating Qdrant collection {}", name);
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&name).vectors_config(VectorParamsBuilder::new(
                        self.dimension as u64,
                        Distance::Cosine,
                    )),
                )
                .await
                .map_err(|e| VectorStoreError::Unreachable {
                    reason: e.to_string(),
                })?;
            return Ok(());
        }

        self.verify_collection(&name).await
    }

    /// Similarity is derived as `1 - distance`, which only holds for cosine.
    async fn verify_collection(&self, name: &str) -> Result<(), VectorStoreError> {
        let info = self
            .client
            .collection_info(name)
            .await
            .map_err(|e| VectorStoreError::Unreachable {
                reason: e.to_string(),
            })?;

        let params = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);

        match params {
            Some(vectors_config::Config::Params(params)) => {
                if params.distance != Distance::Cosine as i32 {
                    return Err(VectorStoreError::MetricMismatch {
                        name: name.to_string(),
                        metric: format!("distance code {}", params.distance),
                    });
                }
                if params.size as usize != self.dimension {
                    return Err(VectorStoreError::InvalidDimension {
                        expected: self.dimension,
                        actual: params.size as usize,
                    });
                }
                Ok(())
            }
            _ => Err(VectorStoreError::MetricMismatch {
                name: name.to_string(),
                metric: "named or missing vector params".to_string(),
            }),
        }
    }
}

/// Qdrant only accepts UUIDs or unsigned integers as point ids; other record
/// ids are mapped to a stable v5 UUID and kept verbatim in the payload.
pub fn point_id_for(record_id: &str) -> PointId {
    if let Ok(uuid) = Uuid::parse_str(record_id) {
        return PointId::from(uuid.to_string());
    }
    if let Ok(num) = record_id.parse::<u64>() {
        return PointId::from(num);
    }
    PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string())
}

fn metadata_to_json(metadata: &Metadata) -> JsonValue {
    let map: JsonMap<String, JsonValue> = metadata
        .iter()
        .map(|(key, value)| {
            let json = match value {
                MetadataValue::Bool(v) => JsonValue::from(*v),
                MetadataValue::Int(v) => JsonValue::from(*v),
                MetadataValue::Float(v) => JsonValue::from(*v),
                MetadataValue::Str(v) => JsonValue::from(v.as_str()),
            };
            (key.clone(), json)
        })
        .collect();
    JsonValue::Object(map)
}

fn metadata_from_qdrant(value: &QdrantValue) -> Metadata {
    let mut metadata = Metadata::new();
    if let Some(Kind::StructValue(fields)) = &value.kind {
        for (key, field) in &fields.fields {
            let converted = match &field.kind {
                Some(Kind::BoolValue(v)) => Some(MetadataValue::Bool(*v)),
                Some(Kind::IntegerValue(v)) => Some(MetadataValue::Int(*v)),
                Some(Kind::DoubleValue(v)) => Some(MetadataValue::Float(*v)),
                Some(Kind::StringValue(v)) => Some(MetadataValue::Str(v.clone())),
                _ => None,
            };
            if let Some(converted) = converted {
                metadata.insert(key.clone(), converted);
            }
        }
    }
    metadata
}

fn string_from_qdrant(value: Option<&QdrantValue>) -> Option<String> {
    match value.and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn point_id_string(id: Option<&PointId>) -> Option<String> {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => Some(uuid.clone()),
        Some(PointIdOptions::Num(num)) => Some(num.to_string()),
        None => None,
    }
}

pub fn to_qdrant_filter(filter: &MetadataFilter) -> Option<Filter> {
    if filter.is_empty() {
        return None;
    }

    let conditions: Vec<Condition> = filter
        .predicates()
        .iter()
        .map(|predicate| {
            let key = format!("{}.{}", METADATA_KEY, predicate.field);
            match &predicate.condition {
                FilterCondition::Equals(MetadataValue::Bool(v)) => Condition::matches(key, *v),
                FilterCondition::Equals(MetadataValue::Int(v)) => Condition::matches(key, *v),
                FilterCondition::Equals(MetadataValue::Str(v)) => {
                    Condition::matches(key, v.clone())
                }
                FilterCondition::Equals(MetadataValue::Float(v)) => Condition::range(
                    key,
                    Range {
                        gte: Some(*v),
                        lte: Some(*v),
                        ..Default::default()
                    },
                ),
                FilterCondition::AtLeast(threshold) => Condition::range(
                    key,
                    Range {
                        gte: Some(*threshold),
                        ..Default::default()
                    },
                ),
                // Without a full-text index Qdrant treats this as a substring match.
                FilterCondition::Contains(needle) => Condition::matches_text(key, needle.clone()),
            }
        })
        .collect();

    Some(Filter::must(conditions))
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn upsert(
        &self,
        kind: CollectionKind,
        points: Vec<IndexPoint>,
    ) -> Result<Vec<String>, VectorStoreError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(points.len());
        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            check_dimension(self.dimension, &point.vector)?;
            let id = point.id.unwrap_or_else(|| Uuid::new_v4().to_string());

            let mut payload_map = JsonMap::new();
            payload_map.insert(RECORD_ID_KEY.to_string(), JsonValue::String(id.clone()));
            payload_map.insert(TEXT_KEY.to_string(), JsonValue::String(point.document));
            payload_map.insert(METADATA_KEY.to_string(), metadata_to_json(&point.metadata));

            structs.push(PointStruct::new(point_id_for(&id), point.vector, payload_map));
            ids.push(id);
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection_name(kind), structs).wait(true))
            .await
            .map_err(|e| VectorStoreError::UpsertFailed {
                reason: e.to_string(),
            })?;

        Ok(ids)
    }

    async fn query(
        &self,
        kind: CollectionKind,
        vector: Vec<f32>,
        k: u64,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>, VectorStoreError> {
        filter.validate()?;
        check_dimension(self.dimension, &vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut builder =
            SearchPointsBuilder::new(self.collection_name(kind), vector, k).with_payload(true);
        if let Some(qdrant_filter) = to_qdrant_filter(filter) {
            builder = builder.filter(qdrant_filter);
        }

        let search_result = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| VectorStoreError::SearchFailed {
                reason: e.to_string(),
            })?;

        let hits = search_result
            .result
            .into_iter()
            .map(|point| {
                let id = string_from_qdrant(point.payload.get(RECORD_ID_KEY))
                    .or_else(|| point_id_string(point.id.as_ref()))
                    .unwrap_or_default();
                IndexHit {
                    id,
                    // Qdrant reports cosine similarity; convert back to distance.
                    distance: 1.0 - point.score,
                    document: string_from_qdrant(point.payload.get(TEXT_KEY)).unwrap_or_default(),
                    metadata: point
                        .payload
                        .get(METADATA_KEY)
                        .map(metadata_from_qdrant)
                        .unwrap_or_default(),
                }
            })
            .collect();

        Ok(hits)
    }

    async fn count(&self, kind: CollectionKind) -> Result<u64, VectorStoreError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection_name(kind)).exact(true))
            .await
            .map_err(|e| VectorStoreError::SearchFailed {
                reason: e.to_string(),
            })?;
        Ok(response.result.map(|r| r.count).unwrap_or_default())
    }

    async fn clear(&self, kind: CollectionKind) -> Result<(), VectorStoreError> {
        let name = self.collection_name(kind);
        tracing::info!("Clearing Qdrant collection {}", name);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&name)
                    .points(Filter::default())
                    .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::DeleteFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_mapping() {
        let uuid = "6f1c1c1e-2b1f-4c53-9a4e-2f0a3c1d9b77";
        assert_eq!(
            point_id_for(uuid).point_id_options,
            Some(PointIdOptions::Uuid(uuid.to_string()))
        );
        assert_eq!(
            point_id_for("42").point_id_options,
            Some(PointIdOptions::Num(42))
        );
        // Arbitrary strings map to a stable UUID.
        assert_eq!(point_id_for("med-a"), point_id_for("med-a"));
        assert_ne!(point_id_for("med-a"), point_id_for("med-b"));
    }

    #[test]
    fn test_empty_filter_has_no_qdrant_clause() {
        assert!(to_qdrant_filter(&MetadataFilter::new()).is_none());
    }

    #[test]
    fn test_filter_conversion_prefixes_metadata() {
        let filter = MetadataFilter::new()
            .eq("is_active", true)
            .gte("patient_satisfaction_rate", 70.0)
            .contains("specialization_names", "Cardiology");
        let qdrant_filter = to_qdrant_filter(&filter).unwrap();
        assert_eq!(qdrant_filter.must.len(), 3);
        assert!(qdrant_filter.should.is_empty());
    }

    #[test]
    fn test_metadata_json_shape() {
        let mut metadata = Metadata::new();
        metadata.insert("price".into(), 50.0.into());
        metadata.insert("stock".into(), 3_i64.into());
        metadata.insert("prescription_required".into(), false.into());
        metadata.insert("drug_category".into(), "Analgesic".into());
        assert_eq!(
            metadata_to_json(&metadata),
            serde_json::json!({
                "price": 50.0,
                "stock": 3,
                "prescription_required": false,
                "drug_category": "Analgesic",
            })
        );
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_dimension(3, &[0.0, 1.0, 0.0]).is_ok());
        assert!(matches!(
            check_dimension(3, &[0.0]),
            Err(VectorStoreError::InvalidDimension {
                expected: 3,
                actual: 1
            })
        ));
    }
}
