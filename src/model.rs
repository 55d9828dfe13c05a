//! Domain entities for the fleet tracker and the structures persisted by the
//! sync core: collections, pending operations and realtime change payloads.
//!
//! Field names follow the remote schema (Portuguese column names) so entities
//! serialize directly into remote rows and cache snapshots.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The four remote collections tracked by the sync core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Collection {
    #[serde(rename = "equipamentos_logistica")]
    Equipamentos,
    #[serde(rename = "tanques_disponiveis")]
    Tanques,
    #[serde(rename = "dollys_disponiveis")]
    Dollys,
    #[serde(rename = "pendencias_equipamentos")]
    Pendencias,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Equipamentos,
        Collection::Tanques,
        Collection::Dollys,
        Collection::Pendencias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Equipamentos => "equipamentos_logistica",
            Collection::Tanques => "tanques_disponiveis",
            Collection::Dollys => "dollys_disponiveis",
            Collection::Pendencias => "pendencias_equipamentos",
        }
    }

    /// Remote ordering expression for the collection's canonical sort.
    pub fn order_param(&self) -> &'static str {
        match self {
            Collection::Equipamentos => "created_at.desc",
            Collection::Tanques => "numero_tanque.asc",
            Collection::Dollys => "numero_dolly.asc",
            Collection::Pendencias => "data_abertura.desc",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const TEMP_ID_PREFIX: &str = "temp_";

/// Synthesize a temporary identifier for an optimistic insert. The prefix
/// keeps it distinguishable from server-issued identifiers until the remote
/// store confirms the row.
pub fn temp_id(now: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("{TEMP_ID_PREFIX}{}_{suffix}", now.timestamp_millis())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Rejection raised before any optimistic write happens. Everything else a
/// mutation can hit (network, remote store) is recovered by enqueueing and
/// never surfaces to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("campo obrigatorio ausente: {0}")]
    MissingField(&'static str),
    #[error("{field} deve ser maior que zero")]
    NonPositive { field: &'static str },
    #[error("{field} {value} ja cadastrado")]
    DuplicateNaturalKey { field: &'static str, value: i64 },
    #[error("patch de atualizacao invalido: {0}")]
    InvalidPatch(String),
}

/// A record belonging to one of the tracked collections. Implementations
/// define the collection binding, the canonical ordering and the
/// creation-time validation rules.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Canonical display ordering for the collection snapshot.
    fn order(a: &Self, b: &Self) -> Ordering;

    /// Validate a record about to be created against the current snapshot.
    fn validate_new(&self, existing: &[Self]) -> Result<(), ValidationError>;

    /// Fill creation-time defaults (timestamps, open dates) before the
    /// optimistic insert.
    fn apply_defaults(&mut self, now: DateTime<Utc>);
}

/// Row payload sent to the remote store on insert: the serialized record
/// minus the locally synthesized fields the server owns.
pub fn insert_payload<T: Record>(record: &T) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("id");
        map.remove("created_at");
        map.remove("updated_at");
    }
    value
}

/// Splice the fields of a JSON patch into a record, last-writer-wins per
/// field. The patch must be a JSON object.
pub fn merge_patch<T: Record>(record: &T, patch: &Value) -> Result<T, ValidationError> {
    let fields = match patch {
        Value::Object(map) => map,
        other => {
            return Err(ValidationError::InvalidPatch(format!(
                "esperado objeto JSON, recebido {other}"
            )))
        }
    };
    let mut value =
        serde_json::to_value(record).map_err(|e| ValidationError::InvalidPatch(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        for (key, field) in fields {
            map.insert(key.clone(), field.clone());
        }
    }
    serde_json::from_value(value).map_err(|e| ValidationError::InvalidPatch(e.to_string()))
}

fn reverse_chronological(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    b.cmp(&a)
}

/// Operational status shared by tanks and dollies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipStatus {
    Disponivel,
    EmUso,
    Manutencao,
}

impl EquipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipStatus::Disponivel => "disponivel",
            EquipStatus::EmUso => "em_uso",
            EquipStatus::Manutencao => "manutencao",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TipoConfiguracao {
    Solteiro,
    Conjunto,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TipoEquipamento {
    Tanque,
    Dolly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Prioridade {
    Baixa,
    Media,
    Alta,
    Urgente,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendenciaStatus {
    Aberta,
    EmAndamento,
    Concluida,
    Cancelada,
}

/// A truck with its attached tanks and optional dolly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Equipamento {
    #[serde(default)]
    pub id: String,
    pub frota_caminhao: i64,
    pub tanque_1: i64,
    pub tanque_2: i64,
    pub dolly: Option<i64>,
    pub tipo_carga: Option<String>,
    pub modified_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Equipamento {
    const COLLECTION: Collection = Collection::Equipamentos;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        reverse_chronological(a.created_at, b.created_at)
    }

    fn validate_new(&self, existing: &[Self]) -> Result<(), ValidationError> {
        if self.frota_caminhao <= 0 {
            return Err(ValidationError::NonPositive {
                field: "frota_caminhao",
            });
        }
        if self.tanque_1 <= 0 {
            return Err(ValidationError::NonPositive { field: "tanque_1" });
        }
        if self.tanque_2 <= 0 {
            return Err(ValidationError::NonPositive { field: "tanque_2" });
        }
        if existing
            .iter()
            .any(|e| e.frota_caminhao == self.frota_caminhao)
        {
            return Err(ValidationError::DuplicateNaturalKey {
                field: "frota_caminhao",
                value: self.frota_caminhao,
            });
        }
        Ok(())
    }

    fn apply_defaults(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(now);
    }
}

/// A tank in the availability pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tanque {
    #[serde(default)]
    pub id: String,
    pub numero_tanque: i64,
    pub capacidade: Option<i64>,
    pub tipo: Option<String>,
    pub status: EquipStatus,
    pub localizacao: Option<String>,
    pub observacoes: Option<String>,
    pub tipo_configuracao: TipoConfiguracao,
    pub tanque_conjunto_1: Option<i64>,
    pub tanque_conjunto_2: Option<i64>,
    pub dolly_conjunto: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Tanque {
    const COLLECTION: Collection = Collection::Tanques;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        a.numero_tanque.cmp(&b.numero_tanque)
    }

    fn validate_new(&self, existing: &[Self]) -> Result<(), ValidationError> {
        if self.numero_tanque <= 0 {
            return Err(ValidationError::NonPositive {
                field: "numero_tanque",
            });
        }
        if existing.iter().any(|t| t.numero_tanque == self.numero_tanque) {
            return Err(ValidationError::DuplicateNaturalKey {
                field: "numero_tanque",
                value: self.numero_tanque,
            });
        }
        Ok(())
    }

    fn apply_defaults(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(now);
    }
}

/// A dolly in the availability pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dolly {
    #[serde(default)]
    pub id: String,
    pub numero_dolly: i64,
    pub tipo: Option<String>,
    pub status: EquipStatus,
    pub localizacao: Option<String>,
    pub observacoes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Dolly {
    pub fn new(numero_dolly: i64, status: EquipStatus) -> Self {
        Self {
            id: String::new(),
            numero_dolly,
            tipo: None,
            status,
            localizacao: None,
            observacoes: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Record for Dolly {
    const COLLECTION: Collection = Collection::Dollys;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        a.numero_dolly.cmp(&b.numero_dolly)
    }

    fn validate_new(&self, existing: &[Self]) -> Result<(), ValidationError> {
        if self.numero_dolly <= 0 {
            return Err(ValidationError::NonPositive {
                field: "numero_dolly",
            });
        }
        if existing.iter().any(|d| d.numero_dolly == self.numero_dolly) {
            return Err(ValidationError::DuplicateNaturalKey {
                field: "numero_dolly",
                value: self.numero_dolly,
            });
        }
        Ok(())
    }

    fn apply_defaults(&mut self, now: DateTime<Utc>) {
        self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(now);
    }
}

/// An open maintenance pendency against a tank or dolly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pendencia {
    #[serde(default)]
    pub id: String,
    pub tipo_equipamento: TipoEquipamento,
    pub numero_equipamento: i64,
    pub tipo_pendencia: String,
    pub descricao: String,
    pub prioridade: Prioridade,
    pub status: PendenciaStatus,
    pub data_abertura: Option<DateTime<Utc>>,
    pub data_prevista: Option<DateTime<Utc>>,
    pub data_conclusao: Option<DateTime<Utc>>,
    pub responsavel: Option<String>,
    pub observacoes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Pendencia {
    const COLLECTION: Collection = Collection::Pendencias;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        reverse_chronological(a.data_abertura, b.data_abertura)
    }

    fn validate_new(&self, _existing: &[Self]) -> Result<(), ValidationError> {
        if self.numero_equipamento <= 0 {
            return Err(ValidationError::NonPositive {
                field: "numero_equipamento",
            });
        }
        if self.tipo_pendencia.trim().is_empty() {
            return Err(ValidationError::MissingField("tipo_pendencia"));
        }
        if self.descricao.trim().is_empty() {
            return Err(ValidationError::MissingField("descricao"));
        }
        Ok(())
    }

    fn apply_defaults(&mut self, now: DateTime<Utc>) {
        // A pendency opens at creation time unless the caller backdated it.
        self.data_abertura.get_or_insert(now);
        self.created_at.get_or_insert(now);
        self.updated_at.get_or_insert(now);
    }
}

/// A mutation that could not be applied remotely, queued for replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOperation {
    pub id: String,
    pub collection: Collection,
    #[serde(flatten)]
    pub payload: OperationPayload,
    pub enqueued_at: DateTime<Utc>,
}

/// The operation payload, tagged per verb. `Create` carries the temporary
/// identifier of the optimistic row so a later drain can reconcile it with
/// the server-issued one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    Create { local_id: String, row: Value },
    Update { id: String, patch: Value },
    Delete { id: String },
}

impl OperationPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            OperationPayload::Create { .. } => "create",
            OperationPayload::Update { .. } => "update",
            OperationPayload::Delete { .. } => "delete",
        }
    }
}

/// Remote change event kinds delivered by the push channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl ChangeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEvent::Insert => "INSERT",
            ChangeEvent::Update => "UPDATE",
            ChangeEvent::Delete => "DELETE",
        }
    }
}

/// One push notification for a collection: the new row for inserts and
/// updates, the deleted row's id for deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(rename = "eventType")]
    pub event: ChangeEvent,
    pub new: Option<Value>,
    pub old_id: Option<String>,
}

impl ChangeNotification {
    pub fn insert(row: Value) -> Self {
        Self {
            event: ChangeEvent::Insert,
            new: Some(row),
            old_id: None,
        }
    }

    pub fn update(row: Value) -> Self {
        Self {
            event: ChangeEvent::Update,
            new: Some(row),
            old_id: None,
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            event: ChangeEvent::Delete,
            new: None,
            old_id: Some(id.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temp_ids_are_prefixed_and_unique() {
        let now = Utc::now();
        let a = temp_id(now);
        let b = temp_id(now);
        assert!(is_temp_id(&a));
        assert!(is_temp_id(&b));
        assert_ne!(a, b);
        assert!(!is_temp_id("b20c54c2-9e55-4b08-9a23-7a3f2e6b6d1f"));
    }

    #[test]
    fn collection_roundtrips_through_serde() {
        for collection in Collection::ALL {
            let encoded = serde_json::to_string(&collection).unwrap();
            assert_eq!(encoded, format!("\"{}\"", collection.as_str()));
            let decoded: Collection = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, collection);
        }
    }

    #[test]
    fn dolly_ordering_is_by_number() {
        let mut dollys = vec![
            Dolly::new(26020, EquipStatus::Disponivel),
            Dolly::new(26005, EquipStatus::EmUso),
            Dolly::new(26010, EquipStatus::Disponivel),
        ];
        dollys.sort_by(Dolly::order);
        let numbers: Vec<i64> = dollys.iter().map(|d| d.numero_dolly).collect();
        assert_eq!(numbers, vec![26005, 26010, 26020]);
    }

    #[test]
    fn duplicate_dolly_number_is_rejected() {
        let mut existing = Dolly::new(26010, EquipStatus::Disponivel);
        existing.id = "srv-1".into();
        let candidate = Dolly::new(26010, EquipStatus::Disponivel);
        assert_eq!(
            candidate.validate_new(&[existing]),
            Err(ValidationError::DuplicateNaturalKey {
                field: "numero_dolly",
                value: 26010,
            })
        );
    }

    #[test]
    fn pendencia_defaults_open_date() {
        let mut pendencia = Pendencia {
            id: String::new(),
            tipo_equipamento: TipoEquipamento::Tanque,
            numero_equipamento: 29001,
            tipo_pendencia: "freio".into(),
            descricao: "troca de lona".into(),
            prioridade: Prioridade::Alta,
            status: PendenciaStatus::Aberta,
            data_abertura: None,
            data_prevista: None,
            data_conclusao: None,
            responsavel: None,
            observacoes: None,
            created_at: None,
            updated_at: None,
        };
        let now = Utc::now();
        pendencia.apply_defaults(now);
        assert_eq!(pendencia.data_abertura, Some(now));
    }

    #[test]
    fn merge_patch_overwrites_only_named_fields() {
        let mut dolly = Dolly::new(26010, EquipStatus::Disponivel);
        dolly.id = "srv-1".into();
        dolly.localizacao = Some("patio 2".into());

        let merged = merge_patch(&dolly, &json!({"status": "manutencao"})).unwrap();
        assert_eq!(merged.status, EquipStatus::Manutencao);
        assert_eq!(merged.numero_dolly, 26010);
        assert_eq!(merged.localizacao.as_deref(), Some("patio 2"));

        let err = merge_patch(&dolly, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPatch(_)));
    }

    #[test]
    fn insert_payload_strips_server_owned_fields() {
        let mut dolly = Dolly::new(26010, EquipStatus::Disponivel);
        dolly.id = "temp_123_abc".into();
        dolly.apply_defaults(Utc::now());
        let payload = insert_payload(&dolly);
        let map = payload.as_object().unwrap();
        assert!(!map.contains_key("id"));
        assert!(!map.contains_key("created_at"));
        assert!(!map.contains_key("updated_at"));
        assert_eq!(map["numero_dolly"], 26010);
        // Explicit nulls are kept so the remote store sees cleared fields.
        assert!(map["tipo"].is_null());
    }

    #[test]
    fn pending_operation_roundtrips_through_serde() {
        let op = PendingOperation {
            id: uuid::Uuid::new_v4().to_string(),
            collection: Collection::Dollys,
            payload: OperationPayload::Create {
                local_id: "temp_1_abc".into(),
                row: json!({"numero_dolly": 26010, "status": "disponivel"}),
            },
            enqueued_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&op).unwrap();
        let decoded: PendingOperation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, op);
        assert_eq!(decoded.payload.kind(), "create");
    }
}
