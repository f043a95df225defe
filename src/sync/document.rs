//! Firestore document encoding
//!
//! Firestore's REST API wraps every field in a typed value
//! (`{"stringValue": "..."}`, `{"integerValue": "42"}`, ...). This module
//! converts between those and plain JSON, and maps local records to the
//! camelCase documents the mobile and web clients read.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::{SyncError, SyncResult};
use crate::storage::{Entreprise, Signalement, Statut, User};

/// A document as stored remotely, with its fields decoded to plain JSON
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub fields: Map<String, Value>,
    pub update_time: Option<DateTime<Utc>>,
}

/// Builds the typed `fields` object of a Firestore document
#[derive(Debug, Default, Clone)]
pub struct DocumentBuilder {
    fields: Map<String, Value>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, key: &str, value: Option<&str>) -> Self {
        let v = match value {
            Some(s) => json!({ "stringValue": s }),
            None => null_value(),
        };
        self.fields.insert(key.to_string(), v);
        self
    }

    pub fn integer(mut self, key: &str, value: Option<i64>) -> Self {
        let v = match value {
            Some(n) => json!({ "integerValue": n.to_string() }),
            None => null_value(),
        };
        self.fields.insert(key.to_string(), v);
        self
    }

    pub fn double(mut self, key: &str, value: Option<f64>) -> Self {
        let v = match value {
            Some(n) => json!({ "doubleValue": n }),
            None => null_value(),
        };
        self.fields.insert(key.to_string(), v);
        self
    }

    pub fn boolean(mut self, key: &str, value: bool) -> Self {
        self.fields
            .insert(key.to_string(), json!({ "booleanValue": value }));
        self
    }

    pub fn timestamp(mut self, key: &str, value: Option<&DateTime<Utc>>) -> Self {
        let v = match value {
            Some(ts) => json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Millis, true) }),
            None => null_value(),
        };
        self.fields.insert(key.to_string(), v);
        self
    }

    pub fn strings(mut self, key: &str, values: &[String]) -> Self {
        let items: Vec<Value> = values.iter().map(|s| json!({ "stringValue": s })).collect();
        self.fields
            .insert(key.to_string(), json!({ "arrayValue": { "values": items } }));
        self
    }

    pub fn build(self) -> Map<String, Value> {
        self.fields
    }
}

fn null_value() -> Value {
    json!({ "nullValue": null })
}

/// Encode plain JSON as a Firestore typed value
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => null_value(),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or(0.0) }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Decode a Firestore typed value. Timestamps become RFC 3339 strings.
pub fn decode_value(value: &Value) -> SyncResult<Value> {
    let obj = value
        .as_object()
        .ok_or_else(|| SyncError::Encoding(format!("typed value expected, got {}", value)))?;
    let (kind, inner) = obj
        .iter()
        .next()
        .ok_or_else(|| SyncError::Encoding("empty typed value".into()))?;

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "doubleValue" => Ok(inner.clone()),
        "stringValue" | "timestampValue" | "referenceValue" => Ok(inner.clone()),
        "integerValue" => {
            // integers travel as strings
            let n = match inner {
                Value::String(s) => s
                    .parse::<i64>()
                    .map_err(|e| SyncError::Encoding(format!("bad integerValue {}: {}", s, e)))?,
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| SyncError::Encoding(format!("bad integerValue {}", n)))?,
                other => return Err(SyncError::Encoding(format!("bad integerValue {}", other))),
            };
            Ok(Value::from(n))
        }
        "geoPointValue" => Ok(inner.clone()),
        "arrayValue" => {
            let items = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<SyncResult<Vec<_>>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(items))
        }
        "mapValue" => {
            let fields = inner
                .get("fields")
                .map(decode_fields)
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Object(fields))
        }
        other => Err(SyncError::Encoding(format!("unsupported value type {}", other))),
    }
}

pub fn decode_fields(fields: &Value) -> SyncResult<Map<String, Value>> {
    let obj = fields
        .as_object()
        .ok_or_else(|| SyncError::Encoding("fields must be an object".into()))?;
    obj.iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

/// Parse a REST document (`{name, fields, updateTime}`)
pub fn parse_document(raw: &Value) -> SyncResult<RemoteDocument> {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Encoding("document without name".into()))?;
    let id = name.rsplit('/').next().unwrap_or(name).to_string();

    let fields = match raw.get("fields") {
        Some(f) => decode_fields(f)?,
        None => Map::new(),
    };
    let update_time = raw
        .get("updateTime")
        .and_then(Value::as_str)
        .and_then(parse_ts);

    Ok(RemoteDocument {
        id,
        fields,
        update_time,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================
// Record mapping
// ============================================

pub fn signalement_document(s: &Signalement, author_email: Option<&str>) -> Map<String, Value> {
    DocumentBuilder::new()
        .integer("id", Some(s.id))
        .string("description", Some(&s.description))
        .string("adresse", s.adresse.as_deref())
        .double("latitude", Some(s.latitude))
        .double("longitude", Some(s.longitude))
        .string("statusCode", Some(s.status.firestore_code()))
        .string("statusLibelle", Some(s.status.libelle()))
        .integer("userId", s.user_id)
        .string("userEmail", author_email)
        .double("surface", s.surface)
        .double("budget", s.budget)
        .integer("niveau", s.niveau.map(i64::from))
        .integer("entrepriseId", s.entreprise_id)
        .timestamp("dateSignalement", Some(&s.date_signalement))
        .timestamp("createdAt", Some(&s.created_at))
        .timestamp("updatedAt", Some(&s.updated_at))
        .timestamp("syncedAt", Some(&Utc::now()))
        .build()
}

pub fn user_document(u: &User, firebase_uid: &str) -> Map<String, Value> {
    DocumentBuilder::new()
        .integer("id", Some(u.id))
        .string("email", Some(&u.email))
        .string("name", Some(&u.name))
        .string("firebaseUid", Some(firebase_uid))
        .string("roleCode", Some(u.role.as_str()))
        .string("roleLibelle", Some(u.role.libelle()))
        .boolean("isLocked", u.is_locked)
        .timestamp("createdAt", Some(&u.created_at))
        .timestamp("updatedAt", Some(&u.updated_at))
        .timestamp("syncedAt", Some(&Utc::now()))
        .build()
}

pub fn entreprise_document(e: &Entreprise) -> Map<String, Value> {
    DocumentBuilder::new()
        .integer("id", Some(e.id))
        .string("nom", Some(&e.nom))
        .string("siret", e.siret.as_deref())
        .string("telephone", e.telephone.as_deref())
        .string("email", e.email.as_deref())
        .string("adresse", e.adresse.as_deref())
        .strings("specialites", &e.specialites)
        .boolean("isActive", e.is_active)
        .double("noteMoyenne", e.note_moyenne)
        .integer("nombreInterventions", Some(i64::from(e.nombre_interventions)))
        .timestamp("createdAt", Some(&e.created_at))
        .timestamp("updatedAt", Some(&e.updated_at))
        .timestamp("syncedAt", Some(&Utc::now()))
        .build()
}

/// A signalement as read from a remote document
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSignalement {
    pub signalement: Signalement,
    pub user_email: Option<String>,
}

/// Map a remote document to a signalement. `id` and `user_id` are left for
/// the caller to resolve against local rows.
pub fn signalement_from_document(doc: &RemoteDocument) -> SyncResult<RemoteSignalement> {
    let f = &doc.fields;

    let latitude = number(f, "latitude")
        .ok_or_else(|| SyncError::Encoding(format!("document {}: latitude missing", doc.id)))?;
    let longitude = number(f, "longitude")
        .ok_or_else(|| SyncError::Encoding(format!("document {}: longitude missing", doc.id)))?;
    let description = text(f, "description").unwrap_or_default();

    let status = match text(f, "statusCode").or_else(|| text(f, "status")) {
        Some(code) => code.parse::<Statut>().unwrap_or_else(|e| {
            tracing::warn!(document = %doc.id, error = %e, "Unknown status, read as nouveau");
            Statut::Nouveau
        }),
        None => Statut::Nouveau,
    };

    let created_at = timestamp(f, "createdAt");
    let updated_at = timestamp(f, "updatedAt")
        .or(created_at)
        .or(doc.update_time)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    let date_signalement = timestamp(f, "dateSignalement")
        .or(created_at)
        .unwrap_or(updated_at);

    let signalement = Signalement {
        id: 0,
        user_id: None,
        latitude,
        longitude,
        adresse: text(f, "adresse"),
        description,
        budget: number(f, "budget"),
        niveau: number(f, "niveau").and_then(|n| u8::try_from(n as i64).ok()),
        surface: number(f, "surface"),
        entreprise_id: None,
        status,
        date_signalement,
        created_at: created_at.unwrap_or(date_signalement),
        updated_at,
        firebase_id: Some(doc.id.clone()),
        firebase_synced: true,
        last_sync_at: Some(Utc::now()),
    };

    Ok(RemoteSignalement {
        signalement,
        user_email: text(f, "userEmail"),
    })
}

fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    match fields.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn timestamp(fields: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    fields.get(key).and_then(Value::as_str).and_then(parse_ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain_json() {
        let encoded = encode_value(&json!({"n": 3, "x": 1.5, "s": "a", "b": true, "none": null, "l": [1]}));
        let fields = &encoded["mapValue"]["fields"];
        assert_eq!(fields["n"], json!({"integerValue": "3"}));
        assert_eq!(fields["x"], json!({"doubleValue": 1.5}));
        assert_eq!(fields["s"], json!({"stringValue": "a"}));
        assert_eq!(fields["b"], json!({"booleanValue": true}));
        assert_eq!(fields["none"], json!({"nullValue": null}));
        assert_eq!(fields["l"]["arrayValue"]["values"][0], json!({"integerValue": "1"}));
    }

    #[test]
    fn test_decode_typed_values() {
        let raw = json!({
            "count": {"integerValue": "42"},
            "when": {"timestampValue": "2026-03-01T10:00:00Z"},
            "tags": {"arrayValue": {"values": [{"stringValue": "voirie"}]}},
            "empty": {"arrayValue": {}},
            "nested": {"mapValue": {"fields": {"ok": {"booleanValue": true}}}}
        });
        let decoded = decode_fields(&raw).unwrap();
        assert_eq!(decoded["count"], json!(42));
        assert_eq!(decoded["when"], json!("2026-03-01T10:00:00Z"));
        assert_eq!(decoded["tags"], json!(["voirie"]));
        assert_eq!(decoded["empty"], json!([]));
        assert_eq!(decoded["nested"]["ok"], json!(true));

        assert!(decode_value(&json!({"integerValue": "abc"})).is_err());
        assert!(decode_value(&json!({"bytesValue": "AA=="})).is_err());
    }

    #[test]
    fn test_parse_document_and_signalement() {
        let raw = json!({
            "name": "projects/p/databases/(default)/documents/signalements/abc123",
            "fields": {
                "latitude": {"doubleValue": -18.91},
                "longitude": {"doubleValue": 47.52},
                "description": {"stringValue": "Route inondée"},
                "statusCode": {"stringValue": "en_cours"},
                "userEmail": {"stringValue": "rabe@example.mg"},
                "niveau": {"integerValue": "3"},
                "updatedAt": {"timestampValue": "2026-03-02T08:30:00.000Z"},
                "dateSignalement": {"timestampValue": "2026-03-01T07:00:00Z"}
            },
            "updateTime": "2026-03-02T08:30:01Z"
        });

        let doc = parse_document(&raw).unwrap();
        assert_eq!(doc.id, "abc123");

        let remote = signalement_from_document(&doc).unwrap();
        let s = remote.signalement;
        assert_eq!(s.status, Statut::EnCours);
        assert_eq!(s.niveau, Some(3));
        assert_eq!(s.firebase_id.as_deref(), Some("abc123"));
        assert_eq!(s.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true), "2026-03-02T08:30:00Z");
        assert_eq!(remote.user_email.as_deref(), Some("rabe@example.mg"));
    }

    #[test]
    fn test_signalement_document_uses_uppercase_status() {
        let now = Utc::now();
        let s = Signalement {
            id: 4,
            user_id: None,
            latitude: -18.91,
            longitude: 47.52,
            adresse: None,
            description: "Chaussée affaissée".into(),
            status: Statut::EnCours,
            surface: None,
            budget: None,
            niveau: None,
            entreprise_id: None,
            date_signalement: now,
            firebase_id: None,
            firebase_synced: false,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        };
        let doc = signalement_document(&s, None);
        assert_eq!(doc["statusCode"], json!({"stringValue": "EN_COURS"}));
    }

    #[test]
    fn test_unknown_remote_status_reads_as_nouveau() {
        let mut fields = Map::new();
        fields.insert("latitude".into(), json!({"doubleValue": -18.91}));
        fields.insert("longitude".into(), json!({"doubleValue": 47.52}));
        fields.insert("statusCode".into(), json!({"stringValue": "EN_ATTENTE"}));
        let doc = RemoteDocument {
            id: "odd".into(),
            fields: fields.clone(),
            update_time: None,
        };
        assert_eq!(signalement_from_document(&doc).unwrap().signalement.status, Statut::Nouveau);

        fields.insert("statusCode".into(), json!({"stringValue": "encours"}));
        let doc = RemoteDocument {
            id: "alias".into(),
            fields,
            update_time: None,
        };
        assert_eq!(signalement_from_document(&doc).unwrap().signalement.status, Statut::EnCours);
    }

    #[test]
    fn test_signalement_without_position_is_rejected() {
        let doc = RemoteDocument {
            id: "x".into(),
            fields: Map::new(),
            update_time: None,
        };
        assert!(matches!(signalement_from_document(&doc), Err(SyncError::Encoding(_))));
    }

    #[test]
    fn test_builder_nulls() {
        let fields = DocumentBuilder::new()
            .string("adresse", None)
            .integer("userId", Some(7))
            .build();
        assert_eq!(fields["adresse"], json!({"nullValue": null}));
        assert_eq!(fields["userId"], json!({"integerValue": "7"}));
    }
}
