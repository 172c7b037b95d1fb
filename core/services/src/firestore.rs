//! Firestore documents over the REST v1 API.
//!
//! Documents are exchanged as plain JSON objects; conversion to and from
//! Firestore's typed value encoding happens here.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use flextk_auth::http::{check, json as read_json, transport_error};
use flextk_auth::{scopes, ServiceAccount, ServiceAccountSource, TokenCache};
use flextk_common::{Error, Result};
use flextk_config::settings::FirebaseSettings;

const FIRESTORE_BASE: &str = "https://firestore.googleapis.com";

const PAGE_SIZE: &str = "300";

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// A document with its fields decoded to plain JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Last segment of the resource name.
    pub id: String,
    /// Full resource name, `projects/{p}/databases/{d}/documents/...`.
    pub name: String,
    pub fields: Map<String, Value>,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    update_time: Option<DateTime<Utc>>,
}

impl RawDocument {
    fn decode(self) -> Result<Document> {
        let mut fields = Map::new();
        for (key, value) in &self.fields {
            fields.insert(key.clone(), from_firestore_value(value)?);
        }
        Ok(Document {
            id: self.name.rsplit('/').next().unwrap_or_default().to_string(),
            name: self.name,
            fields,
            create_time: self.create_time,
            update_time: self.update_time,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentList {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Encode a JSON value as a Firestore `Value`.
pub fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": to_firestore_fields(map) } }),
    }
}

fn to_firestore_fields(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), to_firestore_value(v)))
        .collect()
}

/// Decode a Firestore `Value` into plain JSON.
///
/// Timestamps, bytes and references become strings; geo points become
/// `{latitude, longitude}` objects.
///
/// # Errors
/// - `Provider` for a value with no recognised type key
pub fn from_firestore_value(value: &Value) -> Result<Value> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::Provider(format!("Malformed Firestore value: {}", value)))?;

    if object.contains_key("nullValue") {
        return Ok(Value::Null);
    }
    if let Some(b) = object.get("booleanValue") {
        return Ok(b.clone());
    }
    if let Some(i) = object.get("integerValue") {
        let parsed = match i {
            Value::String(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        };
        return parsed
            .map(Value::from)
            .ok_or_else(|| Error::Provider(format!("Malformed Firestore integer: {}", i)));
    }
    if let Some(d) = object.get("doubleValue") {
        return Ok(d.clone());
    }
    for key in ["stringValue", "timestampValue", "bytesValue", "referenceValue"] {
        if let Some(s) = object.get(key) {
            return Ok(s.clone());
        }
    }
    if let Some(point) = object.get("geoPointValue") {
        return Ok(json!({
            "latitude": point.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": point.get("longitude").cloned().unwrap_or(json!(0.0)),
        }));
    }
    if let Some(array) = object.get("arrayValue") {
        let values = match array.get("values").and_then(Value::as_array) {
            Some(values) => values
                .iter()
                .map(from_firestore_value)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        return Ok(Value::Array(values));
    }
    if let Some(map) = object.get("mapValue") {
        let mut fields = Map::new();
        if let Some(raw) = map.get("fields").and_then(Value::as_object) {
            for (k, v) in raw {
                fields.insert(k.clone(), from_firestore_value(v)?);
            }
        }
        return Ok(Value::Object(fields));
    }

    Err(Error::Provider(format!("Unknown Firestore value type: {}", value)))
}

/// Field path for an update mask; keys outside `[A-Za-z_][A-Za-z0-9_]*` are
/// backtick-quoted.
fn field_path(key: &str) -> String {
    let mut chars = key.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        key.to_string()
    } else {
        format!("`{}`", key.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn check_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains('/') {
        return Err(Error::InvalidInput(format!(
            "Invalid Firestore {} '{}'",
            kind, value
        )));
    }
    Ok(())
}

/// Firestore client for one project's default database.
pub struct Firestore {
    project_id: String,
    base_url: String,
    http: Client,
    tokens: Arc<TokenCache>,
}

impl Firestore {
    pub fn new(project_id: impl Into<String>, tokens: Arc<TokenCache>) -> Self {
        Self {
            project_id: project_id.into(),
            base_url: FIRESTORE_BASE.to_string(),
            http: Client::new(),
            tokens,
        }
    }

    /// Build from the Firebase section; the project comes from the key file.
    pub fn from_settings(settings: &FirebaseSettings) -> Result<Self> {
        let account = ServiceAccount::load(&settings.service_account)?;
        let project_id = account.project_id.clone();
        let source =
            ServiceAccountSource::new(account, &[scopes::DATASTORE, scopes::CLOUD_PLATFORM]);
        Ok(Self::new(
            project_id,
            Arc::new(TokenCache::new(Arc::new(source))),
        ))
    }

    /// Point the client at a different endpoint (emulator or mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn collection_url(&self, collection: &str) -> Result<String> {
        let mut url = format!(
            "{}/v1/projects/{}/databases/(default)/documents",
            self.base_url, self.project_id
        );
        // Nested collections are given as `parent/doc/child`.
        for segment in collection.split('/') {
            check_segment("collection", segment)?;
            url.push('/');
            url.push_str(&utf8_percent_encode(segment, SEGMENT).to_string());
        }
        Ok(url)
    }

    fn document_url(&self, collection: &str, id: &str) -> Result<String> {
        check_segment("document id", id)?;
        Ok(format!(
            "{}/{}",
            self.collection_url(collection)?,
            utf8_percent_encode(id, SEGMENT)
        ))
    }

    /// Fetch one document. A missing document is `None`, not an error.
    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let response = self
            .http
            .get(self.document_url(collection, id)?)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("Firestore get", e))?;

        match read_json::<RawDocument>(response, "Firestore get").await {
            Ok(raw) => raw.decode().map(Some),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All documents in a collection, following page tokens.
    pub async fn list_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let url = self.collection_url(collection)?;
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, self.tokens.bearer().await?)
                .query(&[("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport_error("Firestore list", e))?;
            let page: DocumentList = read_json(response, "Firestore list").await?;
            for raw in page.documents {
                documents.push(raw.decode()?);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} documents from {}", documents.len(), collection);
        Ok(documents)
    }

    /// Create or fully replace a document.
    pub async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> Result<Document> {
        let response = self
            .http
            .patch(self.document_url(collection, id)?)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .json(&json!({ "fields": to_firestore_fields(data) }))
            .send()
            .await
            .map_err(|e| transport_error("Firestore set", e))?;

        let document = read_json::<RawDocument>(response, "Firestore set")
            .await?
            .decode()?;
        info!("Set document {}/{}", collection, id);
        Ok(document)
    }

    /// Overwrite only the top-level fields present in `data`.
    ///
    /// # Errors
    /// - `NotFound` if the document does not exist
    pub async fn update_document(
        &self,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> Result<Document> {
        if data.is_empty() {
            return Err(Error::InvalidInput("Nothing to update".to_string()));
        }

        let mut query: Vec<(&str, String)> = data
            .keys()
            .map(|k| ("updateMask.fieldPaths", field_path(k)))
            .collect();
        query.push(("currentDocument.exists", "true".to_string()));

        let response = self
            .http
            .patch(self.document_url(collection, id)?)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .query(&query)
            .json(&json!({ "fields": to_firestore_fields(data) }))
            .send()
            .await
            .map_err(|e| transport_error("Firestore update", e))?;

        let document = read_json::<RawDocument>(response, "Firestore update")
            .await?
            .decode()?;
        info!("Updated document {}/{}", collection, id);
        Ok(document)
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.document_url(collection, id)?)
            .header(header::AUTHORIZATION, self.tokens.bearer().await?)
            .send()
            .await
            .map_err(|e| transport_error("Firestore delete", e))?;

        check(response, "Firestore delete").await?;
        info!("Deleted document {}/{}", collection, id);
        Ok(())
    }
}
