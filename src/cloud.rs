use anyhow::{anyhow, Context, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

pub type Document = Map<String, Value>;

/// Document store used when the user is signed in.
///
/// Paths are slash separated, alternating collection and document ids
/// (`users/{uid}/contacts/{id}`).
pub trait DocumentStore {
    fn get(&self, path: &str) -> Result<Option<Document>>;
    /// Writes a document. With `merge` only the given fields are replaced.
    fn set(&self, path: &str, doc: &Document, merge: bool) -> Result<()>;
    /// Lists `(id, document)` pairs directly under a collection.
    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>>;
    fn delete(&self, path: &str) -> Result<()>;
}

const FIRESTORE_API_URL: &str = "https://firestore.googleapis.com/v1";
const LIST_PAGE_SIZE: &str = "300";

pub fn user_path(uid: &str) -> String {
    format!("users/{}", uid)
}

pub fn contacts_collection(uid: &str) -> String {
    format!("users/{}/contacts", uid)
}

pub fn professional_info_path(uid: &str) -> String {
    format!("users/{}/profile/professional", uid)
}

pub fn resume_path(uid: &str) -> String {
    format!("users/{}/profile/resume", uid)
}

pub fn onboarding_profile_path(uid: &str) -> String {
    format!("profiles/{}", uid)
}

// --- Firestore REST store ---

pub struct FirestoreStore {
    documents_url: String,
    id_token: Option<String>,
    client: reqwest::blocking::Client,
}

impl FirestoreStore {
    pub fn new(project_id: &str, id_token: Option<String>) -> Result<Self> {
        if project_id.trim().is_empty() {
            return Err(anyhow!("Firebase project id is empty"));
        }
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            documents_url: format!(
                "{}/projects/{}/databases/(default)/documents",
                FIRESTORE_API_URL, project_id
            ),
            id_token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.documents_url, path.trim_matches('/'))
    }

    fn authorized(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.id_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn fail(response: reqwest::blocking::Response, action: &str) -> anyhow::Error {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        anyhow!("Firestore {} failed ({}): {}", action, status, body)
    }
}

impl DocumentStore for FirestoreStore {
    fn get(&self, path: &str) -> Result<Option<Document>> {
        debug!(path, "firestore get");
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .context("Failed to reach Firestore")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response, "get"));
        }
        let body: Value = response.json().context("Failed to parse Firestore document")?;
        Ok(Some(decode_fields(&body)))
    }

    fn set(&self, path: &str, doc: &Document, merge: bool) -> Result<()> {
        debug!(path, merge, fields = doc.len(), "firestore set");
        let mut request = self.client.patch(self.url(path));
        if merge {
            let mask: Vec<(&str, String)> = doc
                .keys()
                .map(|k| ("updateMask.fieldPaths", field_path(k)))
                .collect();
            request = request.query(&mask);
        }
        let response = self
            .authorized(request)
            .json(&json!({ "fields": encode_fields(doc) }))
            .send()
            .context("Failed to reach Firestore")?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "write"));
        }
        Ok(())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let response = self
                .authorized(self.client.get(self.url(collection)).query(&query))
                .send()
                .context("Failed to reach Firestore")?;

            if !response.status().is_success() {
                return Err(Self::fail(response, "list"));
            }
            let body: Value = response.json().context("Failed to parse Firestore listing")?;

            if let Some(docs) = body.get("documents").and_then(|d| d.as_array()) {
                for doc in docs {
                    let id = doc
                        .get("name")
                        .and_then(|n| n.as_str())
                        .and_then(|n| n.rsplit('/').next())
                        .unwrap_or_default()
                        .to_string();
                    out.push((id, decode_fields(doc)));
                }
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        info!(collection, count = out.len(), "firestore list");
        Ok(out)
    }

    fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "firestore delete");
        let response = self
            .authorized(self.client.delete(self.url(path)))
            .send()
            .context("Failed to reach Firestore")?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Self::fail(response, "delete"));
        }
        Ok(())
    }
}

// --- Firestore value encoding ---

/// Top-level field name as a mask path. Names outside
/// `[A-Za-z_][A-Za-z0-9_]*` must be backtick-quoted.
fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn encode_fields(doc: &Document) -> Value {
    let fields: Map<String, Value> = doc
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    Value::Object(fields)
}

fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // Firestore carries int64 as a decimal string
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or_default() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn decode_fields(doc: &Value) -> Document {
    doc.get("fields")
        .and_then(|f| f.as_object())
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_value(value: &Value) -> Value {
    let Some((kind, inner)) = value.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "stringValue" | "booleanValue" | "doubleValue" | "timestampValue" | "referenceValue"
        | "bytesValue" => inner.clone(),
        "integerValue" => inner
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::from)
            .unwrap_or_else(|| inner.clone()),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(|v| v.as_array())
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(decode_fields(inner)),
        _ => Value::Null,
    }
}

// --- In-memory store for tests ---

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct MemoryStore {
        docs: RefCell<BTreeMap<String, Document>>,
        failing: Cell<bool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every following call fail, to exercise error paths.
        pub fn fail_all(&self, failing: bool) {
            self.failing.set(failing);
        }

        pub fn count(&self, collection: &str) -> usize {
            self.list(collection).map(|l| l.len()).unwrap_or(0)
        }

        fn check(&self) -> Result<()> {
            if self.failing.get() {
                return Err(anyhow!("simulated store outage"));
            }
            Ok(())
        }
    }

    impl DocumentStore for MemoryStore {
        fn get(&self, path: &str) -> Result<Option<Document>> {
            self.check()?;
            Ok(self.docs.borrow().get(path).cloned())
        }

        fn set(&self, path: &str, doc: &Document, merge: bool) -> Result<()> {
            self.check()?;
            let mut docs = self.docs.borrow_mut();
            let entry = docs.entry(path.to_string()).or_default();
            if !merge {
                entry.clear();
            }
            for (k, v) in doc {
                entry.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        fn list(&self, collection: &str) -> Result<Vec<(String, Document)>> {
            self.check()?;
            let prefix = format!("{}/", collection);
            Ok(self
                .docs
                .borrow()
                .iter()
                .filter_map(|(path, doc)| {
                    let id = path.strip_prefix(&prefix)?;
                    (!id.contains('/')).then(|| (id.to_string(), doc.clone()))
                })
                .collect())
        }

        fn delete(&self, path: &str) -> Result<()> {
            self.check()?;
            self.docs.borrow_mut().remove(path);
            Ok(())
        }
    }
}
