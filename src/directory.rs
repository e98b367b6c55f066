use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde_json::Value;
use std::cmp::Ordering;
use tracing::{error, info, warn};

use crate::cloud::{self, Document, DocumentStore};
use crate::local_store::{LocalStore, CONTACTS_PREFIX};
use crate::models::{Contact, NewContact};

pub const DEFAULT_STATUS: &str = "Not Contacted";
const LOAD_ERROR: &str = "Failed to load contacts. Please try again.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub contacts: Vec<Contact>,
    pub error: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClearOutcome {
    Cancelled,
    Cleared(usize),
}

/// Local storage key for a user's contact list.
///
/// Only the first '@' and the first '.' are replaced; keys already written
/// by the web client follow that shape.
pub fn contacts_key(email: &str) -> String {
    format!(
        "{}{}",
        CONTACTS_PREFIX,
        email.replacen('@', "_", 1).replacen('.', "_", 1)
    )
}

pub fn today_stamp() -> String {
    chrono::Local::now().format("%m/%d/%Y").to_string()
}

/// Email or LinkedIn URL match, comparing only non-empty values.
pub fn is_duplicate(existing: &[Contact], candidate: &NewContact) -> bool {
    existing.iter().any(|c| {
        (!candidate.email.is_empty() && c.email == candidate.email)
            || (!candidate.linkedin_url.is_empty() && c.linkedin_url == candidate.linkedin_url)
    })
}

/// Splits a batch into accepted contacts and a skip count. Candidates are
/// checked against `existing` and against those accepted earlier in the
/// same batch.
pub fn merge_contacts(
    existing: &[Contact],
    batch: Vec<NewContact>,
    today: &str,
) -> (Vec<Contact>, MergeStats) {
    let mut seen: Vec<Contact> = existing.to_vec();
    let mut added = Vec::new();
    let mut stats = MergeStats::default();

    for candidate in batch {
        if is_duplicate(&seen, &candidate) {
            stats.skipped += 1;
            continue;
        }
        let contact = candidate.into_contact(uuid::Uuid::new_v4().to_string(), today, DEFAULT_STATUS);
        seen.push(contact.clone());
        added.push(contact);
        stats.created += 1;
    }

    (added, stats)
}

fn parse_contact_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

/// Newest first contact date first; undated contacts sink to the end.
pub fn sort_newest_first(contacts: &mut [Contact]) {
    contacts.sort_by(|a, b| {
        match (
            parse_contact_date(&a.first_contact_date),
            parse_contact_date(&b.first_contact_date),
        ) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => b.first_contact_date.cmp(&a.first_contact_date),
        }
    });
}

// --- Backends ---

/// Persistence for one user's directory. `all` is always the full list
/// after the change so whole-list backends can rewrite it, while
/// per-document backends use the delta.
pub trait ContactBackend {
    fn label(&self) -> &'static str;
    fn fetch(&self) -> Result<Vec<Contact>>;
    fn save_added(&self, all: &[Contact], added: &[Contact]) -> Result<()>;
    fn save_updated(&self, all: &[Contact], updated: &Contact) -> Result<()>;
    fn save_removed(&self, all: &[Contact], removed_id: &str) -> Result<()>;
    fn clear(&self) -> Result<usize>;
}

pub struct LocalContacts<'a> {
    store: &'a LocalStore,
    key: String,
}

impl<'a> LocalContacts<'a> {
    pub fn new(store: &'a LocalStore, email: &str) -> Self {
        Self {
            store,
            key: contacts_key(email),
        }
    }

    fn write(&self, all: &[Contact]) -> Result<()> {
        self.store.write_json(&self.key, all)
    }
}

impl ContactBackend for LocalContacts<'_> {
    fn label(&self) -> &'static str {
        "local"
    }

    fn fetch(&self) -> Result<Vec<Contact>> {
        self.store.read_json_list(&self.key)
    }

    fn save_added(&self, all: &[Contact], _added: &[Contact]) -> Result<()> {
        self.write(all)
    }

    fn save_updated(&self, all: &[Contact], _updated: &Contact) -> Result<()> {
        self.write(all)
    }

    fn save_removed(&self, all: &[Contact], _removed_id: &str) -> Result<()> {
        self.write(all)
    }

    fn clear(&self) -> Result<usize> {
        let count = self.fetch()?.len();
        self.store.remove(&self.key)?;
        Ok(count)
    }
}

pub struct CloudContacts<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
}

impl<'a> CloudContacts<'a> {
    pub fn new(store: &'a dyn DocumentStore, uid: &str) -> Self {
        Self {
            store,
            collection: cloud::contacts_collection(uid),
        }
    }

    fn doc_path(&self, id: &str) -> String {
        format!("{}/{}", self.collection, id)
    }

    fn put(&self, contact: &Contact, stamp_field: &str, merge: bool) -> Result<()> {
        let mut doc = contact_document(contact)?;
        doc.insert(
            stamp_field.to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        self.store.set(&self.doc_path(&contact.id), &doc, merge)
    }
}

fn contact_document(contact: &Contact) -> Result<Document> {
    let mut value = serde_json::to_value(contact).context("Failed to encode contact")?;
    let Some(doc) = value.as_object_mut() else {
        return Err(anyhow!("Contact did not encode to an object"));
    };
    // the document id carries it
    doc.remove("id");
    Ok(std::mem::take(doc))
}

impl ContactBackend for CloudContacts<'_> {
    fn label(&self) -> &'static str {
        "cloud"
    }

    fn fetch(&self) -> Result<Vec<Contact>> {
        let docs = self.store.list(&self.collection)?;
        let mut contacts = Vec::with_capacity(docs.len());
        for (id, doc) in docs {
            match serde_json::from_value::<Contact>(Value::Object(doc)) {
                Ok(mut contact) => {
                    contact.id = id;
                    contacts.push(contact);
                }
                Err(e) => warn!(id = %id, error = %e, "skipping malformed contact document"),
            }
        }
        sort_newest_first(&mut contacts);
        Ok(contacts)
    }

    fn save_added(&self, _all: &[Contact], added: &[Contact]) -> Result<()> {
        for contact in added {
            self.put(contact, "createdAt", false)?;
        }
        Ok(())
    }

    fn save_updated(&self, _all: &[Contact], updated: &Contact) -> Result<()> {
        self.put(updated, "updatedAt", true)
    }

    fn save_removed(&self, _all: &[Contact], removed_id: &str) -> Result<()> {
        self.store.delete(&self.doc_path(removed_id))
    }

    fn clear(&self) -> Result<usize> {
        let docs = self.store.list(&self.collection)?;
        for (id, _) in &docs {
            self.store.delete(&self.doc_path(id))?;
        }
        info!(count = docs.len(), collection = %self.collection, "cleared cloud contacts");
        Ok(docs.len())
    }
}

// --- Directory ---

pub struct ContactDirectory<'a> {
    backend: Box<dyn ContactBackend + 'a>,
}

impl<'a> ContactDirectory<'a> {
    pub fn new(backend: Box<dyn ContactBackend + 'a>) -> Self {
        Self { backend }
    }

    pub fn local(store: &'a LocalStore, email: &str) -> Self {
        Self::new(Box::new(LocalContacts::new(store, email)))
    }

    pub fn cloud(store: &'a dyn DocumentStore, uid: &str) -> Self {
        Self::new(Box::new(CloudContacts::new(store, uid)))
    }

    pub fn backend_label(&self) -> &'static str {
        self.backend.label()
    }

    /// Never fails: a backend error leaves an empty list and an error message.
    pub fn load(&self) -> LoadOutcome {
        match self.backend.fetch() {
            Ok(contacts) => {
                info!(backend = self.backend.label(), count = contacts.len(), "loaded contacts");
                LoadOutcome { contacts, error: None }
            }
            Err(e) => {
                error!(backend = self.backend.label(), error = %e, "failed to load contacts");
                LoadOutcome {
                    contacts: Vec::new(),
                    error: Some(LOAD_ERROR.to_string()),
                }
            }
        }
    }

    pub fn merge(&self, batch: Vec<NewContact>) -> Result<MergeStats> {
        let mut all = self.backend.fetch().context("Failed to read existing contacts")?;
        let (added, stats) = merge_contacts(&all, batch, &today_stamp());

        if !added.is_empty() {
            all.extend(added.iter().cloned());
            self.backend
                .save_added(&all, &added)
                .context("Failed to save contacts")?;
        }

        info!(
            backend = self.backend.label(),
            created = stats.created,
            skipped = stats.skipped,
            "merged contacts"
        );
        Ok(stats)
    }

    pub fn set_status(&self, id: &str, status: &str) -> Result<Contact> {
        let mut all = self.backend.fetch()?;
        let contact = all
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow!("Contact '{}' not found", id))?;
        contact.status = status.to_string();
        contact.last_contact_date = today_stamp();
        let updated = contact.clone();

        self.backend.save_updated(&all, &updated)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut all = self.backend.fetch()?;
        let before = all.len();
        all.retain(|c| c.id != id);
        if all.len() == before {
            return Err(anyhow!("Contact '{}' not found", id));
        }
        self.backend.save_removed(&all, id)
    }

    /// Deletes every contact once `confirm` agrees.
    pub fn clear_all(&self, confirm: impl FnOnce() -> bool) -> Result<ClearOutcome> {
        if !confirm() {
            return Ok(ClearOutcome::Cancelled);
        }
        let removed = self.backend.clear().context("Failed to clear contacts")?;
        Ok(ClearOutcome::Cleared(removed))
    }
}
