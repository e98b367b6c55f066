use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::{error, info};

use crate::cloud::{self, DocumentStore};
use crate::directory::{ContactDirectory, MergeStats};
use crate::local_store::{self, LocalStore, CONTACTS_PREFIX, PROFESSIONAL_INFO_KEY, RESUME_DATA_KEY};
use crate::models::NewContact;

pub fn marker_key(uid: &str) -> String {
    format!("firebase_migration_{}", uid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Absent,
    Copied,
    Failed,
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub skipped: bool,
    pub professional_info: Option<StepResult>,
    pub resume_data: Option<StepResult>,
    pub contact_keys: usize,
    pub failed_keys: Vec<String>,
    pub contacts: MergeStats,
}

/// One-time copy of this machine's local data into the user's cloud
/// documents. Every step is attempted even when an earlier one fails, and
/// the marker is written at the end either way.
pub fn migrate(local: &LocalStore, cloud: &dyn DocumentStore, uid: &str) -> Result<MigrationReport> {
    let marker = marker_key(uid);
    if local.contains(&marker)? {
        return Ok(MigrationReport {
            skipped: true,
            ..Default::default()
        });
    }

    info!(uid, "starting local data migration");
    let mut report = MigrationReport {
        professional_info: Some(copy_document(
            local,
            cloud,
            PROFESSIONAL_INFO_KEY,
            &cloud::professional_info_path(uid),
        )),
        resume_data: Some(copy_document(
            local,
            cloud,
            RESUME_DATA_KEY,
            &cloud::resume_path(uid),
        )),
        ..Default::default()
    };

    let directory = ContactDirectory::cloud(cloud, uid);
    for key in local.keys_with_prefix(CONTACTS_PREFIX)? {
        match migrate_contacts(local, &directory, &key) {
            Ok(Some(stats)) => {
                info!(key = %key, created = stats.created, skipped = stats.skipped, "migrated contacts");
                report.contact_keys += 1;
                report.contacts.created += stats.created;
                report.contacts.skipped += stats.skipped;
            }
            Ok(None) => {}
            Err(e) => {
                error!(key = %key, error = %e, "failed to migrate contacts");
                report.failed_keys.push(key);
            }
        }
    }

    local.set(&marker, "true")?;
    info!(uid, created = report.contacts.created, "migration finished");
    Ok(report)
}

fn copy_document(local: &LocalStore, cloud: &dyn DocumentStore, key: &str, path: &str) -> StepResult {
    let raw = match local.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return StepResult::Absent,
        Err(e) => {
            error!(key, error = %e, "failed to read local value");
            return StepResult::Failed;
        }
    };

    let result = serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("'{}' is not valid JSON", key))
        .and_then(|value| match value {
            Value::Object(mut doc) => {
                doc.insert(
                    "updatedAt".to_string(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
                cloud.set(path, &doc, true)
            }
            _ => Err(anyhow!("'{}' is not a JSON object", key)),
        });

    match result {
        Ok(()) => {
            info!(key, path, "migrated document");
            StepResult::Copied
        }
        Err(e) => {
            error!(key, error = %e, "failed to migrate document");
            StepResult::Failed
        }
    }
}

/// `None` when the key holds nothing worth copying.
fn migrate_contacts(
    local: &LocalStore,
    directory: &ContactDirectory,
    key: &str,
) -> Result<Option<MergeStats>> {
    let Some(raw) = local.get(key)? else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("'{}' is not valid JSON", key))?;
    let batch: Vec<NewContact> = local_store::decode_list(key, value)?;
    if batch.is_empty() {
        return Ok(None);
    }
    directory.merge(batch).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryStore;
    use serde_json::json;

    fn seed(local: &LocalStore) {
        local
            .set(PROFESSIONAL_INFO_KEY, r#"{"firstName":"Ada","university":"UCL"}"#)
            .unwrap();
        local
            .set(RESUME_DATA_KEY, r#"{"name":"Ada Lovelace","major":"Math"}"#)
            .unwrap();
        local
            .set(
                "contacts_ada_school.edu",
                r#"[
                    {"firstName":"Sam","email":"sam@x.com","status":"Contacted"},
                    {"FirstName":"Kim","LinkedIn":"https://linkedin.com/in/kim"},
                    {"firstName":"Dup","email":"sam@x.com"}
                ]"#,
            )
            .unwrap();
        local.set("contacts_other_x_com", "[]").unwrap();
    }

    #[test]
    fn test_migrate_copies_everything_once() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        seed(&local);

        let report = migrate(&local, &cloud, "u1").unwrap();
        assert!(!report.skipped);
        assert_eq!(report.professional_info, Some(StepResult::Copied));
        assert_eq!(report.resume_data, Some(StepResult::Copied));
        assert_eq!(report.contact_keys, 1);
        assert_eq!(report.contacts, MergeStats { created: 2, skipped: 1 });
        assert_eq!(cloud.count("users/u1/contacts"), 2);

        let professional = cloud.get("users/u1/profile/professional").unwrap().unwrap();
        assert_eq!(professional["university"], json!("UCL"));
        assert!(professional.contains_key("updatedAt"));
        assert_eq!(local.get(&marker_key("u1")).unwrap().as_deref(), Some("true"));

        let again = migrate(&local, &cloud, "u1").unwrap();
        assert!(again.skipped);
        assert_eq!(cloud.count("users/u1/contacts"), 2);
    }

    #[test]
    fn test_rerun_without_marker_does_not_grow_contacts() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        seed(&local);

        migrate(&local, &cloud, "u1").unwrap();
        local.remove(&marker_key("u1")).unwrap();

        let report = migrate(&local, &cloud, "u1").unwrap();
        assert_eq!(report.contacts, MergeStats { created: 0, skipped: 3 });
        assert_eq!(cloud.count("users/u1/contacts"), 2);
    }

    #[test]
    fn test_partial_failure_still_sets_marker() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        local.set(PROFESSIONAL_INFO_KEY, "{broken").unwrap();
        local.set(RESUME_DATA_KEY, r#""just a string""#).unwrap();
        local.set("contacts_a_b_com", "not a list").unwrap();
        local
            .set("contacts_c_d_com", r#"[{"email":"ok@x.com"}]"#)
            .unwrap();

        let report = migrate(&local, &cloud, "u1").unwrap();
        assert_eq!(report.professional_info, Some(StepResult::Failed));
        assert_eq!(report.resume_data, Some(StepResult::Failed));
        assert_eq!(report.failed_keys, vec!["contacts_a_b_com".to_string()]);
        assert_eq!(report.contacts.created, 1);
        assert!(local.contains(&marker_key("u1")).unwrap());
    }

    #[test]
    fn test_null_fields_and_odd_rows_still_migrate() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        local
            .set(
                "contacts_a_b_com",
                r#"[
                    {"email":"sam@x.com","company":null},
                    {"email":null,"linkedinUrl":"https://l/kim","FirstName":null},
                    42,
                    {"email":["bad"]}
                ]"#,
            )
            .unwrap();

        let report = migrate(&local, &cloud, "u1").unwrap();
        assert!(report.failed_keys.is_empty());
        assert_eq!(report.contact_keys, 1);
        assert_eq!(report.contacts, MergeStats { created: 2, skipped: 0 });
        assert_eq!(cloud.count("users/u1/contacts"), 2);

        let kim = cloud
            .list("users/u1/contacts")
            .unwrap()
            .into_iter()
            .find(|(_, doc)| doc["linkedinUrl"] == json!("https://l/kim"))
            .map(|(_, doc)| doc)
            .unwrap();
        assert_eq!(kim["email"], json!(""));
        assert_eq!(kim["firstName"], json!(""));
    }

    #[test]
    fn test_cloud_outage_is_contained() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        seed(&local);
        cloud.fail_all(true);

        let report = migrate(&local, &cloud, "u1").unwrap();
        assert_eq!(report.professional_info, Some(StepResult::Failed));
        assert_eq!(report.failed_keys.len(), 1);
        assert!(local.contains(&marker_key("u1")).unwrap());
    }

    #[test]
    fn test_nothing_local_reports_absent() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();

        let report = migrate(&local, &cloud, "u9").unwrap();
        assert_eq!(report.professional_info, Some(StepResult::Absent));
        assert_eq!(report.contact_keys, 0);
    }
}
