use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::account::{self, UserProfile};
use crate::cloud::{self, DocumentStore};
use crate::local_store::{LocalStore, ONBOARDING_DATA_KEY, ONBOARDING_PROFILE_KEY, RESUME_DATA_KEY};
use crate::models::ResumeData;

const SECTIONS: u32 = 5;

/// Profile collected across the onboarding pages. Every field is optional
/// so a page can submit just what it asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graduation_month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graduation_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_of_study: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_parsed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onboarding_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn filled(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn any(list: &Option<Vec<String>>) -> bool {
    list.as_ref().is_some_and(|l| !l.is_empty())
}

macro_rules! take_some {
    ($dst:expr, $src:expr, $($field:ident),+) => {
        $( if $src.$field.is_some() { $dst.$field = $src.$field; } )+
    };
}

impl OnboardingProfile {
    /// Overwrites the fields `partial` carries and keeps the rest.
    pub fn merge(&mut self, partial: OnboardingProfile) {
        take_some!(
            self,
            partial,
            first_name,
            last_name,
            university,
            graduation_month,
            graduation_year,
            field_of_study,
            degree_type,
            industries,
            job_role,
            locations,
            job_types,
            resume_parsed,
            onboarding_complete,
            created_at,
            updated_at
        );
    }

    pub fn is_complete(&self) -> bool {
        filled(&self.first_name)
            && filled(&self.last_name)
            && filled(&self.field_of_study)
            && filled(&self.degree_type)
            && (any(&self.locations) || any(&self.job_types) || any(&self.industries))
    }

    fn sections(&self) -> [(&'static str, bool); SECTIONS as usize] {
        [
            ("name", filled(&self.first_name) && filled(&self.last_name)),
            ("university", filled(&self.university)),
            ("field of study and degree", filled(&self.field_of_study) && filled(&self.degree_type)),
            ("industries and role", any(&self.industries) && filled(&self.job_role)),
            ("locations or job types", any(&self.locations) || any(&self.job_types)),
        ]
    }

    /// Percentage of the five profile sections filled in.
    pub fn progress(&self) -> u32 {
        let done = self.sections().iter().filter(|(_, ok)| *ok).count() as f64;
        (done / SECTIONS as f64 * 100.0).round() as u32
    }

    pub fn missing_sections(&self) -> Vec<&'static str> {
        self.sections()
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }
}

pub fn load_draft(local: &LocalStore) -> Result<OnboardingProfile> {
    Ok(local.read_json(ONBOARDING_DATA_KEY)?.unwrap_or_default())
}

/// Merges one page's answers into the saved draft.
pub fn update_draft(local: &LocalStore, partial: OnboardingProfile) -> Result<OnboardingProfile> {
    let mut draft = load_draft(local)?;
    draft.merge(partial);
    local.write_json(ONBOARDING_DATA_KEY, &draft)?;
    Ok(draft)
}

pub fn load_profile(local: &LocalStore) -> Result<OnboardingProfile> {
    Ok(local.read_json(ONBOARDING_PROFILE_KEY)?.unwrap_or_default())
}

pub fn clear(local: &LocalStore) -> Result<()> {
    local.remove(ONBOARDING_DATA_KEY)?;
    local.remove(ONBOARDING_PROFILE_KEY)
}

/// Completes onboarding: the draft is folded into the saved profile,
/// mirrored to `profiles/{uid}`, and a user still waiting on onboarding
/// receives the free allocation.
pub fn finish(
    local: &LocalStore,
    cloud: Option<&dyn DocumentStore>,
    user: &mut UserProfile,
) -> Result<OnboardingProfile> {
    let mut profile = load_profile(local)?;
    profile.merge(load_draft(local)?);

    if !profile.is_complete() {
        return Err(anyhow!(
            "Profile is {}% complete. Still missing: {}",
            profile.progress(),
            profile.missing_sections().join(", ")
        ));
    }

    let now = chrono::Utc::now().to_rfc3339();
    if profile.created_at.is_none() {
        profile.created_at = Some(now.clone());
    }
    profile.updated_at = Some(now);
    profile.onboarding_complete = Some(true);

    local.write_json(ONBOARDING_PROFILE_KEY, &profile)?;
    local.remove(ONBOARDING_DATA_KEY)?;

    if let Some(store) = cloud {
        let value = serde_json::to_value(&profile).context("Failed to encode onboarding profile")?;
        let Value::Object(doc) = value else {
            return Err(anyhow!("Onboarding profile did not encode to an object"));
        };
        store
            .set(&cloud::onboarding_profile_path(&user.uid), &doc, true)
            .context("Failed to save onboarding profile")?;
    }

    if user.needs_onboarding {
        user.grant_tier_defaults();
        account::save_user(local, cloud, user)?;
        info!(uid = %user.uid, credits = user.credits, "onboarding complete, credits granted");
    }

    Ok(profile)
}

/// Whether the user has passed onboarding, judged from the cloud profile
/// when there is one.
pub fn is_onboarded(
    local: &LocalStore,
    cloud: Option<&dyn DocumentStore>,
    uid: &str,
) -> Result<bool> {
    let profile = match cloud {
        Some(store) => match store.get(&cloud::onboarding_profile_path(uid))? {
            Some(doc) => serde_json::from_value(Value::Object(doc)).unwrap_or_default(),
            None => OnboardingProfile::default(),
        },
        None => load_profile(local)?,
    };
    Ok(profile.onboarding_complete == Some(true) || profile.is_complete())
}

// --- Parsed resume ---

pub fn load_resume(local: &LocalStore) -> Result<Option<ResumeData>> {
    local.read_json(RESUME_DATA_KEY)
}

/// Stores a parsed resume and pre-fills the onboarding draft from it.
pub fn store_resume(
    local: &LocalStore,
    cloud: Option<(&dyn DocumentStore, &str)>,
    resume: &ResumeData,
) -> Result<()> {
    local.write_json(RESUME_DATA_KEY, resume)?;

    if let Some((store, uid)) = cloud {
        let value = serde_json::to_value(resume).context("Failed to encode resume")?;
        if let Value::Object(mut doc) = value {
            doc.insert(
                "updatedAt".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
            store
                .set(&cloud::resume_path(uid), &doc, true)
                .context("Failed to save resume")?;
        }
    }

    let seed = OnboardingProfile {
        graduation_year: Some(resume.year.clone()).filter(|s| !s.is_empty()),
        field_of_study: Some(resume.major.clone()).filter(|s| !s.is_empty()),
        university: Some(resume.university.clone()).filter(|s| !s.is_empty()),
        resume_parsed: Some(true),
        ..Default::default()
    };
    update_draft(local, seed)?;
    Ok(())
}

pub fn clear_resume(local: &LocalStore) -> Result<()> {
    local.remove(RESUME_DATA_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Identity, Tier};
    use crate::cloud::memory::MemoryStore;
    use serde_json::json;

    fn strings(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    fn complete() -> OnboardingProfile {
        OnboardingProfile {
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            field_of_study: Some("Mathematics".to_string()),
            degree_type: Some("Bachelor's".to_string()),
            locations: strings(&["New York"]),
            ..Default::default()
        }
    }

    fn new_user() -> UserProfile {
        let identity = Identity {
            uid: "u1".to_string(),
            email: "ada@school.edu".to_string(),
            ..Default::default()
        };
        UserProfile::new(&identity, Tier::Free, 0, true)
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut profile = OnboardingProfile {
            first_name: Some("Ada".to_string()),
            university: Some("UCL".to_string()),
            ..Default::default()
        };
        profile.merge(OnboardingProfile {
            university: Some("Cambridge".to_string()),
            industries: strings(&["Finance"]),
            ..Default::default()
        });

        assert_eq!(profile.first_name.as_deref(), Some("Ada"));
        assert_eq!(profile.university.as_deref(), Some("Cambridge"));
        assert_eq!(profile.industries, strings(&["Finance"]));
    }

    #[test]
    fn test_is_complete_needs_one_preference_list() {
        let mut profile = complete();
        assert!(profile.is_complete());

        profile.locations = Some(Vec::new());
        assert!(!profile.is_complete());

        profile.job_types = strings(&["Internship"]);
        assert!(profile.is_complete());

        profile.degree_type = Some("  ".to_string());
        assert!(!profile.is_complete());
    }

    #[test]
    fn test_progress_by_section() {
        assert_eq!(OnboardingProfile::default().progress(), 0);

        let profile = complete();
        // name, field+degree, locations
        assert_eq!(profile.progress(), 60);
        assert_eq!(
            profile.missing_sections(),
            vec!["university", "industries and role"]
        );

        let mut full = profile;
        full.university = Some("UCL".to_string());
        full.industries = strings(&["Tech"]);
        full.job_role = Some("Analyst".to_string());
        assert_eq!(full.progress(), 100);
    }

    #[test]
    fn test_draft_survives_corrupt_json() {
        let local = LocalStore::open_in_memory().unwrap();
        local.set(ONBOARDING_DATA_KEY, "{oops").unwrap();

        let draft = update_draft(
            &local,
            OnboardingProfile {
                first_name: Some("Ada".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(draft.first_name.as_deref(), Some("Ada"));
        assert_eq!(load_draft(&local).unwrap(), draft);
    }

    #[test]
    fn test_finish_rejects_incomplete_profile() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut user = new_user();
        update_draft(
            &local,
            OnboardingProfile {
                first_name: Some("Ada".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let err = finish(&local, None, &mut user).unwrap_err();
        assert!(err.to_string().contains("0% complete"));
        assert_eq!(user.credits, 0);
    }

    #[test]
    fn test_finish_syncs_profile_and_grants_credits() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        let mut user = new_user();
        update_draft(&local, complete()).unwrap();

        let profile = finish(&local, Some(&cloud), &mut user).unwrap();
        assert_eq!(profile.onboarding_complete, Some(true));
        assert!(profile.created_at.is_some());
        assert!(!local.contains(ONBOARDING_DATA_KEY).unwrap());

        let doc = cloud.get("profiles/u1").unwrap().unwrap();
        assert_eq!(doc["onboardingComplete"], json!(true));
        assert_eq!(doc["locations"], json!(["New York"]));

        assert!(!user.needs_onboarding);
        assert_eq!(user.credits, 120);
        let stored = cloud.get("users/u1").unwrap().unwrap();
        assert_eq!(stored["credits"], json!(120));

        assert!(is_onboarded(&local, Some(&cloud), "u1").unwrap());
        assert!(!is_onboarded(&local, Some(&cloud), "someone-else").unwrap());
    }

    #[test]
    fn test_finish_does_not_regrant_credits() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut user = new_user();
        user.needs_onboarding = false;
        user.credits = 15;
        update_draft(&local, complete()).unwrap();

        finish(&local, None, &mut user).unwrap();
        assert_eq!(user.credits, 15);
        assert!(is_onboarded(&local, None, "u1").unwrap());
    }

    #[test]
    fn test_invalid_resume_json_recovers_empty() {
        let local = LocalStore::open_in_memory().unwrap();
        local.set(RESUME_DATA_KEY, "not json at all").unwrap();

        assert_eq!(load_resume(&local).unwrap(), None);
        assert!(!local.contains(RESUME_DATA_KEY).unwrap());
    }

    #[test]
    fn test_store_resume_seeds_draft_and_cloud() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        let resume = ResumeData {
            name: "Ada Lovelace".to_string(),
            year: "2026".to_string(),
            major: "Mathematics".to_string(),
            ..Default::default()
        };

        let store: &dyn DocumentStore = &cloud;
        store_resume(&local, Some((store, "u1")), &resume).unwrap();
        assert_eq!(load_resume(&local).unwrap(), Some(resume));

        let draft = load_draft(&local).unwrap();
        assert_eq!(draft.graduation_year.as_deref(), Some("2026"));
        assert_eq!(draft.field_of_study.as_deref(), Some("Mathematics"));
        assert_eq!(draft.university, None);
        assert_eq!(draft.resume_parsed, Some(true));

        let doc = cloud.get("users/u1/profile/resume").unwrap().unwrap();
        assert_eq!(doc["major"], json!("Mathematics"));
        assert!(doc.contains_key("updatedAt"));

        clear_resume(&local).unwrap();
        assert_eq!(load_resume(&local).unwrap(), None);
    }
}
