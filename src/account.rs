use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::cloud::{self, Document, DocumentStore};
use crate::local_store::{LocalStore, USER_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Starter, // legacy plan, still found on older accounts
    Pro,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPlan {
    pub label: &'static str,
    pub contacts_per_search: u32,
    pub initial_credits: u32,
    pub monthly_email_limit: u32,
    pub endpoint: &'static str,
}

impl Tier {
    pub fn plan(self) -> TierPlan {
        match self {
            Tier::Free => TierPlan {
                label: "Free",
                contacts_per_search: 8,
                initial_credits: 120,
                monthly_email_limit: 8,
                endpoint: "/free-run",
            },
            Tier::Starter => TierPlan {
                label: "Starter",
                contacts_per_search: 6,
                initial_credits: 840,
                monthly_email_limit: 56,
                endpoint: "/advanced-run",
            },
            Tier::Pro => TierPlan {
                label: "Pro",
                contacts_per_search: 56,
                initial_credits: 840,
                monthly_email_limit: 56,
                endpoint: "/pro-run",
            },
        }
    }

    pub fn is_paid(self) -> bool {
        self != Tier::Free
    }
}

pub fn current_month_key() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}

/// Identity handed over by the sign-in provider.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub credits: u32,
    #[serde(default)]
    pub max_credits: u32,
    #[serde(default)]
    pub emails_used_this_month: u32,
    #[serde(default)]
    pub emails_month_key: String, // YYYY-MM
    #[serde(default)]
    pub needs_onboarding: bool,
    // kept in the local mirror only, never written to the cloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl UserProfile {
    pub fn new(identity: &Identity, tier: Tier, credits: u32, needs_onboarding: bool) -> Self {
        Self {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
            picture: identity.picture.clone(),
            tier,
            credits,
            max_credits: credits,
            emails_used_this_month: 0,
            emails_month_key: current_month_key(),
            needs_onboarding,
            access_token: identity.id_token.clone(),
        }
    }

    /// Monthly email usage as of `month_key`; a counter stamped with an
    /// older month counts as zero.
    pub fn effective_emails_used(&self, month_key: &str) -> u32 {
        if self.emails_month_key == month_key {
            self.emails_used_this_month
        } else {
            0
        }
    }

    /// Grants the tier's starting allocation.
    pub fn grant_tier_defaults(&mut self) {
        let initial = self.tier.plan().initial_credits;
        self.credits = initial;
        self.max_credits = initial;
        self.emails_used_this_month = 0;
        self.emails_month_key = current_month_key();
        self.needs_onboarding = false;
    }

    pub fn cloud_document(&self) -> Result<Document> {
        let mut value = serde_json::to_value(self).context("Failed to encode user")?;
        let doc = value
            .as_object_mut()
            .ok_or_else(|| anyhow!("User did not encode to an object"))?;
        doc.remove("accessToken");
        Ok(std::mem::take(doc))
    }
}

/// Partial view of `users/{uid}`; anything missing falls back to the
/// tier defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUser {
    tier: Option<Tier>,
    credits: Option<u32>,
    max_credits: Option<u32>,
    emails_used_this_month: Option<u32>,
    emails_month_key: Option<String>,
}

fn from_cloud(identity: &Identity, doc: Document) -> UserProfile {
    let stored: StoredUser = serde_json::from_value(Value::Object(doc)).unwrap_or_else(|e| {
        warn!(uid = %identity.uid, error = %e, "user document has unexpected shape");
        StoredUser::default()
    });
    let tier = stored.tier.unwrap_or_default();
    let initial = tier.plan().initial_credits;

    UserProfile {
        uid: identity.uid.clone(),
        email: identity.email.clone(),
        name: identity.name.clone(),
        picture: identity.picture.clone(),
        tier,
        credits: stored.credits.unwrap_or(initial),
        max_credits: stored.max_credits.unwrap_or(initial),
        emails_used_this_month: stored.emails_used_this_month.unwrap_or(0),
        emails_month_key: stored.emails_month_key.unwrap_or_else(current_month_key),
        needs_onboarding: false,
        access_token: identity.id_token.clone(),
    }
}

/// Signs a user in. With a cloud store an existing `users/{uid}` document
/// is authoritative and a missing one marks the user for onboarding;
/// without one the user starts on the free allocation.
pub fn sign_in(
    local: &LocalStore,
    cloud: Option<&dyn DocumentStore>,
    identity: &Identity,
) -> Result<UserProfile> {
    if identity.uid.trim().is_empty() || identity.email.trim().is_empty() {
        return Err(anyhow!("Sign-in requires both a uid and an email"));
    }

    let user = match cloud {
        Some(store) => match store.get(&cloud::user_path(&identity.uid))? {
            Some(doc) => {
                info!(uid = %identity.uid, "existing user loaded");
                from_cloud(identity, doc)
            }
            None => {
                info!(uid = %identity.uid, "new user, onboarding required");
                UserProfile::new(identity, Tier::Free, 0, true)
            }
        },
        None => {
            // carry over the local balance when the same user signs in again
            match current_user(local)? {
                Some(mut existing) if existing.uid == identity.uid => {
                    existing.access_token = identity.id_token.clone();
                    existing
                }
                _ => UserProfile::new(
                    identity,
                    Tier::Free,
                    Tier::Free.plan().initial_credits,
                    false,
                ),
            }
        }
    };

    local.write_json(USER_KEY, &user)?;
    Ok(user)
}

pub fn sign_out(local: &LocalStore) -> Result<()> {
    local.remove(USER_KEY)
}

pub fn current_user(local: &LocalStore) -> Result<Option<UserProfile>> {
    local.read_json(USER_KEY)
}

/// Writes the user to the cloud document (when configured) and mirrors it
/// into local storage.
pub fn save_user(
    local: &LocalStore,
    cloud: Option<&dyn DocumentStore>,
    user: &UserProfile,
) -> Result<()> {
    if let Some(store) = cloud {
        store
            .set(&cloud::user_path(&user.uid), &user.cloud_document()?, true)
            .context("Failed to update user document")?;
    }
    local.write_json(USER_KEY, user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::memory::MemoryStore;
    use serde_json::json;

    fn identity() -> Identity {
        Identity {
            uid: "u1".to_string(),
            email: "ada@school.edu".to_string(),
            name: "Ada".to_string(),
            picture: None,
            id_token: Some("token".to_string()),
        }
    }

    #[test]
    fn test_tier_plans() {
        assert_eq!(Tier::Free.plan().contacts_per_search, 8);
        assert_eq!(Tier::Free.plan().initial_credits, 120);
        assert_eq!(Tier::Pro.plan().contacts_per_search, 56);
        assert_eq!(Tier::Pro.plan().monthly_email_limit, 56);
        assert_eq!(Tier::Pro.plan().endpoint, "/pro-run");
        assert!(!Tier::Free.is_paid());
        assert!(Tier::Starter.is_paid());
    }

    #[test]
    fn test_effective_emails_used_resets_on_new_month() {
        let mut user = UserProfile::new(&identity(), Tier::Pro, 840, false);
        user.emails_used_this_month = 40;
        user.emails_month_key = "2025-01".to_string();

        assert_eq!(user.effective_emails_used("2025-01"), 40);
        assert_eq!(user.effective_emails_used("2025-02"), 0);
    }

    #[test]
    fn test_sign_in_new_cloud_user_needs_onboarding() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();

        let user = sign_in(&local, Some(&cloud), &identity()).unwrap();
        assert!(user.needs_onboarding);
        assert_eq!(user.credits, 0);
        assert_eq!(current_user(&local).unwrap().unwrap().uid, "u1");
    }

    #[test]
    fn test_sign_in_existing_cloud_user_fills_missing_fields() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        let doc = json!({ "tier": "pro", "emailsUsedThisMonth": 12, "emailsMonthKey": "2025-03" });
        cloud
            .set("users/u1", doc.as_object().unwrap(), false)
            .unwrap();

        let user = sign_in(&local, Some(&cloud), &identity()).unwrap();
        assert_eq!(user.tier, Tier::Pro);
        assert_eq!(user.credits, 840);
        assert_eq!(user.emails_used_this_month, 12);
        assert!(!user.needs_onboarding);
    }

    #[test]
    fn test_zero_credits_stay_zero() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        let doc = json!({ "tier": "free", "credits": 0, "maxCredits": 120 });
        cloud
            .set("users/u1", doc.as_object().unwrap(), false)
            .unwrap();

        let user = sign_in(&local, Some(&cloud), &identity()).unwrap();
        assert_eq!(user.credits, 0);
    }

    #[test]
    fn test_save_user_keeps_token_out_of_cloud() {
        let local = LocalStore::open_in_memory().unwrap();
        let cloud = MemoryStore::new();
        let mut user = UserProfile::new(&identity(), Tier::Free, 120, false);
        user.credits = 60;

        save_user(&local, Some(&cloud), &user).unwrap();
        let doc = cloud.get("users/u1").unwrap().unwrap();
        assert_eq!(doc["credits"], json!(60));
        assert!(!doc.contains_key("accessToken"));

        let mirrored = current_user(&local).unwrap().unwrap();
        assert_eq!(mirrored.access_token.as_deref(), Some("token"));
    }

    #[test]
    fn test_local_sign_in_keeps_balance_for_same_user() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut user = sign_in(&local, None, &identity()).unwrap();
        assert_eq!(user.credits, 120);

        user.credits = 15;
        save_user(&local, None, &user).unwrap();
        let again = sign_in(&local, None, &identity()).unwrap();
        assert_eq!(again.credits, 15);

        sign_out(&local).unwrap();
        assert!(current_user(&local).unwrap().is_none());
    }

    #[test]
    fn test_sign_in_requires_uid_and_email() {
        let local = LocalStore::open_in_memory().unwrap();
        let mut id = identity();
        id.email.clear();
        assert!(sign_in(&local, None, &id).is_err());
    }
}
