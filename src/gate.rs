use thiserror::Error;

use crate::account::{Tier, UserProfile};

pub const CREDITS_PER_CONTACT: u32 = 15;

/// Reasons a search is refused before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("Not enough credits. You need {required} credits for this run (you have {available}).")]
    InsufficientCredits { required: u32, available: u32 },

    #[error("Monthly email limit reached ({used}/{limit}). You have {remaining} emails left this month.")]
    MonthlyLimitReached { used: u32, limit: u32, remaining: u32 },

    #[error("Please upload a resume (PDF) for {0} tier search.")]
    ResumeRequired(&'static str),
}

/// What an approved search will cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub tier: Tier,
    pub contacts: u32,
    pub credits: u32,
    pub emails: u32,
}

pub fn check(
    user: &UserProfile,
    tier: Tier,
    has_resume: bool,
    month_key: &str,
) -> Result<Charge, GateError> {
    let plan = tier.plan();
    let contacts = plan.contacts_per_search;
    let required = contacts * CREDITS_PER_CONTACT;

    if user.credits < required {
        return Err(GateError::InsufficientCredits {
            required,
            available: user.credits,
        });
    }

    if tier.is_paid() {
        let limit = user.tier.plan().monthly_email_limit;
        let used = user.effective_emails_used(month_key);
        if used + contacts > limit {
            return Err(GateError::MonthlyLimitReached {
                used,
                limit,
                remaining: limit.saturating_sub(used),
            });
        }
    }

    if tier == Tier::Pro && !has_resume {
        return Err(GateError::ResumeRequired(plan.label));
    }

    Ok(Charge {
        tier,
        contacts,
        credits: required,
        emails: if tier.is_paid() { contacts } else { 0 },
    })
}

/// Debits a completed search and rolls the monthly counter over when the
/// stored month is stale.
pub fn apply(user: &mut UserProfile, charge: &Charge, month_key: &str) {
    user.credits = user.credits.saturating_sub(charge.credits);
    user.emails_used_this_month = user.effective_emails_used(month_key) + charge.emails;
    user.emails_month_key = month_key.to_string();
}
