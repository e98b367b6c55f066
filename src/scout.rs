use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const GREETING: &str = "Hi! I'm Scout. I'll help you find the perfect job title to search for. \
                            What company are you interested in?";
const ASK_JOB_TYPE: &str = "Perfect! What type of role are you looking for? \
                            (e.g., engineering, product, marketing, sales, data, design, finance, operations)";
const ASK_LEVEL: &str = "Got it! What level are you targeting? (entry, mid, senior, manager)";
const PICK_PROMPT: &str = "Pick any suggestion above to use it in your search, or start over for different titles.";
const REFINE_PROMPT: &str = "Let me help you refine that search! \
                             What specific aspects of the role are you most interested in?";

const GENERIC_TITLES: [&str; 4] = [
    "Software Engineer",
    "Product Manager",
    "Marketing Manager",
    "Sales Manager",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Company,
    JobType,
    Level,
    Suggestions,
}

/// Where title suggestions come from at the end of the dialog.
pub trait SuggestionSource {
    fn suggest(&self, company: &str, job_type: &str, level: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuggestionRequest<'a> {
    company: &'a str,
    job_type: &'a str,
    level: &'a str,
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    suggestions: Vec<String>,
}

pub struct HttpSuggestions {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSuggestions {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl SuggestionSource for HttpSuggestions {
    fn suggest(&self, company: &str, job_type: &str, level: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(&self.url)
            .json(&SuggestionRequest {
                company,
                job_type,
                level,
            })
            .send()
            .context("Failed to reach suggestion service")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Suggestion service returned {}", status));
        }
        let body: SuggestionResponse = response
            .json()
            .context("Failed to parse suggestion response")?;
        Ok(body.suggestions)
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

pub fn classify_job_type(message: &str) -> &'static str {
    let text = message.to_lowercase();

    if contains_any(&text, &["engineer", "tech", "software", "developer"]) {
        "engineering"
    } else if contains_any(&text, &["product"]) {
        "product"
    } else if contains_any(&text, &["market"]) {
        "marketing"
    } else if contains_any(&text, &["sales", "business dev"]) {
        "sales"
    } else if contains_any(&text, &["data", "analyst", "science"]) {
        "data"
    } else if contains_any(&text, &["design", "ux", "ui"]) {
        "design"
    } else if contains_any(&text, &["finance", "accounting", "investment"]) {
        "finance"
    } else if contains_any(&text, &["operations", "ops"]) {
        "operations"
    } else {
        "engineering"
    }
}

pub fn classify_level(message: &str) -> &'static str {
    let text = message.to_lowercase();

    if contains_any(&text, &["entry", "junior", "new grad", "associate"]) {
        "entry"
    } else if contains_any(&text, &["senior", "lead", "principal", "staff"]) {
        "senior"
    } else if contains_any(&text, &["manager", "director", "head", "vp"]) {
        "manager"
    } else {
        "mid"
    }
}

/// Canned titles per (job type, level); unknown pairs get a generic set.
pub fn fallback_titles(job_type: &str, level: &str) -> [&'static str; 4] {
    match (job_type, level) {
        ("engineering", "entry") => ["Software Engineer", "Junior Software Engineer", "Software Engineer I", "Associate Software Engineer"],
        ("engineering", "mid") => ["Software Engineer II", "Senior Software Engineer", "Full Stack Engineer", "Backend Engineer"],
        ("engineering", "senior") => ["Staff Software Engineer", "Principal Engineer", "Lead Software Engineer", "Senior Staff Engineer"],
        ("engineering", "manager") => ["Engineering Manager", "Senior Engineering Manager", "Director of Engineering", "VP of Engineering"],
        ("product", "entry") => ["Product Manager", "Associate Product Manager", "Junior Product Manager", "Product Analyst"],
        ("product", "mid") => ["Senior Product Manager", "Product Manager II", "Lead Product Manager", "Principal Product Manager"],
        ("product", "senior") => ["Staff Product Manager", "Principal Product Manager", "Senior Principal PM", "Distinguished PM"],
        ("product", "manager") => ["Director of Product", "VP of Product", "Head of Product", "Chief Product Officer"],
        ("marketing", "entry") => ["Marketing Manager", "Marketing Specialist", "Digital Marketing Manager", "Marketing Coordinator"],
        ("marketing", "mid") => ["Senior Marketing Manager", "Product Marketing Manager", "Growth Marketing Manager", "Brand Manager"],
        ("marketing", "senior") => ["Principal Marketing Manager", "Lead Marketing Manager", "Marketing Director", "Senior Brand Manager"],
        ("marketing", "manager") => ["Director of Marketing", "VP of Marketing", "Head of Marketing", "Chief Marketing Officer"],
        ("sales", "entry") => ["Account Executive", "Sales Development Representative", "Business Development Representative", "Sales Associate"],
        ("sales", "mid") => ["Senior Account Executive", "Sales Manager", "Enterprise Account Executive", "Strategic Account Manager"],
        ("sales", "senior") => ["Principal Account Executive", "Lead Sales Manager", "Senior Sales Director", "Key Account Manager"],
        ("sales", "manager") => ["Sales Director", "VP of Sales", "Head of Sales", "Chief Revenue Officer"],
        ("data", "entry") => ["Data Scientist", "Data Analyst", "Junior Data Scientist", "Business Analyst"],
        ("data", "mid") => ["Senior Data Scientist", "Machine Learning Engineer", "Data Science Manager", "Senior Data Analyst"],
        ("data", "senior") => ["Principal Data Scientist", "Staff Data Scientist", "Lead Data Scientist", "Distinguished Scientist"],
        ("data", "manager") => ["Director of Data Science", "VP of Data", "Head of Analytics", "Chief Data Officer"],
        ("design", "entry") => ["UX Designer", "UI Designer", "Product Designer", "Visual Designer"],
        ("design", "mid") => ["Senior UX Designer", "Senior Product Designer", "Lead Designer", "Design Manager"],
        ("design", "senior") => ["Staff Designer", "Principal Designer", "Lead Product Designer", "Design Director"],
        ("design", "manager") => ["Design Manager", "Director of Design", "VP of Design", "Head of Design"],
        ("finance", "entry") => ["Financial Analyst", "Investment Analyst", "Junior Financial Analyst", "Accounting Associate"],
        ("finance", "mid") => ["Senior Financial Analyst", "Finance Manager", "Investment Associate", "Senior Analyst"],
        ("finance", "senior") => ["Principal Financial Analyst", "Senior Finance Manager", "Finance Director", "Investment Director"],
        ("finance", "manager") => ["Finance Director", "VP of Finance", "CFO", "Head of Finance"],
        ("operations", "entry") => ["Operations Manager", "Business Operations Analyst", "Operations Coordinator", "Program Coordinator"],
        ("operations", "mid") => ["Senior Operations Manager", "Business Operations Manager", "Program Manager", "Operations Lead"],
        ("operations", "senior") => ["Principal Operations Manager", "Lead Program Manager", "Operations Director", "Senior Program Manager"],
        ("operations", "manager") => ["Director of Operations", "VP of Operations", "Head of Operations", "Chief Operating Officer"],
        _ => GENERIC_TITLES,
    }
}

/// Scripted company -> job type -> level -> suggestions dialog.
pub struct ScoutBot<S: SuggestionSource> {
    source: S,
    step: Step,
    company: String,
    job_type: String,
    level: String,
    suggestions: Vec<String>,
}

impl<S: SuggestionSource> ScoutBot<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            step: Step::Company,
            company: String::new(),
            job_type: String::new(),
            level: String::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Starts over from the company question.
    pub fn reset(&mut self) -> String {
        self.step = Step::Company;
        self.company.clear();
        self.job_type.clear();
        self.level.clear();
        self.suggestions.clear();
        GREETING.to_string()
    }

    /// Feeds one user message and returns the bot's replies in order.
    /// Blank messages are ignored.
    pub fn respond(&mut self, message: &str) -> Vec<String> {
        let message = message.trim();
        if message.is_empty() {
            return Vec::new();
        }

        match self.step {
            Step::Company => {
                self.company = message.to_string();
                self.step = Step::JobType;
                vec![ASK_JOB_TYPE.to_string()]
            }
            Step::JobType => {
                self.job_type = classify_job_type(message).to_string();
                self.step = Step::Level;
                vec![ASK_LEVEL.to_string()]
            }
            Step::Level => {
                self.level = classify_level(message).to_string();
                self.suggestions = self.fetch_suggestions();
                self.step = Step::Suggestions;

                let mut replies = vec![format!(
                    "Perfect! Based on your interest in {} roles at {}, here are the most common job titles to search for:",
                    self.job_type, self.company
                )];
                replies.extend(
                    self.suggestions
                        .iter()
                        .enumerate()
                        .map(|(i, title)| format!("{}. {}", i + 1, title)),
                );
                replies.push(PICK_PROMPT.to_string());
                replies
            }
            Step::Suggestions => vec![REFINE_PROMPT.to_string()],
        }
    }

    fn fetch_suggestions(&self) -> Vec<String> {
        match self.source.suggest(&self.company, &self.job_type, &self.level) {
            Ok(titles) if !titles.is_empty() => {
                info!(count = titles.len(), "scout suggestions from service");
                titles
            }
            Ok(_) => {
                warn!("suggestion service returned nothing, using fallback titles");
                self.fallback()
            }
            Err(e) => {
                warn!(error = %e, "suggestion service failed, using fallback titles");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Vec<String> {
        fallback_titles(&self.job_type, &self.level)
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    /// Hands the chosen title (1-based) to `on_title`. Returns false when
    /// there is no such suggestion.
    pub fn select(&self, number: usize, on_title: impl FnOnce(&str)) -> bool {
        match number.checked_sub(1).and_then(|i| self.suggestions.get(i)) {
            Some(title) => {
                on_title(title);
                true
            }
            None => false,
        }
    }
}
