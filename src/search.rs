use reqwest::blocking::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::account::{Tier, UserProfile};
use crate::models::{NewContact, ResumeData};

const AUTOCOMPLETE_MIN_QUERY: usize = 2;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Could not reach the backend: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{message}")]
    Backend { status: u16, message: String },

    #[error("Failed to read {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Form values for one contact search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub job_title: String,
    pub company: String,
    pub location: String,
    pub user_email: String,
    pub save_to_directory: bool,
}

#[derive(Debug, Clone)]
struct AuthHeaders {
    token: Option<String>,
    uid: String,
    email: String,
}

pub struct ApiClient {
    base_url: String,
    auth: Option<AuthHeaders>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct SuggestionsResponse {
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResumeParseResponse {
    #[serde(default)]
    data: Option<ResumeData>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: None,
            client,
        })
    }

    /// Sends the signed-in user's identity with every request.
    pub fn with_user(mut self, user: &UserProfile) -> Self {
        self.auth = Some(AuthHeaders {
            token: user.access_token.clone(),
            uid: user.uid.clone(),
            email: user.email.clone(),
        });
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorized(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        let Some(auth) = &self.auth else {
            return request;
        };
        let request = request
            .header("X-User-Uid", &auth.uid)
            .header("X-User-Email", &auth.email);
        match &auth.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn check(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ApiError> {
        let status = response.status();
        debug!(status = status.as_u16(), "backend response");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let message = backend_error_message(status.as_u16(), &body);
        error!(status = status.as_u16(), %message, "backend error");
        Err(ApiError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    /// Runs a contact search and returns the CSV the backend produced.
    pub fn run_search(
        &self,
        tier: Tier,
        request: &SearchRequest,
        resume: Option<&Path>,
    ) -> Result<Vec<u8>, ApiError> {
        let url = self.url(tier.plan().endpoint);
        info!(%url, tier = tier.plan().label, "running contact search");

        let builder = match (tier, resume) {
            (Tier::Pro, Some(path)) => {
                let bytes = std::fs::read(path).map_err(|source| ApiError::File {
                    path: path.display().to_string(),
                    source,
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "resume.pdf".to_string());
                let part = Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("application/pdf")?;
                let form = Form::new()
                    .text("jobTitle", request.job_title.clone())
                    .text("company", request.company.clone())
                    .text("location", request.location.clone())
                    .text("userEmail", request.user_email.clone())
                    .text("saveToDirectory", request.save_to_directory.to_string())
                    .part("resume", part);
                self.client.post(&url).multipart(form)
            }
            _ => self.client.post(&url).json(request),
        };

        let response = Self::check(self.authorized(builder).send()?)?;
        let bytes = response.bytes()?;
        info!(bytes = bytes.len(), "search returned CSV");
        Ok(bytes.to_vec())
    }

    pub fn autocomplete(&self, data_type: &str, query: &str) -> Result<Vec<String>, ApiError> {
        if query.trim().chars().count() < AUTOCOMPLETE_MIN_QUERY {
            return Ok(Vec::new());
        }
        let url = self.url(&format!("/autocomplete/{}", data_type));
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()?;
        let body: SuggestionsResponse = Self::check(response)?.json()?;
        if let Some(message) = body.error {
            return Err(ApiError::Backend {
                status: 200,
                message,
            });
        }
        Ok(body.suggestions)
    }

    pub fn parse_resume(&self, path: &Path) -> Result<ResumeData, ApiError> {
        let bytes = std::fs::read(path).map_err(|source| ApiError::File {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "resume.pdf".to_string());
        let form = Form::new().part(
            "resume",
            Part::bytes(bytes)
                .file_name(file_name)
                .mime_str("application/pdf")?,
        );

        let response = self
            .authorized(self.client.post(self.url("/parse-resume")).multipart(form))
            .send()?;
        let body: ResumeParseResponse = Self::check(response)?.json()?;
        match body {
            ResumeParseResponse {
                data: Some(data),
                success: true,
                ..
            } => Ok(data),
            ResumeParseResponse { error: Some(message), .. } => Err(ApiError::Backend {
                status: 200,
                message,
            }),
            _ => Err(ApiError::Decode("Failed to parse resume".to_string())),
        }
    }

    pub fn health(&self) -> Result<Value, ApiError> {
        Ok(Self::check(self.client.get(self.url("/health")).send()?)?.json()?)
    }

    pub fn tier_info(&self) -> Result<Value, ApiError> {
        Ok(Self::check(self.client.get(self.url("/tier-info")).send()?)?.json()?)
    }
}

/// Prefers the `error` field of a JSON body, else `HTTP <status>`.
pub fn backend_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status))
}

pub fn csv_filename(tier: Tier, date: chrono::NaiveDate) -> String {
    format!("Offerloop_{}_{}.csv", tier.plan().label, date.format("%Y-%m-%d"))
}

/// Filename for a search run now, dated in UTC like the monthly usage key.
pub fn csv_filename_today(tier: Tier) -> String {
    csv_filename(tier, chrono::Utc::now().date_naive())
}

/// One row of the backend's CSV export. Only the columns the directory
/// keeps are read.
#[derive(Debug, Default, Deserialize)]
struct CsvRow {
    #[serde(rename = "FirstName", default)]
    first_name: String,
    #[serde(rename = "LastName", default)]
    last_name: String,
    #[serde(rename = "LinkedIn", default)]
    linkedin: String,
    #[serde(rename = "Email", default)]
    email: String,
    #[serde(rename = "WorkEmail", default)]
    work_email: String,
    #[serde(rename = "PersonalEmail", default)]
    personal_email: String,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Company", default)]
    company: String,
    #[serde(rename = "City", default)]
    city: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "College", default)]
    college: String,
}

fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values
        .iter()
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .unwrap_or("")
}

impl From<CsvRow> for NewContact {
    fn from(row: CsvRow) -> Self {
        let location = [row.city.trim(), row.state.trim()]
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        NewContact {
            email: first_non_empty(&[
                row.email.as_str(),
                row.work_email.as_str(),
                row.personal_email.as_str(),
            ])
                .to_string(),
            first_name: row.first_name.trim().to_string(),
            last_name: row.last_name.trim().to_string(),
            linkedin_url: row.linkedin.trim().to_string(),
            company: row.company.trim().to_string(),
            job_title: row.title.trim().to_string(),
            college: row.college.trim().to_string(),
            location,
            ..Default::default()
        }
    }
}

/// Parses the search CSV into normalized contacts.
pub fn parse_contacts_csv(bytes: &[u8]) -> anyhow::Result<Vec<NewContact>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let mut contacts = Vec::new();
    for (i, record) in reader.deserialize::<CsvRow>().enumerate() {
        let row = record.map_err(|e| anyhow::anyhow!("Bad CSV row {}: {}", i + 1, e))?;
        contacts.push(NewContact::from(row));
    }
    Ok(contacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_filename() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 9, 4).unwrap();
        assert_eq!(csv_filename(Tier::Free, date), "Offerloop_Free_2025-09-04.csv");
        assert_eq!(csv_filename(Tier::Pro, date), "Offerloop_Pro_2025-09-04.csv");
    }

    #[test]
    fn test_csv_filename_today_uses_utc_date() {
        let before = chrono::Utc::now().date_naive();
        let name = csv_filename_today(Tier::Free);
        let after = chrono::Utc::now().date_naive();
        assert!(
            name == csv_filename(Tier::Free, before) || name == csv_filename(Tier::Free, after),
            "{}",
            name
        );
    }

    #[test]
    fn test_backend_error_message_prefers_json_error() {
        assert_eq!(
            backend_error_message(400, r#"{"error":"Invalid job title"}"#),
            "Invalid job title"
        );
        assert_eq!(backend_error_message(502, "<html>Bad gateway</html>"), "HTTP 502");
        assert_eq!(backend_error_message(500, r#"{"error":""}"#), "HTTP 500");
    }

    #[test]
    fn test_parse_contacts_csv_normalizes_rows() {
        let csv = "FirstName,LastName,LinkedIn,Email,WorkEmail,PersonalEmail,Title,Company,City,State,College,Similarity\n\
                   Jane,Doe,https://linkedin.com/in/jane,,jane@corp.com,jane@gmail.com,Analyst,Corp,Austin,TX,UT Austin,0.9\n\
                   Raj,Patel,,,,,Engineer,Initech,,CA,,\n";
        let contacts = parse_contacts_csv(csv.as_bytes()).unwrap();
        assert_eq!(contacts.len(), 2);

        assert_eq!(contacts[0].email, "jane@corp.com");
        assert_eq!(contacts[0].location, "Austin, TX");
        assert_eq!(contacts[0].job_title, "Analyst");
        assert_eq!(contacts[0].linkedin_url, "https://linkedin.com/in/jane");

        assert_eq!(contacts[1].email, "");
        assert_eq!(contacts[1].location, "CA");
    }

    #[test]
    fn test_parse_contacts_csv_missing_columns() {
        let csv = "FirstName,Email\nAl,al@x.com\n";
        let contacts = parse_contacts_csv(csv.as_bytes()).unwrap();
        assert_eq!(contacts[0].first_name, "Al");
        assert_eq!(contacts[0].company, "");
    }

    #[test]
    fn test_autocomplete_short_query_skips_request() {
        // unroutable base url: a request would fail
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(client.autocomplete("company", "a").unwrap().is_empty());
    }

    #[test]
    #[ignore] // Requires the backend running locally
    fn test_health_against_local_backend() {
        let client = ApiClient::new("http://localhost:5001/api").unwrap();
        assert!(client.health().is_ok());
    }
}
