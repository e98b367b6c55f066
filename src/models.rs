use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Text field that also accepts null, numbers and booleans. Lists written
/// by older clients used `null` for missing values.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!("expected text, found {}", other))),
    }
}

/// A saved professional connection in a user's directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub linkedin_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub company: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub job_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub college: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_contact_date: String, // MM/DD/YYYY
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String, // "Not Contacted", "Contacted", ...
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_contact_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_body: Option<String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Incoming contact before it is accepted into a directory.
///
/// Older clients wrote search rows straight into local storage with the
/// backend's PascalCase or snake_case keys, so the aliases normalize those
/// once here and nothing downstream sees the other shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    #[serde(default, deserialize_with = "lenient_string", alias = "FirstName", alias = "first_name")]
    pub first_name: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "LastName", alias = "last_name")]
    pub last_name: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "LinkedIn", alias = "linkedin_url")]
    pub linkedin_url: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "Email")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "Company")]
    pub company: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "Title", alias = "job_title")]
    pub job_title: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "College")]
    pub college: String,
    #[serde(default, deserialize_with = "lenient_string", alias = "Location")]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_body: Option<String>,
}

impl NewContact {
    pub fn into_contact(self, id: String, today: &str, status: &str) -> Contact {
        Contact {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            linkedin_url: self.linkedin_url,
            email: self.email,
            company: self.company,
            job_title: self.job_title,
            college: self.college,
            location: self.location,
            first_contact_date: today.to_string(),
            status: status.to_string(),
            last_contact_date: today.to_string(),
            email_subject: self.email_subject,
            email_body: self.email_body,
        }
    }
}

/// Fields returned by the resume parsing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}
