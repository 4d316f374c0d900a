use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Deserializer};
use shared::TrialSummary;
use thiserror::Error;

use super::{fallback_trials, TrialSearch, MAX_TRIALS};
use crate::config::TrialSettings;

const MAX_LOCATIONS: usize = 2;

#[derive(Error, Debug)]
pub enum TrialSearchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Registry returned status {0}")]
    Status(u16),
    #[error("JSON parsing failed: {0}")]
    Parse(String),
    #[error("No studies found")]
    Empty,
}

/// Client for the ClinicalTrials.gov v2 studies endpoint.
#[derive(Clone)]
pub struct ClinicalTrialsClient {
    client: HttpClient,
    api_url: String,
    status_filter: String,
    page_size: usize,
}

#[derive(Debug, Default, Deserialize)]
struct StudiesResponse {
    #[serde(default)]
    studies: Vec<Study>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Study {
    protocol_section: ProtocolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProtocolSection {
    identification_module: IdentificationModule,
    status_module: StatusModule,
    design_module: DesignModule,
    contacts_locations_module: ContactsLocationsModule,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdentificationModule {
    nct_id: Option<String>,
    brief_title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusModule {
    overall_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DesignModule {
    #[serde(deserialize_with = "deserialize_one_or_many")]
    phases: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContactsLocationsModule {
    locations: Vec<Location>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Location {
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

// `phases` is usually a list but older records carry a bare string.
fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(phase) if phase.is_empty() => Vec::new(),
        OneOrMany::One(phase) => vec![phase],
        OneOrMany::Many(phases) => phases,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Location {
    /// "city, state", or "city, country" when the registry has no state.
    fn display(&self) -> Option<String> {
        let region = non_empty(&self.state).or_else(|| non_empty(&self.country));
        let parts: Vec<&str> = [non_empty(&self.city), region].into_iter().flatten().collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

impl Study {
    fn into_summary(self, condition: &str) -> TrialSummary {
        let section = self.protocol_section;
        let locations = section
            .contacts_locations_module
            .locations
            .iter()
            .take(MAX_LOCATIONS)
            .filter_map(Location::display)
            .collect();
        TrialSummary {
            id: non_empty(&section.identification_module.nct_id)
                .unwrap_or("N/A")
                .to_string(),
            title: non_empty(&section.identification_module.brief_title)
                .unwrap_or("Untitled Study")
                .to_string(),
            status: non_empty(&section.status_module.overall_status)
                .unwrap_or("Unknown")
                .to_string(),
            phases: section.design_module.phases,
            locations,
            match_reason: format!(
                "This study targets patients with active {}. Your screening suggests you meet \
                 the primary inclusion criteria.",
                condition
            ),
        }
    }
}

impl ClinicalTrialsClient {
    pub fn new(settings: &TrialSettings) -> Result<Self, TrialSearchError> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            status_filter: settings.status_filter.clone(),
            page_size: settings.page_size.clamp(1, MAX_TRIALS),
        })
    }

    /// Queries the registry without any fallback.
    pub async fn fetch(&self, condition: &str) -> Result<Vec<TrialSummary>, TrialSearchError> {
        let page_size = self.page_size.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("query.cond", condition),
                ("filter.overallStatus", self.status_filter.as_str()),
                ("pageSize", page_size.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrialSearchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let parsed: StudiesResponse =
            serde_json::from_str(&body).map_err(|e| TrialSearchError::Parse(e.to_string()))?;
        if parsed.studies.is_empty() {
            return Err(TrialSearchError::Empty);
        }

        debug!("Registry returned {} studies for {}", parsed.studies.len(), condition);
        Ok(parsed
            .studies
            .into_iter()
            .take(MAX_TRIALS)
            .map(|study| study.into_summary(condition))
            .collect())
    }
}

#[async_trait]
impl TrialSearch for ClinicalTrialsClient {
    async fn find(&self, condition: &str) -> Vec<TrialSummary> {
        match self.fetch(condition).await {
            Ok(trials) => trials,
            Err(e) => {
                warn!("Trial search for '{}' failed, using fallback list: {}", condition, e);
                fallback_trials()
            }
        }
    }
}
