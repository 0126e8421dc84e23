use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::{CleanupStep, DeleteReport, DeployOutcome, UpdateOutcome};
use crate::types::{Setting, SiteGrant, Site};

const REDACTED: &str = "********";
const DEFAULT_LOG_LINES: usize = 100;
const MAX_LOG_LINES: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub can_create_sites: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub can_create_sites: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateUserTokenRequest {
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SiteGrantRequest {
    pub site_id: i64,
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SiteGrantResponse {
    pub site_id: i64,
    pub allow: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<&'static str>,
}

impl From<SiteGrant> for SiteGrantResponse {
    fn from(g: SiteGrant) -> Self {
        Self {
            site_id: g.site_id,
            allow: g.allow_bits.to_strings(),
            deny: g.deny_bits.to_strings(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<crate::types::Token> for TokenResponse {
    fn from(t: crate::types::Token) -> Self {
        Self {
            id: t.id,
            is_admin: t.is_admin,
            user_id: t.user_id,
            created_at: t.created_at,
            expires_at: t.expires_at,
            last_used_at: t.last_used_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub metadata: TokenResponse,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl From<Setting> for SettingResponse {
    fn from(s: Setting) -> Self {
        Self {
            key: s.key,
            value: s.value,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteSiteParams {
    #[serde(default)]
    pub keep_data: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsParams {
    #[serde(default)]
    pub lines: Option<usize>,
}

impl LogsParams {
    pub fn lines(&self) -> usize {
        self.lines
            .unwrap_or(DEFAULT_LOG_LINES)
            .clamp(1, MAX_LOG_LINES)
    }
}

/// A site as returned by the API. DNS credentials are masked.
#[derive(Debug, Serialize)]
pub struct SiteResponse {
    #[serde(flatten)]
    pub site: Site,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recreated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<Site> for SiteResponse {
    fn from(mut site: Site) -> Self {
        for value in site.ssl_config.credentials.values_mut() {
            *value = REDACTED.to_string();
        }
        Self {
            site,
            recreated: None,
            warning: None,
        }
    }
}

impl From<DeployOutcome> for SiteResponse {
    fn from(outcome: DeployOutcome) -> Self {
        Self {
            warning: outcome.warning,
            ..Self::from(outcome.site)
        }
    }
}

impl From<UpdateOutcome> for SiteResponse {
    fn from(outcome: UpdateOutcome) -> Self {
        Self {
            recreated: Some(outcome.recreated),
            warning: outcome.warning,
            ..Self::from(outcome.site)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub site_id: i64,
    pub keep_data: bool,
    pub clean: bool,
    pub steps: Vec<CleanupStep>,
}

impl From<DeleteReport> for DeleteResponse {
    fn from(report: DeleteReport) -> Self {
        Self {
            site_id: report.site_id,
            keep_data: report.keep_data,
            clean: report.is_clean(),
            steps: report.steps,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub lines: usize,
    pub output: String,
}

#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    pub site_id: i64,
    pub content: String,
}
