use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, Modules};
use crate::db::{RowForSync, TimesheetForSync};
use crate::hours;
use crate::zoho::model::{extract_records, CreateRecordResponse, TokenResponse};

pub mod model;

/// Refresh the access token this many seconds before it actually expires.
const TOKEN_EXPIRY_SKEW_SECS: u64 = 60;

/// Everything the sync engine and reconciliation job need from the CRM.
/// Mocked in tests; implemented by [`ZohoClient`] in production.
#[async_trait]
pub trait ZohoService: Send + Sync {
    /// Create the parent record for one timesheet; returns the CRM id.
    async fn create_timesheet_record(&self, record: Value) -> Result<String>;

    /// Create one junction record linking a parent to a painter; returns
    /// the CRM id.
    async fn create_junction_record(&self, record: Value) -> Result<String>;

    async fn fetch_projects(&self) -> Result<Vec<Value>>;
    async fn fetch_portal_users(&self) -> Result<Vec<Value>>;
    async fn fetch_connections(&self) -> Result<Vec<Value>>;
    async fn fetch_painters(&self) -> Result<Vec<Value>>;
}

struct TokenState {
    access_token: String,
    expires_at: Instant,
}

/// Zoho CRM v2 client. Constructed once at startup and passed explicitly to
/// the components that talk to the CRM; holds its own token cache behind
/// [`ZohoClient::get_valid_token`].
pub struct ZohoClient {
    http: Client,
    accounts_base: Url,
    api_base: Url,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    modules: Modules,
    token: Mutex<Option<TokenState>>,
}

impl fmt::Debug for ZohoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZohoClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl ZohoClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = Client::builder()
            .user_agent("crewsheet/0.1")
            .timeout(Duration::from_secs(cfg.zoho.timeout_seconds))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            accounts_base: Url::parse(&cfg.zoho.accounts_base)
                .context("invalid zoho.accounts_base URL")?,
            api_base: Url::parse(&cfg.zoho.api_base).context("invalid zoho.api_base URL")?,
            client_id: cfg.zoho.client_id.clone(),
            client_secret: cfg.zoho.client_secret.clone(),
            refresh_token: cfg.zoho.refresh_token.clone(),
            modules: cfg.zoho.modules.clone(),
            token: Mutex::new(None),
        })
    }

    /// Return a usable access token, refreshing through the OAuth
    /// refresh-token grant when the cached one is missing or near expiry.
    pub async fn get_valid_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.expires_at > Instant::now() {
                return Ok(state.access_token.clone());
            }
        }

        let endpoint = self
            .accounts_base
            .join("oauth/v2/token")
            .context("invalid accounts base URL")?;
        let res = self
            .http
            .post(endpoint)
            .query(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .context("failed to reach Zoho accounts endpoint")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("token refresh failed {}: {}", status, body));
        }

        let payload: TokenResponse = res
            .json()
            .await
            .context("invalid token response JSON")?;
        let lifetime = payload.expires_in.saturating_sub(TOKEN_EXPIRY_SKEW_SECS);
        let access_token = payload.access_token.clone();
        *guard = Some(TokenState {
            access_token: payload.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        debug!("refreshed Zoho access token");
        Ok(access_token)
    }

    fn module_url(&self, module: &str) -> Result<Url> {
        self.api_base
            .join(&format!("crm/v2/{module}"))
            .context("invalid Zoho module URL")
    }

    async fn execute_create(&self, module: &str, record: Value) -> Result<String> {
        let token = self.get_valid_token().await?;
        let body = json!({ "data": [record] });
        let res = self
            .http
            .post(self.module_url(module)?)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .json(&body)
            .send()
            .await
            .context("failed to reach Zoho CRM")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(module, "rate limited by Zoho: {}", body);
            return Err(anyhow!("received 429 from Zoho: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(module, %status, "Zoho create failed: {}", body);
            return Err(anyhow!("zoho error {}: {}", status, body));
        }

        let payload: CreateRecordResponse =
            res.json().await.context("invalid Zoho create response")?;
        let first = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty Zoho create response"))?;
        if first.code != "SUCCESS" {
            return Err(anyhow!("zoho rejected record: {}", first.code));
        }
        let id = first
            .details
            .ok_or_else(|| anyhow!("Zoho create response missing record details"))?
            .id;
        info!(module, %id, "created CRM record");
        Ok(id)
    }

    async fn fetch_module(&self, module: &str) -> Result<Vec<Value>> {
        let token = self.get_valid_token().await?;
        let res = self
            .http
            .get(self.module_url(module)?)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .send()
            .await
            .context("failed to reach Zoho CRM")?;

        // Zoho answers 204 when a module has no records.
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("zoho fetch {} failed {}: {}", module, status, body));
        }

        let value: Value = res.json().await.context("invalid Zoho list response")?;
        Ok(extract_records(value))
    }
}

#[async_trait]
impl ZohoService for ZohoClient {
    async fn create_timesheet_record(&self, record: Value) -> Result<String> {
        self.execute_create(&self.modules.timesheet, record).await
    }

    async fn create_junction_record(&self, record: Value) -> Result<String> {
        self.execute_create(&self.modules.junction, record).await
    }

    async fn fetch_projects(&self) -> Result<Vec<Value>> {
        self.fetch_module(&self.modules.project).await
    }

    async fn fetch_portal_users(&self) -> Result<Vec<Value>> {
        let token = self.get_valid_token().await?;
        let mut url = self.module_url("users")?;
        url.query_pairs_mut().append_pair("type", "ActiveUsers");
        let res = self
            .http
            .get(url)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .send()
            .await
            .context("failed to reach Zoho CRM")?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("zoho fetch users failed {}: {}", status, body));
        }
        let value: Value = res.json().await.context("invalid Zoho users response")?;
        Ok(extract_records(value))
    }

    async fn fetch_connections(&self) -> Result<Vec<Value>> {
        self.fetch_module(&self.modules.connection).await
    }

    async fn fetch_painters(&self) -> Result<Vec<Value>> {
        self.fetch_module(&self.modules.painter).await
    }
}

/// Build the parent record for one timesheet. Sundry items with zero
/// quantity are omitted entirely, never sent as `0`.
pub fn build_parent_record(ts: &TimesheetForSync, foreman_zoho_id: &str) -> Value {
    let mut fields = Map::new();
    fields.insert(
        "Name".into(),
        json!(format!("{} {}", ts.job_name, ts.work_date)),
    );
    fields.insert("Job".into(), json!({ "id": ts.job_id }));
    fields.insert("Foreman".into(), json!({ "id": foreman_zoho_id }));
    fields.insert("Date".into(), json!(ts.work_date));
    fields.insert("Total_Hours".into(), json!(ts.total_crew_hours));
    if let Some(notes) = ts.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        fields.insert("Notes".into(), json!(notes));
    }
    if let Some(co) = ts.change_order.as_deref().filter(|c| !c.trim().is_empty()) {
        fields.insert("Change_Order".into(), json!(co));
    }
    for (field, qty) in ts.sundries.crm_fields() {
        fields.insert(field.into(), json!(qty));
    }
    Value::Object(fields)
}

/// Build one junction record linking a parent record to a painter's times.
/// Datetimes are formatted with the local UTC offset at call time.
pub fn build_junction_record(
    parent_zoho_id: &str,
    row: &RowForSync,
    work_date: &str,
) -> Result<Value> {
    let mut fields = Map::new();
    fields.insert(
        "Name".into(),
        json!(format!("{} {}", row.painter_name, work_date)),
    );
    fields.insert("Timesheet".into(), json!({ "id": parent_zoho_id }));
    fields.insert("Painter".into(), json!({ "id": row.painter_id }));
    fields.insert(
        "Start_Time".into(),
        json!(hours::crm_datetime(work_date, &row.start_time)?),
    );
    fields.insert(
        "End_Time".into(),
        json!(hours::crm_datetime(work_date, &row.end_time)?),
    );
    if let (Some(ls), Some(le)) = (row.lunch_start.as_deref(), row.lunch_end.as_deref()) {
        fields.insert("Lunch_Start".into(), json!(hours::crm_datetime(work_date, ls)?));
        fields.insert("Lunch_End".into(), json!(hours::crm_datetime(work_date, le)?));
    }
    fields.insert("Hours".into(), json!(row.total_hours));
    Ok(Value::Object(fields))
}
