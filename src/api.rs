use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::Authenticator;
use crate::constants::{self, DEFAULT_APP_VERSION, DEFAULT_PLATFORM};
use crate::envelope::{self, ApiRequest};
use crate::error::{Error, Result};
use crate::region;

/// A region served by the API, as listed by `contacts/regions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

fn require(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MissingParam(format!(
            "Required API '{}' parameter not found",
            name
        )));
    }
    Ok(())
}

async fn public_get(
    client: &reqwest::Client,
    base_url: &str,
    region: &str,
    request: ApiRequest,
) -> Result<Value> {
    let headers = envelope::default_headers(region, constants::device_id())?;
    let response = request
        .to_builder(client, &region::api_url(base_url), headers)
        .send()
        .await?;
    envelope::decode_response(request.method(), request.path(), response).await
}

/// List the regions served by the API. No authentication needed.
pub async fn get_regions(client: &reqwest::Client, base_url: &str) -> Result<Vec<RegionInfo>> {
    let data = public_get(
        client,
        base_url,
        constants::DEFAULT_REGION,
        ApiRequest::get("contacts/regions"),
    )
    .await?;
    let regions: Vec<RegionInfo> = serde_json::from_value(data)?;
    debug!("Found {} regions", regions.len());
    Ok(regions)
}

/// Ask the server whether this client version is still supported. No authentication needed.
pub async fn check_version(client: &reqwest::Client, base_url: &str, region: &str) -> Result<Value> {
    public_get(
        client,
        base_url,
        region,
        ApiRequest::get("app/version").query("version", DEFAULT_APP_VERSION),
    )
    .await
}

/// Account API on top of any [`Authenticator`].
///
/// Every method is a single request; the returned value is the unwrapped `data` payload.
pub struct TnseClient<A: Authenticator> {
    auth: A,
}

impl<A: Authenticator> TnseClient<A> {
    pub fn new(auth: A) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &A {
        &self.auth
    }

    pub fn into_auth(self) -> A {
        self.auth
    }

    async fn call(&self, request: ApiRequest) -> Result<Value> {
        self.auth.request(request).await
    }

    pub async fn check_version(&self) -> Result<Value> {
        self.call(ApiRequest::get("app/version").query("version", DEFAULT_APP_VERSION))
            .await
    }

    pub async fn user_info(&self) -> Result<Value> {
        self.call(ApiRequest::get("user")).await
    }

    pub async fn accounts(&self) -> Result<Value> {
        self.call(ApiRequest::get("accounts")).await
    }

    pub async fn account_info(&self, account_id: u64) -> Result<Value> {
        self.call(ApiRequest::get(format!("accounts/{}", account_id)))
            .await
    }

    pub async fn main_page_debt_info(&self) -> Result<Value> {
        self.call(ApiRequest::get("main-page/debt/info")).await
    }

    pub async fn information(&self, account: &str) -> Result<Value> {
        require(account, "account")?;
        self.call(ApiRequest::get("information").query("account", account))
            .await
    }

    /// Meters installed for an account.
    pub async fn counters(&self, account: &str) -> Result<Value> {
        require(account, "account")?;
        self.call(ApiRequest::get("counters").query("account", account))
            .await
    }

    /// Current balance and amount due.
    pub async fn balance(&self, account: &str) -> Result<Value> {
        require(account, "account")?;
        self.call(ApiRequest::get("payments/new-balance").query("account", account))
            .await
    }

    pub async fn counter_readings(&self, counter_id: &str, account: &str) -> Result<Value> {
        require(counter_id, "counter_id")?;
        require(account, "account")?;
        self.call(
            ApiRequest::get(format!("counters/{}/readings", counter_id)).query("account", account),
        )
        .await
    }

    /// Submit meter readings, one value per tariff zone.
    pub async fn send_readings(&self, account: &str, row_id: &str, readings: &[String]) -> Result<Value> {
        require(account, "account")?;
        require(row_id, "row_id")?;
        if readings.is_empty() {
            return Err(Error::MissingParam(
                "Required API 'readings' parameter not found".to_string(),
            ));
        }

        debug!("Sending {} readings for account {}", readings.len(), account);
        self.call(ApiRequest::post("counters/send-readings").json(json!({
                "account": account,
                "rowId": row_id,
                "readings": readings,
                "platform": DEFAULT_PLATFORM,
            })))
            .await
    }

    pub async fn invoice_settings(&self, account: &str) -> Result<Value> {
        require(account, "account")?;
        self.call(ApiRequest::get("invoices/settings").query("account", account))
            .await
    }

    pub async fn invoices(&self, account: &str, year: i32) -> Result<Value> {
        require(account, "account")?;
        self.call(
            ApiRequest::get("invoices")
                .query("account", account)
                .query("year", year),
        )
        .await
    }

    /// Invoice PDF as base64. `date` is `DD.MM.YYYY`.
    pub async fn invoice_file(&self, account: &str, date: &str) -> Result<Value> {
        require(account, "account")?;
        require(date, "date")?;
        self.call(
            ApiRequest::get("invoices/get-file")
                .query("account", account)
                .query("date", date),
        )
        .await
    }

    /// Payments, readings and invoices recorded for a month.
    pub async fn history(&self, account: &str, year: i32, month: u32) -> Result<Value> {
        require(account, "account")?;
        self.call(
            ApiRequest::get("history")
                .query("account", account)
                .query("year", year)
                .query("month", month),
        )
        .await
    }

    /// Payments between two `MM.YYYY` periods.
    pub async fn payments(
        &self,
        account: &str,
        date_from: &str,
        date_to: &str,
        operation_type: &str,
    ) -> Result<Value> {
        require(account, "account")?;
        require(date_from, "date_from")?;
        require(date_to, "date_to")?;
        self.call(
            ApiRequest::get("payments")
                .query("account", account)
                .query("dateFrom", date_from)
                .query("dateTo", date_to)
                .query("operationType", operation_type),
        )
        .await
    }
}
