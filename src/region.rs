use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::constants::{ACCOUNT_NUMBER_LENGTH, API_PATH, BASE_URL_TEMPLATE};
use crate::error::{Error, Result};

/// Two-digit account prefixes and the region codes serving them.
const ACCOUNT_REGIONS: &[(&str, &str)] = &[
    ("10", "karelia"),
    ("12", "mari"),
    ("23", "kuban"),
    ("36", "voronezh"),
    ("52", "nn"),
    ("53", "novgorod"),
    ("58", "penza"),
    ("61", "rostov"),
    ("71", "tula"),
    ("76", "yar"),
];

/// Host URL for a region code. No validation is applied to the code.
pub fn base_url(region: &str) -> String {
    BASE_URL_TEMPLATE.replace("{region}", region)
}

/// Versioned API root under a host URL.
pub fn api_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), API_PATH)
}

/// `Authorization` value identifying the mobile app of a region.
pub fn basic_auth(region: &str) -> String {
    let credentials = format!("mobile-api-{region}:mobile-api-{region}");
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

pub fn is_valid_account(account: &str) -> bool {
    account.len() == ACCOUNT_NUMBER_LENGTH && account.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve the region code serving an account number.
pub fn region_for_account(account: &str) -> Result<&'static str> {
    if !is_valid_account(account) {
        return Err(Error::InvalidAccount(account.to_string()));
    }

    let prefix = &account[..2];
    ACCOUNT_REGIONS
        .iter()
        .find(|(code, _)| *code == prefix)
        .map(|(_, region)| *region)
        .ok_or_else(|| Error::RegionNotFound(format!("unknown region for account {}", account)))
}

pub fn account_base_url(account: &str) -> Result<String> {
    region_for_account(account).map(base_url)
}
