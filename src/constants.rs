//! Fixed protocol values shared by every request.

use std::sync::OnceLock;

pub const BASE_URL_TEMPLATE: &str = "https://mobile-api-{region}.tns-e.ru";
pub const API_PATH: &str = "api/v1";

/// Header carrying the bearer token. The standard `Authorization` header holds the
/// region basic credentials instead.
pub const BEARER_HEADER: &str = "authorizationtest";
pub const API_HASH_HEADER: &str = "x-api-hash";
pub const DEVICE_ID_HEADER: &str = "x-device-id";

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";
pub const DEFAULT_USER_AGENT: &str = "Dart/3.9 (dart:io)";
pub const DEFAULT_API_HASH: &str = "b4c9554247f14b9a281f5f60df923f5e";

pub const DEFAULT_APP_VERSION: &str = "3.0.12";
pub const DEFAULT_REGION: &str = "rostov";
pub const DEFAULT_PLATFORM: &str = "android";
pub const DEFAULT_AUTH_TYPE: &str = "email";
pub const ACCOUNT_NUMBER_LENGTH: usize = 12;

pub const DEVICE_IDS: &[&str] = &[
    "AP3A.240905.015",
    "AP3A.240905.015.A2",
    "AP3A.240805.003",
    "AP2A.240705.005",
    "AP2A.240605.004",
    "AP1A.231005.007",
    "UQ1A.240305.002",
    "UQ1A.240105.004",
    "UP1A.231005.007",
    "UP1A.231005.007.A1",
    "TQ3A.230805.001",
    "TQ3A.230705.001",
    "TP1A.221005.002",
    "TP1A.220905.004",
    "SQ3A.220705.003",
    "SP1A.210812.016",
    "SQ1D.220105.007",
    "RQ3A.210805.001",
    "RP1A.201005.004",
    "QQ3A.200805.001",
    "QP1A.190711.020",
    "PQ3A.190801.002",
    "PQ3A.190705.003",
    "PQ2A.190405.003",
    "PQ2A.190305.002",
    "PQ1A.190105.004",
    "PD1A.180720.030",
    "PD1A.180720.031",
];

/// Device id reported by this process. Picked once and reused for every session.
pub fn device_id() -> &'static str {
    static DEVICE_ID: OnceLock<&'static str> = OnceLock::new();
    DEVICE_ID.get_or_init(|| {
        let seed = uuid::Uuid::new_v4().as_u128();
        DEVICE_IDS[(seed % DEVICE_IDS.len() as u128) as usize]
    })
}
