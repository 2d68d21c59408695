pub mod api;
pub mod auth;
pub mod config;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod mobile;
pub mod region;
pub mod session;

pub use api::{check_version, get_regions, RegionInfo, TnseClient};
pub use auth::{Authenticator, TokenSet, TokenUpdateCallback};
pub use envelope::ApiRequest;
pub use error::{Error, Result};
pub use mobile::MobileSession;
pub use session::{Session, SessionBuilder};
