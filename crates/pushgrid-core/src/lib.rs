pub mod config;
pub mod version;

pub use config::PushConfig;
pub use version::{
    AppVersionSpec, NormalizedVersion, VersionError, VersionRange, normalize_app_version,
    parse_client_version,
};
