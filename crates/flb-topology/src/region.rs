//! Sidecar image resolution.
//!
//! The Envoy image for App Mesh is published from a different registry
//! account in a handful of opt-in regions. Every other region uses the
//! default account. The lookup is total: a region string that is not in the
//! table always resolves through the default rule, so this module never
//! fails. An unsupported region only shows up later as an image pull error.

use serde::{Deserialize, Serialize};

/// Envoy image tag deployed with every sidecar.
pub const ENVOY_TAG: &str = "v1.15.1.0-prod";

/// Repository name of the Envoy image.
pub const ENVOY_REPOSITORY: &str = "aws-appmesh-envoy";

/// Registry account serving every region not listed in [`REGIONAL_ENVOY_ACCOUNTS`].
pub const DEFAULT_ENVOY_ACCOUNT: &str = "840364872350";

/// Regions whose Envoy image lives in a dedicated registry account.
pub const REGIONAL_ENVOY_ACCOUNTS: &[(&str, &str)] = &[
    ("ap-east-1", "856666278305"),
    ("eu-south-1", "422531588944"),
    ("me-south-1", "772975370895"),
];

/// Registry account that serves the Envoy image in `region`.
#[must_use]
pub fn envoy_account(region: &str) -> &'static str {
    REGIONAL_ENVOY_ACCOUNTS
        .iter()
        .find(|(r, _)| *r == region)
        .map_or(DEFAULT_ENVOY_ACCOUNT, |&(_, account)| account)
}

/// Repository ARN of the Envoy image for `region`.
#[must_use]
pub fn envoy_repository_arn(region: &str) -> String {
    format!(
        "arn:aws:ecr:{region}:{}:repository/{ENVOY_REPOSITORY}",
        envoy_account(region)
    )
}

/// Fully resolved sidecar image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvoyImage {
    /// Repository ARN.
    pub repository_arn: String,
    /// Pullable image URI including tag.
    pub uri: String,
}

impl EnvoyImage {
    /// Resolves the sidecar image for `region`.
    #[must_use]
    pub fn for_region(region: &str) -> Self {
        let account = envoy_account(region);
        Self {
            repository_arn: envoy_repository_arn(region),
            uri: format!("{account}.dkr.ecr.{region}.amazonaws.com/{ENVOY_REPOSITORY}:{ENVOY_TAG}"),
        }
    }
}
