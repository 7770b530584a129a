//! Verifier-side policy: the set of enclave measurements and IAS
//! credentials a deployment is willing to accept.
//!
//! Loaded from environment variables by default, per `original_source`'s
//! `ra_tls_verify.c` (`init_api_key`, `getenv_enclave_measurements`,
//! `getenv_allow_outdated_tcb`, `getenv_ias_pub_key_pem`), with an additive
//! TOML-file loader grounded in this workspace's `Config::load` pattern,
//! for callers who'd rather ship one config file than a handful of
//! environment variables.

use std::env;

use serde::Deserialize;

use crate::error::RaTlsError;

const ENV_API_KEY: &str = "RA_TLS_EPID_API_KEY";
const ENV_REPORT_URL: &str = "RA_TLS_REPORT_URL";
const ENV_SIGRL_URL: &str = "RA_TLS_SIGRL_URL";
const ENV_ALLOW_OUTDATED_TCB: &str = "RA_TLS_ALLOW_OUTDATED_TCB";
const ENV_MRSIGNER: &str = "RA_TLS_MRSIGNER";
const ENV_MRENCLAVE: &str = "RA_TLS_MRENCLAVE";
const ENV_ISV_PROD_ID: &str = "RA_TLS_ISV_PROD_ID";
const ENV_ISV_SVN: &str = "RA_TLS_ISV_SVN";
const ENV_IAS_PUB_KEY_PEM: &str = "RA_TLS_IAS_PUB_KEY_PEM";
const ENV_CERT_NOT_BEFORE: &str = "RA_TLS_CERT_TIMESTAMP_NOT_BEFORE";
const ENV_CERT_NOT_AFTER: &str = "RA_TLS_CERT_TIMESTAMP_NOT_AFTER";

/// Default Intel Attestation Service endpoints (EPID, development/Service
/// Provider ID-linkable signatures), used when the corresponding
/// environment variable is unset.
pub const DEFAULT_REPORT_URL: &str =
    "https://api.trustedservices.intel.com/sgx/dev/attestation/v4/report";
pub const DEFAULT_SIGRL_URL: &str =
    "https://api.trustedservices.intel.com/sgx/dev/attestation/v4/sigrl";

pub const DEFAULT_CERT_NOT_BEFORE: &str = "2001-01-01T00:00:00Z";
pub const DEFAULT_CERT_NOT_AFTER: &str = "2030-12-31T23:59:59Z";

/// IAS connection details, split out of `PolicyBundle` because they govern
/// *how* to reach IAS rather than *what* to accept from it.
#[derive(Debug, Clone)]
pub struct IasConfig {
    pub api_key: String,
    pub report_url: String,
    pub sigrl_url: String,
}

/// What a verifier will accept. Every measurement field is optional: an
/// unset field does not constrain that dimension.
#[derive(Debug, Clone, Default)]
pub struct PolicyBundle {
    pub mrsigner: Option<[u8; 32]>,
    pub mrenclave: Option<[u8; 32]>,
    pub isv_prod_id: Option<u16>,
    pub isv_svn: Option<u16>,
    pub allow_outdated_tcb: bool,
    pub ias_pub_key_pem: Option<String>,
}

impl PolicyBundle {
    /// Load policy and IAS configuration from the environment, per §4.8.
    ///
    /// `RA_TLS_EPID_API_KEY` missing is a hard error; missing URLs fall
    /// back to the documented IAS endpoints; the boolean parses any value
    /// other than `"0"`, `"f"`, `"F"`, or unset as true.
    pub fn from_env() -> Result<(Self, IasConfig), RaTlsError> {
        let api_key = env::var(ENV_API_KEY).map_err(|_| RaTlsError::MissingApiKey)?;
        let report_url = env::var(ENV_REPORT_URL).unwrap_or_else(|_| DEFAULT_REPORT_URL.to_string());
        let sigrl_url = env::var(ENV_SIGRL_URL).unwrap_or_else(|_| DEFAULT_SIGRL_URL.to_string());

        let policy = Self {
            mrsigner: parse_optional_hex32(ENV_MRSIGNER)?,
            mrenclave: parse_optional_hex32(ENV_MRENCLAVE)?,
            isv_prod_id: parse_optional_u16(ENV_ISV_PROD_ID)?,
            isv_svn: parse_optional_u16(ENV_ISV_SVN)?,
            allow_outdated_tcb: parse_bool_env(ENV_ALLOW_OUTDATED_TCB),
            ias_pub_key_pem: env::var(ENV_IAS_PUB_KEY_PEM).ok(),
        };

        Ok((
            policy,
            IasConfig {
                api_key,
                report_url,
                sigrl_url,
            },
        ))
    }

    /// Load an additive policy file on top of (but not instead of) the
    /// environment-variable path above. Mirrors this workspace's
    /// `Config::load`/TOML-backed layering, for deployments that would
    /// rather check a config file into source control than set a handful
    /// of environment variables by hand.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, RaTlsError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RaTlsError::ConfigError(format!("could not read policy file: {e}")))?;
        let file: PolicyFile = toml::from_str(&contents)
            .map_err(|e| RaTlsError::ConfigError(format!("invalid policy file: {e}")))?;
        file.into_policy()
    }
}

/// On-disk shape of the additive TOML policy file; hex strings are decoded
/// the same way the environment-variable path decodes them.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    mrsigner: Option<String>,
    mrenclave: Option<String>,
    isv_prod_id: Option<u16>,
    isv_svn: Option<u16>,
    #[serde(default)]
    allow_outdated_tcb: bool,
    ias_pub_key_pem: Option<String>,
}

impl PolicyFile {
    fn into_policy(self) -> Result<PolicyBundle, RaTlsError> {
        Ok(PolicyBundle {
            mrsigner: self.mrsigner.map(|s| decode_hex32(&s)).transpose()?,
            mrenclave: self.mrenclave.map(|s| decode_hex32(&s)).transpose()?,
            isv_prod_id: self.isv_prod_id,
            isv_svn: self.isv_svn,
            allow_outdated_tcb: self.allow_outdated_tcb,
            ias_pub_key_pem: self.ias_pub_key_pem,
        })
    }
}

fn parse_bool_env(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => !matches!(value.as_str(), "0" | "f" | "F"),
        Err(_) => true,
    }
}

fn parse_optional_hex32(name: &str) -> Result<Option<[u8; 32]>, RaTlsError> {
    match env::var(name) {
        Ok(value) => decode_hex32(&value).map(Some),
        Err(_) => Ok(None),
    }
}

fn decode_hex32(value: &str) -> Result<[u8; 32], RaTlsError> {
    let bytes = hex::decode(value)
        .map_err(|e| RaTlsError::ConfigError(format!("malformed policy hex: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| RaTlsError::ConfigError("policy measurement must be 32 bytes".into()))
}

fn parse_optional_u16(name: &str) -> Result<Option<u16>, RaTlsError> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u16>()
            .map(Some)
            .map_err(|e| RaTlsError::ConfigError(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Validity window for a freshly-minted certificate, read the same way as
/// the rest of policy: environment variables with documented defaults.
pub fn cert_validity_from_env() -> Result<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>), RaTlsError> {
    let not_before = env::var(ENV_CERT_NOT_BEFORE).unwrap_or_else(|_| DEFAULT_CERT_NOT_BEFORE.to_string());
    let not_after = env::var(ENV_CERT_NOT_AFTER).unwrap_or_else(|_| DEFAULT_CERT_NOT_AFTER.to_string());
    Ok((parse_rfc3339(&not_before)?, parse_rfc3339(&not_after)?))
}

fn parse_rfc3339(value: &str) -> Result<chrono::DateTime<chrono::Utc>, RaTlsError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| RaTlsError::ConfigError(format!("invalid certificate timestamp {value:?}: {e}")))
}
