//! Blocking HTTP client for Intel's Attestation Service, replacing the
//! original C verifier's libcurl calls (`ra_tls_verify.c`'s
//! `getenv_report_url`/`getenv_sigrl_url` consumers) with `reqwest`, already
//! part of this workspace's dependency set.

use std::io::Read;

use percent_encoding::percent_decode_str;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::RaTlsError;
use crate::policy::IasConfig;

const HEADER_SUBSCRIPTION_KEY: &str = "Ocp-Apim-Subscription-Key";
const HEADER_REPORT_SIGNATURE: &str = "X-IASReport-Signature";
const HEADER_SIGNING_CERTIFICATE: &str = "X-IASReport-Signing-Certificate";

/// Everything IAS hands back for one `submit` call: the raw report bytes
/// (kept as bytes, not a parsed struct, since the signature is computed
/// over the exact wire representation), the detached signature, and the
/// signing certificate chain.
#[derive(Debug, Clone)]
pub struct IasResponse {
    pub report_bytes: Vec<u8>,
    pub signature: Vec<u8>,
    pub signing_certificate_chain_pem: String,
}

#[derive(Serialize)]
struct ReportRequest<'a> {
    #[serde(rename = "isvEnclaveQuote")]
    isv_enclave_quote: &'a str,
    nonce: &'a str,
}

/// Generates a fresh 32-character hex nonce from 16 bytes of OS randomness
/// and submits quotes to IAS's report endpoint.
pub struct IasClient {
    config: IasConfig,
    http: reqwest::blocking::Client,
}

impl IasClient {
    pub fn new(config: IasConfig) -> Result<Self, RaTlsError> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| RaTlsError::IasUnavailable(format!("could not build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    /// A fresh 32-character hex nonce, generated from 16 bytes of
    /// cryptographically strong randomness. Every verification call must
    /// get its own: this is what S3's replay scenario checks against.
    pub fn generate_nonce() -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// POST the quote and nonce to the configured report URL, authenticated
    /// with the EPID API key header.
    pub fn submit(&self, quote: &[u8], nonce: &str) -> Result<IasResponse, RaTlsError> {
        let body = ReportRequest {
            isv_enclave_quote: &base64::encode(quote),
            nonce,
        };

        let response = self
            .http
            .post(&self.config.report_url)
            .header(HEADER_SUBSCRIPTION_KEY, &self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| RaTlsError::IasUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RaTlsError::IasRejected {
                status: status.as_u16(),
            });
        }

        let signature_b64 = header_str(&response, HEADER_REPORT_SIGNATURE)?;
        let signature = base64::decode(signature_b64)
            .map_err(|e| RaTlsError::IasUnavailable(format!("malformed report signature: {e}")))?;

        let cert_chain_encoded = header_str(&response, HEADER_SIGNING_CERTIFICATE)?;
        let signing_certificate_chain_pem = percent_decode_str(&cert_chain_encoded)
            .decode_utf8()
            .map_err(|e| RaTlsError::IasUnavailable(format!("malformed signing certificate header: {e}")))?
            .into_owned();

        let report_bytes = response
            .bytes()
            .map_err(|e| RaTlsError::IasUnavailable(format!("could not read report body: {e}")))?
            .to_vec();

        Ok(IasResponse {
            report_bytes,
            signature,
            signing_certificate_chain_pem,
        })
    }

    /// GET the revocation list for an EPID group. Supported for protocol
    /// completeness (§6) but its result is not consulted by
    /// `ReportVerifier`, matching the documented scope of the present core.
    pub fn fetch_sigrl(&self, epid_group_id: &str) -> Result<Vec<u8>, RaTlsError> {
        let url = format!("{}/{epid_group_id}", self.config.sigrl_url.trim_end_matches('/'));
        let mut response = self
            .http
            .get(&url)
            .header(HEADER_SUBSCRIPTION_KEY, &self.config.api_key)
            .send()
            .map_err(|e| RaTlsError::IasUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RaTlsError::IasRejected {
                status: response.status().as_u16(),
            });
        }
        let mut buf = Vec::new();
        response
            .read_to_end(&mut buf)
            .map_err(|e| RaTlsError::IasUnavailable(format!("could not read sigrl body: {e}")))?;
        Ok(buf)
    }
}

fn header_str(response: &reqwest::blocking::Response, name: &str) -> Result<String, RaTlsError> {
    response
        .headers()
        .get(name)
        .ok_or_else(|| RaTlsError::IasUnavailable(format!("missing {name} header")))?
        .to_str()
        .map(str::to_string)
        .map_err(|e| RaTlsError::IasUnavailable(format!("malformed {name} header: {e}")))
}

/// IAS's JSON report document, deserialized just enough to drive
/// `ReportVerifier`. Extra fields (epidPseudonym, etc.) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IasReportBody {
    pub nonce: Option<String>,
    #[serde(rename = "isvEnclaveQuoteStatus")]
    pub isv_enclave_quote_status: String,
    #[serde(rename = "isvEnclaveQuoteBody")]
    pub isv_enclave_quote_body: String,
    #[serde(rename = "advisoryIDs", default)]
    pub advisory_ids: Vec<String>,
    #[serde(rename = "platformInfoBlob")]
    pub platform_info_blob: Option<String>,
}
