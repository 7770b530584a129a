//! Error discriminants returned by RA-TLS's public operations.
//!
//! Every public function returns exactly one of these variants on failure.
//! Nothing is retried inside the library (see the crate's concurrency
//! notes); a caller that wants retries wraps the call itself.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RaTlsError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("RA_TLS_EPID_API_KEY is not set")]
    MissingApiKey,

    #[error("key is not a 3072-bit RSA key with public exponent 3")]
    UnsupportedKey,

    #[error("quoting unavailable: {0}")]
    QuotingUnavailable(String),

    #[error("certificate does not carry a quote extension")]
    ExtensionMissing,

    #[error("quote extension is malformed: {0}")]
    ExtensionMalformed(String),

    #[error("quote blob is invalid: {0}")]
    InvalidQuote(String),

    #[error("certificate public key does not match quote report_data")]
    ReportDataMismatch,

    #[error("could not reach Intel Attestation Service: {0}")]
    IasUnavailable(String),

    #[error("Intel Attestation Service rejected the request (HTTP {status})")]
    IasRejected { status: u16 },

    #[error("IAS attestation report signature is invalid")]
    BadReportSignature,

    #[error("IAS attestation report nonce does not match the submitted nonce")]
    NonceMismatch,

    #[error("platform TCB is outdated (advisories: {advisory_ids:?})")]
    TcbOutdated { advisory_ids: Vec<String> },

    #[error("quote was revoked by IAS: {0}")]
    QuoteRevoked(String),

    #[error("enclave signer (MRSIGNER) does not match policy")]
    MrsignerMismatch,

    #[error("enclave measurement (MRENCLAVE) does not match policy")]
    MrenclaveMismatch,

    #[error("ISV product ID does not match policy")]
    IsvProdIdMismatch,

    #[error("ISV SVN is lower than policy requires")]
    IsvSvnTooLow,
}
