//! SGX quote structures and the QuoteProvider abstraction over the
//! platform's quoting interface.
//!
//! `SgxEnclaveReport`/`SgxQuote` parsing follows the fixed-offset layout an
//! SGX quoting enclave actually emits, trimmed to the EPID-only quote
//! versions (1 and 2) this crate's Non-goals keep in scope; DCAP/ECDSA
//! (version 3) is out of scope.

use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RaTlsError;

/// 64-byte field an SGX report carries to bind caller-chosen data (here, a
/// hash of the TLS public key) to the enclave measurement.
pub type ReportData = [u8; 64];

/// `sizeof(SgxEnclaveReport)` on the wire: offsets taken directly from the
/// Intel SGX architecture manual.
const ENCLAVE_REPORT_LEN: usize = 384;
const QUOTE_HEADER_LEN: usize = 48;

/// Body of an SGX report, overlaid from a quote. Only the fields RA-TLS's
/// policy checks need are kept; reserved regions are parsed and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgxEnclaveReport {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
    pub report_data: ReportData,
}

impl SgxEnclaveReport {
    fn parse_from(bytes: &[u8]) -> Result<Self, RaTlsError> {
        if bytes.len() != ENCLAVE_REPORT_LEN {
            return Err(RaTlsError::InvalidQuote("report body has the wrong size".into()));
        }
        let mut pos = 0usize;
        let mut take = |n: usize| -> &[u8] {
            let s = &bytes[pos..pos + n];
            pos += n;
            s
        };

        let _cpu_svn = take(16);
        let _misc_select = take(4);
        let _reserved1 = take(28);
        let _attributes = take(16);
        let mr_enclave = <[u8; 32]>::try_from(take(32)).unwrap();
        let _reserved2 = take(32);
        let mr_signer = <[u8; 32]>::try_from(take(32)).unwrap();
        let _reserved3 = take(96);
        let isv_prod_id = u16::from_le_bytes(take(2).try_into().unwrap());
        let isv_svn = u16::from_le_bytes(take(2).try_into().unwrap());
        let _reserved4 = take(60);
        let report_data = <[u8; 64]>::try_from(take(64)).unwrap();
        debug_assert_eq!(pos, bytes.len());

        Ok(Self {
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            report_data,
        })
    }
}

/// A parsed EPID SGX quote. Only the header fields needed to reach
/// `report_body` are exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SgxQuote {
    pub report_body: SgxEnclaveReport,
}

impl SgxQuote {
    /// Parse a quote blob, as produced by the platform's quoting enclave.
    ///
    /// Quotes smaller than the fixed EPID header plus report body are
    /// rejected outright, per the data model's invariant on minimum quote
    /// size.
    pub fn parse_from(bytes: &[u8]) -> Result<Self, RaTlsError> {
        if bytes.len() < QUOTE_HEADER_LEN + ENCLAVE_REPORT_LEN {
            return Err(RaTlsError::InvalidQuote("quote shorter than a report body".into()));
        }
        let report_body = SgxEnclaveReport::parse_from(
            &bytes[QUOTE_HEADER_LEN..QUOTE_HEADER_LEN + ENCLAVE_REPORT_LEN],
        )?;
        Ok(Self { report_body })
    }
}

/// Supplies a quote binding a caller-chosen `report_data` to the running
/// enclave's identity. Implementations drive the platform's quoting
/// enclave; the core crate only needs the contract that the returned blob,
/// parsed as a quote, carries back the same `report_data` it was given.
pub trait QuoteProvider {
    fn get_quote(&self, report_data: &ReportData) -> Result<Vec<u8>, RaTlsError>;
}

/// Models the platform's quoting interface the way Gramine/Graphene expose
/// it: write 64 bytes of report data to one pseudo-file, then read the
/// quote back from another. See `original_source`'s `ra_tls_attest.c`
/// (`write_file("/dev/attestation/report_data", ...)` /
/// `read_file("/dev/attestation/quote", ...)`).
pub struct PseudoFileQuoteProvider {
    attestation_dir: PathBuf,
}

impl PseudoFileQuoteProvider {
    /// Use the real Gramine pseudo-filesystem mount point.
    pub fn new() -> Self {
        Self {
            attestation_dir: PathBuf::from("/dev/attestation"),
        }
    }

    /// Point at an arbitrary directory, so tests can substitute a tempdir
    /// populated with canned fixture files instead of the real
    /// pseudo-filesystem.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            attestation_dir: dir.into(),
        }
    }
}

impl Default for PseudoFileQuoteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for PseudoFileQuoteProvider {
    fn get_quote(&self, report_data: &ReportData) -> Result<Vec<u8>, RaTlsError> {
        let report_data_path = self.attestation_dir.join("user_report_data");
        let quote_path = self.attestation_dir.join("quote");

        fs::write(&report_data_path, report_data).map_err(|e| {
            RaTlsError::QuotingUnavailable(format!(
                "could not write {}: {e}",
                report_data_path.display()
            ))
        })?;

        fs::read(&quote_path).map_err(|e| {
            RaTlsError::QuotingUnavailable(format!("could not read {}: {e}", quote_path.display()))
        })
    }
}

/// Test-only quote provider that synthesizes a well-formed EPID quote for a
/// given `report_data`, instead of talking to a real (or emulated)
/// quoting enclave. Used by the S1–S6 scenario tests.
#[cfg(any(test, feature = "testing"))]
pub struct MockQuoteProvider {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
}

#[cfg(any(test, feature = "testing"))]
impl MockQuoteProvider {
    pub fn new(mr_enclave: [u8; 32], mr_signer: [u8; 32], isv_prod_id: u16, isv_svn: u16) -> Self {
        Self {
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
        }
    }

    /// Build a fake-but-well-formed quote blob with the given report_data.
    pub fn synthesize(&self, report_data: &ReportData) -> Vec<u8> {
        let mut blob = vec![0u8; QUOTE_HEADER_LEN + ENCLAVE_REPORT_LEN];
        // EPID v2, linkable signature type, in the quote header.
        blob[0..2].copy_from_slice(&2u16.to_le_bytes());
        blob[2..4].copy_from_slice(&1u16.to_le_bytes());

        let body_off = QUOTE_HEADER_LEN;
        blob[body_off + 32..body_off + 64].copy_from_slice(&self.mr_enclave);
        blob[body_off + 96..body_off + 128].copy_from_slice(&self.mr_signer);
        blob[body_off + 304..body_off + 306].copy_from_slice(&self.isv_prod_id.to_le_bytes());
        blob[body_off + 306..body_off + 308].copy_from_slice(&self.isv_svn.to_le_bytes());
        blob[body_off + 368..body_off + 432].copy_from_slice(report_data);
        blob
    }
}

#[cfg(any(test, feature = "testing"))]
impl QuoteProvider for MockQuoteProvider {
    fn get_quote(&self, report_data: &ReportData) -> Result<Vec<u8>, RaTlsError> {
        Ok(self.synthesize(report_data))
    }
}

/// Helper used by tests that want to drive `PseudoFileQuoteProvider`
/// against a tempdir instead of `/dev/attestation`.
#[cfg(any(test, feature = "testing"))]
pub fn write_pseudo_quote_fixture(dir: &Path, quote: &[u8]) -> std::io::Result<()> {
    fs::write(dir.join("quote"), quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_quote() {
        let err = SgxQuote::parse_from(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, RaTlsError::InvalidQuote(_)));
    }

    #[test]
    fn mock_quote_round_trips_report_data() {
        let provider = MockQuoteProvider::new([1u8; 32], [2u8; 32], 7, 9);
        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[0xAB; 32]);
        let blob = provider.synthesize(&report_data);
        let quote = SgxQuote::parse_from(&blob).unwrap();
        assert_eq!(quote.report_body.report_data, report_data);
        assert_eq!(quote.report_body.mr_enclave, [1u8; 32]);
        assert_eq!(quote.report_body.mr_signer, [2u8; 32]);
        assert_eq!(quote.report_body.isv_prod_id, 7);
        assert_eq!(quote.report_body.isv_svn, 9);
    }
}
