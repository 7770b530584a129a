//! IAS attestation report verification: the six-step pipeline that checks a
//! report's signature, nonce, quote status, and measurements against
//! policy. Grounded in `original_source`'s `ra_tls_verify.c`
//! (`verify_ias_report`, `cmp_crt_pk_against_quote_report_data`), for the
//! general shape of "parse report JSON, check signature, check fields".

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier as _;
use rsa::RsaPublicKey;
use sha2::Sha256;

use crate::error::RaTlsError;
use crate::ias::IasReportBody;
use crate::policy::PolicyBundle;
use crate::quote::{ReportData, SgxQuote};

/// Placeholder for Intel's published IAS report-signing public key, used
/// only when `policy.ias_pub_key_pem` is unset. Real deployments should
/// always set `RA_TLS_IAS_PUB_KEY_PEM` (or `PolicyBundle.ias_pub_key_pem`)
/// to the certificate IAS actually signs with; this constant exists so the
/// fallback path in §4.6 step 1 has somewhere to read from.
pub const DEFAULT_IAS_PUB_KEY_PEM: &str = include_str!("../assets/ias_report_signing_key.pem");

/// Quote statuses that proceed only when the policy allows an outdated TCB.
const OUTDATED_TCB_STATUSES: &[&str] = &[
    "GROUP_OUT_OF_DATE",
    "CONFIGURATION_NEEDED",
    "SW_HARDENING_NEEDED",
    "CONFIGURATION_AND_SW_HARDENING_NEEDED",
];

/// Verifies one IAS attestation report against a policy and the
/// report_data the caller expects to see bound into the quote.
pub struct ReportVerifier;

impl ReportVerifier {
    /// Run the full pipeline. `report_bytes` and `signature` are exactly
    /// what `IasClient::submit` returned; `submitted_quote` is the quote
    /// bytes the caller sent to IAS, cross-checked against what IAS echoes
    /// back (see step 4 below).
    pub fn verify(
        report_bytes: &[u8],
        signature: &[u8],
        nonce: &str,
        policy: &PolicyBundle,
        expected_report_data: &ReportData,
        submitted_quote: &[u8],
    ) -> Result<(), RaTlsError> {
        // Step 1: signature, over the exact report bytes.
        verify_report_signature(report_bytes, signature, policy.ias_pub_key_pem.as_deref())?;

        let report: IasReportBody = serde_json::from_slice(report_bytes)
            .map_err(|e| RaTlsError::IasUnavailable(format!("malformed IAS report JSON: {e}")))?;

        // Step 2: nonce echo.
        if report.nonce.as_deref() != Some(nonce) {
            return Err(RaTlsError::NonceMismatch);
        }

        // Step 3: quote status.
        match report.isv_enclave_quote_status.as_str() {
            "OK" => {}
            status if OUTDATED_TCB_STATUSES.contains(&status) => {
                log::warn!("quote status {status} (advisories: {:?})", report.advisory_ids);
                if !policy.allow_outdated_tcb {
                    return Err(RaTlsError::TcbOutdated {
                        advisory_ids: report.advisory_ids.clone(),
                    });
                }
            }
            status => {
                return Err(RaTlsError::QuoteRevoked(status.to_string()));
            }
        }

        // Step 4: quote body binding.
        let quote_body_bytes = base64::decode(&report.isv_enclave_quote_body)
            .map_err(|e| RaTlsError::IasUnavailable(format!("malformed isvEnclaveQuoteBody: {e}")))?;

        // The original verifier this was ported from only ever inspected the
        // quote bytes living inside the peer's certificate, never checking
        // that IAS echoed back the same quote it was asked to judge. Require
        // the two to agree byte-for-byte.
        if quote_body_bytes != submitted_quote {
            return Err(RaTlsError::ReportDataMismatch);
        }

        let quote = SgxQuote::parse_from(&quote_body_bytes)?;
        let body = &quote.report_body;

        if body.report_data[..32] != expected_report_data[..32] {
            return Err(RaTlsError::ReportDataMismatch);
        }
        if let Some(mrsigner) = policy.mrsigner {
            if body.mr_signer != mrsigner {
                return Err(RaTlsError::MrsignerMismatch);
            }
        }
        if let Some(mrenclave) = policy.mrenclave {
            if body.mr_enclave != mrenclave {
                return Err(RaTlsError::MrenclaveMismatch);
            }
        }
        if let Some(isv_prod_id) = policy.isv_prod_id {
            if body.isv_prod_id != isv_prod_id {
                return Err(RaTlsError::IsvProdIdMismatch);
            }
        }
        if let Some(isv_svn) = policy.isv_svn {
            if body.isv_svn < isv_svn {
                return Err(RaTlsError::IsvSvnTooLow);
            }
        }

        Ok(())
    }
}

fn verify_report_signature(
    report_bytes: &[u8],
    signature: &[u8],
    ias_pub_key_pem: Option<&str>,
) -> Result<(), RaTlsError> {
    let pem = ias_pub_key_pem.unwrap_or(DEFAULT_IAS_PUB_KEY_PEM);
    let public_key = RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| RaTlsError::ConfigError(format!("invalid IAS public key: {e}")))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature = Signature::try_from(signature).map_err(|_| RaTlsError::BadReportSignature)?;
    verifying_key
        .verify(report_bytes, &signature)
        .map_err(|_| RaTlsError::BadReportSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;

    fn signed_report(body: &serde_json::Value, signing_key: &RsaPrivateKey) -> (Vec<u8>, Vec<u8>) {
        let bytes = serde_json::to_vec(body).unwrap();
        let signer = SigningKey::<Sha256>::new(signing_key.clone());
        let sig = signer.sign(&bytes);
        (bytes, sig.to_vec())
    }

    fn test_quote_with(
        mr_enclave: [u8; 32],
        mr_signer: [u8; 32],
        isv_prod_id: u16,
        isv_svn: u16,
        report_data: ReportData,
    ) -> Vec<u8> {
        crate::quote::MockQuoteProvider::new(mr_enclave, mr_signer, isv_prod_id, isv_svn)
            .synthesize(&report_data)
    }

    #[test]
    fn happy_path_accepts_matching_report() {
        let mut rng = OsRng;
        let signing_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = signing_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[7u8; 32]);
        let quote = test_quote_with([1u8; 32], [2u8; 32], 5, 9, report_data);

        let body = serde_json::json!({
            "nonce": "deadbeef",
            "isvEnclaveQuoteStatus": "OK",
            "isvEnclaveQuoteBody": base64::encode(&quote),
        });
        let (report_bytes, signature) = signed_report(&body, &signing_key);

        let policy = PolicyBundle {
            ias_pub_key_pem: Some(pem),
            ..Default::default()
        };

        ReportVerifier::verify(&report_bytes, &signature, "deadbeef", &policy, &report_data, &quote)
            .expect("matching report should verify");
    }

    #[test]
    fn nonce_mismatch_is_rejected() {
        let mut rng = OsRng;
        let signing_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = signing_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[7u8; 32]);
        let quote = test_quote_with([1u8; 32], [2u8; 32], 5, 9, report_data);

        let body = serde_json::json!({
            "nonce": "stale-nonce",
            "isvEnclaveQuoteStatus": "OK",
            "isvEnclaveQuoteBody": base64::encode(&quote),
        });
        let (report_bytes, signature) = signed_report(&body, &signing_key);

        let policy = PolicyBundle {
            ias_pub_key_pem: Some(pem),
            ..Default::default()
        };

        let err = ReportVerifier::verify(&report_bytes, &signature, "fresh-nonce", &policy, &report_data, &quote)
            .unwrap_err();
        assert!(matches!(err, RaTlsError::NonceMismatch));
    }

    #[test]
    fn outdated_tcb_respects_policy_flag() {
        let mut rng = OsRng;
        let signing_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = signing_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[7u8; 32]);
        let quote = test_quote_with([1u8; 32], [2u8; 32], 5, 9, report_data);

        let body = serde_json::json!({
            "nonce": "n1",
            "isvEnclaveQuoteStatus": "GROUP_OUT_OF_DATE",
            "isvEnclaveQuoteBody": base64::encode(&quote),
            "advisoryIDs": ["INTEL-SA-00000"],
        });
        let (report_bytes, signature) = signed_report(&body, &signing_key);

        let strict_policy = PolicyBundle {
            ias_pub_key_pem: Some(pem.clone()),
            allow_outdated_tcb: false,
            ..Default::default()
        };
        let err = ReportVerifier::verify(&report_bytes, &signature, "n1", &strict_policy, &report_data, &quote)
            .unwrap_err();
        assert!(matches!(err, RaTlsError::TcbOutdated { .. }));

        let lenient_policy = PolicyBundle {
            ias_pub_key_pem: Some(pem),
            allow_outdated_tcb: true,
            ..Default::default()
        };
        ReportVerifier::verify(&report_bytes, &signature, "n1", &lenient_policy, &report_data, &quote)
            .expect("allow_outdated_tcb=true should accept");
    }

    #[test]
    fn mrenclave_mismatch_is_rejected() {
        let mut rng = OsRng;
        let signing_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = signing_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[7u8; 32]);
        let quote = test_quote_with([1u8; 32], [2u8; 32], 5, 9, report_data);

        let body = serde_json::json!({
            "nonce": "n1",
            "isvEnclaveQuoteStatus": "OK",
            "isvEnclaveQuoteBody": base64::encode(&quote),
        });
        let (report_bytes, signature) = signed_report(&body, &signing_key);

        let policy = PolicyBundle {
            ias_pub_key_pem: Some(pem),
            mrenclave: Some([0xffu8; 32]),
            ..Default::default()
        };
        let err = ReportVerifier::verify(&report_bytes, &signature, "n1", &policy, &report_data, &quote)
            .unwrap_err();
        assert!(matches!(err, RaTlsError::MrenclaveMismatch));
    }

    #[test]
    fn replayed_quote_body_mismatching_submission_is_rejected() {
        let mut rng = OsRng;
        let signing_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pem = signing_key
            .to_public_key()
            .to_public_key_pem(Default::default())
            .unwrap();

        let mut report_data = [0u8; 64];
        report_data[..32].copy_from_slice(&[7u8; 32]);
        let quote = test_quote_with([1u8; 32], [2u8; 32], 5, 9, report_data);
        let different_submission = test_quote_with([9u8; 32], [9u8; 32], 1, 1, report_data);

        let body = serde_json::json!({
            "nonce": "n1",
            "isvEnclaveQuoteStatus": "OK",
            "isvEnclaveQuoteBody": base64::encode(&quote),
        });
        let (report_bytes, signature) = signed_report(&body, &signing_key);

        let policy = PolicyBundle {
            ias_pub_key_pem: Some(pem),
            ..Default::default()
        };
        let err = ReportVerifier::verify(
            &report_bytes,
            &signature,
            "n1",
            &policy,
            &report_data,
            &different_submission,
        )
        .unwrap_err();
        assert!(matches!(err, RaTlsError::ReportDataMismatch));
    }
}
