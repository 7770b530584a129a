//! Attester-side entry points: generate a key, get a quote for it, and
//! build the self-signed certificate that carries both.
//!
//! Grounded in `original_source`'s `ra_tls_attest.c`
//! (`ra_tls_create_key_and_crt`, `ra_tls_create_key_and_crt_der`): same
//! control flow (`generate key -> hash pubkey -> get_quote -> build cert`),
//! same two-valued "write required size" contract on the DER-out entry
//! point, reproduced here because callers embedding this crate into an
//! existing C-shaped FFI boundary depend on it.

use rand_core::OsRng;

use crate::cert::CertBuilder;
use crate::error::RaTlsError;
use crate::key::{hash_pubkey, RsaKeyPair};
use crate::policy::cert_validity_from_env;
use crate::quote::{QuoteProvider, ReportData};

/// A freshly generated key paired with its self-signed, quote-carrying
/// certificate. The idiomatic, owned-buffer entry point: prefer this one
/// unless the caller is bridging into a fixed-capacity-buffer FFI surface,
/// in which case use [`create_key_and_crt_der`].
pub struct AttestedIdentity {
    pub key_pair: RsaKeyPair,
    pub certificate_der: Vec<u8>,
}

/// `generate RSA key -> hash(pubkey) -> QuoteProvider(hash) -> CertBuilder(key, quote) -> DER certificate`.
pub fn create_key_and_crt_owned(quote_provider: &dyn QuoteProvider) -> Result<AttestedIdentity, RaTlsError> {
    create_key_and_crt_owned_inner(quote_provider).map_err(|e| {
        log::error!("create_key_and_crt_owned: {e}");
        e
    })
}

fn create_key_and_crt_owned_inner(quote_provider: &dyn QuoteProvider) -> Result<AttestedIdentity, RaTlsError> {
    let mut rng = OsRng;
    let key_pair = RsaKeyPair::generate(&mut rng)?;

    let pub_key_der = key_pair.public_key_der()?;
    let hash = hash_pubkey(&pub_key_der)?;
    let mut report_data: ReportData = [0u8; 64];
    report_data[..32].copy_from_slice(&hash);

    let quote = quote_provider.get_quote(&report_data)?;
    let (not_before, not_after) = cert_validity_from_env()?;
    let certificate_der = CertBuilder::new(&key_pair, &quote, not_before, not_after).build_der()?;

    Ok(AttestedIdentity {
        key_pair,
        certificate_der,
    })
}

/// Same pipeline, returning the private key DER and the certificate DER as
/// two separate owned buffers, for callers that want a key handle and a
/// certificate handle rather than one bundled value.
pub fn create_key_and_crt(quote_provider: &dyn QuoteProvider) -> Result<(Vec<u8>, Vec<u8>), RaTlsError> {
    let identity = create_key_and_crt_owned(quote_provider)?;
    let key_der = identity.key_pair.private_key_der()?;
    Ok((key_der, identity.certificate_der))
}

/// DER-out variant preserving the original C entry point's buffer-sizing
/// contract: if `der_key_cap`/`der_crt_cap` are smaller than required, the
/// required sizes are written back into `*der_key_cap`/`*der_crt_cap` and
/// the function returns `Ok(false)` (nothing copied, try again with a
/// bigger buffer). When capacity suffices, DER bytes are copied in and the
/// function returns `Ok(true)`.
///
/// This two-valued protocol is preserved only because it is the documented
/// external interface; new code should prefer
/// [`create_key_and_crt_owned`], whose buffer is sized internally and
/// returned left-justified, eliminating the right-to-left pointer
/// arithmetic the C implementation relies on.
pub fn create_key_and_crt_der(
    quote_provider: &dyn QuoteProvider,
    der_key_out: &mut [u8],
    der_key_cap: &mut usize,
    der_crt_out: &mut [u8],
    der_crt_cap: &mut usize,
) -> Result<bool, RaTlsError> {
    let (key_der, crt_der) = create_key_and_crt(quote_provider)?;

    let key_fits = key_der.len() <= *der_key_cap;
    let crt_fits = crt_der.len() <= *der_crt_cap;

    if !key_fits || !crt_fits {
        *der_key_cap = key_der.len();
        *der_crt_cap = crt_der.len();
        return Ok(false);
    }

    der_key_out[..key_der.len()].copy_from_slice(&key_der);
    der_crt_out[..crt_der.len()].copy_from_slice(&crt_der);
    *der_key_cap = key_der.len();
    *der_crt_cap = crt_der.len();
    Ok(true)
}
