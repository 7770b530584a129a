//! Remote Attestation over TLS (RA-TLS) for Intel SGX enclaves.
//!
//! An attester (running inside an enclave) generates an RSA key, obtains an
//! EPID quote binding that key to the enclave's identity, and embeds the
//! quote in a self-signed X.509 certificate. A verifier (running on the
//! peer) parses that certificate, recovers the quote, validates it against
//! Intel's Attestation Service, and checks the result against a policy of
//! acceptable enclave measurements.
//!
//! ```no_run
//! use ra_tls::attester;
//! use ra_tls::quote::PseudoFileQuoteProvider;
//!
//! let quote_provider = PseudoFileQuoteProvider::new();
//! let identity = attester::create_key_and_crt_owned(&quote_provider)?;
//! # Ok::<(), ra_tls::error::RaTlsError>(())
//! ```

pub mod attester;
pub mod cert;
pub mod der;
pub mod error;
pub mod ias;
pub mod key;
pub mod policy;
pub mod quote;
pub mod report;
pub mod verifier;

pub use error::RaTlsError;
pub use policy::PolicyBundle;
pub use verifier::{verify_callback, verify_callback_der};
