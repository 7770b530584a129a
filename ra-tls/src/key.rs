//! RSA-3072 key handling: generation, DER export and the canonical public
//! key hash that ties a certificate's key to its embedded quote.
//!
//! Mirrors the ECDSA key handling elsewhere in this workspace's attestation stack, but RSA instead
//! of ECDSA: RA-TLS's attester side always generates a fresh 3072-bit RSA
//! key with public exponent 3.

use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::RaTlsError;

/// Length in bits of the RSA modulus RA-TLS generates and accepts.
pub const RSA_KEY_BITS: usize = 3072;

/// Public exponent RA-TLS generates and accepts. Fixed at 3, as mandated by
/// the data model.
pub const RSA_PUB_EXPONENT: u32 = 3;

/// Length, in bytes, of the DER-encoded SubjectPublicKeyInfo of an
/// `RSA_KEY_BITS`/`RSA_PUB_EXPONENT` key: a 15-byte `rsaEncryption`
/// AlgorithmIdentifier, a 385-byte modulus `INTEGER` (384 bytes plus the
/// leading zero required because the modulus's top bit is set), and a
/// 3-byte exponent `INTEGER` for `e = 3`, wrapped in a BIT STRING and outer
/// SEQUENCE. This is part of the interface contract: the report_data hash
/// domain depends on hashing exactly this many bytes, so both attester and
/// verifier must agree on it byte-for-byte.
pub const RSA_PUB_3072_KEY_DER_LEN: usize = 420;

/// A generated RSA-3072/e=3 key pair, used to sign and to embed in an
/// RA-TLS certificate.
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
}

impl RsaKeyPair {
    /// Generate a fresh key pair using the given source of cryptographic
    /// randomness (the quoting-unrelated "RSA primitives" collaborator is
    /// the `rsa` crate here; see DESIGN.md for why `ring`, which cannot
    /// generate RSA keys, isn't used for this step).
    pub fn generate(rng: &mut (impl rand_core::CryptoRng + rand_core::RngCore)) -> Result<Self, RaTlsError> {
        let exp = BigUint::from(RSA_PUB_EXPONENT);
        let private_key = RsaPrivateKey::new_with_exp(rng, RSA_KEY_BITS, &exp)
            .map_err(|e| RaTlsError::ConfigError(format!("RSA key generation failed: {e}")))?;
        let pair = Self { private_key };
        // Fail fast if the chosen backend doesn't produce the canonical SPKI
        // length we rely on everywhere else; this also validates any key
        // constructed through `from_private_key`.
        let spki_len = pair.public_key_der()?.len();
        if spki_len != RSA_PUB_3072_KEY_DER_LEN {
            return Err(RaTlsError::UnsupportedKey);
        }
        Ok(pair)
    }

    /// Wrap an already-generated RSA private key, validating its shape.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, RaTlsError> {
        let pair = Self { private_key };
        if pair.public_key_der()?.len() != RSA_PUB_3072_KEY_DER_LEN {
            return Err(RaTlsError::UnsupportedKey);
        }
        Ok(pair)
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// DER-encoded SubjectPublicKeyInfo of the public key. This is the byte
    /// sequence that `hash_pubkey` hashes and that gets embedded verbatim
    /// in the certificate.
    pub fn public_key_der(&self) -> Result<Vec<u8>, RaTlsError> {
        public_key_der(&self.public_key())
    }

    /// DER-encoded PKCS#1 `RSAPrivateKey`, the format the attester's
    /// DER-out entry point hands back to callers.
    pub fn private_key_der(&self) -> Result<Vec<u8>, RaTlsError> {
        self.private_key
            .to_pkcs1_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| RaTlsError::ConfigError(format!("could not encode private key: {e}")))
    }

    /// Sign `msg` with RSASSA-PKCS1-v1_5 using SHA-256, as required for the
    /// certificate's self-signature.
    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, RaTlsError> {
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key.try_sign(msg).map_err(|e| {
            RaTlsError::ConfigError(format!("certificate self-signature failed: {e}"))
        })?;
        Ok(signature.to_vec())
    }
}

/// DER-encoded SubjectPublicKeyInfo of an arbitrary RSA public key, used on
/// both the attester side (own key) and verifier side (peer's key, taken
/// straight out of the parsed certificate).
pub fn public_key_der(key: &RsaPublicKey) -> Result<Vec<u8>, RaTlsError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| RaTlsError::ConfigError(format!("could not encode public key: {e}")))
}

/// SHA-256 over a key's DER SubjectPublicKeyInfo, rejecting any key whose
/// encoding isn't exactly `RSA_PUB_3072_KEY_DER_LEN` bytes long. This
/// implicitly enforces the 3072-bit/e=3 requirement: only that key shape
/// serializes to the expected length, so attester and verifier are
/// guaranteed to hash an identical byte sequence whenever this succeeds.
pub fn hash_pubkey(pubkey_der: &[u8]) -> Result<[u8; 32], RaTlsError> {
    if pubkey_der.len() != RSA_PUB_3072_KEY_DER_LEN {
        return Err(RaTlsError::UnsupportedKey);
    }
    let digest = Sha256::digest(pubkey_der);
    Ok(digest.into())
}
