//! X.509 v3 self-signed certificate construction (attester side) and the
//! minimal parsing needed to pull a SubjectPublicKeyInfo and a quote
//! extension back out of one (verifier side).
//!
//! Construction follows the `create_cert_with_extension` style already in use
//! (`asn1_seq!`-built TBSCertificate, yasna writer); the byte-level
//! extension encoding and the fixed subject/serial/validity follow
//! `create_x509`/`generate_x509` in `original_source`'s `ra_tls_attest.c`.

use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use yasna::models::ObjectIdentifier;
use yasna::{construct_der, DERWriter, Tag};

use crate::der::{self, Tlv};
use crate::error::RaTlsError;
use crate::key::{hash_pubkey, public_key_der, RsaKeyPair};

/// DER encoding of the RA-TLS quote extension's OID, `1.2.840.113741.1337.6`
/// (Intel's enterprise arc, SGX RA-TLS branch). Computed by hand once and
/// pinned here since nothing else in the crate needs the general OID writer.
pub const QUOTE_OID_ARCS: &[u64] = &[1, 2, 840, 113741, 1337, 6];
pub const QUOTE_OID_DER: [u8; 11] = [0x06, 0x09, 0x2A, 0x86, 0x48, 0x86, 0xF8, 0x4D, 0x8A, 0x39, 0x06];

const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];
const OID_ORGANIZATION_NAME: &[u64] = &[2, 5, 4, 10];
const OID_COUNTRY_NAME: &[u64] = &[2, 5, 4, 6];
const OID_BASIC_CONSTRAINTS: &[u64] = &[2, 5, 29, 19];
const OID_SUBJECT_KEY_IDENTIFIER: &[u64] = &[2, 5, 29, 14];
const OID_AUTHORITY_KEY_IDENTIFIER: &[u64] = &[2, 5, 29, 35];
const OID_SHA256_WITH_RSA: &[u64] = &[1, 2, 840, 113549, 1, 1, 11];

/// Builds the attester's self-signed certificate: a standard X.509 v3
/// structure whose only non-standard feature is a single non-critical
/// extension carrying the raw quote bytes.
pub struct CertBuilder<'a> {
    key_pair: &'a RsaKeyPair,
    quote: &'a [u8],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl<'a> CertBuilder<'a> {
    pub fn new(
        key_pair: &'a RsaKeyPair,
        quote: &'a [u8],
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self {
            key_pair,
            quote,
            not_before,
            not_after,
        }
    }

    /// Assemble and self-sign the certificate, returning its DER encoding.
    pub fn build_der(&self) -> Result<Vec<u8>, RaTlsError> {
        let pub_key_der = self.key_pair.public_key_der()?;
        let tbs = self.build_tbs_der(&pub_key_der)?;
        let signature = self.key_pair.sign(&tbs)?;

        Ok(construct_der(|writer| {
            writer.write_sequence(|writer| {
                writer.next().write_der(&tbs);
                write_rsa_sha256_algorithm(writer.next());
                writer
                    .next()
                    .write_bitvec(&bit_vec::BitVec::from_bytes(&signature));
            });
        }))
    }

    fn build_tbs_der(&self, pub_key_der: &[u8]) -> Result<Vec<u8>, RaTlsError> {
        let key_id = hash_pubkey(pub_key_der)?[..20].to_vec();
        let quote = self.quote.to_vec();
        let not_before = self.not_before;
        let not_after = self.not_after;
        let pub_key_der = pub_key_der.to_vec();

        Ok(construct_der(|writer| {
            writer.write_sequence(|writer| {
                // [0] version = v3 (2)
                writer.next().write_tagged(Tag::context(0), |writer| {
                    writer.write_u8(2);
                });
                // serialNumber: fixed at 1, per the data model.
                writer.next().write_u8(1);
                // signature algorithm (repeated in the TBS per RFC 5280)
                write_rsa_sha256_algorithm(writer.next());
                // issuer: CN=RA-TLS,O=Graphene Developers,C=US
                writer.next().write_der(&ra_tls_name_der());
                // validity
                writer.next().write_sequence(|writer| {
                    writer
                        .next()
                        .write_utctime(&yasna::models::UTCTime::from_datetime(&not_before));
                    writer
                        .next()
                        .write_utctime(&yasna::models::UTCTime::from_datetime(&not_after));
                });
                // subject: identical to issuer, self-signed
                writer.next().write_der(&ra_tls_name_der());
                // subjectPublicKeyInfo, copied verbatim from the key pair
                writer.next().write_der(&pub_key_der);
                // [3] extensions
                writer.next().write_tagged(Tag::context(3), |writer| {
                    writer.write_sequence(|writer| {
                        write_basic_constraints_extension(writer.next());
                        write_key_identifier_extension(writer.next(), OID_SUBJECT_KEY_IDENTIFIER, &key_id);
                        write_authority_key_identifier_extension(writer.next(), &key_id);
                        write_quote_extension(writer.next(), &quote);
                    });
                });
            });
        }))
    }
}

/// `CN=RA-TLS,O=Graphene Developers,C=US`, the fixed subject/issuer name
/// the data model mandates for both sides of the self-signed certificate.
fn ra_tls_name_der() -> Vec<u8> {
    construct_der(|writer| {
        writer.write_sequence(|writer| {
            write_rdn(writer.next(), OID_COMMON_NAME, "RA-TLS");
            write_rdn(writer.next(), OID_ORGANIZATION_NAME, "Graphene Developers");
            write_rdn(writer.next(), OID_COUNTRY_NAME, "US");
        });
    })
}

fn write_rdn(writer: DERWriter, oid_arcs: &[u64], value: &str) {
    writer.write_set(|writer| {
        writer.next().write_sequence(|writer| {
            writer.next().write_oid(&ObjectIdentifier::from_slice(oid_arcs));
            writer.next().write_utf8_string(value);
        });
    });
}

fn write_rsa_sha256_algorithm(writer: DERWriter) {
    writer.write_sequence(|writer| {
        writer
            .next()
            .write_oid(&ObjectIdentifier::from_slice(OID_SHA256_WITH_RSA));
        writer.next().write_null();
    });
}

fn write_basic_constraints_extension(writer: DERWriter) {
    let inner = construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_bool(false);
        });
    });
    writer.write_sequence(|writer| {
        writer
            .next()
            .write_oid(&ObjectIdentifier::from_slice(OID_BASIC_CONSTRAINTS));
        writer.next().write_bool(true);
        writer.next().write_bytes(&inner);
    });
}

fn write_key_identifier_extension(writer: DERWriter, oid_arcs: &[u64], key_id: &[u8]) {
    writer.write_sequence(|writer| {
        writer.next().write_oid(&ObjectIdentifier::from_slice(oid_arcs));
        writer.next().write_bytes(key_id);
    });
}

fn write_authority_key_identifier_extension(writer: DERWriter, key_id: &[u8]) {
    // AuthorityKeyIdentifier ::= SEQUENCE { keyIdentifier [0] IMPLICIT OCTET STRING }
    let inner = construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_tagged_implicit(Tag::context(0), |writer| {
                writer.write_bytes(key_id);
            });
        });
    });
    writer.write_sequence(|writer| {
        writer
            .next()
            .write_oid(&ObjectIdentifier::from_slice(OID_AUTHORITY_KEY_IDENTIFIER));
        writer.next().write_bytes(&inner);
    });
}

/// Write the single RA-TLS Extension: `{ extnID, critical=false, extnValue }`
/// where `extnValue` is an OCTET STRING wrapping the raw quote bytes.
///
/// Written by hand (rather than through yasna's length inference) so the
/// OCTET STRING's length octets always land in definite long form with
/// exactly two length bytes, matching what the verifier's strict-format
/// check expects to find.
fn write_quote_extension(writer: DERWriter, quote: &[u8]) {
    let inner = build_octet_string_0x82(quote);
    writer.write_sequence(|writer| {
        writer.next().write_der(&QUOTE_OID_DER);
        writer.next().write_bool(false);
        writer.next().write_der(&inner);
    });
}

/// Build `04 82 <hi> <lo> <content>`: an OCTET STRING TLV whose length is
/// always encoded in definite long form with exactly two length octets,
/// even when the content would fit in a shorter form. This mirrors
/// `generate_x509`'s fixed-width length field in the original C attester,
/// which the verifier's `find_oid` depends on byte-for-byte.
fn build_octet_string_0x82(content: &[u8]) -> Vec<u8> {
    let len = content.len() as u16;
    let mut out = Vec::with_capacity(4 + content.len());
    out.push(der::TAG_OCTET_STRING);
    out.push(0x82);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(content);
    out
}

/// A read-only view over a parsed X.509 certificate, exposing only the two
/// things the verifier needs: the DER SubjectPublicKeyInfo and the quote
/// bytes out of the RA-TLS extension.
pub struct CertView {
    pub spki_der: Vec<u8>,
    pub quote: Vec<u8>,
}

impl CertView {
    /// Parse `cert_der`, walking down to `tbsCertificate.subjectPublicKeyInfo`
    /// and `tbsCertificate.extensions` structurally (one `Extension` SEQUENCE
    /// at a time) rather than searching for the OID as a byte substring
    /// anywhere in the buffer, the way the original C verifier's `find_oid`
    /// does. Substring search can be fooled by attacker-chosen bytes
    /// elsewhere in the certificate that happen to contain the OID's DER
    /// encoding; walking the structure cannot.
    pub fn parse(cert_der: &[u8]) -> Result<Self, RaTlsError> {
        let cert = der::expect_tag(cert_der, der::TAG_SEQUENCE)?;
        let tbs = der::expect_tag(cert.content, der::TAG_SEQUENCE)?;

        let mut rest = tbs.content;
        // version [0], optional but always present for v3 certs we emit/accept
        let version = der::read_tlv(rest)?;
        if version.tag == der::TAG_CONTEXT_0 {
            rest = version.rest;
        }
        let serial = der::expect_tag(rest, der::TAG_INTEGER)?;
        rest = serial.rest;
        let sig_alg = der::expect_tag(rest, der::TAG_SEQUENCE)?;
        rest = sig_alg.rest;
        let issuer = der::expect_tag(rest, der::TAG_SEQUENCE)?;
        rest = issuer.rest;
        let validity = der::expect_tag(rest, der::TAG_SEQUENCE)?;
        rest = validity.rest;
        let subject = der::expect_tag(rest, der::TAG_SEQUENCE)?;
        rest = subject.rest;
        let spki = der::expect_tag(rest, der::TAG_SEQUENCE)?;
        rest = spki.rest;

        let spki_der = reconstruct_tlv(der::TAG_SEQUENCE, spki.content);

        // Walk whatever comes next looking for the extensions block, [3].
        let mut extensions_content: Option<&[u8]> = None;
        let mut cursor = rest;
        while !cursor.is_empty() {
            let tlv = der::read_tlv(cursor)?;
            if tlv.tag == der::TAG_CONTEXT_3 {
                let extensions_seq = der::expect_tag(tlv.content, der::TAG_SEQUENCE)?;
                extensions_content = Some(extensions_seq.content);
                break;
            }
            cursor = tlv.rest;
        }
        let extensions_content = extensions_content.ok_or(RaTlsError::ExtensionMissing)?;

        let quote = find_quote_extension(extensions_content)?;

        Ok(Self { spki_der, quote })
    }
}

/// Re-wrap a TLV's content bytes with its own tag and length, i.e. recover
/// the full `T L V` from a `Tlv.content` slice that only has `V`.
fn reconstruct_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let len_bytes = content.len().to_be_bytes();
        let first_nonzero = len_bytes.iter().position(|&b| b != 0).unwrap_or(len_bytes.len() - 1);
        let used = &len_bytes[first_nonzero..];
        out.push(0x80 | used.len() as u8);
        out.extend_from_slice(used);
    }
    out.extend_from_slice(content);
    out
}

/// Walk the `Extensions ::= SEQUENCE OF Extension` structurally, returning
/// the quote bytes out of the one Extension whose `extnID` is
/// `QUOTE_OID_DER`.
///
/// Per the decoder contract: an optional criticality BOOLEAN is tolerated
/// only in its canonical `0x01 0x01 0x00` (false) encoding; any other
/// criticality byte sequence is malformed. The `extnValue` OCTET STRING's
/// length must additionally be in the exact two-octet long form
/// (`0x82 <hi> <lo>`) the attester always emits, since quotes always exceed
/// 255 bytes and a shorter form could only come from a forged certificate.
fn find_quote_extension(extensions: &[u8]) -> Result<Vec<u8>, RaTlsError> {
    let mut cursor = extensions;
    while !cursor.is_empty() {
        let ext: Tlv<'_> = der::expect_tag(cursor, der::TAG_SEQUENCE)?;
        cursor = ext.rest;

        let oid = der::expect_tag(ext.content, der::TAG_OID)?;
        let mut rest = oid.rest;

        let is_quote_oid = reconstruct_tlv(der::TAG_OID, oid.content) == QUOTE_OID_DER;

        if !rest.is_empty() && rest[0] == der::TAG_BOOLEAN {
            if rest.len() < 3 || rest[1] != 0x01 || rest[2] != 0x00 {
                if is_quote_oid {
                    return Err(RaTlsError::ExtensionMalformed(
                        "criticality marker is not the canonical 0x01 0x01 0x00".into(),
                    ));
                }
                // Not our extension and malformed in a way we don't care
                // about: skip it via the generic TLV reader instead.
                let critical = der::expect_tag(rest, der::TAG_BOOLEAN)?;
                rest = critical.rest;
            } else {
                rest = &rest[3..];
            }
        }

        if !is_quote_oid {
            continue;
        }

        if rest.len() < 4 || rest[0] != der::TAG_OCTET_STRING || rest[1] != 0x82 {
            return Err(RaTlsError::ExtensionMalformed(
                "quote extension length is not definite long-form (0x82)".into(),
            ));
        }
        let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        let body = rest.get(4..4 + len).ok_or_else(|| {
            RaTlsError::ExtensionMalformed("quote extension content truncated".into())
        })?;
        return Ok(body.to_vec());
    }
    Err(RaTlsError::ExtensionMissing)
}

/// Re-derive a `RsaPublicKey` from a certificate's raw SPKI DER, used by the
/// verifier to recompute `hash_pubkey` over exactly what's embedded.
pub fn parse_spki(spki_der: &[u8]) -> Result<RsaPublicKey, RaTlsError> {
    use rsa::pkcs8::DecodePublicKey;
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| RaTlsError::ExtensionMalformed(format!("invalid SubjectPublicKeyInfo: {e}")))
}

#[allow(dead_code)]
fn _assert_public_key_der_used(key: &RsaPublicKey) -> Result<Vec<u8>, RaTlsError> {
    public_key_der(key)
}
