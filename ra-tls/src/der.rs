//! Minimal DER TLV helpers used to walk X.509 structures we did not write
//! ourselves (certificate parsing on the verifier side). We deliberately
//! don't pull in a full ASN.1/X.509 parsing crate: the only things we ever
//! need out of a peer certificate are its SubjectPublicKeyInfo and its
//! extensions list, and both can be reached by skipping past a handful of
//! well-known TLVs.

use crate::error::RaTlsError;

/// Tag, content and the remaining bytes after one TLV.
pub struct Tlv<'a> {
    pub tag: u8,
    pub content: &'a [u8],
    pub rest: &'a [u8],
}

/// Parse exactly one BER/DER TLV off the front of `data`.
///
/// Supports short-form lengths and definite long-form lengths of up to 4
/// octets, which covers everything an X.509 certificate can legally contain.
pub fn read_tlv(data: &[u8]) -> Result<Tlv<'_>, RaTlsError> {
    if data.len() < 2 {
        return Err(RaTlsError::ExtensionMalformed("truncated TLV".into()));
    }
    let tag = data[0];
    let len_byte = data[1];
    let (len, header_len) = if len_byte & 0x80 == 0 {
        (len_byte as usize, 2usize)
    } else {
        let n = (len_byte & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(RaTlsError::ExtensionMalformed(
                "unsupported DER length form".into(),
            ));
        }
        if data.len() < 2 + n {
            return Err(RaTlsError::ExtensionMalformed("truncated DER length".into()));
        }
        let mut len = 0usize;
        for b in &data[2..2 + n] {
            len = (len << 8) | *b as usize;
        }
        (len, 2 + n)
    };
    if data.len() < header_len + len {
        return Err(RaTlsError::ExtensionMalformed("truncated TLV content".into()));
    }
    Ok(Tlv {
        tag,
        content: &data[header_len..header_len + len],
        rest: &data[header_len + len..],
    })
}

/// Read a TLV and require it to carry the given tag.
pub fn expect_tag<'a>(data: &'a [u8], tag: u8) -> Result<Tlv<'a>, RaTlsError> {
    let tlv = read_tlv(data)?;
    if tlv.tag != tag {
        return Err(RaTlsError::ExtensionMalformed(format!(
            "expected tag {tag:#04x}, found {:#04x}",
            tlv.tag
        )));
    }
    Ok(tlv)
}

pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_OID: u8 = 0x06;
pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_CONTEXT_0: u8 = 0xa0;
pub const TAG_CONTEXT_1: u8 = 0xa1;
pub const TAG_CONTEXT_2: u8 = 0xa2;
pub const TAG_CONTEXT_3: u8 = 0xa3;
