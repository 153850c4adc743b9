// Copyright (c) 2024 UKI Builder Authors
//
// SPDX-License-Identifier: BSD-2-Clause-Patent

use der::asn1::{BitStringRef, Null, ObjectIdentifier};
use der::pem::LineEnding;
use der::{Encode, Sequence};
use sha2::{Digest, Sha256};

// rsaEncryption OBJECT IDENTIFIER ::= {
//    iso(1) member-body(2) us(840) rsadsi(113549) pkcs(1) pkcs-1(1) 1
// }
pub const RSA_PUBKEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

pub const PUBLIC_KEY_PEM_LABEL: &str = "PUBLIC KEY";

pub type Result<T> = core::result::Result<T, der::Error>;

// As specified in rfc3280#section-4.1.1.2
// AlgorithmIdentifier  ::=  SEQUENCE  {
//    algorithm               OBJECT IDENTIFIER,
//    parameters              ANY DEFINED BY algorithm OPTIONAL
// }
#[derive(Copy, Clone, Debug, Eq, PartialEq, Sequence)]
pub struct AlgorithmIdentifier {
    pub algorithm: ObjectIdentifier,
    pub parameters: Option<Null>,
}

// As specified in rfc3280#section-4.1.2.7
// SubjectPublicKeyInfo  ::=  SEQUENCE  {
//    algorithm            AlgorithmIdentifier,
//    subjectPublicKey     BIT STRING
// }
#[derive(Copy, Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SubjectPublicKeyInfo<'a> {
    pub algorithm: AlgorithmIdentifier,
    pub subject_public_key: BitStringRef<'a>,
}

impl<'a> SubjectPublicKeyInfo<'a> {
    /// Wrap a PKCS#1 `RSAPublicKey` as defined in rfc3279#section-2.3.1.
    pub fn rsa(rsa_public_key: &'a [u8]) -> Result<Self> {
        Ok(SubjectPublicKeyInfo {
            algorithm: AlgorithmIdentifier {
                algorithm: RSA_PUBKEY_OID,
                // rfc3279 requires an explicit NULL for rsaEncryption.
                parameters: Some(Null),
            },
            subject_public_key: BitStringRef::from_bytes(rsa_public_key)?,
        })
    }
}

/// DER encoded SubjectPublicKeyInfo for an RSA public key.
pub fn rsa_spki_der(rsa_public_key: &[u8]) -> Result<Vec<u8>> {
    SubjectPublicKeyInfo::rsa(rsa_public_key)?.to_der()
}

/// PEM `PUBLIC KEY` document for a DER SubjectPublicKeyInfo.
pub fn spki_to_pem(spki_der: &[u8]) -> core::result::Result<String, String> {
    der::pem::encode_string(PUBLIC_KEY_PEM_LABEL, LineEnding::LF, spki_der)
        .map_err(|e| e.to_string())
}

/// Key fingerprint as used by systemd: SHA256 over the SubjectPublicKeyInfo DER.
pub fn fingerprint(spki_der: &[u8]) -> [u8; 32] {
    Sha256::digest(spki_der).into()
}

#[cfg(test)]
mod test {
    use super::*;
    use der::Decode;

    const PCR_PUBLIC_PEM: &str = include_str!("../data/pcr-public.pem");

    #[test]
    fn test_rsa_spki_matches_openssl() {
        let (label, expected) = der::pem::decode_vec(PCR_PUBLIC_PEM.as_bytes()).unwrap();
        assert_eq!(label, PUBLIC_KEY_PEM_LABEL);

        let spki = SubjectPublicKeyInfo::from_der(&expected).unwrap();
        assert_eq!(spki.algorithm.algorithm, RSA_PUBKEY_OID);
        assert_eq!(spki.algorithm.parameters, Some(Null));

        let rsa_public_key = spki.subject_public_key.as_bytes().unwrap();
        let der = rsa_spki_der(rsa_public_key).unwrap();
        assert_eq!(der, expected);

        let pem = spki_to_pem(&der).unwrap();
        assert_eq!(pem.trim_end(), PCR_PUBLIC_PEM.trim_end());
    }

    #[test]
    fn test_fingerprint() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            hex::encode(fp),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
