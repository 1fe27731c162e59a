//! X.509 certificate handle

use std::collections::BTreeMap;

use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use der::{Decode, Encode};
use x509_cert::name::Name;

use super::key::PublicKey;
use super::CodecError;

/// Distinguished-name attributes keyed by short name (`CN`, `O`, ...)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubjectName(BTreeMap<String, String>);

impl SubjectName {
    /// Value of `attribute` by short name
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.0.get(attribute).map(String::as_str)
    }

    /// The `CN` attribute
    pub fn common_name(&self) -> Option<&str> {
        self.get("CN")
    }

    /// Attributes in short-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn from_name(name: &Name) -> Self {
        const OID_CN: &str = "2.5.4.3";
        const OID_C: &str = "2.5.4.6";
        const OID_L: &str = "2.5.4.7";
        const OID_ST: &str = "2.5.4.8";
        const OID_O: &str = "2.5.4.10";
        const OID_OU: &str = "2.5.4.11";

        let mut attributes = BTreeMap::new();
        for rdn in &name.0 {
            for atv in rdn.0.iter() {
                let short = match atv.oid.to_string().as_str() {
                    OID_CN => "CN",
                    OID_C => "C",
                    OID_L => "L",
                    OID_ST => "ST",
                    OID_O => "O",
                    OID_OU => "OU",
                    _ => continue,
                };

                let value = if let Ok(s) = PrintableStringRef::try_from(&atv.value) {
                    s.to_string()
                } else if let Ok(s) = Utf8StringRef::try_from(&atv.value) {
                    s.to_string()
                } else if let Ok(s) = Ia5StringRef::try_from(&atv.value) {
                    s.to_string()
                } else {
                    continue;
                };
                attributes.insert(short.to_string(), value);
            }
        }
        Self(attributes)
    }
}

/// Parsed certificate together with the PEM it came from
#[derive(Clone, Debug)]
pub struct Certificate {
    pem: String,
    der: Vec<u8>,
    inner: x509_cert::Certificate,
}

impl Certificate {
    /// Parse the first certificate in `pem`
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        let mut reader = pem.as_bytes();
        let der = rustls_pemfile::certs(&mut reader)
            .next()
            .ok_or(CodecError::MissingCertificate)?
            .map_err(|e| CodecError::Pem(e.to_string()))?;

        let inner = x509_cert::Certificate::from_der(der.as_ref())
            .map_err(|e| CodecError::X509(e.to_string()))?;

        Ok(Self {
            pem: pem.to_string(),
            der: der.as_ref().to_vec(),
            inner,
        })
    }

    /// PEM text as received
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// DER encoding of the certificate
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name
    pub fn subject(&self) -> SubjectName {
        SubjectName::from_name(&self.inner.tbs_certificate.subject)
    }

    /// Issuer distinguished name
    pub fn issuer(&self) -> SubjectName {
        SubjectName::from_name(&self.inner.tbs_certificate.issuer)
    }

    /// Big-endian serial number bytes
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    /// SubjectPublicKeyInfo of the certified key
    pub fn public_key(&self) -> Result<PublicKey, CodecError> {
        self.inner
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map(PublicKey::from_spki_der)
            .map_err(|e| CodecError::Der(format!("Failed to encode public key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PublicKeyData};

    fn self_signed() -> (String, KeyPair) {
        let mut params = CertificateParams::new(vec!["ca.example".to_string()]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Test CA");
        dn.push(DnType::OrganizationName, "MITLL");
        dn.push(DnType::OrganizationalUnitName, "53");
        dn.push(DnType::CountryName, "US");
        dn.push(DnType::StateOrProvinceName, "MA");
        dn.push(DnType::LocalityName, "Lexington");
        params.distinguished_name = dn;
        params.serial_number = Some(rcgen::SerialNumber::from(vec![0x42]));

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        (cert.pem(), key)
    }

    #[test]
    fn subject_and_issuer_attributes_are_extracted() {
        let (pem, _) = self_signed();
        let cert = Certificate::from_pem(&pem).unwrap();
        let subject = cert.subject();

        assert_eq!(subject.common_name(), Some("Test CA"));
        assert_eq!(subject.get("O"), Some("MITLL"));
        assert_eq!(subject.get("OU"), Some("53"));
        assert_eq!(subject.get("C"), Some("US"));
        assert_eq!(subject.get("ST"), Some("MA"));
        assert_eq!(subject.get("L"), Some("Lexington"));
        assert_eq!(cert.issuer(), subject);
        assert_eq!(cert.serial_number(), &[0x42]);
        assert_eq!(cert.pem(), pem);
    }

    #[test]
    fn public_key_matches_generating_key_pair() {
        let (pem, key) = self_signed();
        let cert = Certificate::from_pem(&pem).unwrap();
        let public = cert.public_key().unwrap();
        assert_eq!(public.der(), key.subject_public_key_info().as_slice());
        assert!(public.to_pem().starts_with("-----BEGIN PUBLIC KEY-----\n"));
    }

    #[test]
    fn non_certificate_input_is_rejected() {
        assert!(matches!(
            Certificate::from_pem("not pem at all"),
            Err(CodecError::MissingCertificate)
        ));
        assert!(matches!(
            Certificate::from_pem("-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n"),
            Err(CodecError::X509(_))
        ));
    }
}
