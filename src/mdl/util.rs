//! Test-only mDL fixture generation: an IACA root, a document-signer certificate it
//! signs, and a minimal test mDL issued against a holder-supplied device key.
//!
//! Building mock mdocs is out of scope for the core proper (see Non-goals); this
//! module exists purely so the presentation-session tests have something to present,
//! and everything in it is generated at runtime rather than loaded from fixtures.
#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use isomdl::{
    definitions::{
        helpers::NonEmptyMap,
        namespaces::org_iso_18013_5_1::OrgIso1801351,
        traits::{FromJson, ToNamespaceMap},
        x509::X5Chain,
        CoseKey, DeviceKeyInfo, DigestAlgorithm, EC2Curve, ValidityInfo, EC2Y,
    },
    issuance::Mdoc as MdocBuilder,
    presentation::device::Document,
};
use p256::{elliptic_curve::sec1::ToEncodedPoint, pkcs8::EncodePublicKey, PublicKey};
use signature::{Keypair, KeypairRef, Signer};
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{asn1::OctetString, Encode},
    ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier},
    name::Name,
    spki::{DynSignatureAlgorithmIdentifier, SignatureBitStringEncoding, SubjectPublicKeyInfoOwned},
    time::Validity,
    Certificate,
};

use crate::crypto::{InMemoryKeyStore, KeyAlias, KeyStore};
use crate::mdoc::Mdoc;

/// Test mDL data; defaults produce the same hardcoded profile every time.
pub struct TestMdlOpts {
    pub document_number: String,
}

impl Default for TestMdlOpts {
    fn default() -> Self {
        Self {
            document_number: "DL00000001".into(),
        }
    }
}

/// Generates a self-contained test mDL: a fresh IACA root, a DS certificate it
/// signs, a device key in a fresh in-memory key store, and the issued mdoc.
/// Returns `(mdoc, key_store, device_key_alias, iaca_certificate_pem)`.
pub fn generate_test_mdl(
    opts: TestMdlOpts,
) -> Result<(Mdoc, Arc<InMemoryKeyStore>, KeyAlias, String)> {
    tracing::info!("generating test mDL fixture");
    let key_store = Arc::new(InMemoryKeyStore::default());
    let device_key_alias = KeyAlias("device-key".into());
    let device_public_key = key_store.generate(device_key_alias.clone());

    let (iaca_cert, iaca_key) = generate_iaca_root()?;
    let (ds_cert, ds_key) = generate_document_signer(&iaca_cert, &iaca_key)?;

    let mdoc_builder = prepare_mdoc(device_public_key, &opts)?;
    let x5chain = X5Chain::builder()
        .with_certificate(ds_cert)
        .context("failed to add certificate to x5chain")?
        .build()
        .context("failed to build x5chain")?;
    let issued = mdoc_builder
        .issue::<p256::ecdsa::SigningKey, p256::ecdsa::Signature>(x5chain, ds_key)
        .context("failed to issue mdoc")?;

    let namespaces = NonEmptyMap::maybe_new(
        issued
            .namespaces
            .into_inner()
            .into_iter()
            .map(|(namespace, elements)| {
                (
                    namespace,
                    NonEmptyMap::maybe_new(
                        elements
                            .into_inner()
                            .into_iter()
                            .map(|element| (element.as_ref().element_identifier.clone(), element))
                            .collect(),
                    )
                    .unwrap(),
                )
            })
            .collect(),
    )
    .unwrap();

    let document = Document {
        id: uuid::Uuid::new_v4(),
        issuer_auth: issued.issuer_auth,
        mso: issued.mso,
        namespaces,
    };

    let iaca_pem = pem_from_der(&iaca_cert_der(&iaca_cert)?);

    Ok((
        Mdoc::new("org.iso.18013.5.1.mDL".into(), document),
        key_store,
        device_key_alias,
        iaca_pem,
    ))
}

fn iaca_cert_der(cert: &Certificate) -> Result<Vec<u8>> {
    Ok(cert.to_der()?)
}

fn pem_from_der(der: &[u8]) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        pem.push_str(std::str::from_utf8(line).unwrap());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

fn generate_iaca_root() -> Result<(Certificate, p256::ecdsa::SigningKey)> {
    let key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
    let name: Name = "CN=SpruceID Test IACA,C=US,ST=NY,O=SpruceID"
        .parse()
        .context("invalid IACA subject name")?;
    let spki = SubjectPublicKeyInfoOwned::from_key(key.verifying_key())?;

    let mut builder = CertificateBuilder::new(
        Profile::Manual { issuer: None },
        rand::random::<u64>().into(),
        Validity::from_now(Duration::from_secs(60 * 60 * 24 * 365 * 10))?,
        name,
        spki,
        &key,
    )?;
    builder.add_extension(&BasicConstraints {
        ca: true,
        path_len_constraint: Some(0),
    })?;
    builder.add_extension(&KeyUsage(
        KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature,
    ))?;

    let signature: p256::ecdsa::Signature = key.sign(&builder.finalize()?);
    let cert: Certificate = builder.assemble(signature.to_der().to_bitstring()?)?;
    Ok((cert, key))
}

fn generate_document_signer(
    iaca_cert: &Certificate,
    iaca_key: &p256::ecdsa::SigningKey,
) -> Result<(Certificate, p256::ecdsa::SigningKey)> {
    let iaca_name: Name = iaca_cert.tbs_certificate.subject.clone();
    let ds_key = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
    let mut builder =
        prepare_signer_certificate(&ds_key, iaca_key, iaca_name).context("failed to prepare DS certificate")?;
    let signature: p256::ecdsa::Signature = iaca_key.sign(&builder.finalize()?);
    let cert: Certificate = builder.assemble(signature.to_der().to_bitstring()?)?;
    Ok((cert, ds_key))
}

fn prepare_signer_certificate<'s, S>(
    signer_key: &'s S,
    iaca_key: &'s S,
    iaca_name: Name,
) -> Result<CertificateBuilder<'s, S>>
where
    S: KeypairRef + DynSignatureAlgorithmIdentifier,
    S::VerifyingKey: EncodePublicKey,
{
    use sha1::{Digest, Sha1};

    let spki = SubjectPublicKeyInfoOwned::from_key(signer_key.verifying_key())?;
    let ski_digest = Sha1::digest(spki.subject_public_key.raw_bytes());
    let ski_digest_octet = OctetString::new(ski_digest.to_vec())?;

    let apki = SubjectPublicKeyInfoOwned::from_key(iaca_key.verifying_key())?;
    let aki_digest = Sha1::digest(apki.subject_public_key.raw_bytes());
    let aki_digest_octet = OctetString::new(aki_digest.to_vec())?;

    let mut builder = CertificateBuilder::new(
        Profile::Manual {
            issuer: Some(iaca_name),
        },
        rand::random::<u64>().into(),
        Validity::from_now(Duration::from_secs(60 * 60 * 24 * 60))?,
        "CN=SpruceID Test DS,C=US,ST=NY,O=SpruceID".parse()?,
        spki,
        iaca_key,
    )?;

    builder.add_extension(&SubjectKeyIdentifier(ski_digest_octet))?;
    builder.add_extension(&AuthorityKeyIdentifier {
        key_identifier: Some(aki_digest_octet),
        ..Default::default()
    })?;
    builder.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;

    Ok(builder)
}

fn prepare_mdoc(pub_key: PublicKey, opts: &TestMdlOpts) -> Result<isomdl::issuance::mdoc::Builder> {
    let isomdl_data = serde_json::json!({
        "family_name": "Doe",
        "given_name": "John",
        "birth_date": "1990-01-01",
        "issue_date": "2020-01-01",
        "expiry_date": "2030-01-01",
        "issuing_country": "US",
        "issuing_authority": "SpruceID",
        "document_number": opts.document_number,
        "portrait": "Zm9v",
        "driving_privileges": [],
        "un_distinguishing_sign": "USA",
        "administrative_number": "ADM00000001",
        "sex": 1,
        "height": 180,
        "weight": 75,
        "eye_colour": "blue",
        "hair_colour": "black",
        "birth_place": "California, USA",
        "resident_address": "123 Main St, Los Angeles, California, 90001",
        "portrait_capture_date": "2020-01-01T12:00:00Z",
        "age_in_years": 35,
        "age_birth_year": 1990,
        "age_over_18": true,
        "age_over_21": true,
        "age_over_60": false,
        "nationality": "US",
        "resident_city": "Los Angeles",
        "resident_state": "CA",
        "resident_postal_code": "90001",
        "resident_country": "US"
    });

    let doc_type = String::from("org.iso.18013.5.1.mDL");
    let isomdl_namespace = String::from("org.iso.18013.5.1");
    let isomdl_data = OrgIso1801351::from_json(&isomdl_data)?.to_ns_map();
    let namespaces = [(isomdl_namespace, isomdl_data)].into_iter().collect();

    let validity_info = ValidityInfo {
        signed: OffsetDateTime::now_utc(),
        valid_from: OffsetDateTime::now_utc(),
        valid_until: OffsetDateTime::now_utc() + Duration::from_secs(60 * 60 * 24 * 30),
        expected_update: None,
    };

    let ec = pub_key.to_encoded_point(false);
    let x = ec.x().context("EC missing X coordinate")?.to_vec();
    let y = EC2Y::Value(ec.y().context("EC missing Y coordinate")?.to_vec());
    let device_key = CoseKey::EC2 {
        crv: EC2Curve::P256,
        x,
        y,
    };
    let device_key_info = DeviceKeyInfo {
        device_key,
        key_authorizations: None,
        key_info: None,
    };

    Ok(MdocBuilder::builder()
        .doc_type(doc_type)
        .namespaces(namespaces)
        .validity_info(validity_info)
        .digest_algorithm(DigestAlgorithm::SHA256)
        .device_key_info(device_key_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_self_consistent_fixture() {
        let (mdoc, key_store, alias, iaca_pem) =
            generate_test_mdl(TestMdlOpts::default()).unwrap();
        assert_eq!(mdoc.doc_type(), "org.iso.18013.5.1.mDL");
        assert!(key_store.get_signing_key(alias).is_ok());
        assert!(iaca_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    }
}
