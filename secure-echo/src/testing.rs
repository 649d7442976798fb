//! Throwaway PKI for tests: a trusted CA, an untrusted CA and leaf
//! certificates issued by each, written into a temporary directory.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tempfile::TempDir;

pub struct Pki {
    pub dir: TempDir,
    pub ca_cert: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub rogue_ca_cert: PathBuf,
    pub rogue_client_cert: PathBuf,
    pub rogue_client_key: PathBuf,
}

impl Pki {
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name);

        let trusted_ca = ca("Echo Test CA");
        let server = leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let client = leaf("echo-client", ExtendedKeyUsagePurpose::ClientAuth);
        let rogue_ca = ca("Rogue CA");
        let rogue_client = leaf("rogue-client", ExtendedKeyUsagePurpose::ClientAuth);

        fs::write(path("ca.crt"), trusted_ca.serialize_pem().unwrap()).unwrap();
        fs::write(path("server.crt"), server.serialize_pem_with_signer(&trusted_ca).unwrap()).unwrap();
        fs::write(path("server.key"), server.serialize_private_key_pem()).unwrap();
        fs::write(path("client.crt"), client.serialize_pem_with_signer(&trusted_ca).unwrap()).unwrap();
        fs::write(path("client.key"), client.serialize_private_key_pem()).unwrap();
        fs::write(path("rogue-ca.crt"), rogue_ca.serialize_pem().unwrap()).unwrap();
        fs::write(
            path("rogue-client.crt"),
            rogue_client.serialize_pem_with_signer(&rogue_ca).unwrap(),
        )
        .unwrap();
        fs::write(path("rogue-client.key"), rogue_client.serialize_private_key_pem()).unwrap();

        Self {
            ca_cert: path("ca.crt"),
            server_cert: path("server.crt"),
            server_key: path("server.key"),
            client_cert: path("client.crt"),
            client_key: path("client.key"),
            rogue_ca_cert: path("rogue-ca.crt"),
            rogue_client_cert: path("rogue-client.crt"),
            rogue_client_key: path("rogue-client.key"),
            dir,
        }
    }
}

fn ca(name: &str) -> Certificate {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;

    Certificate::from_params(params).unwrap()
}

fn leaf(name: &str, usage: ExtendedKeyUsagePurpose) -> Certificate {
    let mut params = CertificateParams::new(vec![name.to_string()]);
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    params.distinguished_name = dn;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![usage];

    Certificate::from_params(params).unwrap()
}
