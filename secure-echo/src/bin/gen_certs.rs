use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType, PKCS_ECDSA_P256_SHA256,
};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

const OUT_DIR: &str = "certs";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔐 Generating certificates for the echo service...\n");

    let out = Path::new(OUT_DIR);
    fs::create_dir_all(out)?;

    println!("1. Generating Root CA...");
    let ca = generate_ca()?;
    write(out, "ca.crt", ca.serialize_pem()?)?;
    write(out, "ca.key", ca.serialize_private_key_pem())?;

    println!("2. Generating server certificate...");
    let server = generate_leaf("localhost", ExtendedKeyUsagePurpose::ServerAuth)?;
    write(out, "server.crt", server.serialize_pem_with_signer(&ca)?)?;
    write(out, "server.key", server.serialize_private_key_pem())?;

    println!("3. Generating client certificate...");
    let client = generate_leaf("echo-client", ExtendedKeyUsagePurpose::ClientAuth)?;
    write(out, "client.crt", client.serialize_pem_with_signer(&ca)?)?;
    write(out, "client.key", client.serialize_private_key_pem())?;

    println!("\n✅ All certificates generated in ./{}/", OUT_DIR);
    println!("   server: --tls-cert {0}/server.crt --tls-key {0}/server.key --client-ca {0}/ca.crt", OUT_DIR);
    println!("   client: --tls --tls-ca {0}/ca.crt --client-cert {0}/client.crt --client-key {0}/client.key", OUT_DIR);

    Ok(())
}

fn write(dir: &Path, name: &str, contents: String) -> std::io::Result<()> {
    let path = dir.join(name);
    fs::write(&path, contents)?;
    println!("   ✓ Saved {}", path.display());
    Ok(())
}

/// Self-signed root, valid for one year
fn generate_ca() -> Result<Certificate, Box<dyn std::error::Error>> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Echo Sample Root CA");
    dn.push(DnType::OrganizationName, "Secure Echo");
    params.distinguished_name = dn;

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(365);
    params.alg = &PKCS_ECDSA_P256_SHA256;

    Ok(Certificate::from_params(params)?)
}

/// Leaf certificate for `localhost` and 127.0.0.1, to be signed by the CA
fn generate_leaf(
    common_name: &str,
    usage: ExtendedKeyUsagePurpose,
) -> Result<Certificate, Box<dyn std::error::Error>> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Secure Echo");
    params.distinguished_name = dn;

    params.subject_alt_names = vec![SanType::DnsName(common_name.to_string())];
    if common_name != "localhost" {
        params
            .subject_alt_names
            .push(SanType::DnsName("localhost".to_string()));
    }
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![usage];

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(365);
    params.alg = &PKCS_ECDSA_P256_SHA256;

    Ok(Certificate::from_params(params)?)
}
