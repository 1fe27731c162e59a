//! CA operations for the CLI

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde_json::json;

use crate::authority::{CertificateAuthority, CA_KEY_FILE};
use crate::codec::{save_key_unencrypted, Certificate, PrivateKey};
use crate::config::CaConfig;

/// CA certificate file inside a CA directory
pub const CA_CERT_FILE: &str = "cacert.crt";
/// DER public key file inside a CA directory
pub const CA_PUBLIC_FILE: &str = "ca-public.der";

/// `ephca init`: create a CA and write its material to `out_dir`
pub async fn handle_init(
    config: CaConfig,
    out_dir: &Path,
    use_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let authority = CertificateAuthority::new(config)?;
    let bundle = authority.initialize_ca().await?;

    std::fs::create_dir_all(out_dir)?;
    write_output(&out_dir.join(CA_CERT_FILE), bundle.certificate.pem().as_bytes())?;
    save_key_unencrypted(&bundle.private_key, &out_dir.join(CA_KEY_FILE))?;
    write_output(&out_dir.join(CA_PUBLIC_FILE), bundle.public_key.der())?;

    let subject = bundle.certificate.subject();
    if use_json {
        println!(
            "{}",
            json!({
                "success": true,
                "operation": "init",
                "subject": subject.common_name(),
                "directory": out_dir.display().to_string(),
                "public_key": bundle.public_key.fingerprint(),
            })
        );
    } else {
        println!(
            "Created CA {} in {}",
            subject.common_name().unwrap_or("<unnamed>"),
            out_dir.display()
        );
    }
    Ok(())
}

/// `ephca issue`: sign a leaf for `name` with the CA in `ca_dir`
pub async fn handle_issue(
    mut config: CaConfig,
    ca_dir: &Path,
    name: &str,
    serial: u64,
    out_dir: &Path,
    use_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (certificate_pem, key_pem) = read_ca_dir(ca_dir)?;
    let ca_certificate = Certificate::from_pem(&certificate_pem)?;
    let ca_private_key = PrivateKey::from_pem(&key_pem)?;

    config.service.working_dir = Some(ca_dir.to_path_buf());
    let authority = CertificateAuthority::new(config)?;
    let signed = authority
        .issue_certificate(&ca_certificate, &ca_private_key, name, serial)
        .await?;

    std::fs::create_dir_all(out_dir)?;
    let cert_path = out_dir.join(format!("{name}-cert.crt"));
    let key_path = out_dir.join(format!("{name}-private.pem"));
    write_output(&cert_path, signed.certificate.pem().as_bytes())?;
    save_key_unencrypted(&signed.private_key, &key_path)?;

    let serial_hex = hex::encode(signed.certificate.serial_number());
    if use_json {
        println!(
            "{}",
            json!({
                "success": true,
                "operation": "issue",
                "subject": name,
                "serial": serial_hex,
                "certificate": cert_path.display().to_string(),
                "private_key": key_path.display().to_string(),
            })
        );
    } else {
        println!("Issued {name} (serial {serial_hex}) to {}", cert_path.display());
    }
    Ok(())
}

/// `ephca crl`: write a DER CRL revoking `serials` to `out`
pub async fn handle_crl(
    mut config: CaConfig,
    ca_dir: &Path,
    serials: &[u64],
    out: &Path,
    use_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (certificate_pem, key_pem) = read_ca_dir(ca_dir)?;

    config.service.working_dir = Some(ca_dir.to_path_buf());
    let authority = CertificateAuthority::new(config)?;
    let crl = authority.generate_crl(serials, &certificate_pem, &key_pem).await?;

    write_output(out, &crl)?;
    if use_json {
        println!(
            "{}",
            json!({
                "success": true,
                "operation": "crl",
                "serials": serials,
                "bytes": crl.len(),
                "path": out.display().to_string(),
            })
        );
    } else {
        println!("Wrote CRL revoking {serials:?} to {}", out.display());
    }
    Ok(())
}

fn read_ca_dir(ca_dir: &Path) -> std::io::Result<(String, zeroize::Zeroizing<String>)> {
    let certificate_pem = std::fs::read_to_string(ca_dir.join(CA_CERT_FILE))?;
    let key_pem = zeroize::Zeroizing::new(std::fs::read_to_string(ca_dir.join(CA_KEY_FILE))?);
    Ok((certificate_pem, key_pem))
}

/// Write public material to `path`
fn write_output(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_output_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        write_output(&cert, b"old certificate").unwrap();
        write_output(&cert, b"new").unwrap();
        assert_eq!(std::fs::read(&cert).unwrap(), b"new");
    }

    #[test]
    fn missing_ca_material_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_ca_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
