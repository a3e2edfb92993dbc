//! Key, CSR, and DH parameter generation
//!
//! Issuance needs a fresh private key and CSR per order, and the reverse
//! proxy needs precomputed DH parameters. Both are hidden behind the
//! [`Crypto`] trait; the default implementation drives the `openssl` binary
//! shipped in the controller image. Key material is piped through stdin and
//! stdout, never written to disk.

use crate::error::{IngressError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Private-key size for service certificates.
pub const RSA_KEY_BITS: u32 = 2048;

/// A freshly generated private key with a CSR over the requested names.
#[derive(Debug, Clone)]
pub struct KeyCsr {
    /// PKCS#8 private key, PEM.
    pub key_pem: String,
    /// Certificate signing request, DER.
    pub csr_der: Vec<u8>,
}

/// Key, CSR, and DH parameter generation.
#[async_trait]
pub trait Crypto: Send + Sync {
    /// Generate a fresh RSA private key and a CSR over `domains`.
    async fn generate_key_and_csr(&self, domains: &[String]) -> Result<KeyCsr>;

    /// Generate DH parameters of the given bit size, PEM.
    async fn generate_dhparams(&self, bits: u32) -> Result<String>;
}

/// [`Crypto`] implementation shelling out to the `openssl` binary.
#[derive(Debug, Clone, Default)]
pub struct OpensslCrypto;

impl OpensslCrypto {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        let mut command = Command::new("openssl");
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| IngressError::crypto(format!("failed to spawn openssl: {}", e)))?;

        if let Some(input) = stdin {
            let mut handle = child.stdin.take().ok_or_else(|| {
                IngressError::crypto("openssl stdin unavailable")
            })?;
            handle.write_all(input).await?;
            drop(handle);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| IngressError::crypto(format!("openssl did not finish: {}", e)))?;

        if !output.status.success() {
            return Err(IngressError::crypto(format!(
                "openssl {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Crypto for OpensslCrypto {
    async fn generate_key_and_csr(&self, domains: &[String]) -> Result<KeyCsr> {
        let first = domains
            .first()
            .ok_or_else(|| IngressError::validation("cannot build a CSR over zero domains"))?;

        let key_bits = format!("rsa_keygen_bits:{}", RSA_KEY_BITS);
        let key = self
            .run(
                &["genpkey", "-algorithm", "RSA", "-pkeyopt", &key_bits],
                None,
            )
            .await?;
        let key_pem = String::from_utf8(key)
            .map_err(|_| IngressError::crypto("openssl emitted a non-UTF-8 key"))?;

        let subject = format!("/CN={}", first);
        let san = format!(
            "subjectAltName={}",
            domains
                .iter()
                .map(|domain| format!("DNS:{}", domain))
                .collect::<Vec<_>>()
                .join(",")
        );
        let csr_der = self
            .run(
                &[
                    "req", "-new", "-key", "/dev/stdin", "-outform", "DER", "-subj", &subject,
                    "-addext", &san,
                ],
                Some(key_pem.as_bytes()),
            )
            .await?;

        Ok(KeyCsr { key_pem, csr_der })
    }

    async fn generate_dhparams(&self, bits: u32) -> Result<String> {
        tracing::info!("Generating {}-bit DH parameters, this takes a while", bits);
        let bits = bits.to_string();
        let pem = self.run(&["dhparam", &bits], None).await?;
        String::from_utf8(pem)
            .map_err(|_| IngressError::crypto("openssl emitted non-UTF-8 DH parameters"))
    }
}

/// Extract the leaf certificate's `notAfter` from a PEM chain, as unix
/// seconds. The leaf is the first certificate block in the chain.
pub fn leaf_expiry(chain_pem: &str) -> Result<i64> {
    let blocks = pem::parse_many(chain_pem.as_bytes())
        .map_err(|e| IngressError::acme(format!("failed to parse certificate PEM: {}", e)))?;

    let leaf = blocks
        .iter()
        .find(|block| block.tag() == "CERTIFICATE")
        .ok_or_else(|| IngressError::acme("no certificate found in chain"))?;

    let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
        .map_err(|e| IngressError::acme(format!("failed to parse certificate: {}", e)))?;

    Ok(cert.validity().not_after.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Self-signed certificate for app.example.com / www.example.com,
    // notAfter = 2046-07-27T09:43:37Z.
    pub const TEST_CERT_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIDQzCCAiugAwIBAgIUHqFVz1c1lGRwFbJowhcckFUjtSgwDQYJKoZIhvcNAQEL
BQAwGjEYMBYGA1UEAwwPYXBwLmV4YW1wbGUuY29tMB4XDTI2MDgwMTA5NDMzN1oX
DTQ2MDcyNzA5NDMzN1owGjEYMBYGA1UEAwwPYXBwLmV4YW1wbGUuY29tMIIBIjAN
BgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEArbFUR+hI1MYBMRRIaqPGlVpCaunN
iUo3/AFZXwaOm0AyIY5hg3BsRuLUyjO7axS/fblTr77wk382cE8t8wKlymzBTdIs
zQbYSgYeQFJ0OlV4CCyP38+JpiipaSdKc1qbUkAIGgLlNOqzAcu+Z/eakCjVMSk/
1OUsLBY3rmDzUqJ9ASH41mVEepNB3ZKawmtlEEdYmzgIKtjqKUIrOtyjGVvugc7x
a/tap0ADvYoycnyErkN60WQVoNSnMKf7qj2c1sgrEECiE7l5nKPdqqXbkE/Vy18D
fiWxqqiisqlccfTsFICLtdNmVd8RX7xo54SEqgixQzGqrwCz78SOyQp4EwIDAQAB
o4GAMH4wHQYDVR0OBBYEFCMSNxwiLzRodNo6jIkrITwU6Fq6MB8GA1UdIwQYMBaA
FCMSNxwiLzRodNo6jIkrITwU6Fq6MA8GA1UdEwEB/wQFMAMBAf8wKwYDVR0RBCQw
IoIPYXBwLmV4YW1wbGUuY29tgg93d3cuZXhhbXBsZS5jb20wDQYJKoZIhvcNAQEL
BQADggEBAHQPjWl+vRLch+fiIhyMMuvfJn1l6AQa1ar5qQR/CiJU/Kw92LbS3xZF
0VN20iHywapwD6JZ3GRIxnLflfi9Ds7NoyPc8coA8Z7/u+ryzBrURX6U/MbTQrN8
/wQp8I4GX5RthvZGpE77Z/Uo7NgV/ibjdU31KB62hp0kS0Ip0qKVQ/NCoVwW1xhy
klqsHcepwqMbfg5TbOb/CDDssDyydytO+vCMO6MlAheXlzCt8cv+UzIMz/53YXmO
XCtVIdzl+3wfbrLv9fHQOrBK1hbRs+14OAjmPA1yVhEJq8Btuf+Y8osO2IsICrxf
8nROx8HrDH10THVxzHZ0k3yFtIe9Kn4=
-----END CERTIFICATE-----
";

    #[test]
    fn test_leaf_expiry() {
        assert_eq!(leaf_expiry(TEST_CERT_PEM).unwrap(), 2416297417);
    }

    #[test]
    fn test_leaf_expiry_rejects_garbage() {
        assert!(leaf_expiry("not a pem").is_err());
    }

    #[test]
    fn test_leaf_expiry_skips_non_certificate_blocks() {
        let chain = format!(
            "-----BEGIN X509 CRL-----\nAA==\n-----END X509 CRL-----\n{}",
            TEST_CERT_PEM
        );
        assert_eq!(leaf_expiry(&chain).unwrap(), 2416297417);
    }
}
