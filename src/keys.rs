//! Signing key material for the auth service.
//!
//! One Ed25519 keypair is loaded at startup and shared read-only for the lifetime
//! of the process. The private half never leaves this module; the public half is
//! served as PEM so other services can verify tokens.

use std::path::Path;
use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey};
use openssl::pkey::PKey;
use thiserror::Error;

/// Errors that can occur while loading or generating key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(jsonwebtoken::errors::Error),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(jsonwebtoken::errors::Error),
    #[error("public key does not match private key")]
    Mismatch,
    #[error("key generation failed: {0}")]
    Generate(#[from] openssl::error::ErrorStack),
}

/// The process-wide signing keypair.
///
/// Cheap to clone; both halves live behind `Arc`.
#[derive(Clone)]
pub struct KeyPair {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    public_pem: Arc<[u8]>,
}

impl KeyPair {
    /// Build a keypair from PEM bytes (PKCS#8 private key, SPKI public key).
    ///
    /// A probe token is signed and verified so a mismatched pair fails here
    /// instead of on the first request.
    pub fn from_pem(private_pem: &[u8], public_pem: &[u8]) -> Result<Self, KeyError> {
        let encoding_key = EncodingKey::from_ed_pem(private_pem).map_err(KeyError::InvalidPrivateKey)?;
        let decoding_key = DecodingKey::from_ed_pem(public_pem).map_err(KeyError::InvalidPublicKey)?;

        let pair = Self {
            encoding_key: Arc::new(encoding_key),
            decoding_key: Arc::new(decoding_key),
            public_pem: Arc::from(public_pem),
        };
        pair.check_matching()?;
        Ok(pair)
    }

    /// Load the keypair from two PEM files.
    pub fn load(private_path: &Path, public_path: &Path) -> Result<Self, KeyError> {
        let private_pem = read_file(private_path)?;
        let public_pem = read_file(public_path)?;
        Self::from_pem(&private_pem, &public_pem)
    }

    /// Generate a fresh Ed25519 keypair. Returns `(private_pem, public_pem)`.
    pub fn generate_pem() -> Result<(Vec<u8>, Vec<u8>), KeyError> {
        let key = PKey::generate_ed25519()?;
        let private_pem = key.private_key_to_pem_pkcs8()?;
        let public_pem = key.public_key_to_pem()?;
        Ok((private_pem, public_pem))
    }

    /// Generate a fresh in-memory keypair.
    pub fn generate() -> Result<Self, KeyError> {
        let (private_pem, public_pem) = Self::generate_pem()?;
        Self::from_pem(&private_pem, &public_pem)
    }

    /// Generate a keypair and write it to the given paths.
    /// Existing files are overwritten.
    pub fn generate_to_files(private_path: &Path, public_path: &Path) -> Result<(), KeyError> {
        let (private_pem, public_pem) = Self::generate_pem()?;
        write_file(private_path, &private_pem)?;
        write_file(public_path, &public_pem)?;
        Ok(())
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// PEM-encoded public key, as served by the public key endpoint.
    pub fn public_key_pem(&self) -> &[u8] {
        &self.public_pem
    }

    fn check_matching(&self) -> Result<(), KeyError> {
        use jsonwebtoken::{Algorithm, Header, Validation};

        #[derive(serde::Serialize, serde::Deserialize, Clone)]
        struct Probe {
            sub: String,
        }

        let probe = Probe {
            sub: "probe".to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::EdDSA),
            &probe,
            &self.encoding_key,
        )
        .map_err(KeyError::InvalidPrivateKey)?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        jsonwebtoken::decode::<Probe>(&token, &self.decoding_key, &validation)
            .map(|_| ())
            .map_err(|_| KeyError::Mismatch)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, KeyError> {
    std::fs::read(path).map_err(|source| KeyError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), KeyError> {
    let err = |source| KeyError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(err)?;
    }
    std::fs::write(path, contents).map_err(err)
}
