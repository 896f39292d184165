//! Keypair generation for freshly created addresses.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::types::{CurveType, PublicKey, SignatureType, SigningPayload};

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("unable to generate keypair: curve {0} is not supported")]
    UnsupportedCurve(CurveType),

    #[error("signature type {0} is not supported for curve {1}")]
    UnsupportedSignatureType(SignatureType, CurveType),

    #[error("invalid private key length: expected {0} bytes, got {1}")]
    InvalidPrivateKey(usize, usize),
}

/// Public key plus the private key bytes needed to sign for it.
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    private_key: Vec<u8>,
}

// Never print private key material
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new keypair on `curve` from the operating system RNG.
    pub fn generate(curve: CurveType) -> Result<Self, KeyError> {
        match curve {
            CurveType::Edwards25519 => {
                let signing_key = SigningKey::generate(&mut OsRng);
                Ok(Self::from_signing_key(&signing_key))
            }
            other => Err(KeyError::UnsupportedCurve(other)),
        }
    }

    /// Rebuild an ed25519 keypair from its 32 secret bytes.
    pub fn from_ed25519_secret(secret: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = secret
            .try_into()
            .map_err(|_| KeyError::InvalidPrivateKey(32, secret.len()))?;
        Ok(Self::from_signing_key(&SigningKey::from_bytes(&bytes)))
    }

    fn from_signing_key(signing_key: &SigningKey) -> Self {
        Self {
            public_key: PublicKey {
                bytes: signing_key.verifying_key().to_bytes().to_vec(),
                curve_type: CurveType::Edwards25519,
            },
            private_key: signing_key.to_bytes().to_vec(),
        }
    }

    pub fn curve_type(&self) -> CurveType {
        self.public_key.curve_type
    }

    /// Sign the payload bytes, returning the raw signature.
    pub fn sign(&self, payload: &SigningPayload) -> Result<(SignatureType, Vec<u8>), KeyError> {
        match self.curve_type() {
            CurveType::Edwards25519 => {
                let signature_type = payload.signature_type.unwrap_or(SignatureType::Ed25519);
                if signature_type != SignatureType::Ed25519 {
                    return Err(KeyError::UnsupportedSignatureType(
                        signature_type,
                        CurveType::Edwards25519,
                    ));
                }

                let signing_key = SigningKey::from_bytes(&self.ed25519_secret()?);
                let signature = signing_key.sign(&payload.bytes);
                Ok((SignatureType::Ed25519, signature.to_bytes().to_vec()))
            }
            other => Err(KeyError::UnsupportedCurve(other)),
        }
    }

    fn ed25519_secret(&self) -> Result<[u8; 32], KeyError> {
        self.private_key
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPrivateKey(32, self.private_key.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[test]
    fn test_generate_edwards25519() {
        let keypair = KeyPair::generate(CurveType::Edwards25519).unwrap();
        assert_eq!(keypair.curve_type(), CurveType::Edwards25519);
        assert_eq!(keypair.public_key.bytes.len(), 32);
    }

    #[test]
    fn test_generate_unsupported_curve() {
        let err = KeyPair::generate(CurveType::Secp256k1).unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedCurve(CurveType::Secp256k1)));
    }

    #[test]
    fn test_sign_verifies_with_public_key() {
        let keypair = KeyPair::from_ed25519_secret(&[7u8; 32]).unwrap();
        let payload = SigningPayload {
            address: "addr".to_string(),
            bytes: b"payload".to_vec(),
            signature_type: None,
        };

        let (signature_type, bytes) = keypair.sign(&payload).unwrap();
        assert_eq!(signature_type, SignatureType::Ed25519);

        let public: [u8; 32] = keypair.public_key.bytes.as_slice().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&public).unwrap();
        let signature = Signature::from_slice(&bytes).unwrap();
        assert!(verifying_key.verify(b"payload", &signature).is_ok());
    }

    #[test]
    fn test_sign_rejects_ecdsa_payload() {
        let keypair = KeyPair::from_ed25519_secret(&[1u8; 32]).unwrap();
        let payload = SigningPayload {
            address: "addr".to_string(),
            bytes: vec![1, 2, 3],
            signature_type: Some(SignatureType::Ecdsa),
        };
        assert!(keypair.sign(&payload).is_err());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let keypair = KeyPair::from_ed25519_secret(&[9u8; 32]).unwrap();
        let printed = format!("{:?}", keypair);
        assert!(!printed.contains("private_key"));
    }
}
