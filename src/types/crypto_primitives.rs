/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives: Keccak-256 hashing and recoverable secp256k1 signatures.
//!
//! All signing in the engine follows one convention: the signer hashes the data with Keccak-256 and
//! signs the resulting digest, and the verifier recovers the signer's [`Address`] from the same digest.
//! An address is the last 20 bytes of the Keccak-256 hash of the uncompressed public key (without its
//! `0x04` prefix).

use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use sha3::{Digest, Keccak256};

use super::data_types::{Address, CryptoHash, Signature};

/// Compute the Keccak-256 hash of `data`.
pub fn keccak256(data: &[u8]) -> CryptoHash {
    CryptoHash::new(Keccak256::digest(data).into())
}

/// Compute the Keccak-256 hash of the concatenation of `parts`.
pub fn keccak256_concat(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// A secp256k1 signing key together with the [`Address`] it controls.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: Address,
}

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Self {
        let address = public_key_to_address(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Generate a fresh keypair from the operating system's random number generator.
    pub fn generate() -> Self {
        Self::new(SigningKey::random(&mut OsRng))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Hash `data` with Keccak-256 and sign the digest.
    pub fn sign(&self, data: &[u8]) -> Result<Signature, CryptoError> {
        self.sign_prehash(&keccak256(data))
    }

    /// Sign an already computed 32-byte digest.
    pub fn sign_prehash(&self, digest: &CryptoHash) -> Result<Signature, CryptoError> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|_| CryptoError::SigningFailed)?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(Signature::new(bytes))
    }
}

/// Derive the address controlled by `key`.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.as_slice()[12..]);
    Address::new(address)
}

/// Recover the address that produced `signature` over the Keccak-256 hash of `data`.
pub fn recover_address(data: &[u8], signature: &Signature) -> Result<Address, CryptoError> {
    recover_address_prehash(&keccak256(data), signature)
}

/// Recover the address that produced `signature` over `digest`.
pub fn recover_address_prehash(
    digest: &CryptoHash,
    signature: &Signature,
) -> Result<Address, CryptoError> {
    let bytes = signature.as_slice();
    let ecdsa_signature =
        EcdsaSignature::from_slice(&bytes[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    // Accept both the raw `{0, 1}` and the legacy `{27, 28}` recovery byte.
    let v = if bytes[64] >= 27 { bytes[64] - 27 } else { bytes[64] };
    let recovery_id = RecoveryId::from_byte(v).ok_or(CryptoError::InvalidSignature)?;
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &ecdsa_signature, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(public_key_to_address(&key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// The signature is malformed, or no public key can be recovered from it.
    InvalidSignature,
    SigningFailed,
}
