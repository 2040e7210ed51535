//! Password hashing with Argon2id.
//!
//! Digests are PHC strings, so the salt and the cost parameters travel with
//! the hash and verification needs nothing but the stored value.

use crate::store::PasswordDigest;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(argon2::Error),
    #[error("password hashing failed: {0}")]
    Hash(argon2::password_hash::Error),
}

#[derive(Clone, Debug)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    /// Hasher with the recommended Argon2id parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: Params::default(),
        }
    }

    /// Hasher with explicit costs (memory in KiB, iterations, lanes).
    ///
    /// # Errors
    /// Returns an error if the parameters are outside the ranges Argon2 accepts.
    pub fn with_costs(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(HashError::Params)?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Produce a salted digest. A fresh salt is drawn from the OS for every call.
    ///
    /// # Errors
    /// Returns an error if hashing fails; no digest is produced in that case.
    pub fn hash(&self, plaintext: &SecretString) -> Result<PasswordDigest, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plaintext.expose_secret().as_bytes(), &salt)
            .map_err(HashError::Hash)?;
        Ok(PasswordDigest::from_phc(hash.to_string()))
    }

    /// Check a candidate against a stored digest. Unparseable digests never verify.
    #[must_use]
    pub fn verify(&self, plaintext: &SecretString, digest: &PasswordDigest) -> bool {
        let Ok(parsed) = PasswordHash::new(digest.as_str()) else {
            return false;
        };
        // Verification uses the parameters embedded in the digest.
        Argon2::default()
            .verify_password(plaintext.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    // Cheap parameters so tests stay fast.
    CredentialHasher {
        params: Params::new(8, 1, 1, None).unwrap_or_default(),
    }
}
