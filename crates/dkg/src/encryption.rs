//! Share encryption between dealer and recipient.
//!
//! Each member registers an encryption key `K = k · G1`. To send the share
//! for recipient `j` a dealer picks an ephemeral secret `e`, publishes
//! `E = e · G1`, and XORs the share with a keystream derived from the
//! Diffie-Hellman point `e · K_j = k_j · E`. Revealing `e` later lets anyone
//! recompute the share sent to `j` and nothing else.

use bls12_381::{G1Affine, G1Projective, Scalar};
use group::Curve;
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use schain_types::{G1Point, KeyShare};

use crate::curve::{compress_g1, decompress_g1, random_scalar, scalar_from_bytes};
use crate::error::ParticipantError;

const SHARE_KEY_INFO: &[u8] = b"SCHAIN-DKG-SHARE-V1";

/// A node's long-lived encryption key pair.
#[derive(Clone, Debug)]
pub struct EncryptionKeypair {
    secret: Scalar,
    public: G1Point,
}

impl EncryptionKeypair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(random_scalar(rng))
    }

    pub fn from_secret(secret: Scalar) -> Self {
        let public = compress_g1(&(G1Projective::generator() * secret).to_affine());
        Self { secret, public }
    }

    pub fn public_key(&self) -> &G1Point {
        &self.public
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    /// Open a share addressed to this key.
    pub fn decrypt(&self, key_share: &KeyShare) -> Result<Scalar, ParticipantError> {
        let ephemeral = decompress_g1(&key_share.public_key)?;
        apply_keystream(&ephemeral, &self.secret, &key_share.share)
    }
}

/// Encrypt `share` to `recipient` under the ephemeral secret.
pub fn encrypt_share(
    ephemeral_secret: &Scalar,
    recipient: &G1Point,
    share: &Scalar,
) -> Result<KeyShare, ParticipantError> {
    let recipient = decompress_g1(recipient)?;
    let key = share_key(&recipient, ephemeral_secret)?;

    let mut ciphertext = share.to_bytes();
    xor(&mut ciphertext, &key);

    Ok(KeyShare {
        public_key: compress_g1(&(G1Projective::generator() * ephemeral_secret).to_affine()),
        share: ciphertext,
    })
}

/// Recover the share sent to `recipient` from the dealer's revealed
/// ephemeral secret.
pub fn decrypt_with_ephemeral(
    ephemeral_secret: &Scalar,
    recipient: &G1Point,
    key_share: &KeyShare,
) -> Result<Scalar, ParticipantError> {
    let recipient = decompress_g1(recipient)?;
    apply_keystream(&recipient, ephemeral_secret, &key_share.share)
}

fn apply_keystream(
    point: &G1Affine,
    secret: &Scalar,
    ciphertext: &[u8; 32],
) -> Result<Scalar, ParticipantError> {
    let key = share_key(point, secret)?;
    let mut plaintext = *ciphertext;
    xor(&mut plaintext, &key);
    scalar_from_bytes(&plaintext)
}

fn share_key(point: &G1Affine, secret: &Scalar) -> Result<[u8; 32], ParticipantError> {
    let shared = (G1Projective::from(point) * secret).to_affine();

    let hk = Hkdf::<Sha256>::new(None, &shared.to_compressed());
    let mut key = [0u8; 32];
    hk.expand(SHARE_KEY_INFO, &mut key)
        .map_err(|_| ParticipantError::KeyDerivationFailed)?;
    Ok(key)
}

fn xor(data: &mut [u8; 32], key: &[u8; 32]) {
    for (byte, k) in data.iter_mut().zip(key) {
        *byte ^= k;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_recipient_and_dealer_recover_share() {
        let mut rng = OsRng;
        let recipient = EncryptionKeypair::generate(&mut rng);
        let ephemeral = random_scalar(&mut rng);
        let share = random_scalar(&mut rng);

        let key_share = encrypt_share(&ephemeral, recipient.public_key(), &share).unwrap();
        assert_ne!(key_share.share, share.to_bytes());

        assert_eq!(recipient.decrypt(&key_share).unwrap(), share);
        assert_eq!(
            decrypt_with_ephemeral(&ephemeral, recipient.public_key(), &key_share).unwrap(),
            share
        );
    }

    #[test]
    fn test_wrong_key_does_not_recover_share() {
        let mut rng = OsRng;
        let recipient = EncryptionKeypair::generate(&mut rng);
        let other = EncryptionKeypair::generate(&mut rng);
        let ephemeral = random_scalar(&mut rng);
        let share = random_scalar(&mut rng);

        let key_share = encrypt_share(&ephemeral, recipient.public_key(), &share).unwrap();
        // Either the keystream yields a non-canonical scalar or a different one.
        assert_ne!(other.decrypt(&key_share).ok(), Some(share));
    }
}
