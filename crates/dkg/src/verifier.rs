//! BLS12-381 implementation of the module's response checks.

use bls12_381::{G1Projective, G2Projective};
use group::Curve;
use tracing::debug;

use schain_dkg_module::{ResponseVerification, ResponseVerifier};
use schain_types::{G2Point, ParticipantIndex};

use crate::curve::{compress_g1, compress_g2, evaluation_point, scalar_from_bytes, sum_g2};
use crate::encryption::decrypt_with_ephemeral;
use crate::error::ParticipantError;
use crate::feldman::check_multiplied_commitments;

/// Verifies defenses with real curve arithmetic.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeldmanResponseVerifier;

impl FeldmanResponseVerifier {
    fn check(&self, request: &ResponseVerification<'_>) -> Result<bool, ParticipantError> {
        let secret = scalar_from_bytes(&request.secret.0)?;

        let ephemeral = compress_g1(&(G1Projective::generator() * secret).to_affine());
        if ephemeral != request.accuser_key_share.public_key {
            debug!("Revealed secret does not match the ephemeral key");
            return Ok(false);
        }

        let share = decrypt_with_ephemeral(
            &secret,
            request.accuser_encryption_key,
            request.accuser_key_share,
        )?;
        let share_g2 = compress_g2(&(G2Projective::generator() * share).to_affine());

        if share_g2 != *request.multiplied_share {
            debug!(accuser = request.accuser_index, "Share differs from the multiplied share");
            return Ok(false);
        }
        if *request.multiplied_share != *request.accuser_verification_vector_sum {
            debug!(
                accuser = request.accuser_index,
                "Share does not match the verification vector"
            );
            return Ok(false);
        }
        Ok(true)
    }
}

impl ResponseVerifier for FeldmanResponseVerifier {
    fn check_multiplied_vector(
        &self,
        accuser_index: ParticipantIndex,
        verification_vector: &[G2Point],
        multiplied: &[G2Point],
    ) -> bool {
        check_multiplied_commitments(
            verification_vector,
            multiplied,
            &evaluation_point(accuser_index),
        )
    }

    fn sum_points(&self, points: &[G2Point]) -> Option<G2Point> {
        sum_g2(points).ok()
    }

    fn verify_response(&self, request: &ResponseVerification<'_>) -> bool {
        self.check(request).unwrap_or_else(|err| {
            debug!(%err, "Response rejected");
            false
        })
    }
}
