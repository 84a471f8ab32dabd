//! Conversions between BLS12-381 values and their wire encodings.

use bls12_381::{G1Affine, G2Affine, G2Projective, Scalar};
use group::Curve;
use rand::{CryptoRng, RngCore};

use schain_types::{G1Point, G2Point, Scalar as ScalarBytes};

use crate::error::ParticipantError;

pub fn compress_g1(point: &G1Affine) -> G1Point {
    G1Point(point.to_compressed())
}

pub fn decompress_g1(point: &G1Point) -> Result<G1Affine, ParticipantError> {
    Option::from(G1Affine::from_compressed(&point.0)).ok_or(ParticipantError::InvalidG1Point)
}

pub fn compress_g2(point: &G2Affine) -> G2Point {
    G2Point(point.to_compressed())
}

pub fn decompress_g2(point: &G2Point) -> Result<G2Affine, ParticipantError> {
    Option::from(G2Affine::from_compressed(&point.0)).ok_or(ParticipantError::InvalidG2Point)
}

/// Sum of G2 points.
pub fn sum_g2(points: &[G2Point]) -> Result<G2Point, ParticipantError> {
    let mut sum = G2Projective::identity();
    for point in points {
        sum += G2Projective::from(decompress_g2(point)?);
    }
    Ok(compress_g2(&sum.to_affine()))
}

pub fn scalar_to_bytes(scalar: &Scalar) -> ScalarBytes {
    ScalarBytes(scalar.to_bytes())
}

/// Decode a canonical little-endian scalar.
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> Result<Scalar, ParticipantError> {
    Option::from(Scalar::from_bytes(bytes)).ok_or(ParticipantError::InvalidScalar)
}

/// Uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    let mut bytes = [0u8; 64];
    rng.fill_bytes(&mut bytes);
    Scalar::from_bytes_wide(&bytes)
}

/// Evaluation point of the participant at `index`.
pub fn evaluation_point(index: u32) -> Scalar {
    Scalar::from(index as u64 + 1)
}
