//! Feldman Verifiable Secret Sharing.
//!
//! Extends Shamir's secret sharing with commitments that allow
//! verification of shares without revealing the secret. Participant `i`
//! always evaluates at `x = i + 1`.

use bls12_381::{G2Projective, Scalar};
use ff::Field;
use group::Curve;
use rand::{CryptoRng, RngCore};

use schain_types::G2Point;

use crate::curve::{compress_g2, decompress_g2, random_scalar};
use crate::error::ParticipantError;

/// Generate a random polynomial of degree t-1 with given constant term.
///
/// Returns coefficients [a_0, a_1, ..., a_{t-1}] where:
/// - a_0 is the secret (constant term)
/// - f(x) = a_0 + a_1*x + a_2*x^2 + ... + a_{t-1}*x^{t-1}
pub fn generate_polynomial<R: RngCore + CryptoRng>(
    secret: &Scalar,
    degree: usize,
    rng: &mut R,
) -> Vec<Scalar> {
    let mut coefficients = Vec::with_capacity(degree);
    coefficients.push(*secret);

    for _ in 1..degree {
        coefficients.push(random_scalar(rng));
    }

    coefficients
}

/// Evaluate polynomial at a point.
///
/// f(x) = a_0 + a_1*x + a_2*x^2 + ... using Horner's method
pub fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    let mut result = Scalar::ZERO;
    for coeff in coefficients.iter().rev() {
        result = result * x + coeff;
    }
    result
}

/// Generate Feldman commitments for polynomial coefficients.
///
/// C_i = g^{a_i} for each coefficient a_i
pub fn generate_commitments(coefficients: &[Scalar]) -> Vec<G2Point> {
    coefficients
        .iter()
        .map(|coeff| compress_g2(&(G2Projective::generator() * coeff).to_affine()))
        .collect()
}

/// Scale each commitment by the matching power of `x`: `C_k · x^k`.
///
/// Summing the result yields `g^{f(x)}`.
pub fn multiply_commitments(
    commitments: &[G2Point],
    x: &Scalar,
) -> Result<Vec<G2Point>, ParticipantError> {
    let mut x_power = Scalar::ONE;
    let mut multiplied = Vec::with_capacity(commitments.len());

    for commitment in commitments {
        let c = G2Projective::from(decompress_g2(commitment)?);
        multiplied.push(compress_g2(&(c * x_power).to_affine()));
        x_power *= x;
    }

    Ok(multiplied)
}

/// Check that `multiplied` is `commitments` scaled by powers of `x`.
pub fn check_multiplied_commitments(
    commitments: &[G2Point],
    multiplied: &[G2Point],
    x: &Scalar,
) -> bool {
    if commitments.len() != multiplied.len() {
        return false;
    }
    match multiply_commitments(commitments, x) {
        Ok(expected) => expected == multiplied,
        Err(_) => false,
    }
}

/// Verify a share against Feldman commitments.
///
/// Checks that g^{share} = Π C_i^{x^i}
pub fn verify_share(share: &Scalar, x: &Scalar, commitments: &[G2Point]) -> bool {
    // Compute LHS: g^{share}
    let lhs = (G2Projective::generator() * share).to_affine();

    // Compute RHS: Π C_i^{x^i}
    let mut x_power = Scalar::ONE;
    let mut rhs = G2Projective::identity();

    for commitment in commitments {
        let Ok(c) = decompress_g2(commitment) else {
            return false;
        };
        rhs += G2Projective::from(c) * x_power;
        x_power *= x;
    }

    lhs == rhs.to_affine()
}

/// Combine shares using Lagrange interpolation to reconstruct secret.
///
/// Given shares (x_i, y_i), computes f(0) = Σ y_i * λ_i
/// where λ_i = Π_{j≠i} (x_j / (x_j - x_i))
pub fn combine_shares(shares: &[(Scalar, Scalar)]) -> Option<Scalar> {
    if shares.is_empty() {
        return None;
    }

    let mut result = Scalar::ZERO;

    for (i, (x_i, y_i)) in shares.iter().enumerate() {
        let mut numerator = Scalar::ONE;
        let mut denominator = Scalar::ONE;

        for (j, (x_j, _)) in shares.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator *= x_j;
            denominator *= x_j - x_i;
        }

        let denom_inv: Option<Scalar> = denominator.invert().into();
        result += y_i * numerator * denom_inv?;
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{evaluation_point, sum_g2};
    use rand::rngs::OsRng;

    #[test]
    fn test_polynomial_evaluation() {
        // f(x) = 5 + 3x + 2x^2
        let coeffs = vec![Scalar::from(5u64), Scalar::from(3u64), Scalar::from(2u64)];

        assert_eq!(evaluate_polynomial(&coeffs, &Scalar::ZERO), Scalar::from(5u64));
        assert_eq!(evaluate_polynomial(&coeffs, &Scalar::ONE), Scalar::from(10u64));
        assert_eq!(
            evaluate_polynomial(&coeffs, &Scalar::from(2u64)),
            Scalar::from(19u64)
        );
    }

    #[test]
    fn test_share_verification() {
        let mut rng = OsRng;
        let secret = random_scalar(&mut rng);
        let coeffs = generate_polynomial(&secret, 3, &mut rng);
        let commitments = generate_commitments(&coeffs);

        for index in 0..5 {
            let x = evaluation_point(index);
            let share = evaluate_polynomial(&coeffs, &x);
            assert!(verify_share(&share, &x, &commitments));
            assert!(!verify_share(&(share + Scalar::ONE), &x, &commitments));
        }
    }

    #[test]
    fn test_multiplied_commitments_sum_to_share() {
        let mut rng = OsRng;
        let secret = random_scalar(&mut rng);
        let coeffs = generate_polynomial(&secret, 4, &mut rng);
        let commitments = generate_commitments(&coeffs);

        let x = evaluation_point(2);
        let multiplied = multiply_commitments(&commitments, &x).unwrap();
        assert!(check_multiplied_commitments(&commitments, &multiplied, &x));
        assert!(!check_multiplied_commitments(&commitments, &multiplied, &evaluation_point(3)));
        assert!(!check_multiplied_commitments(&commitments, &multiplied[1..], &x));

        let share = evaluate_polynomial(&coeffs, &x);
        let expected = compress_g2(&(G2Projective::generator() * share).to_affine());
        assert_eq!(sum_g2(&multiplied).unwrap(), expected);
    }

    #[test]
    fn test_share_reconstruction() {
        let mut rng = OsRng;
        let secret = random_scalar(&mut rng);
        let coeffs = generate_polynomial(&secret, 3, &mut rng);

        let shares: Vec<(Scalar, Scalar)> = (0..5)
            .map(|i| {
                let x = evaluation_point(i);
                (x, evaluate_polynomial(&coeffs, &x))
            })
            .collect();

        assert_eq!(combine_shares(&shares[..3]).unwrap(), secret);
        assert_eq!(combine_shares(&shares[2..5]).unwrap(), secret);
        assert!(combine_shares(&[]).is_none());
    }
}
