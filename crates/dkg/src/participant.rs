//! DKG participant implementation.
//!
//! A participant deals its own polynomial, checks the shares dealt to it,
//! and, when accused, produces the two-stage defense for the accuser's share.

use bls12_381::{G2Projective, Scalar};
use group::Curve;
use rand::{CryptoRng, RngCore};

use schain_types::{G1Point, G2Point, ParticipantIndex};

use crate::curve::{compress_g2, evaluation_point, random_scalar, scalar_to_bytes, sum_g2};
use crate::encryption::{encrypt_share, EncryptionKeypair};
use crate::error::ParticipantError;
use crate::feldman::{
    evaluate_polynomial, generate_commitments, generate_polynomial, multiply_commitments,
    verify_share,
};
use crate::types::{BroadcastMessage, DkgConfig, DkgOutput, PreResponseMessage, ResponseMessage};

/// State of a DKG participant for one ceremony.
pub struct DkgParticipant {
    config: DkgConfig,
    keypair: EncryptionKeypair,
    /// Encryption key of every member, in group order
    member_keys: Vec<G1Point>,
    /// Our secret polynomial coefficients
    polynomial: Option<Vec<Scalar>>,
    /// Ephemeral secret per recipient
    ephemerals: Vec<Scalar>,
    /// What we broadcasted
    broadcast: Option<BroadcastMessage>,
    /// Verification vector per dealer
    verification_vectors: Vec<Option<Vec<G2Point>>>,
    /// Verified share per dealer
    received_shares: Vec<Option<Scalar>>,
}

impl DkgParticipant {
    /// Create a new DKG participant.
    pub fn new(
        config: DkgConfig,
        keypair: EncryptionKeypair,
        member_keys: Vec<G1Point>,
    ) -> Result<Self, ParticipantError> {
        if member_keys.len() != config.n as usize {
            return Err(ParticipantError::WrongKeyCount {
                expected: config.n,
                got: member_keys.len() as u32,
            });
        }

        let n = config.n as usize;
        Ok(Self {
            config,
            keypair,
            member_keys,
            polynomial: None,
            ephemerals: Vec::new(),
            broadcast: None,
            verification_vectors: vec![None; n],
            received_shares: vec![None; n],
        })
    }

    pub fn index(&self) -> ParticipantIndex {
        self.config.index
    }

    pub fn config(&self) -> &DkgConfig {
        &self.config
    }

    /// Deal our polynomial. Calling again returns the same broadcast.
    pub fn broadcast<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<BroadcastMessage, ParticipantError> {
        if let Some(broadcast) = &self.broadcast {
            return Ok(broadcast.clone());
        }

        let secret = random_scalar(rng);
        let polynomial = generate_polynomial(&secret, self.config.threshold as usize, rng);
        let verification_vector = generate_commitments(&polynomial);

        let mut ephemerals = Vec::with_capacity(self.member_keys.len());
        let mut secret_key_contribution = Vec::with_capacity(self.member_keys.len());
        for (j, recipient) in self.member_keys.iter().enumerate() {
            let share = evaluate_polynomial(&polynomial, &evaluation_point(j as u32));
            let ephemeral = random_scalar(rng);
            secret_key_contribution.push(encrypt_share(&ephemeral, recipient, &share)?);
            ephemerals.push(ephemeral);
        }

        let broadcast = BroadcastMessage {
            verification_vector,
            secret_key_contribution,
        };
        self.polynomial = Some(polynomial);
        self.ephemerals = ephemerals;
        self.broadcast = Some(broadcast.clone());
        Ok(broadcast)
    }

    /// Decrypt and check the share `from` dealt to us.
    ///
    /// An `InvalidShare` error means `from` should be accused.
    pub fn process_broadcast(
        &mut self,
        from: ParticipantIndex,
        message: &BroadcastMessage,
    ) -> Result<(), ParticipantError> {
        let slot = from as usize;
        if slot >= self.received_shares.len() {
            return Err(ParticipantError::InvalidParticipantIndex(from));
        }
        if self.received_shares[slot].is_some() {
            return Err(ParticipantError::DuplicateBroadcast(from));
        }

        if message.verification_vector.len() != self.config.threshold as usize {
            return Err(ParticipantError::WrongVectorLength {
                expected: self.config.threshold,
                got: message.verification_vector.len() as u32,
            });
        }
        if message.secret_key_contribution.len() != self.config.n as usize {
            return Err(ParticipantError::WrongShareCount {
                expected: self.config.n,
                got: message.secret_key_contribution.len() as u32,
            });
        }

        let key_share = &message.secret_key_contribution[self.config.index as usize];
        let share = self
            .keypair
            .decrypt(key_share)
            .map_err(|_| ParticipantError::InvalidShare(from))?;

        let x = evaluation_point(self.config.index);
        if !verify_share(&share, &x, &message.verification_vector) {
            return Err(ParticipantError::InvalidShare(from));
        }

        self.verification_vectors[slot] = Some(message.verification_vector.clone());
        self.received_shares[slot] = Some(share);
        Ok(())
    }

    pub fn has_share_from(&self, from: ParticipantIndex) -> bool {
        self.received_shares
            .get(from as usize)
            .is_some_and(Option::is_some)
    }

    /// Whether a verified share arrived from every member.
    pub fn has_all_data(&self) -> bool {
        self.received_shares.iter().all(Option::is_some)
    }

    /// Re-submission of our broadcast plus the verification vector scaled
    /// for `accuser`.
    pub fn pre_response(
        &self,
        accuser: ParticipantIndex,
    ) -> Result<PreResponseMessage, ParticipantError> {
        let broadcast = self.broadcast.as_ref().ok_or(ParticipantError::NotBroadcasted)?;
        if accuser >= self.config.n {
            return Err(ParticipantError::InvalidParticipantIndex(accuser));
        }

        let verification_vector_multiplied =
            multiply_commitments(&broadcast.verification_vector, &evaluation_point(accuser))?;

        Ok(PreResponseMessage {
            verification_vector: broadcast.verification_vector.clone(),
            verification_vector_multiplied,
            secret_key_contribution: broadcast.secret_key_contribution.clone(),
        })
    }

    /// Reveal the ephemeral secret behind `accuser`'s share.
    pub fn response(&self, accuser: ParticipantIndex) -> Result<ResponseMessage, ParticipantError> {
        let polynomial = self.polynomial.as_ref().ok_or(ParticipantError::NotBroadcasted)?;
        let ephemeral = self
            .ephemerals
            .get(accuser as usize)
            .ok_or(ParticipantError::InvalidParticipantIndex(accuser))?;

        let share = evaluate_polynomial(polynomial, &evaluation_point(accuser));
        let multiplied = (G2Projective::generator() * share).to_affine();

        Ok(ResponseMessage {
            secret: scalar_to_bytes(ephemeral),
            multiplied_share: compress_g2(&multiplied),
        })
    }

    /// Finalize DKG and compute output.
    pub fn finalize(&self) -> Result<DkgOutput, ParticipantError> {
        let shares: Option<Vec<&Scalar>> =
            self.received_shares.iter().map(Option::as_ref).collect();
        let shares = shares.ok_or(ParticipantError::ProtocolIncomplete)?;

        // Our secret share is the sum of all received shares
        let secret_share: Scalar = shares.into_iter().sum();
        let public_share = compress_g2(&(G2Projective::generator() * secret_share).to_affine());

        let free_coefficients = self
            .verification_vectors
            .iter()
            .map(|vv| vv.as_ref().and_then(|vv| vv.first().cloned()))
            .collect::<Option<Vec<G2Point>>>()
            .ok_or(ParticipantError::ProtocolIncomplete)?;
        let group_public_key = sum_g2(&free_coefficients)?;

        Ok(DkgOutput {
            secret_share: scalar_to_bytes(&secret_share),
            public_share,
            group_public_key,
            threshold: self.config.threshold,
        })
    }
}
