//! Signing and verification of response commands
//!
//! The signature covers the canonical JSON of the command with all four
//! signature-bearing fields removed (`signature`, `signing_key_id`,
//! `signing_algorithm`, `signed_at`).

use ed25519_dalek::VerifyingKey;
use ransomeye_types::SignedCommand;

use crate::{
    command_signing_bytes, verify_detached, CryptoResult, PayloadSigner,
};

pub const SIGNING_ALGORITHM: &str = "ed25519";

/// Sign a command in place
pub fn sign_command(command: &mut SignedCommand, signer: &dyn PayloadSigner) -> CryptoResult<()> {
    command.signature = None;
    command.signing_key_id = None;
    command.signing_algorithm = None;
    command.signed_at = None;

    let message = command_signing_bytes(command)?;
    let signed = signer.sign(&message)?;

    command.signature = Some(signed.signature);
    command.signing_key_id = Some(signed.signing_key_id);
    command.signing_algorithm = Some(SIGNING_ALGORITHM.to_string());
    command.signed_at = Some(signed.signed_at);
    Ok(())
}

/// Verify a command's detached signature against a verification key.
/// Returns `Ok(false)` when the signature does not match.
pub fn verify_command(
    command: &SignedCommand,
    verifying_key: &VerifyingKey,
) -> CryptoResult<bool> {
    let Some(signature) = command.signature.as_deref() else {
        return Ok(false);
    };
    let message = command_signing_bytes(command)?;
    verify_detached(verifying_key, &message, signature)
}
