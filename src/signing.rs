//! Signature verification for the package update endpoint.
//!
//! Submissions to `/update_package` carry a minisign signature over the raw
//! request body. The verifying public key is supplied at startup; without
//! one the endpoint stays disabled.

use crate::error::{DirError, Result};
use std::io::Cursor;

/// Resolve the configured key to its content.
///
/// Operators may pass either a path to a key file or the key itself
/// (the base64 form or a full minisign key block). Reading as a file
/// takes precedence, so a key file whose path happens to start with
/// `RW` still resolves to its contents.
pub fn resolve_public_key(key: &str) -> Result<String> {
    let inline = key.starts_with("RW") || key.starts_with("untrusted comment:");
    match std::fs::read_to_string(key) {
        Ok(content) => Ok(content),
        Err(_) if inline => Ok(key.to_string()),
        Err(read_err) => {
            let looks_like_path =
                key.contains(std::path::MAIN_SEPARATOR) || key.ends_with(".pub");
            if looks_like_path {
                Err(DirError::PublicKey(format!(
                    "cannot read key file '{}': {}",
                    key, read_err
                )))
            } else {
                Err(DirError::PublicKey(format!(
                    "'{}' is neither a readable key file nor a minisign public key",
                    key
                )))
            }
        }
    }
}

/// Verify a detached minisign signature over `payload`.
pub fn verify_signature(payload: &[u8], signature: &str, public_key: &str) -> Result<()> {
    let pk = if public_key.starts_with("untrusted comment:") {
        let pk_box = minisign::PublicKeyBox::from_string(public_key)
            .map_err(|_| DirError::InvalidSignature)?;
        minisign::PublicKey::from_box(pk_box).map_err(|_| DirError::InvalidSignature)?
    } else {
        minisign::PublicKey::from_base64(public_key).map_err(|_| DirError::InvalidSignature)?
    };

    let sig_box =
        minisign::SignatureBox::from_string(signature).map_err(|_| DirError::InvalidSignature)?;

    let mut cursor = Cursor::new(payload);
    minisign::verify(&pk, &sig_box, &mut cursor, true, false, true)
        .map_err(|_| DirError::InvalidSignature)?;

    Ok(())
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Verification rejects random data without panicking.
        #[test]
        fn verify_rejects_random_input(
            payload in "[\\x00-\\x7F]{0,100}",
            signature in "[\\x00-\\x7F]{0,100}",
        ) {
            let key = "RWSBt4RfZg0FEiiDheTd5vYE60LQTeDH+MHrgWDR6TtIHuGMAuJjMIaL";
            prop_assert!(verify_signature(payload.as_bytes(), &signature, key).is_err());
        }
    }
}
