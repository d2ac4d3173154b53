//! JWK to PEM conversion
//!
//! Supports RSA keys and EC keys on P-256. Both are rendered as SPKI
//! `PUBLIC KEY` documents.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};

use crate::error::{Error, Result};

fn decode_component(value: &str, name: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| Error::KeyConversion(format!("'{name}' is not base64url: {e}")))
}

fn rsa_to_pem(n: &str, e: &str) -> Result<String> {
    let n = BigUint::from_bytes_be(&decode_component(n, "n")?);
    let e = BigUint::from_bytes_be(&decode_component(e, "e")?);
    let key = RsaPublicKey::new(n, e)
        .map_err(|e| Error::KeyConversion(format!("invalid RSA key: {e}")))?;
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::KeyConversion(format!("RSA key encoding failed: {e}")))
}

fn p256_to_pem(x: &str, y: &str) -> Result<String> {
    let x = decode_component(x, "x")?;
    let y = decode_component(y, "y")?;
    if x.len() != 32 || y.len() != 32 {
        return Err(Error::KeyConversion(
            "P-256 coordinates must be 32 bytes".to_string(),
        ));
    }

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(&x);
    sec1.extend_from_slice(&y);

    let key = p256::PublicKey::from_sec1_bytes(&sec1)
        .map_err(|_| Error::KeyConversion("point is not on P-256".to_string()))?;
    p256::pkcs8::EncodePublicKey::to_public_key_pem(&key, p256::pkcs8::LineEnding::LF)
        .map_err(|e| Error::KeyConversion(format!("EC key encoding failed: {e}")))
}

/// Render `jwk` as a PEM public key
///
/// # Errors
///
/// Returns [`Error::KeyConversion`] for key types other than RSA and EC
/// P-256, and for keys whose parameters do not form a valid public key.
pub fn jwk_to_pem(jwk: &Jwk) -> Result<String> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => rsa_to_pem(&rsa.n, &rsa.e),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => p256_to_pem(&ec.x, &ec.y),
            ref other => Err(Error::KeyConversion(format!(
                "unsupported curve {other:?}"
            ))),
        },
        _ => Err(Error::KeyConversion("unsupported key type".to_string())),
    }
}
