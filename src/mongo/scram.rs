//! Client side of SCRAM-SHA-256 (RFC 5802, RFC 7677).
//!
//! MongoDB runs the conversation through `saslStart`/`saslContinue` on the
//! `admin` database; this module only produces and checks the payloads.
//! Passwords are used as-is (SASLprep is the identity for the ASCII
//! passwords this operator provisions).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{OperatorError, Result};

type HmacSha256 = Hmac<Sha256>;

const GS2_HEADER: &str = "n,,";
/// base64("n,,"): the channel-binding field of the final message.
const CHANNEL_BINDING: &str = "biws";

/// One in-flight SCRAM conversation.
pub struct ScramClient {
    username: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        let mut nonce_bytes = [0u8; 18];
        rand::thread_rng().fill(&mut nonce_bytes[..]);
        Self::with_nonce(username, password, &BASE64.encode(nonce_bytes))
    }

    fn with_nonce(username: &str, password: &str, nonce: &str) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), nonce);
        Self {
            username: username.to_string(),
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare,
            server_signature: None,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `client-first-message`, the `saslStart` payload.
    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Consume `server-first-message`, produce `client-final-message`.
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let fields = parse_fields(server_first);
        let combined_nonce = fields
            .get("r")
            .ok_or_else(|| OperatorError::Auth("server-first missing nonce".into()))?;
        let salt_b64 = fields
            .get("s")
            .ok_or_else(|| OperatorError::Auth("server-first missing salt".into()))?;
        let iterations: u32 = fields
            .get("i")
            .and_then(|i| i.parse().ok())
            .ok_or_else(|| OperatorError::Auth("server-first missing iteration count".into()))?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(OperatorError::Auth("server nonce does not extend ours".into()));
        }
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| OperatorError::Auth(format!("bad salt encoding: {e}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let server_key = hmac(&salted_password, b"Server Key");

        let client_final_without_proof = format!("c={CHANNEL_BINDING},r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes()));

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(proof)
        ))
    }

    /// Check `server-final-message` against the signature we expect.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let fields = parse_fields(server_final);
        if let Some(err) = fields.get("e") {
            return Err(OperatorError::Auth(format!("server rejected auth: {err}")));
        }
        let verifier = fields
            .get("v")
            .ok_or_else(|| OperatorError::Auth("server-final missing verifier".into()))?;
        let received = BASE64
            .decode(verifier)
            .map_err(|e| OperatorError::Auth(format!("bad verifier encoding: {e}")))?;

        match &self.server_signature {
            Some(expected) if expected == &received => Ok(()),
            Some(_) => Err(OperatorError::Auth("server signature mismatch".into())),
            None => Err(OperatorError::Auth("verification before client-final".into())),
        }
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `,`-separated `k=v` fields; values may themselves contain `=`.
fn parse_fields(message: &str) -> std::collections::HashMap<&str, &str> {
    message
        .split(',')
        .filter_map(|part| part.split_once('='))
        .collect()
}

/// RFC 5802 username escaping.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}
