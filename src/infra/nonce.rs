//! Time-windowed action tokens for the credential round trip.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

/// Length of one validity window. A token stays valid for the window it was
/// issued in and the one after.
const TICK_SECONDS: i64 = 12 * 60 * 60;
const TOKEN_LEN: usize = 20;

#[derive(Clone)]
pub struct NonceSigner {
    secret: String,
}

impl std::fmt::Debug for NonceSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceSigner").finish_non_exhaustive()
    }
}

impl NonceSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn create(&self, action: &str) -> String {
        self.create_at(action, OffsetDateTime::now_utc())
    }

    pub fn create_at(&self, action: &str, now: OffsetDateTime) -> String {
        self.token(action, tick(now))
    }

    pub fn verify(&self, action: &str, nonce: &str) -> bool {
        self.verify_at(action, nonce, OffsetDateTime::now_utc())
    }

    pub fn verify_at(&self, action: &str, nonce: &str, now: OffsetDateTime) -> bool {
        if nonce.len() != TOKEN_LEN {
            return false;
        }
        let current = tick(now);
        [current, current - 1].into_iter().any(|tick| {
            let expected = self.token(action, tick);
            expected.as_bytes().ct_eq(nonce.as_bytes()).unwrap_u8() == 1
        })
    }

    fn token(&self, action: &str, tick: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"|");
        hasher.update(action.as_bytes());
        hasher.update(b"|");
        hasher.update(tick.to_string().as_bytes());
        let mut token = hex::encode(hasher.finalize());
        token.truncate(TOKEN_LEN);
        token
    }
}

fn tick(now: OffsetDateTime) -> i64 {
    now.unix_timestamp().div_euclid(TICK_SECONDS)
}
