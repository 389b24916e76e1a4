//! Deterministic assignment of an origin host to one of the CDN shards.

use sha2::{Digest, Sha256};

pub const SHARD_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardAssignment(u8);

impl ShardAssignment {
    /// First byte of the host's SHA-256 digest, reduced modulo the shard count.
    pub fn for_host(host: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        let digest = hasher.finalize();
        Self(digest[0] % SHARD_COUNT)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// `i<n>.<cdn domain>`.
    pub fn hostname(self, cdn_domain: &str) -> String {
        format!("i{}.{cdn_domain}", self.0)
    }

    pub fn all() -> impl Iterator<Item = ShardAssignment> {
        (0..SHARD_COUNT).map(ShardAssignment)
    }
}
