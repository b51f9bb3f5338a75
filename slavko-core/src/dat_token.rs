/*!
Delegated Authority Tokens: short-lived, hash-verifiable capability tokens tied
to a governance seal and epoch. Nothing is encrypted; integrity comes from a
blake3 digest over the token's identity fields.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hex characters kept from the nonce digest
pub const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedAuthorityToken {
    pub seal_hash: String,
    pub epoch: i64,
    pub index: i64,
    pub nonce: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

impl DelegatedAuthorityToken {
    /// True iff not revoked and the digest over the identity fields matches
    pub fn verify(&self) -> bool {
        verify(self)
    }

    /// A revoked copy; `self` is left untouched
    pub fn revoked(&self) -> Self {
        revoke(self)
    }
}

fn derive_nonce(seal_hash: &str, epoch: i64, minted_at: &DateTime<Utc>) -> String {
    let input = format!("{}:{}:{}", seal_hash, epoch, minted_at.timestamp_millis());
    let mut nonce = blake3::hash(input.as_bytes()).to_hex().to_string();
    nonce.truncate(NONCE_LEN);
    nonce
}

/// Digest over `sealHash:epoch:index:nonce`
pub fn token_hash(seal_hash: &str, epoch: i64, index: i64, nonce: &str) -> String {
    let input = format!("{}:{}:{}:{}", seal_hash, epoch, index, nonce);
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Mint a token at the current time
pub fn mint(seal_hash: &str, epoch: i64, index: i64) -> DelegatedAuthorityToken {
    mint_at(seal_hash, epoch, index, Utc::now())
}

/// Mint a token as of `minted_at`. The nonce depends on the mint time, so
/// identical arguments at different times produce different tokens.
pub fn mint_at(seal_hash: &str, epoch: i64, index: i64, minted_at: DateTime<Utc>) -> DelegatedAuthorityToken {
    let nonce = derive_nonce(seal_hash, epoch, &minted_at);
    let hash = token_hash(seal_hash, epoch, index, &nonce);
    debug!("Minted DAT {} for seal {} epoch {} index {}", &hash[..NONCE_LEN], seal_hash, epoch, index);

    DelegatedAuthorityToken {
        seal_hash: seal_hash.to_string(),
        epoch,
        index,
        nonce,
        hash,
        created_at: minted_at,
        revoked: false,
    }
}

/// Mint `count` tokens for one seal/epoch with indexes `0..count`
pub fn mint_batch(seal_hash: &str, epoch: i64, count: usize) -> Vec<DelegatedAuthorityToken> {
    (0..count)
        .map(|index| mint(seal_hash, epoch, index as i64))
        .collect()
}

/// Pure function of the token's own fields; revocation wins over a valid hash
pub fn verify(token: &DelegatedAuthorityToken) -> bool {
    if token.revoked {
        return false;
    }
    token_hash(&token.seal_hash, token.epoch, token.index, &token.nonce) == token.hash
}

pub fn revoke(token: &DelegatedAuthorityToken) -> DelegatedAuthorityToken {
    DelegatedAuthorityToken {
        revoked: true,
        ..token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::{assert_eq, assert_ne};

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn freshly_minted_token_verifies() {
        let token = mint("abc123", 1, 0);
        assert!(verify(&token));
        assert!(!token.revoked);
        assert_eq!(token.nonce.len(), NONCE_LEN);
        assert_eq!(token.hash.len(), 64);
    }

    #[test]
    fn mint_time_changes_nonce_and_hash() {
        let t0 = at(1_700_000_000_000);
        let first = mint_at("abc123", 1, 0, t0);
        let second = mint_at("abc123", 1, 0, t0 + Duration::milliseconds(1));

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.hash, second.hash);
        assert!(verify(&first));
        assert!(verify(&second));
    }

    #[test]
    fn same_inputs_at_same_instant_are_identical() {
        let t0 = at(1_700_000_000_000);
        assert_eq!(mint_at("seal", 4, 2, t0), mint_at("seal", 4, 2, t0));
    }

    #[test]
    fn revocation_short_circuits_valid_hash() {
        let token = mint("abc123", 1, 0);
        let revoked = revoke(&token);

        assert!(revoked.revoked);
        assert_eq!(revoked.hash, token.hash);
        assert!(!verify(&revoked));
        assert!(verify(&token));
        assert!(!token.revoked().verify());
    }

    #[test]
    fn tampered_fields_fail_verification() {
        let token = mint("abc123", 1, 0);

        let mut wrong_index = token.clone();
        wrong_index.index = 1;
        assert!(!verify(&wrong_index));

        let mut wrong_seal = token.clone();
        wrong_seal.seal_hash = "abc124".to_string();
        assert!(!verify(&wrong_seal));

        let mut wrong_hash = token;
        wrong_hash.hash = "0".repeat(64);
        assert!(!verify(&wrong_hash));
    }

    #[test]
    fn batch_covers_indexes_in_order() {
        let batch = mint_batch("seal", 7, 4);

        assert_eq!(batch.iter().map(|t| t.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert!(batch.iter().all(|t| t.seal_hash == "seal" && t.epoch == 7));
        assert!(batch.iter().all(verify));
        assert!(mint_batch("seal", 7, 0).is_empty());
    }

    #[test]
    fn negative_epoch_and_index_are_accepted() {
        let token = mint("seal", -3, -1);
        assert!(verify(&token));
    }

    #[test]
    fn json_uses_camel_case_and_defaults_revoked() {
        let token = mint_at("abc123", 1, 0, at(0));
        let json = serde_json::to_value(&token).unwrap();

        assert_eq!(json["sealHash"], "abc123");
        assert_eq!(json["revoked"], false);
        assert!(json.get("createdAt").is_some());

        let mut object = json.as_object().unwrap().clone();
        object.remove("revoked");
        let parsed: DelegatedAuthorityToken = serde_json::from_value(object.into()).unwrap();
        assert_eq!(parsed, token);
    }
}
