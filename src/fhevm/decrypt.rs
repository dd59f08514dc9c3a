//! Authorized reveal of ciphertext handles.
//!
//! Every call generates a fresh ephemeral keypair and asks the wallet for a
//! fresh signature. Nothing is cached between calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use serde::Serialize;

use super::instance::{FhevmInstance, HandleContractPair, UserDecryptRequest};
use super::types::FheValue;
use crate::eip712::normalize_address;
use crate::error::FhevmError;
use crate::wallet::TypedDataSigner;

/// Validity window of every decryption signature.
pub const DECRYPTION_VALIDITY_DAYS: u64 = 7;

const SUFFIX_HEX_CHARS: usize = 32;

/// A signed, time-boxed authorization to reveal handles of a contract set.
pub struct DecryptionSignature {
    pub public_key: String,
    private_key: SecretString,
    pub signature: String,
    pub contract_addresses: Vec<String>,
    pub user_address: String,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

impl DecryptionSignature {
    /// Generate a keypair, build the typed data and have `signer` sign it.
    pub async fn create(
        instance: &FhevmInstance,
        contract_addresses: Vec<String>,
        signer: &dyn TypedDataSigner,
    ) -> Result<Self, FhevmError> {
        let failure = |reason: String| FhevmError::SignatureCreationFailure { reason };

        let user_address = signer.address().await.map_err(|e| failure(e.to_string()))?;
        let keypair = instance
            .generate_keypair()
            .map_err(|e| failure(e.to_string()))?;
        let start_timestamp = u64::try_from(Utc::now().timestamp())
            .map_err(|e| failure(format!("clock before epoch: {e}")))?;

        let typed = instance
            .create_eip712(
                &keypair.public_key,
                &contract_addresses,
                start_timestamp,
                DECRYPTION_VALIDITY_DAYS,
            )
            .map_err(|e| failure(e.to_string()))?;
        let signature = signer
            .sign_typed_data(&typed)
            .await
            .map_err(|e| failure(e.to_string()))?;

        tracing::debug!(
            user = %user_address,
            contracts = contract_addresses.len(),
            "Created decryption signature"
        );
        Ok(Self {
            public_key: keypair.public_key,
            private_key: keypair.private_key,
            signature,
            contract_addresses,
            user_address,
            start_timestamp,
            duration_days: DECRYPTION_VALIDITY_DAYS,
        })
    }

    pub fn expires_at(&self) -> u64 {
        self.start_timestamp
            .saturating_add(self.duration_days * 86_400)
    }

    pub fn is_valid_at(&self, unix_secs: u64) -> bool {
        unix_secs >= self.start_timestamp && unix_secs <= self.expires_at()
    }

    fn into_request(self) -> UserDecryptRequest {
        UserDecryptRequest {
            private_key: self.private_key,
            public_key: self.public_key,
            signature: self.signature,
            contract_addresses: self.contract_addresses,
            user_address: self.user_address,
            start_timestamp: self.start_timestamp,
            duration_days: self.duration_days,
        }
    }
}

impl fmt::Debug for DecryptionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptionSignature")
            .field("public_key", &self.public_key)
            .field("signature", &self.signature)
            .field("contract_addresses", &self.contract_addresses)
            .field("user_address", &self.user_address)
            .field("start_timestamp", &self.start_timestamp)
            .field("duration_days", &self.duration_days)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum HandleOutcome {
    Available(FheValue),
    /// Not revealed; carries the reason. Never reported as zero.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedHandle {
    pub handle: String,
    pub contract_address: String,
    pub outcome: HandleOutcome,
}

impl DecryptedHandle {
    pub fn value(&self) -> Option<&FheValue> {
        match &self.outcome {
            HandleOutcome::Available(value) => Some(value),
            HandleOutcome::Unavailable(_) => None,
        }
    }
}

pub struct DecryptionSessionManager {
    instance: FhevmInstance,
    signer: Arc<dyn TypedDataSigner>,
}

impl DecryptionSessionManager {
    pub fn new(instance: FhevmInstance, signer: Arc<dyn TypedDataSigner>) -> Self {
        Self { instance, signer }
    }

    /// Reveal a batch of handles. Only a failure to obtain the signature
    /// aborts the batch; every other failure is reported per handle.
    pub async fn decrypt(
        &self,
        pairs: &[HandleContractPair],
    ) -> Result<Vec<DecryptedHandle>, FhevmError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }

        let contracts = contract_set(pairs);
        let signature =
            DecryptionSignature::create(&self.instance, contracts, self.signer.as_ref()).await?;
        let request = signature.into_request();

        let outcomes: Vec<HandleOutcome> = match self.instance.user_decrypt(pairs, &request).await {
            Ok(results) => pairs
                .iter()
                .map(|pair| match resolve_handle(&results, &pair.handle, pairs.len()) {
                    Ok(Some(value)) => HandleOutcome::Available(value.clone()),
                    Ok(None) => HandleOutcome::Unavailable("handle was not revealed".to_string()),
                    Err(e) => HandleOutcome::Unavailable(e.to_string()),
                })
                .collect(),
            Err(e) => {
                if matches!(e, FhevmError::AuthorizationFailure { .. }) {
                    tracing::warn!(
                        "Reveal was not authorized; refresh the handles' access grants and retry: {}",
                        e
                    );
                } else {
                    tracing::warn!("Reveal failed: {}", e);
                }
                let reason = e.to_string();
                pairs
                    .iter()
                    .map(|_| HandleOutcome::Unavailable(reason.clone()))
                    .collect()
            }
        };

        Ok(pairs
            .iter()
            .zip(outcomes)
            .map(|(pair, outcome)| DecryptedHandle {
                handle: pair.handle.clone(),
                contract_address: pair.contract_address.clone(),
                outcome,
            })
            .collect())
    }

    /// Reveal one handle; `None` when it is unavailable.
    pub async fn decrypt_value(
        &self,
        handle: &str,
        contract_address: &str,
    ) -> Result<Option<FheValue>, FhevmError> {
        let results = self
            .decrypt(&[HandleContractPair::new(handle, contract_address)])
            .await?;
        Ok(results.into_iter().next().and_then(|r| match r.outcome {
            HandleOutcome::Available(value) => Some(value),
            HandleOutcome::Unavailable(_) => None,
        }))
    }
}

/// Distinct contract addresses of a batch, in first-seen order.
fn contract_set(pairs: &[HandleContractPair]) -> Vec<String> {
    let mut contracts: Vec<String> = Vec::new();
    for pair in pairs {
        let address = normalize_address(&pair.contract_address)
            .unwrap_or_else(|| pair.contract_address.clone());
        if !contracts.contains(&address) {
            contracts.push(address);
        }
    }
    contracts
}

/// Find the value for `handle` in a reveal result.
///
/// Precedence: exact key, unique case-insensitive key, unique match on the
/// last 32 hex characters, then the single returned value when exactly one
/// handle was requested. Several keys matching at one step are ambiguous.
pub fn resolve_handle<'a>(
    results: &'a HashMap<String, FheValue>,
    handle: &str,
    requested: usize,
) -> Result<Option<&'a FheValue>, FhevmError> {
    if let Some(value) = results.get(handle) {
        return Ok(Some(value));
    }

    let case_insensitive = results
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(handle));
    if let Some(value) = unique_match(case_insensitive, handle)? {
        return Ok(Some(value));
    }

    if let Some(suffix) = hex_suffix(handle) {
        let by_suffix = results
            .iter()
            .filter(|(key, _)| hex_suffix(key).is_some_and(|s| s == suffix));
        if let Some(value) = unique_match(by_suffix, handle)? {
            return Ok(Some(value));
        }
    }

    if results.len() == 1 && requested == 1 {
        return Ok(results.values().next());
    }
    Ok(None)
}

/// The only value in `matches`; more than one is ambiguous.
fn unique_match<'a>(
    mut matches: impl Iterator<Item = (&'a String, &'a FheValue)>,
    handle: &str,
) -> Result<Option<&'a FheValue>, FhevmError> {
    let Some((_, value)) = matches.next() else {
        return Ok(None);
    };
    if matches.next().is_some() {
        return Err(FhevmError::ResolutionAmbiguous {
            handle: handle.to_string(),
        });
    }
    Ok(Some(value))
}

fn hex_suffix(key: &str) -> Option<String> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    if digits.len() < SUFFIX_HEX_CHARS || !digits.is_ascii() {
        return None;
    }
    Some(digits[digits.len() - SUFFIX_HEX_CHARS..].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDLE: &str = "0xaaff000000000000000000000000000000000000000000000000000000001234";

    fn results(entries: &[(&str, u32)]) -> HashMap<String, FheValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), FheValue::U32(*v)))
            .collect()
    }

    #[test]
    fn case_insensitive_match_wins_over_fallbacks() {
        let upper = HANDLE.to_uppercase().replace("0X", "0x");
        let map = results(&[(&upper, 9), ("0xdeadbeef", 1)]);
        assert_eq!(
            resolve_handle(&map, HANDLE, 2).unwrap(),
            Some(&FheValue::U32(9))
        );
    }

    #[test]
    fn keys_differing_only_in_case_are_ambiguous() {
        let upper = HANDLE.to_uppercase().replace("0X", "0x");
        let mixed = format!("0xAAff{}", &HANDLE[6..]);
        let map = results(&[(&upper, 1), (&mixed, 2)]);
        assert!(matches!(
            resolve_handle(&map, HANDLE, 2),
            Err(FhevmError::ResolutionAmbiguous { .. })
        ));

        let exact = results(&[(HANDLE, 3), (&upper, 4)]);
        assert_eq!(
            resolve_handle(&exact, HANDLE, 2).unwrap(),
            Some(&FheValue::U32(3))
        );
    }

    #[test]
    fn suffix_match_tolerates_leading_byte_differences() {
        let rewritten = format!("0x00ff{}", &HANDLE[6..]);
        let map = results(&[(&rewritten, 5), ("0x01", 1)]);
        assert_eq!(
            resolve_handle(&map, HANDLE, 2).unwrap(),
            Some(&FheValue::U32(5))
        );
    }

    #[test]
    fn shared_suffix_is_ambiguous() {
        let a = format!("0x11{}", &HANDLE[4..]);
        let b = format!("0x22{}", &HANDLE[4..]);
        let map = results(&[(&a, 1), (&b, 2)]);
        assert!(matches!(
            resolve_handle(&map, HANDLE, 1),
            Err(FhevmError::ResolutionAmbiguous { .. })
        ));
    }

    #[test]
    fn single_result_fallback_only_for_single_requests() {
        let map = results(&[("unrelated-key", 77)]);
        assert_eq!(
            resolve_handle(&map, HANDLE, 1).unwrap(),
            Some(&FheValue::U32(77))
        );
        assert_eq!(resolve_handle(&map, HANDLE, 2).unwrap(), None);
        assert_eq!(resolve_handle(&HashMap::new(), HANDLE, 1).unwrap(), None);
    }

    #[test]
    fn contract_set_dedups_case_insensitively() {
        let pairs = [
            HandleContractPair::new("0x01", "0x00000000000000000000000000000000000000AA"),
            HandleContractPair::new("0x02", "0x00000000000000000000000000000000000000aa"),
            HandleContractPair::new("0x03", "0x00000000000000000000000000000000000000bb"),
        ];
        assert_eq!(
            contract_set(&pairs),
            vec![
                "0x00000000000000000000000000000000000000aa".to_string(),
                "0x00000000000000000000000000000000000000bb".to_string(),
            ]
        );
    }
}
