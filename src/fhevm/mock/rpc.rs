//! Platform discovery against a local FHEVM dev node.

use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::eip712::{
    Eip712Domain, decode_hex, eip712_domain, encode_hex_prefixed, format_address,
    normalize_address,
};
use crate::error::FhevmError;
use crate::fhevm::abi::{IAcl, IEip712Domain};
use crate::fhevm::handle::Handle;
use crate::rpc::JsonRpcClient;

pub const RELAYER_METADATA_METHOD: &str = "fhevm_relayer_metadata";

/// Dev-node method returning the cleartexts behind a list of handles.
pub const CLEARTEXT_METHOD: &str = "fhevm_getClearText";

/// Protocol contract addresses reported by the dev node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: String,
    #[serde(rename = "InputVerifierAddress")]
    pub input_verifier_address: String,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: String,
}

/// Decoded return value of a contract's `eip712Domain()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl ContractDomain {
    pub fn to_eip712(&self) -> Eip712Domain {
        eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract,
        }
    }
}

impl TryFrom<IEip712Domain::eip712DomainReturn> for ContractDomain {
    type Error = String;

    fn try_from(ret: IEip712Domain::eip712DomainReturn) -> Result<Self, Self::Error> {
        let chain_id =
            u64::try_from(ret.chainId).map_err(|_| "chain id does not fit in u64".to_string())?;
        Ok(Self {
            name: ret.name,
            version: ret.version,
            chain_id,
            verifying_contract: ret.verifyingContract,
        })
    }
}

fn unreachable(rpc: &JsonRpcClient, reason: impl std::fmt::Display) -> FhevmError {
    FhevmError::PlatformUnreachable {
        url: rpc.url().to_string(),
        reason: reason.to_string(),
    }
}

pub async fn fetch_relayer_metadata(rpc: &JsonRpcClient) -> Result<RelayerMetadata, FhevmError> {
    let raw = rpc
        .call(RELAYER_METADATA_METHOD, json!([]))
        .await
        .map_err(|e| unreachable(rpc, format!("{e}. Is the dev node running with FHEVM?")))?;
    let metadata: RelayerMetadata =
        serde_json::from_value(raw).map_err(|e| unreachable(rpc, format!("bad metadata: {e}")))?;
    for (label, address) in [
        ("ACLAddress", &metadata.acl_address),
        ("InputVerifierAddress", &metadata.input_verifier_address),
        ("KMSVerifierAddress", &metadata.kms_verifier_address),
    ] {
        if normalize_address(address).is_none() {
            return Err(unreachable(rpc, format!("metadata {label} is not an address")));
        }
    }
    Ok(metadata)
}

/// Run a view call against `to` at the latest block.
async fn eth_call<C: SolCall>(
    rpc: &JsonRpcClient,
    to: &str,
    call: &C,
) -> Result<C::Return, FhevmError> {
    let failed = |reason: String| unreachable(rpc, format!("{} on {to}: {reason}", C::SIGNATURE));
    let params = json!([
        { "to": to, "data": encode_hex_prefixed(&call.abi_encode()) },
        "latest"
    ]);
    let raw = rpc
        .call("eth_call", params)
        .await
        .map_err(|e| failed(e.to_string()))?;
    let data = raw
        .as_str()
        .ok_or_else(|| failed("eth_call returned a non-string result".to_string()))
        .and_then(|hex| decode_hex(hex).map_err(|e| failed(e.to_string())))?;
    C::abi_decode_returns(&data, true).map_err(|e| failed(e.to_string()))
}

/// Query `eip712Domain()` on `contract`.
pub async fn fetch_contract_domain(
    rpc: &JsonRpcClient,
    contract: &str,
) -> Result<ContractDomain, FhevmError> {
    let ret = eth_call(rpc, contract, &IEip712Domain::eip712DomainCall {}).await?;
    ContractDomain::try_from(ret)
        .map_err(|reason| unreachable(rpc, format!("eip712Domain() on {contract}: {reason}")))
}

/// Ask the on-chain ACL whether `account` may use `handle`.
pub async fn fetch_acl_permission(
    rpc: &JsonRpcClient,
    acl: &str,
    handle: &Handle,
    account: Address,
) -> Result<bool, FhevmError> {
    let call = IAcl::isAllowedCall {
        handle: B256::from(*handle.as_bytes()),
        account,
    };
    Ok(eth_call(rpc, acl, &call).await?.allowed)
}

/// Cleartext words the dev node recorded for `handles`, in request order.
pub async fn fetch_cleartexts(
    rpc: &JsonRpcClient,
    handles: &[Handle],
) -> Result<Vec<[u8; 32]>, FhevmError> {
    let hexes: Vec<String> = handles.iter().map(Handle::to_hex).collect();
    let raw = rpc
        .call(CLEARTEXT_METHOD, json!([hexes]))
        .await
        .map_err(|e| unreachable(rpc, format!("{CLEARTEXT_METHOD}: {e}")))?;
    let items = raw
        .as_array()
        .ok_or_else(|| unreachable(rpc, format!("{CLEARTEXT_METHOD} returned a non-array")))?;
    if items.len() != handles.len() {
        return Err(unreachable(
            rpc,
            format!(
                "{CLEARTEXT_METHOD} returned {} values for {} handles",
                items.len(),
                handles.len()
            ),
        ));
    }
    items
        .iter()
        .map(|item| {
            cleartext_word(item)
                .ok_or_else(|| unreachable(rpc, format!("{CLEARTEXT_METHOD} returned {item}")))
        })
        .collect()
}

/// A cleartext given as a hex or decimal string, or a JSON number.
fn cleartext_word(value: &Value) -> Option<[u8; 32]> {
    let number = match value {
        Value::String(s) => U256::from_str(s.trim()).ok()?,
        Value::Number(n) => U256::from(n.as_u64()?),
        _ => return None,
    };
    Some(number.to_be_bytes::<32>())
}

/// Everything the simulated coprocessor needs, resolved from a live node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParams {
    pub chain_id: u64,
    pub gateway_chain_id: u64,
    pub acl_address: String,
    pub input_verifier_address: String,
    pub kms_verifier_address: String,
    /// Domain user-decrypt authorizations are signed under.
    pub decryption_domain: Eip712Domain,
    /// Domain input proofs are signed under.
    pub input_verification_domain: Eip712Domain,
}

impl SimulationParams {
    /// Fetch metadata and both live EIP-712 domains. The gateway chain id is
    /// the chain id of the KMS verifier's domain.
    pub async fn resolve(rpc: &JsonRpcClient, chain_id: u64) -> Result<Self, FhevmError> {
        let metadata = fetch_relayer_metadata(rpc).await?;
        let (kms_domain, input_domain) = tokio::try_join!(
            fetch_contract_domain(rpc, &metadata.kms_verifier_address),
            fetch_contract_domain(rpc, &metadata.input_verifier_address),
        )?;

        tracing::debug!(
            chain_id,
            gateway_chain_id = kms_domain.chain_id,
            kms_verifier = %metadata.kms_verifier_address,
            decryption_domain = %kms_domain.name,
            decryption_contract = %format_address(&kms_domain.verifying_contract),
            input_verification_contract = %format_address(&input_domain.verifying_contract),
            "Resolved simulation parameters"
        );

        Ok(Self {
            chain_id,
            gateway_chain_id: kms_domain.chain_id,
            acl_address: metadata.acl_address,
            input_verifier_address: metadata.input_verifier_address,
            kms_verifier_address: metadata.kms_verifier_address,
            decryption_domain: kms_domain.to_eip712(),
            input_verification_domain: input_domain.to_eip712(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::FixedBytes;

    #[test]
    fn contract_domain_decodes_from_abi_return_data() {
        let verifying_contract: Address = "0x812b06e1cdce800494b79ffe4f925a504a9a9810"
            .parse()
            .unwrap();
        let encoded = IEip712Domain::eip712DomainCall::abi_encode_returns(&(
            FixedBytes::<1>::from([0x0f]),
            "InputVerification".to_string(),
            "1".to_string(),
            U256::from(10901u64),
            verifying_contract,
            B256::ZERO,
            Vec::<U256>::new(),
        ));
        let ret = IEip712Domain::eip712DomainCall::abi_decode_returns(&encoded, true).unwrap();
        let domain = ContractDomain::try_from(ret).unwrap();
        assert_eq!(domain.name, "InputVerification");
        assert_eq!(domain.chain_id, 10901);
        assert_eq!(domain.verifying_contract, verifying_contract);

        let eip712 = domain.to_eip712();
        assert_eq!(eip712.name.as_deref(), Some("InputVerification"));
        assert_eq!(eip712.chain_id, Some(U256::from(10901u64)));
        assert!(IEip712Domain::eip712DomainCall::abi_decode_returns(&encoded[..64], true).is_err());
    }

    #[test]
    fn oversized_chain_ids_are_rejected() {
        let ret = IEip712Domain::eip712DomainReturn {
            fields: FixedBytes::<1>::from([0x0f]),
            name: "KMSVerifier".to_string(),
            version: "1".to_string(),
            chainId: U256::MAX,
            verifyingContract: Address::ZERO,
            salt: B256::ZERO,
            extensions: Vec::new(),
        };
        assert!(ContractDomain::try_from(ret).is_err());
    }

    #[test]
    fn cleartexts_accept_hex_decimal_and_numbers() {
        let word = cleartext_word(&json!("0x2a")).unwrap();
        assert_eq!(word[31], 42);
        assert_eq!(cleartext_word(&json!("1500")).unwrap()[30..], [0x05, 0xdc]);
        assert_eq!(cleartext_word(&json!(7)).unwrap()[31], 7);
        assert!(cleartext_word(&json!(true)).is_none());
        assert!(cleartext_word(&json!("nope")).is_none());
    }

    #[test]
    fn metadata_uses_platform_field_names() {
        let metadata: RelayerMetadata = serde_json::from_value(json!({
            "ACLAddress": "0x50157CFfD6bBFA2DECe204a89ec419c23ef5755D",
            "InputVerifierAddress": "0x901F8942346f7AB3a01F6D7613119Bca447Bb030",
            "KMSVerifierAddress": "0x1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"
        }))
        .unwrap();
        assert!(metadata.acl_address.starts_with("0x5015"));
    }
}
