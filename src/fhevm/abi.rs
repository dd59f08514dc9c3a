//! Solidity types shared with the protocol contracts.

use alloy_sol_types::sol;

sol! {
    /// Authorization a user signs to have handles re-encrypted under an
    /// ephemeral decryption key.
    #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
        bytes extraData;
    }

    /// Coprocessor attestation over the handles of one encrypted input.
    #[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct CiphertextVerification {
        bytes32[] ctHandles;
        address userAddress;
        address contractAddress;
        uint256 contractChainId;
        bytes extraData;
    }

    /// EIP-5267 domain introspection.
    #[derive(Debug)]
    interface IEip712Domain {
        function eip712Domain()
            external
            view
            returns (
                bytes1 fields,
                string name,
                string version,
                uint256 chainId,
                address verifyingContract,
                bytes32 salt,
                uint256[] extensions
            );
    }

    /// Access control list of the host chain.
    #[derive(Debug)]
    interface IAcl {
        function isAllowed(bytes32 handle, address account) external view returns (bool allowed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};
    use alloy_sol_types::{SolCall, SolStruct, eip712_domain};

    use crate::eip712::{TypedData, signing_hash};

    #[test]
    fn static_and_wallet_hashes_agree() {
        let domain = eip712_domain! {
            name: "Decryption",
            version: "1",
            chain_id: 10901,
            verifying_contract: Address::repeat_byte(0x5f),
        };
        let request = UserDecryptRequestVerification {
            publicKey: Bytes::from(vec![0x12, 0x34]),
            contractAddresses: vec![Address::repeat_byte(0x01)],
            startTimestamp: U256::from(1_700_000_000u64),
            durationDays: U256::from(7u64),
            extraData: Bytes::from(vec![0x00]),
        };
        let typed = TypedData::from_struct(&request, Some(domain.clone()));
        assert_eq!(typed.primary_type, "UserDecryptRequestVerification");
        assert_eq!(
            signing_hash(&typed).unwrap(),
            request.eip712_signing_hash(&domain).0
        );
    }

    #[test]
    fn domain_call_uses_the_standard_selector() {
        assert_eq!(
            IEip712Domain::eip712DomainCall::SELECTOR,
            [0x84, 0xb0, 0x19, 0x6e]
        );
        assert_eq!(IEip712Domain::eip712DomainCall {}.abi_encode().len(), 4);
    }
}
