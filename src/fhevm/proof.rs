//! Input proofs and the coprocessor attestation they carry.

use alloy_primitives::{B256, Bytes, U256};

use super::abi::CiphertextVerification;
use super::handle::Handle;
use crate::eip712::{decode_hex, encode_hex_prefixed, parse_address};
use crate::error::FhevmError;

/// Decoded input proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputProof {
    pub handles: Vec<Handle>,
    pub signatures: Vec<String>,
    pub extra_data: Vec<u8>,
}

impl InputProof {
    /// `[n_handles][n_signers][handles 32*n][signatures 65*m][extra data]`.
    pub fn encode(&self) -> Result<Vec<u8>, FhevmError> {
        let n_handles = u8::try_from(self.handles.len())
            .map_err(|_| FhevmError::InvalidInput("too many handles".to_string()))?;
        let n_signers = u8::try_from(self.signatures.len())
            .map_err(|_| FhevmError::InvalidInput("too many signers".to_string()))?;
        let mut out = vec![n_handles, n_signers];
        for handle in &self.handles {
            out.extend_from_slice(handle.as_bytes());
        }
        for signature in &self.signatures {
            let bytes = decode_hex(signature).map_err(|e| FhevmError::Backend(e.to_string()))?;
            if bytes.len() != 65 {
                return Err(FhevmError::Backend(format!(
                    "coprocessor signature is {} bytes, expected 65",
                    bytes.len()
                )));
            }
            out.extend_from_slice(&bytes);
        }
        out.extend_from_slice(&self.extra_data);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FhevmError> {
        let malformed = |reason: &str| FhevmError::InvalidInput(format!("input proof: {reason}"));
        let (&n_handles, rest) = bytes.split_first().ok_or_else(|| malformed("empty"))?;
        let (&n_signers, mut rest) = rest.split_first().ok_or_else(|| malformed("truncated"))?;

        let mut handles = Vec::with_capacity(n_handles as usize);
        for _ in 0..n_handles {
            let (chunk, tail) = rest
                .split_at_checked(32)
                .ok_or_else(|| malformed("truncated handles"))?;
            let mut raw = [0u8; 32];
            raw.copy_from_slice(chunk);
            handles.push(Handle::from_bytes(raw));
            rest = tail;
        }
        let mut signatures = Vec::with_capacity(n_signers as usize);
        for _ in 0..n_signers {
            let (chunk, tail) = rest
                .split_at_checked(65)
                .ok_or_else(|| malformed("truncated signatures"))?;
            signatures.push(encode_hex_prefixed(chunk));
            rest = tail;
        }
        Ok(Self {
            handles,
            signatures,
            extra_data: rest.to_vec(),
        })
    }
}

/// The statement a coprocessor signs to attest an input's handles.
pub fn ciphertext_verification(
    handles: &[Handle],
    user: &str,
    contract: &str,
    contract_chain_id: u64,
    extra_data: &[u8],
) -> Result<CiphertextVerification, FhevmError> {
    let address = |value: &str| {
        parse_address(value).map_err(|e| FhevmError::InvalidInput(e.to_string()))
    };
    Ok(CiphertextVerification {
        ctHandles: handles
            .iter()
            .map(|handle| B256::from(*handle.as_bytes()))
            .collect(),
        userAddress: address(user)?,
        contractAddress: address(contract)?,
        contractChainId: U256::from(contract_chain_id),
        extraData: Bytes::copy_from_slice(extra_data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhevm::types::FheType;

    fn handle(index: u8) -> Handle {
        Handle::derive(&[9u8; 32], index, &[0x50; 20], 31337, FheType::U32)
    }

    #[test]
    fn layout_is_counts_then_handles_then_signatures() {
        let proof = InputProof {
            handles: vec![handle(0), handle(1)],
            signatures: vec![encode_hex_prefixed(&[0x11; 65])],
            extra_data: vec![0x00],
        };
        let bytes = proof.encode().unwrap();
        assert_eq!(bytes.len(), 2 + 2 * 32 + 65 + 1);
        assert_eq!(&bytes[..2], &[2, 1]);
        assert_eq!(&bytes[2..34], handle(0).as_bytes());
        assert_eq!(InputProof::decode(&bytes).unwrap(), proof);
    }

    #[test]
    fn truncated_or_malformed_proofs_are_rejected() {
        assert!(InputProof::decode(&[]).is_err());
        assert!(InputProof::decode(&[1, 0, 0xaa]).is_err());
        assert!(InputProof::decode(&[0, 1, 0xaa]).is_err());

        let short_signature = InputProof {
            handles: vec![handle(0)],
            signatures: vec!["0x1234".to_string()],
            extra_data: Vec::new(),
        };
        assert!(short_signature.encode().is_err());
    }

    #[test]
    fn attestation_binds_user_and_contract() {
        let statement = ciphertext_verification(
            &[handle(0)],
            "0x00000000000000000000000000000000000000aa",
            "0x00000000000000000000000000000000000000c0",
            31337,
            &[0x00],
        )
        .unwrap();
        assert_eq!(statement.ctHandles.len(), 1);
        assert_eq!(statement.contractChainId, U256::from(31337u64));
        assert!(
            ciphertext_verification(&[handle(0)], "bad", "0x00000000000000000000000000000000000000c0", 1, &[])
                .is_err()
        );
    }
}
