//! Accumulates typed plaintexts and encrypts them in one pass.

use super::instance::{EncryptedData, FhevmInstance, MAX_INPUT_BITS};
use super::types::FheValue;
use crate::error::FhevmError;

/// Ordered list of typed plaintexts bound to one `(contract, user)` pair.
///
/// `add*` calls keep insertion order; [`EncryptedInputBuilder::encrypt`]
/// consumes the builder and returns one handle per value plus a single proof.
#[derive(Debug)]
pub struct EncryptedInputBuilder {
    instance: FhevmInstance,
    contract: String,
    user: String,
    values: Vec<FheValue>,
    bits: u32,
    error: Option<FhevmError>,
}

impl EncryptedInputBuilder {
    pub(crate) fn new(instance: FhevmInstance, contract: String, user: String) -> Self {
        Self {
            instance,
            contract,
            user,
            values: Vec::new(),
            bits: 0,
            error: None,
        }
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Summed bit width of the values added so far.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.push(FheValue::Bool(value))
    }

    pub fn add8(&mut self, value: u8) -> &mut Self {
        self.push(FheValue::U8(value))
    }

    pub fn add16(&mut self, value: u16) -> &mut Self {
        self.push(FheValue::U16(value))
    }

    pub fn add32(&mut self, value: u32) -> &mut Self {
        self.push(FheValue::U32(value))
    }

    pub fn add64(&mut self, value: u64) -> &mut Self {
        self.push(FheValue::U64(value))
    }

    /// Add an address. A malformed address is reported by `encrypt`.
    pub fn add_address(&mut self, value: &str) -> &mut Self {
        match FheValue::address(value) {
            Ok(address) => self.push(address),
            Err(err) => {
                self.error.get_or_insert(err);
                self
            }
        }
    }

    /// Add an already-typed value.
    pub fn add(&mut self, value: FheValue) -> &mut Self {
        self.push(value)
    }

    fn push(&mut self, value: FheValue) -> &mut Self {
        self.bits += value.fhe_type().bits();
        self.values.push(value);
        self
    }

    /// Encrypt every added value in one pass.
    pub async fn encrypt(self) -> Result<EncryptedData, FhevmError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.values.is_empty() {
            return Err(FhevmError::InvalidInput(
                "encrypted input has no values".to_string(),
            ));
        }
        if self.bits > MAX_INPUT_BITS {
            return Err(FhevmError::InputTooLarge {
                bits: self.bits,
                max: MAX_INPUT_BITS,
            });
        }

        tracing::debug!(
            contract = %self.contract,
            values = self.values.len(),
            bits = self.bits,
            "Encrypting input"
        );
        let encrypted = self
            .instance
            .encrypt_values(&self.contract, &self.user, &self.values)
            .await?;
        if encrypted.handles.len() != self.values.len() {
            return Err(FhevmError::Backend(format!(
                "backend returned {} handles for {} values",
                encrypted.handles.len(),
                self.values.len()
            )));
        }
        Ok(encrypted)
    }
}

/// Encrypt each value in its own pass, yielding one proof per value. Passes
/// run concurrently; results keep the order of `values`.
pub async fn encrypt_independently(
    instance: &FhevmInstance,
    contract: &str,
    user: &str,
    values: &[FheValue],
) -> Result<Vec<EncryptedData>, FhevmError> {
    let passes = values
        .iter()
        .map(|value| {
            let mut builder = instance.create_encrypted_input(contract, user)?;
            builder.add(value.clone());
            Ok(builder.encrypt())
        })
        .collect::<Result<Vec<_>, FhevmError>>()?;
    futures::future::try_join_all(passes).await
}
