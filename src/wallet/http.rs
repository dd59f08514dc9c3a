//! Provider backed by a JSON-RPC node.
//!
//! Without a signing key every request is forwarded to the node, which suits
//! dev nodes that manage unlocked accounts. With a key the provider answers
//! account and typed-data signing requests itself, the way an injected
//! wallet extension would.

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use serde_json::{Value, json};

use super::provider::{
    Eip1193Provider, ListenerId, ListenerSet, ProviderEvent, ProviderListener, ProviderRpcError,
    RpcRequest, codes, methods,
};
use crate::eip712::{TypedData, addresses_equal, address_of, sign_hash, signing_hash};
use crate::rpc::{JsonRpcClient, parse_chain_id, parse_quantity};

pub struct RpcWalletProvider {
    rpc: JsonRpcClient,
    key: Option<SigningKey>,
    address: Option<String>,
    listeners: ListenerSet,
}

impl RpcWalletProvider {
    pub fn new(rpc: JsonRpcClient) -> Self {
        Self {
            rpc,
            key: None,
            address: None,
            listeners: ListenerSet::new(),
        }
    }

    pub fn with_signing_key(rpc: JsonRpcClient, key: SigningKey) -> Self {
        let address = address_of(&key);
        Self {
            rpc,
            key: Some(key),
            address: Some(address),
            listeners: ListenerSet::new(),
        }
    }

    /// Address of the local key, if one is configured.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn rpc(&self) -> &JsonRpcClient {
        &self.rpc
    }

    /// Deliver an event to registered listeners.
    pub fn emit(&self, event: &ProviderEvent) {
        self.listeners.emit(event);
    }

    fn sign_typed_data(
        &self,
        key: &SigningKey,
        address: &str,
        params: &Value,
    ) -> Result<Value, ProviderRpcError> {
        let requested = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("missing signer address"))?;
        if !addresses_equal(requested, address) {
            return Err(ProviderRpcError::new(
                codes::UNAUTHORIZED,
                format!("account {requested} is not managed by this provider"),
            ));
        }

        let data: TypedData = match params.get(1) {
            Some(Value::String(raw)) => serde_json::from_str(raw),
            Some(object) => serde_json::from_value(object.clone()),
            None => return Err(invalid_params("missing typed data")),
        }
        .map_err(|e| invalid_params(&e.to_string()))?;

        let hash = signing_hash(&data).map_err(|e| invalid_params(&e.to_string()))?;
        let signature =
            sign_hash(key, &hash).map_err(|e| ProviderRpcError::new(-32603, e.to_string()))?;
        Ok(Value::String(signature))
    }

    /// A plain node cannot switch chains: succeed only if already there.
    async fn switch_chain(&self, params: &Value) -> Result<Value, ProviderRpcError> {
        let target = params
            .get(0)
            .and_then(|p| p.get("chainId"))
            .and_then(Value::as_str)
            .and_then(parse_quantity)
            .ok_or_else(|| invalid_params("missing chainId"))?;
        let current = self.rpc.call(methods::CHAIN_ID, json!([])).await?;
        if parse_chain_id(&current) == Some(target) {
            Ok(Value::Null)
        } else {
            Err(ProviderRpcError::unrecognized_chain(target))
        }
    }
}

fn invalid_params(reason: &str) -> ProviderRpcError {
    ProviderRpcError::new(-32602, format!("invalid params: {reason}"))
}

#[async_trait]
impl Eip1193Provider for RpcWalletProvider {
    async fn request(&self, request: RpcRequest) -> Result<Value, ProviderRpcError> {
        match (request.method.as_str(), &self.key, &self.address) {
            (methods::REQUEST_ACCOUNTS | methods::ACCOUNTS, Some(_), Some(address)) => {
                Ok(json!([address]))
            }
            (methods::SIGN_TYPED_DATA_V4, Some(key), Some(address)) => {
                self.sign_typed_data(key, address, &request.params)
            }
            (methods::SWITCH_CHAIN, _, _) => self.switch_chain(&request.params).await,
            (method, _, _) => Ok(self.rpc.call(method, request.params).await?),
        }
    }

    fn on(&self, listener: ProviderListener) -> ListenerId {
        self.listeners.add(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }
}
