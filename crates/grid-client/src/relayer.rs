//! HTTP client for the FHE relayer

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::gateway::{
    DecryptionProof, DecryptionRequest, DecryptionResult, EncryptedInput, EncryptionGateway,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRequest {
    pub contract_address: Address,
    pub user_address: Address,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResponse {
    pub handle: B256,
    pub input_proof: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptRequest {
    pub handles: Vec<B256>,
    pub contract_address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResponse {
    /// One value per requested handle, in request order
    pub clear_values: Vec<u64>,
    pub abi_encoded_clear_values: Bytes,
    pub decryption_proof: Bytes,
}

/// Co-processor reached through a relayer's HTTP API
///
/// - `GET /health`
/// - `POST /v1/encrypt`
/// - `POST /v1/decrypt`
#[derive(Debug)]
pub struct RelayerGateway {
    client: reqwest::Client,
    relayer_url: String,
    initialized: AtomicBool,
}

impl RelayerGateway {
    pub fn new(relayer_url: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            relayer_url: relayer_url.into().trim_end_matches('/').to_string(),
            initialized: AtomicBool::new(false),
        })
    }

    pub async fn health(&self) -> Result<bool, GatewayError> {
        let url = format!("{}/health", self.relayer_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn post<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
        on_error: fn(String) -> GatewayError,
    ) -> Result<Resp, GatewayError> {
        let url = format!("{}{}", self.relayer_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(on_error(format!("relayer returned {status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl EncryptionGateway for RelayerGateway {
    async fn initialize(&self) -> Result<(), GatewayError> {
        if !self.health().await? {
            return Err(GatewayError::Transport(format!(
                "relayer at {} is not healthy",
                self.relayer_url
            )));
        }
        self.initialized.store(true, Ordering::SeqCst);
        info!(relayer = %self.relayer_url, "Relayer session ready");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn encrypt(
        &self,
        contract: Address,
        requester: Address,
        value: u64,
    ) -> Result<EncryptedInput, GatewayError> {
        if !self.is_ready() {
            return Err(GatewayError::Unavailable);
        }
        let request = EncryptRequest {
            contract_address: contract,
            user_address: requester,
            value,
        };
        let response: EncryptResponse = self
            .post("/v1/encrypt", &request, GatewayError::Encryption)
            .await?;
        debug!(handle = %response.handle, "Encrypted input");
        Ok(EncryptedInput {
            handle: response.handle,
            proof: response.input_proof,
        })
    }

    async fn decrypt(
        &self,
        request: DecryptionRequest<'_>,
    ) -> Result<DecryptionResult, GatewayError> {
        if !self.is_ready() {
            return Err(GatewayError::Unavailable);
        }
        let body = DecryptRequest {
            handles: request.handles.clone(),
            contract_address: request.contract,
        };
        let response: DecryptResponse = self
            .post("/v1/decrypt", &body, GatewayError::Decryption)
            .await?;
        let clear_values: BTreeMap<B256, u64> = request
            .handles
            .iter()
            .copied()
            .zip(response.clear_values)
            .collect();
        request.ensure_complete(&clear_values)?;

        let proof = DecryptionProof {
            abi_encoded_clear_values: response.abi_encoded_clear_values,
            proof: response.decryption_proof,
        };
        request.relay(&proof).await?;

        Ok(DecryptionResult {
            clear_values,
            proof,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relayer_url_normalized() {
        let gateway = RelayerGateway::new("http://localhost:3000/").unwrap();
        assert_eq!(gateway.relayer_url, "http://localhost:3000");
        assert!(!gateway.is_ready());
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(EncryptRequest {
            contract_address: Address::ZERO,
            user_address: Address::ZERO,
            value: 600,
        })
        .unwrap();
        assert!(json.get("contractAddress").is_some());
        assert!(json.get("userAddress").is_some());
        assert_eq!(json["value"], 600);
    }

    #[tokio::test]
    async fn test_encrypt_before_initialize() {
        let gateway = RelayerGateway::new("http://127.0.0.1:1").unwrap();
        let err = gateway.encrypt(Address::ZERO, Address::ZERO, 1).await.unwrap_err();
        assert_eq!(err, GatewayError::Unavailable);
    }
}
