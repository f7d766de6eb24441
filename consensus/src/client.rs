//! Transport abstraction between the proposer and its validators
//!
//! The proposer only sees `ValidatorClient`; in-process validators are
//! wrapped by [`LocalValidatorClient`], remote ones are reached over HTTP
//! by [`HttpValidatorClient`]. Transport failures surface as errors and
//! count as missing votes.

use async_trait::async_trait;
use meridian_core::{MeridianError, MeridianResult};
use meridian_ledger::Block;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::validator::{ValidationResponse, Validator};

/// Wire body of a `validate` request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub block: Block,
    #[serde(rename = "proposerId")]
    pub proposer_id: String,
}

#[async_trait]
pub trait ValidatorClient: Send + Sync {
    fn id(&self) -> &str;

    async fn validate(&self, block: &Block, proposer_id: &str) -> MeridianResult<ValidationResponse>;
}

/// Calls a validator living in the same process
pub struct LocalValidatorClient {
    validator: Arc<Validator>,
}

impl LocalValidatorClient {
    pub fn new(validator: Arc<Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl ValidatorClient for LocalValidatorClient {
    fn id(&self) -> &str {
        self.validator.id()
    }

    async fn validate(&self, block: &Block, proposer_id: &str) -> MeridianResult<ValidationResponse> {
        Ok(self.validator.validate(block, proposer_id).await)
    }
}

/// Calls a remote validator's `/validate` endpoint
pub struct HttpValidatorClient {
    id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpValidatorClient {
    pub fn new(id: &str, endpoint: &str, request_timeout: Duration) -> MeridianResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MeridianError::NetworkError(e.to_string()))?;
        Ok(Self {
            id: id.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ValidatorClient for HttpValidatorClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn validate(&self, block: &Block, proposer_id: &str) -> MeridianResult<ValidationResponse> {
        let request = ValidateRequest {
            block: block.clone(),
            proposer_id: proposer_id.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/validate", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| MeridianError::NetworkError(e.to_string()))?;

        response
            .json::<ValidationResponse>()
            .await
            .map_err(|e| MeridianError::NetworkError(e.to_string()))
    }
}
