use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{HashBackend, HashError, HashToken, check_tokens};
use crate::server::dto::{HashRequest, HashResponse, ValidationRequest, ValidationResponse};
use crate::staleness::{TranslationToValidate, ValidationOutcome};

/// Client for the compute-offload service (see [`crate::server`]).
#[derive(Clone)]
pub struct RemoteHasher {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteHasher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HashError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, HashError>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.post(&url).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(HashError::Status(resp.status().as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| HashError::Malformed(e.to_string()))
    }

    /// Runs the validation comparison remotely. The answer must cover exactly the
    /// submitted ids, in order, or it is rejected as malformed.
    pub async fn batch_validate(
        &self,
        translations: &[TranslationToValidate],
        source_hashes: &HashMap<String, String>,
    ) -> Result<Vec<ValidationOutcome>, HashError> {
        let request = ValidationRequest {
            translations: translations.to_vec(),
            source_hashes: source_hashes.clone(),
        };
        let response: ValidationResponse = self.post("/validate", &request).await?;

        if response.results.len() != translations.len() {
            return Err(HashError::Malformed(format!(
                "expected {} results, got {}",
                translations.len(),
                response.results.len()
            )));
        }
        if let Some((sent, got)) = translations
            .iter()
            .zip(&response.results)
            .find(|(sent, got)| sent.id != got.id)
        {
            return Err(HashError::Malformed(format!(
                "result for '{}' answered as '{}'",
                sent.id, got.id
            )));
        }
        Ok(response.results)
    }
}

#[async_trait]
impl HashBackend for RemoteHasher {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn batch_hash(&self, values: &[String]) -> Result<Vec<HashToken>, HashError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let response: HashResponse = self
            .post(
                "/hash",
                &HashRequest {
                    values: values.to_vec(),
                },
            )
            .await?;
        check_tokens(values.len(), &response.hashes)?;
        Ok(response.hashes)
    }
}
