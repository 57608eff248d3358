use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::staleness::{TranslationToValidate, ValidationOutcome};

#[derive(Debug, Serialize, Deserialize)]
pub struct HashRequest {
    pub values: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashResponse {
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub translations: Vec<TranslationToValidate>,
    #[serde(default)]
    pub source_hashes: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub results: Vec<ValidationOutcome>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub worker: String,
    pub version: String,
}
