pub mod analysis;
pub mod api;
pub mod config;
pub mod contract;
pub mod finetune;
pub mod model_runtime;
pub mod pipeline;
pub mod selection;
pub mod worker;

use std::path::PathBuf;

pub fn default_openapi_contract_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("openapi/backend-api.openapi.yaml")
}
