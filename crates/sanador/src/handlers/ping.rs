//! Ping command handler

use crate::error::CliResult;
use crate::output::Reporter;
use sanar::{LlmSuggestionClient, SanarConfig};

/// Execute the ping command against the configured suggestion service
pub async fn execute_ping(config: &SanarConfig, reporter: &Reporter) -> CliResult<()> {
    let client = LlmSuggestionClient::from_config(&config.suggestion);
    reporter.info(&format!(
        "Probing {} (model {})",
        client.base_url(),
        client.model()
    ));
    match client.health_check().await {
        Ok(path) => {
            reporter.success(&format!("{}{path} responded", client.base_url()));
            Ok(())
        }
        Err(e) => {
            reporter.failure(&e.to_string());
            Err(e.into())
        }
    }
}
