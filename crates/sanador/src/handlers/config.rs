//! Config command handler

use crate::error::CliResult;
use sanar::SanarConfig;

/// Render the effective configuration; the API key is masked
pub fn render_config(config: &SanarConfig) -> CliResult<String> {
    let mut shown = config.clone();
    if shown.suggestion.api_key.is_some() {
        shown.suggestion.api_key = Some("********".to_string());
    }
    Ok(shown.to_yaml()?)
}
