use crate::api::middleware::AppError;

/// Suffixes accepted for a manifest URL (compared case-insensitively).
pub const MANIFEST_SUFFIXES: [&str; 2] = ["cdm.json", "model.json"];

/// Suffix a storage notification or queue message must carry to be processed.
pub const DATA_CHANGE_SUFFIX: &str = ".cdm.json";

/// Path marker for entity folders that already exist when their notification fires.
pub const ENTITIES_PATH_MARKER: &str = "/Entities/";

/// URL validation for manifest locations and inbound events
pub struct UrlValidator;

impl UrlValidator {
    /// Validate that a manifest URL ends in a recognized manifest suffix
    pub fn validate_manifest_url(manifest_url: &str) -> Result<(), AppError> {
        let trimmed = manifest_url.trim();
        if trimmed.is_empty() {
            return Err(AppError::Configuration(
                "Invalid manifest URL: no manifest URL was supplied".to_string(),
            ));
        }

        let lower = trimmed.to_lowercase();
        if !MANIFEST_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
            return Err(AppError::Configuration(format!(
                "Invalid manifest URL: {}",
                trimmed
            )));
        }

        Ok(())
    }

    /// True when the manifest is a flat model.json document
    pub fn is_model_json(manifest_url: &str) -> bool {
        manifest_url.to_lowercase().ends_with("model.json")
    }

    /// Filter applied to storage notifications and queue messages
    pub fn is_data_change_event(url: &str) -> bool {
        url.ends_with(DATA_CHANGE_SUFFIX)
    }

    /// The landing zone race only applies outside of the Entities folders
    pub fn requires_landing_zone_check(url: &str) -> bool {
        !url.contains(ENTITIES_PATH_MARKER)
    }
}
