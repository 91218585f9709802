use serde::{Deserialize, Serialize};

use crate::api::middleware::AppError;
use crate::validation::UrlValidator;

pub const DEFAULT_SCHEMA: &str = "dbo";
pub const DEFAULT_FILE_FORMAT: &str = "CSV";
pub const DEFAULT_PARSER_VERSION: &str = "2.0";
pub const DEFAULT_STRING_LENGTH: i16 = 100;

/// Resolved configuration for a single pipeline run.
///
/// Built once per trigger invocation by the config resolver and dropped when
/// the invocation ends. Construction goes through [`PipelineConfig::new`], which
/// rejects manifest URLs without a recognized suffix.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub tenant_id: Option<String>,
    pub manifest_url: String,
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub connection_string: Option<String>,
    pub ddl_type: DdlType,
    pub target_spark_endpoint: Option<String>,
    pub table_filter: TableFilter,
    pub schema: String,
    pub file_format_name: String,
    pub parser_version: String,
    pub translate_enum: bool,
    pub default_string_length: i16,
    pub create_stats: bool,
    pub service_principal: Option<ServicePrincipal>,
    pub process_sub_table_super_tables: bool,
    pub process_entities: bool,
}

impl PipelineConfig {
    /// Create a config with defaults for everything but the manifest URL
    pub fn new(manifest_url: impl Into<String>) -> Result<Self, AppError> {
        let manifest_url = manifest_url.into().trim().to_string();
        UrlValidator::validate_manifest_url(&manifest_url)?;

        Ok(Self {
            tenant_id: None,
            manifest_url,
            access_key: None,
            connection_string: None,
            ddl_type: DdlType::default(),
            target_spark_endpoint: None,
            table_filter: TableFilter::All,
            schema: DEFAULT_SCHEMA.to_string(),
            file_format_name: DEFAULT_FILE_FORMAT.to_string(),
            parser_version: DEFAULT_PARSER_VERSION.to_string(),
            translate_enum: false,
            default_string_length: DEFAULT_STRING_LENGTH,
            create_stats: false,
            service_principal: None,
            process_sub_table_super_tables: false,
            process_entities: false,
        })
    }

    /// Dialect selection predicate: a Spark endpoint means the distributed-compute dialect
    pub fn targets_spark(&self) -> bool {
        self.target_spark_endpoint
            .as_deref()
            .map(|endpoint| !endpoint.trim().is_empty())
            .unwrap_or(false)
    }

    /// Folder holding the manifest document, without a trailing separator
    pub fn manifest_folder(&self) -> &str {
        match self.manifest_url.rfind('/') {
            Some(idx) => &self.manifest_url[..idx],
            None => &self.manifest_url,
        }
    }

    /// Ensure a backend to execute against has been configured
    pub fn require_target(&self) -> Result<(), AppError> {
        let has_sql = self
            .connection_string
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);

        if !has_sql && !self.targets_spark() {
            return Err(AppError::Configuration(
                "Missing required setting: SQLEndpoint or TargetSparkConnection must be set to execute statements"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Which relational-warehouse object a table becomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DdlType {
    #[default]
    SynapseExternalTable,
    SynapseView,
}

impl DdlType {
    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s.trim().to_lowercase().as_str() {
            "synapseexternaltable" | "externaltable" => Ok(DdlType::SynapseExternalTable),
            "synapseview" | "view" => Ok(DdlType::SynapseView),
            _ => Err(AppError::Configuration(format!("Unsupported DDLType: {}", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DdlType::SynapseExternalTable => "SynapseExternalTable",
            DdlType::SynapseView => "SynapseView",
        }
    }
}

/// Tables to extract: every entity, or a named subset in the given order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFilter {
    All,
    Named(Vec<String>),
}

impl TableFilter {
    pub const WILDCARD: &'static str = "*";

    /// Parse a comma separated list; empty input or `*` selects everything
    pub fn parse(raw: Option<&str>) -> Self {
        let names: Vec<String> = raw
            .unwrap_or_default()
            .split(',')
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string())
            .collect();

        if names.is_empty() || names.iter().any(|name| name == Self::WILDCARD) {
            TableFilter::All
        } else {
            TableFilter::Named(names)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, TableFilter::All)
    }
}

/// Service principal credentials for the target warehouse
#[derive(Debug, Clone, Serialize)]
pub struct ServicePrincipal {
    pub tenant_id: Option<String>,
    pub app_id: String,
    #[serde(skip_serializing)]
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_unknown_suffix() {
        assert!(PipelineConfig::new("https://acct.dfs.core.windows.net/lake/Orders.csv").is_err());
        let config = PipelineConfig::new("https://acct.dfs.core.windows.net/lake/sales.manifest.cdm.json").unwrap();
        assert_eq!(config.schema, "dbo");
        assert_eq!(config.default_string_length, 100);
        assert!(config.table_filter.is_all());
    }

    #[test]
    fn test_manifest_folder() {
        let config = PipelineConfig::new("https://acct.dfs.core.windows.net/lake/Tables/sales.manifest.cdm.json").unwrap();
        assert_eq!(config.manifest_folder(), "https://acct.dfs.core.windows.net/lake/Tables");
    }

    #[test]
    fn test_targets_spark() {
        let mut config = PipelineConfig::new("https://acct.dfs.core.windows.net/lake/model.json").unwrap();
        assert!(!config.targets_spark());
        config.target_spark_endpoint = Some("  ".to_string());
        assert!(!config.targets_spark());
        config.target_spark_endpoint = Some("https://ws.dev.azuresynapse.net/livy".to_string());
        assert!(config.targets_spark());
    }

    #[test]
    fn test_require_target() {
        let mut config = PipelineConfig::new("https://acct.dfs.core.windows.net/lake/model.json").unwrap();
        assert!(matches!(config.require_target(), Err(AppError::Configuration(_))));
        config.connection_string = Some("Server=tcp:ws-ondemand.sql.azuresynapse.net".to_string());
        assert!(config.require_target().is_ok());
    }

    #[test]
    fn test_table_filter_parse() {
        assert_eq!(TableFilter::parse(None), TableFilter::All);
        assert_eq!(TableFilter::parse(Some("")), TableFilter::All);
        assert_eq!(TableFilter::parse(Some("*")), TableFilter::All);
        assert_eq!(
            TableFilter::parse(Some("Orders, Customers")),
            TableFilter::Named(vec!["Orders".to_string(), "Customers".to_string()])
        );
    }

    #[test]
    fn test_ddl_type_from_str() {
        assert_eq!(DdlType::from_str("SynapseView").unwrap(), DdlType::SynapseView);
        assert_eq!(
            DdlType::from_str("synapseexternaltable").unwrap(),
            DdlType::SynapseExternalTable
        );
        assert!(DdlType::from_str("oracle").is_err());
    }
}
