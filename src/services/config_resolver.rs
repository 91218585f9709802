// Layered settings resolution
//
// A single deployment serves many storage accounts. Any option can be set
// globally, per storage account, or per folder inside an account, and direct
// requests may override it once more.

use std::collections::HashMap;

use url::Url;

use crate::api::middleware::AppError;
use crate::models::{DdlType, PipelineConfig, ServicePrincipal, TableFilter};
use crate::services::data_lake::AccessKeyKind;

/// Setting names understood by the pipeline
pub mod tokens {
    pub const MANIFEST_URL: &str = "ManifestURL";
    pub const TENANT_ID: &str = "TenantId";
    pub const ACCESS_KEY: &str = "AccessKey";
    pub const SQL_ENDPOINT: &str = "SQLEndpoint";
    pub const DDL_TYPE: &str = "DDLType";
    pub const TARGET_SPARK_CONNECTION: &str = "TargetSparkConnection";
    pub const TABLE_NAMES: &str = "TableNames";
    pub const SCHEMA: &str = "Schema";
    pub const FILE_FORMAT: &str = "FileFormat";
    pub const PARSER_VERSION: &str = "ParserVersion";
    pub const TRANSLATE_ENUM: &str = "TranslateEnum";
    pub const DEFAULT_STRING_LENGTH: &str = "DefaultStringLength";
    pub const CREATE_STATS: &str = "CreateStats";
    pub const PROCESS_ENTITIES: &str = "ProcessEntities";
    pub const PROCESS_SUB_TABLE_SUPER_TABLES: &str = "ProcessSubTableSuperTables";
    pub const SERVICE_PRINCIPAL_AUTH: &str = "ServicePrincipalBasedAuthentication";
    pub const SERVICE_PRINCIPAL_APP_ID: &str = "ServicePrincipalAppId";
    pub const SERVICE_PRINCIPAL_SECRET: &str = "ServicePrincipalSecret";

    /// Every token a direct request may override
    pub const ALL: [&str; 18] = [
        MANIFEST_URL,
        TENANT_ID,
        ACCESS_KEY,
        SQL_ENDPOINT,
        DDL_TYPE,
        TARGET_SPARK_CONNECTION,
        TABLE_NAMES,
        SCHEMA,
        FILE_FORMAT,
        PARSER_VERSION,
        TRANSLATE_ENUM,
        DEFAULT_STRING_LENGTH,
        CREATE_STATS,
        PROCESS_ENTITIES,
        PROCESS_SUB_TABLE_SUPER_TABLES,
        SERVICE_PRINCIPAL_AUTH,
        SERVICE_PRINCIPAL_APP_ID,
        SERVICE_PRINCIPAL_SECRET,
    ];
}

/// Read-only key-value settings store
pub trait SettingsSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Snapshot of the process environment taken at startup
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    values: HashMap<String, String>,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        Self {
            values: std::env::vars().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SettingsSource for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// In-memory settings, mainly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, String>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl SettingsSource for MapSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Per-request overrides (headers or query parameters), matched case-insensitively
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    values: HashMap<String, String>,
}

impl RequestOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Insert only when the key is not already present
    pub fn insert_if_absent(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .entry(key.to_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_lowercase())
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Storage account and path segments derived from a manifest URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKey {
    pub storage_account: String,
    pub segments: Vec<String>,
}

impl ScopeKey {
    /// Parse `https://{account}.{...}/{path...}`. The empty segment before the
    /// leading separator is not part of the path.
    pub fn parse(manifest_url: &str) -> Option<Self> {
        let url = Url::parse(manifest_url).ok()?;
        let host = url.host_str()?;
        let storage_account = host.split('.').next()?.to_string();
        if storage_account.is_empty() {
            return None;
        }

        let segments = url
            .path_segments()
            .map(|segments| segments.map(|s| s.to_string()).collect())
            .unwrap_or_default();

        Some(Self {
            storage_account,
            segments,
        })
    }

    /// Candidate keys for `token`, most specific first, ending with the account-level key
    pub fn candidate_keys(&self, token: &str) -> Vec<String> {
        (0..=self.segments.len())
            .rev()
            .map(|n| {
                let mut parts: Vec<&str> = Vec::with_capacity(n + 2);
                parts.push(&self.storage_account);
                parts.extend(self.segments[..n].iter().map(|s| s.as_str()));
                parts.push(token);
                parts.join(":")
            })
            .collect()
    }
}

/// Resolves options for one invocation
pub struct ConfigResolver<'a> {
    settings: &'a dyn SettingsSource,
    overrides: Option<&'a RequestOverrides>,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(settings: &'a dyn SettingsSource) -> Self {
        Self {
            settings,
            overrides: None,
        }
    }

    /// Only direct requests carry an override channel
    pub fn with_overrides(mut self, overrides: &'a RequestOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Resolve `token` for `manifest_url`: request override, then path-scoped keys
    /// from the full path down to the storage account, then the global key.
    pub fn resolve(&self, token: &str, manifest_url: Option<&str>) -> Option<String> {
        if let Some(value) = self.overrides.and_then(|o| o.get(token)) {
            return Some(value.to_string());
        }

        if let Some(scope) = manifest_url.and_then(ScopeKey::parse) {
            for key in scope.candidate_keys(token) {
                if let Some(value) = self.lookup(&key) {
                    tracing::debug!("Resolved {} from scoped setting {}", token, key);
                    return Some(value);
                }
            }
        }

        self.lookup(token)
    }

    fn lookup(&self, key: &str) -> Option<String> {
        self.settings.get(key).filter(|v| !v.trim().is_empty())
    }

    fn resolve_bool(&self, token: &str, manifest_url: &str) -> Result<Option<bool>, AppError> {
        self.resolve(token, Some(manifest_url))
            .map(|raw| match raw.trim().to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(AppError::Configuration(format!(
                    "Setting {} must be true or false, got '{}'",
                    token, raw
                ))),
            })
            .transpose()
    }

    /// Assemble the configuration for one pipeline run.
    ///
    /// `event_url` is the manifest URL carried by a notification or queue
    /// message; direct requests leave it empty and resolve `ManifestURL`.
    pub fn pipeline_config(&self, event_url: Option<&str>) -> Result<PipelineConfig, AppError> {
        let manifest_url = match event_url {
            Some(url) => url.to_string(),
            None => self.resolve(tokens::MANIFEST_URL, None).ok_or_else(|| {
                AppError::Configuration("Invalid manifest URL: ManifestURL is not set".to_string())
            })?,
        };

        let mut config = PipelineConfig::new(manifest_url)?;
        let url = config.manifest_url.clone();
        let resolve = |token: &str| self.resolve(token, Some(&url));

        config.tenant_id = resolve(tokens::TENANT_ID);
        config.access_key = resolve(tokens::ACCESS_KEY);
        if let Some(key) = &config.access_key {
            AccessKeyKind::classify(key)?;
        }
        config.connection_string = resolve(tokens::SQL_ENDPOINT);
        config.target_spark_endpoint = resolve(tokens::TARGET_SPARK_CONNECTION);
        config.table_filter = TableFilter::parse(resolve(tokens::TABLE_NAMES).as_deref());

        if let Some(ddl_type) = resolve(tokens::DDL_TYPE) {
            config.ddl_type = DdlType::from_str(&ddl_type)?;
        }
        if let Some(schema) = resolve(tokens::SCHEMA) {
            config.schema = schema;
        }
        if let Some(file_format) = resolve(tokens::FILE_FORMAT) {
            config.file_format_name = file_format;
        }
        if let Some(parser_version) = resolve(tokens::PARSER_VERSION) {
            config.parser_version = parser_version;
        }
        if let Some(translate_enum) = self.resolve_bool(tokens::TRANSLATE_ENUM, &url)? {
            config.translate_enum = translate_enum;
        }
        if let Some(length) = resolve(tokens::DEFAULT_STRING_LENGTH) {
            config.default_string_length = length
                .trim()
                .parse::<i16>()
                .ok()
                .filter(|l| *l > 0)
                .ok_or_else(|| {
                    AppError::Configuration(format!(
                        "Setting {} must be a positive integer, got '{}'",
                        tokens::DEFAULT_STRING_LENGTH,
                        length
                    ))
                })?;
        }
        if let Some(create_stats) = self.resolve_bool(tokens::CREATE_STATS, &url)? {
            config.create_stats = create_stats;
        }
        if let Some(process_entities) = self.resolve_bool(tokens::PROCESS_ENTITIES, &url)? {
            config.process_entities = process_entities;
        }
        if let Some(process) = self.resolve_bool(tokens::PROCESS_SUB_TABLE_SUPER_TABLES, &url)? {
            config.process_sub_table_super_tables = process;
        }

        if self
            .resolve_bool(tokens::SERVICE_PRINCIPAL_AUTH, &url)?
            .unwrap_or(false)
        {
            let app_id = resolve(tokens::SERVICE_PRINCIPAL_APP_ID);
            let secret = resolve(tokens::SERVICE_PRINCIPAL_SECRET);
            match (app_id, secret) {
                (Some(app_id), Some(secret)) => {
                    config.service_principal = Some(ServicePrincipal {
                        tenant_id: config.tenant_id.clone(),
                        app_id,
                        secret,
                    });
                }
                _ => {
                    return Err(AppError::Configuration(format!(
                        "Missing required credential: {} and {} must be set when {} is true",
                        tokens::SERVICE_PRINCIPAL_APP_ID,
                        tokens::SERVICE_PRINCIPAL_SECRET,
                        tokens::SERVICE_PRINCIPAL_AUTH
                    )));
                }
            }
        }

        tracing::info!(
            "Resolved pipeline config for {} (dialect: {}, schema: {}, tables: {:?})",
            config.manifest_url,
            if config.targets_spark() { "spark" } else { "synapse" },
            config.schema,
            config.table_filter
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://account.host/folder/sub/file.cdm.json";

    #[test]
    fn test_most_specific_layer_wins() {
        let settings: MapSettings = [
            ("account:folder:Token", "A"),
            ("account:Token", "B"),
            ("Token", "C"),
        ]
        .into_iter()
        .collect();

        let resolver = ConfigResolver::new(&settings);
        assert_eq!(resolver.resolve("Token", Some(URL)), Some("A".to_string()));
    }

    #[test]
    fn test_falls_back_through_layers() {
        let settings: MapSettings = [("account:Token", "B"), ("Token", "C")].into_iter().collect();
        let resolver = ConfigResolver::new(&settings);
        assert_eq!(resolver.resolve("Token", Some(URL)), Some("B".to_string()));

        let other_account = "https://other.host/folder/file.cdm.json";
        assert_eq!(resolver.resolve("Token", Some(other_account)), Some("C".to_string()));
        assert_eq!(resolver.resolve("Missing", Some(URL)), None);
    }

    #[test]
    fn test_full_path_including_file_is_most_specific() {
        let settings: MapSettings = [
            ("account:folder:sub:file.cdm.json:Token", "exact"),
            ("account:folder:sub:Token", "folder"),
        ]
        .into_iter()
        .collect();
        let resolver = ConfigResolver::new(&settings);
        assert_eq!(resolver.resolve("Token", Some(URL)), Some("exact".to_string()));
    }

    #[test]
    fn test_request_override_beats_everything() {
        let settings: MapSettings = [("account:folder:Token", "A")].into_iter().collect();
        let mut overrides = RequestOverrides::new();
        overrides.insert("token", "header");

        let resolver = ConfigResolver::new(&settings).with_overrides(&overrides);
        assert_eq!(resolver.resolve("Token", Some(URL)), Some("header".to_string()));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let settings: MapSettings = [("account:Token", ""), ("Token", "C")].into_iter().collect();
        let mut overrides = RequestOverrides::new();
        overrides.insert("Token", " ");

        let resolver = ConfigResolver::new(&settings).with_overrides(&overrides);
        assert_eq!(resolver.resolve("Token", Some(URL)), Some("C".to_string()));
    }

    #[test]
    fn test_candidate_keys_order() {
        let scope = ScopeKey::parse(URL).unwrap();
        assert_eq!(scope.storage_account, "account");
        assert_eq!(
            scope.candidate_keys("T"),
            vec![
                "account:folder:sub:file.cdm.json:T",
                "account:folder:sub:T",
                "account:folder:T",
                "account:T",
            ]
        );
    }

    #[test]
    fn test_pipeline_config_from_settings() {
        let settings: MapSettings = [
            ("ManifestURL", URL),
            ("account:Schema", "sales"),
            ("TableNames", "Orders,Customers"),
            ("CreateStats", "true"),
            ("DefaultStringLength", "255"),
            ("account:folder:DDLType", "SynapseView"),
        ]
        .into_iter()
        .collect();

        let config = ConfigResolver::new(&settings).pipeline_config(None).unwrap();
        assert_eq!(config.manifest_url, URL);
        assert_eq!(config.schema, "sales");
        assert!(config.create_stats);
        assert_eq!(config.default_string_length, 255);
        assert_eq!(config.ddl_type, DdlType::SynapseView);
        assert_eq!(
            config.table_filter,
            TableFilter::Named(vec!["Orders".to_string(), "Customers".to_string()])
        );
    }

    #[test]
    fn test_invalid_suffix_fails_for_every_path() {
        let settings: MapSettings = [("ManifestURL", "https://account.host/folder/file.csv")]
            .into_iter()
            .collect();
        let resolver = ConfigResolver::new(&settings);

        assert!(matches!(resolver.pipeline_config(None), Err(AppError::Configuration(_))));
        assert!(matches!(
            resolver.pipeline_config(Some("https://account.host/folder/file.csv")),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_manifest_url_is_fatal() {
        let settings = MapSettings::new();
        assert!(ConfigResolver::new(&settings).pipeline_config(None).is_err());
    }

    #[test]
    fn test_invalid_bool_is_fatal() {
        let settings = MapSettings::new().with("TranslateEnum", "yes");
        let result = ConfigResolver::new(&settings).pipeline_config(Some(URL));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_access_key_must_be_a_token() {
        let settings = MapSettings::new().with("AccessKey", "c2hhcmVkLWFjY291bnQta2V5==");
        let result = ConfigResolver::new(&settings).pipeline_config(Some(URL));
        assert!(matches!(result, Err(AppError::Configuration(_))));

        let settings = MapSettings::new().with("account:AccessKey", "sv=2021-08-06&sig=abc");
        let config = ConfigResolver::new(&settings).pipeline_config(Some(URL)).unwrap();
        assert_eq!(config.access_key.as_deref(), Some("sv=2021-08-06&sig=abc"));
    }

    #[test]
    fn test_service_principal_requires_credentials() {
        let settings = MapSettings::new()
            .with("ServicePrincipalBasedAuthentication", "true")
            .with("ServicePrincipalAppId", "app");
        assert!(ConfigResolver::new(&settings).pipeline_config(Some(URL)).is_err());

        let settings = settings
            .with("ServicePrincipalSecret", "secret")
            .with("TenantId", "tenant");
        let config = ConfigResolver::new(&settings).pipeline_config(Some(URL)).unwrap();
        let principal = config.service_principal.unwrap();
        assert_eq!(principal.app_id, "app");
        assert_eq!(principal.tenant_id.as_deref(), Some("tenant"));
    }
}
