// DDL generation
//
// Each target backend implements `DdlGenerator`; `generate` drives either one
// over the extracted tables and applies the view-syntax overrides.

pub mod spark;
pub mod synapse;

pub use spark::SparkGenerator;
pub use synapse::SynapseGenerator;

use sqlparser::ast::Ident;
use url::Url;

use crate::models::{DdlDialect, DdlStatement, PipelineConfig, PipelineWarning, TableMetadata};
use crate::services::auxiliary::AuxiliaryData;

/// Turns table metadata into statements for one backend
pub trait DdlGenerator: Send + Sync {
    fn dialect(&self) -> DdlDialect;

    /// All statements for a single table, in execution order.
    ///
    /// Returns the reason as `Err` when the table cannot be expressed in this
    /// dialect (unresolved column type, missing location).
    fn table_statements(
        &self,
        table: &TableMetadata,
        config: &PipelineConfig,
    ) -> Result<Vec<DdlStatement>, String>;
}

/// Statements for a batch of tables plus the tables that were skipped
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub statements: Vec<DdlStatement>,
    pub warnings: Vec<PipelineWarning>,
}

/// Spark endpoint configured means Spark, everything else goes to Synapse
pub fn select_generator(config: &PipelineConfig) -> Box<dyn DdlGenerator> {
    if config.targets_spark() {
        Box::new(SparkGenerator)
    } else {
        Box::new(SynapseGenerator)
    }
}

/// Generate statements for `tables` in order, skipping tables the dialect
/// cannot express.
pub fn generate(
    generator: &dyn DdlGenerator,
    tables: &[TableMetadata],
    config: &PipelineConfig,
    auxiliary: &AuxiliaryData,
) -> Generation {
    let mut generation = Generation::default();

    for table in tables {
        let mut statements = match generator.table_statements(table, config) {
            Ok(statements) => statements,
            Err(reason) => {
                tracing::warn!(
                    "Skipping {} for {}: {}",
                    table.qualified_name(),
                    generator.dialect().as_str(),
                    reason
                );
                generation
                    .warnings
                    .push(PipelineWarning::generation(&table.name, reason));
                continue;
            }
        };

        if let Some(replacement) = auxiliary.view_syntax(&table.name) {
            if let Some(primary) = statements.iter_mut().find(|s| s.kind.is_primary_create()) {
                tracing::debug!("Using view syntax override for {}", table.qualified_name());
                primary.text = replacement.to_string();
            }
        }

        generation.statements.extend(statements);
    }

    tracing::info!(
        "Generated {} {} statement(s) for {} table(s), {} skipped",
        generation.statements.len(),
        generator.dialect().as_str(),
        tables.len(),
        generation.warnings.len()
    );

    generation
}

/// `https://{account}.dfs.core.windows.net/{container}/{path}` split into parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LakePath {
    pub account: String,
    pub container: String,
    /// Path inside the container, no leading or trailing separator
    pub path: String,
}

impl LakePath {
    pub fn parse(folder_url: &str) -> Result<Self, String> {
        let url = Url::parse(folder_url).map_err(|e| format!("invalid data location {}: {}", folder_url, e))?;
        let account = url
            .host_str()
            .and_then(|host| host.split('.').next())
            .filter(|account| !account.is_empty())
            .ok_or_else(|| format!("data location {} has no storage account", folder_url))?
            .to_string();

        let mut segments = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();
        let container = segments
            .next()
            .ok_or_else(|| format!("data location {} has no container", folder_url))?
            .to_string();
        let path = segments.collect::<Vec<_>>().join("/");

        Ok(Self {
            account,
            container,
            path,
        })
    }

    /// Folder URL on the `dfs` endpoint regardless of the endpoint it was given on
    pub fn https_url(&self) -> String {
        format!(
            "https://{}.dfs.core.windows.net/{}/{}",
            self.account, self.container, self.path
        )
    }

    pub fn abfss_url(&self) -> String {
        format!(
            "abfss://{}@{}.dfs.core.windows.net/{}",
            self.container, self.account, self.path
        )
    }
}

/// Quote an identifier with `[` or a backtick
pub(crate) fn quote_ident(name: &str, quote: char) -> String {
    let value = if quote == '[' {
        name.replace(']', "]]")
    } else {
        name.to_string()
    };
    Ident::with_quote(quote, value).to_string()
}

/// Single-quoted literal with embedded quotes doubled
pub(crate) fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Glob appended to a folder, file-name part only (`/*.csv` -> `*.csv`)
pub(crate) fn file_glob(pattern: Option<&str>) -> Option<&str> {
    let pattern = pattern?.trim().trim_start_matches('/');
    let file_part = pattern.rsplit('/').next().unwrap_or(pattern);
    (!file_part.is_empty()).then_some(file_part)
}
