// Synapse (T-SQL) statements: external tables or OPENROWSET views.

use super::{file_glob, quote_ident, string_literal, DdlGenerator, LakePath};
use crate::models::{
    ColumnMetadata, DdlDialect, DdlStatement, DdlType, EnumValue, FileFormat, PipelineConfig, SemanticType,
    StatementKind, TableMetadata,
};

/// Longest NVARCHAR that can be declared with an explicit length
const MAX_NVARCHAR_LENGTH: i32 = 4000;
const COMPANION_VIEW_PREFIX: &str = "vw_";
const LABEL_SUFFIX: &str = "_label";

pub struct SynapseGenerator;

impl DdlGenerator for SynapseGenerator {
    fn dialect(&self) -> DdlDialect {
        DdlDialect::Synapse
    }

    fn table_statements(
        &self,
        table: &TableMetadata,
        config: &PipelineConfig,
    ) -> Result<Vec<DdlStatement>, String> {
        let columns = table
            .columns
            .iter()
            .map(|column| column_type(column, config).map(|sql_type| (column, sql_type)))
            .collect::<Result<Vec<_>, String>>()?;

        if let Some(super_table) = table.super_table() {
            return Ok(vec![sub_table_view(table, super_table, config)]);
        }

        let location = table
            .location
            .as_ref()
            .ok_or_else(|| "no physical data location".to_string())?;
        let lake_path = LakePath::parse(&location.folder_url)?;

        let mut statements = match config.ddl_type {
            DdlType::SynapseExternalTable => external_table(table, &columns, &lake_path, config),
            DdlType::SynapseView => vec![openrowset_view(table, &columns, &lake_path, location.file_format, config)],
        };

        if let (true, Some((first, first_type))) = (config.create_stats, columns.first()) {
            let statistics = match config.ddl_type {
                DdlType::SynapseExternalTable => format!(
                    "CREATE STATISTICS {} ON {} ({}) WITH FULLSCAN",
                    quote_ident(&format!("stat_{}_{}", table.name, first.name), '['),
                    object_name(&table.schema, &table.name),
                    quote_ident(&first.name, '['),
                ),
                DdlType::SynapseView => {
                    let query = format!(
                        "SELECT {} FROM {}",
                        quote_ident(&first.name, '['),
                        openrowset(&lake_path, table, location.file_format, &[(*first, first_type.clone())], config)
                    );
                    format!("EXEC sys.sp_create_openrowset_statistics N{}", string_literal(&query))
                }
            };
            statements.push(DdlStatement::new(
                DdlDialect::Synapse,
                StatementKind::CreateStatistics,
                &table.name,
                statistics,
            ));
        }

        Ok(statements)
    }
}

fn object_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema, '['), quote_ident(name, '['))
}

fn column_type(column: &ColumnMetadata, config: &PipelineConfig) -> Result<String, String> {
    let sql_type = match &column.semantic_type {
        SemanticType::String => {
            let length = column
                .max_length
                .filter(|length| *length > 0)
                .unwrap_or(i32::from(config.default_string_length));
            if length > MAX_NVARCHAR_LENGTH {
                "NVARCHAR(MAX)".to_string()
            } else {
                format!("NVARCHAR({})", length)
            }
        }
        SemanticType::Byte => "TINYINT".to_string(),
        SemanticType::Int16 => "SMALLINT".to_string(),
        SemanticType::Int32 | SemanticType::Enum { .. } => "INT".to_string(),
        SemanticType::Int64 => "BIGINT".to_string(),
        SemanticType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
        SemanticType::Double => "FLOAT".to_string(),
        SemanticType::Boolean => "BIT".to_string(),
        SemanticType::Date => "DATE".to_string(),
        SemanticType::Time => "TIME".to_string(),
        SemanticType::DateTime => "DATETIME2".to_string(),
        SemanticType::DateTimeOffset => "DATETIMEOFFSET".to_string(),
        SemanticType::Guid => "UNIQUEIDENTIFIER".to_string(),
        SemanticType::Binary => "VARBINARY(MAX)".to_string(),
        SemanticType::Json => "NVARCHAR(MAX)".to_string(),
        SemanticType::Unresolved { source } => {
            return Err(format!(
                "column {} has unresolved type {}",
                column.name, source
            ))
        }
    };
    Ok(sql_type)
}

fn external_table(
    table: &TableMetadata,
    columns: &[(&ColumnMetadata, String)],
    lake_path: &LakePath,
    config: &PipelineConfig,
) -> Vec<DdlStatement> {
    let name = object_name(&table.schema, &table.name);

    let drop = format!(
        "IF OBJECT_ID(N{}) IS NOT NULL DROP EXTERNAL TABLE {}",
        string_literal(&name),
        name
    );

    let column_list = columns
        .iter()
        .map(|(column, sql_type)| {
            format!(
                "    {} {} {}",
                quote_ident(&column.name, '['),
                sql_type,
                if column.nullable { "NULL" } else { "NOT NULL" }
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let location = match file_glob(table.partition_pattern.as_deref()) {
        Some(glob) => format!("{}/{}", lake_path.path, glob),
        None => format!("{}/**", lake_path.path),
    };

    let create = format!(
        "CREATE EXTERNAL TABLE {} (\n{}\n) WITH (\n    LOCATION = {},\n    DATA_SOURCE = {},\n    FILE_FORMAT = {}\n)",
        name,
        column_list,
        string_literal(&location),
        quote_ident(&lake_path.container, '['),
        quote_ident(&config.file_format_name, '['),
    );

    let mut statements = vec![
        DdlStatement::new(DdlDialect::Synapse, StatementKind::DropIfExists, &table.name, drop),
        DdlStatement::new(DdlDialect::Synapse, StatementKind::CreateExternalTable, &table.name, create),
    ];

    if config.translate_enum && table.has_enum_columns() {
        let companion = format!(
            "CREATE OR ALTER VIEW {} AS\nSELECT [t].*{}\nFROM {} AS [t]",
            object_name(&table.schema, &format!("{}{}", COMPANION_VIEW_PREFIX, table.name)),
            label_columns(&table.columns, "[t]"),
            name
        );
        statements.push(DdlStatement::new(
            DdlDialect::Synapse,
            StatementKind::CreateView,
            &table.name,
            companion,
        ));
    }

    statements
}

fn openrowset_view(
    table: &TableMetadata,
    columns: &[(&ColumnMetadata, String)],
    lake_path: &LakePath,
    file_format: FileFormat,
    config: &PipelineConfig,
) -> DdlStatement {
    let labels = if config.translate_enum {
        label_columns(&table.columns, "[r]")
    } else {
        String::new()
    };

    let text = format!(
        "CREATE OR ALTER VIEW {} AS\nSELECT [r].*{}\nFROM {}",
        object_name(&table.schema, &table.name),
        labels,
        openrowset(lake_path, table, file_format, columns, config)
    );
    DdlStatement::new(DdlDialect::Synapse, StatementKind::CreateView, &table.name, text)
}

fn openrowset(
    lake_path: &LakePath,
    table: &TableMetadata,
    file_format: FileFormat,
    columns: &[(&ColumnMetadata, String)],
    config: &PipelineConfig,
) -> String {
    let bulk = match file_glob(table.partition_pattern.as_deref()) {
        Some(glob) => format!("{}/{}", lake_path.https_url(), glob),
        None => format!("{}/**", lake_path.https_url()),
    };

    let mut options = vec![
        format!("BULK {}", string_literal(&bulk)),
        format!("FORMAT = {}", string_literal(file_format.as_str())),
    ];
    if file_format == FileFormat::Csv {
        options.push(format!("PARSER_VERSION = {}", string_literal(&config.parser_version)));
    }

    let with_list = columns
        .iter()
        .map(|(column, sql_type)| format!("    {} {}", quote_ident(&column.name, '['), sql_type))
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "OPENROWSET(\n    {}\n) WITH (\n{}\n) AS [r]",
        options.join(",\n    "),
        with_list
    )
}

fn sub_table_view(table: &TableMetadata, super_table: &str, config: &PipelineConfig) -> DdlStatement {
    let select_list = table
        .columns
        .iter()
        .map(|column| format!("[s].{}", quote_ident(&column.name, '[')))
        .collect::<Vec<_>>()
        .join(", ");
    let labels = if config.translate_enum {
        label_columns(&table.columns, "[s]")
    } else {
        String::new()
    };

    let text = format!(
        "CREATE OR ALTER VIEW {} AS\nSELECT {}{}\nFROM {} AS [s]",
        object_name(&table.schema, &table.name),
        select_list,
        labels,
        object_name(&table.schema, super_table)
    );
    DdlStatement::new(DdlDialect::Synapse, StatementKind::CreateView, &table.name, text)
}

/// `, CASE [t].[Status] WHEN 0 THEN 'Open' ... END AS [Status_label]` per enum column
fn label_columns(columns: &[ColumnMetadata], alias: &str) -> String {
    columns
        .iter()
        .filter_map(|column| match &column.semantic_type {
            SemanticType::Enum { values } if !values.is_empty() => Some(label_case(alias, &column.name, values)),
            _ => None,
        })
        .map(|case| format!(",\n    {}", case))
        .collect()
}

fn label_case(alias: &str, column: &str, values: &[EnumValue]) -> String {
    let arms = values
        .iter()
        .map(|value| format!("WHEN {} THEN {}", value.value, string_literal(&value.name)))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "CASE {}.{} {} END AS {}",
        alias,
        quote_ident(column, '['),
        arms,
        quote_ident(&format!("{}{}", column, LABEL_SUFFIX), '[')
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::models::SemanticType;

    fn config() -> PipelineConfig {
        PipelineConfig::new("https://acct.dfs.core.windows.net/lake/Tables/sales.manifest.cdm.json").unwrap()
    }

    #[test]
    fn test_external_table_statements() {
        let statements = SynapseGenerator.table_statements(&orders(), &config()).unwrap();
        let kinds: Vec<StatementKind> = statements.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StatementKind::DropIfExists, StatementKind::CreateExternalTable]);

        assert_eq!(
            statements[0].text,
            "IF OBJECT_ID(N'[dbo].[Orders]') IS NOT NULL DROP EXTERNAL TABLE [dbo].[Orders]"
        );
        let create = &statements[1].text;
        assert!(create.starts_with("CREATE EXTERNAL TABLE [dbo].[Orders] ("));
        assert!(create.contains("[OrderId] BIGINT NOT NULL"));
        assert!(create.contains("[Note] NVARCHAR(200) NULL"));
        assert!(create.contains("[Description] NVARCHAR(100) NULL"));
        assert!(create.contains("LOCATION = 'Tables/Orders/*.csv'"));
        assert!(create.contains("DATA_SOURCE = [lake]"));
        assert!(create.contains("FILE_FORMAT = [CSV]"));
    }

    #[test]
    fn test_create_stats_follows_table() {
        let mut config = config();
        config.create_stats = true;
        let statements = SynapseGenerator.table_statements(&orders(), &config).unwrap();

        assert_eq!(statements.len(), 3);
        assert_eq!(statements[2].kind, StatementKind::CreateStatistics);
        assert_eq!(
            statements[2].text,
            "CREATE STATISTICS [stat_Orders_OrderId] ON [dbo].[Orders] ([OrderId]) WITH FULLSCAN"
        );
    }

    #[test]
    fn test_long_strings_become_max() {
        let mut text = column("Body", SemanticType::String);
        text.max_length = Some(8000);
        let mut config = config();
        config.default_string_length = 50;
        let table = table("Notes", vec![text, column("Title", SemanticType::String)]);

        let statements = SynapseGenerator.table_statements(&table, &config).unwrap();
        assert!(statements[1].text.contains("[Body] NVARCHAR(MAX)"));
        assert!(statements[1].text.contains("[Title] NVARCHAR(50)"));
    }

    #[test]
    fn test_translate_enum_adds_companion_view() {
        let mut config = config();
        let table = with_status_enum(orders());

        let plain = SynapseGenerator.table_statements(&table, &config).unwrap();
        assert_eq!(plain.len(), 2);
        assert!(plain[1].text.contains("[Status] INT NULL"));

        config.translate_enum = true;
        let translated = SynapseGenerator.table_statements(&table, &config).unwrap();
        assert_eq!(translated.len(), 3);
        assert_eq!(translated[2].kind, StatementKind::CreateView);
        assert!(translated[2].text.starts_with("CREATE OR ALTER VIEW [dbo].[vw_Orders] AS"));
        assert!(translated[2]
            .text
            .contains("CASE [t].[Status] WHEN 0 THEN 'Open' WHEN 1 THEN 'Closed' END AS [Status_label]"));
    }

    #[test]
    fn test_view_ddl_type_uses_openrowset() {
        let mut config = config();
        config.ddl_type = DdlType::SynapseView;
        config.translate_enum = true;
        config.create_stats = true;
        let table = with_status_enum(orders());

        let statements = SynapseGenerator.table_statements(&table, &config).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].kind, StatementKind::CreateView);

        let view = &statements[0].text;
        assert!(view.starts_with("CREATE OR ALTER VIEW [dbo].[Orders] AS"));
        assert!(view.contains("BULK 'https://acct.dfs.core.windows.net/lake/Tables/Orders/*.csv'"));
        assert!(view.contains("FORMAT = 'CSV'"));
        assert!(view.contains("PARSER_VERSION = '2.0'"));
        assert!(view.contains("[Status_label]"));

        assert!(statements[1]
            .text
            .starts_with("EXEC sys.sp_create_openrowset_statistics N'SELECT [OrderId] FROM OPENROWSET("));
        assert!(statements[1].text.contains("BULK ''https://"));
    }

    #[test]
    fn test_sub_table_is_view_over_super_table() {
        let mut config = config();
        config.create_stats = true;
        let statements = SynapseGenerator
            .table_statements(&sub_table("DirPerson", "DirPartyTable"), &config)
            .unwrap();

        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].text,
            "CREATE OR ALTER VIEW [dbo].[DirPerson] AS\nSELECT [s].[RecId]\nFROM [dbo].[DirPartyTable] AS [s]"
        );
    }

    #[test]
    fn test_missing_location_is_rejected() {
        let mut table = orders();
        table.location = None;
        assert!(SynapseGenerator.table_statements(&table, &config()).is_err());
    }
}
