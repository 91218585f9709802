// Spark SQL catalog registration over the lake folders.

use super::{file_glob, quote_ident, string_literal, DdlGenerator, LakePath};
use crate::models::{
    ColumnMetadata, DdlDialect, DdlStatement, FileFormat, PipelineConfig, SemanticType, StatementKind,
    TableMetadata,
};

pub struct SparkGenerator;

impl DdlGenerator for SparkGenerator {
    fn dialect(&self) -> DdlDialect {
        DdlDialect::Spark
    }

    fn table_statements(
        &self,
        table: &TableMetadata,
        config: &PipelineConfig,
    ) -> Result<Vec<DdlStatement>, String> {
        let columns = table
            .columns
            .iter()
            .map(|column| column_definition(column, config))
            .collect::<Result<Vec<_>, String>>()?;

        let name = object_name(&table.schema, &table.name);

        if let Some(super_table) = table.super_table() {
            let select_list = table
                .columns
                .iter()
                .map(|column| quote_ident(&column.name, '`'))
                .collect::<Vec<_>>()
                .join(", ");
            let text = format!(
                "CREATE OR REPLACE VIEW {} AS\nSELECT {}\nFROM {}",
                name,
                select_list,
                object_name(&table.schema, super_table)
            );
            return Ok(vec![DdlStatement::new(
                DdlDialect::Spark,
                StatementKind::CreateView,
                &table.name,
                text,
            )]);
        }

        let location = table
            .location
            .as_ref()
            .ok_or_else(|| "no physical data location".to_string())?;
        let lake_path = LakePath::parse(&location.folder_url)?;

        let mut options = Vec::new();
        if location.file_format == FileFormat::Csv {
            options.push(format!("header {}", string_literal("false")));
        }
        if let Some(glob) = file_glob(table.partition_pattern.as_deref()) {
            options.push(format!("pathGlobFilter {}", string_literal(glob)));
        }
        let options = if options.is_empty() {
            String::new()
        } else {
            format!("\nOPTIONS ({})", options.join(", "))
        };

        let text = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)\nUSING {}{}\nLOCATION {}",
            name,
            columns.join(",\n"),
            location.file_format.as_str(),
            options,
            string_literal(&lake_path.abfss_url())
        );

        Ok(vec![DdlStatement::new(
            DdlDialect::Spark,
            StatementKind::CreateTable,
            &table.name,
            text,
        )])
    }
}

fn object_name(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema, '`'), quote_ident(name, '`'))
}

fn column_definition(column: &ColumnMetadata, config: &PipelineConfig) -> Result<String, String> {
    let sql_type = match &column.semantic_type {
        SemanticType::String | SemanticType::Time | SemanticType::Guid | SemanticType::Json => "STRING".to_string(),
        SemanticType::Byte => "TINYINT".to_string(),
        SemanticType::Int16 => "SMALLINT".to_string(),
        SemanticType::Int32 | SemanticType::Enum { .. } => "INT".to_string(),
        SemanticType::Int64 => "BIGINT".to_string(),
        SemanticType::Decimal { precision, scale } => format!("DECIMAL({},{})", precision, scale),
        SemanticType::Double => "DOUBLE".to_string(),
        SemanticType::Boolean => "BOOLEAN".to_string(),
        SemanticType::Date => "DATE".to_string(),
        SemanticType::DateTime | SemanticType::DateTimeOffset => "TIMESTAMP".to_string(),
        SemanticType::Binary => "BINARY".to_string(),
        SemanticType::Unresolved { source } => {
            return Err(format!("column {} has unresolved type {}", column.name, source))
        }
    };

    let mut definition = format!("    {} {}", quote_ident(&column.name, '`'), sql_type);
    if let (true, SemanticType::Enum { values }) = (config.translate_enum, &column.semantic_type) {
        let listing = values
            .iter()
            .map(|value| format!("{}={}", value.name, value.value))
            .collect::<Vec<_>>()
            .join(", ");
        definition.push_str(&format!(" COMMENT {}", string_literal(&listing)));
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn config() -> PipelineConfig {
        let mut config =
            PipelineConfig::new("https://acct.dfs.core.windows.net/lake/Tables/sales.manifest.cdm.json").unwrap();
        config.target_spark_endpoint = Some("https://livy.example.net".to_string());
        config
    }

    #[test]
    fn test_single_create_table_statement() {
        let mut config = config();
        config.create_stats = true;
        let statements = SparkGenerator.table_statements(&orders(), &config).unwrap();

        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].kind, StatementKind::CreateTable);
        assert_eq!(statements[0].dialect, DdlDialect::Spark);
        assert_eq!(
            statements[0].text,
            "CREATE TABLE IF NOT EXISTS `dbo`.`Orders` (\n    `OrderId` BIGINT,\n    `Note` STRING,\n    `Description` STRING\n)\nUSING CSV\nOPTIONS (header 'false', pathGlobFilter '*.csv')\nLOCATION 'abfss://lake@acct.dfs.core.windows.net/Tables/Orders'"
        );
    }

    #[test]
    fn test_enum_comment_when_translating() {
        let table = with_status_enum(orders());
        let mut config = config();

        let plain = SparkGenerator.table_statements(&table, &config).unwrap();
        assert!(plain[0].text.contains("`Status` INT\n"));

        config.translate_enum = true;
        let translated = SparkGenerator.table_statements(&table, &config).unwrap();
        assert!(translated[0].text.contains("`Status` INT COMMENT 'Open=0, Closed=1'"));
    }

    #[test]
    fn test_parquet_without_glob_has_no_options() {
        let mut table = orders();
        table.partition_pattern = None;
        if let Some(location) = table.location.as_mut() {
            location.file_format = FileFormat::Parquet;
        }

        let statements = SparkGenerator.table_statements(&table, &config()).unwrap();
        assert!(statements[0].text.contains("USING PARQUET\nLOCATION"));
        assert!(!statements[0].text.contains("OPTIONS"));
    }

    #[test]
    fn test_sub_table_view() {
        let statements = SparkGenerator
            .table_statements(&sub_table("DirPerson", "DirPartyTable"), &config())
            .unwrap();
        assert_eq!(
            statements[0].text,
            "CREATE OR REPLACE VIEW `dbo`.`DirPerson` AS\nSELECT `RecId`\nFROM `dbo`.`DirPartyTable`"
        );
    }
}
