use serde::{Deserialize, Serialize};

/// One logical table extracted from a manifest entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub schema: String,
    /// Never empty: entities without resolvable columns are not emitted
    pub columns: Vec<ColumnMetadata>,
    pub location: Option<DataLocation>,
    pub partition_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkage: Option<TableLinkage>,
}

impl TableMetadata {
    /// Schema-qualified display name, used for log lines and warnings
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Super-table this table is a view over, if any
    pub fn super_table(&self) -> Option<&str> {
        match &self.linkage {
            Some(TableLinkage::SubTableOf(super_table)) => Some(super_table),
            _ => None,
        }
    }

    pub fn has_enum_columns(&self) -> bool {
        self.columns
            .iter()
            .any(|column| matches!(column.semantic_type, SemanticType::Enum { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    pub max_length: Option<i32>,
}

/// Pipeline-level column type, independent of the target dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Byte,
    Int16,
    Int32,
    Int64,
    Decimal { precision: u8, scale: u8 },
    Double,
    Boolean,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Guid,
    Binary,
    Json,
    Enum { values: Vec<EnumValue> },
    /// The source type could not be mapped; generators skip the owning table
    Unresolved { source: String },
}

pub const DEFAULT_DECIMAL_PRECISION: u8 = 32;
pub const DEFAULT_DECIMAL_SCALE: u8 = 6;

impl SemanticType {
    /// Map a CDM scalar name (`dataFormat` or logical `dataType`) to a semantic type
    pub fn from_cdm(name: &str) -> Option<Self> {
        let semantic = match name.trim().to_lowercase().as_str() {
            "string" | "char" | "character" | "name" | "text" => SemanticType::String,
            "byte" | "tinyinteger" => SemanticType::Byte,
            "int16" | "smallinteger" => SemanticType::Int16,
            "int32" | "integer" | "int" => SemanticType::Int32,
            "int64" | "biginteger" | "long" => SemanticType::Int64,
            "decimal" | "currency" => SemanticType::Decimal {
                precision: DEFAULT_DECIMAL_PRECISION,
                scale: DEFAULT_DECIMAL_SCALE,
            },
            "double" | "float" => SemanticType::Double,
            "boolean" | "bool" => SemanticType::Boolean,
            "date" => SemanticType::Date,
            "time" => SemanticType::Time,
            "datetime" => SemanticType::DateTime,
            "datetimeoffset" => SemanticType::DateTimeOffset,
            "guid" | "uuid" => SemanticType::Guid,
            "binary" => SemanticType::Binary,
            "json" => SemanticType::Json,
            _ => return None,
        };
        Some(semantic)
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SemanticType::Unresolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// Physical folder holding a table's files
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataLocation {
    pub folder_url: String,
    pub file_format: FileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl FileFormat {
    /// Guess the format from a partition file name or glob
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        if lower.ends_with(".parquet") {
            Some(FileFormat::Parquet)
        } else if lower.ends_with(".csv") {
            Some(FileFormat::Csv)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "CSV",
            FileFormat::Parquet => "PARQUET",
        }
    }
}

/// Derived-table relationship taken from the sub-table/super-table list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableLinkage {
    SubTableOf(String),
    SuperTableOf(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningStage {
    Extraction,
    LandingZone,
    Generation,
    Execution,
}

/// Recoverable problem recorded while the pipeline keeps going
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineWarning {
    pub stage: WarningStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub message: String,
}

impl PipelineWarning {
    pub fn extraction(table: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            stage: WarningStage::Extraction,
            table: table.map(|t| t.to_string()),
            message: message.into(),
        }
    }

    pub fn generation(table: &str, message: impl Into<String>) -> Self {
        Self {
            stage: WarningStage::Generation,
            table: Some(table.to_string()),
            message: message.into(),
        }
    }

    pub fn landing_zone(message: impl Into<String>) -> Self {
        Self {
            stage: WarningStage::LandingZone,
            table: None,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            stage: WarningStage::Execution,
            table: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_type_from_cdm() {
        assert_eq!(SemanticType::from_cdm("String"), Some(SemanticType::String));
        assert_eq!(SemanticType::from_cdm("bigInteger"), Some(SemanticType::Int64));
        assert_eq!(SemanticType::from_cdm("Int32"), Some(SemanticType::Int32));
        assert_eq!(SemanticType::from_cdm("dateTimeOffset"), Some(SemanticType::DateTimeOffset));
        assert_eq!(
            SemanticType::from_cdm("Decimal"),
            Some(SemanticType::Decimal { precision: 32, scale: 6 })
        );
        assert_eq!(SemanticType::from_cdm("Geography"), None);
    }

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(FileFormat::from_path("Orders/part-0001.csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_path("/*.parquet"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::from_path("Orders"), None);
    }

    #[test]
    fn test_super_table_linkage() {
        let table = TableMetadata {
            name: "DirPerson".to_string(),
            schema: "dbo".to_string(),
            columns: vec![],
            location: None,
            partition_pattern: None,
            linkage: Some(TableLinkage::SubTableOf("DirPartyTable".to_string())),
        };
        assert_eq!(table.super_table(), Some("DirPartyTable"));
        assert_eq!(table.qualified_name(), "dbo.DirPerson");
    }
}
