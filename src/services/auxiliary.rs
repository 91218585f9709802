// Auxiliary lookup files shipped next to the service.
//
// All four files are optional. They are read once at startup and shared
// read-only between invocations.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const COLUMN_PROPERTIES_FILE: &str = "SourceColumnProperties.json";
pub const VIEW_SYNTAX_FILE: &str = "ReplaceViewSyntax.json";
pub const ENTITY_LIST_FILE: &str = "EntityList.json";
pub const SUB_TABLE_SUPER_TABLE_FILE: &str = "SubTableSuperTableList.json";

/// Column-level overrides for what the manifest declares
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnProperty {
    pub table: String,
    pub column: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub max_length: Option<i32>,
    #[serde(default)]
    pub precision: Option<u8>,
    #[serde(default)]
    pub scale: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ViewSyntaxEntry {
    table_name: String,
    syntax: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EntityListEntry {
    Name(String),
    Entry {
        #[serde(rename = "Name", alias = "name", alias = "TableName", alias = "EntityName")]
        name: String,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SubTableLink {
    pub sub_table: String,
    pub super_table: String,
}

/// Table-name keyed lookup tables, compared case-insensitively
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryData {
    column_properties: HashMap<(String, String), ColumnProperty>,
    view_syntax: HashMap<String, String>,
    entity_allow_list: Vec<String>,
    sub_table_links: Vec<SubTableLink>,
}

impl AuxiliaryData {
    /// Load every auxiliary file found in `directory`
    pub fn load(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref();

        let column_properties: Vec<ColumnProperty> =
            read_optional(&directory.join(COLUMN_PROPERTIES_FILE))?.unwrap_or_default();
        let view_syntax: Vec<ViewSyntaxEntry> =
            read_optional(&directory.join(VIEW_SYNTAX_FILE))?.unwrap_or_default();
        let entities: Vec<EntityListEntry> =
            read_optional(&directory.join(ENTITY_LIST_FILE))?.unwrap_or_default();
        let links: Vec<SubTableLink> =
            read_optional(&directory.join(SUB_TABLE_SUPER_TABLE_FILE))?.unwrap_or_default();

        let data = Self::default()
            .with_column_properties(column_properties)
            .with_view_syntax(view_syntax.into_iter().map(|e| (e.table_name, e.syntax)))
            .with_entity_allow_list(entities.into_iter().map(|e| match e {
                EntityListEntry::Name(name) => name,
                EntityListEntry::Entry { name } => name,
            }))
            .with_sub_table_links(links);

        tracing::info!(
            "Loaded auxiliary data from {}: {} column properties, {} view overrides, {} allowed entities, {} sub-table links",
            directory.display(),
            data.column_properties.len(),
            data.view_syntax.len(),
            data.entity_allow_list.len(),
            data.sub_table_links.len()
        );

        Ok(data)
    }

    pub fn with_column_properties(mut self, properties: impl IntoIterator<Item = ColumnProperty>) -> Self {
        for property in properties {
            let key = (property.table.to_lowercase(), property.column.to_lowercase());
            self.column_properties.insert(key, property);
        }
        self
    }

    pub fn with_view_syntax<K: Into<String>, V: Into<String>>(
        mut self,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        for (table, syntax) in entries {
            self.view_syntax.insert(table.into().to_lowercase(), syntax.into());
        }
        self
    }

    pub fn with_entity_allow_list<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.entity_allow_list.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_sub_table_links(mut self, links: impl IntoIterator<Item = SubTableLink>) -> Self {
        self.sub_table_links.extend(links);
        self
    }

    pub fn column_property(&self, table: &str, column: &str) -> Option<&ColumnProperty> {
        self.column_properties
            .get(&(table.to_lowercase(), column.to_lowercase()))
    }

    /// Literal statement text replacing the generated create statement for `table`
    pub fn view_syntax(&self, table: &str) -> Option<&str> {
        self.view_syntax.get(&table.to_lowercase()).map(|s| s.as_str())
    }

    pub fn entity_allow_list(&self) -> &[String] {
        &self.entity_allow_list
    }

    pub fn is_entity_allowed(&self, name: &str) -> bool {
        self.entity_allow_list.is_empty()
            || self
                .entity_allow_list
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    pub fn super_table_of(&self, table: &str) -> Option<&str> {
        self.sub_table_links
            .iter()
            .find(|link| link.sub_table.eq_ignore_ascii_case(table))
            .map(|link| link.super_table.as_str())
    }

    pub fn sub_tables_of(&self, table: &str) -> Vec<String> {
        self.sub_table_links
            .iter()
            .filter(|link| link.super_table.eq_ignore_ascii_case(table))
            .map(|link| link.sub_table.clone())
            .collect()
    }
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read auxiliary file: {}", path.display()))?;
    let parsed = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse auxiliary file: {}", path.display()))?;
    Ok(Some(parsed))
}
