// Manifest metadata extraction
//
// Walks a CDM manifest (and its sub-manifests) into a flat list of
// `TableMetadata`. Manifests are written incrementally upstream, so a broken
// branch or entity becomes a warning and the rest of the walk continues.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::middleware::AppError;
use crate::models::{
    CdmAttribute, CdmDataTypeDefinition, CdmEntityDefinition, CdmEntityDocument, CdmManifestDocument,
    CdmManifestEntity, ColumnMetadata, DataLocation, EntityReference, EntitySource, EnumValue, FileFormat,
    ManifestNode, ModelJsonAttribute, ModelJsonDocument, PipelineConfig, PipelineWarning, SemanticType,
    TableFilter, TableLinkage, TableMetadata,
};
use crate::services::auxiliary::AuxiliaryData;
use crate::services::data_lake::DataLakeClient;
use crate::validation::UrlValidator;

/// Sub-manifest nesting deeper than this is treated as a cycle
pub const MAX_MANIFEST_DEPTH: usize = 32;

const TRAIT_CONSTRAINED: &str = "is.constrained";
const TRAIT_CONSTRAINED_LIST: &str = "is.constrainedList";
const TRAIT_NULLABLE: &str = "is.nullable";
const TRAIT_DATA_FORMAT_PREFIX: &str = "is.dataFormat.";
const TRAIT_PARTITION_FORMAT_PREFIX: &str = "is.partition.format.";

/// Result of one extraction run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub tables: Vec<TableMetadata>,
    pub warnings: Vec<PipelineWarning>,
}

/// Reads manifests through a [`DataLakeClient`] and produces table metadata
pub struct ManifestReader<'a> {
    client: &'a dyn DataLakeClient,
    auxiliary: &'a AuxiliaryData,
}

impl<'a> ManifestReader<'a> {
    pub fn new(client: &'a dyn DataLakeClient, auxiliary: &'a AuxiliaryData) -> Self {
        Self { client, auxiliary }
    }

    /// Extract every table selected by `config.table_filter` from `config.manifest_url`
    pub async fn extract(
        &self,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<Extraction, AppError> {
        let mut warnings = Vec::new();

        let tree = if UrlValidator::is_model_json(&config.manifest_url) {
            self.load_model_json(&config.manifest_url, cancel).await?
        } else {
            self.load_node(config.manifest_url.clone(), 0, &mut warnings, cancel)
                .await?
        };

        tracing::info!(
            "Loaded manifest tree {} with {} node(s)",
            tree.name,
            tree.node_count()
        );

        let selected = self.select_entities(tree.flatten(), config, &mut warnings);

        let mut tables = Vec::with_capacity(selected.len());
        for entity in selected {
            ensure_not_cancelled(cancel)?;
            if let Some(table) = self.resolve_entity(entity, config, &mut warnings, cancel).await? {
                tables.push(table);
            }
        }

        for warning in &warnings {
            tracing::warn!(
                "Extraction warning for {}: {}",
                warning.table.as_deref().unwrap_or("manifest"),
                warning.message
            );
        }
        tracing::info!(
            "Extracted {} table(s) from {} with {} warning(s)",
            tables.len(),
            config.manifest_url,
            warnings.len()
        );

        Ok(Extraction { tables, warnings })
    }

    /// Load a cdm.json manifest and its sub-manifests, depth-first.
    ///
    /// A failure on the root manifest is an error; a failing sub-manifest only
    /// drops its own branch.
    fn load_node<'b>(
        &'b self,
        url: String,
        depth: usize,
        warnings: &'b mut Vec<PipelineWarning>,
        cancel: &'b CancellationToken,
    ) -> BoxFuture<'b, Result<ManifestNode, AppError>> {
        async move {
            ensure_not_cancelled(cancel)?;

            let content = self.read(&url, cancel).await.map_err(|e| match e {
                AppError::NotFound(msg) => AppError::Extraction(msg),
                other => other,
            })?;
            let document: CdmManifestDocument = serde_json::from_str(&content).map_err(|e| {
                AppError::Extraction(format!("Manifest {} is not valid JSON: {}", url, e))
            })?;

            let location = parent_folder(&url).to_string();
            let name = document
                .manifest_name
                .clone()
                .unwrap_or_else(|| file_name(&url).to_string());

            let entities = document
                .entities
                .iter()
                .map(|entity| manifest_entity_reference(entity, &location))
                .collect();

            let mut children = Vec::with_capacity(document.sub_manifests.len());
            for sub_manifest in &document.sub_manifests {
                if depth + 1 > MAX_MANIFEST_DEPTH {
                    warnings.push(PipelineWarning::extraction(
                        None,
                        format!(
                            "Sub-manifest {} skipped: nesting deeper than {} levels",
                            sub_manifest.manifest_name, MAX_MANIFEST_DEPTH
                        ),
                    ));
                    continue;
                }

                let child_url = join_location(&location, &sub_manifest.definition);
                match self
                    .load_node(child_url.clone(), depth + 1, &mut *warnings, cancel)
                    .await
                {
                    Ok(child) => children.push(child),
                    Err(AppError::Cancelled(msg)) => return Err(AppError::Cancelled(msg)),
                    Err(e) => warnings.push(PipelineWarning::extraction(
                        None,
                        format!(
                            "Sub-manifest {} ({}) skipped: {}",
                            sub_manifest.manifest_name, child_url, e
                        ),
                    )),
                }
            }

            Ok(ManifestNode {
                location,
                name,
                entities,
                children,
            })
        }
        .boxed()
    }

    /// model.json is flat: attributes are inline and there are no sub-manifests
    async fn load_model_json(&self, url: &str, cancel: &CancellationToken) -> Result<ManifestNode, AppError> {
        let content = self.read(url, cancel).await.map_err(|e| match e {
            AppError::NotFound(msg) => AppError::Extraction(msg),
            other => other,
        })?;
        let document: ModelJsonDocument = serde_json::from_str(&content)
            .map_err(|e| AppError::Extraction(format!("model.json {} is not valid JSON: {}", url, e)))?;

        let location = parent_folder(url).to_string();
        let entities = document
            .entities
            .into_iter()
            .map(|entity| {
                let partition = entity.partitions.first().map(|p| strip_local_prefix(&p.location));
                let file_format = partition.and_then(FileFormat::from_path);
                let data_folder = partition.map(|p| join_location(&location, parent_folder(p)));
                EntityReference {
                    name: entity.name,
                    manifest_folder: location.clone(),
                    source: EntitySource::Inline(entity.attributes),
                    data_folder,
                    glob_pattern: None,
                    file_format,
                }
            })
            .collect();

        Ok(ManifestNode {
            name: document.name.unwrap_or_else(|| "model".to_string()),
            location,
            entities,
            children: Vec::new(),
        })
    }

    /// Apply the table filter, the entity allow-list and name de-duplication
    fn select_entities<'e>(
        &self,
        flat: Vec<&'e EntityReference>,
        config: &PipelineConfig,
        warnings: &mut Vec<PipelineWarning>,
    ) -> Vec<&'e EntityReference> {
        // First occurrence in depth-first order wins for duplicated names
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(flat.len());
        for entity in flat {
            if seen.insert(entity.name.to_lowercase()) {
                unique.push(entity);
            } else {
                warnings.push(PipelineWarning::extraction(
                    Some(entity.name.as_str()),
                    format!(
                        "Duplicate entity in manifest folder {} ignored",
                        entity.manifest_folder
                    ),
                ));
            }
        }

        let filtered = match &config.table_filter {
            TableFilter::All => unique,
            TableFilter::Named(names) => {
                let mut selected = Vec::with_capacity(names.len());
                let mut picked = HashSet::new();
                for name in names {
                    match unique.iter().find(|e| e.name.eq_ignore_ascii_case(name)) {
                        Some(entity) => {
                            if picked.insert(entity.name.to_lowercase()) {
                                selected.push(*entity);
                            }
                        }
                        None => warnings.push(PipelineWarning::extraction(
                            Some(name.as_str()),
                            "Table filter entry matched no entity in the manifest",
                        )),
                    }
                }
                selected
            }
        };

        if config.process_entities && !self.auxiliary.entity_allow_list().is_empty() {
            filtered
                .into_iter()
                .filter(|entity| {
                    let allowed = self.auxiliary.is_entity_allowed(&entity.name);
                    if !allowed {
                        tracing::debug!("Entity {} is not in the entity list", entity.name);
                    }
                    allowed
                })
                .collect()
        } else {
            filtered
        }
    }

    /// Resolve one entity into table metadata, or record why it was dropped.
    /// Only cancellation is an error.
    async fn resolve_entity(
        &self,
        entity: &EntityReference,
        config: &PipelineConfig,
        warnings: &mut Vec<PipelineWarning>,
        cancel: &CancellationToken,
    ) -> Result<Option<TableMetadata>, AppError> {
        let columns = match &entity.source {
            EntitySource::Inline(attributes) => inline_columns(attributes),
            EntitySource::Document(entity_path) => {
                match self.document_columns(entity, entity_path, warnings, cancel).await {
                    Ok(columns) => columns,
                    Err(AppError::Cancelled(msg)) => return Err(AppError::Cancelled(msg)),
                    Err(e) => {
                        warnings.push(PipelineWarning::extraction(
                            Some(entity.name.as_str()),
                            format!("Entity skipped: {}", e),
                        ));
                        return Ok(None);
                    }
                }
            }
        };

        let columns: Vec<ColumnMetadata> = columns
            .into_iter()
            .map(|column| self.apply_column_property(&entity.name, column))
            .collect();

        if columns.is_empty() {
            warnings.push(PipelineWarning::extraction(
                Some(entity.name.as_str()),
                "Entity skipped: no resolvable columns",
            ));
            return Ok(None);
        }

        let linkage = if config.process_sub_table_super_tables {
            match self.auxiliary.super_table_of(&entity.name) {
                Some(super_table) => Some(TableLinkage::SubTableOf(super_table.to_string())),
                None => {
                    let subs = self.auxiliary.sub_tables_of(&entity.name);
                    (!subs.is_empty()).then_some(TableLinkage::SuperTableOf(subs))
                }
            }
        } else {
            None
        };

        let location = entity.data_folder.as_ref().map(|folder| DataLocation {
            folder_url: folder.clone(),
            file_format: entity.file_format.unwrap_or(FileFormat::Csv),
        });

        let is_sub_table = matches!(linkage, Some(TableLinkage::SubTableOf(_)));
        if location.is_none() && !is_sub_table {
            warnings.push(PipelineWarning::extraction(
                Some(entity.name.as_str()),
                "Entity skipped: no physical data location in the manifest",
            ));
            return Ok(None);
        }

        Ok(Some(TableMetadata {
            name: entity.name.clone(),
            schema: config.schema.clone(),
            columns,
            location,
            partition_pattern: entity.glob_pattern.clone(),
            linkage,
        }))
    }

    /// Read a lake file, giving up as soon as `cancel` fires
    async fn read(&self, url: &str, cancel: &CancellationToken) -> Result<String, AppError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled(format!("read of {} aborted", url))),
            content = self.client.read_to_string(url) => content,
        }
    }

    async fn document_columns(
        &self,
        entity: &EntityReference,
        entity_path: &str,
        warnings: &mut Vec<PipelineWarning>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ColumnMetadata>, AppError> {
        let (document_path, definition_name) = split_entity_path(entity_path, &entity.name);
        let document_url = join_location(&entity.manifest_folder, document_path);

        let content = self.read(&document_url, cancel).await?;
        let document: CdmEntityDocument = serde_json::from_str(&content).map_err(|e| {
            AppError::Extraction(format!("Entity document {} is not valid JSON: {}", document_url, e))
        })?;

        let mut definition = None;
        let mut data_types = HashMap::new();
        for value in &document.definitions {
            if value.get("entityName").is_some() {
                let parsed: CdmEntityDefinition = serde_json::from_value(value.clone())?;
                if parsed.entity_name.eq_ignore_ascii_case(definition_name) {
                    definition = Some(parsed);
                }
            } else if value.get("dataTypeName").is_some() {
                let parsed: CdmDataTypeDefinition = serde_json::from_value(value.clone())?;
                data_types.insert(parsed.data_type_name.to_lowercase(), parsed);
            }
        }

        let definition = definition.ok_or_else(|| {
            AppError::Extraction(format!(
                "Entity definition {} not found in {}",
                definition_name, document_url
            ))
        })?;

        Ok(definition
            .has_attributes
            .iter()
            .map(|attribute| resolve_attribute(&entity.name, attribute, &data_types, warnings))
            .collect())
    }

    fn apply_column_property(&self, table: &str, mut column: ColumnMetadata) -> ColumnMetadata {
        let Some(property) = self.auxiliary.column_property(table, &column.name) else {
            return column;
        };

        if let Some(semantic) = property.data_type.as_deref().and_then(SemanticType::from_cdm) {
            column.semantic_type = semantic;
        }
        if let Some(max_length) = property.max_length {
            column.max_length = Some(max_length);
        }
        if let SemanticType::Decimal { precision, scale } = &mut column.semantic_type {
            if let Some(p) = property.precision {
                *precision = p;
            }
            if let Some(s) = property.scale {
                *scale = s;
            }
        }
        column
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled("extraction aborted".to_string()));
    }
    Ok(())
}

fn manifest_entity_reference(entity: &CdmManifestEntity, manifest_folder: &str) -> EntityReference {
    let mut data_folder = None;
    let mut glob_pattern = None;
    let mut file_format = None;

    if let Some(pattern) = entity.data_partition_patterns.first() {
        data_folder = pattern
            .root_location
            .as_deref()
            .map(|root| join_location(manifest_folder, strip_local_prefix(root)));
        glob_pattern = pattern.glob_pattern.clone();
        file_format = partition_format(&pattern.exhibits_traits)
            .or_else(|| pattern.glob_pattern.as_deref().and_then(FileFormat::from_path));
    }

    if data_folder.is_none() {
        if let Some(partition) = entity.data_partitions.first() {
            let location = strip_local_prefix(&partition.location);
            data_folder = Some(join_location(manifest_folder, parent_folder(location)));
            file_format = partition_format(&partition.exhibits_traits).or_else(|| FileFormat::from_path(location));
        }
    }

    let source = entity
        .entity_path
        .clone()
        .unwrap_or_else(|| format!("{}.cdm.json/{}", entity.entity_name, entity.entity_name));

    EntityReference {
        name: entity.entity_name.clone(),
        manifest_folder: manifest_folder.to_string(),
        source: EntitySource::Document(source),
        data_folder,
        glob_pattern,
        file_format,
    }
}

fn inline_columns(attributes: &[ModelJsonAttribute]) -> Vec<ColumnMetadata> {
    attributes
        .iter()
        .map(|attribute| {
            let source = attribute.data_type.clone().unwrap_or_default();
            ColumnMetadata {
                name: attribute.name.clone(),
                semantic_type: SemanticType::from_cdm(&source)
                    .unwrap_or(SemanticType::Unresolved { source }),
                nullable: true,
                max_length: attribute.max_length,
            }
        })
        .collect()
}

/// Resolve a CDM attribute. Named data types are followed one hop only.
fn resolve_attribute(
    table: &str,
    attribute: &CdmAttribute,
    data_types: &HashMap<String, CdmDataTypeDefinition>,
    warnings: &mut Vec<PipelineWarning>,
) -> ColumnMetadata {
    let mut traits: Vec<&Value> = attribute.applied_traits.iter().collect();
    let mut semantic = attribute.data_format.as_deref().and_then(SemanticType::from_cdm);

    if semantic.is_none() {
        if let Some(data_type) = &attribute.data_type {
            if let Some(applied) = data_type.get("appliedTraits").and_then(Value::as_array) {
                traits.extend(applied.iter());
            }

            let type_name = data_type_name(data_type).unwrap_or_default();
            semantic = SemanticType::from_cdm(type_name).or_else(|| {
                let definition = data_types.get(&type_name.to_lowercase())?;
                traits.extend(definition.exhibits_traits.iter());

                let extends = definition.extends_data_type.as_ref().and_then(data_type_name)?;
                match SemanticType::from_cdm(extends) {
                    Some(resolved) => Some(resolved),
                    None => {
                        let message = if data_types.contains_key(&extends.to_lowercase()) {
                            format!(
                                "Column {}: data type {} extends {}, which needs more than one hop to resolve",
                                attribute.name, type_name, extends
                            )
                        } else {
                            format!(
                                "Column {}: data type {} extends unknown type {}",
                                attribute.name, type_name, extends
                            )
                        };
                        warnings.push(PipelineWarning::extraction(Some(table), message));
                        Some(SemanticType::Unresolved {
                            source: extends.to_string(),
                        })
                    }
                }
            });
        }
    }

    let mut max_length = attribute.maximum_length;
    let mut nullable = attribute.is_nullable;

    for applied in traits {
        let Some(name) = trait_name(applied) else { continue };

        if name == TRAIT_CONSTRAINED {
            if let Some(length) = trait_argument(applied, "maximumLength").and_then(value_as_i64) {
                max_length = max_length.or(i32::try_from(length).ok());
            }
        } else if name == TRAIT_CONSTRAINED_LIST {
            if let Some(values) = trait_argument(applied, "defaultList").map(enum_values) {
                if !values.is_empty() {
                    semantic = Some(SemanticType::Enum { values });
                }
            }
        } else if name == TRAIT_NULLABLE {
            nullable = nullable.or(Some(true));
        } else if let Some(format) = name.strip_prefix(TRAIT_DATA_FORMAT_PREFIX) {
            if semantic.is_none() {
                semantic = SemanticType::from_cdm(format);
            }
        }
    }

    let semantic = semantic.unwrap_or_else(|| SemanticType::Unresolved {
        source: attribute
            .data_type
            .as_ref()
            .and_then(data_type_name)
            .unwrap_or("unspecified")
            .to_string(),
    });

    ColumnMetadata {
        name: attribute.name.clone(),
        semantic_type: semantic,
        nullable: nullable.unwrap_or(true),
        max_length,
    }
}

/// `"string"` or `{ "dataTypeReference": "string" }`
fn data_type_name(value: &Value) -> Option<&str> {
    match value {
        Value::String(name) => Some(name.as_str()),
        Value::Object(map) => map.get("dataTypeReference").and_then(data_type_name),
        _ => None,
    }
}

/// `"is.nullable"` or `{ "traitReference": "is.nullable", "arguments": [...] }`
fn trait_name(value: &Value) -> Option<&str> {
    match value {
        Value::String(name) => Some(name.as_str()),
        Value::Object(map) => map
            .get("traitReference")
            .and_then(trait_name)
            .or_else(|| map.get("traitName").and_then(Value::as_str)),
        _ => None,
    }
}

fn trait_argument<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    let arguments = value.get("arguments")?.as_array()?;
    arguments.iter().find_map(|argument| match argument {
        Value::Object(map) if map.get("name").and_then(Value::as_str) == Some(name) => map.get("value"),
        _ => None,
    })
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Rows of `defaultList.entityReference.constantValues`, each `[name, value]`
fn enum_values(value: &Value) -> Vec<EnumValue> {
    let rows = value
        .get("entityReference")
        .and_then(|reference| reference.get("constantValues"))
        .or_else(|| value.get("constantValues"))
        .and_then(Value::as_array);

    rows.map(|rows| {
        rows.iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                let name = row.first()?.as_str()?.to_string();
                let value = value_as_i64(row.get(1)?)?;
                Some(EnumValue { name, value })
            })
            .collect()
    })
    .unwrap_or_default()
}

fn partition_format(traits: &[Value]) -> Option<FileFormat> {
    traits.iter().filter_map(trait_name).find_map(|name| {
        let format = name.strip_prefix(TRAIT_PARTITION_FORMAT_PREFIX)?;
        match format.to_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "parquet" => Some(FileFormat::Parquet),
            _ => None,
        }
    })
}

/// `Orders.cdm.json/Orders` -> (`Orders.cdm.json`, `Orders`)
fn split_entity_path<'p>(entity_path: &'p str, entity_name: &'p str) -> (&'p str, &'p str) {
    let path = strip_local_prefix(entity_path);
    match path.rfind('/') {
        Some(idx) if path[..idx].to_lowercase().ends_with(".cdm.json") => (&path[..idx], &path[idx + 1..]),
        _ => (path, entity_name),
    }
}

fn strip_local_prefix(path: &str) -> &str {
    path.strip_prefix("local:").unwrap_or(path)
}

fn parent_folder(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve a manifest-relative location against its folder; absolute URLs pass through
fn join_location(folder: &str, relative: &str) -> String {
    if relative.starts_with("https://") || relative.starts_with("http://") {
        return relative.trim_end_matches('/').to_string();
    }
    let relative = relative.trim_start_matches('/').trim_end_matches('/');
    if relative.is_empty() {
        return folder.trim_end_matches('/').to_string();
    }
    format!("{}/{}", folder.trim_end_matches('/'), relative)
}
