use serde::Deserialize;
use serde_json::Value;

use super::metadata::FileFormat;

/// One manifest document and the sub-manifests it references.
///
/// Children are owned, so a tree built for one invocation is dropped with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestNode {
    /// Folder URL of the manifest document, no trailing separator
    pub location: String,
    pub name: String,
    pub entities: Vec<EntityReference>,
    pub children: Vec<ManifestNode>,
}

impl ManifestNode {
    /// Depth-first walk, parent entities before those of its children
    pub fn flatten(&self) -> Vec<&EntityReference> {
        let mut entities: Vec<&EntityReference> = self.entities.iter().collect();
        for child in &self.children {
            entities.extend(child.flatten());
        }
        entities
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

/// Entity as listed by a manifest, before its attributes are resolved
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReference {
    pub name: String,
    /// Folder URL of the manifest that declared the entity
    pub manifest_folder: String,
    pub source: EntitySource,
    pub data_folder: Option<String>,
    pub glob_pattern: Option<String>,
    pub file_format: Option<FileFormat>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntitySource {
    /// `entityPath` of a `*.cdm.json` manifest, e.g. `Orders.cdm.json/Orders`
    Document(String),
    /// Attributes embedded in a `model.json` entity
    Inline(Vec<ModelJsonAttribute>),
}

// ---- cdm.json manifest documents ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmManifestDocument {
    #[serde(default)]
    pub manifest_name: Option<String>,
    #[serde(default)]
    pub entities: Vec<CdmManifestEntity>,
    #[serde(default)]
    pub sub_manifests: Vec<CdmSubManifest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmManifestEntity {
    pub entity_name: String,
    #[serde(default)]
    pub entity_path: Option<String>,
    #[serde(default)]
    pub data_partitions: Vec<CdmDataPartition>,
    #[serde(default)]
    pub data_partition_patterns: Vec<CdmDataPartitionPattern>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmDataPartition {
    pub location: String,
    #[serde(default)]
    pub exhibits_traits: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmDataPartitionPattern {
    #[serde(default)]
    pub root_location: Option<String>,
    #[serde(default)]
    pub glob_pattern: Option<String>,
    #[serde(default)]
    pub exhibits_traits: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmSubManifest {
    pub manifest_name: String,
    pub definition: String,
}

// ---- cdm.json entity documents ----

#[derive(Debug, Deserialize)]
pub struct CdmEntityDocument {
    #[serde(default)]
    pub definitions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmEntityDefinition {
    pub entity_name: String,
    #[serde(default)]
    pub has_attributes: Vec<CdmAttribute>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmDataTypeDefinition {
    pub data_type_name: String,
    #[serde(default)]
    pub extends_data_type: Option<Value>,
    #[serde(default)]
    pub exhibits_traits: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdmAttribute {
    pub name: String,
    #[serde(default)]
    pub data_format: Option<String>,
    /// Either a plain name or `{ "dataTypeReference": ..., "appliedTraits": [...] }`
    #[serde(default)]
    pub data_type: Option<Value>,
    #[serde(default)]
    pub maximum_length: Option<i32>,
    #[serde(default)]
    pub is_nullable: Option<bool>,
    #[serde(default)]
    pub applied_traits: Vec<Value>,
}

// ---- model.json documents ----

#[derive(Debug, Deserialize)]
pub struct ModelJsonDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entities: Vec<ModelJsonEntity>,
}

#[derive(Debug, Deserialize)]
pub struct ModelJsonEntity {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<ModelJsonAttribute>,
    #[serde(default)]
    pub partitions: Vec<ModelJsonPartition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJsonAttribute {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub max_length: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ModelJsonPartition {
    #[serde(default)]
    pub name: Option<String>,
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str) -> EntityReference {
        EntityReference {
            name: name.to_string(),
            manifest_folder: "https://acct.dfs.core.windows.net/lake".to_string(),
            source: EntitySource::Document(format!("{}.cdm.json/{}", name, name)),
            data_folder: None,
            glob_pattern: None,
            file_format: None,
        }
    }

    fn node(name: &str, entities: &[&str], children: Vec<ManifestNode>) -> ManifestNode {
        ManifestNode {
            location: format!("https://acct.dfs.core.windows.net/lake/{}", name),
            name: name.to_string(),
            entities: entities.iter().map(|e| entity(e)).collect(),
            children,
        }
    }

    #[test]
    fn test_flatten_is_depth_first_parent_first() {
        let tree = node(
            "root",
            &["A"],
            vec![
                node("left", &["B"], vec![node("leftleaf", &["C"], vec![])]),
                node("right", &["D"], vec![]),
            ],
        );

        let names: Vec<&str> = tree.flatten().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn test_manifest_document_parses_sub_manifests() {
        let doc: CdmManifestDocument = serde_json::from_str(
            r#"{
                "manifestName": "sales",
                "entities": [],
                "subManifests": [{"manifestName": "regions", "definition": "regions/regions.manifest.cdm.json"}]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.sub_manifests.len(), 1);
        assert_eq!(doc.sub_manifests[0].definition, "regions/regions.manifest.cdm.json");
    }
}
