//! Document grouper: partitions a document stream by a metadata key.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::keys;
use crate::stage::{Context, Stage};
use async_trait::async_trait;
use indexmap::IndexMap;

/// Partition `inputs` by the string value of `key`.
///
/// Groups appear in order of first occurrence and keep input order inside.
/// Every document must carry the key.
pub fn group_by(inputs: Vec<Document>, key: &str) -> Result<IndexMap<String, Vec<Document>>> {
    let mut groups: IndexMap<String, Vec<Document>> = IndexMap::new();
    for doc in inputs {
        let name = match doc.get_str(key) {
            Some(name) => name.to_string(),
            None => {
                return Err(Error::MissingGroupKey {
                    key: key.to_string(),
                    document: doc.describe(),
                })
            }
        };
        groups.entry(name).or_default().push(doc);
    }
    Ok(groups)
}

/// Emits one parent document per group, with the members as children and
/// the group name under both `GroupKey` and the grouping key.
#[derive(Debug, Clone)]
pub struct GroupDocuments {
    key: String,
    require_marker: bool,
}

impl GroupDocuments {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            require_marker: false,
        }
    }

    /// Group by revision name. Every group must contain exactly one
    /// revision marker.
    pub fn by_revision() -> Self {
        Self {
            key: keys::REVISION_NAME.to_string(),
            require_marker: true,
        }
    }
}

fn check_markers(group: &str, members: &[Document]) -> Result<()> {
    let markers = members.iter().filter(|d| d.is_revision_marker()).count();
    if markers != 1 {
        return Err(Error::GroupMarkers {
            group: group.to_string(),
            markers,
        });
    }
    Ok(())
}

#[async_trait]
impl Stage for GroupDocuments {
    async fn execute(&self, _ctx: &Context, inputs: Vec<Document>) -> Result<Vec<Document>> {
        let groups = group_by(inputs, &self.key)?;
        if self.require_marker {
            for (name, members) in &groups {
                check_markers(name, members)?;
            }
        }
        Ok(groups
            .into_iter()
            .map(|(name, members)| {
                Document::new()
                    .with_meta(keys::GROUP_KEY, name.clone())
                    .with_meta(&self.key, name)
                    .with_children(members)
            })
            .collect())
    }
}
