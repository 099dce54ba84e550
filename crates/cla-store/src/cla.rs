//! CLA templates: standalone documents in `clas`.

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbResultExt, ErrorCode, ModelError, ModelResult};
use crate::pdf::content_hash;
use crate::types::*;

pub const CLAS: &str = "clas";

const SUMMARY_FIELDS: &[&str] = &["name", "language", "apply_to", "fields"];

fn decode_template(doc: Document) -> ModelResult<ClaTemplate> {
    let id = doc.id.to_string();
    let mut cla: ClaTemplate = doc.decode()?;
    cla.id = id;
    Ok(cla)
}

fn parse_id(id: &str) -> ModelResult<DocId> {
    id.parse()
        .map_err(|_| ModelError::invalid_parameter(format!("invalid cla id: {id}")))
}

#[derive(Debug, Clone)]
pub struct ClaRepository {
    clas: Collection,
}

impl ClaRepository {
    pub fn new(clas: Collection) -> Self {
        Self { clas }
    }

    pub async fn create(&self, cla: &ClaTemplate) -> ModelResult<String> {
        let id = self.clas.insert_doc(to_fields(cla)?).await?;
        Ok(id.to_string())
    }

    /// Templates without their text.
    pub async fn list(&self, opt: &ClaListOption) -> ModelResult<Vec<ClaTemplate>> {
        let mut filter = DocFilter::new();
        if let Some(language) = &opt.language {
            filter = filter.eq("language", language.as_str());
        }
        if let Some(apply_to) = opt.apply_to {
            filter = filter.eq("apply_to", apply_to.as_str());
        }
        self.clas
            .get_docs(&filter, &Projection::of(SUMMARY_FIELDS))
            .await?
            .into_iter()
            .map(decode_template)
            .collect()
    }

    pub async fn get(&self, id: &str, with_text: bool) -> ModelResult<ClaTemplate> {
        let projection = if with_text {
            Projection::all()
        } else {
            Projection::of(SUMMARY_FIELDS)
        };
        let doc = self
            .clas
            .get_doc(&DocFilter::id(parse_id(id)?), &projection)
            .await
            .or_no_record(ErrorCode::NoDbRecord)?;
        decode_template(doc)
    }

    pub async fn delete(&self, id: &str) -> ModelResult<()> {
        self.clas.delete_docs(&DocFilter::id(parse_id(id)?)).await?;
        Ok(())
    }

    /// Templates with their text, for the given ids. Unknown ids are skipped.
    pub async fn list_by_ids(&self, ids: &[String]) -> ModelResult<Vec<ClaTemplate>> {
        let ids = ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<ModelResult<Vec<_>>>()?;
        self.clas
            .get_docs(&DocFilter::ids(ids), &Projection::all())
            .await?
            .into_iter()
            .map(decode_template)
            .collect()
    }

    /// sha256 hex of a template's text.
    pub async fn text_hash(&self, id: &str) -> ModelResult<String> {
        let cla = self.get(id, true).await?;
        Ok(content_hash(cla.text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use std::sync::Arc;

    fn template(language: &str, apply_to: ApplyTo) -> ClaTemplate {
        ClaTemplate {
            id: String::new(),
            name: format!("{language} cla"),
            language: language.into(),
            apply_to,
            text: "I agree".into(),
            fields: vec![ClaField {
                id: "title".into(),
                title: "Title".into(),
                kind: "string".into(),
                description: String::new(),
                required: true,
            }],
        }
    }

    #[tokio::test]
    async fn create_get_list_delete() {
        let clas = ClaRepository::new(Collection::new(Arc::new(MemoryStore::new()), CLAS));
        let en = clas.create(&template("english", ApplyTo::Corporation)).await.unwrap();
        let zh = clas.create(&template("chinese", ApplyTo::Individual)).await.unwrap();

        let full = clas.get(&en, true).await.unwrap();
        assert_eq!(full.id, en);
        assert_eq!(full.text, "I agree");
        assert!(clas.get(&en, false).await.unwrap().text.is_empty());

        let corp = clas
            .list(&ClaListOption {
                apply_to: Some(ApplyTo::Corporation),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(corp.len(), 1);
        assert_eq!(corp[0].fields.len(), 1);

        let both = clas.list_by_ids(&[en.clone(), zh.clone()]).await.unwrap();
        assert_eq!(both.len(), 2);

        assert_eq!(
            clas.text_hash(&en).await.unwrap(),
            content_hash(b"I agree")
        );

        clas.delete(&zh).await.unwrap();
        assert_eq!(
            clas.get(&zh, false).await.unwrap_err().code(),
            ErrorCode::NoDbRecord
        );
    }

    #[tokio::test]
    async fn malformed_id_is_invalid_parameter() {
        let clas = ClaRepository::new(Collection::new(Arc::new(MemoryStore::new()), CLAS));
        assert_eq!(
            clas.get("not-a-uuid", true).await.unwrap_err().code(),
            ErrorCode::InvalidParameter
        );
    }
}
