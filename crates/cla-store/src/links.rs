//! Link repository: one document per org/repo CLA binding, carrying the
//! embedded `signings` and `managers` arrays.

use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbResultExt, ErrorCode, ModelResult};
use crate::filters::*;
use crate::types::*;

pub const LINKS: &str = "links";

const LINK_FIELDS: &[&str] = &[
    FIELD_LINK_ID,
    FIELD_PLATFORM,
    FIELD_ORG_ID,
    FIELD_REPO_ID,
    FIELD_ORG_IDENTITY,
    FIELD_APPLY_TO,
    FIELD_CLA_ID,
    FIELD_CLA_LANGUAGE,
    "org_email",
    "submitter",
    FIELD_LINK_STATUS,
];

#[derive(Debug, Clone)]
pub struct LinkRepository {
    links: Collection,
}

impl LinkRepository {
    pub fn new(links: Collection) -> Self {
        Self { links }
    }

    /// Bind a CLA to an org/repo scope. At most one enabled link exists per
    /// (scope, apply-to); a second binding fails with `duplicate_binding`.
    pub async fn create_link(&self, opt: &LinkCreateOption) -> ModelResult<String> {
        let info = LinkInfo {
            link_id: Uuid::new_v4().simple().to_string(),
            org_identity: opt.org_repo.identity(),
            org_repo: opt.org_repo.clone(),
            apply_to: opt.apply_to,
            cla_id: opt.cla_id.clone(),
            cla_language: opt.cla_language.clone(),
            org_email: opt.org_email.clone(),
            submitter: opt.submitter.clone(),
            link_status: LinkStatus::Enabled,
        };
        let mut fields = to_fields(&info)?;
        fields.insert(FIELD_SIGNINGS.into(), json!([]));
        fields.insert(FIELD_MANAGERS.into(), json!([]));

        let filter = doc_filter_of_enabled_link(&opt.org_repo, opt.apply_to);
        self.links.new_doc_if_not_exist(&filter, fields).await?;

        info!(
            link_id = %info.link_id,
            org = %opt.org_repo,
            apply_to = opt.apply_to.as_str(),
            "link created"
        );
        Ok(info.link_id)
    }

    /// Any link by id, enabled or not.
    pub async fn get_link(&self, link_id: &str) -> ModelResult<LinkInfo> {
        let doc = self
            .links
            .get_doc(
                &DocFilter::new().eq(FIELD_LINK_ID, link_id),
                &Projection::of(LINK_FIELDS),
            )
            .await
            .or_no_record(ErrorCode::NoLink)?;
        Ok(doc.decode()?)
    }

    pub async fn get_org_of_link(&self, link_id: &str) -> ModelResult<OrgRepo> {
        let doc = self
            .links
            .get_doc(
                &doc_filter_of_link(link_id),
                &Projection::of(&[FIELD_PLATFORM, FIELD_ORG_ID, FIELD_REPO_ID]),
            )
            .await
            .or_no_record(ErrorCode::NoLink)?;
        Ok(doc.decode()?)
    }

    /// Enabled links narrowed by the given options.
    pub async fn list_links(&self, opt: &LinkListOption) -> ModelResult<Vec<LinkInfo>> {
        let mut filter = DocFilter::new().eq(FIELD_LINK_STATUS, LinkStatus::Enabled.as_str());
        if let Some(platform) = &opt.platform {
            filter = filter.eq(FIELD_PLATFORM, platform.as_str());
        }
        if !opt.org_ids.is_empty() {
            filter = filter.is_in(FIELD_ORG_ID, opt.org_ids.clone());
        }
        if let Some(repo_id) = &opt.repo_id {
            filter = filter.eq(FIELD_REPO_ID, repo_id.as_str());
        }
        if let Some(apply_to) = opt.apply_to {
            filter = filter.eq(FIELD_APPLY_TO, apply_to.as_str());
        }

        let docs = self
            .links
            .get_docs(&filter, &Projection::of(LINK_FIELDS))
            .await?;
        Ok(docs
            .into_iter()
            .map(Document::decode)
            .collect::<Result<Vec<LinkInfo>, _>>()?)
    }

    /// Point an enabled link at another CLA template.
    pub async fn update_cla(
        &self,
        link_id: &str,
        cla_id: &str,
        cla_language: &str,
    ) -> ModelResult<()> {
        let mut fields = Fields::new();
        fields.insert(FIELD_CLA_ID.into(), Value::from(cla_id));
        fields.insert(FIELD_CLA_LANGUAGE.into(), Value::from(cla_language));
        self.links
            .update_doc(&doc_filter_of_link(link_id), fields)
            .await
            .or_no_record(ErrorCode::NoLink)
    }

    /// Remove a binding. A link nobody signed and nobody manages is deleted;
    /// otherwise it is disabled so its records stay readable.
    pub async fn unbind_link(&self, link_id: &str) -> ModelResult<Unbound> {
        let unused = doc_filter_of_link(link_id)
            .no_elem_match(FIELD_SIGNINGS, ElemFilter::new())
            .no_elem_match(FIELD_MANAGERS, ElemFilter::new());
        if self.links.delete_docs(&unused).await? > 0 {
            info!(link_id, "link deleted");
            return Ok(Unbound::Deleted);
        }

        let mut fields = Fields::new();
        fields.insert(
            FIELD_LINK_STATUS.into(),
            Value::from(LinkStatus::Disabled.as_str()),
        );
        self.links
            .update_doc(&doc_filter_of_link(link_id), fields)
            .await
            .or_no_record(ErrorCode::NoLink)?;
        info!(link_id, "link disabled");
        Ok(Unbound::Disabled)
    }
}
