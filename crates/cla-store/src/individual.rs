//! Individual signing records, embedded in the `signings` array of
//! individual links.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbResultExt, ErrorCode, ModelResult};
use crate::filters::*;
use crate::types::*;

/// Stored shape of one element of `signings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndividualSigningElem {
    corp_id: String,
    email: String,
    name: String,
    date: String,
    enabled: bool,
    cla_language: String,
    signing_info: SigningInfo,
}

#[derive(Debug, Deserialize)]
struct ScopedSignings {
    org_identity: String,
    #[serde(default)]
    signings: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct IndividualSigningRepository {
    links: Collection,
}

impl IndividualSigningRepository {
    pub fn new(links: Collection) -> Self {
        Self { links }
    }

    fn doc_filter(org_repo: &OrgRepo) -> DocFilter {
        doc_filter_of_enabled_link(org_repo, ApplyTo::Individual)
    }

    /// Record a signature. Fails with `no_link_or_resigned` when the link is
    /// missing or disabled, or when this email already signed it.
    pub async fn sign(&self, org_repo: &OrgRepo, info: &IndividualSigningInfo) -> ModelResult<()> {
        let elem = IndividualSigningElem {
            corp_id: corp_id(&info.email),
            email: info.email.clone(),
            name: info.name.clone(),
            date: if info.date.is_empty() {
                today()
            } else {
                info.date.clone()
            },
            enabled: info.enabled,
            cla_language: info.cla_language.clone(),
            signing_info: info.signing_info.clone(),
        };

        // The uniqueness guard and the push are one atomic update.
        let filter = Self::doc_filter(org_repo)
            .no_elem_match(FIELD_SIGNINGS, elem_filter_of_individual_signing(&info.email));

        self.links
            .push_array_elem(FIELD_SIGNINGS, &filter, to_fields(&elem)?)
            .await
            .or_no_record(ErrorCode::NoLinkOrResigned)
    }

    /// Remove a signature. Removing one that is not there is not an error.
    pub async fn unsign(&self, org_repo: &OrgRepo, email: &str) -> ModelResult<()> {
        self.links
            .pull_array_elem(
                FIELD_SIGNINGS,
                &Self::doc_filter(org_repo),
                &elem_filter_of_individual_signing(email),
            )
            .await
            .or_no_record(ErrorCode::NoLink)
    }

    /// Toggle the enabled flag. Setting the value it already has succeeds;
    /// an email with no signature fails with `no_link_or_unsigned`.
    pub async fn set_enabled(
        &self,
        org_repo: &OrgRepo,
        email: &str,
        enabled: bool,
    ) -> ModelResult<()> {
        let elem = elem_filter_of_individual_signing(email);
        let filter = Self::doc_filter(org_repo).elem_match(FIELD_SIGNINGS, elem.clone());

        let mut fields = Fields::new();
        fields.insert(FIELD_ENABLED.into(), Value::Bool(enabled));

        self.links
            .update_array_elem(FIELD_SIGNINGS, &filter, &elem, fields, false)
            .await
            .or_no_record(ErrorCode::NoLinkOrUnsigned)
    }

    /// Whether `email` holds an enabled signature for this scope. A repo
    /// scope falls back to the org-wide link; when both exist the
    /// repo-specific link decides.
    pub async fn is_signed(&self, org_repo: &OrgRepo, email: &str) -> ModelResult<bool> {
        let elem = enabled_only(elem_filter_of_individual_signing(email));
        let docs = self
            .links
            .get_array_elem(
                FIELD_SIGNINGS,
                &doc_filter_of_repo_or_org(org_repo, ApplyTo::Individual),
                Some(&elem),
                &Projection::of(&[FIELD_ORG_IDENTITY, &member_of(FIELD_SIGNINGS, FIELD_ENABLED)]),
            )
            .await?;

        let scoped = docs
            .into_iter()
            .map(Document::decode::<ScopedSignings>)
            .collect::<Result<Vec<_>, _>>()?;

        let signed = match scoped.as_slice() {
            [] => false,
            [only] => !only.signings.is_empty(),
            several => {
                let identity = org_repo.identity();
                several
                    .iter()
                    .find(|s| s.org_identity == identity)
                    .is_some_and(|s| !s.signings.is_empty())
            }
        };
        debug!(org = %org_repo, email, signed, "individual signing check");
        Ok(signed)
    }

    /// Signatures on the link bound to exactly this scope.
    pub async fn list(
        &self,
        org_repo: &OrgRepo,
        opt: &IndividualSigningListOption,
    ) -> ModelResult<Vec<IndividualSigningBasicInfo>> {
        let mut elem = ElemFilter::new();
        if let Some(email) = &opt.corporation_email {
            elem.insert(FIELD_CORP_ID, corp_id(email));
        }
        if let Some(language) = &opt.cla_language {
            elem.insert(FIELD_CLA_LANGUAGE, language.as_str());
        }

        let projection = Projection::of(&[
            &member_of(FIELD_SIGNINGS, FIELD_EMAIL),
            &member_of(FIELD_SIGNINGS, "name"),
            &member_of(FIELD_SIGNINGS, FIELD_ENABLED),
            &member_of(FIELD_SIGNINGS, "date"),
        ]);
        let docs = self
            .links
            .get_array_elem(FIELD_SIGNINGS, &Self::doc_filter(org_repo), Some(&elem), &projection)
            .await?;

        match docs.first() {
            Some(doc) => Ok(doc.decode_array(FIELD_SIGNINGS)?),
            None => Ok(vec![]),
        }
    }
}
