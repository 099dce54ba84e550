//! Corporation manager accounts, embedded in the `managers` array of
//! corporation links.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::collection::Collection;
use crate::document::*;
use crate::error::{DbError, DbResultExt, ErrorCode, ModelError, ModelResult};
use crate::filters::*;
use crate::pdf::content_hash;
use crate::types::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManagerElem {
    id: String,
    name: String,
    email: String,
    corp_id: String,
    role: ManagerRole,
    password: String,
    initial_pw_changed: bool,
}

const INFO_FIELDS: &[&str] = &["id", "name", "email", "role"];

fn password_hash(password: &str) -> String {
    content_hash(password.as_bytes())
}

fn managers_projection(fields: &[&str]) -> Projection {
    Projection::array_fields(FIELD_MANAGERS, fields)
}

#[derive(Debug, Deserialize)]
struct ManagerHit {
    link_id: String,
    platform: String,
    org_id: String,
    #[serde(default)]
    repo_id: String,
    managers: Vec<ManagerElem>,
}

#[derive(Debug, Clone)]
pub struct CorporationManagerRepository {
    links: Collection,
}

impl CorporationManagerRepository {
    pub fn new(links: Collection) -> Self {
        Self { links }
    }

    /// Add accounts for one corporation. At most `quota` accounts of role
    /// `manager` may exist per corporation; an email or id already in use on
    /// the link fails with `no_link_or_manager_exists`.
    ///
    /// The quota is best-effort: the count and the push are separate store
    /// calls, so concurrent adds for one corporation can together exceed it.
    /// Callers that need a hard limit serialize adds per corporation.
    pub async fn add_corporation_managers(
        &self,
        link_id: &str,
        opts: &[CorporationManagerCreateOption],
        quota: u64,
    ) -> ModelResult<()> {
        let Some(first) = opts.first() else {
            return Ok(());
        };
        for opt in opts {
            check_email_format(&opt.email)?;
        }
        let corp = corp_id(&first.email);
        if opts.iter().any(|o| corp_id(&o.email) != corp) {
            return Err(ModelError::invalid_parameter(
                "managers must belong to one corporation",
            ));
        }
        let emails: BTreeSet<&str> = opts.iter().map(|o| o.email.as_str()).collect();
        let ids: BTreeSet<&str> = opts.iter().map(|o| o.id.as_str()).collect();
        if emails.len() != opts.len() || ids.len() != opts.len() {
            return Err(ModelError::invalid_parameter("duplicate manager accounts"));
        }

        let link = doc_filter_of_link(link_id);
        let adding = opts
            .iter()
            .filter(|o| o.role == ManagerRole::Manager)
            .count() as u64;
        if adding > 0 {
            let existing = self
                .links
                .count_array(
                    FIELD_MANAGERS,
                    &link,
                    &ElemFilter::new()
                        .with(FIELD_CORP_ID, corp.as_str())
                        .with(FIELD_ROLE, ManagerRole::Manager.as_str()),
                )
                .await?;
            if existing + adding > quota {
                warn!(link_id, corp_id = %corp, existing, adding, quota, "manager quota exceeded");
                return Err(ModelError::new(
                    ErrorCode::ManyEmployeeManagers,
                    format!("a corporation can have at most {quota} managers"),
                ));
            }
        }

        let mut filter = link;
        let mut elems = Vec::with_capacity(opts.len());
        for opt in opts {
            filter = filter
                .no_elem_match(FIELD_MANAGERS, elem_filter_of_manager(&opt.email))
                .no_elem_match(FIELD_MANAGERS, ElemFilter::new().with("id", opt.id.as_str()));
            elems.push(to_fields(&ManagerElem {
                id: opt.id.clone(),
                name: opt.name.clone(),
                email: opt.email.clone(),
                corp_id: corp.clone(),
                role: opt.role,
                password: password_hash(&opt.password),
                initial_pw_changed: false,
            })?);
        }

        self.links
            .push_array_elems(FIELD_MANAGERS, &filter, elems)
            .await
            .or_no_record(ErrorCode::NoLinkOrManagerExists)?;
        info!(link_id, corp_id = %corp, added = opts.len(), "managers added");
        Ok(())
    }

    /// Remove `manager` accounts of the admin's corporation and return the
    /// ones that existed.
    pub async fn delete_corporation_managers(
        &self,
        link_id: &str,
        admin_email: &str,
        emails: &[String],
    ) -> ModelResult<Vec<CorporationManagerInfo>> {
        let filter = doc_filter_of_link(link_id);
        let corp = corp_id(admin_email);
        let mut removed = Vec::new();
        for email in emails {
            let elem = elem_filter_of_manager(email)
                .with(FIELD_CORP_ID, corp.as_str())
                .with(FIELD_ROLE, ManagerRole::Manager.as_str());
            let pulled = self
                .links
                .pull_and_return_array_elem(FIELD_MANAGERS, &filter, &elem)
                .await
                .or_no_record(ErrorCode::NoLink)?;
            for value in pulled {
                let m: ManagerElem = serde_json::from_value(value)
                    .map_err(|e| DbError::System(anyhow::anyhow!("decode manager: {e}")))?;
                removed.push(CorporationManagerInfo {
                    id: m.id,
                    name: m.name,
                    email: m.email,
                    role: m.role,
                });
            }
        }
        Ok(removed)
    }

    /// Change a password. A wrong old password, like an unknown account,
    /// fails with `no_link_or_no_manager`.
    pub async fn reset_corporation_manager_password(
        &self,
        link_id: &str,
        email: &str,
        opt: &CorporationManagerResetPassword,
    ) -> ModelResult<()> {
        if opt.old_password == opt.new_password {
            return Err(ModelError::invalid_parameter(
                "the new password is the same as the old one",
            ));
        }
        let elem = elem_filter_of_manager(email).with(FIELD_PASSWORD, password_hash(&opt.old_password));

        let mut fields = Fields::new();
        fields.insert(FIELD_PASSWORD.into(), Value::from(password_hash(&opt.new_password)));
        fields.insert("initial_pw_changed".into(), Value::Bool(true));

        self.links
            .update_array_elem(FIELD_MANAGERS, &doc_filter_of_link(link_id), &elem, fields, true)
            .await
            .or_no_record(ErrorCode::NoLinkOrNoManager)
    }

    /// Authenticate a manager by email or id across every enabled link.
    pub async fn check_corporation_manager(
        &self,
        opt: &CorporationManagerCheckInfo,
    ) -> ModelResult<Vec<CorporationManagerCheckResult>> {
        let key = if opt.user.contains('@') { FIELD_EMAIL } else { "id" };
        let elem = ElemFilter::new()
            .with(key, opt.user.as_str())
            .with(FIELD_PASSWORD, password_hash(&opt.password));
        let filter = DocFilter::new()
            .eq(FIELD_LINK_STATUS, LinkStatus::Enabled.as_str())
            .elem_match(FIELD_MANAGERS, elem.clone());

        let projection = managers_projection(&[
            "id",
            "name",
            "email",
            "corp_id",
            "role",
            "password",
            "initial_pw_changed",
        ])
        .include(FIELD_LINK_ID)
        .include(FIELD_PLATFORM)
        .include(FIELD_ORG_ID)
        .include(FIELD_REPO_ID);

        let docs = self
            .links
            .get_array_elem(FIELD_MANAGERS, &filter, Some(&elem), &projection)
            .await?;

        let mut results = Vec::new();
        for doc in docs {
            let hit: ManagerHit = doc.decode()?;
            let org_repo = OrgRepo::new(hit.platform, hit.org_id, hit.repo_id);
            results.extend(hit.managers.into_iter().map(|m| CorporationManagerCheckResult {
                link_id: hit.link_id.clone(),
                org_repo: org_repo.clone(),
                id: m.id,
                name: m.name,
                email: m.email,
                corp_id: m.corp_id,
                role: m.role,
                initial_pw_changed: m.initial_pw_changed,
            }));
        }
        Ok(results)
    }

    /// Accounts of `email`'s corporation on a link, optionally of one role.
    pub async fn list_corporation_managers(
        &self,
        link_id: &str,
        email: &str,
        role: Option<ManagerRole>,
    ) -> ModelResult<Vec<CorporationManagerInfo>> {
        let mut elem = ElemFilter::new().with(FIELD_CORP_ID, corp_id(email));
        if let Some(role) = role {
            elem.insert(FIELD_ROLE, role.as_str());
        }
        let docs = self
            .links
            .get_array_elem(
                FIELD_MANAGERS,
                &doc_filter_of_link(link_id),
                Some(&elem),
                &managers_projection(INFO_FIELDS),
            )
            .await?;
        let doc = docs
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::new(ErrorCode::NoLink, format!("no link {link_id}")))?;
        Ok(doc.decode_array(FIELD_MANAGERS)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{LinkRepository, LINKS};
    use crate::store_memory::MemoryStore;
    use std::sync::Arc;

    async fn setup() -> (CorporationManagerRepository, String) {
        let links = Collection::new(Arc::new(MemoryStore::new()), LINKS);
        let link_id = LinkRepository::new(links.clone())
            .create_link(&LinkCreateOption {
                org_repo: OrgRepo::new("github", "o", "r"),
                apply_to: ApplyTo::Corporation,
                cla_id: "c".into(),
                cla_language: "english".into(),
                org_email: String::new(),
                submitter: String::new(),
            })
            .await
            .unwrap();
        (CorporationManagerRepository::new(links), link_id)
    }

    fn account(id: &str, email: &str, role: ManagerRole) -> CorporationManagerCreateOption {
        CorporationManagerCreateOption {
            id: id.into(),
            name: id.into(),
            email: email.into(),
            role,
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn quota_counts_only_managers() {
        let (repo, link) = setup().await;
        repo.add_corporation_managers(&link, &[account("admin", "admin@x.com", ManagerRole::Admin)], 2)
            .await
            .unwrap();
        repo.add_corporation_managers(
            &link,
            &[
                account("m1", "m1@x.com", ManagerRole::Manager),
                account("m2", "m2@x.com", ManagerRole::Manager),
            ],
            2,
        )
        .await
        .unwrap();

        let err = repo
            .add_corporation_managers(&link, &[account("m3", "m3@x.com", ManagerRole::Manager)], 2)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ManyEmployeeManagers);

        // Another corporation has its own quota.
        repo.add_corporation_managers(&link, &[account("y1", "m1@y.com", ManagerRole::Manager)], 2)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn existing_email_is_rejected_atomically() {
        let (repo, link) = setup().await;
        repo.add_corporation_managers(&link, &[account("m1", "m1@x.com", ManagerRole::Manager)], 5)
            .await
            .unwrap();
        let err = repo
            .add_corporation_managers(
                &link,
                &[
                    account("m2", "m2@x.com", ManagerRole::Manager),
                    account("m1b", "m1@x.com", ManagerRole::Manager),
                ],
                5,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoLinkOrManagerExists);

        let listed = repo
            .list_corporation_managers(&link, "admin@x.com", None)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delete_returns_removed_accounts() {
        let (repo, link) = setup().await;
        repo.add_corporation_managers(
            &link,
            &[
                account("admin", "admin@x.com", ManagerRole::Admin),
                account("m1", "m1@x.com", ManagerRole::Manager),
            ],
            5,
        )
        .await
        .unwrap();

        let removed = repo
            .delete_corporation_managers(
                &link,
                "admin@x.com",
                &["m1@x.com".to_string(), "admin@x.com".to_string(), "nobody@x.com".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "m1");

        let left = repo
            .list_corporation_managers(&link, "admin@x.com", None)
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].role, ManagerRole::Admin);
    }

    #[tokio::test]
    async fn password_reset_and_login() {
        let (repo, link) = setup().await;
        repo.add_corporation_managers(&link, &[account("m1", "m1@x.com", ManagerRole::Manager)], 5)
            .await
            .unwrap();

        let wrong = CorporationManagerResetPassword {
            old_password: "nope".into(),
            new_password: "new".into(),
        };
        let err = repo
            .reset_corporation_manager_password(&link, "m1@x.com", &wrong)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoLinkOrNoManager);

        let right = CorporationManagerResetPassword {
            old_password: "pw".into(),
            new_password: "new".into(),
        };
        repo.reset_corporation_manager_password(&link, "m1@x.com", &right)
            .await
            .unwrap();

        let by_id = repo
            .check_corporation_manager(&CorporationManagerCheckInfo {
                user: "m1".into(),
                password: "new".into(),
            })
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].link_id, link);
        assert_eq!(by_id[0].org_repo, OrgRepo::new("github", "o", "r"));
        assert!(by_id[0].initial_pw_changed);

        let stale = repo
            .check_corporation_manager(&CorporationManagerCheckInfo {
                user: "m1@x.com".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        assert!(stale.is_empty());
    }
}
