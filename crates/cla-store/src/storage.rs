//! Storage facade.
//!
//! `ClaStorage` is built once at startup from an injected backend, lock
//! provider and policy, and hands out the repositories that share them.

use std::sync::Arc;

use tracing::info;

use crate::cla::{ClaRepository, CLAS};
use crate::collection::Collection;
use crate::config::SigningConfig;
use crate::corp_flow::CorporationSigningFlow;
use crate::corporation::CorporationSigningRepository;
use crate::error::{ErrorCode, ModelError, ModelResult};
use crate::individual::IndividualSigningRepository;
use crate::links::{LinkRepository, LINKS};
use crate::lock::{LockKey, LockProvider};
use crate::managers::CorporationManagerRepository;
use crate::org_email::{OrgEmailRepository, ORG_EMAILS};
use crate::pdf::{PdfRepository, SIGNATURE_PDFS};
use crate::store::DocumentStore;
use crate::types::*;
use crate::verification::{
    purpose_of_adding_email_domain, VerificationCodeRepository, VERIFICATION_CODES,
};

/// What a signer needs to render the signing page of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningPageInfo {
    pub link: LinkInfo,
    pub cla: ClaTemplate,
}

#[derive(Clone)]
pub struct ClaStorage {
    links: LinkRepository,
    individuals: IndividualSigningRepository,
    corporations: CorporationSigningRepository,
    managers: CorporationManagerRepository,
    clas: ClaRepository,
    org_emails: OrgEmailRepository,
    codes: VerificationCodeRepository,
    pdfs: PdfRepository,
    locks: Arc<dyn LockProvider>,
    config: SigningConfig,
}

impl ClaStorage {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<dyn LockProvider>,
        config: SigningConfig,
    ) -> Self {
        let links = Collection::new(store.clone(), LINKS);
        let pdfs = PdfRepository::new(Collection::new(store.clone(), SIGNATURE_PDFS));

        info!(
            max_employee_managers = config.max_employee_managers,
            verification_code_expiry = ?config.verification_code_expiry,
            lock_timeout = ?config.lock_timeout,
            "cla storage ready"
        );

        Self {
            links: LinkRepository::new(links.clone()),
            individuals: IndividualSigningRepository::new(links.clone()),
            corporations: CorporationSigningRepository::new(links.clone(), pdfs.clone()),
            managers: CorporationManagerRepository::new(links),
            clas: ClaRepository::new(Collection::new(store.clone(), CLAS)),
            org_emails: OrgEmailRepository::new(Collection::new(store.clone(), ORG_EMAILS)),
            codes: VerificationCodeRepository::new(
                Collection::new(store, VERIFICATION_CODES),
                config.verification_code_expiry,
            ),
            pdfs,
            locks,
            config,
        }
    }

    // ── Repositories ──

    pub fn links(&self) -> &LinkRepository {
        &self.links
    }

    pub fn individual_signings(&self) -> &IndividualSigningRepository {
        &self.individuals
    }

    pub fn corporation_signings(&self) -> &CorporationSigningRepository {
        &self.corporations
    }

    pub fn managers(&self) -> &CorporationManagerRepository {
        &self.managers
    }

    pub fn clas(&self) -> &ClaRepository {
        &self.clas
    }

    pub fn org_emails(&self) -> &OrgEmailRepository {
        &self.org_emails
    }

    pub fn verification_codes(&self) -> &VerificationCodeRepository {
        &self.codes
    }

    pub fn pdfs(&self) -> &PdfRepository {
        &self.pdfs
    }

    pub fn config(&self) -> &SigningConfig {
        &self.config
    }

    pub fn corporation_signing_flow(&self) -> CorporationSigningFlow {
        CorporationSigningFlow {
            links: self.links.clone(),
            clas: self.clas.clone(),
            corporations: self.corporations.clone(),
            pdfs: self.pdfs.clone(),
            codes: self.codes.clone(),
            locks: self.locks.clone(),
        }
    }

    // ── Policy-bound operations ──

    /// Add manager accounts under the configured per-corporation quota.
    /// The quota is best-effort under concurrent adds; see
    /// [`CorporationManagerRepository::add_corporation_managers`].
    pub async fn add_corporation_managers(
        &self,
        link_id: &str,
        opts: &[CorporationManagerCreateOption],
    ) -> ModelResult<()> {
        self.managers
            .add_corporation_managers(link_id, opts, self.config.max_employee_managers)
            .await
    }

    /// Point a link at another CLA template. Runs under the same lock as a
    /// first corporate signature so the two cannot interleave.
    pub async fn rebind_cla(&self, link_id: &str, cla_id: &str) -> ModelResult<()> {
        let link = self.links.get_link(link_id).await?;
        let cla = self.clas.get(cla_id, false).await?;
        if cla.apply_to != link.apply_to {
            return Err(ModelError::invalid_parameter(format!(
                "cla {cla_id} applies to {}, the link to {}",
                cla.apply_to.as_str(),
                link.apply_to.as_str()
            )));
        }

        let _guard = self.locks.acquire(&LockKey::for_org_repo(&link.org_repo)).await?;
        self.links.update_cla(link_id, cla_id, &cla.language).await?;
        info!(link_id, cla_id, language = %cla.language, "cla rebound");
        Ok(())
    }

    /// Add an email domain to a corporation once the admin proved control
    /// of an address in it.
    pub async fn add_verified_corp_email_domain(
        &self,
        link_id: &str,
        admin_email: &str,
        sub_email: &str,
        verification_code: &str,
    ) -> ModelResult<()> {
        self.codes
            .check_verification_code(
                sub_email,
                verification_code,
                &purpose_of_adding_email_domain(sub_email),
            )
            .await?;
        self.corporations
            .add_corp_email_domain(link_id, admin_email, sub_email)
            .await
    }

    /// The link and its CLA template. A corporation link is only signable
    /// once its org signature is on file.
    pub async fn signing_page_info(&self, link_id: &str) -> ModelResult<SigningPageInfo> {
        let link = self.links.get_link(link_id).await?;
        if link.link_status != LinkStatus::Enabled {
            return Err(ModelError::new(
                ErrorCode::NoLink,
                format!("link {link_id} is disabled"),
            ));
        }
        if link.apply_to == ApplyTo::Corporation
            && self.pdfs.org_signature_hash(link_id).await?.is_none()
        {
            return Err(ModelError::new(
                ErrorCode::NotReadyToSign,
                "the org signature is not uploaded",
            ));
        }
        let cla = self.clas.get(&link.cla_id, true).await?;
        Ok(SigningPageInfo { link, cla })
    }
}

impl std::fmt::Debug for ClaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaStorage")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LocalLockProvider;
    use crate::store_memory::MemoryStore;

    fn storage() -> ClaStorage {
        let config = SigningConfig::default();
        ClaStorage::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalLockProvider::from_config(&config)),
            config,
        )
    }

    fn template(language: &str, apply_to: ApplyTo) -> ClaTemplate {
        ClaTemplate {
            id: String::new(),
            name: format!("{language} cla"),
            language: language.into(),
            apply_to,
            text: format!("{language} text"),
            fields: vec![],
        }
    }

    async fn corp_link(s: &ClaStorage, cla_id: &str) -> String {
        s.links()
            .create_link(&LinkCreateOption {
                org_repo: OrgRepo::new("github", "o", ""),
                apply_to: ApplyTo::Corporation,
                cla_id: cla_id.into(),
                cla_language: "english".into(),
                org_email: "cla@o.org".into(),
                submitter: "admin".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rebind_switches_template_and_language() {
        let s = storage();
        let en = s.clas().create(&template("english", ApplyTo::Corporation)).await.unwrap();
        let zh = s.clas().create(&template("chinese", ApplyTo::Corporation)).await.unwrap();
        let link_id = corp_link(&s, &en).await;

        s.rebind_cla(&link_id, &zh).await.unwrap();
        let link = s.links().get_link(&link_id).await.unwrap();
        assert_eq!(link.cla_id, zh);
        assert_eq!(link.cla_language, "chinese");
    }

    #[tokio::test]
    async fn rebind_rejects_template_of_other_kind() {
        let s = storage();
        let en = s.clas().create(&template("english", ApplyTo::Corporation)).await.unwrap();
        let ind = s.clas().create(&template("english", ApplyTo::Individual)).await.unwrap();
        let link_id = corp_link(&s, &en).await;

        let err = s.rebind_cla(&link_id, &ind).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }

    #[tokio::test]
    async fn corporation_page_needs_org_signature() {
        let s = storage();
        let en = s.clas().create(&template("english", ApplyTo::Corporation)).await.unwrap();
        let link_id = corp_link(&s, &en).await;

        let err = s.signing_page_info(&link_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotReadyToSign);

        s.pdfs().upload_org_signature(&link_id, b"%PDF-1.4").await.unwrap();
        let page = s.signing_page_info(&link_id).await.unwrap();
        assert_eq!(page.cla.text, "english text");
    }

    #[tokio::test]
    async fn manager_quota_comes_from_config() {
        let s = ClaStorage::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalLockProvider::new()),
            SigningConfig {
                max_employee_managers: 1,
                ..SigningConfig::default()
            },
        );
        let en = s.clas().create(&template("english", ApplyTo::Corporation)).await.unwrap();
        let link_id = corp_link(&s, &en).await;

        let manager = |n: u32| CorporationManagerCreateOption {
            id: format!("m{n}"),
            name: format!("M{n}"),
            email: format!("m{n}@x.com"),
            role: ManagerRole::Manager,
            password: "pw".into(),
        };
        s.add_corporation_managers(&link_id, &[manager(1)]).await.unwrap();
        let err = s
            .add_corporation_managers(&link_id, &[manager(2)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ManyEmployeeManagers);
    }
}
