//! Individual signing behaviour against the in-memory backend.
//!
//! Covers sign/unsign round trips, disabled and missing links, enable
//! toggles, concurrent signers, corporation filtering and the org-wide
//! fallback of repository-scoped checks.

use std::sync::Arc;

use cla_store::document::Projection;
use cla_store::links::LINKS;
use cla_store::types::*;
use cla_store::{
    ClaStorage, Collection, DbErrorKind, DocFilter, ErrorCode, LocalLockProvider, MemoryStore,
    SigningConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

struct Harness {
    store: Arc<MemoryStore>,
    storage: ClaStorage,
}

fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let config = SigningConfig::from_env();
    let storage = ClaStorage::new(
        store.clone(),
        Arc::new(LocalLockProvider::from_config(&config)),
        config,
    );
    Harness { store, storage }
}

impl Harness {
    async fn individual_link(&self, repo_id: &str) -> (String, OrgRepo) {
        let org_repo = OrgRepo::new("p", "o", repo_id);
        let link_id = self
            .storage
            .links()
            .create_link(&LinkCreateOption {
                org_repo: org_repo.clone(),
                apply_to: ApplyTo::Individual,
                cla_id: "cla".into(),
                cla_language: "english".into(),
                org_email: "cla@o.org".into(),
                submitter: "owner".into(),
            })
            .await
            .unwrap();
        (link_id, org_repo)
    }

    /// Number of signing records stored on a link, read around the
    /// repositories.
    async fn raw_signing_count(&self, link_id: &str) -> usize {
        Collection::new(self.store.clone(), LINKS)
            .get_doc(&DocFilter::new().eq("link_id", link_id), &Projection::all())
            .await
            .unwrap()
            .array("signings")
            .len()
    }
}

fn signer(email: &str) -> IndividualSigningInfo {
    IndividualSigningInfo {
        email: email.into(),
        name: email.split('@').next().unwrap_or_default().into(),
        date: String::new(),
        enabled: true,
        cla_language: "english".into(),
        signing_info: SigningInfo::new(),
    }
}

#[tokio::test]
async fn sign_then_unsign_round_trips() {
    let h = harness();
    let (_, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();

    signings.sign(&scope, &signer("a@x.com")).await.unwrap();
    assert!(signings.is_signed(&scope, "a@x.com").await.unwrap());

    signings.unsign(&scope, "a@x.com").await.unwrap();
    assert!(!signings.is_signed(&scope, "a@x.com").await.unwrap());
}

#[tokio::test]
async fn sign_against_missing_link_is_no_record() {
    let h = harness();
    let err = h
        .storage
        .individual_signings()
        .sign(&OrgRepo::new("p", "nobody", ""), &signer("a@x.com"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoLinkOrResigned);
    assert_eq!(err.db_kind(), Some(DbErrorKind::NoDbRecord));
}

#[tokio::test]
async fn sign_against_disabled_link_leaves_storage_untouched() {
    let h = harness();
    let (link_id, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();
    signings.sign(&scope, &signer("a@x.com")).await.unwrap();

    // Signed links are disabled rather than deleted.
    assert_eq!(
        h.storage.links().unbind_link(&link_id).await.unwrap(),
        Unbound::Disabled
    );

    let err = signings.sign(&scope, &signer("b@x.com")).await.unwrap_err();
    assert_eq!(err.db_kind(), Some(DbErrorKind::NoDbRecord));
    assert_eq!(h.raw_signing_count(&link_id).await, 1);
    assert!(!signings.is_signed(&scope, "a@x.com").await.unwrap());
}

#[tokio::test]
async fn duplicate_sign_keeps_one_record() {
    let h = harness();
    let (link_id, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();

    signings.sign(&scope, &signer("a@x.com")).await.unwrap();
    let err = signings.sign(&scope, &signer("a@x.com")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoLinkOrResigned);

    assert_eq!(h.raw_signing_count(&link_id).await, 1);
    assert!(signings.is_signed(&scope, "a@x.com").await.unwrap());
}

#[tokio::test]
async fn enable_toggle_is_idempotent() {
    let h = harness();
    let (_, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();
    signings.sign(&scope, &signer("a@x.com")).await.unwrap();
    let before = signings
        .list(&scope, &IndividualSigningListOption::default())
        .await
        .unwrap();

    signings.set_enabled(&scope, "a@x.com", false).await.unwrap();
    signings.set_enabled(&scope, "a@x.com", false).await.unwrap();
    assert!(!signings.is_signed(&scope, "a@x.com").await.unwrap());

    signings.set_enabled(&scope, "a@x.com", true).await.unwrap();
    assert!(signings.is_signed(&scope, "a@x.com").await.unwrap());

    let after = signings
        .list(&scope, &IndividualSigningListOption::default())
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn enable_toggle_of_unknown_signer_is_reported() {
    let h = harness();
    let (_, scope) = h.individual_link("").await;
    let err = h
        .storage
        .individual_signings()
        .set_enabled(&scope, "ghost@x.com", true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoLinkOrUnsigned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_signers_are_all_kept() {
    let h = harness();
    let (link_id, scope) = h.individual_link("").await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let storage = h.storage.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                storage
                    .individual_signings()
                    .sign(&scope, &signer(&format!("dev{i}@x.com")))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let listed = h
        .storage
        .individual_signings()
        .list(&scope, &IndividualSigningListOption::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 16);
    assert_eq!(h.raw_signing_count(&link_id).await, 16);
    for i in 0..16 {
        let email = format!("dev{i}@x.com");
        assert!(listed.iter().any(|s| s.email == email), "{email} missing");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_signs_commit_once() {
    let h = harness();
    let (link_id, scope) = h.individual_link("").await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let storage = h.storage.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                storage
                    .individual_signings()
                    .sign(&scope, &signer("same@x.com"))
                    .await
            })
        })
        .collect();
    let mut committed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => committed += 1,
            Err(e) => assert_eq!(e.code(), ErrorCode::NoLinkOrResigned),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(h.raw_signing_count(&link_id).await, 1);
}

#[tokio::test]
async fn list_filters_by_corporation() {
    let h = harness();
    let (_, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();
    for email in ["a@x.com", "b@x.com", "c@y.com", "d@X.com"] {
        signings.sign(&scope, &signer(email)).await.unwrap();
    }

    let mut emails: Vec<String> = signings
        .list(
            &scope,
            &IndividualSigningListOption {
                corporation_email: Some("boss@x.com".into()),
                cla_language: None,
            },
        )
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.email)
        .collect();
    emails.sort();
    assert_eq!(emails, ["a@x.com", "b@x.com", "d@X.com"]);
}

#[tokio::test]
async fn list_filters_by_language() {
    let h = harness();
    let (_, scope) = h.individual_link("").await;
    let signings = h.storage.individual_signings();
    signings.sign(&scope, &signer("a@x.com")).await.unwrap();
    let mut zh = signer("b@x.com");
    zh.cla_language = "chinese".into();
    signings.sign(&scope, &zh).await.unwrap();

    let listed = signings
        .list(
            &scope,
            &IndividualSigningListOption {
                corporation_email: None,
                cla_language: Some("chinese".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].email, "b@x.com");
}

#[tokio::test]
async fn repository_check_falls_back_to_org_link() {
    let h = harness();
    let (_, org) = h.individual_link("").await;
    h.storage
        .individual_signings()
        .sign(&org, &signer("a@x.com"))
        .await
        .unwrap();

    let repo = OrgRepo::new("p", "o", "r");
    assert!(h
        .storage
        .individual_signings()
        .is_signed(&repo, "a@x.com")
        .await
        .unwrap());
}

#[tokio::test]
async fn repository_link_takes_precedence_over_org_link() {
    let h = harness();
    let (_, org) = h.individual_link("").await;
    let (_, repo) = h.individual_link("r").await;
    let signings = h.storage.individual_signings();

    signings.sign(&org, &signer("a@x.com")).await.unwrap();
    assert!(!signings.is_signed(&repo, "a@x.com").await.unwrap());

    signings.sign(&repo, &signer("b@x.com")).await.unwrap();
    assert!(signings.is_signed(&repo, "b@x.com").await.unwrap());
    assert!(!signings.is_signed(&org, "b@x.com").await.unwrap());
}

#[tokio::test]
async fn unused_link_is_deleted_on_unbind() {
    let h = harness();
    let (link_id, _) = h.individual_link("").await;
    assert_eq!(
        h.storage.links().unbind_link(&link_id).await.unwrap(),
        Unbound::Deleted
    );
    assert_eq!(h.store.len(LINKS).await, 0);

    // The scope can be bound again.
    let (again, _) = h.individual_link("").await;
    assert_ne!(again, link_id);
}

#[tokio::test]
async fn second_binding_of_a_scope_is_rejected() {
    let h = harness();
    h.individual_link("").await;
    let err = h
        .storage
        .links()
        .create_link(&LinkCreateOption {
            org_repo: OrgRepo::new("p", "o", ""),
            apply_to: ApplyTo::Individual,
            cla_id: "other".into(),
            cla_language: "english".into(),
            org_email: String::new(),
            submitter: String::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateBinding);
    assert_eq!(err.db_kind(), Some(DbErrorKind::RecordExists));
}

#[tokio::test]
async fn unsign_without_link_is_reported() {
    let h = harness();
    let err = h
        .storage
        .individual_signings()
        .unsign(&OrgRepo::new("p", "other", ""), "a@x.com")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoLink);
}
