//! Filter builder: pure mappings from domain identifiers to document and
//! element predicates.

use crate::document::{DocFilter, ElemFilter};
use crate::types::{ApplyTo, LinkStatus, OrgRepo};

pub const FIELD_LINK_ID: &str = "link_id";
pub const FIELD_PLATFORM: &str = "platform";
pub const FIELD_ORG_ID: &str = "org_id";
pub const FIELD_REPO_ID: &str = "repo_id";
pub const FIELD_ORG_IDENTITY: &str = "org_identity";
pub const FIELD_APPLY_TO: &str = "apply_to";
pub const FIELD_LINK_STATUS: &str = "link_status";
pub const FIELD_CLA_ID: &str = "cla_id";
pub const FIELD_CLA_LANGUAGE: &str = "cla_language";
pub const FIELD_SIGNINGS: &str = "signings";
pub const FIELD_MANAGERS: &str = "managers";

pub const FIELD_CORP_ID: &str = "corp_id";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_ADMIN_EMAIL: &str = "admin_email";
pub const FIELD_ENABLED: &str = "enabled";
pub const FIELD_ROLE: &str = "role";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_DOMAINS: &str = "domains";
pub const FIELD_PDF_UPLOADED: &str = "pdf_uploaded";

/// `array.field` path for projections.
pub fn member_of(array: &str, field: &str) -> String {
    format!("{array}.{field}")
}

/// Domain part of an email address; the whole input when it has no `@`.
pub fn email_suffix(email: &str) -> &str {
    email.rsplit_once('@').map_or(email, |(_, domain)| domain)
}

/// Corporation id: the lowercased email domain.
pub fn corp_id(email: &str) -> String {
    email_suffix(email).to_ascii_lowercase()
}

/// `platform/org` for org-wide links, `platform/org/repo` otherwise.
pub fn org_identity(platform: &str, org_id: &str, repo_id: &str) -> String {
    if repo_id.is_empty() {
        format!("{platform}/{org_id}")
    } else {
        format!("{platform}/{org_id}/{repo_id}")
    }
}

fn enabled_link() -> DocFilter {
    DocFilter::new().eq(FIELD_LINK_STATUS, LinkStatus::Enabled.as_str())
}

/// The enabled link with the given id.
pub fn doc_filter_of_link(link_id: &str) -> DocFilter {
    enabled_link().eq(FIELD_LINK_ID, link_id)
}

/// The enabled link bound to exactly this org/repo scope.
pub fn doc_filter_of_enabled_link(org_repo: &OrgRepo, apply_to: ApplyTo) -> DocFilter {
    enabled_link()
        .eq(FIELD_ORG_IDENTITY, org_repo.identity())
        .eq(FIELD_APPLY_TO, apply_to.as_str())
}

/// For a repository scope, the repo-specific link and the org-wide link.
/// May match zero, one or two documents.
pub fn doc_filter_of_repo_or_org(org_repo: &OrgRepo, apply_to: ApplyTo) -> DocFilter {
    if org_repo.is_org_wide() {
        return doc_filter_of_enabled_link(org_repo, apply_to);
    }
    enabled_link()
        .is_in(
            FIELD_ORG_IDENTITY,
            vec![org_repo.org_wide().identity(), org_repo.identity()],
        )
        .eq(FIELD_APPLY_TO, apply_to.as_str())
}

/// An individual signing record by signer email.
pub fn elem_filter_of_individual_signing(email: &str) -> ElemFilter {
    ElemFilter::new()
        .with(FIELD_CORP_ID, corp_id(email))
        .with(FIELD_EMAIL, email)
}

/// The corporate signing record of the corporation `email` belongs to.
pub fn elem_filter_of_corp_signing(email: &str) -> ElemFilter {
    ElemFilter::new().with(FIELD_CORP_ID, corp_id(email))
}

pub fn elem_filter_of_manager(email: &str) -> ElemFilter {
    ElemFilter::new().with(FIELD_EMAIL, email)
}

/// Narrow an element filter to enabled records.
pub fn enabled_only(elem: ElemFilter) -> ElemFilter {
    elem.with(FIELD_ENABLED, true)
}
