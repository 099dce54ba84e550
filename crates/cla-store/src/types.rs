//! Domain records stored in, and returned by, the repositories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ModelError};
use crate::filters::org_identity;

/// Extra fields a signer fills in, as defined by the CLA template.
pub type SigningInfo = BTreeMap<String, String>;

/// Today's date in the format stored on signing records.
pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}

// ── Links ───────────────────────────────────────────────────────

/// Platform, organization and optional repository. An empty `repo_id`
/// means the whole organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgRepo {
    pub platform: String,
    pub org_id: String,
    #[serde(default)]
    pub repo_id: String,
}

impl OrgRepo {
    pub fn new(
        platform: impl Into<String>,
        org_id: impl Into<String>,
        repo_id: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            org_id: org_id.into(),
            repo_id: repo_id.into(),
        }
    }

    pub fn is_org_wide(&self) -> bool {
        self.repo_id.is_empty()
    }

    pub fn org_wide(&self) -> Self {
        Self::new(self.platform.clone(), self.org_id.clone(), "")
    }

    pub fn identity(&self) -> String {
        org_identity(&self.platform, &self.org_id, &self.repo_id)
    }
}

impl fmt::Display for OrgRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTo {
    Individual,
    Corporation,
}

impl ApplyTo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Corporation => "corporation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Enabled,
    Disabled,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkCreateOption {
    #[serde(flatten)]
    pub org_repo: OrgRepo,
    pub apply_to: ApplyTo,
    pub cla_id: String,
    pub cla_language: String,
    #[serde(default)]
    pub org_email: String,
    #[serde(default)]
    pub submitter: String,
}

/// A stored link, without its embedded arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub link_id: String,
    #[serde(flatten)]
    pub org_repo: OrgRepo,
    pub org_identity: String,
    pub apply_to: ApplyTo,
    pub cla_id: String,
    pub cla_language: String,
    #[serde(default)]
    pub org_email: String,
    #[serde(default)]
    pub submitter: String,
    pub link_status: LinkStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkListOption {
    pub platform: Option<String>,
    pub org_ids: Vec<String>,
    pub repo_id: Option<String>,
    pub apply_to: Option<ApplyTo>,
}

/// What `unbind_link` did to the link document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unbound {
    Deleted,
    Disabled,
}

// ── Individual signing ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualSigningInfo {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub date: String,
    pub enabled: bool,
    #[serde(default)]
    pub cla_language: String,
    #[serde(default)]
    pub signing_info: SigningInfo,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndividualSigningListOption {
    /// Narrow to signers of this email's corporation.
    pub corporation_email: Option<String>,
    pub cla_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualSigningBasicInfo {
    pub email: String,
    pub name: String,
    pub enabled: bool,
    pub date: String,
}

// ── Corporation signing ─────────────────────────────────────────

/// What a corporate admin submits when signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpSigningCreateOpt {
    pub admin_email: String,
    pub admin_name: String,
    pub corporation_name: String,
    #[serde(default)]
    pub date: String,
    pub cla_language: String,
    #[serde(default)]
    pub signing_info: SigningInfo,
}

/// The CLA text a corporate signature commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaInfo {
    pub cla_language: String,
    /// sha256 hex of the CLA text.
    pub cla_hash: String,
    /// sha256 hex of the org signature PDF.
    pub org_signature_hash: String,
    #[serde(default)]
    pub fields: Vec<ClaField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporationSigningSummary {
    pub cla_language: String,
    pub admin_email: String,
    pub admin_name: String,
    pub corporation_name: String,
    pub date: String,
    #[serde(default)]
    pub pdf_uploaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporationSigningDetail {
    #[serde(flatten)]
    pub summary: CorporationSigningSummary,
    #[serde(default)]
    pub signing_info: SigningInfo,
    #[serde(default)]
    pub cla_hash: String,
    #[serde(default)]
    pub org_signature_hash: String,
}

// ── Corporation managers ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerRole {
    Admin,
    Manager,
}

impl ManagerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporationManagerCreateOption {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ManagerRole,
    /// Plain text on input; only its hash is stored.
    pub password: String,
}

/// A manager account as returned to callers. Never carries the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporationManagerInfo {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: ManagerRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorporationManagerResetPassword {
    pub old_password: String,
    pub new_password: String,
}

/// Login attempt: `user` is an email or a manager id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorporationManagerCheckInfo {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporationManagerCheckResult {
    pub link_id: String,
    pub org_repo: OrgRepo,
    pub id: String,
    pub name: String,
    pub email: String,
    pub corp_id: String,
    pub role: ManagerRole,
    pub initial_pw_changed: bool,
}

// ── CLA templates ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaField {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaTemplate {
    /// Assigned by the store; empty before creation.
    #[serde(default, skip_serializing)]
    pub id: String,
    pub name: String,
    pub language: String,
    pub apply_to: ApplyTo,
    /// Empty when read without the text.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub fields: Vec<ClaField>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaListOption {
    pub language: Option<String>,
    pub apply_to: Option<ApplyTo>,
}

// ── Org emails and verification codes ───────────────────────────

/// The mailbox an organization sends notifications from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgEmailCreateInfo {
    pub email: String,
    pub platform: String,
    /// Opaque delivery credential, stored as given.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub email: String,
    pub code: String,
    pub purpose: String,
    /// Unix seconds after which the code is rejected.
    pub expiry: i64,
}

// ── Validation ──────────────────────────────────────────────────

/// Local part, `@`, then dot-separated labels that neither start nor end
/// with `-`, ending in an alphabetic top-level label.
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9._%+-]+@(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$",
    )
    .expect("email pattern compiles")
});

pub fn check_email_format(email: &str) -> Result<(), ModelError> {
    let well_formed = EMAIL_RE.is_match(email);
    if well_formed {
        Ok(())
    } else {
        Err(ModelError::new(
            ErrorCode::NotAnEmail,
            format!("{email} is not an email"),
        ))
    }
}
