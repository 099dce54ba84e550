//! Verification codes: short-lived documents in `verification_codes`,
//! consumed on the first check.

use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::collection::Collection;
use crate::document::*;
use crate::error::{ErrorCode, ModelError, ModelResult};
use crate::types::VerificationCode;

pub const VERIFICATION_CODES: &str = "verification_codes";

/// Purpose bound to a code sent for signing a link.
pub fn purpose_of_signing(link_id: &str) -> String {
    link_id.to_string()
}

pub fn purpose_of_adding_email_domain(email: &str) -> String {
    format!("adding email domain:{email}")
}

#[derive(Debug, Clone)]
pub struct VerificationCodeRepository {
    codes: Collection,
    expiry: Duration,
}

impl VerificationCodeRepository {
    pub fn new(codes: Collection, expiry: Duration) -> Self {
        Self { codes, expiry }
    }

    /// Store a code for (email, purpose) that expires after the configured
    /// lifetime.
    pub async fn create_verification_code(
        &self,
        email: &str,
        code: &str,
        purpose: &str,
    ) -> ModelResult<VerificationCode> {
        let lifetime = i64::try_from(self.expiry.as_secs()).unwrap_or(i64::MAX);
        let vc = VerificationCode {
            email: email.to_string(),
            code: code.to_string(),
            purpose: purpose.to_string(),
            expiry: Utc::now().timestamp().saturating_add(lifetime),
        };
        self.codes.insert_doc(to_fields(&vc)?).await?;
        Ok(vc)
    }

    /// Consume a code. Every stored copy of it is removed whether or not it
    /// is still valid. The delete decides the outcome: of two concurrent
    /// checks only the one that removes the stored copies succeeds.
    pub async fn check_verification_code(
        &self,
        email: &str,
        code: &str,
        purpose: &str,
    ) -> ModelResult<()> {
        let wrong_code =
            || ModelError::new(ErrorCode::WrongVerificationCode, "wrong verification code");
        let filter = DocFilter::new()
            .eq("email", email)
            .eq("code", code)
            .eq("purpose", purpose);

        let found = self.codes.get_docs(&filter, &Projection::of(&["expiry"])).await?;
        if found.is_empty() {
            return Err(wrong_code());
        }
        let ids = found.iter().map(|d| d.id).collect();
        if self.codes.delete_docs(&DocFilter::ids(ids)).await? == 0 {
            warn!(email, purpose, "verification code consumed concurrently");
            return Err(wrong_code());
        }

        let now = Utc::now().timestamp();
        let expiry = found
            .iter()
            .filter_map(|d| d.fields.get("expiry").and_then(serde_json::Value::as_i64))
            .max()
            .unwrap_or(0);
        if expiry < now {
            warn!(email, purpose, "expired verification code");
            return Err(ModelError::new(
                ErrorCode::VerificationCodeExpired,
                "verification code is expired",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, Result};
    use crate::store_memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Memory store whose reads take a while, so two checks interleave
    /// between their read and their delete.
    struct SlowReads(MemoryStore);

    #[async_trait]
    impl DocumentStore for SlowReads {
        async fn insert_one(&self, collection: &str, fields: Fields) -> Result<DocId> {
            self.0.insert_one(collection, fields).await
        }

        async fn insert_if_absent(
            &self,
            collection: &str,
            filter: &DocFilter,
            fields: Fields,
        ) -> Result<Option<DocId>> {
            self.0.insert_if_absent(collection, filter, fields).await
        }

        async fn replace_one(
            &self,
            collection: &str,
            filter: &DocFilter,
            fields: Fields,
            upsert: bool,
        ) -> Result<ReplaceOutcome> {
            self.0.replace_one(collection, filter, fields, upsert).await
        }

        async fn delete_many(&self, collection: &str, filter: &DocFilter) -> Result<u64> {
            self.0.delete_many(collection, filter).await
        }

        async fn update_one(
            &self,
            collection: &str,
            filter: &DocFilter,
            update: &Update,
        ) -> Result<UpdateOutcome> {
            self.0.update_one(collection, filter, update).await
        }

        async fn find(
            &self,
            collection: &str,
            filter: &DocFilter,
            projection: &Projection,
        ) -> Result<Vec<Document>> {
            let docs = self.0.find(collection, filter, projection).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(docs)
        }

        async fn count_array_elems(
            &self,
            collection: &str,
            filter: &DocFilter,
            array: &str,
            elem: &ElemFilter,
        ) -> Result<u64> {
            self.0.count_array_elems(collection, filter, array, elem).await
        }
    }

    fn repo(expiry: Duration) -> VerificationCodeRepository {
        VerificationCodeRepository::new(
            Collection::new(Arc::new(MemoryStore::new()), VERIFICATION_CODES),
            expiry,
        )
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let codes = repo(Duration::from_secs(300));
        codes
            .create_verification_code("a@x.com", "123456", "l1")
            .await
            .unwrap();
        codes
            .check_verification_code("a@x.com", "123456", "l1")
            .await
            .unwrap();
        let err = codes
            .check_verification_code("a@x.com", "123456", "l1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongVerificationCode);
    }

    #[tokio::test]
    async fn purpose_must_match() {
        let codes = repo(Duration::from_secs(300));
        codes
            .create_verification_code("a@x.com", "123456", "l1")
            .await
            .unwrap();
        let err = codes
            .check_verification_code("a@x.com", "123456", "l2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongVerificationCode);
    }

    #[tokio::test]
    async fn expired_code_is_rejected_and_consumed() {
        let codes = repo(Duration::ZERO);
        let vc = codes
            .create_verification_code("a@x.com", "1", "l1")
            .await
            .unwrap();
        // Backdate the stored copy.
        let mut fields = Fields::new();
        fields.insert("expiry".into(), (vc.expiry - 10).into());
        codes
            .codes
            .update_doc(&DocFilter::new().eq("code", "1"), fields)
            .await
            .unwrap();

        let err = codes
            .check_verification_code("a@x.com", "1", "l1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::VerificationCodeExpired);
        let err = codes
            .check_verification_code("a@x.com", "1", "l1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongVerificationCode);
    }

    #[tokio::test]
    async fn concurrent_checks_consume_once() {
        let codes = VerificationCodeRepository::new(
            Collection::new(Arc::new(SlowReads(MemoryStore::new())), VERIFICATION_CODES),
            Duration::from_secs(300),
        );
        codes
            .create_verification_code("a@x.com", "123456", "link1")
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            codes.check_verification_code("a@x.com", "123456", "link1"),
            codes.check_verification_code("a@x.com", "123456", "link1"),
        );
        assert_eq!(
            u8::from(first.is_ok()) + u8::from(second.is_ok()),
            1,
            "first={first:?} second={second:?}"
        );
        let err = first.and(second).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WrongVerificationCode);
    }

    #[test]
    fn purposes() {
        assert_eq!(
            purpose_of_adding_email_domain("b@x.com"),
            "adding email domain:b@x.com"
        );
    }
}
