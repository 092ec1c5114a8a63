//! Account lifecycle: OTP request/verify and the idempotent user upsert.

use std::sync::Arc;

use chrono::Utc;

use murmur_storage::{Db, User, users};

use crate::{Error, Result, otp::OtpProvider};

pub struct UserService {
    db: Db,
    otp: Arc<dyn OtpProvider>,
}

impl UserService {
    pub fn new(db: Db, otp: Arc<dyn OtpProvider>) -> Self {
        Self { db, otp }
    }

    /// Kick off registration/login for a phone number.
    pub async fn request_otp(&self, phone: &str) -> Result<()> {
        if phone.is_empty() {
            return Err(Error::invalid_argument("phone number is required"));
        }
        self.otp.send_code(phone).await
    }

    /// Verify the code and upsert the account. Existing users pass through
    /// unchanged.
    pub async fn verify_otp(&self, phone: &str, code: &str) -> Result<User> {
        if phone.is_empty() || code.is_empty() {
            return Err(Error::invalid_argument("phone and code are required"));
        }
        if !self.otp.verify_code(phone, code).await? {
            return Err(Error::unauthorized("invalid or expired code"));
        }
        let mut conn = self
            .db
            .acquire()
            .await
            .map_err(murmur_storage::Error::from)?;
        Ok(users::create(&mut conn, phone, Utc::now()).await?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::DevOtpProvider;

    async fn make_service(code: Option<&str>) -> UserService {
        let db = Db::connect("sqlite::memory:", 1).await.unwrap();
        UserService::new(db, Arc::new(DevOtpProvider::new(code.map(Into::into))))
    }

    #[tokio::test]
    async fn verify_creates_the_user_idempotently() {
        let svc = make_service(Some("123456")).await;
        let first = svc.verify_otp("+15550001", "123456").await.unwrap();
        let second = svc.verify_otp("+15550001", "123456").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn wrong_code_is_unauthorized() {
        let svc = make_service(Some("123456")).await;
        assert!(matches!(
            svc.verify_otp("+15550001", "000000").await,
            Err(Error::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn missing_parameters_are_invalid() {
        let svc = make_service(Some("123456")).await;
        assert!(matches!(
            svc.request_otp("").await,
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            svc.verify_otp("+15550001", "").await,
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_closed() {
        let svc = make_service(None).await;
        assert!(matches!(
            svc.verify_otp("+15550001", "123456").await,
            Err(Error::Provider { .. })
        ));
    }
}
