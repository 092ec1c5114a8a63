//! Phone verification provider seam.
//!
//! The real provider (Twilio Verify or similar) lives outside this codebase;
//! the engine only depends on this trait. The dev provider accepts a single
//! configured code so local stacks work without external credentials.

use async_trait::async_trait;

use crate::{Error, Result};

#[async_trait]
pub trait OtpProvider: Send + Sync {
    /// Initiate verification for a phone number.
    async fn send_code(&self, phone: &str) -> Result<()>;
    /// Check a submitted code. `Ok(false)` means wrong/expired code.
    async fn verify_code(&self, phone: &str, code: &str) -> Result<bool>;
}

/// Development-only provider: accepts exactly the configured static code.
/// With no code configured every call fails, which is the safe default when
/// no real provider has been wired.
pub struct DevOtpProvider {
    code: Option<String>,
}

impl DevOtpProvider {
    pub fn new(code: Option<String>) -> Self {
        Self { code }
    }
}

#[async_trait]
impl OtpProvider for DevOtpProvider {
    async fn send_code(&self, phone: &str) -> Result<()> {
        let Some(code) = &self.code else {
            return Err(Error::provider("no verification provider configured"));
        };
        tracing::info!(phone, code, "dev otp provider: pretend-sent code");
        Ok(())
    }

    async fn verify_code(&self, _phone: &str, code: &str) -> Result<bool> {
        let Some(expected) = &self.code else {
            return Err(Error::provider("no verification provider configured"));
        };
        Ok(code == expected)
    }
}
