//! Account identity: token issuance/validation and phone verification.

pub mod error;
pub mod otp;
pub mod token;
pub mod users;

pub use {
    error::{Error, Result},
    otp::{DevOtpProvider, OtpProvider},
    token::TokenService,
    users::UserService,
};
