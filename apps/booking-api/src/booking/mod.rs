//! Payment confirmation intake: signed external events become deduplicated
//! bookings.

pub mod event;
pub mod intake;
pub mod locks;
pub mod receipt;

pub use intake::{IntakeOutcome, PaymentIntake};

use crate::db::StoreError;
use crate::error::FieldError;

/// Failures of the booking-creation path. None of them leave partial state.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("payment event failed validation")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] StoreError),
}
