//! Astro Ledger Client SDK.
//!
//! Feature backends use [`AstroLedgerClient`] to check and spend
//! entitlements; apps use it to fetch the caller's entitlement snapshot and
//! wrap it in an [`AccessHint`] for rendering locks and remaining counts.
//!
//! # Example
//!
//! ```no_run
//! use astro_ledger_client::{AstroLedgerClient, ClientError, ClientOptions};
//!
//! # async fn example() -> Result<(), ClientError> {
//! let client = AstroLedgerClient::with_options(
//!     "http://astro-ledger.internal:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("kundali-engine"),
//! )?;
//!
//! let access = client.check_access("user-123", "kundali_report").await?;
//! if access.allowed {
//!     // ... generate the report ...
//!     let spend = client
//!         .consume("user-123", "kundali_report", Some("report-req-9"))
//!         .await?;
//!     println!("{} kundali credits left", spend.balance);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod hint;
mod types;

pub use client::{AstroLedgerClient, ClientOptions};
pub use error::ClientError;
pub use hint::AccessHint;
pub use types::*;
