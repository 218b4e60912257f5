//! Service Request Lifecycle
//!
//! # State Machine
//!
//! ```text
//! PENDING → IN_PROGRESS → COMPLETED
//!    ↓           ↓
//!    └──→ CANCELLED ←──┘
//! ```
//!
//! # Money
//!
//! - Creation debits `cost` in the same atomic unit that inserts the record
//! - Cancellation refunds `cost` exactly once (key derived from the request id)
//! - Start and completion never touch the balance

pub mod lifecycle;
pub mod state;
pub mod types;

pub use lifecycle::{NewRequest, RequestLifecycle};
pub use state::RequestStatus;
pub use types::Request;
