//! Domain selection: pattern expansion, idempotency filtering and updates

pub mod executor;
pub mod filter;
pub mod hostname;
pub mod pattern;
pub mod resolver;

pub use executor::{execute, UpdateStrategy};
pub use filter::IdempotencyFilter;
pub use hostname::CertificateHostnames;
pub use pattern::{DomainMatchPattern, DomainSpec};
pub use resolver::{fetch_inventory, CandidateSet, DomainResolver};
