//! Record reconciliation: normalization, lookup resolution and assignment

pub mod assignment;
pub mod identity;
pub mod normalize;
pub mod resolver;
pub mod service;
pub mod source;

pub use assignment::AssignmentState;
pub use identity::{EmployeeCacheEntry, extract_employee_name};
pub use normalize::{FieldConflict, NormalizedRecord, normalize_record};
pub use resolver::{LookupResolver, ResolutionStats};
pub use service::{RecordSet, RosterService};
pub use source::IdentitySource;
