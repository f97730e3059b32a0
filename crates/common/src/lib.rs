pub mod error;
pub mod models;
pub mod projection;
pub mod state_machine;

pub use error::{Error, Result};
pub use models::{
    AccessStatus, Actor, EntitlementKey, EntitlementMetadata, EntitlementRecord,
    EntitlementStatus, Item, Role, SubmissionSource, User,
};
pub use projection::access_status;
pub use state_machine::{transition, Action, Command, Decision, Submission, Transition, Verdict};
