pub mod config;
pub mod fields;
pub mod role;
pub mod token;

pub use config::{
    parse_rotation_schedule, AutomatedRotationParams, BackendConfig, ConfigInput, OldTokenPolicy,
    RootTokenKind,
};
pub use role::{CredentialKind, RoleEntry, RoleInput, TeamOptions};
pub use token::{TokenLease, TERRAFORM_TOKEN_TYPE};
