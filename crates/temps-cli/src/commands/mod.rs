pub mod deploy;
pub mod providers;

pub use deploy::DeployCommand;
pub use providers::ProvidersCommand;
