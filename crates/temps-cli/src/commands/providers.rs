use clap::Args;
use colored::Colorize;
use temps_cert_deployer::registry;

/// List the registered deployment provider types
#[derive(Args)]
pub struct ProvidersCommand {}

impl ProvidersCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let registry = registry::global()?;

        println!("{}", "Deployment providers:".bright_blue().bold());
        for provider_type in registry.types() {
            println!("  {} {}", "•".bright_blue(), provider_type);
        }

        Ok(())
    }
}
