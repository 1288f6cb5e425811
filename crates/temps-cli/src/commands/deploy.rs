//! Deploy a certificate through a registered provider

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use temps_cert_deployer::{registry, ConfigMap, ProviderFactoryOptions, ProviderType};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Deploy a certificate with the provider described by a job file
#[derive(Args)]
pub struct DeployCommand {
    /// Job file (YAML or JSON) naming the provider and its config
    #[arg(long, short = 'j')]
    pub job: PathBuf,

    /// Certificate chain (PEM), overrides the job's `certificate`
    #[arg(long, short = 'c')]
    pub cert: Option<PathBuf>,

    /// Private key (PEM), overrides the job's `privateKey`
    #[arg(long, short = 'k')]
    pub key: Option<PathBuf>,
}

/// On-disk description of one deployment
///
/// ```yaml
/// provider: tencentcloud-eo
/// access:
///   secretId: AKID...
///   secretKey: ...
/// extended:
///   zoneId: zone-123
///   matchPattern: wildcard
///   domains: "*.example.com"
/// certificate: ./fullchain.pem
/// privateKey: ./privkey.pem
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployJob {
    provider: String,
    #[serde(default)]
    access: ConfigMap,
    #[serde(default)]
    extended: ConfigMap,
    certificate: Option<PathBuf>,
    #[serde(alias = "private_key")]
    private_key: Option<PathBuf>,
}

impl DeployJob {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse job file: {}", path.display()))
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse job file: {}", path.display()))
        }
    }
}

/// Resolve `file` against the job file's directory when it is relative
fn relative_to(job_path: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        return file.to_path_buf();
    }
    job_path
        .parent()
        .map(|dir| dir.join(file))
        .unwrap_or_else(|| file.to_path_buf())
}

fn pick_pem(
    job_path: &Path,
    override_path: Option<&Path>,
    job_value: Option<&Path>,
    what: &str,
) -> anyhow::Result<PathBuf> {
    match (override_path, job_value) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, Some(path)) => Ok(relative_to(job_path, path)),
        (None, None) => anyhow::bail!("No {} given: pass it on the command line or set it in the job file", what),
    }
}

impl DeployCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let job = DeployJob::load(&self.job)?;

        let cert_path = pick_pem(
            &self.job,
            self.cert.as_deref(),
            job.certificate.as_deref(),
            "certificate",
        )?;
        let key_path = pick_pem(
            &self.job,
            self.key.as_deref(),
            job.private_key.as_deref(),
            "private key",
        )?;

        let certificate_pem = fs::read_to_string(&cert_path)
            .with_context(|| format!("Failed to read certificate file: {}", cert_path.display()))?;
        let private_key_pem = fs::read_to_string(&key_path)
            .with_context(|| format!("Failed to read private key file: {}", key_path.display()))?;

        let provider_type = ProviderType::from(job.provider.trim());
        let options = ProviderFactoryOptions::new(job.access, job.extended);
        let provider = registry::global()?
            .create(&provider_type, &options)
            .with_context(|| format!("Failed to create provider '{}'", provider_type))?;

        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling deployment");
                ctrl_c.cancel();
            }
        });

        println!(
            "{} Deploying certificate with {}",
            "→".bright_blue(),
            provider_type.to_string().bold()
        );
        info!("Deploying certificate from {}", cert_path.display());

        provider
            .deploy(&cancel, &certificate_pem, &private_key_pem)
            .await
            .with_context(|| format!("Deployment with '{}' failed", provider_type))?;

        println!("{} Certificate deployed", "✓".bright_green());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "provider: volcengine-vod\n\
             access:\n  accessKeyId: AK\n  secretAccessKey: SK\n\
             extended:\n  spaceName: space\n  domain: \"a.example.com;b.example.com\"\n\
             certificate: certs/fullchain.pem\n\
             privateKey: /etc/ssl/privkey.pem"
        )
        .unwrap();

        let job = DeployJob::load(&path).unwrap();
        assert_eq!(job.provider, "volcengine-vod");
        assert_eq!(job.access.get("accessKeyId").and_then(|v| v.as_str()), Some("AK"));
        assert_eq!(
            job.extended.get("spaceName").and_then(|v| v.as_str()),
            Some("space")
        );

        let cert = pick_pem(&path, None, job.certificate.as_deref(), "certificate").unwrap();
        assert_eq!(cert, dir.path().join("certs/fullchain.pem"));

        let key = pick_pem(&path, None, job.private_key.as_deref(), "private key").unwrap();
        assert_eq!(key, PathBuf::from("/etc/ssl/privkey.pem"));
    }

    #[test]
    fn test_load_json_job_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(
            &path,
            r#"{"provider": "flyio", "access": {"apiToken": "fo1_x"}, "extended": {"appName": "app", "hostname": "www.example.com"}}"#,
        )
        .unwrap();

        let job = DeployJob::load(&path).unwrap();
        assert_eq!(job.provider, "flyio");
        assert!(job.certificate.is_none());

        let override_path = PathBuf::from("/tmp/cert.pem");
        let cert = pick_pem(&path, Some(&override_path), None, "certificate").unwrap();
        assert_eq!(cert, override_path);

        assert!(pick_pem(&path, None, None, "private key").is_err());
    }

    #[test]
    fn test_json_job_is_parsed_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.JSON");
        fs::write(&path, r#"{"provider": "flyio", "private_key": "key.pem"}"#).unwrap();

        let job = DeployJob::load(&path).unwrap();
        assert_eq!(job.provider, "flyio");
        assert_eq!(job.private_key, Some(PathBuf::from("key.pem")));

        // valid YAML, but not JSON
        let broken = dir.path().join("broken.json");
        fs::write(&broken, "provider: flyio\n").unwrap();
        assert!(DeployJob::load(&broken).is_err());
    }

    #[test]
    fn test_private_key_accepts_both_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yml");
        fs::write(&path, "provider: flyio\nprivate_key: ./key.pem\n").unwrap();

        let job = DeployJob::load(&path).unwrap();
        assert_eq!(job.private_key, Some(PathBuf::from("./key.pem")));
    }
}
