use crate::{
    cloudflared::{
        restrict_permissions,
        TunnelCli,
        TunnelIdentity,
    },
    deploy,
    deploy::Runtime,
    dns,
    dns::DnsRecordResult,
    error::Error,
    hosts,
    ingress::{
        IngressConfig,
        CONFIG_FILE_NAME,
    },
    settings::{
        HostSource,
        Settings,
    },
};
use std::path::{
    Path,
    PathBuf,
};

/// Everything produced before the runtime is started.
pub struct Prepared {
    pub identity: TunnelIdentity,
    pub config_path: PathBuf,
    pub dns_results: Vec<DnsRecordResult>,
}

/// The full workflow: prepare the tunnel, then start its runtime.
pub async fn run<C: TunnelCli>(cli: &C, settings: &Settings) -> Result<(), Error> {
    let prepared = prepare(cli, settings).await?;

    deploy::deploy(&settings.runtime, &prepared.identity, &settings.config_dir, settings.grace).await?;
    info!("tunnel {} deployed", prepared.identity.id);

    Ok(())
}

/// Parse hosts, authenticate, create the tunnel, write the ingress
/// configuration and register DNS routes (subdomain mode only).
pub async fn prepare<C: TunnelCli>(cli: &C, settings: &Settings) -> Result<Prepared, Error> {
    let hosts = hosts::resolve(&settings.source)?;
    info!("exposing {} hostnames through tunnel {:?}", hosts.len(), settings.tunnel_name);

    cli.login().await?;
    let identity = cli.create_tunnel(&settings.tunnel_name).await?;

    let credentials_file = stage_credentials(&identity, settings)?;
    let config = IngressConfig::build(&identity, &hosts, credentials_file, settings.loglevel.clone());
    let config_path = settings.config_dir.join(CONFIG_FILE_NAME);
    config.write(&config_path)?;
    info!("ingress configuration written to {}", config_path.display());

    let dns_results = match &settings.source {
        HostSource::Subdomains { .. } => {
            dns::register_routes(cli, &identity.name, &hosts, settings.dns_retry_step).await
        }
        HostSource::Hosts(_) => Vec::new(),
    };

    Ok(Prepared {
        identity,
        config_path,
        dns_results,
    })
}

/// Credentials path as the runtime will see it. The container runtime reads
/// from the mounted config directory, so the file is staged there first.
fn stage_credentials(identity: &TunnelIdentity, settings: &Settings) -> Result<PathBuf, Error> {
    match &settings.runtime {
        Runtime::Systemd { .. } => Ok(identity.credentials_path.clone()),
        Runtime::Docker { .. } => {
            let Some(basename) = identity.credentials_path.file_name() else {
                return Err(Error::Provision(format!(
                    "credentials path has no file name: {}",
                    identity.credentials_path.display()
                )));
            };

            let staged = settings.config_dir.join(basename);
            if staged != identity.credentials_path {
                std::fs::create_dir_all(&settings.config_dir).map_err(|err| {
                    Error::Provision(format!("unable to create {}: {err}", settings.config_dir.display()))
                })?;
                std::fs::copy(&identity.credentials_path, &staged).map_err(|err| {
                    Error::Provision(format!("unable to stage credentials at {}: {err}", staged.display()))
                })?;
                restrict_permissions(&staged);
            }

            Ok(Path::new(deploy::CONTAINER_CONFIG_DIR).join(basename))
        }
    }
}
