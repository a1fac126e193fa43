use clap::{
    Parser,
    ValueEnum,
};
use cloudflare_tunnel_provisioner::{
    cloudflared::{
        Cloudflared,
        TunnelCli as _,
    },
    deploy::Runtime,
    hosts,
    provision,
    settings::{
        Inputs,
        Settings,
    },
};
use eyre::Result;
use std::{
    path::PathBuf,
    time::Duration,
};

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Provision a tunnel end to end and start its runtime
    Provision(ArgsProvision),
    /// Resolve and parse the host inputs, print the normalized mapping
    CheckHosts(ArgsProvision),
    /// Authenticate with the tunnel provider, nothing else
    Login(ArgsProvision),
}

#[derive(Parser)]
struct ArgsProvision {
    #[clap(long, env = "TUNNEL_NAME", help = "Name of the tunnel to create, prompted for if missing")]
    tunnel_name: Option<String>,

    #[clap(long, env = "DOMAIN", help = "Base domain combined with SUBDOMAINS")]
    domain: Option<String>,

    #[clap(
        long,
        env = "SUBDOMAINS",
        help = "Comma separated label[:port] list, routed to http://localhost:port"
    )]
    subdomains: Option<String>,

    #[clap(
        long,
        env = "HOSTS",
        help = "Comma separated hostname:service list, dns records are managed externally in this mode"
    )]
    hosts: Option<String>,

    #[clap(long, env = "TUNNEL_RUNTIME", value_enum, default_value_t = RuntimeKind::Docker)]
    runtime: RuntimeKind,

    #[clap(long, env = "TUNNEL_CONTAINER_NAME", default_value = "cloudflared")]
    container_name: String,

    #[clap(long, env = "CLOUDFLARED_IMAGE", default_value = "cloudflare/cloudflared:latest")]
    image: String,

    #[clap(long, env = "TUNNEL_SERVICE_NAME", default_value = "cloudflared")]
    service_name: String,

    #[clap(long, env = "CLOUDFLARED_BIN", default_value = "cloudflared")]
    cloudflared_bin: String,

    #[clap(
        long,
        env = "TUNNEL_CONFIG_DIR",
        default_value = "/etc/cloudflared",
        help = "Where the ingress configuration is written; mounted into the container runtime"
    )]
    config_dir: PathBuf,

    #[clap(
        long,
        env = "CLOUDFLARED_ORIGIN_DIR",
        help = "Directory cloudflared writes cert.pem and credentials to, defaults to ~/.cloudflared"
    )]
    origin_dir: Option<PathBuf>,

    #[clap(long, env = "TUNNEL_LOGLEVEL", help = "loglevel passed through to the tunnel runtime")]
    loglevel: Option<String>,

    #[clap(
        long,
        env = "TUNNEL_GRACE_PERIOD",
        default_value = "3s",
        value_parser = humantime::parse_duration,
        help = "How long to wait before checking that the runtime is up"
    )]
    grace: Duration,

    #[clap(
        long,
        env = "DNS_RETRY_STEP",
        default_value = "2s",
        value_parser = humantime::parse_duration,
        help = "Backoff unit between dns registration attempts"
    )]
    dns_retry_step: Duration,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RuntimeKind {
    Docker,
    Systemd,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().expect("color_eyre init");
    tracing_subscriber::fmt::init();

    match Args::parse() {
        Args::Provision(args) => {
            let cli = cloudflared(&args)?;
            let settings = resolve_settings(args)?;
            provision::run(&cli, &settings).await?;
        }
        Args::CheckHosts(args) => {
            let settings = resolve_settings(args)?;
            let hosts = hosts::resolve(&settings.source)?;
            print!("{}", serde_yaml::to_string(&hosts)?);
        }
        Args::Login(args) => {
            let cli = cloudflared(&args)?;
            cli.login().await?;
        }
    }

    Ok(())
}

fn cloudflared(args: &ArgsProvision) -> Result<Cloudflared> {
    let origin_dir = match &args.origin_dir {
        Some(dir) => dir.clone(),
        None => dirs::home_dir()
            .ok_or_else(|| eyre::eyre!("unable to determine the home directory, set --origin-dir"))?
            .join(".cloudflared"),
    };
    Ok(Cloudflared::new(&args.cloudflared_bin, origin_dir))
}

fn resolve_settings(args: ArgsProvision) -> Result<Settings> {
    let (tunnel_name, source) = Inputs {
        tunnel_name: args.tunnel_name,
        domain: args.domain,
        subdomains: args.subdomains,
        hosts: args.hosts,
    }
    .resolve()?;

    let runtime = match args.runtime {
        RuntimeKind::Docker => Runtime::Docker {
            container: args.container_name,
            image: args.image,
        },
        RuntimeKind::Systemd => Runtime::Systemd {
            service: args.service_name,
            binary: args.cloudflared_bin,
        },
    };

    Ok(Settings {
        tunnel_name,
        source,
        config_dir: args.config_dir,
        loglevel: args.loglevel,
        runtime,
        grace: args.grace,
        dns_retry_step: args.dns_retry_step,
    })
}
