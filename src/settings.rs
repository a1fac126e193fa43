use crate::{
    deploy::Runtime,
    error::Error,
    hosts,
};
use std::{
    io,
    io::Write as _,
    path::PathBuf,
    time::Duration,
};

/// Where the exposed hostnames come from. The two addressing modes are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub enum HostSource {
    /// Raw `hostname:service` list, split and validated by the parser.
    Hosts(String),
    /// Raw `label[:port]` list combined with a base domain.
    Subdomains { subdomains: String, domain: String },
}

/// Immutable configuration for one provisioning run, resolved once at startup
/// and passed explicitly to each stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub tunnel_name: String,
    pub source: HostSource,
    /// Directory the ingress configuration (and, for the container runtime,
    /// the staged credentials file) is written to.
    pub config_dir: PathBuf,
    pub loglevel: Option<String>,
    pub runtime: Runtime,
    pub grace: Duration,
    pub dns_retry_step: Duration,
}

/// Raw addressing inputs as read from flags or the environment, before
/// trimming, prompting and mutual-exclusivity checks.
#[derive(Debug, Default)]
pub struct Inputs {
    pub tunnel_name: Option<String>,
    pub domain: Option<String>,
    pub subdomains: Option<String>,
    pub hosts: Option<String>,
}

impl Inputs {
    /// Resolve with interactive prompts on stdin for a missing tunnel name or
    /// base domain.
    pub fn resolve(self) -> Result<(String, HostSource), Error> {
        self.resolve_with(prompt_stdin)
    }

    pub fn resolve_with(
        self,
        mut prompt: impl FnMut(&str) -> io::Result<String>,
    ) -> Result<(String, HostSource), Error> {
        let hosts = non_empty(self.hosts);
        let subdomains = non_empty(self.subdomains);
        let domain = non_empty(self.domain);

        let tunnel_name = match non_empty(self.tunnel_name) {
            Some(name) => name,
            None => prompt_required(&mut prompt, "Tunnel name")?,
        };

        let source = match (hosts, subdomains, domain) {
            (Some(_), Some(_), _) | (Some(_), None, Some(_)) => {
                return Err(Error::Config(
                    "HOSTS and SUBDOMAINS/DOMAIN are mutually exclusive, set only one addressing mode".into(),
                ));
            }
            (Some(hosts), None, None) => HostSource::Hosts(hosts),
            (None, Some(subdomains), domain) => {
                let domain = match domain {
                    Some(domain) => domain,
                    None => prompt_required(&mut prompt, "Base domain")?,
                };
                if !hosts::is_valid_hostname(&domain) {
                    return Err(Error::Validation(format!("invalid base domain: {domain:?}")));
                }
                HostSource::Subdomains { subdomains, domain }
            }
            (None, None, _) => {
                return Err(Error::Config("one of HOSTS or SUBDOMAINS is required".into()));
            }
        };

        Ok((tunnel_name, source))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn prompt_required(
    prompt: &mut impl FnMut(&str) -> io::Result<String>,
    label: &str,
) -> Result<String, Error> {
    let answer = prompt(label).map_err(|err| Error::Config(format!("failed to read input: {err}")))?;
    non_empty(Some(answer)).ok_or_else(|| Error::Config(format!("{label} is required")))
}

fn prompt_stdin(label: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer)
}
