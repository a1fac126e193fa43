use crate::error::Error;
use std::path::{
    Path,
    PathBuf,
};
use tokio::process::Command;
use uuid::Uuid;

/// Identity of a provisioned tunnel. `id` and `credentials_path` are
/// authoritative outputs of the external tool, never generated locally.
#[derive(Debug, Clone)]
pub struct TunnelIdentity {
    pub name: String,
    pub id: Uuid,
    pub credentials_path: PathBuf,
}

/// The external tunnel-management tool, narrowed to the three operations the
/// workflow needs. Tests substitute a fake.
#[allow(async_fn_in_trait)]
pub trait TunnelCli {
    /// Ensure an origin certificate exists, authenticating interactively if
    /// necessary.
    async fn login(&self) -> Result<(), Error>;

    /// Create a named tunnel and report its id and credentials file.
    async fn create_tunnel(&self, name: &str) -> Result<TunnelIdentity, Error>;

    /// Route `fqdn` through the named tunnel.
    async fn route_dns(&self, tunnel_name: &str, fqdn: &str) -> Result<(), Error>;
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// cloudflared

/// Drives the real `cloudflared` binary.
pub struct Cloudflared {
    binary: String,
    /// Directory cloudflared writes `cert.pem` and tunnel credentials to.
    origin_dir: PathBuf,
}

impl Cloudflared {
    pub fn new(binary: impl Into<String>, origin_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            origin_dir: origin_dir.into(),
        }
    }

    fn cert_path(&self) -> PathBuf {
        self.origin_dir.join("cert.pem")
    }

    fn locate_credentials(&self, output: &str, id: Uuid) -> Result<PathBuf, Error> {
        if let Some(path) = extract_credentials_path(output) {
            if path.is_file() {
                return Ok(path);
            }
        }

        let fallback = self.origin_dir.join(format!("{id}.json"));
        if fallback.is_file() {
            warn!(
                "credentials path not reported by cloudflared, using {}",
                fallback.display()
            );
            return Ok(fallback);
        }

        Err(Error::Provision(format!(
            "credentials file for tunnel {id} not found under {}",
            self.origin_dir.display()
        )))
    }
}

impl TunnelCli for Cloudflared {
    async fn login(&self) -> Result<(), Error> {
        let cert = self.cert_path();
        if cert.is_file() {
            restrict_permissions(&cert);
            info!("origin certificate already present at {}, skipping login", cert.display());
            return Ok(());
        }

        info!("starting interactive login, follow the browser prompt");
        let status = Command::new(&self.binary)
            .args(["tunnel", "login"])
            .status()
            .await
            .map_err(|err| Error::Auth(format!("failed to run {:?}: {err}", self.binary)))?;
        if !status.success() {
            return Err(Error::Auth(format!("login exited with {status}")));
        }

        if cert.is_file() {
            restrict_permissions(&cert);
        }
        Ok(())
    }

    async fn create_tunnel(&self, name: &str) -> Result<TunnelIdentity, Error> {
        let output = Command::new(&self.binary)
            .args(["tunnel", "create", name])
            .output()
            .await
            .map_err(|err| Error::Provision(format!("failed to run {:?}: {err}", self.binary)))?;
        if !output.status.success() {
            return Err(Error::Provision(format!(
                "tunnel create exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // cloudflared logs to stderr, the summary line lands on stdout
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        let Some(id) = extract_tunnel_id(&combined) else {
            return Err(Error::Provision(format!("tunnel create reported no tunnel id for {name:?}")));
        };

        let credentials_path = self.locate_credentials(&combined, id)?;
        restrict_permissions(&credentials_path);

        info!("created tunnel {name:?} with id {id}");
        Ok(TunnelIdentity {
            name: name.to_string(),
            id,
            credentials_path,
        })
    }

    async fn route_dns(&self, tunnel_name: &str, fqdn: &str) -> Result<(), Error> {
        let output = Command::new(&self.binary)
            .args(["tunnel", "route", "dns", tunnel_name, fqdn])
            .output()
            .await
            .map_err(|err| Error::Provision(format!("failed to run {:?}: {err}", self.binary)))?;
        if !output.status.success() {
            return Err(Error::Provision(format!(
                "route dns for {fqdn} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// First UUID-shaped token in the CLI output.
fn extract_tunnel_id(output: &str) -> Option<Uuid> {
    output
        .split_whitespace()
        .find_map(|token| Uuid::parse_str(token.trim_matches(|c: char| !c.is_ascii_alphanumeric())).ok())
}

/// Path from the "Tunnel credentials written to <path>" line, if present.
fn extract_credentials_path(output: &str) -> Option<PathBuf> {
    let line = output.lines().find(|line| line.contains("credentials written to"))?;
    let token = line.split_whitespace().rfind(|token| token.contains(".json"))?;
    Some(PathBuf::from(token.trim_end_matches('.')))
}

/// Owner-only read/write on certificate, credentials and configuration
/// artifacts. Failure to tighten is reported, not fatal.
pub(crate) fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt as _;

    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("unable to restrict permissions on {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE_OUTPUT: &str = "\
Tunnel credentials written to /root/.cloudflared/9a5d858b-79c6-4f55-9ce7-c6d2190f0d07.json. \
cloudflared chose this file based on where your origin certificate was found.
Keep this file secret. To revoke these credentials, delete the tunnel.

Created tunnel edge with id 9a5d858b-79c6-4f55-9ce7-c6d2190f0d07";

    #[test]
    fn extracts_tunnel_id_from_create_output() {
        let id = extract_tunnel_id(CREATE_OUTPUT).unwrap();
        assert_eq!(id.to_string(), "9a5d858b-79c6-4f55-9ce7-c6d2190f0d07");
    }

    #[test]
    fn extracts_no_id_from_unrelated_output() {
        assert!(extract_tunnel_id("no identifier here").is_none());
    }

    #[test]
    fn extracts_credentials_path_from_create_output() {
        let path = extract_credentials_path(CREATE_OUTPUT).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/root/.cloudflared/9a5d858b-79c6-4f55-9ce7-c6d2190f0d07.json")
        );
    }

    #[test]
    fn credentials_fall_back_to_id_json_in_origin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::parse_str("9a5d858b-79c6-4f55-9ce7-c6d2190f0d07").unwrap();
        std::fs::write(dir.path().join(format!("{id}.json")), "{}").unwrap();

        let cloudflared = Cloudflared::new("cloudflared", dir.path());
        let path = cloudflared.locate_credentials("created, no path line", id).unwrap();
        assert_eq!(path, dir.path().join(format!("{id}.json")));
    }

    #[test]
    fn missing_credentials_is_a_provision_error() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::parse_str("9a5d858b-79c6-4f55-9ce7-c6d2190f0d07").unwrap();

        let cloudflared = Cloudflared::new("cloudflared", dir.path());
        assert!(matches!(
            cloudflared.locate_credentials("created, no path line", id),
            Err(Error::Provision(_))
        ));
    }

    #[tokio::test]
    async fn login_skips_when_certificate_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cert.pem"), "dummy").unwrap();

        // the binary would fail if it were invoked
        let cloudflared = Cloudflared::new("false", dir.path());
        cloudflared.login().await.unwrap();
    }

    #[tokio::test]
    async fn failing_login_is_an_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let cloudflared = Cloudflared::new("false", dir.path());
        assert!(matches!(cloudflared.login().await, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn failing_route_dns_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cloudflared = Cloudflared::new("false", dir.path());
        assert!(cloudflared.route_dns("edge", "web.example.com").await.is_err());
    }
}
