use crate::{
    cloudflared::TunnelIdentity,
    error::Error,
    ingress::CONFIG_FILE_NAME,
};
use std::{
    path::Path,
    time::Duration,
};
use tokio::{
    process::Command,
    time::sleep,
};

/// Config directory as seen inside the runtime container; the host config
/// directory is mounted there.
pub const CONTAINER_CONFIG_DIR: &str = "/etc/cloudflared";

const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
const LOG_TAIL_LINES: &str = "50";

/// How the tunnel process is run.
#[derive(Debug, Clone)]
pub enum Runtime {
    Docker { container: String, image: String },
    Systemd { service: String, binary: String },
}

/// Replace any runtime instance with the same logical name and start a new
/// one against the generated configuration. After the grace period the
/// instance must be observably running, otherwise the captured logs are
/// surfaced in the error.
pub async fn deploy(
    runtime: &Runtime,
    identity: &TunnelIdentity,
    config_dir: &Path,
    grace: Duration,
) -> Result<(), Error> {
    match runtime {
        Runtime::Docker { container, image } => deploy_docker(container, image, identity, config_dir, grace).await,
        Runtime::Systemd { service, binary } => deploy_systemd(service, binary, identity, config_dir, grace).await,
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// docker

async fn deploy_docker(
    container: &str,
    image: &str,
    identity: &TunnelIdentity,
    config_dir: &Path,
    grace: Duration,
) -> Result<(), Error> {
    // idempotent restart, a missing container is fine
    let _ = Command::new("docker").args(["rm", "-f", container]).output().await;

    let args = docker_run_args(container, image, config_dir, &identity.id.to_string());
    let output = Command::new("docker")
        .args(&args)
        .output()
        .await
        .map_err(|err| deploy_error(format!("failed to run docker: {err}")))?;
    if !output.status.success() {
        return Err(deploy_error(format!(
            "docker run exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    sleep(grace).await;

    if container_running(container).await {
        info!("container {container:?} is running tunnel {}", identity.id);
        return Ok(());
    }

    let logs = container_logs(container).await;
    error!("captured logs from {container:?}:\n{logs}");
    Err(Error::Deploy {
        message: format!("container {container:?} is not running after {grace:?}"),
        logs,
    })
}

pub fn docker_run_args(container: &str, image: &str, config_dir: &Path, tunnel_id: &str) -> Vec<String> {
    vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        container.into(),
        "--restart".into(),
        "unless-stopped".into(),
        "-v".into(),
        format!("{}:{CONTAINER_CONFIG_DIR}", config_dir.display()),
        image.into(),
        "tunnel".into(),
        "--config".into(),
        format!("{CONTAINER_CONFIG_DIR}/{CONFIG_FILE_NAME}"),
        "run".into(),
        tunnel_id.into(),
    ]
}

async fn container_running(container: &str) -> bool {
    let output = match Command::new("docker").args(["inspect", container]).output().await {
        Ok(output) if output.status.success() => output,
        _ => return false,
    };

    let Ok(inspected) = serde_json::from_slice::<serde_json::Value>(&output.stdout) else {
        warn!("unable to parse docker inspect output for {container:?}");
        return false;
    };
    inspected
        .get(0)
        .and_then(|state| state.pointer("/State/Running"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

async fn container_logs(container: &str) -> String {
    match Command::new("docker")
        .args(["logs", "--tail", LOG_TAIL_LINES, container])
        .output()
        .await
    {
        Ok(output) => format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
        Err(err) => format!("unable to collect container logs: {err}"),
    }
}

// -=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-=-
// systemd

async fn deploy_systemd(
    service: &str,
    binary: &str,
    identity: &TunnelIdentity,
    config_dir: &Path,
    grace: Duration,
) -> Result<(), Error> {
    // idempotent restart, a missing unit is fine
    let _ = Command::new("systemctl").args(["stop", service]).output().await;

    let unit_path = Path::new(SYSTEMD_UNIT_DIR).join(format!("{service}.service"));
    let unit = render_unit(binary, config_dir, &identity.id.to_string());
    std::fs::write(&unit_path, unit)
        .map_err(|err| deploy_error(format!("unable to write {}: {err}", unit_path.display())))?;

    systemctl(&["daemon-reload"]).await?;
    systemctl(&["enable", "--now", service]).await?;

    sleep(grace).await;

    let output = Command::new("systemctl")
        .args(["is-active", service])
        .output()
        .await
        .map_err(|err| deploy_error(format!("failed to run systemctl: {err}")))?;
    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if state == "active" {
        info!("service {service:?} is active, running tunnel {}", identity.id);
        return Ok(());
    }

    let logs = service_logs(service).await;
    error!("captured logs from {service:?}:\n{logs}");
    Err(Error::Deploy {
        message: format!("service {service:?} is {state:?} after {grace:?}"),
        logs,
    })
}

pub fn render_unit(binary: &str, config_dir: &Path, tunnel_id: &str) -> String {
    format!(
        r#"[Unit]
Description=Cloudflare Tunnel
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={binary} tunnel --config {config_dir}/{CONFIG_FILE_NAME} run {tunnel_id}
Restart=on-failure
RestartSec=5s

[Install]
WantedBy=multi-user.target
"#,
        config_dir = config_dir.display(),
    )
}

async fn systemctl(args: &[&str]) -> Result<(), Error> {
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .await
        .map_err(|err| deploy_error(format!("failed to run systemctl: {err}")))?;
    if !output.status.success() {
        return Err(deploy_error(format!(
            "systemctl {} exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn service_logs(service: &str) -> String {
    match Command::new("journalctl")
        .args(["-u", service, "-n", LOG_TAIL_LINES, "--no-pager"])
        .output()
        .await
    {
        Ok(output) => String::from_utf8_lossy(&output.stdout).to_string(),
        Err(err) => format!("unable to collect service logs: {err}"),
    }
}

fn deploy_error(message: String) -> Error {
    Error::Deploy {
        message,
        logs: String::new(),
    }
}
