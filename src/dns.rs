use crate::{
    cloudflared::TunnelCli,
    hosts::HostMap,
};
use std::time::Duration;
use tokio::time::sleep;

/// Attempts per hostname before recording a failure.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DnsRecordResult {
    pub hostname: String,
    pub attempts: u32,
    pub outcome: RouteOutcome,
}

/// Register a DNS route for every hostname, retrying each up to
/// [`MAX_ATTEMPTS`] times with `attempt * retry_step` between attempts.
/// Exhausted hostnames are reported in the summary and never abort the run.
pub async fn register_routes<C: TunnelCli>(
    cli: &C,
    tunnel_name: &str,
    hosts: &HostMap,
    retry_step: Duration,
) -> Vec<DnsRecordResult> {
    let mut results = Vec::with_capacity(hosts.len());
    for hostname in hosts.keys() {
        results.push(register_route(cli, tunnel_name, hostname, retry_step).await);
    }
    summarize(&results);
    results
}

async fn register_route<C: TunnelCli>(
    cli: &C,
    tunnel_name: &str,
    hostname: &str,
    retry_step: Duration,
) -> DnsRecordResult {
    for attempt in 1..=MAX_ATTEMPTS {
        match cli.route_dns(tunnel_name, hostname).await {
            Ok(()) => {
                info!("dns route registered for {hostname}");
                return DnsRecordResult {
                    hostname: hostname.to_string(),
                    attempts: attempt,
                    outcome: RouteOutcome::Success,
                };
            }
            Err(err) => {
                warn!("dns route attempt {attempt}/{MAX_ATTEMPTS} for {hostname} failed: {err}");
                if attempt < MAX_ATTEMPTS {
                    sleep(retry_step * attempt).await;
                }
            }
        }
    }

    DnsRecordResult {
        hostname: hostname.to_string(),
        attempts: MAX_ATTEMPTS,
        outcome: RouteOutcome::Failed,
    }
}

fn summarize(results: &[DnsRecordResult]) {
    let failed: Vec<&str> = results
        .iter()
        .filter(|result| result.outcome == RouteOutcome::Failed)
        .map(|result| result.hostname.as_str())
        .collect();

    if failed.is_empty() {
        info!("registered {} dns routes", results.len());
    } else {
        warn!(
            "dns registration failed for {} of {} hostnames: {}",
            failed.len(),
            results.len(),
            failed.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cloudflared::TunnelIdentity,
        error::Error,
    };
    use std::sync::Mutex;

    /// Fails the first `failures` route attempts per hostname.
    struct FlakyCli {
        failures: u32,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyCli {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, hostname: &str) -> u32 {
            self.calls.lock().unwrap().iter().filter(|call| *call == hostname).count() as u32
        }
    }

    impl TunnelCli for FlakyCli {
        async fn login(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn create_tunnel(&self, _name: &str) -> Result<TunnelIdentity, Error> {
            unimplemented!("not exercised here")
        }

        async fn route_dns(&self, _tunnel_name: &str, fqdn: &str) -> Result<(), Error> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(fqdn.to_string());
            let seen = calls.iter().filter(|call| *call == fqdn).count() as u32;
            if seen <= self.failures {
                return Err(Error::Provision("transient".into()));
            }
            Ok(())
        }
    }

    fn hosts() -> HostMap {
        HostMap::from([("web.example.com".to_string(), "http://localhost:80".to_string())])
    }

    #[tokio::test]
    async fn stops_retrying_after_first_success() {
        let cli = FlakyCli::new(0);
        let results = register_routes(&cli, "edge", &hosts(), Duration::ZERO).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].attempts, 1);
        assert_eq!(results[0].outcome, RouteOutcome::Success);
        assert_eq!(cli.calls_for("web.example.com"), 1);
    }

    #[tokio::test]
    async fn succeeds_on_the_final_attempt() {
        let cli = FlakyCli::new(MAX_ATTEMPTS - 1);
        let results = register_routes(&cli, "edge", &hosts(), Duration::ZERO).await;

        assert_eq!(results[0].attempts, MAX_ATTEMPTS);
        assert_eq!(results[0].outcome, RouteOutcome::Success);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let cli = FlakyCli::new(u32::MAX);
        let results = register_routes(&cli, "edge", &hosts(), Duration::ZERO).await;

        assert_eq!(results[0].attempts, MAX_ATTEMPTS);
        assert_eq!(results[0].outcome, RouteOutcome::Failed);
        assert_eq!(cli.calls_for("web.example.com"), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn one_failed_hostname_does_not_stop_the_rest() {
        struct OneBadCli;

        impl TunnelCli for OneBadCli {
            async fn login(&self) -> Result<(), Error> {
                Ok(())
            }

            async fn create_tunnel(&self, _name: &str) -> Result<TunnelIdentity, Error> {
                unimplemented!("not exercised here")
            }

            async fn route_dns(&self, _tunnel_name: &str, fqdn: &str) -> Result<(), Error> {
                if fqdn.starts_with("bad.") {
                    return Err(Error::Provision("persistent".into()));
                }
                Ok(())
            }
        }

        let hosts = HostMap::from([
            ("bad.example.com".to_string(), "http://localhost:80".to_string()),
            ("good.example.com".to_string(), "http://localhost:80".to_string()),
        ]);
        let results = register_routes(&OneBadCli, "edge", &hosts, Duration::ZERO).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, RouteOutcome::Failed);
        assert_eq!(results[1].outcome, RouteOutcome::Success);
    }
}
