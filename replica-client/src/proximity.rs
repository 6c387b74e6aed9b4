//! Latency probing and closest-replica selection.

use std::{
    future::Future,
    time::{Duration, Instant},
};

use futures::future::try_join_all;
use tokio::{net::TcpStream, process::Command, time::timeout};
use tracing::{debug, info};

use crate::{
    command::ReplicaId,
    error::{ClientError, Result},
    topology::{dial_address, host_of},
};

/// Measures a comparable latency, in milliseconds, to one replica address.
pub trait LatencyProbe: Send + Sync {
    fn probe(&self, address: &str) -> impl Future<Output = Result<f64>> + Send;
}

/// Average ICMP round trip reported by the system `ping`.
#[derive(Debug, Clone)]
pub struct PingProbe {
    pub samples: u32,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self { samples: 3 }
    }
}

impl LatencyProbe for PingProbe {
    async fn probe(&self, address: &str) -> Result<f64> {
        let host = host_of(address);
        let output = Command::new("ping")
            .arg(host)
            .arg("-c")
            .arg(self.samples.to_string())
            .arg("-q")
            .output()
            .await
            .map_err(|err| probe_error(address, err))?;

        if !output.status.success() {
            return Err(probe_error(
                address,
                format!("ping exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ping_latency(&stdout)
            .ok_or_else(|| probe_error(address, "unrecognised ping summary"))
    }
}

/// Average TCP handshake time to the replica port.
///
/// Useful where ICMP is filtered; the replica sees short-lived connections.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    pub samples: u32,
    pub timeout: Duration,
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self {
            samples: 3,
            timeout: Duration::from_secs(2),
        }
    }
}

impl LatencyProbe for TcpConnectProbe {
    async fn probe(&self, address: &str) -> Result<f64> {
        let target = dial_address(address);
        let samples = self.samples.max(1);
        let mut total = Duration::ZERO;

        for _ in 0..samples {
            let started = Instant::now();
            match timeout(self.timeout, TcpStream::connect(&target)).await {
                Ok(Ok(stream)) => {
                    total += started.elapsed();
                    drop(stream);
                }
                Ok(Err(err)) => return Err(probe_error(address, err)),
                Err(_) => {
                    return Err(probe_error(
                        address,
                        format!("no connection within {:?}", self.timeout),
                    ));
                }
            }
        }

        Ok(total.as_secs_f64() * 1000.0 / f64::from(samples))
    }
}

/// Extracts the average from a `ping -q` summary such as
/// `rtt min/avg/max/mdev = 0.045/0.058/0.071/0.010 ms`.
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    output.split('/').nth(4)?.trim().parse().ok()
}

/// Index of the smallest latency. Ties keep the lowest index; NaN never wins.
pub fn closest_index(latencies: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, &latency) in latencies.iter().enumerate() {
        if latency.is_nan() {
            continue;
        }
        match best {
            Some((_, min)) if latency >= min => {}
            _ => best = Some((index, latency)),
        }
    }
    best.map(|(index, _)| index)
}

/// Probes every address and returns the id of the closest replica.
///
/// Any probe failure is fatal: without proximity there is no read routing.
pub async fn select_closest<P>(addresses: &[String], probe: &P) -> Result<ReplicaId>
where
    P: LatencyProbe,
{
    let latencies = try_join_all(addresses.iter().map(|address| probe.probe(address))).await?;

    for (replica, (address, latency_ms)) in addresses.iter().zip(&latencies).enumerate() {
        debug!(replica, %address, latency_ms, "probed replica");
    }

    let closest = closest_index(&latencies).ok_or_else(|| {
        ClientError::Topology("no replica produced a usable latency".to_string())
    })?;
    info!(
        closest,
        latency_ms = latencies[closest],
        "selected closest replica"
    );
    Ok(closest)
}

fn probe_error(address: &str, reason: impl ToString) -> ClientError {
    ClientError::Probe {
        addr: address.to_string(),
        reason: reason.to_string(),
    }
}
