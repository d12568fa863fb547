//! Synthetic monitoring check results.
//!
//! Simulates HTTP, ping, DNS and TCP checks run from several probe regions,
//! plus the monitoring events a failing or degraded check raises. Results are
//! written to the relational store only, once per live tick.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Default probe regions.
pub const DEFAULT_PROBE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "eu-west-1",
    "eu-central-1",
    "ap-southeast-1",
    "ap-northeast-1",
];

const HTTP_FAILURE_RATE: f64 = 0.02;
const PING_FAILURE_RATE: f64 = 0.01;
const DNS_FAILURE_RATE: f64 = 0.005;
const TCP_FAILURE_RATE: f64 = 0.015;

/// Response time above which an HTTP check raises a latency warning.
pub const HIGH_LATENCY_MS: f64 = 1_000.0;

/// Packet loss above which a ping check raises a warning.
pub const PACKET_LOSS_WARNING: f64 = 10.0;

/// An HTTP endpoint to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    /// Check name.
    pub name: &'static str,
    /// Target URL.
    pub url: &'static str,
    /// Status code of a healthy response.
    pub expected_code: i32,
}

/// A host to ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingTarget {
    /// Check name.
    pub name: &'static str,
    /// Target host.
    pub host: &'static str,
}

/// A domain to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTarget {
    /// Check name.
    pub name: &'static str,
    /// Domain to resolve.
    pub domain: &'static str,
}

/// A TCP endpoint to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpTarget {
    /// Check name.
    pub name: &'static str,
    /// Target host.
    pub host: &'static str,
    /// Target port.
    pub port: i32,
}

/// HTTP checks.
pub const HTTP_TARGETS: &[HttpTarget] = &[
    HttpTarget { name: "grafana-website", url: "https://grafana.com", expected_code: 200 },
    HttpTarget { name: "api-production", url: "https://api.example.com/health", expected_code: 200 },
    HttpTarget { name: "e-commerce-site", url: "https://shop.example.com", expected_code: 200 },
    HttpTarget { name: "auth-service", url: "https://auth.example.com/status", expected_code: 200 },
];

/// Ping checks.
pub const PING_TARGETS: &[PingTarget] = &[
    PingTarget { name: "dns-server-google", host: "8.8.8.8" },
    PingTarget { name: "cdn-endpoint", host: "cdn.example.com" },
    PingTarget { name: "gateway", host: "gateway.example.com" },
];

/// DNS checks.
pub const DNS_TARGETS: &[DnsTarget] = &[
    DnsTarget { name: "website-dns", domain: "example.com" },
    DnsTarget { name: "api-dns", domain: "api.example.com" },
];

/// TCP checks.
pub const TCP_TARGETS: &[TcpTarget] = &[
    TcpTarget { name: "postgres-db", host: "db.example.com", port: 5432 },
    TcpTarget { name: "redis-cache", host: "cache.example.com", port: 6379 },
    TcpTarget { name: "https-endpoint", host: "secure.example.com", port: 443 },
];

/// Extra latency observed from a region, in milliseconds.
#[must_use]
pub fn region_latency_ms(region: &str) -> f64 {
    match region {
        "us-west-1" => 20.0,
        "eu-west-1" => 80.0,
        "eu-central-1" => 90.0,
        "ap-southeast-1" => 150.0,
        "ap-northeast-1" => 160.0,
        _ => 0.0,
    }
}

/// Result of one HTTP check from one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpCheckResult {
    /// Check time.
    pub time: DateTime<Utc>,
    /// Check name.
    pub check_name: String,
    /// Target URL.
    pub target_url: String,
    /// Probe region.
    pub probe_name: String,
    /// HTTP status, 0 when no response was received.
    pub status_code: i32,
    /// Total response time, absent when no response was received.
    pub response_time_ms: Option<f64>,
    /// Whether the check passed.
    pub success: bool,
    /// Days until the TLS certificate expires.
    pub ssl_expiry_days: Option<i32>,
    /// DNS lookup time.
    pub dns_time_ms: Option<f64>,
    /// TCP connect time.
    pub connect_time_ms: Option<f64>,
    /// Failure description.
    pub error_message: Option<String>,
}

/// Result of one ping check from one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingCheckResult {
    /// Check time.
    pub time: DateTime<Utc>,
    /// Check name.
    pub check_name: String,
    /// Target host.
    pub target_host: String,
    /// Probe region.
    pub probe_name: String,
    /// Round-trip latency.
    pub latency_ms: Option<f64>,
    /// Packet loss percentage.
    pub packet_loss: f64,
    /// Whether the check passed.
    pub success: bool,
    /// Failure description.
    pub error_message: Option<String>,
}

/// Result of one DNS check from one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsCheckResult {
    /// Check time.
    pub time: DateTime<Utc>,
    /// Check name.
    pub check_name: String,
    /// Domain resolved.
    pub target_domain: String,
    /// Probe region.
    pub probe_name: String,
    /// Resolution time.
    pub resolution_time_ms: Option<f64>,
    /// Whether the check passed.
    pub success: bool,
    /// Addresses returned.
    pub resolved_ips: Vec<String>,
    /// Failure description.
    pub error_message: Option<String>,
}

/// Result of one TCP check from one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpCheckResult {
    /// Check time.
    pub time: DateTime<Utc>,
    /// Check name.
    pub check_name: String,
    /// Target host.
    pub target_host: String,
    /// Target port.
    pub target_port: i32,
    /// Probe region.
    pub probe_name: String,
    /// Connect time.
    pub connect_time_ms: Option<f64>,
    /// Whether the check passed.
    pub success: bool,
    /// Failure description.
    pub error_message: Option<String>,
}

/// Severity of a monitoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Service-affecting.
    Critical,
    /// Degraded.
    Warning,
}

impl Severity {
    /// Column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
        }
    }
}

/// An alert raised by a check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    /// Event time, equal to the check time.
    pub time: DateTime<Utc>,
    /// Event type, e.g. `check_failed`.
    pub event_type: String,
    /// Severity.
    pub severity: Severity,
    /// Check that raised the event.
    pub check_name: String,
    /// Probe region.
    pub probe_name: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    pub details: serde_json::Value,
    /// Always `false` when generated.
    pub resolved: bool,
}

/// All probe results for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeBatch {
    /// HTTP results.
    pub http: Vec<HttpCheckResult>,
    /// Ping results.
    pub ping: Vec<PingCheckResult>,
    /// DNS results.
    pub dns: Vec<DnsCheckResult>,
    /// TCP results.
    pub tcp: Vec<TcpCheckResult>,
    /// Events raised by the results above.
    pub events: Vec<MonitoringEvent>,
}

impl ProbeBatch {
    /// Total number of rows across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.http.len() + self.ping.len() + self.dns.len() + self.tcp.len() + self.events.len()
    }

    /// Returns `true` if the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn gauss<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std_dev * z
}

fn pick<R: Rng + ?Sized, T: Copy>(rng: &mut R, options: &[T]) -> T {
    // Callers only pass non-empty constant slices.
    options.choose(rng).copied().unwrap_or(options[0])
}

fn event(
    time: DateTime<Utc>,
    event_type: &str,
    severity: Severity,
    check_name: &str,
    probe_name: &str,
    message: String,
    details: serde_json::Value,
) -> MonitoringEvent {
    MonitoringEvent {
        time,
        event_type: event_type.to_string(),
        severity,
        check_name: check_name.to_string(),
        probe_name: probe_name.to_string(),
        message,
        details,
        resolved: false,
    }
}

/// Simulates every check from every region.
#[derive(Debug, Clone)]
pub struct ProbeSimulator {
    regions: Vec<String>,
}

impl ProbeSimulator {
    /// Creates a simulator for the given regions; blank names are ignored.
    #[must_use]
    pub fn new(regions: &[String]) -> Self {
        Self {
            regions: regions
                .iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        }
    }

    /// Probe regions in use.
    #[must_use]
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Runs one round of checks at `at`.
    pub fn simulate<R: Rng + ?Sized>(&self, at: DateTime<Utc>, rng: &mut R) -> ProbeBatch {
        let mut batch = ProbeBatch::default();

        for region in &self.regions {
            for target in HTTP_TARGETS {
                Self::http(target, region, at, rng, &mut batch);
            }
            for target in PING_TARGETS {
                Self::ping(target, region, at, rng, &mut batch);
            }
            for target in DNS_TARGETS {
                Self::dns(target, region, at, rng, &mut batch);
            }
            for target in TCP_TARGETS {
                Self::tcp(target, region, at, rng, &mut batch);
            }
        }

        batch
    }

    fn http<R: Rng + ?Sized>(
        target: &HttpTarget,
        region: &str,
        at: DateTime<Utc>,
        rng: &mut R,
        batch: &mut ProbeBatch,
    ) {
        let success = !rng.gen_bool(HTTP_FAILURE_RATE);

        let (status_code, response_time, error_message) = if success {
            (target.expected_code, Some(gauss(rng, 150.0, 50.0).max(10.0)), None)
        } else {
            let (code, message) = pick(
                rng,
                &[
                    (500, "Internal Server Error"),
                    (502, "Bad Gateway"),
                    (503, "Service Unavailable"),
                    (0, "Connection timeout"),
                    (0, "DNS resolution failed"),
                ],
            );
            let response = (code > 0).then(|| rng.gen_range(5_000.0..10_000.0));
            (code, response, Some(message.to_string()))
        };

        let response_time_ms = response_time.map(|t| t + region_latency_ms(region));
        let (ssl_expiry_days, dns_time_ms, connect_time_ms) = if success {
            (
                Some(rng.gen_range(30..=365)),
                Some(gauss(rng, 20.0, 10.0).max(5.0)),
                Some(gauss(rng, 50.0, 20.0).max(10.0)),
            )
        } else {
            (None, None, None)
        };

        if let Some(message) = &error_message {
            batch.events.push(event(
                at,
                "check_failed",
                Severity::Critical,
                target.name,
                region,
                format!("HTTP check failed: {message}"),
                json!({ "url": target.url, "status_code": status_code }),
            ));
        } else if let Some(t) = response_time_ms.filter(|t| *t > HIGH_LATENCY_MS) {
            batch.events.push(event(
                at,
                "high_latency",
                Severity::Warning,
                target.name,
                region,
                format!("High response time: {t:.0}ms"),
                json!({ "url": target.url, "response_time": t }),
            ));
        }

        batch.http.push(HttpCheckResult {
            time: at,
            check_name: target.name.to_string(),
            target_url: target.url.to_string(),
            probe_name: region.to_string(),
            status_code,
            response_time_ms,
            success,
            ssl_expiry_days,
            dns_time_ms,
            connect_time_ms,
            error_message,
        });
    }

    fn ping<R: Rng + ?Sized>(
        target: &PingTarget,
        region: &str,
        at: DateTime<Utc>,
        rng: &mut R,
        batch: &mut ProbeBatch,
    ) {
        let success = !rng.gen_bool(PING_FAILURE_RATE);

        let (latency_ms, packet_loss, error_message) = if success {
            (
                Some(gauss(rng, 30.0, 15.0).max(1.0)),
                pick(rng, &[0.0, 0.0, 0.0, 0.0, 0.1, 0.5]),
                None,
            )
        } else {
            let message = pick(
                rng,
                &["Request timeout", "Host unreachable", "Network unreachable"],
            );
            (None, rng.gen_range(50.0..100.0), Some(message.to_string()))
        };

        if !success || packet_loss > PACKET_LOSS_WARNING {
            let severity = if success {
                Severity::Warning
            } else {
                Severity::Critical
            };
            let issue = error_message
                .clone()
                .unwrap_or_else(|| format!("{packet_loss}% packet loss"));
            batch.events.push(event(
                at,
                "ping_failed",
                severity,
                target.name,
                region,
                format!("Ping check issue: {issue}"),
                json!({ "host": target.host, "packet_loss": packet_loss }),
            ));
        }

        batch.ping.push(PingCheckResult {
            time: at,
            check_name: target.name.to_string(),
            target_host: target.host.to_string(),
            probe_name: region.to_string(),
            latency_ms,
            packet_loss,
            success,
            error_message,
        });
    }

    fn dns<R: Rng + ?Sized>(
        target: &DnsTarget,
        region: &str,
        at: DateTime<Utc>,
        rng: &mut R,
        batch: &mut ProbeBatch,
    ) {
        let success = !rng.gen_bool(DNS_FAILURE_RATE);

        let (resolution_time_ms, resolved_ips, error_message) = if success {
            let count = rng.gen_range(1..=3);
            let ips = (0..count)
                .map(|_| {
                    format!(
                        "{}.{}.{}.{}",
                        rng.gen_range(1..=223),
                        rng.r#gen::<u8>(),
                        rng.r#gen::<u8>(),
                        rng.gen_range(1..=254)
                    )
                })
                .collect();
            (Some(gauss(rng, 25.0, 10.0).max(5.0)), ips, None)
        } else {
            let message = pick(rng, &["NXDOMAIN", "SERVFAIL", "Timeout"]);
            batch.events.push(event(
                at,
                "dns_failed",
                Severity::Critical,
                target.name,
                region,
                format!("DNS resolution failed: {message}"),
                json!({ "domain": target.domain }),
            ));
            (None, Vec::new(), Some(message.to_string()))
        };

        batch.dns.push(DnsCheckResult {
            time: at,
            check_name: target.name.to_string(),
            target_domain: target.domain.to_string(),
            probe_name: region.to_string(),
            resolution_time_ms,
            success,
            resolved_ips,
            error_message,
        });
    }

    fn tcp<R: Rng + ?Sized>(
        target: &TcpTarget,
        region: &str,
        at: DateTime<Utc>,
        rng: &mut R,
        batch: &mut ProbeBatch,
    ) {
        let success = !rng.gen_bool(TCP_FAILURE_RATE);

        let (connect_time_ms, error_message) = if success {
            (Some(gauss(rng, 40.0, 20.0).max(5.0)), None)
        } else {
            let message = pick(
                rng,
                &["Connection refused", "Connection timeout", "Network unreachable"],
            );
            batch.events.push(event(
                at,
                "tcp_failed",
                Severity::Critical,
                target.name,
                region,
                format!("TCP connection failed: {message}"),
                json!({ "host": target.host, "port": target.port }),
            ));
            (None, Some(message.to_string()))
        };

        batch.tcp.push(TcpCheckResult {
            time: at,
            check_name: target.name.to_string(),
            target_host: target.host.to_string(),
            target_port: target.port,
            probe_name: region.to_string(),
            connect_time_ms,
            success,
            error_message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()
    }

    fn default_regions() -> Vec<String> {
        DEFAULT_PROBE_REGIONS.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn one_result_per_check_and_region() {
        let simulator = ProbeSimulator::new(&default_regions());
        let batch = simulator.simulate(at(), &mut StdRng::seed_from_u64(5));

        assert_eq!(batch.http.len(), HTTP_TARGETS.len() * 6);
        assert_eq!(batch.ping.len(), PING_TARGETS.len() * 6);
        assert_eq!(batch.dns.len(), DNS_TARGETS.len() * 6);
        assert_eq!(batch.tcp.len(), TCP_TARGETS.len() * 6);
        assert!(batch.http.iter().all(|r| r.time == at()));
    }

    #[test]
    fn blank_regions_are_ignored() {
        let simulator = ProbeSimulator::new(&["us-east-1".to_string(), " ".to_string()]);
        assert_eq!(simulator.regions(), ["us-east-1".to_string()]);
    }

    #[test]
    fn region_latency_table() {
        assert!((region_latency_ms("us-east-1")).abs() < f64::EPSILON);
        assert!((region_latency_ms("ap-northeast-1") - 160.0).abs() < f64::EPSILON);
        assert!((region_latency_ms("unknown")).abs() < f64::EPSILON);
    }

    #[test]
    fn results_are_internally_consistent() {
        let simulator = ProbeSimulator::new(&default_regions());
        let mut rng = StdRng::seed_from_u64(17);

        for _ in 0..200 {
            let batch = simulator.simulate(at(), &mut rng);

            for r in &batch.http {
                assert_eq!(r.success, r.error_message.is_none());
                if r.success {
                    assert_eq!(r.status_code, 200);
                    assert!(r.response_time_ms.is_some_and(|t| t >= 10.0));
                    assert!(r.ssl_expiry_days.is_some_and(|d| (30..=365).contains(&d)));
                } else {
                    assert_eq!(r.response_time_ms.is_some(), r.status_code > 0);
                }
            }
            for r in &batch.ping {
                assert_eq!(r.success, r.latency_ms.is_some());
                assert!((0.0..=100.0).contains(&r.packet_loss));
            }
            for r in &batch.dns {
                if r.success {
                    assert!((1..=3).contains(&r.resolved_ips.len()));
                } else {
                    assert!(r.resolved_ips.is_empty());
                }
            }
            for r in &batch.tcp {
                assert_eq!(r.success, r.connect_time_ms.is_some());
            }
        }
    }

    #[test]
    fn failures_raise_events() {
        let simulator = ProbeSimulator::new(&default_regions());
        let mut rng = StdRng::seed_from_u64(23);

        let mut failures = 0;
        let mut critical = 0;
        for _ in 0..200 {
            let batch = simulator.simulate(at(), &mut rng);
            failures += batch.http.iter().filter(|r| !r.success).count()
                + batch.ping.iter().filter(|r| !r.success).count()
                + batch.dns.iter().filter(|r| !r.success).count()
                + batch.tcp.iter().filter(|r| !r.success).count();
            critical += batch
                .events
                .iter()
                .filter(|e| e.severity == Severity::Critical)
                .count();
            assert!(batch.events.iter().all(|e| !e.resolved));
        }

        assert!(failures > 0);
        assert_eq!(failures, critical);
    }

    #[test]
    fn resolved_ips_are_valid_ipv4() {
        let simulator = ProbeSimulator::new(&default_regions());
        let mut rng = StdRng::seed_from_u64(5);

        let mut seen = 0;
        for _ in 0..50 {
            for r in simulator.simulate(at(), &mut rng).dns {
                for ip in &r.resolved_ips {
                    let addr: std::net::Ipv4Addr = ip.parse().unwrap();
                    let [first, .., last] = addr.octets();
                    assert!((1..=223).contains(&first), "{ip}");
                    assert!((1..=254).contains(&last), "{ip}");
                    seen += 1;
                }
            }
        }
        assert!(seen > 0);
    }

    #[test]
    fn batch_len_counts_all_tables() {
        let simulator = ProbeSimulator::new(&["us-east-1".to_string()]);
        let batch = simulator.simulate(at(), &mut StdRng::seed_from_u64(1));
        assert_eq!(batch.len(), 12 + batch.events.len());
        assert!(!batch.is_empty());
        assert!(ProbeBatch::default().is_empty());
    }
}
