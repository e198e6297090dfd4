//! Whitelist, blocklist, and sliding-window rate limiting.
//!
//! The whitelist and blocklist are immutable `Vec<CidrEntry>` loaded once at
//! startup. The rate-limit window and temporary blocks are the only mutable
//! state in the gateway's admission path and live behind [`DashMap`]s so
//! concurrent admissions serialize per shard rather than behind one global
//! lock; admission runs once per new connection, not on the hot byte-forwarding
//! path, so this is more concurrency than strictly required, not less.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::addr::{self, CidrEntry};
use crate::error::AdmissionError;

/// Outcome of [`IpFilter::should_allow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub whitelisted: bool,
    pub reason: Option<String>,
}

impl Decision {
    fn allow() -> Self {
        Decision { allowed: true, whitelisted: false, reason: None }
    }

    fn allow_whitelisted() -> Self {
        Decision { allowed: true, whitelisted: true, reason: None }
    }

    fn deny(err: AdmissionError) -> Self {
        Decision { allowed: false, whitelisted: false, reason: Some(err.reason()) }
    }
}

#[derive(Debug, Clone)]
struct TemporaryBlockEntry {
    reason: String,
    blocked_until: Instant,
}

/// Tunables mirrored 1:1 from the `RATE_LIMIT_*` / blocklist environment
/// variables in [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct IpFilterConfig {
    pub rate_limit_enabled: bool,
    pub max_connections_per_window: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

/// Observability snapshot returned by [`IpFilter::stats`].
#[derive(Debug, Clone)]
pub struct IpFilterStats {
    pub whitelist_len: usize,
    pub blocklist_len: usize,
    pub tracked_ips: usize,
    pub temporarily_blocked: usize,
}

pub struct IpFilter {
    whitelist: Vec<CidrEntry>,
    blocklist: Vec<CidrEntry>,
    config: IpFilterConfig,
    rate_state: DashMap<String, VecDeque<Instant>>,
    temporary_blocks: DashMap<String, TemporaryBlockEntry>,
}

impl IpFilter {
    pub fn new(whitelist: Vec<CidrEntry>, blocklist: Vec<CidrEntry>, config: IpFilterConfig) -> Self {
        IpFilter {
            whitelist,
            blocklist,
            config,
            rate_state: DashMap::new(),
            temporary_blocks: DashMap::new(),
        }
    }

    /// Loads a whitelist/blocklist file: UTF-8, one entry per line, leading
    /// and trailing whitespace trimmed, blank lines and `#`-comments
    /// skipped.
    pub fn load_entries(path: &Path) -> anyhow::Result<Vec<CidrEntry>> {
        let contents = fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(addr::parse_cidr)
            .collect())
    }

    /// Runs the full admission algorithm — whitelist, permanent blocklist,
    /// temporary block, rate limit, in that order — for a single
    /// canonical-form-pending IP address.
    ///
    /// Never mutates rate-limit state for a whitelisted IP.
    pub fn should_allow(&self, ip: &str) -> Decision {
        if ip.is_empty() {
            return Decision::deny(AdmissionError::InvalidAddress);
        }

        let ip = addr::normalize(ip);

        if self.is_whitelisted(&ip) {
            return Decision::allow_whitelisted();
        }

        if self.is_permanently_blocked(&ip) {
            return Decision::deny(AdmissionError::Blocklisted);
        }

        if let Some(reason) = self.temporarily_blocked_reason(&ip) {
            return Decision::deny(AdmissionError::TemporarilyBlocked(reason));
        }

        if self.config.rate_limit_enabled {
            if let Some(count) = self.record_attempt(&ip) {
                if count > self.config.max_connections_per_window as usize {
                    let reason = format!(
                        "Rate limit exceeded: {count} in {}ms",
                        self.config.window.as_millis()
                    );
                    self.block_ip(&ip, self.config.block_duration, reason);
                    return Decision::deny(AdmissionError::RateLimited);
                }
            }
        }

        Decision::allow()
    }

    fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist.iter().any(|entry| addr::matches(ip, entry))
    }

    fn is_permanently_blocked(&self, ip: &str) -> bool {
        self.blocklist.iter().any(|entry| addr::matches(ip, entry))
    }

    /// Returns the stored reason if `ip` is still within its temporary
    /// block window, purging the entry if it has expired.
    fn temporarily_blocked_reason(&self, ip: &str) -> Option<String> {
        let now = Instant::now();
        let expired = self
            .temporary_blocks
            .get(ip)
            .map(|entry| now >= entry.blocked_until)
            .unwrap_or(false);

        if expired {
            self.temporary_blocks.remove(ip);
            return None;
        }

        self.temporary_blocks.get(ip).map(|entry| entry.reason.clone())
    }

    /// Appends `now` to the IP's timestamp list, prunes entries older than
    /// the window, and returns the resulting count.
    fn record_attempt(&self, ip: &str) -> Option<usize> {
        let now = Instant::now();
        let window = self.config.window;

        let mut entry = self.rate_state.entry(ip.to_string()).or_default();
        entry.push_back(now);
        while matches!(entry.front(), Some(ts) if now.duration_since(*ts) > window) {
            entry.pop_front();
        }
        Some(entry.len())
    }

    fn block_ip(&self, ip: &str, duration: Duration, reason: String) {
        warn!(ip, reason = %reason, "temporarily blocking IP");
        self.temporary_blocks.insert(
            ip.to_string(),
            TemporaryBlockEntry { reason, blocked_until: Instant::now() + duration },
        );
    }

    /// Prunes expired rate-limit windows and temporary blocks. Intended to
    /// be called once a minute by [`crate::supervisor::Supervisor`]'s
    /// janitor task.
    pub fn run_janitor_pass(&self) {
        let now = Instant::now();
        let window = self.config.window;

        self.rate_state.retain(|_, timestamps| {
            while matches!(timestamps.front(), Some(ts) if now.duration_since(*ts) > window) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });

        self.temporary_blocks.retain(|_, entry| now < entry.blocked_until);
    }

    pub fn stats(&self) -> IpFilterStats {
        IpFilterStats {
            whitelist_len: self.whitelist.len(),
            blocklist_len: self.blocklist.len(),
            tracked_ips: self.rate_state.len(),
            temporarily_blocked: self.temporary_blocks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn filter(whitelist: &[&str], blocklist: &[&str], cfg: IpFilterConfig) -> IpFilter {
        IpFilter::new(
            whitelist.iter().map(|s| addr::parse_cidr(s)).collect(),
            blocklist.iter().map(|s| addr::parse_cidr(s)).collect(),
            cfg,
        )
    }

    fn default_cfg() -> IpFilterConfig {
        IpFilterConfig {
            rate_limit_enabled: true,
            max_connections_per_window: 3,
            window: Duration::from_millis(60_000),
            block_duration: Duration::from_millis(10_000),
        }
    }

    #[test]
    fn empty_ip_is_invalid() {
        let f = filter(&[], &[], default_cfg());
        let d = f.should_allow("");
        assert!(!d.allowed);
        assert_eq!(d.reason.as_deref(), Some("Invalid IP address"));
    }

    #[test]
    fn whitelist_bypasses_everything_and_does_not_record() {
        let f = filter(&["10.0.0.0/8"], &["10.1.2.3"], default_cfg());
        let d = f.should_allow("10.1.2.3");
        assert!(d.allowed);
        assert!(d.whitelisted);
        assert_eq!(f.stats().tracked_ips, 0);
    }

    #[test]
    fn blocklist_cidr_denies_in_range_allows_outside() {
        let f = filter(&[], &["10.0.0.0/24"], default_cfg());
        let denied = f.should_allow("10.0.0.50");
        assert!(!denied.allowed);
        assert_eq!(denied.reason.as_deref(), Some("IP in blocklist"));

        let allowed = f.should_allow("10.0.1.1");
        assert!(allowed.allowed);
    }

    #[test]
    fn rate_limit_allows_exactly_max_then_denies() {
        let f = filter(&[], &[], default_cfg());
        for _ in 0..3 {
            assert!(f.should_allow("198.51.100.9").allowed);
        }
        let fourth = f.should_allow("198.51.100.9");
        assert!(!fourth.allowed);
        assert_eq!(fourth.reason.as_deref(), Some("Rate limit exceeded"));
    }

    #[test]
    fn fifth_attempt_reason_includes_count_and_window() {
        let f = filter(&[], &[], default_cfg());
        for _ in 0..4 {
            f.should_allow("198.51.100.9");
        }
        let fifth = f.should_allow("198.51.100.9");
        assert!(!fifth.allowed);
        assert_eq!(fifth.reason.as_deref(), Some("Rate limit exceeded: 4 in 60000ms"));
    }

    #[test]
    fn temporary_block_expires() {
        let cfg = IpFilterConfig {
            rate_limit_enabled: true,
            max_connections_per_window: 1,
            window: Duration::from_millis(60_000),
            block_duration: Duration::from_millis(20),
        };
        let f = filter(&[], &[], cfg);
        assert!(f.should_allow("203.0.113.1").allowed);
        let second = f.should_allow("203.0.113.1");
        assert!(!second.allowed);

        sleep(Duration::from_millis(40));
        let third = f.should_allow("203.0.113.1");
        assert!(third.allowed, "expired temporary block must not deny");
    }

    #[test]
    fn normalizes_ipv4_mapped_addresses_before_matching() {
        let f = filter(&[], &["10.0.0.0/24"], default_cfg());
        let denied = f.should_allow("::ffff:10.0.0.50");
        assert!(!denied.allowed);
    }

    #[test]
    fn load_entries_skips_blank_lines_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "# comment").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "10.0.0.0/8").unwrap();
        writeln!(file, "  203.0.113.5  ").unwrap();

        let entries = IpFilter::load_entries(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| addr::matches("10.1.2.3", e)));
        assert!(entries.iter().any(|e| addr::matches("203.0.113.5", e)));
    }

    #[test]
    fn janitor_removes_empty_rate_state_and_expired_blocks() {
        let cfg = IpFilterConfig {
            rate_limit_enabled: true,
            max_connections_per_window: 0,
            window: Duration::from_millis(10),
            block_duration: Duration::from_millis(10),
        };
        let f = filter(&[], &[], cfg);
        f.should_allow("192.0.2.9");
        sleep(Duration::from_millis(30));
        f.run_janitor_pass();
        assert_eq!(f.stats().tracked_ips, 0);
        assert_eq!(f.stats().temporarily_blocked, 0);
    }
}
