//! Admission Policy (§4.4): the Willing status cache, the global Unwilling
//! rate limit, and the ordered rule chain a Request is checked against.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    process::Command,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::session::SessionTable;

/// Willing status is recomputed at most this often (§4.4, §5).
pub const WILLING_CACHE_TTL: Duration = Duration::from_secs(3);

/// Unwilling is suppressed within this long of the previous one (§5 (d)).
pub const UNWILLING_INTERVAL: Duration = Duration::from_secs(1);

/// Longest first line of `willing_script` output we'll embed (§4.4).
const WILLING_STATUS_MAX_LEN: usize = 255;

const BUSY_SUFFIX: &str = " (Server is busy)";

/// Why a Request was refused (§4.4, §7). The string is the wire-exact ASCII
/// reason the spec names for each rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    WrongAuthorization,
    TooManySessions,
    TooManyFromHost,
    TooManyPending,
}

impl DeclineReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::WrongAuthorization => "Only MIT-MAGIC-COOKIE-1 supported",
            Self::TooManySessions => "Maximum number of open sessions reached",
            Self::TooManyFromHost => "Maximum number of open sessions from your host reached",
            Self::TooManyPending => "Maximum pending servers",
        }
    }
}

/// Quotas the admission chain checks (§6.2).
#[derive(Debug, Clone, Copy)]
pub struct Quotas {
    pub max_displays: usize,
    pub max_displays_per_host: usize,
    pub max_pending_displays: usize,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_displays: 16,
            max_displays_per_host: 2,
            max_pending_displays: 4,
        }
    }
}

/// Applies §4.4 rules 2-5 in order (rule 1, the host ACL, is checked by the
/// dispatcher before admission is even consulted, since its failure mode
/// differs per opcode).
pub fn admit(
    sessions: &SessionTable,
    quotas: &Quotas,
    client: &SocketAddr,
    client_is_local: bool,
    offers_mit_magic_cookie: bool,
) -> Result<(), DeclineReason> {
    if !offers_mit_magic_cookie {
        return Err(DeclineReason::WrongAuthorization);
    }

    if sessions.num_sessions() >= quotas.max_displays {
        return Err(DeclineReason::TooManySessions);
    }

    if !client_is_local && sessions.managed_count_for_host(client) >= quotas.max_displays_per_host {
        return Err(DeclineReason::TooManyFromHost);
    }

    if sessions.num_pending() >= quotas.max_pending_displays {
        return Err(DeclineReason::TooManyPending);
    }

    Ok(())
}

/// Runs `willing_script`, truncating its stdout to the first line and
/// [`WILLING_STATUS_MAX_LEN`] bytes (§4.4). Any failure to spawn, a
/// non-zero exit, or non-UTF8 output falls back silently to `None` so the
/// caller can use the sysid instead — the spec gives the remote peer no
/// visibility into *why* the advisory status is what it is.
fn run_willing_script(path: &Path) -> Option<String> {
    let output = Command::new(path).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8(output.stdout).ok()?;
    let first_line = stdout.lines().next()?.trim_end();
    Some(first_line.chars().take(WILLING_STATUS_MAX_LEN).collect())
}

/// The Willing status string, refreshed at most every [`WILLING_CACHE_TTL`]
/// (§4.4, §5 (e)).
#[derive(Default)]
pub struct WillingCache(Mutex<Option<(String, Instant)>>);

impl WillingCache {
    /// Returns the cached status if still fresh, otherwise recomputes it
    /// from `willing_script` (falling back to `sysid`) and appends the
    /// busy suffix when the caller reports the host is over its per-host
    /// quota.
    pub fn get(
        &self,
        now: Instant,
        sysid: &str,
        willing_script: Option<&PathBuf>,
        suffix_busy: bool,
    ) -> String {
        let mut cache = self.0.lock();

        let base = match cache.as_ref() {
            Some((status, stamped)) if now.saturating_duration_since(*stamped) < WILLING_CACHE_TTL => {
                status.clone()
            }
            _ => {
                let status = willing_script
                    .and_then(|path| run_willing_script(path))
                    .unwrap_or_else(|| sysid.to_string());
                *cache = Some((status.clone(), now));
                status
            }
        };

        if suffix_busy {
            format!("{base}{BUSY_SUFFIX}")
        } else {
            base
        }
    }
}

/// Enforces §5 (d): Unwilling is sent at most once per second, globally.
#[derive(Default)]
pub struct UnwillingLimiter(Mutex<Option<Instant>>);

impl UnwillingLimiter {
    /// Returns whether an Unwilling may be sent now; if so, records `now`
    /// as the last-sent time.
    pub fn allow(&self, now: Instant) -> bool {
        let mut last = self.0.lock();
        let allowed = match *last {
            Some(prev) => now.saturating_duration_since(prev) >= UNWILLING_INTERVAL,
            None => true,
        };

        if allowed {
            *last = Some(now);
        }

        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DisplayKind;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn rejects_wrong_authorization_before_quotas() {
        let sessions = SessionTable::default();
        let err = admit(&sessions, &Quotas::default(), &addr("192.0.2.5:4000"), false, false)
            .unwrap_err();
        assert_eq!(err, DeclineReason::WrongAuthorization);
    }

    #[test]
    fn rejects_past_global_quota() {
        let sessions = SessionTable::default();
        let quotas = Quotas {
            max_displays: 1,
            ..Quotas::default()
        };
        let d = sessions.allocate(
            addr("192.0.2.9:4000"),
            "192.0.2.9".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            Instant::now(),
        );
        sessions.promote(d.session_id).unwrap();

        let err = admit(&sessions, &quotas, &addr("192.0.2.10:4000"), false, true).unwrap_err();
        assert_eq!(err, DeclineReason::TooManySessions);
    }

    #[test]
    fn per_host_quota_is_skipped_for_local_origin() {
        let sessions = SessionTable::default();
        let quotas = Quotas {
            max_displays_per_host: 1,
            ..Quotas::default()
        };
        let host = addr("127.0.0.1:4000");
        let d = sessions.allocate(
            host,
            "localhost".into(),
            vec![],
            7,
            DisplayKind::Xdmcp,
            [0; 16],
            Instant::now(),
        );
        sessions.promote(d.session_id).unwrap();

        assert!(admit(&sessions, &quotas, &host, true, true).is_ok());
    }

    #[test]
    fn unwilling_limiter_suppresses_within_one_second() {
        let limiter = UnwillingLimiter::default();
        let now = Instant::now();
        assert!(limiter.allow(now));
        assert!(!limiter.allow(now + Duration::from_millis(500)));
        assert!(limiter.allow(now + Duration::from_millis(1000)));
    }

    #[test]
    fn willing_cache_reuses_within_ttl_and_appends_busy_suffix() {
        let cache = WillingCache::default();
        let now = Instant::now();
        let first = cache.get(now, "myhost", None, false);
        assert_eq!(first, "myhost");

        let busy = cache.get(now + Duration::from_secs(1), "myhost", None, true);
        assert_eq!(busy, "myhost (Server is busy)");
    }
}
