use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SupervisorError;

pub const MAX_PROBE_ATTEMPTS: u32 = 30;
pub const PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const PROBE_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const LISTENER_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const INTERRUPT_POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_PROBE_ATTEMPTS,
            interval: PROBE_INTERVAL,
            attempt_timeout: PROBE_ATTEMPT_TIMEOUT,
        }
    }
}

/// One readiness attempt. Anything short of a healthy answer counts as a failed attempt.
pub trait HealthCheck: Send + Sync {
    fn check(&self, timeout: Duration) -> bool;
}

impl<F> HealthCheck for F
where
    F: Fn(Duration) -> bool + Send + Sync,
{
    fn check(&self, timeout: Duration) -> bool {
        self(timeout)
    }
}

pub struct HttpHealthCheck {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpHealthCheck {
    pub fn new(url: impl Into<String>) -> Result<Self, SupervisorError> {
        let client = reqwest::blocking::Client::builder()
            .no_proxy()
            .build()
            .map_err(|error| {
                SupervisorError::Unknown(format!("Failed to build health check client: {error}"))
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthCheck for HttpHealthCheck {
    fn check(&self, timeout: Duration) -> bool {
        match self.client.get(&self.url).timeout(timeout).send() {
            Ok(response) => {
                let status = response.status();
                if status != reqwest::StatusCode::OK {
                    debug!(url = %self.url, %status, "health check answered without 200");
                }
                status == reqwest::StatusCode::OK
            }
            Err(error) => {
                debug!(url = %self.url, %error, "health check failed");
                false
            }
        }
    }
}

/// Whether something already accepts connections on the backend port.
pub trait PortListenerCheck: Send + Sync {
    fn has_listener(&self, port: u16) -> bool;
}

impl<F> PortListenerCheck for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn has_listener(&self, port: u16) -> bool {
        self(port)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpListenerCheck;

impl PortListenerCheck for TcpListenerCheck {
    fn has_listener(&self, port: u16) -> bool {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        TcpStream::connect_timeout(&address, LISTENER_CONNECT_TIMEOUT).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32 },
    Interrupted { attempts: u32 },
}

pub struct ReadinessProber<'a> {
    check: &'a dyn HealthCheck,
    policy: ProbePolicy,
}

impl<'a> ReadinessProber<'a> {
    pub fn new(check: &'a dyn HealthCheck, policy: ProbePolicy) -> Self {
        Self { check, policy }
    }

    /// Polls until the first healthy answer, the attempt budget runs out, or
    /// `interrupted` reports that the sequence should stop waiting.
    pub fn wait_until_ready(
        &self,
        mut interrupted: impl FnMut() -> bool,
    ) -> Result<ProbeOutcome, SupervisorError> {
        for attempt in 1..=self.policy.max_attempts {
            if interrupted() {
                return Ok(ProbeOutcome::Interrupted {
                    attempts: attempt - 1,
                });
            }

            if self.check.check(self.policy.attempt_timeout) {
                info!(attempt, "backend answered its health check");
                return Ok(ProbeOutcome::Ready { attempts: attempt });
            }
            debug!(attempt, max = self.policy.max_attempts, "backend not ready yet");

            if attempt < self.policy.max_attempts && self.sleep_interval(&mut interrupted) {
                return Ok(ProbeOutcome::Interrupted { attempts: attempt });
            }
        }

        Err(SupervisorError::ReadinessTimeout {
            attempts: self.policy.max_attempts,
        })
    }

    fn sleep_interval(&self, interrupted: &mut impl FnMut() -> bool) -> bool {
        let mut remaining = self.policy.interval;
        while !remaining.is_zero() {
            let slice = remaining.min(INTERRUPT_POLL_SLICE);
            thread::sleep(slice);
            remaining -= slice;
            if interrupted() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> ProbePolicy {
        ProbePolicy {
            interval: Duration::ZERO,
            ..ProbePolicy::default()
        }
    }

    fn succeeds_on(attempt: u32, calls: &AtomicU32) -> impl Fn(Duration) -> bool + Send + Sync + '_ {
        move |_| calls.fetch_add(1, Ordering::SeqCst) + 1 >= attempt
    }

    #[test]
    fn default_policy_matches_backend_budget() {
        let policy = ProbePolicy::default();
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(1));
    }

    #[test]
    fn first_success_stops_polling() {
        let calls = AtomicU32::new(0);
        let check = succeeds_on(1, &calls);
        let outcome = ReadinessProber::new(&check, fast_policy())
            .wait_until_ready(|| false)
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Ready { attempts: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn succeeds_on_the_last_permitted_attempt() {
        let calls = AtomicU32::new(0);
        let check = succeeds_on(30, &calls);
        let outcome = ReadinessProber::new(&check, fast_policy())
            .wait_until_ready(|| false)
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Ready { attempts: 30 });
    }

    #[test]
    fn times_out_after_thirty_failed_attempts() {
        let calls = AtomicU32::new(0);
        let check = |_: Duration| {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        };
        match ReadinessProber::new(&check, fast_policy()).wait_until_ready(|| false) {
            Err(SupervisorError::ReadinessTimeout { attempts }) => assert_eq!(attempts, 30),
            other => panic!("expected ReadinessTimeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn interrupt_ends_polling_between_attempts() {
        let calls = AtomicU32::new(0);
        let check = |_: Duration| {
            calls.fetch_add(1, Ordering::SeqCst);
            false
        };
        let outcome = ReadinessProber::new(&check, fast_policy())
            .wait_until_ready(|| calls.load(Ordering::SeqCst) >= 4)
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Interrupted { attempts: 4 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn interrupt_cuts_the_delay_short() {
        let check = |_: Duration| false;
        let policy = ProbePolicy {
            interval: Duration::from_secs(10),
            ..ProbePolicy::default()
        };
        let mut polls = 0;
        let started = std::time::Instant::now();
        let outcome = ReadinessProber::new(&check, policy)
            .wait_until_ready(|| {
                polls += 1;
                polls > 3
            })
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Interrupted { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn detects_an_existing_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(TcpListenerCheck.has_listener(port));

        drop(listener);
        assert!(!TcpListenerCheck.has_listener(port));
    }

    fn serve_once(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buffer = [0u8; 1024];
                let _ = stream.read(&mut buffer);
                let response =
                    format!("{status_line}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[test]
    fn http_check_requires_status_200() {
        let healthy = serve_once("HTTP/1.1 200 OK");
        let check =
            HttpHealthCheck::new(format!("http://127.0.0.1:{healthy}/api/disk/health")).unwrap();
        assert!(check.check(Duration::from_secs(2)));

        let unavailable = serve_once("HTTP/1.1 503 Service Unavailable");
        let check =
            HttpHealthCheck::new(format!("http://127.0.0.1:{unavailable}/api/disk/health"))
                .unwrap();
        assert!(!check.check(Duration::from_secs(2)));
    }

    #[test]
    fn http_check_fails_without_a_server() {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let check = HttpHealthCheck::new(format!("http://127.0.0.1:{port}/api/disk/health")).unwrap();
        assert!(!check.check(Duration::from_millis(500)));
    }
}
