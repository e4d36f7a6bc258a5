//! HTTP liveness probing with a per-listener result cache

use async_trait::async_trait;
use cached::stores::UnboundCache;
use cached::Cached;
use std::collections::HashSet;
use std::error::Error as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Command names never surfaced, as lsof prints them (truncated to 9 chars)
pub const IGNORED_COMMANDS: &[&str] = &[
    "rapportd",
    "ControlCe",
    "sharingd",
    "coreaudio",
    "kdc",
    "IdentityS",
    "systemmd",
    "loginwind",
    "AirPlayUX",
    "Reminders",
    "Siri",
    "assistant",
];

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// What a single HEAD request observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Status(u16),
    /// Bytes came back but they were not an HTTP response
    Malformed,
    /// Refused, reset or timed out
    Unreachable,
}

impl ProbeOutcome {
    /// Map to the classification value; 0 hides the listener.
    pub fn classify(self) -> u16 {
        match self {
            // Endpoints that actively refuse us are noise
            ProbeOutcome::Status(401 | 403) => 0,
            ProbeOutcome::Status(0) => 200,
            ProbeOutcome::Status(code) => code,
            ProbeOutcome::Malformed => 200,
            ProbeOutcome::Unreachable => 0,
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, port: u16) -> ProbeOutcome;
}

/// Sends a bounded HEAD request to `http://<host>:<port>/`
pub struct HttpProber {
    client: reqwest::Client,
    host: String,
}

impl HttpProber {
    pub fn new(host: &str) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, port: u16) -> ProbeOutcome {
        let url = format!("http://{}:{}/", self.host, port);
        match self.client.head(&url).send().await {
            Ok(resp) => ProbeOutcome::Status(resp.status().as_u16()),
            Err(e) if is_malformed_response(&e) => ProbeOutcome::Malformed,
            Err(_) => ProbeOutcome::Unreachable,
        }
    }
}

/// A plaintext server that answered with something other than HTTP, which is
/// what a TLS port or a half-speaking dev server looks like from here.
fn is_malformed_response(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            return hyper_err.is_parse();
        }
        source = cause.source();
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProbeKey {
    pid: String,
    port: u16,
}

/// Decides whether a listener is an HTTP server.
///
/// Results are memoized per `(pid, port)` for the life of the process. A pid
/// recycled by a new process on the same port keeps the old answer.
pub struct HttpClassifier {
    prober: Arc<dyn Prober>,
    ignored: HashSet<String>,
    cache: Mutex<UnboundCache<ProbeKey, u16>>,
}

impl HttpClassifier {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self::with_ignored(prober, IGNORED_COMMANDS.iter().copied())
    }

    pub fn with_ignored<'a>(prober: Arc<dyn Prober>, ignored: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            prober,
            ignored: ignored.into_iter().map(str::to_string).collect(),
            cache: Mutex::new(UnboundCache::new()),
        }
    }

    /// Classification for one listener: 0 to hide it, otherwise an HTTP status.
    pub async fn classify(&self, pid: &str, command: &str, port: u16) -> u16 {
        if self.ignored.contains(command) {
            return 0;
        }

        let key = ProbeKey {
            pid: pid.to_string(),
            port,
        };
        if let Some(status) = self.cache().cache_get(&key).copied() {
            return status;
        }

        // The lock is not held while probing
        let status = self.prober.probe(port).await.classify();

        let mut cache = self.cache();
        cache.cache_set(key, status);
        debug!(
            "Probed {} port {} -> {} (cache size={}, misses={:?})",
            command,
            port,
            status,
            cache.cache_size(),
            cache.cache_misses()
        );

        status
    }

    fn cache(&self) -> MutexGuard<'_, UnboundCache<ProbeKey, u16>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers with whatever outcome is currently configured and counts calls
    struct ScriptedProber {
        outcome: Mutex<ProbeOutcome>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(outcome: ProbeOutcome) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(outcome),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, outcome: ProbeOutcome) {
            *self.outcome.lock().unwrap() = outcome;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _port: u16) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.outcome.lock().unwrap()
        }
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(ProbeOutcome::Status(200).classify(), 200);
        assert_eq!(ProbeOutcome::Status(302).classify(), 302);
        assert_eq!(ProbeOutcome::Status(401).classify(), 0);
        assert_eq!(ProbeOutcome::Status(403).classify(), 0);
        assert_eq!(ProbeOutcome::Status(404).classify(), 404);
        assert_eq!(ProbeOutcome::Status(502).classify(), 502);
        assert_eq!(ProbeOutcome::Status(0).classify(), 200);
        assert_eq!(ProbeOutcome::Malformed.classify(), 200);
        assert_eq!(ProbeOutcome::Unreachable.classify(), 0);
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let prober = ScriptedProber::new(ProbeOutcome::Status(200));
        let classifier = HttpClassifier::new(prober.clone());

        assert_eq!(classifier.classify("42", "node", 3000).await, 200);
        prober.set(ProbeOutcome::Status(500));
        assert_eq!(classifier.classify("42", "node", 3000).await, 200);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn cache_is_keyed_by_pid_and_port() {
        let prober = ScriptedProber::new(ProbeOutcome::Status(200));
        let classifier = HttpClassifier::new(prober.clone());

        classifier.classify("42", "node", 3000).await;
        classifier.classify("43", "node", 3000).await;
        classifier.classify("42", "node", 3001).await;
        assert_eq!(prober.calls(), 3);
    }

    #[tokio::test]
    async fn negative_results_are_cached_too() {
        let prober = ScriptedProber::new(ProbeOutcome::Unreachable);
        let classifier = HttpClassifier::new(prober.clone());

        assert_eq!(classifier.classify("7", "postgres", 5432).await, 0);
        prober.set(ProbeOutcome::Status(200));
        assert_eq!(classifier.classify("7", "postgres", 5432).await, 0);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn ignored_commands_never_probe() {
        let prober = ScriptedProber::new(ProbeOutcome::Status(200));
        let classifier = HttpClassifier::new(prober.clone());

        for command in IGNORED_COMMANDS {
            assert_eq!(classifier.classify("1", command, 7000).await, 0);
        }
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn custom_ignore_list() {
        let prober = ScriptedProber::new(ProbeOutcome::Status(200));
        let classifier = HttpClassifier::with_ignored(prober.clone(), ["docker"]);

        assert_eq!(classifier.classify("1", "docker", 2375).await, 0);
        assert_eq!(classifier.classify("1", "rapportd", 2376).await, 200);
        assert_eq!(prober.calls(), 1);
    }

    /// Accept one connection, read the request, reply with `response` and
    /// hold the socket open until the client hangs up.
    async fn serve_once(response: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            }
        });

        port
    }

    #[tokio::test]
    async fn http_prober_reads_status() {
        let port = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").await;
        let prober = HttpProber::new("127.0.0.1").unwrap();

        assert_eq!(prober.probe(port).await, ProbeOutcome::Status(404));
    }

    #[tokio::test]
    async fn http_prober_reports_refusal_status() {
        let port = serve_once(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\n\r\n").await;
        let prober = HttpProber::new("127.0.0.1").unwrap();

        let outcome = prober.probe(port).await;
        assert_eq!(outcome, ProbeOutcome::Status(401));
        assert_eq!(outcome.classify(), 0);
    }

    #[tokio::test]
    async fn http_prober_flags_non_http_reply() {
        let port = serve_once(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let prober = HttpProber::new("127.0.0.1").unwrap();

        assert_eq!(prober.probe(port).await, ProbeOutcome::Malformed);
    }

    #[tokio::test]
    async fn http_prober_closed_port_is_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let prober = HttpProber::new("127.0.0.1").unwrap();

        assert_eq!(prober.probe(port).await, ProbeOutcome::Unreachable);
    }
}
