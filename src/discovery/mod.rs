//! Listener discovery: enumerate, probe, filter and group

pub mod lsof;
pub mod probe;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::ScanError;
use crate::listener::{ListenerRecord, MenuEntry};
use lsof::{CwdResolver, ListenerSource};
use probe::HttpClassifier;

/// Produces the live HTTP listeners for one poll cycle
pub struct PortScanner {
    source: Arc<dyn ListenerSource>,
    resolver: Arc<dyn CwdResolver>,
    classifier: Arc<HttpClassifier>,
}

impl PortScanner {
    pub fn new(
        source: Arc<dyn ListenerSource>,
        resolver: Arc<dyn CwdResolver>,
        classifier: Arc<HttpClassifier>,
    ) -> Self {
        Self {
            source,
            resolver,
            classifier,
        }
    }

    /// Every listener that classified as HTTP, sorted by port.
    ///
    /// All probes finish before this returns; a cycle never yields a partial list.
    pub async fn scan(&self) -> Result<Vec<ListenerRecord>, ScanError> {
        let table = self.source.read_table().await?;
        let mut listeners = lsof::parse_listeners(&table, self.resolver.as_ref()).await;

        // Dual-stack sockets show up once per address family
        let mut seen = HashSet::new();
        listeners.retain(|l| seen.insert((l.pid.clone(), l.port)));
        let discovered = listeners.len();

        let mut probes = JoinSet::new();
        for listener in listeners {
            let classifier = self.classifier.clone();
            probes.spawn(async move {
                let status = classifier
                    .classify(&listener.pid, &listener.command, listener.port)
                    .await;
                (status != 0).then(|| listener.with_status(status))
            });
        }

        let mut alive = Vec::with_capacity(discovered);
        while let Some(joined) = probes.join_next().await {
            if let Some(listener) = joined? {
                alive.push(listener);
            }
        }

        // Completion order is arbitrary
        alive.sort_by_key(|l| l.port);

        debug!("Scan found {} listeners, {} serving HTTP", discovered, alive.len());
        Ok(alive)
    }
}

/// Healthy listeners first, then a separator and the 4xx/5xx ones.
/// Port order is preserved inside each group.
pub fn group_by_health(listeners: Vec<ListenerRecord>) -> Vec<MenuEntry> {
    let (failing, healthy): (Vec<_>, Vec<_>) = listeners.into_iter().partition(ListenerRecord::is_failing);

    let mut entries: Vec<MenuEntry> = healthy.into_iter().map(MenuEntry::Listener).collect();
    if !failing.is_empty() {
        entries.push(MenuEntry::Separator);
        entries.extend(failing.into_iter().map(MenuEntry::Listener));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use probe::{ProbeOutcome, Prober};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTable(&'static str);

    #[async_trait]
    impl ListenerSource for FixedTable {
        async fn read_table(&self) -> Result<Vec<u8>, ScanError> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    struct RawTable(Vec<u8>);

    #[async_trait]
    impl ListenerSource for RawTable {
        async fn read_table(&self) -> Result<Vec<u8>, ScanError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenTable;

    #[async_trait]
    impl ListenerSource for BrokenTable {
        async fn read_table(&self) -> Result<Vec<u8>, ScanError> {
            Err(ScanError::Spawn {
                program: "lsof".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            })
        }
    }

    struct NoCwd;

    #[async_trait]
    impl CwdResolver for NoCwd {
        async fn resolve(&self, _pid: &str) -> String {
            String::new()
        }
    }

    /// Outcome per port, counting probes
    struct PortMap {
        outcomes: HashMap<u16, ProbeOutcome>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for PortMap {
        async fn probe(&self, port: u16) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Finish out of order
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(port % 7))).await;
            self.outcomes.get(&port).copied().unwrap_or(ProbeOutcome::Unreachable)
        }
    }

    const TABLE: &str = "\
COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME
node 100 dev 20u IPv4 0x1 0t0 TCP *:3000 (LISTEN)
node 100 dev 21u IPv6 0x2 0t0 TCP *:3000 (LISTEN)
postgres 200 dev 5u IPv4 0x3 0t0 TCP 127.0.0.1:5432 (LISTEN)
python3 300 dev 3u IPv4 0x4 0t0 TCP *:8000 (LISTEN)
vite 400 dev 30u IPv6 0x5 0t0 TCP [::1]:5173 (LISTEN)
rapportd 500 dev 4u IPv4 0x6 0t0 TCP *:49152 (LISTEN)
api 600 dev 9u IPv4 0x7 0t0 TCP *:4000 (LISTEN)";

    fn scanner(source: Arc<dyn ListenerSource>) -> (PortScanner, Arc<PortMap>) {
        let prober = Arc::new(PortMap {
            outcomes: HashMap::from([
                (3000, ProbeOutcome::Status(200)),
                (8000, ProbeOutcome::Status(500)),
                (5173, ProbeOutcome::Malformed),
                (49152, ProbeOutcome::Status(200)),
                (4000, ProbeOutcome::Status(403)),
            ]),
            calls: AtomicUsize::new(0),
        });
        let classifier = Arc::new(HttpClassifier::new(prober.clone()));
        (PortScanner::new(source, Arc::new(NoCwd), classifier), prober)
    }

    #[tokio::test]
    async fn scan_keeps_http_listeners_in_port_order() {
        let (scanner, prober) = scanner(Arc::new(FixedTable(TABLE)));
        let alive = scanner.scan().await.unwrap();

        let summary: Vec<(u16, &str, u16)> = alive
            .iter()
            .map(|l| (l.port, l.command.as_str(), l.http_status))
            .collect();
        assert_eq!(
            summary,
            vec![(3000, "node", 200), (5173, "vite", 200), (8000, "python3", 500)]
        );
        // node's second socket is the same listener; rapportd is never probed
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn rescans_use_the_cache() {
        let (scanner, prober) = scanner(Arc::new(FixedTable(TABLE)));
        let first = scanner.scan().await.unwrap();
        let second = scanner.scan().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn empty_table_is_not_an_error() {
        let (scanner, _) = scanner(Arc::new(FixedTable("")));
        assert!(scanner.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_row_does_not_hide_its_neighbours() {
        let mut table = b"COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME\n".to_vec();
        table.extend_from_slice(b"node 100 dev 20u IPv4 0x1 0t0 TCP *:3000 (LISTEN)\n");
        table.extend_from_slice(b"caf\xe9 700 dev 8u IPv4 0x8 0t0 TCP *:3001 (LISTEN)\n");

        let (scanner, prober) = scanner(Arc::new(RawTable(table)));
        let alive = scanner.scan().await.unwrap();

        let ports: Vec<u16> = alive.iter().map(|l| l.port).collect();
        assert_eq!(ports, vec![3000]);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn source_failure_aborts_the_scan() {
        let (scanner, prober) = scanner(Arc::new(BrokenTable));
        let err = scanner.scan().await.unwrap_err();

        assert!(matches!(err, ScanError::Spawn { .. }));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    fn listener(port: u16, status: u16) -> ListenerRecord {
        ListenerRecord::new(port.to_string(), "svc", port).with_status(status)
    }

    #[test]
    fn grouping_puts_failures_after_one_separator() {
        let entries = group_by_health(vec![
            listener(3000, 200),
            listener(4000, 404),
            listener(5000, 301),
            listener(6000, 500),
        ]);

        assert_eq!(
            entries,
            vec![
                MenuEntry::Listener(listener(3000, 200)),
                MenuEntry::Listener(listener(5000, 301)),
                MenuEntry::Separator,
                MenuEntry::Listener(listener(4000, 404)),
                MenuEntry::Listener(listener(6000, 500)),
            ]
        );
    }

    #[test]
    fn grouping_without_failures_has_no_separator() {
        let entries = group_by_health(vec![listener(3000, 200), listener(8080, 399)]);

        assert_eq!(entries.len(), 2);
        assert!(!entries.contains(&MenuEntry::Separator));
    }

    #[test]
    fn grouping_only_failures_starts_with_separator() {
        let entries = group_by_health(vec![listener(3000, 400)]);
        assert_eq!(entries, vec![MenuEntry::Separator, MenuEntry::Listener(listener(3000, 400))]);
    }

    #[test]
    fn grouping_empty() {
        assert!(group_by_health(Vec::new()).is_empty());
    }
}
