//! Run exports: a JSON snapshot and a plain working-candidate list

use crate::proxy::aggregator::FinalStats;
use crate::proxy::controller::RunReport;
use crate::proxy::models::{Candidate, ProbeResult};
use crate::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Snapshot of one run, written as a single JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub export_time: DateTime<Utc>,
    pub session_id: Uuid,
    pub total: usize,
    pub tested: usize,
    pub results: Vec<ProbeResult>,
    pub best: Option<Candidate>,
    pub stats: FinalStats,
}

impl ExportReport {
    pub fn from_run(report: &RunReport) -> Self {
        Self {
            export_time: Utc::now(),
            session_id: report.session.id(),
            total: report.stats.total,
            tested: report.stats.tested,
            results: report.session.results().to_vec(),
            best: report.session.best().cloned(),
            stats: report.stats.clone(),
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), results = self.results.len(), "results exported");
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// `proxy_results_YYYYmmdd_HHMMSS.json`
pub fn default_report_name(now: DateTime<Local>) -> String {
    format!("proxy_results_{}.json", now.format("%Y%m%d_%H%M%S"))
}

/// `working_proxies_YYYYmmdd_HHMMSS.txt`
pub fn default_working_name(now: DateTime<Local>) -> String {
    format!("working_proxies_{}.txt", now.format("%Y%m%d_%H%M%S"))
}

/// Write the active candidates under a timestamped header.
/// Returns how many were written.
pub fn save_working<P: AsRef<Path>>(results: &[ProbeResult], path: P) -> Result<usize> {
    let path = path.as_ref();
    let mut content = format!(
        "# Working Proxies - Exported {}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let mut written = 0;
    for result in results.iter().filter(|r| r.is_active()) {
        writeln!(content, "{}", result.candidate)?;
        written += 1;
    }

    fs::write(path, content)?;
    tracing::info!(path = %path.display(), written, "working candidates saved");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::controller::RunController;
    use crate::proxy::parser::ProxyParser;
    use crate::proxy::checker::Probe;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct EvenPortsActive;

    #[async_trait]
    impl Probe for EvenPortsActive {
        async fn probe(&self, candidate: &Candidate) -> ProbeResult {
            if candidate.port() % 2 == 0 {
                ProbeResult::active(candidate.clone(), 10, u64::from(candidate.port()))
            } else {
                ProbeResult::no_forward(candidate.clone(), 10)
            }
        }
    }

    fn candidate(s: &str) -> Candidate {
        ProxyParser::normalize(s).unwrap()
    }

    #[test]
    fn test_default_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(default_report_name(now), "proxy_results_20240305_070809.json");
        assert_eq!(default_working_name(now), "working_proxies_20240305_070809.txt");
    }

    #[test]
    fn test_save_working_only_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("working.txt");
        let results = vec![
            ProbeResult::active(candidate("1.1.1.1:80"), 10, 100),
            ProbeResult::unreachable(candidate("2.2.2.2:80")),
            ProbeResult::active(candidate("3.3.3.3:80"), 10, 200),
        ];

        assert_eq!(save_working(&results, &path).unwrap(), 2);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Working Proxies - Exported "));
        assert_eq!(
            ProxyParser::parse_string(&content),
            vec![candidate("1.1.1.1:80"), candidate("3.3.3.3:80")]
        );
    }

    #[tokio::test]
    async fn test_export_report_snapshot() {
        let controller = RunController::new(EvenPortsActive);
        let list = vec![candidate("1.1.1.1:81"), candidate("1.1.1.1:82"), candidate("1.1.1.1:84")];
        let run = controller.run(list, 2, |_| {}, |_, _| {}).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = ExportReport::from_run(&run);
        report.write(&path).unwrap();

        let back = ExportReport::read(&path).unwrap();
        assert_eq!(back.session_id, run.session.id());
        assert_eq!(back.total, 3);
        assert_eq!(back.tested, 3);
        assert_eq!(back.results.len(), 3);
        assert_eq!(back.best, Some(candidate("1.1.1.1:82")));
        assert_eq!(back.stats.active, 2);

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["best"], "1.1.1.1:82");
        assert!(raw["results"][0]["status"].is_string());
    }
}
