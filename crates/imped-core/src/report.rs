//! Run reports and tabular export
//!
//! - [`RunClock`] / [`BatchRunReport`]: wall time, CPU time and counts of a pass
//! - [`ReportRow`] / [`ReportExporter`]: one row per successful result

use crate::error::ReportError;
use crate::types::{CertificatePaths, VerificationResult};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// `USER_HZ` on every mainstream Linux build; used when `getconf` is unavailable
pub const DEFAULT_CLOCK_TICKS: u64 = 100;

/// Clock ticks per second of `/proc/self/stat`, from `getconf CLK_TCK`
static CLOCK_TICKS: Lazy<u64> = Lazy::new(|| {
    std::process::Command::new("getconf")
        .arg("CLK_TCK")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| parse_clock_ticks(&String::from_utf8_lossy(&out.stdout)))
        .unwrap_or(DEFAULT_CLOCK_TICKS)
});

/// Parse the `getconf CLK_TCK` output; zero or garbage is `None`
#[must_use]
pub fn parse_clock_ticks(output: &str) -> Option<u64> {
    output.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

/// Process CPU time split by mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// User mode
    pub user: Duration,
    /// Kernel mode
    pub system: Duration,
}

impl CpuTimes {
    /// Time spent since an earlier reading
    #[must_use]
    pub fn since(self, earlier: CpuTimes) -> CpuTimes {
        CpuTimes {
            user: self.user.saturating_sub(earlier.user),
            system: self.system.saturating_sub(earlier.system),
        }
    }
}

/// Read this process's CPU times, when the platform exposes them
#[must_use]
pub fn process_cpu_times() -> Option<CpuTimes> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_proc_stat(&stat, *CLOCK_TICKS)
}

/// Parse `utime` and `stime` (fields 14 and 15) from a `/proc/<pid>/stat` line
#[must_use]
pub fn parse_proc_stat(stat: &str, ticks_per_sec: u64) -> Option<CpuTimes> {
    // comm may contain spaces and parens; fields resume after the last ')'
    let after_comm = stat.rsplit_once(')')?.1;
    let tokens: Vec<&str> = after_comm.split_whitespace().collect();
    let utime = tokens.get(11)?.parse::<u64>().ok()?;
    let stime = tokens.get(12)?.parse::<u64>().ok()?;
    let ticks = |n: u64| Duration::from_millis(n * 1000 / ticks_per_sec.max(1));
    Some(CpuTimes {
        user: ticks(utime),
        system: ticks(stime),
    })
}

/// Measures one pass
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started: Instant,
    cpu: Option<CpuTimes>,
}

impl RunClock {
    /// Start measuring
    #[must_use]
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            cpu: process_cpu_times(),
        }
    }

    /// Stop measuring and build the report
    #[must_use]
    pub fn finish(&self, processed: usize, succeeded: usize, failed: usize) -> BatchRunReport {
        let cpu = match (self.cpu, process_cpu_times()) {
            (Some(start), Some(end)) => Some(end.since(start)),
            _ => None,
        };
        BatchRunReport {
            elapsed: self.started.elapsed(),
            cpu,
            processed,
            succeeded,
            failed,
        }
    }
}

/// Aggregate figures of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchRunReport {
    /// Wall time
    pub elapsed: Duration,
    /// CPU time, if measurable
    pub cpu: Option<CpuTimes>,
    /// People processed
    pub processed: usize,
    /// Successes
    pub succeeded: usize,
    /// Failures
    pub failed: usize,
}

impl std::fmt::Display for BatchRunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "--- Report ---")?;
        writeln!(f, "Execution time:  {}", format_duration(self.elapsed))?;
        if let Some(cpu) = self.cpu {
            writeln!(f, "CPU user time:   {:.2}s", cpu.user.as_secs_f64())?;
            writeln!(f, "CPU system time: {:.2}s", cpu.system.as_secs_f64())?;
        }
        writeln!(f, "Processed:       {}", self.processed)?;
        writeln!(f, "Success:         {}", self.succeeded)?;
        write!(f, "Errors:          {}", self.failed)
    }
}

/// Format as `1h 2m 3s`, `2m 3s` or `3s`
#[must_use]
pub fn format_duration(d: Duration) -> String {
    let s = d.as_secs();
    let (h, m, s) = (s / 3600, (s / 60) % 60, s % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// One exported row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// Fiscal identifier
    pub id: String,
    /// Portal-confirmed name
    pub name: String,
    /// Accepted birth date
    pub birth_date: String,
    /// Impediment status
    pub has_impediment: Option<String>,
    /// Certificate path relative to the output root; present when downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

/// Build rows; `certificates` is `Some` when downloads are enabled
pub fn build_rows<'a>(
    results: impl IntoIterator<Item = &'a VerificationResult>,
    certificates: Option<&CertificatePaths>,
) -> Vec<ReportRow> {
    results
        .into_iter()
        .map(|r| ReportRow {
            id: r.id.clone(),
            name: r.name.clone(),
            birth_date: r.birth_date.clone(),
            has_impediment: r.has_impediment.clone(),
            certificate: certificates.map(|paths| {
                paths
                    .get(&r.id)
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            }),
        })
        .collect()
}

/// Column labels of the exported sheet, in order
pub const REPORT_COLUMNS: [&str; 4] = [
    "Número de Identificación",
    "Apellidos y Nombres",
    "Fecha de Nacimiento",
    "Registra Impedimento",
];

/// Label of the certificate column, present when downloading
pub const CERTIFICATE_COLUMN: &str = "Certificado";

// Spreadsheet applications only detect UTF-8 with the byte order mark
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Encode rows as a labeled sheet
///
/// The certificate column is included when any row carries one.
///
/// # Errors
/// - `ReportError::Encode` if a record cannot be written
pub fn encode_sheet(rows: &[ReportRow]) -> Result<Vec<u8>, ReportError> {
    let with_certificates = rows.iter().any(|r| r.certificate.is_some());

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(UTF8_BOM.to_vec());

    let mut header = REPORT_COLUMNS.to_vec();
    if with_certificates {
        header.push(CERTIFICATE_COLUMN);
    }
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.id.as_str(),
            row.name.as_str(),
            row.birth_date.as_str(),
            row.has_impediment.as_deref().unwrap_or(""),
        ];
        if with_certificates {
            record.push(row.certificate.as_deref().unwrap_or(""));
        }
        writer.write_record(&record)?;
    }

    writer.into_inner().map_err(|e| {
        let io = std::io::Error::new(e.error().kind(), e.error().to_string());
        ReportError::Encode(csv::Error::from(io))
    })
}

/// Writes the tabular report as a labeled CSV sheet
#[derive(Debug, Clone)]
pub struct ReportExporter {
    path: PathBuf,
}

impl ReportExporter {
    /// Create exporter writing to `path`
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the report with `rows`
    ///
    /// # Errors
    /// - `ReportError::Encode` if encoding fails
    /// - `ReportError::Io` if the file cannot be written
    pub async fn export(&self, rows: &[ReportRow]) -> Result<&Path, ReportError> {
        let sheet = encode_sheet(rows)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReportError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(&self.path, sheet)
            .await
            .map_err(|e| ReportError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        tracing::info!("report saved: {} ({} rows)", self.path.display(), rows.len());
        Ok(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, name: &str) -> VerificationResult {
        VerificationResult {
            id: id.to_string(),
            name: name.to_string(),
            birth_date: "03/08/2000".to_string(),
            has_impediment: Some("NO REGISTRA".to_string()),
            temp_dir: None,
        }
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(999)), "0s");
        assert_eq!(format_duration(Duration::from_secs(59)), "59s");
        assert_eq!(format_duration(Duration::from_secs(61)), "1m 1s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }

    #[test]
    fn parses_proc_stat_with_odd_comm() {
        let line = "4242 (imped (x) y) S 1 4242 4242 0 -1 4194560 500 0 0 0 250 30 0 0 20 0 1 0 100 0 0";
        let cpu = parse_proc_stat(line, DEFAULT_CLOCK_TICKS).unwrap();
        assert_eq!(cpu.user, Duration::from_millis(2_500));
        assert_eq!(cpu.system, Duration::from_millis(300));

        let cpu = parse_proc_stat(line, 250).unwrap();
        assert_eq!(cpu.user, Duration::from_secs(1));
    }

    #[test]
    fn parses_getconf_clock_ticks() {
        assert_eq!(parse_clock_ticks("100\n"), Some(100));
        assert_eq!(parse_clock_ticks(" 250 "), Some(250));
        assert_eq!(parse_clock_ticks("0"), None);
        assert_eq!(parse_clock_ticks("undefined"), None);
    }

    #[test]
    fn report_renders_counts() {
        let report = BatchRunReport {
            elapsed: Duration::from_secs(65),
            cpu: None,
            processed: 5,
            succeeded: 4,
            failed: 1,
        };
        let text = report.to_string();
        assert!(text.contains("Execution time:  1m 5s"));
        assert!(text.contains("Processed:       5"));
        assert!(text.contains("Errors:          1"));
        assert!(!text.contains("CPU user"));
    }

    #[test]
    fn rows_include_certificate_column_only_when_downloading() {
        let results = [result("1", "ANA"), result("2", "LUIS")];
        let mut paths = CertificatePaths::new();
        paths.insert("1", "ANA.pdf");

        let rows = build_rows(&results, Some(&paths));
        assert_eq!(rows[0].certificate.as_deref(), Some("ANA.pdf"));
        assert_eq!(rows[1].certificate.as_deref(), Some(""));

        let rows = build_rows(&results, None);
        assert!(rows.iter().all(|r| r.certificate.is_none()));
        assert_eq!(rows[0].has_impediment.as_deref(), Some("NO REGISTRA"));
    }

    #[test]
    fn sheet_has_labeled_columns() {
        let mut paths = CertificatePaths::new();
        paths.insert("1", "ANA_PEREZ.pdf");
        let mut missing = result("2", "LUIS, JR");
        missing.has_impediment = None;
        let rows = build_rows(&[result("1", "ANA PEREZ"), missing], Some(&paths));

        let sheet = encode_sheet(&rows).unwrap();
        assert!(sheet.starts_with(UTF8_BOM));
        let text = std::str::from_utf8(&sheet[UTF8_BOM.len()..]).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(
            lines[0],
            "Número de Identificación,Apellidos y Nombres,Fecha de Nacimiento,Registra Impedimento,Certificado"
        );
        assert_eq!(lines[1], "1,ANA PEREZ,03/08/2000,NO REGISTRA,ANA_PEREZ.pdf");
        assert_eq!(lines[2], "2,\"LUIS, JR\",03/08/2000,,");
    }

    #[test]
    fn sheet_without_downloads_has_four_columns() {
        let rows = build_rows(&[result("1", "ANA")], None);
        let sheet = encode_sheet(&rows).unwrap();
        let text = String::from_utf8_lossy(&sheet[UTF8_BOM.len()..]).into_owned();
        assert!(!text.contains(CERTIFICATE_COLUMN));
        assert!(text.contains("1,ANA,03/08/2000,NO REGISTRA\r\n"));
    }

    #[tokio::test]
    async fn export_replaces_sheet_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = ReportExporter::new(dir.path().join("out/impedimentos.csv"));

        exporter
            .export(&build_rows(&[result("1", "ANA")], None))
            .await
            .unwrap();
        exporter
            .export(&build_rows(&[result("1", "ANA"), result("2", "LUIS")], None))
            .await
            .unwrap();

        let written = std::fs::read(exporter.path()).unwrap();
        let mut reader = csv::Reader::from_reader(&written[UTF8_BOM.len()..]);
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}
