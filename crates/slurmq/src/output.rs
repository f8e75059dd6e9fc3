//! Rendering of usage reports, statistics and efficiency as tables, JSON
//! and CSV.

use chrono::{DateTime, Utc};
use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, Color, ColorChoice, Style, Table, TableStruct, print_stdout};
use colored::Colorize;
use serde::Serialize;
use slurmq_core::{
    CancelOutcome, Disposition, EnforcementAction, GroupKey, GroupReport, GroupStats,
    JobEfficiency, LOW_EFFICIENCY_PCT, LONG_WAIT_HOURS, QuotaForecast, QuotaStatus,
    Recommendation, SizeBreakdown, UsageReport, UserStatus, UserUsage, format_memory_mb,
    format_time_human, pct_change,
};
use std::collections::BTreeMap;
use std::io::IsTerminal;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn percent(report: &UsageReport) -> f64 {
    round_to(report.usage_percentage() * 100.0, 1)
}

/// One user's line in `check --json`.
#[derive(Debug, Serialize)]
pub struct CheckJson<'a> {
    pub cluster: &'a str,
    pub user: &'a str,
    pub qos: &'a str,
    pub used_gpu_hours: f64,
    pub quota_limit: u32,
    pub remaining_gpu_hours: f64,
    pub usage_percentage: f64,
    pub status: QuotaStatus,
    pub rolling_window_days: u32,
    pub active_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast: Option<&'a [QuotaForecast]>,
}

impl<'a> CheckJson<'a> {
    pub fn new(
        cluster: &'a str,
        report: &'a UsageReport,
        forecast: Option<&'a [QuotaForecast]>,
    ) -> Self {
        Self {
            cluster,
            user: &report.user,
            qos: &report.qos,
            used_gpu_hours: round_to(report.used_gpu_hours, 2),
            quota_limit: report.quota_limit,
            remaining_gpu_hours: round_to(report.remaining_gpu_hours(), 2),
            usage_percentage: percent(report),
            status: report.status(),
            rolling_window_days: report.rolling_window_days,
            active_jobs: report.active_jobs.len(),
            forecast,
        }
    }
}

/// A row of the all-users report, shared by JSON and CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRow {
    pub user: String,
    pub used_gpu_hours: f64,
    pub quota_limit: u32,
    pub remaining_gpu_hours: f64,
    pub usage_percentage: f64,
    pub status: QuotaStatus,
    pub active_jobs: usize,
    pub total_jobs: usize,
}

impl From<&UserUsage> for UsageRow {
    fn from(usage: &UserUsage) -> Self {
        let report = &usage.report;
        Self {
            user: report.user.clone(),
            used_gpu_hours: round_to(report.used_gpu_hours, 2),
            quota_limit: report.quota_limit,
            remaining_gpu_hours: round_to(report.remaining_gpu_hours(), 2),
            usage_percentage: percent(report),
            status: report.status(),
            active_jobs: report.active_jobs.len(),
            total_jobs: usage.total_jobs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportJson<'a> {
    pub cluster: &'a str,
    pub qos: Option<&'a str>,
    pub users: &'a [UsageRow],
}

/// A row of the monitor view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    pub user: String,
    pub used_gpu_hours: f64,
    pub remaining_gpu_hours: f64,
    pub usage_percentage: f64,
    pub status: QuotaStatus,
    pub active_jobs: usize,
    pub in_grace_period: bool,
    pub exceeded_at: Option<DateTime<Utc>>,
}

impl From<&UserStatus> for StatusRow {
    fn from(status: &UserStatus) -> Self {
        let report = &status.report;
        Self {
            user: report.user.clone(),
            used_gpu_hours: round_to(report.used_gpu_hours, 2),
            remaining_gpu_hours: round_to(report.remaining_gpu_hours(), 2),
            usage_percentage: percent(report),
            status: report.status(),
            active_jobs: report.active_jobs.len(),
            in_grace_period: status.in_grace_period,
            exceeded_at: status.exceeded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MonitorJson<'a> {
    pub cluster: &'a str,
    pub users: &'a [StatusRow],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<&'a [EnforcementAction]>,
}

/// One size class in `stats --json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatsJson {
    pub job_count: usize,
    pub gpu_hours: f64,
    pub median_wait_hours: f64,
    pub long_wait_pct: f64,
}

impl From<&GroupStats> for GroupStatsJson {
    fn from(stats: &GroupStats) -> Self {
        Self {
            job_count: stats.job_count,
            gpu_hours: round_to(stats.gpu_hours, 2),
            median_wait_hours: round_to(stats.median_wait_hours, 2),
            long_wait_pct: round_to(stats.long_wait_pct, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownJson {
    pub all: GroupStatsJson,
    pub small: GroupStatsJson,
    pub large: GroupStatsJson,
}

impl From<&SizeBreakdown> for BreakdownJson {
    fn from(breakdown: &SizeBreakdown) -> Self {
        Self {
            all: (&breakdown.all).into(),
            small: (&breakdown.small).into(),
            large: (&breakdown.large).into(),
        }
    }
}

/// `stats --json`, keyed by partition or QoS name.
#[derive(Debug, Serialize)]
pub struct StatsJson {
    pub period_days: u32,
    pub current: BTreeMap<String, BreakdownJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<BTreeMap<String, BreakdownJson>>,
}

impl StatsJson {
    pub fn new(period_days: u32, reports: &[GroupReport]) -> Self {
        let current = reports
            .iter()
            .map(|r| (r.group.name().to_string(), (&r.current).into()))
            .collect();
        let previous = reports
            .iter()
            .map(|r| {
                r.previous
                    .as_ref()
                    .map(|p| (r.group.name().to_string(), p.into()))
            })
            .collect();
        Self {
            period_days,
            current,
            previous,
        }
    }
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

pub fn usage_csv(rows: &[UsageRow]) -> Result<String, csv::Error> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn status_color(status: QuotaStatus) -> Color {
    match status {
        QuotaStatus::Ok => Color::Green,
        QuotaStatus::Warning => Color::Yellow,
        QuotaStatus::Exceeded => Color::Red,
    }
}

fn status_cell(status: QuotaStatus) -> CellStruct {
    status
        .as_str()
        .cell()
        .foreground_color(Some(status_color(status)))
}

fn number_cell(value: impl std::fmt::Display) -> CellStruct {
    value.cell().justify(Justify::Right)
}

fn horizontal_table(rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) -> TableStruct {
    rows.table()
        .separator(
            Separator::builder()
                .title(Some(Default::default()))
                .column(Some(Default::default()))
                .build(),
        )
        .title(header)
}

fn header(titles: &[&str]) -> Vec<CellStruct> {
    titles.iter().map(|t| t.cell().bold(true)).collect()
}

/// Summary of one user's usage as label/value pairs.
pub fn check_table(cluster: &str, report: &UsageReport) -> TableStruct {
    let rows = vec![
        vec!["User".cell().bold(true), report.user.as_str().cell()],
        vec![
            "Cluster".cell().bold(true),
            format!("{cluster} ({})", report.qos).cell(),
        ],
        vec![
            "Used".cell().bold(true),
            format!(
                "{:.1} / {} GPU-hours ({:.0}%)",
                report.used_gpu_hours,
                report.quota_limit,
                report.usage_percentage() * 100.0
            )
            .cell(),
        ],
        vec![
            "Remaining".cell().bold(true),
            format!("{:.1} GPU-hours", report.remaining_gpu_hours()).cell(),
        ],
        vec!["Status".cell().bold(true), status_cell(report.status())],
        vec![
            "Window".cell().bold(true),
            format!("{} days", report.rolling_window_days).cell(),
        ],
        vec![
            "Active jobs".cell().bold(true),
            report.active_jobs.len().cell(),
        ],
    ];

    rows.table().separator(
        Separator::builder()
            .column(Some(Default::default()))
            .build(),
    )
}

pub fn forecast_table(forecasts: &[QuotaForecast]) -> TableStruct {
    let rows = forecasts
        .iter()
        .map(|f| {
            vec![
                number_cell(format!("{}h", f.hours_ahead)),
                number_cell(format!("{:.1}", f.available_gpu_hours)),
            ]
        })
        .collect();
    horizontal_table(rows, header(&["Hours ahead", "Available (GPU-hrs)"]))
}

pub fn usage_table(rows: &[UsageRow]) -> TableStruct {
    let rows = rows
        .iter()
        .map(|r| {
            vec![
                r.user.as_str().cell(),
                number_cell(format!("{:.1}", r.used_gpu_hours)),
                number_cell(format!("{:.1}", r.remaining_gpu_hours)),
                number_cell(format!("{:.0}%", r.usage_percentage)),
                status_cell(r.status),
                number_cell(r.active_jobs),
                number_cell(r.total_jobs),
            ]
        })
        .collect();
    horizontal_table(
        rows,
        header(&[
            "User",
            "Used (GPU-hrs)",
            "Remaining",
            "Usage %",
            "Status",
            "Active",
            "Total",
        ]),
    )
}

pub fn status_table(rows: &[StatusRow]) -> TableStruct {
    let rows = rows
        .iter()
        .map(|r| {
            vec![
                r.user.as_str().cell(),
                number_cell(format!("{:.1}", r.used_gpu_hours)),
                number_cell(format!("{:.1}", r.remaining_gpu_hours)),
                number_cell(format!("{:.0}%", r.usage_percentage)),
                status_cell(r.status),
                number_cell(r.active_jobs),
                (if r.in_grace_period { "yes" } else { "" }).cell(),
            ]
        })
        .collect();
    horizontal_table(
        rows,
        header(&[
            "User",
            "Used (GPU-hrs)",
            "Remaining",
            "Usage %",
            "Status",
            "Active Jobs",
            "Grace",
        ]),
    )
}

fn group_label(reports: &[GroupReport]) -> &'static str {
    match reports.first().map(|r| &r.group) {
        Some(GroupKey::Qos(_)) => "QoS",
        _ => "Partition",
    }
}

/// Append the relative change from `previous`, e.g. " (+12%)".
fn with_change(text: String, current: f64, previous: Option<f64>) -> String {
    match previous.and_then(|p| pct_change(current, p)) {
        Some(pct) => format!("{text} ({pct:+.0}%)"),
        None => text,
    }
}

/// GPU-hours and job counts per group.
pub fn utilization_table(reports: &[GroupReport]) -> TableStruct {
    let rows = reports
        .iter()
        .map(|r| {
            let current = &r.current.all;
            let previous = r.previous.as_ref().map(|p| &p.all);
            vec![
                r.group.name().cell(),
                number_cell(with_change(
                    format!("{:.1}k", current.gpu_hours / 1000.0),
                    current.gpu_hours,
                    previous.map(|p| p.gpu_hours),
                )),
                number_cell(with_change(
                    current.job_count.to_string(),
                    current.job_count as f64,
                    previous.map(|p| p.job_count as f64),
                )),
            ]
        })
        .collect();
    horizontal_table(rows, header(&[group_label(reports), "GPU Hours", "Jobs"]))
}

/// Queue waits per group for small (`small == true`) or large jobs.
pub fn wait_table(reports: &[GroupReport], small: bool) -> TableStruct {
    let pick = |b: &SizeBreakdown| if small { b.small } else { b.large };
    let long_wait = format!("Wait > {LONG_WAIT_HOURS:.0}h");
    let rows = reports
        .iter()
        .map(|r| {
            let current = pick(&r.current);
            let previous = r.previous.as_ref().map(pick);
            vec![
                r.group.name().cell(),
                number_cell(with_change(
                    format_time_human(current.median_wait_hours),
                    current.median_wait_hours,
                    previous.map(|p| p.median_wait_hours),
                )),
                number_cell(format!("{:.0}%", current.long_wait_pct)),
                number_cell(current.job_count),
            ]
        })
        .collect();
    horizontal_table(
        rows,
        header(&[group_label(reports), "Median Wait", long_wait.as_str(), "Jobs"]),
    )
}

/// Slurm-style elapsed time: `HH:MM:SS`, or `D-HH:MM:SS` past a day.
pub fn format_elapsed(seconds: u64) -> String {
    let (days, rest) = (seconds / 86_400, seconds % 86_400);
    let clock = format!(
        "{:02}:{:02}:{:02}",
        rest / 3600,
        rest % 3600 / 60,
        rest % 60
    );
    if days > 0 {
        format!("{days}-{clock}")
    } else {
        clock
    }
}

fn efficiency_cell(pct: Option<f64>, detail: String) -> CellStruct {
    match pct {
        Some(pct) => {
            let color = if pct < LOW_EFFICIENCY_PCT {
                Color::Yellow
            } else {
                Color::Green
            };
            format!("{pct:.2}% {detail}")
                .cell()
                .foreground_color(Some(color))
        }
        None => "n/a".cell(),
    }
}

/// One job's efficiency as label/value pairs.
pub fn efficiency_table(eff: &JobEfficiency) -> TableStruct {
    let core_walltime = format_elapsed(u64::from(eff.n_cpus) * eff.elapsed_seconds);
    let requested = eff
        .req_mem_mb
        .map(|mb| format_memory_mb(mb as f64))
        .unwrap_or_else(|| "unknown".to_string());
    let state_color = eff.problematic.then_some(Color::Red);
    let state = eff.state.as_str().cell().foreground_color(state_color);

    let rows = vec![
        vec!["Job ID".cell().bold(true), eff.job_id.cell()],
        vec!["Name".cell().bold(true), eff.name.as_str().cell()],
        vec!["User".cell().bold(true), eff.user.as_str().cell()],
        vec!["State".cell().bold(true), state],
        vec![
            "Cores".cell().bold(true),
            format!("{} on {} node(s)", eff.n_cpus, eff.nodes).cell(),
        ],
        vec![
            "Elapsed".cell().bold(true),
            format_elapsed(eff.elapsed_seconds).cell(),
        ],
        vec![
            "CPU utilized".cell().bold(true),
            format_elapsed(eff.cpu_seconds).cell(),
        ],
        vec![
            "CPU efficiency".cell().bold(true),
            efficiency_cell(
                eff.cpu_efficiency_pct,
                format!("of {core_walltime} core-walltime"),
            ),
        ],
        vec![
            "Memory utilized".cell().bold(true),
            format_memory_mb(eff.max_rss_mb).cell(),
        ],
        vec![
            "Memory efficiency".cell().bold(true),
            efficiency_cell(eff.memory_efficiency_pct, format!("of {requested}")),
        ],
    ];

    rows.table().separator(
        Separator::builder()
            .column(Some(Default::default()))
            .build(),
    )
}

/// Human-readable line for one enforcement action.
pub fn action_message(action: &EnforcementAction) -> String {
    let job = format!("job {} ({})", action.job_id, action.user);
    match (action.disposition, &action.outcome) {
        (Disposition::GracePeriod, _) => format!("Warning {job} - in grace period"),
        (Disposition::ExemptUser, _) => format!("Skipped {job} - user exempt"),
        (Disposition::ExemptPrefix, _) => format!("Skipped {job} - job prefix exempt"),
        (Disposition::WouldCancel, _) => format!("Would cancel {job} [dry-run]"),
        (Disposition::Cancelled, Some(CancelOutcome::AlreadyGone)) => {
            format!("Already finished {job}")
        }
        (Disposition::Cancelled, Some(CancelOutcome::Failed(reason))) => {
            format!("Failed to cancel {job}: {reason}")
        }
        (Disposition::Cancelled, _) => format!("Cancelled {job}"),
    }
}

fn action_color(action: &EnforcementAction) -> colored::Color {
    match action.disposition {
        Disposition::GracePeriod => colored::Color::Cyan,
        Disposition::ExemptUser | Disposition::ExemptPrefix => colored::Color::BrightBlack,
        Disposition::WouldCancel => colored::Color::Yellow,
        Disposition::Cancelled => colored::Color::Red,
    }
}

/// Terminal printer honouring the configured color policy.
pub struct Printer {
    color_policy: ColorChoice,
}

impl Printer {
    pub fn new(color: bool) -> Self {
        let color_policy = if color && std::io::stdout().is_terminal() {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        if color_policy == ColorChoice::Never {
            colored::control::set_override(false);
        }
        Self { color_policy }
    }

    /// Render a table as stdout would show it.
    pub fn render(&self, table: TableStruct) -> std::io::Result<String> {
        Ok(table.color_choice(self.color_policy).display()?.to_string())
    }

    pub fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            tracing::error!("Cannot print table to stdout: {:?}", e);
        }
    }

    pub fn print_actions(&self, actions: &[EnforcementAction]) {
        if actions.is_empty() {
            return;
        }
        println!("\n{}", "Enforcement actions:".bold());
        for action in actions {
            println!("  {}", action_message(action).color(action_color(action)));
        }
    }

    pub fn print_recommendations(&self, advice: &[Recommendation]) {
        if advice.is_empty() {
            println!("\n{}", "Resource requests look reasonable.".green());
            return;
        }
        println!("\n{}", "Recommendations:".bold());
        for item in advice {
            println!("  - {}", item.to_string().yellow());
        }
    }

    pub fn note(&self, message: &str) {
        println!("{}", message.dimmed());
    }

    pub fn warn(&self, message: &str) {
        println!("{}", message.yellow());
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "Error:".red(), message);
    }
}

/// Render a table as plain text, for writing to files.
pub fn render_plain(table: TableStruct) -> std::io::Result<String> {
    Ok(table
        .color_choice(ColorChoice::Never)
        .display()?
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slurmq_core::{JobRecord, JobState};

    fn report(used: f64) -> UsageReport {
        UsageReport {
            active_jobs: vec![JobRecord::default(), JobRecord::default()],
            ..UsageReport::new("alice", "normal", used, 500, 30)
        }
    }

    fn action(disposition: Disposition, outcome: Option<CancelOutcome>) -> EnforcementAction {
        EnforcementAction {
            user: "alice".to_string(),
            job_id: 42,
            job_name: "train".to_string(),
            disposition,
            outcome,
        }
    }

    #[test]
    fn test_usage_row_rounding() {
        let usage = UserUsage {
            report: report(123.456),
            total_jobs: 7,
        };
        let row = UsageRow::from(&usage);
        assert_eq!(row.used_gpu_hours, 123.46);
        assert_eq!(row.remaining_gpu_hours, 376.54);
        assert_eq!(row.usage_percentage, 24.7);
        assert_eq!(row.status, QuotaStatus::Ok);
        assert_eq!(row.active_jobs, 2);
        assert_eq!(row.total_jobs, 7);
    }

    #[test]
    fn test_usage_csv() {
        let usage = UserUsage {
            report: report(450.0),
            total_jobs: 3,
        };
        let csv = usage_csv(&[UsageRow::from(&usage)]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some(
                "user,used_gpu_hours,quota_limit,remaining_gpu_hours,usage_percentage,status,active_jobs,total_jobs"
            )
        );
        assert_eq!(lines.next(), Some("alice,450.0,500,50.0,90.0,warning,2,3"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_check_json() {
        let report = report(600.0);
        let forecast = [QuotaForecast {
            hours_ahead: 24,
            available_gpu_hours: -50.0,
        }];
        let json = to_json(&CheckJson::new("Stella", &report, Some(&forecast))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["cluster"], "Stella");
        assert_eq!(value["status"], "exceeded");
        assert_eq!(value["active_jobs"], 2);
        assert_eq!(value["forecast"][0]["hours_ahead"], 24);

        let json = to_json(&CheckJson::new("Stella", &report, None)).unwrap();
        assert!(!json.contains("forecast"));
    }

    #[test]
    fn test_monitor_json_actions() {
        let actions = [action(Disposition::Cancelled, Some(CancelOutcome::AlreadyGone))];
        let json = to_json(&MonitorJson {
            cluster: "Stella",
            users: &[],
            actions: Some(&actions),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["actions"][0]["disposition"], "cancelled");
        assert_eq!(value["actions"][0]["outcome"]["outcome"], "already_gone");
    }

    #[test]
    fn test_action_messages() {
        assert_eq!(
            action_message(&action(Disposition::WouldCancel, None)),
            "Would cancel job 42 (alice) [dry-run]"
        );
        assert_eq!(
            action_message(&action(Disposition::GracePeriod, None)),
            "Warning job 42 (alice) - in grace period"
        );
        assert_eq!(
            action_message(&action(Disposition::Cancelled, Some(CancelOutcome::Cancelled))),
            "Cancelled job 42 (alice)"
        );
        assert_eq!(
            action_message(&action(
                Disposition::Cancelled,
                Some(CancelOutcome::Failed("denied".to_string()))
            )),
            "Failed to cancel job 42 (alice): denied"
        );
    }

    #[test]
    fn test_render_plain_table() {
        let usage = UserUsage {
            report: report(10.0),
            total_jobs: 1,
        };
        let text = render_plain(usage_table(&[UsageRow::from(&usage)])).unwrap();
        assert!(text.contains("Used (GPU-hrs)"));
        assert!(text.contains("alice"));
        assert!(text.contains("10.0"));
    }

    fn breakdown(gpu_hours: f64, jobs: usize, median_wait_hours: f64) -> SizeBreakdown {
        let stats = GroupStats {
            job_count: jobs,
            gpu_hours,
            median_wait_hours,
            long_wait_count: 0,
            long_wait_pct: 12.25,
        };
        SizeBreakdown {
            all: stats,
            small: stats,
            large: GroupStats::default(),
        }
    }

    fn group_report(previous: Option<SizeBreakdown>) -> GroupReport {
        GroupReport {
            group: GroupKey::Partition("gpu".to_string()),
            current: breakdown(1500.0, 30, 1.25),
            previous,
        }
    }

    #[test]
    fn test_with_change() {
        assert_eq!(
            with_change("1.5k".to_string(), 1500.0, Some(1000.0)),
            "1.5k (+50%)"
        );
        assert_eq!(with_change("10".to_string(), 5.0, Some(10.0)), "10 (-50%)");
        assert_eq!(with_change("10".to_string(), 10.0, Some(0.0)), "10");
        assert_eq!(with_change("10".to_string(), 10.0, None), "10");
    }

    #[test]
    fn test_stats_json() {
        let reports = [group_report(Some(breakdown(1000.0, 20, 2.5)))];
        let value = serde_json::to_value(StatsJson::new(7, &reports)).unwrap();
        assert_eq!(value["period_days"], 7);
        assert_eq!(value["current"]["gpu"]["all"]["job_count"], 30);
        assert_eq!(value["current"]["gpu"]["small"]["long_wait_pct"], 12.25);
        assert_eq!(value["current"]["gpu"]["large"]["job_count"], 0);
        assert_eq!(value["previous"]["gpu"]["all"]["gpu_hours"], 1000.0);

        let value = serde_json::to_value(StatsJson::new(7, &[group_report(None)])).unwrap();
        assert!(value.get("previous").is_none());
    }

    #[test]
    fn test_stats_tables() {
        let reports = [group_report(Some(breakdown(1000.0, 20, 2.5)))];
        let text = render_plain(utilization_table(&reports)).unwrap();
        assert!(text.contains("Partition"));
        assert!(text.contains("1.5k (+50%)"));
        assert!(text.contains("30 (+50%)"));

        let text = render_plain(wait_table(&reports, true)).unwrap();
        assert!(text.contains("Wait > 6h"));
        assert!(text.contains("1h15 (-50%)"));
        assert!(text.contains("12%"));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(3725), "01:02:05");
        assert_eq!(format_elapsed(90_000), "1-01:00:00");
    }

    #[test]
    fn test_efficiency_table() {
        let record = JobRecord {
            job_id: 12345,
            name: "train".to_string(),
            user: "alice".to_string(),
            n_cpus: 4,
            elapsed_seconds: 3600,
            cpu_seconds: 7200,
            req_mem: "8G".to_string(),
            max_rss: 2048 * 1024 * 1024,
            state: JobState::Completed,
            ..JobRecord::default()
        };
        let eff = JobEfficiency::from_record(&record);
        let text = render_plain(efficiency_table(&eff)).unwrap();
        assert!(text.contains("12345"));
        assert!(text.contains("50.00% of 04:00:00 core-walltime"));
        assert!(text.contains("2.00 GB"));
        assert!(text.contains("25.00% of 8.00 GB"));

        let value = serde_json::to_value(&eff).unwrap();
        assert_eq!(value["job_id"], 12345);
        assert_eq!(value["cpu_efficiency_pct"], 50.0);
        assert_eq!(value["recommendations"][0]["kind"], "less_memory");
    }

    #[test]
    fn test_printer_render_without_color() {
        let usage = UserUsage {
            report: report(10.0),
            total_jobs: 1,
        };
        let text = Printer::new(false)
            .render(usage_table(&[UsageRow::from(&usage)]))
            .unwrap();
        assert!(text.contains("alice"));
        assert!(!text.contains('\u{1b}'));
    }
}
