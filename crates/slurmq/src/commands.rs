//! Subcommand implementations.

use crate::monitor::{Cycle, Monitor};
use crate::output::{
    self, CheckJson, MonitorJson, Printer, ReportJson, StatsJson, StatusRow, UsageRow,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, SubsecRound, TimeDelta, Utc};
use colored::Colorize;
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use serde::Serialize;
use serde_json::json;
use slurmq_cli::{Args, Command, ConfigAction, ReportFormat};
use slurmq_config::{ClusterConfig, ConfigPaths, MonitoringConfig, OutputFormat, SlurmqConfig};
use slurmq_core::{
    DEFAULT_FORECAST_HOURS, GroupKey, GroupReport, JobEfficiency, QuotaChecker, QuotaForecast,
    SizeBreakdown, UsageReport, aggregate_by_user, samples, stats_groups,
};
use slurmq_slurm::{SacctQuery, Scancel, query_job, query_sacct};
use std::time::Duration;

/// Loaded config plus the global flags every command sees.
struct Context {
    config: SlurmqConfig,
    cluster: Option<String>,
    json: bool,
    quiet: bool,
    printer: Printer,
}

impl Context {
    fn load(args: &Args, paths: &ConfigPaths) -> Result<Self> {
        let config = SlurmqConfig::load(paths).into_diagnostic()?;
        Ok(Self {
            json: args.json || config.display.output_format == OutputFormat::Json,
            printer: Printer::new(config.display.use_color()),
            cluster: args.cluster.clone(),
            quiet: args.quiet,
            config,
        })
    }

    fn cluster(&self) -> Result<&ClusterConfig> {
        self.config
            .get_cluster(self.cluster.as_deref())
            .into_diagnostic()
    }

    fn checker(&self, cluster: &ClusterConfig) -> QuotaChecker {
        QuotaChecker::new(cluster.clone()).with_thresholds(
            self.config.monitoring.warning_threshold,
            self.config.monitoring.critical_threshold,
        )
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", output::to_json(value).into_diagnostic()?);
    Ok(())
}

fn current_user() -> Result<String> {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| miette!("Could not determine the current user; pass --user"))
}

pub async fn run(args: Args) -> Result<()> {
    let paths = ConfigPaths::new(args.config.clone());

    match args.command() {
        Command::Check {
            user,
            qos,
            forecast,
        } => check(&Context::load(&args, &paths)?, user, qos, forecast).await,
        Command::Report {
            format,
            output,
            qos,
            account,
            partition,
        } => {
            let ctx = Context::load(&args, &paths)?;
            report(&ctx, format, output.as_deref(), qos, account, partition).await
        }
        Command::Stats {
            days,
            compare,
            partition,
            qos,
            small_threshold,
        } => {
            let ctx = Context::load(&args, &paths)?;
            stats(&ctx, days, compare, &partition, &qos, small_threshold).await
        }
        Command::Efficiency { job_id } => efficiency(&Context::load(&args, &paths)?, job_id).await,
        Command::Monitor {
            interval,
            enforce,
            once,
        } => {
            let ctx = Context::load(&args, &paths)?;
            let interval = monitor_interval(&ctx.config.monitoring, interval);
            monitor(&ctx, interval, enforce, once).await
        }
        Command::Config { action } => config_command(&action, &paths, args.json),
    }
}

async fn check(
    ctx: &Context,
    user: Option<String>,
    qos: Option<String>,
    forecast: bool,
) -> Result<()> {
    let cluster = ctx.cluster()?;
    let user = match user {
        Some(user) => user,
        None => current_user()?,
    };

    let checker = ctx.checker(cluster);
    let query = SacctQuery::for_cluster(cluster)
        .user(user.as_str())
        .overrides(qos.clone(), None, None)
        .since(checker.window_cutoff(None));
    let records = query_sacct(&query)
        .await
        .into_diagnostic()
        .wrap_err("Error fetching Slurm data")?;

    let report = checker
        .generate_report(&user, &records, qos.as_deref())
        .into_diagnostic()?;
    let forecasts = if forecast {
        Some(
            checker
                .forecast_quota(&user, &records, &DEFAULT_FORECAST_HOURS, qos.as_deref())
                .into_diagnostic()?,
        )
    } else {
        None
    };

    for block in check_output(ctx, &cluster.name, &report, forecasts.as_deref())? {
        println!("{}", block.trim_end());
    }
    Ok(())
}

/// What `check` prints, one block per item. JSON always; tables only when
/// not quiet.
fn check_output(
    ctx: &Context,
    cluster: &str,
    report: &UsageReport,
    forecasts: Option<&[QuotaForecast]>,
) -> Result<Vec<String>> {
    if ctx.json {
        let json = output::to_json(&CheckJson::new(cluster, report, forecasts));
        return Ok(vec![json.into_diagnostic()?]);
    }
    if ctx.quiet {
        return Ok(Vec::new());
    }

    let table = output::check_table(cluster, report);
    let mut blocks = vec![ctx.printer.render(table).into_diagnostic()?];
    if let Some(forecasts) = forecasts {
        let table = output::forecast_table(forecasts);
        blocks.push(format!("\n{}", "Quota forecast".bold()));
        blocks.push(ctx.printer.render(table).into_diagnostic()?);
    }
    Ok(blocks)
}

async fn report(
    ctx: &Context,
    format: ReportFormat,
    output_path: Option<&Utf8Path>,
    qos: Option<String>,
    account: Option<String>,
    partition: Option<String>,
) -> Result<()> {
    let cluster = ctx.cluster()?;
    let checker = ctx.checker(cluster);
    let query = SacctQuery::for_cluster(cluster)
        .overrides(qos.clone(), account, partition)
        .since(checker.window_cutoff(None));
    let records = query_sacct(&query)
        .await
        .into_diagnostic()
        .wrap_err("Error fetching Slurm data")?;

    let target_qos = checker
        .target_qos(qos.as_deref())
        .into_diagnostic()?
        .to_string();
    let rows: Vec<UsageRow> = aggregate_by_user(&records, &checker, qos.as_deref())
        .into_diagnostic()?
        .iter()
        .map(UsageRow::from)
        .collect();

    let format = match format {
        ReportFormat::Rich if ctx.json => ReportFormat::Json,
        other => other,
    };

    let content = match (format, output_path) {
        (ReportFormat::Json, _) => output::to_json(&ReportJson {
            cluster: &cluster.name,
            qos: Some(target_qos.as_str()),
            users: &rows,
        })
        .into_diagnostic()?,
        (ReportFormat::Csv, _) => output::usage_csv(&rows).into_diagnostic()?,
        (ReportFormat::Rich, Some(_)) => {
            output::render_plain(output::usage_table(&rows)).into_diagnostic()?
        }
        (ReportFormat::Rich, None) => {
            println!(
                "{}",
                format!("GPU usage report - {} ({target_qos})", cluster.name).bold()
            );
            ctx.printer.print_table(output::usage_table(&rows));
            if rows.is_empty() {
                ctx.printer.note("No jobs in the rolling window.");
            }
            return Ok(());
        }
    };

    match output_path {
        Some(path) => {
            std::fs::write(path, content)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to write report to {path}"))?;
            if !ctx.quiet {
                println!("Report written to {path}");
            }
        }
        None => println!("{}", content.trim_end()),
    }
    Ok(())
}

async fn stats(
    ctx: &Context,
    days: u32,
    compare: bool,
    partitions: &[String],
    qos: &[String],
    small_threshold: f64,
) -> Result<()> {
    // An unknown --cluster is an error; a missing default only matters
    // when no partition or QoS was given
    let cluster = match ctx.cluster {
        Some(_) => Some(ctx.cluster()?),
        None => ctx.config.get_cluster(None).ok(),
    };
    let groups = stats_groups(partitions, qos, cluster).into_diagnostic()?;

    let now = Utc::now().trunc_subsecs(0);
    let period = TimeDelta::days(i64::from(days));
    let out_of_range = || miette!("--days {days} is out of range");
    let start = now.checked_sub_signed(period).ok_or_else(out_of_range)?;
    let previous_start = start.checked_sub_signed(period).ok_or_else(out_of_range)?;

    let mut reports = Vec::with_capacity(groups.len());
    for group in groups {
        let current = group_breakdown(&group, start, now, small_threshold).await?;
        let previous = if compare {
            Some(group_breakdown(&group, previous_start, start, small_threshold).await?)
        } else {
            None
        };
        reports.push(GroupReport {
            group,
            current,
            previous,
        });
    }

    if reports.iter().all(|r| r.current.all.job_count == 0) {
        const NO_JOBS: &str = "No jobs found in the specified period";
        if ctx.json {
            return print_json(&json!({ "error": NO_JOBS }));
        }
        if !ctx.quiet {
            ctx.printer.warn(NO_JOBS);
        }
        return Ok(());
    }

    if ctx.json {
        return print_json(&StatsJson::new(days, &reports));
    }
    if ctx.quiet {
        return Ok(());
    }

    let small = format!("Wait Times - Small (\u{2264}{small_threshold} GPU-h)");
    let large = format!("Wait Times - Large (>{small_threshold} GPU-h)");
    println!("{}", format!("GPU Utilization (Last {days} Days)").bold());
    ctx.printer.print_table(output::utilization_table(&reports));
    println!("\n{}", small.bold());
    ctx.printer.print_table(output::wait_table(&reports, true));
    println!("\n{}", large.bold());
    ctx.printer.print_table(output::wait_table(&reports, false));
    if compare {
        ctx.printer
            .note(&format!("\nChanges are relative to the previous {days} days."));
    }
    Ok(())
}

/// Jobs of one group between `start` and `end`, split by size.
async fn group_breakdown(
    group: &GroupKey,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    small_threshold: f64,
) -> Result<SizeBreakdown> {
    let query = SacctQuery::between(start, end).overrides(
        group.qos().map(str::to_string),
        None,
        group.partition().map(str::to_string),
    );
    let records = query_sacct(&query)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Error fetching Slurm data for {}", group.name()))?;
    Ok(SizeBreakdown::new(&samples(&records), small_threshold))
}

async fn efficiency(ctx: &Context, job_id: u64) -> Result<()> {
    let record = query_job(job_id)
        .await
        .into_diagnostic()
        .wrap_err("Error fetching Slurm data")?
        .ok_or_else(|| miette!("Job {job_id} not found"))?;
    let efficiency = JobEfficiency::from_record(&record);

    if ctx.json {
        return print_json(&efficiency);
    }
    if !ctx.quiet {
        ctx.printer.print_table(output::efficiency_table(&efficiency));
        ctx.printer
            .print_recommendations(&efficiency.recommendations);
    }
    Ok(())
}

/// Seconds between monitor cycles: `--interval`, else the configured minutes.
fn monitor_interval(monitoring: &MonitoringConfig, interval: Option<u64>) -> u64 {
    interval.unwrap_or_else(|| u64::from(monitoring.check_interval_minutes) * 60)
}

async fn monitor(ctx: &Context, interval: u64, enforce: bool, once: bool) -> Result<()> {
    let cluster = ctx.cluster()?;
    let monitor = Monitor::new(&ctx.config, cluster, enforce);
    let canceller = Scancel::default();

    if enforce && !monitor.enforcing() && !ctx.json {
        ctx.printer.warn("Enforcement not enabled in config.");
    }

    if once {
        let cycle = monitor
            .cycle(&canceller)
            .await
            .into_diagnostic()
            .wrap_err("Error fetching Slurm data")?;
        return render_cycle(ctx, monitor.cluster(), &cycle);
    }

    if !ctx.json && !ctx.quiet {
        println!(
            "{} (refresh every {interval}s, Ctrl+C to exit)\n",
            format!("Monitoring {}", cluster.name).bold()
        );
    }

    monitor
        .run(&canceller, Duration::from_secs(interval.max(1)), |result| {
            let rendered = result
                .into_diagnostic()
                .and_then(|cycle| render_cycle(ctx, cluster, &cycle));
            if let Err(e) = rendered {
                ctx.printer.error(&e.to_string());
            }
        })
        .await;

    if !ctx.json && !ctx.quiet {
        ctx.printer.note("\nStopped.");
    }
    Ok(())
}

fn render_cycle(ctx: &Context, cluster: &ClusterConfig, cycle: &Cycle) -> Result<()> {
    let rows: Vec<StatusRow> = cycle.statuses.iter().map(StatusRow::from).collect();

    if ctx.json {
        return print_json(&MonitorJson {
            cluster: &cluster.name,
            users: &rows,
            actions: cycle.actions.as_deref(),
        });
    }

    if !ctx.quiet {
        println!("{}", format!("Active users: {}", cluster.name).bold());
        ctx.printer.print_table(output::status_table(&rows));
        if rows.is_empty() {
            ctx.printer.note("No users with active jobs.");
        }
        ctx.printer
            .note(&format!("Last updated: {}", Local::now().format("%H:%M:%S")));
    }

    if let Some(actions) = &cycle.actions {
        ctx.printer.print_actions(actions);
    }
    Ok(())
}

fn config_command(action: &ConfigAction, paths: &ConfigPaths, json: bool) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = paths.resolve();
            let exists = path.as_ref().is_some_and(|p| p.exists());
            if json {
                return print_json(&json!({ "path": path, "exists": exists }));
            }
            match path {
                Some(p) if exists => println!("{p}"),
                Some(p) => println!("{p} (not found)"),
                None => println!("No config path could be determined; set SLURMQ_CONFIG or HOME"),
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = SlurmqConfig::load(paths).into_diagnostic()?;
            if json {
                return print_json(&config);
            }
            print!("{}", config.to_toml().into_diagnostic()?);
            Ok(())
        }
        ConfigAction::Validate { file } => validate(file.as_deref(), paths, json),
        ConfigAction::Init {
            force,
            id,
            name,
            account,
            qos,
            quota,
            window,
        } => {
            let cluster = ClusterConfig {
                name: name.clone().unwrap_or_else(|| capitalize(id)),
                account: account.clone(),
                qos: qos.clone(),
                quota_limit: *quota,
                rolling_window_days: *window,
                ..ClusterConfig::default()
            };
            init_config(&config_path(paths)?, id, cluster, *force, json)
        }
        ConfigAction::Set { key, value } => {
            let path = config_path(paths)?;
            if !path.exists() {
                return Err(miette!(
                    "Config file not found: {path}; run `slurmq config init` first"
                ));
            }
            SlurmqConfig::set_in_file(&path, key, value).into_diagnostic()?;
            if json {
                return print_json(&json!({ "path": path, "key": key, "value": value }));
            }
            println!("Set {key} = {value} in {path}");
            Ok(())
        }
    }
}

fn config_path(paths: &ConfigPaths) -> Result<Utf8PathBuf> {
    paths
        .resolve()
        .ok_or_else(|| miette!("No config path could be determined; set SLURMQ_CONFIG or HOME"))
}

fn capitalize(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Write a config holding `cluster` under `id`, made the default.
fn init_config(
    path: &Utf8Path,
    id: &str,
    cluster: ClusterConfig,
    force: bool,
    json: bool,
) -> Result<()> {
    if path.exists() && !force {
        return Err(miette!(
            "Config file already exists at {path}; pass --force to overwrite"
        ));
    }

    let mut config = SlurmqConfig {
        default_cluster: id.to_string(),
        ..SlurmqConfig::default()
    };
    config.clusters.insert(id.to_string(), cluster);
    if !config.is_valid() {
        let problems: Vec<String> = config.validate().iter().map(ToString::to_string).collect();
        return Err(miette!("Refusing to write config: {}", problems.join("; ")));
    }

    config.save(path).into_diagnostic()?;
    tracing::debug!(%path, cluster = id, "wrote config");
    if json {
        return print_json(&json!({ "path": path, "default_cluster": id }));
    }
    println!("Config written to {path}");
    Ok(())
}

fn validate(file: Option<&Utf8Path>, paths: &ConfigPaths, json: bool) -> Result<()> {
    let path = file.map(Utf8Path::to_path_buf).or_else(|| paths.resolve());
    let config = match &path {
        Some(p) if p.exists() => {
            SlurmqConfig::load_from(Some(p), std::iter::empty::<(String, String)>())
                .into_diagnostic()?
        }
        Some(p) => return Err(miette!("Config file not found: {p}")),
        None => return Err(miette!("No config file to validate")),
    };

    let valid = config.is_valid();
    let issues = config.validate();
    let errors = issues.iter().filter(|i| !i.is_warning()).count();

    if json {
        let issues: Vec<_> = issues
            .iter()
            .map(|i| {
                json!({
                    "level": if i.is_warning() { "warning" } else { "error" },
                    "message": i.to_string(),
                })
            })
            .collect();
        print_json(&json!({ "path": path, "valid": valid, "issues": issues }))?;
    } else {
        for issue in &issues {
            let level = if issue.is_warning() {
                "warning".yellow()
            } else {
                "error".red()
            };
            println!("{level}: {issue}");
        }
        if valid {
            println!("{}", "Configuration is valid".green());
        }
    }

    if !valid {
        return Err(miette!("{errors} configuration error(s) found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_validate_accepts_warnings() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
default_cluster = "stella"

[clusters.stella]
name = "Stella"
quota_limit = 0
"#,
        );
        assert!(validate(Some(&path), &ConfigPaths::default(), true).is_ok());
    }

    #[test]
    fn test_validate_rejects_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
default_cluster = "missing"

[monitoring]
warning_threshold = 1.5
"#,
        );
        assert!(validate(Some(&path), &ConfigPaths::default(), true).is_err());
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nope.toml")).unwrap();
        assert!(validate(Some(&path), &ConfigPaths::default(), true).is_err());
    }

    #[test]
    fn test_context_cluster_selection() {
        let ctx = Context {
            config: SlurmqConfig::from_toml_str(
                r#"
default_cluster = "stella"

[clusters.stella]
name = "Stella"

[clusters.ruby]
name = "Ruby"
"#,
            )
            .unwrap(),
            cluster: Some("ruby".to_string()),
            json: true,
            quiet: true,
            printer: Printer::new(false),
        };
        assert_eq!(ctx.cluster().unwrap().name, "Ruby");

        let ctx = Context {
            cluster: None,
            ..ctx
        };
        assert_eq!(ctx.cluster().unwrap().name, "Stella");

        let ctx = Context {
            cluster: Some("emerald".to_string()),
            ..ctx
        };
        assert!(ctx.cluster().is_err());
    }

    fn reload(path: &Utf8Path) -> SlurmqConfig {
        SlurmqConfig::load_from(Some(path), std::iter::empty::<(String, String)>()).unwrap()
    }

    fn context(json: bool, quiet: bool) -> Context {
        Context {
            config: SlurmqConfig::default(),
            cluster: None,
            json,
            quiet,
            printer: Printer::new(false),
        }
    }

    #[test]
    fn test_check_output_respects_quiet() {
        let report = UsageReport::new("alice", "normal", 120.0, 500, 30);
        let forecast = [QuotaForecast {
            hours_ahead: 24,
            available_gpu_hours: 400.0,
        }];

        let quiet = check_output(&context(false, true), "Stella", &report, Some(&forecast));
        assert!(quiet.unwrap().is_empty());

        let blocks = check_output(&context(true, true), "Stella", &report, None).unwrap();
        assert_eq!(blocks.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&blocks[0]).unwrap();
        assert_eq!(value["user"], "alice");

        let blocks =
            check_output(&context(false, false), "Stella", &report, Some(&forecast)).unwrap();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].contains("alice"));
        assert!(blocks[1].contains("Quota forecast"));
        assert!(blocks[2].contains("400.0"));
    }

    #[test]
    fn test_monitor_interval_defaults_to_config() {
        let monitoring = MonitoringConfig {
            check_interval_minutes: 5,
            ..MonitoringConfig::default()
        };
        assert_eq!(monitor_interval(&monitoring, None), 300);
        assert_eq!(monitor_interval(&monitoring, Some(12)), 12);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("stella"), "Stella");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_init_then_set() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("slurmq/config.toml")).unwrap();
        let paths = ConfigPaths::new(Some(path.clone()));
        let init = ConfigAction::Init {
            force: false,
            id: "ruby".to_string(),
            name: None,
            account: "lab".to_string(),
            qos: vec!["normal".to_string(), "long".to_string()],
            quota: 200,
            window: 14,
        };

        config_command(&init, &paths, true).unwrap();
        let config = reload(&path);
        let cluster = config.get_cluster(None).unwrap();
        assert_eq!(cluster.name, "Ruby");
        assert_eq!(cluster.account, "lab");
        assert_eq!(cluster.qos, vec!["normal", "long"]);
        assert_eq!(cluster.quota_limit, 200);
        assert_eq!(cluster.rolling_window_days, 14);

        // Existing file needs --force
        assert!(config_command(&init, &paths, true).is_err());

        let set = ConfigAction::Set {
            key: "display.output_format".to_string(),
            value: "plain".to_string(),
        };
        config_command(&set, &paths, true).unwrap();
        let config = reload(&path);
        assert_eq!(config.display.output_format, OutputFormat::Plain);
        assert!(!config.display.use_color());
        assert_eq!(config.default_cluster, "ruby");

        let bogus = ConfigAction::Set {
            key: "display.output_format".to_string(),
            value: "fancy".to_string(),
        };
        assert!(config_command(&bogus, &paths, true).is_err());
    }

    #[test]
    fn test_init_refuses_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        let cluster = ClusterConfig {
            qos: Vec::new(),
            ..ClusterConfig::new("Ruby")
        };
        assert!(init_config(&path, "ruby", cluster, false, true).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_set_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        let set = ConfigAction::Set {
            key: "display.color".to_string(),
            value: "false".to_string(),
        };
        assert!(config_command(&set, &ConfigPaths::new(Some(path)), true).is_err());
    }
}
