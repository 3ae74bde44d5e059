use crate::api::gateway::{check_delete_confirmation, CreateClientPayload, GatewayClient};
use crate::api::ingestion::IngestionClient;
use crate::config::{Config, FileConfig, Overrides};
use crate::model::{ExportSource, HealthState, RunRecord, SubmitRequest, WorkflowKind};
use crate::orchestrator::{follow_run, refresh_history, PollKey, RunPoller};
use crate::qbo::cache::DetailCache;
use crate::qbo::record::Environment;
use crate::qbo::resolve_connection;
use crate::qbo::status::infer_status_now;
use crate::storage::{AuthStore, HistoryStore, KvStore};
use crate::text_summary;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Exit code when a watched run ends in `failed`.
pub const EXIT_RUN_FAILED: i32 = 2;
/// Exit code when watching is interrupted with Ctrl-C.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Cheap handle for sending lines to the writer task.
#[derive(Clone)]
struct Printer {
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl Printer {
    fn out(&self, line: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stdout(line.into()));
    }

    fn out_all(&self, lines: Vec<String>) {
        for line in lines {
            self.out(line);
        }
    }

    fn note(&self, line: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(line.into()));
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "hq-finops",
    version,
    about = "Finance operations console: submit workflow runs, track them and manage QuickBooks clients"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Base URL of the ingestion backend
    #[arg(long, global = true, env = "HQ_INGESTION_API_BASE_URL")]
    pub ingestion_url: Option<String>,

    /// Base URL of the QuickBooks gateway
    #[arg(long, global = true, env = "QBO_GATEWAY_BASE_URL")]
    pub gateway_url: Option<String>,

    /// API key sent to the gateway as X-API-Key
    #[arg(long, global = true, env = "QBO_GATEWAY_API_KEY", hide_env_values = true)]
    pub gateway_api_key: Option<String>,

    /// Delay between run status queries
    #[arg(long, global = true)]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request timeout
    #[arg(long, global = true)]
    pub request_timeout: Option<humantime::Duration>,

    /// Directory holding run history and the login flag
    #[arg(long, global = true, env = "HQ_FINOPS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (defaults to <config dir>/hq-finops/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "HQ_APP_USERNAME", hide = true)]
    pub app_username: Option<String>,

    #[arg(long, env = "HQ_APP_PASSWORD", hide = true, hide_env_values = true)]
    pub app_password: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            ingestion_url: self.ingestion_url.clone(),
            gateway_url: self.gateway_url.clone(),
            gateway_api_key: self.gateway_api_key.clone(),
            poll_interval: self.poll_interval.map(Into::into),
            request_timeout: self.request_timeout.map(Into::into),
            data_dir: self.data_dir.clone(),
            username: self.app_username.clone(),
            password: self.app_password.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in to the console
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out
    Logout,
    /// Check the ingestion backend
    Health,
    /// Submit a workflow run
    #[command(subcommand)]
    Submit(SubmitCommand),
    /// Poll a run until it finishes
    Watch {
        run_id: String,
        #[arg(long, value_enum)]
        kind: WorkflowKind,
    },
    /// Query a run once
    Status {
        run_id: String,
        #[arg(long, value_enum)]
        kind: WorkflowKind,
    },
    /// Show recent runs
    History {
        /// Re-query every run that has not finished
        #[arg(long)]
        refresh: bool,
    },
    /// Manage QuickBooks clients
    #[command(subcommand)]
    Clients(ClientsCommand),
}

#[derive(Debug, Subcommand)]
pub enum SubmitCommand {
    /// Bank-statement ingestion
    Part1 {
        #[command(flatten)]
        common: SubmitArgs,
    },
    /// QuickBooks export
    Part2 {
        #[command(flatten)]
        common: SubmitArgs,
        /// Where the export reads from
        #[arg(long, value_enum, default_value_t = ExportSource::Warehouse)]
        source: ExportSource,
    },
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Address notified when the run finishes
    #[arg(long, default_value = "")]
    pub notify_email: String,

    /// CSV file to upload (repeatable)
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// Defaults to the current year
    #[arg(long)]
    pub week_year: Option<i32>,

    /// Defaults to the current ISO week
    #[arg(long)]
    pub week_num: Option<u8>,

    /// Return right after submission instead of polling
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EnvironmentArg {
    Prod,
    Sandbox,
}

impl From<EnvironmentArg> for Environment {
    fn from(e: EnvironmentArg) -> Self {
        match e {
            EnvironmentArg::Prod => Environment::Prod,
            EnvironmentArg::Sandbox => Environment::Sandbox,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ClientsCommand {
    /// List clients with their connection status
    List,
    /// Show one client
    Show { client_id: String },
    /// Register a client
    Create {
        #[arg(long)]
        label: String,
        #[arg(long, value_enum)]
        environment: EnvironmentArg,
        #[arg(long)]
        realm_id: Option<String>,
        /// Extra metadata as a JSON object
        #[arg(long)]
        extra: Option<String>,
    },
    /// Delete a client
    Delete {
        client_id: String,
        /// Must be exactly DELETE
        #[arg(long, default_value = "")]
        confirm: String,
    },
    /// Get a link to reconnect a client to QuickBooks
    Reconnect {
        client_id: String,
        #[arg(long, value_enum)]
        environment: EnvironmentArg,
    },
}

/// Everything a command handler needs.
struct App {
    config: Config,
    history: HistoryStore,
    auth: AuthStore,
    print: Printer,
}

impl App {
    fn require_auth(&self) -> Result<()> {
        if !self.auth.is_authenticated() {
            anyhow::bail!("Not signed in. Run `hq-finops login` first.");
        }
        Ok(())
    }

    fn ingestion(&self) -> Result<Arc<IngestionClient>> {
        let client = IngestionClient::new(&self.config.ingestion_url, self.config.request_timeout)?;
        Ok(Arc::new(client))
    }

    fn gateway(&self) -> Result<Arc<GatewayClient>> {
        let client = GatewayClient::new(
            &self.config.gateway_url,
            self.config.gateway_api_key.clone(),
            self.config.request_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

/// Run the parsed command and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let file_config = match args.global.config.clone().or_else(FileConfig::default_path) {
        Some(path) => FileConfig::load(&path)?,
        None => FileConfig::default(),
    };
    let config = Config::resolve(args.global.overrides(), file_config)?;
    tracing::debug!(
        event = "config.resolved",
        ingestion_url = %config.ingestion_url,
        gateway_url = %config.gateway_url,
        data_dir = %config.data_dir.display()
    );

    let kv = KvStore::new(&config.data_dir);
    let (tx, out_handle) = spawn_output_writer();
    let app = App {
        history: HistoryStore::new(kv.clone()),
        auth: AuthStore::new(kv),
        config,
        print: Printer { tx },
    };

    let result = dispatch(&app, args.command).await;

    drop(app);
    let _ = out_handle.await;
    result
}

async fn dispatch(app: &App, command: Command) -> Result<i32> {
    match command {
        Command::Login { username, password } => {
            app.auth.login(&username, &password, &app.config.credentials)?;
            app.print.note("Signed in.");
            Ok(0)
        }
        Command::Logout => {
            app.auth.logout()?;
            app.print.note("Signed out.");
            Ok(0)
        }
        Command::Health => run_health(app).await,
        Command::Submit(cmd) => {
            app.require_auth()?;
            run_submit(app, cmd).await
        }
        Command::Watch { run_id, kind } => {
            app.require_auth()?;
            watch_run(app, PollKey::new(run_id, kind)).await
        }
        Command::Status { run_id, kind } => {
            app.require_auth()?;
            run_status(app, &run_id, kind).await
        }
        Command::History { refresh } => {
            app.require_auth()?;
            run_history(app, refresh).await
        }
        Command::Clients(cmd) => {
            app.require_auth()?;
            run_clients(app, cmd).await
        }
    }
}

async fn run_health(app: &App) -> Result<i32> {
    let client = app.ingestion()?;
    let (state, message) = match client.health().await {
        Ok(resp) => (resp.health_state(), resp.message),
        Err(e) => (HealthState::Unreachable, Some(e.to_string())),
    };
    app.print.out(text_summary::health_line(state, message.as_deref()));
    Ok(if state == HealthState::Healthy { 0 } else { 1 })
}

async fn run_submit(app: &App, cmd: SubmitCommand) -> Result<i32> {
    let (kind, common, source) = match cmd {
        SubmitCommand::Part1 { common } => (WorkflowKind::Part1, common, None),
        SubmitCommand::Part2 { common, source } => (WorkflowKind::Part2, common, Some(source)),
    };
    let (year, week) = crate::week::current_week_local();
    let request = SubmitRequest {
        kind,
        week_year: common.week_year.unwrap_or(year),
        week_num: common.week_num.unwrap_or(week),
        notify_email: common.notify_email.trim().to_string(),
        files: common.files,
        source,
    };

    let client = app.ingestion()?;
    let submitted = client.submit(&request).await?;
    app.history
        .save(RunRecord::queued(kind, submitted.run_id.clone()))
        .context("failed to record submitted run")?;
    app.print.out_all(text_summary::submitted_lines(&submitted));

    if common.no_watch {
        return Ok(0);
    }
    watch_with(app, client, PollKey::new(submitted.run_id, kind)).await
}

async fn watch_run(app: &App, key: PollKey) -> Result<i32> {
    let client = app.ingestion()?;
    watch_with(app, client, key).await
}

async fn watch_with(app: &App, client: Arc<IngestionClient>, key: PollKey) -> Result<i32> {
    let poller = RunPoller::new(client, app.config.poll_interval);
    let mut session = poller.start(key.clone());
    let print = app.print.clone();

    let finished = tokio::select! {
        last = follow_run(&mut session, &app.history, |snap| {
            print.note(text_summary::progress_line(&key, snap));
        }) => Some(last),
        _ = tokio::signal::ctrl_c() => None,
    };

    let Some(last) = finished else {
        session.stop();
        app.print.note(format!("Stopped watching {}.", key.run_id));
        return Ok(EXIT_INTERRUPTED);
    };

    app.print.out_all(text_summary::final_lines(&last));
    if let Some(err) = last.error {
        anyhow::bail!("polling {} failed: {err}", key.run_id);
    }
    Ok(match last.state {
        crate::model::RunState::Failed => EXIT_RUN_FAILED,
        _ => 0,
    })
}

async fn run_status(app: &App, run_id: &str, kind: WorkflowKind) -> Result<i32> {
    let client = app.ingestion()?;
    let resp = client
        .run_status(run_id, kind)
        .await
        .with_context(|| format!("failed to query run {run_id}"))?;
    if let Err(e) = app.history.update_state(run_id, &resp.state) {
        tracing::warn!(event = "history.update_failed", run_id, error = %e);
    }
    app.print.out_all(text_summary::status_lines(&resp));
    Ok(0)
}

async fn run_history(app: &App, refresh: bool) -> Result<i32> {
    if refresh {
        let client = app.ingestion()?;
        let refreshed = refresh_history(client.as_ref(), &app.history).await;
        app.print.out_all(text_summary::refreshed_history_lines(&refreshed));
    } else {
        app.print.out_all(text_summary::history_lines(&app.history.load()));
    }
    Ok(0)
}

async fn run_clients(app: &App, cmd: ClientsCommand) -> Result<i32> {
    let gateway = app.gateway()?;
    let cache = DetailCache::default();

    match cmd {
        ClientsCommand::List => {
            let rows = gateway.list_clients().await?;
            let statuses = futures::future::join_all(rows.iter().map(|row| {
                let gateway = Arc::clone(&gateway);
                let client_id = row.client_id.clone();
                resolve_connection(&cache, row, move || async move {
                    gateway.get_client(&client_id).await
                })
            }))
            .await;
            let table: Vec<_> = rows.into_iter().zip(statuses).collect();
            app.print.out_all(text_summary::client_rows(&table));
        }
        ClientsCommand::Show { client_id } => {
            let gw = Arc::clone(&gateway);
            let id = client_id.clone();
            let record = cache
                .get_or_fetch(&client_id, move || async move { gw.get_client(&id).await })
                .await
                .map_err(|e| anyhow::anyhow!(e.describe()))?;
            let status = infer_status_now(&record);
            app.print.out_all(text_summary::client_detail_lines(&record, status));
        }
        ClientsCommand::Create {
            label,
            environment,
            realm_id,
            extra,
        } => {
            let payload =
                CreateClientPayload::new(&label, environment.into(), realm_id, extra.as_deref())?;
            let created = gateway.create_client(&payload).await?;
            cache.invalidate(&created.client_id);
            app.print.note(format!(
                "Created client {} ({})",
                created.display_name, created.client_id
            ));
        }
        ClientsCommand::Delete { client_id, confirm } => {
            check_delete_confirmation(&confirm)?;
            gateway.delete_client(&client_id).await?;
            cache.invalidate(&client_id);
            app.print.note(format!("Deleted client {client_id}"));
        }
        ClientsCommand::Reconnect {
            client_id,
            environment,
        } => {
            let env = Environment::from(environment);
            let resp = gateway.reconnect_link(&client_id, &env.to_string()).await?;
            match resp.redirect_url.as_deref() {
                Some(url) => app.print.out(url),
                None => app
                    .print
                    .out(resp.message.unwrap_or_else(|| "Connection is being prepared".to_string())),
            }
        }
    }
    Ok(0)
}
