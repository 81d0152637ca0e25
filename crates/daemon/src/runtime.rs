// Daemon bootstrap and lifetime.
//
// Startup order matters: the vocabulary sheet names every other worksheet,
// the kill switch must read `bot_active = yes` before anything is sent, and
// the settings sheet decides every other table's refresh cadence. Once all
// tables are loaded the refresh loops and the notification pipeline run
// until ctrl-c or until the switch flips off.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sheetbot_common::vocabulary::WorksheetTitles;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::{ServiceAccountAuth, ServiceAccountKey, TokenProvider};
use crate::cache::refresh::spawn_refresh_loop;
use crate::cache::{Snapshot, TableCache};
use crate::config::{BotConfig, EnvConfig, RefreshConfig};
use crate::notify::{spawn_pipeline, Messenger, NotificationPipeline};
use crate::remote::sheets::SheetsClient;
use crate::remote::RemoteTable;
use crate::tables::{GroupsTable, KeyValueTable, LogSheet, NotificationsTable, SwitchTable, UsersTable};
use crate::telegram::TelegramMessenger;

pub const STARTED_MESSAGE: &str = "Started an application";
pub const STOPPED_MESSAGE: &str = "Stopped an application";

/// The operator turned the bot off through the switch worksheet.
#[derive(Debug, Error)]
#[error("bot is switched off in worksheet `{worksheet}`")]
pub struct BotSwitchedOff {
    pub worksheet: String,
}

/// Refresh cadence of every cached table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub switch: Duration,
    pub settings: Duration,
    pub users: Duration,
    pub users_retry: Duration,
    pub groups: Duration,
    pub notifications: Duration,
}

impl Schedule {
    /// Intervals from the settings sheet, falling back to the file config
    /// for anything missing. Fixed for the life of the process.
    pub fn from_settings(settings: &Snapshot<KeyValueTable>, refresh: &RefreshConfig) -> Self {
        let interval = |key: &str| {
            settings.seconds(key).filter(|d| !d.is_zero()).unwrap_or_else(|| refresh.default_interval())
        };
        let users = interval("users_update_time");
        Self {
            switch: refresh.switch_interval(),
            settings: refresh.settings_interval(),
            users,
            users_retry: settings.seconds("retry_time").filter(|d| !d.is_zero()).unwrap_or(users / 2),
            groups: interval("groups_update_time"),
            notifications: interval("notifications_update_time"),
        }
    }
}

/// Every table plus the pipeline, loaded and ready to run.
pub struct Bot<R: RemoteTable, M: Messenger> {
    pub switch: Arc<TableCache<SwitchTable, R>>,
    pub settings: Arc<TableCache<KeyValueTable, R>>,
    pub users: Arc<TableCache<UsersTable, R>>,
    pub groups: Arc<TableCache<GroupsTable, R>>,
    pub notifications: Arc<TableCache<NotificationsTable, R>>,
    pub log: LogSheet<R>,
    pub pipeline: Arc<NotificationPipeline<R, M>>,
    pub schedule: Schedule,
    /// Localized worksheet titles the tables were opened under.
    pub titles: WorksheetTitles,
}

impl<R: RemoteTable, M: Messenger> Bot<R, M> {
    /// Load every worksheet. `open` maps a worksheet title to its remote.
    pub async fn bootstrap<F>(
        open: F,
        i18n_worksheet: &str,
        refresh: &RefreshConfig,
        messenger: Arc<M>,
    ) -> Result<Self>
    where
        F: Fn(&str) -> R,
    {
        let default_retry = refresh.default_interval() / 2;

        let i18n = TableCache::initialize(KeyValueTable::new(i18n_worksheet), open(i18n_worksheet), default_retry)
            .await
            .with_context(|| format!("failed to load vocabulary worksheet `{i18n_worksheet}`"))?;
        let vocab = i18n.snapshot().vocabulary();
        let titles = vocab.worksheets.clone();

        let switch = TableCache::initialize(
            SwitchTable::new(vocab.clone()),
            open(&titles.switch),
            refresh.switch_interval() / 2,
        )
        .await
        .with_context(|| format!("failed to load switch worksheet `{}`", titles.switch))?;
        if !switch.snapshot().bot_active() {
            error!(worksheet = %titles.switch, "bot is switched off, refusing to start");
            return Err(BotSwitchedOff { worksheet: titles.switch.clone() }.into());
        }

        let settings = TableCache::initialize(
            KeyValueTable::new(titles.settings.clone()),
            open(&titles.settings),
            refresh.settings_interval() / 2,
        )
        .await
        .with_context(|| format!("failed to load settings worksheet `{}`", titles.settings))?;
        let schedule = Schedule::from_settings(&settings.snapshot(), refresh);

        let users = TableCache::initialize(UsersTable::new(vocab.clone()), open(&titles.users), schedule.users_retry)
            .await
            .with_context(|| format!("failed to load users worksheet `{}`", titles.users))?;
        let groups = TableCache::initialize(GroupsTable::new(vocab.clone()), open(&titles.groups), schedule.groups / 2)
            .await
            .with_context(|| format!("failed to load groups worksheet `{}`", titles.groups))?;
        let notifications = TableCache::initialize(
            NotificationsTable::new(vocab),
            open(&titles.notifications),
            schedule.notifications / 2,
        )
        .await
        .with_context(|| format!("failed to load notifications worksheet `{}`", titles.notifications))?;
        let log = LogSheet::initialize(open(&titles.logs))
            .await
            .with_context(|| format!("failed to load log worksheet `{}`", titles.logs))?;

        let settings = Arc::new(settings);
        let users = Arc::new(users);
        let groups = Arc::new(groups);
        let notifications = Arc::new(notifications);
        let pipeline = Arc::new(NotificationPipeline::new(
            notifications.clone(),
            users.clone(),
            groups.clone(),
            settings.clone(),
            messenger,
            refresh.delivery_timeout(),
        ));
        info!(?schedule, "all worksheets loaded");

        Ok(Self {
            switch: Arc::new(switch),
            settings,
            users,
            groups,
            notifications,
            log,
            pipeline,
            schedule,
            titles,
        })
    }

    /// Run refresh loops and the pipeline until `shutdown` resolves or the
    /// switch turns the bot off. The latter is returned as an error.
    pub async fn run_until<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks: Vec<JoinHandle<()>> = vec![
            spawn_refresh_loop(self.switch.clone(), self.schedule.switch, shutdown_rx.clone()),
            spawn_refresh_loop(self.settings.clone(), self.schedule.settings, shutdown_rx.clone()),
            spawn_refresh_loop(self.users.clone(), self.schedule.users, shutdown_rx.clone()),
            spawn_refresh_loop(self.groups.clone(), self.schedule.groups, shutdown_rx.clone()),
            spawn_pipeline(self.pipeline.clone(), self.schedule.notifications, shutdown_rx),
        ];
        self.write_log(STARTED_MESSAGE).await;
        info!("bot started");

        let mut switch_rx = self.switch.subscribe();
        tokio::pin!(shutdown);
        let outcome = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                changed = switch_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    if !switch_rx.borrow_and_update().bot_active() {
                        let worksheet = self.titles.switch.clone();
                        error!(%worksheet, "bot switched off, stopping");
                        break Err(BotSwitchedOff { worksheet }.into());
                    }
                }
            }
        };

        let _ = shutdown_tx.send(true);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        self.write_log(STOPPED_MESSAGE).await;
        info!("bot stopped");
        outcome
    }

    async fn write_log(&self, message: &str) {
        if let Err(e) = self.log.write("", message).await {
            warn!(error = %e, message, "failed to write log worksheet");
        }
    }
}

/// Production wiring: Google Sheets remotes and the Telegram messenger.
pub async fn run(config: BotConfig, env: EnvConfig) -> Result<()> {
    let http = reqwest::Client::new();

    let tokens = match (&env.sheets_token, &config.spreadsheet.credentials_path) {
        (Some(token), _) => TokenProvider::Static(token.clone()),
        (None, Some(path)) => {
            let key = ServiceAccountKey::load_from(path)
                .with_context(|| format!("failed to read service account key `{}`", path.display()))?;
            TokenProvider::ServiceAccount(ServiceAccountAuth::new(key, http.clone()))
        }
        (None, None) => bail!("no spreadsheet credentials: set SHEETBOT_SHEETS_TOKEN or spreadsheet.credentials_path"),
    };
    let url = config.spreadsheet.url.as_deref().context("spreadsheet.url is not configured")?;
    let client = SheetsClient::new(url, Arc::new(tokens), http.clone()).context("invalid spreadsheet link")?;

    let telegram_token = env.telegram_token.clone().context("SHEETBOT_TELEGRAM_TOKEN is not set")?;
    let messenger = Arc::new(TelegramMessenger::new(&config.telegram.api_base, telegram_token, http));

    info!(spreadsheet = %client.spreadsheet_id(), "connecting to spreadsheet");
    let bot = Bot::bootstrap(
        |title| client.worksheet(title),
        &config.spreadsheet.i18n_worksheet,
        &config.refresh,
        messenger,
    )
    .await?;

    bot.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
}
