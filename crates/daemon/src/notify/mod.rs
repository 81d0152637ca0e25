// Two-phase notification delivery.
//
// Each cycle runs a plan pass and then a deliver pass over the
// notifications table:
//   plan:    active + due  → preview to superadmin groups → planned
//   deliver: planned + due → users, groups, admin report  → done
// The status column is the only record of progress, so a notification
// moves forward exactly once per phase. Recipients are delivered to
// independently; a failed or slow recipient never blocks the others or the
// status transition.

pub mod messenger;
pub mod recording;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use sheetbot_common::keyboard::InlineKeyboard;
use sheetbot_common::notification::NotificationStatus;
use sheetbot_common::template;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::{Table, TableCache};
use crate::remote::RemoteTable;
use crate::tables::notifications::STATUS_COLUMN;
use crate::tables::{GroupsTable, KeyValueTable, Notification, NotificationsTable, UsersTable};
pub use messenger::{DeliveryError, Messenger, TextFormat};

pub const PLANNED_TEMPLATE: &str = "notification_planned_admin_groups_template";
pub const PLANNED_CONDITION_TEMPLATE: &str = "notification_planned_admin_groups_condition_template";
pub const ADMIN_TEMPLATE: &str = "notification_admin_groups_template";
pub const ADMIN_CONDITION_TEMPLATE: &str = "notification_admin_groups_condition_template";

/// One message to one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub chat_id: String,
    pub text: String,
    pub picture: Option<String>,
    pub keyboard: Option<InlineKeyboard>,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub planned: usize,
    pub delivered: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub transitions_failed: usize,
}

pub struct NotificationPipeline<R, M> {
    notifications: Arc<TableCache<NotificationsTable, R>>,
    users: Arc<TableCache<UsersTable, R>>,
    groups: Arc<TableCache<GroupsTable, R>>,
    settings: Arc<TableCache<KeyValueTable, R>>,
    messenger: Arc<M>,
    delivery_timeout: Duration,
}

impl<R: RemoteTable, M: Messenger> NotificationPipeline<R, M> {
    pub fn new(
        notifications: Arc<TableCache<NotificationsTable, R>>,
        users: Arc<TableCache<UsersTable, R>>,
        groups: Arc<TableCache<GroupsTable, R>>,
        settings: Arc<TableCache<KeyValueTable, R>>,
        messenger: Arc<M>,
        delivery_timeout: Duration,
    ) -> Self {
        Self { notifications, users, groups, settings, messenger, delivery_timeout }
    }

    /// One full cycle at `now`. With `refresh` the notifications table is
    /// re-fetched first; a failed refresh falls back to the current snapshot.
    pub async fn run_cycle(&self, now: NaiveDateTime, refresh: bool) -> CycleReport {
        let span = info_span!("notification_cycle", cycle = %Uuid::new_v4());
        async move {
            info!("started performing notifications");
            if refresh {
                match self.notifications.refresh().await {
                    Ok(records) => debug!(records, "refreshed notifications"),
                    Err(e) => warn!(error = %e, "notification refresh failed, using current snapshot"),
                }
            }
            let mut report = CycleReport::default();
            let unplanned = self.plan_pass(now, &mut report).await;
            info!(planned = report.planned, "planned new notifications");
            self.deliver_pass(now, &unplanned, &mut report).await;
            info!(
                delivered = report.delivered,
                sent = report.messages_sent,
                failed = report.messages_failed,
                "done performing notifications"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Returns the rows whose `planned` status never reached the sheet.
    async fn plan_pass(&self, now: NaiveDateTime, report: &mut CycleReport) -> HashSet<usize> {
        let mut unplanned = HashSet::new();
        let due = self.notifications.snapshot().to_plan(now);
        for notification in due {
            let template_key = if notification.condition().is_some() {
                PLANNED_CONDITION_TEMPLATE
            } else {
                PLANNED_TEMPLATE
            };
            let preview = self.render(template_key, &notification);
            let targets = self
                .groups
                .snapshot()
                .superadmin_groups()
                .map(|g| Delivery {
                    chat_id: g.chat_id.clone(),
                    text: preview.clone(),
                    picture: notification.picture().map(str::to_string),
                    keyboard: None,
                })
                .collect();
            self.fan_out(targets, report).await;

            if self.advance(&notification, NotificationStatus::Planned).await {
                report.planned += 1;
            } else {
                report.transitions_failed += 1;
                unplanned.insert(notification.row);
            }
        }
        unplanned
    }

    /// `skip` holds rows the sheet still shows as active: the next refresh
    /// plans them again, so delivering now would send them twice.
    async fn deliver_pass(&self, now: NaiveDateTime, skip: &HashSet<usize>, report: &mut CycleReport) {
        let ready = self.notifications.snapshot().ready(now);
        for notification in ready {
            if skip.contains(&notification.row) {
                warn!(row = notification.row, "holding back delivery until the planned status is recorded");
                continue;
            }
            let targets = self.audience(&notification);
            info!(row = notification.row, recipients = targets.len(), "delivering notification");
            self.fan_out(targets, report).await;

            if self.advance(&notification, NotificationStatus::Done).await {
                report.delivered += 1;
            } else {
                report.transitions_failed += 1;
            }
        }
    }

    /// Every message a ready notification produces.
    pub fn audience(&self, notification: &Notification) -> Vec<Delivery> {
        let picture = notification.picture().map(str::to_string);
        let keyboard = notification.keyboard();
        let mut targets = Vec::new();

        let users = self.users.snapshot();
        for user in users.audience(self.users.table(), notification.condition()) {
            targets.push(Delivery {
                chat_id: user.chat_id.clone(),
                text: notification.text_markdown.clone(),
                picture: picture.clone(),
                keyboard: keyboard.clone(),
            });
        }

        let groups = self.groups.snapshot();
        if notification.state.is_empty() {
            for group in groups.normal_groups() {
                targets.push(Delivery {
                    chat_id: group.chat_id.clone(),
                    text: notification.text_markdown.clone(),
                    picture: picture.clone(),
                    keyboard: None,
                });
            }
        }

        let template_key =
            if notification.condition().is_some() { ADMIN_CONDITION_TEMPLATE } else { ADMIN_TEMPLATE };
        let report_text = self.render(template_key, notification);
        for group in groups.admin_groups() {
            targets.push(Delivery {
                chat_id: group.chat_id.clone(),
                text: report_text.clone(),
                picture: picture.clone(),
                keyboard: None,
            });
        }
        targets
    }

    /// Settings template with `{notification.<column>}` filled in. Falls
    /// back to the notification text when the template is not configured.
    fn render(&self, key: &str, notification: &Notification) -> String {
        let settings = self.settings.snapshot();
        let Some(template) = settings.value(key).filter(|t| !t.is_empty()) else {
            warn!(setting = key, "template missing from settings, sending notification text");
            return notification.text_markdown.clone();
        };
        let table = self.notifications.table();
        template::render(template, |placeholder| {
            let column = placeholder.strip_prefix("notification.")?;
            table.cell(notification, column)
        })
    }

    async fn advance(&self, notification: &Notification, next: NotificationStatus) -> bool {
        if !notification.status.can_advance_to(next) {
            return false;
        }
        let word = self.notifications.table().status_word(next).to_string();
        match self.notifications.update_field(&notification.uid(), STATUS_COLUMN, &word).await {
            Ok(_) => true,
            Err(e) => {
                warn!(row = notification.row, status = %word, error = %e, "failed to record notification status");
                false
            }
        }
    }

    async fn fan_out(&self, targets: Vec<Delivery>, report: &mut CycleReport) {
        let mut tasks = JoinSet::new();
        for delivery in targets {
            let messenger = self.messenger.clone();
            let timeout = self.delivery_timeout;
            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, send(messenger.as_ref(), &delivery))
                    .await
                    .unwrap_or(Err(DeliveryError::Timeout(timeout)));
                (delivery.chat_id, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.messages_sent += 1,
                Ok((chat_id, Err(e))) => {
                    warn!(chat_id = %chat_id, error = %e, "delivery failed");
                    report.messages_failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "delivery task aborted");
                    report.messages_failed += 1;
                }
            }
        }
    }
}

async fn send<M: Messenger>(messenger: &M, delivery: &Delivery) -> Result<(), DeliveryError> {
    let keyboard = delivery.keyboard.as_ref();
    match delivery.picture.as_deref() {
        Some(photo) => {
            messenger
                .send_photo(&delivery.chat_id, photo, &delivery.text, TextFormat::Markdown, keyboard)
                .await
        }
        None => {
            messenger.send_text(&delivery.chat_id, &delivery.text, TextFormat::Markdown, keyboard).await
        }
    }
}

/// Run the first cycle right away without refreshing, then one refreshing
/// cycle per `interval` until shutdown. Shutdown abandons a cycle in
/// progress; unsent notifications keep their status and go out next start.
pub fn spawn_pipeline<R: RemoteTable, M: Messenger>(
    pipeline: Arc<NotificationPipeline<R, M>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut refresh = false;
        loop {
            tokio::select! {
                _ = pipeline.run_cycle(Local::now().naive_local(), refresh) => {},
                _ = shutdown_rx.changed() => break,
            }
            refresh = true;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!("notification pipeline shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemorySheet;
    use chrono::NaiveDate;
    use recording::RecordingMessenger;
    use sheetbot_common::vocabulary::Vocabulary;

    type Pipeline = NotificationPipeline<Arc<MemorySheet>, RecordingMessenger>;

    const RETRY: Duration = Duration::from_secs(1);

    struct Fixture {
        notifications: Arc<MemorySheet>,
        messenger: Arc<RecordingMessenger>,
        pipeline: Pipeline,
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn notification_rows(rows: &[[&str; 9]]) -> Vec<Vec<String>> {
        let mut all = vec![
            vec![
                "scheldue_date", "is_active", "text_markdown", "state", "button_text",
                "button_answer", "send_picture", "condition", "document_link",
            ],
            vec!["dd.mm.yyyy hh:mm", "yes/no", "", "", "", "", "", "", ""],
        ];
        all.extend(rows.iter().map(|r| r.to_vec()));
        all.into_iter().map(|r| r.into_iter().map(str::to_string).collect()).collect()
    }

    async fn fixture(notifications: &[[&str; 9]], timeout: Duration) -> Fixture {
        let vocab = Vocabulary::default();
        let notification_sheet = Arc::new(MemorySheet::new(&notification_rows(notifications)));
        let users_sheet = Arc::new(MemorySheet::new(&[
            vec!["chat_id", "username", "datetime", "is_active", "is_bot_banned", "state", "vip"],
            vec!["u1", "ann", "", "yes", "no", "", ""],
            vec!["u2", "bob", "", "yes", "", "", "yes"],
            vec!["u3", "cid", "", "no", "no", "", "yes"],
            vec!["u4", "dee", "", "yes", "no", "", "yes"],
        ]));
        let groups_sheet = Arc::new(MemorySheet::new(&[
            vec!["chat_id", "name", "is_admin", "is_active"],
            vec!["id", "title", "no/yes/super", "yes/no"],
            vec!["g-normal", "Everyone", "no", "yes"],
            vec!["g-admin", "Admins", "yes", "yes"],
            vec!["g-super", "Owners", "super", "yes"],
            vec!["g-off", "Archive", "no", "no"],
        ]));
        let settings_sheet = Arc::new(MemorySheet::new(&[
            vec!["key", "value"],
            vec![PLANNED_TEMPLATE, "Planned: {notification.text_markdown} at {notification.scheldue_date}"],
            vec![PLANNED_CONDITION_TEMPLATE, "Planned for {notification.condition}: {notification.text_markdown}"],
            vec![ADMIN_TEMPLATE, "Sent: {notification.text_markdown}"],
            vec![ADMIN_CONDITION_TEMPLATE, "Sent to {notification.condition}: {notification.text_markdown}"],
        ]));

        let pipeline = NotificationPipeline::new(
            Arc::new(
                TableCache::initialize(NotificationsTable::new(vocab.clone()), notification_sheet.clone(), RETRY)
                    .await
                    .unwrap(),
            ),
            Arc::new(TableCache::initialize(UsersTable::new(vocab.clone()), users_sheet, RETRY).await.unwrap()),
            Arc::new(TableCache::initialize(GroupsTable::new(vocab), groups_sheet, RETRY).await.unwrap()),
            Arc::new(TableCache::initialize(KeyValueTable::new("settings"), settings_sheet, RETRY).await.unwrap()),
            Arc::new(RecordingMessenger::new()),
            timeout,
        );
        let messenger = pipeline.messenger.clone();
        Fixture { notifications: notification_sheet, messenger, pipeline }
    }

    const PLAIN: [&str; 9] = ["01.05.2024 10:00", "yes", "Hello", "", "", "", "", "", ""];

    fn recipients(messenger: &RecordingMessenger) -> Vec<String> {
        let mut ids: Vec<_> = messenger.sent().into_iter().map(|m| m.chat_id).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn due_notification_is_planned_then_delivered() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        let report = fx.pipeline.run_cycle(now(), false).await;

        assert_eq!(report.planned, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.messages_failed, 0);
        assert_eq!(fx.notifications.cell(3, 2), "done");

        let previews = fx.messenger.sent_to("g-super");
        assert_eq!(previews[0].text, "Planned: Hello at 01.05.2024 10:00");
        assert_eq!(previews[1].text, "Sent: Hello");
        assert_eq!(fx.messenger.sent_to("g-admin")[0].text, "Sent: Hello");
        assert_eq!(fx.messenger.sent_to("u1")[0].text, "Hello");
        assert_eq!(fx.messenger.sent_to("g-normal")[0].text, "Hello");
        assert_eq!(recipients(&fx.messenger), vec!["g-admin", "g-normal", "g-super", "g-super", "u1", "u4"]);
        assert!(fx.messenger.sent().iter().all(|m| m.format == TextFormat::Markdown));
    }

    #[tokio::test]
    async fn each_notification_is_sent_once() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        fx.pipeline.run_cycle(now(), false).await;
        let before = fx.messenger.sent().len();

        let report = fx.pipeline.run_cycle(now(), true).await;
        assert_eq!(report, CycleReport::default());
        assert_eq!(fx.messenger.sent().len(), before);
    }

    #[tokio::test]
    async fn future_notifications_wait() {
        let fx = fixture(&[["03.05.2024 10:00", "yes", "Later", "", "", "", "", "", ""]], Duration::from_secs(30)).await;
        let report = fx.pipeline.run_cycle(now(), false).await;
        assert_eq!(report, CycleReport::default());
        assert!(fx.messenger.sent().is_empty());
        assert_eq!(fx.notifications.cell(3, 2), "yes");
    }

    #[tokio::test]
    async fn planned_notification_is_delivered_without_preview() {
        let fx = fixture(&[["01.05.2024 10:00", "planned", "Hello", "", "", "", "", "", ""]], Duration::from_secs(30))
            .await;
        let report = fx.pipeline.run_cycle(now(), false).await;
        assert_eq!(report.planned, 0);
        assert_eq!(report.delivered, 1);
        assert!(fx.messenger.sent().iter().all(|m| !m.text.starts_with("Planned")));
    }

    #[tokio::test]
    async fn failing_recipient_does_not_block_the_rest() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        fx.messenger.reject("u1");
        let report = fx.pipeline.run_cycle(now(), false).await;

        assert_eq!(report.messages_failed, 1);
        assert_eq!(fx.messenger.sent_to("u4").len(), 1);
        assert_eq!(fx.messenger.sent_to("g-normal").len(), 1);
        assert_eq!(fx.notifications.cell(3, 2), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_recipient_times_out() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        fx.messenger.stall("u4", Duration::from_secs(600));
        let report = fx.pipeline.run_cycle(now(), false).await;

        assert_eq!(report.messages_failed, 1);
        assert!(fx.messenger.sent_to("u4").is_empty());
        assert_eq!(fx.messenger.sent_to("u1").len(), 1);
        assert_eq!(fx.notifications.cell(3, 2), "done");
    }

    #[tokio::test]
    async fn stateful_notification_carries_keyboard_and_skips_normal_groups() {
        let fx = fixture(
            &[["01.05.2024 10:00", "yes", "Coming?", "poll", "Yes\nNo", "Great\nPity", "", "", ""]],
            Duration::from_secs(30),
        )
        .await;
        fx.pipeline.run_cycle(now(), false).await;

        let to_user = &fx.messenger.sent_to("u1")[0];
        let keyboard = to_user.keyboard.as_ref().unwrap();
        let labels: Vec<_> = keyboard.buttons().map(|b| b.text.as_str()).collect();
        assert_eq!(labels, vec!["Yes", "No"]);
        assert!(fx.messenger.sent_to("g-normal").is_empty());
        assert!(fx.messenger.sent_to("g-admin")[0].keyboard.is_none());
    }

    #[tokio::test]
    async fn condition_replaces_the_active_filter() {
        let fx = fixture(&[["01.05.2024 10:00", "yes", "VIP only", "", "", "", "", "vip", ""]], Duration::from_secs(30))
            .await;
        fx.pipeline.run_cycle(now(), false).await;

        assert!(fx.messenger.sent_to("u1").is_empty());
        assert!(fx.messenger.sent_to("u2").is_empty());
        assert_eq!(fx.messenger.sent_to("u3").len(), 1);
        assert_eq!(fx.messenger.sent_to("u4").len(), 1);
        assert_eq!(fx.messenger.sent_to("g-super")[0].text, "Planned for vip: VIP only");
        assert_eq!(fx.messenger.sent_to("g-admin")[0].text, "Sent to vip: VIP only");
    }

    #[tokio::test]
    async fn picture_is_sent_as_photo() {
        let fx = fixture(
            &[["01.05.2024 10:00", "yes", "Look", "", "", "", "https://img/1.png", "", ""]],
            Duration::from_secs(30),
        )
        .await;
        fx.pipeline.run_cycle(now(), false).await;
        let sent = fx.messenger.sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|m| m.photo.as_deref() == Some("https://img/1.png")));
    }

    #[tokio::test]
    async fn failed_plan_write_holds_back_delivery() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        fx.notifications.fail_writes(true);
        let report = fx.pipeline.run_cycle(now(), false).await;

        assert_eq!(report.planned, 0);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.transitions_failed, 1);
        assert_eq!(fx.notifications.cell(3, 2), "yes");
        assert!(fx.messenger.sent_to("u1").is_empty());

        let report = fx.pipeline.run_cycle(now(), true).await;
        assert_eq!(report.transitions_failed, 1);
        assert!(fx.messenger.sent_to("u1").is_empty());
        assert!(fx.messenger.sent_to("g-normal").is_empty());

        fx.notifications.fail_writes(false);
        let report = fx.pipeline.run_cycle(now(), true).await;
        assert_eq!(report.delivered, 1);
        fx.pipeline.run_cycle(now(), true).await;
        assert_eq!(fx.messenger.sent_to("u1").len(), 1);
        assert_eq!(fx.messenger.sent_to("u4").len(), 1);
        assert_eq!(fx.notifications.cell(3, 2), "done");
    }

    #[tokio::test]
    async fn missing_template_falls_back_to_text() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        fx.pipeline.settings.update_field(PLANNED_TEMPLATE, "value", "").await.unwrap();
        fx.pipeline.run_cycle(now(), false).await;
        assert_eq!(fx.messenger.sent_to("g-super")[0].text, "Hello");
    }

    #[tokio::test]
    async fn refresh_picks_up_operator_edits() {
        let fx = fixture(&[], Duration::from_secs(30)).await;
        assert_eq!(fx.pipeline.run_cycle(now(), false).await, CycleReport::default());

        fx.notifications.replace_rows(&notification_rows(&[PLAIN]));
        let report = fx.pipeline.run_cycle(now(), true).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(fx.notifications.cell(3, 2), "done");
        assert_eq!(fx.pipeline.notifications.snapshot().get("3").unwrap().status, NotificationStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_loop_runs_first_cycle_without_refresh() {
        let fx = fixture(&[PLAIN], Duration::from_secs(30)).await;
        let fetches = fx.notifications.fetch_count();
        let messenger = fx.messenger.clone();
        let sheet = fx.notifications.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_pipeline(Arc::new(fx.pipeline), Duration::from_secs(60), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sheet.fetch_count(), fetches);
        assert!(!messenger.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sheet.fetch_count(), fetches + 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_stalled_first_cycle() {
        let fx = fixture(&[PLAIN], Duration::from_secs(600)).await;
        fx.messenger.stall("u1", Duration::from_secs(3600));
        let messenger = fx.messenger.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_pipeline(Arc::new(fx.pipeline), Duration::from_secs(60), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(messenger.sent_to("u1").is_empty());

        let started = tokio::time::Instant::now();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(fx.notifications.cell(3, 2), "planned");
    }
}
