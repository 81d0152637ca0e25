// Worksheet schemas the bot works with.

pub mod groups;
pub mod keyvalue;
pub mod log;
pub mod notifications;
pub mod switch;
pub mod users;

pub use groups::{Group, GroupsTable};
pub use keyvalue::{KeyValue, KeyValueTable};
pub use log::LogSheet;
pub use notifications::{Notification, NotificationsTable};
pub use switch::{SwitchState, SwitchTable};
pub use users::{User, UsersTable};
