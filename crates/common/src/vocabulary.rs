// Localized words the sheets use for booleans, statuses and worksheet titles.
//
// Operators edit the spreadsheet in their own language, so "yes", "done",
// even the worksheet names are read from the i18n key/value sheet at startup.
// Anything missing falls back to the English default.

use serde::{Deserialize, Serialize};

use crate::row::RowError;

/// Titles of the worksheets the bot reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksheetTitles {
    pub switch: String,
    pub settings: String,
    pub users: String,
    pub groups: String,
    pub notifications: String,
    pub logs: String,
}

impl Default for WorksheetTitles {
    fn default() -> Self {
        Self {
            switch: "switch".into(),
            settings: "settings".into(),
            users: "users".into(),
            groups: "groups".into(),
            notifications: "notifications".into(),
            logs: "logs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub yes: String,
    pub no: String,
    pub done: String,
    pub planned: String,
    /// Marks superadmin groups.
    pub superadmin: String,
    pub worksheets: WorksheetTitles,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            yes: "yes".into(),
            no: "no".into(),
            done: "done".into(),
            planned: "planned".into(),
            superadmin: "super".into(),
            worksheets: WorksheetTitles::default(),
        }
    }
}

impl Vocabulary {
    /// Build from i18n `(key, value)` pairs. Unknown keys are ignored and
    /// empty values keep the default.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut vocab = Self::default();
        for (key, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match key {
                "yes" => &mut vocab.yes,
                "no" => &mut vocab.no,
                "done" => &mut vocab.done,
                "planned" => &mut vocab.planned,
                "super" => &mut vocab.superadmin,
                "switch" => &mut vocab.worksheets.switch,
                "settings" => &mut vocab.worksheets.settings,
                "users" => &mut vocab.worksheets.users,
                "groups" => &mut vocab.worksheets.groups,
                "notifications" => &mut vocab.worksheets.notifications,
                "logs" => &mut vocab.worksheets.logs,
                _ => continue,
            };
            *slot = value.to_string();
        }
        vocab
    }

    /// Strict yes/no.
    pub fn parse_bool(&self, column: &str, value: &str) -> Result<bool, RowError> {
        if value == self.yes {
            Ok(true)
        } else if value == self.no {
            Ok(false)
        } else {
            Err(RowError::InvalidValue { column: column.to_string(), value: value.to_string() })
        }
    }

    /// Yes/no where an empty cell means `false`.
    pub fn parse_flag(&self, column: &str, value: &str) -> Result<bool, RowError> {
        if value.is_empty() {
            return Ok(false);
        }
        self.parse_bool(column, value)
    }

    pub fn bool_word(&self, value: bool) -> &str {
        if value {
            &self.yes
        } else {
            &self.no
        }
    }

    pub fn parse_admin_level(&self, column: &str, value: &str) -> Result<AdminLevel, RowError> {
        if value == self.no {
            Ok(AdminLevel::Member)
        } else if value == self.yes {
            Ok(AdminLevel::Admin)
        } else if value == self.superadmin {
            Ok(AdminLevel::Superadmin)
        } else {
            Err(RowError::InvalidValue { column: column.to_string(), value: value.to_string() })
        }
    }

    pub fn admin_level_word(&self, level: AdminLevel) -> &str {
        match level {
            AdminLevel::Member => &self.no,
            AdminLevel::Admin => &self.yes,
            AdminLevel::Superadmin => &self.superadmin,
        }
    }
}

/// Privilege of a registered group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AdminLevel {
    Member,
    Admin,
    Superadmin,
}

impl AdminLevel {
    /// Admin and superadmin groups both receive admin reports.
    pub fn is_admin(self) -> bool {
        self >= Self::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_english() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.yes, "yes");
        assert_eq!(vocab.superadmin, "super");
        assert_eq!(vocab.worksheets.notifications, "notifications");
    }

    #[test]
    fn from_pairs_overrides_known_keys_only() {
        let vocab = Vocabulary::from_pairs([
            ("yes", "да"),
            ("no", "нет"),
            ("users", "Участники"),
            ("greeting", "привет"),
            ("done", ""),
        ]);
        assert_eq!(vocab.yes, "да");
        assert_eq!(vocab.no, "нет");
        assert_eq!(vocab.worksheets.users, "Участники");
        assert_eq!(vocab.done, "done");
    }

    #[test]
    fn parse_bool_is_strict() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.parse_bool("is_active", "yes"), Ok(true));
        assert_eq!(vocab.parse_bool("is_active", "no"), Ok(false));
        assert!(vocab.parse_bool("is_active", "").is_err());
        assert!(vocab.parse_bool("is_active", "Yes").is_err());
    }

    #[test]
    fn parse_flag_treats_empty_as_false() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.parse_flag("is_bot_banned", ""), Ok(false));
        assert!(vocab.parse_flag("is_bot_banned", "maybe").is_err());
    }

    #[test]
    fn admin_levels_order_by_privilege() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.parse_admin_level("is_admin", "no"), Ok(AdminLevel::Member));
        assert_eq!(vocab.parse_admin_level("is_admin", "super"), Ok(AdminLevel::Superadmin));
        assert!(AdminLevel::Superadmin.is_admin());
        assert!(!AdminLevel::Member.is_admin());
        assert_eq!(vocab.admin_level_word(AdminLevel::Admin), "yes");
    }
}
