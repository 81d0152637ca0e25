// sheetbot-common: sheet addressing, row validation and notification domain types

pub mod a1;
pub mod keyboard;
pub mod notification;
pub mod row;
pub mod template;
pub mod vocabulary;
