// `{placeholder}` substitution for operator-authored message templates.
//
// Settings cells hold texts such as
// "Planned for {notification.scheldue_date}:\n{notification.text_markdown}".
// Placeholders the lookup cannot resolve are left untouched so a typo in the
// sheet shows up in the preview instead of silently vanishing.

use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\}")
            .expect("placeholder pattern should compile")
    })
}

pub fn render<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_pattern()
        .replace_all(template, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
