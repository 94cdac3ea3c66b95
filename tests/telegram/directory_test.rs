//! Discovery report layout and example whitelist selection.

use telehook::relay::ChatKind;
use telehook::telegram::directory::{example_whitelist, render_report, ChatEntry};

fn chat(id: i64, name: &str, kind: ChatKind) -> ChatEntry {
    ChatEntry {
        id,
        name: name.to_owned(),
        kind,
    }
}

fn sample() -> Vec<ChatEntry> {
    vec![
        chat(-100_111, "Ops Team", ChatKind::Supergroup),
        chat(-222, "Family", ChatKind::Group),
        chat(-100_333, "Announcements", ChatKind::Channel),
        chat(444, "Alice Example", ChatKind::Private),
        chat(-100_555, "Third Group", ChatKind::Supergroup),
        chat(666, "Bob", ChatKind::Private),
    ]
}

#[test]
fn example_whitelist_takes_two_groups_one_channel_one_dm() {
    let line = example_whitelist(&sample());
    assert_eq!(
        line.as_deref(),
        Some("TELEGRAM_WHITELIST_CHATS=-100111,-222,-100333,444")
    );
}

#[test]
fn example_whitelist_empty_without_chats() {
    assert_eq!(example_whitelist(&[]), None);
}

#[test]
fn report_groups_chats_by_kind() {
    let report = render_report(&sample());

    let groups_at = report.find("GROUPS:");
    let channels_at = report.find("CHANNELS:");
    let direct_at = report.find("DIRECT MESSAGES: 2 total (showing first 5)");
    assert!(groups_at.is_some());
    assert!(channels_at.is_some());
    assert!(direct_at.is_some());
    assert!(groups_at < channels_at);
    assert!(channels_at < direct_at);

    assert!(report.contains(&format!("  {:<40} | ID: -100111", "Ops Team")));
    assert!(report.contains(&format!("  {:<40} | ID: -100333", "Announcements")));
    assert!(report.contains("TELEGRAM_WHITELIST_CHATS=-100111,-222,-100333,444"));
}

#[test]
fn report_limits_listed_chats() {
    let mut chats: Vec<ChatEntry> = (1..=12)
        .map(|i| chat(-1000 - i, &format!("group {i}"), ChatKind::Group))
        .collect();
    chats.extend((1..=7).map(|i| chat(i, &format!("user {i}"), ChatKind::Private)));

    let report = render_report(&chats);

    assert!(report.contains("| ID: -1010"));
    assert!(!report.contains("| ID: -1011"));
    assert!(report.contains("DIRECT MESSAGES: 7 total (showing first 5)"));
    assert!(report.contains("| ID: 5\n"));
    assert!(!report.contains("| ID: 6\n"));
}

#[test]
fn report_omits_empty_sections() {
    let report = render_report(&[chat(9, "Solo", ChatKind::Private)]);
    assert!(!report.contains("GROUPS:"));
    assert!(!report.contains("CHANNELS:"));
    assert!(report.contains("DIRECT MESSAGES: 1 total"));
}

#[test]
fn report_without_chats_explains_next_step() {
    let report = render_report(&[]);
    assert!(report.starts_with("Discovered chats and their IDs:"));
    assert!(report.contains("No chats found."));
}
