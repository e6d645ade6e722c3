//! Turns environment observations into [EntityKey]s. Everything here is pure, the I/O that
//! produces URLs and process lists lives elsewhere.

use tracing::trace;
use url::Url;

use crate::daemon::storage::entities::EntityKey;

/// Entity used when nothing in a process snapshot looks like a user application.
pub const DEFAULT_ENTITY: &str = "explorer";

/// Well known applications, most important first. Matched as substrings of normalized process
/// names.
pub const PRIORITY_APPS: &[&str] = &[
    "discord", "code", "cursor", "brave", "chrome", "firefox", "edge", "msedge", "notepad",
    "wordpad", "winword", "excel", "powerpnt", "outlook", "teams", "slack", "spotify", "steam",
    "whatsapp", "telegram", "skype", "photoshop", "illustrator", "blender", "unity", "obs",
    "zoom", "webex", "notion", "figma", "canva", "trello", "asana", "jira", "confluence",
    "vscode", "intellij", "eclipse", "android studio", "xcode", "terminal", "powershell", "cmd",
    "git", "github", "gitlab", "bitbucket",
];

/// System, background and helper processes. A process containing any of these is never chosen.
pub const DENY_LIST: &[&str] = &[
    "crash", "handler", "service", "agent", "webview", "background", "runtime", "helper",
    "updater", "installer", "uninstaller", "taskhostw", "sihost", "nvcontainer", "fontdrvhost",
    "conhost", "dwm", "lsaiso", "lsass", "svchost", "wininit", "csrss", "smss", "registry",
    "system", "msiexec", "wuauserv", "spoolsv", "alg", "wscsvc", "winlogon", "lsm",
];

const MAX_PROCESS_NAME_LEN: usize = 49;

/// Browser observation: the hostname of `url` without one leading `www.`. Unparseable URLs and
/// URLs without a host resolve to nothing.
pub fn resolve_url(url: &str) -> Option<EntityKey> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    EntityKey::new(host.strip_prefix("www.").unwrap_or(host))
}

/// Lowercases a process name and drops surrounding quotes and a `.exe` suffix.
pub fn normalize_process_name(name: &str) -> String {
    let name = name.trim().trim_matches('"').to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

fn is_denied(normalized: &str) -> bool {
    DENY_LIST.iter().any(|denied| normalized.contains(denied))
}

/// Desktop observation: guesses the foreground application from a process snapshot.
///
/// The first entry of [PRIORITY_APPS] that matches a non denied process wins, regardless of
/// where that process is in the snapshot. Without a priority match the first non denied process
/// with a plausible name is used, and [DEFAULT_ENTITY] when there is none.
pub fn resolve_snapshot(processes: &[impl AsRef<str>]) -> EntityKey {
    let candidates = processes
        .iter()
        .map(|v| normalize_process_name(v.as_ref()))
        .filter(|v| !v.is_empty() && !is_denied(v))
        .collect::<Vec<_>>();
    trace!("Resolving from {} candidate processes", candidates.len());

    let priority = PRIORITY_APPS
        .iter()
        .find_map(|app| candidates.iter().find(|name| name.contains(app)));

    let fallback = || {
        candidates
            .iter()
            .find(|name| name.chars().count() <= MAX_PROCESS_NAME_LEN)
    };

    priority
        .or_else(fallback)
        .and_then(EntityKey::new)
        .or_else(|| EntityKey::new(DEFAULT_ENTITY))
        .expect("Default entity is never empty")
}
