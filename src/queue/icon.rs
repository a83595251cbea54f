//! Icon extraction requests fed through the subprocess queue.

use crate::config::IconsConfig;
use crate::queue::subprocess_queue::{QueuedTask, SubprocessQueue};

/// Filesystem-safe cache key: anything outside `[A-Za-z0-9.-]` becomes `_`.
pub fn cache_key(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reduces store-specific package ids to the name an icon lookup can match.
///
/// `MSIX\Microsoft.AV1VideoExtension_2.0.6.0_x64__8wekyb3d8bbwe` becomes
/// `Microsoft.AV1VideoExtension`, and `ARP\Machine\X86\LTRM_15_0_1` becomes
/// `LTRM_15_0_1`. Other ids keep everything before the first `_`.
pub fn clean_app_id(id: &str) -> &str {
    if let Some(rest) = strip_store_prefix(id, "ARP") {
        return rest.rsplit(['\\', '/']).next().unwrap_or(rest);
    }
    let rest = strip_store_prefix(id, "MSIX").unwrap_or(id);
    rest.split('_').next().unwrap_or(rest)
}

fn strip_store_prefix<'a>(id: &'a str, store: &str) -> Option<&'a str> {
    id.strip_prefix(store)?.strip_prefix(['\\', '/'])
}

/// Builds the helper invocation for one app, or `None` when no helper is
/// configured.
pub fn icon_task(config: &IconsConfig, name: &str, id: Option<&str>) -> Option<QueuedTask> {
    let (command, base_args) = config.helper.split_first()?;
    let mut args = base_args.to_vec();
    args.push("-AppName".to_string());
    args.push(name.to_string());
    if let Some(id) = id {
        args.push("-AppId".to_string());
        args.push(clean_app_id(id).to_string());
    }
    Some(QueuedTask {
        key: cache_key(id.unwrap_or(name)),
        command: command.clone(),
        args,
    })
}

pub fn icon_queue(config: &IconsConfig) -> SubprocessQueue {
    SubprocessQueue::new(config.capacity, config.timeout(), config.negative_ttl())
}
