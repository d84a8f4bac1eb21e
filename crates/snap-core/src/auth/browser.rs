use std::env;

use url::Url;

use super::AuthError;

/// Open `url` in the user's default browser.
pub fn open(url: &Url) -> Result<(), AuthError> {
    open::that(url.as_str()).map_err(|err| AuthError::BrowserLaunch {
        url: url.clone(),
        reason: err.to_string(),
    })
}

/// Whether a browser can plausibly be launched from this terminal.
///
/// `SNAP_NO_BROWSER` forces the answer to no; SSH sessions without a display
/// are treated as headless.
pub fn browser_available() -> bool {
    detect(|key| env::var_os(key).is_some())
}

/// Display heuristic over an injectable environment lookup.
fn detect<F>(is_set: F) -> bool
where
    F: Fn(&str) -> bool,
{
    if is_set("SNAP_NO_BROWSER") {
        return false;
    }

    if is_set("SSH_CONNECTION") && !is_set("DISPLAY") {
        return false;
    }

    if is_set("DISPLAY") || is_set("WAYLAND_DISPLAY") {
        return true;
    }

    cfg!(target_os = "windows") || cfg!(target_os = "macos")
}
