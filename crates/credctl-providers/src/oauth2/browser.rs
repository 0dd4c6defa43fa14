//! Launching the user's browser.

use super::FlowError;

/// Opens an authorization URL for the user.
///
/// Flows take this as a trait object so tests can follow the redirect
/// themselves instead of starting a real browser.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), FlowError>;
}

/// Opens URLs with the desktop's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &str) -> Result<(), FlowError> {
        open::that(url).map_err(|e| FlowError::Browser(e.to_string()))
    }
}

/// Open `url`, falling back to asking the user to open it by hand.
pub fn open_or_print(opener: &dyn UrlOpener, url: &str) {
    eprintln!("Opening browser for authentication...");
    if let Err(e) = opener.open(url) {
        tracing::warn!(error = %e, "Could not open browser");
        eprintln!("Could not open a browser. Please open this URL manually:");
        eprintln!("  {}", url);
    }
}
