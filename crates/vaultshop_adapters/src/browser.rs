use std::process::Command;

use tracing::{debug, instrument};
use vaultshop_core::ports::BrowserOpener;
use vaultshop_core::Error;

/// Opens payment-station URLs with the platform's default browser
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    #[instrument(skip(self))]
    fn open(&self, url: &str) -> Result<(), Error> {
        debug!("opening url in browser");

        #[cfg(target_os = "linux")]
        let result = Command::new("xdg-open").arg(url).spawn();
        #[cfg(target_os = "macos")]
        let result = Command::new("open").arg(url).spawn();
        #[cfg(target_os = "windows")]
        let result = Command::new("rundll32")
            .arg("url.dll,FileProtocolHandler")
            .arg(url)
            .spawn();
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        let result: Result<std::process::Child, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unsupported platform",
        ));

        result
            .map(|_| ())
            .map_err(|e| Error::Other(format!("failed to open browser: {}", e)))
    }
}
