//! Supervised headless-browser render session.
//!
//! One browser process and one tab serve every request for the lifetime of
//! the process. All captures are serialized through a mutex held for the
//! duration of the call, so two requests can never interleave their content
//! on the shared tab. When a capture fails or times out the browser is torn
//! down and relaunched lazily on the next acquire, with a capped exponential
//! backoff between failed launch attempts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::pipeline::{HtmlRenderer, RenderError, SessionHealth};
use crate::config::BrowserSettings;
use crate::domain::geometry::PageGeometry;

/// Style override injected before every capture so printed output keeps the
/// on-screen background and color styling.
const COLOR_ADJUST_SNIPPET: &str = "(() => { \
    const style = document.createElement('style'); \
    style.textContent = '* { -webkit-print-color-adjust: exact !important; print-color-adjust: exact !important; }'; \
    document.documentElement.appendChild(style); \
})()";

struct LiveSession {
    // Owns the browser process; dropping this field tears the process down.
    _browser: Browser,
    tab: Arc<Tab>,
}

struct SessionState {
    live: Option<LiveSession>,
    next_launch_at: Option<Instant>,
}

pub struct ChromiumSession {
    state: Mutex<SessionState>,
    consecutive_launch_failures: AtomicU32,
    executable: Option<PathBuf>,
    render_timeout: Duration,
    max_relaunch_attempts: u32,
}

impl ChromiumSession {
    /// Launch the browser eagerly; startup fails when the first launch does.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self, RenderError> {
        let session = Self {
            state: Mutex::new(SessionState {
                live: None,
                next_launch_at: None,
            }),
            consecutive_launch_failures: AtomicU32::new(0),
            executable: settings.executable.clone(),
            render_timeout: settings.render_timeout,
            max_relaunch_attempts: settings.max_relaunch_attempts.get(),
        };

        {
            let mut state = session.state.lock().await;
            session.ensure_live(&mut state).await?;
        }

        Ok(session)
    }

    async fn ensure_live(&self, state: &mut SessionState) -> Result<Arc<Tab>, RenderError> {
        if let Some(live) = state.live.as_ref() {
            return Ok(live.tab.clone());
        }

        let failures = self.consecutive_launch_failures.load(Ordering::Relaxed);
        if failures > 0
            && let Some(not_before) = state.next_launch_at
            && Instant::now() < not_before
        {
            return Err(RenderError::Unavailable { failures });
        }

        let executable = self.executable.clone();
        let launched = tokio::task::spawn_blocking(move || launch_browser(executable.as_deref()))
            .await
            .map_err(|err| RenderError::Worker(err.to_string()))?;

        match launched {
            Ok((browser, tab)) => {
                if failures > 0 {
                    metrics::counter!("stampa_browser_relaunch_total").increment(1);
                    info!(
                        target = "stampa::browser",
                        after_failures = failures,
                        "browser session relaunched"
                    );
                }
                self.consecutive_launch_failures.store(0, Ordering::Relaxed);
                state.next_launch_at = None;
                let handle = tab.clone();
                state.live = Some(LiveSession {
                    _browser: browser,
                    tab,
                });
                Ok(handle)
            }
            Err(err) => {
                let failures = self
                    .consecutive_launch_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                let backoff = launch_backoff(failures);
                state.next_launch_at = Some(Instant::now() + backoff);
                warn!(
                    target = "stampa::browser",
                    consecutive_failures = failures,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "browser launch failed"
                );
                Err(err)
            }
        }
    }

    fn teardown(&self, state: &mut SessionState) {
        // Dropping the browser kills the process; an in-flight blocking call
        // then errors out against the dead transport. The next acquire
        // relaunches.
        state.live = None;
    }
}

#[async_trait]
impl HtmlRenderer for ChromiumSession {
    async fn render(&self, html: String, geometry: &PageGeometry) -> Result<Vec<u8>, RenderError> {
        // The lock spans the whole capture: one tab, one document at a time.
        let mut state = self.state.lock().await;
        let tab = self.ensure_live(&mut state).await?;

        let data_url = document_data_url(&html);
        let options = print_options(geometry);
        let worker = tokio::task::spawn_blocking(move || capture_pdf(&tab, &data_url, options));

        match tokio::time::timeout(self.render_timeout, worker).await {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(err))) => {
                self.teardown(&mut state);
                Err(err)
            }
            Ok(Err(join_error)) => {
                self.teardown(&mut state);
                Err(RenderError::Worker(join_error.to_string()))
            }
            Err(_elapsed) => {
                self.teardown(&mut state);
                Err(RenderError::Timeout(self.render_timeout))
            }
        }
    }

    fn health(&self) -> SessionHealth {
        let failures = self.consecutive_launch_failures.load(Ordering::Relaxed);
        if failures >= self.max_relaunch_attempts {
            SessionHealth::Degraded {
                consecutive_failures: failures,
            }
        } else {
            SessionHealth::Ready
        }
    }
}

fn launch_browser(executable: Option<&Path>) -> Result<(Browser, Arc<Tab>), RenderError> {
    let mut builder = LaunchOptions::default_builder();
    if let Some(path) = executable {
        builder.path(Some(path.to_path_buf()));
    }

    let options = builder
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(Duration::from_secs(24 * 60 * 60))
        .args(vec![
            "--disable-dev-shm-usage".as_ref(),
            "--disable-crash-reporter".as_ref(),
            "--disable-extensions".as_ref(),
            "--disable-background-timer-throttling".as_ref(),
            "--disable-renderer-backgrounding".as_ref(),
            "--disable-hang-monitor".as_ref(),
        ])
        .build()
        .map_err(|err| RenderError::Launch(err.to_string()))?;

    let browser = Browser::new(options).map_err(|err| RenderError::Launch(err.to_string()))?;
    let tab = browser
        .new_tab()
        .map_err(|err| RenderError::Launch(err.to_string()))?;

    Ok((browser, tab))
}

fn capture_pdf(
    tab: &Tab,
    data_url: &str,
    options: PrintToPdfOptions,
) -> Result<Vec<u8>, RenderError> {
    tab.navigate_to(data_url)
        .map_err(|err| RenderError::Navigation(err.to_string()))?
        .wait_until_navigated()
        .map_err(|err| RenderError::Navigation(err.to_string()))?;

    tab.evaluate(COLOR_ADJUST_SNIPPET, false)
        .map_err(|err| RenderError::Capture(err.to_string()))?;

    tab.print_to_pdf(Some(options))
        .map_err(|err| RenderError::Capture(err.to_string()))
}

fn document_data_url(html: &str) -> String {
    format!("data:text/html;charset=utf-8,{}", urlencoding::encode(html))
}

fn print_options(geometry: &PageGeometry) -> PrintToPdfOptions {
    let margins = geometry.margins();
    PrintToPdfOptions {
        print_background: Some(true),
        scale: Some(geometry.scale()),
        paper_width: Some(geometry.paper_width_inches()),
        paper_height: Some(geometry.paper_height_inches()),
        margin_top: Some(margins.top),
        margin_bottom: Some(0.0),
        margin_left: Some(margins.left),
        margin_right: Some(margins.right),
        prefer_css_page_size: Some(false),
        ..PrintToPdfOptions::default()
    }
}

fn launch_backoff(failures: u32) -> Duration {
    let secs = 1u64 << failures.min(8);
    Duration::from_secs(secs.min(300))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_percent_encodes_content() {
        let url = document_data_url("<p>a b</p>");
        assert!(url.starts_with("data:text/html;charset=utf-8,"));
        assert!(url.contains("%3Cp%3Ea%20b%3C%2Fp%3E"));
    }

    #[test]
    fn print_options_carry_normalized_geometry() {
        let geometry = PageGeometry::resolve(Some(960.0), Some(480.0), Some(1.5), None)
            .expect("valid geometry");
        let options = print_options(&geometry);

        assert_eq!(options.paper_width, Some(10.0));
        assert_eq!(options.paper_height, Some(5.0));
        assert_eq!(options.scale, Some(1.5));
        assert_eq!(options.print_background, Some(true));
        assert_eq!(options.margin_bottom, Some(0.0));
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(launch_backoff(1), Duration::from_secs(2));
        assert_eq!(launch_backoff(3), Duration::from_secs(8));
        assert_eq!(launch_backoff(20), Duration::from_secs(256));
    }
}
