//! Page renderer abstraction for screenshot capture.
//!
//! This module provides a unified interface for different capture methods:
//! - `ChromeRenderer` drives a headless Chromium over CDP
//! - `MockRenderer` paints known images per URL (testing and offline runs)
//!
//! The browser process is owned by the renderer value. It is launched on the
//! first capture and torn down by [`PageRenderer::release`] (or on drop).

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{CaptureError, CaptureOptions, CaptureResult};
use crate::config;

/// Trait for page renderers
///
/// Implementations render a URL at a viewport size into a PNG on disk.
#[async_trait]
pub trait PageRenderer: Send {
    /// Render `options.url` and write the PNG to `options.output_path`
    async fn capture(&mut self, options: &CaptureOptions) -> CaptureResult<()>;

    /// Release any process or connection held by the renderer.
    ///
    /// Must be safe to call more than once.
    async fn release(&mut self);

    /// Get the source type identifier (e.g., "chrome", "mock")
    fn source_type(&self) -> &str;
}

/// Launch settings for [`ChromeRenderer`]
#[derive(Debug, Clone)]
pub struct ChromeSettings {
    /// Run without a visible window
    pub headless: bool,
    /// Explicit Chrome/Chromium binary, auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Bound on wait-for-selector
    pub selector_timeout: Duration,
    /// Bound on page navigation
    pub navigation_timeout: Duration,
}

impl Default for ChromeSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            selector_timeout: Duration::from_millis(config::get().capture.selector_timeout_ms),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

/// Quiet period after which the page counts as network idle
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Evaluates to `readyState:resourceCount`
const NETWORK_PROBE: &str = "document.readyState + ':' + performance.getEntriesByType('resource').length";

struct BrowserSession {
    // Dropping the last `Browser` handle kills the process.
    _browser: Browser,
    tab: Arc<Tab>,
}

/// Headless Chromium renderer
pub struct ChromeRenderer {
    settings: ChromeSettings,
    session: Option<BrowserSession>,
}

impl ChromeRenderer {
    /// Create a renderer; no browser is launched until the first capture
    pub fn new(settings: ChromeSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    /// Whether a browser process is currently held
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    async fn acquire(&mut self, width: u32, height: u32) -> CaptureResult<Arc<Tab>> {
        if let Some(session) = &self.session {
            return Ok(session.tab.clone());
        }

        info!(headless = self.settings.headless, "launching browser");
        let settings = self.settings.clone();
        let session = tokio::task::spawn_blocking(move || launch_browser(&settings, width, height))
            .await
            .map_err(|e| CaptureError::Browser(e.to_string()))??;
        let tab = session.tab.clone();
        self.session = Some(session);
        Ok(tab)
    }
}

fn launch_browser(settings: &ChromeSettings, width: u32, height: u32) -> CaptureResult<BrowserSession> {
    let launch_opts = LaunchOptionsBuilder::default()
        .headless(settings.headless)
        .path(settings.chrome_path.clone())
        .window_size(Some((width, height)))
        .idle_browser_timeout(Duration::from_secs(300))
        .args(vec![
            OsStr::new("--force-device-scale-factor=1"),
            OsStr::new("--hide-scrollbars"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--force-color-profile=srgb"),
        ])
        .build()
        .map_err(|e| CaptureError::Browser(e.to_string()))?;

    let browser = Browser::new(launch_opts).map_err(|e| CaptureError::Browser(e.to_string()))?;
    let tab = browser
        .new_tab()
        .map_err(|e| CaptureError::Browser(e.to_string()))?;
    tab.set_default_timeout(settings.navigation_timeout);
    Ok(BrowserSession {
        _browser: browser,
        tab,
    })
}

/// Load-state samples folded into a network-idle decision.
///
/// The page is idle once `readyState` is `complete` and the number of
/// resource timing entries has not changed for a full window.
#[derive(Debug)]
struct NetworkIdle {
    window: Duration,
    last_count: Option<usize>,
    stable_since: Option<Instant>,
}

impl NetworkIdle {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last_count: None,
            stable_since: None,
        }
    }

    /// Feed one probe sample taken at `now`; true once the page is idle
    fn observe(&mut self, sample: &str, now: Instant) -> bool {
        let count = match sample.split_once(':') {
            Some(("complete", count)) => count.parse::<usize>().ok(),
            _ => None,
        };
        let Some(count) = count else {
            self.last_count = None;
            self.stable_since = None;
            return false;
        };

        if self.last_count != Some(count) {
            self.last_count = Some(count);
            self.stable_since = Some(now);
            return false;
        }
        self.stable_since
            .is_some_and(|since| now.duration_since(since) >= self.window)
    }
}

/// Poll the page until resource loading settles, bounded by `timeout`
fn wait_for_network_idle(tab: &Tab, url: &str, timeout: Duration) -> CaptureResult<()> {
    let deadline = Instant::now() + timeout;
    let mut idle = NetworkIdle::new(NETWORK_IDLE_WINDOW);
    loop {
        let sample = tab
            .evaluate(NETWORK_PROBE, false)
            .map_err(|e| CaptureError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let sample = sample.value.as_ref().and_then(|v| v.as_str()).unwrap_or_default();

        let now = Instant::now();
        if idle.observe(sample, now) {
            return Ok(());
        }
        if now >= deadline {
            return Err(CaptureError::Navigation {
                url: url.to_string(),
                reason: format!("network did not settle within {:?}", timeout),
            });
        }
        std::thread::sleep(NETWORK_POLL_INTERVAL);
    }
}

/// Navigate, wait, and screenshot. Runs on a blocking thread.
fn render_page(tab: &Tab, options: &CaptureOptions, settings: &ChromeSettings) -> CaptureResult<Vec<u8>> {
    let selector_timeout = settings.selector_timeout;
    let navigation_error = |reason: String| CaptureError::Navigation {
        url: options.url.clone(),
        reason,
    };

    tab.set_bounds(Bounds::Normal {
        left: Some(0),
        top: Some(0),
        width: Some(f64::from(options.width)),
        height: Some(f64::from(options.height)),
    })
    .map_err(|e| CaptureError::Browser(e.to_string()))?;

    tab.navigate_to(&options.url)
        .map_err(|e| navigation_error(e.to_string()))?;
    tab.wait_until_navigated()
        .map_err(|e| navigation_error(e.to_string()))?;
    wait_for_network_idle(tab, &options.url, settings.navigation_timeout)?;

    if let Some(selector) = &options.wait_for_selector {
        tab.wait_for_element_with_custom_timeout(selector, selector_timeout)
            .map_err(|_| CaptureError::SelectorTimeout {
                url: options.url.clone(),
                selector: selector.clone(),
                timeout: selector_timeout,
            })?;
    }

    if let Some(delay) = options.delay {
        std::thread::sleep(delay);
    }

    let clip = Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: f64::from(options.width),
        height: f64::from(options.height),
        scale: 1.0,
    };
    tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
        .map_err(|e| CaptureError::Browser(e.to_string()))
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    async fn capture(&mut self, options: &CaptureOptions) -> CaptureResult<()> {
        let tab = self.acquire(options.width, options.height).await?;
        let settings = self.settings.clone();
        let job = options.clone();

        debug!(url = %options.url, width = options.width, height = options.height, "capturing page");
        let png = tokio::task::spawn_blocking(move || render_page(&tab, &job, &settings))
            .await
            .map_err(|e| CaptureError::Browser(e.to_string()))??;

        write_png(&options.output_path, &png).await
    }

    async fn release(&mut self) {
        if let Some(session) = self.session.take() {
            let closed = tokio::task::spawn_blocking(move || drop(session)).await;
            if let Err(e) = closed {
                warn!("browser shutdown panicked: {}", e);
            }
            info!("browser released");
        }
    }

    fn source_type(&self) -> &str {
        "chrome"
    }
}

impl Drop for ChromeRenderer {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("browser was not released explicitly, closing on drop (blocks the current thread until Chrome exits)");
            drop(session);
        }
    }
}

/// Renderer that paints known content per URL
///
/// URLs registered with [`MockRenderer::with_color`] are painted as a solid
/// fill at the requested viewport size; [`MockRenderer::with_image`] returns
/// the given image as-is. Unknown URLs fall back to the default color.
#[derive(Debug, Clone)]
pub struct MockRenderer {
    colors: HashMap<String, [u8; 4]>,
    images: HashMap<String, RgbaImage>,
    default_color: [u8; 4],
    fail_after: Option<usize>,
    missing_selectors: HashSet<String>,
    /// URLs captured, in order
    pub captured: Vec<String>,
    /// Number of `release` calls
    pub release_count: usize,
}

impl MockRenderer {
    /// Create a renderer that paints every page white
    pub fn new() -> Self {
        Self {
            colors: HashMap::new(),
            images: HashMap::new(),
            default_color: [255, 255, 255, 255],
            fail_after: None,
            missing_selectors: HashSet::new(),
            captured: Vec::new(),
            release_count: 0,
        }
    }

    /// Paint `url` as a solid color
    pub fn with_color(mut self, url: impl Into<String>, color: [u8; 4]) -> Self {
        self.colors.insert(url.into(), color);
        self
    }

    /// Return a fixed image for `url`, regardless of viewport
    pub fn with_image(mut self, url: impl Into<String>, image: RgbaImage) -> Self {
        self.images.insert(url.into(), image);
        self
    }

    /// Fail with a navigation timeout once `count` captures have succeeded
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Never render `selector`: waiting for it times out
    pub fn without_selector(mut self, selector: impl Into<String>) -> Self {
        self.missing_selectors.insert(selector.into());
        self
    }

    fn render(&self, options: &CaptureOptions) -> RgbaImage {
        if let Some(image) = self.images.get(&options.url) {
            return image.clone();
        }
        let color = self.colors.get(&options.url).copied().unwrap_or(self.default_color);
        RgbaImage::from_pixel(options.width, options.height, Rgba(color))
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageRenderer for MockRenderer {
    async fn capture(&mut self, options: &CaptureOptions) -> CaptureResult<()> {
        if let Some(limit) = self.fail_after {
            if self.captured.len() >= limit {
                return Err(CaptureError::Navigation {
                    url: options.url.clone(),
                    reason: "timed out waiting for network idle".to_string(),
                });
            }
        }

        if let Some(selector) = &options.wait_for_selector {
            if self.missing_selectors.contains(selector) {
                return Err(CaptureError::SelectorTimeout {
                    url: options.url.clone(),
                    selector: selector.clone(),
                    timeout: Duration::from_millis(config::get().capture.selector_timeout_ms),
                });
            }
        }

        let image = self.render(options);
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| CaptureError::Browser(format!("Failed to encode PNG: {}", e)))?;

        write_png(&options.output_path, &bytes).await?;
        self.captured.push(options.url.clone());
        Ok(())
    }

    async fn release(&mut self) {
        self.release_count += 1;
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}

async fn write_png(path: &Path, bytes: &[u8]) -> CaptureResult<()> {
    let write_error = |source| CaptureError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    tokio::fs::write(path, bytes).await.map_err(write_error)
}
