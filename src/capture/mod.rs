pub mod backend;
pub mod types;

pub use backend::{ChromeRenderer, ChromeSettings, MockRenderer, PageRenderer};
pub use types::{CaptureError, CaptureOptions, CaptureResult, ViewportPreset};
