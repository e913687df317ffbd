//! Progress reporting
//!
//! Hooks are pure notifications: they never fail and never influence the
//! upload. Two phases are reported:
//!
//! - **load**: one tick per object hashed, shown as a spinner
//! - **upload**: bytes streamed, shown as a 0-100 % bar
//!
//! On a terminal the bar advances one point per parcel; elsewhere a line is
//! printed every 5 % to keep logs short.

use crate::package::ObjectDescriptor;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::IsTerminal;

/// Percent points per parcel on a terminal
pub const TTY_COEFFICIENT: u64 = 1;
/// Percent points per parcel when output is not a terminal
pub const PLAIN_COEFFICIENT: u64 = 5;

/// Receives progress notifications from loading and uploading
pub trait ProgressReporter: Send + Sync {
    fn start_objects_load(&self);

    /// Count `amount` units: objects while loading, bytes while uploading
    fn object_read(&self, amount: u64);

    fn finish_objects_load(&self);

    fn start_package_upload(&self, objects: &[ObjectDescriptor]);

    fn finish_package_upload(&self);

    fn push_finish(&self, package_uid: &str);
}

/// Reporter that discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn start_objects_load(&self) {}
    fn object_read(&self, _amount: u64) {}
    fn finish_objects_load(&self) {}
    fn start_package_upload(&self, _objects: &[ObjectDescriptor]) {}
    fn finish_package_upload(&self) {}
    fn push_finish(&self, _package_uid: &str) {}
}

/// Upload accounting, independent of rendering
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub uploading: bool,
    /// Bytes read so far
    pub total: u64,
    /// Bytes expected
    pub expected: u64,
    /// Byte threshold between visible updates; 0 means every chunk updates
    pub parcel: u64,
    pub coefficient: u64,
    /// Percent currently shown
    pub percent: u64,
}

impl UploadProgress {
    pub fn new(expected: u64, coefficient: u64) -> Self {
        Self {
            uploading: true,
            total: 0,
            expected,
            parcel: (expected / 100) * coefficient,
            coefficient,
            percent: 0,
        }
    }

    /// Account for `amount` bytes and return the new percent when the
    /// visible value changes.
    pub fn advance(&mut self, amount: u64) -> Option<u64> {
        let before = self.total;
        self.total = self.total.saturating_add(amount);

        let next = if self.parcel == 0 {
            if self.expected == 0 {
                100
            } else {
                (self.total.saturating_mul(100) / self.expected).min(100)
            }
        } else {
            let crossed = self.total / self.parcel - before / self.parcel;
            (self.percent + crossed * self.coefficient).min(100)
        };

        if next != self.percent {
            self.percent = next;
            Some(next)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct ConsoleState {
    loaded: u64,
    upload: Option<UploadProgress>,
    bar: Option<ProgressBar>,
}

/// Reporter for the command line
pub struct ConsoleProgress {
    tty: bool,
    state: Mutex<ConsoleState>,
}

impl ConsoleProgress {
    pub fn new(tty: bool) -> Self {
        Self {
            tty,
            state: Mutex::new(ConsoleState::default()),
        }
    }

    /// Choose rendering from whether stdout is a terminal
    pub fn detect() -> Self {
        Self::new(std::io::stdout().is_terminal())
    }

    pub fn coefficient(&self) -> u64 {
        if self.tty {
            TTY_COEFFICIENT
        } else {
            PLAIN_COEFFICIENT
        }
    }

    fn spinner() -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb
    }

    fn upload_bar() -> ProgressBar {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }
}

impl ProgressReporter for ConsoleProgress {
    fn start_objects_load(&self) {
        let mut state = self.state.lock();
        state.loaded = 0;
        if self.tty {
            let pb = Self::spinner();
            pb.set_message("Loading objects");
            state.bar = Some(pb);
        } else {
            println!("Loading objects...");
        }
    }

    fn object_read(&self, amount: u64) {
        let mut state = self.state.lock();
        let state = &mut *state;

        match state.upload.as_mut() {
            Some(upload) if upload.uploading => {
                if let Some(percent) = upload.advance(amount) {
                    match &state.bar {
                        Some(pb) => pb.set_position(percent),
                        None => println!("Uploading: {}%", percent),
                    }
                }
            }
            _ => {
                state.loaded += amount;
                if let Some(pb) = &state.bar {
                    pb.set_message(format!("Loading objects ({})", state.loaded));
                    pb.tick();
                }
            }
        }
    }

    fn finish_objects_load(&self) {
        let mut state = self.state.lock();
        let message = format!("{} objects loaded", state.loaded);
        match state.bar.take() {
            Some(pb) => pb.finish_with_message(message),
            None => println!("{}", message),
        }
    }

    fn start_package_upload(&self, objects: &[ObjectDescriptor]) {
        let expected: u64 = objects.iter().map(|o| o.size).sum();
        let mut state = self.state.lock();
        state.upload = Some(UploadProgress::new(expected, self.coefficient()));
        if self.tty {
            let pb = Self::upload_bar();
            pb.set_message("Uploading objects");
            state.bar = Some(pb);
        } else {
            println!("Uploading: 0%");
        }
    }

    fn finish_package_upload(&self) {
        let mut state = self.state.lock();
        if let Some(upload) = state.upload.as_mut() {
            upload.uploading = false;
        }
        if let Some(pb) = state.bar.take() {
            pb.finish_and_clear();
        }
    }

    fn push_finish(&self, package_uid: &str) {
        println!("Package uploaded successfully: {}", package_uid);
    }
}
