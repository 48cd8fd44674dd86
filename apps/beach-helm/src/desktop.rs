//! Desktop adapter seam.
//!
//! Input injection and screen capture live in a separate subsystem; the room
//! core only needs to release stuck keys when control changes hands and to
//! apply screen size changes requested by admins. [`VirtualDesktop`] is the
//! in-process backend used by the server binary and the tests.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
    pub rate: i16,
}

impl ScreenSize {
    pub const fn new(width: u16, height: u16, rate: i16) -> Self {
        Self {
            width,
            height,
            rate,
        }
    }

    fn distance(&self, other: &ScreenSize) -> (u32, u32) {
        let dims = u32::from(self.width.abs_diff(other.width))
            + u32::from(self.height.abs_diff(other.height));
        (dims, u32::from(self.rate.abs_diff(other.rate)))
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.rate)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid screen size `{0}`, expected WIDTHxHEIGHT@RATE")]
pub struct ParseScreenSizeError(String);

impl FromStr for ScreenSize {
    type Err = ParseScreenSizeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseScreenSizeError(raw.to_string());
        let trimmed = raw.trim();
        let (dims, rate) = match trimmed.split_once('@') {
            Some((dims, rate)) => (dims, rate.parse().map_err(|_| invalid())?),
            None => (trimmed, 30),
        };
        let (width, height) = dims.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u16 = width.parse().map_err(|_| invalid())?;
        let height: u16 = height.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || rate <= 0 {
            return Err(invalid());
        }
        Ok(ScreenSize::new(width, height, rate))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DesktopError {
    #[error("screen size {0} is not supported")]
    UnsupportedSize(ScreenSize),
    #[error("desktop exposes no screen modes")]
    NoModes,
    #[error("desktop backend error: {0}")]
    Backend(String),
}

/// Capability surface the room core consumes from the desktop subsystem.
pub trait Desktop: Send + Sync {
    /// Release every key the current host may still be holding down.
    fn reset_keys(&self);

    /// Apply a screen size. The returned size is what the backend actually
    /// switched to, which can differ from the request.
    fn set_screen_size(&self, requested: ScreenSize) -> Result<ScreenSize, DesktopError>;

    fn screen_size(&self) -> ScreenSize;
}

pub struct VirtualDesktop {
    modes: Vec<ScreenSize>,
    exact: bool,
    current: Mutex<ScreenSize>,
    pressed: Mutex<BTreeSet<u32>>,
}

impl VirtualDesktop {
    pub fn new(modes: Vec<ScreenSize>, initial: ScreenSize) -> Result<Self, DesktopError> {
        if modes.is_empty() {
            return Err(DesktopError::NoModes);
        }
        let initial = closest_mode(&modes, &initial).ok_or(DesktopError::NoModes)?;
        Ok(Self {
            modes,
            exact: false,
            current: Mutex::new(initial),
            pressed: Mutex::new(BTreeSet::new()),
        })
    }

    /// Reject sizes that are not listed instead of snapping to the nearest mode.
    pub fn with_exact_modes(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn modes(&self) -> &[ScreenSize] {
        &self.modes
    }

    pub fn press_key(&self, keysym: u32) {
        self.pressed.lock().insert(keysym);
    }

    pub fn release_key(&self, keysym: u32) {
        self.pressed.lock().remove(&keysym);
    }

    pub fn pressed_keys(&self) -> Vec<u32> {
        self.pressed.lock().iter().copied().collect()
    }
}

impl Desktop for VirtualDesktop {
    fn reset_keys(&self) {
        let released = std::mem::take(&mut *self.pressed.lock());
        debug!(released = released.len(), "reset pressed keys");
    }

    fn set_screen_size(&self, requested: ScreenSize) -> Result<ScreenSize, DesktopError> {
        if self.exact && !self.modes.contains(&requested) {
            return Err(DesktopError::UnsupportedSize(requested));
        }
        let actual = closest_mode(&self.modes, &requested).ok_or(DesktopError::NoModes)?;
        *self.current.lock() = actual;
        info!(%requested, %actual, "screen size changed");
        Ok(actual)
    }

    fn screen_size(&self) -> ScreenSize {
        *self.current.lock()
    }
}

/// Exact match when supported, otherwise the nearest mode by dimensions and then refresh rate.
fn closest_mode(modes: &[ScreenSize], requested: &ScreenSize) -> Option<ScreenSize> {
    modes
        .iter()
        .min_by_key(|mode| mode.distance(requested))
        .copied()
}

/// Parses a comma separated mode list such as `1280x720@30,1920x1080@60`.
pub fn parse_modes(raw: &str) -> Result<Vec<ScreenSize>, ParseScreenSizeError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ScreenSize::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desktop() -> VirtualDesktop {
        VirtualDesktop::new(
            vec![
                ScreenSize::new(1280, 720, 30),
                ScreenSize::new(1920, 1080, 30),
                ScreenSize::new(1920, 1080, 60),
            ],
            ScreenSize::new(1280, 720, 30),
        )
        .unwrap()
    }

    #[test_timeout::timeout]
    fn parses_screen_sizes() {
        assert_eq!(
            "1920x1080@60".parse::<ScreenSize>().unwrap(),
            ScreenSize::new(1920, 1080, 60)
        );
        assert_eq!(
            "800X600".parse::<ScreenSize>().unwrap(),
            ScreenSize::new(800, 600, 30)
        );
        assert!("1920x".parse::<ScreenSize>().is_err());
        assert!("0x600@30".parse::<ScreenSize>().is_err());
        assert!("640x480@-1".parse::<ScreenSize>().is_err());
    }

    #[test_timeout::timeout]
    fn parse_modes_skips_blank_entries() {
        let modes = parse_modes("1280x720@30, ,1920x1080@60,").unwrap();
        assert_eq!(
            modes,
            vec![ScreenSize::new(1280, 720, 30), ScreenSize::new(1920, 1080, 60)]
        );
        assert!(parse_modes("1280x720@30,bogus").is_err());
    }

    #[test_timeout::timeout]
    fn supported_size_applies_unchanged() {
        let desktop = desktop();
        let actual = desktop
            .set_screen_size(ScreenSize::new(1920, 1080, 60))
            .unwrap();
        assert_eq!(actual, ScreenSize::new(1920, 1080, 60));
        assert_eq!(desktop.screen_size(), actual);
    }

    #[test_timeout::timeout]
    fn unsupported_size_snaps_to_nearest_mode() {
        let desktop = desktop();
        let actual = desktop
            .set_screen_size(ScreenSize::new(1900, 1000, 50))
            .unwrap();
        assert_eq!(actual, ScreenSize::new(1920, 1080, 60));
    }

    #[test_timeout::timeout]
    fn exact_modes_reject_unlisted_sizes() {
        let desktop = desktop().with_exact_modes(true);
        let err = desktop
            .set_screen_size(ScreenSize::new(1024, 768, 60))
            .unwrap_err();
        assert_eq!(err, DesktopError::UnsupportedSize(ScreenSize::new(1024, 768, 60)));
        assert_eq!(desktop.screen_size(), ScreenSize::new(1280, 720, 30));
    }

    #[test_timeout::timeout]
    fn empty_mode_list_is_rejected() {
        let err = VirtualDesktop::new(Vec::new(), ScreenSize::new(1280, 720, 30))
            .err()
            .unwrap();
        assert_eq!(err, DesktopError::NoModes);
    }

    #[test_timeout::timeout]
    fn reset_keys_releases_everything() {
        let desktop = desktop();
        desktop.press_key(0xffe1);
        desktop.press_key(0x61);
        desktop.release_key(0x61);
        assert_eq!(desktop.pressed_keys(), vec![0xffe1]);
        desktop.reset_keys();
        assert!(desktop.pressed_keys().is_empty());
    }
}
