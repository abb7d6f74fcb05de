use enum_map::{enum_map, Enum, EnumMap};
use num_derive::{FromPrimitive, ToPrimitive};

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, Enum)]
#[repr(u16)]
#[non_exhaustive]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_ENABLE_PUSH: u32 = 1;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_CEILING: u32 = (1 << 24) - 1;

/// Sentinel stored internally for "no limit was advertised"; surfaced to
/// callers as `None` through [`Settings::max_concurrent_streams`] and
/// [`Settings::max_header_list_size`].
const UNBOUNDED: u32 = u32::MAX;

/// One direction's worth of the six RFC 7540 §6.5.2 parameters.
///
/// A connection holds two instances: the peer-advertised settings (which
/// govern what we're allowed to send) and our own local settings (which
/// govern what we advertised the peer may send us).
#[derive(Debug, Clone)]
pub struct Settings {
    values: EnumMap<SettingsParameter, u32>,
}

impl Settings {
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            values: enum_map! {
                SettingsParameter::HeaderTableSize => DEFAULT_HEADER_TABLE_SIZE,
                SettingsParameter::EnablePush => DEFAULT_ENABLE_PUSH,
                SettingsParameter::MaxConcurrentStreams => UNBOUNDED,
                SettingsParameter::InitialWindowSize => DEFAULT_INITIAL_WINDOW_SIZE,
                SettingsParameter::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
                SettingsParameter::MaxHeaderListSize => UNBOUNDED,
            },
        }
    }

    #[must_use]
    pub fn get(&self, param: SettingsParameter) -> u32 {
        self.values[param]
    }

    pub fn set(&mut self, param: SettingsParameter, value: u32) {
        self.values[param] = value;
    }

    #[must_use]
    pub fn header_table_size(&self) -> u32 {
        self.get(SettingsParameter::HeaderTableSize)
    }

    #[must_use]
    pub fn push_enabled(&self) -> bool {
        self.get(SettingsParameter::EnablePush) != 0
    }

    /// `None` means unbounded per RFC 7540 §6.5.2.
    #[must_use]
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        match self.get(SettingsParameter::MaxConcurrentStreams) {
            UNBOUNDED => None,
            n => Some(n),
        }
    }

    #[must_use]
    pub fn initial_window_size(&self) -> u32 {
        self.get(SettingsParameter::InitialWindowSize)
    }

    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.get(SettingsParameter::MaxFrameSize)
    }

    #[must_use]
    pub fn max_header_list_size(&self) -> Option<u32> {
        match self.get(SettingsParameter::MaxHeaderListSize) {
            UNBOUNDED => None,
            n => Some(n),
        }
    }

    /// Applies every (parameter, value) pair from a decoded SETTINGS frame,
    /// returning the prior `InitialWindowSize` so the caller can feed the
    /// delta to the flow-control engine (§4.C `on_settings_change`).
    pub fn apply(&mut self, params: &[(SettingsParameter, u32)]) -> u32 {
        let old_initial_window = self.initial_window_size();
        for &(param, value) in params {
            self.set(param, value);
        }
        old_initial_window
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingsParameter, u32)> + '_ {
        self.values.iter().map(|(k, &v)| (k, v))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}
