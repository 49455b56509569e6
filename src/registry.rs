// MIT License - Copyright (c) 2026 Peter Wright
// Kocom wallpad gateway

use std::collections::{BTreeMap, HashMap};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::constants::CHANNEL_COUNT;
use crate::model::{DeviceKey, DeviceState, DeviceType, Platform, StateValue};

bitflags! {
    /// One bit per channel of an eight-channel light or outlet room.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u8 {
        const CH0 = 0x01;
        const CH1 = 0x02;
        const CH2 = 0x04;
        const CH3 = 0x08;
        const CH4 = 0x10;
        const CH5 = 0x20;
        const CH6 = 0x40;
        const CH7 = 0x80;
    }
}

impl ChannelMask {
    /// Mask for a single channel. Indices past the last channel yield an empty mask.
    pub fn channel(index: u8) -> Self {
        if usize::from(index) < CHANNEL_COUNT {
            Self::from_bits_retain(1 << index)
        } else {
            Self::empty()
        }
    }
}

/// Last observed on/off state of every channel in one room.
///
/// `known` tracks which channels were ever seen on live traffic; a partial
/// command may only be built once all of them are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelBaseline {
    pub known: ChannelMask,
    pub on: ChannelMask,
}

impl ChannelBaseline {
    pub fn is_complete(&self) -> bool {
        self.known.is_all()
    }

    pub fn is_on(&self, index: u8) -> bool {
        self.on.contains(ChannelMask::channel(index))
    }

    fn observe(&mut self, index: u8, on: bool) {
        let ch = ChannelMask::channel(index);
        self.known |= ch;
        self.on.set(ch, on);
    }
}

/// Outcome of [`DeviceRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The key is unknown and the state was not allowed to create it.
    Rejected,
    New,
    Updated,
    /// The device now renders as a different platform.
    Reclassified { previous: Platform },
    Unchanged,
}

impl Upsert {
    /// Whether listeners should hear about this upsert.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::New | Self::Updated | Self::Reclassified { .. })
    }
}

/// Keyed store of the latest state per device facet.
///
/// The primary map holds devices confirmed by live traffic. The shadow map
/// holds states restored from replay tokens; they are queryable but only
/// move to the primary map on live traffic or [`promote`](Self::promote).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    states: BTreeMap<DeviceKey, DeviceState>,
    shadow: BTreeMap<DeviceKey, DeviceState>,
    channels: HashMap<(DeviceType, u8), ChannelBaseline>,
    storage: HashMap<DeviceKey, serde_json::Value>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a live state.
    ///
    /// An unknown key is only created when `allow_insert` is set or a shadow
    /// entry for it exists. Channel baselines are updated for every live
    /// multi-channel state, whether or not the entry itself is accepted.
    pub fn upsert(&mut self, state: DeviceState, allow_insert: bool) -> Upsert {
        let key = state.key;
        if key.device_type.is_multi_channel()
            && let StateValue::Binary(on) = state.state
        {
            self.channels
                .entry((key.device_type, key.room_index))
                .or_default()
                .observe(key.device_index, on);
        }

        match self.states.get_mut(&key) {
            Some(existing) => {
                let outcome = if existing.platform != state.platform {
                    warn!(
                        "Device {} reclassified from {} to {}",
                        key, existing.platform, state.platform
                    );
                    Upsert::Reclassified {
                        previous: existing.platform,
                    }
                } else if existing.differs_from(&state) {
                    Upsert::Updated
                } else {
                    Upsert::Unchanged
                };
                *existing = state;
                outcome
            }
            None => {
                let shadowed = self.shadow.remove(&key).is_some();
                if !allow_insert && !shadowed {
                    debug!("Ignoring state for unregistered device {}", key);
                    return Upsert::Rejected;
                }
                self.states.insert(key, state);
                Upsert::New
            }
        }
    }

    /// Stage a restored state. Never overwrites a live entry.
    pub fn insert_shadow(&mut self, state: DeviceState) -> bool {
        if self.states.contains_key(&state.key) {
            return false;
        }
        self.shadow.insert(state.key, state);
        true
    }

    /// Move a shadow entry into the primary map.
    pub fn promote(&mut self, key: &DeviceKey) -> Option<DeviceState> {
        let state = self.shadow.remove(key)?;
        self.states.insert(*key, state.clone());
        Some(state)
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&DeviceState> {
        self.states.get(key)
    }

    /// Like [`get`](Self::get) but falls back to restored, unconfirmed states.
    pub fn get_with_shadow(&self, key: &DeviceKey) -> Option<&DeviceState> {
        self.states.get(key).or_else(|| self.shadow.get(key))
    }

    pub fn all_by_platform(&self, platform: Platform) -> Vec<DeviceState> {
        self.states
            .values()
            .filter(|s| s.platform == platform)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &DeviceState> {
        self.states.values()
    }

    pub fn channels(&self, device_type: DeviceType, room_index: u8) -> Option<ChannelBaseline> {
        self.channels.get(&(device_type, room_index)).copied()
    }

    pub fn set_storage(&mut self, key: DeviceKey, value: serde_json::Value) {
        self.storage.insert(key, value);
    }

    pub fn storage(&self, key: &DeviceKey) -> Option<&serde_json::Value> {
        self.storage.get(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn shadow_len(&self) -> usize {
        self.shadow.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, SubType, SwitchClass};

    fn outlet(idx: u8, on: bool) -> DeviceState {
        DeviceState::new(
            DeviceKey::new(DeviceType::Outlet, 2, idx, SubType::None),
            Platform::Switch,
            StateValue::Binary(on),
        )
    }

    #[test]
    fn test_new_then_unchanged() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.upsert(outlet(0, true), true), Upsert::New);
        assert_eq!(reg.upsert(outlet(0, true), true), Upsert::Unchanged);
        assert_eq!(reg.upsert(outlet(0, false), false), Upsert::Updated);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_attribute_change_is_update() {
        let mut reg = DeviceRegistry::new();
        reg.upsert(outlet(1, true), true);
        let with_class = outlet(1, true).with_attribute(Attributes::Switch {
            device_class: SwitchClass::Outlet,
        });
        assert_eq!(reg.upsert(with_class, false), Upsert::Updated);
    }

    #[test]
    fn test_unknown_key_rejected_without_insert() {
        let mut reg = DeviceRegistry::new();
        assert_eq!(reg.upsert(outlet(3, false), false), Upsert::Rejected);
        assert!(reg.get(&outlet(3, false).key).is_none());
        // The baseline still learns the channel.
        let baseline = reg.channels(DeviceType::Outlet, 2).unwrap();
        assert!(baseline.known.contains(ChannelMask::CH3));
        assert!(!baseline.is_on(3));
    }

    #[test]
    fn test_platform_change_reclassifies() {
        let mut reg = DeviceRegistry::new();
        reg.upsert(outlet(0, true), true);
        let mut as_light = outlet(0, true);
        as_light.platform = Platform::Light;
        assert_eq!(
            reg.upsert(as_light, false),
            Upsert::Reclassified {
                previous: Platform::Switch
            }
        );
        assert_eq!(reg.all_by_platform(Platform::Light).len(), 1);
        assert!(reg.all_by_platform(Platform::Switch).is_empty());
    }

    #[test]
    fn test_shadow_promotion() {
        let mut reg = DeviceRegistry::new();
        let key = outlet(4, false).key;
        assert!(reg.insert_shadow(outlet(4, false)));
        assert!(reg.get(&key).is_none());
        assert!(reg.get_with_shadow(&key).is_some());

        assert!(reg.promote(&key).is_some());
        assert!(reg.get(&key).is_some());
        assert_eq!(reg.shadow_len(), 0);
        assert!(reg.promote(&key).is_none());
    }

    #[test]
    fn test_shadow_entry_accepts_live_off_state() {
        let mut reg = DeviceRegistry::new();
        reg.insert_shadow(outlet(5, true));
        assert_eq!(reg.upsert(outlet(5, false), false), Upsert::New);
        assert_eq!(reg.shadow_len(), 0);
        assert!(!reg.insert_shadow(outlet(5, true)));
    }

    #[test]
    fn test_baseline_completes_after_full_room() {
        let mut reg = DeviceRegistry::new();
        for idx in 0..8 {
            reg.upsert(outlet(idx, idx % 2 == 0), idx % 2 == 0);
        }
        let baseline = reg.channels(DeviceType::Outlet, 2).unwrap();
        assert!(baseline.is_complete());
        assert_eq!(
            baseline.on,
            ChannelMask::CH0 | ChannelMask::CH2 | ChannelMask::CH4 | ChannelMask::CH6
        );
        assert!(reg.channels(DeviceType::Light, 2).is_none());
    }

    #[test]
    fn test_channel_mask_bounds() {
        assert_eq!(ChannelMask::channel(7), ChannelMask::CH7);
        assert!(ChannelMask::channel(8).is_empty());
    }
}
