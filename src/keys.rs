//! Virtual-key codes, modifier masks and key-combo helpers.
//!
//! Mapping rules store Windows virtual-key codes and a small modifier
//! bitmask. Everything that turns those into names, scancodes or an ordered
//! press/release sequence lives here.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use smallvec::SmallVec;

/// Tag written into `dwExtraInfo` of every injected event so the keyboard
/// hook can tell our own output apart from the user's typing.
pub const SIMULATED_EVENT_MARKER: usize = 0x4D54;

pub const VK_SHIFT: u16 = 0x10;
pub const VK_CONTROL: u16 = 0x11;
pub const VK_MENU: u16 = 0x12;

/// Modifier bitmask as persisted in profiles: 1 = Ctrl, 2 = Shift, 4 = Alt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CTRL: Modifiers = Modifiers(1);
    pub const SHIFT: Modifiers = Modifiers(2);
    pub const ALT: Modifiers = Modifiers(4);

    const MASK: u8 = 0b111;

    /// Builds a mask from raw bits, dropping anything outside Ctrl/Shift/Alt.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Modifier virtual keys in press order (Ctrl, Shift, Alt).
    pub fn virtual_keys(self) -> SmallVec<[u16; 3]> {
        let mut keys = SmallVec::new();
        if self.contains(Self::CTRL) {
            keys.push(VK_CONTROL);
        }
        if self.contains(Self::SHIFT) {
            keys.push(VK_SHIFT);
        }
        if self.contains(Self::ALT) {
            keys.push(VK_MENU);
        }
        keys
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Self) -> Self::Output {
        Modifiers(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A main key plus the modifiers held around it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCombo {
    pub vk: u16,
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub const fn new(vk: u16, modifiers: Modifiers) -> Self {
        Self { vk, modifiers }
    }

    /// A combo with no main key is never emitted.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.vk == 0
    }

    /// Keys to press, modifiers first.
    pub fn press_sequence(&self) -> SmallVec<[u16; 4]> {
        let mut keys: SmallVec<[u16; 4]> = self.modifiers.virtual_keys().into_iter().collect();
        keys.push(self.vk);
        keys
    }

    /// Keys to release: the main key, then modifiers in reverse press order.
    pub fn release_sequence(&self) -> SmallVec<[u16; 4]> {
        let mut keys = self.press_sequence();
        keys.reverse();
        keys
    }

    /// Human label such as `Ctrl+Shift+A`.
    pub fn label(&self) -> String {
        let mut label = String::new();
        if self.modifiers.contains(Modifiers::CTRL) {
            label.push_str("Ctrl+");
        }
        if self.modifiers.contains(Modifiers::SHIFT) {
            label.push_str("Shift+");
        }
        if self.modifiers.contains(Modifiers::ALT) {
            label.push_str("Alt+");
        }
        label.push_str(&vk_to_key_name(self.vk));
        label
    }
}

impl fmt::Display for KeyCombo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Shift, Ctrl, Alt and Win keys in their generic and sided forms.
#[inline]
pub fn is_modifier_vk(vk: u16) -> bool {
    matches!(vk, 0x10..=0x12 | 0xA0..=0xA5 | 0x5B | 0x5C)
}

/// Keys that need `KEYEVENTF_EXTENDEDKEY` when injected by scancode.
#[inline]
pub fn is_extended_vk(vk: u16) -> bool {
    matches!(
        vk,
        0x21..=0x28 // PAGEUP..DOWN
            | 0x2C // SNAPSHOT
            | 0x2D // INSERT
            | 0x2E // DELETE
            | 0x5B // LWIN
            | 0x5C // RWIN
            | 0x6F // DIVIDE
            | 0x90 // NUMLOCK
            | 0xA3 // RCTRL
            | 0xA5 // RALT
    )
}

/// Converts a virtual key code to its display name.
pub fn vk_to_key_name(vk: u16) -> String {
    match vk {
        0x41..=0x5A | 0x30..=0x39 => char::from(vk as u8).to_string(),
        0x60..=0x69 => format!("NUMPAD{}", vk - 0x60),
        0x70..=0x87 => format!("F{}", vk - 0x70 + 1),
        _ => match named_key(vk) {
            Some(name) => name.to_string(),
            None => format!("VK_{:02X}", vk),
        },
    }
}

fn named_key(vk: u16) -> Option<&'static str> {
    NAMED_KEYS
        .iter()
        .find(|(code, _)| *code == vk)
        .map(|(_, name)| *name)
}

const NAMED_KEYS: &[(u16, &str)] = &[
    (0x08, "BACK"),
    (0x09, "TAB"),
    (0x0D, "RETURN"),
    (0x10, "SHIFT"),
    (0x11, "CTRL"),
    (0x12, "ALT"),
    (0x13, "PAUSE"),
    (0x14, "CAPITAL"),
    (0x1B, "ESCAPE"),
    (0x20, "SPACE"),
    (0x21, "PAGEUP"),
    (0x22, "PAGEDOWN"),
    (0x23, "END"),
    (0x24, "HOME"),
    (0x25, "LEFT"),
    (0x26, "UP"),
    (0x27, "RIGHT"),
    (0x28, "DOWN"),
    (0x2C, "SNAPSHOT"),
    (0x2D, "INSERT"),
    (0x2E, "DELETE"),
    (0x5B, "LWIN"),
    (0x5C, "RWIN"),
    (0x6A, "MULTIPLY"),
    (0x6B, "ADD"),
    (0x6C, "SEPARATOR"),
    (0x6D, "SUBTRACT"),
    (0x6E, "DECIMAL"),
    (0x6F, "DIVIDE"),
    (0x90, "NUMLOCK"),
    (0x91, "SCROLL"),
    (0xA0, "LSHIFT"),
    (0xA1, "RSHIFT"),
    (0xA2, "LCTRL"),
    (0xA3, "RCTRL"),
    (0xA4, "LALT"),
    (0xA5, "RALT"),
    (0xAD, "VOLUME_MUTE"),
    (0xAE, "VOLUME_DOWN"),
    (0xAF, "VOLUME_UP"),
    (0xB0, "MEDIA_NEXT"),
    (0xB1, "MEDIA_PREV"),
    (0xB3, "MEDIA_PLAY_PAUSE"),
    (0xBA, "OEM_1"),
    (0xBB, "OEM_PLUS"),
    (0xBC, "OEM_COMMA"),
    (0xBD, "OEM_MINUS"),
    (0xBE, "OEM_PERIOD"),
    (0xBF, "OEM_2"),
    (0xC0, "OEM_3"),
    (0xDB, "OEM_4"),
    (0xDC, "OEM_5"),
    (0xDD, "OEM_6"),
    (0xDE, "OEM_7"),
];

/// Set-1 scancode for a virtual key, or 0 when the key has none we know of.
pub fn vk_to_scancode(vk: u16) -> u16 {
    SCANCODE_MAP.get(&vk).copied().unwrap_or(0)
}

static SCANCODE_MAP: LazyLock<HashMap<u16, u16>> = LazyLock::new(|| {
    const LETTERS: [u16; 26] = [
        0x1E, 0x30, 0x2E, 0x20, 0x12, 0x21, 0x22, 0x23, 0x17, 0x24, 0x25, 0x26, 0x32, 0x31, 0x18,
        0x19, 0x10, 0x13, 0x1F, 0x14, 0x16, 0x2F, 0x11, 0x2D, 0x15, 0x2C,
    ];
    const DIGITS: [u16; 10] = [0x0B, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A];
    const FUNCTION: [u16; 12] = [
        0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x40, 0x41, 0x42, 0x43, 0x44, 0x57, 0x58,
    ];
    const NUMPAD: [u16; 10] = [0x52, 0x4F, 0x50, 0x51, 0x4B, 0x4C, 0x4D, 0x47, 0x48, 0x49];

    let mut map = HashMap::with_capacity(128);
    map.extend((0..26u16).map(|i| (0x41 + i, LETTERS[i as usize])));
    map.extend((0..10u16).map(|i| (0x30 + i, DIGITS[i as usize])));
    map.extend((0..12u16).map(|i| (0x70 + i, FUNCTION[i as usize])));
    map.extend((0..10u16).map(|i| (0x60 + i, NUMPAD[i as usize])));
    map.extend([
        (0x1B, 0x01), // ESC
        (0x0D, 0x1C), // ENTER
        (0x09, 0x0F), // TAB
        (0x20, 0x39), // SPACE
        (0x08, 0x0E), // BACKSPACE
        (0x2E, 0x53), // DELETE
        (0x2D, 0x52), // INSERT
        (0x24, 0x47), // HOME
        (0x23, 0x4F), // END
        (0x21, 0x49), // PAGEUP
        (0x22, 0x51), // PAGEDOWN
        (0x26, 0x48), // UP
        (0x28, 0x50), // DOWN
        (0x25, 0x4B), // LEFT
        (0x27, 0x4D), // RIGHT
        (0x14, 0x3A), // CAPSLOCK
        (0x90, 0x45), // NUMLOCK
        (0x91, 0x46), // SCROLL LOCK
        (0x2C, 0x37), // PRINT SCREEN
        (0x6A, 0x37), // MULTIPLY
        (0x6B, 0x4E), // ADD
        (0x6D, 0x4A), // SUBTRACT
        (0x6E, 0x53), // DECIMAL
        (0x6F, 0x35), // DIVIDE
        (0xBA, 0x27), // ;:
        (0xBB, 0x0D), // =+
        (0xBC, 0x33), // ,<
        (0xBD, 0x0C), // -_
        (0xBE, 0x34), // .>
        (0xBF, 0x35), // /?
        (0xC0, 0x29), // `~
        (0xDB, 0x1A), // [{
        (0xDC, 0x2B), // \|
        (0xDD, 0x1B), // ]}
        (0xDE, 0x28), // '"
        (0x10, 0x2A), // SHIFT
        (0x11, 0x1D), // CTRL
        (0x12, 0x38), // ALT
        (0xA0, 0x2A), // LSHIFT
        (0xA1, 0x36), // RSHIFT
        (0xA2, 0x1D), // LCTRL
        (0xA3, 0x1D), // RCTRL
        (0xA4, 0x38), // LALT
        (0xA5, 0x38), // RALT
        (0x5B, 0x5B), // LWIN
        (0x5C, 0x5C), // RWIN
    ]);
    map
});
