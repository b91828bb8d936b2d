// Copyright 2025 Pixelport (https://github.com/pixelport)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The fixed key-code table shared between the runtime and game scripts.
//!
//! The integer values are a wire contract: letters are 0-25, AltLeft=26,
//! AltRight=27, arrows 28-31, digits 43-52, and so on through 117. They
//! must never drift; scripts store and compare these numbers.

/// Key names in code order. The index of a name is its code.
pub const KEY_NAMES: [&str; 118] = [
    "KeyA",
    "KeyB",
    "KeyC",
    "KeyD",
    "KeyE",
    "KeyF",
    "KeyG",
    "KeyH",
    "KeyI",
    "KeyJ",
    "KeyK",
    "KeyL",
    "KeyM",
    "KeyN",
    "KeyO",
    "KeyP",
    "KeyQ",
    "KeyR",
    "KeyS",
    "KeyT",
    "KeyU",
    "KeyV",
    "KeyW",
    "KeyX",
    "KeyY",
    "KeyZ",
    "AltLeft",
    "AltRight",
    "ArrowDown",
    "ArrowLeft",
    "ArrowRight",
    "ArrowUp",
    "Backquote",
    "Backslash",
    "Backspace",
    "BracketLeft",
    "BracketRight",
    "CapsLock",
    "Comma",
    "ContextMenu",
    "ControlLeft",
    "ControlRight",
    "Delete",
    "Digit0",
    "Digit1",
    "Digit2",
    "Digit3",
    "Digit4",
    "Digit5",
    "Digit6",
    "Digit7",
    "Digit8",
    "Digit9",
    "End",
    "Enter",
    "Equal",
    "Escape",
    "F1",
    "F2",
    "F3",
    "F4",
    "F5",
    "F6",
    "F7",
    "F8",
    "F9",
    "F10",
    "F11",
    "F12",
    "Home",
    "Insert",
    "IntlBackslash",
    "IntlRo",
    "IntlYen",
    "MetaLeft",
    "MetaRight",
    "Minus",
    "NumLock",
    "Numpad0",
    "Numpad1",
    "Numpad2",
    "Numpad3",
    "Numpad4",
    "Numpad5",
    "Numpad6",
    "Numpad7",
    "Numpad8",
    "Numpad9",
    "NumpadAdd",
    "NumpadComma",
    "NumpadDecimal",
    "NumpadDivide",
    "NumpadEnter",
    "NumpadEqual",
    "NumpadMultiply",
    "NumpadSubtract",
    "PageDown",
    "PageUp",
    "Pause",
    "Period",
    "PrintScreen",
    "Quote",
    "ScrollLock",
    "Semicolon",
    "ShiftLeft",
    "ShiftRight",
    "Slash",
    "Space",
    "Tab",
    "F13",
    "F14",
    "F15",
    "F16",
    "F17",
    "F18",
    "F19",
    "F20",
    "F21",
];

/// Code for a key name, if the name is in the table.
pub fn code(name: &str) -> Option<u8> {
    KEY_NAMES.iter().position(|n| *n == name).map(|i| i as u8)
}

/// Name for a key code, if the code is in the table.
pub fn name(code: u8) -> Option<&'static str> {
    KEY_NAMES.get(code as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_codes_are_fixed() {
        assert_eq!(code("KeyA"), Some(0));
        assert_eq!(code("KeyZ"), Some(25));
        assert_eq!(code("AltLeft"), Some(26));
        assert_eq!(code("AltRight"), Some(27));
        assert_eq!(code("ArrowDown"), Some(28));
        assert_eq!(code("ArrowLeft"), Some(29));
        assert_eq!(code("ArrowRight"), Some(30));
        assert_eq!(code("ArrowUp"), Some(31));
        assert_eq!(code("Digit0"), Some(43));
        assert_eq!(code("Digit9"), Some(52));
        assert_eq!(KEY_NAMES.len(), 118);
    }

    #[test]
    fn names_and_codes_round_trip() {
        for (i, key) in KEY_NAMES.iter().enumerate() {
            assert_eq!(code(key), Some(i as u8));
            assert_eq!(name(i as u8), Some(*key));
        }
        assert_eq!(name(118), None);
        assert_eq!(code("KeyAA"), None);
    }
}
