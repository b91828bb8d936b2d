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

//! Input collection: macroquad key codes map onto the fixed numeric table
//! shared with scripts.

use macroquad::input::{get_keys_down, KeyCode};

use pixelport_core::keys;

/// The key name for a macroquad key code, in the shared table's naming.
pub fn key_name(key: KeyCode) -> Option<&'static str> {
    Some(match key {
        KeyCode::A => "KeyA",
        KeyCode::B => "KeyB",
        KeyCode::C => "KeyC",
        KeyCode::D => "KeyD",
        KeyCode::E => "KeyE",
        KeyCode::F => "KeyF",
        KeyCode::G => "KeyG",
        KeyCode::H => "KeyH",
        KeyCode::I => "KeyI",
        KeyCode::J => "KeyJ",
        KeyCode::K => "KeyK",
        KeyCode::L => "KeyL",
        KeyCode::M => "KeyM",
        KeyCode::N => "KeyN",
        KeyCode::O => "KeyO",
        KeyCode::P => "KeyP",
        KeyCode::Q => "KeyQ",
        KeyCode::R => "KeyR",
        KeyCode::S => "KeyS",
        KeyCode::T => "KeyT",
        KeyCode::U => "KeyU",
        KeyCode::V => "KeyV",
        KeyCode::W => "KeyW",
        KeyCode::X => "KeyX",
        KeyCode::Y => "KeyY",
        KeyCode::Z => "KeyZ",
        KeyCode::LeftAlt => "AltLeft",
        KeyCode::RightAlt => "AltRight",
        KeyCode::Down => "ArrowDown",
        KeyCode::Left => "ArrowLeft",
        KeyCode::Right => "ArrowRight",
        KeyCode::Up => "ArrowUp",
        KeyCode::GraveAccent => "Backquote",
        KeyCode::Backslash => "Backslash",
        KeyCode::Backspace => "Backspace",
        KeyCode::LeftBracket => "BracketLeft",
        KeyCode::RightBracket => "BracketRight",
        KeyCode::CapsLock => "CapsLock",
        KeyCode::Comma => "Comma",
        KeyCode::Menu => "ContextMenu",
        KeyCode::LeftControl => "ControlLeft",
        KeyCode::RightControl => "ControlRight",
        KeyCode::Delete => "Delete",
        KeyCode::Key0 => "Digit0",
        KeyCode::Key1 => "Digit1",
        KeyCode::Key2 => "Digit2",
        KeyCode::Key3 => "Digit3",
        KeyCode::Key4 => "Digit4",
        KeyCode::Key5 => "Digit5",
        KeyCode::Key6 => "Digit6",
        KeyCode::Key7 => "Digit7",
        KeyCode::Key8 => "Digit8",
        KeyCode::Key9 => "Digit9",
        KeyCode::End => "End",
        KeyCode::Enter => "Enter",
        KeyCode::Equal => "Equal",
        KeyCode::Escape => "Escape",
        KeyCode::F1 => "F1",
        KeyCode::F2 => "F2",
        KeyCode::F3 => "F3",
        KeyCode::F4 => "F4",
        KeyCode::F5 => "F5",
        KeyCode::F6 => "F6",
        KeyCode::F7 => "F7",
        KeyCode::F8 => "F8",
        KeyCode::F9 => "F9",
        KeyCode::F10 => "F10",
        KeyCode::F11 => "F11",
        KeyCode::F12 => "F12",
        KeyCode::Home => "Home",
        KeyCode::Insert => "Insert",
        KeyCode::World1 => "IntlBackslash",
        KeyCode::World2 => "IntlRo",
        KeyCode::LeftSuper => "MetaLeft",
        KeyCode::RightSuper => "MetaRight",
        KeyCode::Minus => "Minus",
        KeyCode::NumLock => "NumLock",
        KeyCode::Kp0 => "Numpad0",
        KeyCode::Kp1 => "Numpad1",
        KeyCode::Kp2 => "Numpad2",
        KeyCode::Kp3 => "Numpad3",
        KeyCode::Kp4 => "Numpad4",
        KeyCode::Kp5 => "Numpad5",
        KeyCode::Kp6 => "Numpad6",
        KeyCode::Kp7 => "Numpad7",
        KeyCode::Kp8 => "Numpad8",
        KeyCode::Kp9 => "Numpad9",
        KeyCode::KpAdd => "NumpadAdd",
        KeyCode::KpDecimal => "NumpadDecimal",
        KeyCode::KpDivide => "NumpadDivide",
        KeyCode::KpEnter => "NumpadEnter",
        KeyCode::KpEqual => "NumpadEqual",
        KeyCode::KpMultiply => "NumpadMultiply",
        KeyCode::KpSubtract => "NumpadSubtract",
        KeyCode::PageDown => "PageDown",
        KeyCode::PageUp => "PageUp",
        KeyCode::Pause => "Pause",
        KeyCode::Period => "Period",
        KeyCode::PrintScreen => "PrintScreen",
        KeyCode::Apostrophe => "Quote",
        KeyCode::ScrollLock => "ScrollLock",
        KeyCode::Semicolon => "Semicolon",
        KeyCode::LeftShift => "ShiftLeft",
        KeyCode::RightShift => "ShiftRight",
        KeyCode::Slash => "Slash",
        KeyCode::Space => "Space",
        KeyCode::Tab => "Tab",
        KeyCode::F13 => "F13",
        KeyCode::F14 => "F14",
        KeyCode::F15 => "F15",
        KeyCode::F16 => "F16",
        KeyCode::F17 => "F17",
        KeyCode::F18 => "F18",
        KeyCode::F19 => "F19",
        KeyCode::F20 => "F20",
        KeyCode::F21 => "F21",
        _ => return None,
    })
}

/// Collect the currently-held keys as an ordered set of shared codes.
pub fn held_keys() -> Vec<u8> {
    let mut codes: Vec<u8> = get_keys_down()
        .into_iter()
        .filter_map(key_name)
        .filter_map(keys::code)
        .collect();
    codes.sort_unstable();
    codes.dedup();
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_names_resolve_to_fixed_codes() {
        assert_eq!(keys::code(key_name(KeyCode::A).unwrap()), Some(0));
        assert_eq!(keys::code(key_name(KeyCode::Up).unwrap()), Some(31));
        assert_eq!(keys::code(key_name(KeyCode::Key0).unwrap()), Some(43));
        assert_eq!(keys::code(key_name(KeyCode::LeftAlt).unwrap()), Some(26));
    }

    #[test]
    fn unmapped_keys_are_dropped() {
        assert_eq!(key_name(KeyCode::Unknown), None);
    }
}
