//! DOM `KeyboardEvent.code` names to Linux evdev key codes.

/// Translate a DOM key code name ("KeyA", "Digit1", ...) to the evdev code
/// the guest input device expects. Unknown names map to `None` and the event
/// is dropped by the caller.
pub fn dom_to_evdev(code: &str) -> Option<u16> {
    let key = match code {
        "Backquote" => 41,
        "Backslash" => 43,
        "Backspace" => 14,
        "BracketLeft" => 26,
        "BracketRight" => 27,
        "Comma" => 51,
        "Digit0" => 11,
        "Digit1" => 2,
        "Digit2" => 3,
        "Digit3" => 4,
        "Digit4" => 5,
        "Digit5" => 6,
        "Digit6" => 7,
        "Digit7" => 8,
        "Digit8" => 9,
        "Digit9" => 10,
        "Equal" => 13,
        "IntlBackslash" => 86,
        "IntlRo" => 89,
        "IntlYen" => 124,
        "KeyA" => 30,
        "KeyB" => 48,
        "KeyC" => 46,
        "KeyD" => 32,
        "KeyE" => 18,
        "KeyF" => 33,
        "KeyG" => 34,
        "KeyH" => 35,
        "KeyI" => 23,
        "KeyJ" => 36,
        "KeyK" => 37,
        "KeyL" => 38,
        "KeyM" => 50,
        "KeyN" => 49,
        "KeyO" => 24,
        "KeyP" => 25,
        "KeyQ" => 16,
        "KeyR" => 19,
        "KeyS" => 31,
        "KeyT" => 20,
        "KeyU" => 22,
        "KeyV" => 47,
        "KeyW" => 17,
        "KeyX" => 45,
        "KeyY" => 21,
        "KeyZ" => 44,
        "Minus" => 12,
        "Period" => 52,
        "Quote" => 40,
        "Semicolon" => 39,
        "Slash" => 53,
        "AltLeft" => 56,
        "AltRight" => 100,
        "CapsLock" => 58,
        "ContextMenu" => 127,
        "ControlLeft" => 29,
        "ControlRight" => 97,
        "Enter" => 28,
        "MetaLeft" => 125,
        "MetaRight" => 126,
        "ShiftLeft" => 42,
        "ShiftRight" => 54,
        "Space" => 57,
        "Tab" => 15,
        "Delete" => 111,
        "End" => 107,
        "Home" => 102,
        "Insert" => 110,
        "PageDown" => 109,
        "PageUp" => 104,
        "ArrowDown" => 108,
        "ArrowLeft" => 105,
        "ArrowRight" => 106,
        "ArrowUp" => 103,
        "NumLock" => 69,
        "Numpad0" => 82,
        "Numpad1" => 79,
        "Numpad2" => 80,
        "Numpad3" => 81,
        "Numpad4" => 75,
        "Numpad5" => 76,
        "Numpad6" => 77,
        "Numpad7" => 71,
        "Numpad8" => 72,
        "Numpad9" => 73,
        "NumpadAdd" => 78,
        "NumpadDecimal" => 83,
        "NumpadDivide" => 98,
        "NumpadEnter" => 96,
        "NumpadEqual" => 117,
        "NumpadMultiply" => 55,
        "NumpadSubtract" => 74,
        "Escape" => 1,
        "F1" => 59,
        "F2" => 60,
        "F3" => 61,
        "F4" => 62,
        "F5" => 63,
        "F6" => 64,
        "F7" => 65,
        "F8" => 66,
        "F9" => 67,
        "F10" => 68,
        "F11" => 87,
        "F12" => 88,
        "PrintScreen" => 99,
        "ScrollLock" => 70,
        "Pause" => 119,
        "AudioVolumeDown" => 114,
        "AudioVolumeUp" => 115,
        "AudioVolumeMute" => 113,
        "MediaPlayPause" => 164,
        "Power" => 116,
        "Sleep" => 142,
        "WakeUp" => 143,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits_translate() {
        assert_eq!(dom_to_evdev("KeyA"), Some(30));
        assert_eq!(dom_to_evdev("KeyZ"), Some(44));
        assert_eq!(dom_to_evdev("Digit1"), Some(2));
        assert_eq!(dom_to_evdev("Digit0"), Some(11));
    }

    #[test]
    fn modifiers_and_navigation_translate() {
        assert_eq!(dom_to_evdev("ControlLeft"), Some(29));
        assert_eq!(dom_to_evdev("Enter"), Some(28));
        assert_eq!(dom_to_evdev("ArrowUp"), Some(103));
        assert_eq!(dom_to_evdev("Power"), Some(116));
    }

    #[test]
    fn unknown_names_are_dropped() {
        assert_eq!(dom_to_evdev("Hyper"), None);
        assert_eq!(dom_to_evdev(""), None);
        assert_eq!(dom_to_evdev("keya"), None);
    }
}
