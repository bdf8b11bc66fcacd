/// A latched on-screen modifier. It applies to the next keystroke only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Ctrl,
    Cmd,
}

/// Keys that have no printable form and are sent as control sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Escape,
    Tab,
    Enter,
    Up,
    Down,
    Right,
    Left,
}

/// Bytes for a named key. Arrows carry an xterm modifier parameter when one is held
/// (`5` for ctrl, `3` for cmd, which terminals treat as alt/meta).
pub fn named_key_sequence(key: NamedKey, modifier: Option<Modifier>) -> &'static [u8] {
    match (key, modifier) {
        (NamedKey::Escape, _) => b"\x1b",
        (NamedKey::Tab, _) => b"\t",
        (NamedKey::Enter, _) => b"\r",

        (NamedKey::Up, None) => b"\x1b[A",
        (NamedKey::Down, None) => b"\x1b[B",
        (NamedKey::Right, None) => b"\x1b[C",
        (NamedKey::Left, None) => b"\x1b[D",

        (NamedKey::Up, Some(Modifier::Ctrl)) => b"\x1b[1;5A",
        (NamedKey::Down, Some(Modifier::Ctrl)) => b"\x1b[1;5B",
        (NamedKey::Right, Some(Modifier::Ctrl)) => b"\x1b[1;5C",
        (NamedKey::Left, Some(Modifier::Ctrl)) => b"\x1b[1;5D",

        (NamedKey::Up, Some(Modifier::Cmd)) => b"\x1b[1;3A",
        (NamedKey::Down, Some(Modifier::Cmd)) => b"\x1b[1;3B",
        (NamedKey::Right, Some(Modifier::Cmd)) => b"\x1b[1;3C",
        (NamedKey::Left, Some(Modifier::Cmd)) => b"\x1b[1;3D",
    }
}

/// Apply a held modifier to typed input. A single ASCII letter becomes its C0 control
/// byte; anything else passes through untouched.
pub fn compose(input: &[u8], modifier: Option<Modifier>) -> Vec<u8> {
    match (modifier, input) {
        (Some(_), [byte]) if byte.is_ascii_alphabetic() => vec![byte & 0b1_1111],
        _ => input.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_become_control_bytes() {
        assert_eq!(compose(b"c", Some(Modifier::Ctrl)), [0x03_u8]);
        assert_eq!(compose(b"C", Some(Modifier::Ctrl)), [0x03_u8]);
        assert_eq!(compose(b"d", Some(Modifier::Cmd)), [0x04_u8]);
        assert_eq!(compose(b"z", Some(Modifier::Ctrl)), [0x1a_u8]);
    }

    #[test]
    fn non_letters_pass_through() {
        assert_eq!(compose(b"1", Some(Modifier::Ctrl)), b"1");
        assert_eq!(compose(b"ab", Some(Modifier::Ctrl)), b"ab");
        assert_eq!(compose("é".as_bytes(), Some(Modifier::Ctrl)), "é".as_bytes());
        assert_eq!(compose(b"c", None), b"c");
    }

    #[test]
    fn arrows_take_modifier_parameter() {
        assert_eq!(named_key_sequence(NamedKey::Up, None), b"\x1b[A");
        assert_eq!(
            named_key_sequence(NamedKey::Left, Some(Modifier::Ctrl)),
            b"\x1b[1;5D"
        );
        assert_eq!(
            named_key_sequence(NamedKey::Right, Some(Modifier::Cmd)),
            b"\x1b[1;3C"
        );
    }

    #[test]
    fn plain_named_keys_ignore_modifier() {
        for modifier in [None, Some(Modifier::Ctrl), Some(Modifier::Cmd)] {
            assert_eq!(named_key_sequence(NamedKey::Escape, modifier), b"\x1b");
            assert_eq!(named_key_sequence(NamedKey::Tab, modifier), b"\t");
            assert_eq!(named_key_sequence(NamedKey::Enter, modifier), b"\r");
        }
    }
}
