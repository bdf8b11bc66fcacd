use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use termtabs::orchestrator::{Modifier, NamedKey, named_key_sequence};

/// A forwarded key, either raw bytes or a named key the orchestrator encodes (so a
/// latched on-screen modifier can apply to it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Text(Vec<u8>),
    Named(NamedKey),
}

/// Translate a key press that was not intercepted. `None` for keys with no encoding.
pub fn translate(key: &KeyEvent) -> Option<KeyInput> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    if let Some(named) = named(key.code) {
        let held = if ctrl {
            Some(Modifier::Ctrl)
        } else if alt {
            Some(Modifier::Cmd)
        } else {
            None
        };
        return Some(match held {
            Some(modifier) => KeyInput::Text(named_key_sequence(named, Some(modifier)).to_vec()),
            None => KeyInput::Named(named),
        });
    }

    let bytes = match key.code {
        KeyCode::Char(c) if ctrl && !alt => control_byte(c).map(|b| vec![b])?,
        KeyCode::Char(c) if alt && !ctrl => {
            let mut bytes = vec![0x1b];
            bytes.extend_from_slice(c.encode_utf8(&mut [0; 4]).as_bytes());
            bytes
        }
        KeyCode::Char(c) => c.encode_utf8(&mut [0; 4]).as_bytes().to_vec(),
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace if ctrl => vec![0x17],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::F(n) => function_key(n)?.to_vec(),
        _ => return None,
    };
    Some(KeyInput::Text(bytes))
}

fn named(code: KeyCode) -> Option<NamedKey> {
    Some(match code {
        KeyCode::Esc => NamedKey::Escape,
        KeyCode::Tab => NamedKey::Tab,
        KeyCode::Enter => NamedKey::Enter,
        KeyCode::Up => NamedKey::Up,
        KeyCode::Down => NamedKey::Down,
        KeyCode::Right => NamedKey::Right,
        KeyCode::Left => NamedKey::Left,
        _ => return None,
    })
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 & 0b1_1111),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' => Some(0x1f),
        '?' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<&'static [u8]> {
    let sequence: &'static [u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    };
    Some(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyInput> {
        translate(&KeyEvent::new(code, modifiers))
    }

    fn text(bytes: &[u8]) -> Option<KeyInput> {
        Some(KeyInput::Text(bytes.to_vec()))
    }

    #[test]
    fn printable_chars_are_utf8() {
        assert_eq!(key(KeyCode::Char('a'), KeyModifiers::NONE), text(b"a"));
        assert_eq!(key(KeyCode::Char('A'), KeyModifiers::SHIFT), text(b"A"));
        assert_eq!(
            key(KeyCode::Char('é'), KeyModifiers::NONE),
            text("é".as_bytes())
        );
    }

    #[test]
    fn ctrl_letters_are_c0() {
        assert_eq!(key(KeyCode::Char('c'), KeyModifiers::CONTROL), text(&[0x03]));
        assert_eq!(key(KeyCode::Char('['), KeyModifiers::CONTROL), text(&[0x1b]));
        assert_eq!(key(KeyCode::Char('é'), KeyModifiers::CONTROL), None);
    }

    #[test]
    fn plain_named_keys_go_through_orchestrator() {
        assert_eq!(
            key(KeyCode::Up, KeyModifiers::NONE),
            Some(KeyInput::Named(NamedKey::Up))
        );
        assert_eq!(
            key(KeyCode::Enter, KeyModifiers::NONE),
            Some(KeyInput::Named(NamedKey::Enter))
        );
    }

    #[test]
    fn held_modifiers_on_arrows_are_encoded() {
        assert_eq!(key(KeyCode::Left, KeyModifiers::CONTROL), text(b"\x1b[1;5D"));
        assert_eq!(key(KeyCode::Right, KeyModifiers::ALT), text(b"\x1b[1;3C"));
    }

    #[test]
    fn editing_and_function_keys() {
        assert_eq!(key(KeyCode::Backspace, KeyModifiers::NONE), text(&[0x7f]));
        assert_eq!(key(KeyCode::Delete, KeyModifiers::NONE), text(b"\x1b[3~"));
        assert_eq!(key(KeyCode::F(1), KeyModifiers::NONE), text(b"\x1bOP"));
        assert_eq!(key(KeyCode::F(20), KeyModifiers::NONE), None);
        assert_eq!(key(KeyCode::Char('x'), KeyModifiers::ALT), text(b"\x1bx"));
    }
}
