//! Key-combo parsing and AppleScript string handling for keyboard input.
//!
//! CJK text cannot be sent reliably with `keystroke`, so callers route it
//! through the clipboard and a paste shortcut instead.

use crate::errors::{DeskPilotError, DeskPilotResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Command,
    Shift,
    Option,
    Control,
}

impl Modifier {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "cmd" | "command" | "meta" | "super" => Some(Modifier::Command),
            "shift" => Some(Modifier::Shift),
            "option" | "opt" | "alt" => Some(Modifier::Option),
            "ctrl" | "control" => Some(Modifier::Control),
            _ => None,
        }
    }

    fn applescript(&self) -> &'static str {
        match self {
            Modifier::Command => "command down",
            Modifier::Shift => "shift down",
            Modifier::Option => "option down",
            Modifier::Control => "control down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    /// macOS virtual key code.
    Code(u16),
    /// A printable character, sent with `keystroke`.
    Char(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: Key,
}

fn special_key(name: &str) -> Option<u16> {
    let code = match name {
        "return" | "enter" => 36,
        "tab" => 48,
        "space" | "spacebar" => 49,
        "delete" | "backspace" => 51,
        "escape" | "esc" => 53,
        "forwarddelete" | "fn+delete" => 117,
        "home" => 115,
        "end" => 119,
        "pageup" | "page_up" => 116,
        "pagedown" | "page_down" => 121,
        "left" | "arrowleft" => 123,
        "right" | "arrowright" => 124,
        "down" | "arrowdown" => 125,
        "up" | "arrowup" => 126,
        "f1" => 122,
        "f2" => 120,
        "f3" => 99,
        "f4" => 118,
        "f5" => 96,
        _ => return None,
    };
    Some(code)
}

/// Parses combos like `cmd+shift+t`, `return`, `Ctrl + Left`.
pub fn parse_key_combo(combo: &str) -> DeskPilotResult<KeyCombo> {
    let parts: Vec<String> = combo
        .split('+')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    let Some((last, mods)) = parts.split_last() else {
        return Err(DeskPilotError::Executor(format!("empty key combo: {combo:?}")));
    };

    let mut modifiers = Vec::new();
    for m in mods {
        let modifier = Modifier::parse(m).ok_or_else(|| {
            DeskPilotError::Executor(format!("unknown modifier {m:?} in {combo:?}"))
        })?;
        if !modifiers.contains(&modifier) {
            modifiers.push(modifier);
        }
    }

    let key = if let Some(code) = special_key(last) {
        Key::Code(code)
    } else if last.chars().count() == 1 {
        Key::Char(last.clone())
    } else {
        return Err(DeskPilotError::Executor(format!("unknown key {last:?} in {combo:?}")));
    };

    Ok(KeyCombo { modifiers, key })
}

impl KeyCombo {
    /// System Events statement pressing this combo.
    pub fn to_applescript(&self) -> String {
        let press = match &self.key {
            Key::Code(code) => format!("key code {code}"),
            Key::Char(c) => format!("keystroke \"{}\"", escape_applescript(c)),
        };
        if self.modifiers.is_empty() {
            format!("tell application \"System Events\" to {press}")
        } else {
            let using: Vec<&str> = self.modifiers.iter().map(Modifier::applescript).collect();
            format!(
                "tell application \"System Events\" to {press} using {{{}}}",
                using.join(", ")
            )
        }
    }
}

/// Escape text for embedding in an AppleScript string literal.
pub fn escape_applescript(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        ('\u{4e00}'..='\u{9fff}').contains(&c)
            || ('\u{3040}'..='\u{309f}').contains(&c)
            || ('\u{30a0}'..='\u{30ff}').contains(&c)
            || ('\u{ac00}'..='\u{d7af}').contains(&c)
    })
}

/// AppleScript that types `text` into the frontmost app.
pub fn type_text_script(text: &str) -> String {
    let escaped = escape_applescript(text);
    if contains_cjk(text) {
        format!(
            "set the clipboard to \"{escaped}\"\n\
             delay 0.05\n\
             tell application \"System Events\" to keystroke \"v\" using {{command down}}"
        )
    } else {
        format!("tell application \"System Events\" to keystroke \"{escaped}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modifiers_and_special_keys() {
        let c = parse_key_combo("Cmd + Shift + T").unwrap();
        assert_eq!(c.modifiers, vec![Modifier::Command, Modifier::Shift]);
        assert_eq!(c.key, Key::Char("t".into()));

        assert_eq!(parse_key_combo("return").unwrap().key, Key::Code(36));
        assert_eq!(parse_key_combo("escape").unwrap().key, Key::Code(53));
        assert_eq!(parse_key_combo("alt+left").unwrap().key, Key::Code(123));
        assert_eq!(parse_key_combo("up").unwrap().key, Key::Code(126));
        assert_eq!(parse_key_combo("backspace").unwrap().key, Key::Code(51));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_key_combo("").is_err());
        assert!(parse_key_combo("hyper+k").is_err());
        assert!(parse_key_combo("cmd+banana").is_err());
    }

    #[test]
    fn applescript_rendering() {
        assert_eq!(
            parse_key_combo("cmd+a").unwrap().to_applescript(),
            "tell application \"System Events\" to keystroke \"a\" using {command down}"
        );
        assert_eq!(
            parse_key_combo("enter").unwrap().to_applescript(),
            "tell application \"System Events\" to key code 36"
        );
    }

    #[test]
    fn escaping_and_cjk() {
        assert_eq!(escape_applescript(r#"say "hi"\"#), r#"say \"hi\"\\"#);
        assert!(contains_cjk("你好"));
        assert!(!contains_cjk("12*4="));
        assert!(type_text_script("你好").contains("set the clipboard"));
        assert!(type_text_script("12*4=").contains("keystroke \"12*4=\""));
    }
}
