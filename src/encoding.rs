//! Derives a client's character encoding from SSH environment hints and
//! terminal-type strings, and picks the backend port that matches it.

use std::collections::HashMap;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Cp437,
}

const ENV_KEYS: [&str; 3] = ["LANG", "LC_ALL", "LC_CTYPE"];

const UTF8_TERMS: [&str; 11] = [
    "xterm",
    "xterm-color",
    "xterm-256color",
    "screen",
    "screen-256color",
    "rxvt-unicode",
    "konsole",
    "gnome",
    "linux",
    "vt220",
    "vt100",
];

const CP437_TERMS: [&str; 6] = ["ansi", "ansi-bbs", "ansi-mono", "ansi-color", "pcansi", "scoansi"];

/// Scans `env` for a UTF-8 locale hint, then falls back to classifying
/// `term_type`. Env always wins over term-type; within either source, the
/// first match wins. Absence of both defaults to [`Encoding::Cp437`].
pub fn detect(env: &HashMap<String, String>, term_type: Option<&str>) -> Encoding {
    for key in ENV_KEYS {
        if let Some(value) = env.get(key) {
            let upper = value.to_uppercase();
            if upper.contains("UTF-8") || upper.contains("UTF8") {
                return Encoding::Utf8;
            }
        }
    }

    let Some(term_type) = term_type else {
        return Encoding::Cp437;
    };
    let term_type = term_type.to_lowercase();

    if UTF8_TERMS.iter().any(|candidate| term_type.contains(candidate)) {
        return Encoding::Utf8;
    }
    if CP437_TERMS.iter().any(|candidate| term_type.contains(candidate)) {
        return Encoding::Cp437;
    }

    Encoding::Cp437
}

/// Picks the backend port for `encoding`, returning the default port when
/// encoding detection is disabled.
pub fn backend_port(encoding: Encoding, config: &Config) -> u16 {
    if !config.encoding_detection_enabled {
        return config.backend_port;
    }

    match encoding {
        Encoding::Utf8 => config.backend_port_utf8.unwrap_or(config.backend_port),
        Encoding::Cp437 => config.backend_port_cp437.unwrap_or(config.backend_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn lang_utf8_wins() {
        let env = env(&[("LANG", "en_US.UTF-8")]);
        assert_eq!(detect(&env, Some("ansi")), Encoding::Utf8);
    }

    #[test]
    fn no_env_hint_falls_back_to_term_type() {
        let env = env(&[]);
        assert_eq!(detect(&env, Some("xterm-256color")), Encoding::Utf8);
        assert_eq!(detect(&env, Some("ansi-bbs")), Encoding::Cp437);
    }

    #[test]
    fn unknown_term_type_defaults_cp437() {
        let env = env(&[]);
        assert_eq!(detect(&env, Some("totally-unknown")), Encoding::Cp437);
        assert_eq!(detect(&env, None), Encoding::Cp437);
    }

    #[test]
    fn env_order_lang_lc_all_lc_ctype() {
        let env = env(&[("LC_ALL", "C"), ("LC_CTYPE", "en_US.UTF-8")]);
        assert_eq!(detect(&env, None), Encoding::Utf8);
    }

    #[test]
    fn empty_lang_value_is_ignored() {
        let env = env(&[("LANG", "")]);
        assert_eq!(detect(&env, Some("xterm")), Encoding::Utf8);
    }
}
