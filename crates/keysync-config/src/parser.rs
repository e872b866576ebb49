//! KDL configuration parser

use std::path::Path;

use crate::error::ConfigError;
use crate::keymap::{KeyEntry, Keymap};
use crate::model::*;

// kdl carries its own miette version, so spans are rebuilt from offset and length.
fn node_span(node: &kdl::KdlNode) -> miette::SourceSpan {
    let span = node.span();
    miette::SourceSpan::from((span.offset(), span.len()))
}

fn entry_span(entry: &kdl::KdlEntry) -> miette::SourceSpan {
    let span = entry.span();
    miette::SourceSpan::from((span.offset(), span.len()))
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        let span = miette::SourceSpan::from((e.span.offset(), e.span.len()));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "keymap" => {
                let (keymap, replace) = parse_keymap(node, content)?;
                if replace {
                    config.keymap = keymap;
                } else {
                    config.keymap.merge(keymap);
                }
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    config.keymap.validate()?;

    Ok(config)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = child.entries().first().and_then(|e| e.value().as_string());
            match (child.name().value(), value) {
                ("log-level", Some(val)) => {
                    global.log_level = val
                        .parse()
                        .map_err(|e| ConfigError::Invalid { message: e })?;
                }
                ("socket-path", Some(val)) => {
                    global.socket_path = Some(shellexpand::tilde(val).into_owned().into());
                }
                ("device", Some(val)) => {
                    global.device = Some(shellexpand::tilde(val).into_owned().into());
                }
                (name @ ("log-level" | "socket-path" | "device"), None) => {
                    return Err(ConfigError::MissingField {
                        field: format!("string value for global `{}`", name),
                    });
                }
                (name, _) => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_keymap(node: &kdl::KdlNode, source: &str) -> Result<(Keymap, bool), ConfigError> {
    let replace = node
        .entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some("replace"))
        .and_then(|e| e.value().as_bool())
        .unwrap_or(false);

    let mut keymap = Keymap::empty();

    // Names in a merging keymap refer to the built-in table
    let base = Keymap::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let kind = child.name().value();
            if !matches!(kind, "key" | "modifier" | "caps-lock") {
                tracing::warn!("Unknown keymap entry: {}", kind);
                continue;
            }

            let code = parse_code(child, &keymap, &base, source)?;
            let mut entry = KeyEntry::default();
            let mut flag = None;

            for prop in child.entries() {
                let Some(name) = prop.name() else {
                    continue;
                };
                match name.value() {
                    "physical" => entry.physical = Some(parse_u64(prop, source)?),
                    "logical" => entry.logical = Some(parse_u64(prop, source)?),
                    "flag" => flag = Some(parse_u64(prop, source)?),
                    "name" => {
                        entry.name = prop.value().as_string().map(|s| s.to_string());
                    }
                    other => {
                        tracing::warn!("Unknown property `{}` on keymap entry {}", other, code);
                    }
                }
            }

            match (kind, flag) {
                ("modifier", Some(flag)) => {
                    keymap.modifiers.insert(code, flag);
                }
                ("caps-lock", Some(flag)) => {
                    keymap.caps_lock = Some((code, flag));
                }
                ("modifier" | "caps-lock", None) => {
                    return Err(ConfigError::InvalidEntry {
                        message: format!("`{}` entry for code {} needs a flag", kind, code),
                        src: source.to_string(),
                        span: node_span(child),
                    });
                }
                (_, Some(_)) => {
                    tracing::warn!("Ignoring flag on plain key {}; use `modifier`", code);
                }
                _ => {}
            }

            if entry != KeyEntry::default() {
                keymap.keys.insert(code, entry);
            }
        }
    }

    Ok((keymap, replace))
}

/// The first argument is a key code, or the name of a key defined earlier in
/// this block or in the built-in table.
fn parse_code(
    node: &kdl::KdlNode,
    keymap: &Keymap,
    base: &Keymap,
    source: &str,
) -> Result<u32, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidEntry {
        message,
        src: source.to_string(),
        span: node_span(node),
    };

    let arg = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .ok_or_else(|| invalid("missing key code".to_string()))?;

    if let Some(code) = arg.value().as_i64() {
        return u32::try_from(code).map_err(|_| invalid(format!("key code {} out of range", code)));
    }

    if let Some(name) = arg.value().as_string() {
        return keymap
            .code_of(name)
            .or_else(|| base.code_of(name))
            .ok_or_else(|| invalid(format!("unknown key name `{}`", name)));
    }

    Err(invalid("key code must be an integer or a key name".to_string()))
}

fn parse_u64(entry: &kdl::KdlEntry, source: &str) -> Result<u64, ConfigError> {
    entry
        .value()
        .as_i64()
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| ConfigError::InvalidEntry {
            message: format!("`{}` must be a non-negative integer", entry.value()),
            src: source.to_string(),
            span: entry_span(entry),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::flags;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_parse_global() {
        let config = parse_config_str(
            r#"
            global {
                log-level "debug"
                socket-path "/run/user/1000/keysync.sock"
                device "/dev/input/event3"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.global.log_level, LogLevel::Debug);
        assert_eq!(
            config.global.socket_path,
            Some(PathBuf::from("/run/user/1000/keysync.sock"))
        );
        assert_eq!(config.global.device, Some(PathBuf::from("/dev/input/event3")));
        assert_eq!(config.keymap, Keymap::default());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config.global.log_level, LogLevel::Info);
        assert!(config.global.device.is_none());
        assert_eq!(config.keymap, Keymap::default());
    }

    #[test]
    fn test_keymap_merges_over_default() {
        let config = parse_config_str(
            r#"
            keymap {
                key 30 logical=0x71
                key "Enter" physical=0x00070058
                modifier 58 flag=0x80000 logical=0x0100000200
                caps-lock 29 flag=0x10000
            }
            "#,
        )
        .unwrap();

        let keymap = &config.keymap;
        assert_eq!(keymap.keys[&30].logical, Some(0x71));
        assert_eq!(keymap.keys[&30].physical, Some(0x0007_0004));
        assert_eq!(keymap.keys[&28].physical, Some(0x0007_0058));
        assert_eq!(keymap.modifiers[&58], 0x80000);
        assert_eq!(keymap.modifiers[&42], flags::SHIFT_LEFT);
        assert_eq!(keymap.caps_lock, Some((29, flags::CAPS_LOCK)));
    }

    #[test]
    fn test_keymap_replace() {
        let config = parse_config_str(
            r#"
            keymap replace=true {
                key 0 physical=0x00070004 name="A"
                modifier 56 physical=0x000700e1 flag=0x20000
                caps-lock 57 physical=0x00070039 flag=0x10000
            }
            "#,
        )
        .unwrap();

        let keymap = &config.keymap;
        assert_eq!(keymap.keys.len(), 3);
        assert_eq!(keymap.name_of(0), Some("A"));
        assert_eq!(keymap.modifiers.len(), 1);
        assert_eq!(keymap.caps_lock, Some((57, 0x10000)));
    }

    #[test]
    fn test_default_keymap_roundtrips_through_kdl() {
        let config = parse_config_str(&Keymap::default().to_kdl()).unwrap();
        assert_eq!(config.keymap, Keymap::default());
    }

    #[test]
    fn test_duplicate_flag_rejected() {
        let result = parse_config_str(
            r#"
            keymap {
                modifier 200 flag=0x2
            }
            "#,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateFlag { flag: 0x2, .. })));
    }

    #[test]
    fn test_modifier_without_flag_rejected() {
        let result = parse_config_str("keymap {\n    modifier 42\n}\n");
        assert!(matches!(result, Err(ConfigError::InvalidEntry { .. })));
    }

    #[test]
    fn test_unknown_key_name_rejected() {
        let result = parse_config_str("keymap {\n    key \"Hyper\" logical=0x1\n}\n");
        match result {
            Err(ConfigError::InvalidEntry { message, .. }) => {
                assert!(message.contains("Hyper"));
            }
            other => panic!("expected InvalidEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_value_rejected() {
        let result = parse_config_str("keymap {\n    key 30 physical=-1\n}\n");
        assert!(matches!(result, Err(ConfigError::InvalidEntry { .. })));
    }

    #[test]
    fn test_bad_log_level() {
        let result = parse_config_str("global {\n    log-level \"loud\"\n}\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_syntax_error_has_span() {
        let result = parse_config_str("global {\n    log-level \"debug\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_parse_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "global {{\n    log-level \"trace\"\n}}").unwrap();

        let config = parse_config(file.path()).unwrap();
        assert_eq!(config.global.log_level, LogLevel::Trace);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = parse_config(&dir.path().join("missing.kdl"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
