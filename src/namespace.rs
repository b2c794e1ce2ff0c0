//! Flag namespacing for single-vault invocations.
//!
//! The argument grammar is keyed by vault name (`--fusemount NAME=DIR`). When
//! exactly one vault is declared, plain values are tagged with a prefix derived
//! from the vault path so users can write `--vault ~/vaults/work --fusemount
//! /mnt/work` and still feed the keyed grammar.

use crate::error::ValidationError;

/// Accepted spellings of the vault-declaring flag.
pub const VAULT_FLAGS: [&str; 2] = ["-vault", "--vault"];
/// Accepted spellings of the mount-flags flag.
pub const MOUNT_FLAGS_FLAGS: [&str; 2] = ["-mountFlags", "--mountFlags"];
/// Flags whose following value is tagged with the vault prefix.
pub const SHARED_FLAGS: [&str; 8] = [
    "-fusemount",
    "--fusemount",
    "-passwordfile",
    "--passwordfile",
    "-password",
    "--password",
    "-vault",
    "--vault",
];
/// Token that stands in for `=` inside namespaced mount flags.
pub const ESCAPED_EQUALS_TOKEN: &str = "%3D";
/// Prefix used when the vault name has no path segments.
pub const FALLBACK_PREFIX: &str = "vault";

const VALUE_FLAGS: [&str; 7] = [
    "--vault",
    "--fusemount",
    "--mountFlags",
    "--password",
    "--passwordfile",
    "--bind",
    "--port",
];

const SINGLE_DASH_LONG_FLAGS: [&str; 8] = [
    "-vault",
    "-fusemount",
    "-mountFlags",
    "-password",
    "-passwordfile",
    "-bind",
    "-port",
    "-version",
];

/// Returns the escape token for a reserved character.
///
/// The input character is ignored: every reserved character maps to the same
/// token, and `=` is the only character ever passed in.
pub fn encode_character(_character: char) -> &'static str {
    ESCAPED_EQUALS_TOKEN
}

/// Reverses [`encode_character`] for mount flag values.
pub fn decode_escaped_equals(value: &str) -> String {
    value.replace(ESCAPED_EQUALS_TOKEN, "=")
}

/// Derives the namespace prefix from a vault name or path.
pub fn vault_prefix(vault_name: &str) -> &str {
    vault_name
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(FALLBACK_PREFIX)
}

/// Tags shared flag values with the vault prefix when exactly one vault is declared.
///
/// With zero or several vault flags the input is returned untouched; callers
/// configuring several vaults pass `NAME=VALUE` values themselves.
pub fn namespace_args(raw_args: Vec<String>) -> Vec<String> {
    let Some(vault_name) = single_vault_name(&raw_args) else {
        return raw_args;
    };
    let prefix = vault_prefix(&vault_name).to_owned();

    let mut args = raw_args;
    let mut index = 0;
    while index < args.len() {
        let has_value = index + 1 < args.len();
        if has_value && MOUNT_FLAGS_FLAGS.contains(&args[index].as_str()) {
            let escaped = args[index + 1].replace('=', encode_character('='));
            args[index + 1] = format!("{prefix}={escaped}");
            index += 2;
        } else if has_value && SHARED_FLAGS.contains(&args[index].as_str()) {
            args[index + 1] = format!("{prefix}={}", args[index + 1]);
            index += 2;
        } else {
            index += 1;
        }
    }
    args
}

/// Maps single-dash long flags (`-vault`) to the double-dash form.
///
/// The token following a value-taking flag is never rewritten, so a
/// passphrase spelled `-port` stays intact.
pub fn normalize_spellings(args: Vec<String>) -> Vec<String> {
    let mut normalized = Vec::with_capacity(args.len());
    let mut value_expected = false;
    for arg in args {
        if value_expected {
            value_expected = false;
            normalized.push(arg);
            continue;
        }
        let long = if SINGLE_DASH_LONG_FLAGS.contains(&arg.as_str()) {
            format!("-{arg}")
        } else {
            arg
        };
        value_expected = VALUE_FLAGS.contains(&long.as_str());
        normalized.push(long);
    }
    normalized
}

/// Splits a `NAME=VALUE` argument at the first `=`.
pub fn parse_keyed_value(raw: &str) -> Result<(String, String), ValidationError> {
    let Some((name, value)) = raw.split_once('=') else {
        return Err(ValidationError::MissingSeparator(raw.to_owned()));
    };
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName(raw.to_owned()));
    }
    if value.is_empty() {
        return Err(ValidationError::EmptyValue(name.to_owned()));
    }
    Ok((name.to_owned(), value.to_owned()))
}

fn single_vault_name(args: &[String]) -> Option<String> {
    let positions = args
        .iter()
        .enumerate()
        .filter(|(_, arg)| VAULT_FLAGS.contains(&arg.as_str()))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    match positions.as_slice() {
        [position] => args.get(position + 1).cloned(),
        _ => None,
    }
}
