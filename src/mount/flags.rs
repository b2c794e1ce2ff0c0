use std::path::Path;

use crate::namespace::decode_escaped_equals;

/// FUSE subtype that tags every mount started by this tool.
pub const FUSE_SUBTYPE: &str = "vaultmount";
/// Mount source prefix set through the `fsname` option.
pub const FSNAME_PREFIX: &str = "vaultmount@";

const OPTION_PREFIX: &str = "-o";
const RAW_FLAG_SEPARATOR: char = ',';
const IDENTIFYING_KEYS: [&str; 2] = ["subtype", "fsname"];

/// Ordered list of native `-o<key>[=<value>]` mount flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountFlags {
    flags: Vec<String>,
}

impl MountFlags {
    /// Wraps already formatted native flags.
    pub fn new(flags: Vec<String>) -> Self {
        Self { flags }
    }

    /// Parses a comma-separated option string such as `uid=1000,ro`.
    ///
    /// Namespaced values carry `=` as an escape token; it is reversed here.
    pub fn parse_raw(raw: &str) -> Self {
        let flags = raw
            .split(RAW_FLAG_SEPARATOR)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| format!("{OPTION_PREFIX}{}", decode_escaped_equals(token)))
            .collect();
        Self { flags }
    }

    /// Native flags in order.
    pub fn as_slice(&self) -> &[String] {
        &self.flags
    }

    /// Consumes the list and returns the native flags.
    pub fn into_vec(self) -> Vec<String> {
        self.flags
    }

    /// Returns `true` when no flags are present.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Combines defaults, user flags, and the identifying options for one vault.
    ///
    /// A user flag replaces any default with the same key. User-supplied
    /// `subtype`/`fsname` options are dropped because the mount table watcher
    /// relies on them.
    pub fn for_vault(defaults: &[String], user: &MountFlags, vault_path: &Path) -> Self {
        let mut user_flags = Vec::with_capacity(user.flags.len());
        for flag in &user.flags {
            if flag_key(flag).is_some_and(|key| IDENTIFYING_KEYS.contains(&key)) {
                tracing::warn!(flag = %flag, "ignoring user mount flag that overrides vault identification");
                continue;
            }
            user_flags.push(flag.clone());
        }

        let mut flags = defaults
            .iter()
            .filter(|default| {
                let default_key = flag_key(default);
                default_key.is_none()
                    || !user_flags
                        .iter()
                        .any(|flag| flag_key(flag) == default_key)
            })
            .cloned()
            .collect::<Vec<_>>();
        flags.extend(user_flags);
        flags.extend(identifying_flags(vault_path));
        Self { flags }
    }
}

/// The two options that let the mount table watcher recognise a vault mount.
pub fn identifying_flags(vault_path: &Path) -> [String; 2] {
    [
        format!("{OPTION_PREFIX}subtype={FUSE_SUBTYPE}"),
        format!("{OPTION_PREFIX}fsname={FSNAME_PREFIX}{}", vault_path.display()),
    ]
}

/// Returns the option key of a `-o<key>[=<value>]` flag.
pub fn flag_key(flag: &str) -> Option<&str> {
    let option = flag.strip_prefix(OPTION_PREFIX)?;
    let key = option.split_once('=').map_or(option, |(key, _)| key);
    (!key.is_empty()).then_some(key)
}
