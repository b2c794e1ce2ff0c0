use std::{
    fs,
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
};

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{Result, VaultMountError};

/// Source of one vault's passphrase.
pub trait PasswordStrategy {
    /// Acquires the passphrase; may block on input.
    fn password(&self) -> Result<SecretString>;
    /// Checks the strategy can work before any vault is touched.
    fn validate(&self) -> Result<()>;
    /// Short label for logs.
    fn describe(&self) -> &'static str;
}

/// Passphrase given on the command line.
pub struct InlinePassword {
    vault_name: String,
    value: SecretString,
}

impl InlinePassword {
    /// Wraps a passphrase given for `vault_name`.
    pub fn new(vault_name: impl Into<String>, value: String) -> Self {
        Self {
            vault_name: vault_name.into(),
            value: SecretString::new(value),
        }
    }
}

impl PasswordStrategy for InlinePassword {
    fn password(&self) -> Result<SecretString> {
        Ok(SecretString::new(self.value.expose_secret().clone()))
    }

    fn validate(&self) -> Result<()> {
        if self.value.expose_secret().is_empty() {
            return Err(VaultMountError::Configuration(format!(
                "Empty password for vault \"{}\".",
                self.vault_name
            )));
        }
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "inline"
    }
}

/// Passphrase read from the first line of a file.
pub struct PasswordFile {
    vault_name: String,
    path: PathBuf,
}

impl PasswordFile {
    /// Reads the passphrase for `vault_name` from `path`.
    pub fn new(vault_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            vault_name: vault_name.into(),
            path: path.into(),
        }
    }
}

impl PasswordStrategy for PasswordFile {
    fn password(&self) -> Result<SecretString> {
        let mut contents = fs::read_to_string(&self.path)?;
        let password = read_password_line(contents.as_bytes());
        contents.zeroize();
        password?.ok_or_else(|| {
            VaultMountError::Configuration(format!(
                "Password file for vault \"{}\" is empty: {}",
                self.vault_name,
                self.path.display()
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        if !self.path.is_file() {
            return Err(VaultMountError::Configuration(format!(
                "Password file does not exist: {}",
                self.path.display()
            )));
        }
        fs::File::open(&self.path).map_err(|error| {
            VaultMountError::Configuration(format!(
                "Password file is not readable: {} ({error})",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "file"
    }
}

/// Passphrase typed after a prompt.
///
/// On a terminal the input is read without echo; piped input is read as one
/// line.
pub struct PromptPassword {
    vault_name: String,
}

impl PromptPassword {
    /// Prompts for the passphrase of `vault_name`.
    pub fn new(vault_name: impl Into<String>) -> Self {
        Self {
            vault_name: vault_name.into(),
        }
    }

    fn prompt(&self) -> String {
        format!("Enter password for vault \"{}\": ", self.vault_name)
    }
}

impl PasswordStrategy for PromptPassword {
    fn password(&self) -> Result<SecretString> {
        let typed = if io::stdin().is_terminal() {
            non_empty_secret(rpassword::prompt_password(self.prompt())?)
        } else {
            {
                let stderr = io::stderr();
                let mut handle = stderr.lock();
                handle.write_all(self.prompt().as_bytes())?;
                handle.flush()?;
            }
            read_password_line(io::stdin().lock())?
        };
        typed.ok_or_else(|| {
            VaultMountError::Configuration(format!(
                "No password entered for vault \"{}\".",
                self.vault_name
            ))
        })
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "prompt"
    }
}

/// Reads one line and strips the trailing CR/LF. Returns `None` for an empty line.
pub fn read_password_line<R>(mut reader: R) -> Result<Option<SecretString>>
where
    R: BufRead,
{
    let mut line = String::new();
    reader.read_line(&mut line)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(non_empty_secret(line))
}

fn non_empty_secret(typed: String) -> Option<SecretString> {
    (!typed.is_empty()).then(|| SecretString::new(typed))
}
