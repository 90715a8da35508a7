// ABOUTME: Shared helpers for identifier validation, quoting, and URL sanitizing
// ABOUTME: Used by config validation, SQL generation, and log output

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

/// Validate a PostgreSQL identifier (schema name) before it is spliced into SQL.
///
/// Identifiers must start with a letter or underscore, contain only ASCII
/// letters, digits and underscores, and be at most 63 characters long.
///
/// # Examples
///
/// ```
/// # use search_replicator::utils::validate_postgres_identifier;
/// assert!(validate_postgres_identifier("content").is_ok());
/// assert!(validate_postgres_identifier("_private").is_ok());
/// assert!(validate_postgres_identifier("1content").is_err());
/// assert!(validate_postgres_identifier(" content").is_err());
/// assert!(validate_postgres_identifier("content\"; DROP TABLE film_work; --").is_err());
/// ```
pub fn validate_postgres_identifier(identifier: &str) -> Result<()> {
    let trimmed = identifier.trim();
    let Some(first_char) = trimmed.chars().next() else {
        bail!("Identifier cannot be empty or whitespace-only");
    };

    // Quoting keeps whitespace, so a padded name would address a different schema
    if trimmed.len() != identifier.len() {
        bail!(
            "Identifier '{}' has leading or trailing whitespace",
            sanitize_identifier(trimmed)
        );
    }

    // PostgreSQL truncates identifiers at NAMEDATALEN - 1
    if trimmed.len() > 63 {
        bail!(
            "Identifier '{}' exceeds maximum length of 63 characters (got {})",
            sanitize_identifier(trimmed),
            trimmed.len()
        );
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        bail!(
            "Identifier '{}' must start with a letter or underscore, not '{}'",
            sanitize_identifier(trimmed),
            first_char
        );
    }

    if let Some((i, c)) = trimmed
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
    {
        bail!(
            "Identifier '{}' contains invalid character '{}' at position {}. \
             Only letters, digits, and underscores are allowed",
            sanitize_identifier(trimmed),
            if c.is_control() {
                format!("\\x{:02x}", c as u32)
            } else {
                c.to_string()
            },
            i
        );
    }

    Ok(())
}

/// Strip control characters and cap length so identifiers are safe to log.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a PostgreSQL identifier, doubling any embedded quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Mask the password component of a URL for logging.
///
/// Strings that do not parse as URLs are returned unchanged.
pub fn sanitize_url(url: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(url) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        parsed.to_string()
    } else {
        url.to_string()
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: PathBuf) -> Result<PathBuf> {
    let as_str = path.to_string_lossy();
    if let Some(stripped) = as_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
        return Ok(home.join(stripped));
    }
    if as_str == "~" {
        return dirs::home_dir().ok_or_else(|| anyhow!("unable to determine home directory"));
    }
    Ok(path)
}
