use crate::error::ManageError;

/// Parse a human-readable size string into bytes.
///
/// Accepts formats like `"20G"`, `"512M"`, `"100K"`, `"1073741824"`.
/// Uses binary units (1G = 1024³ = 1,073,741,824 bytes).
pub fn parse_size(s: &str) -> Result<u64, ManageError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ManageError::Validation {
            message: "size cannot be empty".into(),
        });
    }

    // Split into numeric part and suffix
    let (num_str, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(i) => (&s[..i], s[i..].to_ascii_uppercase()),
        None => (s, String::new()),
    };

    let num: u64 = num_str.parse().map_err(|_| ManageError::Validation {
        message: format!("invalid size number: '{num_str}'"),
    })?;

    let multiplier: u64 = match suffix.as_str() {
        "" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        "T" | "TB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(ManageError::Validation {
                message: format!("unknown size suffix: '{suffix}' (use G, M, K, or T)"),
            });
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| ManageError::Validation {
            message: format!("size overflows: '{s}'"),
        })
}

/// Validate an identifier used for machines, remotes and VMs:
/// non-empty, at most 64 chars, only `[A-Za-z0-9_-]`.
pub fn validate_name(kind: &str, name: &str) -> Result<(), ManageError> {
    if name.is_empty() {
        return Err(ManageError::Validation {
            message: format!("{kind} name must not be empty"),
        });
    }
    if name.len() > 64 {
        return Err(ManageError::Validation {
            message: format!("{kind} name must be at most 64 characters (got {})", name.len()),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ManageError::Validation {
            message: format!(
                "{kind} name may only contain letters, digits, '-' and '_' (got '{name}')"
            ),
        });
    }
    Ok(())
}

/// Quote a single argument for a POSIX shell.
///
/// Safe words pass through untouched; everything else is wrapped in single
/// quotes with embedded quotes escaped as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+%".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Join an argument vector into a display / remote-shell string.
pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
