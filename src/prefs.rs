//! The last machine picked in the TUI, kept in a one-line text file.

use std::path::Path;

use crate::error::ManageError;

pub fn load_last_machine(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let name = contents.trim();
    if name.is_empty() || crate::util::validate_name("machine", name).is_err() {
        return None;
    }
    Some(name.to_string())
}

pub fn save_last_machine(path: &Path, machine: &str) -> Result<(), ManageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ManageError::Io {
            context: format!("failed to create {}", parent.display()),
            source,
        })?;
    }
    std::fs::write(path, format!("{machine}\n")).map_err(|source| ManageError::Io {
        context: format!("failed to write {}", path.display()),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("last-machine");
        assert_eq!(load_last_machine(&path), None);

        save_last_machine(&path, "superheavy").unwrap();
        assert_eq!(load_last_machine(&path).as_deref(), Some("superheavy"));

        std::fs::write(&path, "not a machine name!\n").unwrap();
        assert_eq!(load_last_machine(&path), None);
    }
}
