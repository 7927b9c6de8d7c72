use std::path::{Path, PathBuf};

use crate::error::DaemonError;

pub const SOCKET_PREFIX: &str = "nfsup";
pub const SOCKET_EXTENSION: &str = "sock";

/// `<tmp>/nfsup-<user>-<instance>.sock` for the current user.
pub fn socket_path(instance: &str) -> Result<PathBuf, DaemonError> {
    let user = current_user(|key| std::env::var(key).ok())?;
    Ok(socket_path_in(&std::env::temp_dir(), &user, instance))
}

/// Pure form of [`socket_path`].
pub fn socket_path_in(tmp: &Path, user: &str, instance: &str) -> PathBuf {
    tmp.join(format!(
        "{SOCKET_PREFIX}-{user}-{instance}.{SOCKET_EXTENSION}"
    ))
}

/// `$USER`, falling back to `$LOGNAME`. Empty values count as unset.
pub fn current_user(env: impl Fn(&str) -> Option<String>) -> Result<String, DaemonError> {
    ["USER", "LOGNAME"]
        .into_iter()
        .filter_map(|key| env(key))
        .find(|value| !value.is_empty())
        .ok_or(DaemonError::UnknownUser)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn socket_name_carries_user_and_instance() {
        let path = socket_path_in(Path::new("/tmp"), "alice", "board-a");
        assert_eq!(path, PathBuf::from("/tmp/nfsup-alice-board-a.sock"));
    }

    #[test]
    fn user_prefers_user_over_logname() {
        let user = current_user(env_of(&[("USER", "alice"), ("LOGNAME", "bob")])).unwrap();
        assert_eq!(user, "alice");
    }

    #[test]
    fn user_falls_back_to_logname() {
        let user = current_user(env_of(&[("USER", ""), ("LOGNAME", "bob")])).unwrap();
        assert_eq!(user, "bob");
    }

    #[test]
    fn missing_user_is_an_error() {
        let err = current_user(env_of(&[])).unwrap_err();
        assert!(matches!(err, DaemonError::UnknownUser));
    }
}
