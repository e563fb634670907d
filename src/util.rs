use std::path::{Path, PathBuf};

use gethostname::gethostname;

/// Look up `[$sec] $key`, falling back to `$or` (with a warning) when the key
/// is missing or has the wrong type.
macro_rules! tomlget_or {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty, $or:expr) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .map(|val| val.$conv())
            .unwrap_or_else(|| {
                log::debug!(
                    "no {}:{} in config; proceeding with default {:?}",
                    $sec, $key, $or
                );
                Some($or)
            })
            .unwrap_or_else(|| {
                log::warn!(
                    "failed to convert {}:{} to {}; proceeding with default {:?}",
                    $sec,
                    $key,
                    stringify!($as),
                    $or
                );
                $or
            }) as $as
    };
    ($cfg:ident, $sec:expr, $key:expr, as_str, $or:expr) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .map(|val| val.as_str())
            .unwrap_or_else(|| {
                log::debug!(
                    "no {}:{} in config; proceeding with default {:?}",
                    $sec, $key, $or
                );
                Some($or)
            })
            .unwrap_or_else(|| {
                log::warn!(
                    "failed to convert {}:{} to string; proceeding with default {:?}",
                    $sec, $key, $or
                );
                $or
            })
    };
    ($cfg:ident, $sec:expr, $key:expr, as_bool, $or:expr) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .map(|val| val.as_bool())
            .unwrap_or_else(|| {
                log::debug!(
                    "no {}:{} in config; proceeding with default {:?}",
                    $sec, $key, $or
                );
                Some($or)
            })
            .unwrap_or_else(|| {
                log::warn!(
                    "failed to convert {}:{} to bool; proceeding with default {:?}",
                    $sec, $key, $or
                );
                $or
            })
    };
}

macro_rules! tomlget_opt {
    ($cfg:ident, $sec:expr, $key:expr, $conv:ident, $as:ty) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .and_then(|val| val.$conv())
            .map(|val| val as $as)
    };
    ($cfg:ident, $sec:expr, $key:expr, as_str) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .and_then(|val| val.as_str())
    };
    ($cfg:ident, $sec:expr, $key:expr, as_bool) => {
        $cfg.get($sec)
            .and_then(|sec| sec.get($key))
            .and_then(|val| val.as_bool())
    };
}

/// This machine's name, which keys its per-host config section.
pub fn hostname() -> Result<String, String> {
    gethostname()
        .into_string()
        .map_err(|_| "failed to get hostname".into())
}

/// Resolve a config file name: absolute paths as given, otherwise the
/// working directory first, then the executable's directory.
pub fn find_file(file_name: &Path) -> Option<PathBuf> {
    if file_name.is_absolute() {
        return file_name.exists().then(|| file_name.into());
    }
    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(file_name).exists() {
            return Some(cwd.join(file_name));
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        let candidate = exe.parent()?.join(file_name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> toml::Value {
        toml::from_str(
            r#"
            [align]
            span = 0.5
            steps = 12
            label = "stage A"
            verbose = true
            "#,
        )
        .expect("valid toml")
    }

    #[test]
    fn lookups_with_defaults() {
        let cfg = sample();
        assert!((tomlget_or!(cfg, "align", "span", as_float, f64, 1.0) - 0.5).abs() < 1e-12);
        assert!((tomlget_or!(cfg, "align", "missing", as_float, f64, 1.0) - 1.0).abs() < 1e-12);
        // wrong type falls back too
        assert_eq!(tomlget_or!(cfg, "align", "label", as_integer, u32, 3), 3);
        assert_eq!(tomlget_or!(cfg, "nowhere", "label", as_str, "x"), "x");
        assert!(tomlget_or!(cfg, "align", "verbose", as_bool, false));
        assert_eq!(tomlget_opt!(cfg, "align", "steps", as_integer, usize), Some(12));
        assert_eq!(tomlget_opt!(cfg, "align", "steps", as_str), None);
        assert_eq!(tomlget_opt!(cfg, "align", "verbose", as_bool), Some(true));
    }

    #[test]
    fn absolute_missing_file() {
        assert!(find_file(Path::new("/definitely/not/here.toml")).is_none());
    }
}
