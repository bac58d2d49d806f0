//! Process-wide restrictor and public API.
//!
//! The global restrictor has an explicit lifecycle: [`install`] publishes a
//! new one atomically, [`reload`] refreshes it in place, and readers
//! always see a complete restrictor. Before anything is installed a
//! restrictor holding only the default rule is used, which allows every
//! request.

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::{Arc, Once};

use crate::error::{Error, Result};
use crate::Restrictor;

/// Global restrictor
static GLOBAL_RESTRICTOR: Lazy<ArcSwapOption<Restrictor>> = Lazy::new(ArcSwapOption::empty);

/// Initialization flag
static INIT: Once = Once::new();

/// Ensure a global restrictor exists, installing the allow-all one if
/// nothing has been installed yet.
pub fn ensure_initialized() {
    INIT.call_once(|| {
        if GLOBAL_RESTRICTOR.load().is_some() {
            return;
        }
        match Restrictor::allow_all() {
            Ok(restrictor) => {
                // Keep whatever `install` stored in the meantime
                let restrictor = Arc::new(restrictor);
                GLOBAL_RESTRICTOR
                    .rcu(|current| current.clone().or_else(|| Some(restrictor.clone())));
            }
            Err(e) => log::error!("Failed to initialize restrictor: {}", e),
        }
    });
}

/// Check if a restrictor has been installed or initialized.
pub fn is_initialized() -> bool {
    GLOBAL_RESTRICTOR.load().is_some()
}

/// Replace the global restrictor.
pub fn install(restrictor: Restrictor) {
    GLOBAL_RESTRICTOR.store(Some(Arc::new(restrictor)));
    log::debug!("Installed global restrictor");
}

/// Build a restrictor from a configuration file and install it.
///
/// On error the previous restrictor stays in place.
pub fn install_from_path(path: impl AsRef<Path>) -> Result<()> {
    install(Restrictor::from_path(path)?);
    Ok(())
}

/// Get the current global restrictor.
pub fn current() -> Option<Arc<Restrictor>> {
    ensure_initialized();
    GLOBAL_RESTRICTOR.load_full()
}

/// Reload the groups and rules of the global restrictor.
pub fn reload() -> Result<()> {
    let restrictor = GLOBAL_RESTRICTOR.load_full().ok_or(Error::NotInitialized)?;
    restrictor.reload()
}

/// Whether access to `url` from `client_ip` is refused by the global
/// restrictor.
///
/// # Examples
/// ```ignore
/// if iprestrict::is_restricted(path, remote_addr) {
///     return forbidden();
/// }
/// ```
pub fn is_restricted(url: &str, client_ip: &str) -> bool {
    ensure_initialized();

    let guard = GLOBAL_RESTRICTOR.load();
    match &*guard {
        Some(restrictor) => restrictor.is_restricted(url, client_ip),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, NewRule, ALL_GROUP};

    // One test touches the global so parallel tests cannot interfere.
    #[test]
    fn test_global_lifecycle() {
        assert!(!is_restricted("/anything", "1.2.3.4"));
        assert!(is_initialized());
        reload().unwrap();

        let restrictor = Restrictor::allow_all().unwrap();
        restrictor
            .rules()
            .create(NewRule::new("^/blocked", ALL_GROUP, Action::Deny))
            .unwrap();
        install(restrictor);
        ensure_initialized();

        assert!(is_restricted("/blocked/page", "1.2.3.4"));
        assert!(!is_restricted("/open", "1.2.3.4"));

        let current = current().unwrap();
        assert_eq!(current.rules().len(), 2);

        let dir = tempfile::tempdir().unwrap();
        assert!(install_from_path(dir.path().join("missing.yaml")).is_err());
        assert!(is_restricted("/blocked/page", "1.2.3.4"));
    }
}
