//! Installer collaborator.

use async_trait::async_trait;
use fadeabe_core::UpdateId;

use crate::error::CollaboratorError;

/// Applies a decrypted update to the device.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, uid: &UpdateId, version: &str, payload: &[u8]) -> Result<(), CollaboratorError>;
}

/// An installer that records what it was asked to install.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// One recorded installation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Installed {
        pub uid: UpdateId,
        pub version: String,
        pub payload: Vec<u8>,
    }

    #[derive(Default)]
    pub struct RecordingInstaller {
        installed: Mutex<Vec<Installed>>,
        broken: AtomicBool,
    }

    impl RecordingInstaller {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every installation fail.
        pub fn set_broken(&self, broken: bool) {
            self.broken.store(broken, Ordering::SeqCst);
        }

        pub fn installed(&self) -> Vec<Installed> {
            self.installed.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Installer for RecordingInstaller {
        async fn install(&self, uid: &UpdateId, version: &str, payload: &[u8]) -> Result<(), CollaboratorError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CollaboratorError::Rejected("installer refused the image".into()));
            }
            self.installed
                .lock()
                .map_err(|e| CollaboratorError::Rejected(format!("installer poisoned: {}", e)))?
                .push(Installed {
                    uid: uid.clone(),
                    version: version.to_string(),
                    payload: payload.to_vec(),
                });
            Ok(())
        }
    }
}
