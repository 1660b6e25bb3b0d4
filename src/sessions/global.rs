//! Process-wide authority with explicit install and teardown.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::SessionError;
use crate::sessions::SessionAuthority;

static AUTHORITY: RwLock<Option<Arc<SessionAuthority>>> = parking_lot::const_rwlock(None);

pub fn install_global(authority: Arc<SessionAuthority>) -> Result<(), SessionError> {
    let mut slot = AUTHORITY.write();
    if slot.is_some() {
        return Err(SessionError::AlreadyInstalled);
    }
    *slot = Some(authority);
    Ok(())
}

pub fn global() -> Result<Arc<SessionAuthority>, SessionError> {
    AUTHORITY.read().clone().ok_or(SessionError::NotInstalled)
}

/// Uninstall the authority and evict every session it holds. Returns the
/// number of sessions evicted.
pub fn teardown_global() -> usize {
    let Some(authority) = AUTHORITY.write().take() else {
        return 0;
    };
    let evicted = authority.evict_all();
    info!(evicted, "session authority torn down");
    evicted
}
