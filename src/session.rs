use crate::catalog::Catalog;
use crate::catalog::deployment::hash_password;
use crate::error::LivecatError;
use crate::permission::Grant;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Client handle for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: u64,
    /// Connected through the administrative port; keeps full access while the
    /// server is paused.
    pub admin: bool,
}

#[derive(Debug, Clone)]
struct SessionState {
    user: Option<String>,
    password_hash: Option<String>,
    admin: bool,
    grant: Grant,
    valid: bool,
}

/// What a call may do, resolved from its session.
#[derive(Debug, Clone)]
pub struct Caller {
    pub session_id: u64,
    pub user: Option<String>,
    pub admin: bool,
    pub grant: Grant,
}

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<u64, SessionState>>,
    next_id: AtomicU64,
}

fn authenticate(
    catalog: &Catalog,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<(Grant, Option<String>), LivecatError> {
    if !catalog.deployment.security.enabled {
        // Kept so the session survives security being enabled later, as long
        // as the credentials match a user at that point.
        return Ok((Grant::unrestricted(), password.map(hash_password)));
    }
    let name = user.ok_or(LivecatError::AuthenticationRejected)?;
    let def = catalog
        .deployment
        .user(name)
        .ok_or(LivecatError::AuthenticationRejected)?;
    if !def.verify_password(password.unwrap_or("")) {
        return Err(LivecatError::AuthenticationRejected);
    }
    let grant = Grant::new(def.roles.clone(), catalog.role_permissions(&def.roles));
    Ok((grant, def.password_hash.clone()))
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session under `catalog`'s security settings. Without security
    /// every session is fully privileged and credentials are not checked.
    pub fn connect(
        &self,
        catalog: &Catalog,
        user: Option<&str>,
        password: Option<&str>,
        admin: bool,
    ) -> Result<Session, LivecatError> {
        let (grant, password_hash) = authenticate(catalog, user, password)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.write().insert(
            id,
            SessionState {
                user: user.map(str::to_string),
                password_hash,
                admin,
                grant,
                valid: true,
            },
        );
        debug!(session_id = id, user = user.unwrap_or(""), admin, "session opened");
        Ok(Session { id, admin })
    }

    pub fn disconnect(&self, session: Session) {
        self.sessions.write().remove(&session.id);
    }

    pub fn caller(&self, session: Session) -> Result<Caller, LivecatError> {
        let sessions = self.sessions.read();
        match sessions.get(&session.id) {
            Some(state) if state.valid => Ok(Caller {
                session_id: session.id,
                user: state.user.clone(),
                admin: state.admin,
                grant: state.grant.clone(),
            }),
            _ => Err(LivecatError::SessionInvalidated {
                session_id: session.id,
            }),
        }
    }

    /// Re-checks every open session against a newly committed catalog.
    /// Sessions whose credentials no longer hold are invalidated; surviving
    /// sessions pick up their new grant. Returns the number invalidated.
    pub fn revalidate(&self, catalog: &Catalog) -> usize {
        let security = catalog.deployment.security.enabled;
        let mut invalidated = 0;
        let mut sessions = self.sessions.write();
        for (id, state) in sessions.iter_mut().filter(|(_, s)| s.valid) {
            if !security {
                state.grant = Grant::unrestricted();
                continue;
            }
            let still_valid = state.user.as_deref().and_then(|name| {
                catalog
                    .deployment
                    .user(name)
                    .filter(|def| def.password_hash.is_some() && def.password_hash == state.password_hash)
            });
            match still_valid {
                Some(def) => {
                    state.grant = Grant::new(def.roles.clone(), catalog.role_permissions(&def.roles));
                }
                None => {
                    state.valid = false;
                    invalidated += 1;
                    debug!(session_id = *id, "session invalidated");
                }
            }
        }
        if invalidated > 0 {
            info!(
                invalidated,
                generation = catalog.generation,
                "sessions invalidated by security change"
            );
        }
        invalidated
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.read().values().filter(|s| s.valid).count()
    }
}
