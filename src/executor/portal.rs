//! Scoped execution contexts.
//!
//! A portal holds a planned statement while it runs. Portals created for
//! internal execution are invisible: they are registered so the session
//! can account for them, but do not show up in the cursor listing. A
//! [`ScopedPortal`] removes itself from its [`PortalManager`] when dropped,
//! so it is released on every exit path, including errors.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::FunnelError;
use crate::executor::{DestReceiver, FetchCount, ParamList, PlannedStatement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalState {
    /// Created, no statement attached.
    New,
    /// Statement attached, not started.
    Defined,
    /// Started, may run.
    Ready,
    /// Ran to completion.
    Done,
    /// A run failed; the portal cannot be used again.
    Failed,
}

#[derive(Debug, Default)]
struct PortalRegistry {
    /// Portal name -> visible in the cursor listing.
    portals: BTreeMap<String, bool>,
    next_unnamed: u64,
}

/// Registry of the session's portals.
#[derive(Debug, Clone, Default)]
pub struct PortalManager {
    registry: Rc<RefCell<PortalRegistry>>,
}

impl PortalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new invisible portal with a unique name.
    pub fn create_portal(&self) -> ScopedPortal {
        let name = {
            let mut registry = self.registry.borrow_mut();
            loop {
                registry.next_unnamed += 1;
                let candidate = format!("<unnamed portal {}>", registry.next_unnamed);
                if !registry.portals.contains_key(&candidate) {
                    registry.portals.insert(candidate.clone(), false);
                    break candidate;
                }
            }
        };
        ScopedPortal::new(name, Rc::clone(&self.registry))
    }

    /// A cursor: a portal that appears in [`visible_portals`](Self::visible_portals).
    pub fn create_cursor(&self, name: &str) -> Result<ScopedPortal, FunnelError> {
        let mut registry = self.registry.borrow_mut();
        if registry.portals.contains_key(name) {
            return Err(FunnelError::rejected(format!(
                "cursor \"{name}\" already exists"
            )));
        }
        registry.portals.insert(name.to_string(), true);
        drop(registry);
        Ok(ScopedPortal::new(name.to_string(), Rc::clone(&self.registry)))
    }

    /// Names of portals listed to users, like `pg_cursors`.
    pub fn visible_portals(&self) -> Vec<String> {
        self.registry
            .borrow()
            .portals
            .iter()
            .filter(|(_, visible)| **visible)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of live portals, visible or not.
    pub fn active_count(&self) -> usize {
        self.registry.borrow().portals.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.borrow().portals.contains_key(name)
    }
}

/// A portal owned by one caller, deregistered on drop.
pub struct ScopedPortal {
    name: String,
    registry: Rc<RefCell<PortalRegistry>>,
    state: PortalState,
    source_text: Option<String>,
    statement: Option<Box<dyn PlannedStatement>>,
    params: ParamList,
}

impl ScopedPortal {
    fn new(name: String, registry: Rc<RefCell<PortalRegistry>>) -> Self {
        Self {
            name,
            registry,
            state: PortalState::New,
            source_text: None,
            statement: None,
            params: ParamList::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PortalState {
        self.state
    }

    pub fn source_text(&self) -> Option<&str> {
        self.source_text.as_deref()
    }

    pub fn is_visible(&self) -> bool {
        self.registry
            .borrow()
            .portals
            .get(&self.name)
            .copied()
            .unwrap_or(false)
    }

    /// Attach the statement to run (`PortalDefineQuery`).
    pub fn define_query(
        &mut self,
        source_text: &str,
        statement: Box<dyn PlannedStatement>,
    ) -> Result<(), FunnelError> {
        if self.state != PortalState::New {
            return Err(self.bad_state("define a query in"));
        }
        self.source_text = Some(source_text.to_string());
        self.statement = Some(statement);
        self.state = PortalState::Defined;
        Ok(())
    }

    /// Bind parameters and prepare to run (`PortalStart`).
    pub fn start(&mut self, params: &ParamList) -> Result<(), FunnelError> {
        if self.state != PortalState::Defined {
            return Err(self.bad_state("start"));
        }
        self.params = params.clone();
        self.state = PortalState::Ready;
        Ok(())
    }

    /// Run the statement into `dest` (`PortalRun`). With
    /// [`FetchCount::All`] the portal is done afterwards.
    pub fn run(
        &mut self,
        count: FetchCount,
        dest: &mut dyn DestReceiver,
    ) -> Result<u64, FunnelError> {
        if self.state != PortalState::Ready {
            return Err(self.bad_state("run"));
        }
        let Some(statement) = self.statement.as_mut() else {
            return Err(self.bad_state("run"));
        };
        match statement.run(&self.params, count, dest) {
            Ok(produced) => {
                if count == FetchCount::All || !count.is_satisfied(produced) {
                    self.state = PortalState::Done;
                }
                Ok(produced)
            }
            Err(e) => {
                self.state = PortalState::Failed;
                Err(e)
            }
        }
    }

    fn bad_state(&self, action: &str) -> FunnelError {
        FunnelError::InternalError(format!(
            "cannot {action} portal \"{}\" in state {:?}",
            self.name, self.state
        ))
    }
}

impl Drop for ScopedPortal {
    fn drop(&mut self) {
        // Only fails when dropped while unwinding out of a registry call.
        if let Ok(mut registry) = self.registry.try_borrow_mut() {
            registry.portals.remove(&self.name);
        }
    }
}

impl std::fmt::Debug for ScopedPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedPortal")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("source_text", &self.source_text)
            .finish()
    }
}
