//! Unit → context registry
//!
//! Every execution unit is bound to at most one context, either as its
//! owner or as a derived (importing) unit. The first attach anywhere in
//! the process installs the termination hook; a one-shot atomic flag
//! guarantees it is installed exactly once. Concurrent attachers wait for
//! that install to finish before arming their unit.
//!
//! ```text
//!   attach_owning(u)      u ──Owning──► ctx
//!   attach_derived(d, u)  d ──Derived─► ctx   (ctx.attachments += d)
//!   detach_derived(d)     d removed           (ctx.attachments -= d)
//!   exit(u)               teardown(ctx), release, unbind u
//!   exit(d)               detach_derived(d)
//! ```
//!
//! Lock order: registry, then the context's client lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;

use cactx_core::error::{CaError, CaResult};
use cactx_core::id::{ContextId, UnitId};
use cactx_core::{kdebug, kerror, kinfo};

use crate::context::{Context, ContextServices};
use crate::dispatcher::CompletionDispatcher;
use crate::hooks::ThreadExitHooks;
use crate::host::{ExitHook, TerminationHooks};
use crate::teardown::{teardown, TeardownReport};

/// How a unit is bound to its context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owning,
    Derived,
}

#[derive(Clone)]
struct Binding {
    context: Arc<Context>,
    role: Role,
}

/// Process-wide association of units to contexts
pub struct ContextRegistry {
    units: Mutex<HashMap<UnitId, Binding>>,
    hooks: Arc<dyn TerminationHooks>,
    /// One-shot claim on the install
    hook_installed: AtomicBool,
    /// Set once the claimed install has completed
    hook_ready: AtomicBool,
    this: Weak<ContextRegistry>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<ContextRegistry>> = OnceLock::new();

impl ContextRegistry {
    pub fn new(hooks: Arc<dyn TerminationHooks>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            units: Mutex::new(HashMap::new()),
            hooks,
            hook_installed: AtomicBool::new(false),
            hook_ready: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Registry used by the process, driven by thread-exit hooks
    pub fn global() -> &'static Arc<ContextRegistry> {
        GLOBAL_REGISTRY.get_or_init(|| ContextRegistry::new(ThreadExitHooks::new()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UnitId, Binding>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_exit_hook(&self) -> CaResult<()> {
        loop {
            if self.hook_ready.load(Ordering::Acquire) {
                return Ok(());
            }
            if !self.hook_installed.swap(true, Ordering::AcqRel) {
                break;
            }
            // another attacher is installing; a failed install releases the claim
            thread::yield_now();
        }
        let registry = self.this.clone();
        let hook: ExitHook = Arc::new(move |unit: UnitId| {
            if let Some(registry) = registry.upgrade() {
                registry.on_unit_exit(unit);
            }
        });
        if let Err(e) = self.hooks.install(hook) {
            self.hook_installed.store(false, Ordering::Release);
            kerror!("termination hook install failed: {}", e);
            return Err(e);
        }
        self.hook_ready.store(true, Ordering::Release);
        kdebug!("termination hook installed");
        Ok(())
    }

    /// Create a context owned by `unit`
    pub fn attach_owning(&self, unit: UnitId, services: ContextServices) -> CaResult<Arc<Context>> {
        self.ensure_exit_hook()?;

        let ctx = {
            let mut units = self.lock();
            if units.contains_key(&unit) {
                return Err(CaError::AlreadyAttached);
            }
            units.try_reserve(1).map_err(|_| CaError::AllocationFailure)?;

            let ctx = Context::new(unit, services);
            CompletionDispatcher::start(&ctx)?;
            units.insert(
                unit,
                Binding {
                    context: Arc::clone(&ctx),
                    role: Role::Owning,
                },
            );
            ctx
        };

        self.hooks.arm(unit);
        kinfo!("{} attached to {} as owner", unit, ctx.id());
        Ok(ctx)
    }

    /// Share `owner_hint`'s context with `unit`
    ///
    /// Idempotent: a unit already bound gets its existing context back.
    pub fn attach_derived(&self, unit: UnitId, owner_hint: UnitId) -> CaResult<Arc<Context>> {
        self.ensure_exit_hook()?;

        let ctx = {
            let mut units = self.lock();
            if let Some(existing) = units.get(&unit) {
                return Ok(Arc::clone(&existing.context));
            }
            let ctx = units
                .get(&owner_hint)
                .map(|b| Arc::clone(&b.context))
                .ok_or(CaError::NoOwningContext)?;
            if ctx.is_torn_down() {
                return Err(CaError::NoOwningContext);
            }
            units.try_reserve(1).map_err(|_| CaError::AllocationFailure)?;
            ctx.push_attachment(unit, Arc::downgrade(&ctx))?;
            units.insert(
                unit,
                Binding {
                    context: Arc::clone(&ctx),
                    role: Role::Derived,
                },
            );
            ctx
        };

        self.hooks.arm(unit);
        kdebug!("{} imported {} from {}", unit, ctx.id(), owner_hint);
        Ok(ctx)
    }

    /// Remove a derived unit's binding
    pub fn detach_derived(&self, unit: UnitId) -> CaResult<()> {
        let mut units = self.lock();
        match units.get(&unit) {
            Some(b) if b.role == Role::Derived => {}
            _ => return Err(CaError::NotAttached),
        }
        if let Some(binding) = units.remove(&unit) {
            binding.context.remove_attachment(unit);
            kdebug!("{} detached from {}", unit, binding.context.id());
        }
        Ok(())
    }

    /// Context bound to `unit`
    pub fn lookup(&self, unit: UnitId) -> CaResult<Arc<Context>> {
        self.lock()
            .get(&unit)
            .map(|b| Arc::clone(&b.context))
            .ok_or(CaError::NotAttached)
    }

    pub fn role(&self, unit: UnitId) -> Option<Role> {
        self.lock().get(&unit).map(|b| b.role)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop a derived binding during teardown
    ///
    /// Returns false if the unit was already gone or is bound elsewhere.
    pub(crate) fn unbind_derived(&self, unit: UnitId, ctx: ContextId) -> bool {
        let mut units = self.lock();
        match units.get(&unit) {
            Some(b) if b.role == Role::Derived && b.context.id() == ctx => {
                units.remove(&unit);
                true
            }
            _ => false,
        }
    }

    /// Termination hook body
    ///
    /// An owner's exit tears its context down, releases the context's
    /// primitives and removes the owner's binding last. A derived unit's
    /// exit only detaches it.
    pub fn on_unit_exit(&self, unit: UnitId) -> Option<TeardownReport> {
        let binding = self.lock().get(&unit).cloned()?;
        match binding.role {
            Role::Derived => {
                if let Err(e) = self.detach_derived(unit) {
                    kdebug!("{} exiting: detach skipped: {}", unit, e);
                }
                None
            }
            Role::Owning => {
                let ctx = binding.context;
                let report = teardown(&ctx, unit, self);
                ctx.release_primitives();
                let mut units = self.lock();
                if units.get(&unit).is_some_and(|b| b.context.id() == ctx.id()) {
                    units.remove(&unit);
                }
                report
            }
        }
    }
}
