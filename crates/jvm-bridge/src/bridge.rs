//! The bridge instance and module load.
//!
//! A [`Bridge`] owns the runtime handle, the member cache and the managed
//! singleton table. The library's load entry point creates one with
//! [`Bridge::on_load`] and installs it process-wide; tests and embedders
//! can also create private instances with [`Bridge::new`]. The unload entry
//! point removes it again with [`unload`], after which the library can be
//! loaded anew.

use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::exception::ExceptionReporter;
use crate::export::{ExportTable, ManagedSingletons};
use crate::logging;
use crate::resolver::MemberResolver;
use crate::runtime::ManagedRuntime;

static GLOBAL: Lazy<RwLock<Option<Arc<Bridge>>>> = Lazy::new(|| RwLock::new(None));

/// Shared state of one runtime connection.
pub struct Bridge {
    runtime: Arc<dyn ManagedRuntime>,
    config: BridgeConfig,
    resolver: MemberResolver,
    singletons: ManagedSingletons,
    reporter: RwLock<Option<Arc<dyn ExceptionReporter>>>,
}

impl Bridge {
    /// Creates a bridge that is not installed process-wide.
    pub fn new(runtime: Arc<dyn ManagedRuntime>, config: BridgeConfig) -> Arc<Self> {
        let resolver =
            MemberResolver::new(runtime.clone(), config.export_policy(), &config.support_class);
        Arc::new(Self {
            runtime,
            resolver,
            singletons: ManagedSingletons::new(),
            reporter: RwLock::new(None),
            config,
        })
    }

    /// Module load: builds the bridge, registers `exports` and installs the
    /// bridge process-wide.
    ///
    /// Fails with [`BridgeError::AlreadyLoaded`] if a bridge is already
    /// installed.
    pub fn on_load(
        runtime: Arc<dyn ManagedRuntime>,
        config: BridgeConfig,
        exports: &ExportTable,
    ) -> BridgeResult<Arc<Self>> {
        if is_loaded() {
            return Err(BridgeError::AlreadyLoaded);
        }
        config.validate()?;
        logging::set_min_level(config.min_log_level);
        logging::set_tag(&config.log_tag);

        let bridge = Bridge::new(runtime, config);
        bridge.with_attached_thread(|env| {
            exports.register(env)?;
            // The support class is optional; warm the cache when it exists.
            match env.find_class(&env.bridge().config.support_class) {
                Ok(_) => Ok(()),
                Err(BridgeError::ClassNotFound { class }) => {
                    debug!("Support class {} not present", class);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        })?;

        {
            let mut global = GLOBAL.write();
            if global.is_some() {
                return Err(BridgeError::AlreadyLoaded);
            }
            *global = Some(bridge.clone());
        }
        info!(
            "Bridge loaded on {} runtime, interface {}, {} exported classes",
            bridge.runtime.name(),
            bridge.config.version,
            exports.class_count()
        );
        Ok(bridge)
    }

    pub fn runtime(&self) -> &Arc<dyn ManagedRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &MemberResolver {
        &self.resolver
    }

    pub fn singletons(&self) -> &ManagedSingletons {
        &self.singletons
    }

    /// Installs a hook called for every translated managed exception.
    pub fn set_exception_reporter(&self, reporter: Option<Arc<dyn ExceptionReporter>>) {
        *self.reporter.write() = reporter;
    }

    pub fn exception_reporter(&self) -> Option<Arc<dyn ExceptionReporter>> {
        self.reporter.read().clone()
    }
}

/// Returns the process-wide bridge installed by [`Bridge::on_load`].
pub fn global() -> BridgeResult<Arc<Bridge>> {
    GLOBAL.read().clone().ok_or(BridgeError::NotLoaded)
}

/// Returns true once module load has completed.
pub fn is_loaded() -> bool {
    GLOBAL.read().is_some()
}

/// Uninstalls the process-wide bridge and returns it. Callers still
/// holding it keep a working bridge; new entries see
/// [`BridgeError::NotLoaded`] until the next load.
pub fn unload() -> Option<Arc<Bridge>> {
    let bridge = GLOBAL.write().take();
    if bridge.is_some() {
        info!("Bridge unloaded");
    }
    bridge
}
