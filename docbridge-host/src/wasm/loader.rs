//! wasmtime-backed conversion module
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                     WasmConversionModule Flow                               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                             │
//! │  1. Load (once)                                                             │
//! │     ├─ Compile module                                                       │
//! │     ├─ Preopen staging dir at `/`, link WASI Preview 1                      │
//! │     ├─ Run `_initialize` (or `__wasm_call_ctors`)                           │
//! │     └─ Run `hs_init_with_rtsopts(argc, argv)` when exported                 │
//! │                                                                             │
//! │  2. Invoke (per call)                                                       │
//! │     ├─ Stage the store into the staging dir                                 │
//! │     ├─ Refuel, malloc + write the request                                   │
//! │     ├─ Call `convert(ptr, len)` / `query(ptr, len)`                         │
//! │     ├─ free the request                                                     │
//! │     └─ Collect the staging dir back into the store (also after a trap)      │
//! │                                                                             │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Required exports
//!
//! | Export | Signature |
//! |--------|-----------|
//! | `memory` | linear memory |
//! | `malloc` | `(i32) -> i32` |
//! | `convert`, `query` | `(i32, i32) -> ()` |
//! | `free` | `(i32) -> ()`, optional |
//!
//! The instance is reused across calls; module-level state persists. The
//! request buffer is freed after a normal return or `proc_exit`. After a trap
//! it is left allocated.

use super::context::GuestSpec;
use super::error::WasmError;
use super::sandbox::StagingDir;
use crate::error::ModuleFault;
use crate::module::{ConversionModule, EntryPoint};
use crate::store::FileStore;
use std::path::Path;
use wasmtime::*;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::I32Exit;

/// Initializers tried in order; the first one exported is called
const INITIALIZERS: [&str; 2] = ["_initialize", "__wasm_call_ctors"];

const RTS_INIT: &str = "hs_init_with_rtsopts";

/// Configuration for loading a wasm conversion module
#[derive(Debug, Clone)]
pub struct WasmModuleConfig {
    /// Fuel per call (CPU limit). `None` disables fuel metering.
    pub fuel_limit: Option<u64>,

    /// Maximum WASM stack size in bytes
    pub max_stack_size: usize,

    /// argv[0] for the guest
    pub program_name: String,

    /// Runtime options passed to `hs_init_with_rtsopts`
    pub rts_args: Vec<String>,

    /// Let the guest write to the host's stdout/stderr
    pub inherit_stdio: bool,
}

impl Default for WasmModuleConfig {
    fn default() -> Self {
        Self {
            fuel_limit: None,
            max_stack_size: 1024 * 1024, // 1MB
            program_name: "pandoc.wasm".to_string(),
            rts_args: vec!["+RTS".into(), "-H64m".into(), "-RTS".into()],
            inherit_stdio: false,
        }
    }
}

/// State held by the wasmtime store
pub struct WasmState {
    pub wasi: WasiP1Ctx,
}

/// A loaded, initialized conversion module
pub struct WasmConversionModule {
    store: Store<WasmState>,
    instance: Instance,
    memory: Memory,
    malloc: TypedFunc<i32, i32>,
    free: Option<TypedFunc<i32, ()>>,
    staging: StagingDir,
    config: WasmModuleConfig,
}

impl WasmConversionModule {
    /// Compile and initialize a module from bytes (binary or text format)
    pub fn new(wasm_bytes: &[u8], config: WasmModuleConfig) -> Result<Self, WasmError> {
        let engine = build_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes).map_err(WasmError::ModuleCompilation)?;
        Self::instantiate(&engine, &module, config)
    }

    /// Read, compile and initialize a module from disk
    pub fn from_file(path: impl AsRef<Path>, config: WasmModuleConfig) -> Result<Self, WasmError> {
        let path = path.as_ref();
        let wasm_bytes = std::fs::read(path).map_err(|source| WasmError::ReadModule {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), size = wasm_bytes.len(), "Loading module");
        Self::new(&wasm_bytes, config)
    }

    fn instantiate(
        engine: &Engine,
        module: &Module,
        config: WasmModuleConfig,
    ) -> Result<Self, WasmError> {
        // 1. Staging directory and WASI context
        let staging = StagingDir::new()?;
        let wasi = GuestSpec::new(&config.program_name, staging.path())
            .inherit_stdio(config.inherit_stdio)
            .build_p1_ctx()?;

        // 2. Store
        let mut store = Store::new(engine, WasmState { wasi });
        if let Some(fuel) = config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| WasmError::StoreConfig(format!("Failed to set fuel: {}", e)))?;
        }

        // 3. Linker with WASI Preview 1 imports
        let mut linker: Linker<WasmState> = Linker::new(engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| &mut state.wasi).map_err(
            |e| WasmError::Instantiation(anyhow::anyhow!("Failed to add WASI to linker: {}", e)),
        )?;

        // 4. Instantiate
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(WasmError::Instantiation)?;

        // 5. Required exports
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| WasmError::ExportNotFound("memory".to_string()))?;
        let malloc = instance
            .get_typed_func::<i32, i32>(&mut store, "malloc")
            .map_err(|_| WasmError::ExportNotFound("malloc".to_string()))?;
        let free = instance.get_typed_func::<i32, ()>(&mut store, "free").ok();

        let mut loaded = Self {
            store,
            instance,
            memory,
            malloc,
            free,
            staging,
            config,
        };
        loaded.initialize()?;
        Ok(loaded)
    }

    /// Run the module's initializers and start its runtime
    fn initialize(&mut self) -> Result<(), WasmError> {
        for function in INITIALIZERS {
            let Ok(init) = self
                .instance
                .get_typed_func::<(), ()>(&mut self.store, function)
            else {
                continue;
            };
            init.call(&mut self.store, ())
                .map_err(|source| WasmError::Initialization { function, source })?;
            tracing::trace!(function, "Ran module initializer");
            break;
        }

        if let Ok(rts_init) = self
            .instance
            .get_typed_func::<(i32, i32), ()>(&mut self.store, RTS_INIT)
        {
            let mut argv = vec![self.config.program_name.clone()];
            argv.extend(self.config.rts_args.iter().cloned());
            let (argc_ptr, argv_ptr) = self.write_argv(&argv)?;
            rts_init
                .call(&mut self.store, (argc_ptr, argv_ptr))
                .map_err(|source| WasmError::Initialization {
                    function: RTS_INIT,
                    source,
                })?;
            tracing::debug!(args = ?argv, "Started module runtime");
        }
        Ok(())
    }

    /// Lay out `int *argc` and `char ***argv` in guest memory
    fn write_argv(&mut self, argv: &[String]) -> Result<(i32, i32), WasmError> {
        let argc = u32::try_from(argv.len())
            .map_err(|_| WasmError::MemoryAccess("Too many arguments".to_string()))?;
        let argc_ptr = self.alloc(4)?;
        self.write(argc_ptr, &argc.to_le_bytes())?;

        let table = self.alloc(4 * (argv.len() + 1))?;
        for (i, arg) in argv.iter().enumerate() {
            let mut bytes = arg.as_bytes().to_vec();
            bytes.push(0);
            let arg_ptr = self.alloc(bytes.len())?;
            self.write(arg_ptr, &bytes)?;
            self.write(table + 4 * i as i32, &(arg_ptr as u32).to_le_bytes())?;
        }
        self.write(table + 4 * argv.len() as i32, &0u32.to_le_bytes())?;

        let argv_ptr = self.alloc(4)?;
        self.write(argv_ptr, &(table as u32).to_le_bytes())?;
        Ok((argc_ptr, argv_ptr))
    }

    fn alloc(&mut self, len: usize) -> Result<i32, WasmError> {
        let size: i32 = len.try_into().map_err(|_| {
            WasmError::MemoryAccess(format!("Allocation too large: {} bytes exceeds i32::MAX", len))
        })?;
        let ptr = self
            .malloc
            .call(&mut self.store, size)
            .map_err(|e| WasmError::MemoryAccess(format!("malloc({}) failed: {}", size, e)))?;
        if ptr == 0 {
            return Err(WasmError::MemoryAccess(format!(
                "malloc({}) returned null",
                size
            )));
        }
        Ok(ptr)
    }

    fn write(&mut self, ptr: i32, bytes: &[u8]) -> Result<(), WasmError> {
        self.memory
            .write(&mut self.store, ptr as u32 as usize, bytes)
            .map_err(|e| {
                WasmError::MemoryAccess(format!(
                    "Failed to write {} bytes at {}: {}",
                    bytes.len(),
                    ptr,
                    e
                ))
            })
    }

    pub fn config(&self) -> &WasmModuleConfig {
        &self.config
    }

    /// Fuel left after the last call, when metering is enabled
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.config
            .fuel_limit
            .and_then(|_| self.store.get_fuel().ok())
    }
}

impl ConversionModule for WasmConversionModule {
    fn invoke(
        &mut self,
        entry: EntryPoint,
        request: &[u8],
        store: &mut FileStore,
    ) -> Result<(), ModuleFault> {
        let function = entry.export_name();
        let export = self
            .instance
            .get_typed_func::<(i32, i32), ()>(&mut self.store, function)
            .map_err(|_| ModuleFault::MissingExport(function.to_string()))?;

        // 1. Mirror the store into the guest filesystem
        self.staging.stage(store)?;

        // 2. Refuel
        if let Some(fuel) = self.config.fuel_limit {
            self.store
                .set_fuel(fuel)
                .map_err(|e| WasmError::StoreConfig(format!("Failed to set fuel: {}", e)))?;
        }

        // 3. Allocate and write the request
        let len: i32 = request.len().try_into().map_err(|_| {
            WasmError::MemoryAccess(format!(
                "Request too large: {} bytes exceeds i32::MAX",
                request.len()
            ))
        })?;
        let ptr = self.alloc(request.len().max(1))?;
        self.write(ptr, request)?;

        // 4. Run the export
        tracing::trace!(%entry, request_len = len, "Calling module export");
        let outcome = match export.call(&mut self.store, (ptr, len)) {
            Ok(()) => Ok(()),
            Err(e) => fault_from_call(function, e),
        };

        // 5. Cleanup, unless the instance trapped
        if matches!(outcome, Ok(()) | Err(ModuleFault::Exit(_))) {
            if let Some(free) = &self.free {
                if let Err(e) = free.call(&mut self.store, ptr) {
                    tracing::warn!(error = %e, "Failed to free request memory");
                }
            }
        }

        // 6. Whatever the module wrote is collected, even after a fault
        let collected = self.staging.collect(store);
        outcome?;
        collected?;
        Ok(())
    }
}

fn build_engine(config: &WasmModuleConfig) -> Result<Engine, WasmError> {
    let mut engine_config = Config::new();

    // CPU limiting is opt-in
    engine_config.consume_fuel(config.fuel_limit.is_some());

    engine_config.max_wasm_stack(config.max_stack_size);

    // Disable memory64 for wasm32 compatibility
    engine_config.wasm_memory64(false);

    Engine::new(&engine_config).map_err(WasmError::EngineCreation)
}

/// Map a failed export call onto a fault; `proc_exit(0)` is success
fn fault_from_call(function: &'static str, error: anyhow::Error) -> Result<(), ModuleFault> {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return match exit.0 {
            0 => Ok(()),
            code => Err(ModuleFault::Exit(code)),
        };
    }
    if error
        .downcast_ref::<Trap>()
        .is_some_and(|t| *t == Trap::OutOfFuel)
    {
        return Err(ModuleFault::FuelExhausted);
    }
    Err(ModuleFault::Trap {
        function,
        source: error,
    })
}
