//! Integration tests for the wasmtime adapter using hand-written WAT modules

#![cfg(feature = "wasm")]

use docbridge_host::{
    BridgeError, ConvertRequest, Converter, FileValue, ModuleFault, Options, Session,
    WasmConversionModule, WasmError, WasmModuleConfig,
};
use serde_json::Value;

const WASI: &str = "wasi_snapshot_preview1";

/// Wrap `body` in a module exporting memory and a bump `malloc`
fn module(imports: &str, body: &str) -> String {
    format!(
        r#"(module
  {imports}
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (func (export "malloc") (param $n i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $n)))
    (local.get $p))
  {body})"#
    )
}

fn load(wat: &str) -> WasmConversionModule {
    WasmConversionModule::new(wat.as_bytes(), WasmModuleConfig::default())
        .expect("module should load")
}

fn noop_module() -> String {
    module("", r#"(func (export "convert") (param i32 i32))"#)
}

/// Writes `stdout`, a new file `fig.svg`, and echoes the request into `request.json`
fn writer_module() -> String {
    let imports = format!(
        r#"(import "{WASI}" "path_open" (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
  (import "{WASI}" "fd_write" (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (import "{WASI}" "fd_close" (func $fd_close (param i32) (result i32)))"#
    );
    let body = r#"(data (i32.const 16) "stdout")
  (data (i32.const 32) "<p>hi</p>")
  (data (i32.const 48) "fig.svg")
  (data (i32.const 64) "<svg/>")
  (data (i32.const 80) "request.json")
  (func $write_file (param $path i32) (param $path_len i32) (param $data i32) (param $data_len i32)
    ;; preopened staging root is fd 3; O_CREAT | O_TRUNC, FD_WRITE
    (if (i32.ne
          (call $path_open (i32.const 3) (i32.const 0) (local.get $path) (local.get $path_len)
                           (i32.const 9) (i64.const 64) (i64.const 0) (i32.const 0) (i32.const 200))
          (i32.const 0))
      (then unreachable))
    (i32.store (i32.const 208) (local.get $data))
    (i32.store (i32.const 212) (local.get $data_len))
    (if (i32.ne
          (call $fd_write (i32.load (i32.const 200)) (i32.const 208) (i32.const 1) (i32.const 216))
          (i32.const 0))
      (then unreachable))
    (drop (call $fd_close (i32.load (i32.const 200)))))
  (func (export "convert") (param $ptr i32) (param $len i32)
    (call $write_file (i32.const 16) (i32.const 6) (i32.const 32) (i32.const 9))
    (call $write_file (i32.const 48) (i32.const 7) (i32.const 64) (i32.const 6))
    (call $write_file (i32.const 80) (i32.const 12) (local.get $ptr) (local.get $len)))"#;
    module(&imports, body)
}

#[test]
fn test_inputs_survive_staging() {
    let mut session = Session::new(load(&noop_module()));
    let request = ConvertRequest::new(Options::new().with("to", "html"))
        .stdin("# T")
        .file("a.png", vec![0x89, b'P', b'N', b'G'])
        .file("chapters/صورة.md", "text")
        .file("empty.txt", "");

    let result = session.convert(&request).expect("conversion failed");

    assert_eq!(result.files, request.files);
    assert!(result.media_files.is_empty());
    assert_eq!(result.stdout, "");
}

#[test]
fn test_module_writes_are_classified() {
    let mut session = Session::new(load(&writer_module()));
    let request = ConvertRequest::new(Options::new().with("to", "html").with("standalone", true))
        .file("input.md", "# in");

    let result = session.convert(&request).unwrap();

    assert_eq!(result.stdout, "<p>hi</p>");
    assert_eq!(result.files["input.md"], FileValue::text("# in"));
    assert_eq!(result.media_files["fig.svg"], FileValue::text("<svg/>"));

    let echoed = result.media_files["request.json"].as_text().unwrap();
    let echoed: Value = serde_json::from_str(echoed).unwrap();
    assert_eq!(echoed["to"], "html");
    assert_eq!(echoed["standalone"], true);
}

#[test]
fn test_no_residue_between_wasm_runs() {
    let mut session = Session::new(load(&noop_module()));
    session
        .convert(&ConvertRequest::new(Options::new()).file("first.txt", "1"))
        .unwrap();

    let result = session
        .convert(&ConvertRequest::new(Options::new()).file("second.txt", "2"))
        .unwrap();

    assert_eq!(result.files.keys().collect::<Vec<_>>(), vec!["second.txt"]);
}

#[test]
fn test_trap_is_a_conversion_fault() {
    let wat = module("", r#"(func (export "convert") (param i32 i32) unreachable)"#);
    let mut session = Session::new(load(&wat));

    let err = session
        .convert(&ConvertRequest::new(Options::new()))
        .unwrap_err();

    match err {
        BridgeError::ConversionFault { fault, stderr } => {
            assert!(matches!(fault, ModuleFault::Trap { function: "convert", .. }));
            assert_eq!(stderr, "");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_proc_exit_status() {
    let imports = format!(r#"(import "{WASI}" "proc_exit" (func $proc_exit (param i32)))"#);
    let failing = module(
        &imports,
        r#"(func (export "convert") (param i32 i32) (call $proc_exit (i32.const 3)))"#,
    );
    let err = Session::new(load(&failing))
        .convert(&ConvertRequest::new(Options::new()))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ConversionFault { fault: ModuleFault::Exit(3), .. }
    ));

    let succeeding = module(
        &imports,
        r#"(func (export "convert") (param i32 i32) (call $proc_exit (i32.const 0)))"#,
    );
    let result = Session::new(load(&succeeding))
        .convert(&ConvertRequest::new(Options::new()).file("kept.txt", "k"))
        .unwrap();
    assert_eq!(result.files["kept.txt"], FileValue::text("k"));
}

#[test]
fn test_request_is_freed_after_nonzero_exit() {
    let imports = format!(r#"(import "{WASI}" "proc_exit" (func $proc_exit (param i32)))"#);
    let body = r#"(global $freed (mut i32) (i32.const 0))
  (global $calls (mut i32) (i32.const 0))
  (func (export "free") (param i32)
    (global.set $freed (i32.add (global.get $freed) (i32.const 1))))
  (func (export "convert") (param i32 i32)
    (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
    (if (i32.eq (global.get $calls) (i32.const 1))
      (then (call $proc_exit (i32.const 3))))
    ;; the first request was released despite the exit
    (if (i32.ne (global.get $freed) (i32.const 1)) (then unreachable)))"#;
    let mut session = Session::new(load(&module(&imports, body)));

    let err = session
        .convert(&ConvertRequest::new(Options::new()))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ConversionFault { fault: ModuleFault::Exit(3), .. }
    ));

    assert!(session.convert(&ConvertRequest::new(Options::new())).is_ok());
}

#[test]
fn test_missing_entry_point() {
    let mut session = Session::new(load(&noop_module()));

    let err = session
        .query(&docbridge_host::QueryRequest::new("version"))
        .unwrap_err();

    assert!(matches!(
        err,
        BridgeError::ConversionFault { fault: ModuleFault::MissingExport(ref name), .. } if name == "query"
    ));
}

#[test]
fn test_fuel_exhaustion() {
    let wat = module("", r#"(func (export "convert") (param i32 i32) (loop $spin (br $spin)))"#);
    let config = WasmModuleConfig {
        fuel_limit: Some(100_000),
        ..Default::default()
    };
    let module = WasmConversionModule::new(wat.as_bytes(), config).unwrap();
    let mut session = Session::new(module);

    let err = session
        .convert(&ConvertRequest::new(Options::new()))
        .unwrap_err();

    assert!(matches!(
        err,
        BridgeError::ConversionFault { fault: ModuleFault::FuelExhausted, .. }
    ));
}

#[test]
fn test_fuel_is_refilled_per_call() {
    let config = WasmModuleConfig {
        fuel_limit: Some(1_000_000),
        ..Default::default()
    };
    let module = WasmConversionModule::new(noop_module().as_bytes(), config).unwrap();
    let mut session = Session::new(module);

    for _ in 0..3 {
        session.convert(&ConvertRequest::new(Options::new())).unwrap();
        let remaining = session.module().remaining_fuel().unwrap();
        assert!(remaining > 0 && remaining < 1_000_000);
    }

    assert_eq!(load(&noop_module()).remaining_fuel(), None);
}

#[test]
fn test_unsafe_input_path_is_rejected() {
    let mut session = Session::new(load(&noop_module()));
    let request = ConvertRequest::new(Options::new()).file("../escape.txt", "x");

    let err = session.convert(&request).unwrap_err();

    match err {
        BridgeError::ConversionFault {
            fault: ModuleFault::Wasm(e),
            ..
        } => assert!(e.is_security_violation()),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_initializers_run_before_convert() {
    let body = r#"(global $ready (mut i32) (i32.const 0))
  (global $started (mut i32) (i32.const 0))
  (func (export "_initialize") (global.set $ready (i32.const 1)))
  (func (export "hs_init_with_rtsopts") (param $argc_ptr i32) (param $argv_ptr i32)
    ;; pandoc.wasm +RTS -H64m -RTS
    (if (i32.ne (i32.load (local.get $argc_ptr)) (i32.const 4)) (then unreachable))
    ;; argv[0] starts with 'p'
    (if (i32.ne (i32.load8_u (i32.load (i32.load (local.get $argv_ptr)))) (i32.const 112))
      (then unreachable))
    ;; argv[argc] is null
    (if (i32.ne (i32.load (i32.add (i32.load (local.get $argv_ptr)) (i32.const 16))) (i32.const 0))
      (then unreachable))
    (global.set $started (i32.const 1)))
  (func (export "convert") (param i32 i32)
    (if (i32.eqz (global.get $ready)) (then unreachable))
    (if (i32.eqz (global.get $started)) (then unreachable)))"#;
    let mut session = Session::new(load(&module("", body)));

    assert!(session.convert(&ConvertRequest::new(Options::new())).is_ok());
}

#[test]
fn test_failing_initializer_prevents_loading() {
    let body = r#"(func (export "_initialize") unreachable)"#;
    let err = match WasmConversionModule::new(module("", body).as_bytes(), Default::default()) {
        Ok(_) => panic!("initializer trap should fail loading"),
        Err(e) => e,
    };
    assert!(matches!(
        err,
        WasmError::Initialization { function: "_initialize", .. }
    ));
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noop.wat");
    std::fs::write(&path, noop_module()).unwrap();

    assert!(WasmConversionModule::from_file(&path, WasmModuleConfig::default()).is_ok());

    let missing = WasmConversionModule::from_file(dir.path().join("absent.wasm"), Default::default());
    assert!(matches!(missing, Err(WasmError::ReadModule { .. })));
}

#[tokio::test]
async fn test_wasm_module_behind_converter() {
    let converter = Converter::from_module(load(&writer_module()));

    let result = converter
        .convert(ConvertRequest::new(Options::new()))
        .await
        .unwrap();

    assert_eq!(result.stdout, "<p>hi</p>");
    assert!(result.media_files.contains_key("fig.svg"));
}
